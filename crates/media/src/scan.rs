//! Incremental MP4 box scanning over a sequential byte stream.

use fraglift_protocol::VideoMetadata;
use tracing::{debug, trace};

use crate::MediaError;
use crate::moov::{self, SampleRef, SubtitleTrackInfo};

/// Largest box the scanner is willing to buffer in memory. `moov` boxes are
/// a few MiB even for long movies; anything bigger is treated as corrupt.
const MAX_CAPTURE: u64 = 64 * 1024 * 1024;

/// One timed subtitle cue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleCue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// A subtitle track whose samples were all harvested from the stream.
#[derive(Debug, Clone)]
pub struct SubtitleTrack {
    pub track_id: u32,
    pub name: Option<String>,
    pub language: Option<String>,
    pub forced: bool,
    pub cues: Vec<SubtitleCue>,
}

/// Events emitted by [`Mp4Scanner::feed`].
#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// The `moov` box was parsed. `subtitle_track_count` is how many
    /// [`MediaEvent::SubtitleTrack`] events may still follow.
    Metadata {
        metadata: VideoMetadata,
        subtitle_track_count: usize,
    },
    /// Every sample of one subtitle track has been collected.
    SubtitleTrack(SubtitleTrack),
}

enum ScanState {
    /// Accumulating a box header (8 or 16 bytes).
    Header(Vec<u8>),
    /// Buffering a box payload we parse (`ftyp`, `moov`).
    Capture {
        fourcc: [u8; 4],
        remaining: u64,
        buf: Vec<u8>,
    },
    /// Skipping a box payload we do not parse.
    Skip { remaining: u64 },
    /// A zero-sized box extends to EOF; nothing further to parse.
    Drained,
}

struct PendingSample {
    sample: SampleRef,
    buf: Vec<u8>,
    /// Set when the stream passed part of this sample before the tables
    /// were known; it can never complete.
    dead: bool,
}

struct PendingTrack {
    info: SubtitleTrackInfo,
    samples: Vec<PendingSample>,
}

impl PendingTrack {
    fn is_complete(&self) -> bool {
        self.samples
            .iter()
            .all(|s| s.buf.len() as u32 == s.sample.size)
    }

    fn is_dead(&self) -> bool {
        self.samples.is_empty() || self.samples.iter().any(|s| s.dead)
    }
}

/// Streaming scanner fed file bytes strictly in offset order.
pub struct Mp4Scanner {
    pos: u64,
    state: ScanState,
    brands: String,
    moov_seen: bool,
    pending: Vec<PendingTrack>,
}

impl Default for Mp4Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Mp4Scanner {
    pub fn new() -> Self {
        Self {
            pos: 0,
            state: ScanState::Header(Vec::new()),
            brands: String::new(),
            moov_seen: false,
            pending: Vec::new(),
        }
    }

    /// Returns `true` once structural metadata has been emitted.
    pub fn metadata_seen(&self) -> bool {
        self.moov_seen
    }

    /// Feeds the next sequential chunk of the file.
    ///
    /// Must be called with contiguous bytes in offset order; the producer
    /// guarantees this by feeding fragments as it slices them.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<MediaEvent>, MediaError> {
        let chunk_start = self.pos;
        let mut events = Vec::new();

        self.scan_boxes(chunk_start, chunk, &mut events)?;
        self.harvest(chunk_start, chunk);
        self.pos = chunk_start + chunk.len() as u64;
        self.collect_finished_tracks(&mut events);

        Ok(events)
    }

    fn scan_boxes(
        &mut self,
        chunk_start: u64,
        chunk: &[u8],
        events: &mut Vec<MediaEvent>,
    ) -> Result<(), MediaError> {
        let mut rest = chunk;
        while !rest.is_empty() {
            match &mut self.state {
                ScanState::Drained => return Ok(()),
                ScanState::Skip { remaining } => {
                    let take = (*remaining).min(rest.len() as u64) as usize;
                    *remaining -= take as u64;
                    rest = &rest[take..];
                    if *remaining == 0 {
                        self.state = ScanState::Header(Vec::new());
                    }
                }
                ScanState::Capture {
                    fourcc,
                    remaining,
                    buf,
                } => {
                    let take = (*remaining).min(rest.len() as u64) as usize;
                    buf.extend_from_slice(&rest[..take]);
                    *remaining -= take as u64;
                    rest = &rest[take..];
                    if *remaining == 0 {
                        let fourcc = *fourcc;
                        let payload = std::mem::take(buf);
                        self.state = ScanState::Header(Vec::new());
                        // Absolute stream position where this box ended.
                        let box_end = chunk_start + (chunk.len() - rest.len()) as u64;
                        self.on_box(fourcc, payload, box_end, events)?;
                    }
                }
                ScanState::Header(buf) => {
                    let want = if buf.len() >= 8 && buf[0..4] == [0, 0, 0, 1] {
                        16
                    } else {
                        8
                    };
                    let take = (want - buf.len()).min(rest.len());
                    buf.extend_from_slice(&rest[..take]);
                    rest = &rest[take..];
                    if buf.len() < 8 {
                        continue;
                    }

                    let size32 = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as u64;
                    if size32 == 1 && buf.len() < 16 {
                        continue; // need the 64-bit largesize
                    }

                    let fourcc: [u8; 4] = buf[4..8].try_into().unwrap();
                    let (header_len, total) = if size32 == 1 {
                        (16u64, u64::from_be_bytes(buf[8..16].try_into().unwrap()))
                    } else {
                        (8u64, size32)
                    };

                    if size32 == 0 {
                        trace!(fourcc = %fourcc_str(&fourcc), "box extends to EOF, draining");
                        self.state = ScanState::Drained;
                        return Ok(());
                    }
                    if total < header_len {
                        return Err(MediaError::Malformed("box size smaller than its header"));
                    }

                    let payload = total - header_len;
                    if matches!(&fourcc, b"moov" | b"ftyp") {
                        if payload > MAX_CAPTURE {
                            return Err(MediaError::OversizedBox {
                                fourcc: fourcc_str(&fourcc),
                                size: payload,
                            });
                        }
                        self.state = ScanState::Capture {
                            fourcc,
                            remaining: payload,
                            buf: Vec::with_capacity(payload as usize),
                        };
                    } else {
                        self.state = ScanState::Skip { remaining: payload };
                    }
                }
            }
        }
        Ok(())
    }

    fn on_box(
        &mut self,
        fourcc: [u8; 4],
        payload: Vec<u8>,
        box_end: u64,
        events: &mut Vec<MediaEvent>,
    ) -> Result<(), MediaError> {
        match &fourcc {
            b"ftyp" => {
                let mut brands: Vec<String> = Vec::new();
                if let Some(major) = payload.get(0..4) {
                    brands.push(String::from_utf8_lossy(major).trim().to_string());
                }
                for compat in payload.get(8..).unwrap_or(&[]).chunks_exact(4) {
                    let b = String::from_utf8_lossy(compat).trim().to_string();
                    if !brands.contains(&b) {
                        brands.push(b);
                    }
                }
                self.brands = brands.join(", ");
            }
            b"moov" if !self.moov_seen => {
                self.moov_seen = true;
                let movie = moov::parse_moov(&payload, std::mem::take(&mut self.brands))?;
                debug!(
                    video = movie.metadata.video_tracks.len(),
                    audio = movie.metadata.audio_tracks.len(),
                    subs = movie.subtitle_tracks.len(),
                    "parsed moov"
                );
                let subtitle_track_count = movie.subtitle_tracks.len();
                for info in movie.subtitle_tracks {
                    let samples = info
                        .samples
                        .iter()
                        .map(|&sample| PendingSample {
                            sample,
                            buf: Vec::new(),
                            // Anything before the end of the moov capture
                            // has already streamed past and is gone.
                            dead: sample.offset < box_end,
                        })
                        .collect();
                    self.pending.push(PendingTrack { info, samples });
                }
                events.push(MediaEvent::Metadata {
                    metadata: movie.metadata,
                    subtitle_track_count,
                });
            }
            _ => {}
        }
        Ok(())
    }

    /// Copies any wanted subtitle sample bytes out of the current chunk.
    fn harvest(&mut self, chunk_start: u64, chunk: &[u8]) {
        let chunk_end = chunk_start + chunk.len() as u64;
        for track in &mut self.pending {
            for slot in &mut track.samples {
                if slot.dead || slot.buf.len() as u32 == slot.sample.size {
                    continue;
                }
                let begin = slot.sample.offset + slot.buf.len() as u64;
                let end = slot.sample.offset + slot.sample.size as u64;
                if begin >= chunk_end || end <= chunk_start {
                    continue;
                }
                if begin < chunk_start {
                    // Fill position fell behind the stream; unreachable now.
                    slot.dead = true;
                    continue;
                }
                let from = (begin - chunk_start) as usize;
                let to = (end.min(chunk_end) - chunk_start) as usize;
                slot.buf.extend_from_slice(&chunk[from..to]);
            }
        }
    }

    fn collect_finished_tracks(&mut self, events: &mut Vec<MediaEvent>) {
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].is_complete() && !self.pending[i].is_dead() {
                let track = self.pending.remove(i);
                let timescale = track.info.timescale.max(1) as u64;
                let cues = track
                    .samples
                    .iter()
                    .map(|slot| {
                        let start_ms = slot.sample.start * 1000 / timescale;
                        let end_ms =
                            (slot.sample.start + slot.sample.duration as u64) * 1000 / timescale;
                        SubtitleCue {
                            start_ms,
                            end_ms,
                            text: decode_tx3g(&slot.buf),
                        }
                    })
                    .filter(|cue| !cue.text.is_empty())
                    .collect();
                events.push(MediaEvent::SubtitleTrack(SubtitleTrack {
                    track_id: track.info.track_id,
                    name: track.info.name,
                    language: track.info.language,
                    forced: track.info.forced,
                    cues,
                }));
            } else {
                i += 1;
            }
        }
    }
}

/// Decodes a tx3g sample: big-endian text length followed by UTF-8.
fn decode_tx3g(sample: &[u8]) -> String {
    if sample.len() < 2 {
        return String::new();
    }
    let len = u16::from_be_bytes([sample[0], sample[1]]) as usize;
    let end = (2 + len).min(sample.len());
    String::from_utf8_lossy(&sample[2..end]).into_owned()
}

fn fourcc_str(fourcc: &[u8; 4]) -> String {
    String::from_utf8_lossy(fourcc).into_owned()
}
