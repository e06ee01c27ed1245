//! `moov` box parsing: track summaries and subtitle sample tables.

use fraglift_protocol::{TrackInfo, VideoMetadata};

use crate::MediaError;

/// Location and timing of one subtitle sample inside the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SampleRef {
    /// Absolute byte offset in the file.
    pub offset: u64,
    pub size: u32,
    /// Start time in track timescale units.
    pub start: u64,
    /// Duration in track timescale units.
    pub duration: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct SubtitleTrackInfo {
    pub track_id: u32,
    pub name: Option<String>,
    pub language: Option<String>,
    pub forced: bool,
    pub timescale: u32,
    pub samples: Vec<SampleRef>,
}

#[derive(Debug, Clone)]
pub(crate) struct Movie {
    pub metadata: VideoMetadata,
    pub subtitle_tracks: Vec<SubtitleTrackInfo>,
}

/// Iterates child boxes of a container payload.
struct BoxIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BoxIter<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for BoxIter<'a> {
    type Item = ([u8; 4], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        if rest.len() < 8 {
            return None;
        }
        let size32 = u32::from_be_bytes(rest[0..4].try_into().ok()?) as u64;
        let fourcc: [u8; 4] = rest[4..8].try_into().ok()?;
        let (header, size) = if size32 == 1 {
            if rest.len() < 16 {
                return None;
            }
            (16usize, u64::from_be_bytes(rest[8..16].try_into().ok()?))
        } else if size32 == 0 {
            // Box extends to the end of the container.
            (8usize, rest.len() as u64)
        } else {
            (8usize, size32)
        };
        if size < header as u64 || size > rest.len() as u64 {
            return None;
        }
        let payload = &rest[header..size as usize];
        self.pos += size as usize;
        Some((fourcc, payload))
    }
}

fn find<'a>(data: &'a [u8], fourcc: &[u8; 4]) -> Option<&'a [u8]> {
    BoxIter::new(data).find(|(f, _)| f == fourcc).map(|(_, p)| p)
}

fn be_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2)
        .map(|b| u16::from_be_bytes(b.try_into().unwrap()))
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes(b.try_into().unwrap()))
}

fn be_u64(data: &[u8], at: usize) -> Option<u64> {
    data.get(at..at + 8)
        .map(|b| u64::from_be_bytes(b.try_into().unwrap()))
}

/// Decodes the ISO-639-2 language packed into mdhd (three 5-bit letters).
fn decode_language(packed: u16) -> Option<String> {
    let chars: Vec<u8> = (0..3)
        .map(|i| (((packed >> (10 - i * 5)) & 0x1F) as u8) + 0x60)
        .collect();
    let lang = String::from_utf8(chars).ok()?;
    if lang == "und" { None } else { Some(lang) }
}

struct Mdhd {
    timescale: u32,
    duration: u64,
    language: Option<String>,
}

fn parse_mdhd(data: &[u8]) -> Option<Mdhd> {
    let version = *data.first()?;
    let (timescale, duration, lang_at) = if version == 1 {
        (be_u32(data, 20)?, be_u64(data, 24)?, 32)
    } else {
        (be_u32(data, 12)?, be_u32(data, 16)? as u64, 20)
    };
    Some(Mdhd {
        timescale,
        duration,
        language: decode_language(be_u16(data, lang_at)?),
    })
}

struct Tkhd {
    track_id: u32,
    width: u32,
    height: u32,
}

fn parse_tkhd(data: &[u8]) -> Option<Tkhd> {
    let version = *data.first()?;
    let (id_at, wh_at) = if version == 1 { (20, 88) } else { (12, 76) };
    Some(Tkhd {
        track_id: be_u32(data, id_at)?,
        // 16.16 fixed point.
        width: be_u32(data, wh_at)? >> 16,
        height: be_u32(data, wh_at + 4)? >> 16,
    })
}

/// Handler type plus the trailing handler name (null-terminated UTF-8).
fn parse_hdlr(data: &[u8]) -> Option<([u8; 4], Option<String>)> {
    let handler: [u8; 4] = data.get(8..12)?.try_into().ok()?;
    let name_bytes = data.get(24..).unwrap_or(&[]);
    let end = name_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(name_bytes.len());
    let name = std::str::from_utf8(&name_bytes[..end])
        .ok()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);
    Some((handler, name))
}

struct SampleTables {
    codec: String,
    forced: bool,
    channel_count: Option<u16>,
    sample_rate: Option<u32>,
    durations: Vec<u32>,
    sizes: Vec<u32>,
    /// (first_chunk, samples_per_chunk) runs, 1-based chunks.
    chunk_runs: Vec<(u32, u32)>,
    chunk_offsets: Vec<u64>,
}

fn parse_stbl(stbl: &[u8]) -> Result<SampleTables, MediaError> {
    let stsd = find(stbl, b"stsd").ok_or(MediaError::Malformed("missing stsd"))?;
    let mut codec = String::new();
    let mut forced = false;
    let mut channel_count = None;
    let mut sample_rate = None;

    // First sample entry: size(4) fourcc(4) body.
    if let Some(entry) = stsd.get(8..) {
        if let Some(fourcc) = entry.get(4..8) {
            codec = String::from_utf8_lossy(fourcc).trim().to_string();
        }
        let body = entry.get(8..).unwrap_or(&[]);
        match codec.as_str() {
            "tx3g" => {
                // displayFlags: bit 31 = all samples forced, bit 30 = some forced.
                if let Some(flags) = be_u32(body, 8) {
                    forced = flags & 0xC000_0000 != 0;
                }
            }
            "mp4a" | "ac-3" | "ec-3" | "opus" | "flac" => {
                channel_count = be_u16(body, 16);
                sample_rate = be_u32(body, 24).map(|fixed| fixed >> 16);
            }
            _ => {}
        }
    }

    let mut durations = Vec::new();
    if let Some(stts) = find(stbl, b"stts") {
        let count = be_u32(stts, 4).unwrap_or(0) as usize;
        for i in 0..count {
            let at = 8 + i * 8;
            let (Some(n), Some(delta)) = (be_u32(stts, at), be_u32(stts, at + 4)) else {
                break;
            };
            // Guard against absurd run lengths in corrupt files.
            durations.extend(std::iter::repeat_n(delta, (n as usize).min(1 << 20)));
        }
    }

    let mut sizes = Vec::new();
    if let Some(stsz) = find(stbl, b"stsz") {
        let uniform = be_u32(stsz, 4).unwrap_or(0);
        let count = be_u32(stsz, 8).unwrap_or(0) as usize;
        if uniform != 0 {
            sizes = vec![uniform; count];
        } else {
            for i in 0..count {
                match be_u32(stsz, 12 + i * 4) {
                    Some(s) => sizes.push(s),
                    None => break,
                }
            }
        }
    }

    let mut chunk_runs = Vec::new();
    if let Some(stsc) = find(stbl, b"stsc") {
        let count = be_u32(stsc, 4).unwrap_or(0) as usize;
        for i in 0..count {
            let at = 8 + i * 12;
            let (Some(first), Some(per)) = (be_u32(stsc, at), be_u32(stsc, at + 4)) else {
                break;
            };
            chunk_runs.push((first, per));
        }
    }

    let mut chunk_offsets = Vec::new();
    if let Some(stco) = find(stbl, b"stco") {
        let count = be_u32(stco, 4).unwrap_or(0) as usize;
        for i in 0..count {
            match be_u32(stco, 8 + i * 4) {
                Some(o) => chunk_offsets.push(o as u64),
                None => break,
            }
        }
    } else if let Some(co64) = find(stbl, b"co64") {
        let count = be_u32(co64, 4).unwrap_or(0) as usize;
        for i in 0..count {
            match be_u64(co64, 8 + i * 8) {
                Some(o) => chunk_offsets.push(o),
                None => break,
            }
        }
    }

    Ok(SampleTables {
        codec,
        forced,
        channel_count,
        sample_rate,
        durations,
        sizes,
        chunk_runs,
        chunk_offsets,
    })
}

/// Lays samples out in file order from the chunk tables.
fn resolve_samples(tables: &SampleTables) -> Vec<SampleRef> {
    let samples_in_chunk = |chunk_1based: u32| -> u32 {
        let mut per = 0;
        for &(first, n) in &tables.chunk_runs {
            if first <= chunk_1based {
                per = n;
            } else {
                break;
            }
        }
        per
    };

    let mut refs = Vec::with_capacity(tables.sizes.len());
    let mut sample_idx = 0usize;
    let mut start: u64 = 0;

    'chunks: for (i, &chunk_offset) in tables.chunk_offsets.iter().enumerate() {
        let per = samples_in_chunk(i as u32 + 1);
        let mut offset = chunk_offset;
        for _ in 0..per {
            let Some(&size) = tables.sizes.get(sample_idx) else {
                break 'chunks;
            };
            let duration = tables.durations.get(sample_idx).copied().unwrap_or(0);
            refs.push(SampleRef {
                offset,
                size,
                start,
                duration,
            });
            offset += size as u64;
            start += duration as u64;
            sample_idx += 1;
        }
    }
    refs
}

/// Parses a complete `moov` payload into track metadata and subtitle sample
/// tables. `brands` comes from the `ftyp` box seen earlier in the stream.
pub(crate) fn parse_moov(moov: &[u8], brands: String) -> Result<Movie, MediaError> {
    let mut metadata = VideoMetadata {
        brands,
        ..VideoMetadata::default()
    };
    let mut subtitle_tracks = Vec::new();

    if let Some(mvhd) = find(moov, b"mvhd") {
        let version = mvhd.first().copied().unwrap_or(0);
        let (timescale, duration) = if version == 1 {
            (be_u32(mvhd, 20), be_u64(mvhd, 24))
        } else {
            (be_u32(mvhd, 12), be_u32(mvhd, 16).map(u64::from))
        };
        if let (Some(ts), Some(d)) = (timescale, duration) {
            if ts > 0 {
                metadata.duration = Some(d as f64 / ts as f64);
            }
        }
    }

    for (fourcc, trak) in BoxIter::new(moov) {
        if &fourcc != b"trak" {
            continue;
        }
        let Some(tkhd) = find(trak, b"tkhd").and_then(parse_tkhd) else {
            continue;
        };
        let Some(mdia) = find(trak, b"mdia") else {
            continue;
        };
        let Some(mdhd) = find(mdia, b"mdhd").and_then(parse_mdhd) else {
            continue;
        };
        let Some((handler, handler_name)) = find(mdia, b"hdlr").and_then(parse_hdlr) else {
            continue;
        };
        let Some(stbl) = find(mdia, b"minf").and_then(|minf| find(minf, b"stbl")) else {
            continue;
        };
        let tables = parse_stbl(stbl)?;

        let duration = (mdhd.timescale > 0).then(|| mdhd.duration as f64 / mdhd.timescale as f64);

        match &handler {
            b"vide" => {
                metadata.video_tracks.push(TrackInfo {
                    track_number: metadata.video_tracks.len() as u32 + 1,
                    codec: tables.codec,
                    duration,
                    language: mdhd.language,
                    name: None,
                    width: Some(tkhd.width),
                    height: Some(tkhd.height),
                    ..TrackInfo::default()
                });
            }
            b"soun" => {
                metadata.audio_tracks.push(TrackInfo {
                    track_number: metadata.audio_tracks.len() as u32 + 1,
                    codec: tables.codec,
                    duration,
                    language: mdhd.language,
                    name: handler_name,
                    channel_count: tables.channel_count,
                    sample_rate: tables.sample_rate,
                    ..TrackInfo::default()
                });
            }
            b"sbtl" | b"text" | b"subt" => {
                metadata.subtitle_tracks.push(TrackInfo {
                    track_number: metadata.subtitle_tracks.len() as u32 + 1,
                    codec: tables.codec.clone(),
                    duration,
                    language: mdhd.language.clone(),
                    name: handler_name.clone(),
                    ..TrackInfo::default()
                });
                subtitle_tracks.push(SubtitleTrackInfo {
                    track_id: tkhd.track_id,
                    name: handler_name,
                    language: mdhd.language,
                    forced: tables.forced,
                    timescale: mdhd.timescale,
                    samples: resolve_samples(&tables),
                });
            }
            _ => {}
        }
    }

    Ok(Movie {
        metadata,
        subtitle_tracks,
    })
}
