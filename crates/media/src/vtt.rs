//! WebVTT rendering for extracted subtitle cues.

use crate::scan::SubtitleCue;

/// Renders cues as a WebVTT document, ready to upload as a `.vtt` attachment.
pub fn build_vtt(cues: &[SubtitleCue]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for cue in cues {
        out.push_str(&timestamp(cue.start_ms));
        out.push_str(" --> ");
        out.push_str(&timestamp(cue.end_ms));
        out.push('\n');
        out.push_str(&cue.text);
        out.push_str("\n\n");
    }
    out
}

fn timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1000) % 60;
    let millis = ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}
