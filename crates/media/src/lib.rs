//! Streaming ISO-BMFF (MP4) parsing for the upload pipeline.
//!
//! The request producer feeds file bytes into an [`Mp4Scanner`] in the same
//! order it fragments them. The scanner parses box headers incrementally,
//! buffers the `moov` box when it appears, and emits structural metadata
//! plus fully collected subtitle tracks as events. Subtitle samples can only
//! be harvested from bytes the stream has not yet passed, so files with the
//! `moov` box at the end yield metadata late and no subtitle tracks; callers
//! handle that with their completion fallback.

mod moov;
mod scan;
mod vtt;

pub use scan::{Mp4Scanner, MediaEvent, SubtitleCue, SubtitleTrack};
pub use vtt::build_vtt;

/// Errors produced while scanning a media stream.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("malformed box structure: {0}")]
    Malformed(&'static str),

    #[error("box `{fourcc}` too large to buffer: {size} bytes")]
    OversizedBox { fourcc: String, size: u64 },
}

/// File extensions the pipeline treats as video containers worth scanning.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "webm", "mkv", "avi"];

/// File extensions eligible for image thumbnails.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// File extensions eligible for embedded-cover thumbnails.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "m4a", "ogg", "wav"];

fn has_extension(name: &str, set: &[&str]) -> bool {
    name.rsplit('.')
        .next()
        .is_some_and(|ext| set.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

/// Returns `true` if `name` looks like a video file.
pub fn is_video_file(name: &str) -> bool {
    has_extension(name, VIDEO_EXTENSIONS)
}

/// Returns `true` if `name` looks like an image file.
pub fn is_image_file(name: &str) -> bool {
    has_extension(name, IMAGE_EXTENSIONS)
}

/// Returns `true` if `name` looks like an audio file.
pub fn is_audio_file(name: &str) -> bool {
    has_extension(name, AUDIO_EXTENSIONS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_classification() {
        assert!(is_video_file("movie.MP4"));
        assert!(is_video_file("a.b.mkv"));
        assert!(!is_video_file("notes.txt"));
        assert!(is_image_file("photo.JPEG"));
        assert!(is_audio_file("song.flac"));
        assert!(!is_audio_file("song"));
    }
}
