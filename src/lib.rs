//! Fetches audio or video for a media URL by driving yt-dlp (with ffmpeg for
//! extraction and muxing) and finalizing the result atomically on disk.
mod tooling;

pub use tooling::*;
