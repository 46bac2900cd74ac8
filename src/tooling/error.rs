// Typed failures surfaced by tool resolution, metadata lookup and download jobs.
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Fetch,
    Transcode,
}

impl Tool {
    pub fn binary_name(self) -> &'static str {
        match self {
            Tool::Fetch => "yt-dlp",
            Tool::Transcode => "ffmpeg",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{tool} was not found (searched: {})", display_paths(.searched))]
    ToolNotFound { tool: Tool, searched: Vec<PathBuf> },

    #[error("ffmpeg was not found at {}", .path.display())]
    TranscodeToolMissing { path: PathBuf },

    #[error("failed to get video info: {cause}")]
    MetadataFetch { cause: String },

    #[error("download failed ({tool}, {stage}): {cause}")]
    DownloadProcess {
        tool: Tool,
        stage: &'static str,
        cause: String,
    },

    #[error("failed to {operation} {}: {source}", .path.display())]
    FileSystem {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("another download is already running")]
    Busy,

    #[error("invalid URL: {reason}")]
    InvalidUrl { reason: String },

    #[error("unsupported format `{value}` (expected audio or video)")]
    InvalidFormat { value: String },

    #[error("settings error: {cause}")]
    Settings { cause: String },
}

impl Error {
    pub(crate) fn download(tool: Tool, stage: &'static str, cause: impl Into<String>) -> Self {
        Error::DownloadProcess {
            tool,
            stage,
            cause: cause.into(),
        }
    }

    pub(crate) fn fs(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FileSystem {
            operation,
            path: path.into(),
            source,
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".to_string();
    }
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
