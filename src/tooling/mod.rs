use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{broadcast, mpsc, watch, OwnedSemaphorePermit, Semaphore};
use url::Url;
use which::which;

mod commands;
mod error;
mod finalize;
mod metadata;
mod orchestrator;
mod progress;
mod runtime;
#[cfg(test)]
mod test_support;

use finalize::*;
use metadata::*;
use orchestrator::*;
use progress::*;
use runtime::*;

pub use commands::*;
pub use error::{Error, Tool};
pub use finalize::{cleanup, finalize, temp_path_for};
pub use metadata::{MetadataFetcher, VideoInfo};
pub use orchestrator::{DownloadJob, DownloadOrchestrator, FormatSpec, JobState, OutputArtifact};
pub use progress::{
    normalize, ProgressEvent, ProgressHub, ProgressParser, ProgressSubscription, YtDlpProgressParser,
};
pub use runtime::{load_settings, save_settings, RuntimeLayout, Settings, ToolLocator, ToolPaths};
