// Download job orchestration: argument building, process supervision and
// finalization of the output file.
use super::*;

const VIDEO_FORMAT_SELECTOR: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatSpec {
    Audio,
    Video,
}

impl FormatSpec {
    pub fn extension(self) -> &'static str {
        match self {
            FormatSpec::Audio => "mp3",
            FormatSpec::Video => "mp4",
        }
    }

    pub(super) fn download_args(
        self,
        url: &str,
        transcode_tool: &Path,
        temp_path: &Path,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        match self {
            FormatSpec::Audio => {
                args.extend(
                    ["-x", "--audio-format", "mp3", "--audio-quality", "0"]
                        .map(OsString::from),
                );
            }
            FormatSpec::Video => {
                args.extend(
                    ["-f", VIDEO_FORMAT_SELECTOR, "--merge-output-format", "mp4"]
                        .map(OsString::from),
                );
            }
        }
        args.push("--ffmpeg-location".into());
        args.push(transcode_tool.as_os_str().to_owned());
        args.push("-o".into());
        args.push(temp_path.as_os_str().to_owned());
        args.extend(
            [
                "--no-playlist",
                "--newline",
                "--progress",
                "--no-warnings",
                "--progress-template",
                PROGRESS_TEMPLATE,
            ]
            .map(OsString::from),
        );
        args.push(url.into());
        args
    }
}

impl std::str::FromStr for FormatSpec {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "audio" | "mp3" => Ok(FormatSpec::Audio),
            "video" | "mp4" => Ok(FormatSpec::Video),
            _ => Err(Error::InvalidFormat {
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputArtifact {
    pub path: PathBuf,
}

// Dropping the handle does not stop the process.
#[derive(Debug)]
pub struct DownloadJob {
    source_url: String,
    format: FormatSpec,
    destination: PathBuf,
    temp_path: PathBuf,
    state: watch::Receiver<JobState>,
    completion: tokio::task::JoinHandle<Result<OutputArtifact, Error>>,
}

impl DownloadJob {
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn format(&self) -> FormatSpec {
        self.format
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<JobState> {
        self.state.clone()
    }

    pub async fn wait(self) -> Result<OutputArtifact, Error> {
        match self.completion.await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                cleanup(&self.temp_path);
                Err(Error::download(
                    Tool::Fetch,
                    "supervise",
                    format!("download task ended unexpectedly: {join_error}"),
                ))
            }
        }
    }
}

// One job at a time; a second `start` gets `Error::Busy`.
pub struct DownloadOrchestrator {
    locator: Arc<ToolLocator>,
    progress: ProgressHub,
    parser: Arc<dyn ProgressParser>,
    slot: Arc<Semaphore>,
}

impl DownloadOrchestrator {
    pub fn new(locator: Arc<ToolLocator>, progress: ProgressHub) -> Self {
        Self {
            locator,
            progress,
            parser: Arc::new(YtDlpProgressParser),
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn with_parser(mut self, parser: impl ProgressParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    pub fn progress(&self) -> &ProgressHub {
        &self.progress
    }

    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    pub fn transcode_tool(&self) -> Result<PathBuf, Error> {
        let path = match self.locator.resolve_tool(Tool::Transcode) {
            Ok(path) => path,
            Err(Error::ToolNotFound { searched, .. }) => {
                let path = searched
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| PathBuf::from(platform_bin(Tool::Transcode.binary_name())));
                return Err(Error::TranscodeToolMissing { path });
            }
            Err(error) => return Err(error),
        };
        if !path.is_file() {
            return Err(Error::TranscodeToolMissing { path });
        }
        Ok(path)
    }

    /// Spawns yt-dlp for `url` and returns immediately. Must be called from
    /// within a Tokio runtime.
    pub fn start(
        &self,
        url: &str,
        format: FormatSpec,
        destination: impl Into<PathBuf>,
    ) -> Result<DownloadJob, Error> {
        let transcode_tool = self.transcode_tool()?;
        let fetch_tool = self.locator.resolve_tool(Tool::Fetch)?;
        validate_media_url(url)?;
        let source_url = url.trim().to_string();
        let permit = Arc::clone(&self.slot)
            .try_acquire_owned()
            .map_err(|_| Error::Busy)?;

        let destination = destination.into();
        let temp_path = temp_path_for(&destination);
        if temp_path.exists() {
            log::warn!("Removing stale temp file {}", temp_path.display());
        }
        cleanup(&temp_path);

        let (state_tx, state_rx) = watch::channel(JobState::Pending);
        log::info!(
            "Starting {} download of {source_url} to {}",
            format.extension(),
            destination.display()
        );

        let spawned = hidden_command(&fetch_tool)
            .env("PYTHONIOENCODING", "UTF-8")
            .env("PYTHONUTF8", "1")
            .args(format.download_args(&source_url, &transcode_tool, &temp_path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(error) => {
                cleanup(&temp_path);
                let _ = state_tx.send(JobState::Failed);
                return Err(Error::download(
                    Tool::Fetch,
                    "spawn",
                    format!("failed to start yt-dlp: {error}"),
                ));
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.start_kill();
            cleanup(&temp_path);
            let _ = state_tx.send(JobState::Failed);
            return Err(Error::download(
                Tool::Fetch,
                "spawn",
                "failed to capture yt-dlp output for progress tracking",
            ));
        };

        let _ = state_tx.send(JobState::Running);
        self.progress.emit(0);

        let supervision = Supervision {
            child,
            stdout,
            stderr,
            temp_path: temp_path.clone(),
            destination: destination.clone(),
            progress: self.progress.clone(),
            parser: Arc::clone(&self.parser),
            state: state_tx,
            _permit: permit,
        };
        let completion = tokio::spawn(supervision.run());

        Ok(DownloadJob {
            source_url,
            format,
            destination,
            temp_path,
            state: state_rx,
            completion,
        })
    }
}

struct Supervision {
    child: tokio::process::Child,
    stdout: tokio::process::ChildStdout,
    stderr: tokio::process::ChildStderr,
    temp_path: PathBuf,
    destination: PathBuf,
    progress: ProgressHub,
    parser: Arc<dyn ProgressParser>,
    state: watch::Sender<JobState>,
    _permit: OwnedSemaphorePermit,
}

impl Supervision {
    async fn run(mut self) -> Result<OutputArtifact, Error> {
        let outcome = self.supervise().await;
        match &outcome {
            Ok(artifact) => {
                log::info!("Download finished: {}", artifact.path.display());
                let _ = self.state.send(JobState::Succeeded);
            }
            Err(error) => {
                log::warn!("Download failed: {error}");
                cleanup(&self.temp_path);
                let _ = self.state.send(JobState::Failed);
            }
        }
        outcome
    }

    async fn supervise(&mut self) -> Result<OutputArtifact, Error> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<f64>();
        let parser = Arc::clone(&self.parser);
        let progress = self.progress.clone();
        let mut last_emitted = 0_u8;

        let forward = async {
            while let Some(raw) = raw_rx.recv().await {
                let next = normalize(raw, last_emitted);
                if next > last_emitted {
                    last_emitted = next;
                    progress.emit(next);
                }
            }
        };
        let (stdout_tail, stderr_tail, ()) = tokio::join!(
            pump_lines(&mut self.stdout, parser.as_ref(), raw_tx.clone()),
            pump_lines(&mut self.stderr, parser.as_ref(), raw_tx),
            forward,
        );

        let streams = stdout_tail.and_then(|stdout| stderr_tail.map(|stderr| (stdout, stderr)));
        let (stdout_tail, stderr_tail) = match streams {
            Ok(tails) => tails,
            Err(error) => {
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
                return Err(Error::download(
                    Tool::Fetch,
                    "progress stream",
                    format!("failed to read yt-dlp output: {error}"),
                ));
            }
        };

        let status = self.child.wait().await.map_err(|error| {
            Error::download(
                Tool::Fetch,
                "exit",
                format!("failed while waiting for yt-dlp to finish: {error}"),
            )
        })?;
        if !status.success() {
            let message = stderr_tail
                .or(stdout_tail)
                .unwrap_or_else(|| format!("yt-dlp exited with {status}"));
            return Err(Error::download(Tool::Fetch, "exit", message));
        }

        let Some(bytes) = produced_output_len(&self.temp_path) else {
            return Err(Error::download(
                Tool::Fetch,
                "output check",
                format!(
                    "yt-dlp reported success but {} is missing or empty",
                    self.temp_path.display()
                ),
            ));
        };
        log::debug!("yt-dlp produced {bytes} bytes");

        finalize(&self.temp_path, &self.destination)?;
        if last_emitted < 100 {
            self.progress.emit(100);
        }
        Ok(OutputArtifact {
            path: self.destination.clone(),
        })
    }
}

// Returns the last line that carried no progress.
async fn pump_lines<R>(
    stream: R,
    parser: &dyn ProgressParser,
    sink: mpsc::UnboundedSender<f64>,
) -> Result<Option<String>, std::io::Error>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut raw_buffer = Vec::new();
    let mut last_line = None;
    while let Some(line) = read_lossy_process_line(&mut reader, &mut raw_buffer).await? {
        if let Some(percent) = parser.parse(&line) {
            let _ = sink.send(percent);
            continue;
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            log::debug!("yt-dlp: {trimmed}");
            last_line = Some(trimmed.to_string());
        }
    }
    Ok(last_line)
}
