// Public commands exported to the presentation layer.
use super::*;

/// Stand-in for the save dialog. `None` means the user backed out.
pub trait SaveLocationPicker: Send + Sync {
    fn pick_save_path(&self, suggested_name: &str, format: FormatSpec) -> Option<PathBuf>;
}

impl<F> SaveLocationPicker for F
where
    F: Fn(&str, FormatSpec) -> Option<PathBuf> + Send + Sync,
{
    fn pick_save_path(&self, suggested_name: &str, format: FormatSpec) -> Option<PathBuf> {
        self(suggested_name, format)
    }
}

#[derive(Debug, Clone)]
pub struct DirectorySavePicker {
    pub dir: PathBuf,
}

impl SaveLocationPicker for DirectorySavePicker {
    fn pick_save_path(&self, suggested_name: &str, _format: FormatSpec) -> Option<PathBuf> {
        Some(self.dir.join(suggested_name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DownloadResponse {
    Saved {
        success: bool,
        #[serde(rename = "filePath")]
        file_path: String,
    },
    Canceled {
        canceled: bool,
    },
}

impl DownloadResponse {
    fn saved(path: &Path) -> Self {
        DownloadResponse::Saved {
            success: true,
            file_path: path.to_string_lossy().to_string(),
        }
    }

    fn canceled() -> Self {
        DownloadResponse::Canceled { canceled: true }
    }
}

#[derive(Debug)]
pub struct ProgressListener {
    task: tokio::task::JoinHandle<()>,
}

impl ProgressListener {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ProgressListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(super) fn with_format_extension(path: PathBuf, format: FormatSpec) -> PathBuf {
    let matches = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.eq_ignore_ascii_case(format.extension()))
        .unwrap_or(false);
    if matches {
        return path;
    }
    let mut raw = path.into_os_string();
    raw.push(".");
    raw.push(format.extension());
    PathBuf::from(raw)
}

pub struct Siphon {
    metadata: MetadataFetcher,
    orchestrator: DownloadOrchestrator,
    picker: Box<dyn SaveLocationPicker>,
}

impl Siphon {
    pub fn new(locator: ToolLocator, picker: impl SaveLocationPicker + 'static) -> Self {
        let locator = Arc::new(locator);
        Self {
            metadata: MetadataFetcher::new(Arc::clone(&locator)),
            orchestrator: DownloadOrchestrator::new(locator, ProgressHub::new()),
            picker: Box::new(picker),
        }
    }

    pub fn orchestrator(&self) -> &DownloadOrchestrator {
        &self.orchestrator
    }

    pub async fn get_video_info(&self, url: String) -> Result<VideoInfo, String> {
        self.metadata
            .fetch(&url)
            .await
            .inspect_err(|error| log::error!("get_video_info failed: {error}"))
            .map_err(|error| error.to_string())
    }

    pub async fn download_media(
        &self,
        url: String,
        format: String,
    ) -> Result<DownloadResponse, String> {
        self.download_media_inner(&url, &format)
            .await
            .inspect_err(|error| log::error!("download_media failed: {error}"))
            .map_err(|error| format!("Download failed: {error}"))
    }

    async fn download_media_inner(&self, url: &str, format: &str) -> Result<DownloadResponse, Error> {
        let format: FormatSpec = format.parse()?;
        self.orchestrator.transcode_tool()?;

        let suggested_name = format!("video.{}", format.extension());
        let Some(chosen) = self.picker.pick_save_path(&suggested_name, format) else {
            log::info!("Save location selection was canceled");
            return Ok(DownloadResponse::canceled());
        };
        let destination = with_format_extension(chosen, format);

        let artifact = self.orchestrator.start(url, format, destination)?.wait().await?;
        Ok(DownloadResponse::saved(&artifact.path))
    }

    /// Calls `listener` with every percentage emitted from now on. Must be
    /// called from within a Tokio runtime.
    pub fn on_download_progress<F>(&self, mut listener: F) -> ProgressListener
    where
        F: FnMut(u8) + Send + 'static,
    {
        let mut subscription = self.orchestrator.progress().subscribe();
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                listener(event.percent);
            }
        });
        ProgressListener { task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tooling::test_support::{fake_locator, FakeTool};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[cfg(unix)]
    const DOWNLOAD_SCRIPT: &str = r#"
prev=""
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then out="$arg"; fi
  prev="$arg"
done
case "$*" in
  *-J*)
    echo '{"title":"Demo","duration":61,"thumbnail":"https://t/abc123.jpg","uploader":"Uploader"}'
    exit 0
    ;;
esac
touch "$(dirname "$0")/spawned"
echo "siphon-progress|100|400|NA|25.0%"
echo "siphon-progress|300|400|NA|75.0%"
printf 'payload' > "$out"
"#;

    #[test]
    fn extension_is_forced_to_the_format() {
        assert_eq!(
            with_format_extension(PathBuf::from("/out/video.MP3"), FormatSpec::Audio),
            PathBuf::from("/out/video.MP3")
        );
        assert_eq!(
            with_format_extension(PathBuf::from("/out/clip"), FormatSpec::Video),
            PathBuf::from("/out/clip.mp4")
        );
        assert_eq!(
            with_format_extension(PathBuf::from("/out/clip.mp4"), FormatSpec::Audio),
            PathBuf::from("/out/clip.mp4.mp3")
        );
    }

    #[test]
    fn responses_match_the_frontend_shape() {
        assert_eq!(
            serde_json::to_value(DownloadResponse::saved(Path::new("C:/out/video.mp3"))).unwrap(),
            serde_json::json!({"success": true, "filePath": "C:/out/video.mp3"})
        );
        assert_eq!(
            serde_json::to_value(DownloadResponse::canceled()).unwrap(),
            serde_json::json!({"canceled": true})
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn download_media_saves_and_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("out");
        fs::create_dir_all(&out_dir).unwrap();
        let siphon = Siphon::new(
            fake_locator(dir.path(), FakeTool::Script(DOWNLOAD_SCRIPT), true),
            DirectorySavePicker {
                dir: out_dir.clone(),
            },
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = siphon.on_download_progress(move |percent| {
            let _ = tx.send(percent);
        });

        let response = siphon
            .download_media("https://youtu.be/abc123".to_string(), "audio".to_string())
            .await
            .unwrap();
        let destination = out_dir.join("video.mp3");
        assert_eq!(response, DownloadResponse::saved(&destination));
        assert_eq!(fs::read(&destination).unwrap(), b"payload");
        assert!(!out_dir.join("video.temp.mp3").exists());

        let mut seen = Vec::new();
        while let Some(percent) = rx.recv().await {
            seen.push(percent);
            if percent == 100 {
                break;
            }
        }
        assert_eq!(seen, vec![0, 25, 75, 100]);
        assert!(!siphon.orchestrator().is_busy());
        listener.unsubscribe();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn canceled_dialog_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let siphon = Siphon::new(
            fake_locator(dir.path(), FakeTool::Script(DOWNLOAD_SCRIPT), true),
            |_: &str, _: FormatSpec| -> Option<PathBuf> { None },
        );
        let response = siphon
            .download_media("https://youtu.be/abc123".to_string(), "video".to_string())
            .await
            .unwrap();
        assert_eq!(response, DownloadResponse::canceled());
        assert!(!dir.path().join("bin").join("spawned").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_transcode_tool_fails_before_the_dialog() {
        let dir = tempfile::tempdir().unwrap();
        let asked = Arc::new(AtomicBool::new(false));
        let asked_by_picker = Arc::clone(&asked);
        let out_dir = dir.path().to_path_buf();
        let siphon = Siphon::new(
            fake_locator(dir.path(), FakeTool::Script(DOWNLOAD_SCRIPT), false),
            move |name: &str, _: FormatSpec| -> Option<PathBuf> {
                asked_by_picker.store(true, Ordering::SeqCst);
                Some(out_dir.join(name))
            },
        );

        let error = siphon
            .download_media("https://youtu.be/abc123".to_string(), "audio".to_string())
            .await
            .unwrap_err();
        assert!(error.contains("ffmpeg was not found"), "{error}");
        assert!(!asked.load(Ordering::SeqCst));
        assert!(!dir.path().join("video.temp.mp3").exists());
        assert!(!dir.path().join("bin").join("spawned").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn picked_path_gets_the_format_extension() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("clip");
        let chosen = target.clone();
        let siphon = Siphon::new(
            fake_locator(dir.path(), FakeTool::Script(DOWNLOAD_SCRIPT), true),
            move |_: &str, _: FormatSpec| -> Option<PathBuf> { Some(chosen.clone()) },
        );
        siphon
            .download_media("https://youtu.be/abc123".to_string(), "mp4".to_string())
            .await
            .unwrap();
        assert!(dir.path().join("clip.mp4").exists());
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn video_info_comes_from_the_fetch_tool() {
        let dir = tempfile::tempdir().unwrap();
        let siphon = Siphon::new(
            fake_locator(dir.path(), FakeTool::Script(DOWNLOAD_SCRIPT), false),
            DirectorySavePicker {
                dir: dir.path().to_path_buf(),
            },
        );
        let info = siphon
            .get_video_info("https://youtu.be/abc123".to_string())
            .await
            .unwrap();
        assert_eq!(info.title, "Demo");
        assert_eq!(info.uploader, "Uploader");
        assert_eq!(info.duration_seconds, 61.0);
    }

    #[tokio::test]
    async fn unknown_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let siphon = Siphon::new(
            fake_locator(dir.path(), FakeTool::Absent, true),
            DirectorySavePicker {
                dir: dir.path().to_path_buf(),
            },
        );
        let error = siphon
            .download_media("https://youtu.be/abc123".to_string(), "gif".to_string())
            .await
            .unwrap_err();
        assert!(error.contains("unsupported format"), "{error}");
    }
}
