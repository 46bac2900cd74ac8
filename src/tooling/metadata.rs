// Metadata-only yt-dlp invocation mapped onto `VideoInfo`.
use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub title: String,
    pub duration_seconds: f64,
    pub thumbnail_url: String,
    pub uploader: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct YtdlpInfoPayload {
    pub(super) title: Option<String>,
    pub(super) duration: Option<f64>,
    pub(super) thumbnail: Option<String>,
    pub(super) uploader: Option<String>,
    pub(super) channel: Option<String>,
}

pub(super) fn video_info_from_json(stdout: &[u8]) -> Result<VideoInfo, Error> {
    let payload: YtdlpInfoPayload =
        serde_json::from_slice(stdout).map_err(|error| Error::MetadataFetch {
            cause: format!("failed to parse yt-dlp response: {error}"),
        })?;
    let title = payload
        .title
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::MetadataFetch {
            cause: "yt-dlp response has no title".to_string(),
        })?;
    Ok(VideoInfo {
        title,
        duration_seconds: payload
            .duration
            .filter(|value| value.is_finite() && *value >= 0.0)
            .unwrap_or(0.0),
        thumbnail_url: payload.thumbnail.unwrap_or_default(),
        uploader: payload.uploader.or(payload.channel).unwrap_or_default(),
    })
}

#[derive(Debug, Clone)]
pub struct MetadataFetcher {
    locator: Arc<ToolLocator>,
}

impl MetadataFetcher {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self { locator }
    }

    pub async fn fetch(&self, url: &str) -> Result<VideoInfo, Error> {
        let fetch_tool = self.locator.resolve_tool(Tool::Fetch)?;
        let normalized_url = validate_media_url(url)?.to_string();

        let output = hidden_command(&fetch_tool)
            .env("PYTHONIOENCODING", "UTF-8")
            .env("PYTHONUTF8", "1")
            .arg("-J")
            .arg("--skip-download")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg(&normalized_url)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|error| Error::MetadataFetch {
                cause: format!("failed to execute yt-dlp: {error}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .last()
                .unwrap_or("yt-dlp failed.");
            return Err(Error::MetadataFetch {
                cause: message.to_string(),
            });
        }

        let info = video_info_from_json(&output.stdout)?;
        log::info!("Fetched info for {normalized_url}: {}", info.title);
        Ok(info)
    }
}
