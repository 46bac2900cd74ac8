// Runtime settings, tool location and common process primitives.
use super::*;

#[cfg(target_os = "windows")]
pub(super) const CREATE_NO_WINDOW: u32 = 0x0800_0000;
pub(super) const MAX_SETTINGS_PATH_LEN: usize = 512;

pub(super) fn hidden_command(program: impl AsRef<std::ffi::OsStr>) -> tokio::process::Command {
    let mut command = tokio::process::Command::new(program);
    #[cfg(target_os = "windows")]
    {
        command.creation_flags(CREATE_NO_WINDOW);
    }
    command
}

pub(super) fn platform_bin(name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

fn default_allow_system_tools() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub fetch_tool_path: Option<String>,
    #[serde(default)]
    pub transcode_tool_path: Option<String>,
    #[serde(default)]
    pub resources_dir: Option<String>,
    #[serde(default = "default_allow_system_tools")]
    pub allow_system_tools: bool,
    #[serde(default)]
    pub download_dir: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fetch_tool_path: None,
            transcode_tool_path: None,
            resources_dir: None,
            allow_system_tools: true,
            download_dir: None,
        }
    }
}

pub(super) fn sanitize_optional_path(value: Option<String>) -> Result<Option<String>, Error> {
    match value {
        None => Ok(None),
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            if trimmed.len() > MAX_SETTINGS_PATH_LEN {
                return Err(Error::Settings {
                    cause: "Path is too long.".to_string(),
                });
            }
            if trimmed.chars().any(|ch| ch.is_control()) {
                return Err(Error::Settings {
                    cause: "Path contains invalid control characters.".to_string(),
                });
            }
            Ok(Some(trimmed.to_string()))
        }
    }
}

pub(super) fn normalize_settings(mut settings: Settings) -> Result<Settings, Error> {
    settings.fetch_tool_path = sanitize_optional_path(settings.fetch_tool_path)?;
    settings.transcode_tool_path = sanitize_optional_path(settings.transcode_tool_path)?;
    settings.resources_dir = sanitize_optional_path(settings.resources_dir)?;
    settings.download_dir = sanitize_optional_path(settings.download_dir)?;
    Ok(settings)
}

/// Reads the settings file, falling back to defaults when it does not exist yet.
pub fn load_settings(path: &Path) -> Result<Settings, Error> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let raw = fs::read_to_string(path).map_err(|error| Error::fs("read", path, error))?;
    let parsed: Settings = serde_json::from_str(&raw).map_err(|error| Error::Settings {
        cause: format!("Failed to parse {}: {error}", path.display()),
    })?;
    normalize_settings(parsed)
}

pub fn save_settings(path: &Path, settings: Settings) -> Result<Settings, Error> {
    let normalized = normalize_settings(settings)?;
    let payload = serde_json::to_string_pretty(&normalized).map_err(|error| Error::Settings {
        cause: format!("Failed to serialize settings: {error}"),
    })?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|error| Error::fs("create", parent, error))?;
    }
    fs::write(path, payload).map_err(|error| Error::fs("write", path, error))?;
    Ok(normalized)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeLayout {
    Development { app_root: PathBuf },
    Packaged { resources_dir: PathBuf },
}

impl RuntimeLayout {
    pub fn detect(settings: &Settings) -> Self {
        if let Some(resources_dir) = settings.resources_dir.as_ref() {
            return RuntimeLayout::Packaged {
                resources_dir: PathBuf::from(resources_dir),
            };
        }
        if cfg!(debug_assertions) {
            return RuntimeLayout::Development {
                app_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")),
            };
        }
        let resources_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|parent| parent.join("resources")))
            .unwrap_or_else(|| PathBuf::from("resources"));
        RuntimeLayout::Packaged { resources_dir }
    }

    pub(super) fn candidates(&self, tool: Tool) -> Vec<PathBuf> {
        let executable = platform_bin(tool.binary_name());
        match self {
            RuntimeLayout::Development { app_root } => {
                vec![app_root.join("resources").join("bin").join(&executable)]
            }
            RuntimeLayout::Packaged { resources_dir } => vec![
                resources_dir.join("bin").join(&executable),
                resources_dir.join(&executable),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub fetch: PathBuf,
    pub transcode: PathBuf,
}

#[derive(Debug)]
pub struct ToolLocator {
    layout: RuntimeLayout,
    settings: Settings,
    fetch: OnceLock<PathBuf>,
    transcode: OnceLock<PathBuf>,
}

impl ToolLocator {
    pub fn new(layout: RuntimeLayout, settings: Settings) -> Self {
        Self {
            layout,
            settings,
            fetch: OnceLock::new(),
            transcode: OnceLock::new(),
        }
    }

    pub fn from_settings(settings: Settings) -> Self {
        Self::new(RuntimeLayout::detect(&settings), settings)
    }

    pub fn layout(&self) -> &RuntimeLayout {
        &self.layout
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn resolve(&self) -> Result<ToolPaths, Error> {
        Ok(ToolPaths {
            fetch: self.resolve_tool(Tool::Fetch)?,
            transcode: self.resolve_tool(Tool::Transcode)?,
        })
    }

    pub fn resolve_tool(&self, tool: Tool) -> Result<PathBuf, Error> {
        let cell = match tool {
            Tool::Fetch => &self.fetch,
            Tool::Transcode => &self.transcode,
        };
        if let Some(path) = cell.get() {
            return Ok(path.clone());
        }
        let (path, source) = self.locate(tool)?;
        log::info!("Using {source} {tool} at {}", path.display());
        Ok(cell.get_or_init(|| path).clone())
    }

    fn locate(&self, tool: Tool) -> Result<(PathBuf, &'static str), Error> {
        let custom = match tool {
            Tool::Fetch => self.settings.fetch_tool_path.as_ref(),
            Tool::Transcode => self.settings.transcode_tool_path.as_ref(),
        };
        let mut searched = Vec::new();
        if let Some(raw) = custom {
            let candidate = PathBuf::from(raw);
            if let Some(path) = ensure_binary(&candidate) {
                return Ok((path, "custom"));
            }
            searched.push(candidate);
        }

        for candidate in self.layout.candidates(tool) {
            if let Some(path) = ensure_binary(&candidate) {
                let source = match self.layout {
                    RuntimeLayout::Development { .. } => "development",
                    RuntimeLayout::Packaged { .. } => "bundled",
                };
                return Ok((path, source));
            }
            searched.push(candidate);
        }

        if self.settings.allow_system_tools {
            if let Ok(system) = which(tool.binary_name()) {
                return Ok((system, "system"));
            }
            searched.push(PathBuf::from(format!("$PATH/{}", tool.binary_name())));
        }

        log::warn!("{tool} not found; searched {} location(s)", searched.len());
        Err(Error::ToolNotFound { tool, searched })
    }
}

fn ensure_binary(path: &Path) -> Option<PathBuf> {
    let canonical = fs::canonicalize(path).ok()?;
    if canonical.is_file() {
        Some(canonical)
    } else {
        None
    }
}

pub(super) fn validate_media_url(raw: &str) -> Result<Url, Error> {
    let parsed = Url::parse(raw.trim()).map_err(|error| Error::InvalidUrl {
        reason: error.to_string(),
    })?;
    if parsed.scheme() != "https" && parsed.scheme() != "http" {
        return Err(Error::InvalidUrl {
            reason: format!("unsupported scheme `{}`", parsed.scheme()),
        });
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(Error::InvalidUrl {
            reason: "link must not include credentials".to_string(),
        });
    }
    if parsed.host_str().is_none() {
        return Err(Error::InvalidUrl {
            reason: "link has no host".to_string(),
        });
    }
    Ok(parsed)
}
