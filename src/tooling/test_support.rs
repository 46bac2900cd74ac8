// Fake tool executables for tests that spawn real processes.
use super::*;

pub(crate) enum FakeTool {
    Script(&'static str),
    // A regular file the OS refuses to run.
    NotExecutable,
    Absent,
}

pub(crate) fn touch_executable(path: &Path) {
    write_executable(path, "#!/bin/sh\nexit 0\n");
}

pub(crate) fn write_executable(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

// A locator over `<dir>/bin` that never falls back to the system `PATH`.
pub(crate) fn fake_locator(dir: &Path, fetch: FakeTool, with_transcode: bool) -> ToolLocator {
    let bin = dir.join("bin");
    fs::create_dir_all(&bin).unwrap();
    let fetch_path = bin.join(platform_bin("yt-dlp"));
    match fetch {
        FakeTool::Script(body) => write_executable(&fetch_path, &format!("#!/bin/sh\n{body}\n")),
        FakeTool::NotExecutable => fs::write(&fetch_path, "#!/bin/sh\nexit 0\n").unwrap(),
        FakeTool::Absent => {}
    }
    if with_transcode {
        touch_executable(&bin.join(platform_bin("ffmpeg")));
    }
    ToolLocator::new(
        RuntimeLayout::Packaged {
            resources_dir: dir.to_path_buf(),
        },
        Settings {
            allow_system_tools: false,
            ..Settings::default()
        },
    )
}
