// Temp-path naming plus the rename-or-delete step that ends every job.
use super::*;

pub(super) const TEMP_INFIX: &str = "temp";

// `name.ext` becomes `name.temp.ext` in the same directory.
pub fn temp_path_for(destination: &Path) -> PathBuf {
    let stem = destination
        .file_stem()
        .map(|value| value.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    let file_name = match destination.extension() {
        Some(ext) => format!("{stem}.{TEMP_INFIX}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{TEMP_INFIX}"),
    };
    destination.with_file_name(file_name)
}

pub fn finalize(temp_path: &Path, destination: &Path) -> Result<(), Error> {
    if !temp_path.exists() {
        log::debug!("Nothing to finalize at {}", temp_path.display());
        return Ok(());
    }
    fs::rename(temp_path, destination).map_err(|error| Error::fs("rename", temp_path, error))?;
    log::info!("Saved {}", destination.display());
    Ok(())
}

// Removes the temp file and everything yt-dlp derived from it: `.part`/`.ytdl`
// files, per-stream `name.temp.f137.mp4` downloads and `name.temp.orig.webm`
// sources kept during audio extraction.
pub fn cleanup(temp_path: &Path) {
    remove_if_present(temp_path);
    let (Some(dir), Some(prefix)) = (temp_path.parent(), leftover_prefix(temp_path)) else {
        return;
    };
    let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            log::warn!("Failed to scan {} for leftovers: {error}", dir.display());
            return;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let is_leftover = name.to_str().is_some_and(|name| name.starts_with(&prefix));
        if is_leftover && entry.file_type().is_ok_and(|kind| kind.is_file()) {
            remove_if_present(&entry.path());
        }
    }
}

// `video.temp.mp4` and `video.temp` both give `video.temp.`.
fn leftover_prefix(temp_path: &Path) -> Option<String> {
    let name = temp_path.file_name()?.to_str()?;
    let suffix = format!(".{TEMP_INFIX}");
    if name.ends_with(&suffix) {
        return Some(format!("{name}."));
    }
    let marker = format!("{suffix}.");
    let end = name.rfind(&marker)? + marker.len();
    Some(name[..end].to_string())
}

fn remove_if_present(path: &Path) {
    if !path.exists() {
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => log::debug!("Removed {}", path.display()),
        Err(error) => log::warn!("Failed to remove {}: {error}", path.display()),
    }
}

pub(super) fn produced_output_len(temp_path: &Path) -> Option<u64> {
    let metadata = fs::metadata(temp_path).ok()?;
    if !metadata.is_file() || metadata.len() == 0 {
        return None;
    }
    Some(metadata.len())
}
