//! Blob files on disk.
//!
//! The engine never touches storage; this is the caller side that keeps
//! desired config, recorded state and saved plans in files. State is
//! written with tmp+rename so a crash never leaves a half-written blob.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use stratus_engine::NewState;

/// Read a blob that may legitimately not exist yet. A missing file is
/// `None`; an empty file is the untracked marker and comes back as
/// `Some(vec![])`.
pub fn read_optional(path: &Path) -> eyre::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(eyre::eyre!("failed to read {}: {e}", path.display())),
    }
}

pub fn read_required(path: &Path) -> eyre::Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| eyre::eyre!("failed to read {}: {e}", path.display()))
}

/// Record `state` at `path`. Untracked writes an empty file so the next
/// run sees the marker rather than "never provisioned".
pub fn write_state(path: &Path, state: &NewState) -> eyre::Result<()> {
    write_atomic(path, state.as_bytes())?;
    tracing::debug!(
        path = %path.display(),
        untracked = state.is_untracked(),
        "state written"
    );
    Ok(())
}

pub fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> eyre::Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write to a temp file next to `path`, then rename over it.
fn write_atomic(path: &Path, bytes: &[u8]) -> eyre::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let tmp = tmp_path(path);
    std::fs::write(&tmp, bytes)
        .map_err(|e| eyre::eyre!("failed to write {}: {e}", tmp.display()))?;

    std::fs::rename(&tmp, path)
        .map_err(|e| eyre::eyre!("failed to replace {}: {e}", path.display()))?;
    Ok(())
}
