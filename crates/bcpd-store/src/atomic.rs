// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use bcpd_core::BcpdError;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    format!("{}-{nanos}", process::id())
}

fn file_name_of(path: &Path) -> Result<String, BcpdError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            BcpdError::invalid_input(format!(
                "artifact path '{}' must include a non-empty file name",
                path.display()
            ))
        })
}

fn temp_sibling(path: &Path) -> Result<PathBuf, BcpdError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = file_name_of(path)?;
    Ok(parent.join(format!("{file_name}.tmp-{}", unique_suffix())))
}

/// Hidden sibling of `dir` named `.<name>.<tag>-<pid>-<nanos>`.
pub fn hidden_sibling(dir: &Path, tag: &str) -> Result<PathBuf, BcpdError> {
    let parent = dir.parent().unwrap_or_else(|| Path::new("."));
    let name = file_name_of(dir)?;
    Ok(parent.join(format!(".{name}.{tag}-{}", unique_suffix())))
}

/// Writes `encoded` to a fsynced temp sibling of `path` and returns the temp
/// path. Nothing is written at `path` itself; the temp file is removed on
/// failure.
pub fn stage_file(path: &Path, encoded: &[u8]) -> Result<PathBuf, BcpdError> {
    let temp_path = temp_sibling(path)?;

    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .map_err(|err| BcpdError::io(&temp_path, err))?;

    if let Err(err) = file.write_all(encoded) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(BcpdError::io(&temp_path, err));
    }

    if let Err(err) = file.sync_all() {
        let _ = std::fs::remove_file(&temp_path);
        return Err(BcpdError::io(&temp_path, err));
    }
    Ok(temp_path)
}

/// Writes `encoded` to `path` via a fsynced temp sibling and an atomic
/// rename. The temp file is removed on every failure path, so `path` holds
/// either its previous contents or the complete new ones.
pub fn write_file_atomic(path: &Path, encoded: &[u8]) -> Result<(), BcpdError> {
    let temp_path = stage_file(path, encoded)?;
    if let Err(err) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(BcpdError::io(path, err));
    }
    Ok(())
}

/// Creates `dir` and its parents.
pub fn ensure_dir(dir: &Path) -> Result<(), BcpdError> {
    std::fs::create_dir_all(dir).map_err(|err| BcpdError::io(dir, err))
}
