use std::fs::create_dir_all;
use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tracing::debug;
use tracing::error;

use crate::Result;
use crate::StorageError;

/// Suffix of the sibling file a replacement is staged in.
pub const TEMP_FILE_SUFFIX: &str = "_tmp";

pub fn create_parent_dir_if_not_exist(path: &Path) -> Result<()> {
    if let Some(parent_dir) = path.parent() {
        if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
            if let Err(e) = create_dir_all(parent_dir) {
                error!("Failed to create directory {:?}: {:?}", parent_dir, e);
                return Err(StorageError::PathError {
                    path: parent_dir.to_path_buf(),
                    source: e,
                }
                .into());
            }
        }
    }
    Ok(())
}

pub fn open_file_for_append(path: PathBuf) -> Result<File> {
    create_parent_dir_if_not_exist(&path)?;
    let log_file = match OpenOptions::new().append(true).create(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            return Err(StorageError::PathError { path, source: e }.into());
        }
    };
    Ok(log_file)
}

/// `AppConfig.json` -> `AppConfig_tmp.json`, in the same directory.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let stem = target.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let file_name = match target.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}{TEMP_FILE_SUFFIX}.{ext}"),
        None => format!("{stem}{TEMP_FILE_SUFFIX}"),
    };
    target.with_file_name(file_name)
}

/// Replaces `target` with `content` so that readers of `target` only ever see
/// the old or the new content in full.
///
/// Four phases, none of which touch `target` until the last:
/// 1. write everything into the temp sibling (truncating leftovers)
/// 2. `sync_all` the temp file
/// 3. close it
/// 4. rename it over `target`
pub async fn write_atomically(
    target: &Path,
    content: &[u8],
) -> Result<()> {
    create_parent_dir_if_not_exist(target)?;
    let temp_path = temp_path_for(target);
    let path_err = |path: &Path, source: std::io::Error| StorageError::PathError {
        path: path.to_path_buf(),
        source,
    };

    // Phase 1
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .await
        .map_err(|e| path_err(&temp_path, e))?;
    file.write_all(content).await.map_err(|e| path_err(&temp_path, e))?;
    file.flush().await.map_err(|e| path_err(&temp_path, e))?;

    // Phase 2
    file.sync_all().await.map_err(|e| path_err(&temp_path, e))?;

    // Phase 3
    drop(file);

    // Phase 4
    tokio::fs::rename(&temp_path, target).await.map_err(|e| path_err(target, e))?;

    debug!(?target, len = content.len(), "file replaced atomically");
    Ok(())
}
