//! Temp-file-then-rename writes.
//!
//! Readers (and a later re-run) only ever see the old file or the complete
//! new one. A write that errors or exceeds its timeout removes its temp file.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::sanitize::{MAX_SEGMENT_BYTES, truncate_to_byte_limit};

const TEMP_SUFFIX: &str = ".part";

/// Writes `contents` to `path` via a sibling temp file and an atomic rename.
///
/// # Errors
///
/// Returns the underlying I/O error, or [`io::ErrorKind::TimedOut`] when the
/// whole operation takes longer than `io_timeout`.
pub(crate) async fn write_atomically(
    path: &Path,
    contents: &[u8],
    io_timeout: Duration,
) -> io::Result<()> {
    let temp = temp_path_for(path);

    let write = async {
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(contents).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, path).await
    };

    let result = match tokio::time::timeout(io_timeout, write).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("write did not finish within {}s", io_timeout.as_secs()),
        )),
    };

    if result.is_err() {
        let _ = tokio::fs::remove_file(&temp).await;
    } else {
        debug!(path = %path.display(), bytes = contents.len(), "file written");
    }
    result
}

/// `dir/.{name}.{tag}.part` next to the destination, so the rename never crosses
/// filesystems.
///
/// `name` is shortened so the temp name stays within [`MAX_SEGMENT_BYTES`]; the
/// random tag keeps concurrent writes of long names sharing a prefix apart.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "file".into(), |n| n.to_string_lossy());
    let tag = rand::random::<u32>();
    let overhead = ".".len() + ".".len() + 8 + TEMP_SUFFIX.len();
    let prefix = truncate_to_byte_limit(&name, MAX_SEGMENT_BYTES - overhead);
    path.with_file_name(format!(".{prefix}.{tag:08x}{TEMP_SUFFIX}"))
}
