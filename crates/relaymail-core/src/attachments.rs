//! Reading attachment files from disk

use crate::{SendError, SendResult};
use relaymail_smtp::Attachment;
use std::path::Path;
use tracing::debug;

/// Read every file into an attachment named after its last path component
///
/// Stops at the first file that cannot be read.
pub async fn load_attachments<P: AsRef<Path>>(paths: &[P]) -> SendResult<Vec<Attachment>> {
    let mut attachments = Vec::with_capacity(paths.len());

    for path in paths {
        let path = path.as_ref();
        let data = tokio::fs::read(path)
            .await
            .map_err(|source| SendError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        debug!("Attaching {} ({} bytes)", filename, data.len());
        attachments.push(Attachment::from_bytes(filename, &data));
    }

    Ok(attachments)
}
