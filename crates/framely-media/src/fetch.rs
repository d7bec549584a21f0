//! Source video download.

use std::path::Path;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::{MediaError, MediaResult};

/// Download a media URL to the given path, streaming to disk.
///
/// The caller owns the destination directory; a partial file is removed on
/// failure so the store never keeps a truncated source.
pub async fn download(url: &str, dest: &Path) -> MediaResult<u64> {
    info!(url, dest = %dest.display(), "downloading source video");

    let response = reqwest::get(url)
        .await
        .map_err(|e| MediaError::download_failed(format!("request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(MediaError::download_failed(format!(
            "server returned {}",
            response.status()
        )));
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                return Err(MediaError::download_failed(format!("stream error: {e}")));
            }
        };
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    if written == 0 {
        let _ = tokio::fs::remove_file(dest).await;
        return Err(MediaError::download_failed("empty response body"));
    }

    info!(bytes = written, "source video downloaded");
    Ok(written)
}
