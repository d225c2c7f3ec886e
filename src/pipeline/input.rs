//! Input loading: a local path or an HTTP(S) URL becomes a [`Document`].
//!
//! Content is not validated here; an empty or non-PDF document is rejected
//! by the extraction stage, where it becomes a "could not read document"
//! failure like any other unreadable deck.

use crate::error::InputError;
use crate::output::Document;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load `input` into memory, downloading it when it is a URL.
pub async fn load_document(input: &str, timeout_secs: u64) -> Result<Document, InputError> {
    if is_url(input) {
        download(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

async fn read_local(path_str: &str) -> Result<Document, InputError> {
    let path = PathBuf::from(path_str);
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(InputError::PermissionDenied { path });
        }
        Err(_) => return Err(InputError::FileNotFound { path }),
    };
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(Document::new(path_str, bytes))
}

async fn download(url: &str, timeout_secs: u64) -> Result<Document, InputError> {
    info!("Downloading deck from: {}", url);
    let failed = |reason: String| InputError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            InputError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(Document::new(filename_from_url(url), bytes.to_vec()))
}

/// Last path segment of `url` when it looks like a file name.
pub fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}
