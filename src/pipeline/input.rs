//! Input loading: turn a user-supplied path or URL into image bytes.
//!
//! The chain works on bytes, so downloads stay in memory; nothing is written
//! to disk. No format validation is done beyond rejecting empty input.

use crate::error::DocChainError;
use std::path::PathBuf;
use tracing::{debug, info};

/// Image bytes plus a label for logs and reports.
#[derive(Debug, Clone)]
pub struct ImageInput {
    /// File name or URL the bytes came from.
    pub label: String,
    pub bytes: Vec<u8>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load the image at `input`, downloading it if it is a URL.
pub async fn load_image(input: &str, timeout_secs: u64) -> Result<ImageInput, DocChainError> {
    if input.trim().is_empty() {
        return Err(DocChainError::InvalidInput {
            input: input.to_string(),
        });
    }

    let loaded = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };

    if loaded.bytes.is_empty() {
        return Err(DocChainError::EmptyImage {
            label: loaded.label,
        });
    }
    Ok(loaded)
}

async fn read_local(path_str: &str) -> Result<ImageInput, DocChainError> {
    let path = PathBuf::from(path_str);

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => DocChainError::PermissionDenied { path: path.clone() },
        _ => DocChainError::FileNotFound { path: path.clone() },
    })?;

    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(ImageInput {
        label: path_str.to_string(),
        bytes,
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ImageInput, DocChainError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DocChainError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            DocChainError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            DocChainError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(DocChainError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| DocChainError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(ImageInput {
        label: url.to_string(),
        bytes: bytes.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/scan.png"));
        assert!(is_url("http://example.com/scan.png"));
        assert!(!is_url("/tmp/scan.png"));
        assert!(!is_url("scan.png"));
        assert!(!is_url(""));
    }

    #[tokio::test]
    async fn test_load_local_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"\x89PNG fake").unwrap();
        let path = tmp.path().to_string_lossy().to_string();

        let loaded = load_image(&path, 5).await.unwrap();
        assert_eq!(loaded.bytes, b"\x89PNG fake");
        assert_eq!(loaded.label, path);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = load_image("/definitely/not/a/real/scan.png", 5).await.unwrap_err();
        assert!(matches!(err, DocChainError::FileNotFound { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn test_empty_file_rejected() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let err = load_image(&tmp.path().to_string_lossy(), 5).await.unwrap_err();
        assert!(matches!(err, DocChainError::EmptyImage { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn test_blank_input_rejected() {
        let err = load_image("  ", 5).await.unwrap_err();
        assert!(matches!(err, DocChainError::InvalidInput { .. }));
    }
}
