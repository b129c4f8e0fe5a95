//! Source file lookup under a public root.

use std::path::{Component, Path, PathBuf};

use tokio::fs::File;
use tracing::debug;

use crate::error::MediaError;
use crate::MediaResult;

/// Metadata about a servable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Absolute path on disk.
    pub path: PathBuf,

    /// Size in bytes.
    pub size: u64,

    /// MIME type derived from the extension.
    pub content_type: &'static str,
}

/// Resolves request paths to files under a public root directory.
#[derive(Debug, Clone)]
pub struct FileService {
    root: PathBuf,
}

impl FileService {
    /// Create a file service rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The configured public root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a request path to an existing file under the root.
    ///
    /// Leading slashes are ignored. Paths containing `..` or other
    /// non-normal components are rejected rather than normalized.
    pub async fn resolve(&self, request_path: &str) -> MediaResult<PathBuf> {
        let relative = Path::new(request_path.trim_start_matches('/'));

        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(MediaError::OutsideRoot(request_path.to_string())),
            }
        }

        let candidate = self.root.join(relative);

        match tokio::fs::metadata(&candidate).await {
            Ok(metadata) if metadata.is_file() => {
                let path = tokio::fs::canonicalize(&candidate).await?;
                debug!(request = %request_path, path = %path.display(), "Resolved file");
                Ok(path)
            }
            Ok(_) => Err(MediaError::NotFound(candidate)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MediaError::NotFound(candidate))
            }
            Err(e) => Err(MediaError::Io(e)),
        }
    }

    /// Look up size and content type for a request path.
    pub async fn file_info(&self, request_path: &str) -> MediaResult<FileInfo> {
        let path = self.resolve(request_path).await?;
        let metadata = tokio::fs::metadata(&path).await?;

        Ok(FileInfo {
            content_type: content_type_for(&path),
            size: metadata.len(),
            path,
        })
    }

    /// Open a readable stream over the file at `request_path`.
    pub async fn open(&self, request_path: &str) -> MediaResult<File> {
        let path = self.resolve(request_path).await?;
        Ok(File::open(&path).await?)
    }
}

/// Get the Content-Type for a file path from its extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());

    match extension.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("opus") => "audio/opus",
        Some("aac") => "audio/aac",
        Some("m4a") => "audio/mp4",
        Some("flac") => "audio/flac",
        Some("wav") => "audio/wav",
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("js") => "text/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}
