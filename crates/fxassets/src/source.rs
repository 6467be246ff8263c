//! Byte sources the asset cache fetches from.
//!
//! - `HttpSource` performs blocking GETs with a shared `reqwest` client.
//! - `FileSource` reads `file://` URLs and plain paths.
//! - `RoutedSource` picks one of the two by URL scheme.
//! - `DiskCached` wraps any source with an on-disk copy keyed by URL.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use directories_next::BaseDirs;
use reqwest::blocking::Client;
use tracing::debug;

use crate::AssetError;

/// Anything that can turn an asset URL into raw bytes.
///
/// Implementations run on loader threads, one call per attempt.
pub trait AssetSource: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, AssetError>;
}

#[derive(Debug, Clone)]
pub struct HttpSource {
    http: Client,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }
}

impl AssetSource for HttpSource {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, AssetError> {
        debug!(%url, "requesting asset");
        let http_err = |source| AssetError::Http {
            url: url.to_string(),
            source,
        };
        let response = self.http.get(url).send().map_err(http_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().map_err(http_err)?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileSource;

impl AssetSource for FileSource {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, AssetError> {
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        fs::read(&path).map_err(|source| AssetError::Io { path, source })
    }
}

/// HTTP(S) URLs go to the network, everything else to the filesystem.
#[derive(Debug, Clone)]
pub struct RoutedSource {
    http: HttpSource,
    file: FileSource,
}

impl RoutedSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: HttpSource::new(timeout)?,
            file: FileSource,
        })
    }
}

impl AssetSource for RoutedSource {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, AssetError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.http.fetch(url)
        } else {
            self.file.fetch(url)
        }
    }
}

/// Keeps a copy of every successfully fetched asset under `dir`.
///
/// Only network assets are mirrored; local files are always read directly.
#[derive(Debug, Clone)]
pub struct DiskCached<S> {
    inner: S,
    dir: PathBuf,
}

impl<S: AssetSource> DiskCached<S> {
    pub fn new(inner: S, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(cache_file_name(url))
    }
}

impl<S: AssetSource> AssetSource for DiskCached<S> {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, AssetError> {
        let remote = url.starts_with("http://") || url.starts_with("https://");
        if !remote {
            return self.inner.fetch(url);
        }
        let path = self.path_for(url);
        if let Ok(bytes) = fs::read(&path) {
            debug!(%url, path = %path.display(), "asset served from disk cache");
            return Ok(bytes);
        }
        let bytes = self.inner.fetch(url)?;
        if let Err(err) = fs::create_dir_all(&self.dir).and_then(|_| fs::write(&path, &bytes)) {
            tracing::warn!(
                %url,
                path = %path.display(),
                error = %err,
                "failed to write asset to disk cache"
            );
        }
        Ok(bytes)
    }
}

/// `<hash>-<file name>` so distinct URLs sharing a file name never collide.
fn cache_file_name(url: &str) -> String {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    let trimmed = url.split(&['?', '#'][..]).next().unwrap_or(url);
    let name: String = trimmed
        .rsplit('/')
        .next()
        .unwrap_or("")
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_'))
        .collect();
    let name = if name.is_empty() { "asset".to_string() } else { name };
    format!("{:016x}-{name}", hasher.finish())
}

/// Per-user cache directory for downloaded assets.
pub fn default_cache_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.cache_dir().join("postfx"))
}

/// Expands a leading `~` in a configured cache directory.
pub fn resolve_cache_dir(input: &Path) -> Result<PathBuf> {
    let Ok(rest) = input.strip_prefix("~") else {
        return Ok(input.to_path_buf());
    };
    let base_dirs = BaseDirs::new()
        .ok_or_else(|| anyhow!("unable to determine home directory for '~' expansion"))?;
    Ok(base_dirs.home_dir().join(rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    impl AssetSource for Counting {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>, AssetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(b"payload".to_vec())
        }
    }

    #[test]
    fn file_source_strips_scheme() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("lut.png");
        fs::write(&path, b"bytes").unwrap();
        let url = format!("file://{}", path.display());
        assert_eq!(FileSource.fetch(&url).unwrap(), b"bytes");
        assert!(matches!(
            FileSource.fetch("/definitely/not/here.png"),
            Err(AssetError::Io { .. })
        ));
    }

    #[test]
    fn disk_cache_fetches_remote_once() {
        let temp = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let source = DiskCached::new(
            Counting {
                calls: calls.clone(),
            },
            temp.path().join("cache"),
        );
        let url = "https://cdn.example.com/abc/meibai.png";
        assert_eq!(source.fetch(url).unwrap(), b"payload");
        assert_eq!(source.fetch(url).unwrap(), b"payload");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(source.path_for(url).exists());
        assert!(source
            .path_for(url)
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("-meibai.png"));
    }

    #[test]
    fn cache_names_differ_per_url() {
        assert_ne!(
            cache_file_name("https://a.example.com/x/lut.png"),
            cache_file_name("https://a.example.com/y/lut.png")
        );
        assert!(cache_file_name("https://a.example.com/").ends_with("-asset"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let resolved = resolve_cache_dir(Path::new("~/.cache/postfx")).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with(".cache/postfx"));
        assert_eq!(
            resolve_cache_dir(Path::new("/var/cache")).unwrap(),
            PathBuf::from("/var/cache")
        );
    }
}
