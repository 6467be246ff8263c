//! Asynchronous image assets for the effect pipeline.
//!
//! LUTs, style textures and background images are fetched off the frame
//! thread through an [`AssetSource`], decoded to RGBA8 and kept in a shared
//! [`AssetCache`] keyed by URL. One cache is created per pipeline and handed
//! to every stage, so two stages asking for the same URL share one download.

use std::path::PathBuf;

mod cache;
mod lut;
mod source;

pub use cache::{AssetCache, AssetState, LoadReport};
pub use lut::{identity_lut64, LUT_LEVELS, LUT_SIZE};
pub use source::{
    default_cache_dir, resolve_cache_dir, AssetSource, DiskCached, FileSource, HttpSource,
    RoutedSource,
};

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("request for {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: image::ImageError,
    },
}
