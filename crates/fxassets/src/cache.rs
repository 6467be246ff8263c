use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use image::RgbaImage;
use tracing::{debug, warn};

use crate::source::AssetSource;
use crate::AssetError;

/// Load state of one URL.
#[derive(Debug, Clone)]
pub enum AssetState {
    Pending,
    Ready(Arc<RgbaImage>),
    Failed,
}

/// Outcome of a `load_all` batch once every URL in it has settled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<String>,
}

impl LoadReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

type BatchCallback = Box<dyn FnOnce(LoadReport) + Send>;

struct Batch {
    urls: Vec<String>,
    on_complete: BatchCallback,
}

struct Completion {
    url: String,
    result: Result<Arc<RgbaImage>, String>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, AssetState>,
    batches: Vec<Batch>,
}

/// Shared in-memory image cache keyed by URL.
///
/// Loads run on background threads and are retried up to `attempts` times.
/// Results only become visible through [`AssetCache::poll`], which the owner
/// calls between frames, so filters never observe a half-finished load in
/// the middle of rendering.
#[derive(Clone)]
pub struct AssetCache {
    state: Arc<Mutex<CacheState>>,
    source: Arc<dyn AssetSource>,
    attempts: u32,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
}

impl AssetCache {
    pub fn new(source: impl AssetSource, attempts: u32) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            source: Arc::new(source),
            attempts: attempts.max(1),
            tx,
            rx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // a panicking callback cannot leave the map half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self, url: &str) -> Option<AssetState> {
        self.lock().entries.get(url).cloned()
    }

    /// The decoded image once its load has completed and been polled.
    pub fn image(&self, url: &str) -> Option<Arc<RgbaImage>> {
        match self.lock().entries.get(url) {
            Some(AssetState::Ready(image)) => Some(image.clone()),
            _ => None,
        }
    }

    pub fn is_failed(&self, url: &str) -> bool {
        matches!(self.lock().entries.get(url), Some(AssetState::Failed))
    }

    /// Registers an already decoded image, replacing whatever was cached.
    pub fn insert(&self, url: impl Into<String>, image: RgbaImage) {
        self.lock()
            .entries
            .insert(url.into(), AssetState::Ready(Arc::new(image)));
    }

    /// Starts loading `url` unless it is pending or ready. Failed URLs are
    /// retried from scratch.
    pub fn request(&self, url: &str) {
        {
            let mut state = self.lock();
            match state.entries.get(url) {
                Some(AssetState::Pending) | Some(AssetState::Ready(_)) => return,
                Some(AssetState::Failed) | None => {}
            }
            state.entries.insert(url.to_string(), AssetState::Pending);
        }
        self.spawn_load(url.to_string());
    }

    /// Requests every URL and calls `on_complete` from a later [`poll`] once
    /// all of them have settled.
    ///
    /// [`poll`]: AssetCache::poll
    pub fn load_all<I, S, F>(&self, urls: I, on_complete: F)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(LoadReport) + Send + 'static,
    {
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        for url in &urls {
            self.request(url);
        }
        self.lock().batches.push(Batch {
            urls,
            on_complete: Box::new(on_complete),
        });
    }

    /// Applies finished loads and fires completed batch callbacks.
    ///
    /// Returns the number of loads applied.
    pub fn poll(&self) -> usize {
        let completions: Vec<Completion> = self.rx.try_iter().collect();
        let mut applied = 0;
        let finished = {
            let mut state = self.lock();
            for completion in completions {
                // only a pending entry takes a result; an `insert` that
                // landed meanwhile wins over a late load
                let Some(entry) = state.entries.get_mut(&completion.url) else {
                    continue;
                };
                if !matches!(entry, AssetState::Pending) {
                    debug!(url = %completion.url, "stale asset load ignored");
                    continue;
                }
                *entry = match completion.result {
                    Ok(image) => {
                        debug!(url = %completion.url, "asset ready");
                        AssetState::Ready(image)
                    }
                    Err(error) => {
                        warn!(url = %completion.url, %error, "asset failed after retries");
                        AssetState::Failed
                    }
                };
                applied += 1;
            }
            take_settled_batches(&mut state)
        };

        for (batch, report) in finished {
            (batch.on_complete)(report);
        }
        applied
    }

    pub fn pending(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|state| matches!(state, AssetState::Pending))
            .count()
    }

    /// Blocks, polling, until nothing is pending or `timeout` elapses.
    ///
    /// Returns `true` when every load settled.
    pub fn settle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll();
            if self.pending() == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = (deadline - now).min(Duration::from_millis(20));
            if let Ok(completion) = self.rx.recv_timeout(wait) {
                // hand it back so poll() applies it in order with the rest
                let _ = self.tx.send(completion);
            }
        }
    }

    fn spawn_load(&self, url: String) {
        let source = self.source.clone();
        let tx = self.tx.clone();
        let attempts = self.attempts;
        let thread_url = url.clone();
        let spawned = thread::Builder::new()
            .name("asset-loader".into())
            .spawn(move || {
                let result = load_with_retries(source.as_ref(), &thread_url, attempts);
                let _ = tx.send(Completion {
                    url: thread_url,
                    result,
                });
            });
        if let Err(err) = spawned {
            warn!(%url, error = %err, "failed to spawn asset loader");
            let _ = self.tx.send(Completion {
                url,
                result: Err(err.to_string()),
            });
        }
    }
}

fn take_settled_batches(state: &mut CacheState) -> Vec<(Batch, LoadReport)> {
    let mut finished = Vec::new();
    let mut index = 0;
    while index < state.batches.len() {
        let settled = state.batches[index]
            .urls
            .iter()
            .all(|url| !matches!(state.entries.get(url), Some(AssetState::Pending) | None));
        if !settled {
            index += 1;
            continue;
        }
        let batch = state.batches.remove(index);
        let mut report = LoadReport::default();
        for url in &batch.urls {
            match state.entries.get(url) {
                Some(AssetState::Ready(_)) => report.loaded.push(url.clone()),
                _ => report.failed.push(url.clone()),
            }
        }
        finished.push((batch, report));
    }
    finished
}

fn load_with_retries(
    source: &dyn AssetSource,
    url: &str,
    attempts: u32,
) -> Result<Arc<RgbaImage>, String> {
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match source.fetch(url).and_then(|bytes| decode(url, &bytes)) {
            Ok(image) => return Ok(Arc::new(image)),
            Err(error) => {
                warn!(%url, attempt, attempts, %error, "asset load attempt failed");
                last_error = error.to_string();
            }
        }
    }
    Err(last_error)
}

fn decode(url: &str, bytes: &[u8]) -> Result<RgbaImage, AssetError> {
    image::load_from_memory(bytes)
        .map(|image| image.to_rgba8())
        .map_err(|source| AssetError::Decode {
            url: url.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn png_bytes() -> Vec<u8> {
        let image = RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    /// Fails the first `failures` fetches of every URL.
    struct Flaky {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    impl AssetSource for Flaky {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, AssetError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(AssetError::Status {
                    url: url.to_string(),
                    status: 503,
                });
            }
            Ok(png_bytes())
        }
    }

    fn flaky(failures: u32) -> (AssetCache, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = AssetCache::new(
            Flaky {
                failures,
                calls: calls.clone(),
            },
            3,
        );
        (cache, calls)
    }

    #[test]
    fn transient_failures_are_retried() {
        let (cache, calls) = flaky(2);
        cache.request("https://cdn.example.com/a.png");
        assert!(matches!(
            cache.state("https://cdn.example.com/a.png"),
            Some(AssetState::Pending)
        ));
        assert!(cache.settle(Duration::from_secs(5)));
        let image = cache.image("https://cdn.example.com/a.png").unwrap();
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn gives_up_after_three_attempts() {
        let (cache, calls) = flaky(u32::MAX);
        cache.request("https://cdn.example.com/b.png");
        assert!(cache.settle(Duration::from_secs(5)));
        assert!(cache.is_failed("https://cdn.example.com/b.png"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn duplicate_requests_share_one_load() {
        let (cache, calls) = flaky(0);
        let other = cache.clone();
        cache.request("https://cdn.example.com/c.png");
        other.request("https://cdn.example.com/c.png");
        assert!(cache.settle(Duration::from_secs(5)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(other.image("https://cdn.example.com/c.png").is_some());
    }

    #[test]
    fn batch_reports_failed_urls() {
        let (cache, _) = flaky(u32::MAX);
        cache.insert("preloaded", RgbaImage::new(1, 1));
        let (tx, rx) = crossbeam_channel::bounded(1);
        cache.load_all(["preloaded", "https://cdn.example.com/d.png"], move |report| {
            let _ = tx.send(report);
        });
        assert!(rx.try_recv().is_err());
        assert!(cache.settle(Duration::from_secs(5)));
        let report = rx.try_recv().expect("batch callback fired");
        assert_eq!(report.loaded, vec!["preloaded".to_string()]);
        assert_eq!(report.failed, vec!["https://cdn.example.com/d.png".to_string()]);
        assert!(!report.is_complete_success());
    }

    #[test]
    fn undecodable_bytes_fail() {
        struct Garbage;
        impl AssetSource for Garbage {
            fn fetch(&self, _url: &str) -> Result<Vec<u8>, AssetError> {
                Ok(b"not an image".to_vec())
            }
        }
        let cache = AssetCache::new(Garbage, 2);
        cache.request("junk");
        assert!(cache.settle(Duration::from_secs(5)));
        assert!(cache.is_failed("junk"));
    }
}
