use std::thread;
use std::time::Duration;

use fxassets::{identity_lut64, AssetCache, AssetError, AssetSource, AssetState};

/// Fails every fetch after a short delay.
struct SlowFailure(Duration);

impl AssetSource for SlowFailure {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, AssetError> {
        thread::sleep(self.0);
        Err(AssetError::Status {
            url: url.to_string(),
            status: 503,
        })
    }
}

#[test]
fn late_failure_keeps_an_inserted_image() {
    let cache = AssetCache::new(SlowFailure(Duration::from_millis(100)), 1);
    let url = "https://example.invalid/lut.png";
    cache.request(url);
    cache.insert(url, identity_lut64());

    thread::sleep(Duration::from_millis(400));
    assert_eq!(cache.poll(), 0);
    let image = cache.image(url).expect("inserted image survives the failed load");
    assert_eq!(image.dimensions(), (512, 512));
    assert!(!cache.is_failed(url));
}

#[test]
fn pending_load_still_settles_as_failed() {
    let cache = AssetCache::new(SlowFailure(Duration::from_millis(10)), 2);
    let url = "https://example.invalid/missing.png";
    cache.request(url);
    assert!(matches!(cache.state(url), Some(AssetState::Pending)));
    assert!(cache.settle(Duration::from_secs(5)));
    assert!(cache.is_failed(url));
    assert!(cache.image(url).is_none());
}
