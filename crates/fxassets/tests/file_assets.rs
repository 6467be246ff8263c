use std::time::Duration;

use fxassets::{identity_lut64, AssetCache, DiskCached, FileSource, RoutedSource};

#[test]
fn file_urls_load_through_routed_source() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("identity.png");
    identity_lut64().save(&path).unwrap();

    let source = RoutedSource::new(Duration::from_secs(1)).unwrap();
    let cache = AssetCache::new(source, 3);
    let url = format!("file://{}", path.display());
    cache.request(&url);
    assert!(cache.settle(Duration::from_secs(10)));
    let image = cache.image(&url).expect("lut loaded");
    assert_eq!(image.dimensions(), (512, 512));
    assert_eq!(*image, identity_lut64());
}

#[test]
fn missing_files_are_reported_not_raised() {
    let temp = tempfile::tempdir().unwrap();
    let source = DiskCached::new(FileSource, temp.path());
    let cache = AssetCache::new(source, 3);
    let (tx, rx) = crossbeam_channel::bounded(1);
    let missing = temp.path().join("missing.png").display().to_string();
    cache.load_all([missing.clone()], move |report| {
        let _ = tx.send(report);
    });
    assert!(cache.settle(Duration::from_secs(10)));
    let report = rx.try_recv().unwrap();
    assert!(report.loaded.is_empty());
    assert_eq!(report.failed, vec![missing]);
}
