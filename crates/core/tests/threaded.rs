//! Background polling thread and decode workers against the system clock.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use lazyimg::{ControllerConfig, EntryStatus, ImageController, RegisterOptions};
use lazyimg_scheduler::testing::{solid_pixels, CountingDecoder, FakeItemTree, FakeTextureRegistry};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn threaded_config() -> ControllerConfig {
    ControllerConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_unload_delay(Duration::from_millis(100))
        .with_decode_workers(2)
}

#[test]
fn test_background_load_and_evict() {
    init_tracing();
    let textures = Arc::new(FakeTextureRegistry::new());
    let items = Arc::new(FakeItemTree::new());
    let mut controller =
        ImageController::new(threaded_config(), textures.clone(), items.clone()).unwrap();

    items.hide(1);
    let entry = controller
        .register(solid_pixels(64, 48), RegisterOptions::new(1).width(32))
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(controller.state(entry).unwrap(), EntryStatus::Unloaded);

    items.show(1);
    assert!(wait_for(|| controller.state(entry).unwrap().is_loaded()));
    assert_eq!(
        controller.snapshot(entry).unwrap().rendered_size,
        Some((32, 24))
    );

    items.hide(1);
    assert!(wait_for(|| controller.state(entry).unwrap().is_pending_unload()));
    assert!(wait_for(|| controller.state(entry).unwrap() == EntryStatus::Unloaded));
    assert_eq!(textures.release_count(), 1);

    assert_eq!(controller.shutdown(), 0);
    assert_eq!(textures.live_count(), 0);
}

#[test]
fn test_many_entries_with_workers() {
    init_tracing();
    let textures = Arc::new(FakeTextureRegistry::new());
    let items = Arc::new(FakeItemTree::new());
    let decoder = Arc::new(CountingDecoder::new());
    decoder.set_delay(Duration::from_millis(2));
    let mut controller = ImageController::builder(textures.clone(), items.clone())
        .config(threaded_config().with_unload_delay(Duration::from_secs(60)))
        .decoder(decoder.clone())
        .build()
        .unwrap();

    // More entries than the queue holds; the rest load on later ticks
    let entries: Vec<_> = (1..=40)
        .map(|item| {
            items.show(item);
            controller
                .register(solid_pixels(20, 20), RegisterOptions::new(item))
                .unwrap()
        })
        .collect();

    assert!(wait_for(|| entries
        .iter()
        .all(|entry| controller.state(*entry).unwrap().is_loaded())));
    assert_eq!(textures.live_count(), 40);
    assert_eq!(decoder.calls(), 40);

    assert_eq!(controller.shutdown(), 40);
    assert_eq!(textures.live_count(), 0);
    assert_eq!(textures.unknown_releases(), 0);
}

#[test]
fn test_configure_applies_to_running_loop() {
    init_tracing();
    let textures = Arc::new(FakeTextureRegistry::new());
    let items = Arc::new(FakeItemTree::new());
    let controller = ImageController::new(
        threaded_config().with_poll_interval(Duration::from_secs(3600)),
        textures.clone(),
        items.clone(),
    )
    .unwrap();

    // The first tick ran before the item existed
    thread::sleep(Duration::from_millis(20));
    items.show(1);
    let entry = controller
        .register(solid_pixels(10, 10), RegisterOptions::new(1))
        .unwrap();

    controller
        .configure(Duration::from_millis(10), Duration::from_secs(1), 0.0)
        .unwrap();
    assert!(wait_for(|| controller.state(entry).unwrap().is_loaded()));
}

#[test]
fn test_drop_stops_threads_and_releases() {
    init_tracing();
    let textures = Arc::new(FakeTextureRegistry::new());
    let items = Arc::new(FakeItemTree::new());
    let controller = ImageController::new(threaded_config(), textures.clone(), items.clone()).unwrap();

    items.show(1);
    let entry = controller
        .register(solid_pixels(10, 10), RegisterOptions::new(1))
        .unwrap();
    assert!(wait_for(|| controller.state(entry).unwrap().is_loaded()));

    drop(controller);
    assert_eq!(textures.release_count(), 1);
    assert_eq!(textures.live_count(), 0);
}
