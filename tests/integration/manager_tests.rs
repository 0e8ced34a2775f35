//! Image manager end-to-end tests.
//!
//! Tests verify:
//! - Metadata load from network, then from the shared caches
//! - Permanent redirects moving tile requests to the new host
//! - Fetch deduplication, backpressure and cancellation
//! - Viewport queries: best layer, visible tiles, memory ceiling

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use zoomify_stream::error::{ErrorKind, InvalidArgument};
use zoomify_stream::{
    Bitmap, CacheConfig, CacheManager, Enqueued, FetchOutcome, ImageManager, Listener,
    ManagerConfig, TileLookup, TilePosition, Viewport,
};

use super::test_utils::{manager_for, memory_caches, MockZoomifyServer};

const BASE: &str = "http://tiles.example/pyramid/";

fn reference_server() -> MockZoomifyServer {
    MockZoomifyServer::new().with_pyramid(BASE, 4096, 2048, 256)
}

type Seen = Arc<Mutex<Vec<FetchOutcome<Bitmap>>>>;

fn recording_listener(seen: &Seen) -> Listener<Bitmap> {
    let seen = Arc::clone(seen);
    Box::new(move |outcome| seen.lock().unwrap().push(outcome))
}

// =============================================================================
// Metadata
// =============================================================================

#[tokio::test]
async fn test_reference_scenario() {
    let server = Arc::new(reference_server());
    let mut manager = manager_for("http://tiles.example/pyramid", &server);

    let loaded = manager.load_metadata().await.success().unwrap();
    assert!(!loaded.from_cache);
    assert_eq!(manager.base_url(), BASE);

    let pyramid = manager.pyramid().unwrap();
    assert_eq!(pyramid.layer_count(), 5);
    let last = pyramid.layer(4).unwrap();
    assert_eq!((last.tiles_horizontal, last.tiles_vertical), (16, 8));

    let corner = pyramid.tile_coords_for_point(4, 4095.0, 2047.0).unwrap();
    assert_eq!(corner, TilePosition::new(4, 15, 7));
    assert_eq!(
        manager.tile_url(&corner).unwrap(),
        "http://tiles.example/pyramid/TileGroup0/4-15-7.jpg"
    );

    let area = manager.tile_area(&corner).unwrap();
    assert_eq!((area.left, area.top, area.right, area.bottom), (3840, 1792, 4096, 2048));
}

#[tokio::test]
async fn test_queries_before_load_fail_fast() {
    let server = Arc::new(reference_server());
    let mut manager = manager_for(BASE, &server);
    let position = TilePosition::new(0, 0, 0);

    assert!(!manager.is_initialized());
    assert!(matches!(
        manager.tile_url(&position),
        Err(InvalidArgument::NotInitialized { .. })
    ));
    assert!(manager.best_layer(800.0, 600.0).is_err());
    assert!(manager.enqueue_tile(position, Box::new(|_| {})).is_err());
    assert_eq!(server.request_count(), 0);
}

#[tokio::test]
async fn test_invalid_construction_arguments() {
    let server = Arc::new(reference_server());

    let err = ImageManager::new("  ", Arc::clone(&server), memory_caches(), ManagerConfig::default())
        .err()
        .unwrap();
    assert_eq!(err, InvalidArgument::EmptyBaseUrl);

    let config = ManagerConfig {
        px_ratio: 1.5,
        ..ManagerConfig::default()
    };
    let err = ImageManager::new(BASE, server, memory_caches(), config)
        .err()
        .unwrap();
    assert_eq!(err, InvalidArgument::PxRatio(1.5));
}

#[tokio::test]
async fn test_metadata_served_from_shared_cache() {
    let server = Arc::new(reference_server());
    let caches = memory_caches();

    let mut first = ImageManager::new(
        BASE,
        Arc::clone(&server),
        Arc::clone(&caches),
        ManagerConfig::default(),
    )
    .unwrap();
    first.load_metadata().await.success().unwrap();
    assert_eq!(server.request_count(), 1);

    let mut second =
        ImageManager::new(BASE, Arc::clone(&server), caches, ManagerConfig::default()).unwrap();
    let loaded = second.load_metadata().await.success().unwrap();
    assert!(loaded.from_cache);
    assert_eq!(server.request_count(), 1);
    assert_eq!(second.pyramid().unwrap(), first.pyramid().unwrap());
}

#[tokio::test]
async fn test_metadata_failure_is_reported_once() {
    let server = Arc::new(
        MockZoomifyServer::new().with_body(&format!("{}ImageProperties.xml", BASE), "<oops/>"),
    );
    let mut manager = manager_for(BASE, &server);

    let outcome = manager.load_metadata().await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::InvalidData));
    assert!(!manager.is_initialized());
}

#[tokio::test]
async fn test_background_metadata_load_notifies_listener() {
    let server = Arc::new(reference_server());
    let mut manager = manager_for(BASE, &server);
    let seen = Arc::new(Mutex::new(None));

    let sink = Arc::clone(&seen);
    let result = manager.enqueue_metadata_load(Box::new(move |outcome| {
        *sink.lock().unwrap() = Some(outcome.is_success());
    }));
    assert_eq!(result, Enqueued::Started);

    while !manager.is_initialized() {
        tokio::task::yield_now().await;
        manager.dispatch_completions();
    }
    assert_eq!(*seen.lock().unwrap(), Some(true));
}

// =============================================================================
// Redirects
// =============================================================================

#[tokio::test]
async fn test_permanent_redirect_moves_tile_requests() {
    let server = Arc::new(
        MockZoomifyServer::new()
            .with_redirect(
                "http://old.example/pyramid/ImageProperties.xml",
                301,
                "http://new.example/pyramid/ImageProperties.xml",
            )
            .with_pyramid("http://new.example/pyramid/", 4096, 2048, 256),
    );
    let mut manager = manager_for("http://old.example/pyramid/", &server);

    manager.load_metadata().await.success().unwrap();
    assert_eq!(manager.requested_base_url(), "http://old.example/pyramid/");
    assert_eq!(manager.base_url(), "http://new.example/pyramid/");

    let position = TilePosition::new(4, 15, 7);
    assert_eq!(
        manager.tile_url(&position).unwrap(),
        "http://new.example/pyramid/TileGroup0/4-15-7.jpg"
    );

    manager.enqueue_tile(position, Box::new(|_| {})).unwrap();
    let (done, outcome) = manager.next_tile_completion().await.unwrap();
    assert_eq!(done, position);
    assert!(outcome.is_success());
    assert_eq!(
        server.requests().last().map(String::as_str),
        Some("http://new.example/pyramid/TileGroup0/4-15-7.jpg")
    );
}

#[tokio::test]
async fn test_temporary_redirect_keeps_base_url() {
    let server = Arc::new(
        MockZoomifyServer::new()
            .with_redirect(
                "http://old.example/pyramid/ImageProperties.xml",
                302,
                "http://new.example/pyramid/ImageProperties.xml",
            )
            .with_pyramid("http://new.example/pyramid/", 4096, 2048, 256),
    );
    let mut manager = manager_for("http://old.example/pyramid/", &server);

    manager.load_metadata().await.success().unwrap();
    assert_eq!(manager.base_url(), "http://old.example/pyramid/");
}

// =============================================================================
// Tile Fetching
// =============================================================================

#[tokio::test]
async fn test_duplicate_enqueue_fetches_once() {
    let server = Arc::new(reference_server().gated());
    let mut manager = manager_for(BASE, &server);
    server.release(1);
    manager.load_metadata().await.success().unwrap();

    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let position = TilePosition::new(4, 3, 2);
    assert_eq!(
        manager
            .enqueue_tile(position, recording_listener(&seen))
            .unwrap(),
        Enqueued::Started
    );
    assert_eq!(
        manager
            .enqueue_tile(position, recording_listener(&seen))
            .unwrap(),
        Enqueued::Joined
    );
    assert_eq!(manager.in_flight_tiles(), 1);

    server.release(1);
    let (_, outcome) = manager.next_tile_completion().await.unwrap();
    assert!(outcome.is_success());

    assert_eq!(server.tile_request_count(), 1);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(FetchOutcome::is_success));
    assert!(manager.tile_in_memory(&position).unwrap());
}

#[tokio::test]
async fn test_cancel_before_io_writes_nothing() {
    let server = Arc::new(reference_server());
    let mut manager = manager_for(BASE, &server);
    manager.load_metadata().await.success().unwrap();

    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let position = TilePosition::new(4, 0, 0);
    manager
        .enqueue_tile(position, recording_listener(&seen))
        .unwrap();
    assert!(manager.cancel_tile(&position));

    let (_, outcome) = manager.next_tile_completion().await.unwrap();
    assert!(outcome.is_cancelled());
    assert_eq!(*seen.lock().unwrap(), vec![FetchOutcome::Cancelled]);
    assert_eq!(server.tile_request_count(), 0);
    assert!(!manager.tile_in_memory(&position).unwrap());

    // The key is free again
    assert_eq!(
        manager.enqueue_tile(position, Box::new(|_| {})).unwrap(),
        Enqueued::Started
    );
    manager.shutdown().await;
}

#[tokio::test]
async fn test_ceiling_drops_excess_requests() {
    let server = Arc::new(reference_server().gated());
    let caches = memory_caches();
    let config = ManagerConfig {
        max_tile_tasks: 2,
        ..ManagerConfig::default()
    };
    let mut manager = ImageManager::new(BASE, Arc::clone(&server), caches, config).unwrap();
    server.release(1);
    manager.load_metadata().await.success().unwrap();

    let results: Vec<_> = (0..3)
        .map(|column| {
            manager
                .enqueue_tile(TilePosition::new(4, column, 0), Box::new(|_| {}))
                .unwrap()
        })
        .collect();
    assert_eq!(
        results,
        vec![Enqueued::Started, Enqueued::Started, Enqueued::Rejected]
    );
    assert!(!manager.is_fetching(&TilePosition::new(4, 2, 0)));

    manager.shutdown().await;
    assert_eq!(manager.in_flight_tiles(), 0);
}

#[tokio::test]
async fn test_cancel_all_except_keeps_visible_and_other_layers() {
    let server = Arc::new(reference_server().gated());
    let mut manager = manager_for(BASE, &server);
    server.release(1);
    manager.load_metadata().await.success().unwrap();

    let visible = TilePosition::new(4, 0, 0);
    let scrolled_away = TilePosition::new(4, 1, 0);
    let other_layer = TilePosition::new(3, 0, 0);
    for position in [visible, scrolled_away, other_layer] {
        manager.enqueue_tile(position, Box::new(|_| {})).unwrap();
    }

    let keep: HashSet<_> = [visible].into_iter().collect();
    assert_eq!(manager.cancel_all_except(4, &keep), 1);

    server.release(2);
    let mut outcomes = HashMap::new();
    while let Some((position, outcome)) = manager.next_tile_completion().await {
        outcomes.insert(position, outcome);
    }

    assert!(outcomes[&visible].is_success());
    assert!(outcomes[&other_layer].is_success());
    assert!(outcomes[&scrolled_away].is_cancelled());
}

#[tokio::test]
async fn test_failed_tile_reports_error_kind() {
    let server = Arc::new(
        reference_server().with_status("http://tiles.example/pyramid/TileGroup0/0-0-0.jpg", 500),
    );
    let mut manager = manager_for(BASE, &server);
    manager.load_metadata().await.success().unwrap();

    manager
        .enqueue_tile(TilePosition::new(0, 0, 0), Box::new(|_| {}))
        .unwrap();
    let (_, outcome) = manager.next_tile_completion().await.unwrap();
    assert_eq!(outcome.error_kind(), Some(ErrorKind::ServerResponse));
}

#[tokio::test]
async fn test_fetch_tiles_beyond_ceiling() {
    let server = Arc::new(reference_server());
    let config = ManagerConfig {
        max_tile_tasks: 3,
        ..ManagerConfig::default()
    };
    let mut manager = ImageManager::new(BASE, Arc::clone(&server), memory_caches(), config).unwrap();
    manager.load_metadata().await.success().unwrap();

    let tiles = manager
        .visible_tiles(3, &Viewport::full(4096, 2048))
        .unwrap();
    assert_eq!(tiles.len(), 32);

    let results = manager.fetch_tiles(&tiles).await.unwrap();
    assert_eq!(results.len(), 32);
    assert!(results.iter().all(|(_, outcome)| outcome.is_success()));
    assert_eq!(server.tile_request_count(), 32);
}

// =============================================================================
// Disk-backed Sessions
// =============================================================================

#[tokio::test]
async fn test_second_session_runs_from_disk() {
    let dir = TempDir::new().unwrap();
    let position = TilePosition::new(2, 1, 1);
    {
        let server = Arc::new(reference_server());
        let caches = Arc::new(CacheManager::open(&CacheConfig::with_directory(dir.path())));
        let mut manager =
            ImageManager::new(BASE, server, caches, ManagerConfig::default()).unwrap();
        manager.load_metadata().await.success().unwrap();
        manager.enqueue_tile(position, Box::new(|_| {})).unwrap();
        assert!(manager.next_tile_completion().await.unwrap().1.is_success());
        manager.shutdown().await;
    }

    // Nothing is served over the network any more
    let server = Arc::new(MockZoomifyServer::new());
    let caches = Arc::new(CacheManager::open(&CacheConfig::with_directory(dir.path())));
    let mut manager =
        ImageManager::new(BASE, Arc::clone(&server), Arc::clone(&caches), ManagerConfig::default())
            .unwrap();

    let loaded = manager.load_metadata().await.success().unwrap();
    assert!(loaded.from_cache);

    assert!(caches.tiles().disk_tier().wait().is_some());
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let lookup = manager
        .lookup_tile(&position, move |bitmap| {
            *sink.lock().unwrap() = Some(bitmap.is_some());
        })
        .unwrap();
    assert!(matches!(lookup, TileLookup::OnDisk));
    assert_eq!(manager.pending_promotions(), 1);
    assert_eq!(manager.next_promotion().await, Some((position, true)));
    assert_eq!(*seen.lock().unwrap(), Some(true));
    assert_eq!(manager.pending_promotions(), 0);
    assert!(manager.next_promotion().await.is_none());
    assert!(manager.tile_in_memory(&position).unwrap());

    // Tiles missing from disk still go to the network
    let other = TilePosition::new(0, 0, 0);
    manager.enqueue_tile(other, Box::new(|_| {})).unwrap();
    let (_, outcome) = manager.next_tile_completion().await.unwrap();
    assert_eq!(outcome.error_kind(), Some(ErrorKind::ServerResponse));
    assert_eq!(server.request_count(), 1);
}

#[tokio::test]
async fn test_moved_pyramid_keeps_new_host_across_sessions() {
    let dir = TempDir::new().unwrap();
    let old_base = "http://old.example/pyramid/";
    let new_base = "http://new.example/pyramid/";
    let position = TilePosition::new(4, 1, 1);
    {
        let server = Arc::new(
            MockZoomifyServer::new()
                .with_redirect(
                    "http://old.example/pyramid/ImageProperties.xml",
                    301,
                    "http://new.example/pyramid/ImageProperties.xml",
                )
                .with_pyramid(new_base, 4096, 2048, 256),
        );
        let caches = Arc::new(CacheManager::open(&CacheConfig::with_directory(dir.path())));
        let mut manager =
            ImageManager::new(old_base, server, caches, ManagerConfig::default()).unwrap();
        manager.load_metadata().await.success().unwrap();
        assert_eq!(manager.base_url(), new_base);
        manager.enqueue_tile(position, Box::new(|_| {})).unwrap();
        assert!(manager.next_tile_completion().await.unwrap().1.is_success());
        manager.shutdown().await;
    }

    // The old host is gone; everything comes from disk under the new URLs
    let server = Arc::new(MockZoomifyServer::new());
    let caches = Arc::new(CacheManager::open(&CacheConfig::with_directory(dir.path())));
    let mut manager =
        ImageManager::new(old_base, Arc::clone(&server), caches, ManagerConfig::default())
            .unwrap();

    let loaded = manager.load_metadata().await.success().unwrap();
    assert!(loaded.from_cache);
    assert_eq!(loaded.base_url, new_base);
    assert_eq!(manager.requested_base_url(), old_base);
    assert_eq!(manager.base_url(), new_base);
    assert_eq!(
        manager.tile_url(&position).unwrap(),
        "http://new.example/pyramid/TileGroup0/4-1-1.jpg"
    );

    manager.enqueue_tile(position, Box::new(|_| {})).unwrap();
    let (_, outcome) = manager.next_tile_completion().await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(server.request_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disk_promotion_listener_runs_on_owner() {
    let dir = TempDir::new().unwrap();
    let position = TilePosition::new(3, 2, 1);
    {
        let server = Arc::new(reference_server());
        let caches = Arc::new(CacheManager::open(&CacheConfig::with_directory(dir.path())));
        let mut manager =
            ImageManager::new(BASE, server, caches, ManagerConfig::default()).unwrap();
        manager.load_metadata().await.success().unwrap();
        manager.fetch_tiles(&[position]).await.unwrap();
        manager.shutdown().await;
    }

    let server = Arc::new(reference_server());
    let caches = Arc::new(CacheManager::open(&CacheConfig::with_directory(dir.path())));
    let mut manager =
        ImageManager::new(BASE, server, Arc::clone(&caches), ManagerConfig::default()).unwrap();
    manager.load_metadata().await.success().unwrap();
    assert!(caches.tiles().disk_tier().wait().is_some());

    let owner = std::thread::current().id();
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let lookup = manager
        .lookup_tile(&position, move |bitmap| {
            *sink.lock().unwrap() = Some((std::thread::current().id(), bitmap.is_some()));
        })
        .unwrap();
    assert!(matches!(lookup, TileLookup::OnDisk));

    // Finished promotions wait for the owner to dispatch them
    let mut delivered = 0;
    for _ in 0..200 {
        assert!(delivered > 0 || seen.lock().unwrap().is_none());
        delivered = manager.dispatch_completions();
        if delivered > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(delivered, 1);
    assert_eq!(*seen.lock().unwrap(), Some((owner, true)));
    assert_eq!(manager.pending_promotions(), 0);
}

// =============================================================================
// Viewport Policy
// =============================================================================

#[tokio::test]
async fn test_best_layer_blends_pixels_and_density() {
    let server = Arc::new(reference_server());

    let mut plain = manager_for(BASE, &server);
    plain.load_metadata().await.success().unwrap();
    // 1200x600 needs the 2048x1024 layer
    assert_eq!(plain.best_layer(1200.0, 600.0).unwrap(), 3);
    assert_eq!(plain.best_layer(100.0, 50.0).unwrap(), 0);
    assert_eq!(plain.best_layer(10_000.0, 10_000.0).unwrap(), 4);

    let config = ManagerConfig {
        display_density: 2.0,
        ..ManagerConfig::default()
    };
    let mut dense = ImageManager::new(BASE, Arc::clone(&server), memory_caches(), config).unwrap();
    dense.load_metadata().await.success().unwrap();
    // Blended to 900x450, which the 1024x512 layer covers
    assert_eq!(dense.best_layer(1200.0, 600.0).unwrap(), 2);
}

#[tokio::test]
async fn test_visible_tile_count_raises_memory_ceiling() {
    let server = Arc::new(reference_server());
    let manager = manager_for(BASE, &server);
    let tiles = Arc::clone(manager.caches().tiles());
    let initial = tiles.memory_capacity();

    assert!(manager.update_visible_tile_count(initial));
    assert_eq!(tiles.memory_capacity(), (initial as f64 * 1.25).ceil() as usize);
    assert!(!manager.update_visible_tile_count(4));
}
