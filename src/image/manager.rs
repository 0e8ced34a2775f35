use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cache::{CacheManager, TileLookup};
use crate::config::ManagerConfig;
use crate::error::InvalidArgument;
use crate::fetch::{
    fetch_tile, load_pyramid, Enqueued, FetchOutcome, Listener, LoadedPyramid, TaskRegistry,
};
use crate::protocol::{normalize_base_url, tile_url, HttpTransport, MetadataClient, TileClient};
use crate::pyramid::{Pyramid, Rect, Viewport};
use crate::tile::{Bitmap, TilePosition};

/// Callback for a tile found on disk by [`ImageManager::lookup_tile`].
type PromotionListener = Box<dyn FnOnce(Option<Bitmap>) + Send>;

/// Disk promotion finished on a worker, waiting for the owner to deliver it.
struct Promotion {
    position: TilePosition,
    bitmap: Option<Bitmap>,
    listener: PromotionListener,
}

/// Everything a viewer needs for one pyramid.
///
/// Owns the pyramid geometry once loaded, the two fetch registries and the
/// protocol clients. Caches are shared and injected through [`CacheManager`].
///
/// Registry operations take `&mut self`: one control context drives the
/// manager, and fetch work runs on the tokio runtime. Listeners fire from
/// [`dispatch_completions`](Self::dispatch_completions) and the `next_*`
/// methods, on the caller's task.
pub struct ImageManager<H: HttpTransport + ?Sized + 'static> {
    requested_base_url: String,

    /// Base URL tiles are requested from; follows permanent redirects
    base_url: String,

    config: ManagerConfig,
    caches: Arc<CacheManager>,
    metadata_client: Arc<MetadataClient<H>>,
    tile_client: Arc<TileClient<H>>,
    pyramid: Option<Pyramid>,
    metadata_tasks: TaskRegistry<String, LoadedPyramid>,
    tile_tasks: TaskRegistry<TilePosition, Bitmap>,
    promotion_tx: mpsc::UnboundedSender<Promotion>,
    promotion_rx: mpsc::UnboundedReceiver<Promotion>,
    pending_promotions: AtomicUsize,
}

impl<H: HttpTransport + ?Sized + 'static> ImageManager<H> {
    /// Create a manager for the pyramid at `base_url`.
    ///
    /// No I/O happens until metadata is loaded.
    pub fn new(
        base_url: &str,
        transport: Arc<H>,
        caches: Arc<CacheManager>,
        config: ManagerConfig,
    ) -> Result<Self, InvalidArgument> {
        if base_url.trim().is_empty() {
            return Err(InvalidArgument::EmptyBaseUrl);
        }
        config.validate()?;

        let base_url = normalize_base_url(base_url.trim());
        let metadata_client = Arc::new(MetadataClient::new(
            Arc::clone(&transport),
            config.metadata_timeout,
            config.max_redirections,
        ));
        let tile_client = Arc::new(TileClient::new(
            transport,
            Arc::clone(caches.tiles().codec()),
            config.tile_timeout,
            config.max_redirections,
        ));

        let (promotion_tx, promotion_rx) = mpsc::unbounded_channel();

        Ok(Self {
            requested_base_url: base_url.clone(),
            base_url,
            metadata_tasks: TaskRegistry::new("metadata", 1),
            tile_tasks: TaskRegistry::new("tiles", config.max_tile_tasks),
            config,
            caches,
            metadata_client,
            tile_client,
            pyramid: None,
            promotion_tx,
            promotion_rx,
            pending_promotions: AtomicUsize::new(0),
        })
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Base URL as given at construction, normalized.
    pub fn requested_base_url(&self) -> &str {
        &self.requested_base_url
    }

    /// Base URL tile requests go to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn caches(&self) -> &Arc<CacheManager> {
        &self.caches
    }

    pub fn is_initialized(&self) -> bool {
        self.pyramid.is_some()
    }

    /// Loaded pyramid geometry.
    pub fn pyramid(&self) -> Result<&Pyramid, InvalidArgument> {
        self.pyramid
            .as_ref()
            .ok_or_else(|| InvalidArgument::NotInitialized {
                base_url: self.requested_base_url.clone(),
            })
    }

    /// Start loading the descriptor in the background.
    ///
    /// `listener` fires from [`dispatch_completions`](Self::dispatch_completions),
    /// which also installs the loaded pyramid.
    pub fn enqueue_metadata_load(&mut self, listener: Listener<LoadedPyramid>) -> Enqueued {
        let base_url = self.requested_base_url.clone();
        let cache = Arc::clone(self.caches.metadata());
        let client = Arc::clone(&self.metadata_client);
        self.metadata_tasks
            .enqueue(base_url.clone(), listener, move |token| {
                load_pyramid(token, base_url, cache, client)
            })
    }

    /// Load the descriptor and wait for the result.
    pub async fn load_metadata(&mut self) -> FetchOutcome<LoadedPyramid> {
        self.enqueue_metadata_load(Box::new(|_| {}));
        while let Some((_, outcome)) = self.metadata_tasks.next_completion().await {
            self.apply_metadata(&outcome);
            if !self.metadata_tasks.contains(&self.requested_base_url) {
                return outcome;
            }
        }
        FetchOutcome::Cancelled
    }

    fn apply_metadata(&mut self, outcome: &FetchOutcome<LoadedPyramid>) {
        let FetchOutcome::Success(loaded) = outcome else {
            return;
        };

        if loaded.base_url != self.base_url {
            info!(old = %self.base_url, new = %loaded.base_url, "Using new canonical base URL");
            self.base_url = loaded.base_url.clone();
        }
        let metadata = loaded.pyramid.metadata();
        info!(
            base_url = %self.base_url,
            width = metadata.width,
            height = metadata.height,
            layers = loaded.pyramid.layer_count(),
            cached = loaded.from_cache,
            "Pyramid loaded"
        );
        self.pyramid = Some(loaded.pyramid.clone());
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    /// Best layer for a viewport of `width` x `height` physical pixels.
    ///
    /// The size is blended between physical and density-independent pixels
    /// by the configured ratio before picking the layer. Ratio and density
    /// were validated at construction.
    pub fn best_layer(&self, width: f64, height: f64) -> Result<u32, InvalidArgument> {
        let pyramid = self.pyramid()?;
        Ok(pyramid.best_layer_for_viewport(self.effective_size(width), self.effective_size(height)))
    }

    fn effective_size(&self, px: f64) -> f64 {
        let ratio = self.config.px_ratio;
        let dp = px / self.config.display_density;
        dp * (1.0 - ratio) + px * ratio
    }

    pub fn visible_tiles(
        &self,
        layer: u32,
        viewport: &Viewport,
    ) -> Result<Vec<TilePosition>, InvalidArgument> {
        self.pyramid()?.visible_tiles(layer, viewport)
    }

    /// URL of a tile, including its tile group.
    pub fn tile_url(&self, position: &TilePosition) -> Result<String, InvalidArgument> {
        let group = self.pyramid()?.tile_group(position)?;
        Ok(tile_url(&self.base_url, group, position))
    }

    pub fn tile_area(&self, position: &TilePosition) -> Result<Rect, InvalidArgument> {
        self.pyramid()?.tile_area(position)
    }

    /// Grow the tile memory cache to hold `count` visible tiles with headroom.
    pub fn update_visible_tile_count(&self, count: usize) -> bool {
        let wanted = (count as f64 * self.config.memory_multiplier).ceil() as usize;
        self.caches.tiles().raise_memory_capacity(wanted)
    }

    // =========================================================================
    // Tiles
    // =========================================================================

    /// Non-blocking cache lookup.
    ///
    /// On [`TileLookup::OnDisk`] the tile is promoted to memory in the
    /// background. `on_disk_hit` then fires once with the result, from
    /// [`dispatch_completions`](Self::dispatch_completions) or
    /// [`next_promotion`](Self::next_promotion) like every other listener.
    pub fn lookup_tile(
        &self,
        position: &TilePosition,
        on_disk_hit: impl FnOnce(Option<Bitmap>) + Send + 'static,
    ) -> Result<TileLookup, InvalidArgument> {
        let url = self.tile_url(position)?;
        let position = *position;
        let tx = self.promotion_tx.clone();

        let lookup = self.caches.tiles().get_async(&url, move |bitmap| {
            let _ = tx.send(Promotion {
                position,
                bitmap,
                listener: Box::new(on_disk_hit),
            });
        });
        if matches!(lookup, TileLookup::OnDisk) {
            self.pending_promotions.fetch_add(1, Ordering::SeqCst);
        }
        Ok(lookup)
    }

    pub fn tile_in_memory(&self, position: &TilePosition) -> Result<bool, InvalidArgument> {
        let url = self.tile_url(position)?;
        Ok(self.caches.tiles().contains_in_memory(&url))
    }

    /// Start fetching a tile into the caches.
    ///
    /// Joins a running fetch for the same tile; dropped when the task
    /// ceiling is reached.
    pub fn enqueue_tile(
        &mut self,
        position: TilePosition,
        listener: Listener<Bitmap>,
    ) -> Result<Enqueued, InvalidArgument> {
        let url = self.tile_url(&position)?;
        let cache = Arc::clone(self.caches.tiles());
        let client = Arc::clone(&self.tile_client);
        Ok(self.tile_tasks.enqueue(position, listener, move |token| {
            fetch_tile(token, url, cache, client)
        }))
    }

    pub fn cancel_tile(&mut self, position: &TilePosition) -> bool {
        self.tile_tasks.cancel(position)
    }

    /// Cancel fetches of `layer` tiles not in `keep`.
    ///
    /// Fetches of other layers are left running.
    pub fn cancel_all_except(&mut self, layer: u32, keep: &HashSet<TilePosition>) -> usize {
        let cancelled = self
            .tile_tasks
            .cancel_where(|position| position.layer == layer && !keep.contains(position));
        debug!(layer, kept = keep.len(), cancelled, "Cancelled invisible tile fetches");
        cancelled
    }

    /// Cancel every running fetch, metadata included.
    pub fn cancel_all(&mut self) -> usize {
        self.metadata_tasks.cancel_all() + self.tile_tasks.cancel_all()
    }

    pub fn in_flight_tiles(&self) -> usize {
        self.tile_tasks.len()
    }

    pub fn is_fetching(&self, position: &TilePosition) -> bool {
        self.tile_tasks.contains(position)
    }

    /// Deliver finished fetches and disk promotions to their listeners;
    /// never waits.
    ///
    /// Returns the number of tile fetches and promotions delivered.
    pub fn dispatch_completions(&mut self) -> usize {
        for (_, outcome) in self.metadata_tasks.dispatch_completions() {
            self.apply_metadata(&outcome);
        }
        let mut delivered = self.tile_tasks.dispatch_completions().len();
        while let Ok(promotion) = self.promotion_rx.try_recv() {
            self.deliver_promotion(promotion);
            delivered += 1;
        }
        delivered
    }

    /// Wait for the next disk promotion started by
    /// [`lookup_tile`](Self::lookup_tile) and deliver it.
    ///
    /// Returns `None` when no promotion is outstanding.
    pub async fn next_promotion(&mut self) -> Option<(TilePosition, bool)> {
        if self.pending_promotions.load(Ordering::SeqCst) == 0 {
            return None;
        }
        let promotion = self.promotion_rx.recv().await?;
        let done = (promotion.position, promotion.bitmap.is_some());
        self.deliver_promotion(promotion);
        Some(done)
    }

    pub fn pending_promotions(&self) -> usize {
        self.pending_promotions.load(Ordering::SeqCst)
    }

    fn deliver_promotion(&self, promotion: Promotion) {
        self.pending_promotions.fetch_sub(1, Ordering::SeqCst);
        debug!(
            position = %promotion.position,
            loaded = promotion.bitmap.is_some(),
            "Delivering disk promotion"
        );
        (promotion.listener)(promotion.bitmap);
    }

    /// Wait for the next tile fetch to finish.
    pub async fn next_tile_completion(&mut self) -> Option<(TilePosition, FetchOutcome<Bitmap>)> {
        self.tile_tasks.next_completion().await
    }

    /// Cancel and join every task.
    pub async fn shutdown(&mut self) {
        self.metadata_tasks.shutdown().await;
        self.tile_tasks.shutdown().await;
        self.caches.flush();
    }

    /// Fetch `positions` and wait for all of them.
    ///
    /// Requests beyond the task ceiling are started as earlier ones finish.
    pub async fn fetch_tiles(
        &mut self,
        positions: &[TilePosition],
    ) -> Result<Vec<(TilePosition, FetchOutcome<Bitmap>)>, InvalidArgument> {
        let mut pending = positions.iter().copied().collect::<Vec<_>>();
        pending.reverse();
        let mut finished = Vec::with_capacity(positions.len());

        loop {
            while let Some(position) = pending.pop() {
                if self.enqueue_tile(position, Box::new(|_| {}))? == Enqueued::Rejected {
                    pending.push(position);
                    break;
                }
            }
            match self.tile_tasks.next_completion().await {
                Some(done) => finished.push(done),
                None if pending.is_empty() => break,
                None => {}
            }
        }
        Ok(finished)
    }
}
