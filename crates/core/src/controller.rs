//! Image controller
//!
//! Public entry point tying the pieces together. The controller owns a
//! [`VisibilityScheduler`] and, depending on the configuration, a
//! [`DecodePool`] and a [`PollLoop`]. All entry mutations go through the
//! scheduler's entry lock, so the controller itself holds no entry state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lazyimg_cache::{
    ControllerConfig, Decoder, EntryId, EntryStatus, HandlerRef, ImageCrateDecoder, ImageError,
    ImageSource, ItemId, SizeRequest, TextureRegistry, TextureStats,
};
use lazyimg_scheduler::{
    Clock, DecodePool, EntrySnapshot, ItemTree, PollLoop, SchedulerStats, SystemClock,
    TickReport, VisibilityScheduler,
};

/// Handle returned by [`ImageController::register`].
pub type EntryHandle = EntryId;

/// How long an idle decode worker waits before re-checking for shutdown.
const WORKER_IDLE_TIMEOUT: Duration = Duration::from_millis(100);

/// Options for [`ImageController::register`].
#[derive(Debug, Clone)]
pub struct RegisterOptions {
    /// Item the image is displayed on
    pub item: ItemId,
    pub request: SizeRequest,
    /// Event handler attached to the item once it exists
    pub handler: Option<HandlerRef>,
}

impl RegisterOptions {
    /// Natural size, no handler.
    pub fn new(item: ItemId) -> Self {
        Self {
            item,
            request: SizeRequest::default(),
            handler: None,
        }
    }

    pub fn width(mut self, width: u32) -> Self {
        self.request = self.request.with_width(Some(width));
        self
    }

    pub fn height(mut self, height: u32) -> Self {
        self.request = self.request.with_height(Some(height));
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.request = self.request.with_size(Some(size));
        self
    }

    pub fn handler(mut self, handler: HandlerRef) -> Self {
        self.handler = Some(handler);
        self
    }
}

/// Builder for [`ImageController`].
pub struct ControllerBuilder {
    textures: Arc<dyn TextureRegistry>,
    items: Arc<dyn ItemTree>,
    config: ControllerConfig,
    decoder: Arc<dyn Decoder>,
    clock: Arc<dyn Clock>,
}

impl ControllerBuilder {
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default `image`-crate decoder.
    pub fn decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Create the controller and start its background threads.
    ///
    /// # Errors
    /// [`ImageError::Configuration`] for an invalid configuration,
    /// [`ImageError::Spawn`] if a thread cannot be started.
    pub fn build(self) -> Result<ImageController, ImageError> {
        let scheduler = VisibilityScheduler::new(
            self.config.clone(),
            self.textures,
            self.items,
            self.decoder,
            self.clock,
        )?;

        let mut controller = ImageController {
            scheduler: scheduler.clone(),
            pool: None,
            poll: None,
        };

        if !self.config.decodes_inline() {
            controller.pool = Some(DecodePool::new(
                scheduler.queue(),
                scheduler.executor(),
                self.config.decode_workers,
                WORKER_IDLE_TIMEOUT,
            )?);
        }
        if self.config.background_polling {
            controller.poll = Some(PollLoop::start(scheduler)?);
        }

        tracing::info!(
            "image controller started ({} decode workers, background polling {})",
            self.config.decode_workers,
            if self.config.background_polling { "on" } else { "off" }
        );
        Ok(controller)
    }
}

/// Tracks images bound to GUI items and keeps textures resident only for
/// the ones that are, or recently were, visible.
///
/// Dropping the controller shuts it down.
pub struct ImageController {
    scheduler: VisibilityScheduler,
    pool: Option<DecodePool>,
    poll: Option<PollLoop>,
}

impl ImageController {
    /// Controller with the default decoder and the system clock.
    pub fn new(
        config: ControllerConfig,
        textures: Arc<dyn TextureRegistry>,
        items: Arc<dyn ItemTree>,
    ) -> Result<Self, ImageError> {
        Self::builder(textures, items).config(config).build()
    }

    pub fn builder(textures: Arc<dyn TextureRegistry>, items: Arc<dyn ItemTree>) -> ControllerBuilder {
        ControllerBuilder {
            textures,
            items,
            config: ControllerConfig::default(),
            decoder: Arc::new(ImageCrateDecoder),
            clock: Arc::new(SystemClock),
        }
    }

    /// Start tracking an image. The entry is loaded once its item becomes
    /// visible.
    pub fn register(
        &self,
        source: impl Into<ImageSource>,
        options: RegisterOptions,
    ) -> Result<EntryHandle, ImageError> {
        self.scheduler
            .register(source.into(), options.item, options.request, options.handler)
    }

    /// Stop tracking an image and free its texture.
    pub fn unregister(&self, entry: EntryHandle) -> Result<(), ImageError> {
        self.scheduler.unregister(entry)
    }

    /// Set the rendered width, clearing any `size`. Returns `true` if the
    /// entry will be reloaded.
    pub fn set_width(&self, entry: EntryHandle, width: u32) -> Result<bool, ImageError> {
        self.scheduler.update_request(entry, |request| {
            request.with_size(None).with_width(Some(width))
        })
    }

    /// Set the rendered height, clearing any `size`.
    pub fn set_height(&self, entry: EntryHandle, height: u32) -> Result<bool, ImageError> {
        self.scheduler.update_request(entry, |request| {
            request.with_size(None).with_height(Some(height))
        })
    }

    /// Set the target for the longer axis (or both axes, per
    /// [`ControllerConfig::size_mode`]). Overrides width and height.
    pub fn set_size(&self, entry: EntryHandle, size: u32) -> Result<bool, ImageError> {
        self.scheduler
            .update_request(entry, |request| request.with_size(Some(size)))
    }

    /// Set width and height at once, clearing any `size`.
    pub fn set_dimensions(
        &self,
        entry: EntryHandle,
        width: u32,
        height: u32,
    ) -> Result<bool, ImageError> {
        self.scheduler.update_request(entry, |_| {
            SizeRequest::default()
                .with_width(Some(width))
                .with_height(Some(height))
        })
    }

    /// Replace the whole size request; [`SizeRequest::default`] restores
    /// the natural size.
    pub fn set_request(&self, entry: EntryHandle, request: SizeRequest) -> Result<bool, ImageError> {
        self.scheduler.update_request(entry, |_| request)
    }

    pub fn set_handler(&self, entry: EntryHandle, handler: Option<HandlerRef>) -> Result<(), ImageError> {
        self.scheduler.set_handler(entry, handler)
    }

    /// Change polling, the unload delay and the visibility margin.
    pub fn configure(
        &self,
        poll_interval: Duration,
        unload_delay: Duration,
        visibility_margin: f32,
    ) -> Result<(), ImageError> {
        self.scheduler
            .configure(poll_interval, unload_delay, visibility_margin)?;
        if let Some(poll) = &self.poll {
            poll.wake();
        }
        Ok(())
    }

    pub fn config(&self) -> ControllerConfig {
        self.scheduler.config()
    }

    /// Evaluate visibility once. Hosts running without background polling
    /// call this from their frame loop.
    pub fn tick(&self) -> TickReport {
        self.scheduler.tick()
    }

    pub fn tick_at(&self, now: Instant) -> TickReport {
        self.scheduler.tick_at(now)
    }

    pub fn state(&self, entry: EntryHandle) -> Result<EntryStatus, ImageError> {
        self.scheduler.status(entry)
    }

    pub fn snapshot(&self, entry: EntryHandle) -> Result<EntrySnapshot, ImageError> {
        self.scheduler.snapshot(entry)
    }

    pub fn snapshots(&self) -> Vec<EntrySnapshot> {
        self.scheduler.snapshots()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    pub fn texture_stats(&self) -> TextureStats {
        self.scheduler.texture_stats()
    }

    pub fn len(&self) -> usize {
        self.scheduler.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scheduler.is_empty()
    }

    pub fn scheduler(&self) -> &VisibilityScheduler {
        &self.scheduler
    }

    pub fn is_shut_down(&self) -> bool {
        self.scheduler.is_shut_down()
    }

    /// Stop polling, cancel decodes and release every texture. Entries stay
    /// registered as `Unloaded`. Returns the number of textures released;
    /// calling it again returns 0.
    pub fn shutdown(&mut self) -> usize {
        if let Some(mut poll) = self.poll.take() {
            poll.stop();
        }

        let released = self.scheduler.shutdown();

        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
        released
    }
}

impl Drop for ImageController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
