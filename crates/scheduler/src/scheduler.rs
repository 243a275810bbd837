//! Visibility scheduler
//!
//! Owns the set of tracked entries and drives their state machine. The
//! entry set sits behind a single mutex; registration, resizing, ticks and
//! decode completions all serialize through it, so per-entry transitions are
//! totally ordered.
//!
//! A tick walks every entry once, asks the [`GeometryProbe`] whether its
//! item is visible, and applies the resulting [`Transition`]. Decoding never
//! happens under the lock: loads are queued as [`DecodeJob`]s and finished by
//! [`VisibilityScheduler::run_decode`], either on a decode worker or inline
//! at the end of the tick.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use image::RgbaImage;
use lazyimg_cache::{
    compute_size, resample, ControllerConfig, Decoder, EntryId, EntryStatus, ForcedUnload,
    HandlerRef, ImageEntry, ImageError, ImageSource, ItemId, JobId, SizeRequest, SourceKey,
    TextureRegistry, TextureRegistryAdapter, TextureStats, Transition,
};

use crate::cancel::CancellationRegistry;
use crate::clock::Clock;
use crate::decode::{DecodeExecutor, DecodeJob, DecodeQueue};
use crate::geometry::{GeometryProbe, ItemTree, VisibilityPolicy};

/// Cumulative scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Ticks evaluated
    pub ticks: u64,

    /// Decode jobs accepted by the queue
    pub loads_started: u64,

    /// Loads that ended with a resident texture
    pub loads_completed: u64,

    /// Loads that failed to decode or resize
    pub decode_failures: u64,

    /// Loads whose texture allocation was refused
    pub allocation_failures: u64,

    /// Loads whose size request resolved to an empty image
    pub request_failures: u64,

    /// Textures released after the unload delay expired
    pub evictions: u64,

    /// Pending unloads cancelled because the item became visible again
    pub unloads_cancelled: u64,

    /// Textures released by resize, unregister or shutdown
    pub forced_unloads: u64,

    /// Decode jobs cancelled before completion
    pub decodes_cancelled: u64,

    /// Pending loads dropped because the item stayed hidden for the unload delay
    pub loads_abandoned: u64,

    /// Decode results thrown away because the entry moved on
    pub results_discarded: u64,

    /// Loads postponed because the decode queue was full
    pub queue_rejections: u64,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub visible: usize,
    pub loads_started: usize,
    pub loads_deferred: usize,
    pub unloads_scheduled: usize,
    pub unloads_cancelled: usize,
    pub evicted: usize,
    pub loads_abandoned: usize,
    pub handlers_bound: usize,
    /// Decode jobs run inline at the end of the tick
    pub decoded: usize,
}

/// How a decode job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    Loaded,
    Failed(ImageError),
    /// The job was cancelled before it started
    Cancelled,
    /// The entry was removed or is no longer waiting for this job
    Discarded,
}

/// Copy of an entry's observable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub id: EntryId,
    pub item: ItemId,
    pub status: EntryStatus,
    pub texture: Option<u64>,
    pub natural_size: Option<(u32, u32)>,
    pub rendered_size: Option<(u32, u32)>,
    pub request: SizeRequest,
    pub last_visible_at: Option<Instant>,
    pub last_error: Option<ImageError>,
    pub handler_bound: bool,
}

impl EntrySnapshot {
    fn of(entry: &ImageEntry) -> Self {
        Self {
            id: entry.id(),
            item: entry.item(),
            status: entry.status(),
            texture: entry.texture().map(|texture| texture.raw()),
            natural_size: entry.natural_size(),
            rendered_size: entry.rendered_size(),
            request: entry.request(),
            last_visible_at: entry.last_visible_at(),
            last_error: entry.last_error().cloned(),
            handler_bound: entry.handler_bound(),
        }
    }
}

/// What is known about a source shared by one or more entries.
#[derive(Debug, Default)]
struct SharedSource {
    natural_size: Option<(u32, u32)>,
    entries: usize,
}

type SourceCache = HashMap<SourceKey, SharedSource>;

/// Natural size of `entry`, from the entry itself or from another entry
/// registered with the same source.
fn known_natural_size(sources: &SourceCache, entry: &ImageEntry) -> Option<(u32, u32)> {
    entry.natural_size().or_else(|| {
        entry
            .source()
            .key()
            .and_then(|key| sources.get(&key))
            .and_then(|shared| shared.natural_size)
    })
}

struct EntrySet {
    entries: HashMap<EntryId, ImageEntry>,
    sources: SourceCache,
    next_entry: u64,
    next_job: JobId,
    config: ControllerConfig,
    stats: SchedulerStats,
    shut_down: bool,
}

struct Shared {
    entries: Mutex<EntrySet>,
    probe: GeometryProbe,
    textures: TextureRegistryAdapter,
    decoder: Arc<dyn Decoder>,
    queue: Arc<DecodeQueue>,
    cancellation: CancellationRegistry,
    clock: Arc<dyn Clock>,
}

/// A decoded image and, if the request fits it, the pixels to upload.
struct Prepared {
    natural_size: (u32, u32),
    resized: Result<(RgbaImage, (u32, u32)), ImageError>,
}

/// Polls item visibility and loads/unloads entries accordingly.
///
/// Cheap to clone; clones share the same entry set.
#[derive(Clone)]
pub struct VisibilityScheduler {
    shared: Arc<Shared>,
}

impl VisibilityScheduler {
    /// # Errors
    /// Returns [`ImageError::Configuration`] if `config` does not validate.
    pub fn new(
        config: ControllerConfig,
        textures: Arc<dyn TextureRegistry>,
        items: Arc<dyn ItemTree>,
        decoder: Arc<dyn Decoder>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ImageError> {
        config
            .validate()
            .map_err(|err| ImageError::Configuration(err.to_string()))?;

        let queue = Arc::new(DecodeQueue::new(config.decode_queue_capacity));
        Ok(Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(EntrySet {
                    entries: HashMap::new(),
                    sources: HashMap::new(),
                    next_entry: 1,
                    next_job: 1,
                    config,
                    stats: SchedulerStats::default(),
                    shut_down: false,
                }),
                probe: GeometryProbe::new(items),
                textures: TextureRegistryAdapter::new(textures),
                decoder,
                queue,
                cancellation: CancellationRegistry::new(),
                clock,
            }),
        })
    }

    fn entries(&self) -> MutexGuard<'_, EntrySet> {
        self.shared
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the decode workers pull from.
    pub fn queue(&self) -> Arc<DecodeQueue> {
        self.shared.queue.clone()
    }

    /// Executor handing decode jobs back to this scheduler.
    pub fn executor(&self) -> DecodeExecutor {
        let scheduler = self.clone();
        Arc::new(move |job| {
            scheduler.run_decode(job);
        })
    }

    pub fn now(&self) -> Instant {
        self.shared.clock.now()
    }

    pub fn config(&self) -> ControllerConfig {
        self.entries().config.clone()
    }

    /// Change timing and margin at runtime. Deadlines of entries already
    /// pending unload are kept.
    pub fn configure(
        &self,
        poll_interval: Duration,
        unload_delay: Duration,
        visibility_margin: f32,
    ) -> Result<(), ImageError> {
        let mut set = self.entries();
        let config = set
            .config
            .clone()
            .with_poll_interval(poll_interval)
            .with_unload_delay(unload_delay)
            .with_visibility_margin(visibility_margin);
        config
            .validate()
            .map_err(|err| ImageError::Configuration(err.to_string()))?;

        tracing::debug!(?poll_interval, ?unload_delay, visibility_margin, "reconfigured");
        set.config = config;
        Ok(())
    }

    /// Start tracking an image. The entry begins `Unloaded`.
    pub fn register(
        &self,
        source: ImageSource,
        item: ItemId,
        request: SizeRequest,
        handler: Option<HandlerRef>,
    ) -> Result<EntryId, ImageError> {
        request.validate()?;

        let mut set = self.entries();
        if set.shut_down {
            return Err(ImageError::Configuration(
                "scheduler has been shut down".to_string(),
            ));
        }

        let key = source.key();
        let natural_size = source.known_size().or_else(|| {
            key.as_ref()
                .and_then(|key| set.sources.get(key))
                .and_then(|shared| shared.natural_size)
        });
        if let Some(natural) = natural_size {
            compute_size(natural, &request, set.config.size_mode)?;
        }

        let id = EntryId::new(set.next_entry);
        set.next_entry += 1;

        let mut entry = ImageEntry::new(id, source, item, request);
        if let Some(natural) = natural_size {
            entry.record_natural_size(natural);
        }
        entry.set_handler(handler);
        self.bind_pending_handler(&mut entry);

        if let Some(key) = key {
            set.sources.entry(key).or_default().entries += 1;
        }

        tracing::debug!("registered entry {} ({:?}) on item {}", id, entry.source(), item);
        set.entries.insert(id, entry);
        Ok(id)
    }

    /// Stop tracking an entry, releasing its texture or cancelling its decode.
    pub fn unregister(&self, id: EntryId) -> Result<(), ImageError> {
        let mut set = self.entries();
        let mut entry = set.entries.remove(&id).ok_or(ImageError::InvalidHandle(id))?;

        let forced = entry.force_unload();
        self.settle(&mut set.stats, entry.item(), forced);

        if let Some(key) = entry.source().key() {
            if let Some(shared) = set.sources.get_mut(&key) {
                shared.entries -= 1;
                if shared.entries == 0 {
                    set.sources.remove(&key);
                }
            }
        }

        tracing::debug!("unregistered entry {}", id);
        Ok(())
    }

    /// Apply `update` to an entry's size request.
    ///
    /// Returns `true` if the request changed, in which case any resident
    /// texture or in-flight decode is dropped and the next tick reloads the
    /// entry if it is visible.
    ///
    /// # Errors
    /// [`ImageError::Configuration`] if the new request has a zero value or
    /// resolves to an empty size; the entry is left untouched.
    pub fn update_request<F>(&self, id: EntryId, update: F) -> Result<bool, ImageError>
    where
        F: FnOnce(SizeRequest) -> SizeRequest,
    {
        let mut set = self.entries();
        let size_mode = set.config.size_mode;
        let EntrySet {
            entries,
            sources,
            stats,
            ..
        } = &mut *set;
        let entry = entries.get_mut(&id).ok_or(ImageError::InvalidHandle(id))?;

        let request = update(entry.request());
        request.validate()?;
        if let Some(natural) = known_natural_size(sources, entry) {
            compute_size(natural, &request, size_mode)?;
        }

        if !entry.set_request(request) {
            return Ok(false);
        }

        let forced = entry.force_unload();
        self.settle(stats, entry.item(), forced);
        tracing::debug!("entry {} resized to {:?}", id, request);
        Ok(true)
    }

    /// Replace the entry's event handler. It is bound now if the item exists,
    /// otherwise on a later tick.
    pub fn set_handler(&self, id: EntryId, handler: Option<HandlerRef>) -> Result<(), ImageError> {
        let mut set = self.entries();
        let entry = set
            .entries
            .get_mut(&id)
            .ok_or(ImageError::InvalidHandle(id))?;
        entry.set_handler(handler);
        self.bind_pending_handler(entry);
        Ok(())
    }

    pub fn status(&self, id: EntryId) -> Result<EntryStatus, ImageError> {
        self.entries()
            .entries
            .get(&id)
            .map(ImageEntry::status)
            .ok_or(ImageError::InvalidHandle(id))
    }

    pub fn snapshot(&self, id: EntryId) -> Result<EntrySnapshot, ImageError> {
        self.entries()
            .entries
            .get(&id)
            .map(EntrySnapshot::of)
            .ok_or(ImageError::InvalidHandle(id))
    }

    /// Snapshots of every entry, ordered by id.
    pub fn snapshots(&self) -> Vec<EntrySnapshot> {
        let set = self.entries();
        let mut snapshots: Vec<_> = set.entries.values().map(EntrySnapshot::of).collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }

    /// Number of distinct file or byte sources currently registered.
    pub fn shared_sources(&self) -> usize {
        self.entries().sources.len()
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.entries().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().entries.is_empty()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.entries().stats
    }

    pub fn texture_stats(&self) -> TextureStats {
        self.shared.textures.stats()
    }

    /// Raw ids of every texture currently allocated.
    pub fn live_textures(&self) -> Vec<u64> {
        self.shared.textures.live_handles()
    }

    pub fn is_shut_down(&self) -> bool {
        self.entries().shut_down
    }

    /// Run one tick at the clock's current time.
    pub fn tick(&self) -> TickReport {
        self.tick_at(self.now())
    }

    /// Run one tick at `now`.
    pub fn tick_at(&self, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        let mut set = self.entries();
        if set.shut_down {
            return report;
        }

        let config = set.config.clone();
        let policy = VisibilityPolicy::from_config(&config);
        let EntrySet {
            entries,
            sources,
            next_job,
            stats,
            ..
        } = &mut *set;
        stats.ticks += 1;

        for entry in entries.values_mut() {
            if self.bind_pending_handler(entry) {
                report.handlers_bound += 1;
            }

            let visible = self.shared.probe.is_visible(entry.item(), &policy);
            if visible {
                report.visible += 1;
            }

            match entry.observe(visible, now, config.unload_delay) {
                Transition::Idle => {}
                Transition::NeedsLoad => {
                    let job = DecodeJob {
                        id: *next_job,
                        entry: entry.id(),
                        source: entry.source().clone(),
                        request: entry.request(),
                        natural_size: known_natural_size(sources, entry),
                        size_mode: config.size_mode,
                        token: self.shared.cancellation.register(*next_job),
                    };
                    let job_id = job.id;

                    match self.shared.queue.push(job) {
                        Ok(()) => {
                            *next_job += 1;
                            entry.begin_loading(job_id);
                            stats.loads_started += 1;
                            report.loads_started += 1;
                        }
                        Err(_) => {
                            self.shared.cancellation.unregister(job_id);
                            stats.queue_rejections += 1;
                            report.loads_deferred += 1;
                        }
                    }
                }
                Transition::UnloadScheduled => {
                    report.unloads_scheduled += 1;
                }
                Transition::UnloadCancelled => {
                    stats.unloads_cancelled += 1;
                    report.unloads_cancelled += 1;
                }
                Transition::LoadAbandoned(job) => {
                    tracing::debug!("entry {} hidden while loading, dropping job {}", entry.id(), job);
                    self.settle(stats, entry.item(), ForcedUnload::CancelJob(job));
                    stats.loads_abandoned += 1;
                    report.loads_abandoned += 1;
                }
                Transition::Evicted(texture) => {
                    tracing::debug!("evicting entry {} (texture {})", entry.id(), texture.raw());
                    self.shared.textures.release(texture);
                    self.show_placeholder(entry.item());
                    stats.evictions += 1;
                    report.evicted += 1;
                }
            }
        }
        drop(set);

        if config.decodes_inline() {
            report.decoded = self.process_decodes(config.decode_budget_per_tick);
        }
        report
    }

    /// Run queued decode jobs on the calling thread, at most `budget` of
    /// them (`None` for all). Returns how many ran.
    pub fn process_decodes(&self, budget: Option<usize>) -> usize {
        let mut processed = 0;
        while budget.map_or(true, |budget| processed < budget) {
            let Some(job) = self.shared.queue.try_pop() else {
                break;
            };
            self.run_decode(job);
            processed += 1;
        }
        processed
    }

    /// Decode, resize and upload one job, then store the texture on its
    /// entry if the entry is still waiting for this job.
    pub fn run_decode(&self, job: DecodeJob) -> DecodeOutcome {
        if job.token.is_cancelled() {
            self.shared.cancellation.unregister(job.id);
            return DecodeOutcome::Cancelled;
        }

        let prepared = self.prepare(&job);
        let now = self.now();

        let mut set = self.entries();
        self.shared.cancellation.unregister(job.id);
        let EntrySet {
            entries,
            sources,
            stats,
            ..
        } = &mut *set;

        let Some(entry) = entries
            .get_mut(&job.entry)
            .filter(|entry| entry.loading_job() == Some(job.id))
        else {
            stats.results_discarded += 1;
            tracing::debug!("discarding stale decode job {} for entry {}", job.id, job.entry);
            return DecodeOutcome::Discarded;
        };

        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                tracing::warn!("failed to load entry {}: {}", job.entry, err);
                stats.decode_failures += 1;
                entry.fail_load(job.id, err.clone());
                return DecodeOutcome::Failed(err);
            }
        };

        if !entry.record_natural_size(prepared.natural_size) {
            tracing::warn!(
                "entry {} decoded at {:?}, keeping natural size {:?}",
                job.entry,
                prepared.natural_size,
                entry.natural_size()
            );
        }
        if let Some(key) = entry.source().key() {
            if let Some(shared) = sources.get_mut(&key) {
                shared.natural_size.get_or_insert(prepared.natural_size);
            }
        }

        let (pixels, size) = match prepared.resized {
            Ok(resized) => resized,
            Err(err) => {
                // Not retried until the request changes
                tracing::warn!("entry {} cannot be shown as requested: {}", job.entry, err);
                stats.request_failures += 1;
                entry.fail_load(job.id, err.clone());
                return DecodeOutcome::Failed(err);
            }
        };

        let (width, height) = size;
        let texture = match self.shared.textures.allocate(&pixels, width, height) {
            Ok(texture) => texture,
            Err(err) => {
                tracing::warn!("no texture for entry {}: {}", job.entry, err);
                stats.allocation_failures += 1;
                entry.fail_load(job.id, err.clone());
                return DecodeOutcome::Failed(err);
            }
        };

        if let Err(texture) = entry.complete_load(job.id, texture, size, now) {
            // Unreachable while the lock is held, but never leak a handle
            self.shared.textures.release(texture);
            stats.results_discarded += 1;
            return DecodeOutcome::Discarded;
        }

        self.shared.probe.items().show_texture(entry.item(), entry.texture());
        stats.loads_completed += 1;
        tracing::debug!("entry {} loaded at {}x{}", job.entry, width, height);
        DecodeOutcome::Loaded
    }

    /// Decode and resize. Only a decode failure is an `Err`; a request
    /// that does not fit the image still reports the natural size.
    fn prepare(&self, job: &DecodeJob) -> Result<Prepared, ImageError> {
        let pixels = self.shared.decoder.decode(&job.source)?;
        let natural_size = job.natural_size.unwrap_or_else(|| pixels.dimensions());
        let resized = compute_size(natural_size, &job.request, job.size_mode)
            .map(|size| (resample(pixels, size), size));

        Ok(Prepared {
            natural_size,
            resized,
        })
    }

    /// Release every texture and cancel every decode. Entries stay
    /// registered as `Unloaded`; later ticks do nothing. Returns the number
    /// of textures released.
    pub fn shutdown(&self) -> usize {
        let mut set = self.entries();
        if set.shut_down {
            return 0;
        }
        set.shut_down = true;

        let queued = self.shared.queue.close();
        let cancelled = self.shared.cancellation.cancel_all();

        let EntrySet { entries, stats, .. } = &mut *set;
        let mut released = 0;
        for entry in entries.values_mut() {
            let forced = entry.force_unload();
            if matches!(forced, ForcedUnload::Release(_)) {
                released += 1;
            }
            self.settle(stats, entry.item(), forced);
        }

        tracing::info!(
            "visibility scheduler shut down: {} textures released, {} decodes cancelled ({} queued)",
            released,
            cancelled,
            queued.len()
        );
        released
    }

    /// Clean up after [`ImageEntry::force_unload`].
    fn settle(&self, stats: &mut SchedulerStats, item: ItemId, forced: ForcedUnload) {
        match forced {
            ForcedUnload::Nothing => {}
            ForcedUnload::CancelJob(job) => {
                self.shared.cancellation.cancel(job);
                self.shared.queue.remove(job);
                stats.decodes_cancelled += 1;
            }
            ForcedUnload::Release(texture) => {
                self.shared.textures.release(texture);
                self.show_placeholder(item);
                stats.forced_unloads += 1;
            }
        }
    }

    fn show_placeholder(&self, item: ItemId) {
        let placeholder = self.shared.textures.placeholder();
        self.shared
            .probe
            .items()
            .show_texture(item, placeholder.as_ref());
    }

    /// Returns `true` if a pending handler was bound by this call.
    fn bind_pending_handler(&self, entry: &mut ImageEntry) -> bool {
        let Some(handler) = entry.pending_handler() else {
            return false;
        };
        if !self.shared.probe.items().bind_handler(entry.item(), handler) {
            return false;
        }
        entry.mark_handler_bound();
        true
    }
}
