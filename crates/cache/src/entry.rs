//! Tracked image entries and their lifecycle state machine.
//!
//! An [`ImageEntry`] owns at most one texture handle. The handle lives inside
//! [`EntryState::Loaded`] and [`EntryState::PendingUnload`], so an entry that
//! is not holding a texture cannot hand one out, and evicting it moves the
//! handle out to whoever releases it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ImageError;
use crate::resize::SizeRequest;
use crate::source::ImageSource;
use crate::texture::TextureHandle;

/// Identifier of an item in the host GUI tree.
pub type ItemId = u64;

/// Identifier of a decode job. Unique for the lifetime of a scheduler.
pub type JobId = u64;

/// Externally constructed event handler attached to the item displaying an entry.
pub type HandlerRef = Arc<dyn Any + Send + Sync>;

/// Stable identity of a registered image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl EntryId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of an entry.
#[derive(Debug, PartialEq, Eq)]
pub enum EntryState {
    /// No pixels resident.
    Unloaded,
    /// A decode job is in flight.
    Loading { job: JobId },
    /// Texture resident and the item was visible on the last tick.
    Loaded { texture: TextureHandle },
    /// Texture still resident; released once `deadline` passes without the
    /// item becoming visible again.
    PendingUnload {
        texture: TextureHandle,
        deadline: Instant,
    },
}

impl EntryState {
    pub fn status(&self) -> EntryStatus {
        match self {
            Self::Unloaded => EntryStatus::Unloaded,
            Self::Loading { .. } => EntryStatus::Loading,
            Self::Loaded { .. } => EntryStatus::Loaded,
            Self::PendingUnload { deadline, .. } => EntryStatus::PendingUnload {
                deadline: *deadline,
            },
        }
    }

    pub fn texture(&self) -> Option<&TextureHandle> {
        match self {
            Self::Loaded { texture } | Self::PendingUnload { texture, .. } => Some(texture),
            Self::Unloaded | Self::Loading { .. } => None,
        }
    }
}

/// Copyable summary of an [`EntryState`], without the texture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Unloaded,
    Loading,
    Loaded,
    PendingUnload { deadline: Instant },
}

impl EntryStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded)
    }

    /// Whether a texture is resident (`Loaded` or `PendingUnload`).
    pub fn is_resident(&self) -> bool {
        matches!(self, Self::Loaded | Self::PendingUnload { .. })
    }

    pub fn is_pending_unload(&self) -> bool {
        matches!(self, Self::PendingUnload { .. })
    }
}

/// Outcome of feeding one visibility observation into the state machine.
#[derive(Debug, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed that the caller has to act on.
    Idle,
    /// The entry is unloaded and visible: the caller should submit a decode
    /// job and then call [`ImageEntry::begin_loading`].
    NeedsLoad,
    /// `Loaded` moved to `PendingUnload`.
    UnloadScheduled,
    /// `PendingUnload` went back to `Loaded`, reusing the texture.
    UnloadCancelled,
    /// The grace period expired. The entry is now `Unloaded` and the handle
    /// must be released by the caller.
    Evicted(TextureHandle),
    /// The item stayed hidden for the whole unload delay while its decode
    /// was still pending. The entry is now `Unloaded`; the caller cancels
    /// the job.
    LoadAbandoned(JobId),
}

/// What a forced unload left for the caller to clean up.
#[derive(Debug, PartialEq, Eq)]
pub enum ForcedUnload {
    Nothing,
    CancelJob(JobId),
    Release(TextureHandle),
}

/// Event handler waiting to be bound to the entry's item.
pub struct HandlerBinding {
    handler: HandlerRef,
    bound: bool,
}

impl fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("bound", &self.bound)
            .finish_non_exhaustive()
    }
}

/// One tracked image.
#[derive(Debug)]
pub struct ImageEntry {
    id: EntryId,
    source: ImageSource,
    item: ItemId,
    request: SizeRequest,
    natural_size: Option<(u32, u32)>,
    rendered_size: Option<(u32, u32)>,
    state: EntryState,
    last_visible_at: Option<Instant>,
    handler: Option<HandlerBinding>,
    last_error: Option<ImageError>,
}

impl ImageEntry {
    pub fn new(id: EntryId, source: ImageSource, item: ItemId, request: SizeRequest) -> Self {
        Self {
            id,
            source,
            item,
            request,
            natural_size: None,
            rendered_size: None,
            state: EntryState::Unloaded,
            last_visible_at: None,
            handler: None,
            last_error: None,
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    pub fn item(&self) -> ItemId {
        self.item
    }

    pub fn request(&self) -> SizeRequest {
        self.request
    }

    pub fn natural_size(&self) -> Option<(u32, u32)> {
        self.natural_size
    }

    /// Dimensions of the resident texture, if any.
    pub fn rendered_size(&self) -> Option<(u32, u32)> {
        self.state.texture().and(self.rendered_size)
    }

    pub fn state(&self) -> &EntryState {
        &self.state
    }

    pub fn status(&self) -> EntryStatus {
        self.state.status()
    }

    pub fn texture(&self) -> Option<&TextureHandle> {
        self.state.texture()
    }

    pub fn last_visible_at(&self) -> Option<Instant> {
        self.last_visible_at
    }

    pub fn last_error(&self) -> Option<&ImageError> {
        self.last_error.as_ref()
    }

    /// Id of the in-flight decode job, if the entry is loading.
    pub fn loading_job(&self) -> Option<JobId> {
        match self.state {
            EntryState::Loading { job } => Some(job),
            _ => None,
        }
    }

    /// Apply one tick's visibility observation.
    pub fn observe(&mut self, visible: bool, now: Instant, unload_delay: Duration) -> Transition {
        if visible {
            self.last_visible_at = Some(now);
        }
        let hidden_too_long = !visible
            && self
                .last_visible_at
                .is_some_and(|at| now.saturating_duration_since(at) >= unload_delay);
        let loadable = visible && !self.blocked_by_request();

        let state = std::mem::replace(&mut self.state, EntryState::Unloaded);
        let (next, transition) = match state {
            EntryState::Unloaded if loadable => (EntryState::Unloaded, Transition::NeedsLoad),
            EntryState::Unloaded => (EntryState::Unloaded, Transition::Idle),
            EntryState::Loading { job } if hidden_too_long => {
                (EntryState::Unloaded, Transition::LoadAbandoned(job))
            }
            EntryState::Loading { job } => (EntryState::Loading { job }, Transition::Idle),
            EntryState::Loaded { texture } if visible => {
                (EntryState::Loaded { texture }, Transition::Idle)
            }
            EntryState::Loaded { texture } => (
                EntryState::PendingUnload {
                    texture,
                    deadline: now + unload_delay,
                },
                Transition::UnloadScheduled,
            ),
            EntryState::PendingUnload { texture, .. } if visible => {
                (EntryState::Loaded { texture }, Transition::UnloadCancelled)
            }
            EntryState::PendingUnload { texture, deadline } if now >= deadline => {
                (EntryState::Unloaded, Transition::Evicted(texture))
            }
            pending @ EntryState::PendingUnload { .. } => (pending, Transition::Idle),
        };
        self.state = next;
        transition
    }

    /// Record that decode job `job` was accepted for this entry.
    pub fn begin_loading(&mut self, job: JobId) {
        debug_assert!(
            matches!(self.state, EntryState::Unloaded),
            "begin_loading on {} in state {:?}",
            self.id,
            self.state.status()
        );
        self.state = EntryState::Loading { job };
    }

    /// Store the texture produced by `job`.
    ///
    /// Returns the texture back if the entry is no longer waiting for that
    /// job, so the caller can release it.
    pub fn complete_load(
        &mut self,
        job: JobId,
        texture: TextureHandle,
        rendered_size: (u32, u32),
        now: Instant,
    ) -> Result<(), TextureHandle> {
        if self.loading_job() != Some(job) {
            return Err(texture);
        }
        self.state = EntryState::Loaded { texture };
        self.rendered_size = Some(rendered_size);
        self.last_visible_at = Some(now);
        self.last_error = None;
        Ok(())
    }

    /// Drop back to `Unloaded` after `job` failed. Ignored for stale jobs.
    pub fn fail_load(&mut self, job: JobId, error: ImageError) -> bool {
        if self.loading_job() != Some(job) {
            return false;
        }
        self.state = EntryState::Unloaded;
        self.last_error = Some(error);
        true
    }

    /// Cache the intrinsic size reported by the first successful decode.
    ///
    /// Returns `false` when a size was already recorded and `size` differs
    /// from it; the recorded size is kept.
    pub fn record_natural_size(&mut self, size: (u32, u32)) -> bool {
        match self.natural_size {
            None => {
                self.natural_size = Some(size);
                true
            }
            Some(existing) => existing == size,
        }
    }

    /// Leave whatever state the entry is in and go to `Unloaded`.
    pub fn force_unload(&mut self) -> ForcedUnload {
        match std::mem::replace(&mut self.state, EntryState::Unloaded) {
            EntryState::Unloaded => ForcedUnload::Nothing,
            EntryState::Loading { job } => ForcedUnload::CancelJob(job),
            EntryState::Loaded { texture } | EntryState::PendingUnload { texture, .. } => {
                ForcedUnload::Release(texture)
            }
        }
    }

    /// Whether the last load failed because the size request cannot be
    /// satisfied. Such an entry is not reloaded until the request changes.
    pub fn blocked_by_request(&self) -> bool {
        matches!(self.last_error, Some(ImageError::Configuration(_)))
    }

    /// Replace the size request. Returns `false` if it was unchanged.
    pub fn set_request(&mut self, request: SizeRequest) -> bool {
        if self.request == request {
            return false;
        }
        self.request = request;
        if self.blocked_by_request() {
            self.last_error = None;
        }
        true
    }

    pub fn set_handler(&mut self, handler: Option<HandlerRef>) {
        self.handler = handler.map(|handler| HandlerBinding {
            handler,
            bound: false,
        });
    }

    /// Handler that still has to be attached to the item.
    pub fn pending_handler(&self) -> Option<&HandlerRef> {
        self.handler
            .as_ref()
            .filter(|binding| !binding.bound)
            .map(|binding| &binding.handler)
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    pub fn handler_bound(&self) -> bool {
        self.handler.as_ref().is_some_and(|binding| binding.bound)
    }

    pub fn mark_handler_bound(&mut self) {
        if let Some(binding) = self.handler.as_mut() {
            binding.bound = true;
        }
    }
}
