//! Texture registry boundary
//!
//! The host owns texture memory. The core only asks for allocation and
//! release through [`TextureRegistryAdapter`], which also keeps the books:
//! which handles are live, how many bytes they hold, and how often the
//! registry refused an allocation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::RgbaImage;

use crate::error::{AllocationError, ImageError};

/// Opaque handle to a texture owned by the host registry.
///
/// Not `Clone`: an entry holds its handle exclusively and gives it up by
/// value when the texture is released.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(u64);

impl TextureHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Host-side texture owner.
///
/// Implementations that must only be touched from a rendering thread should
/// run the controller in manual mode and drive `tick()` from that thread.
pub trait TextureRegistry: Send + Sync {
    /// Upload `pixels` as a `width` x `height` texture.
    fn allocate(
        &self,
        pixels: &RgbaImage,
        width: u32,
        height: u32,
    ) -> Result<TextureHandle, AllocationError>;

    /// Free a texture previously returned by `allocate`.
    fn release(&self, handle: TextureHandle);

    /// Texture shown by items whose image is not loaded.
    fn placeholder(&self) -> Option<TextureHandle> {
        None
    }
}

/// Statistics about texture usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureStats {
    /// Textures currently allocated through the adapter
    pub live_textures: usize,

    /// Bytes held by live textures (RGBA8)
    pub bytes_resident: usize,

    /// Successful allocations
    pub allocations: u64,

    /// Releases forwarded to the registry
    pub releases: u64,

    /// Allocations the registry refused
    pub allocation_failures: u64,

    /// Releases ignored because the handle was not live
    pub rejected_releases: u64,
}

impl TextureStats {
    /// Fraction of allocation attempts that failed (0.0 to 1.0)
    pub fn failure_rate(&self) -> f64 {
        let total = self.allocations + self.allocation_failures;
        if total == 0 {
            0.0
        } else {
            self.allocation_failures as f64 / total as f64
        }
    }
}

struct AdapterState {
    /// Raw handle id to texture size in bytes
    live: HashMap<u64, usize>,
    stats: TextureStats,
}

/// Facade over the host [`TextureRegistry`].
///
/// Thread-safe. Release is idempotent-safe: a handle that is not live is
/// never forwarded to the registry.
pub struct TextureRegistryAdapter {
    registry: Arc<dyn TextureRegistry>,
    state: Mutex<AdapterState>,
}

impl TextureRegistryAdapter {
    pub fn new(registry: Arc<dyn TextureRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(AdapterState {
                live: HashMap::new(),
                stats: TextureStats::default(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, AdapterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a texture for an entry that is becoming `Loaded`.
    ///
    /// # Errors
    /// Any registry failure is reported as [`ImageError::ResourceExhausted`].
    pub fn allocate(
        &self,
        pixels: &RgbaImage,
        width: u32,
        height: u32,
    ) -> Result<TextureHandle, ImageError> {
        let result = self.registry.allocate(pixels, width, height);
        let mut state = self.state();

        match result {
            Ok(handle) => {
                let bytes = width as usize * height as usize * 4;
                if state.live.insert(handle.raw(), bytes).is_some() {
                    tracing::warn!(
                        "texture registry returned handle {} which is already live",
                        handle.raw()
                    );
                } else {
                    state.stats.bytes_resident += bytes;
                }
                state.stats.allocations += 1;
                state.stats.live_textures = state.live.len();
                Ok(handle)
            }
            Err(err) => {
                state.stats.allocation_failures += 1;
                Err(ImageError::ResourceExhausted(err.to_string()))
            }
        }
    }

    /// Release a texture. Returns `false` if the handle was not live.
    pub fn release(&self, handle: TextureHandle) -> bool {
        {
            let mut state = self.state();
            let Some(bytes) = state.live.remove(&handle.raw()) else {
                state.stats.rejected_releases += 1;
                tracing::warn!("ignoring release of unknown texture {}", handle.raw());
                return false;
            };
            state.stats.bytes_resident = state.stats.bytes_resident.saturating_sub(bytes);
            state.stats.releases += 1;
            state.stats.live_textures = state.live.len();
        }

        self.registry.release(handle);
        true
    }

    pub fn placeholder(&self) -> Option<TextureHandle> {
        self.registry.placeholder()
    }

    pub fn is_live(&self, handle: &TextureHandle) -> bool {
        self.state().live.contains_key(&handle.raw())
    }

    /// Raw ids of every live texture, sorted.
    pub fn live_handles(&self) -> Vec<u64> {
        let mut handles: Vec<u64> = self.state().live.keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    pub fn stats(&self) -> TextureStats {
        self.state().stats
    }
}
