//! In-memory hosts for tests: a texture registry, an item tree and a
//! decoder wrapper that can be told to fail or stall.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use lazyimg_cache::{
    AllocationError, Decoder, HandlerRef, ImageCrateDecoder, ImageError, ImageSource, ItemId,
    TextureHandle, TextureRegistry,
};

use crate::geometry::{ItemGeometry, ItemTree, Rect};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Solid-colour RGBA image.
pub fn solid_pixels(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([30, 120, 200, 255]))
}

/// PNG-encoded solid image.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(solid_pixels(width, height))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap_or_else(|err| panic!("encoding test png: {err}"));
    bytes
}

#[derive(Default)]
struct RegistryState {
    next: u64,
    live: HashSet<u64>,
    sizes: HashMap<u64, (u32, u32)>,
    allocations: usize,
    released: Vec<u64>,
    unknown_releases: usize,
    capacity: Option<usize>,
    refuse_next: usize,
}

/// Texture registry that hands out sequential ids and records every call.
#[derive(Default)]
pub struct FakeTextureRegistry {
    state: Mutex<RegistryState>,
    placeholder: Option<u64>,
}

impl FakeTextureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse allocations once `capacity` textures are live.
    pub fn with_capacity(capacity: usize) -> Self {
        let registry = Self::default();
        registry.set_capacity(Some(capacity));
        registry
    }

    /// Report `raw` as the placeholder texture.
    pub fn with_placeholder(mut self, raw: u64) -> Self {
        self.placeholder = Some(raw);
        self
    }

    pub fn set_capacity(&self, capacity: Option<usize>) {
        lock(&self.state).capacity = capacity;
    }

    /// Refuse the next `count` allocations regardless of capacity.
    pub fn refuse_next(&self, count: usize) {
        lock(&self.state).refuse_next = count;
    }

    pub fn live_count(&self) -> usize {
        lock(&self.state).live.len()
    }

    pub fn is_live(&self, raw: u64) -> bool {
        lock(&self.state).live.contains(&raw)
    }

    /// Successful allocations so far.
    pub fn allocations(&self) -> usize {
        lock(&self.state).allocations
    }

    /// Every release call, in order.
    pub fn released(&self) -> Vec<u64> {
        lock(&self.state).released.clone()
    }

    pub fn release_count(&self) -> usize {
        lock(&self.state).released.len()
    }

    /// Releases of handles that were not live, including double releases.
    pub fn unknown_releases(&self) -> usize {
        lock(&self.state).unknown_releases
    }

    /// Dimensions a texture was allocated with.
    pub fn size_of(&self, raw: u64) -> Option<(u32, u32)> {
        lock(&self.state).sizes.get(&raw).copied()
    }
}

impl TextureRegistry for FakeTextureRegistry {
    fn allocate(
        &self,
        pixels: &RgbaImage,
        width: u32,
        height: u32,
    ) -> Result<TextureHandle, AllocationError> {
        if width == 0 || height == 0 || pixels.dimensions() != (width, height) {
            return Err(AllocationError::InvalidDimensions { width, height });
        }

        let mut state = lock(&self.state);
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(AllocationError::Exhausted("allocation refused".to_string()));
        }
        if state.capacity.is_some_and(|capacity| state.live.len() >= capacity) {
            return Err(AllocationError::Exhausted(format!(
                "{} textures live",
                state.live.len()
            )));
        }

        state.next += 1;
        let raw = state.next;
        state.live.insert(raw);
        state.sizes.insert(raw, (width, height));
        state.allocations += 1;
        Ok(TextureHandle::from_raw(raw))
    }

    fn release(&self, handle: TextureHandle) {
        let mut state = lock(&self.state);
        if !state.live.remove(&handle.raw()) {
            state.unknown_releases += 1;
        }
        state.released.push(handle.raw());
    }

    fn placeholder(&self) -> Option<TextureHandle> {
        self.placeholder.map(TextureHandle::from_raw)
    }
}

/// Item tree with a single scroll container showing [`FakeItemTree::VIEWPORT`].
#[derive(Default)]
pub struct FakeItemTree {
    items: Mutex<HashMap<ItemId, Rect>>,
    handlers: Mutex<HashMap<ItemId, usize>>,
    shown: Mutex<HashMap<ItemId, Option<u64>>>,
}

impl FakeItemTree {
    pub const VIEWPORT: Rect = Rect::new(0.0, 0.0, 800.0, 600.0);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(&self, item: ItemId, rect: Rect) {
        lock(&self.items).insert(item, rect);
    }

    /// Put `item` inside the viewport.
    pub fn show(&self, item: ItemId) {
        self.place(item, Rect::new(10.0, 10.0, 200.0, 150.0));
    }

    /// Scroll `item` far below the viewport.
    pub fn hide(&self, item: ItemId) {
        self.place(item, Rect::new(10.0, 10_000.0, 200.0, 150.0));
    }

    pub fn remove(&self, item: ItemId) {
        lock(&self.items).remove(&item);
    }

    /// How many times a handler was bound to `item`.
    pub fn handler_bindings(&self, item: ItemId) -> usize {
        lock(&self.handlers).get(&item).copied().unwrap_or(0)
    }

    /// Texture last shown on `item`: `None` if never updated,
    /// `Some(None)` for the empty state.
    pub fn shown(&self, item: ItemId) -> Option<Option<u64>> {
        lock(&self.shown).get(&item).copied()
    }
}

impl ItemTree for FakeItemTree {
    fn query(&self, item: ItemId) -> Option<ItemGeometry> {
        lock(&self.items)
            .get(&item)
            .map(|rect| ItemGeometry::new(*rect, Self::VIEWPORT))
    }

    fn bind_handler(&self, item: ItemId, _handler: &HandlerRef) -> bool {
        if !lock(&self.items).contains_key(&item) {
            return false;
        }
        *lock(&self.handlers).entry(item).or_default() += 1;
        true
    }

    fn show_texture(&self, item: ItemId, texture: Option<&TextureHandle>) {
        lock(&self.shown).insert(item, texture.map(TextureHandle::raw));
    }
}

/// Decoder wrapping [`ImageCrateDecoder`] that counts calls and can be made
/// to fail or to stall.
#[derive(Default)]
pub struct CountingDecoder {
    inner: ImageCrateDecoder,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Mutex<Duration>,
}

impl CountingDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Sleep this long before every decode.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }
}

impl Decoder for CountingDecoder {
    fn decode(&self, source: &ImageSource) -> Result<RgbaImage, ImageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(ImageError::Decode {
                source_desc: source.describe(),
                reason: "decoder told to fail".to_string(),
            });
        }
        self.inner.decode(source)
    }
}
