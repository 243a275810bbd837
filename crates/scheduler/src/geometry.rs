//! Geometric visibility of GUI items
//!
//! An item is visible when its screen rectangle intersects its scroll
//! container's visible rectangle, optionally inflated by a margin so items
//! just outside the viewport are loaded before they scroll in.

use std::sync::Arc;

use lazyimg_cache::{ControllerConfig, HandlerRef, ItemId, TextureHandle};

/// Axis-aligned rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Whether the rectangle covers no area.
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Grow the rectangle by `margin` on every side.
    pub fn inflate(&self, margin: f32) -> Self {
        Self {
            x: self.x - margin,
            y: self.y - margin,
            width: self.width + margin * 2.0,
            height: self.height + margin * 2.0,
        }
    }

    /// Whether the intersection with `other` has a non-zero area.
    pub fn intersects(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.right() > other.x
            && self.x < other.right()
            && self.bottom() > other.y
            && self.y < other.bottom()
    }

    /// Whether `other` lies entirely inside this rectangle.
    pub fn contains(&self, other: &Rect) -> bool {
        !other.is_empty()
            && other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// Result of querying an item: where it is and what its container shows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemGeometry {
    /// The item's rectangle
    pub item: Rect,
    /// The visible part of the item's scroll container
    pub container: Rect,
}

impl ItemGeometry {
    pub const fn new(item: Rect, container: Rect) -> Self {
        Self { item, container }
    }
}

/// How geometry is turned into a visible/invisible decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibilityPolicy {
    /// Pixels added around the container rectangle
    pub margin: f32,
    /// Require the whole item inside the container instead of any overlap
    pub require_full: bool,
}

impl VisibilityPolicy {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            margin: config.visibility_margin,
            require_full: config.require_full_visibility,
        }
    }

    pub fn is_visible(&self, geometry: &ItemGeometry) -> bool {
        let area = geometry.container.inflate(self.margin);
        if self.require_full {
            area.contains(&geometry.item)
        } else {
            area.intersects(&geometry.item)
        }
    }
}

impl Default for VisibilityPolicy {
    fn default() -> Self {
        Self::from_config(&ControllerConfig::default())
    }
}

/// Host GUI item tree.
///
/// Methods are called while the scheduler holds its entry lock, so they
/// must not call back into the controller.
pub trait ItemTree: Send + Sync {
    /// Current geometry of `item`, or `None` if the item does not exist or
    /// is not laid out.
    fn query(&self, item: ItemId) -> Option<ItemGeometry>;

    /// Attach an event handler to `item`. Returns `false` if the item does
    /// not exist yet; binding is retried on later ticks.
    fn bind_handler(&self, item: ItemId, handler: &HandlerRef) -> bool;

    /// Display `texture` on `item`, or the empty state when `None`.
    fn show_texture(&self, _item: ItemId, _texture: Option<&TextureHandle>) {}
}

/// Reads item geometry from the host tree and applies a [`VisibilityPolicy`].
#[derive(Clone)]
pub struct GeometryProbe {
    items: Arc<dyn ItemTree>,
}

impl GeometryProbe {
    pub fn new(items: Arc<dyn ItemTree>) -> Self {
        Self { items }
    }

    pub fn query(&self, item: ItemId) -> Option<ItemGeometry> {
        self.items.query(item)
    }

    /// Missing items are never visible.
    pub fn is_visible(&self, item: ItemId, policy: &VisibilityPolicy) -> bool {
        self.query(item)
            .is_some_and(|geometry| policy.is_visible(&geometry))
    }

    pub fn items(&self) -> &dyn ItemTree {
        self.items.as_ref()
    }
}
