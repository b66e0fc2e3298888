//! Device limits and the buffer layout shared by both backends.

use serde::{Deserialize, Serialize};

pub const BINDING_HEADER: u32 = 0;
pub const BINDING_GEOMETRIES: u32 = 1;
pub const BINDING_SDF_OPS: u32 = 2;
pub const BINDING_MATERIALS: u32 = 3;
pub const BINDING_COLORS: u32 = 4;
pub const BINDING_TEXTURES: u32 = 5;
pub const BINDING_TEXELS: u32 = 6;
pub const BINDING_LIGHTS: u32 = 7;
pub const BINDING_TRANSFORMS: u32 = 8;
pub const BINDING_OBJECTS: u32 = 9;
pub const BINDING_ITEMS: u32 = 10;
pub const BINDING_HEAP: u32 = 11;

/// Number of storage buffers in a flattened scene.
pub const BUFFER_COUNT: usize = 12;

/// Per-dispatch bindings of the emitted kernel, in bind group 1.
pub const DISPATCH_FRAME: u32 = 0;
pub const DISPATCH_RAYS: u32 = 1;
pub const DISPATCH_PIXELS: u32 = 2;

/// Capacity of the scale-factor stack used by color evaluation.
pub const COLOR_STACK_CAPACITY: usize = 64;

/// Fixed capacities of the device kernels.
///
/// Scenes that need more than these are rejected by
/// [`flatten`](crate::flatten) instead of failing mid-render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceLimits {
    pub max_objects: usize,
    /// Nested groups on any root-to-leaf path.
    pub max_frame_depth: usize,
    /// Heap slots of one group's index.
    pub max_heap_slots: usize,
    /// Instructions in one SDF program.
    pub max_sdf_ops: usize,
    /// Depth of the SDF value and point stacks.
    pub max_sdf_stack: usize,
    /// Nesting of scaled and checkerboard colors.
    pub max_color_depth: usize,
    /// Pending rays in the shading work list.
    pub max_work_items: usize,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_objects: 1 << 20,
            max_frame_depth: 16,
            max_heap_slots: 1 << 16,
            max_sdf_ops: 4096,
            max_sdf_stack: 32,
            max_color_depth: 16,
            max_work_items: 64,
        }
    }
}

impl DeviceLimits {
    pub fn with_max_objects(mut self, max_objects: usize) -> Self {
        self.max_objects = max_objects;
        self
    }

    pub fn with_max_frame_depth(mut self, depth: usize) -> Self {
        self.max_frame_depth = depth;
        self
    }

    pub fn with_max_heap_slots(mut self, slots: usize) -> Self {
        self.max_heap_slots = slots;
        self
    }

    pub fn with_max_sdf_ops(mut self, ops: usize) -> Self {
        self.max_sdf_ops = ops;
        self
    }

    pub fn with_max_sdf_stack(mut self, depth: usize) -> Self {
        self.max_sdf_stack = depth;
        self
    }

    pub fn with_max_color_depth(mut self, depth: usize) -> Self {
        self.max_color_depth = depth;
        self
    }

    pub fn with_max_work_items(mut self, items: usize) -> Self {
        self.max_work_items = items;
        self
    }

    /// Work-list entries a render of `max_depth` bounces can need.
    ///
    /// Every scatter pushes at most two branches and pops one item, so the
    /// list grows by at most one per level.
    pub fn work_items_for_depth(max_depth: u32) -> usize {
        max_depth as usize + 1
    }
}

/// One storage buffer of a flattened scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferLayout {
    pub name: String,
    pub binding: u32,
    /// Record size in bytes.
    pub stride: usize,
    /// Records actually present. Zero-length buffers still get a binding;
    /// hosts that cannot bind empty storage should pad to one record.
    pub count: usize,
}

impl BufferLayout {
    pub fn byte_len(&self) -> usize {
        self.stride * self.count
    }
}

/// Everything a backend needs to bind and size a flattened scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutDescriptor {
    pub buffers: Vec<BufferLayout>,
    pub limits: DeviceLimits,
    /// Deepest group nesting actually used by the scene.
    pub frame_depth: u32,
}

impl LayoutDescriptor {
    pub fn buffer(&self, name: &str) -> Option<&BufferLayout> {
        self.buffers.iter().find(|b| b.name == name)
    }

    pub fn total_bytes(&self) -> usize {
        self.buffers.iter().map(BufferLayout::byte_len).sum()
    }
}
