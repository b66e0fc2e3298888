//! Flattening a [`World`] into integer-indexed device buffers.
//!
//! The object graph is walked once, children before parents. Shared
//! geometry, materials and textures (same `Arc`) and shared objects (same
//! handle) get one record each, so instancing survives flattening. Every
//! group gets an implicit binary heap over its bounded children: a single
//! leaf for plain aggregates, the group's own BVH when it fits, or a
//! balanced median split otherwise.

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::Zeroable;
use lumen_core::{AreaShape, Geometry, Light, Material, MaterialColor, PhongParams, Texture, TextureFilter};
use lumen_math::{Aabb, Vec3};
use lumen_renderer::{BvhNode, NodeTransform, ObjectId, World, WorldObject};

use crate::error::{check_limit, DeviceError, DeviceResult};
use crate::layout::*;
use crate::records::*;
use crate::sdf_program;

/// Items per leaf of a balanced heap.
const BALANCED_LEAF_SIZE: usize = 2;

/// A scene flattened into device records.
///
/// Buffers are sized to what the scene uses. All cross references are
/// indices into sibling buffers; [`validate`](Self::validate) checks them.
#[derive(Debug, Clone)]
pub struct DeviceScene {
    pub header: GpuHeader,
    pub geometries: Vec<GpuGeometry>,
    pub sdf_ops: Vec<GpuSdfOp>,
    pub materials: Vec<GpuMaterial>,
    pub colors: Vec<GpuColor>,
    pub textures: Vec<GpuTexture>,
    pub texels: Vec<[f32; 4]>,
    pub lights: Vec<GpuLight>,
    pub transforms: Vec<GpuTransform>,
    pub objects: Vec<GpuObject>,
    /// Group members: device object indices referenced by heap leaves and
    /// by each group's unbounded slice.
    pub items: Vec<u32>,
    pub heap: Vec<GpuBvhNode>,
    pub layout: LayoutDescriptor,
    generation: u64,
}

impl DeviceScene {
    fn empty(limits: DeviceLimits, generation: u64) -> Self {
        Self {
            header: GpuHeader::zeroed(),
            geometries: Vec::new(),
            sdf_ops: Vec::new(),
            materials: Vec::new(),
            colors: Vec::new(),
            textures: Vec::new(),
            texels: Vec::new(),
            lights: Vec::new(),
            transforms: Vec::new(),
            objects: Vec::new(),
            items: Vec::new(),
            heap: Vec::new(),
            layout: LayoutDescriptor {
                buffers: Vec::new(),
                limits,
                frame_depth: 0,
            },
            generation,
        }
    }

    /// Device index of the root object.
    pub fn root(&self) -> u32 {
        self.header.root
    }

    /// World generation this scene was flattened from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// False once `world` has been edited since flattening.
    pub fn is_current(&self, world: &World) -> bool {
        self.generation == world.generation()
    }

    /// Source handle of a device object.
    pub fn source(&self, object: u32) -> Option<ObjectId> {
        self.objects.get(object as usize).map(|o| ObjectId(o.source))
    }

    /// Raw bytes of the buffer at `binding`.
    pub fn buffer(&self, binding: u32) -> Option<&[u8]> {
        let bytes: &[u8] = match binding {
            BINDING_HEADER => bytemuck::bytes_of(&self.header),
            BINDING_GEOMETRIES => bytemuck::cast_slice(&self.geometries),
            BINDING_SDF_OPS => bytemuck::cast_slice(&self.sdf_ops),
            BINDING_MATERIALS => bytemuck::cast_slice(&self.materials),
            BINDING_COLORS => bytemuck::cast_slice(&self.colors),
            BINDING_TEXTURES => bytemuck::cast_slice(&self.textures),
            BINDING_TEXELS => bytemuck::cast_slice(&self.texels),
            BINDING_LIGHTS => bytemuck::cast_slice(&self.lights),
            BINDING_TRANSFORMS => bytemuck::cast_slice(&self.transforms),
            BINDING_OBJECTS => bytemuck::cast_slice(&self.objects),
            BINDING_ITEMS => bytemuck::cast_slice(&self.items),
            BINDING_HEAP => bytemuck::cast_slice(&self.heap),
            _ => return None,
        };
        Some(bytes)
    }

    /// Total size of all buffers in bytes.
    pub fn byte_size(&self) -> usize {
        (0..BUFFER_COUNT as u32)
            .filter_map(|binding| self.buffer(binding))
            .map(<[u8]>::len)
            .sum()
    }

    fn describe(&mut self) {
        fn entry<T>(name: &str, binding: u32, count: usize) -> BufferLayout {
            BufferLayout {
                name: name.to_string(),
                binding,
                stride: std::mem::size_of::<T>(),
                count,
            }
        }
        self.layout.frame_depth = self.header.frame_depth;
        self.layout.buffers = vec![
            entry::<GpuHeader>("header", BINDING_HEADER, 1),
            entry::<GpuGeometry>("geometries", BINDING_GEOMETRIES, self.geometries.len()),
            entry::<GpuSdfOp>("sdf_ops", BINDING_SDF_OPS, self.sdf_ops.len()),
            entry::<GpuMaterial>("materials", BINDING_MATERIALS, self.materials.len()),
            entry::<GpuColor>("colors", BINDING_COLORS, self.colors.len()),
            entry::<GpuTexture>("textures", BINDING_TEXTURES, self.textures.len()),
            entry::<[f32; 4]>("texels", BINDING_TEXELS, self.texels.len()),
            entry::<GpuLight>("lights", BINDING_LIGHTS, self.lights.len()),
            entry::<GpuTransform>("transforms", BINDING_TRANSFORMS, self.transforms.len()),
            entry::<GpuObject>("objects", BINDING_OBJECTS, self.objects.len()),
            entry::<u32>("items", BINDING_ITEMS, self.items.len()),
            entry::<GpuBvhNode>("heap", BINDING_HEAP, self.heap.len()),
        ];
    }

    /// Check every cross-buffer index and record kind.
    pub fn validate(&self) -> DeviceResult<()> {
        fn within(what: &'static str, index: u32, len: usize) -> DeviceResult<()> {
            if (index as usize) < len {
                Ok(())
            } else {
                Err(DeviceError::DanglingReference { what, index })
            }
        }
        fn range(what: &'static str, start: u32, len: u32, total: usize) -> DeviceResult<()> {
            if start as usize + len as usize <= total {
                Ok(())
            } else {
                Err(DeviceError::DanglingReference { what, index: start })
            }
        }

        within("root object", self.header.root, self.objects.len())?;

        for object in &self.objects {
            within("transform", object.transform, self.transforms.len())?;
            match object.kind {
                OBJECT_PRIMITIVE => {
                    within("geometry", object.geometry, self.geometries.len())?;
                    within("material", object.material, self.materials.len())?;
                }
                OBJECT_GROUP => {
                    range("heap slice", object.heap_start, object.heap_len, self.heap.len())?;
                    range("unbounded slice", object.unbounded_start, object.unbounded_len, self.items.len())?;
                }
                kind => return Err(DeviceError::Unsupported(format!("object kind {kind}"))),
            }
        }
        for &item in &self.items {
            within("group member", item, self.objects.len())?;
        }
        for node in &self.heap {
            if node.kind == HEAP_LEAF {
                range("leaf items", node.item_start, node.item_count, self.items.len())?;
            }
        }
        for geometry in &self.geometries {
            if geometry.kind == GEOMETRY_SDF {
                range("SDF program", geometry.sdf_start, geometry.sdf_len, self.sdf_ops.len())?;
            } else if geometry.kind > GEOMETRY_SDF {
                return Err(DeviceError::Unsupported(format!("geometry kind {}", geometry.kind)));
            }
        }
        for material in &self.materials {
            within("material color", material.color, self.colors.len())?;
            if material.kind > MATERIAL_PATH_TRACED {
                return Err(DeviceError::Unsupported(format!("material kind {}", material.kind)));
            }
        }
        // Children precede parents, so color evaluation always terminates
        for (index, color) in self.colors.iter().enumerate() {
            match color.kind {
                COLOR_SOLID => {}
                COLOR_SCALED => within("inner color", color.a, index)?,
                COLOR_CHECKER => {
                    within("even color", color.a, index)?;
                    within("odd color", color.b, index)?;
                }
                COLOR_TEXTURE => within("texture", color.a, self.textures.len())?,
                kind => return Err(DeviceError::Unsupported(format!("color kind {kind}"))),
            }
        }
        for texture in &self.textures {
            range("texels", texture.offset, texture.width * texture.height, self.texels.len())?;
        }
        for light in &self.lights {
            if light.kind > LIGHT_AREA || light.shape > SHAPE_SPHERE {
                return Err(DeviceError::Unsupported(format!("light kind {}", light.kind)));
            }
        }
        Ok(())
    }
}

/// Flatten everything reachable from the world's root.
pub fn flatten(world: &World, limits: &DeviceLimits) -> DeviceResult<DeviceScene> {
    let root = world.root().ok_or(DeviceError::NoRoot)?;
    let mut flattener = Flattener {
        world,
        limits,
        scene: DeviceScene::empty(*limits, world.generation()),
        objects: HashMap::new(),
        heights: Vec::new(),
        geometries: HashMap::new(),
        materials: HashMap::new(),
        textures: HashMap::new(),
    };

    let root_index = flattener.visit(root, 0)?;
    let frame_depth = flattener.heights[root_index as usize] as usize;
    check_limit("group nesting", frame_depth, limits.max_frame_depth)?;

    for light in world.lights() {
        let record = encode_light(light)?;
        flattener.scene.lights.push(record);
    }

    let mut scene = flattener.scene;
    scene.header = GpuHeader {
        root: root_index,
        object_count: scene.objects.len() as u32,
        light_count: scene.lights.len() as u32,
        frame_depth: frame_depth as u32,
    };
    scene.describe();
    scene.validate()?;

    log::info!(
        "Flattened scene: {} objects, {} geometries ({} SDF ops), {} materials, {} lights, {} heap slots, frame depth {}, {:.1} KB",
        scene.objects.len(),
        scene.geometries.len(),
        scene.sdf_ops.len(),
        scene.materials.len(),
        scene.lights.len(),
        scene.heap.len(),
        frame_depth,
        scene.byte_size() as f32 / 1024.0
    );
    Ok(scene)
}

struct Flattener<'w> {
    world: &'w World,
    limits: &'w DeviceLimits,
    scene: DeviceScene,
    objects: HashMap<ObjectId, u32>,
    /// Group nesting below each device object, itself included.
    heights: Vec<u32>,
    geometries: HashMap<*const Geometry, u32>,
    materials: HashMap<*const Material, u32>,
    textures: HashMap<*const Texture, u32>,
}

impl Flattener<'_> {
    /// Flatten `id` and everything below it; returns its device index.
    /// `groups_above` counts enclosing groups on the current path.
    fn visit(&mut self, id: ObjectId, groups_above: usize) -> DeviceResult<u32> {
        if let Some(&index) = self.objects.get(&id) {
            return Ok(index);
        }
        let world = self.world;
        let object = world.object(id)?;
        let transform = world.transform(object.transform())?;

        let mut record = GpuObject::zeroed();
        record.source = id.0;
        record.geometry = NONE;
        record.material = NONE;

        let height = match object {
            WorldObject::Primitive {
                geometry, material, ..
            } => {
                record.kind = OBJECT_PRIMITIVE;
                record.geometry = self.geometry(geometry)?;
                record.material = self.material(material)?;
                0
            }
            group => {
                check_limit("group nesting", groups_above + 1, self.limits.max_frame_depth)?;
                let mut members = Vec::with_capacity(group.children().len());
                let mut deepest = 0;
                for &child in group.children() {
                    let index = self.visit(child, groups_above + 1)?;
                    deepest = deepest.max(self.heights[index as usize]);
                    members.push((index, world.bounding_box(child)?));
                }
                record.kind = OBJECT_GROUP;
                self.group_index(group, &members, &mut record)?;
                deepest + 1
            }
        };

        let index = self.scene.objects.len() as u32;
        check_limit("objects", index as usize + 1, self.limits.max_objects)?;
        record.transform = self.scene.transforms.len() as u32;
        self.scene.transforms.push(encode_transform(transform));
        self.scene.objects.push(record);
        self.heights.push(height);
        self.objects.insert(id, index);
        Ok(index)
    }

    /// Lay out a group's members: unbounded ones in a flat slice, bounded
    /// ones under a heap. Members with empty bounds can never be hit and
    /// are dropped.
    fn group_index(
        &mut self,
        group: &WorldObject,
        members: &[(u32, Aabb)],
        record: &mut GpuObject,
    ) -> DeviceResult<()> {
        let bounded: Vec<usize> = (0..members.len())
            .filter(|&i| is_bounded(&members[i].1))
            .collect();

        record.unbounded_start = self.scene.items.len() as u32;
        for (index, bounds) in members {
            if !bounds.is_empty() && !bounds.is_finite() {
                self.scene.items.push(*index);
            }
        }
        record.unbounded_len = self.scene.items.len() as u32 - record.unbounded_start;

        let embedded = match group {
            WorldObject::BvhAggregate { index, .. } => index
                .bvh()
                .and_then(|root| self.embed_bvh(root, members)),
            _ => Some(self.single_leaf(&bounded, members)),
        };
        let slots = match embedded {
            Some(slots) => slots,
            None => {
                log::debug!("Group {} re-indexed with a balanced heap", record.source);
                self.balanced_heap(&bounded, members)?
            }
        };

        record.heap_start = self.scene.heap.len() as u32;
        record.heap_len = slots.len() as u32;
        self.scene.heap.extend(slots);
        Ok(())
    }

    fn single_leaf(&mut self, bounded: &[usize], members: &[(u32, Aabb)]) -> Vec<GpuBvhNode> {
        if bounded.is_empty() {
            return Vec::new();
        }
        let bbox = bounded.iter().fold(Aabb::EMPTY, |acc, &i| acc.hull(&members[i].1));
        let start = self.scene.items.len() as u32;
        self.scene.items.extend(bounded.iter().map(|&i| members[i].0));
        vec![GpuBvhNode::new(HEAP_LEAF, &bbox, start, bounded.len() as u32)]
    }

    /// The group's BVH laid out as a heap, or `None` if it needs more slots
    /// than the device allows.
    fn embed_bvh(&mut self, root: &BvhNode, members: &[(u32, Aabb)]) -> Option<Vec<GpuBvhNode>> {
        if matches!(root, BvhNode::Empty) {
            return Some(Vec::new());
        }
        let slots = 1usize.checked_shl(root.depth())?.checked_sub(1)?;
        if slots > self.limits.max_heap_slots {
            return None;
        }
        let mut heap = vec![GpuBvhNode::zeroed(); slots];
        self.fill_from_bvh(root, 1, &mut heap, members);
        Some(heap)
    }

    fn fill_from_bvh(&mut self, node: &BvhNode, slot: usize, heap: &mut [GpuBvhNode], members: &[(u32, Aabb)]) {
        match node {
            BvhNode::Empty => {}
            BvhNode::Leaf { items, bbox } => {
                let start = self.scene.items.len() as u32;
                for &item in items {
                    if let Some((index, bounds)) = members.get(item as usize) {
                        if is_bounded(bounds) {
                            self.scene.items.push(*index);
                        }
                    }
                }
                let count = self.scene.items.len() as u32 - start;
                heap[slot - 1] = GpuBvhNode::new(HEAP_LEAF, bbox, start, count);
            }
            BvhNode::Branch { left, right, bbox } => {
                heap[slot - 1] = GpuBvhNode::new(HEAP_INTERNAL, bbox, 0, 0);
                self.fill_from_bvh(left, 2 * slot, heap, members);
                self.fill_from_bvh(right, 2 * slot + 1, heap, members);
            }
        }
    }

    /// Median split on the longest centroid axis down to small leaves.
    fn balanced_heap(&mut self, bounded: &[usize], members: &[(u32, Aabb)]) -> DeviceResult<Vec<GpuBvhNode>> {
        if bounded.is_empty() {
            return Ok(Vec::new());
        }
        let leaves = bounded.len().div_ceil(BALANCED_LEAF_SIZE);
        let levels = leaves.next_power_of_two().trailing_zeros() as usize + 1;
        let slots = (1usize << levels) - 1;
        check_limit("group index slots", slots, self.limits.max_heap_slots)?;

        let mut heap = vec![GpuBvhNode::zeroed(); slots];
        let mut order = bounded.to_vec();
        self.fill_balanced(&mut order, 1, &mut heap, members);
        Ok(heap)
    }

    fn fill_balanced(&mut self, order: &mut [usize], slot: usize, heap: &mut [GpuBvhNode], members: &[(u32, Aabb)]) {
        let bbox = order.iter().fold(Aabb::EMPTY, |acc, &i| acc.hull(&members[i].1));
        if order.len() <= BALANCED_LEAF_SIZE || 2 * slot + 1 > heap.len() {
            let start = self.scene.items.len() as u32;
            self.scene.items.extend(order.iter().map(|&i| members[i].0));
            heap[slot - 1] = GpuBvhNode::new(HEAP_LEAF, &bbox, start, order.len() as u32);
            return;
        }

        let centroids = order.iter().fold(Aabb::EMPTY, |mut acc, &i| {
            let c = members[i].1.centroid();
            acc.min = acc.min.min(c);
            acc.max = acc.max.max(c);
            acc
        });
        let axis = centroids.longest_axis();
        order.sort_by(|&a, &b| {
            members[a].1.centroid()[axis].total_cmp(&members[b].1.centroid()[axis])
        });

        heap[slot - 1] = GpuBvhNode::new(HEAP_INTERNAL, &bbox, 0, 0);
        let (left, right) = order.split_at_mut(order.len() / 2);
        self.fill_balanced(left, 2 * slot, heap, members);
        self.fill_balanced(right, 2 * slot + 1, heap, members);
    }

    fn geometry(&mut self, geometry: &Arc<Geometry>) -> DeviceResult<u32> {
        let key = Arc::as_ptr(geometry);
        if let Some(&index) = self.geometries.get(&key) {
            return Ok(index);
        }

        let mut record = GpuGeometry::zeroed();
        match geometry.as_ref() {
            Geometry::Plane { normal, delta } => {
                record.kind = GEOMETRY_PLANE;
                record.params[0] = pack3(*normal, *delta);
            }
            Geometry::Square => record.kind = GEOMETRY_SQUARE,
            Geometry::Circle => record.kind = GEOMETRY_CIRCLE,
            Geometry::Sphere => record.kind = GEOMETRY_SPHERE,
            Geometry::Box => record.kind = GEOMETRY_BOX,
            Geometry::Cylinder => record.kind = GEOMETRY_CYLINDER,
            Geometry::Triangle { a, b, c } => {
                record.kind = GEOMETRY_TRIANGLE;
                record.params = [pack3(*a, 0.0), pack3(*b, 0.0), pack3(*c, 0.0)];
            }
            Geometry::Sdf(sdf) => {
                let program = sdf_program::compile(&sdf.root, self.limits.max_sdf_ops, self.limits.max_sdf_stack)?;
                record.kind = GEOMETRY_SDF;
                record.sdf_start = self.scene.sdf_ops.len() as u32;
                record.sdf_len = program.ops.len() as u32;
                record.max_steps = sdf.settings.max_steps;
                record.params[0] = [
                    sdf.settings.epsilon,
                    sdf.settings.normal_epsilon,
                    sdf.settings.max_trace_distance,
                    0.0,
                ];
                self.scene.sdf_ops.extend(program.ops);
            }
        }
        if record.kind != GEOMETRY_SDF && !record.params.iter().flatten().all(|v| v.is_finite()) {
            return Err(DeviceError::Unsupported(format!("{geometry:?} has non-finite parameters")));
        }

        let index = self.scene.geometries.len() as u32;
        self.scene.geometries.push(record);
        self.geometries.insert(key, index);
        Ok(index)
    }

    fn material(&mut self, material: &Arc<Material>) -> DeviceResult<u32> {
        let key = Arc::as_ptr(material);
        if let Some(&index) = self.materials.get(&key) {
            return Ok(index);
        }

        let mut record = GpuMaterial::zeroed();
        match material.as_ref() {
            Material::SolidColor(color) => {
                record.kind = MATERIAL_SOLID;
                record.color = self.color(color, 1)?;
            }
            Material::Transparent { tint } => {
                record.kind = MATERIAL_TRANSPARENT;
                record.color = self.color(tint, 1)?;
            }
            Material::Phong(phong) => {
                record.kind = MATERIAL_PHONG;
                self.phong(phong, &mut record)?;
            }
            Material::FresnelPhong { phong, ior } => {
                record.kind = MATERIAL_FRESNEL;
                self.phong(phong, &mut record)?;
                record.extra[1] = *ior;
            }
            Material::PhongPathTracing { phong, emission } => {
                record.kind = MATERIAL_PATH_TRACED;
                self.phong(phong, &mut record)?;
                record.emission = pack3(*emission, 0.0);
            }
        }

        let index = self.scene.materials.len() as u32;
        self.scene.materials.push(record);
        self.materials.insert(key, index);
        Ok(index)
    }

    fn phong(&mut self, phong: &PhongParams, record: &mut GpuMaterial) -> DeviceResult<()> {
        let lobe = &phong.lobe;
        record.color = self.color(&phong.color, 1)?;
        record.lobe = [lobe.ambient, lobe.diffuse, lobe.specular, lobe.shininess];
        record.extra[0] = lobe.reflectivity;
        Ok(())
    }

    /// Emit a color expression, children first; returns the root record.
    fn color(&mut self, color: &MaterialColor, depth: usize) -> DeviceResult<u32> {
        check_limit(
            "material color nesting",
            depth,
            self.limits.max_color_depth.min(COLOR_STACK_CAPACITY),
        )?;
        let mut record = GpuColor::zeroed();
        match color {
            MaterialColor::Solid(value) => {
                record.kind = COLOR_SOLID;
                record.value = pack3(*value, 0.0);
            }
            MaterialColor::Scaled { factor, inner } => {
                record.kind = COLOR_SCALED;
                record.a = self.color(inner, depth + 1)?;
                record.value[3] = *factor;
            }
            MaterialColor::Checkerboard { even, odd, scale } => {
                record.kind = COLOR_CHECKER;
                record.a = self.color(even, depth + 1)?;
                record.b = self.color(odd, depth + 1)?;
                record.value[3] = *scale;
            }
            MaterialColor::Texture { texture, filter } => {
                record.kind = COLOR_TEXTURE;
                record.a = self.texture(texture);
                record.b = match filter {
                    TextureFilter::Nearest => FILTER_NEAREST,
                    TextureFilter::Bilinear => FILTER_BILINEAR,
                };
            }
        }
        self.scene.colors.push(record);
        Ok(self.scene.colors.len() as u32 - 1)
    }

    fn texture(&mut self, texture: &Arc<Texture>) -> u32 {
        let key = Arc::as_ptr(texture);
        if let Some(&index) = self.textures.get(&key) {
            return index;
        }
        let record = GpuTexture {
            width: texture.width,
            height: texture.height,
            offset: self.scene.texels.len() as u32,
            _pad: 0,
        };
        self.scene.texels.extend_from_slice(&texture.pixels);
        let index = self.scene.textures.len() as u32;
        self.scene.textures.push(record);
        self.textures.insert(key, index);
        index
    }
}

#[inline]
fn is_bounded(bounds: &Aabb) -> bool {
    !bounds.is_empty() && bounds.is_finite()
}

fn encode_transform(transform: &NodeTransform) -> GpuTransform {
    GpuTransform {
        matrix: transform.matrix.to_cols_array_2d(),
        inverse: transform.inverse.to_cols_array_2d(),
        invertible: transform.invertible as u32,
        _pad: [0; 3],
    }
}

fn encode_light(light: &Light) -> DeviceResult<GpuLight> {
    let mut record = GpuLight::zeroed();
    match light {
        Light::SimplePoint { position, color } => {
            record.kind = LIGHT_POINT;
            record.samples = 1;
            record.position = pack3(*position, 1.0);
            record.color = pack3(*color, 0.0);
        }
        Light::RandomSampleArea {
            shape,
            transform,
            color,
            samples,
        } => {
            record.kind = LIGHT_AREA;
            record.shape = match shape {
                AreaShape::Square => SHAPE_SQUARE,
                AreaShape::Circle => SHAPE_CIRCLE,
                AreaShape::Sphere => SHAPE_SPHERE,
            };
            record.samples = (*samples).max(1);
            record.position = pack3(transform.transform_point3(Vec3::ZERO), 1.0);
            record.color = pack3(*color, 0.0);
            record.transform = transform.to_cols_array_2d();
        }
    }
    let finite = record.position.iter().chain(&record.color).all(|v| v.is_finite())
        && record.transform.iter().flatten().all(|v| v.is_finite());
    if !finite {
        return Err(DeviceError::Unsupported(format!("light {light:?} has non-finite parameters")));
    }
    Ok(record)
}
