//! Scene object graph.
//!
//! Objects live in an arena addressed by [`ObjectId`]; each object owns one
//! slot in a separate transform arena addressed by [`TransformId`]. Children
//! are referenced by handle, so one object can be shared by several parents
//! (instancing). Parents are recorded on every child purely so that a
//! transform edit can invalidate cached bounds upward.
//!
//! Bounds are computed lazily and cached per node in the parent's frame
//! (i.e. including the node's own transform). A transform edit clears the
//! cache along every path to the roots and refits the spatial index of each
//! [`WorldObject::BvhAggregate`] it passes; indices are never rebuilt on
//! edits.

use std::sync::{Arc, OnceLock};

use lumen_core::{Geometry, Light, Material, SceneError, SceneResult};
use lumen_math::{is_invertible, Aabb, Mat3, Mat4, Mat4Ext, Ray, Vec2, Vec3};

use crate::accel::{IndexParams, SpatialIndex};

/// Handle to an object in a [`World`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

/// Handle to a transform slot in a [`World`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransformId(pub u32);

impl ObjectId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl TransformId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A node in the scene graph.
#[derive(Debug)]
pub enum WorldObject {
    /// Leaf shape with a material and a local transform.
    Primitive {
        geometry: Arc<Geometry>,
        material: Arc<Material>,
        transform: TransformId,
    },
    /// Explicit child list, tested linearly.
    Aggregate {
        children: Vec<ObjectId>,
        transform: TransformId,
    },
    /// A single child under an extra transform.
    Transformed {
        child: ObjectId,
        transform: TransformId,
    },
    /// Child list with a private spatial index over the children's bounds.
    BvhAggregate {
        children: Vec<ObjectId>,
        transform: TransformId,
        index: SpatialIndex,
    },
}

impl WorldObject {
    pub fn transform(&self) -> TransformId {
        match self {
            WorldObject::Primitive { transform, .. }
            | WorldObject::Aggregate { transform, .. }
            | WorldObject::Transformed { transform, .. }
            | WorldObject::BvhAggregate { transform, .. } => *transform,
        }
    }

    /// Direct children, empty for primitives.
    pub fn children(&self) -> &[ObjectId] {
        match self {
            WorldObject::Primitive { .. } => &[],
            WorldObject::Aggregate { children, .. } | WorldObject::BvhAggregate { children, .. } => {
                children
            }
            WorldObject::Transformed { child, .. } => std::slice::from_ref(child),
        }
    }
}

/// Matrix and cached inverse for one object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeTransform {
    /// Local to parent.
    pub matrix: Mat4,
    /// Parent to local. Zero when the matrix is singular.
    pub inverse: Mat4,
    pub invertible: bool,
}

impl NodeTransform {
    fn new(matrix: Mat4) -> Self {
        let invertible = is_invertible(&matrix);
        let inverse = if invertible {
            matrix.inverse()
        } else {
            Mat4::ZERO
        };
        Self {
            matrix,
            inverse,
            invertible,
        }
    }
}

#[derive(Debug)]
struct Node {
    object: WorldObject,
    parents: Vec<ObjectId>,
    bounds: OnceLock<Aabb>,
}

/// Result of [`World::cast_ray`].
#[derive(Debug, Clone, PartialEq)]
pub struct RayHit {
    /// Distance in the parametrization of the query ray.
    pub distance: f32,
    /// The primitive that was hit.
    pub object: ObjectId,
    /// Objects from the root down to `object`, inclusive.
    pub chain: Vec<ObjectId>,
}

/// Shading attributes of a hit, in world space.
#[derive(Debug, Clone, Copy)]
pub struct Surface<'a> {
    pub point: Vec3,
    /// Unit normal, facing against the incoming ray.
    pub normal: Vec3,
    pub uv: Vec2,
    /// Whether the ray hit the outside of the surface.
    pub front_face: bool,
    pub material: &'a Material,
}

impl<'a> Surface<'a> {
    fn set_face_normal(&mut self, ray: &Ray, outward_normal: Vec3) {
        self.front_face = ray.direction().dot(outward_normal) < 0.0;
        self.normal = if self.front_face {
            outward_normal
        } else {
            -outward_normal
        };
    }
}

/// The scene: object arena, transform arena, lights and a root.
#[derive(Debug, Default)]
pub struct World {
    nodes: Vec<Node>,
    transforms: Vec<NodeTransform>,
    lights: Vec<Light>,
    root: Option<ObjectId>,
    generation: u64,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a leaf shape.
    pub fn add_primitive(
        &mut self,
        geometry: impl Into<Arc<Geometry>>,
        material: impl Into<Arc<Material>>,
        transform: Mat4,
    ) -> SceneResult<ObjectId> {
        let transform = self.add_transform(transform)?;
        Ok(self.push_node(WorldObject::Primitive {
            geometry: geometry.into(),
            material: material.into(),
            transform,
        }))
    }

    /// Group existing objects under one transform.
    pub fn add_aggregate(&mut self, children: Vec<ObjectId>, transform: Mat4) -> SceneResult<ObjectId> {
        self.check_handles(&children)?;
        let transform = self.add_transform(transform)?;
        Ok(self.push_node(WorldObject::Aggregate { children, transform }))
    }

    /// Wrap an existing object in another transform. Wrapping the same
    /// child several times instances it.
    pub fn add_transformed(&mut self, child: ObjectId, transform: Mat4) -> SceneResult<ObjectId> {
        self.check_handles(&[child])?;
        let transform = self.add_transform(transform)?;
        Ok(self.push_node(WorldObject::Transformed { child, transform }))
    }

    /// Group existing objects behind a spatial index built over their
    /// current bounds.
    pub fn add_bvh_aggregate(
        &mut self,
        children: Vec<ObjectId>,
        transform: Mat4,
        params: IndexParams,
    ) -> SceneResult<ObjectId> {
        self.check_handles(&children)?;
        let transform = self.add_transform(transform)?;
        let bounds: Vec<Aabb> = children.iter().map(|&c| self.node_bounds(c)).collect();
        let index = SpatialIndex::build(&bounds, params);
        Ok(self.push_node(WorldObject::BvhAggregate {
            children,
            transform,
            index,
        }))
    }

    pub fn set_root(&mut self, root: ObjectId) -> SceneResult<()> {
        self.check_handles(&[root])?;
        self.root = Some(root);
        self.generation += 1;
        Ok(())
    }

    /// Add a light and return its index.
    pub fn add_light(&mut self, light: Light) -> u32 {
        self.lights.push(light);
        self.generation += 1;
        (self.lights.len() - 1) as u32
    }

    /// Replace an object's transform.
    ///
    /// Takes effect immediately at any depth: cached bounds on every path
    /// to the roots are cleared and the spatial indices along those paths
    /// are refitted before returning. A singular matrix is accepted and
    /// makes the object unhittable.
    pub fn set_transform(&mut self, id: ObjectId, matrix: Mat4) -> SceneResult<()> {
        if !matrix.is_finite() {
            return Err(SceneError::NonFiniteTransform);
        }
        let slot = self.object(id)?.transform();
        let transform = NodeTransform::new(matrix);
        if !transform.invertible {
            log::warn!("Object {} given a singular transform; it will not be hit", id.0);
        }
        self.transforms[slot.index()] = transform;

        let stale = self.invalidate(id);
        for owner in stale {
            self.refit_index(owner);
        }
        self.generation += 1;
        Ok(())
    }

    /// Swap a primitive's material.
    pub fn set_material(&mut self, id: ObjectId, material: impl Into<Arc<Material>>) -> SceneResult<()> {
        let node = self
            .nodes
            .get_mut(id.index())
            .ok_or(SceneError::InvalidObject(id.0))?;
        match &mut node.object {
            WorldObject::Primitive { material: slot, .. } => *slot = material.into(),
            _ => return Err(SceneError::NotAPrimitive(id.0)),
        }
        self.generation += 1;
        Ok(())
    }

    /// Bounds of `id` in its parent's frame.
    pub fn bounding_box(&self, id: ObjectId) -> SceneResult<Aabb> {
        self.object(id)?;
        Ok(self.node_bounds(id))
    }

    /// Bounds of the root, or empty without one.
    pub fn world_bounds(&self) -> Aabb {
        self.root.map_or(Aabb::EMPTY, |root| self.node_bounds(root))
    }

    /// Nearest hit below the root with `min < t < max`.
    pub fn cast_ray(&self, ray: &Ray, min: f32, max: f32) -> Option<RayHit> {
        let root = self.root?;
        let mut chain = Vec::new();
        let distance = self.hit_node(root, ray, min, max, &mut chain)?;
        let object = *chain.first()?;
        chain.reverse();
        Some(RayHit {
            distance,
            object,
            chain,
        })
    }

    /// True when anything blocks `ray` over `(min, max)`.
    pub fn occluded(&self, ray: &Ray, min: f32, max: f32) -> bool {
        self.cast_ray(ray, min, max).is_some()
    }

    /// World-space shading attributes for a hit returned by
    /// [`cast_ray`](Self::cast_ray) for the same ray.
    pub fn surface(&self, ray: &Ray, hit: &RayHit) -> SceneResult<Surface<'_>> {
        // Parent-to-local inverses composed root to leaf
        let mut world_to_local = Mat4::IDENTITY;
        for &id in &hit.chain {
            let slot = self.object(id)?.transform();
            world_to_local = self.transforms[slot.index()].inverse * world_to_local;
        }

        let (geometry, material) = match self.object(hit.object)? {
            WorldObject::Primitive {
                geometry, material, ..
            } => (geometry, material),
            _ => return Err(SceneError::NotAPrimitive(hit.object.0)),
        };

        let local_ray = ray.transformed(&world_to_local);
        let data = geometry.material_data(&local_ray, hit.distance);
        let outward = (Mat3::from_mat4(world_to_local).transpose() * data.normal).normalize_or_zero();

        let mut surface = Surface {
            point: ray.at(hit.distance),
            normal: outward,
            uv: data.uv,
            front_face: true,
            material: material.as_ref(),
        };
        surface.set_face_normal(ray, outward);
        Ok(surface)
    }

    /// Local-to-world matrix of the hit primitive.
    pub fn hit_transform(&self, hit: &RayHit) -> SceneResult<Mat4> {
        let mut local_to_world = Mat4::IDENTITY;
        for &id in &hit.chain {
            let slot = self.object(id)?.transform();
            local_to_world *= self.transforms[slot.index()].matrix;
        }
        Ok(local_to_world)
    }

    /// Counter bumped by every edit.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn root(&self) -> Option<ObjectId> {
        self.root
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn object_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn object(&self, id: ObjectId) -> SceneResult<&WorldObject> {
        self.nodes
            .get(id.index())
            .map(|node| &node.object)
            .ok_or(SceneError::InvalidObject(id.0))
    }

    pub fn parents(&self, id: ObjectId) -> SceneResult<&[ObjectId]> {
        self.nodes
            .get(id.index())
            .map(|node| node.parents.as_slice())
            .ok_or(SceneError::InvalidObject(id.0))
    }

    pub fn transform(&self, id: TransformId) -> SceneResult<&NodeTransform> {
        self.transforms
            .get(id.index())
            .ok_or(SceneError::InvalidTransform(id.0))
    }

    fn add_transform(&mut self, matrix: Mat4) -> SceneResult<TransformId> {
        if !matrix.is_finite() {
            return Err(SceneError::NonFiniteTransform);
        }
        let transform = NodeTransform::new(matrix);
        if !transform.invertible {
            log::warn!("Singular transform added; its object will not be hit");
        }
        self.transforms.push(transform);
        Ok(TransformId((self.transforms.len() - 1) as u32))
    }

    fn check_handles(&self, ids: &[ObjectId]) -> SceneResult<()> {
        match ids.iter().find(|id| id.index() >= self.nodes.len()) {
            Some(bad) => Err(SceneError::InvalidObject(bad.0)),
            None => Ok(()),
        }
    }

    fn push_node(&mut self, object: WorldObject) -> ObjectId {
        let id = ObjectId(self.nodes.len() as u32);
        for &child in object.children() {
            let parents = &mut self.nodes[child.index()].parents;
            if !parents.contains(&id) {
                parents.push(id);
            }
        }
        self.nodes.push(Node {
            object,
            parents: Vec::new(),
            bounds: OnceLock::new(),
        });
        self.generation += 1;
        id
    }

    /// Clear cached bounds upward from `start`; returns the index-owning
    /// ancestors whose members' bounds changed.
    ///
    /// The walk stops at nodes that had nothing cached, since their
    /// ancestors cannot have cached anything derived from them either.
    /// Index owners are collected even then.
    fn invalidate(&mut self, start: ObjectId) -> Vec<ObjectId> {
        let mut stale = Vec::new();
        let mut pending = vec![start];
        while let Some(id) = pending.pop() {
            let node = &mut self.nodes[id.index()];
            let was_cached = node.bounds.take().is_some();
            let parents = node.parents.clone();
            for parent in parents {
                if matches!(self.nodes[parent.index()].object, WorldObject::BvhAggregate { .. })
                    && !stale.contains(&parent)
                {
                    stale.push(parent);
                }
                if was_cached {
                    pending.push(parent);
                }
            }
        }
        stale
    }

    fn refit_index(&mut self, owner: ObjectId) {
        let bounds: Vec<Aabb> = self.nodes[owner.index()]
            .object
            .children()
            .iter()
            .map(|&c| self.node_bounds(c))
            .collect();
        if let WorldObject::BvhAggregate { index, .. } = &mut self.nodes[owner.index()].object {
            index.refit(&bounds);
        }
    }

    fn node_transform(&self, id: ObjectId) -> &NodeTransform {
        &self.transforms[self.nodes[id.index()].object.transform().index()]
    }

    fn node_bounds(&self, id: ObjectId) -> Aabb {
        let node = &self.nodes[id.index()];
        *node.bounds.get_or_init(|| {
            let transform = self.node_transform(id);
            if !transform.invertible {
                return Aabb::EMPTY;
            }
            match &node.object {
                WorldObject::Primitive { geometry, .. } => geometry.transformed_bounds(&transform.matrix),
                WorldObject::Transformed { child, .. } => {
                    transform.matrix.transform_aabb(&self.node_bounds(*child))
                }
                WorldObject::Aggregate { children, .. } | WorldObject::BvhAggregate { children, .. } => {
                    let hull = children
                        .iter()
                        .fold(Aabb::EMPTY, |acc, &c| acc.hull(&self.node_bounds(c)));
                    transform.matrix.transform_aabb(&hull)
                }
            }
        })
    }

    /// Nearest hit under `id` for a ray in the parent's frame. On a hit,
    /// `chain` receives the path leaf first.
    fn hit_node(&self, id: ObjectId, ray: &Ray, min: f32, max: f32, chain: &mut Vec<ObjectId>) -> Option<f32> {
        let node = &self.nodes[id.index()];
        let transform = self.node_transform(id);
        if !transform.invertible {
            return None;
        }
        let local = ray.transformed(&transform.inverse);

        let t = match &node.object {
            WorldObject::Primitive { geometry, .. } => geometry.intersect(&local, min, max)?,
            WorldObject::Transformed { child, .. } => self.hit_node(*child, &local, min, max, chain)?,
            WorldObject::Aggregate { children, .. } => {
                let mut best: Option<f32> = None;
                let mut sub = Vec::new();
                for &child in children {
                    sub.clear();
                    let limit = best.unwrap_or(max);
                    if let Some(t) = self.hit_node(child, &local, min, limit, &mut sub) {
                        best = Some(t);
                        std::mem::swap(chain, &mut sub);
                    }
                }
                best?
            }
            WorldObject::BvhAggregate { children, index, .. } => {
                let mut best_chain = Vec::new();
                let mut sub = Vec::new();
                let (_, t) = index.nearest(&local, min, max, |item, best| {
                    sub.clear();
                    let t = self.hit_node(children[item as usize], &local, min, best, &mut sub)?;
                    std::mem::swap(&mut best_chain, &mut sub);
                    Some(t)
                })?;
                *chain = best_chain;
                t
            }
        };
        chain.push(id);
        Some(t)
    }
}
