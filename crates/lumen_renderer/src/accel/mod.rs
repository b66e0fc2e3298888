//! Spatial indices over a fixed list of items.
//!
//! Two interchangeable structures answer nearest-hit queries: a SAH-binned
//! [`BvhNode`] tree and a median-split [`BspTree`]. Items whose bounds are
//! unbounded (planes) bypass the tree and are tested on every query; items
//! with empty bounds (degenerate transforms) are never tested.

mod bsp;
mod bvh;

pub use bsp::{BspNode, BspTree};
pub use bvh::BvhNode;

use lumen_math::{Aabb, Ray};
use serde::{Deserialize, Serialize};

/// Callback testing one item: `(item, current_best) -> distance`.
pub(crate) type Visit<'a> = dyn FnMut(u32, f32) -> Option<f32> + 'a;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexKind {
    #[default]
    Bvh,
    Bsp,
}

/// Index build parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    pub kind: IndexKind,
    pub max_depth: u32,
    /// Nodes with this many items or fewer become leaves.
    pub min_leaf_size: usize,
    /// SAH bins per axis (BVH only).
    pub bins: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            kind: IndexKind::Bvh,
            max_depth: 32,
            min_leaf_size: 2,
            bins: 16,
        }
    }
}

impl IndexParams {
    pub fn with_kind(mut self, kind: IndexKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_min_leaf_size(mut self, min_leaf_size: usize) -> Self {
        self.min_leaf_size = min_leaf_size;
        self
    }

    pub fn with_bins(mut self, bins: usize) -> Self {
        self.bins = bins;
        self
    }
}

#[derive(Debug, Clone)]
enum IndexTree {
    Bvh(BvhNode),
    Bsp(BspTree),
}

/// How an item takes part in queries, decided from its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemClass {
    Bounded,
    Unbounded,
    Dormant,
}

fn classify(b: &Aabb) -> ItemClass {
    if b.is_empty() {
        ItemClass::Dormant
    } else if b.is_finite() {
        ItemClass::Bounded
    } else {
        ItemClass::Unbounded
    }
}

/// A built index over items `0..len`.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    params: IndexParams,
    tree: IndexTree,
    bounded: Vec<u32>,
    unbounded: Vec<u32>,
    classes: Vec<ItemClass>,
}

impl SpatialIndex {
    /// Build over `bounds[i]` for every item `i`. Deterministic in input
    /// order.
    pub fn build(bounds: &[Aabb], params: IndexParams) -> Self {
        let classes: Vec<ItemClass> = bounds.iter().map(classify).collect();
        let pick = |class: ItemClass| -> Vec<u32> {
            (0..bounds.len() as u32)
                .filter(|&i| classes[i as usize] == class)
                .collect()
        };
        let bounded = pick(ItemClass::Bounded);
        let unbounded = pick(ItemClass::Unbounded);

        let tree = match params.kind {
            IndexKind::Bvh => IndexTree::Bvh(BvhNode::build(bounded.clone(), bounds, &params)),
            IndexKind::Bsp => IndexTree::Bsp(BspTree::build(bounded.clone(), bounds, &params)),
        };

        let index = Self {
            params,
            tree,
            bounded,
            unbounded,
            classes,
        };
        log::info!(
            "Built {:?} index: {} items ({} unbounded), {} nodes, depth {}",
            params.kind,
            index.len(),
            index.unbounded.len(),
            index.node_count(),
            index.depth()
        );
        index
    }

    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    pub fn kind(&self) -> IndexKind {
        self.params.kind
    }

    /// Number of items the index was built over.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Items tested on every query.
    pub fn unbounded(&self) -> &[u32] {
        &self.unbounded
    }

    /// The BVH tree, when this is a BVH index.
    pub fn bvh(&self) -> Option<&BvhNode> {
        match &self.tree {
            IndexTree::Bvh(root) => Some(root),
            IndexTree::Bsp(_) => None,
        }
    }

    pub fn bsp(&self) -> Option<&BspTree> {
        match &self.tree {
            IndexTree::Bsp(tree) => Some(tree),
            IndexTree::Bvh(_) => None,
        }
    }

    pub fn depth(&self) -> u32 {
        match &self.tree {
            IndexTree::Bvh(root) => root.depth(),
            IndexTree::Bsp(tree) => tree.root.depth(),
        }
    }

    pub fn node_count(&self) -> usize {
        match &self.tree {
            IndexTree::Bvh(root) => root.node_count(),
            IndexTree::Bsp(tree) => tree.root.node_count(),
        }
    }

    /// Nearest item hit with `min < t < max`.
    ///
    /// `visit(item, best)` tests one item and returns its hit distance; only
    /// hits with `min < t < best` are kept, so on exact ties the first item
    /// found wins. Unbounded items are visited first, then the tree near
    /// child first.
    pub fn nearest<F>(&self, ray: &Ray, min: f32, max: f32, mut visit: F) -> Option<(u32, f32)>
    where
        F: FnMut(u32, f32) -> Option<f32>,
    {
        let mut best = max;
        let mut hit = None;

        for &item in &self.unbounded {
            if let Some(t) = visit(item, best) {
                if t > min && t < best {
                    best = t;
                    hit = Some((item, t));
                }
            }
        }

        match &self.tree {
            IndexTree::Bvh(root) => root.nearest(ray, min, &mut best, &mut hit, &mut visit),
            IndexTree::Bsp(tree) => tree.nearest(ray, min, &mut best, &mut hit, &mut visit),
        }
        hit
    }

    /// Bring the index up to date with new item bounds.
    ///
    /// A BVH keeps its topology and refits node boxes. A BSP re-splits the
    /// same member list, since its planes cannot be refitted. An item moving
    /// between bounded, unbounded and empty forces a full rebuild.
    pub fn refit(&mut self, bounds: &[Aabb]) {
        let same_classes = bounds.len() == self.classes.len()
            && bounds.iter().zip(&self.classes).all(|(b, c)| classify(b) == *c);
        if !same_classes {
            log::debug!("Item classes changed, rebuilding index");
            *self = Self::build(bounds, self.params);
            return;
        }

        match &mut self.tree {
            IndexTree::Bvh(root) => {
                root.refit(bounds);
                log::debug!("Refitted BVH over {} items", self.bounded.len());
            }
            IndexTree::Bsp(tree) => {
                *tree = BspTree::build(self.bounded.clone(), bounds, &self.params);
                log::debug!("Re-split BSP over {} items", self.bounded.len());
            }
        }
    }

    /// Structural invariants against the given item bounds.
    pub fn is_consistent(&self, bounds: &[Aabb]) -> bool {
        match &self.tree {
            IndexTree::Bvh(root) => root.is_consistent(bounds),
            IndexTree::Bsp(tree) => tree.is_consistent(&self.bounded, bounds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::geometry::intersect_unit_sphere;
    use lumen_math::Vec3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_centers(rng: &mut StdRng, count: usize) -> Vec<Vec3> {
        (0..count)
            .map(|_| {
                Vec3::new(
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(-50.0..50.0),
                )
            })
            .collect()
    }

    fn hit_sphere(center: Vec3, ray: &Ray, min: f32, max: f32) -> Option<f32> {
        let local = Ray::new(ray.origin - center, ray.direction);
        intersect_unit_sphere(&local, min, max)
    }

    fn brute_force(centers: &[Vec3], ray: &Ray, min: f32) -> Option<(u32, f32)> {
        let mut best = f32::INFINITY;
        let mut hit = None;
        for (i, &c) in centers.iter().enumerate() {
            if let Some(t) = hit_sphere(c, ray, min, best) {
                best = t;
                hit = Some((i as u32, t));
            }
        }
        hit
    }

    fn agrees_with_brute_force(kind: IndexKind, ray_count: usize) {
        let mut rng = StdRng::seed_from_u64(1234);
        let centers = random_centers(&mut rng, 1000);
        let bounds: Vec<Aabb> = centers
            .iter()
            .map(|&c| Aabb::new(c - Vec3::ONE, c + Vec3::ONE))
            .collect();
        let index = SpatialIndex::build(&bounds, IndexParams::default().with_kind(kind));
        assert!(index.is_consistent(&bounds));

        for _ in 0..ray_count {
            let origin = Vec3::new(
                rng.gen_range(-60.0..60.0),
                rng.gen_range(-60.0..60.0),
                rng.gen_range(-60.0..60.0),
            );
            let target = Vec3::new(
                rng.gen_range(-50.0..50.0),
                rng.gen_range(-50.0..50.0),
                rng.gen_range(-50.0..50.0),
            );
            let ray = Ray::new(origin, target - origin);

            let expected = brute_force(&centers, &ray, 0.001);
            let got = index.nearest(&ray, 0.001, f32::INFINITY, |i, best| {
                hit_sphere(centers[i as usize], &ray, 0.001, best)
            });
            match (expected, got) {
                (None, None) => {}
                (Some((ei, et)), Some((gi, gt))) => {
                    assert!((et - gt).abs() < 1e-5, "distance {et} vs {gt}");
                    // Distinct random spheres never tie exactly.
                    assert_eq!(ei, gi);
                }
                other => panic!("index and brute force disagree: {other:?}"),
            }
        }
    }

    #[test]
    fn test_bvh_matches_brute_force() {
        agrees_with_brute_force(IndexKind::Bvh, 10_000);
    }

    #[test]
    fn test_bsp_matches_brute_force() {
        agrees_with_brute_force(IndexKind::Bsp, 2_000);
    }

    #[test]
    fn test_empty_index_misses() {
        let index = SpatialIndex::build(&[], IndexParams::default());
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        assert!(index.nearest(&ray, 0.0, f32::INFINITY, |_, _| Some(1.0)).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_unbounded_items_always_visited() {
        let bounds = vec![
            Aabb::new(Vec3::splat(10.0), Vec3::splat(11.0)),
            Aabb::UNIVERSE,
        ];
        let index = SpatialIndex::build(&bounds, IndexParams::default());
        assert_eq!(index.unbounded(), &[1]);

        // Ray nowhere near item 0's box
        let ray = Ray::new(Vec3::ZERO, Vec3::NEG_Y);
        let mut visited = Vec::new();
        let hit = index.nearest(&ray, 0.0, f32::INFINITY, |i, _| {
            visited.push(i);
            Some(2.0)
        });
        assert_eq!(visited, vec![1]);
        assert_eq!(hit, Some((1, 2.0)));
    }

    #[test]
    fn test_empty_bounds_never_visited() {
        let bounds = vec![Aabb::EMPTY, Aabb::new(Vec3::splat(-1.0), Vec3::ONE)];
        let index = SpatialIndex::build(&bounds, IndexParams::default());
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
        let hit = index.nearest(&ray, 0.0, f32::INFINITY, |i, _| Some(1.0 + i as f32));
        assert_eq!(hit, Some((1, 2.0)));
    }

    #[test]
    fn test_first_found_wins_ties() {
        let b = Aabb::new(Vec3::splat(-1.0), Vec3::ONE);
        let index = SpatialIndex::build(&[b, b, b], IndexParams::default().with_min_leaf_size(4));
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
        let hit = index.nearest(&ray, 0.0, f32::INFINITY, |_, _| Some(4.0));
        assert_eq!(hit, Some((0, 4.0)));
    }

    #[test]
    fn test_refit_tracks_moved_items() {
        let mut bounds: Vec<Aabb> = (0..16)
            .map(|i| {
                let c = Vec3::new(i as f32 * 4.0, 0.0, 0.0);
                Aabb::new(c - Vec3::ONE, c + Vec3::ONE)
            })
            .collect();
        for kind in [IndexKind::Bvh, IndexKind::Bsp] {
            let mut index = SpatialIndex::build(&bounds, IndexParams::default().with_kind(kind));
            bounds[5] = bounds[5].translate(Vec3::new(0.0, 30.0, 0.0));
            index.refit(&bounds);
            assert!(index.is_consistent(&bounds));

            let ray = Ray::new(Vec3::new(20.0, 30.0, 10.0), Vec3::NEG_Z);
            let hit = index.nearest(&ray, 0.0, f32::INFINITY, |i, best| {
                let t = 9.0;
                (i == 5 && t < best).then_some(t)
            });
            assert_eq!(hit, Some((5, 9.0)));
            bounds[5] = bounds[5].translate(Vec3::new(0.0, -30.0, 0.0));
        }
    }

    #[test]
    fn test_refit_rebuilds_on_class_change() {
        let mut bounds = vec![Aabb::new(Vec3::ZERO, Vec3::ONE); 3];
        let mut index = SpatialIndex::build(&bounds, IndexParams::default());
        bounds[2] = Aabb::EMPTY;
        index.refit(&bounds);
        assert!(index.is_consistent(&bounds));
        assert_eq!(index.len(), 3);
    }
}
