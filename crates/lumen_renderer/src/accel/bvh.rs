//! Bounding Volume Hierarchy (BVH) over item bounds.
//!
//! Splits are chosen with a binned surface area heuristic: item centroids
//! are bucketed into K bins per axis and every bin boundary is scored as
//! `0.125 + (n₀·A₀ + n₁·A₁) / A`. Items are `u32` positions into the bounds
//! slice the tree was built from.

use lumen_math::{Aabb, Interval, Ray};

use super::{IndexParams, Visit};

/// Traversal cost relative to one item test.
const TRAVERSAL_COST: f32 = 0.125;

/// BVH node - either a branch with two children or a leaf with items.
#[derive(Debug, Clone)]
pub enum BvhNode {
    /// Internal node with two children.
    Branch {
        left: Box<BvhNode>,
        right: Box<BvhNode>,
        bbox: Aabb,
    },
    /// Leaf node with a small number of items.
    Leaf { items: Vec<u32>, bbox: Aabb },
    /// Empty node (no items).
    Empty,
}

#[derive(Debug, Clone, Copy)]
struct Split {
    axis: usize,
    cut: usize,
    cost: f32,
}

impl BvhNode {
    /// Build a BVH over `items`, reading their bounds from `bounds`.
    pub fn build(items: Vec<u32>, bounds: &[Aabb], params: &IndexParams) -> Self {
        if items.is_empty() {
            return BvhNode::Empty;
        }
        Self::build_node(items, bounds, params, 0)
    }

    fn build_node(items: Vec<u32>, bounds: &[Aabb], params: &IndexParams, depth: u32) -> Self {
        let bbox = hull_of(&items, bounds);
        let n = items.len();

        if n <= params.min_leaf_size.max(1) || depth >= params.max_depth {
            return BvhNode::Leaf { items, bbox };
        }

        let bins = params.bins.max(2);
        let split = match find_split(&items, bounds, &bbox, bins) {
            Some(split) if split.cost < n as f32 => split,
            _ => return BvhNode::Leaf { items, bbox },
        };

        let centroids = centroid_bounds(&items, bounds);
        let lo = centroids.min[split.axis];
        let scale = bins as f32 / (centroids.max[split.axis] - lo);
        let (left, right): (Vec<u32>, Vec<u32>) = items.into_iter().partition(|&i| {
            bin_index(bounds[i as usize].centroid()[split.axis], lo, scale, bins) < split.cut
        });

        BvhNode::Branch {
            left: Box::new(Self::build_node(left, bounds, params, depth + 1)),
            right: Box::new(Self::build_node(right, bounds, params, depth + 1)),
            bbox,
        }
    }

    pub fn bbox(&self) -> Aabb {
        match self {
            BvhNode::Empty => Aabb::EMPTY,
            BvhNode::Leaf { bbox, .. } | BvhNode::Branch { bbox, .. } => *bbox,
        }
    }

    /// Near-child-first search, tightening `best` as hits arrive.
    pub(crate) fn nearest(
        &self,
        ray: &Ray,
        min: f32,
        best: &mut f32,
        hit: &mut Option<(u32, f32)>,
        visit: &mut Visit<'_>,
    ) {
        match self {
            BvhNode::Empty => {}

            BvhNode::Leaf { items, bbox } => {
                if !bbox.hit(ray, Interval::new(min, *best)) {
                    return;
                }
                for &item in items {
                    if let Some(t) = visit(item, *best) {
                        if t > min && t < *best {
                            *best = t;
                            *hit = Some((item, t));
                        }
                    }
                }
            }

            BvhNode::Branch { left, right, .. } => {
                let range = Interval::new(min, *best);
                let l = left.bbox().hit_range(ray, range);
                let r = right.bbox().hit_range(ray, range);

                match (l, r) {
                    (Some(a), Some(b)) => {
                        let (near, far, far_entry) = if a.min <= b.min {
                            (left, right, b.min)
                        } else {
                            (right, left, a.min)
                        };
                        near.nearest(ray, min, best, hit, visit);
                        // Only check the far side up to the closest hit
                        if far_entry <= *best {
                            far.nearest(ray, min, best, hit, visit);
                        }
                    }
                    (Some(_), None) => left.nearest(ray, min, best, hit, visit),
                    (None, Some(_)) => right.nearest(ray, min, best, hit, visit),
                    (None, None) => {}
                }
            }
        }
    }

    /// Recompute every node's box from current item bounds, keeping the
    /// topology. Returns the new root box.
    pub fn refit(&mut self, bounds: &[Aabb]) -> Aabb {
        match self {
            BvhNode::Empty => Aabb::EMPTY,
            BvhNode::Leaf { items, bbox } => {
                *bbox = hull_of(items, bounds);
                *bbox
            }
            BvhNode::Branch { left, right, bbox } => {
                let l = left.refit(bounds);
                let r = right.refit(bounds);
                *bbox = l.hull(&r);
                *bbox
            }
        }
    }

    /// Every branch box equals the hull of its children and every leaf box
    /// contains its items.
    pub fn is_consistent(&self, bounds: &[Aabb]) -> bool {
        match self {
            BvhNode::Empty => true,
            BvhNode::Leaf { items, bbox } => items
                .iter()
                .all(|&i| bbox.contains_aabb(&bounds[i as usize])),
            BvhNode::Branch { left, right, bbox } => {
                *bbox == left.bbox().hull(&right.bbox())
                    && left.is_consistent(bounds)
                    && right.is_consistent(bounds)
            }
        }
    }

    pub fn depth(&self) -> u32 {
        match self {
            BvhNode::Empty | BvhNode::Leaf { .. } => 1,
            BvhNode::Branch { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    pub fn node_count(&self) -> usize {
        match self {
            BvhNode::Empty => 0,
            BvhNode::Leaf { .. } => 1,
            BvhNode::Branch { left, right, .. } => 1 + left.node_count() + right.node_count(),
        }
    }
}

fn hull_of(items: &[u32], bounds: &[Aabb]) -> Aabb {
    items
        .iter()
        .fold(Aabb::EMPTY, |acc, &i| acc.hull(&bounds[i as usize]))
}

fn centroid_bounds(items: &[u32], bounds: &[Aabb]) -> Aabb {
    items.iter().fold(Aabb::EMPTY, |mut acc, &i| {
        let c = bounds[i as usize].centroid();
        acc.min = acc.min.min(c);
        acc.max = acc.max.max(c);
        acc
    })
}

#[inline]
fn bin_index(c: f32, lo: f32, scale: f32, bins: usize) -> usize {
    (((c - lo) * scale) as usize).min(bins - 1)
}

/// Global minimum-cost SAH split over all axes, if any axis has extent.
fn find_split(items: &[u32], bounds: &[Aabb], bbox: &Aabb, bins: usize) -> Option<Split> {
    let area = bbox.surface_area();
    if !(area > 0.0) || !area.is_finite() {
        return None;
    }
    let centroids = centroid_bounds(items, bounds);

    let mut best: Option<Split> = None;
    for axis in 0..3 {
        let lo = centroids.min[axis];
        let extent = centroids.max[axis] - lo;
        if !(extent > 0.0) {
            continue;
        }
        let scale = bins as f32 / extent;

        let mut counts = vec![0usize; bins];
        let mut bin_bounds = vec![Aabb::EMPTY; bins];
        for &i in items {
            let b = &bounds[i as usize];
            let bin = bin_index(b.centroid()[axis], lo, scale, bins);
            counts[bin] += 1;
            bin_bounds[bin] = bin_bounds[bin].hull(b);
        }

        // Suffix sweep: everything at or above each cut
        let mut right_area = vec![0.0f32; bins];
        let mut right_count = vec![0usize; bins];
        let mut acc = Aabb::EMPTY;
        let mut count = 0;
        for bin in (1..bins).rev() {
            acc = acc.hull(&bin_bounds[bin]);
            count += counts[bin];
            right_area[bin] = acc.surface_area();
            right_count[bin] = count;
        }

        // Prefix sweep scores each cut
        let mut acc = Aabb::EMPTY;
        let mut count = 0;
        for cut in 1..bins {
            acc = acc.hull(&bin_bounds[cut - 1]);
            count += counts[cut - 1];
            let n_right = right_count[cut];
            if count == 0 || n_right == 0 {
                continue;
            }
            let cost = TRAVERSAL_COST
                + (count as f32 * acc.surface_area() + n_right as f32 * right_area[cut]) / area;
            if best.map_or(true, |b| cost < b.cost) {
                best = Some(Split { axis, cut, cost });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_math::Vec3;

    fn unit_boxes(centers: &[Vec3]) -> Vec<Aabb> {
        centers
            .iter()
            .map(|&c| Aabb::new(c - Vec3::splat(0.5), c + Vec3::splat(0.5)))
            .collect()
    }

    #[test]
    fn test_bvh_empty() {
        let bvh = BvhNode::build(Vec::new(), &[], &IndexParams::default());
        assert!(matches!(bvh, BvhNode::Empty));
    }

    #[test]
    fn test_bvh_single_item() {
        let bounds = unit_boxes(&[Vec3::new(0.0, 0.0, -1.0)]);
        let bvh = BvhNode::build(vec![0], &bounds, &IndexParams::default());

        // Should create a leaf
        assert!(matches!(bvh, BvhNode::Leaf { .. }));
    }

    #[test]
    fn test_bvh_splits_separated_clusters() {
        let mut centers = Vec::new();
        for i in 0..8 {
            centers.push(Vec3::new(i as f32 * 0.1, 0.0, 0.0));
            centers.push(Vec3::new(100.0 + i as f32 * 0.1, 0.0, 0.0));
        }
        let bounds = unit_boxes(&centers);
        let items: Vec<u32> = (0..bounds.len() as u32).collect();
        let bvh = BvhNode::build(items, &bounds, &IndexParams::default());

        match &bvh {
            BvhNode::Branch { left, right, .. } => {
                assert!(left.bbox().max.x < 50.0);
                assert!(right.bbox().min.x > 50.0);
            }
            _ => panic!("expected a branch"),
        }
        assert!(bvh.is_consistent(&bounds));
    }

    #[test]
    fn test_coincident_items_stay_in_leaf() {
        let bounds = unit_boxes(&[Vec3::ZERO; 10]);
        let items: Vec<u32> = (0..10).collect();
        let bvh = BvhNode::build(items, &bounds, &IndexParams::default());
        match bvh {
            BvhNode::Leaf { items, .. } => assert_eq!(items.len(), 10),
            _ => panic!("no axis has extent, expected a leaf"),
        }
    }

    #[test]
    fn test_max_depth_respected() {
        let centers: Vec<Vec3> = (0..64).map(|i| Vec3::new(i as f32 * 3.0, 0.0, 0.0)).collect();
        let bounds = unit_boxes(&centers);
        let params = IndexParams::default().with_max_depth(3).with_min_leaf_size(1);
        let bvh = BvhNode::build((0..64).collect(), &bounds, &params);
        assert!(bvh.depth() <= 4);
        assert!(bvh.is_consistent(&bounds));
    }

    #[test]
    fn test_refit_restores_hull() {
        let centers: Vec<Vec3> = (0..20).map(|i| Vec3::new(i as f32 * 2.0, 0.0, 0.0)).collect();
        let mut bounds = unit_boxes(&centers);
        let mut bvh = BvhNode::build((0..20).collect(), &bounds, &IndexParams::default());

        bounds[3] = bounds[3].translate(Vec3::new(0.0, 40.0, 0.0));
        assert!(!bvh.is_consistent(&bounds));
        let root = bvh.refit(&bounds);
        assert!(bvh.is_consistent(&bounds));
        assert!(root.max.y >= 40.0);
    }
}
