//! Binary space partition over item bounds.
//!
//! Each node splits at the median of its items' min/max extents on the axis
//! with the fewest straddling items. Straddling items are stored in both
//! children, so a cell always lists every item overlapping it.

use lumen_math::{Aabb, Interval, Ray, DENOM_EPSILON};

use super::{IndexParams, Visit};

#[derive(Debug, Clone)]
pub enum BspNode {
    Split {
        axis: usize,
        value: f32,
        /// Items with `min[axis] <= value`.
        below: Box<BspNode>,
        /// Items with `max[axis] >= value`.
        above: Box<BspNode>,
    },
    Leaf {
        items: Vec<u32>,
    },
    Empty,
}

/// A BSP tree and the box its root cell covers.
#[derive(Debug, Clone)]
pub struct BspTree {
    pub root: BspNode,
    pub bounds: Aabb,
}

impl BspTree {
    pub fn build(items: Vec<u32>, bounds: &[Aabb], params: &IndexParams) -> Self {
        let root_bounds = items
            .iter()
            .fold(Aabb::EMPTY, |acc, &i| acc.hull(&bounds[i as usize]));
        Self {
            root: BspNode::build(items, bounds, params, 0),
            bounds: root_bounds,
        }
    }

    pub(crate) fn nearest(
        &self,
        ray: &Ray,
        min: f32,
        best: &mut f32,
        hit: &mut Option<(u32, f32)>,
        visit: &mut Visit<'_>,
    ) {
        let Some(range) = self.bounds.hit_range(ray, Interval::new(min, *best)) else {
            return;
        };
        self.root
            .nearest(ray, min, range.min, range.max, best, hit, visit);
    }

    /// Every item overlapping a leaf cell is stored in that leaf.
    pub fn is_consistent(&self, items: &[u32], bounds: &[Aabb]) -> bool {
        self.root.covers(items, bounds, self.bounds)
    }
}

impl BspNode {
    fn build(items: Vec<u32>, bounds: &[Aabb], params: &IndexParams, depth: u32) -> Self {
        let n = items.len();
        if n == 0 {
            return BspNode::Empty;
        }
        if n <= params.min_leaf_size.max(1) || depth >= params.max_depth {
            return BspNode::Leaf { items };
        }

        // (spanning count, axis, median) per axis
        let mut candidates: Vec<(usize, usize, f32)> = (0..3)
            .map(|axis| {
                let mut extents: Vec<f32> = items
                    .iter()
                    .flat_map(|&i| {
                        let b = &bounds[i as usize];
                        [b.min[axis], b.max[axis]]
                    })
                    .collect();
                let mid = extents.len() / 2;
                let (_, median, _) = extents.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
                let value = *median;
                let spanning = items
                    .iter()
                    .filter(|&&i| {
                        let b = &bounds[i as usize];
                        b.min[axis] < value && b.max[axis] > value
                    })
                    .count();
                (spanning, axis, value)
            })
            .collect();
        candidates.sort_by_key(|c| c.0);

        for (_, axis, value) in candidates {
            let below: Vec<u32> = items
                .iter()
                .copied()
                .filter(|&i| bounds[i as usize].min[axis] <= value)
                .collect();
            let above: Vec<u32> = items
                .iter()
                .copied()
                .filter(|&i| bounds[i as usize].max[axis] >= value)
                .collect();

            // Reject splits where a side does not shrink
            if below.len() == n || above.len() == n {
                continue;
            }

            return BspNode::Split {
                axis,
                value,
                below: Box::new(Self::build(below, bounds, params, depth + 1)),
                above: Box::new(Self::build(above, bounds, params, depth + 1)),
            };
        }

        BspNode::Leaf { items }
    }

    /// Visit cells front to back along `[t_min, t_max]`.
    fn nearest(
        &self,
        ray: &Ray,
        min: f32,
        t_min: f32,
        t_max: f32,
        best: &mut f32,
        hit: &mut Option<(u32, f32)>,
        visit: &mut Visit<'_>,
    ) {
        match self {
            BspNode::Empty => {}

            BspNode::Leaf { items } => {
                for &item in items {
                    if let Some(t) = visit(item, *best) {
                        if t > min && t < *best {
                            *best = t;
                            *hit = Some((item, t));
                        }
                    }
                }
            }

            BspNode::Split {
                axis,
                value,
                below,
                above,
            } => {
                let o = ray.origin[*axis];
                let d = ray.direction[*axis];
                let entry = o + t_min * d;
                let below_first = entry < *value || (entry == *value && d <= 0.0);
                let (near, far) = if below_first {
                    (below, above)
                } else {
                    (above, below)
                };

                if d.abs() < DENOM_EPSILON {
                    near.nearest(ray, min, t_min, t_max, best, hit, visit);
                    return;
                }

                let t_split = (*value - o) / d;
                if t_split >= t_max || t_split <= t_min {
                    near.nearest(ray, min, t_min, t_max, best, hit, visit);
                } else {
                    near.nearest(ray, min, t_min, t_split, best, hit, visit);
                    if t_split <= *best {
                        far.nearest(ray, min, t_split, t_max, best, hit, visit);
                    }
                }
            }
        }
    }

    fn covers(&self, items: &[u32], bounds: &[Aabb], cell: Aabb) -> bool {
        match self {
            BspNode::Empty => items.iter().all(|&i| !overlaps(&bounds[i as usize], &cell)),
            BspNode::Leaf { items: stored } => items
                .iter()
                .filter(|&&i| overlaps(&bounds[i as usize], &cell))
                .all(|i| stored.contains(i)),
            BspNode::Split {
                axis,
                value,
                below,
                above,
            } => {
                let mut below_cell = cell;
                below_cell.max[*axis] = *value;
                let mut above_cell = cell;
                above_cell.min[*axis] = *value;
                below.covers(items, bounds, below_cell) && above.covers(items, bounds, above_cell)
            }
        }
    }

    pub fn depth(&self) -> u32 {
        match self {
            BspNode::Empty | BspNode::Leaf { .. } => 1,
            BspNode::Split { below, above, .. } => 1 + below.depth().max(above.depth()),
        }
    }

    pub fn node_count(&self) -> usize {
        match self {
            BspNode::Empty => 0,
            BspNode::Leaf { .. } => 1,
            BspNode::Split { below, above, .. } => 1 + below.node_count() + above.node_count(),
        }
    }
}

fn overlaps(a: &Aabb, b: &Aabb) -> bool {
    !a.is_empty() && !b.is_empty() && !a.intersection(b).is_empty()
}
