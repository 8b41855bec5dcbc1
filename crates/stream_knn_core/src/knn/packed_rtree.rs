//! Static R-tree packed with Sort-Tile-Recursive bulk loading.
//!
//! The tree borrows the points it indexes and is dropped together with the
//! batch that owns them. Node fan-out is a runtime parameter, which is why
//! this is not an `rstar::RTree` (its node sizes are fixed at compile time).

use crate::geometry::Rectangle;
use crate::types::Point;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug)]
enum Children {
    Points(Vec<usize>),
    Nodes(Vec<usize>),
}

#[derive(Debug)]
struct Node {
    bounds: Rectangle,
    children: Children,
}

/// Read-only R-tree over a borrowed slice of points.
#[derive(Debug)]
pub struct PackedRTree<'a> {
    points: &'a [Point],
    nodes: Vec<Node>,
    root: Option<usize>,
    branch_factor: usize,
    dimensions: usize,
}

impl<'a> PackedRTree<'a> {
    /// Bulk loads every point of `points` with at most `branch_factor`
    /// children per node.
    pub fn bulk_load(points: &'a [Point], branch_factor: usize) -> Self {
        let branch_factor = branch_factor.max(2);
        let dimensions = points.iter().map(Point::dimensions).max().unwrap_or(0);
        let mut tree = Self {
            points,
            nodes: Vec::new(),
            root: None,
            branch_factor,
            dimensions,
        };
        if points.is_empty() {
            return tree;
        }

        let leaf_groups = str_groups(
            (0..points.len()).collect(),
            &|i: usize, axis: usize| axis_value(&points[i].coords, axis),
            dimensions,
            branch_factor,
        );
        let mut level: Vec<usize> = leaf_groups
            .into_iter()
            .map(|group| {
                let mut bounds = Rectangle::from_point(&points[group[0]].coords);
                for &i in &group[1..] {
                    bounds.merge_point(&points[i].coords);
                }
                tree.push_node(bounds, Children::Points(group))
            })
            .collect();

        while level.len() > 1 {
            let centers: Vec<_> = level
                .iter()
                .map(|&id| tree.nodes[id].bounds.center())
                .collect();
            let positions = str_groups(
                (0..level.len()).collect(),
                &|i: usize, axis: usize| axis_value(&centers[i], axis),
                dimensions,
                branch_factor,
            );
            level = positions
                .into_iter()
                .map(|group| {
                    let children: Vec<usize> = group.iter().map(|&pos| level[pos]).collect();
                    let mut bounds = tree.nodes[children[0]].bounds.clone();
                    for &child in &children[1..] {
                        bounds.merge(&tree.nodes[child].bounds);
                    }
                    tree.push_node(bounds, Children::Nodes(children))
                })
                .collect();
        }

        tree.root = level.first().copied();
        tree
    }

    fn push_node(&mut self, bounds: Rectangle, children: Children) -> usize {
        self.nodes.push(Node { bounds, children });
        self.nodes.len() - 1
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn branch_factor(&self) -> usize {
        self.branch_factor
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of node levels from root to leaves.
    pub fn height(&self) -> usize {
        let mut height = 0;
        let mut cursor = self.root;
        while let Some(id) = cursor {
            height += 1;
            cursor = match &self.nodes[id].children {
                Children::Nodes(children) => children.first().copied(),
                Children::Points(_) => None,
            };
        }
        height
    }

    /// Exact `k` nearest points to `query`, as `(index into points, squared
    /// distance)` sorted by distance, then point id, then timestamp.
    ///
    /// Best-first search over a min-heap keyed by MINDIST. Once `k`
    /// candidates are known, the search keeps draining entries whose bound
    /// equals the k-th distance so that ties resolve by id, not by tree
    /// layout.
    pub fn nearest(&self, query: &[f64], k: usize) -> Vec<(usize, f64)> {
        let root = match self.root {
            Some(root) if k > 0 => root,
            _ => return Vec::new(),
        };

        let mut heap = BinaryHeap::new();
        heap.push(Candidate {
            bound: self.nodes[root].bounds.min_distance_sq(query),
            entry: Entry::Node(root),
        });

        let mut found: Vec<(usize, f64)> = Vec::with_capacity(k + 1);
        let mut kth_distance = f64::INFINITY;

        while let Some(Candidate { bound, entry }) = heap.pop() {
            if found.len() >= k && bound > kth_distance {
                break;
            }
            match entry {
                Entry::Point(index) => {
                    found.push((index, bound));
                    if found.len() == k {
                        kth_distance = bound;
                    }
                }
                Entry::Node(id) => match &self.nodes[id].children {
                    Children::Points(indices) => {
                        for &index in indices {
                            heap.push(Candidate {
                                bound: self.points[index].distance_sq(query),
                                entry: Entry::Point(index),
                            });
                        }
                    }
                    Children::Nodes(children) => {
                        for &child in children {
                            heap.push(Candidate {
                                bound: self.nodes[child].bounds.min_distance_sq(query),
                                entry: Entry::Node(child),
                            });
                        }
                    }
                },
            }
        }

        found.sort_by(|(a, da), (b, db)| {
            da.total_cmp(db)
                .then_with(|| self.points[*a].id.cmp(&self.points[*b].id))
                .then_with(|| self.points[*a].timestamp.cmp(&self.points[*b].timestamp))
        });
        found.truncate(k);
        found
    }
}

fn axis_value(coords: &[f64], axis: usize) -> f64 {
    coords.get(axis).copied().unwrap_or(0.0)
}

/// Sort-Tile-Recursive grouping: slabs along each axis in turn, then runs of
/// `capacity` along the last axis.
fn str_groups(
    mut items: Vec<usize>,
    key: &dyn Fn(usize, usize) -> f64,
    dimensions: usize,
    capacity: usize,
) -> Vec<Vec<usize>> {
    fn tile(
        items: &mut [usize],
        key: &dyn Fn(usize, usize) -> f64,
        axis: usize,
        dimensions: usize,
        capacity: usize,
        out: &mut Vec<Vec<usize>>,
    ) {
        items.sort_by(|a, b| key(*a, axis).total_cmp(&key(*b, axis)));
        let remaining_axes = dimensions.saturating_sub(axis);
        if remaining_axes <= 1 {
            out.extend(items.chunks(capacity).map(<[usize]>::to_vec));
            return;
        }

        let groups = items.len().div_ceil(capacity);
        let slabs = (groups as f64)
            .powf(1.0 / remaining_axes as f64)
            .ceil()
            .max(1.0) as usize;
        let slab_len = capacity * groups.div_ceil(slabs);
        for slab in items.chunks_mut(slab_len) {
            tile(slab, key, axis + 1, dimensions, capacity, out);
        }
    }

    let mut out = Vec::with_capacity(items.len().div_ceil(capacity));
    tile(&mut items, key, 0, dimensions.max(1), capacity, &mut out);
    out
}

#[derive(Debug, Clone, Copy)]
enum Entry {
    Node(usize),
    Point(usize),
}

#[derive(Debug)]
struct Candidate {
    bound: f64,
    entry: Entry,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // Min-heap on the bound.
    fn cmp(&self, other: &Self) -> Ordering {
        other.bound.total_cmp(&self.bound)
    }
}
