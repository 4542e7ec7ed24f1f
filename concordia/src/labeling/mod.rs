//! Connected component labeling of N-dimensional binary masks using union-find.
//!
//! A single raster sweep assigns provisional labels, merging with already
//! visited neighbours; a flattening pass then renumbers components `1..=n`
//! in order of their first voxel.


use ndarray::{ArrayD, ArrayViewD, IxDyn};

/// Neighbourhood used to decide whether two foreground voxels touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    /// Voxels sharing a face: differ by one along exactly one axis
    /// (4-connectivity in 2-D, 6 in 3-D).
    Face,
    /// Voxels differing by at most one along every axis
    /// (8-connectivity in 2-D, 26 in 3-D).
    #[default]
    Full,
}

// ============================================================================
// LabelMap
// ============================================================================

/// Component labels of a mask: 0 is background, components are `1..=num_labels`.
#[derive(Debug, Clone)]
pub struct LabelMap {
    labels: ArrayD<u32>,
    num_labels: usize,
}

impl LabelMap {
    /// Number of connected components (excluding background).
    #[inline]
    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    #[inline]
    pub fn labels(&self) -> &ArrayD<u32> {
        &self.labels
    }

    /// Voxel count of every component; entry `k - 1` belongs to label `k`.
    pub fn component_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.num_labels];
        for &label in self.labels.iter() {
            if label != 0 {
                sizes[(label - 1) as usize] += 1;
            }
        }
        sizes
    }
}

/// Labels the connected components of `mask`.
pub fn label_components(mask: &ArrayViewD<'_, bool>, connectivity: Connectivity) -> LabelMap {
    let shape = mask.shape().to_vec();
    let mut labels = ArrayD::<u32>::zeros(IxDyn(&shape));
    if mask.is_empty() {
        return LabelMap {
            labels,
            num_labels: 0,
        };
    }

    let neighbours = prior_neighbours(&shape, connectivity);
    let mut provisional = vec![0u32; mask.len()];
    let mut coord = vec![0usize; shape.len()];
    let mut uf = UnionFind::new();

    for (i, &foreground) in mask.iter().enumerate() {
        if foreground {
            let mut assigned = 0u32;
            for neighbour in &neighbours {
                let Some(j) = neighbour.index_from(i, &coord, &shape) else {
                    continue;
                };
                let label = provisional[j];
                if label == 0 {
                    continue;
                }
                if assigned == 0 {
                    assigned = label;
                } else if assigned != label {
                    uf.union(assigned, label);
                }
            }
            provisional[i] = if assigned == 0 {
                uf.make_set()
            } else {
                assigned
            };
        }
        advance(&mut coord, &shape);
    }

    let num_labels = uf.flatten_labels(&mut provisional);
    for (dst, &src) in labels.iter_mut().zip(&provisional) {
        *dst = src;
    }

    LabelMap { labels, num_labels }
}

// ============================================================================
// Neighbourhood
// ============================================================================

/// A neighbour visited before the current voxel in raster order.
#[derive(Debug, Clone)]
struct Neighbour {
    offset: Vec<isize>,
    /// Offset in flat C-order index space.
    delta: isize,
}

impl Neighbour {
    #[inline]
    fn index_from(&self, flat: usize, coord: &[usize], shape: &[usize]) -> Option<usize> {
        for ((&c, &o), &len) in coord.iter().zip(&self.offset).zip(shape) {
            let n = c as isize + o;
            if n < 0 || n >= len as isize {
                return None;
            }
        }
        Some((flat as isize + self.delta) as usize)
    }
}

/// Offsets in `{-1, 0, 1}^ndim` whose first non-zero component is negative.
/// Together with their negations they form the whole neighbourhood.
fn prior_neighbours(shape: &[usize], connectivity: Connectivity) -> Vec<Neighbour> {
    let ndim = shape.len();
    let mut strides = vec![1isize; ndim];
    for axis in (0..ndim.saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1] as isize;
    }

    let mut neighbours = Vec::new();
    let count = 3usize.pow(ndim as u32);
    for code in 0..count {
        let mut offset = vec![0isize; ndim];
        let mut rest = code;
        for axis in (0..ndim).rev() {
            offset[axis] = (rest % 3) as isize - 1;
            rest /= 3;
        }

        let Some(&first) = offset.iter().find(|&&o| o != 0) else {
            continue;
        };
        if first > 0 {
            continue;
        }
        let non_zero = offset.iter().filter(|&&o| o != 0).count();
        if connectivity == Connectivity::Face && non_zero != 1 {
            continue;
        }

        let delta = offset.iter().zip(&strides).map(|(o, s)| o * s).sum();
        neighbours.push(Neighbour { offset, delta });
    }
    neighbours
}

/// Steps `coord` to the next index in C order.
#[inline]
fn advance(coord: &mut [usize], shape: &[usize]) {
    for axis in (0..coord.len()).rev() {
        coord[axis] += 1;
        if coord[axis] < shape[axis] {
            return;
        }
        coord[axis] = 0;
    }
}

// ============================================================================
// Union-Find
// ============================================================================

#[derive(Debug)]
struct UnionFind {
    /// `parent[label - 1]`; roots point at themselves.
    parent: Vec<u32>,
}

impl UnionFind {
    fn new() -> Self {
        Self {
            parent: Vec::with_capacity(64),
        }
    }

    #[inline]
    fn make_set(&mut self) -> u32 {
        let label = self.parent.len() as u32 + 1;
        self.parent.push(label);
        label
    }

    /// Find root with path compression (two-pass).
    fn find(&mut self, label: u32) -> u32 {
        let mut root = label;
        while self.parent[(root - 1) as usize] != root {
            root = self.parent[(root - 1) as usize];
        }

        let mut current = label;
        while current != root {
            let next = self.parent[(current - 1) as usize];
            self.parent[(current - 1) as usize] = root;
            current = next;
        }

        root
    }

    /// Merges two sets; the smaller label becomes the root.
    fn union(&mut self, a: u32, b: u32) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            let (smaller, larger) = if root_a < root_b {
                (root_a, root_b)
            } else {
                (root_b, root_a)
            };
            self.parent[(larger - 1) as usize] = smaller;
        }
    }

    /// Renumbers labels to `1..=n` in order of creation of each set's root.
    fn flatten_labels(&mut self, labels: &mut [u32]) -> usize {
        let len = self.parent.len();
        let mut label_map = vec![0u32; len + 1];
        let mut num_labels = 0u32;

        for i in 1..=len as u32 {
            let root = self.find(i);
            if label_map[root as usize] == 0 {
                num_labels += 1;
                label_map[root as usize] = num_labels;
            }
            label_map[i as usize] = label_map[root as usize];
        }

        for l in labels.iter_mut() {
            *l = label_map[*l as usize];
        }

        num_labels as usize
    }
}
