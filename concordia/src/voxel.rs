//! Label image primitives: voxel traits, bounding boxes and per-label box indexes.
//!
//! Images are `ndarray` arrays of dynamic dimensionality in C order, so the
//! "raster order" used throughout the crate is the order of
//! [`ArrayBase::indexed_iter`](ndarray::ArrayBase::indexed_iter).

use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;

use ndarray::{ArrayViewD, ArrayViewMutD, Dimension, Slice};
use num_traits::ToPrimitive;

// ============================================================================
// Voxel traits
// ============================================================================

/// A voxel type that carries a label: integers directly, reals truncated.
///
/// Negative and non-finite values read as background.
pub trait Voxel: Copy + Send + Sync + Debug + PartialEq + 'static {
    fn to_label(self) -> u64;
}

impl<T> Voxel for T
where
    T: ToPrimitive + Copy + Send + Sync + Debug + PartialEq + 'static,
{
    #[inline]
    fn to_label(self) -> u64 {
        self.to_u64().unwrap_or(0)
    }
}

/// Integer voxel type usable for marker and output images.
///
/// The maximum value is reserved as the [`Label::INTERSECTION`] sentinel, so a
/// voxel width of `n` bits supports at most `2^n - 2` distinct objects.
pub trait Label: Voxel + Eq + Ord + Hash + Display {
    const BACKGROUND: Self;
    const INTERSECTION: Self;

    /// Converts a raw id, `None` if it does not fit the type.
    fn from_label(id: u64) -> Option<Self>;

    /// True for real object ids (neither background nor the sentinel).
    #[inline]
    fn is_object(self) -> bool {
        self != Self::BACKGROUND && self != Self::INTERSECTION
    }
}

macro_rules! impl_label {
    ($($t:ty),*) => {
        $(
            impl Label for $t {
                const BACKGROUND: Self = 0;
                const INTERSECTION: Self = <$t>::MAX;

                #[inline]
                fn from_label(id: u64) -> Option<Self> {
                    <$t>::try_from(id).ok()
                }
            }
        )*
    };
}

impl_label!(u8, u16, u32, u64);

// ============================================================================
// BoundingBox
// ============================================================================

/// Axis-aligned half-open box `start[d]..end[d]` in index space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundingBox {
    start: Vec<usize>,
    end: Vec<usize>,
}

impl BoundingBox {
    /// A box containing nothing; grows with [`include`](Self::include).
    pub fn empty(ndim: usize) -> Self {
        Self {
            start: vec![usize::MAX; ndim],
            end: vec![0; ndim],
        }
    }

    /// The whole index space of `shape`.
    pub fn full(shape: &[usize]) -> Self {
        Self {
            start: vec![0; shape.len()],
            end: shape.to_vec(),
        }
    }

    pub fn new(start: Vec<usize>, end: Vec<usize>) -> Self {
        assert_eq!(start.len(), end.len(), "start/end dimensionality mismatch");
        Self { start, end }
    }

    /// Smallest box holding every voxel of `image` for which `pred` is true.
    pub fn of<T: Copy>(image: &ArrayViewD<'_, T>, mut pred: impl FnMut(T) -> bool) -> Self {
        let mut bbox = Self::empty(image.ndim());
        for (idx, &value) in image.indexed_iter() {
            if pred(value) {
                bbox.include(idx.slice());
            }
        }
        bbox
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.start.len()
    }

    #[inline]
    pub fn start(&self) -> &[usize] {
        &self.start
    }

    #[inline]
    pub fn end(&self) -> &[usize] {
        &self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start.iter().zip(&self.end).any(|(s, e)| s >= e)
    }

    pub fn shape(&self) -> Vec<usize> {
        self.start
            .iter()
            .zip(&self.end)
            .map(|(&s, &e)| e.saturating_sub(s))
            .collect()
    }

    /// Number of voxels inside the box.
    pub fn volume(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        self.shape().iter().product()
    }

    pub fn contains(&self, index: &[usize]) -> bool {
        debug_assert_eq!(index.len(), self.ndim());
        index
            .iter()
            .zip(self.start.iter().zip(&self.end))
            .all(|(&i, (&s, &e))| i >= s && i < e)
    }

    /// Grows the box to cover `index`.
    #[inline]
    pub fn include(&mut self, index: &[usize]) {
        debug_assert_eq!(index.len(), self.ndim());
        for (axis, &i) in index.iter().enumerate() {
            self.start[axis] = self.start[axis].min(i);
            self.end[axis] = self.end[axis].max(i + 1);
        }
    }

    /// Grows the box to cover `other`. Empty boxes contribute nothing.
    pub fn union(&mut self, other: &BoundingBox) {
        assert_eq!(self.ndim(), other.ndim(), "dimensionality mismatch");
        if other.is_empty() {
            return;
        }
        for axis in 0..self.ndim() {
            self.start[axis] = self.start[axis].min(other.start[axis]);
            self.end[axis] = self.end[axis].max(other.end[axis]);
        }
    }

    /// Global index of a voxel given its position inside the box.
    #[inline]
    pub fn to_global(&self, local: &[usize], global: &mut [usize]) {
        for ((g, &l), &s) in global.iter_mut().zip(local).zip(&self.start) {
            *g = s + l;
        }
    }

    /// Restricts a view to this box.
    pub fn restrict<'a, T>(&self, mut view: ArrayViewD<'a, T>) -> ArrayViewD<'a, T> {
        self.check_fits(view.shape());
        view.slice_each_axis_inplace(|ax| self.axis_slice(ax.axis.index()));
        view
    }

    /// Restricts a mutable view to this box.
    pub fn restrict_mut<'a, T>(&self, mut view: ArrayViewMutD<'a, T>) -> ArrayViewMutD<'a, T> {
        self.check_fits(view.shape());
        view.slice_each_axis_inplace(|ax| self.axis_slice(ax.axis.index()));
        view
    }

    #[inline]
    fn axis_slice(&self, axis: usize) -> Slice {
        Slice::from(self.start[axis]..self.end[axis])
    }

    fn check_fits(&self, shape: &[usize]) {
        assert_eq!(shape.len(), self.ndim(), "dimensionality mismatch");
        assert!(!self.is_empty(), "cannot restrict a view to an empty box");
        assert!(
            self.end.iter().zip(shape).all(|(&e, &len)| e <= len),
            "box {:?}..{:?} exceeds shape {:?}",
            self.start,
            self.end,
            shape
        );
    }
}

/// True if `index` lies on any boundary face of an index space of `shape`.
#[inline]
pub fn touches_border(index: &[usize], shape: &[usize]) -> bool {
    index
        .iter()
        .zip(shape)
        .any(|(&i, &len)| i == 0 || i + 1 == len)
}

// ============================================================================
// LabelIndex
// ============================================================================

/// Bounding boxes of every label of an image, in raster first-encounter order.
#[derive(Debug, Clone)]
pub struct LabelIndex<K> {
    order: Vec<K>,
    boxes: HashMap<K, BoundingBox>,
}

impl<K: Copy + Eq + Hash> LabelIndex<K> {
    /// Indexes `image` in a single sweep. `key` maps a voxel to its label,
    /// `None` for voxels that belong to no label.
    pub fn build<T: Copy>(image: &ArrayViewD<'_, T>, mut key: impl FnMut(T) -> Option<K>) -> Self {
        let ndim = image.ndim();
        let mut order = Vec::new();
        let mut boxes: HashMap<K, BoundingBox> = HashMap::new();

        for (idx, &value) in image.indexed_iter() {
            let Some(label) = key(value) else {
                continue;
            };
            boxes
                .entry(label)
                .or_insert_with(|| {
                    order.push(label);
                    BoundingBox::empty(ndim)
                })
                .include(idx.slice());
        }

        Self { order, boxes }
    }

    /// Labels in first-encounter order.
    #[inline]
    pub fn ids(&self) -> &[K] {
        &self.order
    }

    #[inline]
    pub fn bounding_box(&self, label: K) -> Option<&BoundingBox> {
        self.boxes.get(&label)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// `(label, box)` pairs in first-encounter order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &BoundingBox)> + '_ {
        self.order.iter().map(|label| (*label, &self.boxes[label]))
    }
}
