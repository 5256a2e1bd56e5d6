use aligned_vec::{AVec, ConstAlign};
use std::fmt;
use std::ops::Index;

const CACHE_LINE: usize = 64;

/// 2-D array of atomics over a single cache-line-aligned allocation.
///
/// Row `y` occupies `width * y .. width * (y + 1)` of the flat storage, so
/// workers can share the array and write disjoint regions through `&self`.
pub struct AtomicArray2D<T: Sync + Send> {
    data: AVec<T, ConstAlign<CACHE_LINE>>,
    pub width: usize,
    pub height: usize,
}

impl<T: Sync + Send> AtomicArray2D<T> {
    /// Builds a `width x height` array with every element set to `value`.
    pub fn filled<U: Copy + Into<T>>(value: U, width: usize, height: usize) -> Self {
        Self::from_values((0..width * height).map(|_| value), width, height)
    }

    /// Builds the array from row-major element values.
    pub fn from_values<U: Into<T>>(
        values: impl IntoIterator<Item = U>,
        width: usize,
        height: usize,
    ) -> Self {
        let data: AVec<T, ConstAlign<CACHE_LINE>> =
            AVec::from_iter(CACHE_LINE, values.into_iter().map(Into::into));
        assert_eq!(data.len(), width * height);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat row-major view of all elements.
    #[inline(always)]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline(always)]
    pub fn get_row(&self, y: usize) -> &[T] {
        debug_assert!(y < self.height, "row {y} out of bounds ({})", self.height);
        &self.data[self.width * y..self.width * (y + 1)]
    }
}

impl<T: Sync + Send> fmt::Debug for AtomicArray2D<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter
            .debug_struct("AtomicArray2D")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.data.len())
            .finish()
    }
}

impl<T: Sync + Send> Index<(usize, usize)> for AtomicArray2D<T> {
    type Output = T;
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        debug_assert!(
            x < self.width && y < self.height,
            "index ({x}, {y}) out of bounds ({}, {})",
            self.width,
            self.height
        );
        &self.data[self.width * y + x]
    }
}
