//! Free-space tracking with sets of disjoint ranges.

use std::fmt::Debug;
use std::ops::{Add, Range, Sub};

use smallvec::SmallVec;

/// A set of disjoint, non-adjacent ranges optimized for a small number of ranges.
///
/// The ranges are always kept sorted by their start and adjacent ranges are merged on
/// insertion. A `RangeSet` is used to track the free space of a fixed-size pool, where
/// [`reserve`] takes a block from the set and [`release`] returns it.
///
/// [`reserve`]: Self::reserve
/// [`release`]: Self::release
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeSet<K> {
    ranges: SmallVec<[Range<K>; 4]>,
}

impl<K> RangeSet<K>
where
    K: Key,
{
    /// Creates a new, empty `RangeSet`.
    pub fn new() -> Self {
        Self {
            ranges: SmallVec::new(),
        }
    }

    /// Creates a new `RangeSet` containing the full `range`.
    pub fn from_range(range: Range<K>) -> Self {
        let mut set = Self::new();
        set.insert(range);
        set
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the sum of the lengths of all ranges in the set.
    pub fn total_len(&self) -> K {
        self.ranges
            .iter()
            .fold(K::default(), |acc, range| acc + (range.end - range.start))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range<K>> {
        self.ranges.iter()
    }

    /// Returns `true` if the whole `range` is contained in the set.
    pub fn contains(&self, range: &Range<K>) -> bool {
        self.ranges
            .iter()
            .any(|r| r.start <= range.start && range.end <= r.end)
    }

    /// Returns `true` if any part of `range` is contained in the set.
    pub fn overlaps(&self, range: &Range<K>) -> bool {
        self.ranges
            .iter()
            .any(|r| r.start < range.end && range.start < r.end)
    }

    /// Inserts a `range` into the set.
    ///
    /// Returns `false` and leaves the set unchanged if `range` overlaps with a range that is
    /// already in the set. Empty ranges are ignored.
    pub fn insert(&mut self, range: Range<K>) -> bool {
        if range.is_empty() {
            return true;
        }

        if self.overlaps(&range) {
            return false;
        }

        // Index of the first range starting after the new range.
        let index = self.ranges.partition_point(|r| r.start < range.start);
        self.ranges.insert(index, range);

        // Merge with the following range first, so that `index` stays valid.
        if index + 1 < self.ranges.len() && self.ranges[index].end == self.ranges[index + 1].start
        {
            self.ranges[index].end = self.ranges[index + 1].end;
            self.ranges.remove(index + 1);
        }

        if index > 0 && self.ranges[index - 1].end == self.ranges[index].start {
            self.ranges[index - 1].end = self.ranges[index].end;
            self.ranges.remove(index);
        }

        true
    }

    /// Removes and returns the first range with a length of `len` from the set.
    ///
    /// Returns `None` if no contiguous range with `len` elements exists in the set.
    pub fn reserve(&mut self, len: K) -> Option<Range<K>> {
        let index = self
            .ranges
            .iter()
            .position(|r| r.end - r.start >= len)?;

        let range = &mut self.ranges[index];
        let start = range.start;
        let end = start + len;

        if end == range.end {
            self.ranges.remove(index);
        } else {
            range.start = end;
        }

        Some(start..end)
    }

    /// Returns a previously reserved `range` back into the set.
    ///
    /// Returns `false` if any part of the `range` is already in the set, in which case the set
    /// remains unchanged.
    pub fn release(&mut self, range: Range<K>) -> bool {
        self.insert(range)
    }
}

impl<K> Default for RangeSet<K>
where
    K: Key,
{
    fn default() -> Self {
        Self::new()
    }
}

pub trait Key: Copy + Eq + Ord + Default + Debug + Add<Output = Self> + Sub<Output = Self> {}

impl<T> Key for T where T: Copy + Eq + Ord + Default + Debug + Add<Output = Self> + Sub<Output = Self>
{}
