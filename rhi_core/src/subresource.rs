//! Addressing of subresources within a resource.
//!
//! A subresource is identified by a depth slice, an array index and a mip level. Subresources
//! are laid out linearly with mip levels innermost, followed by depth slices and array layers:
//!
//! ```text
//! raw = (array_index * depth + depth_slice) * mip_levels_count + mip_level
//! ```

use std::fmt::{self, Display, Formatter};

use crate::{Error, Result};

/// The number of subresources in each dimension of a resource.
///
/// All dimensions are always at least `1`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubResourceCount {
    depth: u32,
    array_size: u32,
    mip_levels_count: u32,
}

impl SubResourceCount {
    /// Creates a new `SubResourceCount`.
    ///
    /// # Panics
    ///
    /// Panics if any dimension is `0`.
    pub const fn new(depth: u32, array_size: u32, mip_levels_count: u32) -> Self {
        assert!(depth != 0 && array_size != 0 && mip_levels_count != 0);

        Self {
            depth,
            array_size,
            mip_levels_count,
        }
    }

    /// Returns the count for a texture with the given dimensions.
    ///
    /// If `mipmapped` is `true` the full mip chain down to a `1x1x1` level is counted.
    pub fn for_texture(width: u32, height: u32, depth: u32, array_size: u32, mipmapped: bool) -> Self {
        let mip_levels_count = if mipmapped {
            mip_levels_count(width.max(height).max(depth))
        } else {
            1
        };

        Self::new(depth.max(1), array_size.max(1), mip_levels_count)
    }

    #[inline]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub const fn array_size(&self) -> u32 {
        self.array_size
    }

    #[inline]
    pub const fn mip_levels_count(&self) -> u32 {
        self.mip_levels_count
    }

    /// Returns the number of layers (depth slices of all array elements).
    #[inline]
    pub const fn base_layer_count(&self) -> u32 {
        self.depth * self.array_size
    }

    /// Returns the total number of subresources.
    #[inline]
    pub const fn raw_count(&self) -> u32 {
        self.base_layer_count() * self.mip_levels_count
    }

    /// Returns an iterator over all subresource indices in raw index order.
    pub fn indices(&self) -> impl Iterator<Item = SubResourceIndex> + '_ {
        (0..self.raw_count()).map(|raw| SubResourceIndex::from_raw_unchecked(raw, self))
    }
}

impl Default for SubResourceCount {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

impl Display for SubResourceCount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "count(d:{}, a:{}, m:{})",
            self.depth, self.array_size, self.mip_levels_count
        )
    }
}

/// The index of a single subresource.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubResourceIndex {
    pub depth_slice: u32,
    pub array_index: u32,
    pub mip_level: u32,
}

impl SubResourceIndex {
    pub const fn new(depth_slice: u32, array_index: u32, mip_level: u32) -> Self {
        Self {
            depth_slice,
            array_index,
            mip_level,
        }
    }

    /// Decodes a raw linear subresource index.
    pub fn from_raw(raw: u32, count: &SubResourceCount) -> Result<Self> {
        if raw >= count.raw_count() {
            return Err(Error::RawSubResourceOutOfRange { raw, count: *count });
        }

        Ok(Self::from_raw_unchecked(raw, count))
    }

    fn from_raw_unchecked(raw: u32, count: &SubResourceCount) -> Self {
        let mip_level = raw % count.mip_levels_count;
        let base_layer = raw / count.mip_levels_count;

        Self {
            depth_slice: base_layer % count.depth,
            array_index: base_layer / count.depth,
            mip_level,
        }
    }

    /// Returns `true` if every component is less than the corresponding component of `count`.
    pub const fn is_within(&self, count: &SubResourceCount) -> bool {
        self.depth_slice < count.depth
            && self.array_index < count.array_size
            && self.mip_level < count.mip_levels_count
    }

    /// Returns the index of the layer (depth slice of an array element) of this subresource.
    pub fn base_layer_index(&self, count: &SubResourceCount) -> Result<u32> {
        self.check(count)?;
        Ok(self.array_index * count.depth + self.depth_slice)
    }

    /// Encodes this index as a raw linear subresource index.
    pub fn raw_index(&self, count: &SubResourceCount) -> Result<u32> {
        let base_layer = self.base_layer_index(count)?;
        Ok(base_layer * count.mip_levels_count + self.mip_level)
    }

    fn check(&self, count: &SubResourceCount) -> Result<()> {
        if self.is_within(count) {
            Ok(())
        } else {
            Err(Error::SubResourceOutOfRange {
                index: *self,
                count: *count,
            })
        }
    }
}

impl Display for SubResourceIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "index(d:{}, a:{}, m:{})",
            self.depth_slice, self.array_index, self.mip_level
        )
    }
}

/// Returns the length of the full mip chain for a texture with the given largest dimension.
fn mip_levels_count(max_dimension: u32) -> u32 {
    // A 0-sized texture still has its base level.
    max_dimension.max(1).ilog2() + 1
}

#[cfg(test)]
mod tests {
    use crate::Error;

    use super::{SubResourceCount, SubResourceIndex};

    #[test]
    fn subresource_raw_index() {
        let count = SubResourceCount::new(2, 3, 4);
        let index = SubResourceIndex::new(1, 2, 3);

        // (2 * 2 + 1) * 4 + 3
        assert_eq!(index.base_layer_index(&count), Ok(5));
        assert_eq!(index.raw_index(&count), Ok(23));
        assert_eq!(count.raw_count(), 24);
    }

    #[test]
    fn subresource_raw_index_roundtrip() {
        let count = SubResourceCount::new(3, 2, 5);

        for raw in 0..count.raw_count() {
            let index = SubResourceIndex::from_raw(raw, &count).unwrap();
            assert!(index.is_within(&count));
            assert_eq!(index.raw_index(&count), Ok(raw));
        }

        let indices: Vec<_> = count.indices().collect();
        assert_eq!(indices.len(), count.raw_count() as usize);
        assert_eq!(indices[0], SubResourceIndex::default());
        assert_eq!(indices[6], SubResourceIndex::new(1, 0, 1));
    }

    #[test]
    fn subresource_out_of_range() {
        let count = SubResourceCount::new(1, 2, 3);
        let index = SubResourceIndex::new(0, 2, 0);

        assert_eq!(
            index.raw_index(&count),
            Err(Error::SubResourceOutOfRange { index, count })
        );
        assert_eq!(
            SubResourceIndex::from_raw(6, &count),
            Err(Error::RawSubResourceOutOfRange { raw: 6, count })
        );
    }

    #[test]
    fn subresource_count_default() {
        let count = SubResourceCount::default();
        assert_eq!(count.raw_count(), 1);
        assert_eq!(SubResourceIndex::default().raw_index(&count), Ok(0));
    }

    #[test]
    fn subresource_count_for_texture() {
        let count = SubResourceCount::for_texture(256, 64, 1, 6, true);
        assert_eq!(count.mip_levels_count(), 9);
        assert_eq!(count.array_size(), 6);
        assert_eq!(count.raw_count(), 54);

        let count = SubResourceCount::for_texture(300, 1, 1, 1, true);
        assert_eq!(count.mip_levels_count(), 9);

        let count = SubResourceCount::for_texture(300, 200, 1, 1, false);
        assert_eq!(count.mip_levels_count(), 1);
    }
}
