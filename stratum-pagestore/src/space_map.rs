//! Free-span interval map over one blob file's byte range.
//!
//! Spans are kept coalesced in a `BTreeMap<offset, len>`. Allocation is
//! best-fit: the smallest free span that holds the request, lowest offset on
//! ties, so small writes fill holes instead of growing the file tail.

use stratum_result::{Error, Result};

use std::collections::BTreeMap;

#[derive(Debug)]
pub struct SpaceMap {
    total_size: u64,
    /// offset -> length of each free span, non-overlapping and coalesced.
    free: BTreeMap<u64, u64>,
    free_size: u64,
}

impl SpaceMap {
    pub fn new(total_size: u64) -> Self {
        let mut free = BTreeMap::new();
        if total_size > 0 {
            free.insert(0, total_size);
        }
        Self {
            total_size,
            free,
            free_size: total_size,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn free_size(&self) -> u64 {
        self.free_size
    }

    pub fn used_size(&self) -> u64 {
        self.total_size - self.free_size
    }

    /// Largest single free span; the blob's remaining write capability.
    pub fn max_cap(&self) -> u64 {
        self.free.values().copied().max().unwrap_or(0)
    }

    /// End offset of the last used byte. Bytes past this are reclaimable by
    /// truncating the file.
    pub fn used_boundary(&self) -> u64 {
        match self.free.iter().next_back() {
            Some((&offset, &len)) if offset + len == self.total_size => offset,
            _ => self.total_size,
        }
    }

    /// Best-fit allocation. Returns the chosen offset, or `None` when no
    /// single span can hold `size` (fragmentation).
    pub fn alloc(&mut self, size: u64) -> Option<u64> {
        if size == 0 || size > self.free_size {
            return None;
        }
        let (&offset, &len) = self
            .free
            .iter()
            .filter(|(_, &len)| len >= size)
            .min_by_key(|(&offset, &len)| (len, offset))?;
        self.free.remove(&offset);
        if len > size {
            self.free.insert(offset + size, len - size);
        }
        self.free_size -= size;
        Some(offset)
    }

    /// Claim a specific span as used. Restart path: entries recovered from
    /// the directory mark their spans before the blob accepts new writes.
    pub fn mark_used(&mut self, offset: u64, size: u64) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        let (&span_offset, &span_len) = self
            .free
            .range(..=offset)
            .next_back()
            .filter(|(&o, &l)| o <= offset && offset + size <= o + l)
            .ok_or_else(|| {
                Error::LogicalError(format!(
                    "mark_used [{offset}, {}) does not lie in a free span",
                    offset + size
                ))
            })?;
        self.free.remove(&span_offset);
        if offset > span_offset {
            self.free.insert(span_offset, offset - span_offset);
        }
        let span_end = span_offset + span_len;
        let used_end = offset + size;
        if span_end > used_end {
            self.free.insert(used_end, span_end - used_end);
        }
        self.free_size -= size;
        Ok(())
    }

    /// Return a span to the free set, coalescing with neighbors.
    pub fn free(&mut self, offset: u64, size: u64) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        if offset + size > self.total_size {
            return Err(Error::LogicalError(format!(
                "free [{offset}, {}) exceeds total size {}",
                offset + size,
                self.total_size
            )));
        }
        let mut new_offset = offset;
        let mut new_len = size;

        if let Some((&prev_offset, &prev_len)) = self.free.range(..offset).next_back() {
            if prev_offset + prev_len > offset {
                return Err(Error::LogicalError(format!(
                    "free [{offset}, {}) overlaps free span [{prev_offset}, {})",
                    offset + size,
                    prev_offset + prev_len
                )));
            }
            if prev_offset + prev_len == offset {
                self.free.remove(&prev_offset);
                new_offset = prev_offset;
                new_len += prev_len;
            }
        }
        if let Some((&next_offset, &next_len)) = self.free.range(offset..).next() {
            if next_offset < offset + size {
                return Err(Error::LogicalError(format!(
                    "free [{offset}, {}) overlaps free span [{next_offset}, {})",
                    offset + size,
                    next_offset + next_len
                )));
            }
            if next_offset == offset + size {
                self.free.remove(&next_offset);
                new_len += next_len;
            }
        }
        self.free.insert(new_offset, new_len);
        self.free_size += size;
        Ok(())
    }

    /// Grow the mapped range (blob file expansion).
    pub fn grow(&mut self, new_total: u64) -> Result<()> {
        if new_total < self.total_size {
            return Err(Error::LogicalError(format!(
                "grow shrinks the space map: {} -> {new_total}",
                self.total_size
            )));
        }
        let added = new_total - self.total_size;
        let old_total = self.total_size;
        self.total_size = new_total;
        self.free_size += added;
        // Extend or append the trailing free span.
        match self.free.iter().next_back() {
            Some((&offset, &len)) if offset + len == old_total => {
                self.free.insert(offset, len + added);
            }
            _ => {
                if added > 0 {
                    self.free.insert(old_total, added);
                }
            }
        }
        Ok(())
    }

    /// Shrink the mapped range to `new_total`; all trimmed bytes must be free.
    pub fn truncate(&mut self, new_total: u64) -> Result<()> {
        if new_total > self.total_size {
            return Err(Error::LogicalError(format!(
                "truncate grows the space map: {} -> {new_total}",
                self.total_size
            )));
        }
        if new_total < self.used_boundary() {
            return Err(Error::LogicalError(format!(
                "truncate to {new_total} below used boundary {}",
                self.used_boundary()
            )));
        }
        match self.free.iter().next_back() {
            Some((&offset, &len)) if offset + len == self.total_size => {
                let trimmed = self.total_size - new_total;
                self.free.remove(&offset);
                if len > trimmed {
                    self.free.insert(offset, len - trimmed);
                }
                self.free_size -= trimmed;
            }
            _ => {
                debug_assert_eq!(new_total, self.total_size);
            }
        }
        self.total_size = new_total;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_conserved(sm: &SpaceMap, valid: u64) {
        assert_eq!(sm.used_size(), valid, "used size vs tracked valid bytes");
        assert_eq!(sm.free_size() + sm.used_size(), sm.total_size());
        assert!(sm.used_boundary() <= sm.total_size());
    }

    #[test]
    fn best_fit_prefers_smallest_hole() {
        let mut sm = SpaceMap::new(1000);
        let a = sm.alloc(100).unwrap();
        let b = sm.alloc(50).unwrap();
        let c = sm.alloc(200).unwrap();
        assert_eq!((a, b, c), (0, 100, 150));

        // Free the 50-byte hole and the 100-byte hole.
        sm.free(b, 50).unwrap();
        sm.free(a, 100).unwrap();
        // A 40-byte request should land in the 50-byte hole, not the 100.
        assert_eq!(sm.alloc(40), Some(100));
        assert_conserved(&sm, 200 + 40);
    }

    #[test]
    fn coalescing_restores_single_span() {
        let mut sm = SpaceMap::new(300);
        let a = sm.alloc(100).unwrap();
        let b = sm.alloc(100).unwrap();
        let c = sm.alloc(100).unwrap();
        sm.free(a, 100).unwrap();
        sm.free(c, 100).unwrap();
        sm.free(b, 100).unwrap();
        assert_eq!(sm.max_cap(), 300);
        assert_eq!(sm.used_boundary(), 0);
        assert_conserved(&sm, 0);
    }

    #[test]
    fn used_boundary_tracks_tail() {
        let mut sm = SpaceMap::new(1000);
        let a = sm.alloc(100).unwrap();
        let b = sm.alloc(100).unwrap();
        assert_eq!(sm.used_boundary(), 200);
        sm.free(b, 100).unwrap();
        assert_eq!(sm.used_boundary(), 100);
        sm.free(a, 100).unwrap();
        assert_eq!(sm.used_boundary(), 0);
    }

    #[test]
    fn fragmentation_refuses_oversized_alloc() {
        let mut sm = SpaceMap::new(300);
        let a = sm.alloc(100).unwrap();
        let _b = sm.alloc(100).unwrap();
        let c = sm.alloc(100).unwrap();
        sm.free(a, 100).unwrap();
        sm.free(c, 100).unwrap();
        // 200 bytes free, but split into two 100-byte holes.
        assert_eq!(sm.free_size(), 200);
        assert_eq!(sm.alloc(150), None);
    }

    #[test]
    fn mark_used_splits_span() {
        let mut sm = SpaceMap::new(1000);
        sm.mark_used(100, 50).unwrap();
        assert_eq!(sm.used_size(), 50);
        assert_eq!(sm.alloc(100), Some(0));
        assert!(sm.mark_used(120, 10).is_err());
        assert_conserved(&sm, 150);
    }

    #[test]
    fn double_free_is_rejected() {
        let mut sm = SpaceMap::new(100);
        let a = sm.alloc(60).unwrap();
        sm.free(a, 60).unwrap();
        assert!(sm.free(a, 60).is_err());
    }

    #[test]
    fn truncate_trims_trailing_free_span() {
        let mut sm = SpaceMap::new(1000);
        sm.alloc(100).unwrap();
        assert_eq!(sm.used_boundary(), 100);
        sm.truncate(100).unwrap();
        assert_eq!(sm.total_size(), 100);
        assert_eq!(sm.free_size(), 0);
        assert!(sm.truncate(50).is_err());
    }

    #[test]
    fn grow_extends_tail() {
        let mut sm = SpaceMap::new(100);
        sm.alloc(100).unwrap();
        assert_eq!(sm.max_cap(), 0);
        sm.grow(300).unwrap();
        assert_eq!(sm.max_cap(), 200);
        assert_eq!(sm.alloc(200), Some(100));
    }
}
