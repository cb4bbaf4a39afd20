// SPDX-License-Identifier: Apache-2.0

//! Address-range maps: an ordered, non-overlapping sequence of ranges
//! routing one input space to method indices (spec §3 "Range"/"Map",
//! §4.B `map_set`/`map_search`). The binary-search shape is grounded on
//! `find_pfn_region` in `original_source/src/kdumpfile/pfn.c`; unlike
//! PFN regions (append-then-sort, no overlap), a `Map` supports
//! inserting over existing coverage, splitting and coalescing as it
//! goes, since setup routines install ranges incrementally.

use std::cmp::Ordering;

/// `{ endoff, meth }`: covers `[base, base + endoff]` inclusive, routed
/// to method index `meth` in the owning [`crate::xlat::system::TranslationSystem`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Range {
    pub endoff: u64,
    pub meth: usize,
}

#[derive(Clone, Debug, Default)]
pub struct Map {
    entries: Vec<(u64, Range)>,
}

impl Map {
    pub fn new() -> Self {
        Map { entries: Vec::new() }
    }

    fn end_of(base: u64, r: &Range) -> u64 {
        base.saturating_add(r.endoff)
    }

    /// Insert/replace the routing for `[start, start + range.endoff]`,
    /// splitting any range it straddles and coalescing neighbours that
    /// end up adjacent with the same method.
    pub fn set(&mut self, start: u64, range: Range) {
        let end = Self::end_of(start, &range);
        let old = std::mem::take(&mut self.entries);
        let mut next = Vec::with_capacity(old.len() + 2);

        for (b, r) in old {
            let e = Self::end_of(b, &r);
            if e < start || b > end {
                next.push((b, r));
                continue;
            }
            if b < start {
                next.push((
                    b,
                    Range {
                        endoff: start - 1 - b,
                        meth: r.meth,
                    },
                ));
            }
            if e > end {
                let nb = end + 1;
                next.push((
                    nb,
                    Range {
                        endoff: e - nb,
                        meth: r.meth,
                    },
                ));
            }
        }
        next.push((start, range));
        next.sort_by_key(|(b, _)| *b);
        self.entries = coalesce(next);
    }

    /// The method index covering `addr`, or `None` if unmapped.
    pub fn search(&self, addr: u64) -> Option<usize> {
        self.entries
            .binary_search_by(|(b, r)| {
                if addr < *b {
                    Ordering::Greater
                } else if addr > Self::end_of(*b, r) {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            })
            .ok()
            .map(|i| self.entries[i].1.meth)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, Range)> + '_ {
        self.entries.iter().copied()
    }
}

fn coalesce(entries: Vec<(u64, Range)>) -> Vec<(u64, Range)> {
    let mut out: Vec<(u64, Range)> = Vec::with_capacity(entries.len());
    for (b, r) in entries {
        if let Some((pb, pr)) = out.last_mut() {
            let pe = Map::end_of(*pb, pr);
            if pr.meth == r.meth && pe.saturating_add(1) == b {
                pr.endoff = Map::end_of(b, &r) - *pb;
                continue;
            }
        }
        out.push((b, r));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_finds_covering_range() {
        let mut map = Map::new();
        map.set(0x1000, Range { endoff: 0xfff, meth: 1 });
        assert_eq!(map.search(0x1000), Some(1));
        assert_eq!(map.search(0x1fff), Some(1));
        assert_eq!(map.search(0x2000), None);
    }

    #[test]
    fn adjacent_same_method_ranges_coalesce() {
        let mut map = Map::new();
        map.set(0x0, Range { endoff: 0xfff, meth: 2 });
        map.set(0x1000, Range { endoff: 0xfff, meth: 2 });
        assert_eq!(map.iter().count(), 1);
        assert_eq!(map.search(0x1800), Some(2));
    }

    #[test]
    fn overwrite_splits_straddled_range() {
        let mut map = Map::new();
        map.set(0x0, Range { endoff: 0xffff, meth: 1 });
        map.set(0x4000, Range { endoff: 0xfff, meth: 9 });
        assert_eq!(map.search(0x1000), Some(1));
        assert_eq!(map.search(0x4000), Some(9));
        assert_eq!(map.search(0x4fff), Some(9));
        assert_eq!(map.search(0x5000), Some(1));
        assert_eq!(map.iter().count(), 3);
    }
}
