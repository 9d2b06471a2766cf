//! Stripe layout planner.
//!
//! A logical object is spread over a pool of fixed-size backend objects
//! using three parameters: the stripe unit `U` (one contiguous byte run
//! inside one backend object), the stripe count `N` (units per stripe row,
//! one unit per backend object) and the backend object size `O` (a multiple
//! of `U`). A *stripe row* spans `N` backend objects; `P = O / U` rows
//! reuse the same `N` objects before the layout moves on to the next
//! *object group*.
//!
//! The planner is stateless. Callers loop [`StripePlanner::locate`] until
//! the remaining length reaches zero; each iteration names exactly one
//! backend object, an offset inside it, and how many bytes fit there.
//! [`StripePlanner::covering_objects`] enumerates every backend object a
//! payload of a given total length touches, which is what a blind delete
//! needs.

use crate::error::{CoreError, Result};
use crate::store_info::StripeGeometry;

/// One backend object of a striped layout, identified by its group and its
/// index inside the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendObject {
    pub group: u64,
    pub index: u64,
}

impl BackendObject {
    /// Backend object id: `{parent}_{group}_{index}`.
    pub fn oid(&self, parent: &str) -> String {
        format!("{}_{}_{}", parent, self.group, self.index)
    }
}

/// The result of one planning step: where the next run of bytes lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeSlice {
    /// Object group holding this run.
    pub group: u64,
    /// Backend object index inside the group.
    pub index: u64,
    /// Stripe row, counted from the start of the object.
    pub row: u64,
    /// Byte offset inside the backend object.
    pub offset: u64,
    /// Bytes that fit in this unit, capped by the caller's remaining length.
    pub usable: u64,
}

impl StripeSlice {
    pub fn oid(&self, parent: &str) -> String {
        format!("{}_{}_{}", parent, self.group, self.index)
    }
}

/// Stateless mapper from logical offsets to backend objects.
#[derive(Debug, Clone, Copy)]
pub struct StripePlanner {
    object_size: u64,
    unit: u64,
    stripe_count: u64,
    /// `U * N`: bytes covered by one stripe row.
    row_size: u64,
    /// `O / U`: stripe rows sharing one object group.
    rows_per_object: u64,
}

impl StripePlanner {
    pub fn new(geometry: StripeGeometry) -> Result<Self> {
        let StripeGeometry {
            object_size,
            unit,
            stripe_count,
        } = geometry;
        if unit == 0 || stripe_count == 0 {
            return Err(CoreError::InvalidGeometry(format!(
                "unit ({unit}) and stripe count ({stripe_count}) must be non-zero"
            )));
        }
        if object_size < unit {
            return Err(CoreError::InvalidGeometry(format!(
                "unit ({unit}) exceeds object size ({object_size})"
            )));
        }
        if object_size % unit != 0 {
            return Err(CoreError::InvalidGeometry(format!(
                "object size ({object_size}) is not a multiple of unit ({unit})"
            )));
        }
        Ok(Self {
            object_size,
            unit,
            stripe_count: stripe_count as u64,
            row_size: unit * stripe_count as u64,
            rows_per_object: object_size / unit,
        })
    }

    pub fn unit(&self) -> u64 {
        self.unit
    }

    pub fn object_size(&self) -> u64 {
        self.object_size
    }

    /// Map `(offset, remaining)` to the backend object run covering the byte
    /// at `offset`. `usable` never exceeds `remaining`, and never crosses a
    /// unit boundary; callers advance by `usable` and call again until
    /// `remaining` is zero.
    pub fn locate(&self, offset: u64, remaining: u64) -> StripeSlice {
        let row = offset / self.row_size;
        let row_rem = offset % self.row_size;
        let index = row_rem / self.unit;
        let unit_rem = row_rem % self.unit;

        let group = row / self.rows_per_object;
        let row_in_group = row % self.rows_per_object;

        StripeSlice {
            group,
            index,
            row,
            offset: row_in_group * self.unit + unit_rem,
            usable: remaining.min(self.unit - unit_rem),
        }
    }

    /// Every backend object that holds at least one byte of a payload of
    /// `total_len` bytes starting at logical offset 0. Exactly the objects a
    /// delete must visit: no more, no fewer.
    pub fn covering_objects(&self, total_len: u64) -> Vec<BackendObject> {
        let mut objects = Vec::new();
        let group_size = self.row_size * self.rows_per_object;
        let full_groups = total_len / group_size;
        let remain = total_len % group_size;

        for group in 0..full_groups {
            for index in 0..self.stripe_count {
                objects.push(BackendObject { group, index });
            }
        }
        if remain == 0 {
            return objects;
        }

        let group = full_groups;
        if remain >= self.row_size {
            // At least one full stripe row in the trailing group touches
            // every object of that group.
            for index in 0..self.stripe_count {
                objects.push(BackendObject { group, index });
            }
            return objects;
        }

        let full_units = remain / self.unit;
        for index in 0..full_units {
            objects.push(BackendObject { group, index });
        }
        if remain % self.unit > 0 {
            objects.push(BackendObject {
                group,
                index: full_units,
            });
        }
        objects
    }

    /// Backend object ids for [`Self::covering_objects`].
    pub fn covering_oids(&self, parent: &str, total_len: u64) -> Vec<String> {
        self.covering_objects(total_len)
            .into_iter()
            .map(|o| o.oid(parent))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn planner(object_size: u64, unit: u64, stripe_count: u32) -> StripePlanner {
        StripePlanner::new(StripeGeometry {
            object_size,
            unit,
            stripe_count,
        })
        .unwrap()
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(StripePlanner::new(StripeGeometry {
            object_size: 1024,
            unit: 4096,
            stripe_count: 2,
        })
        .is_err());
        assert!(StripePlanner::new(StripeGeometry {
            object_size: 4096,
            unit: 3000,
            stripe_count: 2,
        })
        .is_err());
        assert!(StripePlanner::new(StripeGeometry {
            object_size: 4096,
            unit: 0,
            stripe_count: 2,
        })
        .is_err());
        assert!(StripePlanner::new(StripeGeometry {
            object_size: 4096,
            unit: 1024,
            stripe_count: 0,
        })
        .is_err());
    }

    #[test]
    fn first_bytes_land_in_first_object() {
        let p = planner(4096, 1024, 4);
        let s = p.locate(0, 10);
        assert_eq!((s.group, s.index, s.offset, s.usable), (0, 0, 0, 10));

        // A write smaller than the unit still lands in exactly one object.
        assert_eq!(p.covering_objects(10), vec![BackendObject { group: 0, index: 0 }]);
    }

    #[test]
    fn walks_across_row_and_group_boundaries() {
        // O = 2 units, N = 2: row size 2048, group size 4096.
        let p = planner(2048, 1024, 2);

        // Second unit of row 0 -> object index 1, offset 0.
        let s = p.locate(1024, 4096);
        assert_eq!((s.group, s.index, s.row, s.offset), (0, 1, 0, 0));

        // Row 1 reuses the same objects at the next unit offset.
        let s = p.locate(2048, 4096);
        assert_eq!((s.group, s.index, s.row, s.offset), (0, 0, 1, 1024));

        // Row 2 starts group 1.
        let s = p.locate(4096, 4096);
        assert_eq!((s.group, s.index, s.row, s.offset), (1, 0, 2, 0));
    }

    #[test]
    fn usable_respects_unit_remainder() {
        let p = planner(4096, 1024, 4);
        let s = p.locate(1000, 1 << 20);
        assert_eq!(s.usable, 24);
        let s = p.locate(1000, 10);
        assert_eq!(s.usable, 10);
    }

    #[test]
    fn oid_format() {
        let p = planner(4096, 1024, 4);
        let s = p.locate(5 * 1024, 1);
        assert_eq!(s.oid("inst:7"), format!("inst:7_{}_{}", s.group, s.index));
    }

    /// Iterating `locate` until the length is exhausted must produce a
    /// disjoint cover of `[0, len)` whose pieces sum to `len`, visiting
    /// exactly the objects `covering_objects` enumerates.
    fn check_cover(p: &StripePlanner, len: u64) {
        let mut offset = 0u64;
        let mut remaining = len;
        let mut visited = BTreeSet::new();
        while remaining > 0 {
            let s = p.locate(offset, remaining);
            assert!(s.usable > 0, "planner stalled at offset {offset}");
            assert!(s.usable <= remaining);
            assert!(s.offset + s.usable <= p.object_size());
            visited.insert(BackendObject {
                group: s.group,
                index: s.index,
            });
            offset += s.usable;
            remaining -= s.usable;
        }
        assert_eq!(offset, len);

        let enumerated: BTreeSet<_> = p.covering_objects(len).into_iter().collect();
        assert_eq!(visited, enumerated, "cover mismatch for len {len}");
        assert_eq!(enumerated.len(), p.covering_objects(len).len(), "duplicate oids");
    }

    #[test]
    fn cover_matches_enumeration_over_geometry_grid() {
        for unit_kb in [1u64, 2, 3, 8, 64] {
            let unit = unit_kb << 10;
            for mult in [1u64, 2, 4, 7] {
                let object_size = unit * mult;
                for stripe_count in [1u32, 2, 5, 16] {
                    let p = planner(object_size, unit, stripe_count);
                    let group = object_size * stripe_count as u64;
                    for len in [
                        0,
                        1,
                        unit - 1,
                        unit,
                        unit + 1,
                        p.row_size - 1,
                        p.row_size,
                        p.row_size + 1,
                        group - 1,
                        group,
                        group + 1,
                        3 * group + 2 * unit + 5,
                    ] {
                        check_cover(&p, len);
                    }
                }
            }
        }
    }

    #[test]
    fn zero_length_covers_nothing() {
        let p = planner(4096, 1024, 4);
        assert!(p.covering_objects(0).is_empty());
    }
}
