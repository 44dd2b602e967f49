//! # Size Classes
//!
//! Maps slot sizes (in units) to free-list buckets.
//!
//! Sizes below [`EXACT_CLASSES`] get one bucket each. Above that, every
//! power of two is split into four equal sub-ranges, so the worst-case
//! spacing between neighbouring class lower bounds is 25%.
//!
//! Insertion uses [`class_of`]; allocation starts at [`class_for_request`],
//! the first class whose smallest member already has enough room.

/// Number of exact-size classes.
pub const EXACT_CLASSES: usize = 32;

/// Sub-classes per power of two above the exact range.
const SUB_CLASS_BITS: u32 = 2;
const SUB_CLASSES: usize = 1 << SUB_CLASS_BITS;

/// `log2(EXACT_CLASSES)`.
const EXACT_LOG: u32 = EXACT_CLASSES.trailing_zeros();

/// Returns the class a free slot of `units` belongs to.
#[inline]
#[must_use]
pub fn class_of(units: usize) -> usize {
    if units < EXACT_CLASSES {
        return units;
    }
    let log = usize::BITS - 1 - units.leading_zeros();
    let sub = (units >> (log - SUB_CLASS_BITS)) & (SUB_CLASSES - 1);
    EXACT_CLASSES + (log - EXACT_LOG) as usize * SUB_CLASSES + sub
}

/// Smallest slot size that can be stored in `class`.
#[inline]
#[must_use]
pub fn lower_bound(class: usize) -> usize {
    if class < EXACT_CLASSES {
        return class;
    }
    let k = class - EXACT_CLASSES;
    let log = (k / SUB_CLASSES) as u32 + EXACT_LOG;
    let sub = k % SUB_CLASSES;
    (1 << log) + (sub << (log - SUB_CLASS_BITS))
}

/// First class whose every member holds at least `units`.
#[inline]
#[must_use]
pub fn class_for_request(units: usize) -> usize {
    let class = class_of(units);
    if lower_bound(class) >= units {
        class
    } else {
        class + 1
    }
}

/// Number of classes needed for slots of up to `max_units`.
#[inline]
#[must_use]
pub fn class_count(max_units: usize) -> usize {
    class_of(max_units) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_range() {
        for units in 0..EXACT_CLASSES {
            assert_eq!(class_of(units), units);
            assert_eq!(lower_bound(units), units);
            assert_eq!(class_for_request(units), units);
        }
    }

    #[test]
    fn test_known_boundaries() {
        assert_eq!(class_of(32), 32);
        assert_eq!(class_of(39), 32);
        assert_eq!(class_of(40), 33);
        assert_eq!(class_of(63), 35);
        assert_eq!(class_of(64), 36);
        assert_eq!(lower_bound(35), 56);
        assert_eq!(lower_bound(36), 64);
    }

    #[test]
    fn test_classes_are_monotonic() {
        let mut last = 0;
        for units in 1..100_000 {
            let class = class_of(units);
            assert!(class >= last);
            assert!(lower_bound(class) <= units);
            last = class;
        }
    }

    #[test]
    fn test_request_class_always_has_room() {
        for units in 2..100_000 {
            let class = class_for_request(units);
            assert!(lower_bound(class) >= units, "units {units} class {class}");
            if class > 0 {
                assert!(lower_bound(class - 1) < units);
            }
        }
    }
}
