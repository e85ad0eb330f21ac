use serde::{Deserialize, Serialize};

pub const DEFAULT_RADIUS: usize = 2;

/// Inclusive range of post indices the host should keep rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: usize,
    pub end: usize,
}

// A window always holds at least one post.
#[allow(clippy::len_without_is_empty)]
impl Window {
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start..=self.end).contains(&index)
    }

    pub fn indices(&self) -> std::ops::RangeInclusive<usize> {
        self.start..=self.end
    }
}

/// Widest span of at most `2 * radius + 1` posts around `index` that fits
/// in a list of `len` posts. Shrinks on whichever side hits a boundary.
/// Returns `None` only for an empty list; an out-of-range `index` is
/// clamped to the last post.
pub fn window(len: usize, index: usize, radius: usize) -> Option<Window> {
    if len == 0 {
        return None;
    }
    let index = index.min(len - 1);
    Some(Window {
        start: index.saturating_sub(radius),
        end: index.saturating_add(radius).min(len - 1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_list_has_no_window() {
        assert_eq!(window(0, 0, DEFAULT_RADIUS), None);
    }

    #[test]
    fn window_is_maximal_near_boundaries() {
        assert_eq!(window(10, 0, 2), Some(Window { start: 0, end: 2 }));
        assert_eq!(window(10, 9, 2), Some(Window { start: 7, end: 9 }));
        assert_eq!(window(10, 5, 2), Some(Window { start: 3, end: 7 }));
        assert_eq!(window(10, 1, 2), Some(Window { start: 0, end: 3 }));
    }

    #[test]
    fn short_lists_are_fully_visible() {
        let single = window(1, 0, 2).unwrap();
        assert_eq!(single, Window { start: 0, end: 0 });
        assert_eq!(single.len(), 1);
        assert!(single.contains(0));
        assert_eq!(window(3, 1, 2), Some(Window { start: 0, end: 2 }));
    }

    proptest! {
        #[test]
        fn prop_window_stays_in_bounds(len in 1usize..500, seed in 0usize..500) {
            let index = seed % len;
            let w = window(len, index, DEFAULT_RADIUS).unwrap();
            prop_assert!(w.start <= index && index <= w.end);
            prop_assert!(w.end < len);
            prop_assert!(w.len() <= 2 * DEFAULT_RADIUS + 1);
            prop_assert_eq!(w.len(), (2 * DEFAULT_RADIUS + 1).min(
                index.min(DEFAULT_RADIUS) + (len - 1 - index).min(DEFAULT_RADIUS) + 1
            ));
        }

        #[test]
        fn prop_window_is_total(len in 0usize..50, index in 0usize..100, radius in 0usize..10) {
            if let Some(w) = window(len, index, radius) {
                prop_assert!(w.start <= w.end && w.end < len);
            } else {
                prop_assert_eq!(len, 0);
            }
        }
    }
}
