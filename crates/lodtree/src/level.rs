//! Choosing the next resolution level to request.
//!
//! Each strategy answers one question: given the level a node would ideally
//! display and the level it currently holds, how far should the next fetch
//! jump? Once a level is known to fail, every strategy falls back to halving
//! the distance toward the failing level, which keeps requests strictly
//! below it.

use serde::Deserialize;

/// Inclusive range of levels a layer can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LevelBounds {
    pub min: i32,
    pub max: i32,
}

impl LevelBounds {
    #[must_use]
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }
}

impl Default for LevelBounds {
    fn default() -> Self {
        Self { min: 0, max: i32::MAX }
    }
}

/// Policy for jumping toward the desired level.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Strategy {
    /// Request the desired level directly.
    #[default]
    MinNetworkTraffic,
    /// Request the largest configured level at or below the desired one.
    Group {
        /// Ascending list of levels.
        levels: Vec<i32>,
    },
    /// Improve by at most `increment` levels per request.
    Progressive {
        #[serde(default = "default_increment")]
        increment: i32,
    },
    /// Halve the remaining distance on every request.
    Dichotomy,
}

fn default_increment() -> i32 {
    1
}

/// Compute the next level to request.
///
/// `current` is `None` when the node holds nothing yet. `lowest_failure` is
/// the lowest level known to fail for this node and layer, if any; when set,
/// the result is strictly below it.
#[must_use]
pub fn choose_next_level(
    strategy: &Strategy,
    desired: i32,
    current: Option<i32>,
    lowest_failure: Option<i32>,
    bounds: LevelBounds,
) -> i32 {
    let next = match lowest_failure {
        Some(failing) => {
            let mut next = dichotomy(failing, current, bounds);
            if next >= failing {
                next = failing - 1;
            }
            if let Strategy::Group { levels } = strategy {
                // Snapping up to the smallest group would break the strict
                // bound, so only snap down.
                if let Some(&group) = levels.iter().rev().find(|&&l| l <= next) {
                    next = group;
                }
            }
            next
        }
        None => match strategy {
            Strategy::MinNetworkTraffic => desired,
            Strategy::Group { levels } => group(levels, desired),
            Strategy::Progressive { increment } => {
                progressive(desired, current, *increment, bounds)
            }
            Strategy::Dichotomy => dichotomy(desired, current, bounds),
        },
    };
    next.min(bounds.max)
}

fn group(levels: &[i32], desired: i32) -> i32 {
    levels
        .iter()
        .rev()
        .find(|&&l| l <= desired)
        .or_else(|| levels.first())
        .copied()
        .unwrap_or(desired)
}

fn progressive(desired: i32, current: Option<i32>, increment: i32, bounds: LevelBounds) -> i32 {
    match current {
        Some(current) => desired.min(current.saturating_add(increment.max(1))),
        None => desired.min(bounds.min),
    }
}

fn dichotomy(target: i32, current: Option<i32>, bounds: LevelBounds) -> i32 {
    match current {
        None => bounds.min,
        Some(current) => {
            let sum = i64::from(current) + i64::from(target);
            let midpoint = sum.div_euclid(2) + sum.rem_euclid(2);
            #[allow(clippy::cast_possible_truncation)]
            let midpoint = midpoint as i32;
            target.min(midpoint)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{Just, prop_assert, prop_oneof, proptest};
    use proptest::strategy::Strategy as _;

    const BOUNDS: LevelBounds = LevelBounds { min: 0, max: 30 };

    #[test]
    fn test_min_network_traffic_jumps_directly() {
        let next = choose_next_level(&Strategy::MinNetworkTraffic, 18, Some(3), None, BOUNDS);
        assert_eq!(next, 18);
    }

    #[test]
    fn test_group_picks_largest_boundary_below() {
        let strategy = Strategy::Group {
            levels: vec![10, 15, 20],
        };
        assert_eq!(choose_next_level(&strategy, 17, None, None, BOUNDS), 15);
        assert_eq!(choose_next_level(&strategy, 20, None, None, BOUNDS), 20);
        // Nothing qualifies: smallest group.
        assert_eq!(choose_next_level(&strategy, 4, None, None, BOUNDS), 10);
    }

    #[test]
    fn test_progressive_steps_by_increment() {
        let strategy = Strategy::Progressive { increment: 2 };
        assert_eq!(choose_next_level(&strategy, 10, Some(3), None, BOUNDS), 5);
        assert_eq!(choose_next_level(&strategy, 4, Some(3), None, BOUNDS), 4);
        assert_eq!(choose_next_level(&strategy, 10, None, None, BOUNDS), 0);
    }

    #[test]
    fn test_dichotomy_halves_distance() {
        let s = Strategy::Dichotomy;
        let bounds = LevelBounds::new(2, 30);
        assert_eq!(choose_next_level(&s, 20, None, None, bounds), 2);
        assert_eq!(choose_next_level(&s, 20, Some(2), None, bounds), 11);
        assert_eq!(choose_next_level(&s, 20, Some(11), None, bounds), 16);
        assert_eq!(choose_next_level(&s, 20, Some(19), None, bounds), 20);
    }

    #[test]
    fn test_result_is_clamped_to_max() {
        let bounds = LevelBounds::new(0, 12);
        assert_eq!(
            choose_next_level(&Strategy::MinNetworkTraffic, 18, None, None, bounds),
            12
        );
    }

    #[test]
    fn test_failure_requires_strict_improvement() {
        // ceil((15 + 16) / 2) = 16 is the failing level itself.
        let next = choose_next_level(&Strategy::MinNetworkTraffic, 20, Some(15), Some(16), BOUNDS);
        assert_eq!(next, 15);
    }

    #[test]
    fn test_group_settles_below_failure() {
        let strategy = Strategy::Group {
            levels: vec![10, 15, 20],
        };
        // Levels up to 15 loaded, 16 failed.
        assert_eq!(choose_next_level(&strategy, 20, Some(15), Some(16), BOUNDS), 15);
        // Level 20 failed while holding 10: the midpoint 15 is a boundary.
        assert_eq!(choose_next_level(&strategy, 20, Some(10), Some(20), BOUNDS), 15);
        // Midpoint 18 snaps down to 15, never to 10 or 20.
        assert_eq!(choose_next_level(&strategy, 20, Some(15), Some(20), BOUNDS), 15);
    }

    #[test]
    fn test_group_failure_below_all_boundaries_keeps_candidate() {
        let strategy = Strategy::Group {
            levels: vec![10, 15, 20],
        };
        assert_eq!(choose_next_level(&strategy, 20, Some(2), Some(5), BOUNDS), 4);
    }

    #[test]
    fn test_strategy_deserializes_from_kebab_case() {
        let s: Strategy = serde_json::from_str(r#"{"kind": "min-network-traffic"}"#).unwrap();
        assert_eq!(s, Strategy::MinNetworkTraffic);
        let s: Strategy = serde_json::from_str(r#"{"kind": "progressive"}"#).unwrap();
        assert_eq!(s, Strategy::Progressive { increment: 1 });
        let s: Strategy = serde_json::from_str(r#"{"kind": "group", "levels": [3, 9]}"#).unwrap();
        assert_eq!(s, Strategy::Group { levels: vec![3, 9] });
    }

    fn any_strategy() -> impl proptest::strategy::Strategy<Value = Strategy> {
        prop_oneof![
            Just(Strategy::MinNetworkTraffic),
            Just(Strategy::Dichotomy),
            (1..4i32).prop_map(|increment| Strategy::Progressive { increment }),
            proptest::collection::btree_set(0..30i32, 1..5)
                .prop_map(|set| Strategy::Group { levels: set.into_iter().collect() }),
        ]
    }

    proptest! {
        #[test]
        fn test_dichotomy_converges(min in 0..10i32, extra in 0..20i32) {
            let desired = min + extra;
            let bounds = LevelBounds::new(min, 30);
            let mut current = None;
            let mut steps = 0;
            while current != Some(desired) {
                let next = choose_next_level(&Strategy::Dichotomy, desired, current, None, bounds);
                prop_assert!(next <= desired);
                current = Some(next);
                steps += 1;
                // One step to reach min, then at most ceil(log2(distance)) + 1.
                prop_assert!(steps <= 2 + 32 - extra.leading_zeros() as i32);
            }
        }

        #[test]
        fn test_failure_clamps_every_strategy(
            strategy in any_strategy(),
            desired in 0..30i32,
            current in proptest::option::of(0..30i32),
            failing in 0..30i32,
        ) {
            let next = choose_next_level(&strategy, desired, current, Some(failing), BOUNDS);
            prop_assert!(next < failing);
        }
    }
}
