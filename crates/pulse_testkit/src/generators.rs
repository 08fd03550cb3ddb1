//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random pulse data
//! that maintains the invariants the engines rely on.

use pulse_codec::Value;
use pulse_core::{ObjectNode, SlicePolicy};
use proptest::prelude::*;

/// Strategy for generating strictly increasing times.
pub fn ascending_times(min_len: usize, max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1u32..1000, min_len..max_len).prop_map(|steps| {
        let mut t = 0.0;
        steps
            .into_iter()
            .map(|step| {
                t += f64::from(step) / 100.0;
                t
            })
            .collect()
    })
}

/// Strategy for a time series of scalar doubles: times and one row each.
pub fn series_strategy(max_len: usize) -> impl Strategy<Value = (Vec<f64>, Vec<Value>)> {
    ascending_times(1, max_len).prop_flat_map(|times| {
        let len = times.len();
        (
            Just(times),
            prop::collection::vec(any::<i32>().prop_map(|n| Value::Double(f64::from(n))), len),
        )
    })
}

/// Strategy for a series together with the sizes of the chunks it is
/// appended in. The chunk sizes always add up to the series length.
pub fn chunked_series_strategy(
    max_len: usize,
) -> impl Strategy<Value = (Vec<f64>, Vec<Value>, Vec<usize>)> {
    series_strategy(max_len).prop_flat_map(|(times, rows)| {
        let len = times.len();
        prop::collection::vec(1usize..=len, 1..8).prop_map(move |cuts| {
            let mut chunks = Vec::new();
            let mut left = len;
            for cut in cuts {
                if left == 0 {
                    break;
                }
                let size = cut.min(left);
                chunks.push(size);
                left -= size;
            }
            if left > 0 {
                chunks.push(left);
            }
            (times.clone(), rows.clone(), chunks)
        })
    })
}

/// Strategy for generating field paths such as `profiles_1d/psi`.
pub fn field_path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex"),
        1..4,
    )
    .prop_map(|parts| parts.join("/"))
}

/// Strategy for slice selection policies.
pub fn slice_policy_strategy() -> impl Strategy<Value = SlicePolicy> {
    prop_oneof![
        Just(SlicePolicy::Closest),
        Just(SlicePolicy::Previous),
        Just(SlicePolicy::Interpolation),
    ]
}

/// Strategy for one structure slice holding a scalar and a profile.
pub fn object_slice_strategy() -> impl Strategy<Value = ObjectNode> {
    (any::<i32>(), prop::collection::vec(-1.0e3f64..1.0e3, 1..64)).prop_map(|(n, profile)| {
        let mut object = ObjectNode::with_capacity(1);
        object
            .put_value("index", 0, Value::Int(n), 1)
            .expect("Failed to build slice");
        object
            .put_value("profiles_1d/psi", 0, Value::from(profile), 1)
            .expect("Failed to build slice");
        object
            .into_slots()
            .expect("Failed to build slice")
            .remove(0)
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn times_strictly_increase(times in ascending_times(1, 50)) {
            prop_assert!(times.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn chunks_cover_the_series((times, rows, chunks) in chunked_series_strategy(50)) {
            prop_assert_eq!(times.len(), rows.len());
            prop_assert_eq!(chunks.iter().sum::<usize>(), times.len());
            prop_assert!(chunks.iter().all(|c| *c > 0));
        }

        #[test]
        fn field_paths_have_no_empty_segments(path in field_path_strategy()) {
            prop_assert!(path.split('/').all(|s| !s.is_empty()));
        }
    }
}
