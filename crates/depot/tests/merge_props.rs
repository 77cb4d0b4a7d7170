//! # Three-Way Merge Properties
//!
//! `merge_json` applies the `before → after` edit onto `latest`: an
//! untouched side yields the other, and counters combine as deltas.

use std::collections::BTreeMap;

use depot::merge_json;
use proptest::prelude::*;
use serde_json::{json, Value};

fn counters() -> impl Strategy<Value = BTreeMap<String, i64>> {
    prop::collection::btree_map("[a-z]{1,6}", -1_000_000i64..1_000_000, 1..8)
}

fn to_json(map: &BTreeMap<String, i64>) -> Value {
    json!(map)
}

/// `map` with every value shifted by the matching entry of `deltas`.
fn shifted(map: &BTreeMap<String, i64>, deltas: &[i64]) -> BTreeMap<String, i64> {
    map.iter()
        .zip(deltas.iter().cycle())
        .map(|((k, v), d)| (k.clone(), v + d))
        .collect()
}

proptest! {
    #[test]
    fn unchanged_edit_keeps_latest(before in counters(), latest in counters()) {
        let b = to_json(&before);
        prop_assert_eq!(merge_json(&b, &b, to_json(&latest)), to_json(&latest));
    }

    #[test]
    fn untouched_latest_takes_the_edit(before in counters(), after in counters()) {
        let b = to_json(&before);
        prop_assert_eq!(merge_json(&b, &to_json(&after), b.clone()), to_json(&after));
    }

    /// Concurrent increments on the same keys are summed.
    #[test]
    fn counter_deltas_add_up(
        before in counters(),
        ours in prop::collection::vec(-1000i64..1000, 1..8),
        theirs in prop::collection::vec(-1000i64..1000, 1..8),
    ) {
        let after = shifted(&before, &ours);
        let latest = shifted(&before, &theirs);
        let merged = merge_json(&to_json(&before), &to_json(&after), to_json(&latest));

        let combined = shifted(&after, &theirs);
        prop_assert_eq!(merged, to_json(&combined));
    }
}
