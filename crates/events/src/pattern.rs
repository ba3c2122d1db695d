//! Component-wise pattern matching over dotted event types.
//!
//! Patterns are split on `.`; each component must either equal the
//! corresponding event-type component literally or be the wildcard `*`.
//! Component counts must match. See spec.md §4.4 and the quantified
//! invariant in §8 (property 5).

use std::collections::HashSet;

fn components(s: &str) -> Vec<&str> {
    s.split('.').filter(|c| !c.is_empty()).collect()
}

/// True iff `pattern` matches `event_type` component-wise.
pub fn matches(event_type: &str, pattern: &str) -> bool {
    let event_parts = components(event_type);
    let pattern_parts = components(pattern);

    if event_parts.len() != pattern_parts.len() {
        return false;
    }

    event_parts
        .iter()
        .zip(pattern_parts.iter())
        .all(|(e, p)| *p == "*" || p == e)
}

/// The full set of patterns that match `event_type`: every pattern obtained
/// by replacing any subset of its components with `*`, plus the exact
/// event type itself (the all-literal subset).
///
/// For a two-component type `A.B` this is `{A.B, A.*, *.B, *.*}`; for an
/// `n`-component type it is `2^n` patterns.
pub fn matching_patterns(event_type: &str) -> HashSet<String> {
    let parts = components(event_type);
    let n = parts.len();
    let mut out = HashSet::with_capacity(1usize << n.min(20));

    for mask in 0u32..(1u32 << n) {
        let pattern = parts
            .iter()
            .enumerate()
            .map(|(i, part)| if mask & (1 << i) != 0 { "*" } else { *part })
            .collect::<Vec<_>>()
            .join(".");
        out.insert(pattern);
    }

    out
}
