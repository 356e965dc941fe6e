//! Control-flow complexity of a process model, computed from its seed.
//!
//! Because the seed is the full flattened record of every structural
//! element, the metric is a pure function of the token stream and never
//! needs the graph itself.

use crate::generator::seed::TOKEN_SEPARATOR;

/// Score a seed string: +2 per exclusive branch, +1 per parallel branch,
/// +2 per loop, +0 per task. Branching and looping weigh more than
/// straight-line tasks, mirroring the usual control-flow-complexity metric.
pub fn cfc(seed: &str) -> u32 {
    seed.split(TOKEN_SEPARATOR)
        .map(|token| match token.chars().next() {
            Some('x') => 2,
            Some('p') => 1,
            Some('l') => 2,
            _ => 0,
        })
        .sum()
}
