//! On-demand call stack capture.
//!
//! Not used by the echo path; reachable only through `--stack-probe`.

use std::backtrace::Backtrace;
use tracing::debug;

/// Recurse `depth` frames, then capture the current call stack as text.
pub fn probe(depth: usize) -> String {
    descend(1, depth)
}

#[inline(never)]
fn descend(level: usize, depth: usize) -> String {
    if level > depth {
        let trace = Backtrace::force_capture().to_string();
        debug!(depth, "trace:\n{}", trace);
        trace
    } else {
        descend(level + 1, depth)
    }
}
