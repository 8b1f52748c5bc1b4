use tracing::trace;

// Trace-backed counters; the prometheus recorder installed in `main` only
// renders what a recorder-aware layer forwards.

pub fn inc_requests(route: &'static str) {
    trace!(target: "market.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target: "market.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn fee_lookup(outcome: &'static str) {
    trace!(target: "market.metrics", outcome = outcome, "fee_lookup_total_inc");
}
