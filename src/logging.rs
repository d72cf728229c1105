//! # Logging - Colored, Filterable Diagnostics
//!
//! Tracing-based logging with ANSI severity coloring. Experiment logs read
//! as a narrative: generation and gates at INFO, "logic" diagnostics
//! (skips, wiring, schedule bookkeeping) at DEBUG, recoverable anomalies at
//! WARN, fatal conditions at ERROR. The `RUST_LOG` environment variable
//! refines the filter per module, e.g.
//! `RUST_LOG=quantum_netsim::engine=debug,quantum_netsim=info`.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

/// ANSI color escapes used to mark out experiment milestones in logs.
pub mod color {
    pub const PURPLE: &str = "\x1b[95m";
    pub const CYAN: &str = "\x1b[96m";
    pub const TEAL: &str = "\x1b[36m";
    pub const BLUE: &str = "\x1b[94m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const LIGHT_YELLOW: &str = "\x1b[93m";
    pub const RED: &str = "\x1b[91m";
    pub const BOLD: &str = "\x1b[1m";
    pub const END: &str = "\x1b[0m";
}

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize logging with the default "info" filter (overridable through
/// `RUST_LOG`). Safe to call more than once; later calls are no-ops.
pub fn init() {
    init_with("info");
}

/// Initialize logging with an explicit default filter.
pub fn init_with(default_filter: &str) {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    // A subscriber may already be installed by a test harness; that is fine.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
        init_with("debug");
    }

    #[test]
    fn color_codes_terminate() {
        let banner = format!("{}milestone{}", color::CYAN, color::END);
        assert!(banner.starts_with('\x1b'));
        assert!(banner.ends_with("\x1b[0m"));
    }
}
