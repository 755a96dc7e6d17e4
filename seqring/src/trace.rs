//! Tracing hooks for queue construction and teardown.
//!
//! Enable with `--features tracing`. The macros compile to nothing when the
//! feature is off, keeping the claim/publish hot paths free of
//! instrumentation in every build.
//!
//! The crate emits exactly four events, all cold: slot-array allocation
//! and release, arena map and unmap. Construction lands at `debug`,
//! teardown at `trace`, and those are the only levels re-exported; there
//! is nothing here to say at `info` or above.

/// Installs a compact subscriber for the crate's cold-path events.
///
/// Intended for tests and the bench binary. Filtering follows `RUST_LOG`
/// when set and otherwise admits everything this crate emits. Calling it
/// more than once is harmless: later calls lose the race for the global
/// subscriber and back off, so concurrently spawned test binaries can all
/// call it unconditionally.
///
/// Does nothing if the `tracing` feature is not enabled.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("seqring=trace"));

    // Four events per queue lifetime need no target or file/line noise.
    // Thread names do matter: construction happens on the spawning thread
    // while teardown runs on whichever handle drops last.
    let _ = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, trace};

#[cfg(not(feature = "tracing"))]
macro_rules! debug_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use debug_noop as debug;
#[cfg(not(feature = "tracing"))]
pub(crate) use trace_noop as trace;
