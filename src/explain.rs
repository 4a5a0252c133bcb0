//! `-d explain` support: messages describing why something is considered
//! out of date.
//!
//! Explanations are tracing debug events with the target "explain", so they
//! can be enabled on their own with a filter like `explain=debug`.

/// Emit an explanation.  Takes format!-style arguments.
macro_rules! explain {
    ($($arg:tt)*) => {
        tracing::debug!(target: "explain", $($arg)*)
    };
}
pub(crate) use explain;
