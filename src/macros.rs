// src/macros.rs

//
// Crate-internal logging macros.
//
// With `logging`: forwarded to tracing under the `mom_loadgen` target, so
// subscribers can filter with `RUST_LOG=mom_loadgen=debug`.
//
// Without `logging`: errors still reach stderr. Everything else compiles to
// a `format_args!` that is never used, which keeps variables referenced only
// by log lines from tripping unused warnings.
//

#![allow(unused_macros)]

#[cfg(feature = "logging")]
mod imp {
    macro_rules! log_error {
        ($($arg:tt)*) => { tracing::error!(target: "mom_loadgen", $($arg)*) };
    }
    macro_rules! log_warn {
        ($($arg:tt)*) => { tracing::warn!(target: "mom_loadgen", $($arg)*) };
    }
    macro_rules! log_info {
        ($($arg:tt)*) => { tracing::info!(target: "mom_loadgen", $($arg)*) };
    }
    macro_rules! log_debug {
        ($($arg:tt)*) => { tracing::debug!(target: "mom_loadgen", $($arg)*) };
    }

    pub(crate) use log_debug;
    pub(crate) use log_error;
    pub(crate) use log_info;
    pub(crate) use log_warn;
}

#[cfg(not(feature = "logging"))]
mod imp {
    macro_rules! log_error {
        ($($arg:tt)*) => { eprintln!($($arg)*) };
    }
    macro_rules! log_warn {
        ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
    }
    macro_rules! log_info {
        ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
    }
    macro_rules! log_debug {
        ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
    }

    pub(crate) use log_debug;
    pub(crate) use log_error;
    pub(crate) use log_info;
    pub(crate) use log_warn;
}

pub(crate) use imp::{log_debug, log_error, log_info, log_warn};
