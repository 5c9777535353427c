//! Logging macros used throughout the crate.
//!
//! With `defmt-v1` (and without `std`) these are the defmt macros. Otherwise
//! they wrap the `log` macros, sending records to the sink selected in
//! [`sink`].

#![allow(unused_macros)]

pub mod sink;

pub use sink::{set_internal_log_sink, silence_internal_logs};

#[allow(unused_imports)]
#[cfg(all(feature = "defmt-v1", not(feature = "std")))]
pub(crate) use defmt::{debug, error, info, trace, warn};

/// Wrapper macro for log::debug that uses the internal meshlink logger.
#[clippy::format_args]
#[cfg(not(all(feature = "defmt-v1", not(feature = "std"))))]
macro_rules! debug {
    (target: $target:expr, $($arg:tt)+) => ({
        log::debug!(logger: $crate::logging::sink::internal::logger(), target: $target, $($arg)+)
    });
    ($($arg:tt)+) => (log::debug!(logger: $crate::logging::sink::internal::logger(), $($arg)+))
}

/// Wrapper macro for log::error that uses the internal meshlink logger.
#[clippy::format_args]
#[cfg(not(all(feature = "defmt-v1", not(feature = "std"))))]
macro_rules! error {
    (target: $target:expr, $($arg:tt)+) => ({
        log::error!(logger: $crate::logging::sink::internal::logger(), target: $target, $($arg)+)
    });
    ($($arg:tt)+) => (log::error!(logger: $crate::logging::sink::internal::logger(), $($arg)+))
}

/// Wrapper macro for log::info that uses the internal meshlink logger.
#[clippy::format_args]
#[cfg(not(all(feature = "defmt-v1", not(feature = "std"))))]
macro_rules! info {
    (target: $target:expr, $($arg:tt)+) => ({
        log::info!(logger: $crate::logging::sink::internal::logger(), target: $target, $($arg)+)
    });
    ($($arg:tt)+) => (log::info!(logger: $crate::logging::sink::internal::logger(), $($arg)+))
}

/// Wrapper macro for log::trace that uses the internal meshlink logger.
#[clippy::format_args]
#[cfg(not(all(feature = "defmt-v1", not(feature = "std"))))]
macro_rules! trace {
    (target: $target:expr, $($arg:tt)+) => ({
        log::trace!(logger: $crate::logging::sink::internal::logger(), target: $target, $($arg)+)
    });
    ($($arg:tt)+) => (log::trace!(logger: $crate::logging::sink::internal::logger(), $($arg)+))
}

/// Wrapper macro for log::warn that uses the internal meshlink logger.
#[clippy::format_args]
#[cfg(not(all(feature = "defmt-v1", not(feature = "std"))))]
macro_rules! warni {
    (target: $target:expr, $($arg:tt)+) => ({
        log::warn!(logger: $crate::logging::sink::internal::logger(), target: $target, $($arg)+)
    });
    ($($arg:tt)+) => (log::warn!(logger: $crate::logging::sink::internal::logger(), $($arg)+))
}

#[allow(unused_imports)]
#[cfg(not(all(feature = "defmt-v1", not(feature = "std"))))]
pub(crate) use {debug, error, info, trace, warni as warn};
