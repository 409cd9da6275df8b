//! Internal logging macros. These route to `defmt` when that feature is
//! enabled (probe-based targets), to the `log` facade when `log` is, and
//! compile to nothing with neither. Only task-context code logs; nothing on
//! the tick path ever does.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "defmt")] {
        macro_rules! debug {
            ($($arg:tt)*) => { defmt::debug!($($arg)*) };
        }
        macro_rules! info {
            ($($arg:tt)*) => { defmt::info!($($arg)*) };
        }
        macro_rules! log_warn {
            ($($arg:tt)*) => { defmt::warn!($($arg)*) };
        }
    } else if #[cfg(feature = "log")] {
        macro_rules! debug {
            ($($arg:tt)*) => { log::debug!($($arg)*) };
        }
        macro_rules! info {
            ($($arg:tt)*) => { log::info!($($arg)*) };
        }
        macro_rules! log_warn {
            ($($arg:tt)*) => { log::warn!($($arg)*) };
        }
    } else {
        macro_rules! debug {
            ($($arg:tt)*) => {};
        }
        macro_rules! info {
            ($($arg:tt)*) => {};
        }
        macro_rules! log_warn {
            ($($arg:tt)*) => {};
        }
    }
}

pub(crate) use {debug, info, log_warn};
