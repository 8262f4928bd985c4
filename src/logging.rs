//! Logging macros
//!
//! The library logs through `log_info!`, `log_warn!`, `log_error!` and
//! `log_debug!` so the same call sites work on every target:
//! - `defmt` feature: forwarded to `defmt` (the firmware ships frames over
//!   `esp-println`)
//! - host unit tests: printed to stdout
//! - anything else: compiled out
//!
//! Format strings must stay within the subset both `defmt` and `core::fmt`
//! understand (`{}` and `{:?}`).

cfg_if::cfg_if! {
    if #[cfg(feature = "defmt")] {
        #[macro_export]
        macro_rules! log_info {
            ($($arg:tt)*) => { ::defmt::info!($($arg)*) };
        }

        #[macro_export]
        macro_rules! log_warn {
            ($($arg:tt)*) => { ::defmt::warn!($($arg)*) };
        }

        #[macro_export]
        macro_rules! log_error {
            ($($arg:tt)*) => { ::defmt::error!($($arg)*) };
        }

        #[macro_export]
        macro_rules! log_debug {
            ($($arg:tt)*) => { ::defmt::debug!($($arg)*) };
        }
    } else if #[cfg(test)] {
        #[macro_export]
        macro_rules! log_info {
            ($($arg:tt)*) => { println!("[INFO] {}", format!($($arg)*)) };
        }

        #[macro_export]
        macro_rules! log_warn {
            ($($arg:tt)*) => { println!("[WARN] {}", format!($($arg)*)) };
        }

        #[macro_export]
        macro_rules! log_error {
            ($($arg:tt)*) => { eprintln!("[ERROR] {}", format!($($arg)*)) };
        }

        #[macro_export]
        macro_rules! log_debug {
            ($($arg:tt)*) => { println!("[DEBUG] {}", format!($($arg)*)) };
        }
    } else {
        #[macro_export]
        macro_rules! log_info {
            ($($arg:tt)*) => {{ let _ = ::core::format_args!($($arg)*); }};
        }

        #[macro_export]
        macro_rules! log_warn {
            ($($arg:tt)*) => {{ let _ = ::core::format_args!($($arg)*); }};
        }

        #[macro_export]
        macro_rules! log_error {
            ($($arg:tt)*) => {{ let _ = ::core::format_args!($($arg)*); }};
        }

        #[macro_export]
        macro_rules! log_debug {
            ($($arg:tt)*) => {{ let _ = ::core::format_args!($($arg)*); }};
        }
    }
}
