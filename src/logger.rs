// Level macros. A level compiles to a `log` call only when its cargo
// feature is enabled; otherwise the arguments are type-checked and dropped.

macro_rules! log_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log_trace")]
        {
            log::trace!($($arg)*);
        }
        #[cfg(not(feature = "log_trace"))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}

macro_rules! log_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log_debug")]
        {
            log::debug!($($arg)*);
        }
        #[cfg(not(feature = "log_debug"))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}

macro_rules! log_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log_info")]
        {
            log::info!($($arg)*);
        }
        #[cfg(not(feature = "log_info"))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}

macro_rules! log_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log_warn")]
        {
            log::warn!($($arg)*);
        }
        #[cfg(not(feature = "log_warn"))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}

#[allow(unused_macros)]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log_error")]
        {
            log::error!($($arg)*);
        }
        #[cfg(not(feature = "log_error"))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}
