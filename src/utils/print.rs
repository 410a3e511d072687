//! Helper macros for logging (console printing).
//!
//! Every replikv log line is tagged with the identity of the endpoint that
//! emitted it: a replica ID, a client ID, or a subsystem name. The tag is
//! printed in angle brackets ahead of the message, and the five per-level
//! macros all funnel through `pf_log!`.

/// Log a message at the given level, tagged with the endpoint's identity.
///
/// Example:
/// ```ignore
/// pf_log!(log::Level::Info, self.id; "accepted new client {}", id);
/// ```
#[macro_export]
macro_rules! pf_log {
    ($level:expr, $prefix:expr; $($fmt_arg:tt)*) => {
        log::log!($level, "<{}> {}", $prefix, format_args!($($fmt_arg)*))
    };
}

/// Log TRACE message tagged with the endpoint's identity.
///
/// Example:
/// ```ignore
/// pf_trace!(self.id; "read reply from {} ts={}", replica, ts);
/// ```
#[macro_export]
macro_rules! pf_trace {
    ($prefix:expr; $($fmt_arg:tt)*) => {
        $crate::pf_log!(log::Level::Trace, $prefix; $($fmt_arg)*)
    };
}

/// Log DEBUG message tagged with the endpoint's identity.
///
/// Example:
/// ```ignore
/// pf_debug!(self.id; "write '{}' deadline exceeded", key);
/// ```
#[macro_export]
macro_rules! pf_debug {
    ($prefix:expr; $($fmt_arg:tt)*) => {
        $crate::pf_log!(log::Level::Debug, $prefix; $($fmt_arg)*)
    };
}

/// Log INFO message tagged with the endpoint's identity.
///
/// Example:
/// ```ignore
/// pf_info!(self.id; "api listener bound to '{}'", api_addr);
/// ```
#[macro_export]
macro_rules! pf_info {
    ($prefix:expr; $($fmt_arg:tt)*) => {
        $crate::pf_log!(log::Level::Info, $prefix; $($fmt_arg)*)
    };
}

/// Log WARN message tagged with the endpoint's identity.
///
/// Example:
/// ```ignore
/// pf_warn!(self.id; "duplicate client ID listened: {}", id);
/// ```
#[macro_export]
macro_rules! pf_warn {
    ($prefix:expr; $($fmt_arg:tt)*) => {
        $crate::pf_log!(log::Level::Warn, $prefix; $($fmt_arg)*)
    };
}

/// Log ERROR message tagged with the endpoint's identity.
///
/// Example:
/// ```ignore
/// pf_error!(self.id; "error handling req: {}", e);
/// ```
#[macro_export]
macro_rules! pf_error {
    ($prefix:expr; $($fmt_arg:tt)*) => {
        $crate::pf_log!(log::Level::Error, $prefix; $($fmt_arg)*)
    };
}

/// Log an error message tagged with the endpoint's identity, then return a
/// `ReplikvError` carrying the same tagged string.
///
/// Example:
/// ```ignore
/// return logged_err!(self.id; "client not connected");
/// ```
#[macro_export]
macro_rules! logged_err {
    ($prefix:expr; $($fmt_arg:tt)*) => {{
        let msg = format!("<{}> {}", $prefix, format_args!($($fmt_arg)*));
        log::error!("{}", msg);
        Err($crate::ReplikvError(msg))
    }};
}

#[cfg(test)]
mod print_tests {
    use crate::utils::ReplikvError;

    #[test]
    fn tagged_error_no_args() {
        assert_eq!(
            logged_err!(0; "req channel has been closed"),
            Err::<(), ReplikvError>(ReplikvError(
                "<0> req channel has been closed".into()
            ))
        );
        assert_eq!(
            logged_err!("config"; "no servers configured"),
            Err::<(), ReplikvError>(ReplikvError(
                "<config> no servers configured".into()
            ))
        );
    }

    #[test]
    fn tagged_error_with_args() {
        assert_eq!(
            logged_err!(7; "got only {} of {} acks", 1, 2),
            Err::<(), ReplikvError>(ReplikvError(
                "<7> got only 1 of 2 acks".into()
            ))
        );
    }
}
