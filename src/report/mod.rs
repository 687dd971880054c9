//! Plain-text rendering of persisted sessions for bug reports.

mod format;

pub use format::{format_console_logs, format_network_logs, format_report};
