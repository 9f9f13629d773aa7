/// Arguments passed to the daemon executable to dump its state
pub const STATUS_ARGS: &[&str] = &["status", "--json"];

/// Daemon executable locations
pub const DAEMON_CLI_PATH: &str = "/usr/local/bin/tailscale";
pub const DAEMON_APP_PATH: &str = "/Applications/Tailscale.app/Contents/MacOS/Tailscale";

/// TCP probe utility
pub const PROBE_PROGRAM: &str = "/usr/bin/nc";

/// Suffixes netcat writes to stderr in verbose zero-I/O mode
pub const PROBE_SUCCEEDED: &str = "succeeded!\n";
pub const PROBE_REFUSED: &str = "refused\n";
pub const PROBE_TIMED_OUT: &str = "Operation timed out\n";
