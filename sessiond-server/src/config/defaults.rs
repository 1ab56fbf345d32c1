//! Default configuration values
//!
//! Written out by `sessiond --print-config` as a starting point.

/// Default configuration as TOML
pub const DEFAULT_CONFIG_TOML: &str = r##"
# sessiond configuration

[daemon]
# socket_path = "/run/user/1000/sessiond/sessiond.sock"
idle_timeout = "30m"
check_protocol_version = true
snapshot_interval_ms = 2000
# state_dir = "~/.local/state/sessiond"

[buffer]
max_bytes = 524288

[transcript]
enabled = true
# dir = "~/.local/share/sessiond/terminal_logs"
max_bytes = 2097152
trim_threshold = 4194304
tail_bytes = 262144

[record]
enabled = false
# dir = "~/.local/share/sessiond/terminal_records"

[terminal]
history_lines = 5000
cols = 80
rows = 24

[stream]
initial_credit = 262144
credit_timeout_ms = 30000
bootstrap_chunk_size = 32768
queue_depth = 64

[logging]
protocol_log = false
# protocol_log_dir = "~/.local/state/sessiond/log"
"##;
