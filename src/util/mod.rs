//! Small shared utilities: base64 wire helpers, graceful shutdown, and the
//! bounded side channel used by fire-and-forget subsystems.

pub mod b64;
pub mod side;
pub mod sig_down;

pub use b64::{decode_b64_json, encode_b64_json};
pub use side::SideChannel;
pub use sig_down::shutdown_token;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds.
///
/// SQLite rows and protocol timestamps both use second precision.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
