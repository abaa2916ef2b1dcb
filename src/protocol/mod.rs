//! Wire protocol between the CLI and the daemon: JSON-RPC 2.0 over a Unix
//! socket, one JSON object per line.

mod messages;
mod rpc;

pub use messages::*;
pub use rpc::*;

use std::path::PathBuf;

/// Get the socket path for the daemon.
///
/// Uses `$XDG_RUNTIME_DIR/inkraft.sock` when set.
/// Falls back to `/tmp/inkraft-$UID.sock`.
pub fn socket_path() -> PathBuf {
    if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("inkraft.sock");
    }

    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/inkraft-{}.sock", uid))
}
