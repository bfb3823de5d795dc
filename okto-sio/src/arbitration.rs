//! Local/remote arbitration: decides, per command frame, whether a local
//! disk image or the remote peripheral emulator serves the request.
//!
//! The decision is a pure function of two read-only views: a mount-state
//! snapshot taken when the command frame completes, and the connection
//! state. A mount landing later in the same transaction affects only the
//! next frame.

use crate::connection::ConnState;
use crate::drives::{MountSnapshot, MountState};
use crate::frame::CommandFrame;

/// Where a command frame is served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Served from the local drive table, bypassing the transport entirely
    Local(u8),
    /// Forwarded to the peripheral emulator
    Remote,
    /// Unaddressed or unserviceable; no device answers (silent no-op)
    Ignore,
}

/// Whether the link can carry delegated traffic. Reconnecting still holds
/// an open channel during the diagnostic-ping phase, so frames keep
/// flowing while liveness is probed.
fn link_usable(conn: ConnState) -> bool {
    matches!(conn, ConnState::Connected | ConnState::Reconnecting)
}

/// Route a completed command frame.
///
/// Local always wins over remote, even mid-reconnect; local requests never
/// consult network state.
pub fn route_frame(frame: &CommandFrame, mounts: &MountSnapshot, conn: ConnState) -> Route {
    if !frame.is_valid() {
        // Corrupt frames get no answer, like an unaddressed bus device
        return Route::Ignore;
    }

    match frame.drive_slot() {
        Some(slot) => match mounts.state(slot) {
            MountState::MountedReadOnly | MountState::MountedReadWrite => Route::Local(slot),
            MountState::Off => Route::Ignore,
            MountState::Empty => {
                if link_usable(conn) {
                    Route::Remote
                } else {
                    Route::Ignore
                }
            }
        },
        // Non-disk device ids (printers, network adapters) only exist on
        // the remote side
        None => {
            if link_usable(conn) {
                Route::Remote
            } else {
                Route::Ignore
            }
        }
    }
}
