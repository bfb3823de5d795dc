//! SIO subsystem for the Okto frontend: the serial bus the emulation core
//! talks to, the drive table behind it, and the NetSIO bridge that hands
//! unclaimed traffic to an external peripheral emulator.
//!
//! The [`SioSystem`] facade owns everything and is the only type the
//! frontend needs; the emulation core drives it byte by byte through
//! [`SioBus`].

pub mod activity;
pub mod arbitration;
pub mod atr;
pub mod bus;
pub mod connection;
pub mod credit;
pub mod drives;
pub mod error;
pub mod frame;
pub mod netsio;
pub mod serial_link;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::info;

pub use activity::{ActivitySink, DiskOp};
pub use bus::{BusMode, SioBus};
pub use connection::{ConnState, ConnStatus};
pub use drives::{MountSnapshot, MountState};
pub use error::{SioError, SioResult};

use activity::ActivityBridge;
use bus::NullBackend;
use drives::DriveTable;
use netsio::NetSioBackend;
use netsio_protocol::DEFAULT_NETSIO_PORT;
use serial_link::SerialBackend;

/// A panic inside a user activity sink poisons its mutex but leaves the
/// guarded data sound; every lock in the subsystem recovers the guard
/// rather than propagating the poison.
pub(crate) fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Resolvable `host:port` string; IPv6 literals need brackets for
/// `to_socket_addrs`
fn netsio_target(host: &str, port: Option<u16>) -> String {
    let port = port.unwrap_or(DEFAULT_NETSIO_PORT);
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// The whole SIO subsystem: bus, drive table, activity bridge, boot flags.
///
/// Drive mounts, the boot-config flag and the SIO patch flag live here and
/// survive backend swaps and connection rebuilds.
pub struct SioSystem {
    bus: SioBus,
    drives: Arc<Mutex<DriveTable>>,
    activity: Arc<Mutex<ActivityBridge>>,
    boot_config: Arc<AtomicBool>,
    sio_patch: Arc<AtomicBool>,
    conn_status: Option<Arc<Mutex<ConnStatus>>>,
}

impl SioSystem {
    /// A fresh system: no backend, no mounts, boot-config forced on as on
    /// a cold start
    pub fn new() -> Self {
        SioSystem {
            bus: SioBus::new(
                BusMode::Disabled,
                Box::new(NullBackend::new()),
                connection::DEFAULT_BAUD,
            ),
            drives: Arc::new(Mutex::new(DriveTable::new())),
            activity: Arc::new(Mutex::new(ActivityBridge::new())),
            boot_config: Arc::new(AtomicBool::new(true)),
            sio_patch: Arc::new(AtomicBool::new(true)),
            conn_status: None,
        }
    }

    /// Attach a real serial port as the bus backend
    pub fn configure_serial(&mut self, path: &str) {
        self.conn_status = None;
        self.bus
            .set_backend(BusMode::Serial, Box::new(SerialBackend::new(path)));
    }

    /// Attach the NetSIO bridge; connection build-up starts immediately and
    /// proceeds from `frame_tick`
    pub fn configure_netsio(&mut self, host: &str, port: Option<u16>) {
        let target = netsio_target(host, port);
        info!("NetSIO target: {}", target);
        let backend = NetSioBackend::new(
            target,
            self.drives.clone(),
            self.activity.clone(),
            self.boot_config.clone(),
            self.sio_patch.clone(),
        );
        self.conn_status = Some(backend.status_handle());
        self.bus.set_backend(BusMode::NetSio, Box::new(backend));
    }

    /// Detach whatever backend is active
    pub fn disconnect(&mut self) {
        self.conn_status = None;
        self.bus
            .set_backend(BusMode::Disabled, Box::new(NullBackend::new()));
    }

    pub fn mode(&self) -> BusMode {
        self.bus.mode()
    }

    pub fn bus_mut(&mut self) -> &mut SioBus {
        &mut self.bus
    }

    pub fn mount(&mut self, drive: u8, path: &str, read_only: bool) -> SioResult<()> {
        relock(&self.drives).mount(drive, path, read_only)
    }

    pub fn dismount(&mut self, drive: u8) -> SioResult<()> {
        relock(&self.drives).dismount(drive)
    }

    pub fn disable_drive(&mut self, drive: u8) -> SioResult<()> {
        relock(&self.drives).disable(drive)
    }

    pub fn drive_state(&self, drive: u8) -> SioResult<MountState> {
        Ok(relock(&self.drives).slot(drive)?.state())
    }

    pub fn drives_snapshot(&self) -> MountSnapshot {
        relock(&self.drives).snapshot()
    }

    /// Install (or with `None` remove) the push-style activity callback
    pub fn set_activity_sink(&mut self, sink: Option<Box<dyn ActivitySink + Send>>) {
        relock(&self.activity).set_sink(sink);
    }

    /// Pull-style activity: `(drive, op, frames remaining)` while visible
    pub fn poll_activity(&self) -> Option<(u8, DiskOp, u32)> {
        relock(&self.activity).poll()
    }

    pub fn sio_patch(&self) -> bool {
        self.sio_patch.load(Ordering::Relaxed)
    }

    pub fn set_sio_patch(&mut self, enabled: bool) {
        self.sio_patch.store(enabled, Ordering::Relaxed);
    }

    pub fn boot_config(&self) -> bool {
        self.boot_config.load(Ordering::Relaxed)
    }

    pub fn set_boot_config(&mut self, enabled: bool) {
        self.boot_config.store(enabled, Ordering::Relaxed);
    }

    /// Connection snapshot for a status indicator; `None` unless the
    /// NetSIO backend is active
    pub fn connection_status(&self) -> Option<ConnStatus> {
        self.conn_status.as_ref().map(|h| *relock(h))
    }

    /// Once per emulated frame: backend housekeeping plus activity decay
    pub fn frame_tick(&mut self) {
        self.bus.tick();
        relock(&self.activity).frame_tick();
    }

    pub fn warm_reset(&mut self) {
        self.bus.warm_reset();
    }

    /// Cold start: boot-config comes back on, the backend rebuilds
    pub fn cold_reset(&mut self) {
        self.boot_config.store(true, Ordering::Relaxed);
        self.bus.cold_reset();
    }
}

impl Default for SioSystem {
    fn default() -> Self {
        Self::new()
    }
}
