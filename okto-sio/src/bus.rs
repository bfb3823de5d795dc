//! The bus abstraction layer: the single put-byte/get-byte choke point the
//! emulation core talks to, with one active backend behind it.

use log::info;

/// One serial-bus backend. Exactly one is active at a time.
pub trait SioBackend {
    fn start(&mut self, baud: u32);
    fn stop(&mut self);

    /// Core wrote a byte onto the bus
    fn put_byte(&mut self, byte: u8);

    /// Core reads the next byte off the bus, if one is pending
    fn get_byte(&mut self) -> Option<u8>;

    /// Command-line assertion framing a command frame
    fn set_command_line(&mut self, asserted: bool);

    fn set_motor_line(&mut self, on: bool);

    fn baud(&self) -> u32;
    fn set_baud(&mut self, baud: u32);

    /// Per-frame housekeeping (keep-alive bookkeeping, queue pumping)
    fn tick(&mut self);

    /// Soft restart: no transport state is reset
    fn warm_reset(&mut self);

    /// Full re-initialization, including peripheral-emulator state
    fn cold_reset(&mut self);
}

/// Inert backend used before `configure` selects a real one
pub struct NullBackend {
    baud: u32,
}

impl NullBackend {
    pub fn new() -> Self {
        NullBackend {
            baud: crate::connection::DEFAULT_BAUD,
        }
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SioBackend for NullBackend {
    fn start(&mut self, baud: u32) {
        self.baud = baud;
    }
    fn stop(&mut self) {}
    fn put_byte(&mut self, _byte: u8) {}
    fn get_byte(&mut self) -> Option<u8> {
        None
    }
    fn set_command_line(&mut self, _asserted: bool) {}
    fn set_motor_line(&mut self, _on: bool) {}
    fn baud(&self) -> u32 {
        self.baud
    }
    fn set_baud(&mut self, baud: u32) {
        self.baud = baud;
    }
    fn tick(&mut self) {}
    fn warm_reset(&mut self) {}
    fn cold_reset(&mut self) {}
}

/// Which backend serves the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMode {
    /// No peripheral attached; the bus swallows everything
    Disabled,
    /// Direct serial hardware passthrough
    Serial,
    /// NetSIO bridge to the peripheral emulator (with local arbitration)
    NetSio,
}

/// The choke point itself.
pub struct SioBus {
    mode: BusMode,
    backend: Box<dyn SioBackend + Send>,
}

impl SioBus {
    pub fn new(mode: BusMode, mut backend: Box<dyn SioBackend + Send>, baud: u32) -> Self {
        backend.start(baud);
        SioBus { mode, backend }
    }

    pub fn mode(&self) -> BusMode {
        self.mode
    }

    /// Swap backends: stop the active one, start the new one at the
    /// previously negotiated baud
    pub fn set_backend(&mut self, mode: BusMode, mut backend: Box<dyn SioBackend + Send>) {
        let baud = self.backend.baud();
        info!("switching bus backend to {:?} at {} baud", mode, baud);
        self.backend.stop();
        backend.start(baud);
        self.backend = backend;
        self.mode = mode;
    }

    pub fn put_byte(&mut self, byte: u8) {
        self.backend.put_byte(byte);
    }

    pub fn get_byte(&mut self) -> Option<u8> {
        self.backend.get_byte()
    }

    pub fn set_command_line(&mut self, asserted: bool) {
        self.backend.set_command_line(asserted);
    }

    pub fn set_motor_line(&mut self, on: bool) {
        self.backend.set_motor_line(on);
    }

    pub fn baud(&self) -> u32 {
        self.backend.baud()
    }

    pub fn set_baud(&mut self, baud: u32) {
        self.backend.set_baud(baud);
    }

    pub fn tick(&mut self) {
        self.backend.tick();
    }

    pub fn warm_reset(&mut self) {
        self.backend.warm_reset();
    }

    pub fn cold_reset(&mut self) {
        self.backend.cold_reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingBackend {
        log: Arc<Mutex<Vec<String>>>,
        name: &'static str,
        baud: u32,
    }

    impl SioBackend for RecordingBackend {
        fn start(&mut self, baud: u32) {
            self.baud = baud;
            self.log.lock().unwrap().push(format!("{} start {}", self.name, baud));
        }
        fn stop(&mut self) {
            self.log.lock().unwrap().push(format!("{} stop", self.name));
        }
        fn put_byte(&mut self, _byte: u8) {}
        fn get_byte(&mut self) -> Option<u8> {
            None
        }
        fn set_command_line(&mut self, _asserted: bool) {}
        fn set_motor_line(&mut self, _on: bool) {}
        fn baud(&self) -> u32 {
            self.baud
        }
        fn set_baud(&mut self, baud: u32) {
            self.baud = baud;
        }
        fn tick(&mut self) {}
        fn warm_reset(&mut self) {}
        fn cold_reset(&mut self) {}
    }

    #[test]
    fn test_mode_switch_preserves_negotiated_baud() {
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let first = RecordingBackend {
            log: log.clone(),
            name: "serial",
            baud: 0,
        };
        let second = RecordingBackend {
            log: log.clone(),
            name: "netsio",
            baud: 0,
        };

        let mut bus = SioBus::new(BusMode::Serial, Box::new(first), 19200);
        // Peer negotiated a faster speed
        bus.set_baud(57600);
        bus.set_backend(BusMode::NetSio, Box::new(second));

        assert_eq!(bus.mode(), BusMode::NetSio);
        assert_eq!(bus.baud(), 57600);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["serial start 19200", "serial stop", "netsio start 57600"]
        );
    }
}
