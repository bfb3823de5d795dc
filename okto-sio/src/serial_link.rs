//! Direct-serial bus backend: passes bytes through a real serial port,
//! with the command and motor lines mapped onto RTS and DTR.

use std::io::{Read, Write};
use std::time::Duration;

use log::{info, warn};
use serialport::SerialPort;

use crate::bus::SioBackend;

const READ_TIMEOUT: Duration = Duration::from_millis(1);

pub struct SerialBackend {
    path: String,
    baud: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialBackend {
    pub fn new(path: &str) -> Self {
        SerialBackend {
            path: path.to_string(),
            baud: crate::connection::DEFAULT_BAUD,
            port: None,
        }
    }
}

impl SioBackend for SerialBackend {
    fn start(&mut self, baud: u32) {
        self.baud = baud;
        match serialport::new(&self.path, baud)
            .timeout(READ_TIMEOUT)
            .open()
        {
            Ok(port) => {
                info!("opened serial port {} at {} baud", self.path, baud);
                self.port = Some(port);
            }
            Err(e) => {
                warn!("cannot open serial port {}: {}", self.path, e);
                self.port = None;
            }
        }
    }

    fn stop(&mut self) {
        self.port = None;
    }

    fn put_byte(&mut self, byte: u8) {
        if let Some(port) = &mut self.port {
            if let Err(e) = port.write_all(&[byte]) {
                warn!("serial write failed: {}", e);
            }
        }
    }

    fn get_byte(&mut self) -> Option<u8> {
        let port = self.port.as_mut()?;
        let mut buf = [0u8; 1];
        match port.read(&mut buf) {
            Ok(1) => Some(buf[0]),
            Ok(_) => None,
            Err(ref e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                None
            }
            Err(e) => {
                warn!("serial read failed: {}", e);
                None
            }
        }
    }

    fn set_command_line(&mut self, asserted: bool) {
        if let Some(port) = &mut self.port {
            if let Err(e) = port.write_request_to_send(asserted) {
                warn!("cannot drive command line: {}", e);
            }
        }
    }

    fn set_motor_line(&mut self, on: bool) {
        if let Some(port) = &mut self.port {
            if let Err(e) = port.write_data_terminal_ready(on) {
                warn!("cannot drive motor line: {}", e);
            }
        }
    }

    fn baud(&self) -> u32 {
        self.baud
    }

    fn set_baud(&mut self, baud: u32) {
        self.baud = baud;
        if let Some(port) = &mut self.port {
            if let Err(e) = port.set_baud_rate(baud) {
                warn!("cannot change baud rate: {}", e);
            }
        }
    }

    fn tick(&mut self) {}

    fn warm_reset(&mut self) {}

    // No transport state beyond the port itself
    fn cold_reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inert_without_port() {
        // Opening a nonexistent device must leave a usable, silent backend
        let mut backend = SerialBackend::new("/dev/nonexistent-okto-test");
        backend.start(19200);
        backend.put_byte(0x55);
        assert_eq!(backend.get_byte(), None);
        assert_eq!(backend.baud(), 19200);
        backend.set_baud(57600);
        assert_eq!(backend.baud(), 57600);
    }
}
