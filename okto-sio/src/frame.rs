//! SIO command frames: the 5-byte addressing header preceding every bus
//! transaction.

/// Device id of drive 1; drives 1-8 occupy a contiguous id range
pub const DEVICE_DISK_FIRST: u8 = 0x31;

/// Number of drive slots on the bus
pub const DRIVE_COUNT: u8 = 8;

/// Bus acknowledgement bytes
pub const BYTE_ACK: u8 = 0x41;
pub const BYTE_NAK: u8 = 0x4E;
pub const BYTE_COMPLETE: u8 = 0x43;
pub const BYTE_ERROR: u8 = 0x45;

/// Disk command bytes
pub const CMD_FORMAT: u8 = 0x21;
pub const CMD_PUT: u8 = 0x50;
pub const CMD_READ: u8 = 0x52;
pub const CMD_STATUS: u8 = 0x53;
pub const CMD_WRITE: u8 = 0x57;

/// Length of a command frame on the wire
pub const FRAME_LEN: usize = 5;

/// Additive checksum with carry wrap-around, as computed by the bus ROM
pub fn sio_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u16, |acc, &b| {
        let sum = acc + u16::from(b);
        (sum & 0xFF) + (sum >> 8)
    }) as u8
}

/// One command frame; transient, one per bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    pub device: u8,
    pub command: u8,
    pub aux1: u8,
    pub aux2: u8,
    pub checksum: u8,
}

impl CommandFrame {
    pub fn from_bytes(bytes: [u8; FRAME_LEN]) -> Self {
        CommandFrame {
            device: bytes[0],
            command: bytes[1],
            aux1: bytes[2],
            aux2: bytes[3],
            checksum: bytes[4],
        }
    }

    pub fn to_bytes(self) -> [u8; FRAME_LEN] {
        [
            self.device,
            self.command,
            self.aux1,
            self.aux2,
            self.checksum,
        ]
    }

    /// Build a frame with a valid checksum
    pub fn new(device: u8, command: u8, aux1: u8, aux2: u8) -> Self {
        let checksum = sio_checksum(&[device, command, aux1, aux2]);
        CommandFrame {
            device,
            command,
            aux1,
            aux2,
            checksum,
        }
    }

    pub fn computed_checksum(&self) -> u8 {
        sio_checksum(&[self.device, self.command, self.aux1, self.aux2])
    }

    pub fn is_valid(&self) -> bool {
        self.checksum == self.computed_checksum()
    }

    /// aux1/aux2 as a little-endian word (sector number for disk commands)
    pub fn aux_word(&self) -> u16 {
        u16::from(self.aux1) | (u16::from(self.aux2) << 8)
    }

    /// Drive slot (1-8) this frame addresses, if it addresses a disk at all
    pub fn drive_slot(&self) -> Option<u8> {
        if (DEVICE_DISK_FIRST..DEVICE_DISK_FIRST + DRIVE_COUNT).contains(&self.device) {
            Some(self.device - DEVICE_DISK_FIRST + 1)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_carry_wrap() {
        // 0xFF + 0xFF = 0x1FE -> 0xFE + carry = 0xFF
        assert_eq!(sio_checksum(&[0xFF, 0xFF]), 0xFF);
        assert_eq!(sio_checksum(&[0x31, 0x53, 0x00, 0x00]), 0x84);
    }

    #[test]
    fn test_frame_validity() {
        let frame = CommandFrame::new(0x31, CMD_READ, 0x01, 0x00);
        assert!(frame.is_valid());

        let mut bad = frame;
        bad.checksum ^= 0xFF;
        assert!(!bad.is_valid());
    }

    #[test]
    fn test_drive_slot_mapping() {
        assert_eq!(CommandFrame::new(0x31, CMD_STATUS, 0, 0).drive_slot(), Some(1));
        assert_eq!(CommandFrame::new(0x38, CMD_STATUS, 0, 0).drive_slot(), Some(8));
        assert_eq!(CommandFrame::new(0x39, CMD_STATUS, 0, 0).drive_slot(), None);
        assert_eq!(CommandFrame::new(0x40, CMD_STATUS, 0, 0).drive_slot(), None);
    }

    #[test]
    fn test_aux_word() {
        let frame = CommandFrame::new(0x31, CMD_READ, 0x2C, 0x01);
        assert_eq!(frame.aux_word(), 0x012C);
    }

    #[test]
    fn test_round_trip_bytes() {
        let frame = CommandFrame::new(0x32, CMD_WRITE, 0x10, 0x00);
        assert_eq!(CommandFrame::from_bytes(frame.to_bytes()), frame);
    }
}
