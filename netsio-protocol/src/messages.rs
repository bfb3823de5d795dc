//! Message types and encoding/decoding for the NetSIO protocol.

/// Maximum payload size for DATA_BLOCK messages
pub const MAX_DATA_BLOCK_SIZE: usize = 512;

/// Message kind constants
mod kind {
    pub const DATA_BYTE: u8 = 0x01;
    pub const DATA_BLOCK: u8 = 0x02;
    pub const DATA_BYTE_SYNC: u8 = 0x09;
    pub const COMMAND_OFF: u8 = 0x10;
    pub const COMMAND_ON: u8 = 0x11;
    pub const COMMAND_OFF_SYNC: u8 = 0x18;
    pub const MOTOR_OFF: u8 = 0x20;
    pub const MOTOR_ON: u8 = 0x21;
    pub const PROCEED_OFF: u8 = 0x30;
    pub const PROCEED_ON: u8 = 0x31;
    pub const INTERRUPT_OFF: u8 = 0x40;
    pub const INTERRUPT_ON: u8 = 0x41;
    pub const SPEED_CHANGE: u8 = 0x80;
    pub const SYNC_RESPONSE: u8 = 0x81;
    pub const BUS_IDLE: u8 = 0x88;
    pub const DEVICE_DISCONNECT: u8 = 0xC0;
    pub const DEVICE_CONNECT: u8 = 0xC1;
    pub const PING_REQUEST: u8 = 0xC2;
    pub const PING_RESPONSE: u8 = 0xC3;
    pub const ALIVE_REQUEST: u8 = 0xC4;
    pub const ALIVE_RESPONSE: u8 = 0xC5;
    pub const CREDIT_STATUS: u8 = 0xC6;
    pub const CREDIT_UPDATE: u8 = 0xC7;
    pub const WARM_RESET: u8 = 0xFE;
    pub const COLD_RESET: u8 = 0xFF;
}

/// Protocol error types
#[derive(Debug)]
pub enum ProtocolError {
    /// I/O error during send/receive
    Io(std::io::Error),
    /// Unknown message kind received
    UnknownKind(u8),
    /// Message payload too large
    PayloadTooLarge(usize),
    /// Message shorter than its kind requires
    Truncated { kind: u8, len: usize },
    /// Empty datagram
    Empty,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Io(e) => write!(f, "I/O error: {}", e),
            ProtocolError::UnknownKind(k) => write!(f, "Unknown message kind: 0x{:02x}", k),
            ProtocolError::PayloadTooLarge(size) => write!(f, "Payload too large: {} bytes", size),
            ProtocolError::Truncated { kind, len } => {
                write!(f, "Truncated 0x{:02x} message: {} bytes", kind, len)
            }
            ProtocolError::Empty => write!(f, "Empty datagram"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Io(e)
    }
}

/// Messages exchanged with the peripheral emulator over UDP
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Single bus data byte
    DataByte(u8),

    /// Block of bus data (1-512 bytes)
    DataBlock(Vec<u8>),

    /// Data byte whose acknowledgement is deferred to a SyncResponse
    DataByteSync { byte: u8, sync: u8 },

    /// Command line deasserted
    CommandOff,

    /// Command line asserted
    CommandOn,

    /// Command line deasserted, acknowledgement deferred to a SyncResponse
    CommandOffSync { sync: u8 },

    /// Motor line off/on
    MotorOff,
    MotorOn,

    /// Proceed line off/on
    ProceedOff,
    ProceedOn,

    /// Interrupt line off/on
    InterruptOff,
    InterruptOn,

    /// Bus speed changed to the given baud rate
    SpeedChange(u32),

    /// Late acknowledgement: echoes the ack byte and tells the sender how
    /// many data bytes the peer expects next (0 when none)
    SyncResponse { sync: u8, ack: u8, size: u16 },

    /// No bus activity; lets the peer relax its polling
    BusIdle,

    /// Peer detach/attach notifications
    DeviceDisconnect,
    DeviceConnect,

    /// Handshake / diagnostic probe
    PingRequest,
    PingResponse,

    /// Keep-alive probe while connected
    AliveRequest,
    AliveResponse,

    /// Flow control: report own credit / grant credit to the peer
    CreditStatus(u8),
    CreditUpdate(u8),

    /// Reset notifications
    WarmReset,
    ColdReset,
}

impl Message {
    /// Encode message to wire format (one datagram)
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let buf = match self {
            Message::DataByte(b) => vec![kind::DATA_BYTE, *b],
            Message::DataBlock(data) => {
                if data.len() > MAX_DATA_BLOCK_SIZE {
                    return Err(ProtocolError::PayloadTooLarge(data.len()));
                }
                let mut buf = Vec::with_capacity(1 + data.len());
                buf.push(kind::DATA_BLOCK);
                buf.extend(data);
                buf
            }
            Message::DataByteSync { byte, sync } => vec![kind::DATA_BYTE_SYNC, *byte, *sync],
            Message::CommandOff => vec![kind::COMMAND_OFF],
            Message::CommandOn => vec![kind::COMMAND_ON],
            Message::CommandOffSync { sync } => vec![kind::COMMAND_OFF_SYNC, *sync],
            Message::MotorOff => vec![kind::MOTOR_OFF],
            Message::MotorOn => vec![kind::MOTOR_ON],
            Message::ProceedOff => vec![kind::PROCEED_OFF],
            Message::ProceedOn => vec![kind::PROCEED_ON],
            Message::InterruptOff => vec![kind::INTERRUPT_OFF],
            Message::InterruptOn => vec![kind::INTERRUPT_ON],
            Message::SpeedChange(baud) => {
                let mut buf = vec![kind::SPEED_CHANGE];
                buf.extend(&baud.to_le_bytes());
                buf
            }
            Message::SyncResponse { sync, ack, size } => {
                let mut buf = vec![kind::SYNC_RESPONSE, *sync, *ack];
                buf.extend(&size.to_le_bytes());
                buf
            }
            Message::BusIdle => vec![kind::BUS_IDLE],
            Message::DeviceDisconnect => vec![kind::DEVICE_DISCONNECT],
            Message::DeviceConnect => vec![kind::DEVICE_CONNECT],
            Message::PingRequest => vec![kind::PING_REQUEST],
            Message::PingResponse => vec![kind::PING_RESPONSE],
            Message::AliveRequest => vec![kind::ALIVE_REQUEST],
            Message::AliveResponse => vec![kind::ALIVE_RESPONSE],
            Message::CreditStatus(n) => vec![kind::CREDIT_STATUS, *n],
            Message::CreditUpdate(n) => vec![kind::CREDIT_UPDATE, *n],
            Message::WarmReset => vec![kind::WARM_RESET],
            Message::ColdReset => vec![kind::COLD_RESET],
        };
        Ok(buf)
    }

    /// Decode a message from one datagram
    pub fn decode(data: &[u8]) -> Result<Message, ProtocolError> {
        let (&k, payload) = data.split_first().ok_or(ProtocolError::Empty)?;

        let need = |n: usize| -> Result<(), ProtocolError> {
            if payload.len() < n {
                Err(ProtocolError::Truncated {
                    kind: k,
                    len: data.len(),
                })
            } else {
                Ok(())
            }
        };

        let message = match k {
            kind::DATA_BYTE => {
                need(1)?;
                Message::DataByte(payload[0])
            }
            kind::DATA_BLOCK => {
                need(1)?;
                if payload.len() > MAX_DATA_BLOCK_SIZE {
                    return Err(ProtocolError::PayloadTooLarge(payload.len()));
                }
                Message::DataBlock(payload.to_vec())
            }
            kind::DATA_BYTE_SYNC => {
                need(2)?;
                Message::DataByteSync {
                    byte: payload[0],
                    sync: payload[1],
                }
            }
            kind::COMMAND_OFF => Message::CommandOff,
            kind::COMMAND_ON => Message::CommandOn,
            kind::COMMAND_OFF_SYNC => {
                need(1)?;
                Message::CommandOffSync { sync: payload[0] }
            }
            kind::MOTOR_OFF => Message::MotorOff,
            kind::MOTOR_ON => Message::MotorOn,
            kind::PROCEED_OFF => Message::ProceedOff,
            kind::PROCEED_ON => Message::ProceedOn,
            kind::INTERRUPT_OFF => Message::InterruptOff,
            kind::INTERRUPT_ON => Message::InterruptOn,
            kind::SPEED_CHANGE => {
                need(4)?;
                Message::SpeedChange(u32::from_le_bytes([
                    payload[0], payload[1], payload[2], payload[3],
                ]))
            }
            kind::SYNC_RESPONSE => {
                need(4)?;
                Message::SyncResponse {
                    sync: payload[0],
                    ack: payload[1],
                    size: u16::from_le_bytes([payload[2], payload[3]]),
                }
            }
            kind::BUS_IDLE => Message::BusIdle,
            kind::DEVICE_DISCONNECT => Message::DeviceDisconnect,
            kind::DEVICE_CONNECT => Message::DeviceConnect,
            kind::PING_REQUEST => Message::PingRequest,
            kind::PING_RESPONSE => Message::PingResponse,
            kind::ALIVE_REQUEST => Message::AliveRequest,
            kind::ALIVE_RESPONSE => Message::AliveResponse,
            kind::CREDIT_STATUS => {
                need(1)?;
                Message::CreditStatus(payload[0])
            }
            kind::CREDIT_UPDATE => {
                need(1)?;
                Message::CreditUpdate(payload[0])
            }
            kind::WARM_RESET => Message::WarmReset,
            kind::COLD_RESET => Message::ColdReset,
            _ => return Err(ProtocolError::UnknownKind(k)),
        };

        Ok(message)
    }

    /// Whether this message carries bus data and therefore costs a
    /// flow-control credit to send
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            Message::DataByte(_) | Message::DataBlock(_) | Message::DataByteSync { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) {
        let encoded = msg.encode().unwrap();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_encode_decode_data() {
        round_trip(Message::DataByte(0x41));
        round_trip(Message::DataBlock(vec![0x31, 0x53, 0x00, 0x00, 0x84]));
        round_trip(Message::DataByteSync {
            byte: 0x9B,
            sync: 7,
        });
    }

    #[test]
    fn test_encode_decode_signals() {
        round_trip(Message::CommandOn);
        round_trip(Message::CommandOff);
        round_trip(Message::CommandOffSync { sync: 3 });
        round_trip(Message::MotorOn);
        round_trip(Message::ProceedOff);
        round_trip(Message::InterruptOn);
        round_trip(Message::BusIdle);
    }

    #[test]
    fn test_encode_decode_management() {
        round_trip(Message::DeviceConnect);
        round_trip(Message::DeviceDisconnect);
        round_trip(Message::PingRequest);
        round_trip(Message::PingResponse);
        round_trip(Message::AliveRequest);
        round_trip(Message::AliveResponse);
        round_trip(Message::CreditStatus(0));
        round_trip(Message::CreditUpdate(5));
        round_trip(Message::WarmReset);
        round_trip(Message::ColdReset);
    }

    #[test]
    fn test_wire_format_speed_change() {
        // 19200 baud = 0x4B00 little-endian
        let encoded = Message::SpeedChange(19200).encode().unwrap();
        assert_eq!(encoded, vec![0x80, 0x00, 0x4B, 0x00, 0x00]);
    }

    #[test]
    fn test_wire_format_sync_response() {
        let encoded = Message::SyncResponse {
            sync: 2,
            ack: 0x41,
            size: 128,
        }
        .encode()
        .unwrap();
        assert_eq!(encoded, vec![0x81, 0x02, 0x41, 0x80, 0x00]);
    }

    #[test]
    fn test_block_too_large() {
        let msg = Message::DataBlock(vec![0; MAX_DATA_BLOCK_SIZE + 1]);
        assert!(matches!(
            msg.encode(),
            Err(ProtocolError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(Message::decode(&[]), Err(ProtocolError::Empty)));
        assert!(matches!(
            Message::decode(&[0x7E]),
            Err(ProtocolError::UnknownKind(0x7E))
        ));
        assert!(matches!(
            Message::decode(&[0x80, 0x00]),
            Err(ProtocolError::Truncated { kind: 0x80, .. })
        ));
        assert!(matches!(
            Message::decode(&[0x01]),
            Err(ProtocolError::Truncated { kind: 0x01, .. })
        ));
    }

    #[test]
    fn test_is_data() {
        assert!(Message::DataByte(0).is_data());
        assert!(Message::DataBlock(vec![1]).is_data());
        assert!(Message::DataByteSync { byte: 0, sync: 0 }.is_data());
        assert!(!Message::CommandOn.is_data());
        assert!(!Message::PingRequest.is_data());
    }
}
