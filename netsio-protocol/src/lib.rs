//! # NetSIO Protocol
//!
//! The wire protocol used to attach an external peripheral emulator (floppy
//! drives, printers, network adapters) to the emulated serial bus over UDP.
//!
//! ## Wire Format
//!
//! One message per datagram. The first byte selects the kind; most messages
//! are 1-5 bytes, data blocks carry up to 512 payload bytes.
//!
//! | Kind | Name | Payload |
//! |------|------------------|---------------------------------|
//! | 0x01 | DATA_BYTE        | byte |
//! | 0x02 | DATA_BLOCK       | 1-512 bytes |
//! | 0x09 | DATA_BYTE_SYNC   | byte, sync# |
//! | 0x10 | COMMAND_OFF      | empty |
//! | 0x11 | COMMAND_ON       | empty |
//! | 0x18 | COMMAND_OFF_SYNC | sync# |
//! | 0x20 | MOTOR_OFF        | empty |
//! | 0x21 | MOTOR_ON         | empty |
//! | 0x30 | PROCEED_OFF      | empty |
//! | 0x31 | PROCEED_ON       | empty |
//! | 0x40 | INTERRUPT_OFF    | empty |
//! | 0x41 | INTERRUPT_ON     | empty |
//! | 0x80 | SPEED_CHANGE     | baud:u32-LE |
//! | 0x81 | SYNC_RESPONSE    | sync#, ack byte, size:u16-LE |
//! | 0x88 | BUS_IDLE         | empty |
//! | 0xC0 | DEVICE_DISCONNECT| empty |
//! | 0xC1 | DEVICE_CONNECT   | empty |
//! | 0xC2 | PING_REQUEST     | empty |
//! | 0xC3 | PING_RESPONSE    | empty |
//! | 0xC4 | ALIVE_REQUEST    | empty |
//! | 0xC5 | ALIVE_RESPONSE   | empty |
//! | 0xC6 | CREDIT_STATUS    | credits |
//! | 0xC7 | CREDIT_UPDATE    | credits |
//! | 0xFE | WARM_RESET       | empty |
//! | 0xFF | COLD_RESET       | empty |

mod messages;
pub mod channel;

pub use channel::{UdpChannel, DEFAULT_NETSIO_PORT};
pub use messages::{Message, ProtocolError, MAX_DATA_BLOCK_SIZE};
