//! NetSIO bus backend: bridges the emulated serial bus to the peripheral
//! emulator over UDP, arbitrating each command frame between locally
//! mounted media and the remote peer.

use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{debug, info, trace, warn};
use netsio_protocol::Message;

use crate::activity::{ActivityBridge, DiskOp};
use crate::arbitration::{route_frame, Route};
use crate::bus::SioBackend;
use crate::connection::{ConnState, ConnStatus, Connection};
use crate::credit::CreditLedger;
use crate::drives::{DriveTable, MountState};
use crate::frame::{
    sio_checksum, CommandFrame, BYTE_ACK, BYTE_COMPLETE, BYTE_ERROR, BYTE_NAK, CMD_FORMAT,
    CMD_PUT, CMD_READ, CMD_STATUS, CMD_WRITE, FRAME_LEN,
};

/// Receive window granted to the peer on credit inquiries
const RECV_CREDITS: u8 = 4;

/// get_byte calls consumed per locally served response when the SIO patch
/// is disabled, approximating realistic drive latency
const LOCAL_PACING_TICKS: u32 = 16;

/// Per-transaction state between command frames
enum Transaction {
    Idle,
    /// Data frame for a locally mounted drive is being collected
    LocalWrite {
        slot: u8,
        sector: u16,
        expected: usize,
        buf: Vec<u8>,
    },
    /// Frame was delegated; expected_write > 0 once the peer announced how
    /// many data bytes it wants
    Remote {
        write_buf: Vec<u8>,
        expected_write: usize,
    },
}

pub struct NetSioBackend {
    conn: Connection,
    credit: CreditLedger,
    drives: Arc<Mutex<DriveTable>>,
    activity: Arc<Mutex<ActivityBridge>>,
    boot_config: Arc<AtomicBool>,
    sio_patch: Arc<AtomicBool>,
    command_line: bool,
    frame_buf: Vec<u8>,
    rx: VecDeque<u8>,
    txn: Transaction,
    sync_counter: u8,
    pending_sync: Option<u8>,
    remote_frame: Option<CommandFrame>,
    proceed: bool,
    interrupt: bool,
    started: bool,
    credit_solicited: bool,
    delay: u32,
}

impl NetSioBackend {
    pub fn new(
        target: String,
        drives: Arc<Mutex<DriveTable>>,
        activity: Arc<Mutex<ActivityBridge>>,
        boot_config: Arc<AtomicBool>,
        sio_patch: Arc<AtomicBool>,
    ) -> Self {
        NetSioBackend {
            conn: Connection::new(target),
            credit: CreditLedger::new(),
            drives,
            activity,
            boot_config,
            sio_patch,
            command_line: false,
            frame_buf: Vec::with_capacity(FRAME_LEN),
            rx: VecDeque::new(),
            txn: Transaction::Idle,
            sync_counter: 0,
            pending_sync: None,
            remote_frame: None,
            proceed: false,
            interrupt: false,
            started: false,
            credit_solicited: false,
            delay: 0,
        }
    }

    /// Shared status cell for UI snapshots
    pub fn status_handle(&self) -> Arc<Mutex<ConnStatus>> {
        self.conn.status_handle()
    }

    pub fn proceed_line(&self) -> bool {
        self.proceed
    }

    pub fn interrupt_line(&self) -> bool {
        self.interrupt
    }

    fn next_sync(&mut self) -> u8 {
        self.sync_counter = self.sync_counter.wrapping_add(1);
        self.sync_counter
    }

    /// Delegated traffic flows while Connected and through the
    /// diagnostic-ping phase, matching the routing rule
    fn link_usable(&self) -> bool {
        matches!(
            self.conn.state(),
            ConnState::Connected | ConnState::Reconnecting
        )
    }

    /// Queue a data message behind the credit ledger and move whatever the
    /// current credit allows
    fn send_data(&mut self, msg: Message) {
        self.credit.enqueue(msg);
        self.flush_credit();
    }

    fn flush_credit(&mut self) {
        for msg in self.credit.take_ready() {
            self.conn.send(&msg);
        }
        if self.credit.blocked() && !self.credit_solicited {
            // Solicit replenishment once; the queue drains on CREDIT_UPDATE
            self.conn.send(&Message::CreditStatus(0));
            self.credit_solicited = true;
        }
    }

    fn record(&self, slot: u8, op: DiskOp) {
        // A panicking sink poisons the lock but leaves the bridge sound;
        // keep reporting activity
        crate::relock(&self.activity).record(slot, op);
    }

    fn disk_op(command: u8) -> Option<DiskOp> {
        match command {
            CMD_READ => Some(DiskOp::Read),
            CMD_WRITE | CMD_PUT | CMD_FORMAT => Some(DiskOp::Write),
            _ => None,
        }
    }

    /// Route and begin serving a completed command frame
    fn handle_frame(&mut self) {
        if self.frame_buf.len() != FRAME_LEN {
            if !self.frame_buf.is_empty() {
                debug!("dropping malformed command frame ({} bytes)", self.frame_buf.len());
            }
            return;
        }
        let mut bytes = [0u8; FRAME_LEN];
        bytes.copy_from_slice(&self.frame_buf);
        let frame = CommandFrame::from_bytes(bytes);

        // Mount state is snapshotted here; a mount landing later in the
        // transaction affects only the next frame
        let snapshot = crate::relock(&self.drives).snapshot();
        let route = route_frame(&frame, &snapshot, self.conn.state());
        trace!(
            "frame dev=0x{:02x} cmd=0x{:02x} aux={} -> {:?}",
            frame.device,
            frame.command,
            frame.aux_word(),
            route
        );

        self.txn = Transaction::Idle;
        self.pending_sync = None;
        self.remote_frame = None;

        match route {
            Route::Local(slot) => self.serve_local(frame, slot),
            Route::Remote => self.begin_remote(frame),
            Route::Ignore => {}
        }
    }

    /// Serve a frame from the local drive table; no transport traffic
    fn serve_local(&mut self, frame: CommandFrame, slot: u8) {
        if let Some(op) = Self::disk_op(frame.command) {
            self.record(slot, op);
        }

        let mut response = Vec::new();
        let mut write_txn = None;
        {
            let drives = self.drives.clone();
            let mut drives = crate::relock(&drives);
            let drive = match drives.slot_mut(slot) {
                Ok(d) => d,
                Err(_) => return,
            };
            let read_only = drive.state() == MountState::MountedReadOnly;
            let image = match drive.image_mut() {
                Some(i) => i,
                None => return,
            };

            match frame.command {
                CMD_READ => match image.read_sector(frame.aux_word()) {
                    Ok(data) => {
                        response.push(BYTE_ACK);
                        response.push(BYTE_COMPLETE);
                        response.extend(&data);
                        response.push(sio_checksum(&data));
                    }
                    Err(e) => {
                        debug!("D{}: read failed: {}", slot, e);
                        response.push(BYTE_ACK);
                        response.push(BYTE_ERROR);
                    }
                },
                CMD_STATUS => {
                    let mut status = [0u8; 4];
                    if read_only {
                        status[0] |= 0x08;
                    }
                    if image.sector_size() == 256 {
                        status[0] |= 0x20;
                    }
                    status[1] = 0xFF;
                    status[2] = 0xE0;
                    response.push(BYTE_ACK);
                    response.push(BYTE_COMPLETE);
                    response.extend(&status);
                    response.push(sio_checksum(&status));
                }
                CMD_WRITE | CMD_PUT => {
                    let sector = frame.aux_word();
                    if read_only || sector == 0 || sector > image.sector_count() {
                        response.push(BYTE_NAK);
                    } else {
                        response.push(BYTE_ACK);
                        write_txn = Some(Transaction::LocalWrite {
                            slot,
                            sector,
                            expected: image.sector_len(sector),
                            buf: Vec::new(),
                        });
                    }
                }
                CMD_FORMAT => {
                    if read_only {
                        response.push(BYTE_NAK);
                    } else {
                        match image.format() {
                            Ok(()) => {
                                let data = vec![0xFF; image.sector_len(1)];
                                response.push(BYTE_ACK);
                                response.push(BYTE_COMPLETE);
                                response.extend(&data);
                                response.push(sio_checksum(&data));
                            }
                            Err(e) => {
                                debug!("D{}: format failed: {}", slot, e);
                                response.push(BYTE_ACK);
                                response.push(BYTE_ERROR);
                            }
                        }
                    }
                }
                _ => {
                    debug!("D{}: unsupported local command 0x{:02x}", slot, frame.command);
                    response.push(BYTE_NAK);
                }
            }
        }

        if let Some(txn) = write_txn {
            self.txn = txn;
        }
        if !self.sio_patch.load(Ordering::Relaxed) {
            self.delay = LOCAL_PACING_TICKS;
        }
        self.rx.extend(response);
    }

    /// Delegate a frame to the peripheral emulator. COMMAND_ON is relayed
    /// only here, after arbitration, so locally served frames leave no
    /// network trace.
    fn begin_remote(&mut self, frame: CommandFrame) {
        if let (Some(slot), Some(op)) = (frame.drive_slot(), Self::disk_op(frame.command)) {
            self.record(slot, op);
        }
        self.conn.send(&Message::CommandOn);
        self.send_data(Message::DataBlock(frame.to_bytes().to_vec()));
        let sync = self.next_sync();
        self.pending_sync = Some(sync);
        self.conn.send(&Message::CommandOffSync { sync });
        self.remote_frame = Some(frame);
        self.txn = Transaction::Remote {
            write_buf: Vec::new(),
            expected_write: 0,
        };
    }

    /// Drain every queued datagram; called per bus transaction and per frame
    fn pump(&mut self) {
        loop {
            let msg = match self.conn.channel() {
                Some(channel) => match channel.try_recv() {
                    Ok(Some(msg)) => msg,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("receive failed: {}", e);
                        break;
                    }
                },
                None => break,
            };
            self.process_message(msg);
        }
    }

    fn process_message(&mut self, msg: Message) {
        self.conn.note_rx();
        match msg {
            Message::DataByte(byte) => self.rx.push_back(byte),
            Message::DataBlock(data) => {
                // A data block answering a drive-1 status query means the
                // config boot has delivered; stop forcing the config disk
                if let Some(frame) = self.remote_frame {
                    if frame.command == CMD_STATUS && frame.drive_slot() == Some(1) {
                        if self.boot_config.swap(false, Ordering::Relaxed) {
                            info!("boot configuration served, flag cleared");
                        }
                        self.remote_frame = None;
                    }
                }
                self.rx.extend(data);
            }
            Message::DataByteSync { byte, sync } => {
                self.rx.push_back(byte);
                self.conn.send(&Message::SyncResponse {
                    sync,
                    ack: BYTE_ACK,
                    size: 0,
                });
            }
            Message::SyncResponse { sync, ack, size } => {
                // Deferred and immediate orderings are both accepted; a
                // stale sync number is logged but the ack still counts
                match self.pending_sync.take() {
                    Some(expected) if expected == sync => {}
                    Some(expected) => {
                        debug!("sync response {} while awaiting {}", sync, expected)
                    }
                    None => debug!("unsolicited sync response {}", sync),
                }
                self.rx.push_back(ack);
                if ack == BYTE_ACK && size > 0 {
                    if let Transaction::Remote {
                        ref mut expected_write,
                        ..
                    } = self.txn
                    {
                        *expected_write = usize::from(size);
                    }
                }
            }
            Message::SpeedChange(baud) => {
                info!("peer changed bus speed to {} baud", baud);
                self.conn.set_baud(baud);
            }
            Message::ProceedOn => self.proceed = true,
            Message::ProceedOff => self.proceed = false,
            Message::InterruptOn => self.interrupt = true,
            Message::InterruptOff => self.interrupt = false,
            Message::CreditUpdate(credits) => {
                self.credit.grant(credits);
                self.credit_solicited = false;
                self.flush_credit();
            }
            Message::CreditStatus(_) => {
                self.conn.send(&Message::CreditUpdate(RECV_CREDITS));
            }
            Message::PingRequest => self.conn.send(&Message::PingResponse),
            Message::AliveRequest => self.conn.send(&Message::AliveResponse),
            // Silence-clock reset above is all these need
            Message::PingResponse | Message::AliveResponse | Message::BusIdle => {}
            Message::DeviceConnect => info!("peer announced itself"),
            Message::DeviceDisconnect => warn!("peer announced disconnect"),
            other => trace!("ignoring {:?} from peer", other),
        }
    }
}

impl SioBackend for NetSioBackend {
    fn start(&mut self, baud: u32) {
        self.conn.set_baud(baud);
        self.conn.start();
        self.started = true;
    }

    fn stop(&mut self) {
        self.conn.stop();
        self.credit.reset();
        self.rx.clear();
        self.txn = Transaction::Idle;
        self.pending_sync = None;
        self.remote_frame = None;
        self.credit_solicited = false;
        self.started = false;
    }

    fn put_byte(&mut self, byte: u8) {
        if self.command_line {
            if self.frame_buf.len() < FRAME_LEN {
                self.frame_buf.push(byte);
            } else {
                debug!("command frame overflow, dropping byte 0x{:02x}", byte);
            }
            return;
        }

        match mem::replace(&mut self.txn, Transaction::Idle) {
            Transaction::Idle => {
                // Stray data outside a tracked transaction; only the peer
                // could want it
                if self.link_usable() {
                    self.send_data(Message::DataByte(byte));
                }
            }
            Transaction::LocalWrite {
                slot,
                sector,
                expected,
                mut buf,
            } => {
                buf.push(byte);
                if buf.len() < expected + 1 {
                    self.txn = Transaction::LocalWrite {
                        slot,
                        sector,
                        expected,
                        buf,
                    };
                    return;
                }
                let (data, checksum) = buf.split_at(expected);
                if checksum[0] != sio_checksum(data) {
                    debug!("D{}: data frame checksum mismatch", slot);
                    self.rx.push_back(BYTE_NAK);
                    return;
                }
                let result = {
                    let drives = self.drives.clone();
                    let mut drives = crate::relock(&drives);
                    drives
                        .slot_mut(slot)
                        .ok()
                        .and_then(|d| d.image_mut())
                        .map(|image| image.write_sector(sector, data))
                };
                match result {
                    Some(Ok(())) => {
                        self.rx.push_back(BYTE_ACK);
                        self.rx.push_back(BYTE_COMPLETE);
                    }
                    Some(Err(e)) => {
                        warn!("D{}: write to sector {} failed: {}", slot, sector, e);
                        self.rx.push_back(BYTE_ACK);
                        self.rx.push_back(BYTE_ERROR);
                    }
                    None => self.rx.push_back(BYTE_NAK),
                }
                if !self.sio_patch.load(Ordering::Relaxed) {
                    self.delay = LOCAL_PACING_TICKS;
                }
            }
            Transaction::Remote {
                mut write_buf,
                expected_write,
            } => {
                if expected_write == 0 {
                    if self.link_usable() {
                        self.send_data(Message::DataByte(byte));
                    }
                    self.txn = Transaction::Remote {
                        write_buf,
                        expected_write,
                    };
                    return;
                }
                write_buf.push(byte);
                if write_buf.len() < expected_write {
                    self.txn = Transaction::Remote {
                        write_buf,
                        expected_write,
                    };
                    return;
                }
                // Data frame complete: bulk first, final byte carries the
                // sync so the peer can late-ack the whole frame
                let last = write_buf.pop().unwrap_or(byte);
                if !write_buf.is_empty() {
                    self.send_data(Message::DataBlock(write_buf));
                }
                let sync = self.next_sync();
                self.pending_sync = Some(sync);
                self.send_data(Message::DataByteSync { byte: last, sync });
                self.txn = Transaction::Remote {
                    write_buf: Vec::new(),
                    expected_write: 0,
                };
            }
        }
    }

    fn get_byte(&mut self) -> Option<u8> {
        if self.delay > 0 {
            self.delay -= 1;
            return None;
        }
        if self.rx.is_empty() {
            self.pump();
        }
        self.rx.pop_front()
    }

    fn set_command_line(&mut self, asserted: bool) {
        if asserted == self.command_line {
            return;
        }
        self.command_line = asserted;
        if asserted {
            self.frame_buf.clear();
            self.txn = Transaction::Idle;
        } else {
            self.handle_frame();
            self.frame_buf.clear();
        }
    }

    fn set_motor_line(&mut self, on: bool) {
        self.conn.send(if on {
            &Message::MotorOn
        } else {
            &Message::MotorOff
        });
    }

    fn baud(&self) -> u32 {
        self.conn.baud()
    }

    fn set_baud(&mut self, baud: u32) {
        self.conn.set_baud(baud);
        self.conn.send(&Message::SpeedChange(baud));
    }

    fn tick(&mut self) {
        self.conn.tick(Instant::now());
        self.pump();
        self.flush_credit();
    }

    fn warm_reset(&mut self) {
        // Soft restart: transport state deliberately untouched
        self.conn.send(&Message::WarmReset);
    }

    fn cold_reset(&mut self) {
        self.boot_config.store(true, Ordering::Relaxed);
        self.conn.send(&Message::ColdReset);
        if self.started {
            let baud = self.conn.baud();
            self.stop();
            self.start(baud);
        }
    }
}
