//! Credit-based flow control for outbound data traffic.
//!
//! Each data-bearing message costs one credit; the peer replenishes the
//! ledger with CREDIT_UPDATE messages. Sends exceeding available credit
//! queue in FIFO order and drain as credit arrives. Control traffic is
//! never gated.

use std::collections::VecDeque;

use netsio_protocol::Message;

/// Credit assumed before the peer's first CREDIT_UPDATE arrives
pub const INITIAL_CREDIT: u32 = 3;

#[derive(Debug)]
pub struct CreditLedger {
    available: u32,
    pending: VecDeque<Message>,
}

impl CreditLedger {
    pub fn new() -> Self {
        CreditLedger {
            available: INITIAL_CREDIT,
            pending: VecDeque::new(),
        }
    }

    pub fn available(&self) -> u32 {
        self.available
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Data queued but no credit left to move it
    pub fn blocked(&self) -> bool {
        self.available == 0 && !self.pending.is_empty()
    }

    /// Queue a data message for sending
    pub fn enqueue(&mut self, msg: Message) {
        debug_assert!(msg.is_data());
        self.pending.push_back(msg);
    }

    /// Take every queued message the current credit allows, consuming one
    /// credit per message
    pub fn take_ready(&mut self) -> Vec<Message> {
        let mut ready = Vec::new();
        while self.available > 0 {
            match self.pending.pop_front() {
                Some(msg) => {
                    self.available -= 1;
                    ready.push(msg);
                }
                None => break,
            }
        }
        ready
    }

    /// Peer granted a new credit allowance (absolute, not additive)
    pub fn grant(&mut self, credits: u8) {
        self.available = u32::from(credits);
    }

    /// Forget queued traffic; used on connection teardown
    pub fn reset(&mut self) {
        self.available = INITIAL_CREDIT;
        self.pending.clear();
    }
}

impl Default for CreditLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(n: u8) -> Message {
        Message::DataByte(n)
    }

    #[test]
    fn test_split_and_queue_never_negative() {
        // Initial credit 3, attempt a 10-unit write
        let mut ledger = CreditLedger::new();
        for i in 0..10 {
            ledger.enqueue(data(i));
        }

        let first = ledger.take_ready();
        assert_eq!(first.len(), 3);
        assert_eq!(ledger.available(), 0);
        assert_eq!(ledger.pending_len(), 7);
        assert!(ledger.blocked());

        // Nothing moves without credit
        assert!(ledger.take_ready().is_empty());
        assert_eq!(ledger.available(), 0);

        ledger.grant(5);
        let second = ledger.take_ready();
        assert_eq!(second.len(), 5);
        assert_eq!(ledger.pending_len(), 2);

        ledger.grant(5);
        let third = ledger.take_ready();
        assert_eq!(third.len(), 2);
        // Leftover credit stays for the next burst
        assert_eq!(ledger.available(), 3);
        assert!(!ledger.blocked());
    }

    #[test]
    fn test_fifo_order_preserved() {
        let mut ledger = CreditLedger::new();
        for i in 0..5 {
            ledger.enqueue(data(i));
        }
        let mut sent: Vec<Message> = ledger.take_ready();
        ledger.grant(5);
        sent.extend(ledger.take_ready());
        let expected: Vec<Message> = (0..5).map(data).collect();
        assert_eq!(sent, expected);
    }

    #[test]
    fn test_reset_clears_queue() {
        let mut ledger = CreditLedger::new();
        ledger.enqueue(data(1));
        ledger.enqueue(data(2));
        let _ = ledger.take_ready();
        ledger.reset();
        assert_eq!(ledger.pending_len(), 0);
        assert_eq!(ledger.available(), INITIAL_CREDIT);
    }
}
