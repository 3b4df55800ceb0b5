//! Fault injection: two independent Bernoulli gates (loss, corruption)
//! selected by a debug-option code that picks which direction each gate
//! applies to. Mirrors `packet_corrupted`/`packet_lost` from the protocol
//! this crate is descended from, kept seedable for reproducible tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};

/// Which segments a debug option gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugOption {
    /// No injection.
    None,
    /// Corrupt reverse-direction (ACK) segments.
    CorruptAck,
    /// Corrupt forward-direction (data) segments.
    CorruptData,
    /// Drop reverse-direction (ACK) segments.
    DropAck,
    /// Drop forward-direction (data) segments.
    DropData,
}

impl DebugOption {
    pub fn from_code(code: u8) -> Self {
        match code {
            2 => DebugOption::CorruptAck,
            3 => DebugOption::CorruptData,
            4 => DebugOption::DropAck,
            5 => DebugOption::DropData,
            _ => DebugOption::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ack,
    Data,
}

#[derive(Clone)]
pub struct FaultInjector {
    option: DebugOption,
    loss_pct: u8,
    corruption_pct: u8,
    rng: Arc<Mutex<StdRng>>,
}

impl FaultInjector {
    pub fn new(option: DebugOption, loss_pct: u8, corruption_pct: u8) -> Self {
        Self::seeded(option, loss_pct, corruption_pct, rand::thread_rng().gen())
    }

    /// Seedable constructor for deterministic tests.
    pub fn seeded(option: DebugOption, loss_pct: u8, corruption_pct: u8, seed: u64) -> Self {
        FaultInjector {
            option,
            loss_pct: loss_pct.min(100),
            corruption_pct: corruption_pct.min(100),
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    fn bernoulli(&self, pct: u8) -> bool {
        if pct == 0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap();
        pct as u32 >= rng.gen_range(1..=100)
    }

    /// Returns true if a segment about to be sent in `dir` should be
    /// silently dropped (the caller skips the socket `send` entirely).
    pub fn should_drop(&self, dir: Direction) -> bool {
        let gated = matches!(
            (self.option, dir),
            (DebugOption::DropAck, Direction::Ack) | (DebugOption::DropData, Direction::Data)
        );
        gated && self.bernoulli(self.loss_pct)
    }

    /// Returns true if a segment received/verified in `dir` should be
    /// treated as if its checksum failed.
    pub fn should_corrupt(&self, dir: Direction) -> bool {
        let gated = matches!(
            (self.option, dir),
            (DebugOption::CorruptAck, Direction::Ack) | (DebugOption::CorruptData, Direction::Data)
        );
        gated && self.bernoulli(self.corruption_pct)
    }
}
