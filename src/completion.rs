//! Bounded-wait completion signal for the transfer engines.
//!
//! A caller thread arms the completion, starts a transfer and spins until the
//! interrupt handler signals it or the deadline passes. The handler side never
//! blocks.
//!
//! Layout of the state word: `[status(24 bits) | phase(8 bits)]`, so the
//! status and the `Done` phase become visible in a single store.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::hw::TransferStatus;

/// Phase of a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Nothing armed.
    Idle = 0,
    /// Transfer started, waiting for the interrupt.
    Pending = 1,
    /// Interrupt delivered a status.
    Done = 2,
}

/// One-shot completion with a transfer status payload.
pub struct Completion {
    word: AtomicU32,
    waiters: AtomicUsize,
}

impl Completion {
    const PHASE_MASK: u32 = 0xff;
    const STATUS_SHIFT: u32 = 8;

    /// Creates an idle completion.
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(Phase::Idle as u32),
            waiters: AtomicUsize::new(0),
        }
    }

    /// Current phase.
    #[inline]
    pub fn phase(&self) -> Phase {
        match self.word.load(Ordering::Acquire) & Self::PHASE_MASK {
            1 => Phase::Pending,
            2 => Phase::Done,
            _ => Phase::Idle,
        }
    }

    /// Checks whether a transfer is in flight.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.phase() == Phase::Pending
    }

    /// Checks whether a status is waiting to be taken.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.phase() == Phase::Done
    }

    /// Arms the completion before starting a transfer.
    pub fn arm(&self) {
        self.word.store(Phase::Pending as u32, Ordering::Release);
    }

    /// Drops any armed or delivered state.
    pub fn reset(&self) {
        self.word.store(Phase::Idle as u32, Ordering::Release);
    }

    /// Delivers a status. Called from the interrupt handler.
    pub fn complete(&self, status: TransferStatus) {
        let word = (status.bits() << Self::STATUS_SHIFT) | Phase::Done as u32;
        self.word.store(word, Ordering::Release);
    }

    /// Takes a delivered status, returning the completion to `Idle`.
    pub fn take(&self) -> Option<TransferStatus> {
        let word = self.word.load(Ordering::Acquire);
        if word & Self::PHASE_MASK != Phase::Done as u32 {
            return None;
        }
        match self.word.compare_exchange(
            word,
            Phase::Idle as u32,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Some(TransferStatus::from_bits(word >> Self::STATUS_SHIFT)),
            Err(_) => None,
        }
    }

    /// Spins until a status arrives or `timeout_ms` elapses on `now_ms`.
    ///
    /// Returns `None` on timeout; the completion stays `Pending` so a late
    /// interrupt is absorbed by the next [`Completion::arm`].
    pub fn wait<F>(&self, now_ms: F, timeout_ms: u64) -> Option<TransferStatus>
    where
        F: Fn() -> u64,
    {
        if let Some(status) = self.take() {
            return Some(status);
        }

        self.waiters.fetch_add(1, Ordering::AcqRel);
        let deadline = now_ms().saturating_add(timeout_ms);

        let result = loop {
            if let Some(status) = self.take() {
                break Some(status);
            }
            if now_ms() >= deadline {
                break None;
            }
            for _ in 0..100 {
                core::hint::spin_loop();
            }
        };

        self.waiters.fetch_sub(1, Ordering::AcqRel);
        result
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Completion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Completion")
            .field("phase", &self.phase())
            .field("waiters", &self.waiters.load(Ordering::Relaxed))
            .finish()
    }
}
