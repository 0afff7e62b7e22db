//! Out-of-band message transport.
//!
//! Transmit is synchronous: the caller stages the frame in a word-aligned
//! buffer, starts the hardware and waits for the tx-done interrupt with a
//! bounded wait. Receive either blocks the same way or, with the
//! `oob-rx-async` feature, is announced through an `OobReceived` event and
//! picked up without waiting.
//!
//! One sender and one receiver at a time: the busy check is a plain load
//! followed by a store, not a lock.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::Mutex;

use crate::channel::Channel;
use crate::completion::Completion;
use crate::error::{EspiError, EspiResult};
use crate::hw::{EspiHw, TransferBuf, TransferStatus};

/// Capacity of the OOB staging buffers.
pub const OOB_BUFFER_SIZE: usize = 128;

/// OOB transfer state.
pub struct OobEngine {
    timeout_ms: u64,
    tx_busy: AtomicBool,
    tx_done: Completion,
    tx_buf: Mutex<TransferBuf<OOB_BUFFER_SIZE>>,
    rx_done: Completion,
    rx_pending: AtomicBool,
    rx_len: AtomicUsize,
    rx_buf: Mutex<TransferBuf<OOB_BUFFER_SIZE>>,
}

impl OobEngine {
    /// Creates an idle engine with the given bounded wait.
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            tx_busy: AtomicBool::new(false),
            tx_done: Completion::new(),
            tx_buf: Mutex::new(TransferBuf::new()),
            rx_done: Completion::new(),
            rx_pending: AtomicBool::new(false),
            rx_len: AtomicUsize::new(0),
            rx_buf: Mutex::new(TransferBuf::new()),
        }
    }

    /// Drops in-flight state after an enable change on either direction.
    pub fn reset(&self) {
        self.tx_busy.store(false, Ordering::Release);
        self.tx_done.reset();
        self.rx_done.reset();
        self.rx_pending.store(false, Ordering::Release);
        self.rx_len.store(0, Ordering::Release);
    }

    /// Checks whether a transmit is in flight.
    pub fn is_busy(&self) -> bool {
        self.tx_busy.load(Ordering::Acquire)
    }

    /// Sends one frame and waits for the transmit to finish.
    ///
    /// # Errors
    ///
    /// - [`EspiError::InvalidArgument`]: empty frame or longer than
    ///   [`OOB_BUFFER_SIZE`]. Checked before any hardware access.
    /// - [`EspiError::NotReady`]: the host has not enabled the channel.
    /// - [`EspiError::Busy`]: another transmit is in flight.
    /// - [`EspiError::Timeout`]: no tx-done within the bounded wait.
    /// - [`EspiError::Io`]: the hardware reported an error.
    pub fn send<H: EspiHw>(&self, hw: &H, data: &[u8]) -> EspiResult {
        if data.is_empty() || data.len() > OOB_BUFFER_SIZE {
            return Err(EspiError::InvalidArgument);
        }
        if !hw.channel_enabled(Channel::OutOfBand) {
            return Err(EspiError::NotReady);
        }
        if self.tx_busy.load(Ordering::Acquire) {
            return Err(EspiError::Busy);
        }
        self.tx_busy.store(true, Ordering::Release);

        self.tx_done.arm();
        {
            let mut buf = self.tx_buf.lock();
            buf.as_mut_slice(data.len()).copy_from_slice(data);
            hw.oob_tx_start(buf.as_slice(data.len()));
        }
        trace!("oob tx: {} bytes started", data.len());

        let status = self.tx_done.wait(|| hw.now_ms(), self.timeout_ms);
        self.tx_busy.store(false, Ordering::Release);

        match status {
            None => {
                warn!("oob tx: no completion within {} ms", self.timeout_ms);
                Err(EspiError::Timeout)
            }
            Some(status) if status.is_error() => {
                warn!("oob tx: error status {:#x}", status.bits());
                Err(EspiError::Io)
            }
            Some(_) => Ok(()),
        }
    }

    /// Tx-done interrupt. Returns `false` if nobody was waiting.
    pub fn on_tx_done<H: EspiHw>(&self, hw: &H) -> bool {
        let status = hw.oob_tx_status();
        let waiting = self.tx_done.is_pending();
        self.tx_done.complete(status);
        waiting
    }

    /// Copies the latched frame into `out`.
    fn read_frame<H: EspiHw>(
        &self,
        hw: &H,
        status: TransferStatus,
        out: &mut [u8],
    ) -> EspiResult<usize> {
        if status.is_error() {
            warn!("oob rx: error status {:#x}", status.bits());
            return Err(EspiError::Io);
        }
        let len = self.rx_len.load(Ordering::Acquire);
        if len > OOB_BUFFER_SIZE {
            warn!("oob rx: frame of {} bytes exceeds buffer", len);
            return Err(EspiError::Io);
        }
        if len > out.len() {
            return Err(EspiError::InvalidArgument);
        }

        let mut buf = self.rx_buf.lock();
        hw.oob_rx_read(buf.as_mut_slice(len));
        out[..len].copy_from_slice(buf.as_slice(len));
        trace!("oob rx: {} bytes", len);
        Ok(len)
    }

    /// Hands the receive buffer back to the hardware.
    ///
    /// A frame that was never claimed is dropped with it.
    pub fn release_rx<H: EspiHw>(&self, hw: &H) {
        self.rx_done.reset();
        self.rx_pending.store(false, Ordering::Release);
        self.rx_len.store(0, Ordering::Release);
        hw.oob_rx_release();
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "oob-rx-async")] {
        impl OobEngine {
            /// Rx interrupt: latches the frame and returns its length for the
            /// `OobReceived` event.
            pub fn on_rx<H: EspiHw>(&self, hw: &H) -> Option<usize> {
                let len = hw.oob_rx_len();
                self.rx_len.store(len, Ordering::Release);
                self.rx_pending.store(true, Ordering::Release);
                self.rx_done.complete(hw.oob_rx_status());
                Some(len)
            }

            /// Copies the pending frame into `out` without waiting.
            ///
            /// # Errors
            ///
            /// [`EspiError::NotReady`] if no frame is pending; otherwise as
            /// for a blocking receive.
            pub fn receive<H: EspiHw>(&self, hw: &H, out: &mut [u8]) -> EspiResult<usize> {
                if !self.rx_pending.load(Ordering::Acquire) {
                    return Err(EspiError::NotReady);
                }
                self.read_frame(hw, hw.oob_rx_status(), out)
            }
        }
    } else {
        impl OobEngine {
            /// Rx interrupt: wakes the blocked receiver. No event is raised.
            pub fn on_rx<H: EspiHw>(&self, hw: &H) -> Option<usize> {
                self.rx_len.store(hw.oob_rx_len(), Ordering::Release);
                self.rx_pending.store(true, Ordering::Release);
                self.rx_done.complete(hw.oob_rx_status());
                None
            }

            /// Waits for a frame and copies it into `out`.
            ///
            /// A frame that arrived before the call is returned at once. A
            /// frame rejected for a short `out` stays latched, so a retry
            /// with a larger buffer returns it.
            ///
            /// # Errors
            ///
            /// - [`EspiError::NotReady`]: the host has not enabled the channel.
            /// - [`EspiError::Timeout`]: nothing arrived within the bounded wait.
            /// - [`EspiError::InvalidArgument`]: `out` is shorter than the frame.
            /// - [`EspiError::Io`]: the hardware reported an error.
            pub fn receive<H: EspiHw>(&self, hw: &H, out: &mut [u8]) -> EspiResult<usize> {
                if !hw.channel_enabled(Channel::OutOfBand) {
                    return Err(EspiError::NotReady);
                }
                let latched = self.rx_len.load(Ordering::Acquire);
                if self.rx_done.is_done() && latched > out.len() {
                    return Err(EspiError::InvalidArgument);
                }
                match self.rx_done.wait(|| hw.now_ms(), self.timeout_ms) {
                    Some(status) => {
                        let result = self.read_frame(hw, status, out);
                        if result == Err(EspiError::InvalidArgument) {
                            // Arrived while waiting; keep it for the retry.
                            self.rx_done.complete(status);
                        }
                        result
                    }
                    None => {
                        warn!("oob rx: nothing within {} ms", self.timeout_ms);
                        Err(EspiError::Timeout)
                    }
                }
            }
        }
    }
}

impl core::fmt::Debug for OobEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OobEngine")
            .field("tx_busy", &self.is_busy())
            .field("rx_pending", &self.rx_pending.load(Ordering::Relaxed))
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}
