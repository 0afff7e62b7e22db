//! Flash channel transfers.
//!
//! Read, write and erase requests go through one descriptor-driven engine. The
//! caller blocks until the flash-done interrupt or the bounded wait expires.
//! Status is cleared on every exit that saw a completion; a timed-out
//! request leaves it for the next transfer or interrupt to interpret.

use core::sync::atomic::{AtomicBool, Ordering};

use memory_addr::is_aligned;
use spin::Mutex;

use crate::completion::Completion;
use crate::error::{EspiError, EspiResult};
use crate::hw::{EspiHw, FlashDescriptor, FlashOp, TransferBuf, TransferStatus};

/// Capacity of the flash staging buffer.
pub const FLASH_BUFFER_SIZE: usize = 64;

const FLASH_ALIGN: usize = 4;

/// Flash transfer state.
pub struct FlashEngine {
    timeout_ms: u64,
    busy: AtomicBool,
    done: Completion,
    buf: Mutex<TransferBuf<FLASH_BUFFER_SIZE>>,
}

impl FlashEngine {
    /// Creates an idle engine with the given bounded wait.
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            busy: AtomicBool::new(false),
            done: Completion::new(),
            buf: Mutex::new(TransferBuf::new()),
        }
    }

    /// Drops in-flight state after an enable change.
    pub fn reset(&self) {
        self.busy.store(false, Ordering::Release);
        self.done.reset();
    }

    /// Checks whether a transfer is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn validate(address: u32, buf_addr: Option<usize>, len: usize) -> EspiResult {
        if !is_aligned(address as usize, FLASH_ALIGN) {
            debug!("flash: address {:#x} not word aligned", address);
            return Err(EspiError::InvalidArgument);
        }
        if buf_addr.is_some_and(|addr| !is_aligned(addr, FLASH_ALIGN)) {
            debug!("flash: caller buffer not word aligned");
            return Err(EspiError::InvalidArgument);
        }
        if len == 0 || len > FLASH_BUFFER_SIZE {
            return Err(EspiError::InvalidArgument);
        }
        Ok(())
    }

    /// Reads `buf.len()` bytes at `address`.
    ///
    /// # Errors
    ///
    /// - [`EspiError::InvalidArgument`]: `address` or `buf` not word aligned,
    ///   empty, or longer than [`FLASH_BUFFER_SIZE`].
    /// - [`EspiError::NotReady`]: the channel is not ready.
    /// - [`EspiError::Busy`]: another transfer is in flight.
    /// - [`EspiError::Timeout`]: no completion within the bounded wait.
    /// - [`EspiError::Io`]: the hardware reported an error.
    pub fn read<H: EspiHw>(
        &self,
        hw: &H,
        ready: bool,
        address: u32,
        buf: &mut [u8],
    ) -> EspiResult {
        Self::validate(address, Some(buf.as_ptr() as usize), buf.len())?;
        let desc = FlashDescriptor {
            op: FlashOp::Read,
            address,
            len: buf.len() as u32,
        };
        self.transfer(hw, ready, &desc, &[], Some(buf))
    }

    /// Writes `data` at `address`. Errors as for [`FlashEngine::read`].
    pub fn write<H: EspiHw>(
        &self,
        hw: &H,
        ready: bool,
        address: u32,
        data: &[u8],
    ) -> EspiResult {
        Self::validate(address, Some(data.as_ptr() as usize), data.len())?;
        let desc = FlashDescriptor {
            op: FlashOp::Write,
            address,
            len: data.len() as u32,
        };
        self.transfer(hw, ready, &desc, data, None)
    }

    /// Erases the block holding `address`.
    ///
    /// The host picks the erase granularity; `len` is validated but the
    /// descriptor carries zero.
    pub fn erase<H: EspiHw>(&self, hw: &H, ready: bool, address: u32, len: usize) -> EspiResult {
        Self::validate(address, None, len)?;
        let desc = FlashDescriptor {
            op: FlashOp::Erase,
            address,
            len: 0,
        };
        self.transfer(hw, ready, &desc, &[], None)
    }

    fn transfer<H: EspiHw>(
        &self,
        hw: &H,
        ready: bool,
        desc: &FlashDescriptor,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> EspiResult {
        if !ready {
            return Err(EspiError::NotReady);
        }
        if self.busy.load(Ordering::Acquire) {
            return Err(EspiError::Busy);
        }
        self.busy.store(true, Ordering::Release);

        self.done.arm();
        {
            let mut buf = self.buf.lock();
            buf.as_mut_slice(data.len()).copy_from_slice(data);
            hw.flash_start(desc, buf.as_slice(data.len()));
        }
        trace!("flash: {:?} @ {:#x} len {} started", desc.op, desc.address, desc.len);

        let result = match self.done.wait(|| hw.now_ms(), self.timeout_ms) {
            None => {
                warn!("flash: {:?} @ {:#x} timed out", desc.op, desc.address);
                self.busy.store(false, Ordering::Release);
                return Err(EspiError::Timeout);
            }
            Some(status) if status.is_error() => {
                warn!(
                    "flash: {:?} @ {:#x} failed, status {:#x}",
                    desc.op,
                    desc.address,
                    status.bits()
                );
                Err(EspiError::Io)
            }
            Some(_) => {
                if let Some(out) = out {
                    let mut buf = self.buf.lock();
                    hw.flash_read_data(buf.as_mut_slice(out.len()));
                    out.copy_from_slice(buf.as_slice(out.len()));
                }
                Ok(())
            }
        };

        hw.flash_clear_status();
        self.busy.store(false, Ordering::Release);
        result
    }

    /// Flash-done interrupt: delivers the status and returns it for the event.
    pub fn on_done<H: EspiHw>(&self, hw: &H) -> (TransferStatus, bool) {
        let status = hw.flash_status();
        let waiting = self.done.is_pending();
        self.done.complete(status);
        (status, waiting)
    }
}

impl core::fmt::Debug for FlashEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlashEngine")
            .field("busy", &self.is_busy())
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}
