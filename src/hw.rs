//! Register backend seam.
//!
//! The engine never touches registers directly. Everything vendor specific
//! lives behind [`EspiHw`]: status decode, ready bits, virtual-wire group
//! registers, BAR/SIRQ slots and the OOB/flash transfer engines. Calls are
//! short register accesses and never block.

use core::ops::{BitOr, BitOrAssign};

use crate::channel::Channel;
use crate::config::PinConfigHandle;
use crate::error::EspiResult;
use crate::vwire::VwDirection;

/// Pending hardware interrupt sources, read and cleared in one access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptStatus(u32);

impl InterruptStatus {
    /// eSPI link reset pin changed level.
    pub const LINK_RESET: Self = Self(1 << 0);
    /// Peripheral channel enable changed.
    pub const PC_ENABLE: Self = Self(1 << 1);
    /// Virtual-wire channel enable changed.
    pub const VW_ENABLE: Self = Self(1 << 2);
    /// OOB upstream enable changed.
    pub const OOB_UP_ENABLE: Self = Self(1 << 3);
    /// OOB downstream enable changed.
    pub const OOB_DOWN_ENABLE: Self = Self(1 << 4);
    /// Flash channel enable changed.
    pub const FLASH_ENABLE: Self = Self(1 << 5);
    /// OOB transmit finished.
    pub const OOB_TX_DONE: Self = Self(1 << 6);
    /// OOB frame received.
    pub const OOB_RX_DONE: Self = Self(1 << 7);
    /// Flash transfer finished.
    pub const FLASH_DONE: Self = Self(1 << 8);
    /// Virtual wires of groups 0-7 changed.
    pub const VW_BANK0: Self = Self(1 << 9);
    /// Virtual wires of groups 8-15 changed.
    pub const VW_BANK1: Self = Self(1 << 10);

    /// No source pending.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Builds a status from raw register bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw register bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Checks whether every source in `other` is pending.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Checks whether any source in `other` is pending.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Checks whether no source is pending.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Enable-change source of a channel.
    pub const fn enable_change(channel: Channel) -> Self {
        match channel {
            Channel::Peripheral => Self::PC_ENABLE,
            Channel::VirtualWire => Self::VW_ENABLE,
            Channel::OutOfBand => Self(Self::OOB_UP_ENABLE.0 | Self::OOB_DOWN_ENABLE.0),
            Channel::Flash => Self::FLASH_ENABLE,
        }
    }
}

impl BitOr for InterruptStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for InterruptStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Completion status of an OOB or flash transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferStatus(u32);

impl TransferStatus {
    /// Transfer finished.
    pub const DONE: u32 = 1 << 0;
    /// Bus error during the transfer.
    pub const BUS_ERROR: u32 = 1 << 1;
    /// Host rejected the request.
    pub const REJECTED: u32 = 1 << 2;
    /// Received frame overran the buffer.
    pub const OVERRUN: u32 = 1 << 3;

    const ERROR_MASK: u32 = Self::BUS_ERROR | Self::REJECTED | Self::OVERRUN;

    /// Wraps raw status bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Successful completion.
    pub const fn done() -> Self {
        Self(Self::DONE)
    }

    /// Raw status bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Checks whether any error bit is set.
    pub const fn is_error(self) -> bool {
        self.0 & Self::ERROR_MASK != 0
    }
}

/// Word-aligned staging buffer handed to the transfer engines.
#[derive(Clone)]
#[repr(C, align(4))]
pub struct TransferBuf<const N: usize>([u8; N]);

impl<const N: usize> TransferBuf<N> {
    /// Zeroed buffer.
    pub const fn new() -> Self {
        Self([0; N])
    }

    /// Capacity in bytes.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// First `len` bytes.
    pub fn as_slice(&self, len: usize) -> &[u8] {
        &self.0[..len.min(N)]
    }

    /// First `len` bytes, mutable.
    pub fn as_mut_slice(&mut self, len: usize) -> &mut [u8] {
        &mut self.0[..len.min(N)]
    }
}

impl<const N: usize> Default for TransferBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Flash channel request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlashOp {
    /// Read from flash.
    Read = 0,
    /// Write to flash.
    Write = 1,
    /// Erase; the host chooses the smallest supported granularity.
    Erase = 2,
}

/// Transfer descriptor programmed into the flash engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashDescriptor {
    /// Request type.
    pub op: FlashOp,
    /// Flash address.
    pub address: u32,
    /// Byte count; zero for erase.
    pub len: u32,
}

/// Vendor register primitives.
///
/// Implementations must be callable from interrupt and thread context at the
/// same time; each method is a single register access or a short fixed
/// sequence of them.
pub trait EspiHw: Send + Sync {
    /// Monotonic milliseconds, used for bounded waits.
    fn now_ms(&self) -> u64;

    /// Applies the pin configuration.
    fn apply_pinctrl(&self, handle: PinConfigHandle) -> EspiResult;

    /// Writes the capability register.
    fn write_capabilities(&self, word: u32);

    /// Reads and clears the pending interrupt sources.
    fn take_interrupts(&self) -> InterruptStatus;

    /// Level of the link reset pin: `true` when released.
    fn link_reset_released(&self) -> bool;

    /// Arms or disarms a channel's enable-change interrupt.
    fn set_enable_irq(&self, channel: Channel, enable: bool);

    /// Host-controlled enable bit of a channel.
    fn channel_enabled(&self, channel: Channel) -> bool;

    /// Target-controlled ready bit of a channel.
    fn set_channel_ready(&self, channel: Channel, ready: bool);

    /// Binds a register group to a host index.
    fn vw_configure_group(&self, direction: VwDirection, group: u8, host_index: u8);

    /// Programs the packed flags byte of one wire.
    fn vw_configure_wire(&self, direction: VwDirection, group: u8, bit: u8, flags: u8);

    /// Reads the four wire levels of a group (bits 0-3).
    fn vw_read(&self, direction: VwDirection, group: u8) -> u8;

    /// Updates the wires selected by `mask` in one register write.
    fn vw_write(&self, direction: VwDirection, group: u8, mask: u8, value: u8);

    /// Reads and clears the receive-change bits of a bank.
    ///
    /// Bit `n` of bank `b` stands for group `b * 8 + n / 4`, wire `n % 4`.
    fn take_vw_status(&self, bank: u8) -> u32;

    /// Programs an I/O BAR.
    fn write_io_bar(&self, ldn: u8, addr: u16, valid: bool) -> EspiResult;

    /// Programs a memory BAR and its address extension.
    fn write_mem_bar(&self, ldn: u8, addr_lo: u32, addr_hi: u32, valid: bool) -> EspiResult;

    /// Programs an SRAM window.
    fn write_sram_window(
        &self,
        index: u8,
        addr_lo: u32,
        addr_hi: u32,
        size_log2: u8,
        access: u8,
    ) -> EspiResult;

    /// Programs a serial IRQ slot; `irq == 0xff` disables the slot.
    fn write_sirq(&self, slot: u8, irq: u8) -> EspiResult;

    /// Starts an OOB transmit from a 4-byte aligned buffer.
    fn oob_tx_start(&self, frame: &[u8]);

    /// Status of the last OOB transmit.
    fn oob_tx_status(&self) -> TransferStatus;

    /// Status of the last OOB receive.
    fn oob_rx_status(&self) -> TransferStatus;

    /// Length of the received OOB frame.
    fn oob_rx_len(&self) -> usize;

    /// Copies the received OOB frame out of the hardware buffer.
    fn oob_rx_read(&self, buf: &mut [u8]);

    /// Hands the receive buffer back to the hardware.
    fn oob_rx_release(&self);

    /// Programs a flash descriptor and starts it; `data` is empty unless writing.
    fn flash_start(&self, desc: &FlashDescriptor, data: &[u8]);

    /// Status of the last flash transfer.
    fn flash_status(&self) -> TransferStatus;

    /// Copies read data out of the flash buffer.
    fn flash_read_data(&self, buf: &mut [u8]);

    /// Clears all flash status bits.
    fn flash_clear_status(&self);
}
