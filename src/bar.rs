//! BAR and serial-IRQ configurator.
//!
//! Host visibility of every statically enumerated peripheral and SRAM window
//! is (re)programmed on the first platform reset de-assertion and again each
//! time the host re-enables the peripheral channel. Programming is
//! idempotent and best effort: a failing step is logged and the remaining
//! steps still run.

use core::cell::RefCell;

use arrayvec::ArrayVec;
use axerrno::{AxError, AxResult};
use critical_section::Mutex;

use crate::config::{AddressExtension, DeviceConfig, HostBar, SirqRoute};
use crate::error::{EspiError, EspiResult};
use crate::hw::EspiHw;
use crate::peripheral::{HostBus, PeripheralRegistry};

/// Failure records kept from the last configurator run.
pub const MAX_BAR_FAILURES: usize = 16;

/// Packed address-visibility register configuration.
///
/// ```text
/// bits 0-7    slot (logical device number or SRAM window index)
/// bit  8      memory space (I/O otherwise)
/// bit  9      SRAM window
/// bits 12-16  window size, log2 (SRAM only)
/// bits 20-21  access rights (SRAM only)
/// bit  31     valid
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarConfig(u32);

impl BarConfig {
    const SLOT_MASK: u32 = 0xff;
    const MEM_BIT: u32 = 1 << 8;
    const SRAM_BIT: u32 = 1 << 9;
    const SIZE_SHIFT: u32 = 12;
    const SIZE_MASK: u32 = 0x1f;
    const ACCESS_SHIFT: u32 = 20;
    const ACCESS_MASK: u32 = 0b11;
    const VALID_BIT: u32 = 1 << 31;

    /// Valid I/O BAR of a logical device.
    pub const fn io(ldn: u8) -> Self {
        Self(ldn as u32 | Self::VALID_BIT)
    }

    /// Valid memory BAR of a logical device.
    pub const fn mem(ldn: u8) -> Self {
        Self(ldn as u32 | Self::MEM_BIT | Self::VALID_BIT)
    }

    /// Valid SRAM window.
    pub const fn sram(index: u8, size_log2: u8, access: u8) -> Self {
        Self(
            index as u32
                | Self::MEM_BIT
                | Self::SRAM_BIT
                | ((size_log2 as u32 & Self::SIZE_MASK) << Self::SIZE_SHIFT)
                | ((access as u32 & Self::ACCESS_MASK) << Self::ACCESS_SHIFT)
                | Self::VALID_BIT,
        )
    }

    /// Wraps raw bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Slot number.
    pub const fn slot(self) -> u8 {
        (self.0 & Self::SLOT_MASK) as u8
    }

    /// Memory space.
    pub const fn is_mem(self) -> bool {
        self.0 & Self::MEM_BIT != 0
    }

    /// SRAM window.
    pub const fn is_sram(self) -> bool {
        self.0 & Self::SRAM_BIT != 0
    }

    /// Window size, log2.
    pub const fn size_log2(self) -> u8 {
        ((self.0 >> Self::SIZE_SHIFT) & Self::SIZE_MASK) as u8
    }

    /// Access rights.
    pub const fn access(self) -> u8 {
        ((self.0 >> Self::ACCESS_SHIFT) & Self::ACCESS_MASK) as u8
    }

    /// Valid bit.
    pub const fn is_valid(self) -> bool {
        self.0 & Self::VALID_BIT != 0
    }
}

/// Packed serial-IRQ slot configuration.
///
/// ```text
/// bits 0-7    slot
/// bits 8-15   host IRQ (0xff = disabled)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SirqConfig(u32);

impl SirqConfig {
    /// IRQ value that turns a slot off.
    pub const IRQ_DISABLED: u8 = 0xff;

    /// Routes `irq` through `slot`.
    pub const fn route(slot: u8, irq: u8) -> Self {
        Self(slot as u32 | (irq as u32) << 8)
    }

    /// Turns a slot off.
    pub const fn disabled(slot: u8) -> Self {
        Self::route(slot, Self::IRQ_DISABLED)
    }

    /// Wraps raw bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & 0xffff)
    }

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Slot number.
    pub const fn slot(self) -> u8 {
        self.0 as u8
    }

    /// Host IRQ.
    pub const fn irq(self) -> u8 {
        (self.0 >> 8) as u8
    }
}

impl From<SirqRoute> for SirqConfig {
    fn from(route: SirqRoute) -> Self {
        SirqConfig::route(route.slot, route.irq)
    }
}

/// [`HostBus`] over the register backend.
pub struct HwBus<'a, H: EspiHw> {
    hw: &'a H,
    addr_ext: AddressExtension,
}

impl<'a, H: EspiHw> HwBus<'a, H> {
    /// Creates a bus that fills memory address upper halves from `addr_ext`.
    pub fn new(hw: &'a H, addr_ext: AddressExtension) -> Self {
        Self { hw, addr_ext }
    }
}

impl<H: EspiHw> HostBus for HwBus<'_, H> {
    fn bar_configure(&self, host_addr: u64, config: BarConfig) -> AxResult {
        let lo = host_addr as u32;
        let hi = (host_addr >> 32) as u32;
        let result = if config.is_sram() {
            let hi = if hi == 0 { self.addr_ext.sram_upper } else { hi };
            self.hw
                .write_sram_window(config.slot(), lo, hi, config.size_log2(), config.access())
        } else if config.is_mem() {
            let hi = if hi == 0 { self.addr_ext.mem_bar_upper } else { hi };
            self.hw
                .write_mem_bar(config.slot(), lo, hi, config.is_valid())
        } else {
            if host_addr > u16::MAX as u64 {
                return Err(AxError::InvalidInput);
            }
            self.hw
                .write_io_bar(config.slot(), host_addr as u16, config.is_valid())
        };
        result.map_err(AxError::from)
    }

    fn sirq_configure(&self, config: SirqConfig) -> AxResult {
        self.hw
            .write_sirq(config.slot(), config.irq())
            .map_err(AxError::from)
    }
}

/// Step of a configurator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarStep {
    /// Address-visibility register of a peripheral.
    Bar,
    /// Serial-IRQ slot of a peripheral.
    Sirq,
    /// SRAM window.
    SramWindow,
    /// `host_access_enable` of the collaborator.
    HostAccess,
}

/// A step that failed during the last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarFailure {
    /// Failed step.
    pub step: BarStep,
    /// Logical device number or SRAM window index.
    pub slot: u8,
    /// Reported error.
    pub error: AxError,
}

/// Programs BARs, SRAM windows and SIRQ slots from the device configuration.
pub struct BarConfigurator {
    failures: Mutex<RefCell<ArrayVec<BarFailure, MAX_BAR_FAILURES>>>,
}

impl BarConfigurator {
    /// Creates a configurator with an empty failure log.
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(RefCell::new(ArrayVec::new())),
        }
    }

    fn record(&self, step: BarStep, slot: u8, result: AxResult) {
        if let Err(error) = result {
            warn!("bar config: {:?} slot {} failed: {:?}", step, slot, error);
            // A full log keeps the first failures.
            critical_section::with(|cs| {
                let _ = self
                    .failures
                    .borrow_ref_mut(cs)
                    .try_push(BarFailure { step, slot, error });
            });
        }
    }

    /// Runs every programming step.
    ///
    /// Returns [`EspiError::Io`] if any step failed; the failures are kept
    /// until the next run.
    pub fn run<H: EspiHw>(
        &self,
        hw: &H,
        config: &DeviceConfig,
        peripherals: &PeripheralRegistry,
    ) -> EspiResult {
        critical_section::with(|cs| self.failures.borrow_ref_mut(cs).clear());
        let bus = HwBus::new(hw, config.addr_ext);

        for dev in &config.devices {
            let bar = match dev.bar {
                HostBar::Io(addr) => bus.bar_configure(addr as u64, BarConfig::io(dev.ldn)),
                HostBar::Mem(addr) => bus.bar_configure(addr as u64, BarConfig::mem(dev.ldn)),
            };
            self.record(BarStep::Bar, dev.ldn, bar);

            let sirq = dev.sirq.map(SirqConfig::from);
            if let Some(sirq) = sirq {
                self.record(BarStep::Sirq, dev.ldn, bus.sirq_configure(sirq));
            }

            match peripherals.find(dev.kind) {
                Some(p) => {
                    let cfg = sirq.map_or(0, SirqConfig::bits);
                    let result = p.host_access_enable(&bus, true, cfg);
                    self.record(BarStep::HostAccess, dev.ldn, result);
                }
                None => trace!("bar config: no collaborator for {:?}", dev.kind),
            }
        }

        for win in &config.sram_windows {
            let bar = BarConfig::sram(win.index, win.size_log2, win.access as u8);
            self.record(
                BarStep::SramWindow,
                win.index,
                bus.bar_configure(win.host_addr as u64, bar),
            );
        }

        let failed = critical_section::with(|cs| self.failures.borrow_ref(cs).len());
        if failed == 0 {
            debug!(
                "bar config: {} devices, {} sram windows programmed",
                config.devices.len(),
                config.sram_windows.len()
            );
            Ok(())
        } else {
            Err(EspiError::Io)
        }
    }

    /// Failures of the last run.
    pub fn last_failures(&self) -> ArrayVec<BarFailure, MAX_BAR_FAILURES> {
        critical_section::with(|cs| self.failures.borrow_ref(cs).clone())
    }
}

impl Default for BarConfigurator {
    fn default() -> Self {
        Self::new()
    }
}
