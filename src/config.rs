use alloc::vec::Vec;

use crate::channel::{Channel, ChannelMask};
use crate::error::{EspiError, EspiResult};
use crate::peripheral::PeripheralKind;

/// Default bounded wait for OOB transfers.
pub const DEFAULT_OOB_TIMEOUT_MS: u64 = 200;
/// Default bounded wait for flash transfers.
pub const DEFAULT_FLASH_TIMEOUT_MS: u64 = 1000;

/// Opaque pin-configuration handle passed to the backend at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PinConfigHandle(pub u32);

/// Upper 32 address bits for host memory mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressExtension {
    /// Upper half of every memory BAR.
    pub mem_bar_upper: u32,
    /// Upper half of every SRAM window.
    pub sram_upper: u32,
}

/// Host address a peripheral decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostBar {
    /// 16-bit host I/O address.
    Io(u16),
    /// Lower 32 bits of a host memory address; the upper half comes from
    /// [`AddressExtension::mem_bar_upper`].
    Mem(u32),
}

/// Serial IRQ routing of a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SirqRoute {
    /// Hardware SIRQ slot owned by the peripheral.
    pub slot: u8,
    /// Host IRQ number driven through the slot.
    pub irq: u8,
}

/// A statically enumerated host-visible peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostDevice {
    /// Peripheral category, used to find the registered collaborator.
    pub kind: PeripheralKind,
    /// Logical device number, which is also the BAR slot.
    pub ldn: u8,
    /// Host address.
    pub bar: HostBar,
    /// Optional serial IRQ.
    pub sirq: Option<SirqRoute>,
}

/// Host access rights to an SRAM window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SramAccess {
    /// Host may read.
    ReadOnly = 1,
    /// Host may write.
    WriteOnly = 2,
    /// Host may read and write.
    ReadWrite = 3,
}

/// Target memory exposed to the host through a memory BAR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SramWindow {
    /// Window index.
    pub index: u8,
    /// Lower 32 bits of the host address.
    pub host_addr: u32,
    /// Window size as a power of two (bytes = 1 << size_log2).
    pub size_log2: u8,
    /// Host access rights.
    pub access: SramAccess,
}

/// Maximum link frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum MaxFrequency {
    /// 20 MHz
    Mhz20 = 0,
    /// 25 MHz
    Mhz25 = 1,
    /// 33 MHz
    Mhz33 = 2,
    /// 50 MHz
    Mhz50 = 3,
    /// 66 MHz
    Mhz66 = 4,
}

/// Supported I/O modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IoMode {
    /// Single I/O only.
    Single = 0,
    /// Single and dual I/O.
    SingleDual = 1,
    /// Single and quad I/O.
    SingleQuad = 2,
    /// Single, dual and quad I/O.
    All = 3,
}

/// Maximum payload size of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PayloadSize {
    /// 64 bytes
    Bytes64 = 0,
    /// 128 bytes
    Bytes128 = 1,
    /// 256 bytes
    Bytes256 = 2,
}

impl PayloadSize {
    /// Size in bytes.
    pub const fn bytes(self) -> usize {
        64 << (self as usize)
    }
}

/// Capabilities the target advertises to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Max speed
    pub max_freq: MaxFrequency,
    /// I/O modes
    pub io_mode: IoMode,
    /// Channels to advertise
    pub channels: ChannelMask,
    /// Use a dedicated alert pin instead of in-band alerts
    pub alert_pin: bool,
    /// OOB max payload
    pub oob_payload: PayloadSize,
    /// Flash max payload
    pub flash_payload: PayloadSize,
}

impl Capabilities {
    const IO_MODE_SHIFT: u32 = 8;
    const MAX_FREQ_SHIFT: u32 = 10;
    const ALERT_PIN_BIT: u32 = 1 << 16;
    const OOB_PAYLOAD_SHIFT: u32 = 20;
    const FLASH_PAYLOAD_SHIFT: u32 = 22;

    /// Packs the capabilities into the capability register word.
    ///
    /// ```text
    /// bits 0-3    channel support (PC, VW, OOB, FLASH)
    /// bits 8-9    I/O mode
    /// bits 10-12  maximum frequency
    /// bit  16     alert pin
    /// bits 20-21  OOB max payload
    /// bits 22-23  flash max payload
    /// ```
    pub fn to_word(&self) -> u32 {
        let mut word = self.channels.bits() as u32;
        word |= (self.io_mode as u32) << Self::IO_MODE_SHIFT;
        word |= (self.max_freq as u32) << Self::MAX_FREQ_SHIFT;
        if self.alert_pin {
            word |= Self::ALERT_PIN_BIT;
        }
        word |= (self.oob_payload as u32) << Self::OOB_PAYLOAD_SHIFT;
        word |= (self.flash_payload as u32) << Self::FLASH_PAYLOAD_SHIFT;
        word
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            max_freq: MaxFrequency::Mhz20,
            io_mode: IoMode::Single,
            channels: ChannelMask::supported(),
            alert_pin: false,
            oob_payload: PayloadSize::Bytes64,
            flash_payload: PayloadSize::Bytes64,
        }
    }
}

/// Immutable per-instance configuration.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Host configuration port (e.g. 0x2E).
    pub io_base: u16,
    /// Upper address halves for memory mappings.
    pub addr_ext: AddressExtension,
    /// Pin configuration applied at initialization.
    pub pinctrl: PinConfigHandle,
    /// Highest link frequency the board supports.
    pub max_frequency: MaxFrequency,
    /// Host-visible peripherals on the peripheral channel.
    pub devices: Vec<HostDevice>,
    /// SRAM windows exposed to the host.
    pub sram_windows: Vec<SramWindow>,
    /// Bounded wait for OOB transfers.
    pub oob_timeout_ms: u64,
    /// Bounded wait for flash transfers.
    pub flash_timeout_ms: u64,
    /// Send TARGET_BOOT_DONE/TARGET_BOOT_STATUS when the VW channel becomes ready.
    pub auto_boot_done: bool,
    /// Answer HOST_RST_WARN, SUS_WARN, OOB_RST_WARN and DNX_WARN with their acknowledge wires.
    pub auto_warning_ack: bool,
}

impl DeviceConfig {
    /// Creates a configuration with no peripherals and default timeouts.
    pub fn new(io_base: u16) -> Self {
        Self {
            io_base,
            addr_ext: AddressExtension::default(),
            pinctrl: PinConfigHandle::default(),
            max_frequency: MaxFrequency::Mhz66,
            devices: Vec::new(),
            sram_windows: Vec::new(),
            oob_timeout_ms: DEFAULT_OOB_TIMEOUT_MS,
            flash_timeout_ms: DEFAULT_FLASH_TIMEOUT_MS,
            auto_boot_done: true,
            auto_warning_ack: true,
        }
    }

    /// Adds a host-visible peripheral.
    pub fn with_device(mut self, device: HostDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// Adds an SRAM window.
    pub fn with_sram_window(mut self, window: SramWindow) -> Self {
        self.sram_windows.push(window);
        self
    }

    /// Sets the address extension.
    pub fn with_addr_ext(mut self, addr_ext: AddressExtension) -> Self {
        self.addr_ext = addr_ext;
        self
    }

    /// Overrides the OOB and flash bounded waits.
    pub fn with_timeouts(mut self, oob_timeout_ms: u64, flash_timeout_ms: u64) -> Self {
        self.oob_timeout_ms = oob_timeout_ms;
        self.flash_timeout_ms = flash_timeout_ms;
        self
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`EspiError::InvalidArgument`] for duplicate logical device numbers,
    /// SIRQ slots or SRAM window indices, zero timeouts, and
    /// [`EspiError::NotSupported`] when peripherals are listed but the peripheral
    /// channel was not built.
    pub fn validate(&self) -> EspiResult {
        if self.oob_timeout_ms == 0 || self.flash_timeout_ms == 0 {
            return Err(EspiError::InvalidArgument);
        }
        if !Channel::Peripheral.is_supported()
            && (!self.devices.is_empty() || !self.sram_windows.is_empty())
        {
            return Err(EspiError::NotSupported);
        }

        for (i, dev) in self.devices.iter().enumerate() {
            for other in &self.devices[i + 1..] {
                if dev.ldn == other.ldn {
                    return Err(EspiError::InvalidArgument);
                }
                if let (Some(a), Some(b)) = (dev.sirq, other.sirq) {
                    if a.slot == b.slot {
                        return Err(EspiError::InvalidArgument);
                    }
                }
            }
        }

        for (i, win) in self.sram_windows.iter().enumerate() {
            if win.size_log2 > 31 {
                return Err(EspiError::InvalidArgument);
            }
            if self.sram_windows[i + 1..]
                .iter()
                .any(|other| other.index == win.index)
            {
                return Err(EspiError::InvalidArgument);
            }
        }

        Ok(())
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new(0x2e)
    }
}
