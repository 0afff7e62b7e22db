#![no_std]

//! # axespi
//!
//! Target-side eSPI (Enhanced Serial Peripheral Interface) channel and
//! virtual-wire engine for embedded controllers. Designed for `no_std`
//! environments; uses `alloc` for the virtual-wire table and event queue.
//!
//! ## Architecture
//!
//! ```text
//! hardware irq ──> Espi::handle_interrupt ──> ChannelSet / RuntimeState
//!                        │                        │
//!                        │                        ├──> BarConfigurator ──> HostPeripheral
//!                        │                        └──> OobEngine / FlashEngine (wake waiter)
//!                        ▼
//!                  EventDispatcher ──> EspiListener, event queue
//! ```
//!
//! ### Core
//! - [`Espi`]: driver instance, generic over the register backend [`EspiHw`]
//! - [`EspiController`]: driver API (capabilities, virtual wires, OOB, flash)
//! - [`ChannelSet`]: per-channel Disabled → Armed → Enabled → Ready tracking
//! - [`VwTable`]: immutable signal ↔ (group, bit) map
//!
//! ### Collaborators
//! - [`HostPeripheral`]: host-visible logical devices on the peripheral channel
//! - [`HostBus`]: BAR/SIRQ access handed to peripherals
//! - [`EspiListener`]: structured event receivers
//!
//! ## Features
//!
//! | Feature | Effect |
//! |---------|--------|
//! | `peripheral-channel` | BAR/SIRQ configuration and peripheral routing |
//! | `vwire-channel` | Virtual-wire send/receive and boot handshake |
//! | `oob-channel` | OOB message transport |
//! | `flash-channel` | Flash read/write/erase |
//! | `oob-rx-async` | OOB receive through events instead of blocking |
//!
//! ## Example
//!
//! ```rust,ignore
//! use axespi::{Espi, EspiController, DeviceConfig, VwTable, VwSignal};
//!
//! let espi = Espi::new(MyHw::new(), DeviceConfig::default(), Arc::new(VwTable::standard()))?;
//! espi.init()?;
//!
//! // From the eSPI interrupt vector:
//! espi.handle_interrupt();
//!
//! // From a task:
//! if espi.channel_ready(Channel::VirtualWire) {
//!     espi.vwire_send(VwSignal::Sci, false)?;
//! }
//! for event in espi.drain_events(8) {
//!     // ...
//! }
//! ```

extern crate alloc;
#[macro_use]
extern crate log;

mod bar;
mod channel;
mod completion;
mod config;
mod dispatch;
mod error;
mod espi;
mod event;
mod flash;
mod hw;
mod oob;
mod peripheral;
pub mod vwire;

pub use bar::{BarConfig, BarConfigurator, BarFailure, BarStep, HwBus, MAX_BAR_FAILURES, SirqConfig};
pub use channel::{CHANNEL_COUNT, Channel, ChannelMask, ChannelSet, ChannelState};
pub use completion::{Completion, Phase};
pub use config::{
    AddressExtension, Capabilities, DEFAULT_FLASH_TIMEOUT_MS, DEFAULT_OOB_TIMEOUT_MS, DeviceConfig,
    HostBar, HostDevice, IoMode, MaxFrequency, PayloadSize, PinConfigHandle, SirqRoute,
    SramAccess, SramWindow,
};
pub use error::{EspiError, EspiResult};
pub use espi::{Espi, EspiController, EspiStats, RuntimeState};
pub use event::{
    CallbackOp, Diagnostic, EVENT_QUEUE_DEPTH, EspiListener, Event, EventDetail, EventDispatcher,
    EventKind, EventMask, FnListener, MAX_LISTENERS,
};
pub use flash::{FLASH_BUFFER_SIZE, FlashEngine};
pub use hw::{EspiHw, FlashDescriptor, FlashOp, InterruptStatus, TransferBuf, TransferStatus};
pub use oob::{OOB_BUFFER_SIZE, OobEngine};
pub use peripheral::{
    HostBus, HostPeripheral, MAX_PERIPHERALS, OPCODE_TABLE, OpcodeRange, OpcodeTarget,
    PeripheralKind, PeripheralRegistry, route,
};
pub use vwire::{
    SleepEdge, SleepEdgeTracker, VirtualWire, VwDirection, VwFlags, VwIrqSelect, VwResetSource,
    VwSignal, VwTable, VwTableConfig,
};
