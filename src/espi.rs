//! The eSPI driver instance.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use arrayvec::ArrayVec;

use crate::bar::{BarConfigurator, BarFailure, MAX_BAR_FAILURES};
use crate::channel::{Channel, ChannelMask, ChannelSet, ChannelState};
use crate::config::{Capabilities, DeviceConfig};
use crate::error::{EspiError, EspiResult};
use crate::event::{CallbackOp, Diagnostic, EspiListener, Event, EventDispatcher};
use crate::flash::FlashEngine;
use crate::hw::EspiHw;
use crate::oob::OobEngine;
use crate::peripheral::{HostPeripheral, PeripheralKind, PeripheralRegistry};
use crate::vwire::{SleepEdge, SleepEdgeTracker, VwDirection, VwSignal, VwTable};

/// Driver API of a target-side eSPI controller.
pub trait EspiController {
    /// Advertises link capabilities to the host.
    ///
    /// Every requested channel must have been built in and the frequency must
    /// not exceed the board limit; otherwise [`EspiError::NotSupported`].
    fn configure(&self, caps: &Capabilities) -> EspiResult;

    /// Checks whether a channel finished negotiation.
    fn channel_ready(&self, channel: Channel) -> bool;

    /// Drives a virtual wire.
    fn vwire_send(&self, signal: VwSignal, level: bool) -> EspiResult;

    /// Reads a virtual wire.
    fn vwire_receive(&self, signal: VwSignal) -> EspiResult<bool>;

    /// Adds or removes an event listener.
    fn manage_callback(&self, listener: &Arc<dyn EspiListener>, op: CallbackOp) -> EspiResult;

    /// Sends an OOB frame, waiting for completion.
    fn oob_send(&self, data: &[u8]) -> EspiResult;

    /// Receives an OOB frame into `buf`, returning its length.
    fn oob_receive(&self, buf: &mut [u8]) -> EspiResult<usize>;

    /// Reads flash at a word-aligned address.
    fn flash_read(&self, address: u32, buf: &mut [u8]) -> EspiResult;

    /// Writes flash at a word-aligned address.
    fn flash_write(&self, address: u32, data: &[u8]) -> EspiResult;

    /// Erases the flash block holding `address`.
    fn flash_erase(&self, address: u32, len: usize) -> EspiResult;
}

/// Operation counters.
#[derive(Debug, Default)]
pub struct EspiStats {
    /// Link reset de-assertions seen.
    pub link_resets: AtomicU64,
    /// OOB frames sent.
    pub oob_tx: AtomicU64,
    /// OOB frames received.
    pub oob_rx: AtomicU64,
    /// Flash transfers completed.
    pub flash_ops: AtomicU64,
    /// Bounded waits that expired.
    pub timeouts: AtomicU64,
    /// Transfers or configuration steps that reported an error.
    pub io_errors: AtomicU64,
    /// BAR/SIRQ configurator runs.
    pub bar_runs: AtomicU64,
}

impl EspiStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed operation by error kind.
    #[inline]
    pub fn record_error(&self, err: EspiError) {
        match err {
            EspiError::Timeout => Self::bump(&self.timeouts),
            EspiError::Io => Self::bump(&self.io_errors),
            _ => {}
        }
    }

    /// Gets the number of link resets.
    #[inline]
    pub fn link_resets(&self) -> u64 {
        self.link_resets.load(Ordering::Relaxed)
    }

    /// Gets the number of OOB frames sent.
    #[inline]
    pub fn oob_tx(&self) -> u64 {
        self.oob_tx.load(Ordering::Relaxed)
    }

    /// Gets the number of OOB frames received.
    #[inline]
    pub fn oob_rx(&self) -> u64 {
        self.oob_rx.load(Ordering::Relaxed)
    }

    /// Gets the number of flash transfers.
    #[inline]
    pub fn flash_ops(&self) -> u64 {
        self.flash_ops.load(Ordering::Relaxed)
    }

    /// Gets the number of timeouts.
    #[inline]
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Gets the number of I/O errors.
    #[inline]
    pub fn io_errors(&self) -> u64 {
        self.io_errors.load(Ordering::Relaxed)
    }

    /// Gets the number of configurator runs.
    #[inline]
    pub fn bar_runs(&self) -> u64 {
        self.bar_runs.load(Ordering::Relaxed)
    }
}

/// Mutable link state written from interrupt context.
#[derive(Debug)]
pub struct RuntimeState {
    pub(crate) reset_count: AtomicU32,
    pub(crate) in_reset: AtomicBool,
    pub(crate) pltrst_level: AtomicBool,
    pub(crate) sleep: SleepEdgeTracker,
}

impl RuntimeState {
    fn new() -> Self {
        Self {
            reset_count: AtomicU32::new(0),
            in_reset: AtomicBool::new(true),
            pltrst_level: AtomicBool::new(false),
            sleep: SleepEdgeTracker::new(),
        }
    }

    /// Number of link reset de-assertions.
    pub fn reset_count(&self) -> u32 {
        self.reset_count.load(Ordering::Acquire)
    }

    /// Checks whether the link is held in reset.
    pub fn in_reset(&self) -> bool {
        self.in_reset.load(Ordering::Acquire)
    }

    /// Last observed PLTRST# level.
    pub fn pltrst_level(&self) -> bool {
        self.pltrst_level.load(Ordering::Acquire)
    }
}

/// Target-side eSPI engine over a register backend.
pub struct Espi<H: EspiHw> {
    pub(crate) hw: H,
    pub(crate) config: DeviceConfig,
    pub(crate) vw: Arc<VwTable>,
    pub(crate) channels: ChannelSet,
    pub(crate) advertised: AtomicU8,
    pub(crate) runtime: RuntimeState,
    pub(crate) events: EventDispatcher,
    pub(crate) peripherals: PeripheralRegistry,
    pub(crate) bars: BarConfigurator,
    pub(crate) oob: OobEngine,
    pub(crate) flash: FlashEngine,
    pub(crate) stats: EspiStats,
}

impl<H: EspiHw> Espi<H> {
    /// Creates a driver instance. Nothing is written to the hardware until
    /// [`Espi::init`].
    ///
    /// # Errors
    ///
    /// Whatever [`DeviceConfig::validate`] rejects.
    pub fn new(hw: H, config: DeviceConfig, vw: Arc<VwTable>) -> EspiResult<Self> {
        config.validate()?;
        let oob = OobEngine::new(config.oob_timeout_ms);
        let flash = FlashEngine::new(config.flash_timeout_ms);
        Ok(Self {
            hw,
            config,
            vw,
            channels: ChannelSet::new(),
            advertised: AtomicU8::new(ChannelMask::supported().bits()),
            runtime: RuntimeState::new(),
            events: EventDispatcher::new(),
            peripherals: PeripheralRegistry::new(),
            bars: BarConfigurator::new(),
            oob,
            flash,
            stats: EspiStats::new(),
        })
    }

    /// Applies pins, programs the virtual-wire table and picks up a link that
    /// is already out of reset.
    pub fn init(&self) -> EspiResult {
        if let Err(err) = self.hw.apply_pinctrl(self.config.pinctrl) {
            error!("espi: pin configuration failed: {:?}", err);
            self.events.dispatch(Event::diagnostic(Diagnostic::PinConfigFailed, 0));
            return Err(err);
        }

        if Channel::VirtualWire.is_supported() {
            for wire in self.vw.iter() {
                self.hw.vw_configure_wire(
                    wire.direction(),
                    wire.group,
                    wire.bit,
                    wire.flags.to_bits(),
                );
            }
            for dir in [VwDirection::ControllerToTarget, VwDirection::TargetToController] {
                for (group, host_index) in self.vw.groups(dir) {
                    self.hw.vw_configure_group(dir, group, host_index);
                }
            }
        }

        for ch in Channel::ALL {
            self.hw.set_enable_irq(ch, false);
        }
        info!(
            "espi: init io_base={:#x}, {} devices, {} virtual wires",
            self.config.io_base,
            self.config.devices.len(),
            self.vw.len()
        );

        if self.hw.link_reset_released() {
            self.link_released();
        }
        Ok(())
    }

    /// Register backend.
    pub fn hw(&self) -> &H {
        &self.hw
    }

    /// Device configuration.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Virtual-wire table.
    pub fn vw_table(&self) -> &Arc<VwTable> {
        &self.vw
    }

    /// Negotiation state of a channel.
    pub fn channel_state(&self, channel: Channel) -> ChannelState {
        self.channels.state(channel)
    }

    /// Link state.
    pub fn runtime(&self) -> &RuntimeState {
        &self.runtime
    }

    /// Operation counters.
    pub fn stats(&self) -> &EspiStats {
        &self.stats
    }

    /// Events dropped because the queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    /// Removes up to `max` queued events, oldest first.
    pub fn drain_events(&self, max: usize) -> Vec<Event> {
        self.events.drain(max)
    }

    /// Channels armed on link reset release.
    pub(crate) fn advertised_channels(&self) -> ChannelMask {
        ChannelMask::from_bits(self.advertised.load(Ordering::Acquire))
    }

    /// Latched edge of a sleep wire.
    pub fn sleep_edge(&self, signal: VwSignal) -> SleepEdge {
        self.runtime.sleep.get(signal)
    }

    /// Clears and returns the latched edge of a sleep wire.
    pub fn clear_sleep_edge(&self, signal: VwSignal) -> SleepEdge {
        self.runtime.sleep.clear(signal)
    }

    /// Drives several wires of one register group in a single write.
    ///
    /// # Errors
    ///
    /// [`EspiError::InvalidArgument`] if the list is empty, a signal is not in
    /// the table, or the signals span more than one group or direction.
    pub fn vwire_send_group(&self, wires: &[(VwSignal, bool)]) -> EspiResult {
        if !Channel::VirtualWire.is_supported() {
            return Err(EspiError::NotSupported);
        }
        let (first, _) = wires.first().ok_or(EspiError::InvalidArgument)?;
        let head = *self.vw.find(*first).ok_or(EspiError::InvalidArgument)?;

        let mut mask = 0u8;
        let mut value = 0u8;
        for (signal, level) in wires {
            let wire = self.vw.find(*signal).ok_or(EspiError::InvalidArgument)?;
            if wire.group != head.group || wire.direction() != head.direction() {
                return Err(EspiError::InvalidArgument);
            }
            mask |= wire.mask();
            if *level {
                value |= wire.mask();
            }
        }

        trace!("vw group {} <- {:#06b} (mask {:#06b})", head.group, value, mask);
        self.hw.vw_write(head.direction(), head.group, mask, value);
        Ok(())
    }

    /// Registers a host peripheral collaborator.
    pub fn register_peripheral(&self, peripheral: Arc<dyn HostPeripheral>) -> EspiResult {
        if !Channel::Peripheral.is_supported() {
            return Err(EspiError::NotSupported);
        }
        self.peripherals.register(peripheral)
    }

    /// Routes an opcode to its peripheral.
    pub fn peripheral_request(&self, opcode: u8, data: &mut u32, write: bool) -> EspiResult {
        self.peripherals.handle_request(opcode, data, write)
    }

    /// Toggles the interrupt sources of every registered peripheral.
    pub fn peripheral_intr_enable(&self, enable: bool) -> EspiResult {
        self.peripherals.intr_enable_all(enable)
    }

    /// Raises a notification on behalf of a peripheral (e.g. port 80 writes).
    pub fn peripheral_notification(&self, kind: PeripheralKind, data: u32) {
        self.events.dispatch(Event::peripheral(kind, data));
    }

    /// Programs every BAR, SRAM window and SIRQ slot, enables host access of
    /// the registered peripherals and marks the peripheral channel ready.
    ///
    /// Safe to call repeatedly. Failing steps do not stop the run; they are
    /// reported by [`Espi::last_bar_failures`] and a diagnostic event, and the
    /// call returns [`EspiError::Io`].
    pub fn configure_bars_and_sirqs(&self) -> EspiResult {
        if !Channel::Peripheral.is_supported() {
            return Err(EspiError::NotSupported);
        }
        EspiStats::bump(&self.stats.bar_runs);
        let result = self.bars.run(&self.hw, &self.config, &self.peripherals);
        if let Err(err) = result {
            let failed = self.bars.last_failures().len();
            warn!("espi: {} BAR/SIRQ steps failed", failed);
            self.stats.record_error(err);
            self.events
                .dispatch(Event::diagnostic(Diagnostic::BarConfigFailed, failed as u32));
        }
        self.mark_ready(Channel::Peripheral);
        result
    }

    /// Failures recorded by the last configurator run.
    pub fn last_bar_failures(&self) -> ArrayVec<BarFailure, MAX_BAR_FAILURES> {
        self.bars.last_failures()
    }

    /// Hands the OOB receive buffer back to the hardware.
    pub fn oob_release_rx(&self) {
        self.oob.release_rx(&self.hw);
    }

    fn track<T>(&self, result: EspiResult<T>) -> EspiResult<T> {
        if let Err(err) = &result {
            self.stats.record_error(*err);
        }
        result
    }
}

impl<H: EspiHw> EspiController for Espi<H> {
    fn configure(&self, caps: &Capabilities) -> EspiResult {
        let missing = caps.channels.bits() & !ChannelMask::supported().bits();
        if missing != 0 {
            error!("espi: channels {:#04x} requested but not built in", missing);
            self.events.dispatch(Event::diagnostic(
                Diagnostic::CapabilityMismatch,
                missing as u32,
            ));
            return Err(EspiError::NotSupported);
        }
        if caps.max_freq > self.config.max_frequency {
            error!(
                "espi: {:?} exceeds board limit {:?}",
                caps.max_freq, self.config.max_frequency
            );
            self.events.dispatch(Event::diagnostic(
                Diagnostic::CapabilityMismatch,
                (caps.max_freq as u32) << 8,
            ));
            return Err(EspiError::NotSupported);
        }

        let word = caps.to_word();
        self.hw.write_capabilities(word);
        self.advertised.store(caps.channels.bits(), Ordering::Release);
        debug!("espi: capabilities {:#010x}", word);
        Ok(())
    }

    fn channel_ready(&self, channel: Channel) -> bool {
        self.channels.is_ready(channel)
    }

    fn vwire_send(&self, signal: VwSignal, level: bool) -> EspiResult {
        if !Channel::VirtualWire.is_supported() {
            return Err(EspiError::NotSupported);
        }
        let wire = self.vw.find(signal).ok_or(EspiError::InvalidArgument)?;
        let value = if level { wire.mask() } else { 0 };
        trace!("vw {:?} <- {}", signal, level as u8);
        self.hw.vw_write(wire.direction(), wire.group, wire.mask(), value);
        Ok(())
    }

    fn vwire_receive(&self, signal: VwSignal) -> EspiResult<bool> {
        if !Channel::VirtualWire.is_supported() {
            return Err(EspiError::NotSupported);
        }
        let wire = self.vw.find(signal).ok_or(EspiError::InvalidArgument)?;
        Ok(self.hw.vw_read(wire.direction(), wire.group) & wire.mask() != 0)
    }

    fn manage_callback(&self, listener: &Arc<dyn EspiListener>, op: CallbackOp) -> EspiResult {
        self.events.manage(listener, op)
    }

    fn oob_send(&self, data: &[u8]) -> EspiResult {
        if !Channel::OutOfBand.is_supported() {
            return Err(EspiError::NotSupported);
        }
        let result = self.track(self.oob.send(&self.hw, data));
        if result.is_ok() {
            EspiStats::bump(&self.stats.oob_tx);
        }
        result
    }

    fn oob_receive(&self, buf: &mut [u8]) -> EspiResult<usize> {
        if !Channel::OutOfBand.is_supported() {
            return Err(EspiError::NotSupported);
        }
        let result = self.track(self.oob.receive(&self.hw, buf));
        if result.is_ok() {
            EspiStats::bump(&self.stats.oob_rx);
        }
        result
    }

    fn flash_read(&self, address: u32, buf: &mut [u8]) -> EspiResult {
        if !Channel::Flash.is_supported() {
            return Err(EspiError::NotSupported);
        }
        let ready = self.channels.is_ready(Channel::Flash);
        self.flash_done(self.flash.read(&self.hw, ready, address, buf))
    }

    fn flash_write(&self, address: u32, data: &[u8]) -> EspiResult {
        if !Channel::Flash.is_supported() {
            return Err(EspiError::NotSupported);
        }
        let ready = self.channels.is_ready(Channel::Flash);
        self.flash_done(self.flash.write(&self.hw, ready, address, data))
    }

    fn flash_erase(&self, address: u32, len: usize) -> EspiResult {
        if !Channel::Flash.is_supported() {
            return Err(EspiError::NotSupported);
        }
        let ready = self.channels.is_ready(Channel::Flash);
        self.flash_done(self.flash.erase(&self.hw, ready, address, len))
    }
}

impl<H: EspiHw> Espi<H> {
    fn flash_done(&self, result: EspiResult) -> EspiResult {
        if result.is_ok() {
            EspiStats::bump(&self.stats.flash_ops);
        }
        self.track(result)
    }
}

impl<H: EspiHw> core::fmt::Debug for Espi<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Espi")
            .field("channels", &self.channels)
            .field("runtime", &self.runtime)
            .field("events", &self.events)
            .field("oob", &self.oob)
            .field("flash", &self.flash)
            .finish()
    }
}
