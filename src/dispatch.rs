//! Interrupt dispatch.
//!
//! [`Espi::handle_interrupt`] is the single entry point the platform calls
//! from the eSPI interrupt vector. It reads and clears the pending sources
//! once, runs one handler per source and emits at most one event per source.
//! Nothing here waits: the transfer engines are only signalled.
//!
//! Handling order within one call:
//!
//! 1. link reset edge
//! 2. channel enable changes (PC, VW, OOB, flash)
//! 3. OOB tx-done, OOB rx, flash done
//! 4. virtual-wire banks 0 and 1

use core::sync::atomic::Ordering;

use crate::channel::{Channel, ChannelState};
use crate::espi::{Espi, EspiController, EspiStats};
use crate::event::{Diagnostic, Event};
use crate::hw::{EspiHw, InterruptStatus};
use crate::vwire::{VW_GROUPS_PER_BANK, VwDirection, VwSignal};

impl<H: EspiHw> Espi<H> {
    /// Services every pending hardware source and returns the set handled.
    pub fn handle_interrupt(&self) -> InterruptStatus {
        let status = self.hw.take_interrupts();
        if status.is_empty() {
            return status;
        }
        trace!("espi irq: {:#x}", status.bits());

        if status.contains(InterruptStatus::LINK_RESET) {
            self.on_link_reset();
        }

        for ch in Channel::ALL {
            if ch.is_supported() && status.intersects(InterruptStatus::enable_change(ch)) {
                self.on_enable_change(ch);
            }
        }

        if Channel::OutOfBand.is_supported() {
            if status.contains(InterruptStatus::OOB_TX_DONE) {
                self.on_oob_tx_done();
            }
            if status.contains(InterruptStatus::OOB_RX_DONE) {
                self.on_oob_rx();
            }
        }

        if Channel::Flash.is_supported() && status.contains(InterruptStatus::FLASH_DONE) {
            self.on_flash_done();
        }

        if Channel::VirtualWire.is_supported() {
            if status.contains(InterruptStatus::VW_BANK0) {
                self.on_vw_bank(0);
            }
            if status.contains(InterruptStatus::VW_BANK1) {
                self.on_vw_bank(1);
            }
        }

        status
    }

    fn on_link_reset(&self) {
        if self.hw.link_reset_released() {
            self.link_released();
            return;
        }

        self.runtime.in_reset.store(true, Ordering::Release);
        for ch in Channel::ALL {
            let was_ready = self.channels.is_ready(ch);
            self.channels.disable(ch);
            self.hw.set_channel_ready(ch, false);
            if was_ready {
                self.events.dispatch(Event::channel_ready(ch, false));
            }
        }
        // PLTRST# returns to its reset level with the link.
        self.runtime.pltrst_level.store(false, Ordering::Release);
        self.oob.reset();
        self.flash.reset();

        info!("espi: link reset asserted");
        self.events.dispatch(Event::bus_reset(false));
    }

    /// Rising edge of the link reset: arm every advertised channel.
    pub(crate) fn link_released(&self) {
        if !self.runtime.in_reset.swap(false, Ordering::AcqRel) {
            trace!("espi: link reset release without assertion");
            return;
        }
        let count = self.runtime.reset_count.fetch_add(1, Ordering::AcqRel) + 1;
        EspiStats::bump(&self.stats.link_resets);
        info!("espi: link reset released (#{})", count);
        self.events.dispatch(Event::bus_reset(true));

        for ch in self.advertised_channels().iter() {
            if !ch.is_supported() {
                continue;
            }
            self.channels.arm(ch);
            if ch == Channel::VirtualWire && self.hw.channel_enabled(ch) {
                // Level-active enable: handle it now, keep the interrupt off.
                self.hw.set_enable_irq(ch, false);
                debug!("espi: VW already enabled at reset release");
                self.on_enable_change(ch);
            } else {
                self.hw.set_enable_irq(ch, true);
            }
        }
    }

    fn on_enable_change(&self, ch: Channel) {
        let enabled = self.hw.channel_enabled(ch);
        let prev = self.channels.enable_changed(ch, enabled);
        debug!("espi: {} enable={} (was {:?})", ch, enabled as u8, prev);

        if !enabled {
            self.hw.set_channel_ready(ch, false);
            if prev == ChannelState::Ready {
                self.events.dispatch(Event::channel_ready(ch, false));
            }
            return;
        }

        match ch {
            // Marks the channel ready itself; failures are already reported.
            Channel::Peripheral => {
                let _ = self.configure_bars_and_sirqs();
            }
            Channel::VirtualWire => {
                self.mark_ready(ch);
                self.send_boot_done();
            }
            Channel::OutOfBand => {
                self.oob.reset();
                self.mark_ready(ch);
            }
            Channel::Flash => {
                self.flash.reset();
                self.mark_ready(ch);
            }
        }
    }

    /// Sets the hardware ready bit and moves the channel to `Ready`.
    pub(crate) fn mark_ready(&self, ch: Channel) {
        let was_ready = self.channels.is_ready(ch);
        self.hw.set_channel_ready(ch, true);
        self.channels.mark_ready(ch);
        if !was_ready {
            info!("espi: {} ready", ch);
            self.events.dispatch(Event::channel_ready(ch, true));
        }
    }

    fn send_boot_done(&self) {
        if !self.config.auto_boot_done {
            return;
        }
        let result = match self.vwire_receive(VwSignal::TargetBootDone) {
            Ok(true) => return,
            Ok(false) => self.vwire_send_group(&[
                (VwSignal::TargetBootDone, true),
                (VwSignal::TargetBootStatus, true),
            ]),
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => debug!("espi: boot done sent"),
            Err(err) => {
                warn!("espi: boot done failed: {:?}", err);
                self.events
                    .dispatch(Event::diagnostic(Diagnostic::BootDoneFailed, 0));
            }
        }
    }

    fn on_oob_tx_done(&self) {
        if !self.oob.on_tx_done(&self.hw) {
            debug!("espi: OOB tx done with nobody waiting");
            self.events.dispatch(Event::diagnostic(
                Diagnostic::SpuriousCompletion,
                Channel::OutOfBand as u32,
            ));
        }
    }

    fn on_oob_rx(&self) {
        if let Some(len) = self.oob.on_rx(&self.hw) {
            self.events.dispatch(Event::oob_received(len));
        }
    }

    fn on_flash_done(&self) {
        let (status, waiting) = self.flash.on_done(&self.hw);
        if !waiting {
            debug!("espi: flash done with nobody waiting");
            self.events.dispatch(Event::diagnostic(
                Diagnostic::SpuriousCompletion,
                Channel::Flash as u32,
            ));
            return;
        }
        self.events.dispatch(Event::flash_done(status.bits()));
    }

    fn on_vw_bank(&self, bank: u8) {
        let mut pending = self.hw.take_vw_status(bank);
        while pending != 0 {
            let n = pending.trailing_zeros() as u8;
            pending &= pending - 1;

            let group = bank * VW_GROUPS_PER_BANK + n / 4;
            let bit = n % 4;
            let Some(wire) = self
                .vw
                .find_by_position(VwDirection::ControllerToTarget, group, bit)
            else {
                debug!("espi: vw change at g{} b{} not in table", group, bit);
                self.events.dispatch(Event::diagnostic(
                    Diagnostic::UnknownVirtualWire,
                    (group as u32) << 8 | bit as u32,
                ));
                continue;
            };
            let bits = self.hw.vw_read(VwDirection::ControllerToTarget, group);
            let level = bits & wire.mask() != 0;
            self.on_vwire(wire.signal, level);
        }
    }

    fn on_vwire(&self, signal: VwSignal, level: bool) {
        trace!("vw {:?} -> {}", signal, level as u8);

        if signal == VwSignal::PltRst {
            let prev = self.runtime.pltrst_level.swap(level, Ordering::AcqRel);
            if level && !prev {
                info!("espi: PLTRST# de-asserted");
                if Channel::Peripheral.is_supported() {
                    let _ = self.configure_bars_and_sirqs();
                }
            }
        }

        if signal.is_sleep() {
            self.runtime.sleep.record(signal, level);
        }

        if self.config.auto_warning_ack {
            if let Some(ack) = signal.warning_ack() {
                if let Err(err) = self.vwire_send(ack, level) {
                    debug!("espi: no {:?} to answer {:?}: {:?}", ack, signal, err);
                }
            }
        }

        self.events.dispatch(Event::vwire(signal, level));
    }
}
