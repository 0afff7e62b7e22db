#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use axespi::{
    Channel, DeviceConfig, Espi, EspiError, EspiHw, EspiResult, FlashDescriptor, InterruptStatus,
    PinConfigHandle, TransferStatus, VwDirection, VwTable,
};

/// Register contents and write logs of the mock controller.
#[derive(Default)]
pub struct HwState {
    pub pinctrl: Option<PinConfigHandle>,
    pub caps: Option<u32>,
    pub vw_c2t: [u8; 16],
    pub vw_t2c: [u8; 16],
    pub vw_writes: Vec<(VwDirection, u8, u8, u8)>,
    pub vw_groups: Vec<(VwDirection, u8, u8)>,
    pub vw_flags: Vec<(VwDirection, u8, u8, u8)>,
    pub io_bars: BTreeMap<u8, (u16, bool)>,
    pub mem_bars: BTreeMap<u8, (u32, u32, bool)>,
    pub sram_windows: BTreeMap<u8, (u32, u32, u8, u8)>,
    pub sirqs: BTreeMap<u8, u8>,
    pub fail_pinctrl: bool,
    pub fail_io_bar: Option<u8>,
    pub fail_sirq: Option<u8>,
    pub oob_tx_frames: Vec<Vec<u8>>,
    pub oob_rx_frame: Vec<u8>,
    pub oob_rx_releases: usize,
    pub flash_descs: Vec<FlashDescriptor>,
    pub flash_written: Vec<u8>,
    pub flash_contents: Vec<u8>,
    pub flash_status_clears: usize,
}

pub struct MockHw {
    start: Instant,
    pub state: Mutex<HwState>,
    pending: AtomicU32,
    vw_status: [AtomicU32; 2],
    link_released: AtomicBool,
    enabled: [AtomicBool; 4],
    ready: [AtomicBool; 4],
    enable_irq: [AtomicBool; 4],
    oob_tx_status: AtomicU32,
    oob_rx_status: AtomicU32,
    flash_status: AtomicU32,
    oob_tx_starts: AtomicUsize,
    flash_starts: AtomicUsize,
}

impl MockHw {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            state: Mutex::new(HwState::default()),
            pending: AtomicU32::new(0),
            vw_status: [AtomicU32::new(0), AtomicU32::new(0)],
            link_released: AtomicBool::new(false),
            enabled: Default::default(),
            ready: Default::default(),
            enable_irq: Default::default(),
            oob_tx_status: AtomicU32::new(0),
            oob_rx_status: AtomicU32::new(0),
            flash_status: AtomicU32::new(0),
            oob_tx_starts: AtomicUsize::new(0),
            flash_starts: AtomicUsize::new(0),
        }
    }

    pub fn raise(&self, status: InterruptStatus) {
        self.pending.fetch_or(status.bits(), Ordering::SeqCst);
    }

    pub fn set_link_released(&self, released: bool) {
        self.link_released.store(released, Ordering::SeqCst);
    }

    pub fn set_enabled(&self, ch: Channel, enabled: bool) {
        self.enabled[ch.index()].store(enabled, Ordering::SeqCst);
    }

    pub fn ready_bit(&self, ch: Channel) -> bool {
        self.ready[ch.index()].load(Ordering::SeqCst)
    }

    pub fn enable_irq_armed(&self, ch: Channel) -> bool {
        self.enable_irq[ch.index()].load(Ordering::SeqCst)
    }

    /// Host drives a controller→target wire and latches its status bit.
    pub fn host_drive(&self, group: u8, bit: u8, level: bool) {
        {
            let mut st = self.state.lock().unwrap();
            let reg = &mut st.vw_c2t[group as usize];
            if level {
                *reg |= 1 << bit;
            } else {
                *reg &= !(1 << bit);
            }
        }
        let bank = group / 8;
        let n = (group % 8) * 4 + bit;
        self.vw_status[bank as usize].fetch_or(1 << n, Ordering::SeqCst);
        self.raise(if bank == 0 {
            InterruptStatus::VW_BANK0
        } else {
            InterruptStatus::VW_BANK1
        });
    }

    pub fn set_flash_status(&self, bits: u32) {
        self.flash_status.store(bits, Ordering::SeqCst);
    }

    pub fn flash_status_bits(&self) -> u32 {
        self.flash_status.load(Ordering::SeqCst)
    }

    pub fn set_oob_tx_status(&self, bits: u32) {
        self.oob_tx_status.store(bits, Ordering::SeqCst);
    }

    pub fn set_oob_rx(&self, frame: &[u8], status: u32) {
        self.state.lock().unwrap().oob_rx_frame = frame.to_vec();
        self.oob_rx_status.store(status, Ordering::SeqCst);
    }

    pub fn oob_tx_starts(&self) -> usize {
        self.oob_tx_starts.load(Ordering::SeqCst)
    }

    pub fn flash_starts(&self) -> usize {
        self.flash_starts.load(Ordering::SeqCst)
    }
}

impl EspiHw for MockHw {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn apply_pinctrl(&self, handle: PinConfigHandle) -> EspiResult {
        let mut st = self.state.lock().unwrap();
        if st.fail_pinctrl {
            return Err(EspiError::Io);
        }
        st.pinctrl = Some(handle);
        Ok(())
    }

    fn write_capabilities(&self, word: u32) {
        self.state.lock().unwrap().caps = Some(word);
    }

    fn take_interrupts(&self) -> InterruptStatus {
        InterruptStatus::from_bits(self.pending.swap(0, Ordering::SeqCst))
    }

    fn link_reset_released(&self) -> bool {
        self.link_released.load(Ordering::SeqCst)
    }

    fn set_enable_irq(&self, channel: Channel, enable: bool) {
        self.enable_irq[channel.index()].store(enable, Ordering::SeqCst);
    }

    fn channel_enabled(&self, channel: Channel) -> bool {
        self.enabled[channel.index()].load(Ordering::SeqCst)
    }

    fn set_channel_ready(&self, channel: Channel, ready: bool) {
        self.ready[channel.index()].store(ready, Ordering::SeqCst);
    }

    fn vw_configure_group(&self, direction: VwDirection, group: u8, host_index: u8) {
        self.state
            .lock()
            .unwrap()
            .vw_groups
            .push((direction, group, host_index));
    }

    fn vw_configure_wire(&self, direction: VwDirection, group: u8, bit: u8, flags: u8) {
        self.state
            .lock()
            .unwrap()
            .vw_flags
            .push((direction, group, bit, flags));
    }

    fn vw_read(&self, direction: VwDirection, group: u8) -> u8 {
        let st = self.state.lock().unwrap();
        match direction {
            VwDirection::ControllerToTarget => st.vw_c2t[group as usize],
            VwDirection::TargetToController => st.vw_t2c[group as usize],
        }
    }

    fn vw_write(&self, direction: VwDirection, group: u8, mask: u8, value: u8) {
        let mut st = self.state.lock().unwrap();
        st.vw_writes.push((direction, group, mask, value));
        let reg = match direction {
            VwDirection::ControllerToTarget => &mut st.vw_c2t[group as usize],
            VwDirection::TargetToController => &mut st.vw_t2c[group as usize],
        };
        *reg = (*reg & !mask) | (value & mask);
    }

    fn take_vw_status(&self, bank: u8) -> u32 {
        self.vw_status[bank as usize].swap(0, Ordering::SeqCst)
    }

    fn write_io_bar(&self, ldn: u8, addr: u16, valid: bool) -> EspiResult {
        let mut st = self.state.lock().unwrap();
        if st.fail_io_bar == Some(ldn) {
            return Err(EspiError::Io);
        }
        st.io_bars.insert(ldn, (addr, valid));
        Ok(())
    }

    fn write_mem_bar(&self, ldn: u8, addr_lo: u32, addr_hi: u32, valid: bool) -> EspiResult {
        self.state
            .lock()
            .unwrap()
            .mem_bars
            .insert(ldn, (addr_lo, addr_hi, valid));
        Ok(())
    }

    fn write_sram_window(
        &self,
        index: u8,
        addr_lo: u32,
        addr_hi: u32,
        size_log2: u8,
        access: u8,
    ) -> EspiResult {
        self.state
            .lock()
            .unwrap()
            .sram_windows
            .insert(index, (addr_lo, addr_hi, size_log2, access));
        Ok(())
    }

    fn write_sirq(&self, slot: u8, irq: u8) -> EspiResult {
        let mut st = self.state.lock().unwrap();
        if st.fail_sirq == Some(slot) {
            return Err(EspiError::Io);
        }
        st.sirqs.insert(slot, irq);
        Ok(())
    }

    fn oob_tx_start(&self, frame: &[u8]) {
        assert_eq!(frame.as_ptr() as usize % 4, 0, "tx buffer must be word aligned");
        self.state.lock().unwrap().oob_tx_frames.push(frame.to_vec());
        self.oob_tx_starts.fetch_add(1, Ordering::SeqCst);
    }

    fn oob_tx_status(&self) -> TransferStatus {
        TransferStatus::from_bits(self.oob_tx_status.load(Ordering::SeqCst))
    }

    fn oob_rx_status(&self) -> TransferStatus {
        TransferStatus::from_bits(self.oob_rx_status.load(Ordering::SeqCst))
    }

    fn oob_rx_len(&self) -> usize {
        self.state.lock().unwrap().oob_rx_frame.len()
    }

    fn oob_rx_read(&self, buf: &mut [u8]) {
        let st = self.state.lock().unwrap();
        buf.copy_from_slice(&st.oob_rx_frame[..buf.len()]);
    }

    fn oob_rx_release(&self) {
        let mut st = self.state.lock().unwrap();
        st.oob_rx_releases += 1;
        st.oob_rx_frame.clear();
    }

    fn flash_start(&self, desc: &FlashDescriptor, data: &[u8]) {
        let mut st = self.state.lock().unwrap();
        st.flash_descs.push(*desc);
        st.flash_written.extend_from_slice(data);
        drop(st);
        self.flash_starts.fetch_add(1, Ordering::SeqCst);
    }

    fn flash_status(&self) -> TransferStatus {
        TransferStatus::from_bits(self.flash_status.load(Ordering::SeqCst))
    }

    fn flash_read_data(&self, buf: &mut [u8]) {
        let st = self.state.lock().unwrap();
        for (i, b) in buf.iter_mut().enumerate() {
            *b = st.flash_contents.get(i).copied().unwrap_or(0xff);
        }
    }

    fn flash_clear_status(&self) {
        self.flash_status.store(0, Ordering::SeqCst);
        self.state.lock().unwrap().flash_status_clears += 1;
    }
}

pub type TestEspi = Arc<Espi<MockHw>>;

/// Word-aligned byte buffer for flash calls.
#[repr(C, align(4))]
pub struct Aligned<const N: usize>(pub [u8; N]);

pub fn new_espi(config: DeviceConfig) -> TestEspi {
    let espi = Espi::new(MockHw::new(), config, Arc::new(VwTable::standard())).unwrap();
    espi.init().unwrap();
    Arc::new(espi)
}

/// Releases the link reset and services the interrupt.
pub fn release_link(espi: &TestEspi) {
    espi.hw().set_link_released(true);
    espi.hw().raise(InterruptStatus::LINK_RESET);
    espi.handle_interrupt();
}

pub fn assert_link_reset(espi: &TestEspi) {
    espi.hw().set_link_released(false);
    espi.hw().raise(InterruptStatus::LINK_RESET);
    espi.handle_interrupt();
}

/// Host toggles a channel enable and the interrupt is serviced.
pub fn host_enable(espi: &TestEspi, ch: Channel, enable: bool) {
    espi.hw().set_enabled(ch, enable);
    espi.hw().raise(InterruptStatus::enable_change(ch));
    espi.handle_interrupt();
}

/// Engine with the link out of reset and every channel ready.
pub fn ready_espi(config: DeviceConfig) -> TestEspi {
    let espi = new_espi(config);
    release_link(&espi);
    for ch in Channel::ALL {
        host_enable(&espi, ch, true);
    }
    espi
}

fn wait_for(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

/// Completes the next flash transfer with `status` from another thread.
pub fn complete_next_flash(espi: &TestEspi, status: u32) -> JoinHandle<bool> {
    let espi = Arc::clone(espi);
    let before = espi.hw().flash_starts();
    thread::spawn(move || {
        if !wait_for(|| espi.hw().flash_starts() > before) {
            return false;
        }
        espi.hw().set_flash_status(status);
        espi.hw().raise(InterruptStatus::FLASH_DONE);
        espi.handle_interrupt();
        true
    })
}

/// Completes the next OOB transmit with `status` from another thread.
pub fn complete_next_oob_tx(espi: &TestEspi, status: u32) -> JoinHandle<bool> {
    let espi = Arc::clone(espi);
    let before = espi.hw().oob_tx_starts();
    thread::spawn(move || {
        if !wait_for(|| espi.hw().oob_tx_starts() > before) {
            return false;
        }
        espi.hw().set_oob_tx_status(status);
        espi.hw().raise(InterruptStatus::OOB_TX_DONE);
        espi.handle_interrupt();
        true
    })
}

/// Delivers an OOB frame after `delay`.
pub fn deliver_oob_frame(espi: &TestEspi, frame: &[u8], delay: Duration) -> JoinHandle<()> {
    let espi = Arc::clone(espi);
    let frame = frame.to_vec();
    thread::spawn(move || {
        thread::sleep(delay);
        espi.hw().set_oob_rx(&frame, TransferStatus::DONE);
        espi.hw().raise(InterruptStatus::OOB_RX_DONE);
        espi.handle_interrupt();
    })
}
