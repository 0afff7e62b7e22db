#![cfg(all(
    feature = "peripheral-channel",
    feature = "vwire-channel",
    feature = "oob-channel",
    feature = "flash-channel"
))]

mod common;

use std::sync::Arc;
use std::sync::Mutex;

use axespi::{
    Capabilities, CallbackOp, Channel, ChannelMask, ChannelState, DeviceConfig, Diagnostic, Espi,
    EspiController, EspiError, EspiListener, Event, EventKind, EventMask, FnListener, IoMode,
    MaxFrequency, PayloadSize, VwDirection, VwSignal, VwTable,
};
use common::*;

#[test]
fn test_init_programs_vw_table() {
    let espi = new_espi(DeviceConfig::default());
    let st = espi.hw().state.lock().unwrap();

    assert!(st.pinctrl.is_some());
    assert_eq!(st.vw_flags.len(), VwSignal::ALL.len());
    assert!(st
        .vw_groups
        .contains(&(VwDirection::TargetToController, 1, 0x05)));
    assert!(st
        .vw_groups
        .contains(&(VwDirection::ControllerToTarget, 1, 0x03)));
}

#[test]
fn test_link_release_arms_channels() {
    let espi = new_espi(DeviceConfig::default());
    assert!(espi.runtime().in_reset());
    for ch in Channel::ALL {
        assert_eq!(espi.channel_state(ch), ChannelState::Disabled);
    }

    release_link(&espi);
    assert!(!espi.runtime().in_reset());
    assert_eq!(espi.runtime().reset_count(), 1);
    for ch in Channel::ALL {
        assert_eq!(espi.channel_state(ch), ChannelState::Armed);
        assert!(espi.hw().enable_irq_armed(ch));
        assert!(!espi.channel_ready(ch));
    }

    // A second release without assertion is not a new edge.
    release_link(&espi);
    assert_eq!(espi.runtime().reset_count(), 1);
}

#[test]
fn test_enable_sequence_per_channel() {
    let espi = new_espi(DeviceConfig::default());
    release_link(&espi);

    for ch in Channel::ALL {
        host_enable(&espi, ch, true);
        assert_eq!(espi.channel_state(ch), ChannelState::Ready, "{ch}");
        assert!(espi.channel_ready(ch));
        assert!(espi.hw().ready_bit(ch));

        host_enable(&espi, ch, false);
        assert_eq!(espi.channel_state(ch), ChannelState::Armed, "{ch}");
        assert!(!espi.channel_ready(ch));
        assert!(!espi.hw().ready_bit(ch));

        host_enable(&espi, ch, true);
        assert_eq!(espi.channel_state(ch), ChannelState::Ready, "{ch}");
        assert!(espi.channel_ready(ch));
    }
}

#[test]
fn test_link_reset_assertion_drops_everything() {
    let espi = ready_espi(DeviceConfig::default());
    for ch in Channel::ALL {
        assert!(espi.channel_ready(ch));
    }

    assert_link_reset(&espi);
    assert!(espi.runtime().in_reset());
    for ch in Channel::ALL {
        assert_eq!(espi.channel_state(ch), ChannelState::Disabled);
        assert!(!espi.hw().ready_bit(ch));
    }

    release_link(&espi);
    assert_eq!(espi.runtime().reset_count(), 2);
    assert_eq!(espi.stats().link_resets(), 2);
}

#[test]
fn test_vw_already_enabled_at_release() {
    let espi = new_espi(DeviceConfig::default());
    espi.hw().set_enabled(Channel::VirtualWire, true);

    release_link(&espi);

    assert!(espi.channel_ready(Channel::VirtualWire));
    assert!(!espi.hw().enable_irq_armed(Channel::VirtualWire));
    assert!(espi.hw().enable_irq_armed(Channel::Flash));
}

#[test]
fn test_link_already_released_at_init() {
    let hw = common::MockHw::new();
    hw.set_link_released(true);
    let espi = axespi::Espi::new(
        hw,
        DeviceConfig::default(),
        Arc::new(axespi::VwTable::standard()),
    )
    .unwrap();
    espi.init().unwrap();

    assert_eq!(espi.runtime().reset_count(), 1);
    assert_eq!(espi.channel_state(Channel::Flash), ChannelState::Armed);
}

#[test]
fn test_boot_done_grouped_write() {
    let espi = new_espi(DeviceConfig::default());
    release_link(&espi);
    espi.hw().state.lock().unwrap().vw_writes.clear();

    host_enable(&espi, Channel::VirtualWire, true);
    assert!(espi.channel_ready(Channel::VirtualWire));

    let writes = espi.hw().state.lock().unwrap().vw_writes.clone();
    // Bits 0 (boot done) and 3 (boot status) of group 1 in one write.
    assert_eq!(
        writes,
        vec![(VwDirection::TargetToController, 1, 0b1001, 0b1001)]
    );
    assert_eq!(espi.vwire_receive(VwSignal::TargetBootDone), Ok(true));
    assert_eq!(espi.vwire_receive(VwSignal::TargetBootStatus), Ok(true));

    // Re-enable: boot done already set, nothing written.
    host_enable(&espi, Channel::VirtualWire, false);
    host_enable(&espi, Channel::VirtualWire, true);
    assert_eq!(espi.hw().state.lock().unwrap().vw_writes.len(), 1);
}

#[test]
fn test_boot_done_disabled() {
    let mut config = DeviceConfig::default();
    config.auto_boot_done = false;
    let espi = ready_espi(config);
    assert_eq!(espi.vwire_receive(VwSignal::TargetBootDone), Ok(false));
}

#[test]
fn test_configure_capabilities() {
    let espi = new_espi(DeviceConfig::default());
    let caps = Capabilities {
        max_freq: MaxFrequency::Mhz33,
        io_mode: IoMode::SingleQuad,
        channels: ChannelMask::NONE
            .with(Channel::Peripheral)
            .with(Channel::VirtualWire),
        alert_pin: false,
        oob_payload: PayloadSize::Bytes64,
        flash_payload: PayloadSize::Bytes64,
    };
    espi.configure(&caps).unwrap();
    assert_eq!(espi.hw().state.lock().unwrap().caps, Some(caps.to_word()));

    // Only advertised channels are armed.
    release_link(&espi);
    assert_eq!(espi.channel_state(Channel::VirtualWire), ChannelState::Armed);
    assert_eq!(espi.channel_state(Channel::Flash), ChannelState::Disabled);
}

#[test]
fn test_configure_rejects_frequency_above_board_limit() {
    let mut config = DeviceConfig::default();
    config.max_frequency = MaxFrequency::Mhz25;
    let espi = new_espi(config);

    let caps = Capabilities {
        max_freq: MaxFrequency::Mhz50,
        ..Capabilities::default()
    };
    assert_eq!(espi.configure(&caps), Err(EspiError::NotSupported));
    assert_eq!(espi.hw().state.lock().unwrap().caps, None);

    let events = espi.drain_events(usize::MAX);
    assert_eq!(
        events,
        [Event::diagnostic(
            Diagnostic::CapabilityMismatch,
            (MaxFrequency::Mhz50 as u32) << 8
        )]
    );
}

#[test]
fn test_init_reports_pin_config_failure() {
    let hw = MockHw::new();
    hw.state.lock().unwrap().fail_pinctrl = true;
    let espi = Espi::new(hw, DeviceConfig::default(), Arc::new(VwTable::standard())).unwrap();

    assert_eq!(espi.init(), Err(EspiError::Io));
    assert_eq!(espi.hw().state.lock().unwrap().pinctrl, None);
    assert_eq!(
        espi.drain_events(usize::MAX),
        [Event::diagnostic(Diagnostic::PinConfigFailed, 0)]
    );
}

#[test]
fn test_channel_events() {
    let espi = new_espi(DeviceConfig::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener: Arc<dyn EspiListener> = Arc::new(FnListener::new(
        EventMask::of(EventKind::BusReset).with(EventKind::ChannelReady),
        move |e: &Event| sink.lock().unwrap().push(*e),
    ));
    espi.manage_callback(&listener, CallbackOp::Register).unwrap();

    release_link(&espi);
    host_enable(&espi, Channel::Flash, true);
    host_enable(&espi, Channel::Flash, false);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            Event::bus_reset(true),
            Event::channel_ready(Channel::Flash, true),
            Event::channel_ready(Channel::Flash, false),
        ]
    );

    espi.manage_callback(&listener, CallbackOp::Unregister).unwrap();
    assert_link_reset(&espi);
    assert!(espi.drain_events(usize::MAX).contains(&Event::bus_reset(false)));
}
