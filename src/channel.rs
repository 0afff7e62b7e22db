//! Channel enable/ready state tracking.
//!
//! Every eSPI channel is negotiated independently by the host. The state of
//! each channel lives in a single `AtomicU8` so the interrupt path and caller
//! threads observe transitions without locking.
//!
//! ```text
//! ┌──────────┐  link reset  ┌───────┐ enable=1 ┌─────────┐  init done  ┌───────┐
//! │ Disabled │ ───────────> │ Armed │ ───────> │ Enabled │ ──────────> │ Ready │
//! └──────────┘  de-assert   └───────┘ <─────── └─────────┘             └───────┘
//!       ^                       ^      enable=0                            │
//!       │                       └──────────────────────────────────────────┘
//!       └──── link reset asserted (from any state)              enable=0
//! ```

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

/// Number of eSPI channels.
pub const CHANNEL_COUNT: usize = 4;

/// One of the four independently negotiated eSPI channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Channel {
    /// Peripheral channel (host I/O and memory cycles).
    Peripheral = 0,
    /// Virtual-wire channel.
    VirtualWire = 1,
    /// Out-of-band messaging channel.
    OutOfBand = 2,
    /// Flash access channel.
    Flash = 3,
}

impl Channel {
    /// All channels in hardware bit order.
    pub const ALL: [Channel; CHANNEL_COUNT] = [
        Channel::Peripheral,
        Channel::VirtualWire,
        Channel::OutOfBand,
        Channel::Flash,
    ];

    /// Position of the channel in per-channel arrays and capability bit fields.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Capability bit for this channel.
    #[inline]
    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Whether support for this channel was compiled in.
    pub const fn is_supported(self) -> bool {
        match self {
            Channel::Peripheral => cfg!(feature = "peripheral-channel"),
            Channel::VirtualWire => cfg!(feature = "vwire-channel"),
            Channel::OutOfBand => cfg!(feature = "oob-channel"),
            Channel::Flash => cfg!(feature = "flash-channel"),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::Peripheral => "PC",
            Channel::VirtualWire => "VW",
            Channel::OutOfBand => "OOB",
            Channel::Flash => "FLASH",
        };
        f.write_str(name)
    }
}

/// Negotiation state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    /// Link is in reset or the channel was never armed.
    Disabled = 0,
    /// Enable-change interrupt armed, waiting for the host.
    Armed = 1,
    /// Host enabled the channel, initialization in progress.
    Enabled = 2,
    /// Ready bit set, host may issue transactions.
    Ready = 3,
}

impl ChannelState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => ChannelState::Armed,
            2 => ChannelState::Enabled,
            3 => ChannelState::Ready,
            _ => ChannelState::Disabled,
        }
    }
}

/// Bit set of channels, as used in capability negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelMask(u8);

impl ChannelMask {
    /// No channel.
    pub const NONE: ChannelMask = ChannelMask(0);

    /// Every channel.
    pub const ALL: ChannelMask = ChannelMask(0x0f);

    /// Builds a mask from raw capability bits; bits above the four channels are dropped.
    pub const fn from_bits(bits: u8) -> Self {
        ChannelMask(bits & 0x0f)
    }

    /// Raw capability bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Adds a channel to the mask.
    pub const fn with(self, channel: Channel) -> Self {
        ChannelMask(self.0 | channel.bit())
    }

    /// Checks whether the channel is part of the mask.
    pub const fn contains(self, channel: Channel) -> bool {
        self.0 & channel.bit() != 0
    }

    /// Channels whose support was compiled in.
    pub fn supported() -> Self {
        Channel::ALL
            .iter()
            .filter(|ch| ch.is_supported())
            .fold(ChannelMask::NONE, |mask, ch| mask.with(*ch))
    }

    /// Iterates over the channels in the mask.
    pub fn iter(self) -> impl Iterator<Item = Channel> {
        Channel::ALL.into_iter().filter(move |ch| self.contains(*ch))
    }
}

/// Per-channel negotiation state shared by interrupt and thread context.
pub struct ChannelSet {
    states: [AtomicU8; CHANNEL_COUNT],
}

impl ChannelSet {
    /// Creates a set with every channel `Disabled`.
    pub const fn new() -> Self {
        Self {
            states: [
                AtomicU8::new(ChannelState::Disabled as u8),
                AtomicU8::new(ChannelState::Disabled as u8),
                AtomicU8::new(ChannelState::Disabled as u8),
                AtomicU8::new(ChannelState::Disabled as u8),
            ],
        }
    }

    /// Current state of a channel.
    #[inline]
    pub fn state(&self, channel: Channel) -> ChannelState {
        ChannelState::from_raw(self.states[channel.index()].load(Ordering::Acquire))
    }

    /// Checks whether the channel completed negotiation.
    #[inline]
    pub fn is_ready(&self, channel: Channel) -> bool {
        self.state(channel) == ChannelState::Ready
    }

    fn set(&self, channel: Channel, state: ChannelState) -> ChannelState {
        let prev = self.states[channel.index()].swap(state as u8, Ordering::AcqRel);
        ChannelState::from_raw(prev)
    }

    /// Link reset asserted: the channel returns to `Disabled`.
    pub fn disable(&self, channel: Channel) {
        self.set(channel, ChannelState::Disabled);
    }

    /// Link reset released: the channel waits for the host to enable it.
    pub fn arm(&self, channel: Channel) {
        self.set(channel, ChannelState::Armed);
    }

    /// Applies an enable-change reported by the host.
    ///
    /// `enable == true` moves the channel to `Enabled`; the caller runs the
    /// channel-specific initialization and then calls [`ChannelSet::mark_ready`].
    /// `enable == false` reverts the channel to `Armed` from any state.
    ///
    /// Returns the previous state.
    pub fn enable_changed(&self, channel: Channel, enable: bool) -> ChannelState {
        if enable {
            self.set(channel, ChannelState::Enabled)
        } else {
            self.set(channel, ChannelState::Armed)
        }
    }

    /// Marks the channel ready after its initialization completed.
    pub fn mark_ready(&self, channel: Channel) {
        self.set(channel, ChannelState::Ready);
    }
}

impl Default for ChannelSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChannelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSet")
            .field("pc", &self.state(Channel::Peripheral))
            .field("vw", &self.state(Channel::VirtualWire))
            .field("oob", &self.state(Channel::OutOfBand))
            .field("flash", &self.state(Channel::Flash))
            .finish()
    }
}
