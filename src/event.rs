//! Structured events and listener delivery.
//!
//! The interrupt path builds one [`Event`] per handled source and hands it to
//! the [`EventDispatcher`], which
//!
//! - appends it to a bounded queue drained by the owning task, and
//! - calls every registered [`EspiListener`] whose interest mask matches.
//!
//! ```text
//! handle_interrupt()
//!        │ dispatch(Event)
//!        ▼
//! ┌──────────────────┐   on_event()   ┌──────────────┐
//! │ EventDispatcher  │ ─────────────> │ EspiListener │ (interest mask)
//! │  - listeners     │                └──────────────┘
//! │  - queue (32)    │ <── drain_events(max) ── owning task
//! └──────────────────┘
//! ```

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::sync::atomic::{AtomicU64, Ordering};

use arrayvec::ArrayVec;
use critical_section::Mutex;

use crate::channel::Channel;
use crate::error::{EspiError, EspiResult};
use crate::peripheral::PeripheralKind;
use crate::vwire::VwSignal;

/// Maximum number of registered listeners.
pub const MAX_LISTENERS: usize = 8;

/// Depth of the event queue.
pub const EVENT_QUEUE_DEPTH: usize = 32;

/// Event category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    /// eSPI link reset changed level; `data` is 1 when released.
    BusReset = 0,
    /// A channel became ready (`data` = 1) or dropped readiness (`data` = 0).
    ChannelReady = 1,
    /// A controller→target virtual wire changed; `data` is the level.
    VWireReceived = 2,
    /// An OOB frame arrived; `data` is its length.
    OobReceived = 3,
    /// A flash transfer completed; `data` is the raw status.
    FlashDone = 4,
    /// A host peripheral raised a notification; `data` is peripheral defined.
    PeripheralNotification = 5,
    /// A negotiation or reconfiguration step failed.
    Diagnostic = 6,
}

/// Failure reported through a [`EventKind::Diagnostic`] event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    /// One or more BAR/SIRQ steps failed; `data` counts them.
    BarConfigFailed,
    /// The automatic boot-done write failed.
    BootDoneFailed,
    /// A receive-status bit had no table entry; `data` is group << 8 | bit.
    UnknownVirtualWire,
    /// A transfer completion arrived with nobody waiting.
    SpuriousCompletion,
    /// Requested capabilities exceed the build or the board. `data` holds
    /// the channel bits that are not built in, or the rejected frequency
    /// code shifted left by 8.
    CapabilityMismatch,
    /// The board pin configuration could not be applied.
    PinConfigFailed,
}

/// What an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDetail {
    /// No further qualification.
    None,
    /// Channel concerned.
    Channel(Channel),
    /// Virtual wire concerned.
    Signal(VwSignal),
    /// Peripheral that raised the notification.
    Peripheral(PeripheralKind),
    /// Failure code.
    Diagnostic(Diagnostic),
}

/// One notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Category.
    pub kind: EventKind,
    /// Qualifier.
    pub detail: EventDetail,
    /// Payload.
    pub data: u32,
}

impl Event {
    /// Link reset changed level.
    pub const fn bus_reset(released: bool) -> Self {
        Self {
            kind: EventKind::BusReset,
            detail: EventDetail::None,
            data: released as u32,
        }
    }

    /// Channel readiness changed.
    pub const fn channel_ready(channel: Channel, ready: bool) -> Self {
        Self {
            kind: EventKind::ChannelReady,
            detail: EventDetail::Channel(channel),
            data: ready as u32,
        }
    }

    /// Virtual wire received.
    pub const fn vwire(signal: VwSignal, level: bool) -> Self {
        Self {
            kind: EventKind::VWireReceived,
            detail: EventDetail::Signal(signal),
            data: level as u32,
        }
    }

    /// OOB frame received.
    pub const fn oob_received(len: usize) -> Self {
        Self {
            kind: EventKind::OobReceived,
            detail: EventDetail::Channel(Channel::OutOfBand),
            data: len as u32,
        }
    }

    /// Flash transfer finished.
    pub const fn flash_done(status: u32) -> Self {
        Self {
            kind: EventKind::FlashDone,
            detail: EventDetail::Channel(Channel::Flash),
            data: status,
        }
    }

    /// Peripheral notification.
    pub const fn peripheral(kind: PeripheralKind, data: u32) -> Self {
        Self {
            kind: EventKind::PeripheralNotification,
            detail: EventDetail::Peripheral(kind),
            data,
        }
    }

    /// Diagnostic.
    pub const fn diagnostic(code: Diagnostic, data: u32) -> Self {
        Self {
            kind: EventKind::Diagnostic,
            detail: EventDetail::Diagnostic(code),
            data,
        }
    }
}

/// Set of event kinds a listener wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask(u32);

impl EventMask {
    /// Nothing.
    pub const NONE: Self = Self(0);
    /// Every kind.
    pub const ALL: Self = Self(0x7f);

    /// Mask holding a single kind.
    pub const fn of(kind: EventKind) -> Self {
        Self(1 << kind as u32)
    }

    /// Adds a kind.
    pub const fn with(self, kind: EventKind) -> Self {
        Self(self.0 | 1 << kind as u32)
    }

    /// Checks whether the kind is selected.
    pub const fn contains(self, kind: EventKind) -> bool {
        self.0 & (1 << kind as u32) != 0
    }
}

impl Default for EventMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Receiver of engine events.
///
/// `on_event` runs in interrupt context: it must not block and must not call
/// back into the transfer engines.
pub trait EspiListener: Send + Sync {
    /// Kinds this listener receives.
    fn interest(&self) -> EventMask {
        EventMask::ALL
    }

    /// Handles one event.
    fn on_event(&self, event: &Event);
}

/// Listener built from a closure.
pub struct FnListener<F> {
    mask: EventMask,
    f: F,
}

impl<F> FnListener<F>
where
    F: Fn(&Event) + Send + Sync,
{
    /// Wraps `f`, delivering only the kinds in `mask`.
    pub fn new(mask: EventMask, f: F) -> Self {
        Self { mask, f }
    }
}

impl<F> EspiListener for FnListener<F>
where
    F: Fn(&Event) + Send + Sync,
{
    fn interest(&self) -> EventMask {
        self.mask
    }

    fn on_event(&self, event: &Event) {
        (self.f)(event)
    }
}

/// Register or unregister a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOp {
    /// Add the listener.
    Register,
    /// Remove the listener.
    Unregister,
}

type ListenerSet = ArrayVec<Arc<dyn EspiListener>, MAX_LISTENERS>;

fn same_listener(a: &Arc<dyn EspiListener>, b: &Arc<dyn EspiListener>) -> bool {
    core::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Listener set plus the bounded event queue.
///
/// Both are shared with the interrupt path and only touched inside
/// interrupt-masked critical sections. Listeners run outside of them.
pub struct EventDispatcher {
    listeners: Mutex<RefCell<ListenerSet>>,
    queue: Mutex<RefCell<VecDeque<Event>>>,
    dispatched: AtomicU64,
    dropped: AtomicU64,
}

impl EventDispatcher {
    /// Creates a dispatcher with no listeners.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(RefCell::new(ArrayVec::new())),
            queue: Mutex::new(RefCell::new(VecDeque::with_capacity(EVENT_QUEUE_DEPTH))),
            dispatched: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Registers or unregisters a listener.
    ///
    /// # Errors
    ///
    /// - [`EspiError::InvalidArgument`] when registering a listener twice or
    ///   unregistering one that is not registered.
    /// - [`EspiError::Busy`] when the listener set is full.
    pub fn manage(&self, listener: &Arc<dyn EspiListener>, op: CallbackOp) -> EspiResult {
        let total = critical_section::with(|cs| -> EspiResult<usize> {
            let mut listeners = self.listeners.borrow_ref_mut(cs);
            let pos = listeners.iter().position(|l| same_listener(l, listener));
            match (op, pos) {
                (CallbackOp::Register, Some(_)) => Err(EspiError::InvalidArgument),
                (CallbackOp::Register, None) => {
                    listeners
                        .try_push(Arc::clone(listener))
                        .map_err(|_| EspiError::Busy)?;
                    Ok(listeners.len())
                }
                (CallbackOp::Unregister, Some(idx)) => {
                    listeners.remove(idx);
                    Ok(listeners.len())
                }
                (CallbackOp::Unregister, None) => Err(EspiError::InvalidArgument),
            }
        })?;
        debug!("listener {:?} ({} registered)", op, total);
        Ok(())
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        critical_section::with(|cs| self.listeners.borrow_ref(cs).len())
    }

    /// Queues an event and delivers it to interested listeners.
    pub fn dispatch(&self, event: Event) {
        trace!("event {:?}", event);
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        let (full, snapshot) = critical_section::with(|cs| {
            let mut queue = self.queue.borrow_ref_mut(cs);
            let full = queue.len() >= EVENT_QUEUE_DEPTH;
            if full {
                queue.pop_front();
            }
            queue.push_back(event);

            // Listeners may manage callbacks themselves; call them outside.
            let snapshot: ListenerSet = self
                .listeners
                .borrow_ref(cs)
                .iter()
                .filter(|l| l.interest().contains(event.kind))
                .cloned()
                .collect();
            (full, snapshot)
        });
        if full {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!("event queue full, dropped oldest ({} total)", dropped);
        }
        for listener in &snapshot {
            listener.on_event(&event);
        }
    }

    /// Removes up to `max` queued events, oldest first.
    pub fn drain(&self, max: usize) -> Vec<Event> {
        critical_section::with(|cs| {
            let mut queue = self.queue.borrow_ref_mut(cs);
            let n = max.min(queue.len());
            queue.drain(..n).collect()
        })
    }

    /// Number of queued events.
    pub fn pending(&self) -> usize {
        critical_section::with(|cs| self.queue.borrow_ref(cs).len())
    }

    /// Total events dispatched.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listener_count())
            .field("pending", &self.pending())
            .field("dropped", &self.dropped())
            .finish()
    }
}
