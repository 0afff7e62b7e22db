//! Host-visible peripheral collaborators and the opcode router.
//!
//! Logical devices on the peripheral channel (keyboard controller, ACPI EC,
//! mailbox, port 80 capture, ...) live outside the engine. They register a
//! [`HostPeripheral`] and are driven through a narrow contract:
//!
//! - `host_access_enable` after every BAR/SIRQ (re)configuration,
//! - `intr_enable` to gate their own interrupt sources,
//! - `handle_request` for opcodes routed by the static range table.

use alloc::sync::Arc;
use core::cell::RefCell;

use arrayvec::ArrayVec;
use axerrno::AxResult;
use critical_section::Mutex;

use crate::bar::{BarConfig, SirqConfig};
use crate::error::{EspiError, EspiResult};

/// Maximum number of registered peripherals.
pub const MAX_PERIPHERALS: usize = 8;

/// Category of a host-visible peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeripheralKind {
    /// 8042 keyboard controller.
    Kbc,
    /// ACPI embedded-controller instance.
    AcpiEc(u8),
    /// Host mailbox.
    Mailbox,
    /// Shared memory window.
    SharedMem,
    /// Debug port 80 capture.
    Port80,
    /// Host-side UART.
    Uart(u8),
    /// Vendor specific.
    Custom,
}

/// Register access offered to peripherals while they enable host access.
pub trait HostBus {
    /// Programs an address-visibility register.
    fn bar_configure(&self, host_addr: u64, config: BarConfig) -> AxResult;

    /// Programs a serial-IRQ slot.
    fn sirq_configure(&self, config: SirqConfig) -> AxResult;
}

/// A logical device exposed to the host on the peripheral channel.
pub trait HostPeripheral: Send + Sync {
    /// Category used for BAR association and opcode routing.
    fn kind(&self) -> PeripheralKind;

    /// Activates or deactivates the host-visible register block.
    ///
    /// `config` is the packed [`SirqConfig`] of the peripheral's slot, or 0
    /// when it has none.
    fn host_access_enable(&self, bus: &dyn HostBus, enable: bool, config: u32) -> AxResult;

    /// Toggles the peripheral's own interrupt sources.
    fn intr_enable(&self, enable: bool) -> AxResult;

    /// Handles a routed opcode. `data` is read for writes and filled for reads.
    fn handle_request(&self, opcode: u8, data: &mut u32, write: bool) -> AxResult;
}

/// Destination of an opcode range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeTarget {
    /// Keyboard controller.
    Kbc,
    /// First registered ACPI EC instance.
    AcpiEc,
    /// Vendor specific peripheral.
    Custom,
}

impl OpcodeTarget {
    fn matches(self, kind: PeripheralKind) -> bool {
        matches!(
            (self, kind),
            (OpcodeTarget::Kbc, PeripheralKind::Kbc)
                | (OpcodeTarget::AcpiEc, PeripheralKind::AcpiEc(_))
                | (OpcodeTarget::Custom, PeripheralKind::Custom)
        )
    }
}

/// Inclusive opcode range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeRange {
    /// First opcode.
    pub start: u8,
    /// Last opcode.
    pub end: u8,
    /// Destination.
    pub target: OpcodeTarget,
}

/// Static opcode routing table.
pub const OPCODE_TABLE: [OpcodeRange; 3] = [
    OpcodeRange {
        start: 0x50,
        end: 0x5f,
        target: OpcodeTarget::Kbc,
    },
    OpcodeRange {
        start: 0x60,
        end: 0x6f,
        target: OpcodeTarget::AcpiEc,
    },
    OpcodeRange {
        start: 0xf0,
        end: 0xff,
        target: OpcodeTarget::Custom,
    },
];

/// Looks up the destination of an opcode.
pub fn route(opcode: u8) -> Option<OpcodeTarget> {
    OPCODE_TABLE
        .iter()
        .find(|r| (r.start..=r.end).contains(&opcode))
        .map(|r| r.target)
}

type Entries = ArrayVec<Arc<dyn HostPeripheral>, MAX_PERIPHERALS>;

/// Registered peripheral collaborators.
///
/// The interrupt path looks peripherals up here, so the set is only touched
/// inside critical sections and collaborators are called on a cloned handle.
pub struct PeripheralRegistry {
    entries: Mutex<RefCell<Entries>>,
}

impl PeripheralRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(RefCell::new(ArrayVec::new())),
        }
    }

    /// Registers a peripheral.
    ///
    /// # Errors
    ///
    /// [`EspiError::InvalidArgument`] if its kind is already registered,
    /// [`EspiError::Busy`] if the registry is full.
    pub fn register(&self, peripheral: Arc<dyn HostPeripheral>) -> EspiResult {
        let kind = peripheral.kind();
        critical_section::with(|cs| {
            let mut entries = self.entries.borrow_ref_mut(cs);
            if entries.iter().any(|p| p.kind() == kind) {
                return Err(EspiError::InvalidArgument);
            }
            entries.try_push(peripheral).map_err(|_| EspiError::Busy)
        })?;
        debug!("peripheral {:?} registered", kind);
        Ok(())
    }

    /// Removes the peripheral of a kind.
    pub fn unregister(&self, kind: PeripheralKind) -> Option<Arc<dyn HostPeripheral>> {
        critical_section::with(|cs| {
            let mut entries = self.entries.borrow_ref_mut(cs);
            let idx = entries.iter().position(|p| p.kind() == kind)?;
            Some(entries.remove(idx))
        })
    }

    /// Finds the peripheral of a kind.
    pub fn find(&self, kind: PeripheralKind) -> Option<Arc<dyn HostPeripheral>> {
        self.find_by(|k| k == kind)
    }

    fn find_by(&self, f: impl Fn(PeripheralKind) -> bool) -> Option<Arc<dyn HostPeripheral>> {
        critical_section::with(|cs| {
            self.entries
                .borrow_ref(cs)
                .iter()
                .find(|p| f(p.kind()))
                .cloned()
        })
    }

    /// Number of registered peripherals.
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.entries.borrow_ref(cs).len())
    }

    /// Checks if no peripheral is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Toggles the interrupt sources of every peripheral.
    ///
    /// Every peripheral is visited; returns [`EspiError::Io`] if any failed.
    pub fn intr_enable_all(&self, enable: bool) -> EspiResult {
        let entries = critical_section::with(|cs| self.entries.borrow_ref(cs).clone());
        let mut result = Ok(());
        for p in &entries {
            if let Err(e) = p.intr_enable(enable) {
                warn!("peripheral {:?}: intr_enable({}) failed: {:?}", p.kind(), enable, e);
                result = Err(EspiError::Io);
            }
        }
        result
    }

    /// Routes an opcode to its peripheral.
    ///
    /// # Errors
    ///
    /// - [`EspiError::NotSupported`] if the opcode is outside every range or
    ///   no matching peripheral is registered.
    /// - [`EspiError::Io`] if the peripheral rejects the request.
    pub fn handle_request(&self, opcode: u8, data: &mut u32, write: bool) -> EspiResult {
        let target = route(opcode).ok_or(EspiError::NotSupported)?;
        let peripheral = self
            .find_by(|kind| target.matches(kind))
            .ok_or(EspiError::NotSupported)?;

        trace!(
            "opcode {:#04x} -> {:?} ({})",
            opcode,
            peripheral.kind(),
            if write { "write" } else { "read" }
        );
        peripheral
            .handle_request(opcode, data, write)
            .map_err(|e| {
                warn!("opcode {:#04x}: peripheral error {:?}", opcode, e);
                EspiError::Io
            })
    }
}

impl Default for PeripheralRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axerrno::ax_err;
    use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct Fake {
        kind: PeripheralKind,
        last_opcode: AtomicU32,
        intr: AtomicBool,
        fail: bool,
    }

    impl Fake {
        fn new(kind: PeripheralKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                last_opcode: AtomicU32::new(0),
                intr: AtomicBool::new(false),
                fail: false,
            })
        }
    }

    impl HostPeripheral for Fake {
        fn kind(&self) -> PeripheralKind {
            self.kind
        }

        fn host_access_enable(&self, _bus: &dyn HostBus, _enable: bool, _config: u32) -> AxResult {
            Ok(())
        }

        fn intr_enable(&self, enable: bool) -> AxResult {
            self.intr.store(enable, Ordering::Relaxed);
            Ok(())
        }

        fn handle_request(&self, opcode: u8, data: &mut u32, write: bool) -> AxResult {
            if self.fail {
                return ax_err!(Io);
            }
            self.last_opcode.store(opcode as u32, Ordering::Relaxed);
            if !write {
                *data = 0xa5;
            }
            Ok(())
        }
    }

    #[test]
    fn test_route_table() {
        assert_eq!(route(0x50), Some(OpcodeTarget::Kbc));
        assert_eq!(route(0x5f), Some(OpcodeTarget::Kbc));
        assert_eq!(route(0x60), Some(OpcodeTarget::AcpiEc));
        assert_eq!(route(0x6f), Some(OpcodeTarget::AcpiEc));
        assert_eq!(route(0xf0), Some(OpcodeTarget::Custom));
        assert_eq!(route(0xff), Some(OpcodeTarget::Custom));
        assert_eq!(route(0x4f), None);
        assert_eq!(route(0x70), None);
    }

    #[test]
    fn test_router_forwards() {
        let reg = PeripheralRegistry::new();
        let kbc = Fake::new(PeripheralKind::Kbc);
        let ec = Fake::new(PeripheralKind::AcpiEc(1));
        reg.register(kbc.clone()).unwrap();
        reg.register(ec.clone()).unwrap();

        let mut data = 0;
        reg.handle_request(0x52, &mut data, false).unwrap();
        assert_eq!(data, 0xa5);
        assert_eq!(kbc.last_opcode.load(Ordering::Relaxed), 0x52);

        let mut data = 7;
        reg.handle_request(0x61, &mut data, true).unwrap();
        assert_eq!(data, 7);
        assert_eq!(ec.last_opcode.load(Ordering::Relaxed), 0x61);
    }

    #[test]
    fn test_router_errors() {
        let reg = PeripheralRegistry::new();
        let mut data = 0;
        assert_eq!(
            reg.handle_request(0x10, &mut data, false),
            Err(EspiError::NotSupported)
        );
        // Routed but nobody registered.
        assert_eq!(
            reg.handle_request(0xf3, &mut data, false),
            Err(EspiError::NotSupported)
        );

        reg.register(Arc::new(Fake {
            kind: PeripheralKind::Custom,
            last_opcode: AtomicU32::new(0),
            intr: AtomicBool::new(false),
            fail: true,
        }))
        .unwrap();
        assert_eq!(reg.handle_request(0xf3, &mut data, true), Err(EspiError::Io));
    }

    #[test]
    fn test_registry_unique_kind() {
        let reg = PeripheralRegistry::new();
        reg.register(Fake::new(PeripheralKind::Uart(0))).unwrap();
        reg.register(Fake::new(PeripheralKind::Uart(1))).unwrap();
        assert_eq!(
            reg.register(Fake::new(PeripheralKind::Uart(0))),
            Err(EspiError::InvalidArgument)
        );
        assert_eq!(reg.len(), 2);

        assert!(reg.unregister(PeripheralKind::Uart(0)).is_some());
        assert!(reg.find(PeripheralKind::Uart(0)).is_none());
        assert!(reg.find(PeripheralKind::Uart(1)).is_some());
    }

    #[test]
    fn test_intr_enable_all() {
        let reg = PeripheralRegistry::new();
        let p80 = Fake::new(PeripheralKind::Port80);
        reg.register(p80.clone()).unwrap();
        reg.intr_enable_all(true).unwrap();
        assert!(p80.intr.load(Ordering::Relaxed));
    }

    struct Reentrant {
        registry: Arc<PeripheralRegistry>,
    }

    impl HostPeripheral for Reentrant {
        fn kind(&self) -> PeripheralKind {
            PeripheralKind::Mailbox
        }

        fn host_access_enable(&self, _bus: &dyn HostBus, _enable: bool, _config: u32) -> AxResult {
            Ok(())
        }

        fn intr_enable(&self, _enable: bool) -> AxResult {
            self.registry.unregister(PeripheralKind::Mailbox);
            Ok(())
        }

        fn handle_request(&self, _opcode: u8, _data: &mut u32, _write: bool) -> AxResult {
            Ok(())
        }
    }

    #[test]
    fn test_collaborator_may_use_registry() {
        let reg = Arc::new(PeripheralRegistry::new());
        reg.register(Arc::new(Reentrant {
            registry: Arc::clone(&reg),
        }))
        .unwrap();

        reg.intr_enable_all(true).unwrap();
        assert!(reg.is_empty());
    }
}
