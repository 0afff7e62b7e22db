//! Virtual-wire table and lookup.
//!
//! Virtual wires are single-bit platform signals carried over eSPI. The host
//! groups them four per *host index*; the target hardware maps each host index
//! onto a register *group*. The table built here is the static bidirectional
//! map between abstract [`VwSignal`]s and (group, bit) positions, split into a
//! controller→target sequence and a target→controller sequence.
//!
//! The table is assembled once from declarative configuration and handed to
//! the engine as an `Arc<VwTable>`. Lookups are linear scans: tables hold a few
//! dozen entries and are consulted off the hot path.

mod edge;

pub use edge::{SleepEdge, SleepEdgeTracker};

use alloc::vec::Vec;

use crate::error::{EspiError, EspiResult};

/// Number of register groups per direction the hardware exposes.
pub const MAX_VW_GROUPS: u8 = 16;

/// Groups covered by one receive-status bank (four wires per group, 32 status bits).
pub const VW_GROUPS_PER_BANK: u8 = 8;

/// Abstract virtual-wire signal identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VwSignal {
    // Controller to target.
    /// Sleep S3.
    SlpS3,
    /// Sleep S4.
    SlpS4,
    /// Sleep S5.
    SlpS5,
    /// Suspend status.
    SusStat,
    /// Platform reset (PLTRST#).
    PltRst,
    /// Out-of-band processor about to reset.
    OobRstWarn,
    /// Host about to reset.
    HostRstWarn,
    /// SMI output.
    SmiOut,
    /// NMI output.
    NmiOut,
    /// Suspend about to happen.
    SusWarn,
    /// Suspend power well may be powered down.
    SusPwrdnAck,
    /// Sleep A (management engine on while in Sx).
    SlpA,
    /// Wired LAN may be powered down.
    SlpLan,
    /// Wireless LAN may be powered down.
    SlpWlan,
    /// Host entered C10 or deeper.
    HostC10,
    /// Download-and-execute warning.
    DnxWarn,

    // Target to controller.
    /// Acknowledge of OOB_RST_WARN.
    OobRstAck,
    /// Wake event.
    Wake,
    /// PCI power-management event.
    Pme,
    /// Target finished booting.
    TargetBootDone,
    /// Fatal error.
    ErrFatal,
    /// Non-fatal error.
    ErrNonFatal,
    /// Target boot result.
    TargetBootStatus,
    /// System control interrupt.
    Sci,
    /// System management interrupt.
    Smi,
    /// CPU reset request.
    Rcin,
    /// Acknowledge of HOST_RST_WARN.
    HostRstAck,
    /// Acknowledge of SUS_WARN.
    SusAck,
    /// Acknowledge of DNX_WARN.
    DnxAck,
}

impl VwSignal {
    /// Every signal, controller→target first.
    pub const ALL: [VwSignal; 29] = [
        VwSignal::SlpS3,
        VwSignal::SlpS4,
        VwSignal::SlpS5,
        VwSignal::SusStat,
        VwSignal::PltRst,
        VwSignal::OobRstWarn,
        VwSignal::HostRstWarn,
        VwSignal::SmiOut,
        VwSignal::NmiOut,
        VwSignal::SusWarn,
        VwSignal::SusPwrdnAck,
        VwSignal::SlpA,
        VwSignal::SlpLan,
        VwSignal::SlpWlan,
        VwSignal::HostC10,
        VwSignal::DnxWarn,
        VwSignal::OobRstAck,
        VwSignal::Wake,
        VwSignal::Pme,
        VwSignal::TargetBootDone,
        VwSignal::ErrFatal,
        VwSignal::ErrNonFatal,
        VwSignal::TargetBootStatus,
        VwSignal::Sci,
        VwSignal::Smi,
        VwSignal::Rcin,
        VwSignal::HostRstAck,
        VwSignal::SusAck,
        VwSignal::DnxAck,
    ];

    /// Sleep signals tracked by the edge tracker.
    pub const fn is_sleep(self) -> bool {
        matches!(self, VwSignal::SlpS3 | VwSignal::SlpS4 | VwSignal::SlpS5)
    }

    /// Acknowledge wire paired with a warning wire.
    pub const fn warning_ack(self) -> Option<VwSignal> {
        match self {
            VwSignal::HostRstWarn => Some(VwSignal::HostRstAck),
            VwSignal::SusWarn => Some(VwSignal::SusAck),
            VwSignal::OobRstWarn => Some(VwSignal::OobRstAck),
            VwSignal::DnxWarn => Some(VwSignal::DnxAck),
            _ => None,
        }
    }
}

/// Transfer direction of a virtual wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VwDirection {
    /// Driven by the host controller, received by the target.
    ControllerToTarget,
    /// Driven by the target, received by the host controller.
    TargetToController,
}

/// Reset domain that returns a wire to its reset state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VwResetSource {
    /// eSPI link reset.
    EspiReset = 0,
    /// Platform reset.
    PltRst = 1,
    /// Resume-well reset (DSW_PWROK).
    RsmRst = 2,
}

/// Interrupt selection for a received wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VwIrqSelect {
    /// Interrupt while the wire is low.
    LevelLow = 1,
    /// Interrupt while the wire is high.
    LevelHigh = 2,
    /// Interrupt on a 0→1 transition.
    RisingEdge = 3,
    /// Interrupt on a 1→0 transition.
    FallingEdge = 4,
    /// Interrupt on every transition.
    BothEdges = 5,
}

/// Per-wire attributes.
///
/// Kept as named fields in memory; [`VwFlags::to_bits`] produces the packed
/// byte the register backend expects:
///
/// ```text
/// bit 0     direction (1 = target→controller)
/// bit 1     reset state
/// bits 2-3  reset source
/// bits 4-6  IRQ select (0 = none)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VwFlags {
    /// Transfer direction.
    pub direction: VwDirection,
    /// Level the wire takes after reset.
    pub reset_state: bool,
    /// Reset domain.
    pub reset_source: VwResetSource,
    /// Receive interrupt selection, `None` when the wire raises no interrupt.
    pub irq_select: Option<VwIrqSelect>,
}

impl VwFlags {
    const DIR_BIT: u8 = 1 << 0;
    const RESET_STATE_BIT: u8 = 1 << 1;
    const RESET_SRC_SHIFT: u8 = 2;
    const RESET_SRC_MASK: u8 = 0b11;
    const IRQ_SEL_SHIFT: u8 = 4;
    const IRQ_SEL_MASK: u8 = 0b111;

    /// Controller→target wire that interrupts on both edges.
    pub const fn received(reset_source: VwResetSource) -> Self {
        Self {
            direction: VwDirection::ControllerToTarget,
            reset_state: false,
            reset_source,
            irq_select: Some(VwIrqSelect::BothEdges),
        }
    }

    /// Target→controller wire.
    pub const fn sent(reset_source: VwResetSource, reset_state: bool) -> Self {
        Self {
            direction: VwDirection::TargetToController,
            reset_state,
            reset_source,
            irq_select: None,
        }
    }

    /// Packs the flags into the hardware byte layout.
    pub fn to_bits(self) -> u8 {
        let mut bits = 0;
        if self.direction == VwDirection::TargetToController {
            bits |= Self::DIR_BIT;
        }
        if self.reset_state {
            bits |= Self::RESET_STATE_BIT;
        }
        bits |= (self.reset_source as u8 & Self::RESET_SRC_MASK) << Self::RESET_SRC_SHIFT;
        let irq = self.irq_select.map_or(0, |sel| sel as u8);
        bits |= (irq & Self::IRQ_SEL_MASK) << Self::IRQ_SEL_SHIFT;
        bits
    }

    /// Unpacks a hardware byte. Returns `None` for reserved encodings.
    pub fn from_bits(bits: u8) -> Option<Self> {
        let direction = if bits & Self::DIR_BIT != 0 {
            VwDirection::TargetToController
        } else {
            VwDirection::ControllerToTarget
        };
        let reset_source = match (bits >> Self::RESET_SRC_SHIFT) & Self::RESET_SRC_MASK {
            0 => VwResetSource::EspiReset,
            1 => VwResetSource::PltRst,
            2 => VwResetSource::RsmRst,
            _ => return None,
        };
        let irq_select = match (bits >> Self::IRQ_SEL_SHIFT) & Self::IRQ_SEL_MASK {
            0 => None,
            1 => Some(VwIrqSelect::LevelLow),
            2 => Some(VwIrqSelect::LevelHigh),
            3 => Some(VwIrqSelect::RisingEdge),
            4 => Some(VwIrqSelect::FallingEdge),
            5 => Some(VwIrqSelect::BothEdges),
            _ => return None,
        };
        Some(Self {
            direction,
            reset_state: bits & Self::RESET_STATE_BIT != 0,
            reset_source,
            irq_select,
        })
    }
}

/// One table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualWire {
    /// Abstract signal.
    pub signal: VwSignal,
    /// eSPI host index carrying the wire.
    pub host_index: u8,
    /// Bit position inside the host index (0-3).
    pub bit: u8,
    /// Hardware register group.
    pub group: u8,
    /// Direction and reset attributes.
    pub flags: VwFlags,
}

impl VirtualWire {
    /// Creates a table entry.
    pub const fn new(signal: VwSignal, host_index: u8, bit: u8, group: u8, flags: VwFlags) -> Self {
        Self {
            signal,
            host_index,
            bit,
            group,
            flags,
        }
    }

    /// Direction of the wire.
    #[inline]
    pub fn direction(&self) -> VwDirection {
        self.flags.direction
    }

    /// Mask of the wire within its group register.
    #[inline]
    pub fn mask(&self) -> u8 {
        1 << self.bit
    }
}

/// Declarative description of the virtual wires a board exposes.
#[derive(Debug, Clone, Default)]
pub struct VwTableConfig {
    /// Entries in insertion order; the direction flag selects the table.
    pub wires: Vec<VirtualWire>,
}

impl VwTableConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self { wires: Vec::new() }
    }

    /// Appends a wire.
    pub fn with(mut self, wire: VirtualWire) -> Self {
        self.wires.push(wire);
        self
    }

    /// The system-event wires defined by the eSPI base specification.
    ///
    /// Controller→target host indices 0x02, 0x03, 0x07, 0x41, 0x42, 0x47, 0x4A
    /// map to groups 0-6; target→controller host indices 0x04, 0x05, 0x06, 0x40
    /// map to groups 0-3.
    pub fn standard() -> Self {
        use VwResetSource::{EspiReset as Link, PltRst as Platform, RsmRst as Resume};
        use VwSignal::*;

        let rx = VwFlags::received;
        let tx = VwFlags::sent;

        let wires = alloc::vec![
            // Controller to target.
            VirtualWire::new(SlpS3, 0x02, 0, 0, rx(Link)),
            VirtualWire::new(SlpS4, 0x02, 1, 0, rx(Link)),
            VirtualWire::new(SlpS5, 0x02, 2, 0, rx(Link)),
            VirtualWire::new(SusStat, 0x03, 0, 1, rx(Link)),
            VirtualWire::new(PltRst, 0x03, 1, 1, rx(Link)),
            VirtualWire::new(OobRstWarn, 0x03, 2, 1, rx(Link)),
            VirtualWire::new(HostRstWarn, 0x07, 0, 2, rx(Platform)),
            VirtualWire::new(SmiOut, 0x07, 1, 2, rx(Platform)),
            VirtualWire::new(NmiOut, 0x07, 2, 2, rx(Platform)),
            VirtualWire::new(SusWarn, 0x41, 0, 3, rx(Link)),
            VirtualWire::new(SusPwrdnAck, 0x41, 1, 3, rx(Link)),
            VirtualWire::new(SlpA, 0x41, 3, 3, rx(Link)),
            VirtualWire::new(SlpLan, 0x42, 0, 4, rx(Resume)),
            VirtualWire::new(SlpWlan, 0x42, 1, 4, rx(Resume)),
            VirtualWire::new(HostC10, 0x47, 0, 5, rx(Platform)),
            VirtualWire::new(DnxWarn, 0x4a, 1, 6, rx(Link)),
            // Target to controller.
            VirtualWire::new(OobRstAck, 0x04, 0, 0, tx(Link, false)),
            VirtualWire::new(Wake, 0x04, 2, 0, tx(Link, true)),
            VirtualWire::new(Pme, 0x04, 3, 0, tx(Link, true)),
            VirtualWire::new(TargetBootDone, 0x05, 0, 1, tx(Link, false)),
            VirtualWire::new(ErrFatal, 0x05, 1, 1, tx(Link, false)),
            VirtualWire::new(ErrNonFatal, 0x05, 2, 1, tx(Link, false)),
            VirtualWire::new(TargetBootStatus, 0x05, 3, 1, tx(Link, false)),
            VirtualWire::new(Sci, 0x06, 0, 2, tx(Platform, true)),
            VirtualWire::new(Smi, 0x06, 1, 2, tx(Platform, true)),
            VirtualWire::new(Rcin, 0x06, 2, 2, tx(Platform, true)),
            VirtualWire::new(HostRstAck, 0x06, 3, 2, tx(Platform, false)),
            VirtualWire::new(SusAck, 0x40, 0, 3, tx(Link, true)),
            VirtualWire::new(DnxAck, 0x40, 1, 3, tx(Link, false)),
        ];

        Self { wires }
    }
}

/// Immutable bidirectional signal ↔ position map.
#[derive(Debug, Clone)]
pub struct VwTable {
    controller_to_target: Vec<VirtualWire>,
    target_to_controller: Vec<VirtualWire>,
}

impl VwTable {
    /// Builds the table, rejecting configurations that break invertibility.
    ///
    /// # Errors
    ///
    /// Returns [`EspiError::InvalidArgument`] if:
    /// - a bit position is above 3 or a group is out of range
    /// - a signal appears twice
    /// - two signals share a (group, bit) position in the same direction
    /// - one group is mapped to two different host indices
    pub fn from_config(config: &VwTableConfig) -> EspiResult<Self> {
        let mut table = Self {
            controller_to_target: Vec::new(),
            target_to_controller: Vec::new(),
        };

        for wire in &config.wires {
            if wire.bit > 3 || wire.group >= MAX_VW_GROUPS {
                warn!("vw {:?}: position g{} b{} out of range", wire.signal, wire.group, wire.bit);
                return Err(EspiError::InvalidArgument);
            }
            if table.find(wire.signal).is_some() {
                warn!("vw {:?}: listed twice", wire.signal);
                return Err(EspiError::InvalidArgument);
            }

            let seq = table.sequence(wire.direction());
            for other in seq.iter().filter(|other| other.group == wire.group) {
                if other.bit == wire.bit || other.host_index != wire.host_index {
                    warn!(
                        "vw {:?}: conflicts with {:?} in group {}",
                        wire.signal, other.signal, wire.group
                    );
                    return Err(EspiError::InvalidArgument);
                }
            }

            match wire.direction() {
                VwDirection::ControllerToTarget => table.controller_to_target.push(*wire),
                VwDirection::TargetToController => table.target_to_controller.push(*wire),
            }
        }

        debug!(
            "vw table: {} controller->target, {} target->controller wires",
            table.controller_to_target.len(),
            table.target_to_controller.len()
        );
        Ok(table)
    }

    /// The standard system-event table.
    pub fn standard() -> Self {
        // The standard configuration satisfies every construction check.
        match Self::from_config(&VwTableConfig::standard()) {
            Ok(table) => table,
            Err(_) => unreachable!("standard virtual-wire table is consistent"),
        }
    }

    /// Wires of one direction, in insertion order.
    pub fn sequence(&self, direction: VwDirection) -> &[VirtualWire] {
        match direction {
            VwDirection::ControllerToTarget => &self.controller_to_target,
            VwDirection::TargetToController => &self.target_to_controller,
        }
    }

    /// Iterates over both tables, controller→target first.
    pub fn iter(&self) -> impl Iterator<Item = &VirtualWire> {
        self.controller_to_target
            .iter()
            .chain(self.target_to_controller.iter())
    }

    /// Finds the entry of a signal in either table.
    pub fn find(&self, signal: VwSignal) -> Option<&VirtualWire> {
        self.iter().find(|wire| wire.signal == signal)
    }

    /// Translates a raw hardware position back into its entry.
    pub fn find_by_position(
        &self,
        direction: VwDirection,
        group: u8,
        bit: u8,
    ) -> Option<&VirtualWire> {
        self.sequence(direction)
            .iter()
            .find(|wire| wire.group == group && wire.bit == bit)
    }

    /// Distinct (group, host index) pairs of one direction, in first-use order.
    pub fn groups(&self, direction: VwDirection) -> Vec<(u8, u8)> {
        let mut groups: Vec<(u8, u8)> = Vec::new();
        for wire in self.sequence(direction) {
            if !groups.iter().any(|(group, _)| *group == wire.group) {
                groups.push((wire.group, wire.host_index));
            }
        }
        groups
    }

    /// Total number of wires.
    pub fn len(&self) -> usize {
        self.controller_to_target.len() + self.target_to_controller.len()
    }

    /// Checks if both tables are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_matches_insertion() {
        let config = VwTableConfig::standard();
        let table = VwTable::from_config(&config).unwrap();

        for wire in &config.wires {
            let found = table.find(wire.signal).unwrap();
            assert_eq!(found, wire);
        }
        assert_eq!(table.len(), config.wires.len());
    }

    #[test]
    fn test_find_by_position_is_inverse() {
        let table = VwTable::standard();

        for wire in table.iter() {
            let back = table
                .find_by_position(wire.direction(), wire.group, wire.bit)
                .unwrap();
            assert_eq!(back.signal, wire.signal);
        }

        // Same group number, other direction, unused bit.
        assert!(table
            .find_by_position(VwDirection::TargetToController, 0, 1)
            .is_none());
    }

    #[test]
    fn test_unknown_signal_not_found() {
        let config = VwTableConfig::new().with(VirtualWire::new(
            VwSignal::PltRst,
            0x03,
            1,
            0,
            VwFlags::received(VwResetSource::EspiReset),
        ));
        let table = VwTable::from_config(&config).unwrap();
        assert!(table.find(VwSignal::PltRst).is_some());
        assert!(table.find(VwSignal::SlpS3).is_none());
    }

    #[test]
    fn test_duplicate_position_rejected() {
        let flags = VwFlags::received(VwResetSource::EspiReset);
        let config = VwTableConfig::new()
            .with(VirtualWire::new(VwSignal::SlpS3, 0x02, 0, 0, flags))
            .with(VirtualWire::new(VwSignal::SlpS4, 0x02, 0, 0, flags));
        assert_eq!(
            VwTable::from_config(&config).unwrap_err(),
            EspiError::InvalidArgument
        );
    }

    #[test]
    fn test_same_position_other_direction_allowed() {
        let config = VwTableConfig::new()
            .with(VirtualWire::new(
                VwSignal::SlpS3,
                0x02,
                0,
                0,
                VwFlags::received(VwResetSource::EspiReset),
            ))
            .with(VirtualWire::new(
                VwSignal::OobRstAck,
                0x04,
                0,
                0,
                VwFlags::sent(VwResetSource::EspiReset, false),
            ));
        assert!(VwTable::from_config(&config).is_ok());
    }

    #[test]
    fn test_group_host_index_conflict_rejected() {
        let flags = VwFlags::received(VwResetSource::EspiReset);
        let config = VwTableConfig::new()
            .with(VirtualWire::new(VwSignal::SlpS3, 0x02, 0, 0, flags))
            .with(VirtualWire::new(VwSignal::SusStat, 0x03, 1, 0, flags));
        assert!(VwTable::from_config(&config).is_err());
    }

    #[test]
    fn test_out_of_range_position_rejected() {
        let flags = VwFlags::received(VwResetSource::EspiReset);
        let bad_bit =
            VwTableConfig::new().with(VirtualWire::new(VwSignal::SlpS3, 0x02, 4, 0, flags));
        let wire = VirtualWire::new(VwSignal::SlpS3, 0x02, 0, MAX_VW_GROUPS, flags);
        let bad_group = VwTableConfig::new().with(wire);
        assert!(VwTable::from_config(&bad_bit).is_err());
        assert!(VwTable::from_config(&bad_group).is_err());
    }

    #[test]
    fn test_flags_packing() {
        let flags = VwFlags {
            direction: VwDirection::TargetToController,
            reset_state: true,
            reset_source: VwResetSource::PltRst,
            irq_select: Some(VwIrqSelect::FallingEdge),
        };
        assert_eq!(flags.to_bits(), 0b0100_0111);
        assert_eq!(VwFlags::from_bits(flags.to_bits()), Some(flags));

        let none = VwFlags::sent(VwResetSource::EspiReset, false);
        assert_eq!(none.to_bits(), 0b0000_0001);

        // Reserved reset source and IRQ encodings.
        assert_eq!(VwFlags::from_bits(0b0000_1100), None);
        assert_eq!(VwFlags::from_bits(0b0111_0000), None);
    }

    #[test]
    fn test_boot_wires_share_host_index() {
        let table = VwTable::standard();
        let done = table.find(VwSignal::TargetBootDone).unwrap();
        let status = table.find(VwSignal::TargetBootStatus).unwrap();
        assert_eq!(done.host_index, 0x05);
        assert_eq!(done.group, status.group);
        assert_ne!(done.bit, status.bit);
    }

    #[test]
    fn test_standard_table_covers_all_signals() {
        let table = VwTable::standard();
        for signal in VwSignal::ALL {
            assert!(table.find(signal).is_some(), "{signal:?} missing");
        }
        assert_eq!(table.len(), VwSignal::ALL.len());
    }

    #[test]
    fn test_groups_listing() {
        let table = VwTable::standard();
        let groups = table.groups(VwDirection::TargetToController);
        assert_eq!(groups, alloc::vec![(0, 0x04), (1, 0x05), (2, 0x06), (3, 0x40)]);
    }
}
