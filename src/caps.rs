/*
 * This file is part of pciscope.
 *
 * Copyright (C) 2025 pciscope contributors
 *
 * pciscope is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * pciscope is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with pciscope. If not, see <https://www.gnu.org/licenses/>.
 */

//! Capability chain walking
//!
//! Raw chain nodes carry a numeric id, a type discriminator and an offset.
//! Ids are mapped onto [`CapId`] / [`ExtCapId`] where known and kept as raw
//! numbers otherwise. A type discriminator that is neither normal nor
//! extended fails the walk unless lenient mode is requested.

use std::fmt;

use tracing::warn;

use crate::access::{RawDevice, CAP_TYPE_EXTENDED, CAP_TYPE_NORMAL};
use crate::error::{PciError, Result};

macro_rules! cap_ids {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $val:literal, $label:expr;)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant = $val,)*
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)*];

            pub fn from_raw(id: u16) -> Option<Self> {
                match id {
                    $($val => Some($name::$variant),)*
                    _ => None,
                }
            }

            pub fn raw(self) -> u16 {
                self as u16
            }

            pub fn description(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)*
                }
            }
        }

        impl From<$name> for u16 {
            fn from(id: $name) -> u16 {
                id.raw()
            }
        }
    };
}

cap_ids! {
    /// Normal capability ids (config space offset 0x34 chain).
    CapId {
        Null = 0x00, "Null";
        Pm = 0x01, "Power Management";
        Agp = 0x02, "AGP";
        Vpd = 0x03, "Vital Product Data";
        Slotid = 0x04, "Slot Identification";
        Msi = 0x05, "MSI";
        Chswp = 0x06, "CompactPCI HotSwap";
        Pcix = 0x07, "PCI-X";
        Ht = 0x08, "HyperTransport";
        Vndr = 0x09, "Vendor Specific";
        Dbg = 0x0a, "Debug port";
        Ccrc = 0x0b, "CompactPCI Central Resource Control";
        Hotplug = 0x0c, "PCI Standard Hot-Plug Controller";
        Ssvid = 0x0d, "Bridge subsystem vendor/device ID";
        Agp3 = 0x0e, "AGP3";
        Secure = 0x0f, "Secure device";
        Exp = 0x10, "PCI Express";
        Msix = 0x11, "MSI-X";
        Sata = 0x12, "SATA HBA";
        Af = 0x13, "PCI Advanced Features";
        Ea = 0x14, "Enhanced Allocation";
    }
}

cap_ids! {
    /// Extended capability ids (PCI Express chain starting at 0x100).
    ExtCapId {
        Err = 0x01, "Advanced Error Reporting";
        Vc = 0x02, "Virtual Channel";
        Dsn = 0x03, "Device Serial Number";
        Pb = 0x04, "Power Budgeting";
        Rclink = 0x05, "Root Complex Link Declaration";
        Rcilink = 0x06, "Root Complex Internal Link Declaration";
        Rcec = 0x07, "Root Complex Event Collector";
        Mfvc = 0x08, "Multi-Function Virtual Channel";
        Vc2 = 0x09, "Virtual Channel (MFVC)";
        Rbcb = 0x0a, "Root Bridge Control Block";
        Vndr = 0x0b, "Vendor Specific";
        Acs = 0x0d, "Access Control Services";
        Ari = 0x0e, "Alternative Routing-ID Interpretation";
        Ats = 0x0f, "Address Translation Service";
        Sriov = 0x10, "Single Root I/O Virtualization";
        Mriov = 0x11, "Multi-Root I/O Virtualization";
        Mcast = 0x12, "Multicast";
        Pri = 0x13, "Page Request Interface";
        Rebar = 0x15, "Resizable BAR";
        Dpa = 0x16, "Dynamic Power Allocation";
        Tph = 0x17, "TPH Requester";
        Ltr = 0x18, "Latency Tolerance Reporting";
        Secpci = 0x19, "Secondary PCI Express";
        Pmux = 0x1a, "Protocol Multiplexing";
        Pasid = 0x1b, "Process Address Space ID";
        Lnr = 0x1c, "LN Requester";
        Dpc = 0x1d, "Downstream Port Containment";
        L1pm = 0x1e, "L1 PM Substates";
        Ptm = 0x1f, "Precision Time Measurement";
        MPcie = 0x20, "PCI Express over M_PHY";
        Frs = 0x21, "FRS Queueing";
        Rtr = 0x22, "Readiness Time Reporting";
        Dvsec = 0x23, "Designated Vendor-Specific";
        VfRebar = 0x24, "VF Resizable BAR";
        Dlnk = 0x25, "Data Link Feature";
        Gt16 = 0x26, "Physical Layer 16.0 GT/s";
        Lmr = 0x27, "Lane Margining at the Receiver";
        HierId = 0x28, "Hierarchy ID";
        Npem = 0x29, "Native PCIe Enclosure Management";
        Gt32 = 0x2a, "Physical Layer 32.0 GT/s";
        Doe = 0x2e, "Data Object Exchange";
        Ide = 0x30, "Integrity and Data Encryption";
        Gt64 = 0x31, "Physical Layer 64.0 GT/s";
    }
}

/// Which chain a capability lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapType {
    Normal,
    Extended,
}

impl CapType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            CAP_TYPE_NORMAL => Some(CapType::Normal),
            CAP_TYPE_EXTENDED => Some(CapType::Extended),
            _ => None,
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            CapType::Normal => CAP_TYPE_NORMAL,
            CapType::Extended => CAP_TYPE_EXTENDED,
        }
    }
}

/// Capability id: a known member of the table for its chain, or the raw number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityId {
    Normal(CapId),
    Extended(ExtCapId),
    Raw(u16),
}

impl CapabilityId {
    pub fn raw(self) -> u16 {
        match self {
            CapabilityId::Normal(id) => id.raw(),
            CapabilityId::Extended(id) => id.raw(),
            CapabilityId::Raw(id) => id,
        }
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityId::Normal(id) => write!(f, "{:?}", id),
            CapabilityId::Extended(id) => write!(f, "{:?}", id),
            CapabilityId::Raw(id) => write!(f, "{:#04x}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capability {
    pub id: CapabilityId,
    pub cap_type: CapType,
    pub addr: u32,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.id, self.addr)
    }
}

/// Materialise the device's capability chain.
///
/// With `strict` set an unrecognised type discriminator is an error,
/// otherwise that node is skipped.
pub fn walk(dev: &RawDevice, strict: bool) -> Result<Vec<Capability>> {
    let mut caps = Vec::new();
    for node in dev.cap_nodes() {
        let cap_type = match CapType::from_raw(node.cap_type) {
            Some(t) => t,
            None if strict => {
                return Err(PciError::UnrecognizedCapabilityType {
                    cap_type: node.cap_type,
                    addr: node.addr,
                })
            }
            None => {
                warn!(
                    "{}: skipping capability {:#x} with unknown type {} at {:#x}",
                    dev.addr, node.id, node.cap_type, node.addr
                );
                continue;
            }
        };
        let id = match cap_type {
            CapType::Normal => CapId::from_raw(node.id).map(CapabilityId::Normal),
            CapType::Extended => ExtCapId::from_raw(node.id).map(CapabilityId::Extended),
        }
        .unwrap_or(CapabilityId::Raw(node.id));
        caps.push(Capability { id, cap_type, addr: node.addr });
    }
    Ok(caps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::PciAddress;

    fn device(caps: &[(u16, u8, u32)]) -> RawDevice {
        let mut dev = RawDevice::new(PciAddress::new(0, 2, 0, 0));
        dev.set_caps(caps);
        dev
    }

    #[test]
    fn test_empty_chain() {
        assert!(walk(&device(&[]), true).unwrap().is_empty());
    }

    #[test]
    fn test_recognised_ids() {
        let caps = walk(&device(&[(0x10, CAP_TYPE_NORMAL, 0x70), (0x01, CAP_TYPE_EXTENDED, 0x100)]), true).unwrap();
        assert_eq!(
            caps,
            vec![
                Capability { id: CapabilityId::Normal(CapId::Exp), cap_type: CapType::Normal, addr: 0x70 },
                Capability { id: CapabilityId::Extended(ExtCapId::Err), cap_type: CapType::Extended, addr: 0x100 },
            ]
        );
    }

    #[test]
    fn test_unrecognised_id_stays_raw() {
        let caps = walk(&device(&[(0x42, CAP_TYPE_NORMAL, 0x40)]), true).unwrap();
        assert_eq!(caps[0].id, CapabilityId::Raw(0x42));
        assert_eq!(caps[0].cap_type, CapType::Normal);

        // 0x0c is unassigned in the extended table
        let caps = walk(&device(&[(0x0c, CAP_TYPE_EXTENDED, 0x100)]), true).unwrap();
        assert_eq!(caps[0].id, CapabilityId::Raw(0x0c));
    }

    #[test]
    fn test_unknown_type_is_error_by_default() {
        let dev = device(&[(0x01, CAP_TYPE_NORMAL, 0x40), (0x05, 7, 0x50)]);
        let err = walk(&dev, true).unwrap_err();
        assert!(matches!(err, PciError::UnrecognizedCapabilityType { cap_type: 7, addr: 0x50 }));
    }

    #[test]
    fn test_unknown_type_skipped_when_lenient() {
        let dev = device(&[(0x01, CAP_TYPE_NORMAL, 0x40), (0x05, 7, 0x50), (0x11, CAP_TYPE_NORMAL, 0x60)]);
        let caps = walk(&dev, false).unwrap();
        let ids: Vec<u16> = caps.iter().map(|c| c.id.raw()).collect();
        assert_eq!(ids, vec![0x01, 0x11]);
    }

    #[test]
    fn test_id_tables() {
        assert_eq!(CapId::from_raw(0x11), Some(CapId::Msix));
        assert_eq!(ExtCapId::from_raw(0x2a), Some(ExtCapId::Gt32));
        assert_eq!(u16::from(ExtCapId::Dvsec), 0x23);
        assert_eq!(CapId::Exp.description(), "PCI Express");
    }
}
