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

//! Bit sets shared between the access layer and the device model.

use std::fmt;

use crate::error::{PciError, Result};

bitflags::bitflags! {
    /// Categories of device information that are populated together.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FillFlags: u32 {
        /// Vendor and device id.
        const IDENT        = 0x0001;
        /// Interrupt line.
        const IRQ          = 0x0002;
        /// Base address registers.
        const BASES        = 0x0004;
        /// Expansion ROM base.
        const ROM_BASE     = 0x0008;
        /// Region sizes (BARs and ROM).
        const SIZES        = 0x0010;
        /// Class code (base class + subclass).
        const CLASS        = 0x0020;
        /// Normal capability list.
        const CAPS         = 0x0040;
        /// Extended (PCI Express) capability list.
        const EXT_CAPS     = 0x0080;
        /// Physical slot name.
        const PHYS_SLOT    = 0x0100;
        /// Kernel module alias.
        const MODULE_ALIAS = 0x0200;
        /// Firmware supplied label.
        const LABEL        = 0x0400;
        /// NUMA node.
        const NUMA_NODE    = 0x0800;
        /// IOMMU group.
        const IOMMU_GROUP  = 0x4000;
        /// Revision and programming interface.
        const CLASS_EXT    = 0x0002_0000;
        /// Subsystem vendor and device id.
        const SUBSYS       = 0x0004_0000;
        /// Bound kernel driver.
        const DRIVER       = 0x0010_0000;
    }
}

const FILL_NAMES: &[(FillFlags, &str)] = &[
    (FillFlags::IDENT, "Ident"),
    (FillFlags::IRQ, "Irq"),
    (FillFlags::BASES, "Bases"),
    (FillFlags::ROM_BASE, "RomBase"),
    (FillFlags::SIZES, "Sizes"),
    (FillFlags::CLASS, "Class"),
    (FillFlags::CAPS, "Caps"),
    (FillFlags::EXT_CAPS, "ExtCaps"),
    (FillFlags::PHYS_SLOT, "PhysSlot"),
    (FillFlags::MODULE_ALIAS, "ModuleAlias"),
    (FillFlags::LABEL, "Label"),
    (FillFlags::NUMA_NODE, "NumaNode"),
    (FillFlags::IOMMU_GROUP, "IommuGroup"),
    (FillFlags::CLASS_EXT, "ClassExt"),
    (FillFlags::SUBSYS, "Subsys"),
    (FillFlags::DRIVER, "Driver"),
];

impl FillFlags {
    /// Human readable category name of a single flag.
    pub fn name(self) -> Option<&'static str> {
        FILL_NAMES.iter().find(|(f, _)| *f == self).map(|(_, n)| *n)
    }
}

impl fmt::Display for FillFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(none)");
        }
        let names: Vec<&str> = FILL_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, n)| *n)
            .collect();
        f.write_str(&names.join("|"))
    }
}

bitflags::bitflags! {
    /// Modes for id-to-name resolution.
    ///
    /// The low 16 bits select what is being looked up, the upper bits
    /// modify how the answer is formatted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LookupMode: u32 {
        const VENDOR        = 0x0000_0001;
        const DEVICE        = 0x0000_0002;
        const CLASS         = 0x0000_0004;
        const SUBSYSTEM     = 0x0000_0008;
        const PROGIF        = 0x0000_0010;
        /// Print numbers only, never names.
        const NUMERIC       = 0x0001_0000;
        /// Return nothing instead of a number when the name is unknown.
        const NO_NUMBERS    = 0x0002_0000;
        /// Print both the name and the number.
        const MIXED         = 0x0004_0000;
        const NETWORK       = 0x0008_0000;
        const SKIP_LOCAL    = 0x0010_0000;
        const CACHE         = 0x0020_0000;
        const REFRESH_CACHE = 0x0040_0000;
        const NO_HWDB       = 0x0080_0000;
    }
}

/// Bits selecting the kind of lookup (as opposed to formatting modifiers).
pub const LOOKUP_KIND_MASK: u32 = 0xffff;

const LOOKUP_NAMES: &[(LookupMode, &str)] = &[
    (LookupMode::VENDOR, "vendor"),
    (LookupMode::DEVICE, "device"),
    (LookupMode::CLASS, "class"),
    (LookupMode::SUBSYSTEM, "subsystem"),
    (LookupMode::PROGIF, "progif"),
    (LookupMode::NUMERIC, "numeric"),
    (LookupMode::NO_NUMBERS, "no-numbers"),
    (LookupMode::MIXED, "mixed"),
    (LookupMode::NETWORK, "network"),
    (LookupMode::SKIP_LOCAL, "skip-local"),
    (LookupMode::CACHE, "cache"),
    (LookupMode::REFRESH_CACHE, "refresh-cache"),
    (LookupMode::NO_HWDB, "no-hwdb"),
];

impl LookupMode {
    /// Replace the lookup-kind bits, keeping the formatting modifiers.
    pub fn with_kind(self, kind: LookupMode) -> LookupMode {
        LookupMode::from_bits_retain((self.bits() & !LOOKUP_KIND_MASK) | kind.bits())
    }

    /// Only the lookup-kind bits.
    pub fn kind(self) -> LookupMode {
        LookupMode::from_bits_retain(self.bits() & LOOKUP_KIND_MASK)
    }

    /// Parse a list of mode names as written in the config file.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<LookupMode> {
        let mut mode = LookupMode::empty();
        for name in names {
            let name = name.as_ref();
            let flag = LOOKUP_NAMES
                .iter()
                .find(|(_, n)| n.eq_ignore_ascii_case(name))
                .map(|(f, _)| *f)
                .ok_or_else(|| PciError::invalid_config("id_lookup_mode", format!("unknown mode '{}'", name)))?;
            mode |= flag;
        }
        Ok(mode)
    }

    /// Inverse of [`LookupMode::from_names`].
    pub fn names(self) -> Vec<String> {
        LOOKUP_NAMES
            .iter()
            .filter(|(f, _)| self.contains(*f))
            .map(|(_, n)| n.to_string())
            .collect()
    }
}
