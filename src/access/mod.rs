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

//! Low level PCI access
//!
//! This layer talks to the hardware (or to a stand-in for it). Everything
//! above it goes through the [`PciAccess`] trait:
//!
//! - `sysfs` - Linux `/sys/bus/pci` backend
//! - `dump` - backend replaying `lspci -x` style hex dumps
//! - `generic` - config header decoding and capability scanning
//! - `names` - the `pci.ids` database and name formatting
//! - `filter` - the native filter record and its two grammars

pub mod dump;
pub mod filter;
pub mod generic;
pub mod names;
pub mod sysfs;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{PciError, Result};
use crate::flags::{FillFlags, LookupMode};

pub use dump::DumpAccess;
pub use filter::RawFilter;
pub use sysfs::SysfsAccess;

/// Type discriminator of a normal (legacy) capability node
pub const CAP_TYPE_NORMAL: u8 = 1;
/// Type discriminator of an extended (PCI Express) capability node
pub const CAP_TYPE_EXTENDED: u8 = 2;

/// Number of base address registers in a type 0 header
pub const BAR_COUNT: usize = 6;

/// Location of a PCI function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PciAddress {
    pub domain: u32,
    pub bus: u8,
    pub dev: u8,
    pub func: u8,
}

impl PciAddress {
    pub fn new(domain: u32, bus: u8, dev: u8, func: u8) -> Self {
        Self { domain, bus, dev, func }
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:02x}:{:02x}.{:x}", self.domain, self.bus, self.dev, self.func)
    }
}

impl FromStr for PciAddress {
    type Err = String;

    /// Parse `dddd:bb:ss.f` or `bb:ss.f` (domain 0).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (head, func) = s.rsplit_once('.').ok_or_else(|| format!("missing function in '{}'", s))?;
        let parts: Vec<&str> = head.split(':').collect();
        let (domain, bus, dev) = match parts.as_slice() {
            [d, b, s] => (*d, *b, *s),
            [b, s] => ("0", *b, *s),
            _ => return Err(format!("malformed address '{}'", s)),
        };
        let hex = |v: &str, what: &str| {
            u32::from_str_radix(v, 16).map_err(|e| format!("bad {} '{}': {}", what, v, e))
        };
        let domain = hex(domain, "domain")?;
        let bus = hex(bus, "bus")?;
        let dev = hex(dev, "slot")?;
        let func = hex(func, "function")?;
        if bus > 0xff || dev > 0x1f || func > 7 {
            return Err(format!("address out of range '{}'", s));
        }
        Ok(Self::new(domain, bus as u8, dev as u8, func as u8))
    }
}

/// One node of a device's capability chain as produced by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCap {
    pub id: u16,
    pub cap_type: u8,
    pub addr: u32,
    pub next: Option<Box<RawCap>>,
}

/// Native device record.
///
/// Fields are only meaningful once the corresponding [`FillFlags`] category
/// has been filled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDevice {
    pub addr: PciAddress,
    /// Categories the backend already populated when it handed out the record
    pub prefilled: FillFlags,
    pub vendor_id: u16,
    pub device_id: u16,
    pub device_class: u16,
    pub revision: u8,
    pub prog_if: u8,
    pub subsys_vendor_id: u16,
    pub subsys_id: u16,
    pub irq: u32,
    pub base_addr: [u64; BAR_COUNT],
    pub size: [u64; BAR_COUNT],
    pub rom_base_addr: u64,
    pub rom_size: u64,
    pub first_cap: Option<Box<RawCap>>,
    pub phy_slot: Option<String>,
    pub module_alias: Option<String>,
    pub label: Option<String>,
    pub numa_node: Option<i32>,
    pub driver: Option<String>,
    pub iommu_group: Option<String>,
}

impl RawDevice {
    pub fn new(addr: PciAddress) -> Self {
        Self { addr, ..Default::default() }
    }

    /// Replace the capability chain, keeping the given order.
    pub fn set_caps(&mut self, caps: &[(u16, u8, u32)]) {
        let mut head: Option<Box<RawCap>> = None;
        for &(id, cap_type, addr) in caps.iter().rev() {
            head = Some(Box::new(RawCap { id, cap_type, addr, next: head }));
        }
        self.first_cap = head;
    }

    /// Walk the capability chain from the head to the terminator.
    pub fn cap_nodes(&self) -> CapNodes<'_> {
        CapNodes { cur: self.first_cap.as_deref() }
    }
}

pub struct CapNodes<'a> {
    cur: Option<&'a RawCap>,
}

impl<'a> Iterator for CapNodes<'a> {
    type Item = &'a RawCap;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cur?;
        self.cur = node.next.as_deref();
        Some(node)
    }
}

/// Backend parameter as listed by [`PciAccess::param_at`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub value: String,
    pub help: String,
}

impl Param {
    pub fn new(name: &str, value: impl Into<String>, help: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            help: help.to_string(),
        }
    }
}

macro_rules! access_methods {
    ($($variant:ident = $idx:expr, $name:expr;)*) => {
        /// Mechanism used to reach configuration space.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum AccessMethod {
            $($variant = $idx,)*
        }

        impl AccessMethod {
            pub const ALL: &'static [AccessMethod] = &[$(AccessMethod::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(AccessMethod::$variant => $name,)*
                }
            }
        }
    };
}

access_methods! {
    Auto = 0, "auto";
    LinuxSysfs = 1, "linux-sysfs";
    LinuxProc = 2, "linux-proc";
    IntelConf1 = 3, "intel-conf1";
    IntelConf2 = 4, "intel-conf2";
    FbsdDevice = 5, "fbsd-device";
    AixDevice = 6, "aix-device";
    NbsdLibpci = 7, "nbsd-libpci";
    ObsdDevice = 8, "obsd-device";
    Dump = 9, "dump";
    Darwin = 10, "darwin";
    SylixosDevice = 11, "sylixos-device";
    Hurd = 12, "hurd";
    Win32Cfgmgr32 = 13, "win32-cfgmgr32";
    Win32Kldbg = 14, "win32-kldbg";
    Win32Sysdbg = 15, "win32-sysdbg";
    MmioConf1 = 16, "mmio-conf1";
    MmioConf1Ext = 17, "mmio-conf1-ext";
    Ecam = 18, "ecam";
    AosExpansion = 19, "aos-expansion";
}

impl AccessMethod {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.name() == name)
    }
}

impl Default for AccessMethod {
    fn default() -> Self {
        AccessMethod::Auto
    }
}

impl fmt::Display for AccessMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operations every access backend provides.
///
/// Backends are single threaded: a session owns exactly one and calls it
/// synchronously.
#[cfg_attr(test, mockall::automock)]
pub trait PciAccess {
    fn method(&self) -> AccessMethod;

    /// Prepare the backend after parameters have been applied.
    fn init(&mut self) -> Result<()>;

    /// Release everything acquired by `init`. Must tolerate repeated calls.
    fn cleanup(&mut self);

    /// Fill categories this backend is able to populate at all.
    fn supported_fill(&self) -> FillFlags;

    /// Rebuild the device list.
    fn scan_bus(&mut self) -> Result<()>;

    /// Addresses found by the last scan, in discovery order.
    fn scanned(&self) -> Vec<PciAddress>;

    /// Native record for an address, whether or not it was scanned.
    fn get_dev(&mut self, addr: PciAddress) -> RawDevice;

    /// Populate `flags` on `dev`, returning the categories actually filled.
    fn fill_info(&mut self, dev: &mut RawDevice, flags: FillFlags) -> Result<FillFlags>;

    fn read_config(&mut self, dev: &RawDevice, pos: u32, buf: &mut [u8]) -> Result<()>;

    fn write_config(&mut self, dev: &RawDevice, pos: u32, data: &[u8]) -> Result<()>;

    fn read_vpd(&mut self, dev: &RawDevice, pos: u32, buf: &mut [u8]) -> Result<()>;

    /// Resolve ids to a name. `None` when no name can be produced.
    fn lookup_name(&mut self, mode: LookupMode, ids: &[i32]) -> Option<String>;

    fn id_file(&self) -> Option<PathBuf>;

    /// Point name lookups at another id file; `None` restores the default.
    fn set_id_file(&mut self, path: Option<PathBuf>);

    /// Parameter cursor: `None` once `index` is past the last parameter.
    fn param_at(&self, index: usize) -> Option<Param>;

    fn get_param(&self, name: &str) -> Option<String>;

    fn set_param(&mut self, name: &str, value: &str) -> Result<()>;
}

/// Create the backend for `method`.
pub fn allocate(method: AccessMethod) -> Result<Box<dyn PciAccess>> {
    match method {
        AccessMethod::Auto | AccessMethod::LinuxSysfs => Ok(Box::new(SysfsAccess::new())),
        AccessMethod::Dump => Ok(Box::new(DumpAccess::new())),
        other => Err(PciError::UnsupportedMethod(other.name())),
    }
}
