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

//! Linux sysfs backend
//!
//! Devices live under `/sys/bus/pci/devices/dddd:bb:ss.f`. Identity and class
//! come from the text attributes, resources from the `resource` table and the
//! rest from the binary `config` and `vpd` files. Unprivileged readers only
//! see the first 64 bytes of `config`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::generic::{self, ConfigSpace, CONFIG_EXTENDED_LEN};
use super::names::IdResolver;
use super::{AccessMethod, Param, PciAccess, PciAddress, RawDevice, BAR_COUNT};
use crate::error::{PciError, Result};
use crate::flags::{FillFlags, LookupMode};

pub const DEFAULT_SYSFS_PATH: &str = "/sys/bus/pci";

const PARAM_PATH: &str = "sysfs.path";

// Kernel resource flags (include/linux/ioport.h)
const IORESOURCE_IO: u64 = 0x0000_0100;
const IORESOURCE_PREFETCH: u64 = 0x0000_2000;
const IORESOURCE_MEM_64: u64 = 0x0010_0000;

const BAR_SPACE_IO: u64 = 0x01;
const BAR_MEM_64: u64 = 0x04;
const BAR_PREFETCH: u64 = 0x08;

/// Index of the expansion ROM line in `resource`
const ROM_RESOURCE: usize = 6;

#[derive(Debug)]
pub struct SysfsAccess {
    root: PathBuf,
    devices: Vec<RawDevice>,
    names: IdResolver,
}

impl Default for SysfsAccess {
    fn default() -> Self {
        Self::new()
    }
}

fn read_trimmed<P: AsRef<Path>>(p: P) -> io::Result<String> {
    let mut s = String::new();
    File::open(p)?.read_to_string(&mut s)?;
    Ok(s.trim().to_string())
}

fn read_sysfs_hex(path: &Path) -> Option<u64> {
    let content = read_trimmed(path).ok()?;
    let hex = content.strip_prefix("0x").unwrap_or(&content);
    u64::from_str_radix(hex, 16).ok()
}

fn read_optional(path: &Path) -> Option<String> {
    read_trimmed(path).ok().filter(|s| !s.is_empty())
}

fn read_link_name(path: &Path) -> Option<String> {
    let target = fs::read_link(path).ok()?;
    target.file_name().map(|n| n.to_string_lossy().into_owned())
}

impl SysfsAccess {
    pub fn new() -> Self {
        Self::with_root(DEFAULT_SYSFS_PATH)
    }

    /// Backend rooted somewhere other than `/sys/bus/pci`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            devices: Vec::new(),
            names: IdResolver::new(),
        }
    }

    fn devices_dir(&self) -> PathBuf {
        self.root.join("devices")
    }

    fn dev_dir(&self, addr: PciAddress) -> PathBuf {
        self.devices_dir().join(addr.to_string())
    }

    fn read_ident(&self, dir: &Path, dev: &mut RawDevice) -> bool {
        match (read_sysfs_hex(&dir.join("vendor")), read_sysfs_hex(&dir.join("device"))) {
            (Some(v), Some(d)) => {
                dev.vendor_id = v as u16;
                dev.device_id = d as u16;
                true
            }
            _ => false,
        }
    }

    fn read_class(&self, dir: &Path, dev: &mut RawDevice) -> bool {
        match read_sysfs_hex(&dir.join("class")) {
            Some(class) => {
                dev.device_class = (class >> 8) as u16;
                dev.prog_if = class as u8;
                true
            }
            None => false,
        }
    }

    fn read_resources(&self, dir: &Path, dev: &mut RawDevice) -> io::Result<()> {
        let table = read_trimmed(dir.join("resource"))?;
        dev.base_addr = [0; BAR_COUNT];
        dev.size = [0; BAR_COUNT];
        dev.rom_base_addr = 0;
        dev.rom_size = 0;

        for (i, line) in table.lines().enumerate().take(ROM_RESOURCE + 1) {
            let fields: Vec<u64> = line
                .split_whitespace()
                .filter_map(|f| u64::from_str_radix(f.trim_start_matches("0x"), 16).ok())
                .collect();
            let [start, end, flags] = fields[..] else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("malformed resource line {}", i + 1),
                ));
            };
            let size = if start != 0 || end != 0 {
                end.checked_sub(start).map(|d| d + 1).ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("resource line {} ends before it starts", i + 1),
                    )
                })?
            } else {
                0
            };
            let mut bits = 0;
            if flags & IORESOURCE_IO != 0 {
                bits |= BAR_SPACE_IO;
            } else {
                if flags & IORESOURCE_PREFETCH != 0 {
                    bits |= BAR_PREFETCH;
                }
                if flags & IORESOURCE_MEM_64 != 0 {
                    bits |= BAR_MEM_64;
                }
            }
            if i < ROM_RESOURCE {
                dev.base_addr[i] = if start != 0 { start | bits } else { 0 };
                dev.size[i] = size;
            } else {
                dev.rom_base_addr = start;
                dev.rom_size = size;
            }
        }
        Ok(())
    }

    fn find_phys_slot(&self, addr: PciAddress) -> Option<String> {
        let want = format!("{:04x}:{:02x}:{:02x}", addr.domain, addr.bus, addr.dev);
        let entries = fs::read_dir(self.root.join("slots")).ok()?;
        for ent in entries.flatten() {
            if let Ok(slot_addr) = read_trimmed(ent.path().join("address")) {
                if slot_addr == want {
                    return Some(ent.file_name().to_string_lossy().into_owned());
                }
            }
        }
        None
    }

    fn read_config_snapshot(&self, dir: &Path) -> Option<Vec<u8>> {
        let mut data = fs::read(dir.join("config")).ok()?;
        data.truncate(CONFIG_EXTENDED_LEN);
        Some(data)
    }

    fn open_for(&self, addr: PciAddress, attr: &str, write: bool) -> io::Result<File> {
        OpenOptions::new()
            .read(!write)
            .write(write)
            .open(self.dev_dir(addr).join(attr))
    }
}

impl PciAccess for SysfsAccess {
    fn method(&self) -> AccessMethod {
        AccessMethod::LinuxSysfs
    }

    fn init(&mut self) -> Result<()> {
        let dir = self.devices_dir();
        if !dir.is_dir() {
            return Err(PciError::Init {
                method: self.method().name(),
                reason: format!("{} not found", dir.display()),
            });
        }
        debug!("sysfs access initialized at {}", self.root.display());
        Ok(())
    }

    fn cleanup(&mut self) {
        self.devices.clear();
    }

    fn supported_fill(&self) -> FillFlags {
        FillFlags::all()
    }

    fn scan_bus(&mut self) -> Result<()> {
        let dir = self.devices_dir();
        let entries = fs::read_dir(&dir).map_err(|source| PciError::FileRead {
            path: dir.clone(),
            source,
        })?;

        let mut found = Vec::new();
        for ent in entries.flatten() {
            let name = ent.file_name();
            let name = name.to_string_lossy();
            let addr = match name.parse::<PciAddress>() {
                Ok(a) => a,
                Err(e) => {
                    debug!("skipping sysfs entry {}: {}", name, e);
                    continue;
                }
            };
            let path = ent.path();
            let mut dev = RawDevice::new(addr);
            if self.read_ident(&path, &mut dev) {
                dev.prefilled |= FillFlags::IDENT;
            }
            if self.read_class(&path, &mut dev) {
                dev.prefilled |= FillFlags::CLASS;
            }
            found.push(dev);
        }
        found.sort_by_key(|d| d.addr);
        debug!("sysfs scan found {} devices", found.len());
        self.devices = found;
        Ok(())
    }

    fn scanned(&self) -> Vec<PciAddress> {
        self.devices.iter().map(|d| d.addr).collect()
    }

    fn get_dev(&mut self, addr: PciAddress) -> RawDevice {
        self.devices
            .iter()
            .find(|d| d.addr == addr)
            .cloned()
            .unwrap_or_else(|| RawDevice::new(addr))
    }

    fn fill_info(&mut self, dev: &mut RawDevice, want: FillFlags) -> Result<FillFlags> {
        let dir = self.dev_dir(dev.addr);
        if !dir.is_dir() {
            return Err(PciError::read(dev.addr, 0, 0, "device not present in sysfs"));
        }
        let mut done = FillFlags::empty();

        if want.contains(FillFlags::IDENT) && self.read_ident(&dir, dev) {
            done |= FillFlags::IDENT;
        }
        if want.intersects(FillFlags::CLASS | FillFlags::CLASS_EXT) && self.read_class(&dir, dev) {
            done |= FillFlags::CLASS;
            if let Some(rev) = read_sysfs_hex(&dir.join("revision")) {
                dev.revision = rev as u8;
                done |= FillFlags::CLASS_EXT;
            }
        }
        if want.contains(FillFlags::SUBSYS) {
            if let (Some(sv), Some(sd)) = (
                read_sysfs_hex(&dir.join("subsystem_vendor")),
                read_sysfs_hex(&dir.join("subsystem_device")),
            ) {
                dev.subsys_vendor_id = sv as u16;
                dev.subsys_id = sd as u16;
                done |= FillFlags::SUBSYS;
            }
        }
        if want.contains(FillFlags::IRQ) {
            if let Some(irq) = read_optional(&dir.join("irq")).and_then(|s| s.parse().ok()) {
                dev.irq = irq;
                done |= FillFlags::IRQ;
            }
        }
        if want.intersects(FillFlags::BASES | FillFlags::ROM_BASE | FillFlags::SIZES) {
            match self.read_resources(&dir, dev) {
                Ok(()) => done |= FillFlags::BASES | FillFlags::ROM_BASE | FillFlags::SIZES,
                Err(e) => debug!("{}: no resource table: {}", dev.addr, e),
            }
        }

        // Whatever the attributes could not provide comes from config space
        let from_config = want & generic::decodable() & !done;
        if !from_config.is_empty() {
            if let Some(snapshot) = self.read_config_snapshot(&dir) {
                done |= generic::fill_from_config(dev, &ConfigSpace::new(&snapshot), from_config);
            }
        }

        if want.contains(FillFlags::PHYS_SLOT) {
            dev.phy_slot = self.find_phys_slot(dev.addr);
            done |= FillFlags::PHYS_SLOT;
        }
        if want.contains(FillFlags::MODULE_ALIAS) {
            dev.module_alias = read_optional(&dir.join("modalias"));
            done |= FillFlags::MODULE_ALIAS;
        }
        if want.contains(FillFlags::LABEL) {
            dev.label = read_optional(&dir.join("label"));
            done |= FillFlags::LABEL;
        }
        if want.contains(FillFlags::NUMA_NODE) {
            dev.numa_node = read_optional(&dir.join("numa_node"))
                .and_then(|s| s.parse::<i32>().ok())
                .filter(|&n| n >= 0);
            done |= FillFlags::NUMA_NODE;
        }
        if want.contains(FillFlags::DRIVER) {
            dev.driver = read_link_name(&dir.join("driver"));
            done |= FillFlags::DRIVER;
        }
        if want.contains(FillFlags::IOMMU_GROUP) {
            dev.iommu_group = read_link_name(&dir.join("iommu_group"));
            done |= FillFlags::IOMMU_GROUP;
        }

        trace!("{}: wanted {}, filled {}", dev.addr, want, done);
        Ok(done)
    }

    fn read_config(&mut self, dev: &RawDevice, pos: u32, buf: &mut [u8]) -> Result<()> {
        let file = self
            .open_for(dev.addr, "config", false)
            .map_err(|e| PciError::read(dev.addr, pos, buf.len(), e.to_string()))?;
        file.read_exact_at(buf, pos as u64).map_err(|e| {
            let reason = if e.kind() == io::ErrorKind::UnexpectedEof {
                "beyond the readable part of config space".to_string()
            } else {
                e.to_string()
            };
            PciError::read(dev.addr, pos, buf.len(), reason)
        })
    }

    fn write_config(&mut self, dev: &RawDevice, pos: u32, data: &[u8]) -> Result<()> {
        let file = self
            .open_for(dev.addr, "config", true)
            .map_err(|e| PciError::write(dev.addr, pos, data.len(), e.to_string()))?;
        file.write_all_at(data, pos as u64)
            .map_err(|e| PciError::write(dev.addr, pos, data.len(), e.to_string()))
    }

    fn read_vpd(&mut self, dev: &RawDevice, pos: u32, buf: &mut [u8]) -> Result<()> {
        let file = self
            .open_for(dev.addr, "vpd", false)
            .map_err(|e| PciError::read(dev.addr, pos, buf.len(), format!("VPD: {}", e)))?;
        file.read_exact_at(buf, pos as u64)
            .map_err(|e| PciError::read(dev.addr, pos, buf.len(), format!("VPD: {}", e)))
    }

    fn lookup_name(&mut self, mode: LookupMode, ids: &[i32]) -> Option<String> {
        self.names.lookup(mode, ids)
    }

    fn id_file(&self) -> Option<PathBuf> {
        self.names.id_file()
    }

    fn set_id_file(&mut self, path: Option<PathBuf>) {
        self.names.set_id_file(path);
    }

    fn param_at(&self, index: usize) -> Option<Param> {
        match index {
            0 => Some(Param::new(
                PARAM_PATH,
                self.root.to_string_lossy(),
                "Path to the sysfs device tree",
            )),
            _ => None,
        }
    }

    fn get_param(&self, name: &str) -> Option<String> {
        (name == PARAM_PATH).then(|| self.root.to_string_lossy().into_owned())
    }

    fn set_param(&mut self, name: &str, value: &str) -> Result<()> {
        if name != PARAM_PATH {
            return Err(PciError::KeyNotFound(name.to_string()));
        }
        self.root = PathBuf::from(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeSysfs;

    #[test]
    fn test_init_requires_devices_dir() {
        let mut access = SysfsAccess::with_root("/nonexistent/sysfs");
        assert!(matches!(access.init(), Err(PciError::Init { .. })));
    }

    #[test]
    fn test_scan_prefills_ident_and_class() {
        let sysfs = FakeSysfs::new();
        sysfs.add_nic("0000:02:00.0");
        sysfs.add_bridge("0000:00:1c.0");

        let mut access = SysfsAccess::with_root(sysfs.root());
        access.init().unwrap();
        access.scan_bus().unwrap();

        let addrs: Vec<String> = access.scanned().iter().map(|a| a.to_string()).collect();
        assert_eq!(addrs, vec!["0000:00:1c.0", "0000:02:00.0"]);

        let dev = access.get_dev("0000:02:00.0".parse().unwrap());
        assert_eq!(dev.prefilled, FillFlags::IDENT | FillFlags::CLASS);
        assert_eq!((dev.vendor_id, dev.device_id), (0x8086, 0x1533));
        assert_eq!(dev.device_class, 0x0200);

        let unknown = access.get_dev(PciAddress::new(0, 9, 0, 0));
        assert!(unknown.prefilled.is_empty());
    }

    #[test]
    fn test_fill_resources_and_attributes() {
        let sysfs = FakeSysfs::new();
        sysfs.add_nic("0000:02:00.0");
        let mut access = SysfsAccess::with_root(sysfs.root());
        access.init().unwrap();

        let mut dev = access.get_dev("0000:02:00.0".parse().unwrap());
        let want = FillFlags::BASES | FillFlags::MODULE_ALIAS | FillFlags::LABEL | FillFlags::PHYS_SLOT;
        let done = access.fill_info(&mut dev, want).unwrap();
        assert!(done.contains(want | FillFlags::SIZES | FillFlags::ROM_BASE));
        assert_eq!(dev.base_addr[0], 0xf7a0_0000);
        assert_eq!(dev.size[0], 0x20000);
        assert_eq!(dev.base_addr[2], 0xe001);
        assert_eq!(dev.size[2], 0x20);
        assert_eq!(dev.module_alias.as_deref(), Some("pci:v00008086d00001533sv000015D9sd00001533bc02sc00i00"));
        assert_eq!(dev.label, None);
        assert_eq!(dev.phy_slot.as_deref(), Some("4"));
    }

    #[test]
    fn test_inverted_resource_range_falls_back_to_config() {
        let sysfs = FakeSysfs::new();
        let dir = sysfs.add_nic("0000:02:00.0");
        fs::write(dir.join("resource"), "0x0000000000002000 0x0000000000001000 0x0000000000040200\n").unwrap();
        let mut access = SysfsAccess::with_root(sysfs.root());

        let mut dev = access.get_dev("0000:02:00.0".parse().unwrap());
        let done = access.fill_info(&mut dev, FillFlags::BASES | FillFlags::SIZES).unwrap();
        assert!(done.contains(FillFlags::BASES));
        assert!(!done.contains(FillFlags::SIZES));
        assert_eq!(dev.base_addr[0], 0xf7a0_0000);
    }

    #[test]
    fn test_vpd_read() {
        let sysfs = FakeSysfs::new();
        sysfs.add_nic("0000:02:00.0");
        let mut access = SysfsAccess::with_root(sysfs.root());
        let dev = access.get_dev("0000:02:00.0".parse().unwrap());

        let mut tag = [0u8; 3];
        access.read_vpd(&dev, 0, &mut tag).unwrap();
        assert_eq!(tag, [0x82, 0x04, 0x00]);

        let mut past = [0u8; 16];
        assert!(matches!(access.read_vpd(&dev, 4, &mut past), Err(PciError::Read { .. })));
    }

    #[test]
    fn test_fill_caps_from_config() {
        let sysfs = FakeSysfs::new();
        sysfs.add_nic("0000:02:00.0");
        let mut access = SysfsAccess::with_root(sysfs.root());

        let mut dev = access.get_dev("0000:02:00.0".parse().unwrap());
        let done = access.fill_info(&mut dev, FillFlags::CAPS).unwrap();
        assert!(done.contains(FillFlags::CAPS | FillFlags::EXT_CAPS));
        assert_eq!(dev.cap_nodes().count(), 3);
    }

    #[test]
    fn test_config_read_write() {
        let sysfs = FakeSysfs::new();
        sysfs.add_nic("0000:02:00.0");
        let mut access = SysfsAccess::with_root(sysfs.root());
        let dev = access.get_dev("0000:02:00.0".parse().unwrap());

        let mut buf = [0u8; 4];
        access.read_config(&dev, 0, &mut buf).unwrap();
        assert_eq!(buf, [0x86, 0x80, 0x33, 0x15]);

        access.write_config(&dev, 0x3c, &[0x0b]).unwrap();
        let mut irq = [0u8; 1];
        access.read_config(&dev, 0x3c, &mut irq).unwrap();
        assert_eq!(irq[0], 0x0b);

        let mut big = [0u8; 8];
        assert!(matches!(access.read_config(&dev, 0xffc, &mut big), Err(PciError::Read { .. })));
    }

    #[test]
    fn test_missing_device_fill_fails() {
        let sysfs = FakeSysfs::new();
        let mut access = SysfsAccess::with_root(sysfs.root());
        let mut dev = access.get_dev(PciAddress::new(0, 1, 0, 0));
        assert!(access.fill_info(&mut dev, FillFlags::IDENT).is_err());
    }

    #[test]
    fn test_params() {
        let mut access = SysfsAccess::new();
        assert_eq!(access.get_param("sysfs.path").as_deref(), Some(DEFAULT_SYSFS_PATH));
        access.set_param("sysfs.path", "/tmp/x").unwrap();
        assert_eq!(access.param_at(0).unwrap().value, "/tmp/x");
        assert!(access.param_at(1).is_none());
        assert!(matches!(access.set_param("dump.name", "x"), Err(PciError::KeyNotFound(_))));
    }
}
