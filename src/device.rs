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

//! PCI functions
//!
//! Every accessor names the fill categories it reads and populates them on
//! first use. Categories the backend cannot provide at all fail with
//! [`PciError::UnsupportedField`] instead of returning a default.

use std::fmt;

use serde_json::json;
use tracing::trace;

use crate::access::{PciAddress, RawDevice};
use crate::caps::{self, CapType, Capability};
use crate::class::DeviceClass;
use crate::error::{PciError, Result};
use crate::fill::FillTracker;
use crate::flags::FillFlags;
use crate::logger::log_event;
use crate::lookup::LookupIds;
use crate::session::Session;

/// Read-ahead copy of the start of config space.
#[derive(Debug)]
struct ConfigCache {
    data: Vec<u8>,
    external: bool,
}

pub struct Device<'s> {
    session: &'s Session,
    addr: PciAddress,
    raw: Option<RawDevice>,
    tracker: FillTracker,
    cache: Option<ConfigCache>,
}

/// Drop trailing zero entries, keeping leading and interior ones.
fn rstrip_zeros(values: &[u64]) -> Vec<u64> {
    let end = values.iter().rposition(|&v| v != 0).map_or(0, |i| i + 1);
    values[..end].to_vec()
}

impl<'s> Device<'s> {
    pub(crate) fn new(session: &'s Session, raw: RawDevice) -> Self {
        Self {
            session,
            addr: raw.addr,
            tracker: FillTracker::new(raw.prefilled),
            raw: Some(raw),
            cache: None,
        }
    }

    pub fn addr(&self) -> PciAddress {
        self.addr
    }

    pub fn domain(&self) -> u32 {
        self.addr.domain
    }

    pub fn bus(&self) -> u8 {
        self.addr.bus
    }

    pub fn dev(&self) -> u8 {
        self.addr.dev
    }

    pub fn func(&self) -> u8 {
        self.addr.func
    }

    pub fn known_fields(&self) -> FillFlags {
        self.tracker.known_fields()
    }

    pub fn is_closed(&self) -> bool {
        self.raw.is_none()
    }

    /// Release the native record. Safe to call more than once.
    pub fn close(&mut self) {
        if self.raw.take().is_some() {
            trace!("{}: device closed", self.addr);
        }
        self.cache = None;
    }

    fn raw_ref(&self) -> Result<&RawDevice> {
        self.raw.as_ref().ok_or(PciError::DeviceClosed(self.addr))
    }

    /// Ask the backend for `flags` and record whatever it filled.
    pub fn fill_info(&mut self, flags: FillFlags) -> Result<FillFlags> {
        let addr = self.addr;
        let raw = self.raw.as_mut().ok_or(PciError::DeviceClosed(addr))?;
        let filled = self.session.with_access(|a| a.fill_info(raw, flags))?;
        self.tracker.record(filled);
        trace!("{}: fill {} -> {}", addr, flags, filled);
        Ok(filled)
    }

    /// Make sure `flags` are populated and hand out the record.
    pub(crate) fn raw_filled(&mut self, flags: FillFlags) -> Result<&RawDevice> {
        let addr = self.addr;
        let session = self.session;
        let raw = self.raw.as_mut().ok_or(PciError::DeviceClosed(addr))?;
        if !self.tracker.known(flags) {
            self.tracker
                .ensure(flags, |want| session.with_access(|a| a.fill_info(raw, want)))?;
        }
        if !self.tracker.known(flags) {
            return Err(PciError::FillIncomplete {
                addr,
                missing: flags.difference(self.tracker.known_fields()),
            });
        }
        self.raw_ref()
    }

    /// Like [`Device::raw_filled`] but fails for categories the backend lacks.
    fn field(&mut self, flags: FillFlags, field: &'static str) -> Result<&RawDevice> {
        self.raw_ref()?;
        if !self.tracker.known(flags) && !self.session.supported_fill()?.contains(flags) {
            return Err(PciError::UnsupportedField {
                field,
                method: self.session.method().name(),
            });
        }
        self.raw_filled(flags)
    }

    pub fn vendor_id(&mut self) -> Result<u16> {
        Ok(self.field(FillFlags::IDENT, "vendor_id")?.vendor_id)
    }

    pub fn device_id(&mut self) -> Result<u16> {
        Ok(self.field(FillFlags::IDENT, "device_id")?.device_id)
    }

    pub fn vendor(&mut self) -> Result<Option<String>> {
        let v = self.vendor_id()?;
        self.session.lookup(LookupIds::new().vendor(v)).vendor()
    }

    pub fn device(&mut self) -> Result<Option<String>> {
        let raw = self.field(FillFlags::IDENT, "device")?;
        let ids = LookupIds::new().vendor(raw.vendor_id).device(raw.device_id);
        self.session.lookup(ids).device()
    }

    pub fn device_class(&mut self) -> Result<DeviceClass> {
        Ok(DeviceClass(self.field(FillFlags::CLASS, "device_class")?.device_class))
    }

    pub fn device_class_name(&mut self) -> Result<Option<String>> {
        let class = self.device_class()?;
        self.session.lookup(LookupIds::new().class(class.raw())).pci_class()
    }

    pub fn revision(&mut self) -> Result<u8> {
        Ok(self.field(FillFlags::CLASS_EXT, "revision")?.revision)
    }

    pub fn prog_if(&mut self) -> Result<u8> {
        Ok(self.field(FillFlags::CLASS_EXT, "prog_if")?.prog_if)
    }

    pub fn prog_if_name(&mut self) -> Result<Option<String>> {
        let raw = self.field(FillFlags::CLASS | FillFlags::CLASS_EXT, "prog_if_name")?;
        let ids = LookupIds::new().class(raw.device_class).progif(raw.prog_if);
        self.session.lookup(ids).programming_interface()
    }

    pub fn subsys_vendor_id(&mut self) -> Result<u16> {
        Ok(self.field(FillFlags::SUBSYS, "subsys_vendor_id")?.subsys_vendor_id)
    }

    pub fn subsys_id(&mut self) -> Result<u16> {
        Ok(self.field(FillFlags::SUBSYS, "subsys_id")?.subsys_id)
    }

    pub fn subsystem_name(&mut self) -> Result<Option<String>> {
        let raw = self.field(FillFlags::IDENT | FillFlags::SUBSYS, "subsystem_name")?;
        let ids = LookupIds::new()
            .vendor(raw.vendor_id)
            .device(raw.device_id)
            .subvendor(raw.subsys_vendor_id)
            .subdev(raw.subsys_id);
        self.session.lookup(ids).subsystem_vendor_device()
    }

    pub fn irq(&mut self) -> Result<u32> {
        Ok(self.field(FillFlags::IRQ, "irq")?.irq)
    }

    /// BAR values with trailing unused entries removed.
    pub fn base_addr(&mut self) -> Result<Vec<u64>> {
        Ok(rstrip_zeros(&self.field(FillFlags::BASES, "base_addr")?.base_addr))
    }

    /// Region sizes with trailing unused entries removed.
    pub fn size(&mut self) -> Result<Vec<u64>> {
        Ok(rstrip_zeros(&self.field(FillFlags::SIZES, "size")?.size))
    }

    pub fn rom_base_addr(&mut self) -> Result<u64> {
        Ok(self.field(FillFlags::ROM_BASE, "rom_base_addr")?.rom_base_addr)
    }

    pub fn rom_size(&mut self) -> Result<u64> {
        Ok(self.field(FillFlags::SIZES, "rom_size")?.rom_size)
    }

    /// Capabilities from both chains in discovery order.
    pub fn caps(&mut self) -> Result<Vec<Capability>> {
        let strict = self.session.strict_cap_types();
        let raw = self.field(FillFlags::CAPS | FillFlags::EXT_CAPS, "caps")?;
        caps::walk(raw, strict)
    }

    /// Config space offset of the first capability matching `id` and `cap_type`.
    pub fn find_cap(&mut self, id: impl Into<u16>, cap_type: CapType) -> Result<Option<u32>> {
        let id = id.into();
        let raw = self.field(FillFlags::CAPS | FillFlags::EXT_CAPS, "caps")?;
        Ok(raw
            .cap_nodes()
            .find(|c| c.id == id && c.cap_type == cap_type.raw())
            .map(|c| c.addr))
    }

    pub fn phy_slot(&mut self) -> Result<Option<String>> {
        Ok(self.field(FillFlags::PHYS_SLOT, "phy_slot")?.phy_slot.clone())
    }

    pub fn phys_slot(&mut self) -> Result<Option<String>> {
        self.phy_slot()
    }

    pub fn module_alias(&mut self) -> Result<Option<String>> {
        Ok(self.field(FillFlags::MODULE_ALIAS, "module_alias")?.module_alias.clone())
    }

    pub fn label(&mut self) -> Result<Option<String>> {
        Ok(self.field(FillFlags::LABEL, "label")?.label.clone())
    }

    pub fn numa_node(&mut self) -> Result<Option<i32>> {
        Ok(self.field(FillFlags::NUMA_NODE, "numa_node")?.numa_node)
    }

    pub fn driver(&mut self) -> Result<Option<String>> {
        Ok(self.field(FillFlags::DRIVER, "driver")?.driver.clone())
    }

    pub fn iommu_group(&mut self) -> Result<Option<String>> {
        Ok(self.field(FillFlags::IOMMU_GROUP, "iommu_group")?.iommu_group.clone())
    }

    // ------------------------------------------------------------------
    // Configuration space I/O
    // ------------------------------------------------------------------

    /// Read `buf.len()` bytes at `pos`, serving what the cache covers.
    pub fn read_block(&mut self, pos: u32, buf: &mut [u8]) -> Result<()> {
        let start = pos as usize;
        if let Some(cache) = &self.cache {
            if let Some(src) = cache.data.get(start..start + buf.len()) {
                buf.copy_from_slice(src);
                return Ok(());
            }
        }
        let raw = self.raw_ref()?;
        self.session.with_access(|a| a.read_config(raw, pos, buf))
    }

    pub fn read(&mut self, pos: u32, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_block(pos, &mut buf)?;
        Ok(buf)
    }

    /// Write `data` at `pos`, keeping the cache in step.
    pub fn write(&mut self, pos: u32, data: &[u8]) -> Result<()> {
        if !self.session.writeable() {
            return Err(PciError::ReadOnly);
        }
        let raw = self.raw_ref()?;
        self.session.with_access(|a| a.write_config(raw, pos, data))?;
        if let Some(cache) = self.cache.as_mut() {
            let start = pos as usize;
            if start < cache.data.len() {
                let n = data.len().min(cache.data.len() - start);
                cache.data[start..start + n].copy_from_slice(&data[..n]);
            }
        }
        log_event(
            "config_write",
            json!({
                "device": self.addr.to_string(),
                "pos": pos,
                "len": data.len(),
                "data": data.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" "),
            }),
        );
        Ok(())
    }

    fn read_aligned<const N: usize>(&mut self, pos: u32) -> Result<[u8; N]> {
        if pos as usize % N != 0 {
            return Err(PciError::Unaligned { pos, width: N });
        }
        let mut buf = [0u8; N];
        self.read_block(pos, &mut buf)?;
        Ok(buf)
    }

    fn write_aligned(&mut self, pos: u32, data: &[u8]) -> Result<()> {
        if pos as usize % data.len() != 0 {
            return Err(PciError::Unaligned { pos, width: data.len() });
        }
        self.write(pos, data)
    }

    pub fn read_byte(&mut self, pos: u32) -> Result<u8> {
        Ok(self.read_aligned::<1>(pos)?[0])
    }

    pub fn read_word(&mut self, pos: u32) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_aligned::<2>(pos)?))
    }

    pub fn read_long(&mut self, pos: u32) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_aligned::<4>(pos)?))
    }

    pub fn write_byte(&mut self, pos: u32, data: u8) -> Result<()> {
        self.write_aligned(pos, &[data])
    }

    pub fn write_word(&mut self, pos: u32, data: u16) -> Result<()> {
        self.write_aligned(pos, &data.to_le_bytes())
    }

    pub fn write_long(&mut self, pos: u32, data: u32) -> Result<()> {
        self.write_aligned(pos, &data.to_le_bytes())
    }

    pub fn read_vpd(&mut self, pos: u32, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let raw = self.raw_ref()?;
        self.session.with_access(|a| a.read_vpd(raw, pos, &mut buf))?;
        Ok(buf)
    }

    /// Read the first `size` bytes of config space now and serve later
    /// reads in that range from memory.
    pub fn setup_owned_cache(&mut self, size: usize) -> Result<()> {
        self.cache = None;
        let data = self.read(0, size)?;
        self.cache = Some(ConfigCache { data, external: false });
        Ok(())
    }

    /// Use `buffer` as the contents of config space from offset 0.
    pub fn setup_external_cache(&mut self, buffer: Vec<u8>) {
        self.cache = Some(ConfigCache {
            data: buffer,
            external: true,
        });
    }

    /// Detach the cache, returning an externally supplied buffer.
    pub fn take_cache(&mut self) -> Option<Vec<u8>> {
        match self.cache.take() {
            Some(ConfigCache { data, external: true }) => Some(data),
            _ => None,
        }
    }
}

impl Drop for Device<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Summary of the already known fields. Never triggers a fill.
impl fmt::Display for Device<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)?;
        let Some(raw) = self.raw.as_ref() else {
            return write!(f, " (closed)");
        };
        let known = self.known_fields();
        let hex_list = |v: &[u64]| {
            let items: Vec<String> = rstrip_zeros(v).iter().map(|x| format!("{:#x}", x)).collect();
            format!("[{}]", items.join(", "))
        };

        if known.contains(FillFlags::IDENT) {
            let ids = LookupIds::new().vendor(raw.vendor_id).device(raw.device_id);
            if let Ok(Some(name)) = self.session.lookup(ids).vendor_device() {
                write!(f, ", {{{}}}", name)?;
            }
            write!(f, ", vendor_id={:#06x}, device_id={:#06x}", raw.vendor_id, raw.device_id)?;
        }
        if known.contains(FillFlags::IRQ) {
            write!(f, ", irq={}", raw.irq)?;
        }
        if known.contains(FillFlags::BASES) {
            write!(f, ", bases={}", hex_list(&raw.base_addr))?;
        }
        if known.contains(FillFlags::ROM_BASE) {
            write!(f, ", rom_base={:#x}", raw.rom_base_addr)?;
        }
        if known.contains(FillFlags::SIZES) {
            write!(f, ", size={}, rom_size={:#x}", hex_list(&raw.size), raw.rom_size)?;
        }
        if known.contains(FillFlags::CLASS) {
            let name = self
                .session
                .lookup(LookupIds::new().class(raw.device_class))
                .pci_class()
                .ok()
                .flatten()
                .unwrap_or_else(|| DeviceClass(raw.device_class).to_string());
            write!(f, ", device_class={}", name)?;
        }
        if known.intersects(FillFlags::CAPS | FillFlags::EXT_CAPS) {
            let caps: Vec<String> = caps::walk(raw, false)
                .unwrap_or_default()
                .iter()
                .map(|c| c.to_string())
                .collect();
            write!(f, ", caps=[{}]", caps.join(", "))?;
        }
        if known.contains(FillFlags::PHYS_SLOT) {
            write!(f, ", phys_slot={:?}", raw.phy_slot)?;
        }
        if known.contains(FillFlags::MODULE_ALIAS) {
            write!(f, ", module_alias={:?}", raw.module_alias)?;
        }
        if known.contains(FillFlags::LABEL) {
            write!(f, ", label={:?}", raw.label)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Device<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("addr", &self.addr)
            .field("known_fields", &self.known_fields())
            .field("closed", &self.is_closed())
            .finish()
    }
}
