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

//! Decoding of the standard configuration header
//!
//! Both backends hand a snapshot of configuration space to [`fill_from_config`],
//! which populates whatever categories the snapshot is long enough for.

use tracing::{debug, trace};

use super::{RawDevice, BAR_COUNT, CAP_TYPE_EXTENDED, CAP_TYPE_NORMAL};
use crate::flags::FillFlags;

/// Bytes every function exposes
pub const CONFIG_HEADER_LEN: usize = 64;
/// Conventional PCI configuration space
pub const CONFIG_LEGACY_LEN: usize = 256;
/// PCI Express extended configuration space
pub const CONFIG_EXTENDED_LEN: usize = 4096;

/// Register offsets inside the configuration header
pub mod reg {
    pub const VENDOR_ID: u32 = 0x00;
    pub const DEVICE_ID: u32 = 0x02;
    pub const STATUS: u32 = 0x06;
    pub const REVISION_ID: u32 = 0x08;
    pub const PROG_IF: u32 = 0x09;
    pub const CLASS_DEVICE: u32 = 0x0a;
    pub const HEADER_TYPE: u32 = 0x0e;
    pub const BASE_ADDRESS_0: u32 = 0x10;
    pub const SUBSYSTEM_VENDOR_ID: u32 = 0x2c;
    pub const SUBSYSTEM_ID: u32 = 0x2e;
    pub const ROM_ADDRESS: u32 = 0x30;
    pub const CAPABILITY_LIST: u32 = 0x34;
    pub const ROM_ADDRESS_BRIDGE: u32 = 0x38;
    pub const INTERRUPT_LINE: u32 = 0x3c;
    pub const CB_SUBSYSTEM_VENDOR_ID: u32 = 0x40;
    pub const CB_SUBSYSTEM_ID: u32 = 0x42;
    pub const EXT_CAP_START: u32 = 0x100;
}

pub const STATUS_CAP_LIST: u16 = 0x0010;

pub const HEADER_TYPE_NORMAL: u8 = 0;
pub const HEADER_TYPE_BRIDGE: u8 = 1;
pub const HEADER_TYPE_CARDBUS: u8 = 2;

const BAR_SPACE_IO: u32 = 0x01;
const BAR_MEM_TYPE_MASK: u32 = 0x06;
const BAR_MEM_TYPE_64: u32 = 0x04;

const CAP_ID_EXP: u8 = 0x10;

/// Categories [`fill_from_config`] knows how to decode.
pub fn decodable() -> FillFlags {
    FillFlags::IDENT
        | FillFlags::CLASS
        | FillFlags::CLASS_EXT
        | FillFlags::SUBSYS
        | FillFlags::IRQ
        | FillFlags::BASES
        | FillFlags::ROM_BASE
        | FillFlags::CAPS
        | FillFlags::EXT_CAPS
}

/// Little-endian view over a configuration space snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ConfigSpace<'a> {
    data: &'a [u8],
}

impl<'a> ConfigSpace<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn byte(&self, pos: u32) -> Option<u8> {
        self.data.get(pos as usize).copied()
    }

    pub fn word(&self, pos: u32) -> Option<u16> {
        let p = pos as usize;
        let b = self.data.get(p..p + 2)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn long(&self, pos: u32) -> Option<u32> {
        let p = pos as usize;
        let b = self.data.get(p..p + 4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn header_type(&self) -> Option<u8> {
        self.byte(reg::HEADER_TYPE).map(|h| h & 0x7f)
    }
}

/// Populate `want` on `dev` from `cfg` and return what was filled.
///
/// Caps and ExtCaps are always scanned together.
pub fn fill_from_config(dev: &mut RawDevice, cfg: &ConfigSpace<'_>, want: FillFlags) -> FillFlags {
    let mut done = FillFlags::empty();
    if cfg.len() < CONFIG_HEADER_LEN {
        debug!("{}: only {} bytes of config space, nothing to decode", dev.addr, cfg.len());
        return done;
    }
    let header = cfg.header_type().unwrap_or(HEADER_TYPE_NORMAL);

    if want.contains(FillFlags::IDENT) {
        dev.vendor_id = cfg.word(reg::VENDOR_ID).unwrap_or(0xffff);
        dev.device_id = cfg.word(reg::DEVICE_ID).unwrap_or(0xffff);
        done |= FillFlags::IDENT;
    }
    if want.contains(FillFlags::CLASS) {
        dev.device_class = cfg.word(reg::CLASS_DEVICE).unwrap_or(0);
        done |= FillFlags::CLASS;
    }
    if want.contains(FillFlags::CLASS_EXT) {
        dev.revision = cfg.byte(reg::REVISION_ID).unwrap_or(0);
        dev.prog_if = cfg.byte(reg::PROG_IF).unwrap_or(0);
        done |= FillFlags::CLASS_EXT;
    }
    if want.contains(FillFlags::SUBSYS) {
        let (sv, sd) = match header {
            HEADER_TYPE_NORMAL => (reg::SUBSYSTEM_VENDOR_ID, reg::SUBSYSTEM_ID),
            HEADER_TYPE_CARDBUS => (reg::CB_SUBSYSTEM_VENDOR_ID, reg::CB_SUBSYSTEM_ID),
            _ => (0, 0),
        };
        if sv != 0 {
            dev.subsys_vendor_id = cfg.word(sv).unwrap_or(0xffff);
            dev.subsys_id = cfg.word(sd).unwrap_or(0xffff);
        } else {
            dev.subsys_vendor_id = 0xffff;
            dev.subsys_id = 0xffff;
        }
        done |= FillFlags::SUBSYS;
    }
    if want.contains(FillFlags::IRQ) {
        dev.irq = cfg.byte(reg::INTERRUPT_LINE).unwrap_or(0) as u32;
        done |= FillFlags::IRQ;
    }
    if want.contains(FillFlags::BASES) {
        dev.base_addr = decode_bars(cfg, header);
        done |= FillFlags::BASES;
    }
    if want.contains(FillFlags::ROM_BASE) {
        let rom_reg = match header {
            HEADER_TYPE_NORMAL => Some(reg::ROM_ADDRESS),
            HEADER_TYPE_BRIDGE => Some(reg::ROM_ADDRESS_BRIDGE),
            _ => None,
        };
        dev.rom_base_addr = rom_reg
            .and_then(|r| cfg.long(r))
            .filter(|&v| v != u32::MAX)
            .map(u64::from)
            .unwrap_or(0);
        done |= FillFlags::ROM_BASE;
    }
    if want.intersects(FillFlags::CAPS | FillFlags::EXT_CAPS) {
        let caps = scan_caps(cfg);
        trace!("{}: {} capabilities", dev.addr, caps.len());
        dev.set_caps(&caps);
        done |= FillFlags::CAPS | FillFlags::EXT_CAPS;
    }
    done
}

fn decode_bars(cfg: &ConfigSpace<'_>, header: u8) -> [u64; BAR_COUNT] {
    let mut bars = [0u64; BAR_COUNT];
    let count = match header {
        HEADER_TYPE_NORMAL => 6,
        HEADER_TYPE_BRIDGE => 2,
        HEADER_TYPE_CARDBUS => 1,
        _ => 0,
    };
    let mut i = 0;
    while i < count {
        let x = cfg.long(reg::BASE_ADDRESS_0 + 4 * i as u32).unwrap_or(0);
        if x == 0 || x == u32::MAX {
            i += 1;
            continue;
        }
        if x & BAR_SPACE_IO != 0 || x & BAR_MEM_TYPE_MASK != BAR_MEM_TYPE_64 {
            bars[i] = x as u64;
        } else if i + 1 >= count {
            debug!("64-bit BAR {} has no upper half", i);
        } else {
            let hi = cfg.long(reg::BASE_ADDRESS_0 + 4 * (i + 1) as u32).unwrap_or(0);
            bars[i] = x as u64 | ((hi as u64) << 32);
            i += 1;
        }
        i += 1;
    }
    bars
}

/// Walk both capability lists, returning `(id, type, offset)` in discovery order.
pub fn scan_caps(cfg: &ConfigSpace<'_>) -> Vec<(u16, u8, u32)> {
    let mut caps = Vec::new();
    let status = cfg.word(reg::STATUS).unwrap_or(0);
    if status & STATUS_CAP_LIST == 0 {
        return caps;
    }

    let mut seen = [false; CONFIG_LEGACY_LEN];
    let mut has_express = false;
    let mut pos = cfg.byte(reg::CAPABILITY_LIST).unwrap_or(0) as u32;
    while pos != 0 {
        pos &= !3;
        let (Some(id), Some(next)) = (cfg.byte(pos), cfg.byte(pos + 1)) else {
            debug!("capability at {:#x} is outside readable config space", pos);
            break;
        };
        if (pos as usize) < CONFIG_HEADER_LEN || seen[pos as usize] || id == 0xff {
            break;
        }
        seen[pos as usize] = true;
        has_express |= id == CAP_ID_EXP;
        caps.push((id as u16, CAP_TYPE_NORMAL, pos));
        pos = next as u32;
    }

    if !has_express || cfg.len() < CONFIG_EXTENDED_LEN {
        return caps;
    }
    let mut seen = vec![false; CONFIG_EXTENDED_LEN];
    let mut pos = reg::EXT_CAP_START;
    loop {
        let Some(header) = cfg.long(pos) else { break };
        if header == 0 || header == u32::MAX || seen[pos as usize] {
            break;
        }
        seen[pos as usize] = true;
        caps.push(((header & 0xffff) as u16, CAP_TYPE_EXTENDED, pos));
        pos = (header >> 20) & !3;
        if pos < reg::EXT_CAP_START {
            break;
        }
    }
    caps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::PciAddress;

    fn put16(cfg: &mut [u8], pos: usize, v: u16) {
        cfg[pos..pos + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn put32(cfg: &mut [u8], pos: usize, v: u32) {
        cfg[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn express_endpoint() -> Vec<u8> {
        let mut cfg = vec![0u8; CONFIG_EXTENDED_LEN];
        put16(&mut cfg, 0x00, 0x8086);
        put16(&mut cfg, 0x02, 0x1533);
        put16(&mut cfg, 0x06, STATUS_CAP_LIST);
        cfg[0x08] = 0x03;
        cfg[0x09] = 0x00;
        put16(&mut cfg, 0x0a, 0x0200);
        put32(&mut cfg, 0x10, 0xf7a0_0000);
        put32(&mut cfg, 0x14, 0x0000_e001);
        put32(&mut cfg, 0x18, 0xf7b0_000c);
        put32(&mut cfg, 0x1c, 0x0000_0001);
        put16(&mut cfg, 0x2c, 0x15d9);
        put16(&mut cfg, 0x2e, 0x1533);
        cfg[0x34] = 0x40;
        cfg[0x3c] = 0x11;
        // PM -> MSI -> EXP
        cfg[0x40] = 0x01;
        cfg[0x41] = 0x50;
        cfg[0x50] = 0x05;
        cfg[0x51] = 0x70;
        cfg[0x70] = 0x10;
        cfg[0x71] = 0x00;
        // AER -> DSN
        put32(&mut cfg, 0x100, 0x1401_0001);
        put32(&mut cfg, 0x140, 0x0001_0003);
        cfg
    }

    #[test]
    fn test_fill_header_fields() {
        let data = express_endpoint();
        let cfg = ConfigSpace::new(&data);
        let mut dev = RawDevice::new(PciAddress::default());
        let done = fill_from_config(&mut dev, &cfg, FillFlags::IDENT | FillFlags::CLASS | FillFlags::IRQ);
        assert_eq!(done, FillFlags::IDENT | FillFlags::CLASS | FillFlags::IRQ);
        assert_eq!(dev.vendor_id, 0x8086);
        assert_eq!(dev.device_id, 0x1533);
        assert_eq!(dev.device_class, 0x0200);
        assert_eq!(dev.irq, 0x11);

        let done = fill_from_config(&mut dev, &cfg, FillFlags::CLASS_EXT | FillFlags::SUBSYS);
        assert_eq!(done, FillFlags::CLASS_EXT | FillFlags::SUBSYS);
        assert_eq!(dev.revision, 0x03);
        assert_eq!((dev.subsys_vendor_id, dev.subsys_id), (0x15d9, 0x1533));
    }

    #[test]
    fn test_bars_pair_64bit() {
        let data = express_endpoint();
        let mut dev = RawDevice::new(PciAddress::default());
        fill_from_config(&mut dev, &ConfigSpace::new(&data), FillFlags::BASES);
        assert_eq!(dev.base_addr[0], 0xf7a0_0000);
        assert_eq!(dev.base_addr[1], 0xe001);
        assert_eq!(dev.base_addr[2], 0x1_f7b0_000c);
        assert_eq!(dev.base_addr[3], 0);
    }

    #[test]
    fn test_scan_both_chains() {
        let data = express_endpoint();
        let caps = scan_caps(&ConfigSpace::new(&data));
        assert_eq!(
            caps,
            vec![
                (0x01, CAP_TYPE_NORMAL, 0x40),
                (0x05, CAP_TYPE_NORMAL, 0x50),
                (0x10, CAP_TYPE_NORMAL, 0x70),
                (0x0001, CAP_TYPE_EXTENDED, 0x100),
                (0x0003, CAP_TYPE_EXTENDED, 0x140),
            ]
        );
    }

    #[test]
    fn test_scan_stops_on_loop() {
        let mut data = express_endpoint();
        data[0x71] = 0x40; // EXP points back to PM
        let caps = scan_caps(&ConfigSpace::new(&data[..CONFIG_LEGACY_LEN]));
        assert_eq!(caps.len(), 3);
    }

    #[test]
    fn test_no_cap_list_bit() {
        let mut data = express_endpoint();
        put16(&mut data, 0x06, 0);
        assert!(scan_caps(&ConfigSpace::new(&data)).is_empty());
    }

    #[test]
    fn test_short_snapshot_fills_nothing() {
        let data = express_endpoint();
        let mut dev = RawDevice::new(PciAddress::default());
        let done = fill_from_config(&mut dev, &ConfigSpace::new(&data[..32]), FillFlags::IDENT);
        assert!(done.is_empty());
    }

    #[test]
    fn test_unprivileged_snapshot_has_empty_chain() {
        let data = express_endpoint();
        let mut dev = RawDevice::new(PciAddress::default());
        let done = fill_from_config(&mut dev, &ConfigSpace::new(&data[..CONFIG_HEADER_LEN]), FillFlags::CAPS);
        assert_eq!(done, FillFlags::CAPS | FillFlags::EXT_CAPS);
        assert!(dev.first_cap.is_none());
    }
}
