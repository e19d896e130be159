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

//! The `pci.ids` database
//!
//! File layout (tab indentation is significant):
//!
//! ```text
//! vvvv  Vendor name
//! <TAB>dddd  Device name
//! <TAB><TAB>ssss tttt  Subsystem name
//! C cc  Class name
//! <TAB>ss  Subclass name
//! <TAB><TAB>pp  Programming interface name
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{PciError, Result};
use crate::flags::LookupMode;

/// Locations searched when no id file is configured
pub const DEFAULT_ID_FILES: &[&str] = &[
    "/usr/share/hwdata/pci.ids",
    "/usr/share/misc/pci.ids",
    "/usr/share/pci.ids",
];

#[derive(Debug, Default, Clone)]
pub struct IdDatabase {
    vendors: HashMap<u16, String>,
    devices: HashMap<(u16, u16), String>,
    subsystems: HashMap<(u16, u16, u16, u16), String>,
    generic_subsystems: HashMap<(u16, u16), String>,
    classes: HashMap<u8, String>,
    subclasses: HashMap<(u8, u8), String>,
    prog_ifs: HashMap<(u8, u8, u8), String>,
}

enum Parent {
    None,
    Vendor(u16),
    Device(u16, u16),
    Class(u8),
    Subclass(u8, u8),
}

fn split_entry(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_end();
    let (id, name) = line.split_once(char::is_whitespace)?;
    Some((id, name.trim_start()))
}

impl IdDatabase {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| PciError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let mut db = Self::default();
        let mut parent = Parent::None;

        for (idx, raw) in text.lines().enumerate() {
            let lineno = idx + 1;
            if raw.trim().is_empty() || raw.starts_with('#') {
                continue;
            }
            let depth = raw.chars().take_while(|&c| c == '\t').count();
            let line = &raw[depth..];
            let bad = |what: &str| PciError::parse(path, lineno, format!("invalid {}: '{}'", what, raw.trim()));
            let hex16 = |s: &str, what: &str| u16::from_str_radix(s, 16).map_err(|_| bad(what));
            let hex8 = |s: &str, what: &str| u8::from_str_radix(s, 16).map_err(|_| bad(what));

            match (depth, &parent) {
                (0, _) => {
                    if let Some(rest) = line.strip_prefix("C ") {
                        let (id, name) = split_entry(rest).ok_or_else(|| bad("class entry"))?;
                        let class = hex8(id, "class id")?;
                        db.classes.insert(class, name.to_string());
                        parent = Parent::Class(class);
                    } else {
                        let (id, name) = split_entry(line).ok_or_else(|| bad("vendor entry"))?;
                        let vendor = hex16(id, "vendor id")?;
                        db.vendors.insert(vendor, name.to_string());
                        parent = Parent::Vendor(vendor);
                    }
                }
                (1, Parent::Vendor(v) | Parent::Device(v, _)) => {
                    let v = *v;
                    let (id, name) = split_entry(line).ok_or_else(|| bad("device entry"))?;
                    let dev = hex16(id, "device id")?;
                    db.devices.insert((v, dev), name.to_string());
                    parent = Parent::Device(v, dev);
                }
                (1, Parent::Class(c) | Parent::Subclass(c, _)) => {
                    let c = *c;
                    let (id, name) = split_entry(line).ok_or_else(|| bad("subclass entry"))?;
                    let sub = hex8(id, "subclass id")?;
                    db.subclasses.insert((c, sub), name.to_string());
                    parent = Parent::Subclass(c, sub);
                }
                (2, Parent::Device(v, d)) => {
                    let (ids, name) = split_entry(line).ok_or_else(|| bad("subsystem entry"))?;
                    // the subsystem device id leads the remaining text
                    let (sd, name) = split_entry(name).ok_or_else(|| bad("subsystem entry"))?;
                    let sv = hex16(ids, "subsystem vendor")?;
                    let sd = hex16(sd, "subsystem device")?;
                    db.subsystems.insert((*v, *d, sv, sd), name.to_string());
                    db.generic_subsystems.entry((sv, sd)).or_insert_with(|| name.to_string());
                }
                (2, Parent::Subclass(c, s)) => {
                    let (id, name) = split_entry(line).ok_or_else(|| bad("prog-if entry"))?;
                    let p = hex8(id, "prog-if")?;
                    db.prog_ifs.insert((*c, *s, p), name.to_string());
                }
                _ => return Err(bad("entry nesting")),
            }
        }
        debug!(
            "loaded {} vendors, {} devices, {} classes from {}",
            db.vendors.len(),
            db.devices.len(),
            db.classes.len(),
            path.display()
        );
        Ok(db)
    }

    pub fn vendor(&self, vendor: u16) -> Option<&str> {
        self.vendors.get(&vendor).map(String::as_str)
    }

    pub fn device(&self, vendor: u16, device: u16) -> Option<&str> {
        self.devices.get(&(vendor, device)).map(String::as_str)
    }

    fn subsystem(&self, ids: [i32; 4]) -> Option<&str> {
        let [v, d, sv, sd] = ids;
        if v >= 0 && d >= 0 {
            let key = (v as u16, d as u16, sv as u16, sd as u16);
            if let Some(name) = self.subsystems.get(&key) {
                return Some(name.as_str());
            }
            if v == sv && d == sd {
                return self.device(v as u16, d as u16);
            }
        }
        self.generic_subsystems.get(&(sv as u16, sd as u16)).map(String::as_str)
    }

    /// Resolve `ids` according to the lookup kind in `mode`.
    pub fn lookup(&self, mode: LookupMode, ids: &[i32]) -> Option<String> {
        use LookupMode as M;

        let kind = mode.kind();
        let at = |i: usize| ids.get(i).copied();

        if kind == M::VENDOR {
            let v = at(0)?;
            format_name(mode, self.vendor(v as u16), hex4(v), "Vendor")
        } else if kind == M::DEVICE {
            let (v, d) = (at(0)?, at(1)?);
            format_name(mode, self.device(v as u16, d as u16), hex4(d), "Device")
        } else if kind == M::VENDOR | M::DEVICE {
            let (v, d) = (at(0)?, at(1)?);
            format_pair(mode, self.vendor(v as u16), self.device(v as u16, d as u16), v, d)
        } else if kind.contains(M::SUBSYSTEM) && ids.len() == 1 {
            // single id: subsystem vendor
            let sv = at(0)?;
            format_name(mode, self.vendor(sv as u16), hex4(sv), "Vendor")
        } else if kind == M::SUBSYSTEM | M::DEVICE {
            let q = [at(0)?, at(1)?, at(2)?, at(3)?];
            format_name(mode, self.subsystem(q), hex4(q[3]), "Device")
        } else if kind == M::SUBSYSTEM | M::VENDOR | M::DEVICE {
            let q = [at(0)?, at(1)?, at(2)?, at(3)?];
            format_pair(mode, self.vendor(q[2] as u16), self.subsystem(q), q[2], q[3])
        } else if kind == M::CLASS {
            let c = at(0)?;
            let (base, sub) = ((c >> 8) as u8, c as u8);
            match self.subclasses.get(&(base, sub)) {
                Some(name) => format_name(mode, Some(name.as_str()), hex4(c), "Class"),
                None => match self.classes.get(&base) {
                    Some(name) if !mode.intersects(M::NUMERIC) => Some(format!("{} [{}]", name, hex4(c))),
                    _ => format_name(mode, None, hex4(c), "Class"),
                },
            }
        } else if kind == M::CLASS | M::PROGIF {
            let (c, p) = (at(0)?, at(1)?);
            let key = ((c >> 8) as u8, c as u8, p as u8);
            let name = self.prog_ifs.get(&key).map(String::as_str);
            format_name(mode, name, format!("{:02x}", p as u8), "ProgIf")
        } else {
            None
        }
    }
}

fn hex4(v: i32) -> String {
    format!("{:04x}", v as u32 & 0xffff)
}

fn format_name(mode: LookupMode, name: Option<&str>, num: String, unknown: &str) -> Option<String> {
    if mode.contains(LookupMode::NO_NUMBERS) && name.is_none() {
        return None;
    }
    if mode.contains(LookupMode::NUMERIC) {
        return Some(num);
    }
    let mixed = mode.contains(LookupMode::MIXED);
    Some(match (name, mixed) {
        (None, true) => format!("{} [{}]", unknown, num),
        (None, false) => format!("{} {}", unknown, num),
        (Some(n), true) => format!("{} [{}]", n, num),
        (Some(n), false) => n.to_string(),
    })
}

fn format_pair(mode: LookupMode, v: Option<&str>, d: Option<&str>, vid: i32, did: i32) -> Option<String> {
    if mode.contains(LookupMode::NO_NUMBERS) && (v.is_none() || d.is_none()) {
        return None;
    }
    let num = format!("{}:{}", hex4(vid), hex4(did));
    if mode.contains(LookupMode::NUMERIC) {
        return Some(num);
    }
    let mixed = mode.contains(LookupMode::MIXED);
    Some(match (v, d, mixed) {
        (Some(v), Some(d), false) => format!("{} {}", v, d),
        (Some(v), Some(d), true) => format!("{} {} [{}]", v, d, num),
        (None, _, false) => format!("Device {}", num),
        (None, _, true) => format!("Device [{}]", num),
        (Some(v), None, false) => format!("{} Device {}", v, hex4(did)),
        (Some(v), None, true) => format!("{} Device [{}]", v, num),
    })
}

/// Lazily loaded id database with a configurable location.
#[derive(Debug, Default)]
pub struct IdResolver {
    path: Option<PathBuf>,
    db: Option<IdDatabase>,
}

impl IdResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configured id file, if any.
    pub fn id_file(&self) -> Option<PathBuf> {
        self.path.clone()
    }

    pub fn set_id_file(&mut self, path: Option<PathBuf>) {
        self.path = path;
        self.db = None;
    }

    fn resolve_path(&self) -> Option<PathBuf> {
        if let Some(p) = &self.path {
            return Some(p.clone());
        }
        DEFAULT_ID_FILES.iter().map(PathBuf::from).find(|p| p.exists())
    }

    fn database(&mut self) -> &IdDatabase {
        if self.db.is_none() {
            let db = match self.resolve_path() {
                Some(path) => IdDatabase::load(&path).unwrap_or_else(|e| {
                    warn!("Cannot load PCI id database: {}", e);
                    IdDatabase::default()
                }),
                None => {
                    warn!("No PCI id database found, names will be numeric");
                    IdDatabase::default()
                }
            };
            self.db = Some(db);
        }
        self.db.get_or_insert_with(IdDatabase::default)
    }

    pub fn lookup(&mut self, mode: LookupMode, ids: &[i32]) -> Option<String> {
        if mode.contains(LookupMode::NUMERIC) {
            return IdDatabase::default().lookup(mode, ids);
        }
        self.database().lookup(mode, ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    use crate::test_utils::SAMPLE_IDS;

    fn db() -> IdDatabase {
        IdDatabase::parse(SAMPLE_IDS, Path::new("pci.ids")).unwrap()
    }

    #[test]
    fn test_vendor_and_device() {
        let db = db();
        let m = LookupMode::empty();
        assert_eq!(db.lookup(m.with_kind(LookupMode::VENDOR), &[0x8086]).as_deref(), Some("Intel Corporation"));
        assert_eq!(
            db.lookup(m.with_kind(LookupMode::DEVICE), &[0x8086, 0x1533]).as_deref(),
            Some("I210 Gigabit Network Connection")
        );
        assert_eq!(
            db.lookup(m.with_kind(LookupMode::VENDOR | LookupMode::DEVICE), &[0x8086, 0x1533]).as_deref(),
            Some("Intel Corporation I210 Gigabit Network Connection")
        );
    }

    #[test]
    fn test_unknown_names_and_modes() {
        let db = db();
        let vendor = LookupMode::VENDOR;
        assert_eq!(db.lookup(vendor, &[0x1234]).as_deref(), Some("Vendor 1234"));
        assert_eq!(db.lookup(vendor | LookupMode::MIXED, &[0x1234]).as_deref(), Some("Vendor [1234]"));
        assert_eq!(db.lookup(vendor | LookupMode::NO_NUMBERS, &[0x1234]), None);
        assert_eq!(db.lookup(vendor | LookupMode::NUMERIC, &[0x8086]).as_deref(), Some("8086"));
        assert_eq!(
            db.lookup(vendor | LookupMode::MIXED, &[0x8086]).as_deref(),
            Some("Intel Corporation [8086]")
        );
        assert_eq!(
            db.lookup(LookupMode::VENDOR | LookupMode::DEVICE, &[0x10de, 0x2204]).as_deref(),
            Some("NVIDIA Corporation Device 2204")
        );
    }

    #[test]
    fn test_subsystems() {
        let db = db();
        let sd = LookupMode::SUBSYSTEM | LookupMode::DEVICE;
        assert_eq!(
            db.lookup(sd, &[0x8086, 0x1533, 0x15d9, 0x1533]).as_deref(),
            Some("X10SLM motherboard")
        );
        assert_eq!(db.lookup(sd, &[0x8086]).as_deref(), Some("Intel Corporation"));
        let svd = sd | LookupMode::VENDOR;
        assert_eq!(
            db.lookup(svd, &[-1, -1, 0x8086, 0x0001]).as_deref(),
            Some("Intel Corporation Ethernet Server Adapter I210-T1")
        );
    }

    #[test]
    fn test_classes() {
        let db = db();
        assert_eq!(db.lookup(LookupMode::CLASS, &[0x0200]).as_deref(), Some("Ethernet controller"));
        assert_eq!(db.lookup(LookupMode::CLASS, &[0x0280]).as_deref(), Some("Network controller [0280]"));
        assert_eq!(db.lookup(LookupMode::CLASS, &[0x1180]).as_deref(), Some("Class 1180"));
        assert_eq!(
            db.lookup(LookupMode::CLASS | LookupMode::PROGIF, &[0x0c03, 0x30]).as_deref(),
            Some("XHCI")
        );
    }

    #[test]
    fn test_parse_errors_carry_line() {
        let err = IdDatabase::parse("zzzz  Broken\n", Path::new("x.ids")).unwrap_err();
        assert!(matches!(err, PciError::Parse { line: 1, .. }));
        let err = IdDatabase::parse("\t1234  Orphan\n", Path::new("x.ids")).unwrap_err();
        assert!(matches!(err, PciError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_resolver_reloads_after_path_change() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_IDS.as_bytes()).unwrap();

        let mut resolver = IdResolver::new();
        resolver.set_id_file(Some(PathBuf::from("/nonexistent/pci.ids")));
        assert_eq!(resolver.lookup(LookupMode::VENDOR, &[0x8086]).as_deref(), Some("Vendor 8086"));

        resolver.set_id_file(Some(file.path().to_path_buf()));
        assert_eq!(resolver.lookup(LookupMode::VENDOR, &[0x8086]).as_deref(), Some("Intel Corporation"));
        assert_eq!(resolver.id_file().as_deref(), Some(file.path()));
    }
}
