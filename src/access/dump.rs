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

//! Backend replaying hex dumps in the `lspci -x` format
//!
//! ```text
//! 0000:02:00.0 Ethernet controller: Intel Corporation I210
//! 00: 86 80 33 15 07 04 10 00 03 00 00 02 10 00 00 00
//! 10: 00 00 a0 f7 00 00 00 00 01 e0 00 00 00 00 00 00
//! ```
//!
//! A device header line starts a new image, offset lines add bytes to it and
//! everything else is ignored. Writes modify the in-memory image only.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::generic::{self, ConfigSpace, CONFIG_EXTENDED_LEN};
use super::names::IdResolver;
use super::{AccessMethod, Param, PciAccess, PciAddress, RawDevice};
use crate::error::{PciError, Result};
use crate::flags::{FillFlags, LookupMode};

const PARAM_NAME: &str = "dump.name";

#[derive(Debug, Clone)]
struct DumpImage {
    addr: PciAddress,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct DumpAccess {
    file: Option<PathBuf>,
    images: Vec<DumpImage>,
    devices: Vec<RawDevice>,
    names: IdResolver,
}

/// Parse an offset line such as `40: 01 50 03 c8`.
fn data_line(line: &str) -> Option<(usize, Vec<u8>)> {
    let (offset, bytes) = line.split_once(':')?;
    if offset.is_empty() || offset.len() > 3 || !offset.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let offset = usize::from_str_radix(offset, 16).ok()?;
    let bytes = bytes
        .split_whitespace()
        .map(|b| u8::from_str_radix(b, 16))
        .collect::<std::result::Result<Vec<u8>, _>>()
        .ok()?;
    Some((offset, bytes))
}

/// Split dump text into per-device config images.
fn parse_dump(text: &str, path: &Path) -> Result<Vec<DumpImage>> {
    let mut images: Vec<DumpImage> = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let lineno = idx + 1;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with(char::is_whitespace) {
            continue;
        }
        let first = line.split_whitespace().next().unwrap_or("");
        if let Ok(addr) = first.parse::<PciAddress>() {
            images.push(DumpImage { addr, data: Vec::new() });
            continue;
        }
        let Some((offset, bytes)) = data_line(line) else {
            continue;
        };
        let image = images
            .last_mut()
            .ok_or_else(|| PciError::parse(path, lineno, "config data before any device header"))?;
        let end = offset + bytes.len();
        if end > CONFIG_EXTENDED_LEN {
            return Err(PciError::parse(path, lineno, format!("offset {:#x} beyond config space", end)));
        }
        if image.data.len() < end {
            image.data.resize(end, 0);
        }
        image.data[offset..end].copy_from_slice(&bytes);
    }

    Ok(images)
}

impl DumpAccess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend preloaded from dump text instead of a file.
    pub fn from_text(text: &str) -> Result<Self> {
        Ok(Self {
            images: parse_dump(text, Path::new("<memory>"))?,
            ..Self::default()
        })
    }

    fn image(&self, addr: PciAddress) -> Option<&DumpImage> {
        self.images.iter().find(|i| i.addr == addr)
    }

    fn image_mut(&mut self, addr: PciAddress) -> Option<&mut DumpImage> {
        self.images.iter_mut().find(|i| i.addr == addr)
    }
}

impl PciAccess for DumpAccess {
    fn method(&self) -> AccessMethod {
        AccessMethod::Dump
    }

    fn init(&mut self) -> Result<()> {
        match &self.file {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|source| PciError::FileRead {
                    path: path.clone(),
                    source,
                })?;
                self.images = parse_dump(&text, path)?;
                debug!("loaded {} device images from {}", self.images.len(), path.display());
                Ok(())
            }
            None if !self.images.is_empty() => Ok(()),
            None => Err(PciError::Init {
                method: self.method().name(),
                reason: format!("no dump file given, set {}", PARAM_NAME),
            }),
        }
    }

    fn cleanup(&mut self) {
        self.devices.clear();
    }

    fn supported_fill(&self) -> FillFlags {
        generic::decodable()
    }

    fn scan_bus(&mut self) -> Result<()> {
        self.devices = self
            .images
            .iter()
            .map(|img| {
                let mut dev = RawDevice::new(img.addr);
                dev.prefilled = generic::fill_from_config(
                    &mut dev,
                    &ConfigSpace::new(&img.data),
                    FillFlags::IDENT | FillFlags::CLASS,
                );
                dev
            })
            .collect();
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
        let image = self
            .image(dev.addr)
            .ok_or_else(|| PciError::read(dev.addr, 0, 0, "device not present in dump"))?;
        let data = image.data.clone();
        Ok(generic::fill_from_config(dev, &ConfigSpace::new(&data), want))
    }

    fn read_config(&mut self, dev: &RawDevice, pos: u32, buf: &mut [u8]) -> Result<()> {
        let image = self
            .image(dev.addr)
            .ok_or_else(|| PciError::read(dev.addr, pos, buf.len(), "device not present in dump"))?;
        let start = pos as usize;
        let src = image
            .data
            .get(start..start + buf.len())
            .ok_or_else(|| PciError::read(dev.addr, pos, buf.len(), "beyond the dumped config space"))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_config(&mut self, dev: &RawDevice, pos: u32, data: &[u8]) -> Result<()> {
        let image = self
            .image_mut(dev.addr)
            .ok_or_else(|| PciError::write(dev.addr, pos, data.len(), "device not present in dump"))?;
        let start = pos as usize;
        let dst = image
            .data
            .get_mut(start..start + data.len())
            .ok_or_else(|| PciError::write(dev.addr, pos, data.len(), "beyond the dumped config space"))?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn read_vpd(&mut self, dev: &RawDevice, pos: u32, buf: &mut [u8]) -> Result<()> {
        Err(PciError::read(dev.addr, pos, buf.len(), "VPD is not recorded in dumps"))
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
                PARAM_NAME,
                self.file
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                "Name of the bus dump file to read from",
            )),
            _ => None,
        }
    }

    fn get_param(&self, name: &str) -> Option<String> {
        (name == PARAM_NAME).then(|| {
            self.file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }

    fn set_param(&mut self, name: &str, value: &str) -> Result<()> {
        if name != PARAM_NAME {
            return Err(PciError::KeyNotFound(name.to_string()));
        }
        self.file = (!value.is_empty()).then(|| PathBuf::from(value));
        Ok(())
    }
}
