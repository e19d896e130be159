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

//! Native filter record and the slot / id filter grammars
//!
//! Slot filter: `[[[domain]:]bus]:][slot][.func]`
//! Id filter:   `[vendor]:[device][:class[:progif]]`
//!
//! Every component is hexadecimal and may be empty or `*` to leave it unset.

use std::ffi::CString;

use super::RawDevice;
use crate::error::{PciError, Result};
use crate::flags::FillFlags;

/// Value stored in a field that matches anything
pub const FILTER_ANY: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFilter {
    pub domain: i32,
    pub bus: i32,
    pub slot: i32,
    pub func: i32,
    pub vendor: i32,
    pub device: i32,
    pub device_class: i32,
    pub prog_if: i32,
}

impl Default for RawFilter {
    fn default() -> Self {
        Self {
            domain: FILTER_ANY,
            bus: FILTER_ANY,
            slot: FILTER_ANY,
            func: FILTER_ANY,
            vendor: FILTER_ANY,
            device: FILTER_ANY,
            device_class: FILTER_ANY,
            prog_if: FILTER_ANY,
        }
    }
}

type ParseResult<T> = std::result::Result<T, &'static str>;

/// Parse one hex component; `None` for an empty or `*` component.
fn component(s: &str, max: i64, err: &'static str) -> ParseResult<Option<i32>> {
    if s.is_empty() || s == "*" {
        return Ok(None);
    }
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let v = i64::from_str_radix(digits, 16).map_err(|_| err)?;
    if !(0..=max).contains(&v) {
        return Err(err);
    }
    Ok(Some(v as i32))
}

/// The grammar stops at the first NUL, so input carrying one is rejected
/// instead of being silently truncated.
fn terminated(input: &str) -> ParseResult<String> {
    let c = CString::new(input).map_err(|_| "Embedded NUL character")?;
    Ok(c.to_string_lossy().into_owned())
}

impl RawFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a slot filter. On error the record is left untouched.
    pub fn parse_slot(&mut self, input: &str) -> Result<()> {
        let parsed = Self::slot_fields(input).map_err(|reason| PciError::FilterSyntax {
            input: input.to_string(),
            reason,
        })?;
        let (domain, bus, slot, func) = parsed;
        let set = |field: &mut i32, v: Option<i32>| {
            if let Some(v) = v {
                *field = v;
            }
        };
        set(&mut self.domain, domain);
        set(&mut self.bus, bus);
        set(&mut self.slot, slot);
        set(&mut self.func, func);
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn slot_fields(input: &str) -> ParseResult<(Option<i32>, Option<i32>, Option<i32>, Option<i32>)> {
        let text = terminated(input)?;
        let mut domain = None;
        let mut bus = None;

        let mid = match text.split_once(':') {
            Some((first, rest)) => match rest.split_once(':') {
                Some((second, rest)) => {
                    domain = component(first, 0x7fff_ffff, "Invalid domain number")?;
                    bus = component(second, 0xff, "Invalid bus number")?;
                    rest
                }
                None => {
                    bus = component(first, 0xff, "Invalid bus number")?;
                    rest
                }
            },
            None => text.as_str(),
        };

        let (slot_part, func) = match mid.split_once('.') {
            Some((s, f)) => (s, component(f, 7, "Invalid function number")?),
            None => (mid, None),
        };
        let slot = component(slot_part, 0x1f, "Invalid slot number")?;
        Ok((domain, bus, slot, func))
    }

    /// Apply an id filter. On error the record is left untouched.
    pub fn parse_id(&mut self, input: &str) -> Result<()> {
        let (vendor, device, class, prog_if) = Self::id_fields(input).map_err(|reason| PciError::FilterSyntax {
            input: input.to_string(),
            reason,
        })?;
        if let Some(v) = vendor {
            self.vendor = v;
        }
        if let Some(d) = device {
            self.device = d;
        }
        if let Some(c) = class {
            self.device_class = c;
        }
        if let Some(p) = prog_if {
            self.prog_if = p;
        }
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn id_fields(input: &str) -> ParseResult<(Option<i32>, Option<i32>, Option<i32>, Option<i32>)> {
        let text = terminated(input)?;
        let mut parts = text.splitn(4, ':');
        let vendor = parts.next().unwrap_or("");
        let device = parts.next().ok_or("At least one ':' must be specified")?;
        let class = parts.next().unwrap_or("");
        let prog_if = parts.next().unwrap_or("");
        Ok((
            component(vendor, 0xffff, "Invalid vendor ID")?,
            component(device, 0xffff, "Invalid device ID")?,
            component(class, 0xffff, "Invalid class code")?,
            component(prog_if, 0xff, "Invalid programming interface code")?,
        ))
    }

    /// Categories [`RawFilter::matches`] needs filled on the device.
    pub fn required_fill(&self) -> FillFlags {
        let mut flags = FillFlags::empty();
        if self.vendor >= 0 || self.device >= 0 {
            flags |= FillFlags::IDENT;
        }
        if self.device_class >= 0 {
            flags |= FillFlags::CLASS;
        }
        if self.prog_if >= 0 {
            flags |= FillFlags::CLASS_EXT;
        }
        flags
    }

    /// Field-by-field comparison; unset fields match anything.
    pub fn matches(&self, dev: &RawDevice) -> bool {
        let hit = |want: i32, have: u32| want < 0 || want as u32 == have;
        let a = dev.addr;
        hit(self.domain, a.domain)
            && hit(self.bus, a.bus as u32)
            && hit(self.slot, a.dev as u32)
            && hit(self.func, a.func as u32)
            && hit(self.vendor, dev.vendor_id as u32)
            && hit(self.device, dev.device_id as u32)
            && hit(self.device_class, dev.device_class as u32)
            && hit(self.prog_if, dev.prog_if as u32)
    }
}
