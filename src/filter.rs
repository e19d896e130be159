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

//! Device filters bound to a session

use std::fmt;

use crate::access::filter::FILTER_ANY;
use crate::access::RawFilter;
use crate::device::Device;
use crate::error::{PciError, Result};
use crate::session::Session;

pub struct Filter<'s> {
    session: &'s Session,
    raw: RawFilter,
}

fn get(v: i32) -> Option<u32> {
    (v >= 0).then_some(v as u32)
}

fn checked(field: &'static str, val: Option<i64>) -> Result<i32> {
    match val {
        None | Some(-1) => Ok(FILTER_ANY),
        Some(v) if (0..=i32::MAX as i64).contains(&v) => Ok(v as i32),
        Some(value) => Err(PciError::InvalidFilterValue { field, value }),
    }
}

fn hex_or_star(v: Option<u32>, width: usize) -> String {
    v.map_or_else(|| "*".to_string(), |v| format!("{:0width$x}", v, width = width))
}

macro_rules! filter_field {
    ($get:ident, $set:ident) => {
        pub fn $get(&self) -> Option<u32> {
            get(self.raw.$get)
        }

        /// `None` or `-1` clears the field; other negative values are rejected.
        pub fn $set(&mut self, val: Option<i64>) -> Result<()> {
            self.raw.$get = checked(stringify!($get), val)?;
            Ok(())
        }
    };
}

impl<'s> Filter<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self {
            session,
            raw: RawFilter::new(),
        }
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }

    filter_field!(domain, set_domain);
    filter_field!(bus, set_bus);
    filter_field!(slot, set_slot);
    filter_field!(func, set_func);
    filter_field!(vendor, set_vendor);
    filter_field!(device, set_device);

    /// `DDDD:BB:SS.F` with `*` for each unset component.
    pub fn slot_filter(&self) -> String {
        format!(
            "{}:{}:{}.{}",
            hex_or_star(self.domain(), 4),
            hex_or_star(self.bus(), 2),
            hex_or_star(self.slot(), 2),
            hex_or_star(self.func(), 1),
        )
    }

    pub fn set_slot_filter(&mut self, text: &str) -> Result<()> {
        self.raw.parse_slot(text)
    }

    /// `0xVVVV:0xDDDD` with `*` for each unset component.
    pub fn id_filter(&self) -> String {
        let id = |v: Option<u32>| v.map_or_else(|| "*".to_string(), |v| format!("0x{:04x}", v));
        format!("{}:{}", id(self.vendor()), id(self.device()))
    }

    pub fn set_id_filter(&mut self, text: &str) -> Result<()> {
        self.raw.parse_id(text)
    }

    /// Native record, including the class fields only the id grammar sets.
    pub fn raw(&self) -> &RawFilter {
        &self.raw
    }

    /// Test `dev`, filling the categories the filter compares first.
    pub fn matches(&self, dev: &mut Device<'_>) -> Result<bool> {
        let raw = dev.raw_filled(self.raw.required_fill())?;
        Ok(self.raw.matches(raw))
    }
}

impl fmt::Display for Filter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot={}, id={}", self.slot_filter(), self.id_filter())
    }
}

impl fmt::Debug for Filter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter").field("raw", &self.raw).finish()
    }
}
