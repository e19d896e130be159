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

//! Id to name queries
//!
//! A [`NameLookup`] binds up to six ids. Each derived lookup checks that the
//! ids it needs are bound before asking the backend, replaces the lookup-kind
//! bits of the stored mode and passes its ids in a fixed order.

use crate::error::{PciError, Result};
use crate::flags::LookupMode;
use crate::session::Session;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupIds {
    pub vendor_id: Option<i32>,
    pub device_id: Option<i32>,
    pub subvendor_id: Option<i32>,
    pub subdev_id: Option<i32>,
    pub class_id: Option<i32>,
    pub progif: Option<i32>,
}

impl LookupIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vendor(mut self, id: impl Into<i32>) -> Self {
        self.vendor_id = Some(id.into());
        self
    }

    pub fn device(mut self, id: impl Into<i32>) -> Self {
        self.device_id = Some(id.into());
        self
    }

    pub fn subvendor(mut self, id: impl Into<i32>) -> Self {
        self.subvendor_id = Some(id.into());
        self
    }

    pub fn subdev(mut self, id: impl Into<i32>) -> Self {
        self.subdev_id = Some(id.into());
        self
    }

    pub fn class(mut self, id: impl Into<i32>) -> Self {
        self.class_id = Some(id.into());
        self
    }

    pub fn progif(mut self, id: impl Into<i32>) -> Self {
        self.progif = Some(id.into());
        self
    }
}

fn require(id: Option<i32>, name: &'static str) -> Result<i32> {
    id.ok_or(PciError::MissingIdentifier { name })
}

pub struct NameLookup<'s> {
    session: &'s Session,
    ids: LookupIds,
    mode: LookupMode,
}

impl<'s> NameLookup<'s> {
    pub fn new(session: &'s Session, ids: LookupIds, mode: LookupMode) -> Self {
        Self { session, ids, mode }
    }

    /// Same query with different formatting modifiers.
    pub fn with_mode(self, mode: LookupMode) -> Self {
        Self { mode, ..self }
    }

    pub fn ids(&self) -> LookupIds {
        self.ids
    }

    pub fn mode(&self) -> LookupMode {
        self.mode
    }

    fn resolve(&self, kind: LookupMode, ids: &[i32]) -> Result<Option<String>> {
        self.session.lookup_name(self.mode.with_kind(kind), ids)
    }

    pub fn vendor(&self) -> Result<Option<String>> {
        let v = require(self.ids.vendor_id, "vendor_id")?;
        self.resolve(LookupMode::VENDOR, &[v])
    }

    pub fn device(&self) -> Result<Option<String>> {
        let v = require(self.ids.vendor_id, "vendor_id")?;
        let d = require(self.ids.device_id, "device_id")?;
        self.resolve(LookupMode::DEVICE, &[v, d])
    }

    pub fn vendor_device(&self) -> Result<Option<String>> {
        let v = require(self.ids.vendor_id, "vendor_id")?;
        let d = require(self.ids.device_id, "device_id")?;
        self.resolve(LookupMode::VENDOR | LookupMode::DEVICE, &[v, d])
    }

    pub fn subsystem_vendor(&self) -> Result<Option<String>> {
        let sv = require(self.ids.subvendor_id, "subvendor_id")?;
        self.resolve(LookupMode::SUBSYSTEM | LookupMode::DEVICE, &[sv])
    }

    fn subsystem_ids(&self) -> Result<[i32; 4]> {
        Ok([
            require(self.ids.vendor_id, "vendor_id")?,
            require(self.ids.device_id, "device_id")?,
            require(self.ids.subvendor_id, "subvendor_id")?,
            require(self.ids.subdev_id, "subdev_id")?,
        ])
    }

    pub fn subsystem_device(&self) -> Result<Option<String>> {
        let ids = self.subsystem_ids()?;
        self.resolve(LookupMode::SUBSYSTEM | LookupMode::DEVICE, &ids)
    }

    pub fn subsystem_vendor_device(&self) -> Result<Option<String>> {
        let ids = self.subsystem_ids()?;
        self.resolve(LookupMode::SUBSYSTEM | LookupMode::VENDOR | LookupMode::DEVICE, &ids)
    }

    /// Subsystem name independent of the parent device.
    pub fn generic_subsystem(&self) -> Result<Option<String>> {
        let sv = require(self.ids.subvendor_id, "subvendor_id")?;
        let sd = require(self.ids.subdev_id, "subdev_id")?;
        self.resolve(
            LookupMode::SUBSYSTEM | LookupMode::VENDOR | LookupMode::DEVICE,
            &[-1, -1, sv, sd],
        )
    }

    pub fn pci_class(&self) -> Result<Option<String>> {
        let c = require(self.ids.class_id, "class_id")?;
        self.resolve(LookupMode::CLASS, &[c])
    }

    pub fn programming_interface(&self) -> Result<Option<String>> {
        let c = require(self.ids.class_id, "class_id")?;
        let p = require(self.ids.progif, "progif")?;
        self.resolve(LookupMode::CLASS | LookupMode::PROGIF, &[c, p])
    }
}
