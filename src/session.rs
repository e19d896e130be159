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

//! Access sessions
//!
//! A [`Session`] owns one backend for its whole life. Devices, filters and
//! name lookups borrow the session, so it cannot be closed while any of them
//! is alive. Settings live in `Cell`s and may be changed through a shared
//! reference; a session is confined to one thread.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::access::{self, AccessMethod, Param, PciAccess, PciAddress};
use crate::config::SessionConfig;
use crate::device::Device;
use crate::error::{PciError, Result};
use crate::filter::Filter;
use crate::flags::{FillFlags, LookupMode, LOOKUP_KIND_MASK};
use crate::lookup::{LookupIds, NameLookup};

pub struct Session {
    backend: RefCell<Option<Box<dyn PciAccess>>>,
    method: AccessMethod,
    writeable: Cell<bool>,
    buscentric: Cell<bool>,
    numeric_ids: Cell<bool>,
    id_lookup_mode: Cell<LookupMode>,
    debugging: Cell<bool>,
    strict_cap_types: Cell<bool>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("method", &self.method)
            .field("open", &self.is_open())
            .field("writeable", &self.writeable.get())
            .field("numeric_ids", &self.numeric_ids.get())
            .finish()
    }
}

impl Session {
    /// Allocate and initialise the backend for `method` with default settings.
    pub fn open(method: AccessMethod) -> Result<Self> {
        Self::with_backend(access::allocate(method)?)
    }

    /// Wrap an already configured backend and initialise it.
    pub fn with_backend(mut backend: Box<dyn PciAccess>) -> Result<Self> {
        backend.init()?;
        let method = backend.method();
        debug!("Opened PCI access session using {}", method);
        Ok(Self {
            backend: RefCell::new(Some(backend)),
            method,
            writeable: Cell::new(false),
            buscentric: Cell::new(false),
            numeric_ids: Cell::new(false),
            id_lookup_mode: Cell::new(LookupMode::empty()),
            debugging: Cell::new(false),
            strict_cap_types: Cell::new(true),
        })
    }

    /// Build a session from stored settings. Parameters are applied before init.
    pub fn from_config(cfg: &SessionConfig) -> Result<Self> {
        let mut backend = access::allocate(cfg.access_method()?)?;
        for (k, v) in &cfg.params {
            backend.set_param(k, v)?;
        }
        backend.set_id_file(cfg.id_file_name.clone());
        let session = Self::with_backend(backend)?;
        session.set_writeable(cfg.writeable);
        session.set_buscentric(cfg.buscentric);
        session.set_numeric_ids(cfg.numeric_ids);
        session.set_id_lookup_mode(cfg.lookup_mode()?);
        session.set_debugging(cfg.debugging);
        session.set_strict_cap_types(cfg.strict_cap_types);
        Ok(session)
    }

    /// Release the backend. Further calls do nothing.
    pub fn close(&mut self) {
        if let Some(mut backend) = self.backend.get_mut().take() {
            backend.cleanup();
            debug!("Closed PCI access session");
        }
    }

    pub fn is_open(&self) -> bool {
        self.backend.borrow().is_some()
    }

    /// Run `f` against the backend.
    pub(crate) fn with_access<R>(&self, f: impl FnOnce(&mut dyn PciAccess) -> Result<R>) -> Result<R> {
        let mut guard = self.backend.borrow_mut();
        let backend = guard.as_mut().ok_or(PciError::SessionClosed)?;
        f(backend.as_mut())
    }

    pub fn scan_bus(&self) -> Result<()> {
        self.with_access(|a| {
            a.scan_bus()?;
            debug!("Bus scan found {} devices", a.scanned().len());
            Ok(())
        })
    }

    /// Device wrapper for an address. The address need not have been scanned.
    pub fn get_dev(&self, domain: u32, bus: u8, dev: u8, func: u8) -> Result<Device<'_>> {
        self.get_dev_at(PciAddress::new(domain, bus, dev, func))
    }

    pub fn get_dev_at(&self, addr: PciAddress) -> Result<Device<'_>> {
        let raw = self.with_access(|a| Ok(a.get_dev(addr)))?;
        Ok(Device::new(self, raw))
    }

    /// Devices found by the last scan, in discovery order.
    ///
    /// Each call starts from the head of the list and every item is a fresh
    /// wrapper.
    pub fn devices(&self) -> Result<Devices<'_>> {
        let addrs = self.with_access(|a| Ok(a.scanned()))?;
        Ok(Devices {
            session: self,
            addrs: addrs.into_iter(),
        })
    }

    pub fn filter(&self) -> Filter<'_> {
        Filter::new(self)
    }

    /// Name query over the given ids with no extra mode bits.
    pub fn lookup(&self, ids: LookupIds) -> NameLookup<'_> {
        NameLookup::new(self, ids, LookupMode::empty())
    }

    /// Resolve ids to a name with the session modifiers merged into `mode`.
    pub fn lookup_name(&self, mode: LookupMode, ids: &[i32]) -> Result<Option<String>> {
        let modifiers = LookupMode::from_bits_retain(self.id_lookup_mode.get().bits() & !LOOKUP_KIND_MASK);
        let mut mode = mode | modifiers;
        if self.numeric_ids.get() {
            mode |= LookupMode::NUMERIC;
        }
        let name = self.with_access(|a| Ok(a.lookup_name(mode, ids)))?;
        if self.debugging.get() {
            trace!("lookup {:?} {:?} -> {:?}", mode, ids, name);
        }
        Ok(name)
    }

    pub fn parameters(&self) -> Parameters<'_> {
        Parameters { session: self }
    }

    /// Fill categories the backend can populate.
    pub fn supported_fill(&self) -> Result<FillFlags> {
        self.with_access(|a| Ok(a.supported_fill()))
    }

    pub fn lookup_method(name: &str) -> Result<AccessMethod> {
        AccessMethod::from_name(name).ok_or_else(|| PciError::UnknownMethod(name.to_string()))
    }

    pub fn method_name(index: usize) -> Option<&'static str> {
        AccessMethod::from_index(index).map(AccessMethod::name)
    }

    pub fn method(&self) -> AccessMethod {
        self.method
    }

    pub fn writeable(&self) -> bool {
        self.writeable.get()
    }

    pub fn set_writeable(&self, val: bool) {
        self.writeable.set(val);
    }

    pub fn buscentric(&self) -> bool {
        self.buscentric.get()
    }

    pub fn set_buscentric(&self, val: bool) {
        self.buscentric.set(val);
    }

    /// Configured id database path; `None` means the system default.
    pub fn id_file_name(&self) -> Option<PathBuf> {
        self.backend.borrow().as_ref().and_then(|b| b.id_file())
    }

    pub fn set_id_file_name(&self, path: Option<PathBuf>) -> Result<()> {
        self.with_access(|a| {
            a.set_id_file(path);
            Ok(())
        })
    }

    pub fn numeric_ids(&self) -> bool {
        self.numeric_ids.get()
    }

    pub fn set_numeric_ids(&self, val: bool) {
        self.numeric_ids.set(val);
    }

    pub fn id_lookup_mode(&self) -> LookupMode {
        self.id_lookup_mode.get()
    }

    pub fn set_id_lookup_mode(&self, mode: LookupMode) {
        self.id_lookup_mode.set(mode);
    }

    pub fn debugging(&self) -> bool {
        self.debugging.get()
    }

    pub fn set_debugging(&self, val: bool) {
        self.debugging.set(val);
    }

    pub fn strict_cap_types(&self) -> bool {
        self.strict_cap_types.get()
    }

    pub fn set_strict_cap_types(&self, val: bool) {
        self.strict_cap_types.set(val);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Iterator returned by [`Session::devices`].
pub struct Devices<'s> {
    session: &'s Session,
    addrs: std::vec::IntoIter<PciAddress>,
}

impl<'s> Iterator for Devices<'s> {
    type Item = Device<'s>;

    fn next(&mut self) -> Option<Self::Item> {
        let addr = self.addrs.next()?;
        self.session.get_dev_at(addr).ok()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.addrs.len()))
    }
}

/// Name to value view over the backend parameter table.
///
/// Entries can be read and overwritten but never removed.
pub struct Parameters<'s> {
    session: &'s Session,
}

impl Parameters<'_> {
    /// Walk the parameter cursor from the start.
    pub fn items(&self) -> Vec<Param> {
        self.session
            .with_access(|a| Ok((0..).map_while(|i| a.param_at(i)).collect()))
            .unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.items().into_iter().map(|p| p.name).collect()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_ok()
    }

    pub fn get(&self, key: &str) -> Result<String> {
        self.session
            .with_access(|a| Ok(a.get_param(key)))
            .ok()
            .flatten()
            .ok_or_else(|| PciError::KeyNotFound(key.to_string()))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.session
            .with_access(|a| a.set_param(key, value))
            .map_err(|_| PciError::KeyNotFound(key.to_string()))
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        Err(PciError::NotDeletable(key.to_string()))
    }
}

impl fmt::Display for Parameters<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self
            .items()
            .iter()
            .map(|p| format!("{:?}: {:?}", p.name, p.value))
            .collect();
        write!(f, "{{{}}}", entries.join(", "))
    }
}
