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

//! pciscope - PCI bus access for Linux
//!
//! This library enumerates PCI functions, fills their metadata lazily,
//! walks capability lists, resolves ids to names through `pci.ids` and
//! reads or writes configuration space.
//!
//! ```no_run
//! use pciscope::{AccessMethod, Session};
//!
//! let session = Session::open(AccessMethod::Auto)?;
//! session.scan_bus()?;
//! for mut dev in session.devices()? {
//!     println!("{} {:?}", dev.addr(), dev.vendor()?);
//! }
//! # Ok::<(), pciscope::PciError>(())
//! ```

pub mod access;
pub mod caps;
pub mod class;
pub mod config;
pub mod device;
pub mod error;
pub mod fill;
pub mod filter;
pub mod flags;
pub mod logger;
pub mod lookup;
pub mod session;

#[cfg(test)]
pub mod test_utils;

pub use access::{AccessMethod, PciAddress};
pub use caps::{CapId, CapType, Capability, CapabilityId, ExtCapId};
pub use class::{BaseClass, DeviceClass};
pub use config::SessionConfig;
pub use device::Device;
pub use error::{PciError, Result};
pub use filter::Filter;
pub use flags::{FillFlags, LookupMode};
pub use lookup::{LookupIds, NameLookup};
pub use session::{Devices, Parameters, Session};
