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

//! Tracking of populated fill categories
//!
//! The known set only ever grows. A fill may return more or fewer
//! categories than requested; whatever comes back is OR-ed in.

use crate::error::Result;
use crate::flags::FillFlags;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillTracker {
    known: FillFlags,
}

impl FillTracker {
    pub fn new(prefilled: FillFlags) -> Self {
        Self { known: prefilled }
    }

    pub fn known_fields(&self) -> FillFlags {
        self.known
    }

    /// True when every category in `flags` is populated.
    pub fn known(&self, flags: FillFlags) -> bool {
        self.known.contains(flags)
    }

    /// Run `fill` with the full requested set unless all of it is known.
    ///
    /// A failing fill leaves the known set untouched.
    pub fn ensure<F>(&mut self, flags: FillFlags, fill: F) -> Result<FillFlags>
    where
        F: FnOnce(FillFlags) -> Result<FillFlags>,
    {
        if !self.known(flags) {
            let filled = fill(flags)?;
            self.record(filled);
        }
        Ok(self.known)
    }

    pub fn record(&mut self, filled: FillFlags) {
        self.known |= filled;
    }
}
