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

//! Unified error handling for pciscope
//!
//! Every fallible operation in the crate returns [`PciError`]. Variants carry
//! the field, identifier or value that was rejected so a failure can be
//! diagnosed without re-running with tracing enabled.

use std::io;
use std::path::PathBuf;

use crate::access::PciAddress;
use crate::flags::FillFlags;

/// Result type alias using PciError
pub type Result<T> = std::result::Result<T, PciError>;

#[derive(thiserror::Error, Debug)]
pub enum PciError {
    // ============================================================================
    // Precondition Errors
    // ============================================================================
    #[error("{name} is not specified")]
    MissingIdentifier {
        name: &'static str,
    },

    #[error("Field {field} is not supported by the {method} access method")]
    UnsupportedField {
        field: &'static str,
        method: &'static str,
    },

    #[error("Invalid value for filter field {field}: {value} (must be non-negative)")]
    InvalidFilterValue {
        field: &'static str,
        value: i64,
    },

    #[error("Invalid filter '{input}': {reason}")]
    FilterSyntax {
        input: String,
        reason: &'static str,
    },

    #[error("Unknown parameter: {0}")]
    KeyNotFound(String),

    #[error("Parameter {0} cannot be deleted")]
    NotDeletable(String),

    #[error("Unrecognized capability type {cap_type} at offset {addr:#x}")]
    UnrecognizedCapabilityType {
        cap_type: u8,
        addr: u32,
    },

    // ============================================================================
    // Lifecycle Errors
    // ============================================================================
    #[error("Access session is closed")]
    SessionClosed,

    #[error("Device {0} is closed")]
    DeviceClosed(PciAddress),

    #[error("Unknown access method: {0}")]
    UnknownMethod(String),

    #[error("Access method {0} is not supported on this system")]
    UnsupportedMethod(&'static str),

    #[error("Failed to initialize {method} access: {reason}")]
    Init {
        method: &'static str,
        reason: String,
    },

    // ============================================================================
    // Configuration Space Access Errors
    // ============================================================================
    #[error("Read of {len} bytes at {pos:#x} on {addr} failed: {reason}")]
    Read {
        addr: PciAddress,
        pos: u32,
        len: usize,
        reason: String,
    },

    #[error("Write of {len} bytes at {pos:#x} on {addr} failed: {reason}")]
    Write {
        addr: PciAddress,
        pos: u32,
        len: usize,
        reason: String,
    },

    #[error("Access method could not fill {missing} on {addr}")]
    FillIncomplete {
        addr: PciAddress,
        missing: FillFlags,
    },

    #[error("Unaligned {width}-byte access at {pos:#x}")]
    Unaligned {
        pos: u32,
        width: usize,
    },

    #[error("Access session is not writeable")]
    ReadOnly,

    // ============================================================================
    // I/O and File Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to create or write {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Parse error in {path} line {line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },
}

impl PciError {
    /// Create a read failure for a device
    pub fn read(addr: PciAddress, pos: u32, len: usize, reason: impl Into<String>) -> Self {
        Self::Read {
            addr,
            pos,
            len,
            reason: reason.into(),
        }
    }

    /// Create a write failure for a device
    pub fn write(addr: PciAddress, pos: u32, len: usize, reason: impl Into<String>) -> Self {
        Self::Write {
            addr,
            pos,
            len,
            reason: reason.into(),
        }
    }

    /// Create a config validation error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a parse error for a line of an input file
    pub fn parse(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}
