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

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::access::AccessMethod;
use crate::error::{PciError, Result};
use crate::flags::LookupMode;

fn default_method() -> String {
    AccessMethod::Auto.name().to_string()
}

fn default_strict() -> bool {
    true
}

/// Session settings as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub writeable: bool,
    #[serde(default)]
    pub buscentric: bool,
    /// Id database to use instead of the system pci.ids
    #[serde(default)]
    pub id_file_name: Option<PathBuf>,
    #[serde(default)]
    pub numeric_ids: bool,
    /// Lookup mode modifiers by name, e.g. `["mixed"]`
    #[serde(default)]
    pub id_lookup_mode: Vec<String>,
    #[serde(default)]
    pub debugging: bool,
    /// Fail capability walks on an unknown node type instead of skipping it
    #[serde(default = "default_strict")]
    pub strict_cap_types: bool,
    /// Access method parameters, applied before the backend is initialised
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            writeable: false,
            buscentric: false,
            id_file_name: None,
            numeric_ids: false,
            id_lookup_mode: Vec::new(),
            debugging: false,
            strict_cap_types: default_strict(),
            params: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    pub fn access_method(&self) -> Result<AccessMethod> {
        AccessMethod::from_name(&self.method).ok_or_else(|| PciError::UnknownMethod(self.method.clone()))
    }

    pub fn lookup_mode(&self) -> Result<LookupMode> {
        LookupMode::from_names(&self.id_lookup_mode)
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        return Path::new(&xdg).join("pciscope").join("config.json");
    }
    if let Ok(home) = env::var("HOME") {
        return Path::new(&home)
            .join(".config")
            .join("pciscope")
            .join("config.json");
    }
    PathBuf::from("/etc/pciscope/config.json")
}

/// Load the user config, falling back to defaults when it is absent or broken.
pub fn load_config() -> SessionConfig {
    let path = config_path();
    if !path.exists() {
        return SessionConfig::default();
    }
    match try_load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("Ignoring config {}: {}", path.display(), e);
            SessionConfig::default()
        }
    }
}

pub fn try_load_config(path: &Path) -> Result<SessionConfig> {
    let data = fs::read_to_string(path).map_err(|source| PciError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg: SessionConfig = serde_json::from_str(&data)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn save_config(path: &Path, cfg: &SessionConfig) -> Result<()> {
    validate_config(cfg)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(cfg)?;
    fs::write(path, json)?;
    Ok(())
}

fn is_safe_param_key(s: &str) -> bool {
    if s.is_empty() || s.len() > 64 {
        return false;
    }
    s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

pub fn validate_config(cfg: &SessionConfig) -> Result<()> {
    cfg.access_method()
        .map_err(|_| PciError::invalid_config("method", format!("unknown access method '{}'", cfg.method)))?;
    cfg.lookup_mode()?;

    if let Some(path) = &cfg.id_file_name {
        if path.as_os_str().is_empty() {
            return Err(PciError::invalid_config("id_file_name", "empty path"));
        }
    }
    if cfg.params.len() > 64 {
        return Err(PciError::invalid_config("params", "too many parameters (max 64)"));
    }
    for (k, v) in &cfg.params {
        if !is_safe_param_key(k) {
            return Err(PciError::invalid_config("params", format!("invalid parameter name '{}'", k)));
        }
        if v.len() > 4096 || v.contains('\0') {
            return Err(PciError::invalid_config("params", format!("invalid value for '{}'", k)));
        }
    }
    Ok(())
}
