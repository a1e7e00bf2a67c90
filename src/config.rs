/*
* KeepAbove session daemon
* Copyright (C) 2022 Caleb Connolly <caleb@connolly.tech>
*
* This program is free software; you can redistribute it and/or modify
* it under the terms of the GNU General Public License as published by
* the Free Software Foundation; either version 2 of the License, or
* (at your option) any later version.
*
* This program is distributed in the hope that it will be useful,
* but WITHOUT ANY WARRANTY; without even the implied warranty of
* MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
* GNU General Public License for more details.
*
* You should have received a copy of the GNU General Public License along
* with this program; if not, write to the Free Software Foundation, Inc.,
* 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.
*/

use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Context, Result};
use serde::Deserialize;

/// The reference D-Bus implementation's default method call timeout
pub const DEFAULT_CALL_TIMEOUT: u64 = 25;

fn default_call_timeout() -> Option<u64> {
    Some(DEFAULT_CALL_TIMEOUT)
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all(deserialize = "kebab-case"), deny_unknown_fields)]
pub struct Config {
    /// Seconds to wait for a reply from Live Captions, `null` waits forever
    #[serde(default = "default_call_timeout")]
    pub call_timeout: Option<u64>,
    /// X11 display, `$DISPLAY` if not set
    #[serde(default)]
    pub display: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            call_timeout: default_call_timeout(),
            display: None,
        }
    }
}

impl Config {
    /// Load `path`, or the default location if it exists
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("No config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let config = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        debug!("Loaded config from {}", path.display());

        Self::parse(&config)
    }

    pub fn parse(config: &str) -> Result<Self> {
        // An empty file is a null document, not an empty mapping
        if config.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(config)?)
    }

    pub fn default_path() -> Option<PathBuf> {
        let base = match std::env::var_os("XDG_CONFIG_HOME") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => PathBuf::from(std::env::var_os("HOME")?).join(".config"),
        };
        Some(base.join("keepabove").join("config.yaml"))
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout.map(Duration::from_secs)
    }
}
