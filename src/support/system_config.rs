//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Crymap.
//
// Crymap is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crymap is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crymap. If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// The configuration for a message store.
///
/// This is typically stored in a TOML file next to whatever embeds the store.
/// Every section is optional; an empty file yields the defaults.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct StoreConfig {
    /// Behaviour of the message store itself.
    #[serde(default)]
    pub store: EngineConfig,

    /// Quota accounting.
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Event dispatch to listeners.
    #[serde(default)]
    pub events: EventsConfig,

    /// Logging setup. Only consulted by `init_logging`.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// If true, every copied message is flagged `\Recent` in the destination
    /// mailbox even if the original was not.
    ///
    /// When false, the copy carries exactly the flags of the original.
    pub copy_marks_recent: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            copy_marks_recent: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Whether usage deltas are reported to the quota tracker at all.
    pub enabled: bool,
    /// The message count limit applied to quota roots without their own.
    pub default_max_messages: Option<u64>,
    /// The storage limit, in bytes, applied to quota roots without their own.
    pub default_max_storage: Option<u64>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        QuotaConfig {
            enabled: true,
            default_max_messages: None,
            default_max_storage: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Whether the store dispatches events to registered listeners.
    pub enabled: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        EventsConfig { enabled: true }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// The level for the fallback console logger.
    pub level: String,
    /// A log4rs TOML file. If set, it replaces the console logger entirely.
    pub config_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_owned(),
            config_file: None,
        }
    }
}

impl StoreConfig {
    pub fn parse(text: &str) -> Result<Self, Error> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        StoreConfig::parse(&text)
    }
}
