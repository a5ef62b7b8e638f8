// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! VM state as reported by the platform, and console session descriptors.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{DisplaySpec, DisplayType};

/// Power state of a VM.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    Down,
    ImageLocked,
    PoweringUp,
    Up,
    PoweringDown,
    Suspended,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct VmInterface {
    pub id: String,
    pub name: String,
    pub network: Option<String>,
    pub mac: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct VmVolume {
    pub id: String,
    pub size_gb: Option<u64>,
    pub storage_domain: Option<String>,
    pub bootable: bool,
}

/// Display information of a running VM.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct VmDisplay {
    #[serde(rename = "type")]
    pub display_type: DisplayType,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub secure_port: Option<u16>,
    /// Subject of the host certificate presented on the secure port.
    pub subject: Option<String>,
}

/// A VM as currently known to the platform.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Vm {
    pub id: String,
    pub name: String,
    pub status: VmStatus,
    pub cluster: Option<String>,
    pub template: Option<String>,
    pub cores: Option<u32>,
    pub sockets: Option<u32>,
    pub memory: Option<u64>,
    pub comment: Option<String>,
    pub os_type: Option<String>,
    /// Display settings to apply on the next save.
    pub display_settings: Option<DisplaySpec>,
    /// Live display information.
    pub display: Option<VmDisplay>,
    #[serde(default)]
    pub interfaces: Vec<VmInterface>,
    #[serde(default)]
    pub volumes: Vec<VmVolume>,
}

/// What a console proxy needs to reach a VM's display.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConsoleSession {
    Vnc {
        host: String,
        host_port: u16,
        password: String,
        name: String,
    },
    Spice {
        host: String,
        host_port: u16,
        /// `true` when `host_port` is the TLS port.
        secure: bool,
        password: String,
        name: String,
        ca_cert: String,
        subject: Option<String>,
    },
}

impl ConsoleSession {
    pub fn display_type(&self) -> DisplayType {
        match self {
            ConsoleSession::Vnc { .. } => DisplayType::Vnc,
            ConsoleSession::Spice { .. } => DisplayType::Spice,
        }
    }
}
