// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Read-only inventory objects listed from the platform.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Datacenter {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub datacenter: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Network {
    pub id: String,
    pub name: String,
}

/// A storage domain and the role it plays in its datacenter.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct StorageDomain {
    pub id: String,
    pub name: String,
    /// `data`, `iso`, `export`, `volume`, ...
    pub role: String,
    #[serde(default)]
    pub datacenter: Option<String>,
}

/// A disk belonging to a template.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct TemplateVolume {
    pub id: String,
    pub storage_domain: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub cores: Option<u32>,
    /// Memory in bytes.
    pub memory: Option<u64>,
    #[serde(default)]
    pub volumes: Vec<TemplateVolume>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct InstanceType {
    pub id: String,
    pub name: String,
    pub cores: Option<u32>,
    /// Memory in bytes.
    pub memory: Option<u64>,
}

/// A guest operating system type known to the platform.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct OsDescriptor {
    pub id: String,
    pub name: String,
    pub href: String,
}
