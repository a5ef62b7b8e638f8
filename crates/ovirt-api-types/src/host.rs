// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Host parameter that pins the guest OS type, bypassing matching.
pub const OS_TYPE_PARAM: &str = "ovirt_ostype";

/// The operating system a host is provisioned with.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct HostOs {
    /// Family or distribution name, e.g. "RedHat", "Debian".
    pub name: String,
    pub major: String,
    #[serde(default)]
    pub minor: String,
}

/// The slice of a controller's host definition this adapter looks at.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
pub struct HostDescriptor {
    pub name: String,
    #[serde(default)]
    pub os: Option<HostOs>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}
