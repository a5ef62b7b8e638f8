// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Definitions for types exchanged between the oVirt compute adapter, its
//! platform connection and the controller that drives it.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod host;
pub mod inventory;
pub mod vm;

pub use host::HostDescriptor;
pub use inventory::{
    Cluster, Datacenter, InstanceType, Network, OsDescriptor, StorageDomain,
    Template, TemplateVolume,
};
pub use vm::{ConsoleSession, Vm, VmDisplay, VmInterface, VmStatus, VmVolume};

/// Sentinel display port meaning "let the platform choose".
pub const DISPLAY_PORT_UNSET: i32 = -1;

/// The remote display protocol exposed by a guest.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DisplayType {
    #[default]
    Vnc,
    Spice,
}

/// Display block of a VM specification.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct DisplaySpec {
    #[serde(rename = "type")]
    pub display_type: DisplayType,
    pub keyboard_layout: String,
    /// [`DISPLAY_PORT_UNSET`] when the port is chosen by the platform.
    #[serde(default = "default_display_port")]
    pub port: i32,
    #[serde(default = "default_monitors")]
    pub monitors: u8,
}

fn default_display_port() -> i32 {
    DISPLAY_PORT_UNSET
}

fn default_monitors() -> u8 {
    1
}

/// A requested network interface, either a new one (no `id`) or a change to
/// an existing one.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
pub struct InterfaceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Assigned as `nic<N>` when left blank.
    #[serde(default)]
    pub name: String,

    /// Network name or id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// vNIC profile name or id, as an alternative to `network`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnic_profile: Option<String>,

    #[serde(default)]
    pub delete: bool,

    /// Marks the "add new" row a form carries along; it never describes a
    /// real change.
    #[serde(default)]
    pub template_placeholder: bool,
}

impl InterfaceSpec {
    pub fn is_new(&self) -> bool {
        is_blank(&self.id)
    }

    /// Returns `true` if this entry asks for a remote add or destroy.
    pub fn requests_change(&self) -> bool {
        !self.template_placeholder && (self.is_new() || self.delete)
    }
}

/// A requested volume, either a new one (no `id`) or a change to an existing
/// one (possibly one inherited from a template).
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
pub struct VolumeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_gb: Option<u64>,

    /// Storage domain name or id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_domain: Option<String>,

    #[serde(default)]
    pub preallocate: bool,

    #[serde(default)]
    pub bootable: bool,

    #[serde(default)]
    pub wipe_after_delete: bool,

    #[serde(default)]
    pub delete: bool,

    #[serde(default)]
    pub template_placeholder: bool,
}

impl VolumeSpec {
    pub fn is_new(&self) -> bool {
        is_blank(&self.id)
    }

    /// Returns `true` if this entry asks for a remote add or destroy.
    pub fn requests_change(&self) -> bool {
        !self.template_placeholder && (self.is_new() || self.delete)
    }
}

/// The attributes a controller supplies to create or update a VM.
///
/// Scalar fields left as `None` are "blank": they are either filled from a
/// template/instance type or left untouched on update.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
pub struct VmSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Cluster name or id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sockets: Option<u32>,

    /// Memory in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplaySpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<InterfaceSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// Alias of `template` used by image-based provisioning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,

    /// Free-form comment; doubles as the cloud-init carrier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Cloud-init user data. Moved into `comment` at creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_type: Option<String>,
}

/// The device a new VM boots from first.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum BootDevice {
    Network,
    Hd,
    Cdrom,
}

/// A template disk to place somewhere other than the template's own storage,
/// or to convert to preallocated storage, while cloning.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct DiskOverride {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<DiskFormat>,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    Raw,
    Cow,
}

/// The base creation call sent to the platform, after aliasing, inheritance
/// and name resolution.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct VmCreateRequest {
    pub name: Option<String>,
    pub cluster: Option<String>,
    pub template: Option<String>,
    pub instance_type: Option<String>,
    pub cores: Option<u32>,
    pub sockets: Option<u32>,
    pub memory: Option<u64>,
    pub display: Option<DisplaySpec>,
    pub comment: Option<String>,
    pub os_type: Option<String>,
    pub first_boot_device: BootDevice,
    pub quota: Option<String>,
    /// Clone template disks instead of thin-linking them.
    pub clone: bool,
    pub disks: Vec<DiskOverride>,
}

/// A fully shaped volume ready to attach to a VM.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct VolumeAttachment {
    pub size_gb: Option<u64>,
    /// Storage domain id.
    pub storage_domain: String,
    pub sparse: bool,
    pub format: Option<DiskFormat>,
    pub bootable: bool,
    pub wipe_after_delete: bool,
    pub quota: Option<String>,
}

/// A new interface ready to attach to a VM.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct InterfaceAttachment {
    pub name: String,
    /// Network id.
    pub network: Option<String>,
    /// vNIC profile id.
    pub vnic_profile: Option<String>,
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}
