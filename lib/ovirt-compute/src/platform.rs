// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The operations this adapter invokes on the virtualization platform.
//!
//! [`Connector`] produces authenticated [`Platform`] handles; everything the
//! adapter does to a VM goes through a handle. Implementations report
//! failures as [`RemoteError`], with the response status already extracted,
//! and the adapter classifies them from there.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ovirt_api_types::{
    Cluster, Datacenter, InstanceType, InterfaceAttachment, Network,
    OsDescriptor, StorageDomain, Template, Vm, VmCreateRequest, VmInterface,
    VmVolume, VolumeAttachment,
};
use thiserror::Error;

/// A failed call to the platform, as observed at the call site.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The server's certificate chain did not verify against the trusted
    /// roots.
    #[error("certificate verification failed")]
    Untrusted,

    /// The pinned trust material could not be loaded.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("status {status}: {detail}")]
    Status { status: u16, detail: String },

    /// No response was received.
    #[error("{0}")]
    Transport(String),

    /// The request could not be encoded for the wire.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RemoteError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// The API version an engine negotiated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u64,
    pub minor: u64,
}

impl ApiVersion {
    /// Engines older than this lose track of devices deleted asynchronously,
    /// so deletions must wait for completion.
    pub const SYNC_DELETE_BELOW: ApiVersion = ApiVersion::new(3, 1);

    pub const fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }

    pub fn requires_blocking_delete(&self) -> bool {
        *self < Self::SYNC_DELETE_BELOW
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ApiVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(2, '.');
        let parse = |part: Option<&str>| -> Result<u64, String> {
            match part {
                None | Some("") => Ok(0),
                Some(p) => p
                    .parse()
                    .map_err(|_| format!("invalid API version {:?}", s)),
            }
        };
        let major = match parts.next() {
            Some(p) if !p.is_empty() => parse(Some(p))?,
            _ => return Err(format!("invalid API version {:?}", s)),
        };
        let minor = parse(parts.next())?;
        Ok(Self { major, minor })
    }
}

/// Selects the storage domains VMs may place disks on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageDomainFilter {
    pub datacenter: Option<String>,
    /// Empty means any role.
    pub roles: Vec<String>,
}

impl StorageDomainFilter {
    /// Domains that can hold VM disks in `datacenter`.
    pub fn data_domains(datacenter: Option<String>) -> Self {
        Self {
            datacenter,
            roles: vec!["data".to_string(), "volume".to_string()],
        }
    }

    pub fn matches(&self, sd: &StorageDomain) -> bool {
        let role_ok = self.roles.is_empty()
            || self.roles.iter().any(|r| r.eq_ignore_ascii_case(&sd.role));
        let dc_ok = match (&self.datacenter, &sd.datacenter) {
            (Some(want), Some(have)) => want == have,
            _ => true,
        };
        role_ok && dc_ok
    }
}

/// What a [`Connector`] needs to dial the platform.
#[derive(Clone, PartialEq, Eq)]
pub struct DialParams {
    pub url: String,
    pub user: String,
    pub password: String,
    pub datacenter: Option<String>,
    pub use_v4: bool,
    /// DER encoded roots to trust; empty means the system roots.
    pub ca_certificates: Vec<Vec<u8>>,
}

impl fmt::Debug for DialParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialParams")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("datacenter", &self.datacenter)
            .field("use_v4", &self.use_v4)
            .field("ca_certificates", &self.ca_certificates.len())
            .finish_non_exhaustive()
    }
}

/// Establishes connections, and performs the unauthenticated requests that
/// happen outside of one.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Dials the platform and returns a live handle.
    async fn dial(
        &self,
        params: &DialParams,
    ) -> Result<Arc<dyn Platform>, RemoteError>;

    /// GETs `url` with certificate verification disabled and no
    /// credentials.
    async fn fetch_unverified(&self, url: &str) -> Result<String, RemoteError>;

    /// POSTs an empty body to a plain-HTTP `url` without following
    /// redirects and returns the response status.
    async fn probe_plain_http(&self, url: &str) -> Result<u16, RemoteError>;
}

/// A live, authenticated handle to the platform.
#[async_trait::async_trait]
pub trait Platform: Send + Sync {
    fn api_version(&self) -> ApiVersion;

    /// Whether this platform can list guest operating system types at all.
    fn supports_operating_systems(&self) -> bool;

    async fn list_datacenters(&self) -> Result<Vec<Datacenter>, RemoteError>;
    async fn list_clusters(&self) -> Result<Vec<Cluster>, RemoteError>;
    async fn list_networks(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<Network>, RemoteError>;
    async fn list_templates(&self) -> Result<Vec<Template>, RemoteError>;
    async fn list_instance_types(
        &self,
    ) -> Result<Vec<InstanceType>, RemoteError>;
    async fn list_storage_domains(
        &self,
        filter: &StorageDomainFilter,
    ) -> Result<Vec<StorageDomain>, RemoteError>;
    async fn list_operating_systems(
        &self,
    ) -> Result<Vec<OsDescriptor>, RemoteError>;

    async fn get_template(&self, id: &str) -> Result<Template, RemoteError>;
    async fn get_instance_type(
        &self,
        id: &str,
    ) -> Result<InstanceType, RemoteError>;
    async fn get_vm(&self, id: &str) -> Result<Vm, RemoteError>;

    async fn create_vm(
        &self,
        request: &VmCreateRequest,
    ) -> Result<Vm, RemoteError>;
    /// Persists the VM's scalar attributes.
    async fn update_vm(&self, vm: &Vm) -> Result<Vm, RemoteError>;
    async fn destroy_vm(&self, id: &str) -> Result<(), RemoteError>;
    async fn start_vm(&self, id: &str, blocking: bool)
        -> Result<(), RemoteError>;
    async fn start_vm_with_cloud_init(
        &self,
        id: &str,
        user_data: &str,
        blocking: bool,
    ) -> Result<(), RemoteError>;

    async fn add_interface(
        &self,
        vm_id: &str,
        nic: &InterfaceAttachment,
    ) -> Result<VmInterface, RemoteError>;
    async fn destroy_interface(
        &self,
        vm_id: &str,
        nic_id: &str,
        blocking: bool,
    ) -> Result<(), RemoteError>;
    async fn add_volume(
        &self,
        vm_id: &str,
        volume: &VolumeAttachment,
    ) -> Result<VmVolume, RemoteError>;
    async fn destroy_volume(
        &self,
        vm_id: &str,
        volume_id: &str,
        blocking: bool,
    ) -> Result<(), RemoteError>;

    /// Issues a one-time console password.
    async fn console_ticket(&self, vm_id: &str) -> Result<String, RemoteError>;
}
