// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`Connector`] and [`Platform`] over the engine's REST API.

use std::sync::Arc;

use ovirt_api_types::{
    Cluster, Datacenter, InstanceType, InterfaceAttachment, Network,
    OsDescriptor, StorageDomain, Template, Vm, VmCreateRequest, VmInterface,
    VmVolume, VolumeAttachment,
};
use ovirt_client::{Client, ClientConfig};
use slog::{debug, o, Logger};

use crate::platform::{
    ApiVersion, Connector, DialParams, Platform, RemoteError,
    StorageDomainFilter,
};

/// First API version with a guest operating system listing.
pub const OS_LISTING_SINCE: ApiVersion = ApiVersion::new(3, 5);

/// Maps a client failure to what the adapter classifies on.
pub fn remote_error(err: ovirt_client::Error) -> RemoteError {
    if err.is_untrusted_certificate() {
        return RemoteError::Untrusted;
    }
    match err {
        ovirt_client::Error::Status { status, detail } => {
            RemoteError::Status { status, detail }
        }
        ovirt_client::Error::Certificate(detail) => {
            RemoteError::InvalidCertificate(detail)
        }
        ovirt_client::Error::InvalidRequest(detail) => {
            RemoteError::InvalidRequest(detail)
        }
        ovirt_client::Error::Reqwest(e) => match e.status() {
            Some(status) => RemoteError::Status {
                status: status.as_u16(),
                detail: e.to_string(),
            },
            None => RemoteError::Transport(e.to_string()),
        },
    }
}

/// Dials engines with [`ovirt_client::Client`].
pub struct RestConnector {
    log: Logger,
}

impl RestConnector {
    pub fn new(log: Logger) -> Self {
        Self { log }
    }
}

#[async_trait::async_trait]
impl Connector for RestConnector {
    async fn dial(
        &self,
        params: &DialParams,
    ) -> Result<Arc<dyn Platform>, RemoteError> {
        let config = ClientConfig {
            url: params.url.clone(),
            user: params.user.clone(),
            password: params.password.clone(),
            use_v4: params.use_v4,
            ca_certificates: params.ca_certificates.clone(),
        };
        let client =
            Client::new(config, self.log.clone()).map_err(remote_error)?;
        let (major, minor) = client.api_version().await.map_err(remote_error)?;
        let version = ApiVersion::new(major, minor);
        debug!(self.log, "engine answered"; "api_version" => %version);
        Ok(Arc::new(RestPlatform::new(client, version, &self.log)))
    }

    async fn fetch_unverified(&self, url: &str) -> Result<String, RemoteError> {
        ovirt_client::fetch_unverified(url).await.map_err(remote_error)
    }

    async fn probe_plain_http(&self, url: &str) -> Result<u16, RemoteError> {
        ovirt_client::probe_plain_http(url).await.map_err(remote_error)
    }
}

/// An authenticated engine session.
pub struct RestPlatform {
    client: Client,
    version: ApiVersion,
    log: Logger,
}

impl RestPlatform {
    pub fn new(client: Client, version: ApiVersion, log: &Logger) -> Self {
        let log = log.new(o!("api_version" => version.to_string()));
        Self { client, version, log }
    }
}

#[async_trait::async_trait]
impl Platform for RestPlatform {
    fn api_version(&self) -> ApiVersion {
        self.version
    }

    fn supports_operating_systems(&self) -> bool {
        self.version >= OS_LISTING_SINCE
    }

    async fn list_datacenters(&self) -> Result<Vec<Datacenter>, RemoteError> {
        self.client.datacenters().await.map_err(remote_error)
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>, RemoteError> {
        self.client.clusters().await.map_err(remote_error)
    }

    async fn list_networks(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<Network>, RemoteError> {
        self.client.cluster_networks(cluster_id).await.map_err(remote_error)
    }

    async fn list_templates(&self) -> Result<Vec<Template>, RemoteError> {
        self.client.templates().await.map_err(remote_error)
    }

    async fn list_instance_types(
        &self,
    ) -> Result<Vec<InstanceType>, RemoteError> {
        self.client.instance_types().await.map_err(remote_error)
    }

    async fn list_storage_domains(
        &self,
        filter: &StorageDomainFilter,
    ) -> Result<Vec<StorageDomain>, RemoteError> {
        let domains =
            self.client.storage_domains().await.map_err(remote_error)?;
        Ok(domains.into_iter().filter(|sd| filter.matches(sd)).collect())
    }

    async fn list_operating_systems(
        &self,
    ) -> Result<Vec<OsDescriptor>, RemoteError> {
        self.client.operating_systems().await.map_err(remote_error)
    }

    async fn get_template(&self, id: &str) -> Result<Template, RemoteError> {
        self.client.template(id).await.map_err(remote_error)
    }

    async fn get_instance_type(
        &self,
        id: &str,
    ) -> Result<InstanceType, RemoteError> {
        self.client.instance_type(id).await.map_err(remote_error)
    }

    async fn get_vm(&self, id: &str) -> Result<Vm, RemoteError> {
        self.client.vm(id).await.map_err(remote_error)
    }

    async fn create_vm(
        &self,
        request: &VmCreateRequest,
    ) -> Result<Vm, RemoteError> {
        self.client.create_vm(request).await.map_err(remote_error)
    }

    async fn update_vm(&self, vm: &Vm) -> Result<Vm, RemoteError> {
        self.client.update_vm(vm).await.map_err(remote_error)
    }

    async fn destroy_vm(&self, id: &str) -> Result<(), RemoteError> {
        debug!(self.log, "deleting vm"; "vm" => id);
        self.client.delete_vm(id).await.map_err(remote_error)
    }

    async fn start_vm(
        &self,
        id: &str,
        blocking: bool,
    ) -> Result<(), RemoteError> {
        self.client.start_vm(id, None, blocking).await.map_err(remote_error)
    }

    async fn start_vm_with_cloud_init(
        &self,
        id: &str,
        user_data: &str,
        blocking: bool,
    ) -> Result<(), RemoteError> {
        self.client
            .start_vm(id, Some(user_data), blocking)
            .await
            .map_err(remote_error)
    }

    async fn add_interface(
        &self,
        vm_id: &str,
        nic: &InterfaceAttachment,
    ) -> Result<VmInterface, RemoteError> {
        self.client.add_nic(vm_id, nic).await.map_err(remote_error)
    }

    async fn destroy_interface(
        &self,
        vm_id: &str,
        nic_id: &str,
        blocking: bool,
    ) -> Result<(), RemoteError> {
        self.client
            .delete_nic(vm_id, nic_id, blocking)
            .await
            .map_err(remote_error)
    }

    async fn add_volume(
        &self,
        vm_id: &str,
        volume: &VolumeAttachment,
    ) -> Result<VmVolume, RemoteError> {
        self.client.add_disk(vm_id, volume).await.map_err(remote_error)
    }

    async fn destroy_volume(
        &self,
        vm_id: &str,
        volume_id: &str,
        blocking: bool,
    ) -> Result<(), RemoteError> {
        self.client
            .delete_disk(vm_id, volume_id, blocking)
            .await
            .map_err(remote_error)
    }

    async fn console_ticket(&self, vm_id: &str) -> Result<String, RemoteError> {
        self.client.ticket(vm_id).await.map_err(remote_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform(version: ApiVersion) -> RestPlatform {
        let log = Logger::root(slog::Discard, o!());
        let client = Client::new(
            ClientConfig {
                url: "https://engine.example.com/ovirt-engine/api".to_string(),
                user: "admin@internal".to_string(),
                password: "secret".to_string(),
                use_v4: true,
                ca_certificates: Vec::new(),
            },
            log.clone(),
        )
        .unwrap();
        RestPlatform::new(client, version, &log)
    }

    #[test]
    fn client_errors_keep_their_status() {
        let err = remote_error(ovirt_client::Error::Status {
            status: 401,
            detail: "bad credentials".to_string(),
        });
        assert_eq!(
            err,
            RemoteError::Status {
                status: 401,
                detail: "bad credentials".to_string()
            }
        );
        assert_eq!(
            remote_error(ovirt_client::Error::Certificate("junk".into())),
            RemoteError::InvalidCertificate("junk".to_string())
        );
        assert_eq!(
            remote_error(ovirt_client::Error::InvalidRequest("big".into())),
            RemoteError::InvalidRequest("big".to_string())
        );
    }

    #[test]
    fn os_listing_depends_on_version() {
        assert!(!platform(ApiVersion::new(3, 4)).supports_operating_systems());
        assert!(platform(ApiVersion::new(3, 5)).supports_operating_systems());
        assert!(platform(ApiVersion::new(4, 4)).supports_operating_systems());
    }
}
