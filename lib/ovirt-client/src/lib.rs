// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface for making requests to the oVirt engine's REST API.
//!
//! Only the handful of calls the compute adapter needs are covered. Every
//! non-success response is returned as [`Error::Status`] with the numeric
//! status code, so callers never have to look inside message text.

use std::time::Duration;

use ovirt_api_types as types;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use slog::{debug, info, o, Logger};
use thiserror::Error;

pub mod api;

/// How often a blocking delete re-checks whether the object is gone.
const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(1);

const BYTES_PER_GIB: u64 = 1 << 30;

/// Errors which may be returned from the client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Bad Status: {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("Invalid certificate: {0}")]
    Certificate(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Returns the HTTP status of the response, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Status { status, .. } => Some(*status),
            Error::Reqwest(e) => e.status().map(|s| s.as_u16()),
            Error::Certificate(_) | Error::InvalidRequest(_) => None,
        }
    }

    /// Returns `true` if the TLS handshake failed because the server's
    /// certificate chain is signed by an authority outside the trusted roots.
    /// Other certificate failures, such as an expired certificate or a name
    /// mismatch, are not a matter of trust and return `false`.
    pub fn is_untrusted_certificate(&self) -> bool {
        match self {
            Error::Reqwest(e) => is_unknown_issuer(e),
            _ => false,
        }
    }
}

// Finds the TLS layer's error in a source chain. The TLS stream reports it
// wrapped in an `io::Error`, whose `source()` skips the wrapped error, so
// those are unwrapped explicitly.
fn tls_error<'a>(
    err: &'a (dyn std::error::Error + 'static),
) -> Option<&'a rustls::Error> {
    let mut source = Some(err);
    while let Some(err) = source {
        if let Some(tls) = err.downcast_ref::<rustls::Error>() {
            return Some(tls);
        }
        let inner = err
            .downcast_ref::<std::io::Error>()
            .and_then(|io| io.get_ref())
            .and_then(|inner| inner.downcast_ref::<rustls::Error>());
        if inner.is_some() {
            return inner;
        }
        source = err.source();
    }
    None
}

fn is_unknown_issuer(err: &(dyn std::error::Error + 'static)) -> bool {
    matches!(
        tls_error(err),
        Some(rustls::Error::InvalidCertificate(
            rustls::CertificateError::UnknownIssuer
        ))
    )
}

/// Credentials and trust material used to reach the engine.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// API root, e.g. `https://engine.example.com/ovirt-engine/api`.
    pub url: String,
    pub user: String,
    pub password: String,
    /// Send the `Version: 4` header.
    pub use_v4: bool,
    /// DER encoded CA certificates to trust instead of the system roots.
    pub ca_certificates: Vec<Vec<u8>>,
}

/// Client-side connection to an engine.
pub struct Client {
    client: reqwest::Client,
    config: ClientConfig,
    log: Logger,
}

// Sends "request", awaits "response", and returns an error on any
// non-success status code.
async fn send_and_check_ok(
    request: RequestBuilder,
) -> Result<reqwest::Response, Error> {
    let response = request.send().await?;

    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(Error::Status { status: status.as_u16(), detail });
    }

    Ok(response)
}

// Sends a "request", awaits "response", and parses the body
// into a deserializable type.
async fn send_and_parse_response<T: DeserializeOwned>(
    request: RequestBuilder,
) -> Result<T, Error> {
    send_and_check_ok(request).await?.json().await.map_err(|e| e.into())
}

impl Client {
    pub fn new(config: ClientConfig, log: Logger) -> Result<Client, Error> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            // A redirect means the engine wants HTTPS; report it as a status.
            .redirect(reqwest::redirect::Policy::none());

        if !config.ca_certificates.is_empty() {
            builder = builder.tls_built_in_root_certs(false);
            for der in &config.ca_certificates {
                let cert = reqwest::Certificate::from_der(der)
                    .map_err(|e| Error::Certificate(e.to_string()))?;
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder.build()?;
        let log = log.new(o!("ovirt_client url" => config.url.clone()));
        Ok(Client { client, config, log })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.url, path);
        debug!(self.log, "{} request to {}", method, url);
        let mut request = self
            .client
            .request(method, url)
            .basic_auth(&self.config.user, Some(&self.config.password))
            .header(reqwest::header::ACCEPT, "application/json");
        if self.config.use_v4 {
            request = request.header("Version", "4");
        }
        request
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        send_and_parse_response(self.request(Method::GET, path)).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T, Error> {
        send_and_parse_response(self.request(Method::POST, path).json(body))
            .await
    }

    async fn post_no_response(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<(), Error> {
        send_and_check_ok(self.request(Method::POST, path).json(body)).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), Error> {
        send_and_check_ok(self.request(Method::DELETE, path)).await?;
        Ok(())
    }

    // Deletes `path` and, if `blocking`, polls `poll_path` until the engine
    // reports the object gone.
    async fn delete_and_wait(
        &self,
        path: &str,
        poll_path: &str,
        blocking: bool,
    ) -> Result<(), Error> {
        self.delete(path).await?;
        if !blocking {
            return Ok(());
        }
        loop {
            match send_and_check_ok(self.request(Method::GET, poll_path)).await
            {
                Err(Error::Status { status: 404, .. }) => return Ok(()),
                Err(e) => return Err(e),
                Ok(_) => tokio::time::sleep(DELETE_POLL_INTERVAL).await,
            }
        }
    }

    /// Returns the engine's `(major, minor)` API version.
    pub async fn api_version(&self) -> Result<(u64, u64), Error> {
        let root: api::ApiRoot = self.get("").await?;
        let version = root.product_info.and_then(|p| p.version);
        Ok(match version {
            Some(v) => (v.major.unwrap_or(0), v.minor.unwrap_or(0)),
            None => (0, 0),
        })
    }

    pub async fn datacenters(&self) -> Result<Vec<types::Datacenter>, Error> {
        let dcs: api::DataCenters = self.get("/datacenters").await?;
        Ok(dcs.data_center.into_iter().map(Into::into).collect())
    }

    pub async fn clusters(&self) -> Result<Vec<types::Cluster>, Error> {
        let clusters: api::Clusters = self.get("/clusters").await?;
        Ok(clusters.cluster.into_iter().map(Into::into).collect())
    }

    pub async fn cluster_networks(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<types::Network>, Error> {
        let path = format!("/clusters/{}/networks", cluster_id);
        let networks: api::Networks = self.get(&path).await?;
        Ok(networks.network.into_iter().map(Into::into).collect())
    }

    pub async fn templates(&self) -> Result<Vec<types::Template>, Error> {
        let templates: api::Templates = self.get("/templates").await?;
        Ok(templates
            .template
            .into_iter()
            .map(|t| t.into_template(Vec::new()))
            .collect())
    }

    /// Fetches a template along with the storage placement of its disks.
    pub async fn template(&self, id: &str) -> Result<types::Template, Error> {
        let template: api::Template =
            self.get(&format!("/templates/{}", id)).await?;
        let disks: api::DiskAttachments = self
            .get(&format!("/templates/{}/diskattachments?follow=disk", id))
            .await?;
        Ok(template.into_template(disks.disk_attachment))
    }

    pub async fn instance_types(
        &self,
    ) -> Result<Vec<types::InstanceType>, Error> {
        let its: api::InstanceTypes = self.get("/instancetypes").await?;
        Ok(its.instance_type.into_iter().map(Into::into).collect())
    }

    pub async fn instance_type(
        &self,
        id: &str,
    ) -> Result<types::InstanceType, Error> {
        let it: api::InstanceType =
            self.get(&format!("/instancetypes/{}", id)).await?;
        Ok(it.into())
    }

    pub async fn storage_domains(
        &self,
    ) -> Result<Vec<types::StorageDomain>, Error> {
        let sds: api::StorageDomains = self.get("/storagedomains").await?;
        Ok(sds.storage_domain.into_iter().map(Into::into).collect())
    }

    pub async fn operating_systems(
        &self,
    ) -> Result<Vec<types::OsDescriptor>, Error> {
        let oses: api::OperatingSystems =
            self.get("/operatingsystems").await?;
        Ok(oses.operating_system.into_iter().map(Into::into).collect())
    }

    /// Fetches a VM together with its NICs and disks.
    pub async fn vm(&self, id: &str) -> Result<types::Vm, Error> {
        let vm: api::Vm = self.get(&format!("/vms/{}", id)).await?;
        let nics: api::Nics = self.get(&format!("/vms/{}/nics", id)).await?;
        let disks: api::DiskAttachments = self
            .get(&format!("/vms/{}/diskattachments?follow=disk", id))
            .await?;
        Ok(vm.into_vm(nics.nic, disks.disk_attachment))
    }

    pub async fn create_vm(
        &self,
        request: &types::VmCreateRequest,
    ) -> Result<types::Vm, Error> {
        let path = if request.clone { "/vms?clone=true" } else { "/vms" };
        let created: api::Vm = self.post(path, &vm_create_body(request)).await?;
        info!(self.log, "created vm"; "id" => &created.id);
        self.vm(&created.id).await
    }

    pub async fn update_vm(&self, vm: &types::Vm) -> Result<types::Vm, Error> {
        let path = format!("/vms/{}", vm.id);
        send_and_check_ok(
            self.request(Method::PUT, &path).json(&vm_update_body(vm)),
        )
        .await?;
        self.vm(&vm.id).await
    }

    pub async fn delete_vm(&self, id: &str) -> Result<(), Error> {
        self.delete(&format!("/vms/{}", id)).await
    }

    pub async fn start_vm(
        &self,
        id: &str,
        cloud_init: Option<&str>,
        blocking: bool,
    ) -> Result<(), Error> {
        let mut body = json!({ "async": !blocking });
        if let Some(user_data) = cloud_init {
            body["use_cloud_init"] = json!(true);
            body["vm"] = json!({
                "initialization": { "custom_script": user_data }
            });
        }
        self.post_no_response(&format!("/vms/{}/start", id), &body).await
    }

    pub async fn add_nic(
        &self,
        vm_id: &str,
        nic: &types::InterfaceAttachment,
    ) -> Result<types::VmInterface, Error> {
        let mut body = json!({ "name": nic.name });
        if let Some(profile) = &nic.vnic_profile {
            body["vnic_profile"] = json!({ "id": profile });
        }
        if let Some(network) = &nic.network {
            body["network"] = json!({ "id": network });
        }
        let nic: api::Nic =
            self.post(&format!("/vms/{}/nics", vm_id), &body).await?;
        Ok(nic.into())
    }

    pub async fn delete_nic(
        &self,
        vm_id: &str,
        nic_id: &str,
        blocking: bool,
    ) -> Result<(), Error> {
        let path = format!("/vms/{}/nics/{}", vm_id, nic_id);
        self.delete_and_wait(&path, &path, blocking).await
    }

    pub async fn add_disk(
        &self,
        vm_id: &str,
        volume: &types::VolumeAttachment,
    ) -> Result<types::VmVolume, Error> {
        let path = format!("/vms/{}/diskattachments", vm_id);
        let att: api::DiskAttachment =
            self.post(&path, &disk_attachment_body(volume)?).await?;
        Ok(att.into())
    }

    pub async fn delete_disk(
        &self,
        vm_id: &str,
        attachment_id: &str,
        blocking: bool,
    ) -> Result<(), Error> {
        let path = format!("/vms/{}/diskattachments/{}", vm_id, attachment_id);
        let delete_path = format!("{}?detach_only=false", path);
        self.delete_and_wait(&delete_path, &path, blocking).await
    }

    /// Issues a one-time console password for a VM.
    pub async fn ticket(&self, vm_id: &str) -> Result<String, Error> {
        let action: api::Action =
            self.post(&format!("/vms/{}/ticket", vm_id), &json!({})).await?;
        Ok(action.ticket.map(|t| t.value).unwrap_or_default())
    }
}

fn vm_create_body(request: &types::VmCreateRequest) -> Value {
    let boot = json!({ "devices": { "device": [request.first_boot_device] } });
    let mut body = json!({ "os": { "boot": boot } });
    if let Some(name) = &request.name {
        body["name"] = json!(name);
    }
    if let Some(cluster) = &request.cluster {
        body["cluster"] = json!({ "id": cluster });
    }
    body["template"] = json!({
        "id": request.template.as_deref().unwrap_or(BLANK_TEMPLATE_ID)
    });
    if let Some(it) = &request.instance_type {
        body["instance_type"] = json!({ "id": it });
    }
    if request.cores.is_some() || request.sockets.is_some() {
        let mut topology = json!({});
        if let Some(cores) = request.cores {
            topology["cores"] = json!(cores);
        }
        if let Some(sockets) = request.sockets {
            topology["sockets"] = json!(sockets);
        }
        body["cpu"] = json!({ "topology": topology });
    }
    if let Some(memory) = request.memory {
        body["memory"] = json!(memory);
    }
    if let Some(os_type) = &request.os_type {
        body["os"]["type"] = json!(os_type);
    }
    if let Some(comment) = &request.comment {
        body["comment"] = json!(comment);
    }
    if let Some(quota) = &request.quota {
        body["quota"] = json!({ "id": quota });
    }
    if let Some(display) = &request.display {
        body["display"] = display_body(display);
    }
    if !request.disks.is_empty() {
        let attachments: Vec<Value> = request
            .disks
            .iter()
            .map(|d| {
                let mut disk = json!({ "id": d.id });
                if let Some(sd) = &d.storage_domain {
                    disk["storage_domains"] =
                        json!({ "storage_domain": [{ "id": sd }] });
                }
                if let Some(sparse) = d.sparse {
                    disk["sparse"] = json!(sparse);
                }
                if let Some(format) = d.format {
                    disk["format"] = json!(format);
                }
                json!({ "disk": disk })
            })
            .collect();
        body["disk_attachments"] = json!({ "disk_attachment": attachments });
    }
    body
}

fn vm_update_body(vm: &types::Vm) -> Value {
    let mut body = json!({ "name": vm.name });
    if let Some(memory) = vm.memory {
        body["memory"] = json!(memory);
    }
    let mut topology = json!({});
    if let Some(cores) = vm.cores {
        topology["cores"] = json!(cores);
    }
    if let Some(sockets) = vm.sockets {
        topology["sockets"] = json!(sockets);
    }
    body["cpu"] = json!({ "topology": topology });
    body["comment"] = json!(vm.comment.as_deref().unwrap_or(""));
    if let Some(os_type) = &vm.os_type {
        body["os"] = json!({ "type": os_type });
    }
    if let Some(display) = &vm.display_settings {
        body["display"] = display_body(display);
    }
    body
}

fn display_body(display: &types::DisplaySpec) -> Value {
    let mut body = json!({
        "type": display.display_type,
        "keyboard_layout": display.keyboard_layout,
        "monitors": display.monitors,
    });
    if display.port != types::DISPLAY_PORT_UNSET {
        body["port"] = json!(display.port);
    }
    body
}

fn disk_attachment_body(
    volume: &types::VolumeAttachment,
) -> Result<Value, Error> {
    let mut disk = json!({
        "sparse": volume.sparse,
        "wipe_after_delete": volume.wipe_after_delete,
        "storage_domains": {
            "storage_domain": [{ "id": volume.storage_domain }]
        },
    });
    if let Some(size) = volume.size_gb {
        let bytes = size.checked_mul(BYTES_PER_GIB).ok_or_else(|| {
            Error::InvalidRequest(format!("volume of {size} GiB is too large"))
        })?;
        disk["provisioned_size"] = json!(bytes);
    }
    disk["format"] = json!(volume.format.unwrap_or(types::DiskFormat::Cow));
    if let Some(quota) = &volume.quota {
        disk["quota"] = json!({ "id": quota });
    }
    Ok(json!({
        "bootable": volume.bootable,
        "interface": "virtio",
        "active": true,
        "disk": disk,
    }))
}

/// The engine's built-in empty template.
pub const BLANK_TEMPLATE_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Fetches `url` without authenticating or verifying the server's
/// certificate. Only ever used to show a human what the server presents.
pub async fn fetch_unverified(url: &str) -> Result<String, Error> {
    let client = reqwest::Client::builder()
        .use_rustls_tls()
        .danger_accept_invalid_certs(true)
        .build()?;
    Ok(send_and_check_ok(client.get(url)).await?.text().await?)
}

/// Posts an empty body to a plain-HTTP API URL, without following
/// redirects, and returns the status the engine answered with.
pub async fn probe_plain_http(url: &str) -> Result<u16, Error> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let response = client.post(url).body(Vec::new()).send().await?;
    Ok(response.status().as_u16())
}
