// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compute resource adapter for oVirt.
//!
//! A [`ComputeResource`] turns VM specifications from a provisioning
//! controller into calls on the platform and reconciles what the platform
//! reports back. All remote access goes through one memoized connection
//! (see [`connection`]); the calls themselves are behind the
//! [`platform::Platform`] trait, implemented over REST in [`rest`].

use std::sync::Arc;

use ovirt_api_types::{DisplaySpec, Vm};
use ovirt_compute_config::{ComputeResourceConfig, Config, OsCapability};
use slog::{o, Logger};

pub mod capabilities;
pub mod connection;
pub mod console;
mod error;
pub mod inherit;
pub mod lifecycle;
pub mod os_type;
pub mod platform;
pub mod provision;
pub mod reconcile;
pub mod rest;
pub mod trust;

#[cfg(test)]
mod fake;

pub use error::Error;

use connection::{ConnectionManager, ConnectionState};
use platform::{ApiVersion, Connector, Platform};
use trust::TrustState;

/// One configured oVirt endpoint.
pub struct ComputeResource {
    config: ComputeResourceConfig,
    connection: ConnectionManager,
    os_capability: tokio::sync::Mutex<OsCapability>,
    log: Logger,
}

impl ComputeResource {
    /// Validates `config` and sets up a resource. Nothing is dialed until
    /// the first remote operation.
    pub fn new(
        config: &Config,
        connector: Arc<dyn Connector>,
        log: Logger,
    ) -> Result<Self, Error> {
        let config = config.validate()?;
        let log = log.new(o!("compute_resource" => config.url.clone()));
        let connection =
            ConnectionManager::new(&config, connector, log.clone());
        let os_capability =
            tokio::sync::Mutex::new(config.operating_systems.clone());
        Ok(Self { config, connection, os_capability, log })
    }

    pub fn config(&self) -> &ComputeResourceConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn trust_state(&self) -> TrustState {
        self.connection.trust_state()
    }

    /// The live platform handle, dialing on first use.
    pub async fn connection(&self) -> Result<Arc<dyn Platform>, Error> {
        self.connection.connection().await
    }

    /// Re-dials and probes the platform. With `force`, a certificate that
    /// does not verify replaces the pinned one.
    pub async fn test_connection(&self, force: bool) -> Result<(), Error> {
        self.connection.test_connection(force).await
    }

    /// Fetches and pins the platform's CA bundle; see
    /// [`ConnectionManager::pin_remote_certificate`].
    pub async fn pin_remote_certificate(
        &self,
        force: bool,
    ) -> Result<String, Error> {
        self.connection.pin_remote_certificate(force).await
    }

    /// The platform's CA certificate for display, or an empty string.
    pub async fn ca_certificate(&self) -> String {
        self.connection.ca_certificate().await
    }

    pub async fn api_version(&self) -> Result<ApiVersion, Error> {
        Ok(self.connection().await?.api_version())
    }

    /// The display block a VM gets unless it asks for another.
    pub fn default_display(&self) -> DisplaySpec {
        DisplaySpec {
            display_type: self.config.display_type,
            keyboard_layout: self.config.keyboard_layout.clone(),
            port: ovirt_api_types::DISPLAY_PORT_UNSET,
            monitors: 1,
        }
    }

    /// Copies the state this resource learned (pinned trust, OS cache, API
    /// version) into `config` so it can be saved.
    pub async fn persist_into(&self, config: &mut Config) {
        let trust = self.trust_state();
        if trust.pinned.is_some() {
            config.public_key = trust.pinned;
        }
        config.operating_systems = self.os_capability.lock().await.clone();
        if let ConnectionState::Connected = self.connection_state() {
            if let Ok(version) = self.api_version().await {
                config.api_version = Some(version.to_string());
            }
        }
    }

    // Deletions must wait for completion on engines that lose track of
    // asynchronous ones.
    fn blocking_delete(platform: &Arc<dyn Platform>) -> bool {
        platform.api_version().requires_blocking_delete()
    }

    fn vm_log(&self, vm: &Vm) -> Logger {
        self.log.new(o!("vm" => vm.id.clone()))
    }
}
