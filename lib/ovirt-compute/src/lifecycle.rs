// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Finding, starting and destroying VMs, and the inventory listings a
//! controller offers its users.

use ovirt_api_types::{
    Cluster, InstanceType, Network, StorageDomain, Template, Vm,
};
use slog::{debug, info};

use crate::platform::StorageDomainFilter;
use crate::provision::resolve_reference;
use crate::{ComputeResource, Error};

/// Returns `true` if a VM comment carries cloud-init user data rather than
/// a plain note.
pub fn is_cloud_init(comment: &str) -> bool {
    comment.contains("#cloud-config")
        || comment.lines().any(|line| line.starts_with("#!/"))
}

impl ComputeResource {
    pub async fn find_vm(&self, id: &str) -> Result<Vm, Error> {
        let platform = self.connection().await?;
        Ok(platform.get_vm(id).await?)
    }

    /// Destroys VM `id`. A VM that is already gone counts as destroyed.
    pub async fn destroy_vm(&self, id: &str) -> Result<(), Error> {
        let platform = self.connection().await?;
        match platform.destroy_vm(id).await {
            Ok(()) => {
                info!(self.log, "vm destroyed"; "vm" => id);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(self.log, "vm already gone"; "vm" => id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Starts VM `id` and waits for the platform to accept the start.
    ///
    /// A comment holding cloud-init data is handed to the guest as user data
    /// and then cleared, so the next start boots without it.
    pub async fn start_vm(&self, id: &str) -> Result<(), Error> {
        let platform = self.connection().await?;
        let mut vm = platform.get_vm(id).await?;
        let log = self.vm_log(&vm);

        let user_data = vm.comment.clone().filter(|c| is_cloud_init(c));
        match user_data {
            Some(user_data) => {
                platform.start_vm_with_cloud_init(id, &user_data, true).await?;
                vm.comment = Some(String::new());
                platform.update_vm(&vm).await?;
                info!(log, "vm started with cloud-init";
                    "bytes" => user_data.len());
            }
            None => {
                platform.start_vm(id, true).await?;
                info!(log, "vm started");
            }
        }
        Ok(())
    }

    /// Datacenters as `(name, id)` pairs.
    pub async fn datacenters(&self) -> Result<Vec<(String, String)>, Error> {
        let platform = self.connection().await?;
        Ok(platform
            .list_datacenters()
            .await?
            .into_iter()
            .map(|dc| (dc.name, dc.id))
            .collect())
    }

    /// Clusters in the configured datacenter, or all of them when no
    /// datacenter is configured.
    pub async fn clusters(&self) -> Result<Vec<Cluster>, Error> {
        let platform = self.connection().await?;
        let clusters = platform.list_clusters().await?;
        Ok(match &self.config.datacenter {
            Some(dc) => clusters
                .into_iter()
                .filter(|c| c.datacenter.as_ref().map_or(true, |d| d == dc))
                .collect(),
            None => clusters,
        })
    }

    pub async fn templates(&self) -> Result<Vec<Template>, Error> {
        Ok(self.connection().await?.list_templates().await?)
    }

    pub async fn instance_types(&self) -> Result<Vec<InstanceType>, Error> {
        Ok(self.connection().await?.list_instance_types().await?)
    }

    /// Networks of a cluster given by name or id.
    pub async fn networks(&self, cluster: &str) -> Result<Vec<Network>, Error> {
        let platform = self.connection().await?;
        let clusters = platform.list_clusters().await?;
        let cluster = resolve_reference(&clusters, "cluster", cluster, |c| {
            (c.id.as_str(), c.name.as_str())
        })?;
        Ok(platform.list_networks(cluster).await?)
    }

    /// Data storage domains of the configured datacenter.
    pub async fn storage_domains(&self) -> Result<Vec<StorageDomain>, Error> {
        let platform = self.connection().await?;
        let filter =
            StorageDomainFilter::data_domains(self.config.datacenter.clone());
        Ok(platform.list_storage_domains(&filter).await?)
    }
}
