// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Creating a VM together with its interfaces and volumes.
//!
//! Creation is not transactional on the platform side. Once the base VM
//! exists, any failure while attaching devices is answered by destroying the
//! VM again before the error is returned, so callers never see a half-built
//! VM survive a failed [`ComputeResource::create_vm`].

use std::collections::BTreeSet;
use std::sync::Arc;

use ovirt_api_types::{
    BootDevice, DiskFormat, DiskOverride, InterfaceAttachment, InterfaceSpec,
    Network, StorageDomain, Template, Vm, VmCreateRequest, VmSpec,
    VolumeAttachment, VolumeSpec,
};
use ovirt_compute_config::ValidationError;
use slog::{info, warn, Logger};

use crate::capabilities::{volume_within_limits, within_limits};
use crate::inherit::sanitize_inherited;
use crate::platform::{Platform, StorageDomainFilter};
use crate::{ComputeResource, Error};

/// Looks `value` up among `items` by id first, then by name.
pub(crate) fn resolve_reference<'a, T>(
    items: &'a [T],
    kind: &'static str,
    value: &str,
    id_and_name: impl Fn(&'a T) -> (&'a str, &'a str),
) -> Result<&'a str, Error> {
    let value = value.trim();
    let mut by_name = None;
    for item in items {
        let (id, name) = id_and_name(item);
        if id == value {
            return Ok(id);
        }
        if by_name.is_none() && name == value {
            by_name = Some(id);
        }
    }
    by_name.ok_or_else(|| {
        ValidationError::UnknownReference { kind, value: value.to_string() }
            .into()
    })
}

pub(crate) fn resolve_network<'a>(
    networks: &'a [Network],
    value: &str,
) -> Result<&'a str, Error> {
    resolve_reference(networks, "network", value, |n| {
        (n.id.as_str(), n.name.as_str())
    })
}

pub(crate) fn resolve_storage_domain<'a>(
    domains: &'a [StorageDomain],
    value: &str,
) -> Result<&'a str, Error> {
    resolve_reference(domains, "storage domain", value, |sd| {
        (sd.id.as_str(), sd.name.as_str())
    })
}

/// Gives every unnamed interface the name `nic<N>`, with `N` the smallest
/// positive integer whose name is neither in `taken` nor already used in the
/// batch.
pub fn assign_interface_names(
    interfaces: &mut [InterfaceSpec],
    taken: &[String],
) {
    let mut used: BTreeSet<String> = taken.iter().cloned().collect();
    used.extend(
        interfaces
            .iter()
            .filter(|i| !i.name.trim().is_empty())
            .map(|i| i.name.trim().to_string()),
    );
    let mut next = 1;
    for iface in interfaces.iter_mut().filter(|i| i.name.trim().is_empty()) {
        while used.contains(&format!("nic{next}")) {
            next += 1;
        }
        iface.name = format!("nic{next}");
        used.insert(iface.name.clone());
    }
}

/// Shapes a requested volume for attachment. Preallocated volumes are raw
/// and fully allocated; everything else is thin.
pub(crate) fn volume_attachment(
    volume: &VolumeSpec,
    storage_domain: &str,
    quota: Option<&str>,
) -> VolumeAttachment {
    VolumeAttachment {
        size_gb: volume.size_gb,
        storage_domain: storage_domain.to_string(),
        sparse: !volume.preallocate,
        format: volume.preallocate.then_some(DiskFormat::Raw),
        bootable: volume.bootable,
        wipe_after_delete: volume.wipe_after_delete,
        quota: quota.map(String::from),
    }
}

/// Template disks to relocate or preallocate while cloning.
///
/// An existing volume gets an override when it names a storage domain other
/// than the one its template disk lives on, or asks for preallocation. There
/// is nothing to clone without a template.
fn disk_overrides(
    volumes: &[VolumeSpec],
    template: Option<&Template>,
    domains: &[StorageDomain],
) -> Result<Vec<DiskOverride>, Error> {
    let mut overrides = Vec::new();
    let Some(template) = template else {
        return Ok(overrides);
    };
    for volume in volumes {
        let Some(id) = volume.id.as_deref().filter(|_| !volume.is_new())
        else {
            continue;
        };
        if volume.template_placeholder || volume.delete {
            continue;
        }
        let current = template
            .volumes
            .iter()
            .find(|tv| tv.id == id)
            .and_then(|tv| tv.storage_domain.as_deref());
        let wanted = match volume.storage_domain.as_deref() {
            Some(sd) if !sd.trim().is_empty() => {
                Some(resolve_storage_domain(domains, sd)?)
            }
            _ => None,
        };
        let relocate = wanted.is_some() && wanted != current;
        if !relocate && !volume.preallocate {
            continue;
        }
        overrides.push(DiskOverride {
            id: id.to_string(),
            storage_domain: wanted.or(current).map(String::from),
            sparse: volume.preallocate.then_some(false),
            format: volume.preallocate.then_some(DiskFormat::Raw),
        });
    }
    Ok(overrides)
}

impl ComputeResource {
    /// Creates a VM and attaches the requested interfaces and volumes.
    pub async fn create_vm(&self, spec: VmSpec) -> Result<Vm, Error> {
        let mut spec = spec;
        if let Some(user_data) = spec.user_data.take() {
            if !user_data.trim().is_empty() {
                spec.comment = Some(user_data);
            }
        }
        if spec.template.as_deref().map_or(true, |t| t.trim().is_empty()) {
            spec.template = spec.image_id.take();
        }
        within_limits(&spec)?;

        let platform = self.connection().await?;

        let template = match non_blank(&spec.template) {
            Some(id) => Some(platform.get_template(id).await?),
            None => None,
        };
        let instance_type = match non_blank(&spec.instance_type) {
            Some(id) => Some(platform.get_instance_type(id).await?),
            None => None,
        };

        let clusters = platform.list_clusters().await?;
        let cluster = match non_blank(&spec.cluster) {
            Some(c) => resolve_reference(&clusters, "cluster", c, |cl| {
                (cl.id.as_str(), cl.name.as_str())
            })?
            .to_string(),
            None => {
                return Err(ValidationError::InvalidRequest(
                    "a cluster is required".to_string(),
                )
                .into())
            }
        };

        sanitize_inherited(
            &mut spec,
            template.as_ref(),
            instance_type.as_ref(),
        );

        // Storage references are checked before anything is created.
        let wants_storage = spec
            .volumes
            .iter()
            .any(|v| !v.template_placeholder && !v.delete);
        let domains = if wants_storage {
            platform
                .list_storage_domains(&StorageDomainFilter::data_domains(
                    self.config.datacenter.clone(),
                ))
                .await?
        } else {
            Vec::new()
        };
        let disks =
            disk_overrides(&spec.volumes, template.as_ref(), &domains)?;
        let new_volumes =
            self.new_volume_attachments(&spec.volumes, &domains)?;

        let request = VmCreateRequest {
            name: spec.name.clone(),
            cluster: Some(cluster.clone()),
            template: template.as_ref().map(|t| t.id.clone()),
            instance_type: instance_type.as_ref().map(|it| it.id.clone()),
            cores: spec.cores,
            sockets: spec.sockets,
            memory: spec.memory,
            display: Some(
                spec.display.clone().unwrap_or_else(|| self.default_display()),
            ),
            comment: spec.comment.clone(),
            os_type: spec.os_type.clone(),
            first_boot_device: BootDevice::Network,
            quota: self.config.quota.clone(),
            clone: !disks.is_empty(),
            disks,
        };
        let vm = platform.create_vm(&request).await?;
        let log = self.vm_log(&vm);
        info!(log, "created vm"; "name" => &vm.name, "cluster" => &cluster);

        let interfaces: Vec<InterfaceSpec> = spec
            .interfaces
            .iter()
            .filter(|i| !i.template_placeholder && !i.delete)
            .cloned()
            .collect();

        let attached = self
            .attach_devices(&platform, &vm, &cluster, interfaces, new_volumes)
            .await;
        let attached = match attached {
            Ok(()) => platform.get_vm(&vm.id).await.map_err(Error::from),
            Err(e) => Err(e),
        };
        match attached {
            Ok(vm) => Ok(vm),
            Err(e) => Err(compensate(&log, &platform, &vm.id, e).await),
        }
    }

    pub(crate) fn new_volume_attachments(
        &self,
        volumes: &[VolumeSpec],
        domains: &[StorageDomain],
    ) -> Result<Vec<VolumeAttachment>, Error> {
        volumes
            .iter()
            .filter(|v| v.is_new() && !v.template_placeholder && !v.delete)
            .map(|v| {
                let sd = non_blank(&v.storage_domain).ok_or_else(|| {
                    ValidationError::InvalidRequest(
                        "a new volume requires a storage domain".to_string(),
                    )
                })?;
                volume_within_limits(v)?;
                let sd = resolve_storage_domain(domains, sd)?;
                Ok(volume_attachment(v, sd, self.config.quota.as_deref()))
            })
            .collect()
    }

    async fn attach_devices(
        &self,
        platform: &Arc<dyn Platform>,
        vm: &Vm,
        cluster: &str,
        mut interfaces: Vec<InterfaceSpec>,
        volumes: Vec<VolumeAttachment>,
    ) -> Result<(), Error> {
        if !interfaces.is_empty() {
            // Requested interfaces replace whatever the template carried.
            let blocking = Self::blocking_delete(platform);
            for nic in &vm.interfaces {
                platform.destroy_interface(&vm.id, &nic.id, blocking).await?;
            }
            assign_interface_names(&mut interfaces, &[]);
            self.add_interfaces(platform, &vm.id, cluster, &interfaces)
                .await?;
        }
        for volume in &volumes {
            platform.add_volume(&vm.id, volume).await?;
        }
        Ok(())
    }

    /// Adds already named interfaces, resolving their networks within
    /// `cluster`.
    pub(crate) async fn add_interfaces(
        &self,
        platform: &Arc<dyn Platform>,
        vm_id: &str,
        cluster: &str,
        interfaces: &[InterfaceSpec],
    ) -> Result<(), Error> {
        let mut networks: Option<Vec<Network>> = None;
        for iface in interfaces {
            let network = match non_blank(&iface.network) {
                Some(net) => {
                    if networks.is_none() {
                        networks = Some(platform.list_networks(cluster).await?);
                    }
                    let known = networks.as_deref().unwrap_or_default();
                    Some(resolve_network(known, net)?.to_string())
                }
                None => None,
            };
            let vnic_profile = non_blank(&iface.vnic_profile).map(String::from);
            if network.is_none() && vnic_profile.is_none() {
                return Err(ValidationError::InvalidRequest(format!(
                    "interface {} requires a network or vNIC profile",
                    iface.name
                ))
                .into());
            }
            let nic = InterfaceAttachment {
                name: iface.name.clone(),
                network,
                vnic_profile,
            };
            platform.add_interface(vm_id, &nic).await?;
        }
        Ok(())
    }
}

/// Destroys a partially created VM and decides which error the caller sees.
async fn compensate(
    log: &Logger,
    platform: &Arc<dyn Platform>,
    vm_id: &str,
    original: Error,
) -> Error {
    warn!(log, "vm creation failed, destroying it"; "error" => %original);
    match platform.destroy_vm(vm_id).await {
        Ok(()) => original,
        Err(e) if e.is_not_found() => original,
        Err(e) => {
            let cleanup = Error::from(e);
            warn!(log, "cleanup failed"; "error" => %cleanup);
            Error::CleanupFailed {
                vm: vm_id.to_string(),
                original: Box::new(original),
                cleanup: Box::new(cleanup),
            }
        }
    }
}

pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
