// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Applying updated VM attributes to an existing VM.
//!
//! Interface and volume changes are applied one call at a time. The first
//! failing call aborts the update and is returned as is; changes already
//! made stay made.

use std::collections::BTreeSet;
use std::sync::Arc;

use ovirt_api_types::{InterfaceSpec, Vm, VmSpec, VolumeSpec};
use slog::{debug, info};

use crate::platform::{Platform, StorageDomainFilter};
use crate::provision::{assign_interface_names, non_blank};
use crate::{ComputeResource, Error};

fn scalars(spec: &VmSpec) -> VmSpec {
    VmSpec { interfaces: Vec::new(), volumes: Vec::new(), ..spec.clone() }
}

/// Returns `true` if saving `new` over `old` needs a remote call.
///
/// Besides any change to scalar attributes, that is the case when an
/// interface or volume entry is new or marked for deletion. Placeholder rows
/// never count.
pub fn update_required(old: &VmSpec, new: &VmSpec) -> bool {
    scalars(old) != scalars(new)
        || new.interfaces.iter().any(InterfaceSpec::requests_change)
        || new.volumes.iter().any(VolumeSpec::requests_change)
}

/// Overlays the attributes present in `attrs` onto `vm`.
pub fn merge_attributes(vm: &mut Vm, attrs: &VmSpec) {
    if let Some(name) = non_blank(&attrs.name) {
        vm.name = name.to_string();
    }
    if attrs.cores.is_some() {
        vm.cores = attrs.cores;
    }
    if attrs.sockets.is_some() {
        vm.sockets = attrs.sockets;
    }
    if attrs.memory.is_some() {
        vm.memory = attrs.memory;
    }
    if attrs.comment.is_some() {
        vm.comment = attrs.comment.clone();
    }
    if let Some(os_type) = non_blank(&attrs.os_type) {
        vm.os_type = Some(os_type.to_string());
    }
    if attrs.display.is_some() {
        vm.display_settings = attrs.display.clone();
    }
}

/// The scalar attributes of `vm` in request form.
pub fn vm_attributes(vm: &Vm) -> VmSpec {
    VmSpec {
        name: Some(vm.name.clone()),
        cluster: vm.cluster.clone(),
        template: vm.template.clone(),
        cores: vm.cores,
        sockets: vm.sockets,
        memory: vm.memory,
        comment: vm.comment.clone(),
        os_type: vm.os_type.clone(),
        display: vm.display_settings.clone(),
        ..Default::default()
    }
}

/// Returns `true` if saving `attrs` over the current state of `vm` needs a
/// remote call. Attributes `attrs` leaves out keep their current value.
pub fn save_required(vm: &Vm, attrs: &VmSpec) -> bool {
    let mut merged = vm.clone();
    merge_attributes(&mut merged, attrs);
    let new = VmSpec {
        interfaces: attrs.interfaces.clone(),
        volumes: attrs.volumes.clone(),
        ..vm_attributes(&merged)
    };
    update_required(&vm_attributes(vm), &new)
}

impl ComputeResource {
    /// Applies `attrs` to VM `id`: interface and volume diffs first, then the
    /// scalar attributes.
    pub async fn save_vm(&self, id: &str, attrs: &VmSpec) -> Result<Vm, Error> {
        let platform = self.connection().await?;
        let mut vm = platform.get_vm(id).await?;
        let log = self.vm_log(&vm);
        merge_attributes(&mut vm, attrs);

        let blocking = Self::blocking_delete(&platform);
        self.apply_interface_diff(&platform, &vm, &attrs.interfaces, blocking)
            .await?;
        self.apply_volume_diff(&platform, &vm, &attrs.volumes, blocking)
            .await?;

        let vm = platform.update_vm(&vm).await?;
        info!(log, "vm updated");
        Ok(vm)
    }

    async fn apply_interface_diff(
        &self,
        platform: &Arc<dyn Platform>,
        vm: &Vm,
        entries: &[InterfaceSpec],
        blocking: bool,
    ) -> Result<(), Error> {
        let entries = entries.iter().filter(|e| !e.template_placeholder);

        let mut destroyed = BTreeSet::new();
        for entry in entries.clone().filter(|e| e.delete) {
            if let Some(nic_id) = non_blank(&entry.id) {
                debug!(self.log, "removing interface"; "vm" => &vm.id,
                    "nic" => nic_id);
                platform.destroy_interface(&vm.id, nic_id, blocking).await?;
                destroyed.insert(nic_id);
            }
        }

        let mut added: Vec<InterfaceSpec> =
            entries.filter(|e| e.is_new() && !e.delete).cloned().collect();
        if added.is_empty() {
            return Ok(());
        }
        let taken: Vec<String> = vm
            .interfaces
            .iter()
            .filter(|i| !destroyed.contains(i.id.as_str()))
            .map(|i| i.name.clone())
            .collect();
        assign_interface_names(&mut added, &taken);
        let cluster = vm.cluster.as_deref().unwrap_or_default();
        self.add_interfaces(platform, &vm.id, cluster, &added).await
    }

    async fn apply_volume_diff(
        &self,
        platform: &Arc<dyn Platform>,
        vm: &Vm,
        entries: &[VolumeSpec],
        blocking: bool,
    ) -> Result<(), Error> {
        for entry in entries.iter().filter(|e| !e.template_placeholder) {
            if !entry.delete {
                continue;
            }
            if let Some(volume_id) = non_blank(&entry.id) {
                debug!(self.log, "removing volume"; "vm" => &vm.id,
                    "volume" => volume_id);
                platform.destroy_volume(&vm.id, volume_id, blocking).await?;
            }
        }

        let any_new = entries
            .iter()
            .any(|e| e.is_new() && !e.template_placeholder && !e.delete);
        if !any_new {
            return Ok(());
        }
        let domains = platform
            .list_storage_domains(&StorageDomainFilter::data_domains(
                self.config.datacenter.clone(),
            ))
            .await?;
        for volume in self.new_volume_attachments(entries, &domains)? {
            platform.add_volume(&vm.id, &volume).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{blank_vm, GIB};
    use crate::platform::{ApiVersion, RemoteError};
    use crate::test_support::resource;
    use ovirt_api_types::{VmInterface, VmVolume};
    use ovirt_compute_config::ValidationError;

    fn placeholder_nic() -> InterfaceSpec {
        InterfaceSpec { template_placeholder: true, ..Default::default() }
    }

    fn placeholder_volume() -> VolumeSpec {
        VolumeSpec { template_placeholder: true, ..Default::default() }
    }

    fn existing_vm() -> Vm {
        let mut vm = blank_vm("vm-9");
        vm.interfaces = vec![
            VmInterface {
                id: "nic-a".to_string(),
                name: "nic1".to_string(),
                network: Some("net-1".to_string()),
                mac: None,
            },
            VmInterface {
                id: "nic-b".to_string(),
                name: "nic2".to_string(),
                network: Some("net-1".to_string()),
                mac: None,
            },
        ];
        vm.volumes = vec![VmVolume {
            id: "disk-a".to_string(),
            size_gb: Some(10),
            storage_domain: Some("sd-1".to_string()),
            bootable: true,
        }];
        vm
    }

    #[test]
    fn placeholders_alone_need_no_update() {
        let old = VmSpec { cores: Some(2), ..Default::default() };
        let new = VmSpec {
            interfaces: vec![placeholder_nic()],
            volumes: vec![placeholder_volume()],
            ..old.clone()
        };
        assert!(!update_required(&old, &new));
    }

    #[test]
    fn new_or_deleted_entries_need_an_update() {
        let old = VmSpec::default();
        let existing = InterfaceSpec {
            id: Some("nic-a".to_string()),
            ..Default::default()
        };
        let unchanged = VmSpec {
            interfaces: vec![existing.clone()],
            ..Default::default()
        };
        assert!(!update_required(&old, &unchanged));

        let deleted = VmSpec {
            interfaces: vec![InterfaceSpec { delete: true, ..existing }],
            ..Default::default()
        };
        assert!(update_required(&old, &deleted));

        let added = VmSpec {
            volumes: vec![VolumeSpec {
                size_gb: Some(1),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(update_required(&old, &added));

        let scalar = VmSpec { memory: Some(GIB), ..Default::default() };
        assert!(update_required(&old, &scalar));
    }

    #[test]
    fn merge_only_touches_given_fields() {
        let mut vm = existing_vm();
        merge_attributes(
            &mut vm,
            &VmSpec {
                memory: Some(4 * GIB),
                name: Some("  ".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(vm.memory, Some(4 * GIB));
        assert_eq!(vm.name, "vm-9");
        assert_eq!(vm.cores, Some(1));
    }

    #[test]
    fn save_is_skipped_when_nothing_changes() {
        let mut vm = existing_vm();
        vm.memory = Some(2 * GIB);

        let same = VmSpec {
            name: Some(vm.name.clone()),
            memory: Some(2 * GIB),
            cores: vm.cores,
            interfaces: vec![placeholder_nic()],
            volumes: vec![placeholder_volume()],
            ..Default::default()
        };
        assert!(!save_required(&vm, &same));
        assert!(!save_required(&vm, &VmSpec::default()));

        let bigger = VmSpec { memory: Some(4 * GIB), ..Default::default() };
        assert!(save_required(&vm, &bigger));

        let new_nic = VmSpec {
            interfaces: vec![InterfaceSpec {
                network: Some("ovirtmgmt".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(save_required(&vm, &new_nic));
    }

    #[tokio::test]
    async fn applies_diffs_then_persists() {
        let (resource, platform) = resource();
        platform.insert_vm(existing_vm());
        let attrs = VmSpec {
            memory: Some(2 * GIB),
            interfaces: vec![
                InterfaceSpec {
                    id: Some("nic-a".to_string()),
                    delete: true,
                    ..Default::default()
                },
                InterfaceSpec {
                    network: Some("storage".to_string()),
                    ..Default::default()
                },
                placeholder_nic(),
            ],
            volumes: vec![
                VolumeSpec {
                    id: Some("disk-a".to_string()),
                    delete: true,
                    ..Default::default()
                },
                VolumeSpec {
                    size_gb: Some(5),
                    storage_domain: Some("data1".to_string()),
                    ..Default::default()
                },
                placeholder_volume(),
            ],
            ..Default::default()
        };

        let vm = resource.save_vm("vm-9", &attrs).await.unwrap();
        assert_eq!(vm.memory, Some(2 * GIB));
        let names: Vec<&str> =
            vm.interfaces.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["nic2", "nic1"]);
        assert_eq!(vm.volumes.len(), 1);
        assert_eq!(vm.volumes[0].storage_domain.as_deref(), Some("sd-1"));

        let inv = platform.inventory();
        assert_eq!(inv.added_interfaces[0].network.as_deref(), Some("net-2"));
        assert_eq!(inv.added_volumes[0].quota.as_deref(), Some("quota-1"));
        assert!(!inv.added_volumes[0].bootable);
        let mutations: Vec<&str> = inv
            .calls
            .iter()
            .map(String::as_str)
            .filter(|c| {
                c.starts_with("destroy_")
                    || c.starts_with("add_")
                    || c.starts_with("update_")
            })
            .collect();
        assert_eq!(
            mutations,
            [
                "destroy_interface vm-9 nic-a blocking=false",
                "add_interface vm-9 nic1",
                "destroy_volume vm-9 disk-a blocking=false",
                "add_volume vm-9",
                "update_vm vm-9",
            ]
        );
    }

    #[tokio::test]
    async fn old_engines_delete_synchronously() {
        let (resource, platform) = resource();
        platform.inventory().version = ApiVersion::new(3, 0);
        platform.insert_vm(existing_vm());
        let attrs = VmSpec {
            volumes: vec![VolumeSpec {
                id: Some("disk-a".to_string()),
                delete: true,
                ..Default::default()
            }],
            ..Default::default()
        };
        resource.save_vm("vm-9", &attrs).await.unwrap();
        assert!(platform
            .calls()
            .contains(&"destroy_volume vm-9 disk-a blocking=true".to_string()));
    }

    #[tokio::test]
    async fn first_failure_aborts_without_rollback() {
        let (resource, platform) = resource();
        platform.insert_vm(existing_vm());
        platform.fail_on(
            "add_interface",
            RemoteError::Status { status: 400, detail: "bad".to_string() },
        );
        let attrs = VmSpec {
            interfaces: vec![
                InterfaceSpec {
                    id: Some("nic-b".to_string()),
                    delete: true,
                    ..Default::default()
                },
                InterfaceSpec {
                    network: Some("ovirtmgmt".to_string()),
                    ..Default::default()
                },
            ],
            volumes: vec![VolumeSpec {
                size_gb: Some(5),
                storage_domain: Some("data1".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = resource.save_vm("vm-9", &attrs).await.unwrap_err();
        assert!(matches!(err, Error::RemoteApi { status: Some(400), .. }));

        let vm = platform.vm("vm-9").unwrap();
        assert_eq!(vm.interfaces.len(), 1);
        let calls = platform.calls();
        assert!(!calls.iter().any(|c| c.starts_with("add_volume")));
        assert!(!calls.iter().any(|c| c.starts_with("update_vm")));
    }

    #[tokio::test]
    async fn oversized_volume_is_rejected_before_attaching() {
        let (resource, platform) = resource();
        platform.insert_vm(existing_vm());
        let attrs = VmSpec {
            volumes: vec![VolumeSpec {
                size_gb: Some(u64::MAX / 1024),
                storage_domain: Some("data1".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = resource.save_vm("vm-9", &attrs).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidRequest(_))
        ));
        assert!(!platform.calls().iter().any(|c| c.starts_with("add_volume")));
    }

    #[tokio::test]
    async fn missing_vm_is_not_found() {
        let (resource, _platform) = resource();
        let err = resource.save_vm("vm-404", &VmSpec::default()).await;
        assert!(err.unwrap_err().is_not_found());
    }
}
