// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory platform used by the unit tests.
//!
//! Every call is recorded as a short string (`"add_volume vm-1"`) so tests
//! can assert on ordering, and any operation can be made to fail with
//! [`FakePlatform::fail_on`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ovirt_api_types::{
    Cluster, Datacenter, InstanceType, InterfaceAttachment, Network,
    OsDescriptor, StorageDomain, Template, TemplateVolume, Vm,
    VmCreateRequest, VmInterface, VmStatus, VmVolume, VolumeAttachment,
};

use crate::platform::{
    ApiVersion, Connector, DialParams, Platform, RemoteError,
    StorageDomainFilter,
};

pub(crate) const GIB: u64 = 1024 * 1024 * 1024;

fn not_found(what: &str) -> RemoteError {
    RemoteError::Status { status: 404, detail: format!("{what} not found") }
}

pub(crate) struct Inventory {
    pub version: ApiVersion,
    pub os_support: bool,
    pub datacenters: Vec<Datacenter>,
    pub clusters: Vec<Cluster>,
    /// Networks per cluster id.
    pub networks: BTreeMap<String, Vec<Network>>,
    pub templates: Vec<Template>,
    /// NICs a VM inherits from a template, per template id.
    pub template_nics: BTreeMap<String, Vec<VmInterface>>,
    pub instance_types: Vec<InstanceType>,
    pub storage_domains: Vec<StorageDomain>,
    pub operating_systems: Vec<OsDescriptor>,
    pub vms: BTreeMap<String, Vm>,

    pub calls: Vec<String>,
    pub created: Vec<VmCreateRequest>,
    pub added_interfaces: Vec<InterfaceAttachment>,
    pub added_volumes: Vec<VolumeAttachment>,
    pub updated: Vec<Vm>,
    failures: BTreeMap<String, RemoteError>,
    next_id: u64,
}

impl Default for Inventory {
    fn default() -> Self {
        let os = |name: &str| OsDescriptor {
            id: name.to_string(),
            name: name.to_string(),
            href: format!("/ovirt-engine/api/operatingsystems/{name}"),
        };
        let sd = |id: &str, name: &str, role: &str| StorageDomain {
            id: id.to_string(),
            name: name.to_string(),
            role: role.to_string(),
            datacenter: Some("dc-1".to_string()),
        };
        let net = |id: &str, name: &str| Network {
            id: id.to_string(),
            name: name.to_string(),
        };
        Self {
            version: ApiVersion::new(4, 4),
            os_support: true,
            datacenters: vec![Datacenter {
                id: "dc-1".to_string(),
                name: "Default".to_string(),
            }],
            clusters: vec![Cluster {
                id: "cl-1".to_string(),
                name: "Default".to_string(),
                datacenter: Some("dc-1".to_string()),
            }],
            networks: BTreeMap::from([(
                "cl-1".to_string(),
                vec![net("net-1", "ovirtmgmt"), net("net-2", "storage")],
            )]),
            templates: vec![Template {
                id: "tmpl-1".to_string(),
                name: "centos-9".to_string(),
                cores: Some(2),
                memory: Some(2 * GIB),
                volumes: vec![TemplateVolume {
                    id: "tdisk-1".to_string(),
                    storage_domain: Some("sd-1".to_string()),
                }],
            }],
            template_nics: BTreeMap::from([(
                "tmpl-1".to_string(),
                vec![VmInterface {
                    id: "tnic-1".to_string(),
                    name: "nic1".to_string(),
                    network: Some("net-1".to_string()),
                    mac: None,
                }],
            )]),
            instance_types: vec![InstanceType {
                id: "it-1".to_string(),
                name: "Small".to_string(),
                cores: Some(1),
                memory: Some(4 * GIB),
            }],
            storage_domains: vec![
                sd("sd-1", "data1", "data"),
                sd("sd-2", "data2", "data"),
                sd("sd-3", "iso", "iso"),
            ],
            operating_systems: vec![
                os("other_linux"),
                os("rhel_8x64"),
                os("rhel_9x64"),
                os("debian_12"),
            ],
            vms: BTreeMap::new(),
            calls: Vec::new(),
            created: Vec::new(),
            added_interfaces: Vec::new(),
            added_volumes: Vec::new(),
            updated: Vec::new(),
            failures: BTreeMap::new(),
            next_id: 0,
        }
    }
}

impl Inventory {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

#[derive(Default)]
pub(crate) struct FakePlatform {
    inner: Mutex<Inventory>,
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inventory(&self) -> MutexGuard<'_, Inventory> {
        self.inner.lock().unwrap()
    }

    /// Makes every later call to `op` fail with `err`.
    pub fn fail_on(&self, op: &str, err: RemoteError) {
        self.inventory().failures.insert(op.to_string(), err);
    }

    pub fn calls(&self) -> Vec<String> {
        self.inventory().calls.clone()
    }

    pub fn vm(&self, id: &str) -> Option<Vm> {
        self.inventory().vms.get(id).cloned()
    }

    /// Adds a VM directly, bypassing the create path.
    pub fn insert_vm(&self, vm: Vm) {
        self.inventory().vms.insert(vm.id.clone(), vm);
    }

    // Records the call and returns the injected failure, if any.
    fn enter(
        &self,
        op: &str,
        args: &str,
    ) -> Result<MutexGuard<'_, Inventory>, RemoteError> {
        let mut inv = self.inventory();
        let call = if args.is_empty() {
            op.to_string()
        } else {
            format!("{op} {args}")
        };
        inv.calls.push(call);
        if let Some(err) = inv.failures.get(op).cloned() {
            return Err(err);
        }
        Ok(inv)
    }
}

pub(crate) fn blank_vm(id: &str) -> Vm {
    Vm {
        id: id.to_string(),
        name: id.to_string(),
        status: VmStatus::Down,
        cluster: Some("cl-1".to_string()),
        template: None,
        cores: Some(1),
        sockets: Some(1),
        memory: Some(GIB),
        comment: None,
        os_type: None,
        display_settings: None,
        display: None,
        interfaces: Vec::new(),
        volumes: Vec::new(),
    }
}

#[async_trait::async_trait]
impl Platform for FakePlatform {
    fn api_version(&self) -> ApiVersion {
        self.inventory().version
    }

    fn supports_operating_systems(&self) -> bool {
        self.inventory().os_support
    }

    async fn list_datacenters(&self) -> Result<Vec<Datacenter>, RemoteError> {
        Ok(self.enter("list_datacenters", "")?.datacenters.clone())
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>, RemoteError> {
        Ok(self.enter("list_clusters", "")?.clusters.clone())
    }

    async fn list_networks(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<Network>, RemoteError> {
        let inv = self.enter("list_networks", cluster_id)?;
        Ok(inv.networks.get(cluster_id).cloned().unwrap_or_default())
    }

    async fn list_templates(&self) -> Result<Vec<Template>, RemoteError> {
        Ok(self.enter("list_templates", "")?.templates.clone())
    }

    async fn list_instance_types(
        &self,
    ) -> Result<Vec<InstanceType>, RemoteError> {
        Ok(self.enter("list_instance_types", "")?.instance_types.clone())
    }

    async fn list_storage_domains(
        &self,
        filter: &StorageDomainFilter,
    ) -> Result<Vec<StorageDomain>, RemoteError> {
        let inv = self.enter("list_storage_domains", "")?;
        Ok(inv
            .storage_domains
            .iter()
            .filter(|sd| filter.matches(sd))
            .cloned()
            .collect())
    }

    async fn list_operating_systems(
        &self,
    ) -> Result<Vec<OsDescriptor>, RemoteError> {
        let inv = self.enter("list_operating_systems", "")?;
        if !inv.os_support {
            return Err(not_found("operatingsystems"));
        }
        Ok(inv.operating_systems.clone())
    }

    async fn get_template(&self, id: &str) -> Result<Template, RemoteError> {
        let inv = self.enter("get_template", id)?;
        inv.templates
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| not_found("template"))
    }

    async fn get_instance_type(
        &self,
        id: &str,
    ) -> Result<InstanceType, RemoteError> {
        let inv = self.enter("get_instance_type", id)?;
        inv.instance_types
            .iter()
            .find(|it| it.id == id)
            .cloned()
            .ok_or_else(|| not_found("instance type"))
    }

    async fn get_vm(&self, id: &str) -> Result<Vm, RemoteError> {
        let inv = self.enter("get_vm", id)?;
        inv.vms.get(id).cloned().ok_or_else(|| not_found("vm"))
    }

    async fn create_vm(
        &self,
        request: &VmCreateRequest,
    ) -> Result<Vm, RemoteError> {
        let mut inv = self.enter("create_vm", "")?;
        inv.created.push(request.clone());
        let id = inv.next_id("vm");
        let mut vm = blank_vm(&id);
        vm.name = request.name.clone().unwrap_or_else(|| id.clone());
        vm.cluster = request.cluster.clone();
        vm.template = request.template.clone();
        vm.cores = request.cores;
        vm.sockets = request.sockets;
        vm.memory = request.memory;
        vm.comment = request.comment.clone();
        vm.os_type = request.os_type.clone();
        vm.display_settings = request.display.clone();
        if let Some(template) = &request.template {
            vm.interfaces =
                inv.template_nics.get(template).cloned().unwrap_or_default();
            let volumes = inv
                .templates
                .iter()
                .find(|t| &t.id == template)
                .map(|t| t.volumes.clone())
                .unwrap_or_default();
            vm.volumes = volumes
                .into_iter()
                .map(|tv| VmVolume {
                    id: tv.id,
                    size_gb: Some(10),
                    storage_domain: tv.storage_domain,
                    bootable: true,
                })
                .collect();
        }
        inv.vms.insert(id, vm.clone());
        Ok(vm)
    }

    async fn update_vm(&self, vm: &Vm) -> Result<Vm, RemoteError> {
        let mut inv = self.enter("update_vm", &vm.id)?;
        inv.updated.push(vm.clone());
        let stored = inv.vms.get_mut(&vm.id).ok_or_else(|| not_found("vm"))?;
        stored.name = vm.name.clone();
        stored.cores = vm.cores;
        stored.sockets = vm.sockets;
        stored.memory = vm.memory;
        stored.comment = vm.comment.clone();
        stored.os_type = vm.os_type.clone();
        stored.display_settings = vm.display_settings.clone();
        Ok(stored.clone())
    }

    async fn destroy_vm(&self, id: &str) -> Result<(), RemoteError> {
        let mut inv = self.enter("destroy_vm", id)?;
        inv.vms.remove(id).map(|_| ()).ok_or_else(|| not_found("vm"))
    }

    async fn start_vm(
        &self,
        id: &str,
        blocking: bool,
    ) -> Result<(), RemoteError> {
        let mut inv =
            self.enter("start_vm", &format!("{id} blocking={blocking}"))?;
        let vm = inv.vms.get_mut(id).ok_or_else(|| not_found("vm"))?;
        vm.status = VmStatus::Up;
        Ok(())
    }

    async fn start_vm_with_cloud_init(
        &self,
        id: &str,
        user_data: &str,
        blocking: bool,
    ) -> Result<(), RemoteError> {
        let mut inv = self.enter(
            "start_vm_with_cloud_init",
            &format!("{id} blocking={blocking} bytes={}", user_data.len()),
        )?;
        let vm = inv.vms.get_mut(id).ok_or_else(|| not_found("vm"))?;
        vm.status = VmStatus::Up;
        Ok(())
    }

    async fn add_interface(
        &self,
        vm_id: &str,
        nic: &InterfaceAttachment,
    ) -> Result<VmInterface, RemoteError> {
        let mut inv =
            self.enter("add_interface", &format!("{vm_id} {}", nic.name))?;
        inv.added_interfaces.push(nic.clone());
        let iface = VmInterface {
            id: inv.next_id("nic"),
            name: nic.name.clone(),
            network: nic.network.clone(),
            mac: None,
        };
        let vm = inv.vms.get_mut(vm_id).ok_or_else(|| not_found("vm"))?;
        vm.interfaces.push(iface.clone());
        Ok(iface)
    }

    async fn destroy_interface(
        &self,
        vm_id: &str,
        nic_id: &str,
        blocking: bool,
    ) -> Result<(), RemoteError> {
        let mut inv = self.enter(
            "destroy_interface",
            &format!("{vm_id} {nic_id} blocking={blocking}"),
        )?;
        let vm = inv.vms.get_mut(vm_id).ok_or_else(|| not_found("vm"))?;
        let before = vm.interfaces.len();
        vm.interfaces.retain(|i| i.id != nic_id);
        if vm.interfaces.len() == before {
            return Err(not_found("nic"));
        }
        Ok(())
    }

    async fn add_volume(
        &self,
        vm_id: &str,
        volume: &VolumeAttachment,
    ) -> Result<VmVolume, RemoteError> {
        let mut inv = self.enter("add_volume", vm_id)?;
        inv.added_volumes.push(volume.clone());
        let vol = VmVolume {
            id: inv.next_id("disk"),
            size_gb: volume.size_gb,
            storage_domain: Some(volume.storage_domain.clone()),
            bootable: volume.bootable,
        };
        let vm = inv.vms.get_mut(vm_id).ok_or_else(|| not_found("vm"))?;
        vm.volumes.push(vol.clone());
        Ok(vol)
    }

    async fn destroy_volume(
        &self,
        vm_id: &str,
        volume_id: &str,
        blocking: bool,
    ) -> Result<(), RemoteError> {
        let mut inv = self.enter(
            "destroy_volume",
            &format!("{vm_id} {volume_id} blocking={blocking}"),
        )?;
        let vm = inv.vms.get_mut(vm_id).ok_or_else(|| not_found("vm"))?;
        let before = vm.volumes.len();
        vm.volumes.retain(|v| v.id != volume_id);
        if vm.volumes.len() == before {
            return Err(not_found("disk"));
        }
        Ok(())
    }

    async fn console_ticket(&self, vm_id: &str) -> Result<String, RemoteError> {
        let inv = self.enter("console_ticket", vm_id)?;
        if !inv.vms.contains_key(vm_id) {
            return Err(not_found("vm"));
        }
        Ok(format!("ticket-{vm_id}"))
    }
}

/// Dials a [`FakePlatform`].
pub(crate) struct FakeConnector {
    platform: Arc<FakePlatform>,
    dial_delay: Duration,
    dial_failures: Mutex<VecDeque<RemoteError>>,
    ca_bodies: Mutex<VecDeque<String>>,
    probe: Result<u16, RemoteError>,
    dials: AtomicUsize,
    fetched: Mutex<Vec<String>>,
    last_params: Mutex<Option<DialParams>>,
}

impl FakeConnector {
    pub fn new(platform: Arc<FakePlatform>) -> Self {
        Self {
            platform,
            dial_delay: Duration::ZERO,
            dial_failures: Mutex::new(VecDeque::new()),
            ca_bodies: Mutex::new(VecDeque::new()),
            probe: Ok(406),
            dials: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
            last_params: Mutex::new(None),
        }
    }

    pub fn with_dial_delay(mut self, delay: Duration) -> Self {
        self.dial_delay = delay;
        self
    }

    /// The next dials fail with these errors, in order.
    pub fn failing_dials(self, errors: Vec<RemoteError>) -> Self {
        *self.dial_failures.lock().unwrap() = errors.into();
        self
    }

    /// Bodies returned by successive unverified fetches; once exhausted,
    /// fetches fail with a 404.
    pub fn with_ca_bodies(self, bodies: Vec<String>) -> Self {
        *self.ca_bodies.lock().unwrap() = bodies.into();
        self
    }

    pub fn with_probe(mut self, probe: Result<u16, RemoteError>) -> Self {
        self.probe = probe;
        self
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn last_params(&self) -> Option<DialParams> {
        self.last_params.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Connector for FakeConnector {
    async fn dial(
        &self,
        params: &DialParams,
    ) -> Result<Arc<dyn Platform>, RemoteError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap() = Some(params.clone());
        if !self.dial_delay.is_zero() {
            tokio::time::sleep(self.dial_delay).await;
        }
        if let Some(err) = self.dial_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let platform: Arc<dyn Platform> = self.platform.clone();
        Ok(platform)
    }

    async fn fetch_unverified(&self, url: &str) -> Result<String, RemoteError> {
        self.fetched.lock().unwrap().push(url.to_string());
        self.ca_bodies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| not_found(url))
    }

    async fn probe_plain_http(&self, _url: &str) -> Result<u16, RemoteError> {
        self.probe.clone()
    }
}
