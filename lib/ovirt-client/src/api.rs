// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire types of the platform's JSON API.
//!
//! The engine renders every scalar as a string ("4", "true") and omits empty
//! collections entirely, so every field here is lenient. Conversions into the
//! shared [`ovirt_api_types`] happen in this module and nowhere else.

use ovirt_api_types as types;
use serde::{Deserialize, Deserializer};

mod lenient {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Bool(bool),
        Num(u64),
        Str(String),
    }

    pub(super) fn opt_u64<'de, D>(d: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Scalar>::deserialize(d)? {
            Some(Scalar::Num(n)) => Some(n),
            Some(Scalar::Str(s)) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub(super) fn bool<'de, D>(d: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Scalar>::deserialize(d)? {
            Some(Scalar::Bool(b)) => b,
            Some(Scalar::Str(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        })
    }
}

/// A reference to another object: `{ "id": "...", "href": "..." }`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Version {
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub major: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub minor: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductInfo {
    #[serde(default)]
    pub version: Option<Version>,
}

/// Response to `GET /`.
#[derive(Debug, Default, Deserialize)]
pub struct ApiRoot {
    #[serde(default)]
    pub product_info: Option<ProductInfo>,
}

#[derive(Debug, Deserialize)]
pub struct DataCenter {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DataCenters {
    #[serde(default)]
    pub data_center: Vec<DataCenter>,
}

#[derive(Debug, Deserialize)]
pub struct Cluster {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub data_center: Option<Link>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Clusters {
    #[serde(default)]
    pub cluster: Vec<Cluster>,
}

#[derive(Debug, Deserialize)]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Networks {
    #[serde(default)]
    pub network: Vec<Network>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Topology {
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub cores: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub sockets: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Cpu {
    #[serde(default)]
    pub topology: Option<Topology>,
}

impl Cpu {
    fn cores(cpu: &Option<Cpu>) -> Option<u32> {
        cpu.as_ref()?.topology.as_ref()?.cores.map(|c| c as u32)
    }

    fn sockets(cpu: &Option<Cpu>) -> Option<u32> {
        cpu.as_ref()?.topology.as_ref()?.sockets.map(|s| s as u32)
    }
}

#[derive(Debug, Deserialize)]
pub struct Template {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cpu: Option<Cpu>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub memory: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Templates {
    #[serde(default)]
    pub template: Vec<Template>,
}

#[derive(Debug, Deserialize)]
pub struct InstanceType {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cpu: Option<Cpu>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub memory: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InstanceTypes {
    #[serde(default)]
    pub instance_type: Vec<InstanceType>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DataCenterLinks {
    #[serde(default)]
    pub data_center: Vec<Link>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageDomainLinks {
    #[serde(default)]
    pub storage_domain: Vec<Link>,
}

#[derive(Debug, Deserialize)]
pub struct StorageDomain {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub role: String,
    #[serde(default)]
    pub data_centers: Option<DataCenterLinks>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageDomains {
    #[serde(default)]
    pub storage_domain: Vec<StorageDomain>,
}

#[derive(Debug, Deserialize)]
pub struct OperatingSystem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub href: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OperatingSystems {
    #[serde(default)]
    pub operating_system: Vec<OperatingSystem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Certificate {
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Display {
    #[serde(default, rename = "type")]
    pub display_type: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub port: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub secure_port: Option<u64>,
    #[serde(default)]
    pub certificate: Option<Certificate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Os {
    #[serde(default, rename = "type")]
    pub os_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Vm {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<types::VmStatus>,
    #[serde(default)]
    pub cluster: Option<Link>,
    #[serde(default)]
    pub template: Option<Link>,
    #[serde(default)]
    pub cpu: Option<Cpu>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub memory: Option<u64>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub os: Option<Os>,
    #[serde(default)]
    pub display: Option<Display>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Mac {
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Nic {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub network: Option<Link>,
    #[serde(default)]
    pub mac: Option<Mac>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Nics {
    #[serde(default)]
    pub nic: Vec<Nic>,
}

#[derive(Debug, Deserialize)]
pub struct Disk {
    pub id: String,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub provisioned_size: Option<u64>,
    #[serde(default)]
    pub storage_domains: Option<StorageDomainLinks>,
}

impl Disk {
    fn storage_domain(&self) -> Option<String> {
        self.storage_domains
            .as_ref()?
            .storage_domain
            .first()
            .map(|sd| sd.id.clone())
    }
}

#[derive(Debug, Deserialize)]
pub struct DiskAttachment {
    pub id: String,
    #[serde(default, deserialize_with = "lenient::bool")]
    pub bootable: bool,
    #[serde(default)]
    pub disk: Option<Disk>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DiskAttachments {
    #[serde(default)]
    pub disk_attachment: Vec<DiskAttachment>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Ticket {
    #[serde(default)]
    pub value: String,
}

/// Response to an action such as `POST /vms/{id}/ticket`.
#[derive(Debug, Default, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub ticket: Option<Ticket>,
}

const GIB: u64 = 1024 * 1024 * 1024;

impl From<DataCenter> for types::Datacenter {
    fn from(dc: DataCenter) -> Self {
        Self { id: dc.id, name: dc.name }
    }
}

impl From<Cluster> for types::Cluster {
    fn from(c: Cluster) -> Self {
        Self { id: c.id, name: c.name, datacenter: c.data_center.map(|l| l.id) }
    }
}

impl From<Network> for types::Network {
    fn from(n: Network) -> Self {
        Self { id: n.id, name: n.name }
    }
}

impl From<StorageDomain> for types::StorageDomain {
    fn from(sd: StorageDomain) -> Self {
        let datacenter = sd
            .data_centers
            .and_then(|dcs| dcs.data_center.into_iter().next())
            .map(|l| l.id);
        Self { id: sd.id, name: sd.name, role: sd.role, datacenter }
    }
}

impl From<OperatingSystem> for types::OsDescriptor {
    fn from(os: OperatingSystem) -> Self {
        Self { id: os.id, name: os.name, href: os.href }
    }
}

impl From<InstanceType> for types::InstanceType {
    fn from(it: InstanceType) -> Self {
        Self {
            cores: Cpu::cores(&it.cpu),
            id: it.id,
            name: it.name,
            memory: it.memory,
        }
    }
}

impl Template {
    pub fn into_template(self, disks: Vec<DiskAttachment>) -> types::Template {
        types::Template {
            cores: Cpu::cores(&self.cpu),
            id: self.id,
            name: self.name,
            memory: self.memory,
            volumes: disks
                .into_iter()
                .filter_map(|att| att.disk)
                .map(|disk| types::TemplateVolume {
                    storage_domain: disk.storage_domain(),
                    id: disk.id,
                })
                .collect(),
        }
    }
}

impl From<Nic> for types::VmInterface {
    fn from(nic: Nic) -> Self {
        Self {
            id: nic.id,
            name: nic.name,
            network: nic.network.map(|l| l.id),
            mac: nic.mac.and_then(|m| m.address),
        }
    }
}

impl From<DiskAttachment> for types::VmVolume {
    fn from(att: DiskAttachment) -> Self {
        let (size_gb, storage_domain) = match &att.disk {
            Some(disk) => {
                (disk.provisioned_size.map(|b| b / GIB), disk.storage_domain())
            }
            None => (None, None),
        };
        Self { id: att.id, size_gb, storage_domain, bootable: att.bootable }
    }
}

impl Display {
    fn into_display(self) -> Option<types::VmDisplay> {
        let display_type = self.display_type.parse().ok()?;
        Some(types::VmDisplay {
            display_type,
            address: self.address,
            port: self.port.and_then(|p| u16::try_from(p).ok()),
            secure_port: self.secure_port.and_then(|p| u16::try_from(p).ok()),
            subject: self.certificate.and_then(|c| c.subject),
        })
    }
}

impl Vm {
    pub fn into_vm(
        self,
        nics: Vec<Nic>,
        disks: Vec<DiskAttachment>,
    ) -> types::Vm {
        types::Vm {
            cores: Cpu::cores(&self.cpu),
            sockets: Cpu::sockets(&self.cpu),
            id: self.id,
            name: self.name,
            status: self.status.unwrap_or(types::VmStatus::Unknown),
            cluster: self.cluster.map(|l| l.id),
            template: self.template.map(|l| l.id),
            memory: self.memory,
            comment: self.comment.filter(|c| !c.is_empty()),
            os_type: self.os.and_then(|os| os.os_type),
            display_settings: None,
            display: self.display.and_then(Display::into_display),
            interfaces: nics.into_iter().map(Into::into).collect(),
            volumes: disks.into_iter().map(Into::into).collect(),
        }
    }
}
