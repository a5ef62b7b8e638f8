// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! What the adapter offers the controller: capability flags, request
//! ceilings, the default VM shape and the guest OS listing.

use std::sync::Arc;

use ovirt_api_types::{HostDescriptor, OsDescriptor, VmSpec, VolumeSpec};
use ovirt_compute_config::{OsCapability, ValidationError};
use slog::{debug, info};

use crate::os_type::determine_os_type;
use crate::platform::Platform;
use crate::{ComputeResource, Error};

const GIB: u64 = 1024 * 1024 * 1024;

pub const MAX_CORES: u32 = 16;
pub const MAX_SOCKETS: u32 = 16;
/// Bytes.
pub const MAX_MEMORY: u64 = 16 * GIB;
/// Largest volume whose size in bytes still fits the API's 64-bit field.
pub const MAX_VOLUME_SIZE_GB: u64 = u64::MAX / GIB;

/// Provisioning modes the adapter supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    /// Network (PXE) builds.
    Build,
    /// Cloning from a template image.
    Image,
    /// Attaching new volumes to an existing VM.
    NewVolume,
}

pub const CAPABILITIES: &[Capability] =
    &[Capability::Build, Capability::Image, Capability::NewVolume];

fn check_range<T: PartialOrd + std::fmt::Display>(
    field: &str,
    value: Option<T>,
    min: T,
    max: T,
) -> Result<(), ValidationError> {
    match value {
        Some(v) if v < min || v > max => {
            Err(ValidationError::InvalidRequest(format!(
                "{field} must be between {min} and {max}, got {v}"
            )))
        }
        _ => Ok(()),
    }
}

/// Checks the requested shape against the platform ceilings. Blank fields
/// always pass.
pub fn within_limits(spec: &VmSpec) -> Result<(), ValidationError> {
    check_range("cores", spec.cores, 1, MAX_CORES)?;
    check_range("sockets", spec.sockets, 1, MAX_SOCKETS)?;
    check_range("memory", spec.memory, 1, MAX_MEMORY)?;
    for volume in spec.volumes.iter().filter(|v| v.is_new()) {
        volume_within_limits(volume)?;
    }
    Ok(())
}

pub(crate) fn volume_within_limits(
    volume: &VolumeSpec,
) -> Result<(), ValidationError> {
    check_range("volume size_gb", volume.size_gb, 1, MAX_VOLUME_SIZE_GB)
}

async fn probe_operating_systems(
    platform: &Arc<dyn Platform>,
) -> Result<OsCapability, Error> {
    match platform.list_operating_systems().await {
        Ok(list) => Ok(OsCapability::Available { list }),
        Err(e) if e.is_not_found() => Ok(OsCapability::Unsupported),
        Err(e) => Err(e.into()),
    }
}

impl ComputeResource {
    pub fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    /// The shape of a VM nobody asked anything particular of.
    pub fn vm_defaults(&self) -> VmSpec {
        VmSpec {
            memory: Some(GIB),
            cores: Some(1),
            sockets: Some(1),
            display: Some(self.default_display()),
            ..Default::default()
        }
    }

    /// Whether the platform can list guest operating systems.
    ///
    /// The listing is fetched at most once and cached, including the answer
    /// that there is none. An endpoint that is not trusted yet reports
    /// `false` instead of failing.
    pub async fn supports_operating_systems(&self) -> Result<bool, Error> {
        let platform = match self.connection().await {
            Ok(platform) => platform,
            Err(Error::TrustRequired { fingerprint }) => {
                info!(self.log, "OS listing unknown until trust is confirmed";
                    "fingerprint" => fingerprint);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if !platform.supports_operating_systems() {
            return Ok(false);
        }

        let mut cache = self.os_capability.lock().await;
        if cache.is_unknown() {
            *cache = probe_operating_systems(&platform).await?;
            debug!(self.log, "probed OS listing";
                "supported" => !matches!(*cache, OsCapability::Unsupported));
        }
        Ok(matches!(*cache, OsCapability::Available { .. }))
    }

    /// The cached guest OS list.
    pub async fn available_operating_systems(
        &self,
    ) -> Result<Vec<OsDescriptor>, Error> {
        if !self.supports_operating_systems().await? {
            return Err(Error::Unsupported("operating system listing"));
        }
        match &*self.os_capability.lock().await {
            OsCapability::Available { list } => Ok(list.clone()),
            _ => Err(Error::Unsupported("operating system listing")),
        }
    }

    /// Forgets the cached listing and asks the platform again.
    pub async fn refresh_operating_systems(
        &self,
    ) -> Result<Vec<OsDescriptor>, Error> {
        *self.os_capability.lock().await = OsCapability::Unknown;
        self.available_operating_systems().await
    }

    pub async fn os_capability(&self) -> OsCapability {
        self.os_capability.lock().await.clone()
    }

    /// Compute attributes for a VM built for `host`. The guest OS type is
    /// only set when the platform lists operating systems.
    pub async fn host_compute_attrs(
        &self,
        host: &HostDescriptor,
    ) -> Result<VmSpec, Error> {
        let mut attrs =
            VmSpec { name: Some(host.name.clone()), ..Default::default() };
        if self.supports_operating_systems().await? {
            let candidates = self.available_operating_systems().await?;
            attrs.os_type = Some(determine_os_type(host, &candidates));
        }
        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeConnector, FakePlatform};
    use crate::os_type::OTHER_LINUX;
    use crate::platform::RemoteError;
    use crate::test_support::{config, logger, resource};
    use crate::trust::fingerprint;
    use crate::trust::tests::pem_block;
    use ovirt_api_types::host::HostOs;
    use ovirt_api_types::DisplayType;

    fn probes(platform: &FakePlatform) -> usize {
        platform
            .calls()
            .iter()
            .filter(|c| *c == "list_operating_systems")
            .count()
    }

    #[test]
    fn capability_names() {
        let names: Vec<String> =
            CAPABILITIES.iter().map(ToString::to_string).collect();
        assert_eq!(names, ["build", "image", "new_volume"]);
    }

    #[test]
    fn limits() {
        assert!(within_limits(&VmSpec::default()).is_ok());
        let ok = VmSpec {
            cores: Some(MAX_CORES),
            sockets: Some(1),
            memory: Some(MAX_MEMORY),
            volumes: vec![VolumeSpec {
                size_gb: Some(MAX_VOLUME_SIZE_GB),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(within_limits(&ok).is_ok());

        for bad in [
            VmSpec { cores: Some(MAX_CORES + 1), ..Default::default() },
            VmSpec { sockets: Some(0), ..Default::default() },
            VmSpec { memory: Some(MAX_MEMORY + 1), ..Default::default() },
            VmSpec {
                volumes: vec![VolumeSpec {
                    size_gb: Some(MAX_VOLUME_SIZE_GB + 1),
                    ..Default::default()
                }],
                ..Default::default()
            },
        ] {
            assert!(matches!(
                within_limits(&bad),
                Err(ValidationError::InvalidRequest(_))
            ));
        }
    }

    #[test]
    fn defaults_follow_configuration() {
        let (resource, _platform) = resource();
        let defaults = resource.vm_defaults();
        assert_eq!(defaults.memory, Some(GIB));
        assert_eq!((defaults.cores, defaults.sockets), (Some(1), Some(1)));
        let display = defaults.display.unwrap();
        assert_eq!(display.display_type, DisplayType::Spice);
        assert_eq!(display.keyboard_layout, "de");
        assert_eq!(display.port, -1);
        assert_eq!(display.monitors, 1);
    }

    #[tokio::test]
    async fn listing_is_probed_once() {
        let (resource, platform) = resource();
        assert!(resource.supports_operating_systems().await.unwrap());
        assert!(resource.supports_operating_systems().await.unwrap());
        let oses = resource.available_operating_systems().await.unwrap();
        assert_eq!(oses.len(), 4);
        assert_eq!(probes(&platform), 1);

        resource.refresh_operating_systems().await.unwrap();
        assert_eq!(probes(&platform), 2);
    }

    #[tokio::test]
    async fn not_found_is_remembered_as_unsupported() {
        let (resource, platform) = resource();
        platform.fail_on(
            "list_operating_systems",
            RemoteError::Status { status: 404, detail: "gone".to_string() },
        );
        assert!(!resource.supports_operating_systems().await.unwrap());
        assert_eq!(resource.os_capability().await, OsCapability::Unsupported);
        assert_eq!(
            resource.available_operating_systems().await,
            Err(Error::Unsupported("operating system listing"))
        );
        assert_eq!(probes(&platform), 1);
    }

    #[tokio::test]
    async fn other_probe_failures_propagate_and_are_not_cached() {
        let (resource, platform) = resource();
        platform.fail_on(
            "list_operating_systems",
            RemoteError::Status { status: 500, detail: "boom".to_string() },
        );
        let err = resource.supports_operating_systems().await.unwrap_err();
        assert!(matches!(err, Error::RemoteApi { status: Some(500), .. }));
        assert!(resource.os_capability().await.is_unknown());
    }

    #[tokio::test]
    async fn platform_without_listing_is_never_probed() {
        let (resource, platform) = resource();
        platform.inventory().os_support = false;
        assert!(!resource.supports_operating_systems().await.unwrap());
        assert_eq!(probes(&platform), 0);
    }

    #[tokio::test]
    async fn persisted_answer_is_reused() {
        let mut cfg = config();
        cfg.operating_systems = OsCapability::Unsupported;
        let platform = FakePlatform::new();
        let connector = Arc::new(FakeConnector::new(platform.clone()));
        let resource = ComputeResource::new(&cfg, connector, logger()).unwrap();
        assert!(!resource.supports_operating_systems().await.unwrap());
        assert_eq!(probes(&platform), 0);
    }

    #[tokio::test]
    async fn untrusted_endpoint_reports_no_listing() {
        let platform = FakePlatform::new();
        let connector = Arc::new(
            FakeConnector::new(platform.clone())
                .failing_dials(vec![RemoteError::Untrusted])
                .with_ca_bodies(vec![pem_block(b"engine-ca")]),
        );
        let resource =
            ComputeResource::new(&config(), connector, logger()).unwrap();
        assert!(!resource.supports_operating_systems().await.unwrap());
        assert_eq!(
            resource.trust_state().fingerprint,
            Some(fingerprint(b"engine-ca"))
        );
        assert_eq!(probes(&platform), 0);
    }

    #[tokio::test]
    async fn host_attributes_carry_the_matched_os() {
        let (resource, _platform) = resource();
        let mut host = HostDescriptor {
            name: "web01".to_string(),
            os: Some(HostOs {
                name: "CentOS".to_string(),
                major: "9".to_string(),
                minor: "1".to_string(),
            }),
            architecture: Some("x86_64".to_string()),
            ..Default::default()
        };
        let attrs = resource.host_compute_attrs(&host).await.unwrap();
        assert_eq!(attrs.name.as_deref(), Some("web01"));
        assert_eq!(attrs.os_type.as_deref(), Some("rhel_9x64"));

        host.os = None;
        let attrs = resource.host_compute_attrs(&host).await.unwrap();
        assert_eq!(attrs.os_type.as_deref(), Some(OTHER_LINUX));
    }

    #[tokio::test]
    async fn host_attributes_skip_os_without_listing() {
        let (resource, platform) = resource();
        platform.inventory().os_support = false;
        let host = HostDescriptor {
            name: "web02".to_string(),
            ..Default::default()
        };
        let attrs = resource.host_compute_attrs(&host).await.unwrap();
        assert_eq!(attrs.os_type, None);
    }
}
