// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Picking the platform's guest OS type for a host.

use ovirt_api_types::host::{HostDescriptor, OS_TYPE_PARAM};
use ovirt_api_types::OsDescriptor;

/// OS type used when nothing better is known.
pub const OTHER_LINUX: &str = "other_linux";

const FAMILY_SCORE: f64 = 100.0;
const MAJOR_BONUS: f64 = 10.0;
const MINOR_BONUS: f64 = 5.0;
const ARCH_BONUS: f64 = 10.0;

fn normalize_family(family: &str) -> String {
    let family = family.to_lowercase();
    if family.contains("redhat") || family.contains("centos") {
        "rhel".to_string()
    } else {
        family
    }
}

fn normalize_arch(arch: &str) -> String {
    let arch = arch.to_lowercase();
    if arch == "x86_64" {
        "x64".to_string()
    } else {
        arch
    }
}

fn score(
    name: &str,
    family: &str,
    major: &str,
    minor: &str,
    arch: Option<&str>,
) -> Option<f64> {
    let name = name.to_lowercase();
    if !name.contains(family) {
        return None;
    }
    // Among otherwise equal matches, prefer the more general name.
    let mut score = FAMILY_SCORE + 1.0 / name.len() as f64;
    let family_major = format!("{family}_{major}");
    if !major.is_empty() && name.contains(&family_major) {
        score += MAJOR_BONUS;
        let family_major_minor = format!("{family_major}_{minor}");
        if !minor.is_empty() && name.contains(&family_major_minor) {
            score += MINOR_BONUS;
        }
    }
    if let Some(arch) = arch {
        if name.contains(arch) {
            score += ARCH_BONUS;
        }
    }
    Some(score)
}

/// Selects the best-fitting OS type name among `candidates`.
///
/// Candidates with an empty name are ignored. If no candidate mentions the
/// host's family at all, the first candidate is returned. Among equally
/// scored candidates the one appearing later in `candidates` wins.
pub fn match_os_type<'a>(
    family: &str,
    major: &str,
    minor: &str,
    arch: Option<&str>,
    candidates: &'a [OsDescriptor],
) -> Option<&'a str> {
    let family = normalize_family(family.trim());
    let arch =
        arch.map(str::trim).filter(|a| !a.is_empty()).map(normalize_arch);
    let (major, minor) = (major.trim(), minor.trim());

    let named = candidates.iter().filter(|os| !os.name.is_empty());
    let mut best: Option<(f64, &'a str)> = None;
    for os in named.clone() {
        let Some(s) = score(&os.name, &family, major, minor, arch.as_deref())
        else {
            continue;
        };
        if best.map_or(true, |(top, _)| s >= top) {
            best = Some((s, os.name.as_str()));
        }
    }
    match best {
        Some((_, name)) => Some(name),
        None => named.map(|os| os.name.as_str()).next(),
    }
}

/// The OS type to give a VM built for `host`.
///
/// The `ovirt_ostype` host parameter wins over matching; a host without an
/// operating system gets [`OTHER_LINUX`].
pub fn determine_os_type(
    host: &HostDescriptor,
    candidates: &[OsDescriptor],
) -> String {
    if let Some(pinned) = host.params.get(OS_TYPE_PARAM) {
        if !pinned.trim().is_empty() {
            return pinned.trim().to_string();
        }
    }
    let Some(os) = &host.os else {
        return OTHER_LINUX.to_string();
    };
    match_os_type(
        &os.name,
        &os.major,
        &os.minor,
        host.architecture.as_deref(),
        candidates,
    )
    .unwrap_or(OTHER_LINUX)
    .to_string()
}
