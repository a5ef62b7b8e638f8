// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use ovirt_api_types::{InstanceType, Template, VmSpec};

/// Cores and memory a VM ends up with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Effective {
    pub cores: Option<u32>,
    /// Bytes.
    pub memory: Option<u64>,
}

/// Values a VM would inherit without any explicit override. An instance type
/// wins over the template field by field.
pub fn inherited(
    template: Option<&Template>,
    instance_type: Option<&InstanceType>,
) -> Effective {
    Effective {
        cores: instance_type
            .and_then(|it| it.cores)
            .or_else(|| template.and_then(|t| t.cores)),
        memory: instance_type
            .and_then(|it| it.memory)
            .or_else(|| template.and_then(|t| t.memory)),
    }
}

fn drop_redundant<T: PartialEq>(
    explicit: &mut Option<T>,
    inherited: Option<T>,
) {
    if inherited.is_some() && *explicit == inherited {
        *explicit = None;
    }
}

/// Removes cores and memory from `spec` where the template or instance type
/// already provides them, and returns the effective values.
///
/// A field is cleared when it is blank or equal to the inherited value, so
/// the platform only ever sees real overrides.
pub fn sanitize_inherited(
    spec: &mut VmSpec,
    template: Option<&Template>,
    instance_type: Option<&InstanceType>,
) -> Effective {
    let base = inherited(template, instance_type);
    drop_redundant(&mut spec.cores, base.cores);
    drop_redundant(&mut spec.memory, base.memory);
    Effective {
        cores: spec.cores.or(base.cores),
        memory: spec.memory.or(base.memory),
    }
}
