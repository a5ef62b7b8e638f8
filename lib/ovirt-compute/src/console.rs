// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Console proxy session descriptors for running VMs.

use ovirt_api_types::{ConsoleSession, DisplayType, VmDisplay, VmStatus};
use slog::info;

use crate::{ComputeResource, Error};

fn incomplete(vm: &str, what: &str) -> Error {
    Error::RemoteApi {
        status: None,
        detail: format!("display of VM {vm} reports no {what}"),
    }
}

fn display_host(vm: &str, display: &VmDisplay) -> Result<String, Error> {
    display
        .address
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(String::from)
        .ok_or_else(|| incomplete(vm, "address"))
}

impl ComputeResource {
    /// Describes how a console proxy reaches the display of VM `id`.
    ///
    /// SPICE sessions use the TLS port when the platform offers one and carry
    /// the CA certificate the proxy has to trust for it. Every call issues a
    /// fresh one-time password.
    pub async fn console(&self, id: &str) -> Result<ConsoleSession, Error> {
        let platform = self.connection().await?;
        let vm = platform.get_vm(id).await?;
        if vm.status != VmStatus::Up {
            return Err(Error::NotRunning(vm.name));
        }
        let Some(display) = &vm.display else {
            return Err(Error::NotRunning(vm.name.clone()));
        };
        let host = display_host(&vm.name, display)?;

        let session = match display.display_type {
            DisplayType::Vnc => {
                let host_port =
                    display.port.ok_or_else(|| incomplete(&vm.name, "port"))?;
                ConsoleSession::Vnc {
                    host,
                    host_port,
                    password: platform.console_ticket(&vm.id).await?,
                    name: vm.name.clone(),
                }
            }
            DisplayType::Spice => {
                let (host_port, secure) =
                    match (display.secure_port, display.port) {
                        (Some(port), _) => (port, true),
                        (None, Some(port)) => (port, false),
                        (None, None) => {
                            return Err(incomplete(&vm.name, "port"))
                        }
                    };
                ConsoleSession::Spice {
                    host,
                    host_port,
                    secure,
                    password: platform.console_ticket(&vm.id).await?,
                    name: vm.name.clone(),
                    ca_cert: self.ca_certificate().await,
                    subject: display.subject.clone(),
                }
            }
        };
        info!(self.vm_log(&vm), "console session issued";
            "type" => %session.display_type());
        Ok(session)
    }
}
