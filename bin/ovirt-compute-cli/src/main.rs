// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use ovirt_api_types::host::{HostOs, OS_TYPE_PARAM};
use ovirt_api_types::{HostDescriptor, VmSpec};
use ovirt_compute::reconcile::save_required;
use ovirt_compute::rest::RestConnector;
use ovirt_compute::{ComputeResource, Error};
use ovirt_compute_config::Config;
use serde::Serialize;
use slog::{info, o, Drain, Level, Logger};

#[derive(Debug, Parser)]
#[clap(about, version)]
/// Drive an oVirt compute resource from the command line
struct Opt {
    /// Compute resource configuration (TOML)
    #[clap(short, long, action)]
    config: PathBuf,

    /// Enable debugging
    #[clap(short, long, action)]
    debug: bool,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Dial the engine and check that it is usable
    TestConnection {
        /// Pin the certificate the engine presents even if another one is
        /// pinned already
        #[clap(long, action)]
        force: bool,
    },

    /// List datacenters as name and id
    Datacenters,

    /// List the guest OS types the engine knows about
    OsTypes {
        /// Ask the engine again instead of using the cached list
        #[clap(long, action)]
        refresh: bool,
    },

    /// Pick the guest OS type for a host's operating system
    OsMatch {
        /// Host name
        #[clap(action)]
        name: String,

        /// OS family, e.g. RedHat or Debian
        #[clap(long, action)]
        family: Option<String>,

        #[clap(long, default_value = "", action)]
        major: String,

        #[clap(long, default_value = "", action)]
        minor: String,

        #[clap(long, action)]
        arch: Option<String>,

        /// OS type to use regardless of matching
        #[clap(long, action)]
        os_type: Option<String>,
    },

    /// Show capabilities and the default VM shape
    Defaults,

    /// Create a VM from a JSON VM specification
    Create {
        #[clap(action)]
        spec: PathBuf,
    },

    /// Apply a JSON VM specification to an existing VM
    Update {
        #[clap(action)]
        id: String,

        #[clap(action)]
        spec: PathBuf,
    },

    /// Destroy a VM
    Destroy {
        #[clap(action)]
        id: String,
    },

    /// Start a VM, passing on cloud-init data found in its comment
    Start {
        #[clap(action)]
        id: String,
    },

    /// Print a console session descriptor for a running VM
    Console {
        #[clap(action)]
        id: String,
    },
}

fn create_logger(opt: &Opt) -> Logger {
    let level = if opt.debug { Level::Debug } else { Level::Info };
    let drain = if atty::is(atty::Stream::Stderr) {
        let decorator = slog_term::TermDecorator::new().stderr().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog::LevelFilter(drain, level).fuse();
        slog_async::Async::new(drain).build_no_guard()
    } else {
        let drain =
            slog_bunyan::with_name("ovirt-compute-cli", std::io::stderr())
                .build()
                .fuse();
        let drain = slog::LevelFilter(drain, level).fuse();
        slog_async::Async::new(drain).build_no_guard()
    };
    Logger::root(drain.fuse(), o!())
}

fn parse_json_file<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> anyhow::Result<T> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| e.into())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn test_connection(
    resource: &ComputeResource,
    force: bool,
) -> anyhow::Result<()> {
    match resource.test_connection(force).await {
        Ok(()) => {
            let version = resource.api_version().await?;
            println!("connected, API version {version}");
            Ok(())
        }
        Err(Error::TrustRequired { fingerprint }) => {
            println!(
                "The engine presented a certificate authority that is not \
                 trusted yet.\nFingerprint (SHA-256): {fingerprint}\n\
                 It has been pinned; run test-connection again to confirm."
            );
            Ok(())
        }
        Err(e) => Err(e).context("connection test failed"),
    }
}

async fn os_match(
    resource: &ComputeResource,
    host: HostDescriptor,
) -> anyhow::Result<()> {
    let attrs = resource
        .host_compute_attrs(&host)
        .await
        .context("failed to compute host attributes")?;
    match attrs.os_type {
        Some(os_type) => println!("{os_type}"),
        None => println!("engine does not list operating systems"),
    }
    Ok(())
}

async fn update(
    resource: &ComputeResource,
    log: &Logger,
    id: &str,
    spec: &VmSpec,
) -> anyhow::Result<()> {
    let current = resource
        .find_vm(id)
        .await
        .with_context(|| anyhow!("failed to look up VM {id}"))?;
    if !save_required(&current, spec) {
        info!(log, "nothing to change"; "vm" => id);
        return Ok(());
    }
    let vm = resource
        .save_vm(id, spec)
        .await
        .with_context(|| anyhow!("failed to update VM {id}"))?;
    print_json(&vm)
}

async fn run(
    resource: &ComputeResource,
    log: &Logger,
    cmd: Command,
) -> anyhow::Result<()> {
    match cmd {
        Command::TestConnection { force } => {
            test_connection(resource, force).await?
        }
        Command::Datacenters => {
            for (name, id) in resource.datacenters().await? {
                println!("{name}\t{id}");
            }
        }
        Command::OsTypes { refresh } => {
            let oses = if refresh {
                resource.refresh_operating_systems().await?
            } else {
                resource.available_operating_systems().await?
            };
            for os in oses {
                println!("{}\t{}", os.name, os.href);
            }
        }
        Command::OsMatch { name, family, major, minor, arch, os_type } => {
            let mut host = HostDescriptor {
                name,
                os: family.map(|name| HostOs { name, major, minor }),
                architecture: arch,
                ..Default::default()
            };
            if let Some(os_type) = os_type {
                host.params.insert(OS_TYPE_PARAM.to_string(), os_type);
            }
            os_match(resource, host).await?
        }
        Command::Defaults => {
            let capabilities: Vec<String> = resource
                .capabilities()
                .iter()
                .map(ToString::to_string)
                .collect();
            println!("capabilities: {}", capabilities.join(", "));
            print_json(&resource.vm_defaults())?
        }
        Command::Create { spec } => {
            let spec: VmSpec = parse_json_file(&spec)
                .with_context(|| anyhow!("failed to parse {spec:?}"))?;
            let vm = resource
                .create_vm(spec)
                .await
                .context("failed to create VM")?;
            print_json(&vm)?
        }
        Command::Update { id, spec } => {
            let spec: VmSpec = parse_json_file(&spec)
                .with_context(|| anyhow!("failed to parse {spec:?}"))?;
            update(resource, log, &id, &spec).await?
        }
        Command::Destroy { id } => resource
            .destroy_vm(&id)
            .await
            .with_context(|| anyhow!("failed to destroy VM {id}"))?,
        Command::Start { id } => resource
            .start_vm(&id)
            .await
            .with_context(|| anyhow!("failed to start VM {id}"))?,
        Command::Console { id } => {
            let session = resource
                .console(&id)
                .await
                .with_context(|| anyhow!("no console for VM {id}"))?;
            print_json(&session)?
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    let log = create_logger(&opt);

    let mut config = ovirt_compute_config::parse(&opt.config)
        .with_context(|| anyhow!("failed to read {:?}", opt.config))?;
    let connector = Arc::new(RestConnector::new(log.new(o!())));
    let resource = ComputeResource::new(&config, connector, log.clone())
        .context("invalid compute resource configuration")?;

    let result = run(&resource, &log, opt.cmd).await;

    // Whatever the engine taught us (a pinned CA, the OS list) is kept even
    // when the command itself failed.
    let before = config.clone();
    resource.persist_into(&mut config).await;
    if config != before {
        config
            .save(&opt.config)
            .with_context(|| anyhow!("failed to write {:?}", opt.config))?;
        info!(log, "saved learned state"; "path" => ?opt.config);
    }

    result
}
