use anyhow::{bail, Context, Result};
use futures::TryStreamExt;
use ptero_pilot_engine::api::{parse_ports, AllocationRequest, MountRelation};
use ptero_pilot_engine::wizard::{FeatureLimits, ResourceLimits};
use ptero_pilot_engine::{
    AllocationRef, PanelApi, PanelEngine, PowerSignal, ProvisionOutcome, ProvisionRequest,
    ResourceKind, ResourceSnapshot,
};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::{Config, Overrides};
use crate::output::{parse_json_arg, print_json, print_line};
use crate::{
    AllocationCommand, Command, CrudCommand, DatabaseHostCommand, EggCommand, MountCommand,
    NestCommand, NodeCommand, ProvisionArgs, ServerCommand, ServerSection, Signal,
};

pub async fn run(engine: &PanelEngine, command: Command, monitor_interval: Duration) -> Result<()> {
    let api = engine.api();
    match command {
        Command::Nodes(NodeCommand::Crud(cmd)) => crud(api, ResourceKind::Nodes, cmd).await,
        Command::Nodes(NodeCommand::Servers { id }) => print_json(&api.servers_on_node(id).await?),
        Command::Users(cmd) => crud(api, ResourceKind::Users, cmd).await,
        Command::Roles(cmd) => crud(api, ResourceKind::Roles, cmd).await,
        Command::Nests(NestCommand::Crud(cmd)) => crud(api, ResourceKind::Nests, cmd).await,
        Command::Nests(NestCommand::Servers) => print_json(&api.servers_by_nest().await?),
        Command::Mounts(MountCommand::Crud(cmd)) => crud(api, ResourceKind::Mounts, cmd).await,
        Command::Mounts(cmd) => mount_relation(api, cmd).await,
        Command::DatabaseHosts(DatabaseHostCommand::Crud(cmd)) => {
            crud(api, ResourceKind::DatabaseHosts, cmd).await
        }
        Command::DatabaseHosts(DatabaseHostCommand::Databases { id }) => {
            print_json(&api.databases_on_host(id).await?)
        }
        Command::Locations(cmd) => crud(api, ResourceKind::Locations, cmd).await,
        Command::Servers(cmd) => servers(engine, cmd).await,
        Command::Allocations(cmd) => allocations(api, cmd).await,
        Command::Eggs(cmd) => eggs(api, cmd).await,
        Command::Power { identifier, signal } => {
            engine
                .client()?
                .power(&identifier, signal.into())
                .await
                .with_context(|| format!("Failed to send power signal to {}", identifier))?;
            print_json(&serde_json::json!({}))
        }
        Command::Monitor {
            identifier,
            interval_ms,
            count,
        } => {
            let interval = interval_ms
                .map(Duration::from_millis)
                .unwrap_or(monitor_interval);
            monitor(engine, &identifier, interval, count).await
        }
        Command::Configure => bail!("configure is handled before connecting"),
    }
}

async fn crud(api: &PanelApi, kind: ResourceKind, cmd: CrudCommand) -> Result<()> {
    let value = match cmd {
        CrudCommand::List => serde_json::to_value(api.list(kind).await?)?,
        CrudCommand::Get { id } => api.get(kind, id).await?,
        CrudCommand::Create { json } => api.create(kind, parse_json_arg(&json)?).await?,
        CrudCommand::Update { id, json } => api.update(kind, id, parse_json_arg(&json)?).await?,
        CrudCommand::Delete { id } => {
            api.delete(kind, id).await?;
            serde_json::json!({})
        }
    };
    print_json(&value)
}

async fn mount_relation(api: &PanelApi, cmd: MountCommand) -> Result<()> {
    let (id, relation) = match cmd {
        MountCommand::Servers { id } => (id, MountRelation::Servers),
        MountCommand::Nodes { id } => (id, MountRelation::Nodes),
        MountCommand::Eggs { id } => (id, MountRelation::Eggs),
        MountCommand::Crud(cmd) => return crud(api, ResourceKind::Mounts, cmd).await,
    };
    print_json(&api.mount_relation(id, relation).await?)
}

async fn servers(engine: &PanelEngine, cmd: ServerCommand) -> Result<()> {
    let api = engine.api();
    let value = match cmd {
        ServerCommand::List => serde_json::to_value(api.list(ResourceKind::Servers).await?)?,
        ServerCommand::Get { id } => api.get_server(id).await?,
        ServerCommand::Create { json } => api.create_server(parse_json_arg(&json)?).await?,
        ServerCommand::Update { id, section, json } => {
            let body = parse_json_arg(&json)?;
            match section {
                ServerSection::Details => api.update_server_details(id, body).await?,
                ServerSection::Build => api.update_server_build(id, body).await?,
                ServerSection::Startup => api.update_server_startup(id, body).await?,
            }
        }
        ServerCommand::Delete { id, force } => {
            api.delete_server(id, force).await?;
            serde_json::json!({})
        }
        ServerCommand::Suspend { id } => {
            api.suspend_server(id).await?;
            serde_json::json!({})
        }
        ServerCommand::Unsuspend { id } => {
            api.unsuspend_server(id).await?;
            serde_json::json!({})
        }
        ServerCommand::Reinstall { id } => {
            api.reinstall_server(id).await?;
            serde_json::json!({})
        }
        ServerCommand::Databases { id } => {
            serde_json::to_value(api.list_server_databases(id).await?)?
        }
        ServerCommand::Provision(args) => return provision(engine, args).await,
    };
    print_json(&value)
}

async fn provision(engine: &PanelEngine, args: ProvisionArgs) -> Result<()> {
    let request = ProvisionRequest {
        name: args.name,
        description: args.description,
        external_id: args.external_id,
        user_id: args.user,
        node_id: args.node,
        egg_id: args.egg,
        nest_id: args.nest,
        docker_image: args.image,
        startup: args.startup,
        overrides: args.env.into_iter().collect(),
        limits: ResourceLimits {
            memory: args.memory,
            swap: args.swap,
            disk: args.disk,
            io: args.io,
            cpu: args.cpu,
        },
        feature_limits: FeatureLimits {
            databases: args.databases,
            backups: args.backups,
            ..FeatureLimits::default()
        },
    };

    let outcome = engine.wizard().run(&request).await;
    print_json(&outcome)?;
    match outcome {
        ProvisionOutcome::Committed { .. } => Ok(()),
        ProvisionOutcome::Failed { failure, .. } => Err(failure.into()),
    }
}

async fn allocations(api: &PanelApi, cmd: AllocationCommand) -> Result<()> {
    match cmd {
        AllocationCommand::List { node, free } => {
            let allocations: Vec<AllocationRef> = if free {
                api.unassigned_allocations(node).try_collect().await?
            } else {
                api.list_allocations(node).await?
            };
            print_json(&allocations)
        }
        AllocationCommand::Create {
            node,
            ip,
            ports,
            alias,
        } => {
            let request = AllocationRequest {
                ip,
                ports: parse_ports(&ports)?,
                alias,
            };
            api.create_allocations(node, &request).await?;
            info!("Created allocations {} on node {}", ports, node);
            print_json(&serde_json::json!({}))
        }
        AllocationCommand::Delete { node, allocation } => {
            api.delete_allocation(node, allocation).await?;
            print_json(&serde_json::json!({}))
        }
    }
}

async fn eggs(api: &PanelApi, cmd: EggCommand) -> Result<()> {
    match cmd {
        EggCommand::List { nest: Some(nest) } => print_json(&api.list_eggs(nest).await?),
        EggCommand::List { nest: None } => print_json(&api.list_all_eggs().await?),
        EggCommand::Get { egg, nest: Some(nest) } => print_json(&api.get_egg(nest, egg).await?),
        EggCommand::Get { egg, nest: None } => print_json(&api.find_egg(egg).await?),
        EggCommand::Servers { egg } => print_json(&api.servers_using_egg(egg).await?),
    }
}

async fn monitor(
    engine: &PanelEngine,
    identifier: &str,
    interval: Duration,
    count: Option<u64>,
) -> Result<()> {
    let monitor = engine.monitor()?;
    let (tx, mut rx) = mpsc::channel::<ResourceSnapshot>(16);
    let handle = monitor.start(identifier, "cli", interval, tx).await;

    let mut seen: u64 = 0;
    loop {
        tokio::select! {
            snapshot = rx.recv() => match snapshot {
                Some(snapshot) => {
                    print_line(&snapshot)?;
                    seen += 1;
                    if count.is_some_and(|c| seen >= c) {
                        break;
                    }
                }
                None => bail!("Monitor for {} ended; check the client API key", identifier),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    monitor.stop(&handle).await;
    Ok(())
}

pub fn configure(overrides: &Overrides, mut config: Config, path: &Path) -> Result<()> {
    if let Some(url) = &overrides.panel_url {
        config.base_url = Some(url.clone());
    }
    if let Some(key) = &overrides.api_key {
        config.api_key = Some(key.clone());
    }
    if let Some(key) = &overrides.client_key {
        config.client_key = Some(key.clone());
    }
    if let Some(t) = overrides.timeout_secs {
        config.timeout_secs = Some(t);
    }
    if let Some(r) = overrides.retries {
        config.retries = Some(r);
    }
    config.save(path)?;
    info!("Saved config to {:?}", path);
    print_json(&serde_json::json!({ "config": path }))
}

impl From<Signal> for PowerSignal {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Start => PowerSignal::Start,
            Signal::Stop => PowerSignal::Stop,
            Signal::Restart => PowerSignal::Restart,
            Signal::Kill => PowerSignal::Kill,
        }
    }
}
