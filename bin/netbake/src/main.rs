//! netbake builds multi-node blockchain test networks on servers that already
//! run the node containers.

mod cli;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde_json::Map;

use cli::{Cli, Command};
use netbake_deploy::{
    DeploymentRequest, Inventory, Orchestrator, PluginRegistry, ProtocolPlugin, Settings,
    transport::SshTransport, validate,
};

const DEFAULT_CONFIG_FILE: &str = "Netbake.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let registry = PluginRegistry::with_builtin();

    match cli.command {
        Command::Validate { request } => {
            let request = DeploymentRequest::load_from_file(&request)?;
            validate(&request)?;
            registry.lookup(&request.protocol)?;
            println!("{} nodes of {}: ok", request.nodes, request.protocol);
        }
        Command::Build {
            request,
            inventory,
            artifacts_dir,
        } => {
            let mut settings = load_settings(cli.config.as_deref())?;
            if artifacts_dir.is_some() {
                settings.artifacts_dir = artifacts_dir;
            }
            build(&registry, &settings, &request, &inventory).await?;
        }
        Command::Protocols => print_protocols(&registry),
        Command::Defaults { protocol } => {
            println!("{}", registry.lookup(&protocol)?.defaults());
        }
        Command::Params { protocol } => {
            println!("{}", registry.lookup(&protocol)?.params_schema());
        }
    }

    Ok(())
}

/// Defaults, then the settings file, then `NETBAKE_*` variables.
fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let file = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if path.is_some() && !file.exists() {
        anyhow::bail!("Settings file does not exist: {}", file.display());
    }

    let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
        .merge(Toml::file(&file))
        .merge(Env::prefixed("NETBAKE_").split("__"))
        .extract()
        .context("Failed to load settings")?;

    tracing::debug!(?settings, "Settings loaded");
    Ok(settings)
}

async fn build(
    registry: &PluginRegistry,
    settings: &Settings,
    request: &Path,
    inventory: &Path,
) -> Result<()> {
    let request = DeploymentRequest::load_from_file(request)?;
    let inventory = Inventory::load_from_file(inventory)?;
    let transport = SshTransport::new(settings.clone());
    let orchestrator = Orchestrator::new(registry, &inventory, &transport, settings);

    let testnet = orchestrator.build(request).await?;

    println!("{}", testnet.state().status());
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["node", "server", "ip", "container"]);
    for node in testnet.nodes() {
        table.add_row(vec![
            node.absolute_index.to_string(),
            testnet.topology().server_of(node).host.clone(),
            node.ip.to_string(),
            settings.node_container(node),
        ]);
    }
    println!("{table}");

    Ok(())
}

fn print_protocols(registry: &PluginRegistry) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["protocol", "services", "additional logs"]);

    for name in registry.names() {
        let Ok(protocol) = registry.lookup(name) else {
            continue;
        };
        let services = protocol
            .services()
            .iter()
            .map(|service| format!("{} ({})", service.name, service.image))
            .collect::<Vec<_>>()
            .join(", ");
        let logs = protocol
            .additional_logs(&Map::new())
            .iter()
            .map(|(name, path)| format!("{name}: {path}"))
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![name.to_string(), services, logs]);
    }

    println!("{table}");
}
