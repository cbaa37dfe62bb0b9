//! Account-based chain bootstrapped with geth.
//!
//! A build creates one wallet per node, renders a genesis document funding
//! every wallet, connects the nodes through a static peer list and starts
//! them mining. Each node then gets a monitoring sidecar reporting to a
//! stats collector on the first server.

use std::collections::BTreeMap;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    Node, TestNet,
    distribute::{Artifact, distribute, distribute_filtered},
    executor,
    registry::{ProtocolPlugin, Service},
    transport::{RemoteTransport, Target},
};

pub mod cmd;
pub mod genesis;
pub mod parse;

pub use cmd::GethCmdBuilder;
pub use parse::{EnodeRecord, parse_enode, parse_wallet_address};

const DEFAULTS: &str = include_str!("../../../resources/geth/defaults.json");
const PARAMS: &str = include_str!("../../../resources/geth/params.json");

/// Shared password file.
pub const PASSWORD_ARTIFACT: &str = "passwd";
/// Rendered genesis document.
pub const GENESIS_ARTIFACT: &str = "CustomGenesis.json";
/// Peer list of every node.
pub const STATIC_NODES_ARTIFACT: &str = "static-nodes.json";
/// Wallet addresses, by absolute node index.
pub const WALLETS_ARTIFACT: &str = "wallets.json";

/// Steps of a build that do not depend on the node count.
pub const FIXED_STEPS: usize = 8;
/// Steps of a build per node: wallet, enode, two for start, sidecar.
pub const STEPS_PER_NODE: usize = 5;

const SECRET_LEN: usize = 16;

/// Total progress steps of a build of `nodes` nodes.
pub fn build_steps(nodes: usize) -> usize {
    FIXED_STEPS + STEPS_PER_NODE * nodes
}

/// Chain parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GethConf {
    pub network_id: u64,
    pub difficulty: u64,
    /// Balance of every funded account, in wei.
    pub init_balance: String,
    pub max_peers: u64,
    pub gas_limit: u64,
    pub homestead_block: u64,
    pub eip155_block: u64,
    pub eip158_block: u64,
    /// Number of synthetic accounts funded in the genesis document.
    pub extra_accounts: u64,
}

impl Default for GethConf {
    fn default() -> Self {
        Self {
            network_id: 15468,
            difficulty: 100000,
            init_balance: "100000000000000000000".to_string(),
            max_peers: 1000,
            gas_limit: 4000000,
            homestead_block: 0,
            eip155_block: 0,
            eip158_block: 0,
            extra_accounts: 10,
        }
    }
}

impl GethConf {
    /// Read the request's parameters over the defaults.
    pub fn from_params(params: &Map<String, Value>) -> Result<Self> {
        super::merge_params(DEFAULTS, params)
    }
}

/// An account created on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    pub address: Address,
    /// Raw keystore file content.
    pub keystore: String,
}

/// The geth protocol plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geth;

impl ProtocolPlugin for Geth {
    async fn build<T: RemoteTransport>(&self, testnet: &TestNet<'_, T>) -> Result<()> {
        let state = testnet.state();
        let nodes = testnet.nodes();

        state.set_stage("Parsing parameters");
        let conf = GethConf::from_params(&testnet.request().params)?;
        state.set_total_steps(build_steps(nodes.len()));
        state.increment_progress();

        let secret = generate_secret();

        state.set_stage("Distributing secrets");
        distribute(
            testnet,
            nodes,
            Artifact::new(PASSWORD_ARTIFACT, password_file(&secret, nodes.len())),
            cmd::DATA_DIR,
        )
        .await?;
        state.increment_progress();

        state.set_stage("Creating the wallets");
        let wallets = create_wallets(testnet, nodes).await?;
        state.increment_progress();

        let addresses: Vec<Address> = wallets.iter().map(|wallet| wallet.address).collect();
        save_wallets(testnet, &addresses)?;
        state.increment_progress();

        state.set_stage("Creating the genesis block");
        let template = testnet
            .request()
            .attachment("genesis.json")
            .unwrap_or(genesis::GENESIS_TEMPLATE);
        let genesis = genesis::render_genesis(template, &conf, &addresses)?;
        state.increment_progress();

        state.set_stage("Bootstrapping network");
        distribute(
            testnet,
            nodes,
            Artifact::new(GENESIS_ARTIFACT, genesis),
            cmd::DATA_DIR,
        )
        .await?;

        let keystores: Vec<Artifact> = wallets
            .iter()
            .enumerate()
            .map(|(i, wallet)| Artifact::new(format!("keystore/account{i}"), wallet.keystore.as_str()))
            .collect();
        distribute_filtered(testnet, nodes, &keystores, cmd::KEYSTORE_DIR, |node, i| {
            node.absolute_index != i
        })
        .await?;

        state.set_stage("Initializing geth");
        let enodes = init_nodes(testnet, nodes, &conf).await?;
        let static_nodes = static_nodes_json(enodes.iter().map(ToString::to_string).collect())?;
        state.increment_progress();

        state.set_stage("Starting geth");
        distribute(
            testnet,
            nodes,
            Artifact::new(STATIC_NODES_ARTIFACT, static_nodes),
            cmd::DATA_DIR,
        )
        .await?;
        start_nodes(testnet, nodes, &conf, &addresses, Some(addresses.as_slice())).await?;
        state.increment_progress();

        state.set_stage("Starting the stats collector");
        start_stats_collector(testnet, &secret).await?;
        state.increment_progress();

        state.set_stage("Starting the monitoring sidecars");
        start_sidecars(testnet, nodes, &secret).await?;

        tracing::info!(
            deployment = %state.deployment_id(),
            nodes = nodes.len(),
            network_id = conf.network_id,
            "geth network started"
        );
        Ok(())
    }

    async fn add_nodes<T: RemoteTransport>(&self, testnet: &TestNet<'_, T>, nodes: &[Node]) -> Result<()> {
        let state = testnet.state();

        state.set_stage("Parsing parameters");
        let conf = GethConf::from_params(&testnet.request().params)?;
        let genesis = retained(testnet, GENESIS_ARTIFACT)?;
        let static_nodes = retained(testnet, STATIC_NODES_ARTIFACT)?;
        let secret = retained(testnet, PASSWORD_ARTIFACT)?
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();
        let mut addresses = load_wallets(testnet)?;

        let existing = testnet.nodes().len() - nodes.len();
        if addresses.len() != existing {
            anyhow::bail!(
                "{} wallets recorded for {} existing nodes",
                addresses.len(),
                existing
            );
        }
        state.set_total_steps(state.total_steps() + STEPS_PER_NODE * nodes.len());

        state.set_stage("Distributing secrets");
        distribute(
            testnet,
            nodes,
            Artifact::new(PASSWORD_ARTIFACT, password_file(&secret, testnet.nodes().len())),
            cmd::DATA_DIR,
        )
        .await?;

        state.set_stage("Creating the wallets");
        let wallets = create_wallets(testnet, nodes).await?;
        addresses.extend(wallets.iter().map(|wallet| wallet.address));
        save_wallets(testnet, &addresses)?;

        state.set_stage("Bootstrapping network");
        distribute(
            testnet,
            nodes,
            Artifact::new(GENESIS_ARTIFACT, genesis),
            cmd::DATA_DIR,
        )
        .await?;

        state.set_stage("Initializing geth");
        let enodes = init_nodes(testnet, nodes, &conf).await?;
        let mut records: Vec<String> =
            serde_json::from_str(&static_nodes).context("Failed to parse the retained peer list")?;
        records.extend(enodes.iter().map(ToString::to_string));

        state.set_stage("Starting geth");
        distribute(
            testnet,
            testnet.nodes(),
            Artifact::new(STATIC_NODES_ARTIFACT, static_nodes_json(records)?),
            cmd::DATA_DIR,
        )
        .await?;
        start_nodes(testnet, nodes, &conf, &addresses, None).await?;

        state.set_stage("Starting the monitoring sidecars");
        start_sidecars(testnet, nodes, &secret).await?;
        Ok(())
    }

    fn defaults(&self) -> &'static str {
        DEFAULTS
    }

    fn params_schema(&self) -> &'static str {
        PARAMS
    }

    fn services(&self) -> Vec<Service> {
        vec![Service {
            name: "ethstats".to_string(),
            image: "netbake/ethstats:latest".to_string(),
            env: BTreeMap::from([("PORT".to_string(), cmd::STATS_PORT.to_string())]),
        }]
    }

    fn additional_logs(&self, _params: &Map<String, Value>) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

fn generate_secret() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}

/// One line of `secret` per account to unlock.
fn password_file(secret: &str, accounts: usize) -> String {
    format!("{secret}\n").repeat(accounts)
}

fn retained<T: RemoteTransport>(testnet: &TestNet<'_, T>, name: &str) -> Result<String> {
    testnet
        .state()
        .read(name)
        .context(format!("Missing artifact {name} of the original build"))
}

fn static_nodes_json(records: Vec<String>) -> Result<String> {
    serde_json::to_string_pretty(&records).context("Failed to serialize the peer list")
}

fn save_wallets<T: RemoteTransport>(testnet: &TestNet<'_, T>, addresses: &[Address]) -> Result<()> {
    let hex: Vec<String> = addresses.iter().map(cmd::address_hex).collect();
    let json = serde_json::to_string_pretty(&hex).context("Failed to serialize wallets")?;
    testnet.state().write(WALLETS_ARTIFACT, json)
}

fn load_wallets<T: RemoteTransport>(testnet: &TestNet<'_, T>) -> Result<Vec<Address>> {
    let json = retained(testnet, WALLETS_ARTIFACT)?;
    let hex: Vec<String> = serde_json::from_str(&json).context("Failed to parse the retained wallets")?;
    hex.iter()
        .map(|address| {
            address
                .parse::<Address>()
                .context(format!("Invalid retained wallet address {address}"))
        })
        .collect()
}

/// Create one account per node. Output `i` belongs to `nodes[i]`.
async fn create_wallets<T: RemoteTransport>(testnet: &TestNet<'_, T>, nodes: &[Node]) -> Result<Vec<Wallet>> {
    let state = testnet.state();
    executor::map_nodes(nodes, |node| async move {
        let output = testnet.run_on(&node, &cmd::account_new()).await?;
        let address = parse_wallet_address(&output)
            .context(format!("No wallet created on node {}", node.absolute_index))?;
        state.increment_progress();

        let keystore = testnet.run_on(&node, &cmd::cat_keystore()).await?;
        tracing::debug!(node = node.absolute_index, address = %address, "Wallet created");
        Ok(Wallet {
            address,
            keystore: keystore.trim().to_string(),
        })
    })
    .await
}

/// Initialize every node from the genesis document and collect its enode
/// record, pointed at the node's reachable IP.
async fn init_nodes<T: RemoteTransport>(
    testnet: &TestNet<'_, T>,
    nodes: &[Node],
    conf: &GethConf,
) -> Result<Vec<EnodeRecord>> {
    let state = testnet.state();
    executor::map_nodes(nodes, |node| async move {
        testnet.run_on(&node, &cmd::init(conf.network_id)).await?;

        let output = testnet
            .run_on(&node, &cmd::print_enode(conf.network_id))
            .await?;
        let record = parse_enode(&output)
            .context(format!("No enode record on node {}", node.absolute_index))?
            .with_host(node.ip);
        state.increment_progress();
        Ok(record)
    })
    .await
}

/// Start geth on every node. `wallets` holds every address by absolute
/// index; nodes unlock `unlock`, or only their own account when `None`.
async fn start_nodes<T: RemoteTransport>(
    testnet: &TestNet<'_, T>,
    nodes: &[Node],
    conf: &GethConf,
    wallets: &[Address],
    unlock: Option<&[Address]>,
) -> Result<()> {
    let state = testnet.state();
    let settings = testnet.settings();

    executor::for_each_node(nodes, |node| async move {
        state.increment_progress();

        let etherbase = *wallets
            .get(node.absolute_index)
            .context(format!("No wallet for node {}", node.absolute_index))?;
        let command = GethCmdBuilder::new(conf.network_id, node.ip)
            .max_peers(conf.max_peers)
            .unlock(unlock.map(<[Address]>::to_vec).unwrap_or_else(|| vec![etherbase]))
            .etherbase(etherbase)
            .build();

        testnet
            .transport()
            .run_detached_interactive(
                testnet.topology().server_of(&node),
                node,
                &settings.session_name,
                &command,
                &settings.node_output_file,
            )
            .await
            .context(format!("Failed to start geth on node {}", node.absolute_index))?;

        state.increment_progress();
        Ok(())
    })
    .await
}

/// Start the stats collector in the first service container of the first
/// server.
async fn start_stats_collector<T: RemoteTransport>(testnet: &TestNet<'_, T>, secret: &str) -> Result<()> {
    let server = testnet
        .servers()
        .first()
        .context("No server to host the stats collector")?;
    let container = testnet.settings().service_container(0);

    testnet
        .transport()
        .run(
            Target::Host(server),
            &cmd::start_stats_collector(&container, secret),
        )
        .await
        .context("Failed to start the stats collector")?;

    tracing::info!(host = %server.host, port = cmd::STATS_PORT, "Stats collector started");
    Ok(())
}

/// Point the monitoring sidecar of every node at the stats collector and
/// start it.
async fn start_sidecars<T: RemoteTransport>(testnet: &TestNet<'_, T>, nodes: &[Node], secret: &str) -> Result<()> {
    let state = testnet.state();
    let settings = testnet.settings();
    let stats_host = match &settings.stats_collector_host {
        Some(host) => host.clone(),
        None => testnet
            .servers()
            .first()
            .map(|server| server.host.clone())
            .context("No server hosts the stats collector")?,
    };
    let stats_host = stats_host.as_str();

    executor::for_each_node(nodes, |node| async move {
        let name = settings.node_name(&node);
        for command in cmd::configure_sidecar(&name, stats_host, node.ip, secret) {
            testnet.run_on(&node, &command).await?;
        }

        testnet
            .transport()
            .run_detached(
                Target::Node {
                    server: testnet.topology().server_of(&node),
                    node,
                },
                &cmd::start_sidecar(),
            )
            .await
            .context(format!("Failed to start the sidecar on node {}", node.absolute_index))?;

        state.increment_progress();
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_document_matches_default_conf() {
        assert_eq!(GethConf::from_params(&Map::new()).unwrap(), GethConf::default());
    }

    #[test]
    fn test_params_override() {
        let params = Map::from_iter([
            ("networkId".to_string(), Value::from(7)),
            ("extraAccounts".to_string(), Value::from(0)),
        ]);
        let conf = GethConf::from_params(&params).unwrap();
        assert_eq!(conf.network_id, 7);
        assert_eq!(conf.extra_accounts, 0);
        assert_eq!(conf.max_peers, 1000);
    }

    #[test]
    fn test_build_steps() {
        assert_eq!(build_steps(5), 33);
        assert_eq!(build_steps(1), 13);
    }

    #[test]
    fn test_password_file() {
        assert_eq!(password_file("abc", 3), "abc\nabc\nabc\n");
    }

    #[test]
    fn test_secret() {
        let secret = generate_secret();
        assert_eq!(secret.len(), SECRET_LEN);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_geth_has_no_additional_logs() {
        assert!(Geth.additional_logs(&Map::new()).is_empty());
        assert_eq!(Geth.services()[0].name, "ethstats");
    }
}
