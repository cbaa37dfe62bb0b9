//! Gossip overlay: every node runs the plumtree daemon pointed at the full
//! peer list.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    Node, TestNet, executor,
    registry::{ProtocolPlugin, Service},
    transport::RemoteTransport,
};

pub mod cmd;

pub use cmd::GossipCmdBuilder;

const DEFAULTS: &str = include_str!("../../../resources/plumtree/defaults.json");
const PARAMS: &str = include_str!("../../../resources/plumtree/params.json");

/// Peer list of the network.
pub const PEERS_ARTIFACT: &str = "peers.json";

/// Daemon parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlumtreeConf {
    pub port: u16,
    pub rpc_port: u16,
    pub log_file: String,
}

impl Default for PlumtreeConf {
    fn default() -> Self {
        Self {
            port: 9000,
            rpc_port: 9001,
            log_file: "/plumtree/data/log.json".to_string(),
        }
    }
}

impl PlumtreeConf {
    /// Read the request's parameters over the defaults.
    pub fn from_params(params: &Map<String, Value>) -> Result<Self> {
        super::merge_params(DEFAULTS, params)
    }
}

/// The plumtree protocol plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Plumtree;

impl ProtocolPlugin for Plumtree {
    async fn build<T: RemoteTransport>(&self, testnet: &TestNet<'_, T>) -> Result<()> {
        let state = testnet.state();
        let nodes = testnet.nodes();

        state.set_stage("Parsing parameters");
        let conf = PlumtreeConf::from_params(&testnet.request().params)?;
        state.set_total_steps(2 * nodes.len());

        state.set_stage("Computing peers");
        let peers = peer_list(testnet, &conf)?;

        state.set_stage("Starting plumtree");
        start(testnet, nodes, &conf, &peers).await?;

        tracing::info!(
            deployment = %state.deployment_id(),
            nodes = nodes.len(),
            "plumtree network started"
        );
        Ok(())
    }

    async fn add_nodes<T: RemoteTransport>(&self, testnet: &TestNet<'_, T>, nodes: &[Node]) -> Result<()> {
        let state = testnet.state();

        state.set_stage("Parsing parameters");
        let conf = PlumtreeConf::from_params(&testnet.request().params)?;
        state.set_total_steps(state.total_steps() + 2 * nodes.len());

        // The new nodes know every peer; existing nodes learn about them
        // through gossip.
        state.set_stage("Computing peers");
        let peers = peer_list(testnet, &conf)?;

        state.set_stage("Starting plumtree");
        start(testnet, nodes, &conf, &peers).await
    }

    fn defaults(&self) -> &'static str {
        DEFAULTS
    }

    fn params_schema(&self) -> &'static str {
        PARAMS
    }

    fn services(&self) -> Vec<Service> {
        Vec::new()
    }

    fn additional_logs(&self, params: &Map<String, Value>) -> BTreeMap<String, String> {
        // Unusable params fail the build itself, report the default then.
        let conf = PlumtreeConf::from_params(params).unwrap_or_default();
        BTreeMap::from([("json".to_string(), conf.log_file)])
    }
}

/// Peer addresses of every node, by absolute index. Records the list as an
/// artifact and counts one step per newly seen node.
fn peer_list<T: RemoteTransport>(testnet: &TestNet<'_, T>, conf: &PlumtreeConf) -> Result<Vec<String>> {
    let state = testnet.state();
    let known = state
        .read(PEERS_ARTIFACT)
        .map(|json| serde_json::from_str::<Vec<String>>(&json))
        .transpose()
        .context("Failed to parse the retained peer list")?
        .map_or(0, |peers| peers.len());

    let peers: Vec<String> = testnet
        .nodes()
        .iter()
        .map(|node| {
            cmd::peer_address(
                &testnet.settings().node_container(node),
                node.ip,
                conf.port,
            )
        })
        .collect();

    for _ in known..peers.len() {
        state.increment_progress();
    }

    let json = serde_json::to_string_pretty(&peers).context("Failed to serialize the peer list")?;
    state.write(PEERS_ARTIFACT, json)?;
    Ok(peers)
}

async fn start<T: RemoteTransport>(
    testnet: &TestNet<'_, T>,
    nodes: &[Node],
    conf: &PlumtreeConf,
    peers: &[String],
) -> Result<()> {
    let state = testnet.state();
    let settings = testnet.settings();

    executor::for_each_node(nodes, |node| async move {
        let command = GossipCmdBuilder::new(conf.port, conf.rpc_port)
            .log_file(conf.log_file.as_str())
            .peers(peers.iter().map(String::as_str))
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
            .context(format!("Failed to start plumtree on node {}", node.absolute_index))?;

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
        assert_eq!(
            PlumtreeConf::from_params(&Map::new()).unwrap(),
            PlumtreeConf::default()
        );
    }

    #[test]
    fn test_json_log_follows_params() {
        let params = Map::from_iter([("logFile".to_string(), Value::from("/var/log/gossip.json"))]);
        assert_eq!(Plumtree.additional_logs(&params)["json"], "/var/log/gossip.json");

        let broken = Map::from_iter([("port".to_string(), Value::from(70000))]);
        assert_eq!(Plumtree.additional_logs(&broken)["json"], "/plumtree/data/log.json");
    }

    #[test]
    fn test_port_out_of_range_is_rejected() {
        let params = Map::from_iter([("port".to_string(), Value::from(70000))]);
        assert!(PlumtreeConf::from_params(&params).is_err());
    }
}
