//! The handle of one in-flight build, and the orchestrator driving builds.

use std::collections::BTreeMap;

use anyhow::{Context, Result};

use crate::{
    BuildState, DeploymentRequest, Inventory, Node, Server, Settings, Topology, ValidatedRequest,
    error::{BuildError, TopologyError},
    record::{BUILD_RECORD_FILE, BuildRecord},
    registry::{PluginRegistry, ProtocolPlugin},
    transport::{RemoteTransport, Target},
};

/// Name of the main output log in [`TestNet::log_paths`].
pub const OUTPUT_LOG: &str = "output";

/// Everything a plugin needs to build one network.
#[derive(Debug)]
pub struct TestNet<'a, T> {
    request: ValidatedRequest,
    topology: Topology,
    state: BuildState,
    transport: &'a T,
    settings: &'a Settings,
    additional_logs: BTreeMap<String, String>,
}

impl<'a, T: RemoteTransport> TestNet<'a, T> {
    /// Create the handle with a fresh build state for `request`.
    pub fn new(
        request: ValidatedRequest,
        topology: Topology,
        transport: &'a T,
        settings: &'a Settings,
    ) -> Self {
        let mut state = BuildState::new(request.id.clone());
        if let Some(dir) = &settings.artifacts_dir {
            state = state.with_artifacts_dir(dir.join(&request.id));
        }

        Self {
            request,
            topology,
            state,
            transport,
            settings,
            additional_logs: BTreeMap::new(),
        }
    }

    /// Declare log files the protocol writes on every node.
    pub fn with_additional_logs(mut self, logs: BTreeMap<String, String>) -> Self {
        self.additional_logs = logs;
        self
    }

    pub fn request(&self) -> &ValidatedRequest {
        &self.request
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn state(&self) -> &BuildState {
        &self.state
    }

    pub fn transport(&self) -> &'a T {
        self.transport
    }

    pub fn settings(&self) -> &'a Settings {
        self.settings
    }

    /// All nodes of the network, ordered by absolute index.
    pub fn nodes(&self) -> &[Node] {
        self.topology.nodes()
    }

    pub fn servers(&self) -> &[Server] {
        self.topology.servers()
    }

    /// Run `argv` inside the container of `node`.
    pub async fn run_on(&self, node: &Node, argv: &[String]) -> Result<String> {
        let server = self.topology.server_of(node);
        self.transport
            .run(Target::Node { server, node: *node }, argv)
            .await
            .context(format!(
                "`{}` failed on node {}",
                argv.first().map(String::as_str).unwrap_or_default(),
                node.absolute_index
            ))
    }

    /// Log files of `node` by name: the main output log, the protocol's
    /// additional logs, then the request's overrides for that node.
    pub fn log_paths(&self, node: &Node) -> BTreeMap<String, String> {
        let mut logs = BTreeMap::from([(
            OUTPUT_LOG.to_string(),
            self.settings.node_output_file.clone(),
        )]);
        logs.extend(self.additional_logs.clone());
        if let Some(overrides) = self.request.logs.get(node.absolute_index) {
            logs.extend(overrides.clone());
        }
        logs
    }

    /// Place `count` more nodes on the server at `server_index`.
    pub fn add_nodes(&mut self, server_index: usize, count: usize) -> Result<Vec<Node>, TopologyError> {
        self.topology.add_nodes(server_index, count)
    }
}

/// Runs deployment requests through validation, plugin lookup, placement
/// and the plugin's build.
#[derive(Debug)]
pub struct Orchestrator<'a, T> {
    registry: &'a PluginRegistry,
    inventory: &'a Inventory,
    transport: &'a T,
    settings: &'a Settings,
}

impl<'a, T: RemoteTransport> Orchestrator<'a, T> {
    pub fn new(
        registry: &'a PluginRegistry,
        inventory: &'a Inventory,
        transport: &'a T,
        settings: &'a Settings,
    ) -> Self {
        Self {
            registry,
            inventory,
            transport,
            settings,
        }
    }

    /// Build the network described by `request`.
    ///
    /// Nothing remote happens unless the request is valid, names a registered
    /// protocol and fits on its servers. On success the handle is returned so
    /// nodes can be added later.
    pub async fn build(&self, mut request: DeploymentRequest) -> Result<TestNet<'a, T>, BuildError> {
        request.ensure_id();
        let request = ValidatedRequest::new(request)?;
        let protocol = self.registry.lookup(&request.protocol)?;

        let server_ids = request.servers.clone().unwrap_or_default();
        let servers = self.inventory.resolve(&server_ids)?;
        let topology = Topology::allocate(servers, request.nodes)?;

        tracing::info!(
            deployment = %request.id,
            protocol = %request.protocol,
            nodes = topology.len(),
            servers = topology.servers().len(),
            "Starting build"
        );

        let logs = protocol.additional_logs(&request.params);
        let testnet =
            TestNet::new(request, topology, self.transport, self.settings).with_additional_logs(logs);

        let result = protocol.build(&testnet).await;
        self.save_record(&testnet, result.as_ref().err());

        match result {
            Ok(()) => {
                tracing::info!(deployment = %testnet.request().id, status = %testnet.state().status(), "Build complete");
                Ok(testnet)
            }
            Err(source) => {
                let stage = testnet.state().stage();
                tracing::error!(deployment = %testnet.request().id, stage = %stage, error = ?source, "Build failed");
                Err(BuildError::Failed { stage, source })
            }
        }
    }

    /// Add `count` nodes on the server at `server_index` to a built network.
    pub async fn add_nodes(
        &self,
        testnet: &mut TestNet<'a, T>,
        server_index: usize,
        count: usize,
    ) -> Result<Vec<Node>, BuildError> {
        let protocol = self.registry.lookup(&testnet.request().protocol)?;
        let nodes = testnet.add_nodes(server_index, count)?;

        tracing::info!(
            deployment = %testnet.request().id,
            server = server_index,
            count,
            "Adding nodes"
        );

        let result = protocol.add_nodes(testnet, &nodes).await;
        self.save_record(testnet, result.as_ref().err());

        result.map_err(|source| BuildError::Failed {
            stage: testnet.state().stage(),
            source,
        })?;
        Ok(nodes)
    }

    fn save_record(&self, testnet: &TestNet<'a, T>, error: Option<&anyhow::Error>) {
        let Some(dir) = testnet.state().artifacts_dir() else {
            return;
        };

        let saved = crate::fs::FsHandler::create_dir(dir)
            .and_then(|_| BuildRecord::finish(testnet.request(), testnet.state(), error))
            .and_then(|record| record.save_to_file(&dir.join(BUILD_RECORD_FILE)));

        if let Err(e) = saved {
            tracing::warn!(deployment = %testnet.request().id, error = ?e, "Failed to save build record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{topology::tests::servers, transport::RecordingTransport};

    fn inventory() -> Inventory {
        Inventory {
            servers: servers(&[2, 2, 2]),
        }
    }

    #[test]
    fn test_log_paths_merge() {
        let transport = RecordingTransport::new();
        let settings = Settings::default();

        let mut request = DeploymentRequest::new("plumtree", 2)
            .servers(vec![1])
            .images(vec!["plumtree".to_string()]);
        request.logs = vec![
            BTreeMap::new(),
            BTreeMap::from([("json".to_string(), "/data/custom.json".to_string())]),
        ];

        let testnet = TestNet::new(
            ValidatedRequest::new(request).unwrap(),
            Topology::allocate(servers(&[2]), 2).unwrap(),
            &transport,
            &settings,
        )
        .with_additional_logs(BTreeMap::from([(
            "json".to_string(),
            "/plumtree/data/log.json".to_string(),
        )]));

        let first = testnet.log_paths(&testnet.nodes()[0]);
        assert_eq!(first["output"], "/output.log");
        assert_eq!(first["json"], "/plumtree/data/log.json");

        let second = testnet.log_paths(&testnet.nodes()[1]);
        assert_eq!(second["json"], "/data/custom.json");
    }

    #[tokio::test]
    async fn test_invalid_request_has_no_side_effect() {
        let registry = PluginRegistry::with_builtin();
        let inventory = inventory();
        let transport = RecordingTransport::new();
        let settings = Settings::default();
        let orchestrator = Orchestrator::new(&registry, &inventory, &transport, &settings);

        let request = DeploymentRequest::new("geth", 0)
            .servers(vec![1])
            .images(vec!["geth".to_string()]);
        let err = orchestrator.build(request).await.unwrap_err();

        assert!(matches!(err, BuildError::Validation(_)));
        assert_eq!(err.to_string(), "must have at least 1 node");
        assert!(err.stage().is_none());
        assert!(transport.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_protocol_has_no_side_effect() {
        let registry = PluginRegistry::with_builtin();
        let inventory = inventory();
        let transport = RecordingTransport::new();
        let settings = Settings::default();
        let orchestrator = Orchestrator::new(&registry, &inventory, &transport, &settings);

        let request = DeploymentRequest::new("eos", 2)
            .servers(vec![1])
            .images(vec!["eos".to_string()]);
        let err = orchestrator.build(request).await.unwrap_err();

        assert!(matches!(err, BuildError::PluginNotFound(_)));
        assert!(transport.is_empty());
    }

    #[tokio::test]
    async fn test_placement_errors_have_no_side_effect() {
        let registry = PluginRegistry::with_builtin();
        let inventory = inventory();
        let transport = RecordingTransport::new();
        let settings = Settings::default();
        let orchestrator = Orchestrator::new(&registry, &inventory, &transport, &settings);

        let unknown = DeploymentRequest::new("plumtree", 2)
            .servers(vec![9])
            .images(vec!["plumtree".to_string()]);
        assert!(matches!(
            orchestrator.build(unknown).await,
            Err(BuildError::Topology(TopologyError::UnknownServer(9)))
        ));

        let too_big = DeploymentRequest::new("plumtree", 5)
            .servers(vec![1, 2])
            .images(vec!["plumtree".to_string()]);
        assert!(matches!(
            orchestrator.build(too_big).await,
            Err(BuildError::Topology(TopologyError::InsufficientCapacity { .. }))
        ));

        assert!(transport.is_empty());
    }
}
