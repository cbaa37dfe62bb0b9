//! Artifact distribution: store an artifact in the build state, stage it on
//! every server, then copy it into the working directory of each node.

use anyhow::{Context, Result};

use crate::{
    Node, TestNet, executor,
    transport::{RemoteTransport, Target, argv},
};

/// A named file to hand out to nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Artifact name, also the path below the staging directory.
    pub name: String,
    pub content: String,
}

impl Artifact {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Hand one artifact to every node in `nodes`, into `node_dir`.
pub async fn distribute<T: RemoteTransport>(
    testnet: &TestNet<'_, T>,
    nodes: &[Node],
    artifact: Artifact,
    node_dir: &str,
) -> Result<()> {
    distribute_filtered(testnet, nodes, &[artifact], node_dir, |_, _| true).await
}

/// Hand several artifacts out at once. Node `n` receives `artifacts[i]`
/// when `keep(n, i)` holds.
pub async fn distribute_filtered<T, F>(
    testnet: &TestNet<'_, T>,
    nodes: &[Node],
    artifacts: &[Artifact],
    node_dir: &str,
    keep: F,
) -> Result<()>
where
    T: RemoteTransport,
    F: Fn(&Node, usize) -> bool,
{
    let settings = testnet.settings();
    let transport = testnet.transport();
    let deployment = testnet.state().deployment_id();

    for artifact in artifacts {
        testnet.state().write(&artifact.name, artifact.content.as_str())?;
    }

    executor::for_each_server(testnet.topology().servers(), |_, server| async move {
        for artifact in artifacts {
            let dest = settings.staged_path(deployment, &artifact.name);
            transport
                .copy_to_host(server, &artifact.content, &dest)
                .await
                .context(format!("Failed to stage {} on {}", artifact.name, server.host))?;
        }
        Ok(())
    })
    .await?;

    let keep = &keep;
    executor::for_each_node(nodes, |node| async move {
        let server = testnet.topology().server_of(&node);
        let container = settings.node_container(&node);

        transport
            .run(Target::Node { server, node }, &argv(["mkdir", "-p", node_dir]))
            .await?;

        for (index, artifact) in artifacts.iter().enumerate() {
            if !keep(&node, index) {
                continue;
            }
            let dest = format!("{}/{}", node_dir.trim_end_matches('/'), artifact.file_name());
            transport
                .run(
                    Target::Host(server),
                    &argv([
                        "docker".to_string(),
                        "cp".to_string(),
                        settings.staged_path(deployment, &artifact.name),
                        format!("{container}:{dest}"),
                    ]),
                )
                .await
                .context(format!("Failed to copy {} into {}", artifact.name, container))?;
        }
        Ok(())
    })
    .await?;

    tracing::debug!(
        deployment = %testnet.state().deployment_id(),
        artifacts = artifacts.len(),
        nodes = nodes.len(),
        node_dir,
        "Artifacts distributed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DeploymentRequest, Settings, Topology, ValidatedRequest, topology::tests::servers,
        transport::{ActionKind, RecordingTransport},
    };

    fn testnet<'a>(transport: &'a RecordingTransport, settings: &'a Settings) -> TestNet<'a, RecordingTransport> {
        testnet_with_id(transport, settings, "nb-test")
    }

    fn testnet_with_id<'a>(
        transport: &'a RecordingTransport,
        settings: &'a Settings,
        id: &str,
    ) -> TestNet<'a, RecordingTransport> {
        let mut request = DeploymentRequest::new("geth", 3)
            .servers(vec![1, 2])
            .images(vec!["geth".to_string()]);
        request.id = id.to_string();
        let topology = Topology::new(servers(&[2, 1]), &[2, 1]).unwrap();
        TestNet::new(
            ValidatedRequest::new(request).unwrap(),
            topology,
            transport,
            settings,
        )
    }

    #[tokio::test]
    async fn test_distribute_three_steps() {
        let transport = RecordingTransport::new();
        let settings = Settings::default();
        let testnet = testnet(&transport, &settings);

        distribute(
            &testnet,
            testnet.topology().nodes(),
            Artifact::new("passwd", "secret\n"),
            "/geth/",
        )
        .await
        .unwrap();

        assert_eq!(testnet.state().read("passwd").as_deref(), Some("secret\n"));

        let actions = transport.actions();
        let staged: Vec<_> = actions
            .iter()
            .filter(|a| matches!(a.kind, ActionKind::CopyToHost { .. }))
            .map(|a| a.host.clone())
            .collect();
        assert_eq!(staged.len(), 2);

        let copies: Vec<_> = actions
            .iter()
            .filter(|a| a.starts_with(&["docker", "cp"]))
            .map(|a| a.command())
            .collect();
        assert_eq!(copies.len(), 3);
        assert!(copies.contains(&"docker cp /tmp/netbake/nb-test/passwd netbake-node1:/geth/passwd".to_string()));

        // Staging happens before any node copy.
        let last_stage = actions
            .iter()
            .rposition(|a| matches!(a.kind, ActionKind::CopyToHost { .. }))
            .unwrap();
        let first_copy = actions.iter().position(|a| a.starts_with(&["docker", "cp"])).unwrap();
        assert!(last_stage < first_copy);
    }

    #[tokio::test]
    async fn test_distribute_filtered_skips_own_keystore() {
        let transport = RecordingTransport::new();
        let settings = Settings::default();
        let testnet = testnet(&transport, &settings);

        let keystores: Vec<_> = (0..3)
            .map(|i| Artifact::new(format!("keystore/account{i}"), format!("{{\"id\":{i}}}")))
            .collect();

        distribute_filtered(
            &testnet,
            testnet.topology().nodes(),
            &keystores,
            "/geth/keystore",
            |node, index| node.absolute_index != index,
        )
        .await
        .unwrap();

        let copies: Vec<(String, String)> = transport
            .actions()
            .into_iter()
            .filter(|a| a.starts_with(&["docker", "cp"]))
            .map(|a| (a.host.clone(), a.argv[3].clone()))
            .collect();
        let copied = |host: &str, dest: &str| copies.contains(&(host.to_string(), dest.to_string()));

        // Each of the three nodes gets the two keystores that are not its own.
        assert_eq!(copies.len(), 6);
        assert!(!copied("172.16.0.1", "netbake-node0:/geth/keystore/account0"));
        assert!(copied("172.16.0.1", "netbake-node0:/geth/keystore/account2"));
        assert!(!copied("172.16.0.1", "netbake-node1:/geth/keystore/account1"));
        // Node 2 is local node 0 of the second server.
        assert!(copied("172.16.0.2", "netbake-node0:/geth/keystore/account0"));
        assert!(!copied("172.16.0.2", "netbake-node0:/geth/keystore/account2"));
    }

    #[tokio::test]
    async fn test_deployments_stage_apart() {
        let transport = RecordingTransport::new();
        let settings = Settings::default();
        let first = testnet_with_id(&transport, &settings, "deploy-a");
        let second = testnet_with_id(&transport, &settings, "deploy-b");

        for testnet in [&first, &second] {
            distribute(
                testnet,
                testnet.topology().nodes(),
                Artifact::new("passwd", testnet.state().deployment_id()),
                "/geth",
            )
            .await
            .unwrap();
        }

        let staged: Vec<(String, String)> = transport
            .actions()
            .into_iter()
            .filter_map(|a| match a.kind {
                ActionKind::CopyToHost { dest, content } if a.host == "172.16.0.1" => Some((dest, content)),
                _ => None,
            })
            .collect();
        assert_eq!(
            staged,
            vec![
                ("/tmp/netbake/deploy-a/passwd".to_string(), "deploy-a".to_string()),
                ("/tmp/netbake/deploy-b/passwd".to_string(), "deploy-b".to_string()),
            ]
        );

        let sources: Vec<String> = transport
            .actions()
            .into_iter()
            .filter(|a| a.starts_with(&["docker", "cp"]))
            .map(|a| a.argv[2].clone())
            .collect();
        assert_eq!(sources.len(), 6);
        assert_eq!(sources.iter().filter(|s| s.contains("/deploy-a/")).count(), 3);
    }

    #[tokio::test]
    async fn test_distribute_fails_when_staging_fails() {
        let transport = RecordingTransport::with_responder(|action| match &action.kind {
            ActionKind::CopyToHost { .. } if action.host == "172.16.0.2" => anyhow::bail!("disk full"),
            _ => Ok(String::new()),
        });
        let settings = Settings::default();
        let testnet = testnet(&transport, &settings);

        let err = distribute(
            &testnet,
            testnet.topology().nodes(),
            Artifact::new("passwd", "secret\n"),
            "/geth",
        )
        .await
        .unwrap_err();

        assert!(format!("{err:#}").contains("disk full"));
        assert!(!transport.actions().iter().any(|a| a.starts_with(&["docker", "cp"])));
    }
}
