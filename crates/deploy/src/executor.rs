//! Concurrent fan-out over the nodes and servers of a topology.
//!
//! Every worker future is created before any is polled, and the call returns
//! only once all of them have finished. Siblings of a failed worker are never
//! cancelled. When several workers fail, the failure of the lowest absolute
//! node index (or server index) is returned, whatever the completion order.

use std::future::Future;

use anyhow::Result;
use futures::future::join_all;

use crate::{Node, Server};

/// Run `worker` once per node, concurrently.
pub async fn for_each_node<F, Fut>(nodes: &[Node], worker: F) -> Result<()>
where
    F: Fn(Node) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    map_nodes(nodes, worker).await.map(|_| ())
}

/// Run `worker` once per node, concurrently, and collect the outputs.
///
/// Output `i` belongs to `nodes[i]`. Each worker only ever produces its own
/// slot, so collection needs no locking.
pub async fn map_nodes<T, F, Fut>(nodes: &[Node], worker: F) -> Result<Vec<T>>
where
    F: Fn(Node) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let results = join_all(nodes.iter().map(|node| worker(*node))).await;

    let mut outputs = Vec::with_capacity(results.len());
    let mut first_failure: Option<(Node, anyhow::Error)> = None;
    let mut failures = 0;

    for (node, result) in nodes.iter().zip(results) {
        match result {
            Ok(output) => outputs.push(output),
            Err(e) => {
                failures += 1;
                tracing::error!(
                    node = node.absolute_index,
                    server = node.server_index,
                    local = node.local_index,
                    error = ?e,
                    "Node worker failed"
                );
                let lower = first_failure
                    .as_ref()
                    .is_none_or(|(first, _)| node.absolute_index < first.absolute_index);
                if lower {
                    first_failure = Some((*node, e));
                }
            }
        }
    }

    match first_failure {
        None => Ok(outputs),
        Some((node, e)) => {
            tracing::error!(
                failures,
                workers = nodes.len(),
                node = node.absolute_index,
                "Node fan-out failed"
            );
            Err(e.context(format!(
                "node {} (server {}, local {}) failed",
                node.absolute_index, node.server_index, node.local_index
            )))
        }
    }
}

/// Run `worker` once per server, concurrently. The worker receives the
/// server's position in `servers`.
pub async fn for_each_server<'a, F, Fut>(servers: &'a [Server], worker: F) -> Result<()>
where
    F: Fn(usize, &'a Server) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let results = join_all(
        servers
            .iter()
            .enumerate()
            .map(|(index, server)| worker(index, server)),
    )
    .await;

    let mut first_failure: Option<(usize, anyhow::Error)> = None;
    let mut failures = 0;

    for (index, result) in results.into_iter().enumerate() {
        if let Err(e) = result {
            failures += 1;
            tracing::error!(
                server = index,
                host = %servers[index].host,
                error = ?e,
                "Server worker failed"
            );
            // Results come back in server order.
            if first_failure.is_none() {
                first_failure = Some((index, e));
            }
        }
    }

    match first_failure {
        None => Ok(()),
        Some((index, e)) => {
            tracing::error!(
                failures,
                workers = servers.len(),
                server = index,
                "Server fan-out failed"
            );
            Err(e.context(format!("server {} ({}) failed", index, servers[index].host)))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::{Topology, topology::tests::servers};

    fn topology(counts: &[usize]) -> Topology {
        Topology::new(servers(counts), counts).unwrap()
    }

    #[tokio::test]
    async fn test_map_nodes_preserves_absolute_order() {
        let topology = topology(&[2, 2, 1]);

        // Later nodes finish first.
        let outputs = map_nodes(topology.nodes(), |node| async move {
            tokio::time::sleep(Duration::from_millis(10 * (5 - node.absolute_index as u64))).await;
            Ok((node.server_index, node.local_index, node.absolute_index))
        })
        .await
        .unwrap();

        assert_eq!(
            outputs,
            vec![(0, 0, 0), (0, 1, 1), (1, 0, 2), (1, 1, 3), (2, 0, 4)]
        );
    }

    #[tokio::test]
    async fn test_all_workers_run_despite_failure() {
        let topology = topology(&[2, 2, 1]);
        let executed = AtomicUsize::new(0);

        let result = for_each_node(topology.nodes(), |node| {
            let executed = &executed;
            async move {
                executed.fetch_add(1, Ordering::SeqCst);
                if node.absolute_index == 0 {
                    anyhow::bail!("boom");
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(executed.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_lowest_index_failure_wins_regardless_of_timing() {
        let topology = topology(&[2, 2, 1]);
        let finished = AtomicUsize::new(0);

        // Node 4 fails immediately, node 1 fails last.
        let err = for_each_node(topology.nodes(), |node| {
            let finished = &finished;
            async move {
                let result = match node.absolute_index {
                    4 => Err(anyhow::anyhow!("node four broke")),
                    1 => {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(anyhow::anyhow!("node one broke"))
                    }
                    _ => Ok(()),
                };
                finished.fetch_add(1, Ordering::SeqCst);
                result
            }
        })
        .await
        .unwrap_err();

        assert_eq!(finished.load(Ordering::SeqCst), 5);
        let message = format!("{err:#}");
        assert!(message.starts_with("node 1 (server 0, local 1) failed"), "{message}");
        assert!(message.ends_with("node one broke"), "{message}");
    }

    #[tokio::test]
    async fn test_lowest_index_on_node_subset() {
        let mut topology = Topology::new(servers(&[2, 2]), &[1, 1]).unwrap();
        let added = topology.add_nodes(0, 1).unwrap();
        let nodes: Vec<Node> = vec![added[0], topology.nodes()[1]];

        // Node 2 comes first in the slice but node 1 has the lower index.
        let err = for_each_node(&nodes, |node| async move {
            anyhow::bail!("broke {}", node.absolute_index)
        })
        .await
        .unwrap_err();

        assert!(format!("{err:#}").ends_with("broke 1"), "{err:#}");
    }

    #[tokio::test]
    async fn test_empty_fan_out_succeeds() {
        let outputs: Vec<()> = map_nodes(&[], |_| async { Ok(()) }).await.unwrap();
        assert!(outputs.is_empty());
    }

    #[tokio::test]
    async fn test_for_each_server() {
        let topology = topology(&[2, 2, 1]);
        let visited = AtomicUsize::new(0);

        for_each_server(topology.servers(), |_, _| {
            let visited = &visited;
            async move {
                visited.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();
        assert_eq!(visited.load(Ordering::SeqCst), 3);

        let err = for_each_server(topology.servers(), |index, _| async move {
            tokio::time::sleep(Duration::from_millis(10 * (3 - index as u64))).await;
            if index == 0 {
                anyhow::bail!("first server down");
            }
            if index == 2 {
                anyhow::bail!("last server down");
            }
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(format!("{err:#}").starts_with("server 0 (172.16.0.1) failed"));
    }
}
