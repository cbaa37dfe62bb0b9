//! Command builder for the plumtree gossip daemon.

use std::net::IpAddr;

/// Peer address of the node hosted in container `container` at `ip`.
pub fn peer_address(container: &str, ip: IpAddr, port: u16) -> String {
    format!("tcp://{container}@{ip}:{port}")
}

/// Builder for gossip commands.
#[derive(Debug, Clone)]
pub struct GossipCmdBuilder {
    listen: String,
    port: u16,
    rpc_port: u16,
    log_file: String,
    peers: Vec<String>,
}

impl GossipCmdBuilder {
    /// Create a new gossip command builder.
    pub fn new(port: u16, rpc_port: u16) -> Self {
        Self {
            listen: "0.0.0.0".to_string(),
            port,
            rpc_port,
            log_file: "/plumtree/data/log.json".to_string(),
            peers: Vec::new(),
        }
    }

    /// Set the file gossip logs its messages to.
    pub fn log_file(mut self, path: impl Into<String>) -> Self {
        self.log_file = path.into();
        self
    }

    /// Set the peers to connect to.
    pub fn peers(mut self, peers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.peers = peers.into_iter().map(Into::into).collect();
        self
    }

    /// Build the command as a vector of strings.
    pub fn build(self) -> Vec<String> {
        let mut cmd = vec![
            "gossip".to_string(),
            "-n".to_string(),
            self.listen,
            "-l".to_string(),
            self.port.to_string(),
            "-r".to_string(),
            self.rpc_port.to_string(),
            "-m".to_string(),
            self.log_file,
        ];
        cmd.extend(self.peers.into_iter().map(|peer| format!("--peer={peer}")));
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_address() {
        assert_eq!(
            peer_address("netbake-node1", "10.0.0.3".parse().unwrap(), 9000),
            "tcp://netbake-node1@10.0.0.3:9000"
        );
    }

    #[test]
    fn test_gossip_cmd() {
        let cmd = GossipCmdBuilder::new(9000, 9001)
            .peers(["tcp://a@10.0.0.2:9000", "tcp://b@10.0.0.3:9000"])
            .build();
        assert_eq!(
            cmd.join(" "),
            "gossip -n 0.0.0.0 -l 9000 -r 9001 -m /plumtree/data/log.json \
             --peer=tcp://a@10.0.0.2:9000 --peer=tcp://b@10.0.0.3:9000"
        );
    }
}
