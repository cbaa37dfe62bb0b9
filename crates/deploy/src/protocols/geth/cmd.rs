//! Command builders for geth and its monitoring tools.

use std::net::IpAddr;

use alloy_core::primitives::Address;

use crate::transport::argv;

/// Data directory of geth inside a node.
pub const DATA_DIR: &str = "/geth/";

/// Password file inside a node.
pub const PASSWORD_FILE: &str = "/geth/passwd";

/// Directory holding the raw keystores inside a node.
pub const KEYSTORE_DIR: &str = "/geth/keystore";

/// Genesis document inside a node.
pub const GENESIS_FILE: &str = "/geth/CustomGenesis.json";

/// Port of the stats collector.
pub const STATS_PORT: u16 = 3338;

/// Configuration of the monitoring sidecar inside a node.
pub const SIDECAR_CONFIG: &str = "/eth-net-intelligence-api/app.json";

/// `0x`-prefixed lowercase hex of `address`.
pub fn address_hex(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

/// Create a new account protected by the shared password.
pub fn account_new() -> Vec<String> {
    argv([
        "geth",
        "--datadir",
        DATA_DIR,
        "--password",
        PASSWORD_FILE,
        "account",
        "new",
    ])
}

/// Print the raw keystore of the node's account.
pub fn cat_keystore() -> Vec<String> {
    argv(["sh", "-c", "cat /geth/keystore/*"])
}

/// Initialize the chain state from the genesis document.
pub fn init(network_id: u64) -> Vec<String> {
    argv([
        "geth".to_string(),
        "--datadir".to_string(),
        DATA_DIR.to_string(),
        "--networkid".to_string(),
        network_id.to_string(),
        "init".to_string(),
        GENESIS_FILE.to_string(),
    ])
}

/// Print the node's enode record through a throwaway console.
pub fn print_enode(network_id: u64) -> Vec<String> {
    argv([
        "geth".to_string(),
        "--datadir".to_string(),
        DATA_DIR.to_string(),
        "--networkid".to_string(),
        network_id.to_string(),
        "--exec".to_string(),
        "admin.nodeInfo.enode".to_string(),
        "console".to_string(),
    ])
}

/// Builder for the long-running geth command of a node.
#[derive(Debug, Clone)]
pub struct GethCmdBuilder {
    network_id: u64,
    max_peers: u64,
    rpc_addr: String,
    rpc_api: String,
    unlock: Vec<Address>,
    etherbase: Option<Address>,
    mine: bool,
}

impl GethCmdBuilder {
    /// Create a new geth command builder.
    pub fn new(network_id: u64, rpc_addr: IpAddr) -> Self {
        Self {
            network_id,
            max_peers: 25,
            rpc_addr: rpc_addr.to_string(),
            rpc_api: "web3,db,eth,net,personal,miner,txpool".to_string(),
            unlock: Vec::new(),
            etherbase: None,
            mine: true,
        }
    }

    /// Set the maximum number of peers.
    pub fn max_peers(mut self, max_peers: u64) -> Self {
        self.max_peers = max_peers;
        self
    }

    /// Set the accounts to unlock with the shared password.
    pub fn unlock(mut self, accounts: impl IntoIterator<Item = Address>) -> Self {
        self.unlock = accounts.into_iter().collect();
        self
    }

    /// Set the account receiving mining rewards.
    pub fn etherbase(mut self, address: Address) -> Self {
        self.etherbase = Some(address);
        self
    }

    /// Enable or disable mining.
    pub fn mine(mut self, mine: bool) -> Self {
        self.mine = mine;
        self
    }

    /// Build the command as a vector of strings.
    pub fn build(self) -> Vec<String> {
        let mut cmd = vec![
            "geth".to_string(),
            "--datadir".to_string(),
            DATA_DIR.to_string(),
            "--maxpeers".to_string(),
            self.max_peers.to_string(),
            "--networkid".to_string(),
            self.network_id.to_string(),
            "--rpc".to_string(),
            "--nodiscover".to_string(),
            "--rpcaddr".to_string(),
            self.rpc_addr,
            "--rpcapi".to_string(),
            self.rpc_api,
            "--rpccorsdomain".to_string(),
            "0.0.0.0".to_string(),
        ];

        if self.mine {
            cmd.push("--mine".to_string());
        }

        if !self.unlock.is_empty() {
            cmd.push(format!(
                "--unlock={}",
                self.unlock
                    .iter()
                    .map(address_hex)
                    .collect::<Vec<_>>()
                    .join(",")
            ));
            cmd.push("--password".to_string());
            cmd.push(PASSWORD_FILE.to_string());
        }

        if let Some(etherbase) = self.etherbase {
            cmd.push("--etherbase".to_string());
            cmd.push(address_hex(&etherbase));
        }

        cmd.push("console".to_string());
        cmd
    }
}

/// Start the stats collector inside a service container.
pub fn start_stats_collector(container: &str, secret: &str) -> Vec<String> {
    argv([
        "docker".to_string(),
        "exec".to_string(),
        "-d".to_string(),
        "-w".to_string(),
        "/eth-netstats".to_string(),
        "-e".to_string(),
        format!("WS_SECRET={secret}"),
        "-e".to_string(),
        format!("PORT={STATS_PORT}"),
        container.to_string(),
        "npm".to_string(),
        "start".to_string(),
    ])
}

/// Rewrite `key` in the sidecar configuration to `value`.
///
/// `value` must not contain `/`, it is escaped by the caller.
pub fn set_sidecar_value(key: &str, value: &str) -> Vec<String> {
    argv([
        "sed".to_string(),
        "-i".to_string(),
        "-r".to_string(),
        format!(r#"s/"{key}"(\s)*:(\s)*"(\S)*"/"{key}"\t: "{value}"/g"#),
        SIDECAR_CONFIG.to_string(),
    ])
}

/// Rewrite every sidecar setting a node needs.
pub fn configure_sidecar(instance_name: &str, stats_host: &str, rpc_host: IpAddr, secret: &str) -> Vec<Vec<String>> {
    vec![
        set_sidecar_value("INSTANCE_NAME", instance_name),
        set_sidecar_value(
            "WS_SERVER",
            &format!(r"http:\/\/{stats_host}:{STATS_PORT}"),
        ),
        set_sidecar_value("RPC_HOST", &rpc_host.to_string()),
        set_sidecar_value("WS_SECRET", secret),
    ]
}

/// Start the monitoring sidecar.
pub fn start_sidecar() -> Vec<String> {
    argv([
        "sh",
        "-c",
        "cd /eth-net-intelligence-api && pm2 start app.json",
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_new() {
        assert_eq!(
            account_new().join(" "),
            "geth --datadir /geth/ --password /geth/passwd account new"
        );
    }

    #[test]
    fn test_init_and_enode() {
        assert_eq!(
            init(15468).join(" "),
            "geth --datadir /geth/ --networkid 15468 init /geth/CustomGenesis.json"
        );
        assert_eq!(
            print_enode(15468).join(" "),
            "geth --datadir /geth/ --networkid 15468 --exec admin.nodeInfo.enode console"
        );
    }

    #[test]
    fn test_geth_cmd_builder() {
        let a = Address::repeat_byte(0x11);
        let b = Address::repeat_byte(0x22);
        let cmd = GethCmdBuilder::new(15468, "10.0.0.2".parse().unwrap())
            .max_peers(1000)
            .unlock([a, b])
            .etherbase(b)
            .build();

        let unlock = format!("--unlock={},{}", address_hex(&a), address_hex(&b));
        assert!(cmd.contains(&unlock));
        assert!(cmd.contains(&"--mine".to_string()));

        let position = |flag: &str| cmd.iter().position(|arg| arg == flag).unwrap();
        assert_eq!(cmd[position("--rpcaddr") + 1], "10.0.0.2");
        assert_eq!(cmd[position("--maxpeers") + 1], "1000");
        assert_eq!(cmd[position("--etherbase") + 1], address_hex(&b));
        assert_eq!(cmd[position("--password") + 1], PASSWORD_FILE);
        assert_eq!(cmd.last().map(String::as_str), Some("console"));
    }

    #[test]
    fn test_geth_cmd_without_mining() {
        let cmd = GethCmdBuilder::new(1, "10.0.0.2".parse().unwrap())
            .mine(false)
            .build();
        assert!(!cmd.contains(&"--mine".to_string()));
        assert!(!cmd.contains(&"--password".to_string()));
        assert_eq!(
            cmd.join(" "),
            "geth --datadir /geth/ --maxpeers 25 --networkid 1 --rpc --nodiscover \
             --rpcaddr 10.0.0.2 --rpcapi web3,db,eth,net,personal,miner,txpool \
             --rpccorsdomain 0.0.0.0 console"
        );
    }

    #[test]
    fn test_sidecar_commands() {
        let commands = configure_sidecar("netbake-node3", "172.16.0.1", "10.1.0.3".parse().unwrap(), "s3cret");
        assert_eq!(commands.len(), 4);
        assert_eq!(
            commands[0][3],
            r#"s/"INSTANCE_NAME"(\s)*:(\s)*"(\S)*"/"INSTANCE_NAME"\t: "netbake-node3"/g"#
        );
        assert_eq!(
            commands[1][3],
            r#"s/"WS_SERVER"(\s)*:(\s)*"(\S)*"/"WS_SERVER"\t: "http:\/\/172.16.0.1:3338"/g"#
        );
        assert_eq!(commands[2][4], SIDECAR_CONFIG);
    }

    #[test]
    fn test_stats_collector() {
        let cmd = start_stats_collector("netbake-service0", "s3cret");
        assert_eq!(
            cmd.join(" "),
            "docker exec -d -w /eth-netstats -e WS_SECRET=s3cret -e PORT=3338 netbake-service0 npm start"
        );
    }
}
