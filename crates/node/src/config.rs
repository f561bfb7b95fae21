use std::fs;
use std::path::PathBuf;
use std::thread;

use cobalt_log::Level;
use cobalt_primitives::{hash256_from_hex, Hash256, ZERO_HASH};
use serde::Deserialize;

const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 5;
const DEFAULT_MINIMUM_SYNC_RATE: u32 = 10;
const DEFAULT_BLOCK_POLL_SECS: u64 = 1;
const DEFAULT_MINIMUM_FEE_SATOSHIS: u64 = 1;

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Candidate peer target for header sync; 0 means one per core.
    pub sync_peers: usize,
    /// Expiry interval for the per-peer sync rate gate.
    pub sync_timeout_seconds: u64,
    /// Floor in headers per second under which a sync peer is dropped.
    pub minimum_sync_rate: u32,
    /// Poller cadence once out of initial sync.
    pub block_poll_seconds: u64,
    pub minimum_fee_satoshis: u64,
    pub reject_conflicts: bool,
    pub relay_transactions: bool,
    pub refresh_transactions: bool,
    /// Hash of the genesis block seeded into the chain store.
    pub genesis_hash: String,
    /// Header sync runs from the current tip up to this checkpoint.
    pub checkpoint_height: i32,
    pub checkpoint_hash: String,
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            sync_peers: 0,
            sync_timeout_seconds: DEFAULT_SYNC_TIMEOUT_SECS,
            minimum_sync_rate: DEFAULT_MINIMUM_SYNC_RATE,
            block_poll_seconds: DEFAULT_BLOCK_POLL_SECS,
            minimum_fee_satoshis: DEFAULT_MINIMUM_FEE_SATOSHIS,
            reject_conflicts: true,
            relay_transactions: true,
            refresh_transactions: true,
            genesis_hash: hex_of(&ZERO_HASH),
            checkpoint_height: 0,
            checkpoint_hash: hex_of(&ZERO_HASH),
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn resolved_sync_peers(&self) -> usize {
        if self.sync_peers > 0 {
            return self.sync_peers;
        }
        thread::available_parallelism()
            .map(|value| value.get())
            .unwrap_or(1)
    }

    pub fn genesis_hash(&self) -> Result<Hash256, String> {
        hash256_from_hex(&self.genesis_hash)
            .ok_or_else(|| format!("invalid genesis hash '{}'", self.genesis_hash))
    }

    pub fn checkpoint_hash(&self) -> Result<Hash256, String> {
        hash256_from_hex(&self.checkpoint_hash)
            .ok_or_else(|| format!("invalid checkpoint hash '{}'", self.checkpoint_hash))
    }

    pub fn log_level(&self) -> Result<Level, String> {
        Level::parse(&self.log_level)
            .ok_or_else(|| format!("invalid log level '{}'", self.log_level))
    }
}

fn hex_of(hash: &Hash256) -> String {
    cobalt_primitives::hash256_to_hex(hash)
}

pub fn parse_args() -> Result<NodeConfig, String> {
    parse_from(std::env::args().skip(1))
}

fn parse_from(args: impl Iterator<Item = String>) -> Result<NodeConfig, String> {
    let mut conf_path: Option<PathBuf> = None;
    let mut overrides: Vec<(String, String)> = Vec::new();
    let mut args = args;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--conf" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --conf\n{}", usage()))?;
                conf_path = Some(PathBuf::from(value));
            }
            "--help" | "-h" => return Err(usage()),
            flag if flag.starts_with("--") => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for {flag}\n{}", usage()))?;
                overrides.push((flag.trim_start_matches("--").replace('-', "_"), value));
            }
            other => return Err(format!("unknown argument '{other}'\n{}", usage())),
        }
    }

    let mut config = match conf_path {
        Some(path) => {
            let contents = fs::read_to_string(&path)
                .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
            serde_json::from_str::<NodeConfig>(&contents)
                .map_err(|err| format!("failed to parse {}: {err}", path.display()))?
        }
        None => NodeConfig::default(),
    };

    for (key, value) in overrides {
        apply_override(&mut config, &key, &value)?;
    }

    config.log_level()?;
    config.genesis_hash()?;
    config.checkpoint_hash()?;
    Ok(config)
}

fn apply_override(config: &mut NodeConfig, key: &str, value: &str) -> Result<(), String> {
    let bad = |key: &str, value: &str| format!("invalid value '{value}' for --{key}\n{}", usage());
    match key {
        "sync_peers" => config.sync_peers = value.parse().map_err(|_| bad(key, value))?,
        "sync_timeout_seconds" => {
            config.sync_timeout_seconds = value.parse().map_err(|_| bad(key, value))?
        }
        "minimum_sync_rate" => {
            config.minimum_sync_rate = value.parse().map_err(|_| bad(key, value))?
        }
        "block_poll_seconds" => {
            config.block_poll_seconds = value.parse().map_err(|_| bad(key, value))?
        }
        "minimum_fee_satoshis" => {
            config.minimum_fee_satoshis = value.parse().map_err(|_| bad(key, value))?
        }
        "reject_conflicts" => {
            config.reject_conflicts = value.parse().map_err(|_| bad(key, value))?
        }
        "relay_transactions" => {
            config.relay_transactions = value.parse().map_err(|_| bad(key, value))?
        }
        "refresh_transactions" => {
            config.refresh_transactions = value.parse().map_err(|_| bad(key, value))?
        }
        "genesis_hash" => config.genesis_hash = value.to_string(),
        "checkpoint_height" => {
            config.checkpoint_height = value.parse().map_err(|_| bad(key, value))?
        }
        "checkpoint_hash" => config.checkpoint_hash = value.to_string(),
        "log_level" => config.log_level = value.to_string(),
        _ => return Err(format!("unknown option --{key}\n{}", usage())),
    }
    Ok(())
}

fn usage() -> String {
    [
        "usage: cobaltd [options]",
        "  --conf <path>                 load settings from a JSON file",
        "  --sync-peers <n>              sync candidate target, 0 = cores",
        "  --sync-timeout-seconds <n>    sync rate expiry interval",
        "  --minimum-sync-rate <n>       headers/sec floor per sync peer",
        "  --block-poll-seconds <n>      block poll cadence",
        "  --minimum-fee-satoshis <n>    mempool fee floor",
        "  --reject-conflicts <bool>     first-seen conflict policy",
        "  --relay-transactions <bool>   advertise transaction relay",
        "  --refresh-transactions <bool> request mempool on new channels",
        "  --genesis-hash <hex>          genesis block hash",
        "  --checkpoint-height <n>       header sync stop height",
        "  --checkpoint-hash <hex>       header sync stop hash",
        "  --log-level <level>           error, warn, info or debug",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args<'a>(values: &'a [&'a str]) -> impl Iterator<Item = String> + 'a {
        values.iter().map(|value| value.to_string())
    }

    #[test]
    fn defaults_match_recognized_options() {
        let config = parse_from(args(&[])).expect("defaults");
        assert_eq!(config.sync_timeout_seconds, 5);
        assert_eq!(config.minimum_sync_rate, 10);
        assert_eq!(config.block_poll_seconds, 1);
        assert_eq!(config.minimum_fee_satoshis, 1);
        assert!(config.reject_conflicts);
        assert!(config.relay_transactions);
        assert!(config.refresh_transactions);
        assert!(config.resolved_sync_peers() >= 1);
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse_from(args(&[
            "--sync-timeout-seconds",
            "9",
            "--minimum-sync-rate",
            "50",
            "--relay-transactions",
            "false",
            "--checkpoint-height",
            "1000",
        ]))
        .expect("parse");
        assert_eq!(config.sync_timeout_seconds, 9);
        assert_eq!(config.minimum_sync_rate, 50);
        assert!(!config.relay_transactions);
        assert_eq!(config.checkpoint_height, 1000);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(parse_from(args(&["--sync-timeout-seconds", "soon"])).is_err());
        assert!(parse_from(args(&["--checkpoint-hash", "abcd"])).is_err());
        assert!(parse_from(args(&["--log-level", "loud"])).is_err());
        assert!(parse_from(args(&["--banana", "1"])).is_err());
        assert!(parse_from(args(&["stray"])).is_err());
    }
}
