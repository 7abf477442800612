//! YAML description of a network.

use crate::Error;
use bytes::Bytes;
use commonware_utils::from_hex;
use ocrnet_bootstrap::{
    config::{encryption::SharedSecret, SharedConfigParameters},
    contracts::Artifacts,
    poller::Policy,
    sequencer::Config as BootstrapConfig,
    types::parse_address,
    OracleId, PeerId, ServiceId, U256,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

/// A chain peer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PeerConfig {
    pub name: String,
    pub host: String,
    pub rpc_port: u16,
}

/// A service reachable at a single port.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
}

/// An oracle node and the credentials of its API user.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OracleConfig {
    pub name: String,
    pub host: String,
    pub api_port: u16,
    pub p2p_port: u16,
    pub email: String,
    pub password: String,
}

/// Files holding the (hex-encoded) creation code of each contract.
///
/// Relative paths are resolved against the directory of the config file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ArtifactsConfig {
    pub token: PathBuf,
    pub access_controller: PathBuf,
    pub aggregator: PathBuf,
}

impl ArtifactsConfig {
    pub fn load(&self, base: &Path) -> Result<Artifacts, Error> {
        Ok(Artifacts {
            token: read_code(base, &self.token)?,
            access_controller: read_code(base, &self.access_controller)?,
            aggregator: read_code(base, &self.aggregator)?,
        })
    }
}

fn read_code(base: &Path, path: &Path) -> Result<Bytes, Error> {
    let path = base.join(path);
    let contents = std::fs::read_to_string(&path)?;
    decode_code(&contents)
        .ok_or_else(|| Error::InvalidConfig(format!("invalid creation code in {}", path.display())))
}

/// Decode a hex string (with or without a `0x` prefix). Returns `None` for anything but ASCII
/// hex digits.
fn decode_hex(value: &str) -> Option<Vec<u8>> {
    let value = value.trim();
    let value = value.strip_prefix("0x").unwrap_or(value);
    if !value.is_ascii() {
        return None;
    }
    from_hex(value)
}

/// Decode hex creation code (with or without a `0x` prefix).
pub fn decode_code(contents: &str) -> Option<Bytes> {
    decode_hex(contents)
        .filter(|code| !code.is_empty())
        .map(Bytes::from)
}

/// Protocol parameters (durations in milliseconds).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ParametersConfig {
    pub delta_progress_ms: u64,
    pub delta_resend_ms: u64,
    pub delta_round_ms: u64,
    pub delta_grace_ms: u64,
    pub delta_c_ms: u64,
    pub alpha_ppb: u64,
    pub delta_stage_ms: u64,
    pub r_max: u8,
    pub schedule: Vec<u8>,
    pub f: u8,

    /// Hex-encoded 16-byte secret shared by all oracles.
    pub shared_secret: Option<String>,
}

impl Default for ParametersConfig {
    fn default() -> Self {
        let defaults = SharedConfigParameters::default();
        let ms = |value: Duration| value.as_millis() as u64;
        Self {
            delta_progress_ms: ms(defaults.delta_progress),
            delta_resend_ms: ms(defaults.delta_resend),
            delta_round_ms: ms(defaults.delta_round),
            delta_grace_ms: ms(defaults.delta_grace),
            delta_c_ms: ms(defaults.delta_c),
            alpha_ppb: defaults.alpha_ppb,
            delta_stage_ms: ms(defaults.delta_stage),
            r_max: defaults.r_max,
            schedule: defaults.schedule,
            f: defaults.f,
            shared_secret: None,
        }
    }
}

impl ParametersConfig {
    fn parameters(&self) -> Result<SharedConfigParameters, Error> {
        let ms = Duration::from_millis;
        let mut parameters = SharedConfigParameters {
            delta_progress: ms(self.delta_progress_ms),
            delta_resend: ms(self.delta_resend_ms),
            delta_round: ms(self.delta_round_ms),
            delta_grace: ms(self.delta_grace_ms),
            delta_c: ms(self.delta_c_ms),
            alpha_ppb: self.alpha_ppb,
            delta_stage: ms(self.delta_stage_ms),
            r_max: self.r_max,
            schedule: self.schedule.clone(),
            f: self.f,
            ..Default::default()
        };
        if let Some(secret) = &self.shared_secret {
            let bytes = decode_hex(secret)
                .and_then(|bytes| bytes.try_into().ok())
                .ok_or_else(|| Error::InvalidConfig("shared secret must be 16 hex bytes".into()))?;
            parameters.shared_secret = SharedSecret::new(bytes);
        }
        Ok(parameters)
    }
}

/// Polling budgets (durations in milliseconds).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct BudgetsConfig {
    pub interval_ms: u64,
    pub peer_readiness_attempts: usize,
    pub database_readiness_attempts: usize,
    pub oracle_readiness_attempts: usize,
    pub feed_readiness_attempts: usize,
    pub connectivity_attempts: usize,
    pub mining_attempts: usize,
    pub funding_timeout_ms: u64,
    pub timeout_ms: u64,
}

impl Default for BudgetsConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            peer_readiness_attempts: 30,
            database_readiness_attempts: 30,
            oracle_readiness_attempts: 120,
            feed_readiness_attempts: 10,
            connectivity_attempts: 10,
            mining_attempts: 10,
            funding_timeout_ms: 60_000,
            timeout_ms: 30 * 60_000,
        }
    }
}

/// Amounts transferred during the bootstrap (decimal strings, in base units).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct FundingConfig {
    /// Native currency sent to every oracle account.
    pub oracle: String,

    /// Tokens sent to the aggregator.
    pub aggregator: String,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            oracle: 10u128.pow(28).to_string(),
            aggregator: 10u128.pow(18).to_string(),
        }
    }
}

fn amount(field: &str, value: &str) -> Result<U256, Error> {
    U256::from_str(value.trim())
        .map_err(|_| Error::InvalidConfig(format!("invalid {field} amount: {value}")))
}

/// A network to bootstrap.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub tag: String,

    /// Unlocked account on the bootstrap peer that pays for everything.
    pub funder: String,

    /// Chain peers (the first is the bootstrap peer).
    pub peers: Vec<PeerConfig>,

    /// Databases (the i-th database backs the i-th oracle).
    pub databases: Vec<ServiceConfig>,

    /// Oracle nodes (the first is the bootstrap oracle).
    pub oracles: Vec<OracleConfig>,

    pub feed: ServiceConfig,
    pub artifacts: ArtifactsConfig,

    #[serde(default)]
    pub parameters: ParametersConfig,
    #[serde(default)]
    pub budgets: BudgetsConfig,
    #[serde(default)]
    pub funding: FundingConfig,
    #[serde(default)]
    pub transmitter_index: usize,
}

impl Config {
    /// Read and validate the config at `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate a YAML config.
    pub fn parse(contents: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |reason: String| Err(Error::InvalidConfig(reason));
        if self.peers.is_empty() {
            return invalid("no chain peers".into());
        }
        if self.oracles.is_empty() {
            return invalid("no oracles".into());
        }
        if self.databases.len() != self.oracles.len() {
            return invalid(format!(
                "{} databases for {} oracles",
                self.databases.len(),
                self.oracles.len()
            ));
        }

        // Every service needs a distinct name
        let names = self
            .peers
            .iter()
            .map(|peer| &peer.name)
            .chain(self.databases.iter().map(|database| &database.name))
            .chain(self.oracles.iter().map(|oracle| &oracle.name))
            .chain(std::iter::once(&self.feed.name));
        let mut seen = BTreeSet::new();
        for name in names {
            if name.is_empty() {
                return invalid("empty service name".into());
            }
            if !seen.insert(name) {
                return invalid(format!("duplicate service name: {name}"));
            }
        }

        if parse_address(&self.funder).is_none() {
            return invalid(format!("invalid funder: {}", self.funder));
        }
        amount("oracle", &self.funding.oracle)?;
        amount("aggregator", &self.funding.aggregator)?;
        self.parameters.parameters()?;
        if self.budgets.interval_ms == 0 {
            return invalid("polling interval must be non-zero".into());
        }
        Ok(())
    }

    /// Build the configuration of a bootstrap run.
    pub fn bootstrap(&self, artifacts: Artifacts) -> Result<BootstrapConfig, Error> {
        let funder = parse_address(&self.funder)
            .ok_or_else(|| Error::InvalidConfig(format!("invalid funder: {}", self.funder)))?;
        let mut cfg = BootstrapConfig::new(
            self.peers.iter().map(|peer| PeerId::new(&peer.name)).collect(),
            self.oracles
                .iter()
                .map(|oracle| OracleId::new(&oracle.name))
                .collect(),
            ServiceId::new(&self.feed.name),
            funder,
            artifacts,
        );
        cfg.parameters = self.parameters.parameters()?;
        cfg.transmitter_index = self.transmitter_index;
        cfg.oracle_funding = amount("oracle", &self.funding.oracle)?;
        cfg.aggregator_funding = amount("aggregator", &self.funding.aggregator)?;

        let budgets = &self.budgets;
        let interval = Duration::from_millis(budgets.interval_ms);
        cfg.readiness_interval = interval;
        cfg.peer_readiness_attempts = budgets.peer_readiness_attempts;
        cfg.database_readiness_attempts = budgets.database_readiness_attempts;
        cfg.oracle_readiness_attempts = budgets.oracle_readiness_attempts;
        cfg.feed_readiness_attempts = budgets.feed_readiness_attempts;
        cfg.connectivity = Policy::attempts(interval, budgets.connectivity_attempts);
        cfg.mining = Policy::attempts(interval, budgets.mining_attempts);
        cfg.funding_interval = interval;
        cfg.funding_timeout = Duration::from_millis(budgets.funding_timeout_ms);
        cfg.timeout = Duration::from_millis(budgets.timeout_ms);
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
tag: local
funder: "0x8ea1441a74ffbe9504a8cb3f7e4b7118d8ccfc56"
peers:
  - name: geth-0
    host: 10.0.0.2
    rpc_port: 8545
  - name: geth-1
    host: 10.0.0.3
    rpc_port: 8545
databases:
  - name: postgres-0
    host: 10.0.0.4
    port: 5432
  - name: postgres-1
    host: 10.0.0.5
    port: 5432
oracles:
  - name: oracle-0
    host: 10.0.0.6
    api_port: 6688
    p2p_port: 6690
    email: admin@example.com
    password: secret
  - name: oracle-1
    host: 10.0.0.7
    api_port: 6688
    p2p_port: 6690
    email: admin@example.com
    password: secret
feed:
  name: price-feed
  host: 10.0.0.8
  port: 8080
artifacts:
  token: token.hex
  access_controller: access_controller.hex
  aggregator: aggregator.hex
parameters:
  f: 0
  shared_secret: "0x0102030405060708090a0b0c0d0e0f10"
budgets:
  mining_attempts: 20
funding:
  oracle: "5000"
"#;

    #[test]
    fn test_parse() {
        let cfg = Config::parse(CONFIG).unwrap();
        assert_eq!(cfg.peers.len(), 2);
        assert_eq!(cfg.oracles[1].name, "oracle-1");
        assert_eq!(cfg.parameters.f, 0);
        assert_eq!(cfg.parameters.delta_round_ms, 15_000);
        assert_eq!(cfg.budgets.mining_attempts, 20);
        assert_eq!(cfg.budgets.connectivity_attempts, 10);
        assert_eq!(cfg.funding.aggregator, 10u128.pow(18).to_string());

        let bootstrap = cfg.bootstrap(Artifacts::default()).unwrap();
        assert_eq!(bootstrap.peers[0], PeerId::from("geth-0"));
        assert_eq!(bootstrap.oracles[0], OracleId::from("oracle-0"));
        assert_eq!(bootstrap.feed, ServiceId::from("price-feed"));
        assert_eq!(bootstrap.oracle_funding, U256::from(5_000u64));
        assert_eq!(bootstrap.mining, Policy::attempts(Duration::from_secs(1), 20));
        assert_eq!(bootstrap.parameters.f, 0);
        assert_eq!(
            bootstrap.parameters.shared_secret,
            SharedSecret::new([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16])
        );
    }

    #[test]
    fn test_invalid() {
        let cfg = Config::parse(CONFIG).unwrap();

        let mut mismatched = cfg.clone();
        mismatched.databases.pop();
        assert!(matches!(mismatched.validate(), Err(Error::InvalidConfig(_))));

        let mut duplicate = cfg.clone();
        duplicate.feed.name = "geth-1".into();
        assert!(matches!(duplicate.validate(), Err(Error::InvalidConfig(_))));

        let mut empty = cfg.clone();
        empty.oracles.clear();
        empty.databases.clear();
        assert!(matches!(empty.validate(), Err(Error::InvalidConfig(_))));

        let mut funder = cfg.clone();
        funder.funder = "0x1234".into();
        assert!(matches!(funder.validate(), Err(Error::InvalidConfig(_))));

        let mut secret = cfg.clone();
        secret.parameters.shared_secret = Some("0x01".into());
        assert!(matches!(secret.validate(), Err(Error::InvalidConfig(_))));

        let mut secret = cfg.clone();
        secret.parameters.shared_secret = Some("aébaébaébaébaébaébaébaéb".into());
        assert!(matches!(secret.validate(), Err(Error::InvalidConfig(_))));

        let mut funding = cfg;
        funding.funding.oracle = "-1".into();
        assert!(matches!(funding.validate(), Err(Error::InvalidConfig(_))));

        assert!(matches!(Config::parse("tag: [oops"), Err(Error::Yaml(_))));
    }

    #[test]
    fn test_decode_code() {
        assert_eq!(decode_code("0x6001\n"), Some(Bytes::from_static(&[0x60, 0x01])));
        assert_eq!(decode_code("6001"), Some(Bytes::from_static(&[0x60, 0x01])));
        assert_eq!(decode_code("0x"), None);
        assert_eq!(decode_code("0x60zz"), None);
        assert_eq!(decode_code("0x60é1"), None);
        assert_eq!(decode_code("éé"), None);
    }

    #[test]
    fn test_load_artifacts() {
        let base = std::env::temp_dir().join(format!("ocrnet-artifacts-{}", std::process::id()));
        std::fs::create_dir_all(&base).unwrap();
        std::fs::write(base.join("token.hex"), "0x6001\n").unwrap();
        std::fs::write(base.join("access_controller.hex"), "6002").unwrap();
        std::fs::write(base.join("aggregator.hex"), "0x60é3").unwrap();
        let artifacts = ArtifactsConfig {
            token: "token.hex".into(),
            access_controller: "access_controller.hex".into(),
            aggregator: "aggregator.hex".into(),
        };
        assert!(matches!(artifacts.load(&base), Err(Error::InvalidConfig(_))));

        std::fs::write(base.join("aggregator.hex"), "0x6003").unwrap();
        let loaded = artifacts.load(&base).unwrap();
        assert_eq!(loaded.token, Bytes::from_static(&[0x60, 0x01]));
        assert_eq!(loaded.aggregator, Bytes::from_static(&[0x60, 0x03]));
        std::fs::remove_dir_all(&base).unwrap();
    }
}
