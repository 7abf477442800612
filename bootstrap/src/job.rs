//! Job descriptors handed to each oracle once the aggregator is configured.

use crate::{Address, Error, OracleId};
use std::{fmt, net::Ipv4Addr, time::Duration};

/// Upper bound on the duration of a single job run.
pub const MAX_TASK_DURATION: Duration = Duration::from_secs(11);

/// Time an oracle may spend making an observation (the oracle accepts 1s to 20s).
pub const OBSERVATION_TIMEOUT: Duration = Duration::from_secs(13);

/// Timeout of calls to the chain.
pub const BLOCKCHAIN_TIMEOUT: Duration = Duration::from_secs(20);

/// Interval at which the oracle polls the aggregator for configuration changes.
pub const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Interval at which the oracle resubscribes to configuration changes.
pub const CONFIG_SUBSCRIBE_INTERVAL: Duration = Duration::from_secs(120);

/// Confirmations required before a configuration change is acted upon.
pub const CONFIG_CONFIRMATIONS: u32 = 3;

/// How a non-bootstrap oracle produces its observation: fetch `url`, parse the JSON value at
/// `path`, multiply it by `times` and take the median across data sources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pipeline {
    pub url: String,
    pub path: String,
    pub times: u64,
}

impl Pipeline {
    /// Observe the USD price served at `url`.
    pub fn usd(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            path: "USD".to_string(),
            times: 10,
        }
    }
}

/// The job one oracle runs to participate in reporting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobSpec {
    pub oracle: OracleId,
    pub contract_address: Address,
    pub bootstrap_host: String,
    pub bootstrap_port: u16,
    pub bootstrap_peer_id: String,
    pub peer_id: String,
    pub is_bootstrap: bool,
    pub key_bundle_id: String,
    pub transmit_address: Address,

    /// Must be set for (and only for) oracles that are not the bootstrap oracle.
    pub pipeline: Option<Pipeline>,
}

fn duration(value: Duration) -> String {
    let secs = value.as_secs();
    if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

fn quotable(value: &str) -> bool {
    !value.contains(['"', '\\', '\n', '\r'])
}

impl JobSpec {
    /// Returns an error if the descriptor cannot be accepted by an oracle.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |reason| {
            Err(Error::InvalidJob {
                oracle: self.oracle.clone(),
                reason,
            })
        };
        match (&self.pipeline, self.is_bootstrap) {
            (Some(_), true) => return invalid("bootstrap job must not declare a pipeline"),
            (None, false) => return invalid("participant job requires a pipeline"),
            (Some(pipeline), false) => {
                if pipeline.url.is_empty() || !quotable(&pipeline.url) {
                    return invalid("invalid data source url");
                }
                if pipeline.path.is_empty() || !quotable(&pipeline.path) {
                    return invalid("invalid parse path");
                }
            }
            (None, true) => {}
        }
        let identifiers = [
            &self.bootstrap_host,
            &self.bootstrap_peer_id,
            &self.peer_id,
            &self.key_bundle_id,
        ];
        if identifiers.iter().any(|value| value.is_empty() || !quotable(value)) {
            return invalid("invalid identifier");
        }
        Ok(())
    }

    /// Multiaddress of the bootstrap oracle.
    pub fn bootstrap_multiaddr(&self) -> String {
        let protocol = if self.bootstrap_host.parse::<Ipv4Addr>().is_ok() {
            "ip4"
        } else {
            "dns4"
        };
        format!(
            "/{protocol}/{}/tcp/{}/p2p/{}",
            self.bootstrap_host, self.bootstrap_port, self.bootstrap_peer_id
        )
    }

    /// Render the descriptor in the oracle's TOML job format.
    pub fn render(&self) -> Result<String, Error> {
        self.validate()?;
        Ok(self.to_string())
    }
}

/// The TOML job format (without validation, see [JobSpec::render]).
impl fmt::Display for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "type               = \"offchainreporting\"")?;
        writeln!(f, "schemaVersion      = 1")?;
        writeln!(
            f,
            "contractAddress    = \"{}\"",
            self.contract_address.to_checksum(None)
        )?;
        writeln!(f, "p2pBootstrapPeers  = [")?;
        writeln!(f, "    \"{}\",", self.bootstrap_multiaddr())?;
        writeln!(f, "]")?;
        writeln!(f, "p2pPeerID          = \"{}\"", self.peer_id)?;
        writeln!(f, "isBootstrapPeer    = {}", self.is_bootstrap)?;
        writeln!(f, "keyBundleID        = \"{}\"", self.key_bundle_id)?;
        writeln!(
            f,
            "transmitterAddress = \"{}\"",
            self.transmit_address.to_checksum(None)
        )?;
        writeln!(f, "maxTaskDuration = \"{}\"", duration(MAX_TASK_DURATION))?;
        writeln!(f, "observationTimeout = \"{}\"", duration(OBSERVATION_TIMEOUT))?;
        writeln!(f, "blockchainTimeout = \"{}\"", duration(BLOCKCHAIN_TIMEOUT))?;
        writeln!(
            f,
            "contractConfigTrackerPollInterval = \"{}\"",
            duration(CONFIG_POLL_INTERVAL)
        )?;
        writeln!(
            f,
            "contractConfigTrackerSubscribeInterval = \"{}\"",
            duration(CONFIG_SUBSCRIBE_INTERVAL)
        )?;
        writeln!(f, "contractConfigConfirmations = {CONFIG_CONFIRMATIONS}")?;
        let Some(pipeline) = &self.pipeline else {
            return Ok(());
        };
        writeln!(f, "observationSource = \"\"\"")?;
        writeln!(
            f,
            "    ds1          [type=http allowunrestrictednetworkaccess=true method=GET url=\"{}\" requestData=\"{{}}\"];",
            pipeline.url
        )?;
        writeln!(f, "    ds1_parse    [type=jsonparse path=\"{}\"];", pipeline.path)?;
        writeln!(f, "    ds1_multiply [type=multiply times={}];", pipeline.times)?;
        writeln!(f)?;
        writeln!(f, "    ds1 -> ds1_parse -> ds1_multiply -> answer;")?;
        writeln!(f, "    answer [type=median];")?;
        writeln!(f, "\"\"\"")
    }
}
