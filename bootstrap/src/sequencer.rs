//! Drive a bootstrap run through its stages.
//!
//! A run moves through the [Stage]s in order. Each stage consumes the (immutable) output of the
//! previous stage and produces the input of the next, so a stage can only be entered once every
//! stage before it has completed:
//!
//! ```txt
//! ChainPeersUp -> MeshConnected -> ContractsDeployed -> SupportServicesUp -> AccountsFunded
//!     -> IdentitiesCollected -> ConfigSubmitted -> JobsDeployed -> Ready
//! ```
//!
//! The whole run is bounded by [Config::timeout]. When the deadline passes, the in-flight stage is
//! dropped (cancelling any outstanding calls) and the run fails with [Error::Timeout]. Any other
//! failure is returned as [Error::Stage], naming the stage that failed.

use crate::{
    config::{
        encode_config, encryption::X25519Encryptor, EncodedContractConfig, SharedConfigParameters,
    },
    contracts::{self, deploy_all, transact, AggregatorParams, Artifacts, Contracts},
    funding::fund_and_confirm,
    identity::{collect_identities, decode_address, OracleIdentity},
    job::{JobSpec, Pipeline},
    mesh::connect_all,
    poller::Policy,
    service::{provision, OracleSpec, PeerSpec, Provision, Readiness, Service},
    Address, ChainClient, Error, JobId, NodeInfo, OracleClient, OracleId, PeerId, ServiceId, Stage,
    U256,
};
use commonware_macros::select;
use commonware_runtime::Clock;
use futures::future::try_join_all;
use rand::{CryptoRng, RngCore};
use std::{
    collections::{BTreeMap, BTreeSet},
    future::Future,
    marker::PhantomData,
    time::{Duration, SystemTime},
};
use tracing::{debug, info};

/// Configuration of a bootstrap run.
#[derive(Clone, Debug)]
pub struct Config {
    /// Chain peers to start. The first peer is the bootstrap peer: contracts are deployed,
    /// accounts funded and oracles connected through it.
    pub peers: Vec<PeerId>,

    /// Oracles to start. The first oracle is the bootstrap oracle, which every other oracle
    /// dials and which does not observe prices itself.
    pub oracles: Vec<OracleId>,

    /// Name of the price feed observed by the oracles.
    pub feed: ServiceId,

    /// Account deploying the contracts and funding the oracles.
    pub funder: Address,

    pub artifacts: Artifacts,
    pub aggregator: AggregatorParams,
    pub parameters: SharedConfigParameters,

    /// Index of the currency key each oracle transmits reports from.
    pub transmitter_index: usize,

    /// Native currency sent to every currency key of every oracle.
    pub oracle_funding: U256,

    /// Tokens sent to the aggregator (to pay oracles).
    pub aggregator_funding: U256,

    /// Interval between readiness checks.
    pub readiness_interval: Duration,
    pub peer_readiness_attempts: usize,
    pub database_readiness_attempts: usize,
    pub oracle_readiness_attempts: usize,
    pub feed_readiness_attempts: usize,

    /// Policy used to wait for the mesh to converge.
    pub connectivity: Policy,

    /// Policy used to wait for each transaction to be mined.
    pub mining: Policy,

    pub funding_interval: Duration,
    pub funding_timeout: Duration,

    /// Bound on the whole run.
    pub timeout: Duration,
}

impl Config {
    /// Create a configuration with default budgets.
    pub fn new(
        peers: Vec<PeerId>,
        oracles: Vec<OracleId>,
        feed: ServiceId,
        funder: Address,
        artifacts: Artifacts,
    ) -> Self {
        let interval = Duration::from_secs(1);
        Self {
            peers,
            oracles,
            feed,
            funder,
            artifacts,
            aggregator: AggregatorParams::default(),
            parameters: SharedConfigParameters::default(),
            transmitter_index: 0,
            oracle_funding: U256::from(10u128.pow(28)),
            aggregator_funding: U256::from(10u128.pow(18)),
            readiness_interval: interval,
            peer_readiness_attempts: 30,
            database_readiness_attempts: 30,
            oracle_readiness_attempts: 120,
            feed_readiness_attempts: 10,
            connectivity: Policy::attempts(interval, 10),
            mining: Policy::attempts(interval, 10),
            funding_interval: interval,
            funding_timeout: Duration::from_secs(60),
            timeout: Duration::from_secs(30 * 60),
        }
    }

    /// Name of the database backing `oracle`.
    pub fn database(oracle: &OracleId) -> ServiceId {
        ServiceId::new(format!("{oracle}-db"))
    }

    fn validate(&self) -> Result<(), Error> {
        if self.peers.is_empty() {
            return Err(Error::NotEnoughPeers(0));
        }
        let mut peers = BTreeSet::new();
        if !self.peers.iter().all(|peer| peers.insert(peer)) {
            return Err(Error::InvalidTopology("duplicate chain peer"));
        }
        if self.oracles.is_empty() {
            return Err(Error::NoOracles);
        }
        let mut oracles = BTreeSet::new();
        for oracle in &self.oracles {
            if !oracles.insert(oracle) {
                return Err(Error::DuplicateOracle(oracle.clone()));
            }
        }
        Ok(())
    }
}

/// Chain peers that accept requests.
pub struct ChainPeersUp<P> {
    pub bootstrap: PeerId,
    pub peers: BTreeMap<PeerId, P>,
}

/// Chain peers connected in a full mesh.
pub struct MeshConnected<P> {
    pub bootstrap: PeerId,
    pub peers: BTreeMap<PeerId, P>,
    pub nodes: BTreeMap<PeerId, NodeInfo>,
}

/// Contracts deployed (and the aggregator funded).
pub struct ContractsDeployed<P> {
    pub bootstrap: PeerId,
    pub peers: BTreeMap<PeerId, P>,
    pub nodes: BTreeMap<PeerId, NodeInfo>,
    pub contracts: Contracts,
}

/// Services started for the oracles.
pub struct Services<D, O, F> {
    pub bootstrap: OracleId,
    pub databases: BTreeMap<OracleId, D>,
    pub oracles: BTreeMap<OracleId, O>,
    pub feed: F,
}

/// Databases, oracles and the price feed accept requests.
pub struct SupportServicesUp<P, D, O, F> {
    pub bootstrap: PeerId,
    pub peers: BTreeMap<PeerId, P>,
    pub nodes: BTreeMap<PeerId, NodeInfo>,
    pub contracts: Contracts,
    pub services: Services<D, O, F>,
}

/// Every currency key of every oracle holds native currency.
pub struct AccountsFunded<P, D, O, F> {
    pub bootstrap: PeerId,
    pub peers: BTreeMap<PeerId, P>,
    pub nodes: BTreeMap<PeerId, NodeInfo>,
    pub contracts: Contracts,
    pub services: Services<D, O, F>,
    pub funded: Vec<Address>,
}

/// The identity of every oracle is known.
pub struct IdentitiesCollected<P, D, O, F> {
    pub bootstrap: PeerId,
    pub peers: BTreeMap<PeerId, P>,
    pub nodes: BTreeMap<PeerId, NodeInfo>,
    pub contracts: Contracts,
    pub services: Services<D, O, F>,
    pub funded: Vec<Address>,
    pub identities: BTreeMap<OracleId, OracleIdentity>,
}

/// Payees and configuration are set on the aggregator.
pub struct ConfigSubmitted<P, D, O, F> {
    pub bootstrap: PeerId,
    pub peers: BTreeMap<PeerId, P>,
    pub nodes: BTreeMap<PeerId, NodeInfo>,
    pub contracts: Contracts,
    pub services: Services<D, O, F>,
    pub funded: Vec<Address>,
    pub identities: BTreeMap<OracleId, OracleIdentity>,
    pub config: EncodedContractConfig,
}

/// A network whose oracles are reporting to a configured aggregator.
pub struct Network<P, D, O, F> {
    pub bootstrap: PeerId,
    pub peers: BTreeMap<PeerId, P>,
    pub nodes: BTreeMap<PeerId, NodeInfo>,
    pub contracts: Contracts,
    pub services: Services<D, O, F>,
    pub funded: Vec<Address>,
    pub identities: BTreeMap<OracleId, OracleIdentity>,
    pub config: EncodedContractConfig,
    pub jobs: BTreeMap<OracleId, JobId>,
}

/// Bootstraps a network on a runtime able to provision chain peers (`P`), databases (`D`),
/// oracles (`O`) and a price feed (`F`).
pub struct Bootstrap<E, R, P, D, O, F> {
    context: E,
    runtime: R,
    cfg: Config,
    _services: PhantomData<(P, D, O, F)>,
}

impl<E, R, P, D, O, F> Bootstrap<E, R, P, D, O, F>
where
    E: Clock,
    R: Provision<P> + Provision<D> + Provision<O> + Provision<F>,
    P: Service<Spec = PeerSpec> + ChainClient,
    D: Service<Spec = ()>,
    O: Service<Spec = OracleSpec> + OracleClient,
    F: Service<Spec = ()>,
{
    pub fn new(context: E, runtime: R, cfg: Config) -> Self {
        Self {
            context,
            runtime,
            cfg,
            _services: PhantomData,
        }
    }

    /// Run every stage to completion. `rng` is used to encrypt the shared secret.
    pub async fn run<G: RngCore + CryptoRng>(
        &self,
        rng: &mut G,
    ) -> Result<Network<P, D, O, F>, Error> {
        let start = self.context.current();
        let deadline = start + self.cfg.timeout;
        info!(
            peers = self.cfg.peers.len(),
            oracles = self.cfg.oracles.len(),
            timeout = ?self.cfg.timeout,
            "starting bootstrap"
        );

        let up = self
            .stage(Stage::ChainPeersUp, deadline, self.start_chain_peers())
            .await?;
        let meshed = self
            .stage(Stage::MeshConnected, deadline, self.connect_mesh(up))
            .await?;
        let deployed = self
            .stage(Stage::ContractsDeployed, deadline, self.deploy_contracts(meshed))
            .await?;
        let services = self
            .stage(
                Stage::SupportServicesUp,
                deadline,
                self.start_services(deployed),
            )
            .await?;
        let funded = self
            .stage(Stage::AccountsFunded, deadline, self.fund_accounts(services))
            .await?;
        let identified = self
            .stage(
                Stage::IdentitiesCollected,
                deadline,
                self.identify(funded),
            )
            .await?;
        let configured = self
            .stage(
                Stage::ConfigSubmitted,
                deadline,
                self.submit_config(identified, rng),
            )
            .await?;
        let network = self
            .stage(Stage::JobsDeployed, deadline, self.deploy_jobs(configured))
            .await?;

        let elapsed = self
            .context
            .current()
            .duration_since(start)
            .unwrap_or_default();
        info!(
            stage = %Stage::Ready,
            aggregator = %network.contracts.aggregator,
            jobs = network.jobs.len(),
            ?elapsed,
            "network ready"
        );
        Ok(network)
    }

    /// Run `future` as `stage`, unless `deadline` passes first.
    async fn stage<T>(
        &self,
        stage: Stage,
        deadline: SystemTime,
        future: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        info!(%stage, "entering stage");
        let started = self.context.current();
        select! {
            result = future => {
                let elapsed = self.context.current().duration_since(started).unwrap_or_default();
                match result {
                    Ok(output) => {
                        info!(%stage, ?elapsed, "stage complete");
                        Ok(output)
                    }
                    Err(err) => Err(Error::Stage {
                        stage,
                        source: Box::new(err),
                    }),
                }
            },
            _ = self.context.sleep_until(deadline) => {
                Err(Error::Timeout { stage })
            },
        }
    }

    async fn start_chain_peers(&self) -> Result<ChainPeersUp<P>, Error> {
        self.cfg.validate()?;

        // Start every peer before waiting on any of them
        let mut peers = BTreeMap::new();
        let mut gates = Vec::with_capacity(self.cfg.peers.len());
        for (i, id) in self.cfg.peers.iter().enumerate() {
            let spec = PeerSpec { bootstrap: i == 0 };
            let (peer, readiness) = provision::<P, R>(&self.runtime, id.as_str(), spec).await?;
            peers.insert(id.clone(), peer);
            gates.push(readiness);
        }
        self.wait_all(&gates, self.cfg.peer_readiness_attempts)
            .await?;
        Ok(ChainPeersUp {
            bootstrap: self.cfg.peers[0].clone(),
            peers,
        })
    }

    async fn connect_mesh(&self, up: ChainPeersUp<P>) -> Result<MeshConnected<P>, Error> {
        let nodes = connect_all(&self.context, &up.peers, self.cfg.connectivity).await?;
        Ok(MeshConnected {
            bootstrap: up.bootstrap,
            peers: up.peers,
            nodes,
        })
    }

    async fn deploy_contracts(
        &self,
        meshed: MeshConnected<P>,
    ) -> Result<ContractsDeployed<P>, Error> {
        let client = bootstrap_peer(&meshed.peers, &meshed.bootstrap)?;
        let contracts = deploy_all(
            &self.context,
            client,
            self.cfg.funder,
            &self.cfg.artifacts,
            &self.cfg.aggregator,
            self.cfg.aggregator_funding,
            self.cfg.mining,
        )
        .await?;
        Ok(ContractsDeployed {
            bootstrap: meshed.bootstrap,
            peers: meshed.peers,
            nodes: meshed.nodes,
            contracts,
        })
    }

    async fn start_services(
        &self,
        deployed: ContractsDeployed<P>,
    ) -> Result<SupportServicesUp<P, D, O, F>, Error> {
        let chain = bootstrap_peer(&deployed.peers, &deployed.bootstrap)?.endpoint();

        // Databases start together
        let mut databases = BTreeMap::new();
        let mut gates = Vec::with_capacity(self.cfg.oracles.len());
        for oracle in &self.cfg.oracles {
            let name = Config::database(oracle);
            let (database, readiness) =
                provision::<D, R>(&self.runtime, name.as_str(), ()).await?;
            databases.insert(oracle.clone(), database);
            gates.push(readiness);
        }
        self.wait_all(&gates, self.cfg.database_readiness_attempts)
            .await?;

        // Oracles start one at a time
        let mut oracles = BTreeMap::new();
        for oracle in &self.cfg.oracles {
            let database = databases[oracle].endpoint();
            let spec = OracleSpec {
                database,
                chain: chain.clone(),
                token: deployed.contracts.token,
            };
            let (node, readiness) =
                provision::<O, R>(&self.runtime, oracle.as_str(), spec).await?;
            readiness
                .wait_ready(
                    &self.context,
                    self.cfg.readiness_interval,
                    self.cfg.oracle_readiness_attempts,
                )
                .await?;
            oracles.insert(oracle.clone(), node);
        }

        let (feed, readiness) =
            provision::<F, R>(&self.runtime, self.cfg.feed.as_str(), ()).await?;
        readiness
            .wait_ready(
                &self.context,
                self.cfg.readiness_interval,
                self.cfg.feed_readiness_attempts,
            )
            .await?;

        Ok(SupportServicesUp {
            bootstrap: deployed.bootstrap,
            peers: deployed.peers,
            nodes: deployed.nodes,
            contracts: deployed.contracts,
            services: Services {
                bootstrap: self.cfg.oracles[0].clone(),
                databases,
                oracles,
                feed,
            },
        })
    }

    async fn fund_accounts(
        &self,
        up: SupportServicesUp<P, D, O, F>,
    ) -> Result<AccountsFunded<P, D, O, F>, Error> {
        // Every currency key of every oracle (in oracle order)
        let keys = try_join_all(up.services.oracles.iter().map(|(oracle, client)| async move {
            let keys = client.currency_keys().await?;
            keys.iter()
                .map(|key| decode_address(oracle, "currency address", &key.address, ""))
                .collect::<Result<Vec<_>, Error>>()
        }))
        .await?;
        let targets: Vec<Address> = keys.into_iter().flatten().collect();
        debug!(accounts = targets.len(), "funding oracle accounts");

        let client = bootstrap_peer(&up.peers, &up.bootstrap)?;
        fund_and_confirm(
            &self.context,
            client,
            self.cfg.funder,
            &targets,
            self.cfg.oracle_funding,
            self.cfg.funding_interval,
            self.cfg.funding_timeout,
        )
        .await?;
        Ok(AccountsFunded {
            bootstrap: up.bootstrap,
            peers: up.peers,
            nodes: up.nodes,
            contracts: up.contracts,
            services: up.services,
            funded: targets,
        })
    }

    async fn identify(
        &self,
        funded: AccountsFunded<P, D, O, F>,
    ) -> Result<IdentitiesCollected<P, D, O, F>, Error> {
        let identities =
            collect_identities(&funded.services.oracles, self.cfg.transmitter_index).await?;
        Ok(IdentitiesCollected {
            bootstrap: funded.bootstrap,
            peers: funded.peers,
            nodes: funded.nodes,
            contracts: funded.contracts,
            services: funded.services,
            funded: funded.funded,
            identities,
        })
    }

    async fn submit_config<G: RngCore + CryptoRng>(
        &self,
        identified: IdentitiesCollected<P, D, O, F>,
        rng: &mut G,
    ) -> Result<ConfigSubmitted<P, D, O, F>, Error> {
        let mut encryptor = X25519Encryptor::new(rng);
        let config = encode_config(
            &self.cfg.parameters,
            identified.identities.clone(),
            &mut encryptor,
        )?;

        // Payees must be set before the configuration
        let client = bootstrap_peer(&identified.peers, &identified.bootstrap)?;
        let aggregator = identified.contracts.aggregator;
        transact(
            &self.context,
            client,
            self.cfg.funder,
            aggregator,
            contracts::set_payees(&config.transmitters, &config.transmitters),
            self.cfg.mining,
        )
        .await?;
        info!(%aggregator, payees = config.transmitters.len(), "set payees");
        transact(
            &self.context,
            client,
            self.cfg.funder,
            aggregator,
            contracts::set_config(&config),
            self.cfg.mining,
        )
        .await?;
        info!(
            %aggregator,
            signers = config.signers.len(),
            threshold = config.threshold,
            "set config"
        );

        Ok(ConfigSubmitted {
            bootstrap: identified.bootstrap,
            peers: identified.peers,
            nodes: identified.nodes,
            contracts: identified.contracts,
            services: identified.services,
            funded: identified.funded,
            identities: identified.identities,
            config,
        })
    }

    async fn deploy_jobs(
        &self,
        configured: ConfigSubmitted<P, D, O, F>,
    ) -> Result<Network<P, D, O, F>, Error> {
        let services = &configured.services;
        let leader = &services.bootstrap;
        let leader_node = services.oracles.get(leader).ok_or(Error::InvalidTopology(
            "bootstrap oracle was not started",
        ))?;
        let leader_identity = configured.identities.get(leader).ok_or(
            Error::InvalidTopology("bootstrap oracle has no identity"),
        )?;
        let bootstrap_host = leader_node.endpoint().host;
        let bootstrap_port = leader_node.p2p_port();
        let feed = services.feed.endpoint().http();

        let mut jobs = BTreeMap::new();
        for (oracle, identity) in &configured.identities {
            let is_bootstrap = oracle == leader;
            let job = JobSpec {
                oracle: oracle.clone(),
                contract_address: configured.contracts.aggregator,
                bootstrap_host: bootstrap_host.clone(),
                bootstrap_port,
                bootstrap_peer_id: leader_identity.peer_id.clone(),
                peer_id: identity.peer_id.clone(),
                is_bootstrap,
                key_bundle_id: identity.key_bundle_id.clone(),
                transmit_address: identity.transmit_address,
                pipeline: (!is_bootstrap).then(|| Pipeline::usd(feed.clone())),
            };
            job.validate()?;
            let client = services.oracles.get(oracle).ok_or(Error::InvalidTopology(
                "oracle was not started",
            ))?;
            let id = client.submit_job(&job).await?;
            info!(%oracle, job = %id, is_bootstrap, "submitted job");
            jobs.insert(oracle.clone(), id);
        }

        Ok(Network {
            bootstrap: configured.bootstrap,
            peers: configured.peers,
            nodes: configured.nodes,
            contracts: configured.contracts,
            services: configured.services,
            funded: configured.funded,
            identities: configured.identities,
            config: configured.config,
            jobs,
        })
    }

    /// Wait for every gate concurrently.
    async fn wait_all<S: Service>(
        &self,
        gates: &[Readiness<S>],
        attempts: usize,
    ) -> Result<(), Error> {
        try_join_all(gates.iter().map(|gate| {
            gate.wait_ready(&self.context, self.cfg.readiness_interval, attempts)
        }))
        .await?;
        Ok(())
    }
}

fn bootstrap_peer<'a, P>(
    peers: &'a BTreeMap<PeerId, P>,
    bootstrap: &PeerId,
) -> Result<&'a P, Error> {
    peers
        .get(bootstrap)
        .ok_or(Error::InvalidTopology("bootstrap peer was not started"))
}
