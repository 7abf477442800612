//! Deploy and call the reporting contracts.
//!
//! Every transaction submitted here is waited on with [wait_mined] before its result is used.

use crate::{
    config::EncodedContractConfig, poller::Policy, transaction::wait_mined, Address, ChainClient,
    Error, Receipt, U256,
};
use alloy_primitives::aliases::I192;
use alloy_sol_types::{sol, SolCall, SolConstructor};
use bytes::Bytes;
use commonware_runtime::Clock;
use tracing::info;

/// Creation code of the contracts deployed during a bootstrap.
#[derive(Clone, Debug, Default)]
pub struct Artifacts {
    /// Token used to pay oracles (mints its supply to the deployer).
    pub token: Bytes,

    /// Access controller gating billing and requester functions.
    pub access_controller: Bytes,

    /// Aggregator verifying and storing reports.
    pub aggregator: Bytes,
}

/// Addresses of the deployed contracts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Contracts {
    pub token: Address,
    pub access_controller: Address,
    pub aggregator: Address,
}

/// Constructor parameters of the aggregator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregatorParams {
    pub maximum_gas_price: u32,
    pub reasonable_gas_price: u32,
    pub micro_link_per_eth: u32,
    pub link_gwei_per_observation: u32,
    pub link_gwei_per_transmission: u32,
    pub decimals: u8,
    pub description: String,
}

impl Default for AggregatorParams {
    fn default() -> Self {
        Self {
            maximum_gas_price: 1_000,
            reasonable_gas_price: 200,
            micro_link_per_eth: 36_000_000,
            link_gwei_per_observation: 100_000_000,
            link_gwei_per_transmission: 400_000_000,
            decimals: 0,
            description: "Test OCR Contract".to_string(),
        }
    }
}

sol! {
    interface LinkToken {
        function transfer(address to, uint256 amount) external returns (bool);
    }

    contract AccessControlledOffchainAggregator {
        constructor(
            uint32 maximumGasPrice,
            uint32 reasonableGasPrice,
            uint32 microLinkPerEth,
            uint32 linkGweiPerObservation,
            uint32 linkGweiPerTransmission,
            address link,
            address validator,
            int192 minAnswer,
            int192 maxAnswer,
            address billingAccessController,
            address requesterAccessController,
            uint8 decimals,
            string description
        );

        function setPayees(address[] transmitters, address[] payees) external;

        function setConfig(
            address[] signers,
            address[] transmitters,
            uint8 threshold,
            uint64 encodedConfigVersion,
            bytes encoded
        ) external;
    }
}

/// Creation code of the aggregator with its constructor arguments.
///
/// Answers are unbounded (the full `int192` range) and the access controller gates both billing
/// and requests.
pub fn aggregator_creation(
    code: &[u8],
    params: &AggregatorParams,
    token: Address,
    validator: Address,
    access_controller: Address,
) -> Bytes {
    let constructor = AccessControlledOffchainAggregator::constructorCall {
        maximumGasPrice: params.maximum_gas_price,
        reasonableGasPrice: params.reasonable_gas_price,
        microLinkPerEth: params.micro_link_per_eth,
        linkGweiPerObservation: params.link_gwei_per_observation,
        linkGweiPerTransmission: params.link_gwei_per_transmission,
        link: token,
        validator,
        minAnswer: I192::MIN,
        maxAnswer: I192::MAX,
        billingAccessController: access_controller,
        requesterAccessController: access_controller,
        decimals: params.decimals,
        description: params.description.clone(),
    };
    let mut creation = code.to_vec();
    creation.extend_from_slice(&constructor.abi_encode());
    Bytes::from(creation)
}

/// Calldata of a token transfer.
pub fn token_transfer(to: Address, amount: U256) -> Bytes {
    Bytes::from(LinkToken::transferCall { to, amount }.abi_encode())
}

/// Calldata registering `payees` as the payees of `transmitters`.
pub fn set_payees(transmitters: &[Address], payees: &[Address]) -> Bytes {
    let call = AccessControlledOffchainAggregator::setPayeesCall {
        transmitters: transmitters.to_vec(),
        payees: payees.to_vec(),
    };
    Bytes::from(call.abi_encode())
}

/// Calldata of the single `setConfig` call applying `config`.
pub fn set_config(config: &EncodedContractConfig) -> Bytes {
    let call = AccessControlledOffchainAggregator::setConfigCall {
        signers: config.signers.clone(),
        transmitters: config.transmitters.clone(),
        threshold: config.threshold,
        encodedConfigVersion: config.version,
        encoded: config.encoded.clone().into(),
    };
    Bytes::from(call.abi_encode())
}

/// Deploy `code` from `from` and return the address of the mined contract.
pub async fn deploy<E: Clock, C: ChainClient>(
    clock: &E,
    client: &C,
    from: Address,
    code: Bytes,
    policy: Policy,
) -> Result<(Address, Receipt), Error> {
    let tx = client.deploy(from, code).await?;
    let receipt = wait_mined(clock, client, &tx, policy).await?;
    let address = receipt
        .contract_address
        .ok_or(Error::MissingContractAddress { tx })?;
    Ok((address, receipt))
}

/// Call `to` with `data` from `from` and wait for the call to be mined.
pub async fn transact<E: Clock, C: ChainClient>(
    clock: &E,
    client: &C,
    from: Address,
    to: Address,
    data: Bytes,
    policy: Policy,
) -> Result<Receipt, Error> {
    let tx = client.call(from, to, data).await?;
    wait_mined(clock, client, &tx, policy).await
}

/// Deploy the token, access controller and aggregator and fund the aggregator with
/// `aggregator_funding` token units.
pub async fn deploy_all<E: Clock, C: ChainClient>(
    clock: &E,
    client: &C,
    from: Address,
    artifacts: &Artifacts,
    params: &AggregatorParams,
    aggregator_funding: U256,
    policy: Policy,
) -> Result<Contracts, Error> {
    let (token, _) = deploy(clock, client, from, artifacts.token.clone(), policy).await?;
    info!(%token, "deployed token");
    let (access_controller, _) =
        deploy(clock, client, from, artifacts.access_controller.clone(), policy).await?;
    info!(%access_controller, "deployed access controller");
    let creation = aggregator_creation(&artifacts.aggregator, params, token, from, access_controller);
    let (aggregator, _) = deploy(clock, client, from, creation, policy).await?;
    info!(%aggregator, "deployed aggregator");

    transact(
        clock,
        client,
        from,
        token,
        token_transfer(aggregator, aggregator_funding),
        policy,
    )
    .await?;
    info!(%aggregator, amount = %aggregator_funding, "funded aggregator");
    Ok(Contracts {
        token,
        access_controller,
        aggregator,
    })
}
