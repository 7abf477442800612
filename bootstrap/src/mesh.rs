//! Force a set of chain peers into a fully-connected mesh.
//!
//! Peer discovery is disabled on private test networks, so every ordered pair of peers is
//! connected explicitly and the resulting connectivity is confirmed by polling each peer.

use crate::{
    poller::{self, poll_until, Check, Policy},
    ChainClient, Error, NodeInfo, PeerId,
};
use commonware_runtime::Clock;
use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Connect every peer to every other peer and wait until each reports the full mesh.
///
/// Returns the node information of every peer. A rejected (or failed) add-peer call is fatal and
/// is not retried. Each peer is then polled under `policy` until it reports exactly the other
/// peers' node identifiers (transport errors while polling are treated as not yet converged).
pub async fn connect_all<E: Clock, C: ChainClient>(
    clock: &E,
    peers: &BTreeMap<PeerId, C>,
    policy: Policy,
) -> Result<BTreeMap<PeerId, NodeInfo>, Error> {
    if peers.len() < 2 {
        return Err(Error::NotEnoughPeers(peers.len()));
    }

    // Fetch the node information of each peer once
    let infos = try_join_all(peers.iter().map(|(id, client)| async move {
        let info = client.node_info().await?;
        debug!(peer = %id, node = %info.id, "fetched node info");
        Ok::<_, Error>((id.clone(), info))
    }))
    .await?;
    let infos: BTreeMap<PeerId, NodeInfo> = infos.into_iter().collect();
    let distinct: BTreeSet<&str> = infos.values().map(|info| info.id.as_str()).collect();
    if distinct.len() != infos.len() {
        return Err(Error::InvalidTopology("peers share a node identifier"));
    }

    // Instruct every peer to dial every other peer
    for (id, client) in peers {
        for (other, info) in &infos {
            if other == id {
                continue;
            }
            if !client.add_peer(&info.enode).await? {
                return Err(Error::AddPeerRejected {
                    peer: id.clone(),
                    enode: info.enode.clone(),
                });
            }
            debug!(peer = %id, remote = %other, "added peer");
        }
    }

    // Wait for every peer to observe the full mesh
    try_join_all(peers.iter().map(|(id, client)| {
        let expected: BTreeSet<String> = infos
            .iter()
            .filter(|(other, _)| *other != id)
            .map(|(_, info)| info.id.clone())
            .collect();
        wait_connected(clock, id, client, expected, policy)
    }))
    .await?;
    info!(peers = peers.len(), "mesh connected");
    Ok(infos)
}

/// Poll `client` until it reports exactly the `expected` set of node identifiers.
async fn wait_connected<E: Clock, C: ChainClient>(
    clock: &E,
    id: &PeerId,
    client: &C,
    expected: BTreeSet<String>,
    policy: Policy,
) -> Result<(), Error> {
    let result = poll_until(clock, policy, |attempt| {
        let expected = &expected;
        async move {
            let connected = match client.peers().await {
                Ok(connected) => connected,
                Err(err) => {
                    debug!(peer = %id, attempt, ?err, "failed to list peers");
                    return Ok::<_, Error>(Check::Pending(0));
                }
            };
            let observed: BTreeSet<String> = connected.iter().map(|p| p.id.clone()).collect();
            if connected.len() == expected.len() && observed == *expected {
                return Ok(Check::Done(()));
            }
            debug!(
                peer = %id,
                attempt,
                observed = connected.len(),
                expected = expected.len(),
                "mesh not converged"
            );
            Ok(Check::Pending(connected.len()))
        }
    })
    .await;
    match result {
        Ok(()) => Ok(()),
        Err(poller::Error::Exhausted { attempts, last }) => Err(Error::MeshNotConverged {
            peer: id.clone(),
            expected: expected.len(),
            observed: last,
            attempts,
        }),
        Err(poller::Error::Fatal { source, .. }) => Err(source),
    }
}
