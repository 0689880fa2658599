// src/server/handshake.rs

//! The messages and handlers that assign client ids and bind additional
//! connections to an existing client.

use super::runtime::NetworkRuntime;
use crate::connection::{ClientId, ConnectionKey};
use crate::core::rmi::ResponseSlot;
use anyhow::anyhow;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Sent by the server on every accepted connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClientIdAssigned {
    pub client_id: ClientId,
}

/// Sent by a client on a fresh connection to dedicate it to `key`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionKeyRequest {
    pub client_id: ClientId,
    pub key: ConnectionKey,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionKeyAccepted {
    pub key: ConnectionKey,
}

/// Client-side waits for handshake replies.
#[derive(Default)]
pub(crate) struct HandshakeState {
    pub(crate) id_assigned: ResponseSlot<ClientId>,
    pub(crate) pending_keys: DashMap<ConnectionKey, Arc<ResponseSlot<()>>>,
}

/// Answers `ConnectionKeyRequest`s by rebinding the requesting connection to the
/// client it names.
pub(crate) fn install_server(runtime: &Arc<NetworkRuntime>) {
    let weak: Weak<NetworkRuntime> = Arc::downgrade(runtime);
    runtime
        .registration()
        .register::<ConnectionKeyRequest>()
        .add_last(move |context, _session, request| {
            let runtime = weak
                .upgrade()
                .ok_or_else(|| anyhow!("runtime is gone"))?;
            let client = runtime
                .clients()
                .get(&request.client_id)
                .ok_or_else(|| anyhow!("unknown client {}", request.client_id))?;

            // The connection was accepted as a client of its own; retire that one.
            if let Some(provisional) = context.client() {
                if let Some(id) = provisional.id() {
                    runtime.clients().remove(&id);
                }
                provisional.unbind_if(context.key(), context);
            }

            let rebound = runtime.attach(
                &client,
                context.connection().clone(),
                request.key.clone(),
            );
            client.bind(rebound.clone());
            rebound.send(&ConnectionKeyAccepted {
                key: request.key.clone(),
            })?;
            info!(
                "Connection {} bound to client {} as '{}'",
                context.connection().id(),
                request.client_id,
                request.key
            );
            Ok(())
        });
}

/// Records the assigned client id and completes pending connection-key requests.
pub(crate) fn install_client(runtime: &Arc<NetworkRuntime>, state: &Arc<HandshakeState>) {
    let weak: Weak<NetworkRuntime> = Arc::downgrade(runtime);
    let handshake = state.clone();
    runtime
        .registration()
        .register::<ClientIdAssigned>()
        .add_last(move |context, _session, assigned| {
            let client = context
                .client()
                .ok_or_else(|| anyhow!("context outlived its client"))?;
            if !client.set_id(assigned.client_id) {
                debug!("Ignoring id {} for an identified client", assigned.client_id);
                return Ok(());
            }
            if let Some(runtime) = weak.upgrade() {
                runtime.clients().store(client)?;
            }
            handshake.id_assigned.fill(assigned.client_id);
            info!("Assigned client id {}", assigned.client_id);
            Ok(())
        });

    let handshake = state.clone();
    runtime
        .registration()
        .register::<ConnectionKeyAccepted>()
        .add_last(move |_context, _session, accepted| {
            let slot = handshake
                .pending_keys
                .get(&accepted.key)
                .map(|s| s.value().clone());
            match slot {
                Some(slot) => {
                    slot.fill(());
                }
                None => debug!("Unexpected acceptance for '{}'", accepted.key),
            }
            Ok(())
        });
}
