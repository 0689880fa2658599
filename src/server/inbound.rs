// src/server/inbound.rs

//! Turns the frames queued on a connection into triggered, typed values.

use crate::connection::{Connection, ConnectionContext, FrameListener};
use crate::core::handler::CommunicationRegistration;
use std::sync::{Arc, Weak};
use tracing::{error, warn};

/// Decodes every frame a connection produces and hands it to the registration
/// with the connection's context.
pub(crate) struct InboundRouter {
    context: Weak<ConnectionContext>,
    registration: Arc<CommunicationRegistration>,
}

impl InboundRouter {
    pub(crate) fn new(
        context: &Arc<ConnectionContext>,
        registration: Arc<CommunicationRegistration>,
    ) -> Self {
        Self {
            context: Arc::downgrade(context),
            registration,
        }
    }
}

impl FrameListener for InboundRouter {
    fn frames_available(&self, connection: &Connection) {
        let Some(context) = self.context.upgrade() else {
            return;
        };
        for frame in connection.drain() {
            let (key, value) = match context.codec().decode(frame) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(
                        "Dropping undecodable frame on connection {}: {}",
                        connection.id(),
                        e
                    );
                    continue;
                }
            };
            if let Err(e) = self
                .registration
                .trigger(key, &context, context.session(), value)
            {
                if e.is_routing_failure() {
                    error!(
                        "Routing failure on connection {} for '{}': {}",
                        connection.id(),
                        key,
                        e
                    );
                } else {
                    warn!(
                        "Dispatch failed on connection {} for '{}': {}",
                        connection.id(),
                        key,
                        e
                    );
                }
            }
        }
    }
}
