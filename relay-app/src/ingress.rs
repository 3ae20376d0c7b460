//! Ingress adapter: platform events in, queue records out.

use crate::dispatcher::DispatchHandle;
use anyhow::{Context, Result};
use relay_channels::InboundMessage;
use relay_store::{SenderKey, Storage};
use std::sync::Arc;

pub struct Ingress {
    storage: Arc<Storage>,
    dispatch: DispatchHandle,
}

impl Ingress {
    pub fn new(storage: Arc<Storage>, dispatch: DispatchHandle) -> Self {
        Self { storage, dispatch }
    }

    /// Normalizes the sender, persists the message, and pokes the
    /// dispatcher. Group/broadcast-origin events are dropped; an
    /// enqueue landing mid-cycle relies on the running cycle (or the
    /// coalesced trigger) to pick the record up.
    pub fn on_inbound(&self, inbound: &InboundMessage) -> Result<()> {
        if inbound.is_group {
            tracing::debug!(sender = %inbound.sender_id, "ignoring group-origin message");
            return Ok(());
        }

        let sender = SenderKey::sanitize(inbound.sender_id.as_str());
        if sender.is_empty() {
            tracing::warn!(
                raw_sender = %inbound.sender_id,
                "sender id sanitized to empty key; dropping message"
            );
            return Ok(());
        }

        let item = self
            .storage
            .queue
            .enqueue(&sender, &inbound.content)
            .context("enqueue inbound message")?;
        tracing::info!(
            sender = %sender,
            record = %item.record_name(),
            content_len = inbound.content.len(),
            "inbound message queued"
        );

        self.dispatch.trigger();
        Ok(())
    }
}
