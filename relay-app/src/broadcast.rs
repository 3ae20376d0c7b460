//! One-time advertising broadcast to the static recipient list.
//!
//! Idempotency comes from the marker store: the marker is written
//! before the send, so a crash mid-broadcast can skip a recipient but
//! can never message one twice.

use relay_channels::{ChannelAdapter, OutboundMessage};
use relay_store::{SenderKey, Storage};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[tracing::instrument(level = "info", skip_all, fields(recipients = recipients.len()))]
pub async fn run_broadcast(
    storage: &Storage,
    channel: &dyn ChannelAdapter,
    recipients: &[String],
    message: &str,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    for recipient in recipients {
        let sender = SenderKey::sanitize(recipient);
        if sender.is_empty() {
            tracing::warn!(recipient = %recipient, "recipient sanitized to empty key; skipping");
            report.failed += 1;
            continue;
        }

        match storage.markers.mark_if_new(&sender) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(recipient = %sender, "advertising already sent; skipping");
                report.skipped += 1;
                continue;
            }
            Err(error) => {
                tracing::error!(recipient = %sender, %error, "marker write failed; skipping");
                report.failed += 1;
                continue;
            }
        }

        match channel
            .send(
                recipient,
                OutboundMessage {
                    content: message.to_string(),
                },
            )
            .await
        {
            Ok(()) => {
                tracing::info!(recipient = %sender, "advertising message sent");
                report.sent += 1;
            }
            Err(error) => {
                // Marker stays in place: non-duplication wins over the
                // lost send.
                tracing::error!(recipient = %sender, %error, "advertising send failed");
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        sent = report.sent,
        skipped = report.skipped,
        failed = report.failed,
        "broadcast finished"
    );
    report
}
