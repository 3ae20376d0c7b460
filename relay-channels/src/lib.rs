//! Messaging-platform adapters for the relay bot.
//!
//! Adapters are pure I/O: they convert platform events to/from
//! `InboundMessage` / `OutboundMessage` and know nothing about the
//! queue or the dispatcher.

mod traits;
mod types;
mod whatsapp;

pub use traits::ChannelAdapter;
pub use types::{InboundMessage, MessageId, OutboundMessage, SenderId};
pub use whatsapp::{WhatsAppCloudAdapter, parse_webhook_payload, verify_webhook};
