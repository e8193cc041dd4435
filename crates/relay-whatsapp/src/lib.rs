//! WhatsApp Cloud API plumbing: webhook signature checks, event extraction,
//! the Graph API client and the reply dispatcher built on top of it.

pub mod client;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod signature;
pub mod transport;

pub use client::WhatsAppClient;
pub use dispatch::{truncate_reply, DispatchResult, OutboundReply, ReplyDispatcher, TRUNCATION_MARKER};
pub use error::WhatsAppError;
pub use events::{extract_messages, MessageKind, NormalizedMessage};
pub use signature::verify_signature;
pub use transport::ReplyTransport;
