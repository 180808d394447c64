//! Cursor-on-Target (CoT) message model for taklink.
//!
//! This crate owns the small slice of the CoT schema that the transport
//! layer has to understand: the `_flow-tags_` element used for duplicate
//! and loop suppression on multicast meshes. Everything else in a CoT
//! document is treated as opaque bytes and preserved as-is.

mod error;
mod flow_tag;
mod message;

pub use error::CotError;
pub use flow_tag::{FlowTag, SequenceCounter, global_sequence, now_millis};
pub use message::CotMessage;
