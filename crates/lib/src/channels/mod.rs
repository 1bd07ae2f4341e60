//! WhatsApp gateway providers (Wablas, Whacenter, WAHA).
//!
//! Each provider module holds both halves of the integration: the typed webhook payload and
//! its normalizer, and the HTTP send adapter. The registry resolves adapters and device
//! credentials for the response composer.

mod inbound;
pub mod normalize;
pub mod phone;
mod registry;
pub mod waha;
pub mod wablas;
pub mod whacenter;
mod wire;

pub use inbound::{ConversationKey, InboundMessage, MessageKind, Provider, RejectReason};
pub use normalize::{from_normalized, normalize};
pub use registry::{AdapterRegistry, DeviceCredentials, SendAdapter, SendError};
pub use waha::WahaSender;
pub use wablas::WablasSender;
pub use whacenter::WhacenterSender;
