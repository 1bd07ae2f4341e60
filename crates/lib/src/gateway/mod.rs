//! Gateway: webhook HTTP server.
//!
//! Each provider posts to its own path; every request is normalized and acknowledged
//! synchronously, then processed in the background by the engine's worker pool.

mod protocol;
mod server;

pub use protocol::{Ack, AckStatus};
pub use server::{build_engine, router, run_gateway, GatewayState};
