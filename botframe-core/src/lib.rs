//! Botframe Core Library
//!
//! This crate implements both sides of a streamed bot federation
//! protocol: serving a bot behind a dispatcher that frames its replies
//! as server-sent events, and calling peer bots with accumulation,
//! retry, and function-calling support.

pub mod bot;
pub mod client;
pub mod config;
pub mod protocol;

pub use bot::{BotHandler, BotReply, Dispatcher, ReplyStream, RequestContext, UploadSpec};
pub use client::{ClientError, FederationClient, RetryPolicy, ToolExecutable};
pub use config::{AccessKey, BotConfig};
pub use protocol::{
    Accumulator, BotEvent, BotMessage, ErrorResponse, Frame, Materialized, MetaResponse,
    PartialResponse, ProtocolError, ProtocolMessage, QueryRequest, SettingsResponse,
    PROTOCOL_VERSION,
};

/// Returns the version of the library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
