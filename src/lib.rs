/// Client library: connection and typed requests to a Herald server.
pub mod client;
/// Server configuration loading.
pub mod config;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;
/// Network stack: Tokio-based server, connection limits and sessions.
pub mod network;
/// Wire protocol: request decoder chain, responses and pushed messages.
pub mod protocol;
/// Pub/Sub: Broker, Subscription, Message.
pub mod pubsub;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Client API.
pub use client::{ClientConfig, HeraldClient};
/// config
pub use config::{BrokerSettings, Settings};
/// Logging setup.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Network server.
pub use network::{ConnectionConfig, Server, ServerReport};
/// Protocol types.
pub use protocol::{DecoderChain, OutputFormat, Request, Response};
/// Pub/Sub API.
pub use pubsub::{
    Broker, BrokerConfig, LifecycleState, Message, PublishAck, PublishOutcome, ReplayPolicy,
    Sink, SubscriberId, Subscription, Unsubscribed,
};
