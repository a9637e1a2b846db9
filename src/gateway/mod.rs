pub mod connection;
pub mod event;
pub mod handshake;

pub use connection::{GatewayConnection, GatewayEndpoint, GatewaySink, GatewayStream, WireError};
pub use event::{ClientChat, GatewayEvent, classify};
pub use handshake::{ClientDescriptor, HandshakeError, authenticate};
