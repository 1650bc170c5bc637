//! Signaling: session description encoding and out-of-band exchange.

pub mod codec;
pub mod transport;

pub use codec::CodecError;
pub use transport::{CommandTransport, Transport, TransportError};
