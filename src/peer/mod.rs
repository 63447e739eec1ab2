pub mod connection;
pub mod ice;
pub mod state;
pub mod transport;
pub mod types;

pub use connection::WebRtcTransportFactory;
pub use ice::{CandidateTally, IceCandidate};
pub use state::{SessionState, Transition};
pub use transport::{Connection, MediaSink, Transport, TransportFactory};
pub use types::{IceServerConfig, SdpType, SessionDescription, SessionId};
