//! `sessionbus` Polling Transport
//!
//! Consumer side of the relay: a duplex message transport emulated over
//! stateless HTTP. Outbound messages are posted to `/message`; inbound
//! traffic is pulled from `/poll` on a fixed interval and fanned out to
//! registered listeners.

pub mod error;
pub mod listeners;
pub mod polling;
pub mod state;

pub use error::TransportError;
pub use listeners::ListenerId;
pub use polling::PollingTransport;
pub use state::TransportState;
