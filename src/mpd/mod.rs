//! MPD client module

pub mod client;
pub mod error;
pub mod protocol;
pub mod remote;

pub use client::MpdConnector;
pub use error::RemoteError;
pub use protocol::Sticker;
pub use remote::{Connector, RemoteStateClient};
