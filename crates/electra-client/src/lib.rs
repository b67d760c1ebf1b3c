//! Electra Client
//!
//! Talks to an electra server over HTTP. The registration handshake
//! serializes a dispatch locally, sends the manifest without local paths,
//! merges the `remote_uri`s the server answers with and streams each asset
//! to its remote location.
//!
//! The same client covers the executor side of the protocol:
//! [`ElectraClient::next_job`] and [`ElectraClient::report_job`].

mod client;
mod error;

pub use client::{DEFAULT_POLL_INTERVAL, ElectraClient};
pub use error::{ClientError, ClientResult};
