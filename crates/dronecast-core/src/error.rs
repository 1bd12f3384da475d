use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Raised synchronously when a stream address cannot be parsed or bound.
/// A session that hits one of these stays idle.
#[derive(Debug, Error)]
pub enum StreamAddressError {
    #[error("unsupported stream protocol '{0}', only udp is supported")]
    UnsupportedProtocol(String),

    #[error("stream address '{0}' has no port")]
    MissingPort(String),

    #[error("invalid host '{host}' in stream address")]
    InvalidHost { host: String },

    #[error("invalid port '{port}' in stream address")]
    InvalidPort { port: String },

    #[error("failed to bind udp socket on {address}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Failure of the background decoder. These never cross a thread boundary as
/// a panic; the worker stores them in the session's health state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamDecodeError {
    #[error("not enough frames for decoding; retry or increase source frame rate")]
    NotEnoughFrames,

    #[error("undecodable unit in stream: {0}")]
    Corrupt(String),

    #[error("stream transport failed: {0}")]
    Transport(String),

    #[error("decoder thread panicked")]
    WorkerPanicked,
}

/// Why a session could not be started.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Address(#[from] StreamAddressError),

    #[error("failed to spawn decoder thread")]
    Spawn(#[source] io::Error),

    #[error("failed to launch decoder process '{program}'")]
    Decoder {
        program: String,
        #[source]
        source: io::Error,
    },
}
