use crate::network::message::MessageError;
use crate::types::EnodeUrlError;
use thiserror::Error;

/// Errors surfaced by the message dispatcher and the relay paths.
///
/// An `Err` from `Backend::handle_msg` always means the message belonged to
/// the consensus protocol (it was consumed) but could not be handled.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Malformed payload on an in-range opcode.
    #[error("Failed to decode consensus protocol message")]
    DecodeFailed,

    /// Consensus traffic arrived while the consensus core is stopped.
    /// Soft condition: a reconnect after the engine starts will succeed.
    #[error("Consensus engine is stopped")]
    EngineStopped,

    /// A proxy received a consensus message signed by a non validator.
    #[error("Proxy received consensus message of a non validator")]
    NonValidatorMessage,

    /// Delegate-sign traffic on a node that is neither a proxy nor a
    /// proxied validator.
    #[error("No proxy or proxied validator found")]
    NoDelegateSignTarget,

    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Errors produced by the validator handshake.
///
/// `ReadTimeout` is the liveness class; callers apply reconnect/backoff
/// policy to it rather than treating it as a protocol violation.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// The single handshake read returned a different opcode.
    #[error("Incorrect message code")]
    IncorrectMessageCode,

    /// The certificate's embedded enode does not match the node identity of
    /// the connection it arrived on.
    #[error("Incorrect node in enode certificate")]
    IncorrectNodeInCertificate,

    /// Neither handshake branch completed within the handshake window.
    #[error("Handshake read timeout")]
    ReadTimeout,

    #[error("Failed to decode enode certificate: {0}")]
    CertificateDecode(String),

    #[error(transparent)]
    EnodeUrl(#[from] EnodeUrlError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("Address table update failed: {0}")]
    Table(String),
}

/// Transport-level failures surfaced by peer handles.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Send failed: {0}")]
    Send(String),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Connection closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("A node cannot be both proxy and proxied validator")]
    ConflictingRoles,

    #[error("Proxied validator requires proxy_enode_url")]
    MissingProxyEnode,

    #[error("Invalid proxy enode URL: {0}")]
    InvalidProxyEnode(#[from] EnodeUrlError),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}
