use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
/// Fatal configuration errors raised while bootstrapping a broker.
///
/// None of these are recoverable, they abort startup before any acceptor
/// is created.
pub enum BootstrapError {
    #[error("only one listener may be configured with lazy-init, got: {0:?}")]
    /// More than one listener was marked `lazy_init`.
    MultipleLazyListeners(Vec<String>),

    #[error("lazy-init is not supported for TLS listeners: {0:?}")]
    /// A listener was marked `lazy_init` while also requiring TLS.
    LazyTlsListeners(Vec<String>),

    #[error("invalid cipher configuration for listener `{listener}`: {source}")]
    /// A cipher directive string failed validation.
    Cipher {
        listener: String,
        #[source]
        source: CipherError,
    },

    #[error("credential provider failed for alias {alias:?}: {reason}")]
    /// The credential provider could not supply a usable identity.
    Credentials {
        alias: Option<String>,
        reason: String,
    },

    #[error("failed to build TLS context: {0}")]
    /// rustls rejected the assembled configuration.
    Tls(String),

    #[error("{0}")]
    /// An IO error has occurred.
    Io(#[from] io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
/// Errors produced while parsing a cipher-suite directive string.
pub enum CipherError {
    #[error("unrecognized cipher `{0}`")]
    /// The named cipher does not exist in the provider catalog.
    UnknownCipher(String),

    #[error("cipher `{0}` does not belong to any enabled protocol")]
    /// The named cipher exists but is outside the enabled protocol families.
    ProtocolMismatch(String),

    #[error("unrecognized cipher directive `{0}`, expected `+NAME` or `-NAME`")]
    /// A token carried neither a `+` nor a `-` prefix.
    MalformedDirective(String),
}

#[derive(Debug, Error)]
/// Per-call failures surfaced by a reference factory.
///
/// These fail a single RPC and leave the broker up. They are distinct from
/// business-level errors raised by the located target itself.
pub enum CallError {
    #[error("target object was not found for the supplied instance key")]
    /// The owning container never produced a live target within the retry
    /// budget, or servant location failed outright.
    TargetNotFound,

    #[error("inbound object key is malformed")]
    /// The embedded object key failed length or header validation.
    MalformedKey,

    #[error("reference factory has already been destroyed")]
    /// Create/locate was attempted on a destroyed factory.
    FactoryDestroyed,
}
