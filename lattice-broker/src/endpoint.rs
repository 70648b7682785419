use std::fmt::{self, Display, Formatter};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// The transport flavor of a single listener endpoint.
pub enum EndpointKind {
    /// Plain TCP, no encryption.
    ClearText,
    /// TLS with server authentication only.
    Ssl,
    /// TLS requiring a client certificate.
    SslMutualAuth,
}

impl EndpointKind {
    #[inline]
    /// Whether the endpoint requires a TLS handshake.
    pub fn is_secure(&self) -> bool {
        !matches!(self, EndpointKind::ClearText)
    }
}

#[derive(Debug, Error)]
#[error("invalid endpoint address `{0}`, expected `host:port`")]
/// The string did not parse as a `host:port` pair.
pub struct InvalidEndpoint(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// A single network endpoint advertised by a cluster member.
///
/// Immutable value, replaced wholesale on every membership update. Identity
/// for merge purposes is `host:port` only, the kind is deliberately excluded.
pub struct SocketEndpoint {
    pub kind: EndpointKind,
    pub host: String,
    pub port: u16,
}

impl SocketEndpoint {
    pub fn new(kind: EndpointKind, host: impl Into<String>, port: u16) -> Self {
        Self {
            kind,
            host: host.into(),
            port,
        }
    }

    /// Parses a `host:port` string into a clear-text endpoint.
    ///
    /// The split happens on the last `:` so IPv6 literal addresses survive.
    pub fn parse_clear_text(raw: &str) -> Result<Self, InvalidEndpoint> {
        let raw = raw.trim();
        let idx = raw.rfind(':').ok_or_else(|| InvalidEndpoint(raw.to_string()))?;
        let (host, port) = raw.split_at(idx);
        let port = port[1..]
            .parse::<u16>()
            .map_err(|_| InvalidEndpoint(raw.to_string()))?;
        if host.is_empty() {
            return Err(InvalidEndpoint(raw.to_string()));
        }
        Ok(Self::new(EndpointKind::ClearText, host, port))
    }

    #[inline]
    /// Whether this endpoint has the given clear-text address.
    pub fn matches_address(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }

    /// The `host:port` form used in endpoint lists and rotation results.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host.trim(), self.port)
    }
}

impl Display for SocketEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
