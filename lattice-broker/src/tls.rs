use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::RwLock;
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig, SupportedCipherSuite};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};

use crate::endpoint::EndpointKind;
use crate::error::{BootstrapError, CipherError};
use crate::listener::{ListenerConfig, TlsSettings};

/// A server identity resolved from an opaque credential source.
pub struct ServerIdentity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Opaque source of certificates and trust anchors.
///
/// Certificate and key management itself is out of scope, the provisioner
/// only consumes resolved material through this seam.
pub trait CredentialProvider: Send + Sync {
    /// Resolve the server identity for a certificate alias. `None` selects
    /// the provider's default identity.
    fn server_identity(
        &self,
        alias: Option<&str>,
    ) -> Result<ServerIdentity, BootstrapError>;

    /// The roots trusted for peer verification (outbound connections and
    /// mutual-auth client certificates).
    fn trust_anchors(&self) -> Result<RootCertStore, BootstrapError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Protocol selected for a TLS context, in compatibility-flag precedence
/// order: TLS, then legacy SSL3, then legacy SSL2, then generic SSL.
pub enum ProtocolVariant {
    Tls,
    Ssl3,
    Ssl2,
    GenericSsl,
}

impl ProtocolVariant {
    pub fn from_flags(tls_enabled: bool, ssl3_enabled: bool, ssl2_enabled: bool) -> Self {
        if tls_enabled {
            ProtocolVariant::Tls
        } else if ssl3_enabled {
            ProtocolVariant::Ssl3
        } else if ssl2_enabled {
            ProtocolVariant::Ssl2
        } else {
            ProtocolVariant::GenericSsl
        }
    }

    // The provider no longer ships the obsolete protocols, everything below
    // TLS materializes as a TLS 1.2 context.
    fn rustls_versions(&self) -> &'static [&'static rustls::SupportedProtocolVersion] {
        static TLS_VERSIONS: &[&rustls::SupportedProtocolVersion] =
            &[&rustls::version::TLS13, &rustls::version::TLS12];
        static OTHER_VERSIONS: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS12];
        match self {
            ProtocolVariant::Tls => TLS_VERSIONS,
            _ => OTHER_VERSIONS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Protocol family a cipher suite belongs to.
pub enum CipherFamily {
    Tls,
    Ssl3,
    Ssl2,
}

#[derive(Debug, Clone, Default)]
/// Known cipher suites and the protocol family each belongs to.
///
/// Built from the crypto provider at bootstrap; tests can assemble synthetic
/// catalogs through [`CipherCatalog::with_entries`].
pub struct CipherCatalog {
    families: BTreeMap<String, CipherFamily>,
}

impl CipherCatalog {
    pub fn from_provider(provider: &CryptoProvider) -> Self {
        let mut families = BTreeMap::new();
        for suite in &provider.cipher_suites {
            families.insert(suite_name(suite), family_of(suite));
        }
        Self { families }
    }

    pub fn with_entries(
        entries: impl IntoIterator<Item = (String, CipherFamily)>,
    ) -> Self {
        Self {
            families: entries.into_iter().collect(),
        }
    }

    pub fn family(&self, name: &str) -> Option<CipherFamily> {
        self.families.get(name).copied()
    }

    /// The catalog entries belonging to any of the given families, in
    /// catalog order. These are the "provider defaults" used when no
    /// explicit cipher list is configured for that family.
    pub fn defaults_in(&self, families: &[CipherFamily]) -> Vec<String> {
        self.families
            .iter()
            .filter(|(_, family)| families.contains(family))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn suite_name(suite: &SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

fn family_of(suite: &SupportedCipherSuite) -> CipherFamily {
    match suite {
        SupportedCipherSuite::Tls13(_) => CipherFamily::Tls,
        _ => CipherFamily::Ssl3,
    }
}

fn family_enabled(
    family: CipherFamily,
    tls_enabled: bool,
    ssl3_enabled: bool,
    ssl2_enabled: bool,
) -> bool {
    match family {
        CipherFamily::Tls => tls_enabled,
        CipherFamily::Ssl3 => ssl3_enabled,
        CipherFamily::Ssl2 => ssl2_enabled,
    }
}

/// Parses a comma-separated cipher directive string.
///
/// Each token is `+NAME` (enable) or `-NAME` (validate-only disable). An
/// unrecognized or protocol-mismatched name in either direction is fatal.
/// An absent or empty string returns `None`: "no restriction", which is
/// distinct from an explicitly empty enabled list.
pub(crate) fn parse_cipher_directives(
    directives: Option<&str>,
    catalog: &CipherCatalog,
    tls_enabled: bool,
    ssl3_enabled: bool,
    ssl2_enabled: bool,
) -> Result<Option<Vec<String>>, CipherError> {
    let directives = match directives {
        Some(s) if !s.trim().is_empty() => s,
        _ => return Ok(None),
    };

    let mut enabled = Vec::new();
    for token in directives.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        let (enable, name) = match token.split_at(1) {
            ("+", name) => (true, name),
            ("-", name) => (false, name),
            _ => return Err(CipherError::MalformedDirective(token.to_string())),
        };

        let family = catalog
            .family(name)
            .ok_or_else(|| CipherError::UnknownCipher(name.to_string()))?;
        if !family_enabled(family, tls_enabled, ssl3_enabled, ssl2_enabled) {
            return Err(CipherError::ProtocolMismatch(name.to_string()));
        }

        if enable {
            enabled.push(name.to_string());
        }
    }

    Ok(Some(enabled))
}

/// Merges the modern (TLS/SSL3) and legacy (SSL2) cipher selections.
///
/// An unset side falls back to the provider defaults classified under that
/// side's families. Both sides unset means no restriction at all.
pub(crate) fn merge_enabled_ciphers(
    catalog: &CipherCatalog,
    modern: Option<&[String]>,
    legacy: Option<&[String]>,
) -> Option<Vec<String>> {
    if modern.is_none() && legacy.is_none() {
        return None;
    }

    let mut merged = match modern {
        Some(list) => list.to_vec(),
        None => catalog.defaults_in(&[CipherFamily::Tls, CipherFamily::Ssl3]),
    };
    match legacy {
        Some(list) => merged.extend(list.iter().cloned()),
        None => merged.extend(catalog.defaults_in(&[CipherFamily::Ssl2])),
    }

    Some(merged)
}

/// The server-side context kept per TLS-enabled listener port.
struct TlsContext {
    acceptor: TlsAcceptor,
    enabled_ciphers: Option<Vec<String>>,
}

/// Either side of a brokered connection, plain or encrypted.
pub enum BrokerStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl BrokerStream {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            BrokerStream::Plain(stream) => stream.peer_addr(),
            BrokerStream::Tls(stream) => stream.get_ref().0.peer_addr(),
        }
    }

    #[inline]
    pub fn is_secure(&self) -> bool {
        matches!(self, BrokerStream::Tls(_))
    }
}

impl AsyncRead for BrokerStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BrokerStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            BrokerStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BrokerStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BrokerStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            BrokerStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BrokerStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            BrokerStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BrokerStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            BrokerStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Resolves per-listener server TLS contexts and the shared client context.
///
/// There is one context per TLS-enabled listener port and exactly one client
/// context reused for all outbound secure connections.
pub struct TlsProvisioner {
    contexts: RwLock<HashMap<u16, TlsContext>>,
    client: TlsConnector,
    catalog: CipherCatalog,
}

impl TlsProvisioner {
    /// Builds the port map and client context from the listener set.
    ///
    /// `client_settings` configures the outbound context; absent, it
    /// defaults to a TLS context with provider-default ciphers.
    pub fn from_listeners(
        listeners: &[ListenerConfig],
        client_settings: Option<&TlsSettings>,
        credentials: &Arc<dyn CredentialProvider>,
    ) -> Result<Self, BootstrapError> {
        let provider = Arc::new(ring::default_provider());
        let catalog = CipherCatalog::from_provider(&provider);

        let mut contexts = HashMap::new();
        for listener in listeners.iter().filter(|l| l.enabled) {
            let tls = match &listener.tls {
                Some(tls) => tls,
                None => continue,
            };

            let enabled_ciphers = resolve_ciphers(&listener.id, tls, &catalog)?;
            let config = build_server_config(
                &provider,
                credentials,
                tls,
                enabled_ciphers.as_deref(),
            )?;

            debug!(
                listener_id = %listener.id,
                port = listener.port,
                ciphers = ?enabled_ciphers,
                "Registered TLS context."
            );
            contexts.insert(
                listener.port,
                TlsContext {
                    acceptor: TlsAcceptor::from(Arc::new(config)),
                    enabled_ciphers,
                },
            );
        }

        let default_client;
        let client_settings = match client_settings {
            Some(settings) => settings,
            None => {
                default_client = TlsSettings::default();
                &default_client
            },
        };
        let client_ciphers = resolve_ciphers("client", client_settings, &catalog)?;
        let client_config = build_client_config(
            &provider,
            credentials,
            client_settings,
            client_ciphers.as_deref(),
        )?;

        Ok(Self {
            contexts: RwLock::new(contexts),
            client: TlsConnector::from(Arc::new(client_config)),
            catalog,
        })
    }

    #[inline]
    pub fn catalog(&self) -> &CipherCatalog {
        &self.catalog
    }

    /// Whether a server context is registered for the port.
    pub fn has_server_context(&self, port: u16) -> bool {
        self.contexts.read().contains_key(&port)
    }

    /// The enabled cipher names for a port, `None` meaning provider defaults.
    pub fn enabled_ciphers(&self, port: u16) -> Option<Vec<String>> {
        let contexts = self.contexts.read();
        contexts.get(&port).and_then(|ctx| ctx.enabled_ciphers.clone())
    }

    /// The acceptor for a TLS listener port.
    ///
    /// A missing context is a per-connection IO error, the listener itself
    /// stays up.
    pub fn server_acceptor(&self, port: u16) -> io::Result<TlsAcceptor> {
        let contexts = self.contexts.read();
        contexts
            .get(&port)
            .map(|ctx| ctx.acceptor.clone())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no TLS context registered for port {port}"),
                )
            })
    }

    /// Completes the server side of an accepted connection.
    ///
    /// Clear-text connections pass through untouched; secure kinds perform
    /// the handshake with the context registered for the local port.
    pub async fn accept(
        &self,
        kind: EndpointKind,
        stream: TcpStream,
    ) -> io::Result<BrokerStream> {
        stream.set_nodelay(true)?;
        if !kind.is_secure() {
            return Ok(BrokerStream::Plain(stream));
        }

        let port = stream.local_addr()?.port();
        let acceptor = self.server_acceptor(port)?;
        let tls = acceptor.accept(stream).await?;
        Ok(BrokerStream::Tls(Box::new(TlsStream::from(tls))))
    }

    /// Dials an outbound connection of the given kind.
    pub async fn connect(
        &self,
        kind: EndpointKind,
        host: &str,
        port: u16,
    ) -> io::Result<BrokerStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        if !kind.is_secure() {
            return Ok(BrokerStream::Plain(stream));
        }

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let tls = self.client.connect(server_name, stream).await?;
        Ok(BrokerStream::Tls(Box::new(TlsStream::from(tls))))
    }
}

fn resolve_ciphers(
    listener_id: &str,
    tls: &TlsSettings,
    catalog: &CipherCatalog,
) -> Result<Option<Vec<String>>, BootstrapError> {
    let cipher_err = |source| BootstrapError::Cipher {
        listener: listener_id.to_string(),
        source,
    };

    let modern = if tls.tls_enabled || tls.ssl3_enabled {
        parse_cipher_directives(
            tls.modern_ciphers.as_deref(),
            catalog,
            tls.tls_enabled,
            tls.ssl3_enabled,
            false,
        )
        .map_err(cipher_err)?
    } else {
        None
    };

    let legacy = if tls.ssl2_enabled {
        parse_cipher_directives(
            tls.legacy_ciphers.as_deref(),
            catalog,
            false,
            false,
            true,
        )
        .map_err(cipher_err)?
    } else {
        None
    };

    Ok(merge_enabled_ciphers(catalog, modern.as_deref(), legacy.as_deref()))
}

fn restrict_provider(
    provider: &Arc<CryptoProvider>,
    enabled: Option<&[String]>,
) -> Result<Arc<CryptoProvider>, BootstrapError> {
    let names = match enabled {
        None => return Ok(provider.clone()),
        Some(names) => names,
    };

    let cipher_suites: Vec<SupportedCipherSuite> = provider
        .cipher_suites
        .iter()
        .filter(|suite| names.iter().any(|n| n == &suite_name(suite)))
        .copied()
        .collect();
    if cipher_suites.is_empty() {
        return Err(BootstrapError::Tls(
            "enabled cipher list matches no suites shipped by the provider".to_string(),
        ));
    }

    Ok(Arc::new(CryptoProvider {
        cipher_suites,
        ..(**provider).clone()
    }))
}

fn build_server_config(
    provider: &Arc<CryptoProvider>,
    credentials: &Arc<dyn CredentialProvider>,
    tls: &TlsSettings,
    enabled_ciphers: Option<&[String]>,
) -> Result<ServerConfig, BootstrapError> {
    let variant =
        ProtocolVariant::from_flags(tls.tls_enabled, tls.ssl3_enabled, tls.ssl2_enabled);
    let provider = restrict_provider(provider, enabled_ciphers)?;
    let identity = credentials.server_identity(tls.cert_alias.as_deref())?;

    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(variant.rustls_versions())
        .map_err(|e| BootstrapError::Tls(e.to_string()))?;

    let builder = if tls.client_auth {
        let roots = credentials.trust_anchors()?;
        let verifier = WebPkiClientVerifier::builder_with_provider(
            Arc::new(roots),
            provider,
        )
        .build()
        .map_err(|e| BootstrapError::Tls(e.to_string()))?;
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };

    builder
        .with_single_cert(identity.cert_chain, identity.key)
        .map_err(|e| BootstrapError::Tls(e.to_string()))
}

fn build_client_config(
    provider: &Arc<CryptoProvider>,
    credentials: &Arc<dyn CredentialProvider>,
    tls: &TlsSettings,
    enabled_ciphers: Option<&[String]>,
) -> Result<ClientConfig, BootstrapError> {
    let variant =
        ProtocolVariant::from_flags(tls.tls_enabled, tls.ssl3_enabled, tls.ssl2_enabled);
    let provider = restrict_provider(provider, enabled_ciphers)?;
    let roots = credentials.trust_anchors()?;

    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(variant.rustls_versions())
        .map_err(|e| BootstrapError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(config)
}
