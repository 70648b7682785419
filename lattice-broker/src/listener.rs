use crate::endpoint::EndpointKind;
use crate::error::BootstrapError;

#[derive(Debug, Clone, PartialEq, Eq)]
/// The TLS sub-block of a listener descriptor, consumed read-only from
/// external configuration.
pub struct TlsSettings {
    /// Certificate alias resolved through the credential provider. `None`
    /// selects the provider's default identity.
    pub cert_alias: Option<String>,
    /// Whether connecting clients must present a certificate.
    pub client_auth: bool,
    pub tls_enabled: bool,
    pub ssl3_enabled: bool,
    pub ssl2_enabled: bool,
    /// `+`/`-` cipher directives for the TLS/SSL3 family.
    pub modern_ciphers: Option<String>,
    /// `+`/`-` cipher directives for the SSL2 family.
    pub legacy_ciphers: Option<String>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            cert_alias: None,
            client_auth: false,
            tls_enabled: true,
            ssl3_enabled: false,
            ssl2_enabled: false,
            modern_ciphers: None,
            legacy_ciphers: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A configured network listener the broker accepts connections on.
pub struct ListenerConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    /// TLS configuration. `None` makes this a clear-text listener.
    pub tls: Option<TlsSettings>,
    /// Bind the socket only on first use instead of at startup.
    pub lazy_init: bool,
    pub enabled: bool,
}

impl ListenerConfig {
    /// A clear-text, eagerly-bound, enabled listener.
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            tls: None,
            lazy_init: false,
            enabled: true,
        }
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn lazy(mut self) -> Self {
        self.lazy_init = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    #[inline]
    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    /// The endpoint kind this listener registers its acceptor under.
    pub fn endpoint_kind(&self) -> EndpointKind {
        match &self.tls {
            None => EndpointKind::ClearText,
            Some(tls) if tls.client_auth => EndpointKind::SslMutualAuth,
            Some(_) => EndpointKind::Ssl,
        }
    }
}

/// Validates the listener set before any acceptor is created.
///
/// At most one listener may be lazily initialized, and a lazy listener must
/// not require TLS. Violations are fatal configuration errors.
pub fn validate_listeners(listeners: &[ListenerConfig]) -> Result<(), BootstrapError> {
    let lazy: Vec<&ListenerConfig> =
        listeners.iter().filter(|l| l.lazy_init).collect();

    if lazy.len() > 1 {
        let ids = lazy.iter().map(|l| l.id.clone()).collect();
        return Err(BootstrapError::MultipleLazyListeners(ids));
    }

    let lazy_tls: Vec<String> = lazy
        .iter()
        .filter(|l| l.is_secure())
        .map(|l| l.id.clone())
        .collect();
    if !lazy_tls.is_empty() {
        return Err(BootstrapError::LazyTlsListeners(lazy_tls));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_lazy_clear_text_listener_is_fine() {
        let listeners = vec![
            ListenerConfig::new("L1", "0.0.0.0", 4700).lazy(),
            ListenerConfig::new("L2", "0.0.0.0", 4701).with_tls(TlsSettings::default()),
        ];
        validate_listeners(&listeners).expect("Validation OK");
    }

    #[test]
    fn test_two_lazy_listeners_fail() {
        let listeners = vec![
            ListenerConfig::new("L1", "0.0.0.0", 4700).lazy(),
            ListenerConfig::new("L2", "0.0.0.0", 4701).lazy(),
        ];
        let err = validate_listeners(&listeners).unwrap_err();
        assert!(matches!(err, BootstrapError::MultipleLazyListeners(ids) if ids == ["L1", "L2"]));
    }

    #[test]
    fn test_lazy_tls_listener_fails() {
        let listeners = vec![
            ListenerConfig::new("L1", "0.0.0.0", 4700)
                .with_tls(TlsSettings::default())
                .lazy(),
        ];
        let err = validate_listeners(&listeners).unwrap_err();
        assert!(matches!(err, BootstrapError::LazyTlsListeners(ids) if ids == ["L1"]));
    }

    #[test]
    fn test_endpoint_kind() {
        assert_eq!(
            ListenerConfig::new("a", "h", 1).endpoint_kind(),
            EndpointKind::ClearText
        );
        assert_eq!(
            ListenerConfig::new("b", "h", 1)
                .with_tls(TlsSettings::default())
                .endpoint_kind(),
            EndpointKind::Ssl
        );

        let mutual = TlsSettings {
            client_auth: true,
            ..TlsSettings::default()
        };
        assert_eq!(
            ListenerConfig::new("c", "h", 1).with_tls(mutual).endpoint_kind(),
            EndpointKind::SslMutualAuth
        );
    }
}
