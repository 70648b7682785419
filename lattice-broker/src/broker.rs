use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::endpoint::{EndpointKind, SocketEndpoint};
use crate::error::BootstrapError;
use crate::listener::{validate_listeners, ListenerConfig, TlsSettings};
use crate::tls::{BrokerStream, CredentialProvider, TlsProvisioner};
use crate::{DEFAULT_HOST, DEFAULT_PORT};

/// Scheme prefix of a single locator endpoint.
pub const LOCATOR_SCHEME: &str = "lrpc:1.0@";

/// How long a bind waits for a previously-listening port to free up.
///
/// OS-level socket teardown can lag a restart; failing immediately would
/// turn every quick bounce into a startup failure.
pub const BIND_RETRY_WINDOW: Duration = Duration::from_secs(10);

const BIND_RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The role this process plays in the deployment.
pub enum ProcessRole {
    /// Accepts inbound connections, one acceptor per enabled listener.
    Server,
    /// Outbound-only, no acceptors are registered.
    Client,
}

impl ProcessRole {
    #[inline]
    pub fn is_server(&self) -> bool {
        matches!(self, ProcessRole::Server)
    }
}

#[derive(Debug, Clone)]
/// Configuration assembled into a running broker.
pub struct BrokerConfig {
    pub role: ProcessRole,
    pub listeners: Vec<ListenerConfig>,
    /// Explicit runtime override for the initial host, takes precedence over
    /// any listener address.
    pub initial_host: Option<String>,
    /// Explicit runtime override for the initial port.
    pub initial_port: Option<u16>,
    /// Explicit bootstrap endpoints (`host:port` each), used for the locator
    /// URL instead of the resolved initial address.
    pub endpoints_override: Option<Vec<String>>,
    /// Outbound TLS settings shared by every secure client connection.
    pub client_tls: Option<TlsSettings>,
}

impl BrokerConfig {
    pub fn new(role: ProcessRole, listeners: Vec<ListenerConfig>) -> Self {
        Self {
            role,
            listeners,
            initial_host: None,
            initial_port: None,
            endpoints_override: None,
            client_tls: None,
        }
    }
}

#[async_trait]
/// Receives connections accepted by the broker's listeners.
///
/// The wire protocol spoken on the stream is up to the handler, the broker
/// only performs transport setup.
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, conn: InboundConnection);
}

/// An accepted connection with its transport already established.
pub struct InboundConnection {
    pub listener_id: String,
    pub kind: EndpointKind,
    pub peer_addr: SocketAddr,
    pub stream: BrokerStream,
}

/// Builds the locator URL for a well-known bootstrap service.
///
/// Shape: `locator:lrpc:1.0@host:port/<Service>`, with multiple endpoints
/// comma-joined before the service suffix.
pub fn locator_url(endpoints: &[String], service: &str) -> String {
    let joined = endpoints
        .iter()
        .map(|ep| format!("{LOCATOR_SCHEME}{}", ep.trim()))
        .collect::<Vec<_>>()
        .join(",");
    format!("locator:{joined}/{service}")
}

/// Binds a listener, tolerating a port still held by a dying process.
///
/// Retries `AddrInUse` until [`BIND_RETRY_WINDOW`] elapses, then surfaces
/// the error.
pub async fn bind_with_retry(addr: SocketAddr) -> io::Result<TcpListener> {
    let deadline = Instant::now() + BIND_RETRY_WINDOW;
    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse && Instant::now() < deadline => {
                debug!(addr = %addr, "Port still in use, retrying bind.");
                sleep(BIND_RETRY_DELAY).await;
            },
            Err(e) => return Err(e),
        }
    }
}

struct BrokerShared {
    provisioner: TlsProvisioner,
    listeners: Vec<ListenerConfig>,
    initial_host: String,
    initial_port: u16,
    endpoints_override: Option<Vec<String>>,
}

/// A running broker instance.
///
/// Constructed once per process in server role; the handle is passed
/// explicitly to every component that needs transport access, there is no
/// hidden process-wide lookup.
pub struct Broker {
    shared: Arc<BrokerShared>,
    acceptors: Vec<JoinHandle<()>>,
    lazy: Option<ActivationHandle>,
}

impl Broker {
    /// Validates the configuration and brings the broker up.
    ///
    /// Fatal configuration errors abort before any acceptor is created. In
    /// server role one acceptor task is spawned per enabled listener, except
    /// a lazy listener whose socket binds on first activation.
    pub async fn bootstrap(
        config: BrokerConfig,
        credentials: Arc<dyn CredentialProvider>,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<Broker, BootstrapError> {
        validate_listeners(&config.listeners)?;

        // Server contexts are only provisioned when this process accepts
        // connections; a client-only process builds just the outbound
        // context.
        let server_listeners: &[ListenerConfig] = if config.role.is_server() {
            &config.listeners
        } else {
            &[]
        };
        let provisioner = TlsProvisioner::from_listeners(
            server_listeners,
            config.client_tls.as_ref(),
            &credentials,
        )?;

        let initial_host = resolve_initial_host(&config);
        let initial_port = resolve_initial_port(&config);

        let shared = Arc::new(BrokerShared {
            provisioner,
            listeners: config.listeners.clone(),
            initial_host,
            initial_port,
            endpoints_override: config.endpoints_override.clone(),
        });

        let mut broker = Broker {
            shared: shared.clone(),
            acceptors: Vec::new(),
            lazy: None,
        };

        if config.role.is_server() {
            for listener in config.listeners.iter().filter(|l| l.enabled) {
                if listener.lazy_init {
                    broker.lazy = Some(ActivationHandle::new(
                        listener.clone(),
                        shared.clone(),
                        handler.clone(),
                    ));
                    continue;
                }

                let acceptor =
                    spawn_acceptor(listener.clone(), shared.clone(), handler.clone())
                        .await?;
                broker.acceptors.push(acceptor);
            }
        }

        info!(
            initial_host = %broker.shared.initial_host,
            initial_port = broker.shared.initial_port,
            num_acceptors = broker.acceptors.len(),
            lazy = broker.lazy.is_some(),
            "Broker bootstrap complete."
        );

        Ok(broker)
    }

    /// Creates a cheap handle for components that need transport access.
    pub fn handle(&self) -> BrokerHandle {
        BrokerHandle {
            shared: self.shared.clone(),
        }
    }

    /// The on-demand activation hook of the lazy listener, if one is
    /// configured.
    pub fn activation_handle(&self) -> Option<&ActivationHandle> {
        self.lazy.as_ref()
    }

    #[inline]
    pub fn initial_host(&self) -> &str {
        &self.shared.initial_host
    }

    #[inline]
    pub fn initial_port(&self) -> u16 {
        self.shared.initial_port
    }

    #[inline]
    pub fn provisioner(&self) -> &TlsProvisioner {
        &self.shared.provisioner
    }

    /// The locator URL clients use to reach the named bootstrap service.
    pub fn bootstrap_locator(&self, service: &str) -> String {
        self.shared.bootstrap_locator(service)
    }

    /// Comma-separated `host:port` list of all enabled clear-text listener
    /// endpoints, used to seed client failover.
    pub fn endpoint_summary(&self) -> String {
        self.shared.endpoint_summary()
    }

    /// Signals every acceptor to shut down.
    pub fn shutdown(&self) {
        for acceptor in &self.acceptors {
            acceptor.abort();
        }
        if let Some(lazy) = &self.lazy {
            lazy.shutdown();
        }
    }
}

#[derive(Clone)]
/// Cheap clonable view of a running broker.
pub struct BrokerHandle {
    shared: Arc<BrokerShared>,
}

impl BrokerHandle {
    #[inline]
    pub fn initial_host(&self) -> &str {
        &self.shared.initial_host
    }

    #[inline]
    pub fn initial_port(&self) -> u16 {
        self.shared.initial_port
    }

    #[inline]
    pub fn provisioner(&self) -> &TlsProvisioner {
        &self.shared.provisioner
    }

    pub fn bootstrap_locator(&self, service: &str) -> String {
        self.shared.bootstrap_locator(service)
    }

    pub fn endpoint_summary(&self) -> String {
        self.shared.endpoint_summary()
    }

    /// Endpoints of every enabled listener, in configuration order.
    pub fn listener_endpoints(&self) -> Vec<SocketEndpoint> {
        self.shared
            .listeners
            .iter()
            .filter(|l| l.enabled)
            .map(|l| SocketEndpoint::new(l.endpoint_kind(), l.host.clone(), l.port))
            .collect()
    }

    /// Dials an outbound connection of the given kind.
    pub async fn connect(
        &self,
        kind: EndpointKind,
        host: &str,
        port: u16,
    ) -> io::Result<BrokerStream> {
        self.shared.provisioner.connect(kind, host, port).await
    }
}

impl BrokerShared {
    fn bootstrap_locator(&self, service: &str) -> String {
        match &self.endpoints_override {
            Some(endpoints) if !endpoints.is_empty() => locator_url(endpoints, service),
            _ => {
                let ep = format!("{}:{}", self.initial_host, self.initial_port);
                locator_url(&[ep], service)
            },
        }
    }

    fn endpoint_summary(&self) -> String {
        self.listeners
            .iter()
            .filter(|l| l.enabled && !l.is_secure())
            .map(|l| format!("{}:{}", l.host, l.port))
            .collect::<Vec<_>>()
            .join(",")
    }
}

async fn spawn_acceptor(
    listener: ListenerConfig,
    shared: Arc<BrokerShared>,
    handler: Arc<dyn InboundHandler>,
) -> io::Result<JoinHandle<()>> {
    let bind_host = listener.host.clone();
    let addr = resolve_bind_addr(&bind_host, listener.port)?;
    let socket = bind_with_retry(addr).await?;
    info!(
        listener_id = %listener.id,
        addr = %addr,
        kind = ?listener.endpoint_kind(),
        "Listener accepting connections."
    );

    Ok(tokio::spawn(run_acceptor(listener, socket, shared, handler)))
}

async fn run_acceptor(
    listener: ListenerConfig,
    socket: TcpListener,
    shared: Arc<BrokerShared>,
    handler: Arc<dyn InboundHandler>,
) {
    let kind = listener.endpoint_kind();
    loop {
        let (stream, peer_addr) = match socket.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(listener_id = %listener.id, error = ?e, "Accept failed.");
                sleep(Duration::from_millis(50)).await;
                continue;
            },
        };

        // Transport setup failures (including a missing TLS context) fail
        // only this connection; the acceptor keeps running.
        let shared = shared.clone();
        let handler = handler.clone();
        let listener_id = listener.id.clone();
        tokio::spawn(async move {
            match shared.provisioner.accept(kind, stream).await {
                Ok(stream) => {
                    handler
                        .handle(InboundConnection {
                            listener_id,
                            kind,
                            peer_addr,
                            stream,
                        })
                        .await;
                },
                Err(e) => {
                    warn!(
                        listener_id = %listener_id,
                        peer_addr = %peer_addr,
                        error = ?e,
                        "Dropping connection, transport setup failed."
                    );
                },
            }
        });
    }
}

/// On-demand activation hook for the lazy listener.
///
/// No thread is bound to accept connections until [`ActivationHandle::activate`]
/// runs; activation is idempotent.
pub struct ActivationHandle {
    listener: ListenerConfig,
    shared: Arc<BrokerShared>,
    handler: Arc<dyn InboundHandler>,
    state: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ActivationHandle {
    fn new(
        listener: ListenerConfig,
        shared: Arc<BrokerShared>,
        handler: Arc<dyn InboundHandler>,
    ) -> Self {
        Self {
            listener,
            shared,
            handler,
            state: tokio::sync::Mutex::new(None),
        }
    }

    #[inline]
    pub fn listener_id(&self) -> &str {
        &self.listener.id
    }

    /// Binds the deferred socket and starts accepting.
    pub async fn activate(&self) -> io::Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Ok(());
        }

        info!(listener_id = %self.listener.id, "Activating lazy listener.");
        let acceptor = spawn_acceptor(
            self.listener.clone(),
            self.shared.clone(),
            self.handler.clone(),
        )
        .await?;
        *state = Some(acceptor);
        Ok(())
    }

    /// Whether the deferred socket has been bound.
    pub fn is_active(&self) -> bool {
        self.state
            .try_lock()
            .map(|state| state.is_some())
            .unwrap_or(true)
    }

    fn shutdown(&self) {
        if let Ok(state) = self.state.try_lock() {
            if let Some(acceptor) = state.as_ref() {
                acceptor.abort();
            }
        }
    }
}

fn resolve_bind_addr(host: &str, port: u16) -> io::Result<SocketAddr> {
    use std::net::ToSocketAddrs;
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("listener address `{host}:{port}` did not resolve"),
            )
        })
}

fn resolve_initial_host(config: &BrokerConfig) -> String {
    let host = config
        .initial_host
        .clone()
        .or_else(|| clear_text_listener(config).map(|l| l.host.clone()))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());

    replace_any_address(&host)
}

fn resolve_initial_port(config: &BrokerConfig) -> u16 {
    config
        .initial_port
        .or_else(|| clear_text_listener(config).map(|l| l.port))
        .unwrap_or(DEFAULT_PORT)
}

// The first enabled clear-text listener. Whether a configuration with no
// clear-text listener at all is actually useful is questionable, but it is
// allowed; the defaults then take over.
fn clear_text_listener(config: &BrokerConfig) -> Option<&ListenerConfig> {
    config
        .listeners
        .iter()
        .find(|l| l.enabled && !l.is_secure())
}

fn is_any_address(host: &str) -> bool {
    matches!(host, "0.0.0.0" | "::" | "::ffff:0.0.0.0")
}

fn replace_any_address(host: &str) -> String {
    if !is_any_address(host) {
        return host.to_string();
    }

    match local_host_address() {
        Ok(addr) => addr.to_string(),
        Err(e) => {
            warn!(error = ?e, "Could not resolve the local host address, using the default host.");
            DEFAULT_HOST.to_string()
        },
    }
}

// Resolves the preferred outbound interface address. No datagram is ever
// sent, connecting a UDP socket only selects a route.
fn local_host_address() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.connect(("198.51.100.1", 80))?;
    Ok(socket.local_addr()?.ip())
}
