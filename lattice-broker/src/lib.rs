#[macro_use]
extern crate tracing;

mod broker;
mod endpoint;
mod error;
mod listener;
mod object_key;
mod policy;
mod reference;
mod tls;

pub use async_trait::async_trait;
pub use broker::{
    bind_with_retry,
    locator_url,
    ActivationHandle,
    Broker,
    BrokerConfig,
    BrokerHandle,
    InboundConnection,
    InboundHandler,
    ProcessRole,
    BIND_RETRY_WINDOW,
    LOCATOR_SCHEME,
};
pub use endpoint::{EndpointKind, InvalidEndpoint, SocketEndpoint};
pub use error::{BootstrapError, CallError, CipherError};
pub use listener::{validate_listeners, ListenerConfig, TlsSettings};
pub use object_key::{ObjectKey, KEY_HEADER_LEN};
pub use policy::{CopySemantics, Policy, PolicySet};
pub use reference::{
    DestroyStatus,
    DispatchHandle,
    ReferenceFactory,
    RemoteRef,
    TargetResolver,
    ThreadPoolRegistry,
    TypeDescriptor,
    LOCATE_RETRY_DELAY,
    LOCATE_RETRY_LIMIT,
};
pub use tls::{
    BrokerStream,
    CipherCatalog,
    CipherFamily,
    CredentialProvider,
    ProtocolVariant,
    ServerIdentity,
    TlsProvisioner,
};

/// Host used when no listener or override supplies one.
pub const DEFAULT_HOST: &str = "localhost";
/// Port used when no listener or override supplies one.
pub const DEFAULT_PORT: u16 = 4700;
