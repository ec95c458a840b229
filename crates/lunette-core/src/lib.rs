//! Listener and connection handling for the Lunette dev server.
//!
//! [`DevServer::bind`] opens the socket and optionally wraps it in TLS;
//! [`DevServer::spawn`] and [`DevServer::serve_until`] drive the accept loop
//! until shutdown, letting in-flight responses finish.

pub mod config;
pub mod server;
pub mod tls;

pub use config::{AuthorityKind, ExplicitPair, ServerConfig, TlsSettings};
pub use server::{DevServer, Scheme, ServerError, ServerHandle};
pub use tls::{CertificateSource, TlsError, TlsSetup};
