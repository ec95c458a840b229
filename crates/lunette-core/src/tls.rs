use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lunette_certs::{
    CertificateAuthority, CertificateMaterial, CertificateProvisioner, CertificateUnavailable,
    Mkcert, NoAuthority,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::config::{AuthorityKind, TlsSettings};

const ALPN_HTTP11: &[u8] = b"http/1.1";

#[derive(Debug, Error)]
pub enum TlsError {
    #[error(transparent)]
    Unavailable(#[from] CertificateUnavailable),
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificate found in {}", .0.display())]
    NoCertificate(PathBuf),
    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),
    #[error("rustls rejected the certificate: {0}")]
    Rustls(#[from] rustls::Error),
    #[error("certificate provisioning task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Where the served certificate came from.
#[derive(Debug, Clone)]
pub enum CertificateSource {
    Provisioned(CertificateMaterial),
    Explicit { certificate: PathBuf, private_key: PathBuf },
}

/// Outcome of preparing TLS. A failure is not fatal: the server keeps going
/// over plain HTTP.
pub enum TlsSetup {
    Ready {
        acceptor: TlsAcceptor,
        source: CertificateSource,
    },
    Downgraded(TlsError),
}

impl std::fmt::Debug for TlsSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsSetup::Ready { source, .. } => f.debug_struct("Ready").field("source", source).finish(),
            TlsSetup::Downgraded(err) => f.debug_tuple("Downgraded").field(err).finish(),
        }
    }
}

/// Provision or load the certificate for `settings` and build an acceptor.
pub async fn prepare(settings: &TlsSettings, root: &Path) -> TlsSetup {
    match try_prepare(settings, root).await {
        Ok((acceptor, source)) => TlsSetup::Ready { acceptor, source },
        Err(err) => TlsSetup::Downgraded(err),
    }
}

async fn try_prepare(
    settings: &TlsSettings,
    root: &Path,
) -> Result<(TlsAcceptor, CertificateSource), TlsError> {
    if let Some(pair) = &settings.explicit_pair {
        let certs = load_certificates(&pair.certificate)?;
        let key = load_private_key(&pair.private_key)?;
        let acceptor = acceptor_from(certs, key)?;
        info!(target: "lunette::tls", cert = %pair.certificate.display(), "using supplied certificate");
        return Ok((
            acceptor,
            CertificateSource::Explicit {
                certificate: pair.certificate.clone(),
                private_key: pair.private_key.clone(),
            },
        ));
    }

    let authority: Arc<dyn CertificateAuthority> = match settings.authority {
        AuthorityKind::Mkcert => Arc::new(Mkcert::default()),
        AuthorityKind::None => Arc::new(NoAuthority),
    };
    let provisioner = CertificateProvisioner::new(settings.bundle_path(root), settings.hostnames.clone())
        .with_authority(authority);
    let material = tokio::task::spawn_blocking(move || provisioner.ensure_certificate()).await??;

    let certs = load_certificates(&material.bundle_path)?;
    let key = load_private_key(&material.bundle_path)?;
    let acceptor = acceptor_from(certs, key)?;
    if let Some(expires_at) = material.expires_at {
        info!(target: "lunette::tls", bundle = %material.bundle_path.display(), origin = %material.origin, %expires_at, "tls certificate ready");
    } else {
        warn!(target: "lunette::tls", bundle = %material.bundle_path.display(), "tls certificate ready, expiry unknown");
    }
    Ok((acceptor, CertificateSource::Provisioned(material)))
}

fn read(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Every certificate in a PEM file, leaf first.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem = read(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate(path.to_path_buf()));
    }
    Ok(certs)
}

/// The first PKCS#8, PKCS#1 or SEC1 private key in a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let pem = read(path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

pub fn acceptor_from(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<TlsAcceptor, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![ALPN_HTTP11.to_vec()];
    Ok(TlsAcceptor::from(Arc::new(config)))
}
