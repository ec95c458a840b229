use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} is not installed")]
    ToolMissing { tool: String },
    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("external certificate authority disabled")]
    Disabled,
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("rcgen error: {0}")]
    Rcgen(#[from] rcgen::Error),
    #[error("x509 parse error: {0}")]
    X509(String),
}

impl CertError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CertError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Every step of the provisioning chain failed; the caller should serve plain HTTP.
#[derive(Debug, Error)]
#[error("no TLS certificate available for {}: {}", .bundle.display(), join_reasons(.reasons))]
pub struct CertificateUnavailable {
    pub bundle: PathBuf,
    pub reasons: Vec<CertError>,
}

fn join_reasons(reasons: &[CertError]) -> String {
    reasons
        .iter()
        .map(|reason| reason.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
