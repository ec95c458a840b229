use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::authority::{CertificateAuthority, Mkcert};
use crate::error::{CertError, CertificateUnavailable};
use crate::self_signed::{generate_self_signed, DEFAULT_HOSTNAME};
use crate::storage::{extract_not_after, read_bundle, write_bundle};

/// Where the certificate in a bundle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateOrigin {
    /// The bundle was already on disk and was left untouched.
    Existing,
    /// Issued by a local certificate authority such as mkcert.
    ExternalAuthority,
    SelfSigned,
}

impl std::fmt::Display for CertificateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CertificateOrigin::Existing => "existing",
            CertificateOrigin::ExternalAuthority => "external authority",
            CertificateOrigin::SelfSigned => "self-signed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct CertificateMaterial {
    pub bundle_path: PathBuf,
    /// `None` when the existing bundle's certificate could not be parsed.
    pub expires_at: Option<DateTime<Utc>>,
    pub origin: CertificateOrigin,
}

impl CertificateMaterial {
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= Utc::now())
    }
}

/// Makes sure a key + certificate bundle exists at a fixed path.
///
/// Resolution order: an existing bundle is reused as is, then the configured
/// authority is asked to issue one, then a self-signed certificate is
/// generated. Only when all of them fail is the caller told to go without TLS.
pub struct CertificateProvisioner {
    bundle_path: PathBuf,
    hostnames: Vec<String>,
    authority: Arc<dyn CertificateAuthority>,
}

impl std::fmt::Debug for CertificateProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateProvisioner")
            .field("bundle_path", &self.bundle_path)
            .field("hostnames", &self.hostnames)
            .field("authority", &self.authority.name())
            .finish()
    }
}

impl CertificateProvisioner {
    pub fn new(bundle_path: impl Into<PathBuf>, hostnames: Vec<String>) -> Self {
        let hostnames = if hostnames.is_empty() {
            vec![DEFAULT_HOSTNAME.to_string()]
        } else {
            hostnames
        };
        Self {
            bundle_path: bundle_path.into(),
            hostnames,
            authority: Arc::new(Mkcert::default()),
        }
    }

    pub fn with_authority(mut self, authority: Arc<dyn CertificateAuthority>) -> Self {
        self.authority = authority;
        self
    }

    pub fn bundle_path(&self) -> &Path {
        &self.bundle_path
    }

    pub fn hostnames(&self) -> &[String] {
        &self.hostnames
    }

    /// Blocking: may spawn the authority's process and generate an RSA key.
    pub fn ensure_certificate(&self) -> Result<CertificateMaterial, CertificateUnavailable> {
        if self.bundle_path.exists() {
            return self.load_existing();
        }

        let mut reasons = Vec::new();

        match self.issue_with_authority() {
            Ok(material) => return Ok(material),
            Err(CertError::Disabled) => {
                debug!(target: "lunette::certs", "external authority disabled")
            }
            Err(err) => {
                warn!(
                    target: "lunette::certs",
                    authority = self.authority.name(),
                    error = %err,
                    "external authority unavailable, generating a self-signed certificate"
                );
                reasons.push(err);
            }
        }

        match self.issue_self_signed() {
            Ok(material) => Ok(material),
            Err(err) => {
                warn!(target: "lunette::certs", error = %err, "self-signed generation failed");
                reasons.push(err);
                Err(CertificateUnavailable {
                    bundle: self.bundle_path.clone(),
                    reasons,
                })
            }
        }
    }

    fn load_existing(&self) -> Result<CertificateMaterial, CertificateUnavailable> {
        let pem = read_bundle(&self.bundle_path).map_err(|err| CertificateUnavailable {
            bundle: self.bundle_path.clone(),
            reasons: vec![err],
        })?;
        let expires_at = match extract_not_after(&pem) {
            Ok(expiry) => Some(expiry),
            Err(err) => {
                warn!(target: "lunette::certs", path = %self.bundle_path.display(), error = %err, "could not read certificate expiry");
                None
            }
        };
        let material = CertificateMaterial {
            bundle_path: self.bundle_path.clone(),
            expires_at,
            origin: CertificateOrigin::Existing,
        };
        if material.is_expired() {
            warn!(
                target: "lunette::certs",
                path = %self.bundle_path.display(),
                "existing certificate has expired; delete it to have a new one issued"
            );
        } else {
            info!(target: "lunette::certs", path = %self.bundle_path.display(), "using existing certificate");
        }
        Ok(material)
    }

    fn issue_with_authority(&self) -> Result<CertificateMaterial, CertError> {
        let cert_path = self.scratch_path("authority-cert.pem");
        let key_path = self.scratch_path("authority-key.pem");
        if let Some(parent) = self.bundle_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| CertError::io(parent, err))?;
        }

        let result = self
            .authority
            .issue(&self.hostnames, &cert_path, &key_path)
            .and_then(|()| {
                let cert = read_bundle(&cert_path)?;
                let key = read_bundle(&key_path)?;
                let expires_at = extract_not_after(&cert)?;
                write_bundle(&self.bundle_path, &key, &cert)?;
                Ok(expires_at)
            });
        remove_if_present(&cert_path);
        remove_if_present(&key_path);

        let expires_at = result?;
        info!(
            target: "lunette::certs",
            authority = self.authority.name(),
            path = %self.bundle_path.display(),
            %expires_at,
            "issued certificate from local authority"
        );
        if self.authority.name() == "mkcert" {
            info!(target: "lunette::certs", "run `mkcert -install` once so browsers trust this certificate");
        }
        Ok(CertificateMaterial {
            bundle_path: self.bundle_path.clone(),
            expires_at: Some(expires_at),
            origin: CertificateOrigin::ExternalAuthority,
        })
    }

    fn issue_self_signed(&self) -> Result<CertificateMaterial, CertError> {
        let pem = generate_self_signed(&self.hostnames)?;
        let expires_at = extract_not_after(&pem.certificate_pem)?;
        write_bundle(&self.bundle_path, &pem.private_key_pem, &pem.certificate_pem)?;
        warn!(
            target: "lunette::certs",
            path = %self.bundle_path.display(),
            %expires_at,
            "generated self-signed certificate; browsers will show a warning until it is trusted"
        );
        Ok(CertificateMaterial {
            bundle_path: self.bundle_path.clone(),
            expires_at: Some(expires_at),
            origin: CertificateOrigin::SelfSigned,
        })
    }

    fn scratch_path(&self, suffix: &str) -> PathBuf {
        let stem = self
            .bundle_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bundle".to_string());
        self.bundle_path.with_file_name(format!("{stem}.{suffix}"))
    }
}

fn remove_if_present(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            debug!(target: "lunette::certs", path = %path.display(), error = %err, "failed to remove scratch file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn default_hostname_is_localhost() {
        let provisioner = CertificateProvisioner::new("/tmp/x.pem", Vec::new());
        assert_eq!(provisioner.hostnames(), ["localhost".to_string()]);
    }

    #[test]
    fn scratch_files_sit_next_to_bundle() {
        let provisioner = CertificateProvisioner::new("/srv/certs/localhost.pem", Vec::new());
        assert_eq!(
            provisioner.scratch_path("authority-cert.pem"),
            PathBuf::from("/srv/certs/localhost.authority-cert.pem")
        );
    }

    #[test]
    fn unreadable_existing_bundle_is_not_overwritten() {
        let temp = tempdir().expect("tempdir");
        // A directory where the bundle should be cannot be read as a file.
        let bundle = temp.path().join("localhost.pem");
        fs::create_dir(&bundle).expect("mkdir");
        let err = CertificateProvisioner::new(&bundle, Vec::new())
            .ensure_certificate()
            .unwrap_err();
        assert_eq!(err.reasons.len(), 1);
        assert!(bundle.is_dir());
    }
}
