use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::CertError;

/// A locally trusted certificate authority able to issue leaf certificates.
pub trait CertificateAuthority: Send + Sync {
    fn name(&self) -> &str;

    /// Issue a certificate covering `hostnames`, writing PEM files to
    /// `cert_path` and `key_path`.
    fn issue(&self, hostnames: &[String], cert_path: &Path, key_path: &Path)
        -> Result<(), CertError>;
}

/// [mkcert](https://github.com/FiloSottile/mkcert), whose root is trusted by
/// browsers once `mkcert -install` has been run.
#[derive(Debug, Clone)]
pub struct Mkcert {
    program: PathBuf,
}

impl Default for Mkcert {
    fn default() -> Self {
        Self::new("mkcert")
    }
}

impl Mkcert {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn tool(&self) -> String {
        self.program.display().to_string()
    }
}

impl CertificateAuthority for Mkcert {
    fn name(&self) -> &str {
        "mkcert"
    }

    fn issue(
        &self,
        hostnames: &[String],
        cert_path: &Path,
        key_path: &Path,
    ) -> Result<(), CertError> {
        debug!(target: "lunette::certs", program = %self.program.display(), ?hostnames, "invoking mkcert");
        let output = Command::new(&self.program)
            .arg("-cert-file")
            .arg(cert_path)
            .arg("-key-file")
            .arg(key_path)
            .args(hostnames)
            .output();

        let output = match output {
            Ok(output) => output,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CertError::ToolMissing { tool: self.tool() })
            }
            Err(err) => return Err(CertError::io(&self.program, err)),
        };

        if !output.status.success() {
            return Err(CertError::ToolFailed {
                tool: self.tool(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if !cert_path.is_file() || !key_path.is_file() {
            return Err(CertError::ToolFailed {
                tool: self.tool(),
                status: output.status.to_string(),
                stderr: "no certificate files were produced".to_string(),
            });
        }
        Ok(())
    }
}

/// Skips straight to self-signed generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthority;

impl CertificateAuthority for NoAuthority {
    fn name(&self) -> &str {
        "none"
    }

    fn issue(&self, _hostnames: &[String], _cert: &Path, _key: &Path) -> Result<(), CertError> {
        Err(CertError::Disabled)
    }
}
