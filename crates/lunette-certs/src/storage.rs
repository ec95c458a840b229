use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use x509_parser::prelude::*;

use crate::error::CertError;

/// Write a PEM bundle containing the private key followed by the certificate.
///
/// Missing parent directories are created. On unix the file is readable by
/// the owner only.
pub fn write_bundle(path: &Path, private_key_pem: &str, certificate_pem: &str) -> Result<(), CertError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| CertError::io(parent, err))?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(|err| CertError::io(path, err))?;

    let mut contents = String::with_capacity(private_key_pem.len() + certificate_pem.len() + 1);
    contents.push_str(private_key_pem);
    if !private_key_pem.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(certificate_pem);
    file.write_all(contents.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|err| CertError::io(path, err))
}

pub fn read_bundle(path: &Path) -> Result<String, CertError> {
    fs::read_to_string(path).map_err(|err| CertError::io(path, err))
}

/// Expiry of the first certificate found in `pem`.
pub fn extract_not_after(pem: &str) -> Result<DateTime<Utc>, CertError> {
    let mut cursor = Cursor::new(pem.as_bytes());
    let der = rustls_pemfile::certs(&mut cursor)
        .next()
        .ok_or_else(|| CertError::X509("certificate chain empty".into()))?
        .map_err(|_| CertError::X509("failed to parse PEM".into()))?;
    let cert = X509Certificate::from_der(der.as_ref())
        .map_err(|err| CertError::X509(err.to_string()))?
        .1;
    let not_after = cert.validity().not_after.to_datetime();
    DateTime::<Utc>::from_timestamp(not_after.unix_timestamp(), not_after.nanosecond())
        .ok_or_else(|| CertError::X509("invalid certificate expiry".into()))
}
