use rand::rngs::OsRng;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_RSA_SHA256};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use time::OffsetDateTime;

use crate::error::CertError;

pub const DEFAULT_HOSTNAME: &str = "localhost";
pub const RSA_KEY_BITS: usize = 2048;
pub const VALIDITY_DAYS: i64 = 365;

/// PEM encoded output of [`generate_self_signed`].
#[derive(Debug, Clone)]
pub struct SelfSignedPem {
    pub certificate_pem: String,
    pub private_key_pem: String,
}

/// Generate an RSA-2048 / SHA-256 certificate valid for a year.
///
/// The subject (and issuer) common name is always `localhost`. The subject
/// alternative names are `localhost` followed by the other hostnames.
pub fn generate_self_signed(hostnames: &[String]) -> Result<SelfSignedPem, CertError> {
    let mut names = vec![DEFAULT_HOSTNAME.to_string()];
    for name in hostnames {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }

    let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
        .map_err(|err| CertError::KeyGeneration(err.to_string()))?;
    let key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|err| CertError::KeyGeneration(err.to_string()))?;
    let key_pair = KeyPair::from_pem_and_sign_algo(&key_pem, &PKCS_RSA_SHA256)?;

    let mut params = CertificateParams::new(names)?;
    let mut subject = DistinguishedName::new();
    subject.push(DnType::CommonName, DEFAULT_HOSTNAME);
    params.distinguished_name = subject;
    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(VALIDITY_DAYS);

    let certificate = params.self_signed(&key_pair)?;
    Ok(SelfSignedPem {
        certificate_pem: certificate.pem(),
        private_key_pem: key_pair.serialize_pem(),
    })
}
