//! Certificate provisioning for serving the dev site over HTTPS.
//!
//! Mobile browsers only expose camera and motion sensors to secure origins,
//! so the server needs a certificate before it can be useful on a phone.
//! [`CertificateProvisioner`] reuses an existing bundle, asks a local
//! authority (mkcert) for one, or generates a self-signed certificate.

pub mod authority;
pub mod error;
pub mod provisioner;
pub mod self_signed;
pub mod storage;

pub use authority::{CertificateAuthority, Mkcert, NoAuthority};
pub use error::{CertError, CertificateUnavailable};
pub use provisioner::{CertificateMaterial, CertificateOrigin, CertificateProvisioner};
pub use self_signed::{generate_self_signed, SelfSignedPem};
pub use storage::{extract_not_after, write_bundle};
