use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lunette_edge::{normalize_extension, SiteConfig, DEFAULT_INDEX};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_HEADER_READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CERT_DIR: &str = ".lunette/certs";
pub const DEFAULT_BUNDLE_NAME: &str = "localhost.pem";

/// Which local certificate authority to try before self-signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorityKind {
    #[default]
    Mkcert,
    None,
}

/// A certificate and key supplied by the operator, used as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitPair {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    /// Relative paths are resolved against the served root.
    pub certificate_dir: PathBuf,
    pub bundle_name: String,
    pub hostnames: Vec<String>,
    pub authority: AuthorityKind,
    pub explicit_pair: Option<ExplicitPair>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            certificate_dir: PathBuf::from(DEFAULT_CERT_DIR),
            bundle_name: DEFAULT_BUNDLE_NAME.to_string(),
            hostnames: vec!["localhost".to_string()],
            authority: AuthorityKind::Mkcert,
            explicit_pair: None,
        }
    }
}

impl TlsSettings {
    pub fn bundle_path(&self, root: &Path) -> PathBuf {
        let dir = if self.certificate_dir.is_absolute() {
            self.certificate_dir.clone()
        } else {
            root.join(&self.certificate_dir)
        };
        dir.join(&self.bundle_name)
    }
}

/// Everything the server needs, built once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub root: PathBuf,
    pub index: String,
    pub allowed_extensions: Option<BTreeSet<String>>,
    /// `Some` enables HTTPS.
    pub tls: Option<TlsSettings>,
    /// `None` disables the timeout.
    pub header_read_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

impl ServerConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            root: root.into(),
            index: DEFAULT_INDEX.to_string(),
            allowed_extensions: None,
            tls: None,
            header_read_timeout: Some(DEFAULT_HEADER_READ_TIMEOUT),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    pub fn with_allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions = Some(
            extensions
                .into_iter()
                .map(|ext| normalize_extension(ext.as_ref()))
                .collect(),
        );
        self
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    /// A zero duration disables the timeout.
    pub fn with_header_read_timeout(mut self, timeout: Duration) -> Self {
        self.header_read_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// `host:port` as given, for messages.
    pub fn bind_target(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Handler settings. Certificate material is hidden from clients even
    /// when it lives under the root.
    pub fn site(&self) -> SiteConfig {
        let mut hidden = Vec::new();
        if let Some(tls) = &self.tls {
            hidden.push(tls.certificate_dir.clone());
            if let Some(pair) = &tls.explicit_pair {
                for path in [&pair.certificate, &pair.private_key] {
                    hidden.push(std::path::absolute(path).unwrap_or_else(|_| path.clone()));
                }
            }
        }
        SiteConfig {
            root: self.root.clone(),
            index: self.index.clone(),
            allowed_extensions: self.allowed_extensions.clone(),
            hidden,
        }
    }
}
