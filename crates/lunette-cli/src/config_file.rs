use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::ServeArgs;

/// Values from a config file. Every field that is set replaces the matching flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub root: Option<PathBuf>,
    pub index: Option<String>,
    pub https: Option<bool>,
    pub cert_dir: Option<PathBuf>,
    pub hostnames: Option<Vec<String>>,
    pub mkcert: Option<bool>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub allowed_extensions: Option<Vec<String>>,
    pub header_timeout: Option<Duration>,
}

impl ConfigOverrides {
    pub fn apply(&self, args: &mut ServeArgs) {
        if let Some(host) = self.host.clone() {
            args.host = host;
        }
        if let Some(port) = self.port {
            args.port = port;
        }
        if let Some(root) = self.root.clone() {
            args.root = root;
        }
        if let Some(index) = self.index.clone() {
            args.index = index;
        }
        if let Some(https) = self.https {
            args.https = https;
        }
        if let Some(cert_dir) = self.cert_dir.clone() {
            args.cert_dir = cert_dir;
        }
        if let Some(hostnames) = self.hostnames.clone() {
            args.hostnames = hostnames;
        }
        if let Some(mkcert) = self.mkcert {
            args.no_mkcert = !mkcert;
        }
        if let Some(cert) = self.cert.clone() {
            args.cert = Some(cert);
        }
        if let Some(key) = self.key.clone() {
            args.key = Some(key);
        }
        if let Some(extensions) = self.allowed_extensions.clone() {
            args.allow_ext = extensions;
        }
        if let Some(timeout) = self.header_timeout {
            args.header_timeout = timeout;
        }
    }
}

pub async fn load_overrides(path: &Path) -> Result<ConfigOverrides> {
    let source = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_overrides(&source, path)
}

fn parse_overrides(source: &str, path: &Path) -> Result<ConfigOverrides> {
    let ext = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    let file: ConfigFile = if ext.eq_ignore_ascii_case("json") {
        serde_json::from_str(source)
            .with_context(|| format!("config {} is not valid JSON", path.display()))?
    } else {
        serde_yaml::from_str(source)
            .with_context(|| format!("config {} is not valid YAML", path.display()))?
    };
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    build_overrides(file, base)
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    host: Option<String>,
    port: Option<u16>,
    root: Option<PathBuf>,
    index: Option<String>,
    allowed_extensions: Option<Vec<String>>,
    header_timeout: Option<String>,
    tls: Option<TlsSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct TlsSection {
    enabled: Option<bool>,
    cert_dir: Option<PathBuf>,
    hostnames: Option<Vec<String>>,
    mkcert: Option<bool>,
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
}

/// Relative paths in a config file are relative to the file itself.
fn resolve(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() || base.as_os_str().is_empty() {
        path
    } else {
        base.join(path)
    }
}

fn build_overrides(file: ConfigFile, base: &Path) -> Result<ConfigOverrides> {
    let mut overrides = ConfigOverrides {
        host: file.host,
        port: file.port,
        root: file.root.map(|root| resolve(base, root)),
        index: file.index,
        allowed_extensions: file.allowed_extensions,
        ..ConfigOverrides::default()
    };

    if let Some(timeout) = file.header_timeout.as_deref() {
        overrides.header_timeout = Some(
            humantime::parse_duration(timeout)
                .with_context(|| format!("invalid header_timeout {timeout:?}"))?,
        );
    }

    if let Some(tls) = file.tls {
        match (tls.cert, tls.key) {
            (Some(cert), Some(key)) => {
                overrides.cert = Some(resolve(base, cert));
                overrides.key = Some(resolve(base, key));
            }
            (None, None) => {}
            _ => bail!("TLS configuration must provide both cert and key"),
        }
        // A tls section switches HTTPS on unless it says otherwise.
        overrides.https = Some(tls.enabled.unwrap_or(true));
        overrides.cert_dir = tls.cert_dir.map(|dir| resolve(base, dir));
        overrides.hostnames = tls.hostnames;
        overrides.mkcert = tls.mkcert;
    }

    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_yaml_with_tls_section() {
        let config = r#"
port: 8443
root: site
allowed_extensions: [html, js, glb, wasm]
header_timeout: 45s
tls:
  hostnames: [localhost, ar.local]
  mkcert: false
"#;
        let overrides = parse_overrides(config, Path::new("/srv/demo/lunette.yaml")).expect("parse");
        assert_eq!(overrides.port, Some(8443));
        assert_eq!(overrides.root, Some(PathBuf::from("/srv/demo/site")));
        assert_eq!(overrides.https, Some(true));
        assert_eq!(overrides.mkcert, Some(false));
        assert_eq!(overrides.header_timeout, Some(Duration::from_secs(45)));
        assert_eq!(
            overrides.hostnames,
            Some(vec!["localhost".to_string(), "ar.local".to_string()])
        );
    }

    #[test]
    fn parses_json_by_extension() {
        let config = r#"{ "host": "127.0.0.1", "index": "home.html" }"#;
        let overrides = parse_overrides(config, Path::new("lunette.json")).expect("parse");
        assert_eq!(overrides.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(overrides.index.as_deref(), Some("home.html"));
        assert_eq!(overrides.https, None);
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let config = "tls:\n  cert: dev.crt\n";
        let err = parse_overrides(config, Path::new("lunette.yaml")).unwrap_err();
        assert!(err.to_string().contains("both cert and key"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = parse_overrides("listen: 0.0.0.0:443\n", Path::new("lunette.yaml")).unwrap_err();
        assert!(err.to_string().contains("not valid YAML"));
    }

    #[test]
    fn overrides_replace_flags() {
        let mut args = ServeArgs {
            port: 9000,
            https: false,
            ..ServeArgs::default()
        };
        let overrides = ConfigOverrides {
            port: Some(8443),
            https: Some(true),
            mkcert: Some(false),
            header_timeout: Some(Duration::ZERO),
            ..ConfigOverrides::default()
        };
        overrides.apply(&mut args);

        assert_eq!(args.port, 8443);
        assert!(args.https);
        assert!(args.no_mkcert);
        assert_eq!(args.header_timeout, Duration::ZERO);
        assert_eq!(args.host, "0.0.0.0");
    }

    #[tokio::test]
    async fn loads_from_disk_relative_to_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("lunette.yaml");
        std::fs::write(&path, "tls:\n  cert: dev.crt\n  key: dev.key\n").expect("write");

        let overrides = load_overrides(&path).await.expect("load");
        assert_eq!(overrides.cert, Some(temp.path().join("dev.crt")));
        assert_eq!(overrides.key, Some(temp.path().join("dev.key")));
    }

    #[test]
    fn cert_dir_is_relative_to_config_file() {
        let config = "tls:\n  cert_dir: certs\n";
        let overrides = parse_overrides(config, Path::new("/srv/demo/lunette.yaml")).expect("parse");
        assert_eq!(overrides.cert_dir, Some(PathBuf::from("/srv/demo/certs")));

        let absolute = "tls:\n  cert_dir: /etc/lunette\n";
        let overrides = parse_overrides(absolute, Path::new("/srv/demo/lunette.yaml")).expect("parse");
        assert_eq!(overrides.cert_dir, Some(PathBuf::from("/etc/lunette")));
    }
}
