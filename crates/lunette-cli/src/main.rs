mod config_file;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use lunette_core::config::{DEFAULT_CERT_DIR, DEFAULT_HOST, DEFAULT_PORT};
use lunette_core::{AuthorityKind, DevServer, ExplicitPair, ServerConfig, ServerError, TlsSettings};
use lunette_edge::DEFAULT_INDEX;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "lunette",
    author,
    version,
    about = "Lunette: serve a directory for previewing the AR glasses try-on demo",
    propagate_version = true,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Increase output verbosity (-v, -vv).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Output log format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    // `lunette --https` behaves like `lunette serve --https`.
    #[command(flatten)]
    serve: ServeArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve a directory over HTTP or HTTPS (the default command).
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
struct ServeArgs {
    /// Interface to listen on.
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// TCP port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory to serve.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Document served for `/` and for directories.
    #[arg(long, default_value = DEFAULT_INDEX)]
    index: String,

    /// Serve over HTTPS, provisioning a certificate when none exists.
    #[arg(long)]
    https: bool,

    /// Certificate directory, relative to the root unless absolute.
    #[arg(long, default_value = DEFAULT_CERT_DIR)]
    cert_dir: PathBuf,

    /// Hostname the certificate must cover (repeatable).
    #[arg(long = "hostname", default_values_t = vec!["localhost".to_string()])]
    hostnames: Vec<String>,

    /// Skip mkcert and go straight to a self-signed certificate.
    #[arg(long)]
    no_mkcert: bool,

    /// PEM certificate chain to use instead of provisioning one. Implies --https.
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key matching --cert.
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Only serve files with these extensions (comma separated, e.g. html,js,glb).
    #[arg(long = "allow-ext", value_delimiter = ',')]
    allow_ext: Vec<String>,

    /// Time allowed for a client to send request headers; 0s disables it.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    header_timeout: Duration,

    /// YAML or JSON file whose values override the flags above.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            root: PathBuf::from("."),
            index: DEFAULT_INDEX.to_string(),
            https: false,
            cert_dir: PathBuf::from(DEFAULT_CERT_DIR),
            hostnames: vec!["localhost".to_string()],
            no_mkcert: false,
            cert: None,
            key: None,
            allow_ext: Vec::new(),
            header_timeout: Duration::from_secs(30),
            config: None,
        }
    }
}

impl ServeArgs {
    fn to_server_config(&self) -> Result<ServerConfig> {
        let explicit_pair = match (&self.cert, &self.key) {
            (Some(certificate), Some(private_key)) => Some(ExplicitPair {
                certificate: certificate.clone(),
                private_key: private_key.clone(),
            }),
            (None, None) => None,
            _ => bail!("--cert and --key must be given together"),
        };

        let mut config = ServerConfig::new(&self.root)
            .with_host(&self.host)
            .with_port(self.port)
            .with_index(&self.index)
            .with_header_read_timeout(self.header_timeout);

        let allowed: Vec<&str> = self
            .allow_ext
            .iter()
            .map(|ext| ext.trim())
            .filter(|ext| !ext.is_empty())
            .collect();
        if !allowed.is_empty() {
            config = config.with_allowed_extensions(allowed);
        }

        if self.https || explicit_pair.is_some() {
            config = config.with_tls(TlsSettings {
                certificate_dir: self.cert_dir.clone(),
                hostnames: self.hostnames.clone(),
                authority: if self.no_mkcert {
                    AuthorityKind::None
                } else {
                    AuthorityKind::Mkcert
                },
                explicit_pair,
                ..TlsSettings::default()
            });
        }
        Ok(config)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let command = cli.command.unwrap_or(Command::Serve(cli.serve));

    let result = match command {
        Command::Serve(args) => run_serve(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(ServerError::AddressInUse { addr }) = err.downcast_ref::<ServerError>() {
                error!("{addr} is already in use; stop the other server or pick another port with --port");
            } else {
                error!("{err:#}");
            }
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ServerError>() {
        Some(ServerError::AddressInUse { .. }) => 2,
        _ => 1,
    }
}

fn init_tracing(verbosity: u8, format: LogFormat) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(
            filter
                .parse()
                .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    let _ = match format {
        LogFormat::Text => subscriber.try_init(),
        LogFormat::Json => subscriber.json().try_init(),
    };
}

async fn run_serve(mut args: ServeArgs) -> Result<()> {
    if let Some(path) = args.config.clone() {
        let overrides = config_file::load_overrides(&path).await?;
        overrides.apply(&mut args);
    }

    let config = args.to_server_config()?;
    let server = DevServer::bind(&config)
        .await
        .with_context(|| format!("failed to start server on {}", config.bind_target()))?;
    info!(
        "press Ctrl-C to stop; open {}://localhost:{}/ on this machine",
        server.scheme(),
        server.local_addr().port()
    );

    server
        .serve_until(async {
            match signal::ctrl_c().await {
                Ok(()) => info!("shutdown signal received; terminating server"),
                Err(err) => {
                    warn!(error = %err, "cannot listen for Ctrl-C; serving until killed");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
        .context("server stopped with an error")?;
    info!("server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> ServeArgs {
        let cli = Cli::try_parse_from(args).expect("parse");
        match cli.command {
            Some(Command::Serve(args)) => args,
            None => cli.serve,
        }
    }

    #[test]
    fn serve_flags_work_without_subcommand() {
        let args = parse(&["lunette", "--https", "--port", "8443", "--hostname", "ar.local"]);
        assert!(args.https);
        assert_eq!(args.port, 8443);
        assert_eq!(args.hostnames, vec!["ar.local".to_string()]);
        assert_eq!(
            parse(&["lunette", "--https"]),
            parse(&["lunette", "serve", "--https"])
        );
    }

    #[test]
    fn top_level_flags_conflict_with_subcommand() {
        assert!(Cli::try_parse_from(["lunette", "--https", "serve"]).is_err());
    }

    #[test]
    fn bare_invocation_serves_working_directory() {
        let args = parse(&["lunette"]);
        let config = args.to_server_config().expect("config");
        assert_eq!(config, ServerConfig::new("."));
    }

    #[test]
    fn default_args_match_clap_defaults() {
        assert_eq!(parse(&["lunette", "serve"]), ServeArgs::default());
    }

    #[test]
    fn https_flags_build_tls_settings() {
        let args = parse(&[
            "lunette",
            "serve",
            "--https",
            "--no-mkcert",
            "--hostname",
            "localhost",
            "--hostname",
            "ar.local",
            "--port",
            "8443",
        ]);
        let config = args.to_server_config().expect("config");
        let tls = config.tls.expect("tls enabled");
        assert_eq!(tls.authority, AuthorityKind::None);
        assert_eq!(tls.hostnames, vec!["localhost".to_string(), "ar.local".to_string()]);
        assert_eq!(config.port, 8443);
    }

    #[test]
    fn explicit_pair_implies_https() {
        let args = parse(&["lunette", "serve", "--cert", "dev.crt", "--key", "dev.key"]);
        let tls = args.to_server_config().expect("config").tls.expect("tls");
        assert_eq!(
            tls.explicit_pair,
            Some(ExplicitPair {
                certificate: PathBuf::from("dev.crt"),
                private_key: PathBuf::from("dev.key"),
            })
        );
    }

    #[test]
    fn cert_without_key_is_rejected_by_parser() {
        assert!(Cli::try_parse_from(["lunette", "serve", "--cert", "dev.crt"]).is_err());
    }

    #[test]
    fn allow_list_and_timeout_are_parsed() {
        let args = parse(&[
            "lunette",
            "serve",
            "--allow-ext",
            "html,JS,.glb",
            "--header-timeout",
            "0s",
        ]);
        let config = args.to_server_config().expect("config");
        let allowed: Vec<String> = config
            .allowed_extensions
            .expect("allow-list")
            .into_iter()
            .collect();
        assert_eq!(allowed, vec![".glb", ".html", ".js"]);
        assert_eq!(config.header_read_timeout, None);
    }

    #[test]
    fn address_in_use_exits_with_two() {
        let err = anyhow::Error::new(ServerError::AddressInUse {
            addr: "0.0.0.0:8000".into(),
        })
        .context("failed to start server on 0.0.0.0:8000");
        assert_eq!(exit_code_for(&err), 2);
        assert_eq!(exit_code_for(&anyhow::anyhow!("bad config")), 1);
    }
}
