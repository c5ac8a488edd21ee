use bpb_wizard::auth::server::{CallbackServer, SHUTDOWN_GRACE};
use bpb_wizard::auth::{AuthBroker, BrowserLogin, HttpTokenExchanger};
use bpb_wizard::bundle::BundleCache;
use bpb_wizard::cloudflare::CloudflareConnector;
use bpb_wizard::config::{self, WizardConfig};
use bpb_wizard::deploy::{Services, Wizard, WizardOptions};
use bpb_wizard::error::WizardError;
use bpb_wizard::operator::{self, SystemOpener, TerminalOperator};
use bpb_wizard::poller::{HttpProbe, ReadinessPoller};
use bpb_wizard::retry::RetryPolicy;
use clap::{Parser, Subcommand};
use cliclack::{intro, outro, outro_cancel};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "bpb-wizard",
    version,
    about = "BPB Wizard - deploy and manage BPB panels on Cloudflare Workers or Pages"
)]
struct Cli {
    /// Prebuilt worker.js to deploy (overrides config file)
    #[arg(long, env = "BPB_BUNDLE_URL")]
    bundle_url: Option<String>,

    /// Local port for the OAuth callback (overrides config file)
    #[arg(long)]
    port: Option<u16>,

    /// Diagnostic logging to stderr (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config file (~/.config/bpb-wizard/config.toml)
    Init {
        /// Overwrite existing config
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "bpb_wizard=debug,warn",
        _ => "bpb_wizard=trace,debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose > 1)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Environment tweaks must land before the runtime spawns worker threads.
    operator::prepare_environment();

    // Install rustls crypto provider BEFORE tokio runtime starts
    // (required for rustls 0.23+ - must happen before any TLS operations)
    #[cfg(feature = "rustls")]
    {
        rustls_crate::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = WizardConfig::load();

    if let Some(Commands::Init { force }) = cli.command {
        return run_init(force);
    }

    let port = cli.port.unwrap_or_else(|| cfg.callback_port());
    let oauth = cfg.oauth_settings(port);
    let exchanger = Arc::new(HttpTokenExchanger::new(oauth.clone()));
    let broker = Arc::new(AuthBroker::new(oauth, exchanger));

    let server = CallbackServer::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)), broker.clone())
        .await
        .map_err(|e| WizardError::Setup(format!("Error serving localhost:{}: {}", port, e)))?;

    let bundle = BundleCache::create(cfg.bundle_url(cli.bundle_url.as_deref()))
        .map_err(|e| WizardError::Setup(format!("Failed to create temp directory: {}", e)))?;
    let probe = HttpProbe::new(cfg.resolver()?)?;
    let opener = Arc::new(SystemOpener::detect());

    let services = Services {
        authenticator: Arc::new(BrowserLogin::new(
            broker,
            opener.clone(),
            cfg.login_timeout(),
        )),
        connector: Arc::new(CloudflareConnector::new(cfg.api_base_url())),
        bundle: Arc::new(bundle),
        probe: Arc::new(probe),
        opener,
    };
    let options = WizardOptions {
        retry: RetryPolicy::Confirm,
        poller: ReadinessPoller::new(cfg.poll_interval(), cfg.poll_max_attempts()),
        defaults: cfg.panel_defaults(),
    };

    intro(format!("Welcome to BPB Wizard {}", env!("CARGO_PKG_VERSION")))?;
    let mut wizard = Wizard::new(TerminalOperator, services, options);
    let result = wizard.run().await;

    server.shutdown(SHUTDOWN_GRACE).await;

    match result {
        Ok(()) => {
            outro("Done!")?;
            Ok(())
        }
        Err(WizardError::Aborted) => {
            let _ = outro_cancel("Exiting...");
            Ok(())
        }
        Err(e) => {
            let _ = outro_cancel(e.to_string());
            Err(e.into())
        }
    }
}

fn run_init(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let Some(path) = WizardConfig::config_path() else {
        return Err("Could not determine config directory".into());
    };

    if path.exists() && !force {
        println!("Config file already exists at: {}", path.display());
        println!("\nUse --force to overwrite, or edit directly:");
        println!("  $EDITOR {}", path.display());
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(&path, config::sample_config())?;

    println!("Created config file: {}", path.display());
    println!("\nEdit it to change the OAuth port, bundle URL or prompt defaults:");
    println!("  $EDITOR {}", path.display());

    Ok(())
}
