#![warn(clippy::all, rust_2018_idioms)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use awsconsole::app::aws_config::{
    get_config, is_multi_stage_role_assuming_profile, resolve_chain, watch_config, Config,
};
use awsconsole::app::settings::AppSettings;
use awsconsole::app::settings_store::{JsonFileSettingsStore, MemorySettingsStore, SettingsStore};
use awsconsole::ConsoleLauncher;

const DEFAULT_LOG_FILTER: &str = "awsconsole=info,aws_config=warn,aws_smithy_runtime=warn,hyper=warn";

#[derive(Debug, Parser)]
#[command(
    name = "awsconsole",
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_COMMIT"), ")"),
    about = "Open AWS consoles for the profiles in your AWS config"
)]
struct Cli {
    /// AWS config directory (defaults to the settings value, then ~/.aws)
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Settings file (defaults to the per-user settings.toml)
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Also log to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List profiles a console can be opened for
    Profiles {
        /// Show every profile with its classification
        #[arg(long)]
        all: bool,
    },
    /// Show the source-profile chain for a profile, root first
    Chain { profile: String },
    /// Print (or open) a signed console URL for a profile
    Launch {
        profile: String,
        /// Current MFA code, for chains with an mfa_serial
        #[arg(long, value_name = "CODE")]
        mfa: Option<String>,
        /// Open the URL in the default browser instead of printing it
        #[arg(long)]
        open: bool,
    },
    /// List accounts and roles available through an sso-session or SSO profile
    SsoRoles { name: String },
    /// Print the usable profiles every time the config file changes
    Watch,
}

fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "", "awsconsole").map(|dirs| dirs.data_dir().join("logs"))
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    // TOKIO_CONSOLE=1 RUSTFLAGS="--cfg tokio_unstable" cargo run
    let use_tokio_console = std::env::var("TOKIO_CONSOLE")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);
    if use_tokio_console {
        console_subscriber::init();
        eprintln!("tokio-console profiling enabled - connect with: tokio-console");
        return Ok(());
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("invalid log filter")?;

    let mut log_path = None;
    let file_layer = match log_dir() {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let path = dir.join("awsconsole.log");
            let file = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)) {
                    eprintln!("[SECURITY] Failed to set log file permissions: {}", e);
                }
            }

            log_path = Some(path);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    let stderr_layer = verbose.then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer);
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    // notify and reqwest log through the `log` crate.
    tracing_log::LogTracer::init().context("failed to initialize log-to-tracing bridge")?;

    if let Some(path) = log_path {
        info!("Logging initialized to: {}", path.display());
    }
    Ok(())
}

fn append_crash_log(location: &str, message: &str) -> std::io::Result<PathBuf> {
    use std::io::Write;

    let dir = log_dir().ok_or_else(|| std::io::Error::other("no data directory"))?;
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("crash.log");
    let mut file = std::fs::OpenOptions::new().append(true).create(true).open(&path)?;
    writeln!(
        file,
        "=== {} awsconsole {} panicked at {}: {}\n{}",
        chrono::Local::now().to_rfc3339(),
        awsconsole::GIT_COMMIT,
        location,
        message,
        std::backtrace::Backtrace::force_capture()
    )?;
    Ok(path)
}

/// Record panics in `crash.log` next to the regular log, then run the default hook.
fn install_crash_log() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let location = info
            .location()
            .map(ToString::to_string)
            .unwrap_or_else(|| "unknown location".to_string());

        tracing::error!("panic at {}: {}", location, message);
        match append_crash_log(&location, &message) {
            Ok(path) => eprintln!("Crash details written to {}", path.display()),
            Err(e) => eprintln!("Failed to write crash log: {}", e),
        }
        default_hook(info);
    }));
}

fn load_settings(path: Option<PathBuf>) -> anyhow::Result<AppSettings> {
    match path.or_else(AppSettings::default_path) {
        Some(path) => AppSettings::load_or_default(&path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => Ok(AppSettings::default()),
    }
}

fn settings_store() -> Arc<dyn SettingsStore> {
    match JsonFileSettingsStore::default_path() {
        Some(path) => Arc::new(JsonFileSettingsStore::new(path)),
        None => {
            warn!("No data directory available, SSO logins will not be cached");
            Arc::new(MemorySettingsStore::new())
        }
    }
}

fn print_profiles(config: &Config, all: bool) {
    if !all {
        for name in &config.usable_profiles {
            let kind = match config.profiles.get(name) {
                Some(profile) if profile.sso_session.is_some() => "sso",
                _ => "chain",
            };
            println!("{:<40} {}", name, kind);
        }
        return;
    }

    let mut profiles: Vec<_> = config.profiles.iter().collect();
    profiles.sort_by(|a, b| (a.1.order, a.0).cmp(&(b.1.order, b.0)));
    for (name, _) in profiles {
        let flags: Vec<&str> = [
            (&config.usable_profiles, "usable"),
            (&config.standard_profiles, "standard"),
            (&config.cachable_profiles, "mfa-cachable"),
        ]
        .into_iter()
        .filter(|(list, _)| list.contains(name))
        .map(|(_, flag)| flag)
        .collect();
        println!("{:<40} {}", name, flags.join(","));
    }
}

/// Cancel `request_id` on Ctrl-C so an SSO login in progress stops polling.
fn cancel_on_ctrl_c(launcher: Arc<ConsoleLauncher>, request_id: String) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling...");
            launcher.cancel(&request_id);
        }
    });
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = load_settings(cli.settings)?;
    let config_dir = cli
        .config_dir
        .or_else(|| settings.config_dir())
        .ok_or_else(|| anyhow!("cannot determine the AWS config directory, pass --config-dir"))?;

    if let Command::Watch = cli.command {
        let watcher = watch_config(config_dir.clone(), settings.watch_debounce(), |config| {
            println!("{}", config.usable_profiles.join(" "));
        })
        .with_context(|| format!("failed to watch {}", config_dir.display()))?;
        eprintln!("Watching {} (Ctrl-C to stop)", config_dir.display());
        tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
        watcher.stop().await;
        return Ok(());
    }

    let config = get_config(&config_dir)
        .await
        .with_context(|| format!("failed to load AWS config from {}", config_dir.display()))?;

    match cli.command {
        Command::Profiles { all } => print_profiles(&config, all),
        Command::Chain { profile } => {
            config.profile(&profile)?;
            let chain = resolve_chain(&config.profiles, &profile)?;
            println!("{}", chain.join(" -> "));
            if is_multi_stage_role_assuming_profile(&config.profiles, &profile) {
                println!("(multi-stage role assumption)");
            }
        }
        Command::Launch { profile, mfa, open } => {
            let launcher = Arc::new(ConsoleLauncher::from_settings(&settings, settings_store()));
            let request_id = uuid::Uuid::new_v4().to_string();
            cancel_on_ctrl_c(Arc::clone(&launcher), request_id.clone());

            let url = match launcher
                .console_url(&config, &profile, mfa.as_deref(), &request_id)
                .await
            {
                Err(e) if e.is_cancelled() => return Ok(()),
                result => result.with_context(|| format!("failed to launch console for {}", profile))?,
            };

            if open {
                open::that(&url).context("failed to open browser")?;
                info!("Opened console for {}", profile);
            } else {
                println!("{}", url);
            }
        }
        Command::SsoRoles { name } => {
            let launcher = Arc::new(ConsoleLauncher::from_settings(&settings, settings_store()));
            let request_id = uuid::Uuid::new_v4().to_string();
            cancel_on_ctrl_c(Arc::clone(&launcher), request_id.clone());

            let roles = match launcher.list_sso_roles(&config, &name, &request_id).await {
                Err(e) if e.is_cancelled() => return Ok(()),
                result => result.with_context(|| format!("failed to list roles for {}", name))?,
            };
            for role in roles {
                println!("{}\t{}\t{}", role.account_id, role.account_name, role.role_name);
            }
        }
        Command::Watch => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_crash_log();

    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    info!("awsconsole {} starting", awsconsole::GIT_COMMIT);

    run(cli).await
}
