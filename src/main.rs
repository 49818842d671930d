use anyhow::Context;
use dotenvy::dotenv;
use kdolist_shell::bootstrap::Pacing;
use kdolist_shell::config::ShellConfig;
use kdolist_shell::core::shared::state::AppContext;
use kdolist_shell::network::{ConnectivityFlag, ReachabilityProbe, RouteConnectivity};
use kdolist_shell::ui::AppShell;
use kdolist_shell::update::{HttpUpdateFacility, ReloadHook};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

struct CliArgs {
    config_path: Option<PathBuf>,
    offline: bool,
}

fn parse_cli_args(args: &[String]) -> CliArgs {
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|idx| args.get(idx + 1))
        .map(PathBuf::from);
    CliArgs {
        config_path,
        offline: args.contains(&"--offline".to_string()),
    }
}

fn print_help() {
    println!("Usage: kdolist-shell [--config <path>] [--offline]");
    println!();
    println!("Commands while running:");
    println!("  update   install the pending update now");
    println!("  later    dismiss the update dialog");
    println!("  status   show the current update state");
}

async fn build_connectivity(config: &ShellConfig) -> anyhow::Result<Arc<dyn ConnectivityFlag>> {
    if config.force_offline {
        return Ok(Arc::new(|| false));
    }
    let origin = config.origin_url()?;
    Ok(Arc::new(RouteConnectivity::for_url(&origin).await))
}

fn handle_command(shell: &mut AppShell, command: &str) {
    let Some(header) = shell.header_mut() else {
        warn!("Application is still loading");
        return;
    };
    match command {
        "update" => {
            if header.click() {
                let _ = header.dialog().install_now();
            } else {
                println!("No update available");
            }
        }
        "later" => {
            header.dialog_mut().defer();
            println!("Update postponed");
        }
        "status" => {
            println!(
                "update available: {}, dialog open: {}",
                header.is_visible(),
                header.dialog().is_open()
            );
        }
        "" => {}
        other => println!("Unknown command: {}", other),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }
    let cli = parse_cli_args(&args);

    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Always)
        .init();

    let mut config =
        ShellConfig::load(cli.config_path.as_deref()).context("Failed to load configuration")?;
    if cli.offline {
        config.force_offline = true;
    }
    info!(
        "Starting KDoList shell {} (bundle {}) against {}",
        env!("CARGO_PKG_VERSION"),
        config.bundle_version,
        config.origin
    );

    let (reload_tx, mut reload_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let reload: ReloadHook = Arc::new(move |version: &str| {
        reload_tx.send(version.to_string()).ok();
    });
    let facility = Arc::new(HttpUpdateFacility::new(
        config.manifest_url()?,
        config.bundle_version.clone(),
        config.check_timeout(),
        reload,
    )?);
    let connectivity = build_connectivity(&config).await?;
    let probe = Arc::new(ReachabilityProbe::new(
        config.probe_url()?,
        config.probe_timeout(),
        connectivity,
    )?);
    info!("Reachability probe target {}", probe.url());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    'session: loop {
        let context = Arc::new(AppContext::new());
        let mut shell = AppShell::new(Arc::clone(&context), probe.clone(), facility.clone())
            .with_pacing(Pacing::from(&config.pacing))
            .with_poll_interval(config.poll_interval())
            .with_check_timeout(config.check_timeout());

        shell.launch(|status| println!("{}", status)).await;
        let mut availability = context.subscribe();
        let mut watching = true;
        if context.update_available() {
            println!("A new version is available. Type 'update' to install it or 'later' to keep working.");
        }

        loop {
            tokio::select! {
                Some(version) = reload_rx.recv() => {
                    info!("Reloading into bundle {}", version);
                    shell.shutdown();
                    continue 'session;
                }
                changed = availability.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    if *availability.borrow_and_update() {
                        println!("A new version is available. Type 'update' to install it or 'later' to keep working.");
                    }
                }
                line = stdin.next_line(), if stdin_open => match line {
                    Ok(Some(command)) => handle_command(&mut shell, command.trim()),
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        error!("Failed to read command: {}", e);
                        stdin_open = false;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                    shell.shutdown();
                    break 'session;
                }
            }
        }
    }
    Ok(())
}
