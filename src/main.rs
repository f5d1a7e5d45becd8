// src/main.rs

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use distro_compose::compose::Compose;
use distro_compose::phases::{driver, PhaseContext};
use distro_compose::{signals, ComposeOptions, ComposeStatus, Config};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Console output plus the compose's global log file
fn init_logging(log_file: &Path, quiet: bool) -> Result<()> {
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open {}", log_file.display()))?;

    let console_filter = if quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_filter(console_filter))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(EnvFilter::new("distro_compose=debug,info")),
        )
        .init();
    Ok(())
}

/// `latest-<short>-<major>[-<base short>-<base version>]`
fn latest_link_name(conf: &Config) -> String {
    let mut name = format!("latest-{}-{}", conf.release_short, conf.release_major_version());
    if conf.release_is_layered
        && let (Some(short), Some(version)) = (&conf.base_product_short, &conf.base_product_version)
    {
        name.push_str(&format!("-{short}-{version}"));
    }
    name
}

/// Point the latest-* symlink next to the compose at it
fn update_latest_link(compose: &Compose) -> Result<()> {
    let topdir = compose.topdir();
    let (Some(parent), Some(target)) = (topdir.parent(), topdir.file_name()) else {
        return Ok(());
    };
    let link = parent.join(latest_link_name(&compose.conf));
    let staging = parent.join(format!(".{}.tmp", compose.compose_id()));
    let _ = std::fs::remove_file(&staging);
    std::os::unix::fs::symlink(target, &staging)
        .with_context(|| format!("Failed to create {}", staging.display()))?;
    std::fs::rename(&staging, &link).with_context(|| format!("Failed to update {}", link.display()))?;
    info!("Updated {} -> {}", link.display(), target.to_string_lossy());
    Ok(())
}

fn open_compose(cli: &Cli, conf: Config) -> Result<Compose> {
    let options = ComposeOptions {
        compose_type: cli.compose_type(),
        label: cli.label.clone(),
        supported: cli.supported,
        old_composes: cli.old_composes.clone(),
        koji_event: cli.koji_event,
        notification_scripts: cli.notification_script.clone(),
        ..ComposeOptions::default()
    };
    let compose = match (&cli.compose_dir, &cli.target_dir) {
        (Some(dir), _) => Compose::open(conf, dir, options)
            .with_context(|| format!("Failed to open compose in {}", dir.display()))?,
        (None, Some(target)) => {
            std::fs::create_dir_all(target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
            Compose::create(conf, target, options)
                .with_context(|| format!("Failed to create compose in {}", target.display()))?
        }
        (None, None) => anyhow::bail!("one of --target-dir or --compose-dir is required"),
    };
    Ok(compose)
}

fn main() -> Result<ExitCode> {
    // Before any thread exists so every thread inherits the mask
    let signal_set = signals::block().context("Failed to block termination signals")?;
    let cli = Cli::parse();
    cli.check_label().map_err(anyhow::Error::msg)?;

    let config_path: PathBuf = cli.config.clone();
    let loaded =
        Config::load(&config_path).with_context(|| format!("Failed to load {}", config_path.display()))?;

    let compose = Arc::new(open_compose(&cli, loaded.config)?);
    init_logging(&compose.paths.global_log(), cli.quiet)?;
    for warning in &loaded.warnings {
        warn!("{}", warning);
    }
    info!("Compose {} in {}", compose.compose_id(), compose.topdir().display());

    compose.lock().context("Compose directory is in use")?;
    let _waiter = signals::spawn_waiter(signal_set, &compose);

    let ctx = Arc::new(PhaseContext::new(
        Arc::clone(&compose),
        cli.skip_phase.iter().cloned().collect::<BTreeSet<_>>(),
        cli.just_phase.iter().cloned().collect::<BTreeSet<_>>(),
    ));
    let status = match driver::run(ctx) {
        Ok(status) => status,
        Err(e) => {
            error!("{}", e);
            compose.get_status().unwrap_or(ComposeStatus::Doomed)
        }
    };

    if !cli.no_latest_link && cli.latest_link_statuses().contains(&status) {
        if let Err(e) = update_latest_link(&compose) {
            warn!("Cannot update latest link: {:#}", e);
        }
    }
    if cli.print_output_dir {
        println!("Compose dir: {}", compose.topdir().display());
    }
    Ok(ExitCode::from(status.exit_code() as u8))
}
