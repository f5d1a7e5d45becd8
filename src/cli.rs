// src/cli.rs
//! Command-line interface of the compose tool

use clap::{ArgGroup, Parser};
use distro_compose::compose::naming;
use distro_compose::{ComposeStatus, ComposeType, PHASES};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "distro-compose")]
#[command(author = "Distro Compose Contributors")]
#[command(version)]
#[command(about = "Build a distribution compose from a package pool", long_about = None)]
#[command(group(ArgGroup::new("location").required(true).args(["target_dir", "compose_dir"])))]
#[command(group(ArgGroup::new("compose_type").args(["nightly", "test", "ci", "production"])))]
pub struct Cli {
    /// Create a new compose directory inside this directory
    #[arg(long, value_name = "PATH")]
    pub target_dir: Option<PathBuf>,

    /// Reuse an existing compose directory
    #[arg(long, value_name = "PATH")]
    pub compose_dir: Option<PathBuf>,

    /// Compose label, e.g. Beta-1.0 or RC-1.2
    #[arg(long, conflicts_with = "no_label", value_parser = parse_label)]
    pub label: Option<String>,

    /// Run a production compose without a label
    #[arg(long)]
    pub no_label: bool,

    /// Mark the compose as supported
    #[arg(long)]
    pub supported: bool,

    /// Directory with composes to reuse results from (repeatable)
    #[arg(long, value_name = "PATH")]
    pub old_composes: Vec<PathBuf>,

    /// Compose configuration file
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,

    /// Skip a phase (repeatable)
    #[arg(long, value_name = "NAME", value_parser = clap::builder::PossibleValuesParser::new(PHASES.iter().copied()))]
    pub skip_phase: Vec<String>,

    /// Run only this phase (repeatable)
    #[arg(long, value_name = "NAME", value_parser = clap::builder::PossibleValuesParser::new(PHASES.iter().copied()))]
    pub just_phase: Vec<String>,

    /// Nightly compose
    #[arg(long)]
    pub nightly: bool,

    /// Test compose
    #[arg(long)]
    pub test: bool,

    /// CI compose
    #[arg(long)]
    pub ci: bool,

    /// Production compose (the default)
    #[arg(long)]
    pub production: bool,

    /// Query koji at this event
    #[arg(long, value_name = "ID")]
    pub koji_event: Option<u64>,

    /// Script notified about compose progress (repeatable)
    #[arg(long, value_name = "CMD")]
    pub notification_script: Vec<String>,

    /// Do not update the latest-* symlink
    #[arg(long)]
    pub no_latest_link: bool,

    /// Update the latest-* symlink only for these statuses (repeatable)
    #[arg(long, value_name = "STATUS", value_parser = parse_status)]
    pub latest_link_status: Vec<ComposeStatus>,

    /// Print the compose directory on completion
    #[arg(long)]
    pub print_output_dir: bool,

    /// Only print warnings and errors on the console
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    pub fn compose_type(&self) -> ComposeType {
        if self.nightly {
            ComposeType::Nightly
        } else if self.test {
            ComposeType::Test
        } else if self.ci {
            ComposeType::Ci
        } else {
            ComposeType::Production
        }
    }

    /// Statuses that update the latest-* symlink
    pub fn latest_link_statuses(&self) -> Vec<ComposeStatus> {
        if self.latest_link_status.is_empty() {
            vec![ComposeStatus::Finished, ComposeStatus::FinishedIncomplete]
        } else {
            self.latest_link_status.clone()
        }
    }

    /// A production compose needs a label unless `--no-label` is given
    pub fn check_label(&self) -> Result<(), String> {
        if self.compose_type() == ComposeType::Production && self.label.is_none() && !self.no_label {
            return Err("a production compose needs --label or --no-label".to_string());
        }
        Ok(())
    }
}

fn parse_label(value: &str) -> Result<String, String> {
    naming::validate_label(value).map_err(|e| e.to_string())?;
    Ok(value.to_string())
}

fn parse_status(value: &str) -> Result<ComposeStatus, String> {
    value
        .to_uppercase()
        .replace('-', "_")
        .parse()
        .map_err(|_| format!("unknown compose status '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_options() {
        let cli = Cli::try_parse_from([
            "distro-compose",
            "--target-dir",
            "/mnt/composes",
            "--config",
            "fedora.toml",
            "--nightly",
            "--skip-phase",
            "createiso",
            "--latest-link-status",
            "finished",
        ])
        .unwrap();
        assert_eq!(cli.compose_type(), ComposeType::Nightly);
        assert_eq!(cli.skip_phase, vec!["createiso"]);
        assert_eq!(cli.latest_link_statuses(), vec![ComposeStatus::Finished]);
        assert!(cli.check_label().is_ok());
    }

    #[test]
    fn test_invalid_combinations() {
        let both = Cli::try_parse_from([
            "distro-compose",
            "--target-dir",
            "/a",
            "--compose-dir",
            "/b",
            "--config",
            "c.toml",
        ]);
        assert!(both.is_err());

        let unknown_phase = Cli::try_parse_from([
            "distro-compose",
            "--target-dir",
            "/a",
            "--config",
            "c.toml",
            "--just-phase",
            "nosuch",
        ]);
        assert!(unknown_phase.is_err());

        let unlabelled =
            Cli::try_parse_from(["distro-compose", "--target-dir", "/a", "--config", "c.toml"]).unwrap();
        assert!(unlabelled.check_label().is_err());
    }
}
