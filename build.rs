// build.rs

use clap::{Arg, ArgAction, ArgGroup, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Phase names; kept in step with `phases::PHASES`
const PHASES: &[&str] = &[
    "init",
    "pkgset",
    "buildinstall",
    "gather",
    "extrafiles",
    "createrepo",
    "ostree",
    "ostree_installer",
    "productimg",
    "createiso",
    "extra_isos",
    "liveimages",
    "image_build",
    "livemedia",
    "osbs",
    "image_checksum",
    "test",
];

fn flag(name: &'static str, long: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(long)
        .action(ArgAction::SetTrue)
        .help(help)
}

fn path_arg(name: &'static str, long: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(long)
        .value_name("PATH")
        .help(help)
}

fn phase_arg(name: &'static str, long: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(long)
        .value_name("NAME")
        .action(ArgAction::Append)
        .value_parser(PHASES.to_vec())
        .help(help)
}

fn build_cli() -> Command {
    Command::new("distro-compose")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Distro Compose Contributors")
        .about("Build a distribution compose from a package pool")
        .arg(path_arg("target_dir", "target-dir", "Create a new compose directory inside this directory"))
        .arg(path_arg("compose_dir", "compose-dir", "Reuse an existing compose directory"))
        .group(ArgGroup::new("location").required(true).args(["target_dir", "compose_dir"]))
        .arg(Arg::new("label").long("label").help("Compose label, e.g. Beta-1.0 or RC-1.2"))
        .arg(flag("no_label", "no-label", "Run a production compose without a label"))
        .arg(flag("supported", "supported", "Mark the compose as supported"))
        .arg(path_arg("old_composes", "old-composes", "Directory with composes to reuse results from (repeatable)").action(ArgAction::Append))
        .arg(path_arg("config", "config", "Compose configuration file").required(true))
        .arg(phase_arg("skip_phase", "skip-phase", "Skip a phase (repeatable)"))
        .arg(phase_arg("just_phase", "just-phase", "Run only this phase (repeatable)"))
        .arg(flag("nightly", "nightly", "Nightly compose"))
        .arg(flag("test", "test", "Test compose"))
        .arg(flag("ci", "ci", "CI compose"))
        .arg(flag("production", "production", "Production compose (the default)"))
        .group(ArgGroup::new("compose_type").args(["nightly", "test", "ci", "production"]))
        .arg(Arg::new("koji_event").long("koji-event").value_name("ID").help("Query koji at this event"))
        .arg(
            Arg::new("notification_script")
                .long("notification-script")
                .value_name("CMD")
                .action(ArgAction::Append)
                .help("Script notified about compose progress (repeatable)"),
        )
        .arg(flag("no_latest_link", "no-latest-link", "Do not update the latest-* symlink"))
        .arg(
            Arg::new("latest_link_status")
                .long("latest-link-status")
                .value_name("STATUS")
                .action(ArgAction::Append)
                .help("Update the latest-* symlink only for these statuses (repeatable)"),
        )
        .arg(flag("print_output_dir", "print-output-dir", "Print the compose directory on completion"))
        .arg(flag("quiet", "quiet", "Only print warnings and errors on the console").short('q'))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("distro-compose.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
