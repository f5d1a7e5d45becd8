// src/tools/runroot.rs

//! Remote execution of tool commands through `koji runroot`
//!
//! With `runroot` enabled, heavy tools (lorax, ISO tooling, ostree) run in
//! a builder chroot instead of on the compose host. The wrapped command is
//! rendered as a shell string because runroot executes it through a shell.

use super::ToolCommand;
use crate::config::Config;

/// Where and how a command runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runroot {
    pub enabled: bool,
    pub profile: Option<String>,
    pub tag: Option<String>,
    pub channel: Option<String>,
    /// `koji` (default) or `local`
    pub method: String,
}

impl Runroot {
    pub fn from_config(conf: &Config) -> Self {
        Self {
            enabled: conf.runroot,
            profile: conf.koji_profile.clone(),
            tag: conf.runroot_tag.clone(),
            channel: conf.runroot_channel.clone(),
            method: conf.runroot_method.clone().unwrap_or_else(|| "koji".to_string()),
        }
    }

    pub fn local() -> Self {
        Self {
            enabled: false,
            profile: None,
            tag: None,
            channel: None,
            method: "local".to_string(),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.enabled && self.method != "local"
    }

    /// Wrap `cmd` for execution on `arch`
    ///
    /// `packages` are installed into the chroot, `mounts` are made
    /// available read-write. Local execution returns the command unchanged.
    pub fn wrap(&self, cmd: ToolCommand, arch: &str, packages: &[&str], mounts: &[&str]) -> ToolCommand {
        if !self.is_remote() {
            return cmd;
        }
        let mut wrapped = ToolCommand::new("koji");
        if let Some(profile) = &self.profile {
            wrapped = wrapped.opt("--profile", profile);
        }
        wrapped = wrapped.args(["runroot", "--new-chroot", "--task-id", "--use-shell"]);
        if let Some(channel) = &self.channel {
            wrapped = wrapped.opt("--channel-override", channel);
        }
        for mount in mounts {
            wrapped = wrapped.opt("--mount", mount);
        }
        for package in packages {
            wrapped = wrapped.opt("--package", package);
        }
        let mut env_prefix = String::new();
        for (key, value) in &cmd.env {
            env_prefix.push_str(&format!("{key}={} ", super::shell_quote(value)));
        }
        let shell = format!("{env_prefix}{}", ToolCommand { env: Vec::new(), ..cmd }.to_shell());
        wrapped
            .arg(self.tag.clone().unwrap_or_default())
            .arg(arch)
            .arg(shell)
    }
}
