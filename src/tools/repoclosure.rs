// src/tools/repoclosure.rs

//! `dnf repoclosure` over a variant's repositories

use super::{Requirement, ToolCommand};

pub const DNF: Requirement = Requirement::new("dnf", "dnf-plugins-core");

/// Closure check of `check` repos, resolving against `check` plus `lookaside`
///
/// Repos are (id, path-or-url) pairs.
pub fn command(arches: &[&str], check: &[(String, String)], lookaside: &[(String, String)]) -> ToolCommand {
    let mut cmd = ToolCommand::new(DNF.tool)
        .arg("repoclosure")
        .arg("--newest");
    for arch in arches {
        cmd = cmd.opt("--arch", arch);
    }
    for (id, path) in check.iter().chain(lookaside) {
        let url = if path.contains("://") {
            path.clone()
        } else {
            format!("file://{path}")
        };
        cmd = cmd.opt("--repofrompath", format!("{id},{url}"));
    }
    for (id, _) in check {
        cmd = cmd.opt("--check", id);
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command() {
        let check = vec![("Server-x86_64".to_string(), "/c/Server/x86_64/os".to_string())];
        let lookaside = vec![("base".to_string(), "http://mirror/base".to_string())];
        assert_eq!(
            command(&["x86_64", "noarch"], &check, &lookaside).argv(),
            vec![
                "dnf",
                "repoclosure",
                "--newest",
                "--arch=x86_64",
                "--arch=noarch",
                "--repofrompath=Server-x86_64,file:///c/Server/x86_64/os",
                "--repofrompath=base,http://mirror/base",
                "--check=Server-x86_64"
            ]
        );
    }
}
