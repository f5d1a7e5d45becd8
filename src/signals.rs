// src/signals.rs

//! Termination handling
//!
//! SIGTERM and SIGINT are blocked before any worker thread exists, so every
//! thread inherits the mask and only the waiter thread ever receives them.
//! The waiter marks the compose TERMINATED and exits.

use crate::compose::{Compose, ComposeStatus};
use crate::error::Result;
use nix::sys::signal::{SigSet, Signal};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use tracing::{error, warn};

const TERMINATING: [Signal; 2] = [Signal::SIGTERM, Signal::SIGINT];

/// Block the termination signals in the calling thread
pub fn block() -> Result<SigSet> {
    let mut set = SigSet::empty();
    for signal in TERMINATING {
        set.add(signal);
    }
    set.thread_block().map_err(std::io::Error::from)?;
    Ok(set)
}

/// Status to write when a signal arrives, if a compose is still alive
pub fn on_signal(compose: &Weak<Compose>, signal: Signal) -> Option<ComposeStatus> {
    let compose = compose.upgrade()?;
    error!("Compose run terminated by {}", signal);
    if let Err(e) = compose.write_status(ComposeStatus::Terminated) {
        warn!("Cannot record termination: {}", e);
    }
    compose.notifier.wait();
    compose.get_status()
}

/// Start the thread that waits for a termination signal
pub fn spawn_waiter(set: SigSet, compose: &Arc<Compose>) -> JoinHandle<()> {
    let weak = Arc::downgrade(compose);
    std::thread::spawn(move || {
        if let Ok(signal) = set.wait() {
            on_signal(&weak, signal);
            std::process::exit(1);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::tests::compose_in;

    #[test]
    fn test_signal_marks_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let compose = Arc::new(compose_in(dir.path(), ""));
        compose.write_status(ComposeStatus::Started).unwrap();
        let weak = Arc::downgrade(&compose);
        assert_eq!(on_signal(&weak, Signal::SIGTERM), Some(ComposeStatus::Terminated));
        assert_eq!(
            std::fs::read_to_string(compose.paths.status_file()).unwrap(),
            "TERMINATED\n"
        );
    }

    #[test]
    fn test_gone_compose_is_ignored() {
        let weak: Weak<Compose> = Weak::new();
        assert_eq!(on_signal(&weak, Signal::SIGINT), None);
    }
}
