// src/notifier.rs

//! Compose event notifications
//!
//! Every configured script is run with the message kind as its only argument
//! and the JSON payload on standard input. Invocations are serialized, and a
//! failing script is only ever a warning.

use serde_json::{Map, Value};
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;
use tracing::{debug, warn};

pub const STATUS_CHANGE: &str = "status-change";
pub const PHASE_START: &str = "phase-start";
pub const PHASE_STOP: &str = "phase-stop";
pub const IMAGE_DONE: &str = "createiso-imagedone";
pub const COMPOSE_FINISHED: &str = "compose-finished";
pub const OSTREE_COMMIT: &str = "ostree";

#[derive(Debug, Default)]
struct Inner {
    scripts: Vec<String>,
    compose_id: OnceLock<String>,
    location: OnceLock<String>,
    /// Held for the whole duration of one script run
    running: Mutex<()>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

/// Cheaply cloneable handle to the configured notification scripts
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl Notifier {
    pub fn new(scripts: Vec<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                scripts,
                ..Inner::default()
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.inner.scripts.is_empty()
    }

    /// Values filled into every payload that does not carry them already
    pub fn set_compose(&self, compose_id: &str, location: &str) {
        let _ = self.inner.compose_id.set(compose_id.to_string());
        let _ = self.inner.location.set(location.to_string());
    }

    /// Run every script and wait for them
    pub fn send(&self, kind: &str, payload: Value) {
        if !self.is_enabled() {
            return;
        }
        self.inner.deliver(kind, payload);
    }

    /// Run every script on a background thread
    pub fn send_async(&self, kind: &str, payload: Value) {
        if !self.is_enabled() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let kind = kind.to_string();
        let handle = std::thread::spawn(move || inner.deliver(&kind, payload));
        if let Ok(mut pending) = self.inner.pending.lock() {
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }
    }

    /// Wait for background notifications to finish
    pub fn wait(&self) {
        let handles = match self.inner.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return,
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Inner {
    fn payload(&self, payload: Value) -> Value {
        let mut object = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        if let Some(id) = self.compose_id.get() {
            object
                .entry("compose_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(location) = self.location.get() {
            object
                .entry("location")
                .or_insert_with(|| Value::String(location.clone()));
        }
        Value::Object(object)
    }

    fn deliver(&self, kind: &str, payload: Value) {
        let body = self.payload(payload).to_string();
        let _guard = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for script in &self.scripts {
            if let Err(e) = run_script(script, kind, &body) {
                warn!("Failed to run notification script {} for {}: {}", script, kind, e);
            }
        }
    }
}

fn run_script(script: &str, kind: &str, body: &str) -> std::io::Result<()> {
    let mut words = script.split_whitespace();
    let Some(program) = words.next() else {
        return Ok(());
    };
    debug!("Notifying {} via {}", kind, program);

    let mut child = Command::new(program)
        .args(words)
        .arg(kind)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(body.as_bytes())?;
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        warn!(
            "Notification script {} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
