// src/phases/weaver.rs

//! Concurrent phase scheduling
//!
//! A weaver is a sequence of items. A single phase runs on its own before
//! the next item; a group runs every member on its own thread and joins
//! them all before the next item starts.

use super::{run_phase, Phase};
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{debug, error};

pub enum WeaverItem {
    Single(Arc<dyn Phase>),
    Group(Vec<Arc<dyn Phase>>),
}

#[derive(Default)]
pub struct Weaver {
    items: Vec<WeaverItem>,
}

impl Weaver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(mut self, phase: Arc<dyn Phase>) -> Self {
        self.items.push(WeaverItem::Single(phase));
        self
    }

    pub fn group(mut self, phases: Vec<Arc<dyn Phase>>) -> Self {
        self.items.push(WeaverItem::Group(phases));
        self
    }

    /// Every phase in scheduling order
    pub fn phases(&self) -> Vec<&Arc<dyn Phase>> {
        self.items
            .iter()
            .flat_map(|item| match item {
                WeaverItem::Single(phase) => std::slice::from_ref(phase).iter(),
                WeaverItem::Group(phases) => phases.iter(),
            })
            .collect()
    }

    /// Run every item; the first error of a group is returned after the
    /// whole group has joined
    pub fn run(&self) -> Result<()> {
        for item in &self.items {
            match item {
                WeaverItem::Single(phase) => run_phase(phase.as_ref())?,
                WeaverItem::Group(phases) => run_group(phases)?,
            }
        }
        Ok(())
    }
}

fn run_group(phases: &[Arc<dyn Phase>]) -> Result<()> {
    let names: Vec<&str> = phases.iter().map(|p| p.name()).collect();
    debug!("Starting concurrent group: {}", names.join(", "));

    let results: Vec<Result<()>> = std::thread::scope(|s| {
        let handles: Vec<_> = phases
            .iter()
            .map(|phase| {
                let phase = Arc::clone(phase);
                std::thread::Builder::new()
                    .name(phase.name().to_string())
                    .spawn_scoped(s, move || run_phase(phase.as_ref()))
            })
            .collect();
        handles
            .into_iter()
            .zip(&names)
            .map(|(handle, name)| match handle {
                Ok(handle) => handle
                    .join()
                    .unwrap_or_else(|_| Err(Error::phase(*name, "phase thread panicked"))),
                Err(e) => Err(Error::Io(e)),
            })
            .collect()
    });

    let mut first = None;
    for (result, name) in results.into_iter().zip(&names) {
        if let Err(e) = result {
            error!("Phase {} failed: {}", name, e);
            first.get_or_insert(e);
        }
    }
    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::tests::context_in;
    use crate::phases::PhaseContext;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        ctx: Arc<PhaseContext>,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Phase for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn context(&self) -> &PhaseContext {
            &self.ctx
        }

        fn start(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("start {}", self.name));
            if self.fail {
                return Err(Error::phase(self.name, "boom"));
            }
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("stop {}", self.name));
            Ok(())
        }
    }

    fn recorder(
        name: &'static str,
        ctx: &Arc<PhaseContext>,
        log: &Arc<Mutex<Vec<String>>>,
        fail: bool,
    ) -> Arc<dyn Phase> {
        Arc::new(Recorder {
            name,
            ctx: Arc::clone(ctx),
            log: Arc::clone(log),
            fail,
        })
    }

    #[test]
    fn test_single_runs_before_group() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), "");
        let log = Arc::new(Mutex::new(Vec::new()));
        let weaver = Weaver::new()
            .single(recorder("buildinstall", &ctx, &log, false))
            .group(vec![
                recorder("gather", &ctx, &log, false),
                recorder("createrepo", &ctx, &log, false),
            ]);
        weaver.run().unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log[..2], ["start buildinstall", "stop buildinstall"]);
        assert_eq!(log.len(), 6);
        assert_eq!(weaver.phases().len(), 3);
    }

    #[test]
    fn test_group_failure_joins_peers() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), "");
        let log = Arc::new(Mutex::new(Vec::new()));
        let weaver = Weaver::new()
            .group(vec![
                recorder("createiso", &ctx, &log, true),
                recorder("osbs", &ctx, &log, false),
            ])
            .single(recorder("image_checksum", &ctx, &log, false));
        let err = weaver.run().unwrap_err();
        assert!(err.to_string().contains("boom"));

        let log = log.lock().unwrap();
        assert!(log.contains(&"stop osbs".to_string()));
        assert!(log.contains(&"stop createiso".to_string()));
        assert!(!log.iter().any(|l| l.contains("image_checksum")));
    }

    #[test]
    fn test_failed_start_still_stops() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), "");
        let log = Arc::new(Mutex::new(Vec::new()));
        let weaver = Weaver::new().single(recorder("buildinstall", &ctx, &log, true));
        let err = weaver.run().unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(*log.lock().unwrap(), ["start buildinstall", "stop buildinstall"]);
    }
}
