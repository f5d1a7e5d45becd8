// src/lib.rs

//! Distribution compose tool
//!
//! Builds a release of an RPM distribution from a package pool: package
//! sets, per-variant dependency-closed repositories, installer trees,
//! ISOs and koji-built images, all published with productmd metadata.
//!
//! # Architecture
//!
//! - Configuration: TOML validated against a schema, with cross-option rules
//! - Compose context: ids, directory layout, status and shared indexes
//! - Phases: one type per step, run by a driver in a fixed order, with
//!   concurrent groups scheduled by a weaver
//! - Tool adapters: pure argument-vector builders for external tools

pub mod arch;
pub mod compose;
pub mod comps;
pub mod config;
mod error;
pub mod gather;
pub mod hash;
pub mod metadata;
pub mod notifier;
pub mod phases;
pub mod pkgset;
pub mod scm;
pub mod signals;
pub mod tools;
pub mod variants;
pub mod version;

pub use arch::TreeArch;
pub use compose::{Compose, ComposeOptions, ComposeStatus, ComposeType};
pub use comps::Comps;
pub use config::{Config, LoadedConfig};
pub use error::{Error, Result};
pub use gather::{GatherPolicy, GatherResult};
pub use metadata::{ComposeInfo, Image, ImagesIndex, RpmsManifest};
pub use phases::{Phase, PhaseContext, PHASES};
pub use pkgset::{PackageRecord, Universe};
pub use variants::{Variant, VariantFilter, VariantTree, VariantType};
pub use version::{rpmvercmp, RpmVersion};
