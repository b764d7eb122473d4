//! dbbundle-lib: Core types and logic for dbbundle
//!
//! This crate provides everything needed to turn a database release into a
//! relocatable tarball in object storage:
//! - `BuildTarget` / `StorageKey`: what is being packaged and where it lands
//! - `fetch`: source and vendor archive acquisition
//! - `compile`: the PostgreSQL configure/make driver
//! - `fixup`: load-path rewriting so bundles work from any directory
//! - `archive` / `upload`: tarball creation and object storage
//! - `pipeline`: the manual PostgreSQL pipeline and the matrix fan-out

pub mod archive;
pub mod compile;
pub mod config;
pub mod consts;
pub mod exec;
pub mod fetch;
pub mod fixup;
pub mod pipeline;
pub mod platform;
pub mod target;
pub mod upload;
pub mod util;

pub use platform::{Arch, Os, Platform};
pub use target::{BuildTarget, Database, StorageKey};
