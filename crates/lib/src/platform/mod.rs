//! Host platform helpers: architecture naming and per-user directories.

pub mod arch;
pub mod paths;

pub use arch::{Arch, linux_runtime_dir};
