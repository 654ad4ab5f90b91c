//! modprime-lib: module priming and client code generation
//!
//! This crate provides everything the `modprime` binary drives:
//! - `Recipe`: immutable, content-hashed container build descriptions
//! - `Engine`: the seam where recipes are evaluated (Docker, or scripted in tests)
//! - `runtime`: the discovery-and-priming protocol that makes a module invocable
//! - `codegen`: client generation plus project file injection and re-pinning
//! - `probe`: the exit-code discovery program run inside the build

pub mod cache;
pub mod codegen;
pub mod config;
pub mod consts;
pub mod module;
pub mod pipeline;
pub mod platform;
pub mod probe;
pub mod runtime;
pub mod util;
