//! End-to-end tests of the priming protocol and code generation against a
//! scripted engine.

mod codegen_tests;
mod common;
mod runtime_tests;
