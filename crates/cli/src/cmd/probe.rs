//! Implementation of the `modprime probe` command.
//!
//! This is the program run inside the build. Its exit status is the whole
//! interface: the discovery code of the outcome, or 1 when the probe itself
//! fails.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use modprime_lib::config::RuntimeConfig;
use modprime_lib::probe::{PROBE_FAILURE_EXIT, ProbeReport, ProbeRequest, run};

use crate::output::print_error;

pub fn cmd_probe(config: &RuntimeConfig) -> ExitCode {
  match probe(config) {
    Ok(report) => {
      let code = report.outcome.exit_code(&config.exit_codes);
      println!("{}", report.outcome);
      exit_code(code)
    }
    Err(e) => {
      print_error(&format!("{:#}", e));
      exit_code(PROBE_FAILURE_EXIT)
    }
  }
}

fn probe(config: &RuntimeConfig) -> Result<ProbeReport> {
  let request = ProbeRequest::from_env(config).context("Invalid probe environment")?;
  let state_dir = Path::new(&config.paths.probe_state);
  run(&request, config, state_dir).context("Probe failed")
}

fn exit_code(code: i32) -> ExitCode {
  u8::try_from(code).map(ExitCode::from).unwrap_or(ExitCode::FAILURE)
}
