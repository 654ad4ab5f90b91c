mod codegen;
mod info;
mod probe;
mod render;
mod runtime;

use std::future::Future;

use anyhow::{Context, Result};

use modprime_lib::pipeline::PipelineError;

pub use codegen::cmd_codegen;
pub use info::cmd_info;
pub use probe::cmd_probe;
pub use render::cmd_render;
pub use runtime::cmd_runtime;

/// Drive `future` to completion on a fresh runtime, abandoning it on Ctrl-C.
///
/// Dropping the future kills any build process it spawned.
fn run_cancellable<T, E>(future: impl Future<Output = Result<T, E>>) -> Result<T>
where
  E: std::error::Error + Send + Sync + 'static,
{
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(async {
    tokio::select! {
      result = future => result.map_err(anyhow::Error::from),
      _ = tokio::signal::ctrl_c() => Err(PipelineError::Cancelled.into()),
    }
  })
}
