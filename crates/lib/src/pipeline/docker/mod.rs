//! [`Engine`] implementation backed by `docker buildx build`.
//!
//! A terminal call renders the recipe (see [`render`]) into a scratch
//! directory and builds its output stage with a local exporter. Layer caching
//! is left entirely to BuildKit: structurally equal recipes render to the
//! same Dockerfile and therefore hit the same cache.

pub mod render;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

use super::engine::{Engine, PipelineError};
use super::{Recipe, Source, host};
pub use render::{Dockerfile, Target, render};

/// Lines of builder output kept in error messages.
const LOG_TAIL_LINES: usize = 30;

static EXIT_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"exit code: (\d+)").expect("valid exit code regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
  pub program: String,
  /// `--builder` passed to buildx, if any.
  pub builder: Option<String>,
  /// Where wrapped processes record their results inside the build.
  pub status_dir: String,
}

impl Default for DockerConfig {
  fn default() -> Self {
    Self {
      program: "docker".to_string(),
      builder: None,
      status_dir: "/tmp/.modprime".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct DockerEngine {
  config: DockerConfig,
}

impl DockerEngine {
  pub fn new(config: DockerConfig) -> Self {
    Self { config }
  }

  /// Arguments for `docker` building `dockerfile` from `work` into `dest`.
  pub fn build_args(&self, dockerfile: &Dockerfile, work: &Path, dest: &Path) -> Vec<String> {
    let mut args = vec!["buildx".to_string(), "build".to_string(), "--progress=plain".to_string()];
    if let Some(builder) = &self.config.builder {
      args.push(format!("--builder={}", builder));
    }
    args.push(format!("--file={}", work.join("Dockerfile").display()));
    args.push(format!("--target={}", render::OUTPUT_STAGE));
    args.push(format!("--output=type=local,dest={}", dest.display()));

    for (name, path) in &dockerfile.contexts {
      args.push(format!("--build-context={}={}", name, path.display()));
    }
    if !dockerfile.files.is_empty() {
      args.push(format!(
        "--build-context={}={}",
        render::FILES_CONTEXT,
        work.join("files").display()
      ));
    }
    if dockerfile.uses_empty_context() {
      args.push(format!(
        "--build-context={}={}",
        render::EMPTY_CONTEXT,
        work.join("empty").display()
      ));
    }

    args.push(work.join("empty").display().to_string());
    args
  }

  /// Render and build `recipe`, exporting `target` into `dest`.
  async fn build(&self, recipe: &Recipe, target: &Target, dest: &Path) -> Result<(), PipelineError> {
    let dockerfile = render(recipe, target, &self.config.status_dir)?;
    let work = TempDir::new()?;
    write_inputs(&dockerfile, work.path())?;

    let args = self.build_args(&dockerfile, work.path(), dest);
    info!(stage = %dockerfile.main_stage, target = ?target, "building recipe");
    debug!(program = %self.config.program, args = ?args, "spawning builder");

    let output = Command::new(&self.config.program)
      .args(&args)
      .stdin(Stdio::null())
      .kill_on_drop(true)
      .output()
      .await
      .map_err(|e| PipelineError::EngineFailed {
        status: None,
        message: format!("failed to run {}: {}", self.config.program, e),
      })?;

    if output.status.success() {
      return Ok(());
    }

    let log = String::from_utf8_lossy(&output.stderr);
    debug!(log = %log, "builder failed");
    Err(classify_failure(output.status.code(), &log))
  }

  /// Build the status target and return the recorded status directory.
  async fn status(&self, recipe: &Recipe) -> Result<(TempDir, PathBuf), PipelineError> {
    if recipe.last_exec().is_none() {
      return Err(PipelineError::InvalidRecipe("recipe has no exec step".to_string()));
    }
    let out = TempDir::new()?;
    let dir = out.path().join("status");
    self.build(recipe, &Target::Status, &dir).await?;
    Ok((out, dir))
  }

  /// Export a recipe directory into a temp dir for inspection.
  async fn snapshot(&self, recipe: &Recipe, path: &str) -> Result<(TempDir, PathBuf), PipelineError> {
    let out = TempDir::new()?;
    let dir = out.path().join("dir");
    self.build(recipe, &Target::Directory(path.to_string()), &dir).await?;
    Ok((out, dir))
  }
}

fn write_inputs(dockerfile: &Dockerfile, work: &Path) -> Result<(), PipelineError> {
  fs::write(work.join("Dockerfile"), &dockerfile.text)?;
  fs::create_dir_all(work.join("empty"))?;
  if !dockerfile.files.is_empty() {
    let files = work.join("files");
    fs::create_dir_all(&files)?;
    for (name, contents) in &dockerfile.files {
      fs::write(files.join(name), contents)?;
    }
  }
  Ok(())
}

/// Map a failed build to an error. A wrapped process that exited non-zero
/// shows up in the log as `exit code: N`; anything else is the builder's own
/// failure.
pub fn classify_failure(status: Option<i32>, log: &str) -> PipelineError {
  let tail = tail(log, LOG_TAIL_LINES);
  let code = EXIT_CODE_RE
    .captures_iter(log)
    .last()
    .and_then(|c| c[1].parse::<i32>().ok());

  match code {
    Some(code) => PipelineError::ExecutionFailed { code, stderr: tail },
    None => PipelineError::EngineFailed { status, message: tail },
  }
}

fn tail(log: &str, lines: usize) -> String {
  let all: Vec<&str> = log.lines().collect();
  let start = all.len().saturating_sub(lines);
  all[start..].join("\n")
}

fn read_status_file(dir: &Path, name: &str) -> Result<String, PipelineError> {
  fs::read_to_string(dir.join(name)).map_err(|e| PipelineError::EngineFailed {
    status: None,
    message: format!("missing {} in build status: {}", name, e),
  })
}

impl Engine for DockerEngine {
  async fn exit_code(&self, recipe: &Recipe) -> Result<i32, PipelineError> {
    let (_out, dir) = self.status(recipe).await?;
    let raw = read_status_file(&dir, render::EXIT_CODE_FILE)?;
    raw.trim().parse().map_err(|_| PipelineError::EngineFailed {
      status: None,
      message: format!("unreadable exit code {:?}", raw),
    })
  }

  async fn stdout(&self, recipe: &Recipe) -> Result<String, PipelineError> {
    let (_out, dir) = self.status(recipe).await?;
    read_status_file(&dir, render::STDOUT_FILE)
  }

  async fn export_directory(&self, source: &Source, dest: &Path) -> Result<(), PipelineError> {
    match source {
      Source::Scratch => Ok(fs::create_dir_all(dest)?),
      Source::Host { path } => Ok(host::copy_tree(path, dest)?),
      Source::Recipe { recipe, path } => self.build(recipe, &Target::Directory(path.clone()), dest).await,
      Source::NewFile { .. } => Err(PipelineError::InvalidRecipe("a new file is not a directory".to_string())),
    }
  }

  async fn entries(&self, source: &Source, path: &str) -> Result<Vec<String>, PipelineError> {
    match source {
      Source::Scratch => Ok(Vec::new()),
      Source::Host { path: root } => host::entries(root, path),
      Source::Recipe { recipe, path: base } => {
        let (_out, dir) = self.snapshot(recipe, base).await?;
        host::entries(&dir, path)
      }
      Source::NewFile { .. } => Err(PipelineError::InvalidRecipe("a new file is not a directory".to_string())),
    }
  }

  async fn contents(&self, source: &Source, path: &str) -> Result<String, PipelineError> {
    match source {
      Source::Scratch => Err(PipelineError::NotFound { path: path.to_string() }),
      Source::Host { path: root } => host::contents(root, path),
      Source::Recipe { recipe, path: base } => {
        let (_out, dir) = self.snapshot(recipe, base).await?;
        host::contents(&dir, path)
      }
      Source::NewFile { contents } => Ok(contents.clone()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pipeline::MountOpts;

  #[test]
  fn failed_step_reports_exit_code() {
    let log = "#7 [s1 3/4] RUN [\"/bin/sh\", ...]\n\
               #7 0.41 error CS1002: ; expected\n\
               #7 ERROR: process \"/bin/sh -c ...\" did not complete successfully: exit code: 1\n\
               ERROR: failed to solve: process \"/bin/sh -c ...\" did not complete successfully: exit code: 1";

    match classify_failure(Some(1), log) {
      PipelineError::ExecutionFailed { code, stderr } => {
        assert_eq!(code, 1);
        assert!(stderr.contains("CS1002"));
      }
      other => panic!("expected execution failure, got {:?}", other),
    }
  }

  #[test]
  fn builder_errors_are_engine_failures() {
    let log = "ERROR: failed to solve: pull access denied for modprime-probe";
    assert!(matches!(
      classify_failure(Some(1), log),
      PipelineError::EngineFailed { status: Some(1), .. }
    ));
  }

  #[test]
  fn tail_keeps_last_lines() {
    let log = (0..50).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
    let kept = tail(&log, 3);
    assert_eq!(kept, "47\n48\n49");
  }

  #[test]
  fn build_args_name_every_context() {
    let recipe = Recipe::from_image("img")
      .with_mount("/tmp", Source::Scratch, MountOpts::default())
      .with_mount("/Module", Source::host("/ctx"), MountOpts::default())
      .with_mount("/mnt/i.json", Source::new_file("{}"), MountOpts::default())
      .with_exec(&["probe"]);
    let dockerfile = render(&recipe, &Target::Status, "/tmp/.modprime").unwrap();
    let engine = DockerEngine::new(DockerConfig {
      builder: Some("ci".to_string()),
      ..DockerConfig::default()
    });

    let args = engine.build_args(&dockerfile, Path::new("/w"), Path::new("/out"));

    assert_eq!(&args[..3], ["buildx", "build", "--progress=plain"]);
    assert!(args.contains(&"--builder=ci".to_string()));
    assert!(args.contains(&"--target=modprime-out".to_string()));
    assert!(args.contains(&"--output=type=local,dest=/out".to_string()));
    assert!(args.contains(&"--build-context=modprime-files=/w/files".to_string()));
    assert!(args.contains(&"--build-context=modprime-empty=/w/empty".to_string()));
    assert!(args.iter().any(|a| a.starts_with("--build-context=ctx-") && a.ends_with("=/ctx")));
    assert_eq!(args.last().map(String::as_str), Some("/w/empty"));
  }

  #[test]
  fn write_inputs_lays_out_work_dir() {
    let recipe = Recipe::from_image("img").with_mount("/f", Source::new_file("hello"), MountOpts::default());
    let dockerfile = render(&recipe, &Target::Status, "/tmp/.modprime").unwrap();
    let work = TempDir::new().unwrap();

    write_inputs(&dockerfile, work.path()).unwrap();

    assert!(work.path().join("Dockerfile").is_file());
    assert!(work.path().join("empty").is_dir());
    let (name, _) = dockerfile.files.iter().next().unwrap();
    assert_eq!(fs::read_to_string(work.path().join("files").join(name)).unwrap(), "hello");
  }

  #[tokio::test]
  async fn exit_code_needs_an_exec_step() {
    let engine = DockerEngine::default();
    let err = engine.exit_code(&Recipe::from_image("img")).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidRecipe(_)));
  }

  #[tokio::test]
  async fn host_entries_skip_the_builder() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("Foo.csproj"), "").unwrap();
    let engine = DockerEngine::new(DockerConfig {
      program: "/nonexistent/docker".to_string(),
      ..DockerConfig::default()
    });

    let names = engine.entries(&Source::host(temp.path()), ".").await.unwrap();
    assert_eq!(names, vec!["Foo.csproj"]);
  }
}
