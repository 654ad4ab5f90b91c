//! An in-memory [`Engine`] driven by a script of exec outcomes.
//!
//! Only the *last* exec step of a forced recipe is evaluated; its outcome is
//! looked up by argument vector. Outcomes registered for the same arguments
//! are handed out in order and the final one repeats, so a test can script
//! "121 on the first probe, 0 on the re-probe". Unscripted execs succeed with
//! empty output.
//!
//! A call kind registered with [`ScriptedEngine::cancel_on`] is recorded and
//! then fails with [`PipelineError::Cancelled`].
//!
//! Host sources are served from the real filesystem. Directories produced by
//! recipes are registered with [`ScriptedEngine::with_output`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::engine::{Engine, PipelineError};
use super::{Recipe, Source, host};
use crate::util::hash::{Hashable, ObjectHash};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutcome {
  pub code: i32,
  pub stdout: String,
  pub stderr: String,
}

impl ExecOutcome {
  pub fn code(code: i32) -> Self {
    Self {
      code,
      ..Self::default()
    }
  }

  pub fn with_stdout(mut self, stdout: &str) -> Self {
    self.stdout = stdout.to_string();
    self
  }

  pub fn with_stderr(mut self, stderr: &str) -> Self {
    self.stderr = stderr.to_string();
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
  ExitCode,
  Stdout,
  ExportDirectory,
  Entries,
  Contents,
}

/// One terminal call seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCall {
  pub kind: CallKind,
  /// Hash of the forced recipe, if the call forced one.
  pub recipe: Option<ObjectHash>,
  /// Arguments of the forced recipe's last exec step.
  pub args: Option<Vec<String>>,
}

#[derive(Debug, Default)]
struct State {
  scripts: HashMap<Vec<String>, VecDeque<ExecOutcome>>,
  outputs: HashMap<Vec<String>, BTreeMap<String, String>>,
  calls: Vec<EngineCall>,
  cancelled: HashSet<CallKind>,
}

#[derive(Debug, Default)]
pub struct ScriptedEngine {
  state: Mutex<State>,
}

impl ScriptedEngine {
  pub fn new() -> Self {
    Self::default()
  }

  /// Queue `outcome` for the next exec of `args`.
  pub fn on_exec<S: AsRef<str>>(self, args: &[S], outcome: ExecOutcome) -> Self {
    self
      .lock()
      .scripts
      .entry(to_args(args))
      .or_default()
      .push_back(outcome);
    self
  }

  /// Files (relative paths) found in any directory exported from a recipe
  /// whose last exec is `args`.
  pub fn with_output<S, K, V>(self, args: &[S], files: impl IntoIterator<Item = (K, V)>) -> Self
  where
    S: AsRef<str>,
    K: Into<String>,
    V: Into<String>,
  {
    let files = files.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
    self.lock().outputs.insert(to_args(args), files);
    self
  }

  /// Cancel every call of `kind`, as if the user interrupted it.
  pub fn cancel_on(self, kind: CallKind) -> Self {
    self.lock().cancelled.insert(kind);
    self
  }

  pub fn calls(&self) -> Vec<EngineCall> {
    self.lock().calls.clone()
  }

  /// Argument vectors of every recipe forced so far, in call order.
  pub fn forced(&self) -> Vec<Vec<String>> {
    self.lock().calls.iter().filter_map(|c| c.args.clone()).collect()
  }

  /// Whether any forced recipe's last exec started with `program`.
  pub fn ran(&self, program: &str) -> bool {
    self.forced().iter().any(|args| args.first().is_some_and(|a| a == program))
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn record(&self, kind: CallKind, recipe: Option<&Recipe>) -> Result<(), PipelineError> {
    let (hash, args) = match recipe {
      Some(r) => (
        Some(r.compute_hash()?),
        r.last_exec().map(|(args, _)| args.to_vec()),
      ),
      None => (None, None),
    };
    let mut state = self.lock();
    state.calls.push(EngineCall {
      kind,
      recipe: hash,
      args,
    });
    if state.cancelled.contains(&kind) {
      return Err(PipelineError::Cancelled);
    }
    Ok(())
  }

  fn next_outcome(&self, args: &[String]) -> ExecOutcome {
    let mut state = self.lock();
    match state.scripts.get_mut(args) {
      Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
      Some(queue) => queue.front().cloned().unwrap_or_default(),
      None => ExecOutcome::default(),
    }
  }

  /// Evaluate the last exec step, failing on a non-tolerated non-zero exit.
  fn force(&self, kind: CallKind, recipe: &Recipe) -> Result<ExecOutcome, PipelineError> {
    self.record(kind, Some(recipe))?;
    let Some((args, tolerant)) = recipe.last_exec() else {
      return Ok(ExecOutcome::default());
    };

    let outcome = self.next_outcome(args);
    if outcome.code != 0 && !tolerant {
      return Err(PipelineError::ExecutionFailed {
        code: outcome.code,
        stderr: outcome.stderr,
      });
    }
    Ok(outcome)
  }

  fn require_exec(recipe: &Recipe) -> Result<(), PipelineError> {
    match recipe.last_exec() {
      Some(_) => Ok(()),
      None => Err(PipelineError::InvalidRecipe("recipe has no exec step".to_string())),
    }
  }

  /// Files of a recipe directory, relative to that directory.
  fn recipe_files(&self, kind: CallKind, recipe: &Recipe) -> Result<BTreeMap<String, String>, PipelineError> {
    self.force(kind, recipe)?;
    let key = recipe.last_exec().map(|(args, _)| args.to_vec()).unwrap_or_default();
    Ok(self.lock().outputs.get(&key).cloned().unwrap_or_default())
  }
}

fn to_args<S: AsRef<str>>(args: &[S]) -> Vec<String> {
  args.iter().map(|a| a.as_ref().to_string()).collect()
}

fn relative(path: &str) -> &str {
  let trimmed = path.trim_matches('/');
  if trimmed == "." { "" } else { trimmed }
}

/// Direct children of `dir` within a flat file map; directories end in `/`.
fn children(files: &BTreeMap<String, String>, dir: &str) -> Result<Vec<String>, PipelineError> {
  let dir = relative(dir);
  let prefix = if dir.is_empty() {
    String::new()
  } else {
    format!("{}/", dir)
  };

  let mut names = BTreeSet::new();
  for file in files.keys() {
    if let Some(rest) = file.strip_prefix(&prefix) {
      match rest.split_once('/') {
        Some((first, _)) => names.insert(format!("{}/", first)),
        None => names.insert(rest.to_string()),
      };
    }
  }

  if names.is_empty() && !dir.is_empty() {
    return Err(PipelineError::NotFound { path: dir.to_string() });
  }
  Ok(names.into_iter().collect())
}

impl Engine for ScriptedEngine {
  async fn exit_code(&self, recipe: &Recipe) -> Result<i32, PipelineError> {
    Self::require_exec(recipe)?;
    Ok(self.force(CallKind::ExitCode, recipe)?.code)
  }

  async fn stdout(&self, recipe: &Recipe) -> Result<String, PipelineError> {
    Self::require_exec(recipe)?;
    Ok(self.force(CallKind::Stdout, recipe)?.stdout)
  }

  async fn export_directory(&self, source: &Source, dest: &Path) -> Result<(), PipelineError> {
    match source {
      Source::Scratch => {
        self.record(CallKind::ExportDirectory, None)?;
        fs::create_dir_all(dest)?;
      }
      Source::Host { path } => {
        self.record(CallKind::ExportDirectory, None)?;
        host::copy_tree(path, dest)?;
      }
      Source::Recipe { recipe, .. } => {
        let files = self.recipe_files(CallKind::ExportDirectory, recipe)?;
        fs::create_dir_all(dest)?;
        for (rel, contents) in files {
          let target = dest.join(rel);
          if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
          }
          fs::write(target, contents)?;
        }
      }
      Source::NewFile { .. } => {
        return Err(PipelineError::InvalidRecipe("a new file is not a directory".to_string()));
      }
    }
    Ok(())
  }

  async fn entries(&self, source: &Source, path: &str) -> Result<Vec<String>, PipelineError> {
    match source {
      Source::Scratch => {
        self.record(CallKind::Entries, None)?;
        Ok(Vec::new())
      }
      Source::Host { path: root } => {
        self.record(CallKind::Entries, None)?;
        host::entries(root, path)
      }
      Source::Recipe { recipe, .. } => {
        let files = self.recipe_files(CallKind::Entries, recipe)?;
        children(&files, path)
      }
      Source::NewFile { .. } => Err(PipelineError::InvalidRecipe("a new file is not a directory".to_string())),
    }
  }

  async fn contents(&self, source: &Source, path: &str) -> Result<String, PipelineError> {
    match source {
      Source::Scratch => {
        self.record(CallKind::Contents, None)?;
        Err(PipelineError::NotFound { path: path.to_string() })
      }
      Source::Host { path: root } => {
        self.record(CallKind::Contents, None)?;
        host::contents(root, path)
      }
      Source::Recipe { recipe, .. } => {
        let files = self.recipe_files(CallKind::Contents, recipe)?;
        files
          .get(relative(path))
          .cloned()
          .ok_or_else(|| PipelineError::NotFound { path: path.to_string() })
      }
      Source::NewFile { contents } => {
        self.record(CallKind::Contents, None)?;
        Ok(contents.clone())
      }
    }
  }
}
