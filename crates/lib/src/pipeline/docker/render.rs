//! Rendering recipes as multi-stage Dockerfiles.
//!
//! Every distinct recipe referenced through a mount becomes one stage named
//! after its hash, emitted before the stages that use it. Recipes that are a
//! bare image reference are copied from directly. Host directories become
//! named build contexts, literal files are served from a generated context,
//! and scratch mounts copy from an empty one.
//!
//! Each `RUN` wraps the recipe's process in a small shell script that records
//! stdout, stderr and the exit code into the status directory. Tolerant steps
//! always succeed; the others exit with the process's own code so the build
//! fails exactly where the recipe would.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;

use crate::cache::CacheVolume;
use crate::consts::OBJ_HASH_PREFIX_LEN;
use crate::pipeline::{MountOpts, Op, PipelineError, Recipe, Source, resolve_path};
use crate::util::hash::{Hashable, hash_bytes};

pub const SYNTAX: &str = "# syntax=docker/dockerfile:1.7-labs";

/// Name of the final stage every build exports.
pub const OUTPUT_STAGE: &str = "modprime-out";

/// Build context holding literal files.
pub const FILES_CONTEXT: &str = "modprime-files";

/// Build context with nothing in it.
pub const EMPTY_CONTEXT: &str = "modprime-empty";

pub const STDOUT_FILE: &str = "stdout";
pub const STDERR_FILE: &str = "stderr";
pub const EXIT_CODE_FILE: &str = "exit-code";

/// `$0` of every wrapped process.
const SCRIPT_NAME: &str = "modprime";

/// What the output stage exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
  /// The status directory of the last `RUN`.
  Status,
  /// A directory of the main stage's filesystem.
  Directory(String),
}

/// A rendered build: the Dockerfile plus everything it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dockerfile {
  pub text: String,
  /// Named build contexts backed by host directories.
  pub contexts: BTreeMap<String, PathBuf>,
  /// Contents of the generated files context, by file name.
  pub files: BTreeMap<String, String>,
  /// Stage holding the rendered recipe itself.
  pub main_stage: String,
}

impl Dockerfile {
  pub fn uses_empty_context(&self) -> bool {
    self.text.contains(&format!("--from={}", EMPTY_CONTEXT))
  }
}

/// Render `recipe` so that building [`OUTPUT_STAGE`] exports `target`.
pub fn render(recipe: &Recipe, target: &Target, status_dir: &str) -> Result<Dockerfile, PipelineError> {
  let mut renderer = Renderer {
    status_dir,
    stages: Vec::new(),
    seen: HashSet::new(),
    contexts: BTreeMap::new(),
    files: BTreeMap::new(),
  };
  let main_stage = renderer.stage(recipe)?;

  let export = match target {
    Target::Status => copy_line(&[format!("--from={}", main_stage)], &format!("{}/", status_dir), "/"),
    Target::Directory(path) => copy_line(&[format!("--from={}", main_stage)], path, "/"),
  };

  let mut text = String::new();
  text.push_str(SYNTAX);
  text.push('\n');
  for stage in &renderer.stages {
    text.push('\n');
    text.push_str(stage);
  }
  text.push('\n');
  text.push_str(&format!("FROM scratch AS {}\n{}\n", OUTPUT_STAGE, export));

  Ok(Dockerfile {
    text,
    contexts: renderer.contexts,
    files: renderer.files,
    main_stage,
  })
}

pub fn stage_name(recipe: &Recipe) -> Result<String, PipelineError> {
  Ok(format!("s{}", recipe.compute_hash()?))
}

struct Renderer<'a> {
  status_dir: &'a str,
  stages: Vec<String>,
  seen: HashSet<String>,
  contexts: BTreeMap<String, PathBuf>,
  files: BTreeMap<String, String>,
}

/// Per-stage state carried across operations.
struct StageState {
  workdir: String,
  caches: Vec<String>,
  unset: BTreeSet<String>,
}

impl Renderer<'_> {
  /// Emit the stage for `recipe` (after its dependencies) and return its name.
  fn stage(&mut self, recipe: &Recipe) -> Result<String, PipelineError> {
    let name = stage_name(recipe)?;
    if self.seen.contains(&name) {
      return Ok(name);
    }

    let mut lines = Vec::new();
    let mut ops = recipe.ops().iter().peekable();
    match ops.peek() {
      Some(Op::From { image }) => {
        lines.push(format!("FROM {} AS {}", image, name));
        ops.next();
      }
      _ => lines.push(format!("FROM scratch AS {}", name)),
    }

    let mut state = StageState {
      workdir: "/".to_string(),
      caches: Vec::new(),
      unset: BTreeSet::new(),
    };

    for op in ops {
      match op {
        Op::From { .. } => {
          return Err(PipelineError::InvalidRecipe(
            "a base image can only start a recipe".to_string(),
          ));
        }
        Op::SetEnv { key, value } => {
          state.unset.remove(key);
          lines.push(format!("ENV {}={}", key, env_value(value)?));
        }
        Op::UnsetEnv { key } => {
          state.unset.insert(key.clone());
        }
        Op::Mount { path, source, opts } => {
          let dest = resolve_path(&state.workdir, path);
          lines.push(self.mount(&dest, source, opts)?);
        }
        Op::CacheMount { path, volume } => {
          let target = resolve_path(&state.workdir, path);
          state.caches.push(cache_flag(&target, volume));
        }
        Op::Workdir { path } => {
          state.workdir = resolve_path(&state.workdir, path);
          lines.push(format!("WORKDIR {}", state.workdir));
        }
        Op::User { uid } => lines.push(format!("USER {}", uid)),
        Op::Exec {
          args,
          tolerate_any_exit,
        } => lines.push(self.run(&state, args, *tolerate_any_exit)?),
        Op::Entrypoint { args } => lines.push(entrypoint(&state, args)?),
      }
    }

    self.seen.insert(name.clone());
    let mut text = lines.join("\n");
    text.push('\n');
    self.stages.push(text);
    Ok(name)
  }

  fn mount(&mut self, dest: &str, source: &Source, opts: &MountOpts) -> Result<String, PipelineError> {
    let (from, src) = match source {
      Source::Scratch => (EMPTY_CONTEXT.to_string(), "/".to_string()),
      Source::Host { path } => {
        let name = format!("ctx-{}", short_hash(&path.to_string_lossy()));
        self.contexts.insert(name.clone(), path.clone());
        (name, "/".to_string())
      }
      Source::Recipe { recipe, path } => match recipe.as_image() {
        Some(image) => (image.to_string(), path.clone()),
        None => (self.stage(recipe)?, path.clone()),
      },
      Source::NewFile { contents } => {
        let file = short_hash(contents);
        self.files.insert(file.clone(), contents.clone());
        (FILES_CONTEXT.to_string(), file)
      }
    };

    let mut flags = vec![format!("--from={}", from)];
    if let Some(owner) = &opts.owner {
      flags.push(format!("--chown={}", owner));
    }
    for pattern in &opts.exclude {
      flags.push(format!("--exclude={}", pattern));
    }

    if opts.include.is_empty() {
      return Ok(copy_line(&flags, &src, dest));
    }

    flags.push("--parents".to_string());
    let sources: Vec<String> = opts
      .include
      .iter()
      .map(|pattern| format!("{}/./{}", src.trim_end_matches('/'), pattern))
      .collect();
    let mut args = sources;
    args.push(format!("{}/", dest.trim_end_matches('/')));
    Ok(format!("COPY {} {}", flags.join(" "), serde_json::to_string(&args)?))
  }

  fn run(&self, state: &StageState, args: &[String], tolerant: bool) -> Result<String, PipelineError> {
    if args.is_empty() {
      return Err(PipelineError::InvalidRecipe("exec needs at least one argument".to_string()));
    }

    let script = wrapper_script(self.status_dir, &state.unset, tolerant);
    let mut argv = vec!["/bin/sh".to_string(), "-c".to_string(), script, SCRIPT_NAME.to_string()];
    argv.extend(args.iter().cloned());

    let mut line = String::from("RUN ");
    for cache in &state.caches {
      line.push_str(cache);
      line.push(' ');
    }
    line.push_str(&serde_json::to_string(&argv)?);
    Ok(line)
  }
}

/// `ENTRYPOINT` in exec form. Variables unset earlier in the stage are still
/// part of the image config, so they are removed with `env -u` at start-up.
fn entrypoint(state: &StageState, args: &[String]) -> Result<String, PipelineError> {
  if args.is_empty() || state.unset.is_empty() {
    return Ok(format!("ENTRYPOINT {}", serde_json::to_string(args)?));
  }

  let mut argv = vec!["env".to_string()];
  for key in &state.unset {
    argv.push("-u".to_string());
    argv.push(key.clone());
  }
  argv.extend(args.iter().cloned());
  Ok(format!("ENTRYPOINT {}", serde_json::to_string(&argv)?))
}

/// Shell wrapper recording the process result. The process arguments follow
/// the script as `$@`.
pub fn wrapper_script(status_dir: &str, unset: &BTreeSet<String>, tolerant: bool) -> String {
  let mut script = String::new();
  if !unset.is_empty() {
    let keys: Vec<&str> = unset.iter().map(String::as_str).collect();
    script.push_str(&format!("unset {}; ", keys.join(" ")));
  }
  let s = status_dir;
  script.push_str(&format!(
    "mkdir -p -m 777 {s}; rm -f {s}/{out} {s}/{err} {s}/{code}; \
     \"$@\" >{s}/{out} 2>{s}/{err}; c=$?; printf %d \"$c\" >{s}/{code}; \
     if [ \"$c\" -ne 0 ]; then cat {s}/{out} {s}/{err} >&2; fi; ",
    s = s,
    out = STDOUT_FILE,
    err = STDERR_FILE,
    code = EXIT_CODE_FILE,
  ));
  script.push_str(if tolerant { "exit 0" } else { "exit \"$c\"" });
  script
}

fn cache_flag(target: &str, volume: &CacheVolume) -> String {
  format!(
    "--mount=type=cache,id={},target={},sharing={},uid={}",
    volume.name, target, volume.sharing, volume.owner
  )
}

fn copy_line(flags: &[String], src: &str, dest: &str) -> String {
  let args = [src, dest];
  let json = serde_json::to_string(&args).unwrap_or_default();
  format!("COPY {} {}", flags.join(" "), json)
}

/// Quote an `ENV` value. `ENV` expands `$`, so it is escaped as well.
fn env_value(value: &str) -> Result<String, PipelineError> {
  if value.contains('\n') {
    return Err(PipelineError::InvalidRecipe(
      "environment values cannot contain newlines".to_string(),
    ));
  }
  let mut quoted = String::with_capacity(value.len() + 2);
  quoted.push('"');
  for c in value.chars() {
    if matches!(c, '"' | '\\' | '$') {
      quoted.push('\\');
    }
    quoted.push(c);
  }
  quoted.push('"');
  Ok(quoted)
}

fn short_hash(value: &str) -> String {
  hash_bytes(value.as_bytes()).0[..OBJ_HASH_PREFIX_LEN].to_string()
}
