use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::CacheVolume;
use crate::util::hash::Hashable;

/// Where the contents of a mount come from.
///
/// Sources are plain values: a `Recipe` source refers to the *result* of
/// another recipe without forcing it. The engine evaluates it only when a
/// terminal call needs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
  /// An empty directory.
  Scratch,
  /// A directory on the caller's host, treated as an immutable snapshot for
  /// the duration of one invocation.
  Host { path: PathBuf },
  /// A directory (or file) inside the result of another recipe.
  Recipe { recipe: Box<Recipe>, path: String },
  /// A literal file.
  NewFile { contents: String },
}

impl Source {
  /// The root filesystem of an image.
  pub fn image(image: &str) -> Self {
    Source::Recipe {
      recipe: Box::new(Recipe::from_image(image)),
      path: "/".to_string(),
    }
  }

  pub fn host(path: impl Into<PathBuf>) -> Self {
    Source::Host { path: path.into() }
  }

  pub fn new_file(contents: impl Into<String>) -> Self {
    Source::NewFile {
      contents: contents.into(),
    }
  }
}

/// Options applied to a [`Op::Mount`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MountOpts {
  /// User (uid or name) that should own the mounted tree.
  pub owner: Option<String>,
  /// Glob patterns to include. Empty means everything.
  pub include: Vec<String>,
  /// Glob patterns to exclude.
  pub exclude: Vec<String>,
}

impl MountOpts {
  pub fn owned_by(owner: &str) -> Self {
    Self {
      owner: Some(owner.to_string()),
      ..Self::default()
    }
  }

  pub fn with_include(mut self, pattern: &str) -> Self {
    self.include.push(pattern.to_string());
    self
  }

  pub fn with_exclude(mut self, pattern: &str) -> Self {
    self.exclude.push(pattern.to_string());
    self
  }
}

/// A single layer operation of a [`Recipe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
  /// Start from a base image.
  From { image: String },
  SetEnv { key: String, value: String },
  UnsetEnv { key: String },
  /// Place `source` at `path`.
  Mount {
    path: String,
    source: Source,
    opts: MountOpts,
  },
  /// Attach a persistent cache volume at `path` for all later exec steps.
  CacheMount { path: String, volume: CacheVolume },
  Workdir { path: String },
  User { uid: String },
  /// Run a process. When `tolerate_any_exit` is set a non-zero exit status is
  /// recorded as data instead of failing the recipe.
  Exec { args: Vec<String>, tolerate_any_exit: bool },
  /// The process started when the final image is invoked. Empty args mean
  /// "nothing to run".
  Entrypoint { args: Vec<String> },
}

/// An immutable, ordered description of container-build operations.
///
/// Every builder method borrows `self` and returns a new recipe, so a caller
/// holding an earlier recipe never observes later extensions. Two recipes are
/// cache-equivalent exactly when their operation sequences are equal; see
/// [`Hashable::compute_hash`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recipe {
  ops: Vec<Op>,
}

impl Hashable for Recipe {}

impl Recipe {
  /// An empty recipe (a scratch filesystem).
  pub fn new() -> Self {
    Self { ops: Vec::new() }
  }

  pub fn from_image(image: &str) -> Self {
    Self::new().with_op(Op::From {
      image: image.to_string(),
    })
  }

  pub fn ops(&self) -> &[Op] {
    &self.ops
  }

  pub fn is_empty(&self) -> bool {
    self.ops.is_empty()
  }

  /// The base image when this recipe is nothing more than an image reference.
  pub fn as_image(&self) -> Option<&str> {
    match self.ops.as_slice() {
      [Op::From { image }] => Some(image),
      _ => None,
    }
  }

  /// Returns a copy of this recipe with `op` appended.
  pub fn with_op(&self, op: Op) -> Self {
    let mut ops = Vec::with_capacity(self.ops.len() + 1);
    ops.extend(self.ops.iter().cloned());
    ops.push(op);
    Self { ops }
  }

  pub fn with_env(&self, key: &str, value: &str) -> Self {
    self.with_op(Op::SetEnv {
      key: key.to_string(),
      value: value.to_string(),
    })
  }

  pub fn without_env(&self, key: &str) -> Self {
    self.with_op(Op::UnsetEnv { key: key.to_string() })
  }

  pub fn with_mount(&self, path: &str, source: Source, opts: MountOpts) -> Self {
    self.with_op(Op::Mount {
      path: path.to_string(),
      source,
      opts,
    })
  }

  pub fn with_cache_mount(&self, path: &str, volume: CacheVolume) -> Self {
    self.with_op(Op::CacheMount {
      path: path.to_string(),
      volume,
    })
  }

  pub fn with_workdir(&self, path: &str) -> Self {
    self.with_op(Op::Workdir { path: path.to_string() })
  }

  pub fn with_user(&self, uid: &str) -> Self {
    self.with_op(Op::User { uid: uid.to_string() })
  }

  pub fn with_exec<S: AsRef<str>>(&self, args: &[S]) -> Self {
    self.with_op(Op::Exec {
      args: args.iter().map(|a| a.as_ref().to_string()).collect(),
      tolerate_any_exit: false,
    })
  }

  /// Like [`with_exec`](Self::with_exec), but a non-zero exit is data.
  pub fn with_exec_any_exit<S: AsRef<str>>(&self, args: &[S]) -> Self {
    self.with_op(Op::Exec {
      args: args.iter().map(|a| a.as_ref().to_string()).collect(),
      tolerate_any_exit: true,
    })
  }

  pub fn with_entrypoint<S: AsRef<str>>(&self, args: &[S]) -> Self {
    self.with_op(Op::Entrypoint {
      args: args.iter().map(|a| a.as_ref().to_string()).collect(),
    })
  }

  /// The working directory in effect after the last operation.
  pub fn workdir(&self) -> String {
    let mut current = "/".to_string();
    for op in &self.ops {
      if let Op::Workdir { path } = op {
        current = resolve_path(&current, path);
      }
    }
    current
  }

  /// The environment in effect after the last operation.
  pub fn env(&self) -> std::collections::BTreeMap<String, String> {
    let mut env = std::collections::BTreeMap::new();
    for op in &self.ops {
      match op {
        Op::SetEnv { key, value } => {
          env.insert(key.clone(), value.clone());
        }
        Op::UnsetEnv { key } => {
          env.remove(key);
        }
        _ => {}
      }
    }
    env
  }

  /// The last exec step, if any.
  pub fn last_exec(&self) -> Option<(&[String], bool)> {
    self.ops.iter().rev().find_map(|op| match op {
      Op::Exec {
        args,
        tolerate_any_exit,
      } => Some((args.as_slice(), *tolerate_any_exit)),
      _ => None,
    })
  }

  /// A lazy handle on a directory of this recipe's result.
  ///
  /// Relative paths resolve against the current working directory. Nothing
  /// is evaluated until the handle is used by a terminal call.
  pub fn directory(&self, path: &str) -> Source {
    Source::Recipe {
      recipe: Box::new(self.clone()),
      path: resolve_path(&self.workdir(), path),
    }
  }
}

/// Resolve `path` against `base` the way a container runtime resolves a
/// working directory: absolute paths replace, relative paths append, `.` and
/// `..` components are normalised.
pub fn resolve_path(base: &str, path: &str) -> String {
  let joined = if path.starts_with('/') {
    PathBuf::from(path)
  } else {
    Path::new(base).join(path)
  };

  let mut parts: Vec<String> = Vec::new();
  for component in joined.components() {
    match component {
      std::path::Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
      std::path::Component::ParentDir => {
        parts.pop();
      }
      _ => {}
    }
  }

  format!("/{}", parts.join("/"))
}

/// Join a relative sub-path onto a mount point, tolerating empty and `.`
/// sub-paths.
pub fn join_subpath(mount: &str, subpath: &str) -> String {
  resolve_path(mount, subpath.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Sharing;

  fn volume() -> CacheVolume {
    CacheVolume {
      name: "http".to_string(),
      sharing: Sharing::Shared,
      owner: "1654".to_string(),
    }
  }

  #[test]
  fn extension_does_not_change_the_original() {
    let base = Recipe::from_image("runtime:8.0").with_env("A", "1");
    let before = base.clone();

    let extended = base.with_env("B", "2").with_exec(&["true"]);

    assert_eq!(base, before);
    assert_eq!(base.ops().len(), 2);
    assert_eq!(extended.ops().len(), 4);
  }

  #[test]
  fn structurally_equal_recipes_hash_equal() {
    let build = || {
      Recipe::from_image("runtime:8.0")
        .with_cache_mount("/cache", volume())
        .with_mount("/Module", Source::host("/src"), MountOpts::owned_by("1654"))
        .with_exec_any_exit(&["probe"])
    };

    assert_eq!(build(), build());
    assert_eq!(build().compute_hash().unwrap(), build().compute_hash().unwrap());
  }

  #[test]
  fn tolerance_is_part_of_the_structure() {
    let strict = Recipe::from_image("img").with_exec(&["probe"]);
    let tolerant = Recipe::from_image("img").with_exec_any_exit(&["probe"]);

    assert_ne!(strict, tolerant);
    assert_ne!(strict.compute_hash().unwrap(), tolerant.compute_hash().unwrap());
  }

  #[test]
  fn operation_order_matters() {
    let a = Recipe::from_image("img").with_env("A", "1").with_env("B", "2");
    let b = Recipe::from_image("img").with_env("B", "2").with_env("A", "1");

    assert_ne!(a.compute_hash().unwrap(), b.compute_hash().unwrap());
  }

  #[test]
  fn env_tracks_set_and_unset() {
    let recipe = Recipe::new()
      .with_env("A", "1")
      .with_env("B", "2")
      .without_env("A")
      .with_env("B", "3");

    let env = recipe.env();
    assert_eq!(env.get("A"), None);
    assert_eq!(env.get("B").map(String::as_str), Some("3"));
  }

  #[test]
  fn directory_resolves_against_workdir() {
    let recipe = Recipe::from_image("img").with_workdir("/scratch").with_workdir("sub");

    assert_eq!(recipe.workdir(), "/scratch/sub");
    match recipe.directory(".") {
      Source::Recipe { path, .. } => assert_eq!(path, "/scratch/sub"),
      other => panic!("expected recipe source, got {:?}", other),
    }
    match recipe.directory("/Out") {
      Source::Recipe { path, .. } => assert_eq!(path, "/Out"),
      other => panic!("expected recipe source, got {:?}", other),
    }
  }

  #[test]
  fn last_exec_reports_tolerance() {
    let recipe = Recipe::from_image("img")
      .with_exec(&["first"])
      .with_exec_any_exit(&["second", "arg"])
      .with_env("X", "1");

    let (args, tolerant) = recipe.last_exec().unwrap();
    assert_eq!(args, ["second".to_string(), "arg".to_string()]);
    assert!(tolerant);
    assert!(Recipe::from_image("img").last_exec().is_none());
  }

  #[test]
  fn image_only_recipes_are_recognised() {
    assert_eq!(Recipe::from_image("img:1").as_image(), Some("img:1"));
    assert_eq!(Recipe::from_image("img:1").with_env("A", "1").as_image(), None);
  }

  #[test]
  fn resolve_path_normalises() {
    assert_eq!(resolve_path("/scratch", "."), "/scratch");
    assert_eq!(resolve_path("/scratch", "a/../b"), "/scratch/b");
    assert_eq!(resolve_path("/scratch", "/abs"), "/abs");
    assert_eq!(resolve_path("/", ""), "/");
  }

  #[test]
  fn join_subpath_handles_empty_and_dot() {
    assert_eq!(join_subpath("/Module", ""), "/Module");
    assert_eq!(join_subpath("/Module", "."), "/Module");
    assert_eq!(join_subpath("/Module", "dotnet/mod"), "/Module/dotnet/mod");
    assert_eq!(join_subpath("/Module", "/dotnet"), "/Module/dotnet");
  }
}
