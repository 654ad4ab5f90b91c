use std::fs;
use std::path::Path;

use modprime_lib::config::RuntimeConfig;
use modprime_lib::pipeline::{Op, Recipe, Source};

/// Default configuration with templates read from the crate's own
/// `templates/` directory.
pub fn test_config() -> RuntimeConfig {
  let mut config = RuntimeConfig::default();
  config.codegen.templates_dir = Some(concat!(env!("CARGO_MANIFEST_DIR"), "/templates").into());
  config
}

pub fn write(root: &Path, rel: &str, contents: &str) {
  let path = root.join(rel);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(path, contents).unwrap();
}

pub fn entrypoint(recipe: &Recipe) -> Option<&[String]> {
  recipe.ops().iter().rev().find_map(|op| match op {
    Op::Entrypoint { args } => Some(args.as_slice()),
    _ => None,
  })
}

/// The source of the last mount at `path`.
pub fn mount_at<'a>(recipe: &'a Recipe, path: &str) -> Option<&'a Source> {
  recipe.ops().iter().rev().find_map(|op| match op {
    Op::Mount { path: p, source, .. } if p == path => Some(source),
    _ => None,
  })
}
