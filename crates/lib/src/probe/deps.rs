//! Dependency manifests.
//!
//! Every built assembly ships a `<name>.deps.json` describing the libraries it
//! was compiled against. The probe extracts the `package` entries and
//! restores them from the package store ahead of invocation.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use super::ProbeError;
use super::discover::LayoutConfig;
use crate::pipeline::host;

#[derive(Debug, Default, Deserialize)]
struct DepsFile {
  #[serde(default)]
  libraries: BTreeMap<String, Library>,
}

#[derive(Debug, Deserialize)]
struct Library {
  #[serde(rename = "type")]
  kind: String,
}

/// The dependency manifest that sits next to `assembly`.
pub fn manifest_path(assembly: &Path, layout: &LayoutConfig) -> PathBuf {
  let stem = assembly
    .file_name()
    .map(|n| n.to_string_lossy().to_string())
    .unwrap_or_default();
  let stem = stem
    .strip_suffix(&format!(".{}", layout.assembly_extension))
    .unwrap_or(&stem);
  assembly.with_file_name(format!("{}.{}", stem, layout.deps_suffix))
}

/// Package dependencies (`Name/Version`) listed in a manifest, sorted.
pub fn parse(path: &Path) -> Result<Vec<String>, ProbeError> {
  let contents = fs::read_to_string(path).map_err(|e| ProbeError::Read {
    path: path.to_path_buf(),
    source: e,
  })?;
  let deps: DepsFile = serde_json::from_str(&contents).map_err(|e| ProbeError::Deps {
    path: path.to_path_buf(),
    source: e,
  })?;

  Ok(
    deps
      .libraries
      .into_iter()
      .filter(|(_, lib)| lib.kind == "package")
      .map(|(id, _)| id)
      .collect(),
  )
}

/// Dependencies of a located assembly. A missing manifest means none.
pub fn collect_for_assembly(assembly: &Path, layout: &LayoutConfig) -> Result<Vec<String>, ProbeError> {
  let manifest = manifest_path(assembly, layout);
  if !manifest.is_file() {
    debug!(manifest = %manifest.display(), "no dependency manifest");
    return Ok(Vec::new());
  }
  parse(&manifest)
}

/// Union of the dependencies of every manifest directly inside `dir`.
pub fn collect_dir(dir: &Path, layout: &LayoutConfig) -> Result<Vec<String>, ProbeError> {
  let read_err = |e| ProbeError::Read {
    path: dir.to_path_buf(),
    source: e,
  };
  let suffix = format!(".{}", layout.deps_suffix);

  let mut all = BTreeSet::new();
  for entry in fs::read_dir(dir).map_err(read_err)? {
    let path = entry.map_err(read_err)?.path();
    let is_manifest = path
      .file_name()
      .is_some_and(|n| n.to_string_lossy().ends_with(&suffix));
    if is_manifest && path.is_file() {
      all.extend(parse(&path)?);
    }
  }
  Ok(all.into_iter().collect())
}

/// Packages handled by [`restore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
  pub restored: Vec<String>,
  pub missing: Vec<String>,
}

/// Copy each `Name/Version` dependency out of the package store at
/// `packages` into `dest`, keeping the store's lowercase `<id>/<version>`
/// layout. Packages absent from the store are reported, not fatal.
pub fn restore(dependencies: &[String], packages: &Path, dest: &Path) -> Result<RestoreReport, ProbeError> {
  let mut report = RestoreReport::default();

  for dependency in dependencies {
    let Some(rel) = package_dir(dependency) else {
      warn!(dependency = %dependency, "malformed package id");
      report.missing.push(dependency.clone());
      continue;
    };

    let src = packages.join(&rel);
    if !src.is_dir() {
      warn!(dependency = %dependency, store = %packages.display(), "package is not in the store");
      report.missing.push(dependency.clone());
      continue;
    }

    let target = dest.join(&rel);
    host::copy_tree(&src, &target).map_err(|e| ProbeError::Write {
      path: target.clone(),
      source: e,
    })?;
    debug!(dependency = %dependency, target = %target.display(), "restored package");
    report.restored.push(dependency.clone());
  }

  Ok(report)
}

/// Store-relative directory of a `Name/Version` package id.
fn package_dir(dependency: &str) -> Option<PathBuf> {
  let (id, version) = dependency.split_once('/')?;
  let valid = |part: &str| !part.is_empty() && part != "." && part != ".." && !part.contains(['/', '\\']);
  if !valid(id) || !valid(version) {
    return None;
  }
  Some(Path::new(&id.to_lowercase()).join(version.to_lowercase()))
}
