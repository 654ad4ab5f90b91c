//! Locating a module's compiled assembly or project file.
//!
//! Build output is searched under
//! `[<name>/]bin/(Debug|Release)/net<N>.0/[linux-<arch>/][<Namespace>.]<name>.dll`.
//! When several builds exist, candidates are ranked by:
//!
//! 1. write time, when two builds differ by more than ten seconds,
//! 2. framework version: the current major first, then older, then newer,
//! 3. the debug/release preference,
//! 4. platform-specific builds over platform-agnostic ones.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ProbeError;
use crate::platform::linux_runtime_dir;

/// Builds closer together than this are considered simultaneous.
const TIMESTAMP_TOLERANCE: Duration = Duration::from_secs(10);

const BUILD_CONFIGURATIONS: [(&str, bool); 2] = [("Debug", true), ("Release", false)];

/// File-naming conventions of the module toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
  pub project_extension: String,
  pub assembly_extension: String,
  pub solution_extension: String,
  /// Suffix replacing the assembly extension to name its dependency manifest.
  pub deps_suffix: String,
  /// Framework major version the runtime images ship.
  pub framework_major: u32,
}

impl Default for LayoutConfig {
  fn default() -> Self {
    Self {
      project_extension: "csproj".to_string(),
      assembly_extension: "dll".to_string(),
      solution_extension: "sln".to_string(),
      deps_suffix: "deps.json".to_string(),
      framework_major: 8,
    }
  }
}

impl LayoutConfig {
  pub fn assembly_file(&self, name: &str) -> String {
    format!("{}.{}", name, self.assembly_extension)
  }

  pub fn project_file(&self, name: &str) -> String {
    format!("{}.{}", name, self.project_extension)
  }

  pub fn is_project_file(&self, file_name: &str) -> bool {
    has_extension(file_name, &self.project_extension)
  }

  pub fn is_solution_file(&self, file_name: &str) -> bool {
    has_extension(file_name, &self.solution_extension)
  }
}

fn has_extension(file_name: &str, extension: &str) -> bool {
  file_name
    .rsplit_once('.')
    .is_some_and(|(stem, ext)| !stem.is_empty() && ext == extension)
}

/// Ranking preferences for one probe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbePreferences {
  pub framework_major: u32,
  pub prefer_release: bool,
  /// Whether the release preference was stated explicitly.
  pub manual: bool,
  /// Platform-specific build directory for this architecture, e.g. `linux-x64`.
  pub runtime_dir: Option<String>,
}

impl ProbePreferences {
  pub fn detect(layout: &LayoutConfig, prefer_release: Option<bool>) -> Self {
    Self {
      framework_major: layout.framework_major,
      prefer_release: prefer_release.unwrap_or(false),
      manual: prefer_release.is_some(),
      runtime_dir: linux_runtime_dir(),
    }
  }
}

/// Parse a release preference value. Unrecognised values are ignored with a
/// warning.
pub fn parse_preference(value: &str) -> Option<bool> {
  match value.to_ascii_lowercase().as_str() {
    "true" | "1" | "yes" => Some(true),
    "false" | "0" | "no" => Some(false),
    _ => {
      warn!(value = %value, "did not understand release preference value");
      None
    }
  }
}

/// The result of inspecting a module source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
  Assembly(PathBuf),
  ProjectSameFolder,
  ProjectSubFolder,
  NotFound,
}

/// Inspect `source` for module `name`.
///
/// A compiled assembly wins over project files. Project files are looked for
/// directly in `source` (`<name>.<ext>`, or any single project file) and then
/// in the `<name>/` subfolder. A `source` that does not exist yet holds
/// nothing.
pub fn discover(
  name: &str,
  source: &Path,
  layout: &LayoutConfig,
  prefs: &ProbePreferences,
) -> Result<Discovery, ProbeError> {
  if !source.is_dir() {
    debug!(source = %source.display(), "module source does not exist");
    return Ok(Discovery::NotFound);
  }

  if let Some(assembly) = locate_assembly(name, source, layout, prefs)? {
    return Ok(Discovery::Assembly(assembly));
  }

  if has_project(source, name, layout)? {
    return Ok(Discovery::ProjectSameFolder);
  }

  let sub = source.join(name);
  if sub.is_dir() && has_project(&sub, name, layout)? {
    return Ok(Discovery::ProjectSubFolder);
  }

  Ok(Discovery::NotFound)
}

fn has_project(dir: &Path, name: &str, layout: &LayoutConfig) -> Result<bool, ProbeError> {
  if dir.join(layout.project_file(name)).is_file() {
    return Ok(true);
  }
  Ok(
    list_files(dir)?
      .iter()
      .any(|f| layout.is_project_file(&file_name(f))),
  )
}

/// A build directory that contains the module assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
  pub path: PathBuf,
  pub debug: bool,
  pub framework: u32,
  pub platform_specific: bool,
  pub modified: SystemTime,
}

impl Candidate {
  /// `Less` when `self` should be preferred over `other`.
  pub fn preference(&self, other: &Candidate, prefs: &ProbePreferences) -> Ordering {
    if newer_by(self.modified, other.modified) > TIMESTAMP_TOLERANCE {
      return Ordering::Less;
    }
    if newer_by(other.modified, self.modified) > TIMESTAMP_TOLERANCE {
      return Ordering::Greater;
    }

    let rank = framework_rank(self.framework, prefs.framework_major)
      .cmp(&framework_rank(other.framework, prefs.framework_major));
    if rank != Ordering::Equal {
      return rank;
    }

    if self.debug != other.debug {
      return if self.debug != prefs.prefer_release {
        Ordering::Less
      } else {
        Ordering::Greater
      };
    }

    if self.platform_specific != other.platform_specific {
      return if self.platform_specific {
        Ordering::Less
      } else {
        Ordering::Greater
      };
    }

    Ordering::Equal
  }
}

fn newer_by(a: SystemTime, b: SystemTime) -> Duration {
  a.duration_since(b).unwrap_or(Duration::ZERO)
}

/// Current version ranks 0, older versions count up towards it, newer versions
/// rank by their own number so they always come after every older one.
fn framework_rank(version: u32, current: u32) -> u32 {
  if version > current {
    version
  } else {
    current - version
  }
}

/// Find the module's compiled assembly under `source`, if any.
pub fn locate_assembly(
  name: &str,
  source: &Path,
  layout: &LayoutConfig,
  prefs: &ProbePreferences,
) -> Result<Option<PathBuf>, ProbeError> {
  let Some(bin) = build_root(name, source) else {
    return find_assembly_in(source, name, layout);
  };

  let candidates = collect_candidates(&bin, name, layout, prefs)?;
  if candidates.is_empty() {
    debug!(
      bin = %bin.display(),
      "no build found, expected (Debug|Release)/net{}.0/[{}/][Namespace.]{}",
      prefs.framework_major,
      prefs.runtime_dir.as_deref().unwrap_or("linux-<arch>"),
      layout.assembly_file(name)
    );
    return Ok(None);
  }

  let selected = select(&candidates, prefs);
  report_ambiguity(selected, &candidates, prefs);
  Ok(Some(selected.path.clone()))
}

fn build_root(name: &str, source: &Path) -> Option<PathBuf> {
  [source.join(name).join("bin"), source.join("bin")]
    .into_iter()
    .find(|p| p.is_dir())
}

/// First candidate not beaten by any later one. The time rule is not
/// transitive, so this is a scan rather than a sort.
fn select<'c>(candidates: &'c [Candidate], prefs: &ProbePreferences) -> &'c Candidate {
  let mut best = &candidates[0];
  for candidate in &candidates[1..] {
    if candidate.preference(best, prefs) == Ordering::Less {
      best = candidate;
    }
  }
  best
}

fn report_ambiguity(selected: &Candidate, candidates: &[Candidate], prefs: &ProbePreferences) {
  let others = candidates.iter().filter(|c| !std::ptr::eq(*c, selected));

  if prefs.manual && selected.debug == prefs.prefer_release {
    let beaten = others.clone().find(|c| c.debug != selected.debug);
    warn!(
      selected = %selected.path.display(),
      over = ?beaten.map(|c| c.path.display().to_string()),
      "selected {} build despite {} preference; timestamp or framework version decided",
      if selected.debug { "debug" } else { "release" },
      if prefs.prefer_release { "release" } else { "debug" },
    );
    return;
  }

  let mixed_versions = others.clone().any(|c| c.framework != selected.framework);
  let mixed_platforms = others.clone().any(|c| c.platform_specific != selected.platform_specific);
  if mixed_versions {
    warn!("bin directory contains builds for multiple framework versions");
  }
  if mixed_platforms {
    warn!("bin directory contains both Linux and platform-agnostic builds");
  }
  if mixed_versions || mixed_platforms {
    warn!("consider deleting old builds to reduce disk usage");
  }
}

fn collect_candidates(
  bin: &Path,
  name: &str,
  layout: &LayoutConfig,
  prefs: &ProbePreferences,
) -> Result<Vec<Candidate>, ProbeError> {
  let mut candidates = Vec::new();

  for (configuration, debug) in BUILD_CONFIGURATIONS {
    let config_dir = bin.join(configuration);
    if !config_dir.is_dir() {
      continue;
    }

    for build_dir in list_dirs(&config_dir)? {
      let Some(framework) = parse_framework_dir(&file_name(&build_dir)) else {
        continue;
      };

      let sub_dirs = prefs
        .runtime_dir
        .iter()
        .map(|rid| (build_dir.join(rid), true))
        .chain(std::iter::once((build_dir.clone(), false)));

      for (dir, platform_specific) in sub_dirs {
        if !dir.is_dir() {
          continue;
        }
        let Some(path) = find_assembly_in(&dir, name, layout)? else {
          continue;
        };
        let modified = fs::metadata(&path)
          .and_then(|m| m.modified())
          .unwrap_or(SystemTime::UNIX_EPOCH);

        candidates.push(Candidate {
          path,
          debug,
          framework,
          platform_specific,
          modified,
        });
      }
    }
  }

  Ok(candidates)
}

/// `net8.0` -> 8. Anything not shaped like `net<N>.0` is skipped.
fn parse_framework_dir(dir_name: &str) -> Option<u32> {
  let rest = dir_name.strip_prefix("net")?;
  let major = rest.strip_suffix(".0")?;
  major.parse().ok()
}

/// `<name>.dll`, falling back to the first `*.<name>.dll` by file name.
fn find_assembly_in(dir: &Path, name: &str, layout: &LayoutConfig) -> Result<Option<PathBuf>, ProbeError> {
  let exact = dir.join(layout.assembly_file(name));
  if exact.is_file() {
    return Ok(Some(exact));
  }

  let suffix = format!(".{}", layout.assembly_file(name));
  Ok(
    list_files(dir)?
      .into_iter()
      .find(|f| file_name(f).ends_with(&suffix)),
  )
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>, ProbeError> {
  list(dir, |ft| ft.is_file())
}

fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>, ProbeError> {
  list(dir, |ft| ft.is_dir())
}

fn list(dir: &Path, keep: impl Fn(&fs::FileType) -> bool) -> Result<Vec<PathBuf>, ProbeError> {
  let read_err = |e| ProbeError::Read {
    path: dir.to_path_buf(),
    source: e,
  };

  let mut paths = Vec::new();
  for entry in fs::read_dir(dir).map_err(read_err)? {
    let entry = entry.map_err(read_err)?;
    if keep(&entry.file_type().map_err(read_err)?) {
      paths.push(entry.path());
    }
  }
  paths.sort();
  Ok(paths)
}

fn file_name(path: &Path) -> String {
  path
    .file_name()
    .map(|n| n.to_string_lossy().to_string())
    .unwrap_or_default()
}
