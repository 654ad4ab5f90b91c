//! Classifying what already exists at the module location.

use tracing::warn;

use super::types::{CodegenError, ProjectDescriptor};
use crate::pipeline::{Engine, PipelineError, Source, join_subpath};
use crate::probe::discover::LayoutConfig;

impl ProjectDescriptor {
  /// Classify a directory listing. `sub_entries` is the listing of the
  /// module-named subfolder, when there is one.
  ///
  /// First match wins: an assembly, then `<name>.csproj` in place, then
  /// `<name>/<name>.csproj`, then a solution in `<name>/`.
  pub fn classify(entries: &[String], name: &str, sub_entries: Option<&[String]>, layout: &LayoutConfig) -> Self {
    let assembly = layout.assembly_file(name);
    let namespaced = format!(".{}", assembly);
    let project = layout.project_file(name);

    let files: Vec<&str> = entries.iter().filter(|e| !e.ends_with('/')).map(String::as_str).collect();

    if files.iter().any(|f| *f == assembly || f.ends_with(&namespaced)) {
      return ProjectDescriptor::HasCompiledAssembly;
    }
    if files.contains(&project.as_str()) {
      return ProjectDescriptor::HasProjectFileAtPath(String::new());
    }

    let Some(sub_entries) = sub_entries else {
      return ProjectDescriptor::Absent;
    };
    let sub_files = || sub_entries.iter().filter(|e| !e.ends_with('/'));

    if sub_files().any(|f| *f == project) {
      return ProjectDescriptor::HasProjectFileAtPath(name.to_string());
    }
    if sub_files().any(|f| layout.is_solution_file(f)) {
      return ProjectDescriptor::HasNamedSubfolderWithSolution;
    }
    ProjectDescriptor::Absent
  }
}

/// Whether the listing holds a subfolder called `name`.
fn has_subfolder(entries: &[String], name: &str) -> bool {
  entries.iter().any(|e| e.strip_suffix('/') == Some(name))
}

/// List `subpath` of `context` and classify it.
///
/// Listing failures are treated as "nothing there". Only cancellation is
/// propagated.
pub async fn scan_descriptor<E: Engine>(
  engine: &E,
  context: &Source,
  subpath: &str,
  name: &str,
  layout: &LayoutConfig,
) -> Result<ProjectDescriptor, CodegenError> {
  let entries = match engine.entries(context, subpath).await {
    Ok(entries) => entries,
    Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled.into()),
    Err(e) => {
      warn!(subpath = %subpath, error = %e, "could not list module directory, assuming it is empty");
      return Ok(ProjectDescriptor::Absent);
    }
  };

  let sub_entries = if has_subfolder(&entries, name) {
    let sub = join_subpath(subpath, name);
    let sub = sub.trim_start_matches('/');
    match engine.entries(context, sub).await {
      Ok(sub_entries) => Some(sub_entries),
      Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled.into()),
      Err(e) => {
        warn!(path = %sub, error = %e, "could not list module subfolder");
        None
      }
    }
  } else {
    None
  };

  Ok(ProjectDescriptor::classify(&entries, name, sub_entries.as_deref(), layout))
}
