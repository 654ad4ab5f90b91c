//! Tests for `codegen::codegen` and `CodegenArtifact::materialize`.

use std::fs;

use modprime_lib::codegen::{BUILD_BYPRODUCTS, CodegenError, ProjectDescriptor, codegen, generator_recipe};
use modprime_lib::config::RuntimeConfig;
use modprime_lib::module::ModuleSource;
use modprime_lib::pipeline::PipelineError;
use modprime_lib::pipeline::scripted::{CallKind, ScriptedEngine};
use serial_test::serial;
use tempfile::TempDir;

use super::common::{test_config, write};

const INTROSPECTION: &str = r#"{"types":[]}"#;

const PINNED: &str = "<Project Sdk=\"Microsoft.NET.Sdk\">\n  <ItemGroup>\n    \
                      <PackageReference Include=\"Modprime.Client\" Version=\"1.0.0.0\" />\n  \
                      </ItemGroup>\n</Project>\n";

#[tokio::test]
async fn generated_tree_is_independent_of_module_identity() {
  let a = TempDir::new().unwrap();
  let b = TempDir::new().unwrap();
  let config = test_config();
  let engine = ScriptedEngine::new();

  let first = codegen(&engine, &config, &ModuleSource::new(a.path(), "", "Foo"), INTROSPECTION)
    .await
    .unwrap();
  let second = codegen(&engine, &config, &ModuleSource::new(b.path(), "x/y", "Bar"), INTROSPECTION)
    .await
    .unwrap();

  assert_eq!(first.generated, second.generated);
  assert!(engine.forced().is_empty(), "codegen must not force the generator");
}

#[tokio::test]
async fn empty_module_gets_template_project() {
  let temp = TempDir::new().unwrap();
  let mut config = test_config();
  config.release_version = "9.9.9.9".to_string();
  let engine = ScriptedEngine::new();
  let module = ModuleSource::new(temp.path(), "dotnet/foo", "Foo");

  let artifact = codegen(&engine, &config, &module, INTROSPECTION).await.unwrap();

  assert_eq!(artifact.descriptor, ProjectDescriptor::Absent);
  assert_eq!(artifact.generated_dir, "dotnet/foo");
  let project = &artifact.files["dotnet/foo/Foo.csproj"];
  assert!(project.contains("<AssemblyName>Foo</AssemblyName>"));
  assert!(project.contains(r#"Version="9.9.9.9""#));
  assert!(artifact.files.contains_key("dotnet/foo/Module.cs"));
}

#[tokio::test]
async fn existing_project_is_repinned_byte_for_byte() {
  let temp = TempDir::new().unwrap();
  write(temp.path(), "Foo.csproj", PINNED);
  let mut config = test_config();
  config.release_version = "9.9.9.9".to_string();
  let engine = ScriptedEngine::new();
  let module = ModuleSource::new(temp.path(), "", "Foo");

  let artifact = codegen(&engine, &config, &module, INTROSPECTION).await.unwrap();

  assert_eq!(artifact.descriptor, ProjectDescriptor::HasProjectFileAtPath(String::new()));
  assert_eq!(artifact.files.len(), 1);
  assert_eq!(artifact.files["Foo.csproj"], PINNED.replace("1.0.0.0", "9.9.9.9"));
}

#[tokio::test]
async fn project_in_named_subfolder_is_repinned() {
  let temp = TempDir::new().unwrap();
  write(temp.path(), "mods/Foo/Foo.csproj", PINNED);
  let config = test_config();
  let engine = ScriptedEngine::new();
  let module = ModuleSource::new(temp.path(), "mods", "Foo");

  let artifact = codegen(&engine, &config, &module, INTROSPECTION).await.unwrap();

  assert_eq!(artifact.descriptor, ProjectDescriptor::HasProjectFileAtPath("Foo".to_string()));
  let patched = &artifact.files["mods/Foo/Foo.csproj"];
  assert!(patched.contains(&format!("Version=\"{}\"", config.release_version)));
}

#[tokio::test]
async fn compiled_module_is_left_alone() {
  let temp = TempDir::new().unwrap();
  write(temp.path(), "Foo.dll", "MZ");
  write(temp.path(), "Foo.csproj", PINNED);
  let engine = ScriptedEngine::new();
  let module = ModuleSource::new(temp.path(), "", "Foo");

  let artifact = codegen(&engine, &test_config(), &module, INTROSPECTION).await.unwrap();

  assert_eq!(artifact.descriptor, ProjectDescriptor::HasCompiledAssembly);
  assert!(artifact.files.is_empty());
}

#[tokio::test]
async fn split_layout_places_sources_in_libraries() {
  let temp = TempDir::new().unwrap();
  let mut config = test_config();
  config.codegen.split_layout = true;
  let engine = ScriptedEngine::new();
  let module = ModuleSource::new(temp.path(), "foo", "Foo");

  let artifact = codegen(&engine, &config, &module, INTROSPECTION).await.unwrap();

  assert_eq!(artifact.generated_dir, "foo/Libraries");
  assert!(artifact.files.contains_key("foo/Foo.csproj"));
}

#[tokio::test]
async fn missing_templates_are_reported() {
  let temp = TempDir::new().unwrap();
  let templates = TempDir::new().unwrap();
  let mut config = test_config();
  config.codegen.templates_dir = Some(templates.path().to_path_buf());
  let engine = ScriptedEngine::new();

  let err = codegen(&engine, &config, &ModuleSource::new(temp.path(), "", "Foo"), INTROSPECTION)
    .await
    .unwrap_err();

  assert!(matches!(err, CodegenError::TemplateUnavailable { .. }));
}

#[test]
#[serial]
#[cfg(not(windows))]
fn default_config_uses_builtin_templates() {
  let temp = TempDir::new().unwrap();
  let data = TempDir::new().unwrap();
  let config = RuntimeConfig::default();
  let engine = ScriptedEngine::new();
  let module = ModuleSource::new(temp.path(), "", "Foo");
  let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

  let artifact = temp_env::with_var("XDG_DATA_HOME", Some(data.path()), || {
    rt.block_on(codegen(&engine, &config, &module, INTROSPECTION))
  })
  .unwrap();

  assert!(artifact.files["Foo.csproj"].contains("<AssemblyName>Foo</AssemblyName>"));
  assert!(artifact.files.contains_key(&config.codegen.support_file));
}

#[tokio::test]
async fn configured_ignores_extend_build_byproducts() {
  let temp = TempDir::new().unwrap();
  let mut config = test_config();
  config.codegen.vcs_ignored = vec!["*.log".to_string()];
  let engine = ScriptedEngine::new();

  let artifact = codegen(&engine, &config, &ModuleSource::new(temp.path(), "", "Foo"), INTROSPECTION)
    .await
    .unwrap();

  assert_eq!(artifact.vcs_ignored[..3], BUILD_BYPRODUCTS);
  assert_eq!(artifact.vcs_ignored.last().map(String::as_str), Some("*.log"));
}

#[tokio::test]
async fn cancelled_scan_stops_codegen() {
  let temp = TempDir::new().unwrap();
  write(temp.path(), "Foo.csproj", PINNED);
  let engine = ScriptedEngine::new().cancel_on(CallKind::Entries);

  let err = codegen(&engine, &test_config(), &ModuleSource::new(temp.path(), "", "Foo"), INTROSPECTION)
    .await
    .unwrap_err();

  assert!(matches!(err, CodegenError::Pipeline(PipelineError::Cancelled)));
  assert!(engine.calls().iter().all(|c| c.kind != CallKind::Contents));
}

#[tokio::test]
async fn cancelled_project_read_stops_codegen() {
  let temp = TempDir::new().unwrap();
  write(temp.path(), "Foo.csproj", PINNED);
  let engine = ScriptedEngine::new().cancel_on(CallKind::Contents);

  let err = codegen(&engine, &test_config(), &ModuleSource::new(temp.path(), "", "Foo"), INTROSPECTION)
    .await
    .unwrap_err();

  assert!(matches!(err, CodegenError::Pipeline(PipelineError::Cancelled)));
}

#[tokio::test]
async fn materialize_writes_generated_and_project_files() {
  let context = TempDir::new().unwrap();
  let dest = TempDir::new().unwrap();
  let config = test_config();
  let engine = ScriptedEngine::new().with_output(&config.commands.generator, [("Client.g.cs", "// generated")]);
  let module = ModuleSource::new(context.path(), "foo", "Foo");

  let artifact = codegen(&engine, &config, &module, INTROSPECTION).await.unwrap();
  artifact.materialize(&engine, dest.path()).await.unwrap();

  assert_eq!(
    fs::read_to_string(dest.path().join("foo/Client.g.cs")).unwrap(),
    "// generated"
  );
  assert!(dest.path().join("foo/Foo.csproj").exists());
  assert!(dest.path().join("foo/Module.cs").exists());
  assert!(engine.ran(&config.commands.generator[0]));
}

#[test]
fn generator_recipe_depends_on_introspection() {
  let config = test_config();
  assert_ne!(generator_recipe(&config, "{}"), generator_recipe(&config, INTROSPECTION));
}
