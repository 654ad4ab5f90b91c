//! Tests for `runtime::module_runtime`.

use modprime_lib::module::ModuleSource;
use modprime_lib::pipeline::scripted::{CallKind, ExecOutcome, ScriptedEngine};
use modprime_lib::pipeline::{PipelineError, Source};
use modprime_lib::runtime::{RuntimeError, finalize, module_runtime};
use tempfile::TempDir;

use super::common::{entrypoint, mount_at, test_config, write};

fn probe_args() -> Vec<String> {
  test_config().commands.probe
}

fn compile_args(target: &str) -> Vec<String> {
  let config = test_config();
  let mut args = config.compiler.command.clone();
  args.push(target.to_string());
  args.extend(config.compiler.flags.iter().cloned());
  args
}

mod ready {
  use super::*;

  #[tokio::test]
  async fn ready_module_gets_invoker_entrypoint() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "Foo.dll", "");
    let config = test_config();
    let engine = ScriptedEngine::new().on_exec(&probe_args(), ExecOutcome::code(0));
    let module = ModuleSource::new(temp.path(), "", "Foo");

    let recipe = module_runtime(&engine, &config, &module).await.unwrap();

    assert_eq!(entrypoint(&recipe), Some(config.commands.invoker.as_slice()));
    assert!(!engine.ran("dotnet"), "a ready module must not be compiled");
    assert_eq!(engine.forced().len(), 1);
  }

  #[tokio::test]
  async fn priming_twice_gives_the_same_recipe() {
    let temp = TempDir::new().unwrap();
    let config = test_config();
    let engine = ScriptedEngine::new().on_exec(&probe_args(), ExecOutcome::code(0));
    let module = ModuleSource::new(temp.path(), "mods/foo", "Foo");

    let first = module_runtime(&engine, &config, &module).await.unwrap();
    let second = module_runtime(&engine, &config, &module).await.unwrap();

    assert_eq!(first, second);
  }
}

mod not_found {
  use super::*;

  #[tokio::test]
  async fn empty_directory_yields_noop_entrypoint() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir(temp.path().join("foo")).unwrap();
    let engine = ScriptedEngine::new().on_exec(&probe_args(), ExecOutcome::code(120));
    let module = ModuleSource::new(temp.path(), "foo", "Foo");

    let recipe = module_runtime(&engine, &test_config(), &module).await.unwrap();

    assert_eq!(entrypoint(&recipe), Some(&[][..]));
    assert!(!engine.ran("dotnet"));
  }

  #[tokio::test]
  async fn missing_directory_yields_noop_entrypoint() {
    let temp = TempDir::new().unwrap();
    let engine = ScriptedEngine::new().on_exec(&probe_args(), ExecOutcome::code(120));
    let module = ModuleSource::new(temp.path(), "does/not/exist", "Foo");

    let recipe = module_runtime(&engine, &test_config(), &module).await.unwrap();

    assert_eq!(entrypoint(&recipe), Some(&[][..]));
  }

  #[tokio::test]
  async fn populated_directory_without_project_fails() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "dotnet/foo/README.md", "hello");
    let engine = ScriptedEngine::new().on_exec(&probe_args(), ExecOutcome::code(120));
    let module = ModuleSource::new(temp.path(), "dotnet/foo", "Foo");

    let err = module_runtime(&engine, &test_config(), &module).await.unwrap_err();

    match err {
      RuntimeError::ProjectNotFound { subpath, module } => {
        assert_eq!(subpath, "dotnet/foo");
        assert_eq!(module, "Foo");
      }
      other => panic!("expected ProjectNotFound, got {:?}", other),
    }
    assert!(!engine.ran("dotnet"));
  }
}

mod protocol {
  use super::*;

  #[tokio::test]
  async fn unrecognised_codes_are_violations() {
    for code in [1, 99, 123, 200] {
      let temp = TempDir::new().unwrap();
      let engine = ScriptedEngine::new().on_exec(&probe_args(), ExecOutcome::code(code).with_stdout("boom"));
      let module = ModuleSource::new(temp.path(), "", "Foo");

      let err = module_runtime(&engine, &test_config(), &module).await.unwrap_err();

      match err {
        RuntimeError::DiscoveryProtocolViolation {
          code: got,
          module,
          output,
          ..
        } => {
          assert_eq!(got, code);
          assert_eq!(module, "Foo");
          assert_eq!(output, "boom");
        }
        other => panic!("code {}: expected violation, got {:?}", code, other),
      }
      assert!(!engine.ran("dotnet"), "code {} must not compile", code);
    }
  }

  #[tokio::test]
  async fn custom_exit_codes_are_honoured() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config();
    config.exit_codes.not_found = 40;
    let engine = ScriptedEngine::new().on_exec(&probe_args(), ExecOutcome::code(40));
    let module = ModuleSource::new(temp.path(), "", "Foo");

    let recipe = module_runtime(&engine, &config, &module).await.unwrap();
    assert_eq!(entrypoint(&recipe), Some(&[][..]));
  }
}

mod compile {
  use super::*;

  #[tokio::test]
  async fn same_folder_compiles_then_reprobes() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "foo/Foo.csproj", "<Project/>");
    let config = test_config();
    let engine = ScriptedEngine::new()
      .on_exec(&probe_args(), ExecOutcome::code(121))
      .on_exec(&probe_args(), ExecOutcome::code(0));
    let module = ModuleSource::new(temp.path(), "foo", "Foo");

    let recipe = module_runtime(&engine, &config, &module).await.unwrap();

    assert_eq!(entrypoint(&recipe), Some(config.commands.invoker.as_slice()));
    let forced = engine.forced();
    assert_eq!(forced.len(), 3);
    assert_eq!(forced[0], probe_args());
    assert_eq!(forced[1], compile_args("."));
    assert_eq!(forced[2], probe_args());

    match mount_at(&recipe, &config.paths.module) {
      Some(Source::Recipe { recipe: compiled, path }) => {
        assert_eq!(path, &config.paths.workdir);
        assert_eq!(compiled.last_exec().unwrap().0, compile_args(".").as_slice());
      }
      other => panic!("expected compiled tree at /Module, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn sub_folder_targets_module_name() {
    let temp = TempDir::new().unwrap();
    let engine = ScriptedEngine::new()
      .on_exec(&probe_args(), ExecOutcome::code(122))
      .on_exec(&probe_args(), ExecOutcome::code(0));
    let module = ModuleSource::new(temp.path(), "", "Foo");

    module_runtime(&engine, &test_config(), &module).await.unwrap();

    assert!(engine.forced().contains(&compile_args("Foo")));
  }

  #[tokio::test]
  async fn compile_failure_reports_compiler_output() {
    let temp = TempDir::new().unwrap();
    let engine = ScriptedEngine::new()
      .on_exec(&probe_args(), ExecOutcome::code(121))
      .on_exec(&compile_args("."), ExecOutcome::code(1).with_stderr("error CS1002: ; expected"));
    let module = ModuleSource::new(temp.path(), "foo", "Foo");

    let err = module_runtime(&engine, &test_config(), &module).await.unwrap_err();

    match err {
      RuntimeError::CompileFailed {
        module,
        subpath,
        code,
        output,
      } => {
        assert_eq!(module, "Foo");
        assert_eq!(subpath, "foo");
        assert_eq!(code, 1);
        assert!(output.contains("CS1002"));
      }
      other => panic!("expected CompileFailed, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn failed_reprobe_is_a_violation() {
    let temp = TempDir::new().unwrap();
    let engine = ScriptedEngine::new()
      .on_exec(&probe_args(), ExecOutcome::code(121))
      .on_exec(&probe_args(), ExecOutcome::code(120).with_stderr("still no assembly"));
    let module = ModuleSource::new(temp.path(), "", "Foo");

    let err = module_runtime(&engine, &test_config(), &module).await.unwrap_err();

    match err {
      RuntimeError::DiscoveryProtocolViolation { code, output, .. } => {
        assert_eq!(code, 120);
        assert_eq!(output, "still no assembly");
      }
      other => panic!("expected violation, got {:?}", other),
    }
  }
}

mod cancellation {
  use super::*;

  #[tokio::test]
  async fn cancelled_exit_code_stops_priming() {
    let temp = TempDir::new().unwrap();
    let engine = ScriptedEngine::new()
      .on_exec(&probe_args(), ExecOutcome::code(121))
      .cancel_on(CallKind::ExitCode);
    let module = ModuleSource::new(temp.path(), "", "Foo");

    let err = module_runtime(&engine, &test_config(), &module).await.unwrap_err();

    assert!(err.is_cancelled());
    assert!(!engine.ran("dotnet"));
  }

  #[tokio::test]
  async fn cancelled_listing_is_not_a_noop() {
    let temp = TempDir::new().unwrap();
    let engine = ScriptedEngine::new()
      .on_exec(&probe_args(), ExecOutcome::code(120))
      .cancel_on(CallKind::Entries);
    let module = ModuleSource::new(temp.path(), "does/not/exist", "Foo");

    let err = module_runtime(&engine, &test_config(), &module).await.unwrap_err();

    assert!(err.is_cancelled());
  }

  #[tokio::test]
  async fn cancelled_compile_is_not_a_compile_failure() {
    let temp = TempDir::new().unwrap();
    let engine = ScriptedEngine::new()
      .on_exec(&probe_args(), ExecOutcome::code(121))
      .cancel_on(CallKind::Stdout);
    let module = ModuleSource::new(temp.path(), "foo", "Foo");

    let err = module_runtime(&engine, &test_config(), &module).await.unwrap_err();

    assert!(err.is_cancelled(), "expected cancellation, got {:?}", err);
    assert_eq!(engine.forced(), vec![probe_args(), compile_args(".")]);
  }
}

#[test]
fn finalize_is_pure() {
  let config = test_config();
  let module = ModuleSource::new("/ctx", "", "Foo");
  let primed = modprime_lib::runtime::bootstrap(&config, &module);
  assert_eq!(finalize(&config, &primed), finalize(&config, &primed));
}

#[test]
fn cancelled_is_recognised() {
  let err = RuntimeError::from(PipelineError::Cancelled);
  assert!(err.is_cancelled());
}
