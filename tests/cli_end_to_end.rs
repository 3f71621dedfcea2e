#![cfg(unix)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::TempDir;

/// Concatenates the entry module into the output file, or fails like a
/// compiler rejecting the sources when `BROKEN` exists next to the manifest.
const FAKE_COMPILER: &str = r#"#!/bin/sh
set -eu
entry="$1"
out="$4"
if [ -f ../../BROKEN ]; then
  echo "I cannot find module 'Shared.Layout'" >&2
  exit 1
fi
printf '// compiled\n' > "$out"
cat "$entry" >> "$out"
"#;

const FAKE_WORKER: &str = r#"#!/bin/sh
echo '{"ports":["getView","receiveHtml"]}'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -E 's/.*"id":([0-9]+).*/\1/')
  name=$(printf '%s' "$line" | sed -E 's/.*"viewName":"([^"]*)".*/\1/')
  case "$name" in
    UsersView) printf '{"id":%s,"html":"<ul><li>Ada</li></ul>"}\n' "$id" ;;
    *) printf '{"id":%s,"error":"View was not found: %s"}\n' "$id" "$name" ;;
  esac
done
"#;

struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("workspace");
        let root = dir.path();

        let compiler = write_script(root, "fake-compiler", FAKE_COMPILER);
        let worker = write_script(root, "fake-worker", FAKE_WORKER);

        fs::create_dir_all(root.join("views")).expect("views dir");
        fs::write(
            root.join("views/UsersView.elm"),
            "module UsersView exposing (view, context)\n",
        )
        .expect("view");
        fs::write(
            root.join("elm-package.json"),
            r#"{"version":"1.0.0","source-directories":["views"],"dependencies":{}}"#,
        )
        .expect("manifest");

        let config = root.join("vista-test.toml");
        fs::write(
            &config,
            format!(
                r#"
[engine]
views_dir = "{views}"
project_root = "{root}"
build_root = "{build}"

[compiler]
program = "{compiler}"

[worker]
program = "{worker}"
args = []
"#,
                views = root.join("views").display(),
                root = root.display(),
                build = root.join("build").display(),
                compiler = compiler.display(),
                worker = worker.display(),
            ),
        )
        .expect("config");

        Self { dir, config }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("vista"));
        cmd.current_dir(self.root())
            .env("VISTA_CONFIG_FILE", &self.config)
            .env_remove("RUST_LOG");
        cmd
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write script");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("set perms");
    path
}

#[test]
fn compile_writes_the_artifact_next_to_the_views() {
    let workspace = Workspace::new();

    workspace.command().arg("compile").assert().success();

    let artifact = workspace.root().join("views/views.compiled.js");
    let compiled = fs::read_to_string(&artifact).expect("artifact written");
    assert!(compiled.starts_with("// compiled\nport module Main"));
    assert!(compiled.contains("import UsersView"));
}

#[test]
fn compile_is_the_default_command() {
    let workspace = Workspace::new();

    workspace.command().assert().success();

    assert!(workspace.root().join("views/views.compiled.js").exists());
}

#[test]
fn out_flag_moves_the_artifact() {
    let workspace = Workspace::new();
    let out = workspace.root().join("public");

    workspace
        .command()
        .arg("compile")
        .arg("--out")
        .arg(&out)
        .assert()
        .success();

    assert!(out.join("views.compiled.js").exists());
}

#[test]
fn engine_flags_without_subcommand_compile() {
    let workspace = Workspace::new();
    let out = workspace.root().join("public");

    workspace
        .command()
        .arg("-v")
        .arg(workspace.root().join("views"))
        .arg("-o")
        .arg(&out)
        .assert()
        .success();

    assert!(out.join("views.compiled.js").exists());
}

#[test]
fn compiler_failure_exits_non_zero() {
    let workspace = Workspace::new();
    fs::write(workspace.root().join("BROKEN"), "").expect("marker");

    workspace
        .command()
        .arg("compile")
        .assert()
        .failure()
        .stderr(contains("views do not compile"))
        .stderr(contains("Shared.Layout"));

    assert!(!workspace.root().join("views/views.compiled.js").exists());
}

#[test]
fn render_prints_html() {
    let workspace = Workspace::new();

    workspace
        .command()
        .arg("render")
        .arg("UsersView")
        .arg("--context")
        .arg(r#"{"users":["Ada"]}"#)
        .assert()
        .success()
        .stdout(contains("<ul><li>Ada</li></ul>"));
}

#[test]
fn render_of_unknown_view_fails() {
    let workspace = Workspace::new();

    workspace
        .command()
        .arg("render")
        .arg("NoSuchView")
        .assert()
        .failure()
        .stderr(contains("View was not found: NoSuchView"));
}

#[test]
fn render_rejects_malformed_context() {
    let workspace = Workspace::new();

    workspace
        .command()
        .arg("render")
        .arg("UsersView")
        .arg("--context")
        .arg("{not json")
        .assert()
        .failure()
        .stderr(contains("--context is not valid JSON"));
}

#[test]
fn invalid_configuration_is_reported() {
    let workspace = Workspace::new();

    workspace
        .command()
        .env("VISTA_COMPILER__ARGS", "--yes")
        .arg("compile")
        .assert()
        .failure()
        .stderr(contains("compiler.args"));
}
