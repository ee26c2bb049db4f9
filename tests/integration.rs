/// Integration test suite for the `tree-sync` binary.
///
/// All tests invoke the compiled binary via subprocess against temporary
/// project directories. The `CARGO_BIN_EXE_tree-sync` environment variable is
/// set by Cargo during `cargo test` to point at the binary for the current
/// profile.
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_tree-sync"))
}

/// `<root>/a.txt`, `<root>/b/c.txt` and `<root>/b/run.tar.gz`.
fn project() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), "a").unwrap();
    std::fs::create_dir(dir.path().join("b")).unwrap();
    std::fs::write(dir.path().join("b").join("c.txt"), "c").unwrap();
    std::fs::write(dir.path().join("b").join("run.tar.gz"), "").unwrap();
    dir
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("utf-8 temp path")
}

/// Run a tree-sync command and assert it exits successfully.
/// Returns stdout as a String.
fn run_success(args: &[&str]) -> String {
    let out = Command::new(binary())
        .args(args)
        .output()
        .expect("failed to invoke tree-sync binary");
    let stdout = String::from_utf8_lossy(&out.stdout).to_string();
    let stderr = String::from_utf8_lossy(&out.stderr).to_string();
    assert!(
        out.status.success(),
        "command {:?} failed with status {:?}\nstdout: {}\nstderr: {}",
        args,
        out.status,
        stdout,
        stderr
    );
    stdout
}

/// Run a tree-sync command and assert it exits with a non-zero status.
/// Returns (stdout, stderr) as Strings.
fn run_failure(args: &[&str]) -> (String, String) {
    let out = Command::new(binary())
        .args(args)
        .output()
        .expect("failed to invoke tree-sync binary");
    let stdout = String::from_utf8_lossy(&out.stdout).to_string();
    let stderr = String::from_utf8_lossy(&out.stderr).to_string();
    assert!(
        !out.status.success(),
        "command {:?} expected to fail but exited successfully\nstdout: {}\nstderr: {}",
        args,
        stdout,
        stderr
    );
    (stdout, stderr)
}

fn child_names(node: &serde_json::Value) -> Vec<String> {
    let mut names: Vec<String> = node["children"]
        .as_array()
        .expect("children array")
        .iter()
        .map(|c| c["name"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    names
}

// ---------------------------------------------------------------------------
// tree
// ---------------------------------------------------------------------------

/// test_tree_json_output — tree --json emits the PathNode shape.
#[test]
fn test_tree_json_output() {
    let dir = project();
    let stdout = run_success(&["tree", "--json", path_arg(dir.path())]);
    let tree: serde_json::Value =
        serde_json::from_str(&stdout).expect("tree --json output is not valid JSON");

    assert_eq!(tree["isFolder"], true);
    assert_eq!(tree["id"], tree["path"]);
    assert_eq!(child_names(&tree), vec!["a.txt", "b"]);

    let children = tree["children"].as_array().unwrap();
    let a = children.iter().find(|c| c["name"] == "a.txt").unwrap();
    assert_eq!(a["isFolder"], false);
    assert!(a.get("children").is_none(), "files should not carry children");

    let b = children.iter().find(|c| c["name"] == "b").unwrap();
    assert_eq!(child_names(b), vec!["c.txt", "run.tar.gz"]);
}

/// test_tree_async_matches_blocking — --async builds the same set of entries.
#[test]
fn test_tree_async_matches_blocking() {
    let dir = project();
    let blocking: serde_json::Value =
        serde_json::from_str(&run_success(&["tree", "--json", path_arg(dir.path())])).unwrap();
    let non_blocking: serde_json::Value = serde_json::from_str(&run_success(&[
        "tree",
        "--async",
        "--json",
        path_arg(dir.path()),
    ]))
    .unwrap();
    assert_eq!(child_names(&blocking), child_names(&non_blocking));
}

/// test_tree_text_output — default output is an indented listing.
#[test]
fn test_tree_text_output() {
    let dir = project();
    let stdout = run_success(&["tree", path_arg(dir.path())]);
    assert!(stdout.contains("  b/\n"), "stdout: {}", stdout);
    assert!(stdout.contains("    c.txt\n"), "stdout: {}", stdout);
}

/// test_tree_respects_config_exclude — tree-sync.toml exclusions apply.
#[test]
fn test_tree_respects_config_exclude() {
    let dir = project();
    std::fs::write(
        dir.path().join("tree-sync.toml"),
        "exclude = [\"*.gz\", \"tree-sync.toml\"]\n",
    )
    .unwrap();
    let stdout = run_success(&["tree", "--json", path_arg(dir.path())]);
    assert!(!stdout.contains("run.tar.gz"), "stdout: {}", stdout);
    assert!(!stdout.contains("tree-sync.toml"), "stdout: {}", stdout);
    assert!(stdout.contains("c.txt"));
}

/// test_tree_missing_path_fails — a root that does not exist is an error.
#[test]
fn test_tree_missing_path_fails() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    let (_stdout, stderr) = run_failure(&["tree", path_arg(&missing)]);
    assert!(stderr.contains("does not exist"), "stderr: {}", stderr);
}

/// test_watch_rejects_unknown_strategy — clap validates --strategy.
#[test]
fn test_watch_rejects_unknown_strategy() {
    let dir = project();
    let (_stdout, stderr) = run_failure(&["watch", "--strategy", "psychic", path_arg(dir.path())]);
    assert!(stderr.contains("psychic"), "stderr: {}", stderr);
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

/// test_serve_watch_dir_round_trip — watch-dir over stdio pushes the initial
/// tree, acknowledges, and the server exits cleanly on EOF.
#[test]
fn test_serve_watch_dir_round_trip() {
    let dir = project();
    let mut child = Command::new(binary())
        .args(["serve", "--config-dir", path_arg(dir.path())])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn tree-sync serve");

    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = BufReader::new(child.stdout.take().unwrap());
    let request = serde_json::json!({"type": "watch-dir", "path": path_arg(dir.path())});
    writeln!(stdin, "{}", request).unwrap();
    stdin.flush().unwrap();

    let mut read = || {
        let mut line = String::new();
        stdout.read_line(&mut line).expect("read from serve");
        serde_json::from_str::<serde_json::Value>(&line)
            .unwrap_or_else(|e| panic!("invalid JSON line {:?}: {}", line, e))
    };

    let update = read();
    assert_eq!(update["type"], "watch-dir-update");
    assert_eq!(child_names(&update["tree"]), vec!["a.txt", "b"]);

    let ack = read();
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["request"], "watch-dir");

    let missing = dir.path().join("missing");
    let request = serde_json::json!({"type": "watch-dir", "path": path_arg(&missing)});
    writeln!(stdin, "{}", request).unwrap();
    stdin.flush().unwrap();
    let error = read();
    assert_eq!(error["type"], "error");

    drop(stdin);
    let status = child.wait().expect("serve did not exit");
    assert!(status.success());
}
