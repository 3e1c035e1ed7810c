//! End-to-end tests for the xfer binary on local directories
//!
//! Every test runs in its own temporary directory with an isolated config
//! file, so nothing touches the user's profiles or the network.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn write(&self, rel: &str, data: &str) {
        let path = self.path(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path(rel)).unwrap()
    }

    fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_xfer"));
        cmd.args(args)
            .current_dir(self.dir.path())
            .env("XFER_CONFIG", self.path("config.toml"))
            .env_remove("RUST_LOG")
            .env_remove("XFER_MULTIPART_THRESHOLD");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command(args).output().expect("failed to run xfer")
    }

    /// Register an fs profile rooted at `rel` inside the sandbox
    fn profile(&self, name: &str, rel: &str) {
        std::fs::create_dir_all(self.path(rel)).unwrap();
        let root = self.path(rel);
        let output = self.run(&[
            "profile",
            "add",
            name,
            "--service",
            "fs",
            "--work-dir",
            root.to_str().unwrap(),
        ]);
        assert_success(&output);
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        stdout(output),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn exit_code(output: &Output) -> i32 {
    output.status.code().unwrap_or(-1)
}

fn lines(output: &Output) -> Vec<String> {
    let mut lines: Vec<String> = stdout(output).lines().map(str::to_string).collect();
    lines.sort();
    lines
}

fn file_names(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

mod transfer {
    use super::*;

    #[test]
    fn test_cp_file() {
        let sb = Sandbox::new();
        sb.write("src/a.txt", "hello");

        let output = sb.run(&["cp", "src/a.txt", "out.txt"]);
        assert_success(&output);
        assert_eq!(sb.read("out.txt"), "hello");
        assert_eq!(sb.read("src/a.txt"), "hello");
    }

    #[test]
    fn test_cp_into_existing_dir() {
        let sb = Sandbox::new();
        sb.write("a.txt", "one");
        sb.write("b.txt", "two");
        std::fs::create_dir(sb.path("dst")).unwrap();

        let output = sb.run(&["cp", "a.txt", "b.txt", "dst"]);
        assert_success(&output);
        assert_eq!(file_names(&sb.path("dst")), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_cp_many_sources_onto_file() {
        let sb = Sandbox::new();
        sb.write("a.txt", "one");
        sb.write("b.txt", "two");
        sb.write("c.txt", "three");

        let output = sb.run(&["cp", "a.txt", "b.txt", "c.txt"]);
        assert_eq!(exit_code(&output), 6);
        assert!(stdout(&output).contains("target 'c.txt' is not a directory"));
    }

    #[test]
    fn test_cp_directory_needs_recursive() {
        let sb = Sandbox::new();
        sb.write("src/a.txt", "hello");

        let output = sb.run(&["cp", "src", "dst"]);
        assert_eq!(exit_code(&output), 1);
        assert!(stdout(&output).contains("cp: -r not specified; omitting directory 'src'"));
        assert!(!sb.exists("dst"));
    }

    #[test]
    fn test_cp_recursive_to_profile() {
        let sb = Sandbox::new();
        sb.profile("backup", "store");
        sb.write("src/a.txt", "a");
        sb.write("src/sub/b.txt", "b");

        let output = sb.run(&["cp", "-r", "src", "backup:copy/"]);
        assert_success(&output);
        assert_eq!(sb.read("store/copy/a.txt"), "a");
        assert_eq!(sb.read("store/copy/sub/b.txt"), "b");
    }

    #[test]
    fn test_cp_missing_source_keeps_going() {
        let sb = Sandbox::new();
        sb.write("a.txt", "one");
        std::fs::create_dir(sb.path("dst")).unwrap();

        let output = sb.run(&["cp", "missing.txt", "a.txt", "dst"]);
        assert_eq!(exit_code(&output), 5);
        assert!(stdout(&output).contains("cannot stat 'missing.txt': No such file or directory"));
        assert_eq!(sb.read("dst/a.txt"), "one");
    }

    #[test]
    fn test_cp_glob() {
        let sb = Sandbox::new();
        sb.profile("media", "media");
        sb.write("media/a.jpg", "a");
        sb.write("media/b.jpg", "b");
        sb.write("media/c.txt", "c");
        std::fs::create_dir(sb.path("out")).unwrap();

        let output = sb.run(&["cp", "media:*.jpg", "out"]);
        assert_success(&output);
        assert_eq!(file_names(&sb.path("out")), vec!["a.jpg", "b.jpg"]);
    }

    #[test]
    fn test_cp_over_threshold_to_fs_writes_whole_file() {
        let sb = Sandbox::new();
        sb.write("a.txt", "over the threshold");

        // the filesystem takes no multipart uploads, so the copy is one write
        let output = sb.run(&["cp", "--multipart-threshold", "1B", "a.txt", "b.txt"]);
        assert_success(&output);
        assert_eq!(sb.read("b.txt"), "over the threshold");
    }

    #[test]
    fn test_cp_json_output() {
        let sb = Sandbox::new();
        sb.write("a.txt", "hello");

        let output = sb.run(&["--json", "cp", "a.txt", "b.txt"]);
        assert_success(&output);
        let value: serde_json::Value = serde_json::from_str(stdout(&output).trim()).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["target"], "b.txt");
        assert_eq!(value["size_bytes"], 5);
    }

    #[test]
    fn test_mv_file_and_dir() {
        let sb = Sandbox::new();
        sb.write("a.txt", "hello");
        sb.write("tree/x.txt", "x");

        assert_success(&sb.run(&["mv", "a.txt", "b.txt"]));
        assert!(!sb.exists("a.txt"));
        assert_eq!(sb.read("b.txt"), "hello");

        assert_success(&sb.run(&["mv", "-r", "tree", "moved"]));
        assert_eq!(sb.read("moved/x.txt"), "x");
        assert!(!sb.exists("tree/x.txt"));
    }

    #[test]
    fn test_mv_onto_itself_keeps_file() {
        let sb = Sandbox::new();
        sb.write("a.txt", "hello");

        let output = sb.run(&["mv", "a.txt", "./"]);
        assert_eq!(exit_code(&output), 6);
        assert!(stdout(&output).contains("'a.txt' and './a.txt' are the same file"));
        assert_eq!(sb.read("a.txt"), "hello");

        let output = sb.run(&["mv", "a.txt", "a.txt"]);
        assert_eq!(exit_code(&output), 6);
        assert_eq!(sb.read("a.txt"), "hello");
    }

    #[test]
    fn test_cp_onto_itself_keeps_content() {
        let sb = Sandbox::new();
        sb.write("a.txt", "hello");
        sb.write("tree/x.txt", "x");

        let output = sb.run(&["cp", "a.txt", "./a.txt"]);
        assert_eq!(exit_code(&output), 6);
        assert_eq!(sb.read("a.txt"), "hello");

        let output = sb.run(&["cp", "-r", "tree", "tree/"]);
        assert_eq!(exit_code(&output), 6);
        assert!(stdout(&output).contains("into itself"));
        assert_eq!(file_names(&sb.path("tree")), vec!["x.txt"]);
    }
}

mod single {
    use super::*;

    #[test]
    fn test_ls_dir() {
        let sb = Sandbox::new();
        sb.write("docs/a.txt", "a");
        sb.write("docs/b.txt", "b");
        sb.write("docs/sub/c.txt", "c");

        let output = sb.run(&["ls", "docs"]);
        assert_success(&output);
        assert_eq!(lines(&output), vec!["a.txt", "b.txt", "sub/"]);

        let output = sb.run(&["ls", "-r", "docs/"]);
        assert_success(&output);
        assert!(lines(&output).contains(&"sub/c.txt".to_string()));
    }

    #[test]
    fn test_ls_missing() {
        let sb = Sandbox::new();
        let output = sb.run(&["ls", "nothing"]);
        assert_eq!(exit_code(&output), 5);
        assert!(stdout(&output).contains("ls: cannot access 'nothing': No such file or directory"));
    }

    #[test]
    fn test_ls_json_lines() {
        let sb = Sandbox::new();
        sb.write("docs/a.txt", "abc");

        let output = sb.run(&["ls", "--json", "docs/"]);
        assert_success(&output);
        let value: serde_json::Value = serde_json::from_str(stdout(&output).trim()).unwrap();
        assert_eq!(value["path"], "docs/a.txt");
        assert_eq!(value["content_length"], 3);
    }

    #[test]
    fn test_stat_json() {
        let sb = Sandbox::new();
        sb.write("a.txt", "hello");

        let output = sb.run(&["stat", "--json", "a.txt"]);
        assert_success(&output);
        let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(value["path"], "a.txt");
        assert_eq!(value["mode"], "read");
        assert_eq!(value["size"], 5);
    }

    #[test]
    fn test_stat_profile_storage() {
        let sb = Sandbox::new();
        sb.profile("media", "media");

        let output = sb.run(&["stat", "--json", "media:"]);
        assert_success(&output);
        let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(value["service"], "fs");
        assert_eq!(value["name"], "media");
        assert_eq!(value["capabilities"]["multipart"], false);
    }

    #[test]
    fn test_cat_files_in_order() {
        let sb = Sandbox::new();
        sb.write("a.txt", "first\n");
        sb.write("b.txt", "second\n");

        let output = sb.run(&["cat", "a.txt", "b.txt"]);
        assert_success(&output);
        assert_eq!(stdout(&output), "first\nsecond\n");
    }

    #[test]
    fn test_cat_directory() {
        let sb = Sandbox::new();
        sb.write("docs/a.txt", "a");

        let output = sb.run(&["cat", "docs"]);
        assert_eq!(exit_code(&output), 6);
        assert!(stdout(&output).contains("cat: 'docs': Is a directory"));
    }

    #[test]
    fn test_rm_file_and_tree() {
        let sb = Sandbox::new();
        sb.write("a.txt", "a");
        sb.write("tree/x.txt", "x");
        sb.write("tree/sub/y.txt", "y");

        let output = sb.run(&["rm", "tree"]);
        assert_eq!(exit_code(&output), 1);
        assert!(stdout(&output).contains("rm: cannot remove 'tree': Is a directory"));

        assert_success(&sb.run(&["rm", "a.txt"]));
        assert!(!sb.exists("a.txt"));

        assert_success(&sb.run(&["rm", "-r", "tree"]));
        assert!(!sb.exists("tree"));
    }

    #[test]
    fn test_rm_missing() {
        let sb = Sandbox::new();
        let output = sb.run(&["rm", "gone.txt"]);
        assert_eq!(exit_code(&output), 5);
        assert!(stdout(&output).contains("rm: cannot remove 'gone.txt': No such file or directory"));
    }

    #[test]
    fn test_sign_unsupported_on_fs() {
        let sb = Sandbox::new();
        sb.write("a.txt", "a");

        let output = sb.run(&["sign", "a.txt"]);
        assert_eq!(exit_code(&output), 7);
    }

    #[test]
    fn test_tee_from_pipe() {
        let sb = Sandbox::new();
        sb.profile("logs", "logs");

        let mut child = sb
            .command(&["tee", "logs:today.log"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        child
            .stdin
            .take()
            .unwrap()
            .write_all(b"line one\nline two\n")
            .unwrap();
        let output = child.wait_with_output().unwrap();

        assert_success(&output);
        assert!(stdout(&output).contains("Stdin is saved to <logs:today.log>"));
        assert_eq!(sb.read("logs/today.log"), "line one\nline two\n");
    }
}

mod sync {
    use super::*;

    #[test]
    fn test_sync_is_idempotent() {
        let sb = Sandbox::new();
        sb.profile("backup", "backup");
        sb.write("src/a.txt", "a");
        sb.write("src/sub/b.txt", "b");

        let output = sb.run(&["sync", "-r", "src/", "backup:"]);
        assert_success(&output);
        assert_eq!(lines(&output), vec!["a.txt synced.", "sub/b.txt synced."]);
        assert_eq!(sb.read("backup/sub/b.txt"), "b");

        let output = sb.run(&["sync", "-r", "--ignore-existing", "src/", "backup:"]);
        assert_success(&output);
        assert!(stdout(&output).is_empty());
    }

    #[test]
    fn test_sync_remove() {
        let sb = Sandbox::new();
        sb.write("src/a.txt", "a");
        sb.write("dst/a.txt", "old");
        sb.write("dst/stale.txt", "stale");

        let output = sb.run(&["sync", "--remove", "src/", "dst/"]);
        assert_success(&output);
        assert_eq!(lines(&output), vec!["a.txt synced.", "stale.txt removed."]);
        assert_eq!(sb.read("dst/a.txt"), "a");
        assert!(!sb.exists("dst/stale.txt"));
    }

    #[test]
    fn test_sync_exclude() {
        let sb = Sandbox::new();
        sb.write("src/a.txt", "a");
        sb.write("src/b.tmp", "b");

        let output = sb.run(&["sync", "--exclude", r"\.tmp$", "src/", "dst/"]);
        assert_success(&output);
        assert_eq!(lines(&output), vec!["a.txt synced."]);
        assert!(!sb.exists("dst/b.tmp"));
    }

    #[test]
    fn test_sync_usage_errors() {
        let sb = Sandbox::new();
        sb.write("a/x.txt", "x");
        sb.write("b/y.txt", "y");

        let output = sb.run(&["sync", "a", "dst/"]);
        assert_eq!(exit_code(&output), 2);

        let output = sb.run(&["sync", "--remove", "a/", "b/", "dst/"]);
        assert_eq!(exit_code(&output), 2);
        assert!(!sb.exists("dst"));
    }

    #[test]
    fn test_sync_source_must_be_dir() {
        let sb = Sandbox::new();
        sb.write("plain", "p");

        let output = sb.run(&["sync", "plain/", "dst/"]);
        assert_ne!(exit_code(&output), 0);
        assert!(!sb.exists("dst/plain"));
    }
}

mod profiles {
    use super::*;

    #[test]
    fn test_profile_lifecycle() {
        let sb = Sandbox::new();
        sb.profile("media", "media");

        let output = sb.run(&["profile", "list"]);
        assert_success(&output);
        assert_eq!(lines(&output), vec!["media"]);

        let output = sb.run(&["profile", "add", "media", "--work-dir", "/tmp"]);
        assert_eq!(exit_code(&output), 6);

        assert_success(&sb.run(&["profile", "remove", "media"]));
        let output = sb.run(&["ls", "media:"]);
        assert_eq!(exit_code(&output), 5);
    }

    #[test]
    fn test_unknown_profile() {
        let sb = Sandbox::new();
        let output = sb.run(&["stat", "nope:file.txt"]);
        assert_eq!(exit_code(&output), 5);
    }

    #[test]
    fn test_completions() {
        let sb = Sandbox::new();
        let output = sb.run(&["completions", "bash"]);
        assert_success(&output);
        assert!(stdout(&output).contains("xfer"));
    }
}
