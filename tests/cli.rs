//! Tests for the `uploads` and `config` commands of the `lsfrun` binary.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::process::Output;
use std::process::Stdio;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tempfile::tempdir;

/// Creates a directory with a configuration file storing uploads inside it.
fn setup(extra: &str) -> TempDir {
    let dir = tempdir().unwrap();
    let uploads = dir.path().join("uploads");
    fs::write(
        dir.path().join("lsfrun.toml"),
        format!(
            "[staging]\nscripts_dir = \"scripts\"\nuploads_dir = {uploads:?}\nruns_dir = \
             \"runs\"\n{extra}",
            uploads = uploads.to_str().unwrap()
        ),
    )
    .unwrap();
    dir
}

/// Runs `lsfrun` in the given directory with its configuration file.
fn lsfrun(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_lsfrun"))
        .args(args)
        .arg("--config")
        .arg(dir.join("lsfrun.toml"))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .spawn()
        .expect("failed to spawn command")
        .wait_with_output()
        .expect("failed while waiting for command to finish")
}

/// Gets the stdout of a successful command.
fn stdout(output: &Output) -> &str {
    assert!(
        output.status.success(),
        "command failed {status}: {stderr}",
        status = output.status,
        stderr = str::from_utf8(&output.stderr).unwrap_or("<not UTF-8>")
    );
    str::from_utf8(&output.stdout).unwrap()
}

/// Gets the stderr of a failed command.
fn stderr(output: &Output) -> &str {
    assert!(!output.status.success(), "command should have failed");
    assert_eq!(output.status.code(), Some(1));
    str::from_utf8(&output.stderr).unwrap()
}

#[test]
fn uploads() {
    let dir = setup("");
    fs::write(dir.path().join("reference.fa"), ">chr1\nACGT\n").unwrap();
    fs::write(dir.path().join("genes.gtf"), "").unwrap();

    assert_eq!(stdout(&lsfrun(dir.path(), &["uploads", "list"])), "");

    let output = lsfrun(dir.path(), &["uploads", "add", "reference.fa", "genes.gtf"]);
    assert_eq!(
        stdout(&output),
        "added `reference.fa`\nadded `genes.gtf`\n"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("uploads").join("reference.fa")).unwrap(),
        ">chr1\nACGT\n"
    );
    assert_eq!(
        stdout(&lsfrun(dir.path(), &["uploads", "list"])),
        "genes.gtf\nreference.fa\n"
    );

    let output = lsfrun(dir.path(), &["uploads", "remove", "genes.gtf"]);
    assert_eq!(stdout(&output), "removed `genes.gtf`\n");
    assert_eq!(
        stdout(&lsfrun(dir.path(), &["uploads", "list"])),
        "reference.fa\n"
    );

    let output = lsfrun(dir.path(), &["uploads", "remove", "genes.gtf"]);
    assert!(stderr(&output).contains("no uploaded file is named `genes.gtf`"));

    let output = lsfrun(dir.path(), &["uploads", "add", "missing.txt"]);
    assert!(stderr(&output).contains("`missing.txt` is not a file"));
}

#[test]
fn config_init_prints_defaults() {
    let dir = setup("");
    let output = lsfrun(dir.path(), &["config", "init"]);
    let text = stdout(&output);

    assert!(text.contains("[staging]"));
    assert!(text.contains("scripts_dir = \"~/.local/share/lsfrun/scripts\""));
    assert!(text.contains("[poll]"));
    assert!(text.contains("interval_minutes = 1"));
    assert!(!text.contains("[[clouds]]"));
}

#[test]
fn config_resolve_prints_configuration() {
    let dir = setup(
        "[poll]\ninterval_minutes = 5\n\n[[clouds]]\nname = \"hpc\"\nlabels = [\"lsf\"]\nqueue = \
         \"normal\"\n",
    );
    let output = lsfrun(dir.path(), &["config", "resolve"]);
    let text = stdout(&output);

    assert!(text.contains("interval_minutes = 5"));
    assert!(text.contains("[[clouds]]"));
    assert!(text.contains("name = \"hpc\""));
    assert!(text.contains("queue = \"normal\""));
}

#[test]
fn invalid_configuration_is_reported() {
    let dir = setup("[poll]\ninterval_minutes = 0\n");
    let output = lsfrun(dir.path(), &["config", "resolve"]);
    assert!(
        stderr(&output)
            .starts_with("error: configuration value `poll.interval_minutes` cannot be zero")
    );

    let dir = setup("[poll]\nfrequency = 2\n");
    let output = lsfrun(dir.path(), &["uploads", "list"]);
    assert!(stderr(&output).starts_with("error: failed to parse config file"));
}

#[test]
fn run_requires_a_script() {
    let dir = setup("");
    let output = lsfrun(dir.path(), &["run", "missing.sh"]);
    assert!(stderr(&output).starts_with("error: failed to read job script `missing.sh`"));
    assert!(!dir.path().join("runs").exists());

    let dir = setup("[[clouds]]\nname = \"gpu\"\nlabels = [\"gpu\"]\n");
    fs::write(dir.path().join("job.sh"), "echo hello\n").unwrap();
    let output = lsfrun(dir.path(), &["run", "job.sh", "--label", "cpu"]);
    assert!(stderr(&output).starts_with("error: no cloud can provision label `cpu`"));
}
