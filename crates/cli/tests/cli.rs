use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn fragments(root: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("fragments").unwrap();
    cmd.env_remove("FRAGMENTS_USER")
        .args(["--log-level", "warn", "--backend", "local", "--root"])
        .arg(root.path());
    cmd
}

fn json(output: &[u8]) -> Value {
    serde_json::from_slice(output).unwrap()
}

fn create(root: &TempDir, user: &str, media_type: &str, body: &str) -> String {
    let out = fragments(root)
        .args(["create", "--user", user, "--type", media_type])
        .write_stdin(body)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v = json(&out);
    assert_eq!(v["status"], "ok");
    v["fragment"]["id"].as_str().unwrap().to_owned()
}

#[test]
fn markdown_round_trip_and_conversion() {
    let root = TempDir::new().unwrap();
    let id = create(&root, "user@example.com", "text/markdown", "# Hello");

    fragments(&root)
        .args(["get", "--user", "user@example.com", &id])
        .assert()
        .success()
        .stdout("# Hello");

    fragments(&root)
        .args(["get", "--user", "user@example.com", &format!("{id}.html")])
        .assert()
        .success()
        .stdout(predicate::str::contains("<h1>Hello</h1>"));

    fragments(&root)
        .args(["get", "--user", "user@example.com", &format!("{id}.txt")])
        .assert()
        .success()
        .stdout("# Hello");

    let out = fragments(&root)
        .args(["get", "--user", "user@example.com", &format!("{id}.png")])
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();
    let v = json(&out);
    assert_eq!(v["status"], "error");
    assert_eq!(v["error"]["kind"], "E_UNSUPPORTED_CONVERSION");
    assert_eq!(v["error"]["code"], 415);
}

#[test]
fn info_reports_formats_and_size() {
    let root = TempDir::new().unwrap();
    let id = create(&root, "user@example.com", "text/markdown", "## Title");
    let out = fragments(&root)
        .args(["info", "--user", "user@example.com", &id])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v = json(&out);
    assert_eq!(v["fragment"]["size"], 8);
    assert_eq!(v["fragment"]["type"], "text/markdown");
    assert_eq!(v["fragment"]["formats"][1], "text/html");
    assert_ne!(v["fragment"]["ownerId"], "user@example.com");
}

#[test]
fn empty_body_is_rejected() {
    let root = TempDir::new().unwrap();
    fragments(&root)
        .args(["create", "--user", "user@example.com", "--type", "text/plain"])
        .write_stdin("   \n")
        .assert()
        .failure()
        .stdout(predicate::str::contains("E_EMPTY_DATA"));
}

#[test]
fn owners_are_isolated() {
    let root = TempDir::new().unwrap();
    let id = create(&root, "a@example.com", "text/plain", "mine");

    let out = fragments(&root)
        .args(["list", "--user", "b@example.com"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(json(&out)["fragments"], serde_json::json!([]));

    fragments(&root)
        .args(["get", "--user", "b@example.com", &id])
        .assert()
        .failure()
        .stdout(predicate::str::contains("E_NOT_FOUND"));
}

#[test]
fn user_can_come_from_the_environment() {
    let root = TempDir::new().unwrap();
    let id = create(&root, "env@example.com", "application/json", r#"{"a":1}"#);
    let out = fragments(&root)
        .env("FRAGMENTS_USER", "env@example.com")
        .args(["list", "--expand"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v = json(&out);
    assert_eq!(v["fragments"][0]["id"], id.as_str());
    assert_eq!(v["fragments"][0]["type"], "application/json");
}

#[test]
fn update_then_delete() {
    let root = TempDir::new().unwrap();
    let id = create(&root, "user@example.com", "text/plain", "v1");

    let out = fragments(&root)
        .args(["update", "--user", "user@example.com", &id, "--type", "text/plain"])
        .write_stdin("second version")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(json(&out)["fragment"]["size"], 14);

    fragments(&root)
        .args(["update", "--user", "user@example.com", &id, "--type", "text/html"])
        .write_stdin("<p>x</p>")
        .assert()
        .failure()
        .stdout(predicate::str::contains("E_IMMUTABLE_FIELD"));

    fragments(&root)
        .args(["delete", "--user", "user@example.com", &id])
        .assert()
        .success();
    fragments(&root)
        .args(["info", "--user", "user@example.com", &id])
        .assert()
        .failure()
        .stdout(predicate::str::contains("E_NOT_FOUND"));
}

#[test]
fn file_input_and_output() {
    let root = TempDir::new().unwrap();
    let input = root.path().join("in.md");
    std::fs::write(&input, "*emphasis*").unwrap();
    let out = fragments(&root)
        .args(["create", "--user", "user@example.com", "--type", "text/markdown", "--file"])
        .arg(&input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let id = json(&out)["fragment"]["id"].as_str().unwrap().to_owned();

    let dest = root.path().join("out.html");
    fragments(&root)
        .args(["get", "--user", "user@example.com", &format!("{id}.html"), "--out"])
        .arg(&dest)
        .assert()
        .success();
    let html = std::fs::read_to_string(dest).unwrap();
    assert!(html.contains("<em>emphasis</em>"));
}

#[test]
fn root_from_environment_config() {
    let root = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("fragments").unwrap();
    cmd.env("FRAGMENTS__STORAGE__ROOT", root.path())
        .args(["--log-level", "warn", "--backend", "local"])
        .args(["create", "--user", "cfg@example.com", "--type", "text/plain"])
        .write_stdin("configured")
        .assert()
        .success();
    assert!(root.path().join("metadata").is_dir());
}

#[test]
fn formats_lookup() {
    let root = TempDir::new().unwrap();
    let out = fragments(&root)
        .args(["formats", "image/png"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v = json(&out);
    assert_eq!(v["type"], "image/png");
    assert_eq!(v["formats"].as_array().unwrap().len(), 4);

    fragments(&root)
        .args(["formats", "video/ogg"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("E_UNSUPPORTED_TYPE"));
}
