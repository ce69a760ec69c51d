//! End-to-end tests of the `queue-view` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const CONNECTION_STRING: &str =
    "Endpoint=sb://contoso.servicebus.windows.net/;SharedAccessKeyName=k;SharedAccessKey=dg==";

fn queue_view(config: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("queue-view").unwrap();
    cmd.env_remove("QUEUE_VIEW_CONFIG")
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(config);
    cmd
}

#[test]
fn test_saved_connection_is_listed() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("QueueView.json");

    queue_view(&config)
        .args(["connections", "-n", "prod", "-s", CONNECTION_STRING])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    queue_view(&config)
        .args(["connections", "-n", "prod", "-s", CONNECTION_STRING])
        .assert()
        .success()
        .stdout("A connection with this name already exists. Specify -u to update.\n");

    queue_view(&config)
        .arg("connections")
        .assert()
        .success()
        .stdout(format!("prod {}\n", CONNECTION_STRING));
}

#[test]
fn test_missing_connection_exits_with_configuration_code() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("QueueView.json");

    queue_view(&config)
        .args(["messages", "-q", "orders"])
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Connection name cannot be empty."));
}

#[test]
fn test_send_without_destination_exits_with_configuration_code() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("QueueView.json");

    queue_view(&config)
        .args(["connections", "-n", "prod", "-s", CONNECTION_STRING])
        .assert()
        .success();
    queue_view(&config)
        .args(["connections", "-d", "prod"])
        .assert()
        .success();

    queue_view(&config)
        .args(["send", "-q", "orders", "-d"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "You must specify either a queue name or a topic name.",
        ));
}

#[test]
fn test_unknown_field_exits_with_argument_code() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("QueueView.json");

    queue_view(&config)
        .args(["messages", "-q", "orders", "-f", "Headers"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Unknown field 'Headers'"));
}

#[test]
fn test_completions() {
    let dir = TempDir::new().unwrap();

    queue_view(&dir.path().join("QueueView.json"))
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("queue-view"));
}
