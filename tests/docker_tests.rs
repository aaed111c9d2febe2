//! Scenarios against a real Docker daemon and the `python-with-time` image.
//! Run with `cargo test --test docker_tests -- --ignored`.
#![cfg(unix)]

mod common;

use std::time::{Duration, Instant};

use tempfile::TempDir;

use sandbox_scorer::config::SandboxConfig;
use sandbox_scorer::sandbox::{OutcomeKind, Scorer, TestCase};

use common::leftover_workspaces;

fn docker_scorer() -> (TempDir, Scorer) {
    let root = TempDir::new().unwrap();
    let config = SandboxConfig {
        workspace_root: Some(root.path().to_path_buf()),
        ..SandboxConfig::default()
    };
    (root, Scorer::from_config(&config).unwrap())
}

async fn outcome_of(code: &str, testcase: TestCase) -> OutcomeKind {
    let (root, scorer) = docker_scorer();
    scorer.preflight().await.unwrap();
    let batch = scorer.score(code, &[testcase]).await.unwrap();
    assert_eq!(leftover_workspaces(root.path()), 0);
    batch.verdicts()[0].outcome
}

#[tokio::test]
#[ignore = "needs docker and the python-with-time image"]
async fn test_docker_echo() {
    assert_eq!(
        outcome_of("print(input())", TestCase::new("Hello, World!", "Hello, World!")).await,
        OutcomeKind::Accepted
    );
}

#[tokio::test]
#[ignore = "needs docker and the python-with-time image"]
async fn test_docker_syntax_error() {
    assert_eq!(
        outcome_of("print('Hello, World!'", TestCase::new("", "Hello, World!")).await,
        OutcomeKind::CompilationError
    );
}

#[tokio::test]
#[ignore = "needs docker and the python-with-time image"]
async fn test_docker_runtime_error() {
    assert_eq!(
        outcome_of("1 / 0", TestCase::new("", "")).await,
        OutcomeKind::RuntimeError
    );
}

#[tokio::test]
#[ignore = "needs docker and the python-with-time image"]
async fn test_docker_infinite_loop() {
    let started = Instant::now();
    assert_eq!(
        outcome_of("while True: pass", TestCase::new("", "").with_time_limit(2.0)).await,
        OutcomeKind::Timeout
    );
    assert!(started.elapsed() < Duration::from_secs(15));
}

#[tokio::test]
#[ignore = "needs docker and the python-with-time image"]
async fn test_docker_memory_hog() {
    assert_eq!(
        outcome_of(
            "x = bytearray(1024 ** 3)",
            TestCase::new("", "").with_memory_limit(64)
        )
        .await,
        OutcomeKind::MemoryLimitExceeded
    );
}

#[tokio::test]
#[ignore = "needs docker and the python-with-time image"]
async fn test_docker_no_network() {
    let code = "import socket\nsocket.create_connection(('1.1.1.1', 53), timeout=2)\nprint('online')";
    assert_eq!(
        outcome_of(code, TestCase::new("", "online")).await,
        OutcomeKind::RuntimeError
    );
}
