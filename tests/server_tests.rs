#![cfg(unix)]

mod common;

use actix_web::{App, test, web};
use assert_json_diff::assert_json_include;
use serde_json::json;
use tempfile::TempDir;

use sandbox_scorer::config::SandboxConfig;
use sandbox_scorer::routes::{ScoreResponse, configure};
use sandbox_scorer::sandbox::{OutcomeKind, Scorer};

use common::fake_scorer;

macro_rules! init_app {
    ($scorer:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($scorer))
                .configure(configure),
        )
        .await
    };
}

#[actix_web::test]
async fn test_accepted_submission_redeems_ticket() {
    let (_root, scorer) = fake_scorer();
    let app = init_app!(scorer);

    let request_body = json!({
        "code": "print(input())",
        "testcases": [
            { "input": "Hello, World!", "output": "Hello, World!" },
            { "input": "42", "expected_output": "42", "time_limit_seconds": 5 }
        ],
        "user_id": 1,
        "challenge_id": 2,
        "ticket": { "user_id": 1, "challenge_id": 2, "prompt": "echo the first line" }
    });

    let req = test::TestRequest::post()
        .uri("/score")
        .set_json(&request_body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_include!(
        actual: &body,
        expected: json!({
            "all_accepted": true,
            "prompt": "echo the first line",
            "verdicts": [
                { "outcome": "Accepted", "stdout": "Hello, World!\n", "peak_memory_kb": 9216 },
                { "outcome": "Accepted", "stdout": "42\n" }
            ]
        })
    );
    assert!(body["scored_at"].is_string());

    let parsed: ScoreResponse = serde_json::from_value(body).unwrap();
    assert_eq!(parsed.verdicts.len(), 2);
}

#[actix_web::test]
async fn test_failed_submission_has_no_prompt() {
    let (_root, scorer) = fake_scorer();
    let app = init_app!(scorer);

    let request_body = json!({
        "code": "print('Wrong Answer')",
        "testcases": [{ "input": "", "output": "Hello, World!" }],
        "user_id": 1,
        "challenge_id": 2,
        "ticket": { "user_id": 1, "challenge_id": 2, "prompt": "secret" }
    });

    let req = test::TestRequest::post()
        .uri("/score")
        .set_json(&request_body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: ScoreResponse = test::read_body_json(resp).await;
    assert!(!body.all_accepted);
    assert_eq!(body.prompt, None);
    assert_eq!(body.verdicts[0].outcome, OutcomeKind::WrongAnswer);
}

#[actix_web::test]
async fn test_ticket_for_another_challenge_is_ignored() {
    let (_root, scorer) = fake_scorer();
    let app = init_app!(scorer);

    let request_body = json!({
        "code": "print(input())",
        "testcases": [{ "input": "x", "output": "x" }],
        "user_id": 1,
        "challenge_id": 3,
        "ticket": { "user_id": 1, "challenge_id": 2, "prompt": "secret" }
    });

    let req = test::TestRequest::post()
        .uri("/score")
        .set_json(&request_body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["all_accepted"], true);
    assert!(body.get("prompt").is_none());
}

#[actix_web::test]
async fn test_empty_batch_is_accepted() {
    let (_root, scorer) = fake_scorer();
    let app = init_app!(scorer);

    let req = test::TestRequest::post()
        .uri("/score")
        .set_json(json!({ "code": "print(input())" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_include!(actual: body, expected: json!({ "all_accepted": true, "verdicts": [] }));
}

#[actix_web::test]
async fn test_invalid_limits_are_rejected() {
    let (_root, scorer) = fake_scorer();
    let app = init_app!(scorer);

    for testcase in [
        json!({ "input": "", "output": "", "time_limit_seconds": -1.0 }),
        json!({ "input": "", "output": "", "time_limit_seconds": 0 }),
        json!({ "input": "", "output": "", "memory_limit_mb": 1 }),
    ] {
        let req = test::TestRequest::post()
            .uri("/score")
            .set_json(json!({ "code": "print(input())", "testcases": [testcase] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["reason"], "ERR_INVALID_ARGUMENT");
        assert_eq!(body["code"], 1);
        assert!(body["message"].as_str().unwrap().contains("limit"));
    }
}

#[actix_web::test]
async fn test_malformed_body_is_rejected() {
    let (_root, scorer) = fake_scorer();
    let app = init_app!(scorer);

    let req = test::TestRequest::post()
        .uri("/score")
        .insert_header(("content-type", "application/json"))
        .set_payload("{\"code\": ")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "reason": "ERR_INVALID_ARGUMENT", "code": 1 }));
}

#[actix_web::test]
async fn test_unreachable_runtime_is_service_unavailable() {
    let root = TempDir::new().unwrap();
    let config = SandboxConfig {
        runtime: vec!["/nonexistent/container-runtime".to_string()],
        workspace_root: Some(root.path().to_path_buf()),
        ..SandboxConfig::default()
    };
    let app = init_app!(Scorer::from_config(&config).unwrap());

    let req = test::TestRequest::post()
        .uri("/score")
        .set_json(json!({
            "code": "print(input())",
            "testcases": [{ "input": "a", "output": "a" }]
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_include!(
        actual: body,
        expected: json!({ "reason": "ERR_SCORING_UNAVAILABLE", "code": 7 })
    );
}

#[actix_web::test]
async fn test_health() {
    let (_root, scorer) = fake_scorer();
    let app = init_app!(scorer);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "status": "ok" }));
}
