//! Control-plane API tests

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use storm::config::SecretValue;
use storm::server::serve::router;
use storm::server::state::ServerState;
use tower::ServiceExt;

use crate::common::spies::{BuildCall, DeployCall, SpyDeployer, SpyImageBuilder};

const TOKEN: &str = "s3cr3t-token";
const BOUNDARY: &str = "storm-test-boundary";

struct Harness {
    images: Arc<SpyImageBuilder>,
    deployer: Arc<SpyDeployer>,
    router: Router,
}

fn harness(images: SpyImageBuilder, deployer: SpyDeployer) -> Harness {
    let images = Arc::new(images);
    let deployer = Arc::new(deployer);
    let state = ServerState::new(
        images.clone(),
        deployer.clone(),
        SecretValue::new(TOKEN),
        true,
    );
    Harness {
        images,
        deployer,
        router: router(Arc::new(state), 1 << 20),
    }
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn deploy_request(parts: &[Part<'_>], token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/deploy")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(token) = token {
        builder = builder.header("X-Server-Code", token);
    }
    builder.body(Body::from(multipart_body(parts))).unwrap()
}

fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("X-Server-Code", token);
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_deploy_success() {
    let h = harness(SpyImageBuilder::default(), SpyDeployer::default());
    let request = deploy_request(
        &[
            Part::Text("app_name", "test"),
            Part::File("bin", "test", b"BinaryData"),
        ],
        Some(TOKEN),
    );

    let (status, body) = send(&h.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "error": false,
            "message": "success",
            "data": {
                "pull_url": "localhost:5000/test:abc123",
                "access_url": "http://localhost:31000"
            }
        })
    );
    assert_eq!(
        h.images.builds(),
        vec![BuildCall {
            build_dir: "testBuild".to_string(),
            app_name: "test".to_string(),
            binary: b"BinaryData".to_vec(),
        }]
    );
    assert_eq!(h.images.pushes().len(), 1);
    assert_eq!(h.images.pushes()[0].as_str(), "localhost:5000/test:abc123");
    assert_eq!(
        h.deployer.deploys(),
        vec![DeployCall {
            tag: h.images.pushes()[0].clone(),
            app_name: "test".to_string(),
            envs: BTreeMap::new(),
            is_local: true,
        }]
    );
}

#[tokio::test]
async fn test_deploy_streams_large_binary_intact() {
    let h = harness(SpyImageBuilder::default(), SpyDeployer::default());
    // Spans many multipart chunks and is not a multiple of any buffer size.
    let data: Vec<u8> = (0..300_007u32).map(|i| (i % 251) as u8).collect();
    let request = deploy_request(
        &[
            Part::File("bin", "big", &data),
            Part::Text("app_name", "big"),
        ],
        Some(TOKEN),
    );

    let (status, _) = send(&h.router, request).await;

    assert_eq!(status, StatusCode::OK);
    let builds = h.images.builds();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].build_dir, "bigBuild");
    assert_eq!(builds[0].binary.len(), data.len());
    assert!(builds[0].binary == data);
}

#[tokio::test]
async fn test_deploy_forwards_env_and_lowercases_name() {
    let h = harness(SpyImageBuilder::default(), SpyDeployer::default());
    let request = deploy_request(
        &[
            Part::Text("FOO", "bar"),
            Part::Text("app_name", "FooBar"),
            Part::File("bin", "FooBar", b"\x7fELF"),
            Part::Text("DB_URL", "postgres://db"),
        ],
        Some(TOKEN),
    );

    let (status, _) = send(&h.router, request).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(h.images.builds()[0].build_dir, "foobarBuild");
    assert_eq!(h.images.builds()[0].app_name, "foobar");

    let deploy = &h.deployer.deploys()[0];
    assert_eq!(deploy.app_name, "foobar");
    assert_eq!(
        deploy.envs,
        BTreeMap::from([
            ("DB_URL".to_string(), "postgres://db".to_string()),
            ("FOO".to_string(), "bar".to_string()),
        ])
    );
}

#[tokio::test]
async fn test_wrong_server_code_is_forbidden() {
    let h = harness(SpyImageBuilder::default(), SpyDeployer::default());
    let parts = [
        Part::Text("app_name", "test"),
        Part::File("bin", "test", b"BinaryData"),
    ];

    for token in [None, Some("wrong"), Some("")] {
        let (status, body) = send(&h.router, deploy_request(&parts, token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, json!({"error": true, "message": "forbidden"}));
    }

    let (status, _) = send(&h.router, get_request("/logs/test", Some("wrong"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&h.router, get_request("/health", None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    assert!(h.images.builds().is_empty());
    assert!(h.images.pushes().is_empty());
    assert!(h.deployer.deploys().is_empty());
    assert!(h.deployer.log_requests().is_empty());
}

#[tokio::test]
async fn test_missing_app_name_is_bad_request() {
    let h = harness(SpyImageBuilder::default(), SpyDeployer::default());
    for parts in [
        vec![Part::File("bin", "test", b"BinaryData")],
        vec![Part::Text("app_name", ""), Part::File("bin", "x", b"1")],
    ] {
        let (status, body) = send(&h.router, deploy_request(&parts, Some(TOKEN))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], true);
        assert_eq!(body["message"], "bad request: app name is missing");
    }
    assert!(h.images.builds().is_empty());
}

#[tokio::test]
async fn test_missing_binary_is_bad_request() {
    let h = harness(SpyImageBuilder::default(), SpyDeployer::default());
    for parts in [
        vec![Part::Text("app_name", "test")],
        vec![Part::Text("app_name", "test"), Part::Text("bin", "not a file")],
        vec![Part::Text("app_name", "test"), Part::File("bin", "", b"data")],
    ] {
        let (status, body) = send(&h.router, deploy_request(&parts, Some(TOKEN))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], true);
        assert!(body["message"]
            .as_str()
            .unwrap()
            .starts_with("file is missing"));
    }
    assert!(h.images.builds().is_empty());
}

#[tokio::test]
async fn test_invalid_app_name_is_bad_request() {
    let h = harness(SpyImageBuilder::default(), SpyDeployer::default());
    let request = deploy_request(
        &[
            Part::Text("app_name", "my_app"),
            Part::File("bin", "my_app", b"1"),
        ],
        Some(TOKEN),
    );
    let (status, body) = send(&h.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], true);
    assert!(h.images.builds().is_empty());
}

#[tokio::test]
async fn test_malformed_form_is_bad_request() {
    let h = harness(SpyImageBuilder::default(), SpyDeployer::default());
    let request = Request::builder()
        .method("POST")
        .uri("/deploy")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Server-Code", TOKEN)
        .body(Body::from("{}"))
        .unwrap();

    let (status, body) = send(&h.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({"error": true, "message": "failed to parse http form"})
    );
}

#[tokio::test]
async fn test_stage_failures_are_internal_errors() {
    let parts = [
        Part::Text("app_name", "test"),
        Part::File("bin", "test", b"BinaryData"),
    ];

    let h = harness(SpyImageBuilder::failing_build("no space left"), SpyDeployer::default());
    let (status, body) = send(&h.router, deploy_request(&parts, Some(TOKEN))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "failed to build docker image: no space left");
    assert!(h.images.pushes().is_empty());
    assert!(h.deployer.deploys().is_empty());

    let h = harness(SpyImageBuilder::failing_push("unauthorized"), SpyDeployer::default());
    let (status, body) = send(&h.router, deploy_request(&parts, Some(TOKEN))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], true);
    assert!(body["message"].as_str().unwrap().contains("unauthorized"));
    assert!(h.deployer.deploys().is_empty());

    let deployer = SpyDeployer {
        deploy_error: Some("quota exceeded".to_string()),
        ..Default::default()
    };
    let h = harness(SpyImageBuilder::default(), deployer);
    let (status, body) = send(&h.router, deploy_request(&parts, Some(TOKEN))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": true, "message": "quota exceeded"}));
}

#[tokio::test]
async fn test_logs_error_scenario() {
    let deployer = SpyDeployer {
        logs: Err("ERROR".to_string()),
        ..Default::default()
    };
    let h = harness(SpyImageBuilder::default(), deployer);

    let (status, body) = send(&h.router, get_request("/logs/fooBar", Some(TOKEN))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": true, "message": "ERROR"}));
    assert_eq!(h.deployer.log_requests(), vec!["foobar".to_string()]);
}

#[tokio::test]
async fn test_logs_success() {
    let deployer = SpyDeployer {
        logs: Ok("\nhello\nworld".to_string()),
        ..Default::default()
    };
    let h = harness(SpyImageBuilder::default(), deployer);

    let (status, body) = send(&h.router, get_request("/logs/test", Some(TOKEN))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"error": false, "message": "success", "data": {"logs": "\nhello\nworld"}})
    );
}

#[tokio::test]
async fn test_logs_without_app_is_bad_request() {
    let h = harness(SpyImageBuilder::default(), SpyDeployer::default());
    let (status, body) = send(&h.router, get_request("/logs/", Some(TOKEN))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({"error": true, "message": "error: app_name is missing"})
    );
    assert!(h.deployer.log_requests().is_empty());
}

#[tokio::test]
async fn test_health_reports_bootstrap() {
    let h = harness(SpyImageBuilder::default(), SpyDeployer::default());
    let (status, body) = send(&h.router, get_request("/health", Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["service"], "stormd");
    assert_eq!(body["data"]["degraded"], false);
    assert_eq!(body["data"]["namespace"]["ok"], true);

    let h = harness(
        SpyImageBuilder::default(),
        SpyDeployer::degraded("namespaces is forbidden"),
    );
    let (status, body) = send(&h.router, get_request("/health", Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["degraded"], true);
    assert_eq!(body["data"]["namespace"]["ok"], false);
    assert_eq!(body["data"]["namespace"]["error"], "namespaces is forbidden");
    assert_eq!(body["data"]["pull_secret"]["ok"], true);
}
