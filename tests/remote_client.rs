#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use histsync::remote::{ApiClient, Transport, api, is_offline_error};
use histsync_common::sync::{DeletionRequest, MessageIdentifiers};
use mockito::Matcher;
use serial_test::serial;

// ── ApiClient ────────────────────────────────────────────────────────────────

#[test]
#[serial]
fn get_sends_version_header_and_query() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/v1/register")
        .match_header("x-histsync-version", Matcher::Regex(r"^v\d+\.\d+\.\d+".into()))
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("user_id".into(), "u 1".into()),
            Matcher::UrlEncoded("device_id".into(), "d-1".into()),
        ]))
        .with_status(200)
        .with_body("")
        .create();

    let client = ApiClient::new(&server.url()).unwrap();
    client
        .get("/api/v1/register", &[("user_id", "u 1"), ("device_id", "d-1")])
        .unwrap();
    mock.assert();
}

#[test]
#[serial]
fn post_sends_body_and_content_type() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/api/v1/submit")
        .match_query(Matcher::UrlEncoded("source_device_id".into(), "d-1".into()))
        .match_header("content-type", "application/json")
        .match_body("[]")
        .with_status(200)
        .with_body("ok")
        .create();

    let client = ApiClient::new(&server.url()).unwrap();
    let body = client
        .post(
            "/api/v1/submit",
            &[("source_device_id", "d-1")],
            "application/json",
            b"[]".to_vec(),
        )
        .unwrap();
    assert_eq!(body, b"ok");
    mock.assert();
}

#[test]
#[serial]
fn non_success_status_is_in_error_text() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/v1/download")
        .with_status(503)
        .create();

    let client = ApiClient::new(&server.url()).unwrap();
    let err = client.get("/api/v1/download", &[]).unwrap_err();
    assert!(
        err.to_string().contains("status_code=503"),
        "expected status code in error, got: {err}"
    );
    assert!(is_offline_error(&err));
    mock.assert();
}

#[test]
#[serial]
fn client_error_status_is_not_offline() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", "/api/v1/download")
        .with_status(400)
        .create();

    let client = ApiClient::new(&server.url()).unwrap();
    let err = client.get("/api/v1/download", &[]).unwrap_err();
    assert!(err.to_string().contains("status_code=400"), "{err}");
    assert!(!is_offline_error(&err));
}

#[test]
#[serial]
fn connection_refused_is_offline() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = ApiClient::new(&format!("http://127.0.0.1:{port}")).unwrap();
    let err = client.get("/api/v1/download", &[]).unwrap_err();
    assert!(is_offline_error(&err), "expected offline, got: {err:#}");
}

#[test]
#[serial]
fn simulated_network_error_short_circuits() {
    let mut server = mockito::Server::new();
    let mock = server.mock("GET", "/api/v1/download").expect(0).create();

    unsafe { std::env::set_var("HISTSYNC_SIMULATE_NETWORK_ERROR", "1") };
    let client = ApiClient::new(&server.url()).unwrap();
    let result = client.get("/api/v1/download", &[]);
    unsafe { std::env::remove_var("HISTSYNC_SIMULATE_NETWORK_ERROR") };

    let err = result.unwrap_err();
    assert!(is_offline_error(&err), "{err:#}");
    mock.assert();
}

// ── api ──────────────────────────────────────────────────────────────────────

#[test]
#[serial]
fn download_decodes_update_info() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/v1/download")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"linux_amd64_url": "https://example.test/linux", "version": "v0.2.0"}"#)
        .create();

    let client = ApiClient::new(&server.url()).unwrap();
    let info = api::download(&client).unwrap();
    assert_eq!(info.version, "v0.2.0");
    assert_eq!(info.linux_amd64_url, "https://example.test/linux");
    assert!(info.darwin_arm64_url.is_empty());
    mock.assert();
}

#[test]
#[serial]
fn malformed_json_names_the_call() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", "/api/v1/get-dump-requests")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("<html>maintenance</html>")
        .create();

    let client = ApiClient::new(&server.url()).unwrap();
    let err = api::get_dump_requests(&client, "u", "d").unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("/api/v1/get-dump-requests"), "{msg}");
    assert!(!is_offline_error(&err));
}

#[test]
#[serial]
fn add_deletion_request_posts_json() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/api/v1/add-deletion-request")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJsonString(r#"{"user_id": "u"}"#.into()))
        .with_status(200)
        .create();

    let client = ApiClient::new(&server.url()).unwrap();
    let request = DeletionRequest {
        user_id: "u".to_string(),
        destination_device_id: String::new(),
        send_time: chrono::Utc::now(),
        messages: MessageIdentifiers::default(),
        read_count: 0,
    };
    api::add_deletion_request(&client, &request).unwrap();
    mock.assert();
}

#[test]
#[serial]
fn banner_forwards_every_parameter() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/v1/banner")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("commit_hash".into(), "abc".into()),
            Matcher::UrlEncoded("user_id".into(), "u".into()),
            Matcher::UrlEncoded("device_id".into(), "d".into()),
            Matcher::UrlEncoded("version".into(), "0.1.0".into()),
            Matcher::UrlEncoded("forced_banner".into(), "hello".into()),
        ]))
        .with_status(200)
        .with_body("hello")
        .create();

    let client = ApiClient::new(&server.url()).unwrap();
    let body = api::banner(
        &client,
        &api::BannerQuery {
            commit_hash: "abc",
            user_id: "u",
            device_id: "d",
            version: "0.1.0",
            forced_banner: "hello",
        },
    )
    .unwrap();
    assert_eq!(body, b"hello");
    mock.assert();
}
