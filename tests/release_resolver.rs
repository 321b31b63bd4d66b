use atc_ota_lib::config::ReleaseSettings;
use atc_ota_lib::update::{ChecksumType, ReleaseResolver};
use reqwest::Client;
use serde_json::json;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SHA256_HEX: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

fn resolver_for(server: &MockServer) -> ReleaseResolver {
    let settings = ReleaseSettings {
        api_base: server.uri(),
        retry_base_delay_ms: 10,
        ..ReleaseSettings::default()
    };
    ReleaseResolver::new(Client::new(), settings)
}

fn release_body(tag: &str) -> serde_json::Value {
    json!({
        "tag_name": tag,
        "html_url": format!("https://github.com/pvvx/ATC_MiThermometer/releases/tag/{}", tag),
        "body": format!("Changes\n\n{}  ATC_v45.bin\n", SHA256_HEX),
        "published_at": "2024-03-01T12:00:00Z",
        "assets": [
            {"name": "readme.txt", "browser_download_url": "https://example.com/readme.txt"},
            {"name": "ATC_v45.bin", "browser_download_url": "https://example.com/ATC_v45.bin"}
        ]
    })
}

#[tokio::test]
async fn test_latest_release() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/pvvx/ATC_MiThermometer/releases/latest"))
        .and(header("Accept", "application/vnd.github+json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(release_body("v4.5")))
        .expect(1)
        .mount(&server)
        .await;

    let release = resolver_for(&server).latest("pvvx").await.expect("release");

    assert_eq!(release.version, "v4.5");
    assert_eq!(release.download_url, "https://example.com/ATC_v45.bin");
    assert_eq!(release.checksum_value(), Some(SHA256_HEX));
    assert_eq!(release.checksum_type(), Some(ChecksumType::Sha256));
    assert!(release.published_at.is_some());
}

#[tokio::test]
async fn test_by_tag_not_found_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/atc1441/ATC_MiThermometer/releases/tags/v9.9"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    assert!(resolver_for(&server).by_tag("atc1441", "v9.9").await.is_none());
}

#[tokio::test]
async fn test_rate_limit_retried_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/pvvx/ATC_MiThermometer/releases/tags/v4.5"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/pvvx/ATC_MiThermometer/releases/tags/v4.5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(release_body("v4.5")))
        .expect(1)
        .mount(&server)
        .await;

    let release = resolver_for(&server).by_tag("pvvx", "v4.5").await;
    assert_eq!(release.map(|r| r.version).as_deref(), Some("v4.5"));
}

#[tokio::test]
async fn test_rate_limit_gives_up_after_three_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/pvvx/ATC_MiThermometer/releases/latest"))
        .respond_with(ResponseTemplate::new(429))
        // First attempt plus three retries
        .expect(4)
        .mount(&server)
        .await;

    assert!(resolver_for(&server).latest("pvvx").await.is_none());
}

#[tokio::test]
async fn test_server_error_is_none_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/pvvx/ATC_MiThermometer/releases/latest"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    assert!(resolver_for(&server).latest("pvvx").await.is_none());
}

#[tokio::test]
async fn test_unknown_source_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(release_body("v4.5")))
        .expect(0)
        .mount(&server)
        .await;

    assert!(resolver_for(&server).latest("not-a-source").await.is_none());
}

#[tokio::test]
async fn test_release_without_matching_asset_is_none() {
    let server = MockServer::start().await;
    let body = json!({
        "tag_name": "v4.5",
        "assets": [{"name": "sources.zip", "browser_download_url": "https://example.com/sources.zip"}]
    });
    Mock::given(method("GET"))
        .and(path("/repos/pvvx/ATC_MiThermometer/releases/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    assert!(resolver_for(&server).latest("pvvx").await.is_none());
}

#[tokio::test]
async fn test_tag_cannot_escape_source_repository() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/evil/fork/releases/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tag_name": "evil",
            "assets": [{"name": "ATC_evil.bin", "browser_download_url": "https://evil.example/ATC_evil.bin"}]
        })))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/repos/pvvx/ATC_MiThermometer/releases/tags/[^/]+$"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let release = resolver_for(&server)
        .by_tag("pvvx", "../../../../evil/fork/releases/latest")
        .await;

    assert!(release.is_none());
}

#[tokio::test]
async fn test_dot_segment_tag_is_refused() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(release_body("v4.5")))
        .expect(0)
        .mount(&server)
        .await;

    assert!(resolver_for(&server).by_tag("pvvx", "..").await.is_none());
}
