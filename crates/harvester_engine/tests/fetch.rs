use std::time::Duration;

use futures_util::StreamExt;
use harvester_engine::{
    Credentials, FailureKind, FeedResponse, FetchSettings, Fetcher, ReqwestFetcher, ValidatedUrl,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn url(server: &MockServer, suffix: &str) -> ValidatedUrl {
    ValidatedUrl::parse(&format!("{}{suffix}", server.uri())).unwrap()
}

async fn read_body(response: FeedResponse) -> Vec<u8> {
    let mut body = response.body;
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk.unwrap());
    }
    bytes
}

#[tokio::test]
async fn fetcher_streams_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<feed/>", "application/xml"))
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(FetchSettings::default()).unwrap();
    let response = fetcher.get(&url(&server, "/feed"), None).await.expect("fetch ok");
    assert_eq!(response.status, 200);
    assert_eq!(read_body(response).await, b"<feed/>");
}

#[tokio::test]
async fn fetcher_fails_on_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(FetchSettings::default()).unwrap();
    let err = fetcher
        .get(&url(&server, "/missing"), None)
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind, FailureKind::HttpStatus(404));
    assert!(err.kind.is_retryable());
}

#[tokio::test]
async fn refused_requests_are_not_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/secret"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(FetchSettings::default()).unwrap();
    let err = fetcher
        .get(&url(&server, "/secret"), None)
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind, FailureKind::Unauthorized(403));
    assert!(!err.kind.is_retryable());
}

#[tokio::test]
async fn fetcher_times_out_on_slow_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(250))
                .set_body_string("slow"),
        )
        .mount(&server)
        .await;

    let settings = FetchSettings {
        request_timeout: Duration::from_millis(50),
        ..FetchSettings::default()
    };
    let fetcher = ReqwestFetcher::new(settings).unwrap();
    let err = fetcher
        .get(&url(&server, "/slow"), None)
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind, FailureKind::Timeout);
}

#[tokio::test]
async fn credentials_are_withheld_over_plain_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<feed/>"))
        .mount(&server)
        .await;

    let credentials = Credentials {
        username: "harvester".into(),
        password: "hunter2".into(),
    };
    let fetcher = ReqwestFetcher::new(FetchSettings::default()).unwrap();
    fetcher
        .get(&url(&server, "/feed"), Some(&credentials))
        .await
        .expect("fetch ok");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.get("authorization").is_none());
    assert!(!format!("{credentials:?}").contains("hunter2"));
}
