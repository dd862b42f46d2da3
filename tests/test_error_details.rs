use link_preview::{Fetcher, FetcherConfig, NormalizedUrl, PageFetcher, PreviewError, normalize_url};
use std::time::Duration;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn target(server: &MockServer, route: &str) -> NormalizedUrl {
    normalize_url(&format!("{}{}", server.uri(), route)).unwrap()
}

#[tokio::test]
async fn test_fetch_success() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><head><title>Test</title></head><body>Hello</body></html>")
                .insert_header("Content-Type", "text/html; charset=utf-8"),
        )
        .mount(&mock_server)
        .await;

    let url = target(&mock_server, "/page");
    let response = Fetcher::new().fetch(&url).await.unwrap();

    assert_eq!(response.status, 200);
    assert!(response.body.contains("Hello"));
    assert_eq!(response.final_url, url.as_str());
}

#[tokio::test]
async fn test_redirects_followed() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("Location", format!("{}/new", mock_server.uri())),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved here"))
        .mount(&mock_server)
        .await;

    let response = Fetcher::new()
        .fetch(&target(&mock_server, "/old"))
        .await
        .unwrap();

    assert_eq!(response.body, "moved here");
    assert!(response.final_url.ends_with("/new"));
}

#[tokio::test]
async fn test_http_404_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let url = target(&mock_server, "/missing");
    let error = Fetcher::new().fetch(&url).await.unwrap_err();

    assert_eq!(
        error,
        PreviewError::FetchError {
            url: url.to_string(),
            status: Some(404),
            message: "Not Found".to_string(),
        }
    );
    assert_eq!(
        error.envelope_message(),
        format!("404: {}, Not Found", url)
    );
}

#[tokio::test]
async fn test_http_500_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let error = Fetcher::new()
        .fetch(&target(&mock_server, "/boom"))
        .await
        .unwrap_err();

    assert_eq!(error.status(), Some(500));
}

#[tokio::test]
async fn test_timeout_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&mock_server)
        .await;

    let fetcher = Fetcher::new_with_config(
        FetcherConfig::default().with_timeout(Duration::from_millis(200)),
    );
    let url = target(&mock_server, "/slow");
    let error = fetcher.fetch(&url).await.unwrap_err();

    assert_eq!(
        error,
        PreviewError::TimeoutError {
            url: url.to_string()
        }
    );
}

#[tokio::test]
async fn test_connection_error() {
    // Reserve a free port, then release it so nothing is listening there.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let url = normalize_url(&format!("http://127.0.0.1:{port}/gone")).unwrap();
    let error = Fetcher::new().fetch(&url).await.unwrap_err();

    match &error {
        PreviewError::FetchError { status, url: failed, .. } => {
            assert_eq!(*status, None);
            assert_eq!(failed, &url.to_string());
        }
        e => panic!("Expected FetchError, got: {:?}", e),
    }
    assert!(error.envelope_message().starts_with(&format!("{url}, ")));
}
