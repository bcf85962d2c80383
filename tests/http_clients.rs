use std::io::Cursor;
use std::time::Duration;

use thumbsearch::{
    ClipHttpEmbedder, EmbedError, Embedder, FetchError, HttpThumbnailFetcher, ThumbnailFetcher,
};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 120, 240]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

// Blocking clients own an internal runtime, so build, use and drop them off the async executor.
async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.expect("blocking task")
}

#[tokio::test(flavor = "multi_thread")]
async fn fetcher_returns_image_bytes() {
    let server = MockServer::start().await;
    let png = png_bytes();
    Mock::given(method("GET"))
        .and(path("/vi/abc/hqdefault.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png.clone()))
        .mount(&server)
        .await;

    let url = format!("{}/vi/abc/hqdefault.jpg", server.uri());
    let bytes = blocking(move || {
        let fetcher = HttpThumbnailFetcher::new(Duration::from_secs(5)).expect("client");
        fetcher.fetch(&url)
    })
    .await
    .expect("fetch ok");
    assert_eq!(bytes, png);
}

#[tokio::test(flavor = "multi_thread")]
async fn fetcher_maps_status_and_payload_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/html.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
        .mount(&server)
        .await;

    let base = server.uri();
    let (missing, html, bad_url) = blocking(move || {
        let fetcher = HttpThumbnailFetcher::new(Duration::from_secs(5)).expect("client");
        (
            fetcher.fetch(&format!("{base}/missing.jpg")),
            fetcher.fetch(&format!("{base}/html.jpg")),
            fetcher.fetch("not a url"),
        )
    })
    .await;

    match missing {
        Err(FetchError::Status { status, .. }) => assert_eq!(status.as_u16(), 404),
        other => panic!("expected status error, got {other:?}"),
    }
    assert!(matches!(html, Err(FetchError::InvalidImage { .. })));
    assert!(matches!(bad_url, Err(FetchError::InvalidUrl { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn embedder_posts_image_and_text() {
    use base64::Engine as _;

    let server = MockServer::start().await;
    let png = png_bytes();
    let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
    Mock::given(method("POST"))
        .and(path("/embed/image"))
        .and(body_json(serde_json::json!({ "image": encoded })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "embedding": [0.1, 0.2, 0.3] })),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embed/text"))
        .and(body_json(serde_json::json!({ "text": "red car" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({ "data": [{ "embedding": [0.3, 0.2, 0.1] }] }),
        ))
        .mount(&server)
        .await;

    let base = server.uri();
    let (image_vec, text_vec) = blocking(move || {
        let embedder =
            ClipHttpEmbedder::new(&base, Some(3), Duration::from_secs(5), 1).expect("client");
        (
            embedder.embed_image(&png).expect("image embedding"),
            embedder.embed_text("red car").expect("text embedding"),
        )
    })
    .await;
    assert_eq!(image_vec, vec![0.1, 0.2, 0.3]);
    assert_eq!(text_vec, vec![0.3, 0.2, 0.1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn embedder_retries_transient_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed/text"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embed/text"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "embedding": [1.0, 0.0] })))
        .mount(&server)
        .await;

    let base = server.uri();
    let vector = blocking(move || {
        let embedder = ClipHttpEmbedder::new(&base, None, Duration::from_secs(5), 2).expect("client");
        embedder.embed_text("anything")
    })
    .await
    .expect("retry succeeds");
    assert_eq!(vector, vec![1.0, 0.0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn embedder_surfaces_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed/text"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embed/image"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "embedding": [1.0, 2.0] })))
        .mount(&server)
        .await;

    let base = server.uri();
    let (text, image) = blocking(move || {
        let embedder =
            ClipHttpEmbedder::new(&base, Some(3), Duration::from_secs(5), 3).expect("client");
        (embedder.embed_text("q"), embedder.embed_image(b"img"))
    })
    .await;

    match text {
        Err(EmbedError::Status { status, body }) => {
            assert_eq!(status.as_u16(), 400);
            assert_eq!(body, "bad input");
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert!(matches!(
        image,
        Err(EmbedError::DimensionMismatch {
            expected: 3,
            actual: 2
        })
    ));
}
