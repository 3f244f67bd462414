//! End-to-end tests for the single-file conversion endpoints.

mod common;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::{jpeg_bytes, not_an_image, png_bytes, TestClient, TestServer};
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn home_reports_server_stats() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .client
        .get(format!("{}/", client.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["uptime"].as_str().unwrap().contains("d "));
}

#[tokio::test]
async fn to_base64_roundtrips_file_bytes() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let original = png_bytes(20, 10);

    let response = client.convert_to_base64("photo.png", original.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["format"], "PNG");
    assert_eq!(body["size"], json!([20, 10]));
    assert_eq!(body["file_size"], original.len());

    let decoded = BASE64.decode(body["base64"].as_str().unwrap()).unwrap();
    assert_eq!(decoded, original);
}

#[tokio::test]
async fn to_base64_without_file_is_bad_request() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let form = reqwest::multipart::Form::new().text("other", "field");
    let response = client
        .client
        .post(format!("{}/api/convert/to-base64", client.base_url))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], "INPUT_INVALID");
}

#[tokio::test]
async fn to_base64_rejects_non_image() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.convert_to_base64("note.txt", not_an_image()).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], "UNSUPPORTED_FORMAT");
}

#[tokio::test]
async fn advanced_conversion_applies_options() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let options = json!({
        "resize_width": 8,
        "resize_height": 8,
        "maintain_aspect_ratio": false,
        "quality": 70,
        "target_format": "JPEG",
        "rotation_angle": 90
    });
    let response = client
        .convert_advanced("photo.png", png_bytes(40, 20), &options)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["original_format"], "PNG");
    assert_eq!(body["original_size"], json!([40, 20]));
    assert_eq!(body["processed_format"], "JPEG");
    assert_eq!(body["processed_size"], json!([8, 8]));
    // The basic response keys are present too, describing the payload.
    assert_eq!(body["format"], "JPEG");
    assert_eq!(body["size"], json!([8, 8]));
    assert_eq!(body["processing_options"]["quality"], 70);
    assert_eq!(body["processing_options"]["rotation_angle"], 90);

    let produced = BASE64.decode(body["base64"].as_str().unwrap()).unwrap();
    assert_eq!(
        image::guess_format(&produced).unwrap(),
        image::ImageFormat::Jpeg
    );
}

#[tokio::test]
async fn advanced_conversion_warns_on_unknown_option() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let options = json!({ "quality": 60, "sepia": true });
    let response = client
        .convert_advanced("photo.png", png_bytes(10, 10), &options)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let warnings = body["warnings"].as_array().unwrap();
    assert!(warnings[0].as_str().unwrap().contains("sepia"));
}

#[tokio::test]
async fn advanced_conversion_rejects_invalid_options() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .convert_advanced("photo.png", png_bytes(10, 10), &json!({ "quality": 0 }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .convert_advanced(
            "photo.png",
            png_bytes(10, 10),
            &json!({ "target_format": "AVIF" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn from_base64_returns_raw_image_bytes() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let encoded = BASE64.encode(jpeg_bytes(16, 16));
    let response = client.from_base64(&encoded, "PNG").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap(),
        "image/png"
    );
    assert!(response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("converted.png"));

    let bytes = response.bytes().await.unwrap();
    assert_eq!(
        image::guess_format(&bytes).unwrap(),
        image::ImageFormat::Png
    );
}

#[tokio::test]
async fn from_base64_rejects_garbage() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.from_base64("!!!", "PNG").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let encoded = BASE64.encode(b"not pixels");
    let response = client.from_base64(&encoded, "PNG").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], "CODEC_FAILED");
}

#[tokio::test]
async fn validate_base64_reports_image_properties() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let encoded = BASE64.encode(png_bytes(12, 34));
    let response = client.validate_base64(&encoded).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["valid"], true);
    assert_eq!(body["format"], "PNG");
    assert_eq!(body["size"], json!([12, 34]));
    assert_eq!(body["mode"], "RGB");
}

#[tokio::test]
async fn validate_base64_accepts_data_uri_prefix() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let with_prefix = format!("data:image/png;base64,{}", BASE64.encode(png_bytes(5, 5)));
    let response = client.validate_base64(&with_prefix).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["valid"], true);
}

#[tokio::test]
async fn validate_base64_flags_invalid_payloads() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    // Not Base64 at all.
    let response = client.validate_base64("%%%").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["valid"], false);

    // Valid Base64 of non-image bytes.
    let response = client.validate_base64(&BASE64.encode(b"plain text")).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["valid"], false);
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn base64_validation_roundtrip_property() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    // decode(encode(bytes)) == bytes through the HTTP surface.
    let original = png_bytes(30, 30);
    let response = client.convert_to_base64("img.png", original.clone()).await;
    let body: Value = response.json().await.unwrap();
    let encoded = body["base64"].as_str().unwrap();

    let response = client.from_base64(encoded, "PNG").await;
    let returned = response.bytes().await.unwrap();
    let a = image::load_from_memory(&original).unwrap().to_rgb8();
    let b = image::load_from_memory(&returned).unwrap().to_rgb8();
    assert_eq!(a.as_raw(), b.as_raw());
}
