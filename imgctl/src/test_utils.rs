//! Helpers for handler and router tests.

use std::path::Path;

use axum_test::{
    TestResponse, TestServer,
    multipart::{MultipartForm, Part},
};

use crate::config::{Config, StorageConfig};

/// Default configuration with storage rooted at `root`.
pub fn create_test_config(root: &Path) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        storage: StorageConfig {
            root: root.to_path_buf(),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn create_test_app(config: Config) -> TestServer {
    crate::Application::new(config)
        .expect("Failed to create application")
        .into_test_server()
}

/// A file part as a browser would send it.
pub fn image_part(data: impl Into<Vec<u8>>, file_name: &str, mime_type: &str) -> Part {
    Part::bytes(data.into()).file_name(file_name).mime_type(mime_type)
}

pub fn png_part() -> Part {
    image_part(b"\x89PNG\r\n\x1a\nfake image".to_vec(), "photo.png", "image/png")
}

/// `POST /upload-image` with an `image` part and an optional `jobId`.
pub async fn upload(server: &TestServer, job_id: Option<&str>, image: Part) -> TestResponse {
    let mut form = MultipartForm::new();
    if let Some(job_id) = job_id {
        form = form.add_text("jobId", job_id.to_string());
    }
    form = form.add_part("image", image);
    server.post("/upload-image").multipart(form).await
}

/// Upload `png_part()` and return the `imageUrl` from the response.
pub async fn upload_png(server: &TestServer, job_id: &str) -> String {
    let response = upload(server, Some(job_id), png_part()).await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    body["imageUrl"].as_str().expect("imageUrl in upload response").to_string()
}

/// `scheme://host[:port]` of an absolute URL returned by the service.
pub fn origin_of(image_url: &str) -> String {
    let url = url::Url::parse(image_url).expect("absolute image URL");
    url.origin().ascii_serialization()
}

/// Path of an absolute URL, for replaying it against the test server.
pub fn path_of(image_url: &str) -> String {
    let url = url::Url::parse(image_url).expect("absolute image URL");
    url.path().to_string()
}
