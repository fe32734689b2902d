//! Shared helpers for integration tests: API fixtures, a fast-retry client
//! and synthetic PNGs.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use esa_export::api::{AccessToken, ApiClient, RateLimiter, ReqwestExecutor, RetryPolicy};
use serde_json::{Value, json};

pub const TEAM: &str = "docs";
pub const TOKEN: &str = "test-token-123";

pub fn posts_path() -> String {
    format!("/v1/teams/{TEAM}/posts")
}

pub fn post_path(id: u64) -> String {
    format!("/v1/teams/{TEAM}/posts/{id}")
}

/// A post as the API returns it.
pub fn post(id: u64, title: &str, category: &str, body_md: &str) -> Value {
    json!({
        "number": id,
        "name": title,
        "full_name": format!("{category}/{title}"),
        "wip": false,
        "body_md": body_md,
        "body_html": "",
        "created_at": "2024-01-02T03:04:05+09:00",
        "updated_at": "2024-02-03T04:05:06+09:00",
        "category": category,
        "tags": ["export"],
        "created_by": {"screen_name": "alice"},
        "updated_by": {"screen_name": "bob"},
        "url": format!("https://{TEAM}.esa.io/posts/{id}")
    })
}

/// A search page holding posts `ids` in the `dev` category.
pub fn search_page(ids: impl IntoIterator<Item = u64>, next_page: Option<u32>, total: u64) -> Value {
    let posts: Vec<Value> = ids
        .into_iter()
        .map(|id| post(id, &format!("post {id}"), "dev", &format!("body {id}")))
        .collect();
    json!({
        "posts": posts,
        "next_page": next_page,
        "total_count": total
    })
}

/// Client against `base_url` with no request spacing and millisecond backoff.
pub fn client(base_url: &str) -> ApiClient {
    let executor = ReqwestExecutor::with_timeouts(2, 5).expect("executor builds");
    ApiClient::new(Arc::new(executor), base_url, AccessToken::new(TOKEN))
        .expect("base URL is valid")
        .with_rate_limiter(Arc::new(RateLimiter::disabled()))
        .with_retry_policy(
            RetryPolicy::default()
                .with_jitter(Duration::ZERO)
                .with_transient_delay(Duration::from_millis(5))
                .with_rate_limit_backoff(Duration::from_millis(5), Duration::from_millis(100)),
        )
}

/// Encodes a solid-colour RGB PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("png encodes");
    bytes
}

/// Decoded (width, height) of image bytes.
pub fn dimensions(bytes: &[u8]) -> (u32, u32) {
    let image = image::load_from_memory(bytes).expect("image decodes");
    (image.width(), image.height())
}
