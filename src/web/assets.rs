//! Stylesheets and images compiled into the binary

use axum::{
    extract::Path,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::view::StaticAssets;
use crate::web::WebError;

/// GET /static/{*path}
pub async fn serve_static(Path(path): Path<String>, headers: HeaderMap) -> Result<Response, WebError> {
    let path = path.trim_start_matches('/');
    if path.split('/').any(|segment| segment == "..") {
        return Err(WebError::not_found());
    }
    let file = StaticAssets::get(path).ok_or_else(WebError::not_found)?;

    let etag = format!(
        "\"{}\"",
        data_encoding::HEXLOWER.encode(&file.metadata.sha256_hash()[..8])
    );
    let cached = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == etag);

    let mut response = if cached {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        (
            [
                (header::CONTENT_TYPE, get_content_type(path)),
                (header::CACHE_CONTROL, "public, max-age=3600"),
            ],
            file.data.into_owned(),
        )
            .into_response()
    };
    if let Ok(value) = HeaderValue::from_str(&etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

fn get_content_type(path: &str) -> &'static str {
    match path.rsplit('.').next().unwrap_or("") {
        "css" => "text/css",
        "js" => "application/javascript",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff2" => "font/woff2",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type() {
        assert_eq!(get_content_type("style.css"), "text/css");
        assert_eq!(get_content_type("img/logo.svg"), "image/svg+xml");
        assert_eq!(get_content_type("README"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_serves_embedded_stylesheet() {
        let response = serve_static(Path("style.css".to_string()), HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css");
        assert!(response.headers().contains_key(header::ETAG));
    }

    #[tokio::test]
    async fn test_unknown_asset_is_missing() {
        assert!(serve_static(Path("nope.css".to_string()), HeaderMap::new()).await.is_err());
    }
}
