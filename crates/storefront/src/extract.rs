//! Request extractors whose rejections render like every other error.
//!
//! `axum::Json` rejects a malformed body with a plain-text 4xx. Handlers use
//! [`Json`] from here instead so a missing field or bad syntax comes back as
//! `{"success": false, "error": "..."}` with status 400.

use axum::{
    extract::{FromRequest, OptionalFromRequest, Request},
    response::{IntoResponse, Response},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::AppError;

/// JSON body extractor and response.
#[derive(Debug, Clone, Copy, Default, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct Json<T>(pub T);

/// An absent body (no JSON content type) is `None`; a present but invalid
/// one is still a 400.
impl<T, S> OptionalFromRequest<S> for Json<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Option<Self>, Self::Rejection> {
        let body = <axum::Json<T> as OptionalFromRequest<S>>::from_request(req, state).await?;
        Ok(body.map(|axum::Json(value)| Self(value)))
    }
}

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{StatusCode, header},
        routing::post,
    };
    use serde::Deserialize;
    use tower::ServiceExt;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Named {
        name: String,
    }

    async fn echo(Json(body): Json<Named>) -> Json<String> {
        Json(body.name)
    }

    async fn echo_optional(body: Option<Json<Named>>) -> Json<String> {
        Json(body.map_or_else(|| "none".to_owned(), |Json(b)| b.name))
    }

    fn app() -> Router {
        Router::new()
            .route("/echo", post(echo))
            .route("/optional", post(echo_optional))
    }

    async fn call(path: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut builder = axum::http::Request::post(path);
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_owned())))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_valid_body_is_extracted() {
        let (status, body) = call("/echo", Some(r#"{"name":"Aki"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Aki");
    }

    #[tokio::test]
    async fn test_missing_field_is_json_400() {
        let (status, body) = call("/echo", Some("{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("name"));
    }

    #[tokio::test]
    async fn test_syntax_error_and_missing_content_type_are_json_400() {
        let (status, body) = call("/echo", Some("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, body) = call("/echo", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_optional_body() {
        let (status, body) = call("/optional", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "none");

        let (status, body) = call("/optional", Some(r#"{"name":"Ren"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Ren");

        let (status, body) = call("/optional", Some("[]")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }
}
