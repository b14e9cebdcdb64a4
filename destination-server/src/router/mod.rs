//! Declarative nested-path router
//!
//! Routes are described as a tree of path segments. Each node accepts at
//! most one handler per method and is sealed once its builder closure
//! returns. Sealing derives the rest from the tree shape:
//!
//! - the path template (`/api/v1/destinations/{country}`), recorded as
//!   `http.route` on the request span
//! - an `OPTIONS` responder listing the registered methods in `Allow`
//! - a CORS policy allowing exactly those methods
//! - a JSON `405` for other methods
//!
//! Literal components win over parameters at the same position, so
//! `/destinations/featured` reaches its own node even next to
//! `/destinations/{country}`.
//!
//! ```ignore
//! let app: Router<AppState> = router::build(|root| {
//!     root.path("/api/v1/destinations", |r| {
//!         r.get(list_locations)?;
//!         r.path("{country:string}", |r| {
//!             r.get(list_by_country)?;
//!             Ok(())
//!         })?;
//!         Ok(())
//!     })?;
//!     Ok(())
//! })?;
//! ```

mod method;
mod segment;
mod tree;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use thiserror::Error;

pub use method::Method;
pub use segment::{Component, ParamType};
pub use tree::{PathRouter, RouteTree};

/// Route tree construction failure. Fatal at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("{method} handler already registered for {path}")]
    DuplicateHandler { method: Method, path: String },

    #[error("cannot register {method} on {path}: node is sealed")]
    Sealed { method: Method, path: String },

    #[error("invalid path segment '{segment}': {reason}")]
    InvalidSegment {
        segment: String,
        reason: &'static str,
    },

    #[error("route {path} conflicts with {other}")]
    Conflict { path: String, other: String },
}

/// Build a router from a tree description rooted at `/`.
pub fn build<S, F>(describe: F) -> Result<Router<S>, RouteError>
where
    S: Clone + Send + Sync + 'static,
    F: FnOnce(&mut PathRouter<'_, S>) -> Result<(), RouteError>,
{
    let mut tree = RouteTree::new();
    describe(&mut tree.root())?;
    tree.into_router()
}

/// JSON error envelope, with the reason recorded on the request span.
pub(crate) fn reject(status: StatusCode, message: &str) -> Response {
    tracing::Span::current().record("error.reason", message);
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::extract::Path;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    use super::*;

    async fn send(app: &Router, method: &str, uri: &str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn allow(response: &Response) -> &str {
        response
            .headers()
            .get(header::ALLOW)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    #[test]
    fn duplicate_method_fails_construction() {
        let err = build::<(), _>(|root| {
            root.path("/items", |r| {
                r.get(|| async { "first" })?;
                r.get(|| async { "second" })?;
                Ok(())
            })?;
            Ok(())
        })
        .unwrap_err();

        assert_eq!(
            err,
            RouteError::DuplicateHandler {
                method: Method::Get,
                path: "/items".into()
            }
        );
    }

    #[test]
    fn sealed_node_rejects_registration() {
        let err = build::<(), _>(|root| {
            root.path("/items", |r| {
                r.get(|| async { "list" })?;
                Ok(())
            })?;
            root.path("/items", |r| {
                r.post(|| async { "create" })?;
                Ok(())
            })?;
            Ok(())
        })
        .unwrap_err();

        assert!(matches!(err, RouteError::Sealed { method: Method::Post, .. }));
    }

    #[test]
    fn sibling_params_with_different_names_conflict() {
        let err = build::<(), _>(|root| {
            root.path("/items/{id:int}", |r| {
                r.get(|| async { "by id" })?;
                Ok(())
            })?;
            root.path("/items/{slug}", |r| {
                r.get(|| async { "by slug" })?;
                Ok(())
            })?;
            Ok(())
        })
        .unwrap_err();

        assert!(matches!(err, RouteError::Conflict { .. }));
    }

    #[test]
    fn identical_templates_conflict() {
        let err = build::<(), _>(|root| {
            root.path("/items/{id}", |r| {
                r.get(|| async { "string" })?;
                Ok(())
            })?;
            root.path("/items", |r| {
                r.path("{id:int}", |r| {
                    r.delete(|| async { "int" })?;
                    Ok(())
                })?;
                Ok(())
            })?;
            Ok(())
        })
        .unwrap_err();

        assert!(matches!(err, RouteError::Conflict { .. }));
    }

    #[test]
    fn templates_follow_tree_shape() {
        let mut tree = RouteTree::<()>::new();
        tree.root()
            .path("/api/v1/destinations", |r| {
                r.get(|| async { "all" })?;
                r.path("{country:string}", |r| {
                    assert_eq!(r.template(), "/api/v1/destinations/{country}");
                    r.path("{city:string}", |r| {
                        r.get(|| async { "one" })?;
                        Ok(())
                    })?;
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();

        assert_eq!(
            tree.templates(),
            [
                "/api/v1/destinations",
                "/api/v1/destinations/{country}",
                "/api/v1/destinations/{country}/{city}",
            ]
        );
    }

    fn items() -> Router {
        build(|root| {
            root.path("/items", |r| {
                r.get(|| async { "list" })?
                    .post(|| async { "create" })?
                    .delete(|| async { "purge" })?;
                r.path("featured", |r| {
                    r.get(|| async { "featured" })?;
                    Ok(())
                })?;
                r.path("{id:uint}", |r| {
                    r.get(|Path(id): Path<u64>| async move { format!("item {id}") })?;
                    Ok(())
                })?;
                Ok(())
            })?;
            Ok(())
        })
        .unwrap()
    }

    #[tokio::test]
    async fn distinct_methods_dispatch() {
        let app = items();
        for (method, expected) in [("GET", "list"), ("POST", "create"), ("DELETE", "purge")] {
            let response = send(&app, method, "/items").await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_text(response).await, expected);
        }
    }

    #[tokio::test]
    async fn options_lists_registered_methods() {
        let app = items();
        let response = send(&app, "OPTIONS", "/items").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(allow(&response), "GET, POST, DELETE, OPTIONS");

        let response = send(&app, "OPTIONS", "/items/featured").await;
        assert_eq!(allow(&response), "GET, OPTIONS");
    }

    #[tokio::test]
    async fn options_from_a_browser_origin_is_not_a_preflight() {
        let app = items();
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/items/featured")
            .header(header::ORIGIN, "https://travel.example")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(allow(&response), "GET, OPTIONS");
    }

    #[tokio::test]
    async fn preflight_allows_registered_methods() {
        let app = items();
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/items")
            .header(header::ORIGIN, "https://travel.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let mut methods: Vec<String> = headers[header::ACCESS_CONTROL_ALLOW_METHODS]
            .to_str()
            .unwrap()
            .split(',')
            .map(|m| m.trim().to_string())
            .collect();
        methods.sort();
        assert_eq!(methods, ["DELETE", "GET", "OPTIONS", "POST"]);
    }

    #[tokio::test]
    async fn literal_beats_parameter() {
        let app = items();
        let response = send(&app, "GET", "/items/featured").await;
        assert_eq!(body_text(response).await, "featured");

        let response = send(&app, "GET", "/items/42").await;
        assert_eq!(body_text(response).await, "item 42");
    }

    #[tokio::test]
    async fn unknown_path_is_json_404() {
        let app = items();
        let response = send(&app, "GET", "/nowhere").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, r#"{"error":"route not found"}"#);
    }

    #[tokio::test]
    async fn typed_parameter_mismatch_is_404() {
        let app = items();
        let response = send(&app, "GET", "/items/-3").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unregistered_method_is_json_405() {
        let app = items();
        let response = send(&app, "PUT", "/items").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(allow(&response), "GET, POST, DELETE, OPTIONS");
        assert_eq!(body_text(response).await, r#"{"error":"method not allowed"}"#);
    }

    #[tokio::test]
    async fn handlerless_node_answers_options_only() {
        let app = build::<(), _>(|root| {
            root.path("/api", |r| {
                r.path("ping", |r| {
                    r.get(|| async { "pong" })?;
                    Ok(())
                })?;
                Ok(())
            })?;
            Ok(())
        })
        .unwrap();

        let response = send(&app, "OPTIONS", "/api").await;
        assert_eq!(allow(&response), "OPTIONS");
        let response = send(&app, "GET", "/api").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
