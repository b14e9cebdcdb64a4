//! Custom Axum extractors

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use destination_db::Scope;

/// Cancellation scope of the current request.
///
/// Inserted by the scope middleware and canceled when the request future is
/// dropped, e.g. on client disconnect. Handlers pass it to every database
/// call. Outside the middleware a fresh, never-canceled scope is returned.
#[derive(Debug, Clone)]
pub struct RequestScope(pub Scope);

impl<S> FromRequestParts<S> for RequestScope
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let scope = parts.extensions.get::<Scope>().cloned().unwrap_or_default();
        Ok(Self(scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn reads_scope_from_extensions() {
        let scope = Scope::new();
        let (mut parts, _) = Request::builder()
            .extension(scope.clone())
            .body(())
            .unwrap()
            .into_parts();

        let RequestScope(extracted) = RequestScope::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        scope.cancel();
        assert!(extracted.is_cancelled());
    }

    #[tokio::test]
    async fn falls_back_to_fresh_scope() {
        let (mut parts, _) = Request::builder().body(()).unwrap().into_parts();
        let RequestScope(scope) = RequestScope::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert!(!scope.is_cancelled());
        assert!(scope.deadline().is_none());
    }
}
