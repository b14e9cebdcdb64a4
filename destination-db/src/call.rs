//! Per-call deadline, cancellation and span

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::field::{self, Empty};
use tracing::{Instrument, Span};

use crate::error::{DbError, Result};
use crate::pool::Target;
use crate::scope::Scope;
use crate::statement::Statement;

/// One bounded, traced operation against the pool.
///
/// The span stays open for as long as any handle to it lives; callers that
/// need the span to cover result consumption keep a clone.
pub(crate) struct Call {
    span: Span,
    token: CancellationToken,
    deadline: Instant,
}

impl Call {
    /// Call running `stmt`; the span is named after the statement text.
    pub(crate) fn statement(
        target: &Target,
        stmt: &Statement,
        scope: &Scope,
        ceiling: Duration,
    ) -> Self {
        let summary = stmt.summary();
        Self::with_span(span_for(target, &summary, Some(stmt.sql())), scope, ceiling)
    }

    /// Call without statement text, such as `sql commit`.
    pub(crate) fn control(
        target: &Target,
        name: &'static str,
        scope: &Scope,
        ceiling: Duration,
    ) -> Self {
        Self::with_span(span_for(target, name, None), scope, ceiling)
    }

    fn with_span(span: Span, scope: &Scope, ceiling: Duration) -> Self {
        Self {
            span,
            token: scope.token().clone(),
            deadline: scope.bound(ceiling),
        }
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    /// Drive `op` inside the span until it completes or the call is
    /// interrupted. Faults are recorded on the span.
    pub(crate) async fn run<T, F>(&self, op: F, stmt: Option<&Statement>) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let guarded = async {
            tokio::select! {
                biased;
                err = self.interrupted() => Err(err),
                result = op => result,
            }
        };
        let result = guarded.instrument(self.span.clone()).await;
        if let Err(err) = &result {
            record_error(&self.span, err, stmt);
        }
        result
    }

    /// Resolves once the token is canceled or the deadline passes.
    /// Cancellation wins when both are ready.
    async fn interrupted(&self) -> DbError {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => DbError::Canceled,
            _ = tokio::time::sleep_until(self.deadline) => DbError::DeadlineExceeded,
        }
    }
}

fn span_for(target: &Target, name: &str, statement: Option<&str>) -> Span {
    tracing::info_span!(
        "db.query",
        otel.name = name,
        otel.kind = "client",
        otel.status_code = Empty,
        db.system = target.system,
        db.name = %target.database,
        db.user = %target.user,
        db.statement = statement,
        net.peer.name = %target.peer(),
        db.params = Empty,
        error = Empty,
        error.kind = Empty,
        error.message = Empty,
    )
}

/// Annotate `span` with a failure. `NotFound` is an outcome, not a fault.
pub(crate) fn record_error(span: &Span, err: &DbError, stmt: Option<&Statement>) {
    if !err.is_fault() {
        return;
    }
    span.record("otel.status_code", "ERROR");
    span.record("error", true);
    span.record("error.kind", err.kind().as_str());
    span.record("error.message", field::display(err));
    if let Some(stmt) = stmt {
        span.record("db.params", field::debug(stmt.params()));
    }
    tracing::debug!(parent: span, error = %err, kind = %err.kind(), "database call failed");
}

#[cfg(test)]
mod tests {
    use std::fmt;
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id, Record};
    use tracing::Subscriber;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    use super::*;

    /// Collects every span field value as `(name, rendered value)`.
    #[derive(Clone, Default)]
    struct SpanFields(Arc<Mutex<Vec<(String, String)>>>);

    impl SpanFields {
        fn get(&self, name: &str) -> Option<String> {
            let fields = self.0.lock().unwrap();
            fields
                .iter()
                .rev()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value.clone())
        }
    }

    impl Visit for SpanFields {
        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.lock().unwrap().push((field.name().to_string(), value.to_string()));
        }

        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.lock().unwrap().push((field.name().to_string(), format!("{value:?}")));
        }
    }

    impl<S: Subscriber> Layer<S> for SpanFields {
        fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
            attrs.record(&mut self.clone());
        }

        fn on_record(&self, _id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
            values.record(&mut self.clone());
        }
    }

    fn capture() -> (SpanFields, tracing::subscriber::DefaultGuard) {
        let fields = SpanFields::default();
        let subscriber = tracing_subscriber::registry().with(fields.clone());
        (fields, tracing::subscriber::set_default(subscriber))
    }

    fn target() -> Target {
        Target {
            system: "memory",
            host: "localhost".into(),
            port: 0,
            user: "fixture".into(),
            database: "fixture".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wins_over_completed_work() {
        let scope = Scope::new();
        scope.cancel();
        let call = Call::control(&target(), "sql commit", &scope, Duration::from_secs(20));
        let result = call.run(async { Ok(1) }, None).await;
        assert!(matches!(result, Err(DbError::Canceled)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_pending_work() {
        let scope = Scope::new();
        let call = Call::control(&target(), "sql commit", &scope, Duration::from_secs(3));
        let start = Instant::now();
        let result: Result<()> = call.run(std::future::pending(), None).await;
        assert!(matches!(result, Err(DbError::DeadlineExceeded)));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn completed_work_passes_through() {
        let call = Call::statement(
            &target(),
            &Statement::new("SELECT 1"),
            &Scope::new(),
            Duration::from_secs(20),
        );
        assert_eq!(call.run(async { Ok(7) }, None).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn statement_span_carries_connection_tags() {
        let (fields, _guard) = capture();
        let stmt = Statement::new("SELECT city FROM destination WHERE country = $1").bind("France");
        let call = Call::statement(&target(), &stmt, &Scope::new(), Duration::from_secs(20));
        let result: Result<()> = call
            .run(async { Err(DbError::other("relation missing")) }, Some(&stmt))
            .await;
        assert!(result.is_err());

        assert_eq!(fields.get("db.statement").as_deref(), Some(stmt.sql()));
        assert_eq!(fields.get("db.system").as_deref(), Some("memory"));
        assert_eq!(fields.get("db.name").as_deref(), Some("fixture"));
        assert_eq!(fields.get("db.user").as_deref(), Some("fixture"));
        assert_eq!(fields.get("net.peer.name").as_deref(), Some("localhost:0"));
        assert_eq!(fields.get("otel.kind").as_deref(), Some("client"));

        assert_eq!(fields.get("otel.status_code").as_deref(), Some("ERROR"));
        assert_eq!(fields.get("error.kind").as_deref(), Some("other"));
        assert_eq!(fields.get("error.message").as_deref(), Some("relation missing"));
        assert_eq!(fields.get("db.params").as_deref(), Some(r#"[Text("France")]"#));
    }

    #[tokio::test]
    async fn not_found_is_not_marked_as_error() {
        let (fields, _guard) = capture();
        let stmt = Statement::new("SELECT city FROM destination WHERE city = $1").bind("Atlantis");
        let call = Call::statement(&target(), &stmt, &Scope::new(), Duration::from_secs(20));
        let result: Result<()> = call.run(async { Err(DbError::NotFound) }, Some(&stmt)).await;
        assert!(matches!(result, Err(DbError::NotFound)));

        assert_eq!(fields.get("db.statement").as_deref(), Some(stmt.sql()));
        assert_eq!(fields.get("otel.status_code"), None);
        assert_eq!(fields.get("error.kind"), None);
        assert_eq!(fields.get("db.params"), None);
    }

    #[tokio::test]
    async fn control_span_has_no_statement() {
        let (fields, _guard) = capture();
        let call = Call::control(&target(), "sql commit", &Scope::new(), Duration::from_secs(20));
        call.run(async { Ok(()) }, None).await.unwrap();

        assert_eq!(fields.get("otel.name").as_deref(), Some("sql commit"));
        assert_eq!(fields.get("db.statement"), None);
    }
}
