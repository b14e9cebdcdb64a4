//! Route tree construction and sealing

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::Request;
use axum::handler::Handler;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{self, MethodRouter};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use super::method::Method;
use super::segment::{self, Component};
use super::{reject, RouteError};

type NodeId = usize;

const ROOT: NodeId = 0;

struct Node<S> {
    components: Vec<Component>,
    template: String,
    children: Vec<(String, NodeId)>,
    handlers: BTreeMap<Method, MethodRouter<S>>,
    sealed: bool,
}

impl<S> Node<S> {
    fn new(components: Vec<Component>) -> Self {
        Self {
            template: segment::template(&components),
            components,
            children: Vec::new(),
            handlers: BTreeMap::new(),
            sealed: false,
        }
    }
}

/// A route tree under construction.
///
/// Most callers use [`build`](super::build); the tree itself is exposed for
/// inspecting templates before the router is assembled.
pub struct RouteTree<S> {
    nodes: Vec<Node<S>>,
}

impl<S> Default for RouteTree<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> RouteTree<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(Vec::new())],
        }
    }

    /// Builder positioned at the root node.
    pub fn root(&mut self) -> PathRouter<'_, S> {
        PathRouter {
            tree: self,
            node: ROOT,
        }
    }

    /// Templates of every node that will be routed, in declaration order.
    pub fn templates(&self) -> Vec<&str> {
        self.routed().map(|id| self.nodes[id].template.as_str()).collect()
    }

    fn routed(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).filter(|&id| id != ROOT || !self.nodes[id].handlers.is_empty())
    }

    fn child(&mut self, parent: NodeId, segment: &str) -> Result<NodeId, RouteError> {
        let key = segment.trim_matches('/');
        if let Some(&(_, id)) = self.nodes[parent].children.iter().find(|(k, _)| k == key) {
            return Ok(id);
        }

        let mut components = self.nodes[parent].components.clone();
        components.extend(segment::parse_segment(segment)?);
        let id = self.nodes.len();
        self.nodes.push(Node::new(components));
        self.nodes[parent].children.push((key.to_string(), id));
        Ok(id)
    }

    /// Seal the root, check the tree for conflicts and assemble the router.
    pub fn into_router(mut self) -> Result<Router<S>, RouteError> {
        self.nodes[ROOT].sealed = true;
        self.check_conflicts()?;

        let routed: Vec<NodeId> = self.routed().collect();
        let mut router = Router::new();
        for (id, node) in self.nodes.into_iter().enumerate() {
            if routed.contains(&id) {
                tracing::debug!(route = %node.template, "registering route");
                let template = node.template.clone();
                router = router.route(&template, seal(node));
            }
        }
        Ok(router.fallback(route_not_found))
    }

    fn check_conflicts(&self) -> Result<(), RouteError> {
        let routed: Vec<&Node<S>> = self.routed().map(|id| &self.nodes[id]).collect();
        for (i, a) in routed.iter().enumerate() {
            for b in &routed[i + 1..] {
                if a.template == b.template || params_collide(&a.components, &b.components) {
                    return Err(RouteError::Conflict {
                        path: b.template.clone(),
                        other: a.template.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Two routes that agree up to some position and then bind differently
/// named parameters there.
fn params_collide(a: &[Component], b: &[Component]) -> bool {
    for (x, y) in a.iter().zip(b) {
        match (x, y) {
            (Component::Literal(x), Component::Literal(y)) if x == y => continue,
            (Component::Param { name: x, .. }, Component::Param { name: y, .. }) => {
                if x != y {
                    return true;
                }
            }
            _ => return false,
        }
    }
    false
}

/// Builder scoped to one node of a [`RouteTree`].
pub struct PathRouter<'t, S> {
    tree: &'t mut RouteTree<S>,
    node: NodeId,
}

impl<S> PathRouter<'_, S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Descend into `segment`, run `build` there, then seal that node.
    pub fn path<F>(&mut self, segment: &str, build: F) -> Result<&mut Self, RouteError>
    where
        F: FnOnce(&mut PathRouter<'_, S>) -> Result<(), RouteError>,
    {
        let child = self.tree.child(self.node, segment)?;
        let mut scoped = PathRouter {
            tree: &mut *self.tree,
            node: child,
        };
        build(&mut scoped)?;
        self.tree.nodes[child].sealed = true;
        Ok(self)
    }

    /// Template of the current node
    pub fn template(&self) -> &str {
        &self.tree.nodes[self.node].template
    }

    pub fn get<H, T>(&mut self, handler: H) -> Result<&mut Self, RouteError>
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.on(Method::Get, handler)
    }

    pub fn post<H, T>(&mut self, handler: H) -> Result<&mut Self, RouteError>
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.on(Method::Post, handler)
    }

    pub fn put<H, T>(&mut self, handler: H) -> Result<&mut Self, RouteError>
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.on(Method::Put, handler)
    }

    pub fn patch<H, T>(&mut self, handler: H) -> Result<&mut Self, RouteError>
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.on(Method::Patch, handler)
    }

    pub fn delete<H, T>(&mut self, handler: H) -> Result<&mut Self, RouteError>
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.on(Method::Delete, handler)
    }

    pub fn head<H, T>(&mut self, handler: H) -> Result<&mut Self, RouteError>
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.on(Method::Head, handler)
    }

    fn on<H, T>(&mut self, method: Method, handler: H) -> Result<&mut Self, RouteError>
    where
        H: Handler<T, S>,
        T: 'static,
    {
        let node = &mut self.tree.nodes[self.node];
        if node.sealed {
            return Err(RouteError::Sealed {
                method,
                path: node.template.clone(),
            });
        }
        if node.handlers.contains_key(&method) {
            return Err(RouteError::DuplicateHandler {
                method,
                path: node.template.clone(),
            });
        }
        node.handlers
            .insert(method, routing::on(method.filter(), handler));
        Ok(self)
    }
}

/// Route metadata carried into the per-node middleware
struct RouteInfo {
    template: String,
    components: Vec<Component>,
    typed: bool,
    allow: HeaderValue,
}

/// Turn a sealed node into its method router: registered handlers, a 405
/// fallback, CORS scoped to the registered methods, and an outer layer that
/// records the route on the request span and answers plain OPTIONS.
///
/// The CORS layer treats every OPTIONS as a preflight, so only requests
/// carrying `Access-Control-Request-Method` are passed through to it.
fn seal<S>(node: Node<S>) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    let mut allowed: Vec<Method> = node.handlers.keys().copied().collect();
    allowed.push(Method::Options);
    let allow = allow_header(&allowed);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(allowed.iter().map(|m| m.to_http()).collect::<Vec<_>>())
        .allow_headers([
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("traceparent"),
            HeaderName::from_static("tracestate"),
        ]);

    let info = Arc::new(RouteInfo {
        typed: node
            .components
            .iter()
            .any(|c| matches!(c, Component::Param { ty, .. } if *ty != segment::ParamType::String)),
        template: node.template,
        components: node.components,
        allow: allow.clone(),
    });

    let fallback_allow = allow;
    node.handlers
        .into_values()
        .fold(MethodRouter::new(), MethodRouter::merge)
        .fallback(move || async move {
            let mut response = reject(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
            response.headers_mut().insert(header::ALLOW, fallback_allow);
            response
        })
        .layer::<_, Infallible>(cors)
        .layer(middleware::from_fn(move |req: Request, next: Next| {
            let info = Arc::clone(&info);
            async move { record_route(&info, req, next).await }
        }))
}

async fn record_route(info: &RouteInfo, req: Request, next: Next) -> Response {
    tracing::Span::current().record("http.route", info.template.as_str());
    if info.typed && !segment::accepts(&info.components, req.uri().path()) {
        return route_not_found().await;
    }
    if req.method() == axum::http::Method::OPTIONS && !is_preflight(&req) {
        return (StatusCode::NO_CONTENT, [(header::ALLOW, info.allow.clone())]).into_response();
    }
    next.run(req).await
}

fn is_preflight(req: &Request) -> bool {
    let headers = req.headers();
    headers.contains_key(header::ORIGIN)
        && headers.contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

fn allow_header(methods: &[Method]) -> HeaderValue {
    let list = methods
        .iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    HeaderValue::from_str(&list).unwrap_or(HeaderValue::from_static("OPTIONS"))
}

async fn route_not_found() -> Response {
    reject(StatusCode::NOT_FOUND, "route not found")
}
