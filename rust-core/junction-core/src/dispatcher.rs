//! # Dispatcher
//!
//! Turns one [`Request`] into exactly one [`Response`]:
//!
//! 1. build a fresh [`HttpContext`]
//! 2. resolve the route; on a miss write the 404 body and stop
//! 3. bind route parameters
//! 4. collect global middleware followed by the route's named middleware
//! 5. compose the chain with the handler innermost
//! 6. run it; a failure with the response still open becomes an error body
//!
//! Dispatch is synchronous. The server runs each call on a blocking worker.

use crate::context::HttpContext;
use crate::error::Error;
use crate::middleware::{Middleware, MiddlewareChain};
use crate::request::Request;
use crate::response::Response;
use crate::route::Route;
use crate::router::{RouteMatch, Router};
use crate::state::AppState;
use hyper::StatusCode;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, warn};

const GENERIC_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Resolves routes and runs middleware chains
pub struct Dispatcher {
    router: Arc<Router>,
    global: RwLock<Vec<Arc<dyn Middleware>>>,
    named: RwLock<HashMap<String, Arc<dyn Middleware>>>,
    state: AppState,
    expose_errors: bool,
}

impl Dispatcher {
    /// Dispatcher over `router` with no middleware
    #[must_use]
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            global: RwLock::new(Vec::new()),
            named: RwLock::new(HashMap::new()),
            state: AppState::new(),
            expose_errors: false,
        }
    }

    /// Share `state` with every request
    #[must_use]
    pub fn with_state(mut self, state: AppState) -> Self {
        self.state = state;
        self
    }

    /// Include internal error text in 500 bodies (debug mode)
    #[must_use]
    pub const fn expose_errors(mut self, expose: bool) -> Self {
        self.expose_errors = expose;
        self
    }

    /// The route table
    #[must_use]
    pub const fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Shared application state
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// Run `middleware` on every matched request, after those already added
    pub fn use_middleware<M: Middleware + 'static>(&self, middleware: M) {
        self.use_shared(Arc::new(middleware));
    }

    /// [`Dispatcher::use_middleware`] for an already shared middleware
    pub fn use_shared(&self, middleware: Arc<dyn Middleware>) {
        debug!(middleware = middleware.name(), "Global middleware registered");
        self.global
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(middleware);
    }

    /// Make `middleware` available to routes under `name`
    ///
    /// Registering a name twice replaces the earlier middleware.
    pub fn register_named<M: Middleware + 'static>(&self, name: impl Into<String>, middleware: M) {
        let name = name.into();
        debug!(name = %name, middleware = middleware.name(), "Named middleware registered");
        self.named
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, Arc::new(middleware));
    }

    /// Handle one request
    pub fn dispatch(&self, request: Request) -> Response {
        let mut ctx = HttpContext::new(request, self.state.clone());
        let method = ctx.request.method;

        let Some(RouteMatch { route, params }) = self.router.find_route(method, &ctx.request.path)
        else {
            debug!(method = %method, path = %ctx.request.path, "No route matched");
            let message = format!("Cannot {method} {}", ctx.request.path);
            ctx.response.write_error(StatusCode::NOT_FOUND, &message);
            return ctx.into_response();
        };

        ctx.set_params(params);
        ctx.set_route_name(route.name().map(str::to_string));

        let chain = self.chain_for(&route);
        if let Err(err) = chain.run(&mut ctx, route.handler()) {
            self.report_failure(&mut ctx, &err);
        }
        ctx.into_response()
    }

    fn chain_for(&self, route: &Route) -> MiddlewareChain {
        let mut chain = MiddlewareChain::new();
        for middleware in self
            .global
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            chain.push(Arc::clone(middleware));
        }

        let named = self.named.read().unwrap_or_else(PoisonError::into_inner);
        for name in route.middleware() {
            match named.get(name) {
                Some(middleware) => chain.push(Arc::clone(middleware)),
                None => debug!(
                    name = %name,
                    pattern = %route.pattern(),
                    "Skipping unknown middleware"
                ),
            }
        }
        chain
    }

    fn report_failure(&self, ctx: &mut HttpContext, err: &Error) {
        let status = err.status();
        if err.is_client_facing() {
            warn!(
                method = %ctx.request.method,
                path = %ctx.request.path,
                status = status.as_u16(),
                error = %err,
                "Request failed"
            );
        } else {
            error!(
                method = %ctx.request.method,
                path = %ctx.request.path,
                error = %err,
                "Request failed"
            );
        }

        if ctx.response.is_committed() {
            error!(
                method = %ctx.request.method,
                path = %ctx.request.path,
                status = ctx.response.status_code(),
                "Failure after response was committed, client keeps the original response"
            );
            return;
        }

        let message = if err.is_client_facing() || self.expose_errors {
            err.to_string()
        } else {
            GENERIC_ERROR_MESSAGE.to_string()
        };
        ctx.response.write_error(status, &message);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let global = self.global.read().unwrap_or_else(PoisonError::into_inner);
        let named = self.named.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Dispatcher")
            .field("router", &self.router)
            .field(
                "global",
                &global.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("named", &named.keys().collect::<Vec<_>>())
            .field("expose_errors", &self.expose_errors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::group::ResourceController;
    use crate::middleware::{from_fn, RecoveryMiddleware};
    use crate::router::Method;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn request(method: Method, path: &str) -> Request {
        Request::new(method, path, HashMap::new(), None)
    }

    fn body_json(response: &Response) -> Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    fn recorder(log: &Log, label: &'static str, proceed: bool) -> impl Middleware {
        let log = Arc::clone(log);
        from_fn(move |ctx, next| {
            log.lock().unwrap().push(label);
            if proceed {
                next(ctx)
            } else {
                ctx.response.abort(403, "blocked")
            }
        })
    }

    fn ordered_setup(b_proceeds: bool) -> (Dispatcher, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let router = Arc::new(Router::new());
        let handler_log = Arc::clone(&log);
        router
            .get("/secret", move |ctx| {
                handler_log.lock().unwrap().push("handler");
                ctx.response.send("ok")
            })
            .unwrap()
            .middleware(["auth"]);
        router.commit();
        let dispatcher = Dispatcher::new(router);
        dispatcher.use_middleware(recorder(&log, "A", true));
        dispatcher.use_middleware(recorder(&log, "B", b_proceeds));
        dispatcher.register_named("auth", recorder(&log, "C", true));
        (dispatcher, log)
    }

    #[test]
    fn test_global_then_named_then_handler() {
        let (dispatcher, log) = ordered_setup(true);
        let response = dispatcher.dispatch(request(Method::Get, "/secret"));

        assert_eq!(response.status_code(), 200);
        assert_eq!(*log.lock().unwrap(), vec!["A", "B", "C", "handler"]);
    }

    #[test]
    fn test_short_circuit_skips_rest() {
        let (dispatcher, log) = ordered_setup(false);
        let response = dispatcher.dispatch(request(Method::Get, "/secret"));

        assert_eq!(response.status_code(), 403);
        assert_eq!(*log.lock().unwrap(), vec!["A", "B"]);
    }

    #[test]
    fn test_unknown_named_middleware_is_skipped() {
        let router = Arc::new(Router::new());
        router
            .get("/open", |ctx| ctx.response.send("ok"))
            .unwrap()
            .middleware(["does-not-exist"]);
        router.commit();
        let dispatcher = Dispatcher::new(router);

        let response = dispatcher.dispatch(request(Method::Get, "/open"));
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.body().as_ref(), b"ok");
    }

    #[test]
    fn test_not_found_body_runs_no_middleware() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let router = Arc::new(Router::new());
        router.get("/present", |ctx| ctx.response.send("ok")).unwrap();
        router.commit();
        let dispatcher = Dispatcher::new(router);
        dispatcher.use_middleware(recorder(&log, "A", true));

        let response = dispatcher.dispatch(request(Method::Get, "/missing"));
        assert_eq!(response.status_code(), 404);
        assert_eq!(
            body_json(&response),
            json!({"error": "Not Found", "message": "Cannot GET /missing", "status": 404})
        );
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_wrong_method_is_not_found() {
        let router = Arc::new(Router::new());
        router.get("/items", |ctx| ctx.response.send("ok")).unwrap();
        router.commit();
        let dispatcher = Dispatcher::new(router);

        let response = dispatcher.dispatch(request(Method::Post, "/items"));
        assert_eq!(response.status_code(), 404);
    }

    #[test]
    fn test_handler_failure_is_generic_500() {
        let router = Arc::new(Router::new());
        router
            .get("/boom", |_ctx| Err(Error::other("database password leaked")))
            .unwrap();
        router.commit();
        let dispatcher = Dispatcher::new(router);

        let response = dispatcher.dispatch(request(Method::Get, "/boom"));
        assert_eq!(response.status_code(), 500);
        assert_eq!(
            body_json(&response),
            json!({
                "error": "Internal Server Error",
                "message": GENERIC_ERROR_MESSAGE,
                "status": 500
            })
        );
    }

    #[test]
    fn test_debug_mode_exposes_error_text() {
        let router = Arc::new(Router::new());
        router
            .get("/boom", |_ctx| Err(Error::other("disk full")))
            .unwrap();
        router.commit();
        let dispatcher = Dispatcher::new(router).expose_errors(true);

        let response = dispatcher.dispatch(request(Method::Get, "/boom"));
        assert_eq!(body_json(&response)["message"], "disk full");
    }

    #[test]
    fn test_http_error_keeps_its_status() {
        let router = Arc::new(Router::new());
        router
            .get("/posts/:id", |ctx| {
                let id: u32 = ctx.param_as("id")?;
                ctx.response.json(&json!({ "id": id }))
            })
            .unwrap();
        router.commit();
        let dispatcher = Dispatcher::new(router);

        let response = dispatcher.dispatch(request(Method::Get, "/posts/abc"));
        assert_eq!(response.status_code(), 400);
        assert_eq!(body_json(&response)["error"], "Bad Request");

        let response = dispatcher.dispatch(request(Method::Get, "/posts/5"));
        assert_eq!(body_json(&response), json!({"id": 5}));
    }

    #[test]
    fn test_failure_after_commit_keeps_first_response() {
        let router = Arc::new(Router::new());
        router
            .post("/things", |ctx| {
                ctx.response.created(&json!({"id": 1}))?;
                Err(Error::other("bug after write"))
            })
            .unwrap();
        router.commit();
        let dispatcher = Dispatcher::new(router);

        let response = dispatcher.dispatch(request(Method::Post, "/things"));
        assert_eq!(response.status_code(), 201);
        assert_eq!(body_json(&response), json!({"id": 1}));
    }

    #[test]
    fn test_panic_recovered_as_500() {
        let router = Arc::new(Router::new());
        router.get("/panic", |_ctx| panic!("handler bug")).unwrap();
        router.commit();
        let dispatcher = Dispatcher::new(router);
        dispatcher.use_middleware(RecoveryMiddleware::new());

        let response = dispatcher.dispatch(request(Method::Get, "/panic"));
        assert_eq!(response.status_code(), 500);
        assert_eq!(body_json(&response)["status"], 500);
    }

    #[test]
    fn test_echo_param() {
        let router = Arc::new(Router::new());
        router
            .get("/echo/:name", |ctx| {
                let name = ctx.param("name").unwrap_or_default().to_string();
                ctx.response.json(&json!({ "name": name }))
            })
            .unwrap();
        router.commit();
        let dispatcher = Dispatcher::new(router);

        let response = dispatcher.dispatch(request(Method::Get, "/echo/john"));
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.body().as_ref(), br#"{"name":"john"}"#);
    }

    #[test]
    fn test_route_name_and_state_visible_to_handler() {
        let router = Arc::new(Router::new());
        router
            .get("/about", |ctx| {
                let app = ctx.state().get::<String>("app").unwrap_or_default();
                let route = ctx.route_name().unwrap_or("-").to_string();
                ctx.response.json(&json!({ "app": app, "route": route }))
            })
            .unwrap()
            .name("about");
        let state = AppState::new();
        state.set("app", "junction".to_string());
        router.commit();
        let dispatcher = Dispatcher::new(router).with_state(state);

        let response = dispatcher.dispatch(request(Method::Get, "/about"));
        assert_eq!(
            body_json(&response),
            json!({"app": "junction", "route": "about"})
        );
    }

    struct Posts;

    impl ResourceController for Posts {
        fn index(&self, ctx: &mut HttpContext) -> Result<()> {
            ctx.response.json(&json!([]))
        }
        fn store(&self, ctx: &mut HttpContext) -> Result<()> {
            ctx.response.created(&json!({"id": 1}))
        }
        fn show(&self, ctx: &mut HttpContext) -> Result<()> {
            let id = ctx.param("id").unwrap_or_default().to_string();
            ctx.response.json(&json!({ "id": id }))
        }
        fn update(&self, ctx: &mut HttpContext) -> Result<()> {
            ctx.response.json(&json!({"updated": true}))
        }
        fn destroy(&self, ctx: &mut HttpContext) -> Result<()> {
            ctx.response.no_content()
        }
    }

    #[test]
    fn test_resource_dispatch() {
        let router = Arc::new(Router::new());
        router.resource("posts", Posts).unwrap();
        router.commit();
        let dispatcher = Dispatcher::new(router);

        let cases = [
            (Method::Get, "/posts", 200),
            (Method::Post, "/posts", 201),
            (Method::Get, "/posts/9", 200),
            (Method::Put, "/posts/9", 200),
            (Method::Patch, "/posts/9", 200),
            (Method::Delete, "/posts/9", 204),
        ];
        for (method, path, status) in cases {
            let response = dispatcher.dispatch(request(method, path));
            assert_eq!(response.status_code(), status, "{method} {path}");
        }

        let show = dispatcher.dispatch(request(Method::Get, "/posts/9"));
        assert_eq!(body_json(&show), json!({"id": "9"}));
    }
}
