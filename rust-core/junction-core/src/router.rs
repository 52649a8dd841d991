//! # Route Table
//!
//! Owns every registered route and resolves `(method, path)` pairs.
//!
//! ## Layout
//!
//! - Registration list: append-only, indexed by [`RouteId`]
//! - Static index: method → exact pattern → route, O(1) lookup
//! - Dynamic lists: method → routes with `:param` / `*wildcard`, scanned in
//!   registration order (first match wins)
//!
//! [`Router::commit`] compiles the registration list into the two indices.
//! Until the first commit, lookups fall back to a linear scan of the
//! registration list. Mutations after a commit recompile under the write lock,
//! so a committed table never needs the fallback.

use crate::context::HttpContext;
use crate::error::{Error, Result};
use crate::route::Route;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// HTTP methods supported by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP PATCH
    Patch,
    /// HTTP DELETE
    Delete,
    /// HTTP HEAD
    Head,
    /// HTTP OPTIONS
    Options,
}

impl Method {
    /// Every method, used by [`Router::any`]
    pub const ALL: [Self; 7] = [
        Self::Get,
        Self::Post,
        Self::Put,
        Self::Patch,
        Self::Delete,
        Self::Head,
        Self::Options,
    ];

    /// Upper-case method name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::bad_request(format!("Unsupported method: {s}")))
    }
}

impl TryFrom<&hyper::Method> for Method {
    type Error = Error;

    fn try_from(method: &hyper::Method) -> Result<Self> {
        match *method {
            hyper::Method::GET => Ok(Self::Get),
            hyper::Method::POST => Ok(Self::Post),
            hyper::Method::PUT => Ok(Self::Put),
            hyper::Method::PATCH => Ok(Self::Patch),
            hyper::Method::DELETE => Ok(Self::Delete),
            hyper::Method::HEAD => Ok(Self::Head),
            hyper::Method::OPTIONS => Ok(Self::Options),
            _ => Err(Error::bad_request(format!("Unsupported method: {method}"))),
        }
    }
}

/// Index of a route in the registration list
pub type RouteId = usize;

/// A resolved route with its bound parameters
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The matched route
    pub route: Arc<Route>,
    /// Parameters bound from the path (empty for static routes)
    pub params: HashMap<String, String>,
}

#[derive(Default)]
struct RouteTable {
    routes: Vec<Arc<Route>>,
    static_routes: HashMap<Method, HashMap<String, RouteId>>,
    dynamic_routes: HashMap<Method, Vec<RouteId>>,
    committed: bool,
}

impl RouteTable {
    fn push(&mut self, route: Route) -> RouteId {
        let id = self.routes.len();
        debug!(
            methods = ?route.methods(),
            pattern = %route.pattern(),
            "Route registered"
        );
        self.routes.push(Arc::new(route));
        id
    }

    fn compile(&mut self) {
        self.static_routes.clear();
        self.dynamic_routes.clear();

        for (id, route) in self.routes.iter().enumerate() {
            let dynamic = route.is_dynamic();
            for method in route.methods() {
                if dynamic {
                    self.dynamic_routes.entry(*method).or_default().push(id);
                } else if self
                    .static_routes
                    .entry(*method)
                    .or_default()
                    .insert(route.pattern().to_string(), id)
                    .is_some()
                {
                    warn!(
                        method = %method,
                        pattern = %route.pattern(),
                        "Duplicate static route, last registration wins"
                    );
                }
            }
        }

        self.committed = true;
    }

    fn recompile_if_committed(&mut self) {
        if self.committed {
            self.compile();
        }
    }

    fn found(&self, id: RouteId, params: HashMap<String, String>) -> RouteMatch {
        RouteMatch {
            route: Arc::clone(&self.routes[id]),
            params,
        }
    }

    fn find(&self, method: Method, path: &str) -> Option<RouteMatch> {
        if let Some(&id) = self
            .static_routes
            .get(&method)
            .and_then(|by_path| by_path.get(&*normalize_path(path)))
        {
            return Some(self.found(id, HashMap::new()));
        }

        if let Some(ids) = self.dynamic_routes.get(&method) {
            for &id in ids {
                if let Some(params) = self.routes[id].matches(path) {
                    return Some(self.found(id, params));
                }
            }
        }

        if !self.committed {
            for (id, route) in self.routes.iter().enumerate() {
                if !route.accepts(method) {
                    continue;
                }
                if let Some(params) = route.matches(path) {
                    return Some(self.found(id, params));
                }
            }
        }

        None
    }
}

/// Collapse leading and trailing slashes the way [`Route::matches`] does, so
/// `/users/` and `//users` hit the static `/users` entry
fn normalize_path(path: &str) -> Cow<'_, str> {
    let inner = path.trim_matches('/');
    if inner.is_empty() {
        return Cow::Borrowed("/");
    }
    let start = path.len() - path.trim_start_matches('/').len();
    if start == 0 {
        Cow::Owned(format!("/{inner}"))
    } else {
        Cow::Borrowed(&path[start - 1..start + inner.len()])
    }
}

/// Thread-safe route table
///
/// Registration takes `&self`; lookups take the read lock, registration and
/// commit take the write lock.
#[derive(Default)]
pub struct Router {
    table: RwLock<RouteTable>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.read();
        f.debug_struct("Router")
            .field("routes", &table.routes.len())
            .field("committed", &table.committed)
            .finish()
    }
}

/// Handle to a freshly registered route
///
/// Name and middleware can still be appended through it.
#[derive(Debug, Clone, Copy)]
pub struct RouteRef<'r> {
    router: &'r Router,
    id: RouteId,
}

impl RouteRef<'_> {
    /// Registration index of the route
    #[must_use]
    pub const fn id(&self) -> RouteId {
        self.id
    }

    /// Name the route (for [`Router::url_for`])
    pub fn name(self, name: &str) -> Self {
        self.router.modify(&[self.id], |route| route.set_name(name));
        self
    }

    /// Append named middleware to the route
    pub fn middleware<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        self.router
            .modify(&[self.id], |route| route.push_middleware(&names));
        self
    }

    /// Snapshot of the route as currently registered
    #[must_use]
    pub fn route(&self) -> Option<Arc<Route>> {
        self.router.route_by_id(self.id)
    }
}

impl Router {
    /// Create a new empty router
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RouteTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RouteTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler for a set of methods
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn route<H>(&self, methods: &[Method], pattern: &str, handler: H) -> Result<RouteRef<'_>>
    where
        H: Fn(&mut HttpContext) -> Result<()> + Send + Sync + 'static,
    {
        let route = Route::new(methods, pattern, Arc::new(handler))?;
        let mut table = self.write();
        let id = table.push(route);
        table.recompile_if_committed();
        Ok(RouteRef { router: self, id })
    }

    /// Register a GET route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn get<H>(&self, pattern: &str, handler: H) -> Result<RouteRef<'_>>
    where
        H: Fn(&mut HttpContext) -> Result<()> + Send + Sync + 'static,
    {
        self.route(&[Method::Get], pattern, handler)
    }

    /// Register a POST route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn post<H>(&self, pattern: &str, handler: H) -> Result<RouteRef<'_>>
    where
        H: Fn(&mut HttpContext) -> Result<()> + Send + Sync + 'static,
    {
        self.route(&[Method::Post], pattern, handler)
    }

    /// Register a PUT route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn put<H>(&self, pattern: &str, handler: H) -> Result<RouteRef<'_>>
    where
        H: Fn(&mut HttpContext) -> Result<()> + Send + Sync + 'static,
    {
        self.route(&[Method::Put], pattern, handler)
    }

    /// Register a PATCH route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn patch<H>(&self, pattern: &str, handler: H) -> Result<RouteRef<'_>>
    where
        H: Fn(&mut HttpContext) -> Result<()> + Send + Sync + 'static,
    {
        self.route(&[Method::Patch], pattern, handler)
    }

    /// Register a DELETE route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn delete<H>(&self, pattern: &str, handler: H) -> Result<RouteRef<'_>>
    where
        H: Fn(&mut HttpContext) -> Result<()> + Send + Sync + 'static,
    {
        self.route(&[Method::Delete], pattern, handler)
    }

    /// Register a route for every supported method
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn any<H>(&self, pattern: &str, handler: H) -> Result<RouteRef<'_>>
    where
        H: Fn(&mut HttpContext) -> Result<()> + Send + Sync + 'static,
    {
        self.route(&Method::ALL, pattern, handler)
    }

    /// Compile the registration list into the static and dynamic indices
    ///
    /// Idempotent. Every route lands in exactly one index per method.
    pub fn commit(&self) {
        let mut table = self.write();
        table.compile();
        debug!(
            routes = table.routes.len(),
            static_methods = table.static_routes.len(),
            dynamic_methods = table.dynamic_routes.len(),
            "Route table committed"
        );
    }

    /// Whether [`Router::commit`] has run
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.read().committed
    }

    /// Resolve a route for the given method and path
    ///
    /// A path registered only under other methods is reported as `None`,
    /// the same as a path that matches nothing.
    #[must_use]
    pub fn find_route(&self, method: Method, path: &str) -> Option<RouteMatch> {
        self.read().find(method, path)
    }

    /// Route by registration index
    #[must_use]
    pub fn route_by_id(&self, id: RouteId) -> Option<Arc<Route>> {
        self.read().routes.get(id).cloned()
    }

    /// Snapshot of every registered route in registration order
    #[must_use]
    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.read().routes.clone()
    }

    /// Number of registered routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().routes.len()
    }

    /// Whether no routes are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a path for a named route
    ///
    /// Returns `None` if no route has that name or a parameter is missing.
    #[must_use]
    pub fn url_for(&self, name: &str, params: &HashMap<&str, &str>) -> Option<String> {
        let table = self.read();
        table
            .routes
            .iter()
            .find(|route| route.name() == Some(name))
            .and_then(|route| route.build_path(params))
    }

    /// Human-readable table of every route
    #[must_use]
    pub fn route_table(&self) -> String {
        let table = self.read();
        let mut out = format!(
            "{:<8} {:<30} {:<20} {}\n{}\n",
            "METHOD",
            "PATTERN",
            "NAME",
            "MIDDLEWARE",
            "-".repeat(80)
        );
        for route in &table.routes {
            let methods: Vec<&str> = route.methods().iter().map(|m| m.as_str()).collect();
            let _ = writeln!(
                out,
                "{:<8} {:<30} {:<20} {}",
                methods.join("|"),
                route.pattern(),
                route.name().unwrap_or(""),
                route.middleware().join(", ")
            );
        }
        out
    }

    /// Apply an infallible change to some routes
    pub(crate) fn modify(&self, ids: &[RouteId], mut change: impl FnMut(&mut Route)) {
        let mut table = self.write();
        for &id in ids {
            if let Some(route) = table.routes.get_mut(id) {
                change(Arc::make_mut(route));
            }
        }
        table.recompile_if_committed();
    }

    /// Apply a fallible change to some routes, all or nothing
    pub(crate) fn try_modify(
        &self,
        ids: &[RouteId],
        mut change: impl FnMut(&mut Route) -> Result<()>,
    ) -> Result<()> {
        let mut table = self.write();
        let mut updated = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(route) = table.routes.get(id) {
                let mut route = Route::clone(route);
                change(&mut route)?;
                updated.push((id, route));
            }
        }
        for (id, route) in updated {
            table.routes[id] = Arc::new(route);
        }
        table.recompile_if_committed();
        Ok(())
    }

    /// Move every route of `scoped` into this table
    pub(crate) fn merge(&self, scoped: Self) -> Vec<RouteId> {
        let scoped = scoped
            .table
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);

        let mut table = self.write();
        let ids = scoped
            .routes
            .into_iter()
            .map(|route| {
                let id = table.routes.len();
                table.routes.push(route);
                id
            })
            .collect();
        table.recompile_if_committed();
        ids
    }
}
