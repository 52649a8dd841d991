//! # Route Groups and Resources
//!
//! A group collects the routes registered by a callback on a scoped router,
//! moves them into the parent table and lets a prefix, middleware and a name
//! prefix be applied to all of them at once. Groups nest: inner settings are
//! applied first, so outer prefixes and middleware end up outermost.

use crate::context::HttpContext;
use crate::error::Result;
use crate::router::{Method, RouteId, Router};
use std::sync::Arc;

/// Builder over the routes a group produced
#[derive(Debug)]
pub struct RouteGroup<'r> {
    router: &'r Router,
    routes: Vec<RouteId>,
}

impl RouteGroup<'_> {
    /// Prefix every route pattern in the group
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the prefixed pattern is
    /// invalid; no route is changed in that case.
    pub fn prefix(self, prefix: &str) -> Result<Self> {
        self.router
            .try_modify(&self.routes, |route| route.apply_prefix(prefix))?;
        Ok(self)
    }

    /// Run named middleware before each route's own middleware
    pub fn middleware<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        self.router
            .modify(&self.routes, |route| route.prepend_middleware(&names));
        self
    }

    /// Prepend `prefix.` to the name of every named route
    pub fn as_name(self, prefix: &str) -> Self {
        self.router
            .modify(&self.routes, |route| route.prefix_name(prefix));
        self
    }

    /// Registration indices of the grouped routes
    #[must_use]
    pub fn routes(&self) -> &[RouteId] {
        &self.routes
    }
}

/// The five conventional handlers of a REST resource
pub trait ResourceController: Send + Sync {
    /// `GET /name`
    ///
    /// # Errors
    ///
    /// Any handler failure.
    fn index(&self, ctx: &mut HttpContext) -> Result<()>;

    /// `POST /name`
    ///
    /// # Errors
    ///
    /// Any handler failure.
    fn store(&self, ctx: &mut HttpContext) -> Result<()>;

    /// `GET /name/:id`
    ///
    /// # Errors
    ///
    /// Any handler failure.
    fn show(&self, ctx: &mut HttpContext) -> Result<()>;

    /// `PUT|PATCH /name/:id`
    ///
    /// # Errors
    ///
    /// Any handler failure.
    fn update(&self, ctx: &mut HttpContext) -> Result<()>;

    /// `DELETE /name/:id`
    ///
    /// # Errors
    ///
    /// Any handler failure.
    fn destroy(&self, ctx: &mut HttpContext) -> Result<()>;
}

impl Router {
    /// Register routes on a scoped router and merge them into this one
    ///
    /// ```ignore
    /// router
    ///     .group(|api| {
    ///         api.get("/users", list_users)?;
    ///         api.post("/users", create_user)?.middleware(["auth"]);
    ///         Ok(())
    ///     })?
    ///     .prefix("/api/v1")?
    ///     .middleware(["throttle"]);
    /// ```
    ///
    /// # Errors
    ///
    /// Propagates the callback's failure; nothing is merged in that case.
    pub fn group<F>(&self, callback: F) -> Result<RouteGroup<'_>>
    where
        F: FnOnce(&Self) -> Result<()>,
    {
        let scoped = Self::new();
        callback(&scoped)?;
        let routes = self.merge(scoped);
        Ok(RouteGroup {
            router: self,
            routes,
        })
    }

    /// Register the five REST routes for `name`
    ///
    /// | Method    | Pattern       | Name           |
    /// |-----------|---------------|----------------|
    /// | GET       | `/name`       | `name.index`   |
    /// | POST      | `/name`       | `name.store`   |
    /// | GET       | `/name/:id`   | `name.show`    |
    /// | PUT/PATCH | `/name/:id`   | `name.update`  |
    /// | DELETE    | `/name/:id`   | `name.destroy` |
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if `name` does not form a valid
    /// pattern.
    pub fn resource<C>(&self, name: &str, controller: C) -> Result<RouteGroup<'_>>
    where
        C: ResourceController + 'static,
    {
        let name = name.trim_matches('/');
        let collection = format!("/{name}");
        let member = format!("/{name}/:id");
        let controller = Arc::new(controller);

        self.group(|scoped| {
            let c = Arc::clone(&controller);
            scoped
                .get(&collection, move |ctx| c.index(ctx))?
                .name(&format!("{name}.index"));

            let c = Arc::clone(&controller);
            scoped
                .post(&collection, move |ctx| c.store(ctx))?
                .name(&format!("{name}.store"));

            let c = Arc::clone(&controller);
            scoped
                .get(&member, move |ctx| c.show(ctx))?
                .name(&format!("{name}.show"));

            let c = Arc::clone(&controller);
            scoped
                .route(&[Method::Put, Method::Patch], &member, move |ctx| c.update(ctx))?
                .name(&format!("{name}.update"));

            let c = Arc::clone(&controller);
            scoped
                .delete(&member, move |ctx| c.destroy(ctx))?
                .name(&format!("{name}.destroy"));
            Ok(())
        })
    }
}
