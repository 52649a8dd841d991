//! Application routes.

use junction_core::{
    issue_token, Error, HttpContext, Method, ResourceController, Result, Router, VERSION,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Serialize)]
struct Post {
    id: u64,
    title: String,
    body: String,
}

#[derive(Debug, Deserialize)]
struct PostInput {
    title: String,
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct LoginInput {
    username: String,
}

/// In-memory posts resource
#[derive(Debug, Default)]
pub struct PostsController {
    posts: Mutex<Vec<Post>>,
    next_id: Mutex<u64>,
}

impl PostsController {
    fn with_posts<T>(&self, f: impl FnOnce(&mut Vec<Post>) -> T) -> T {
        let mut posts = self.posts.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut posts)
    }
}

impl ResourceController for PostsController {
    fn index(&self, ctx: &mut HttpContext) -> Result<()> {
        let posts = self.with_posts(|posts| posts.clone());
        ctx.response.json(&posts)
    }

    fn store(&self, ctx: &mut HttpContext) -> Result<()> {
        let input: PostInput = ctx.request.json()?;
        if input.title.trim().is_empty() {
            return Err(Error::unprocessable("title is required"));
        }
        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };
        let post = Post {
            id,
            title: input.title,
            body: input.body,
        };
        self.with_posts(|posts| posts.push(post.clone()));
        ctx.response.created(&post)
    }

    fn show(&self, ctx: &mut HttpContext) -> Result<()> {
        let id: u64 = ctx.param_as("id")?;
        let post = self
            .with_posts(|posts| posts.iter().find(|p| p.id == id).cloned())
            .ok_or_else(|| Error::not_found(format!("Post {id} not found")))?;
        ctx.response.json(&post)
    }

    fn update(&self, ctx: &mut HttpContext) -> Result<()> {
        let id: u64 = ctx.param_as("id")?;
        let input: PostInput = ctx.request.json()?;
        let updated = self.with_posts(|posts| {
            posts.iter_mut().find(|p| p.id == id).map(|post| {
                post.title = input.title;
                post.body = input.body;
                post.clone()
            })
        });
        match updated {
            Some(post) => ctx.response.json(&post),
            None => Err(Error::not_found(format!("Post {id} not found"))),
        }
    }

    fn destroy(&self, ctx: &mut HttpContext) -> Result<()> {
        let id: u64 = ctx.param_as("id")?;
        let removed = self.with_posts(|posts| {
            let before = posts.len();
            posts.retain(|p| p.id != id);
            posts.len() != before
        });
        if removed {
            ctx.response.no_content()
        } else {
            Err(Error::not_found(format!("Post {id} not found")))
        }
    }
}

/// Register every route
///
/// # Errors
///
/// Returns `Error::InvalidRoutePattern` if a pattern is malformed.
pub fn register_routes(router: &Router, app_name: &str, app_key: Option<&str>) -> Result<()> {
    let name = app_name.to_string();
    router
        .get("/", move |ctx| {
            ctx.response.json(&json!({
                "framework": name,
                "version": VERSION,
                "message": "Server is running!",
            }))
        })?
        .name("home");

    router
        .get("/health", |ctx| {
            ctx.response.json(&json!({ "status": "healthy", "uptime": "ok" }))
        })?
        .name("health");

    let secret = app_key.map(str::to_string);
    router
        .group(|api| {
            api.get("/status", |ctx| {
                ctx.response.json(&json!({ "api": "v1", "status": "active" }))
            })?
            .name("status");

            api.post("/login", move |ctx| {
                let Some(secret) = secret.as_deref() else {
                    return Err(Error::http(503, "Authentication is not configured"));
                };
                let input: LoginInput = ctx.request.json()?;
                let token = issue_token(secret, &input.username, TOKEN_TTL)?;
                ctx.response.json(&json!({ "token": token, "type": "bearer" }))
            })?
            .name("login");

            api.get("/me", |ctx| {
                let user = ctx.auth_user().cloned().unwrap_or_default();
                ctx.response.json(&json!({ "user": user }))
            })?
            .name("me")
            .middleware(["auth"]);

            api.resource("posts", PostsController::default())?
                .middleware(["throttle"]);
            Ok(())
        })?
        .prefix("/api/v1")?
        .as_name("api.v1");

    // Lets CORS preflight reach the global middleware on every path
    router
        .route(&[Method::Options], "/*path", |ctx| ctx.response.no_content())?
        .name("preflight");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use junction_core::{AppConfig, Dispatcher, Server, ServerConfig, TestClient};
    use std::sync::Arc;

    #[allow(clippy::cast_possible_truncation)]
    const THROTTLE_LIMIT: usize = crate::kernel::THROTTLE_BURST as usize;

    fn client(app_key: Option<&str>) -> TestClient {
        let config = AppConfig {
            app_key: app_key.map(str::to_string),
            ..AppConfig::default()
        };
        let router = Arc::new(Router::new());
        register_routes(&router, "Junction", app_key).unwrap();
        router.commit();

        let dispatcher = Dispatcher::new(router);
        crate::kernel::register_middleware(&dispatcher, &config);
        TestClient::new(Server::new(ServerConfig::default(), dispatcher))
    }

    #[test]
    fn test_home_and_health() {
        let client = client(None);
        client
            .get("/")
            .send()
            .assert_status(200)
            .assert_json_field("framework", "Junction")
            .assert_header("x-frame-options", "DENY");
        client
            .get("/health")
            .send()
            .assert_status(200)
            .assert_json_field("status", "healthy");
    }

    #[test]
    fn test_route_names() {
        let router = Router::new();
        register_routes(&router, "Junction", None).unwrap();
        let params = std::collections::HashMap::from([("id", "4")]);

        assert_eq!(router.url_for("home", &params).as_deref(), Some("/"));
        assert_eq!(
            router.url_for("api.v1.posts.show", &params).as_deref(),
            Some("/api/v1/posts/4")
        );
        assert_eq!(
            router.url_for("api.v1.status", &params).as_deref(),
            Some("/api/v1/status")
        );
    }

    #[test]
    fn test_posts_crud() {
        let client = client(None);
        client
            .post("/api/v1/posts")
            .with_json(&json!({"title": "First", "body": "Hello"}))
            .send()
            .assert_status(201)
            .assert_json_field("id", 1);

        client
            .get("/api/v1/posts/1")
            .send()
            .assert_status(200)
            .assert_json_field("title", "First");

        client
            .patch("/api/v1/posts/1")
            .with_json(&json!({"title": "Renamed"}))
            .send()
            .assert_status(200)
            .assert_json_field("title", "Renamed");

        client.delete("/api/v1/posts/1").send().assert_status(204);
        client
            .get("/api/v1/posts/1")
            .send()
            .assert_status(404)
            .assert_json_field("message", "Post 1 not found");
    }

    #[test]
    fn test_post_validation() {
        let client = client(None);
        client
            .post("/api/v1/posts")
            .with_json(&json!({"title": "  "}))
            .send()
            .assert_status(422);
        client
            .post("/api/v1/posts")
            .with_body("not json")
            .send()
            .assert_status(400);
    }

    #[test]
    fn test_login_then_me() {
        let client = client(Some("app-secret"));
        client.get("/api/v1/me").send().assert_status(401);

        let login = client
            .post("/api/v1/login")
            .with_json(&json!({"username": "ada"}))
            .send();
        login.assert_status(200);
        let token = login.json()["token"].as_str().unwrap().to_string();

        let me = client.get("/api/v1/me").with_bearer(&token).send();
        me.assert_status(200);
        assert_eq!(me.json()["user"]["sub"], "ada");
    }

    #[test]
    fn test_cors_preflight_on_api_routes() {
        let client = client(None);
        for path in ["/api/v1/posts", "/api/v1/posts/3", "/"] {
            let preflight = client
                .request(Method::Options, path)
                .with_header("origin", "https://app.example.com")
                .with_header("access-control-request-method", "POST")
                .send();
            preflight
                .assert_status(204)
                .assert_header("access-control-allow-origin", "https://app.example.com");
            assert!(preflight.text().is_empty());
        }
    }

    #[test]
    fn test_throttle_ignores_forwarded_for_rotation() {
        let client = client(None);
        let statuses: Vec<u16> = (0..=THROTTLE_LIMIT)
            .map(|i| {
                client
                    .get("/api/v1/posts")
                    .with_header("x-forwarded-for", &format!("198.51.100.{}", i % 250))
                    .send()
                    .status()
            })
            .collect();
        assert!(statuses[..THROTTLE_LIMIT].iter().all(|s| *s == 200));
        assert_eq!(statuses[THROTTLE_LIMIT], 429);
    }

    #[test]
    fn test_auth_without_key_is_500() {
        let client = client(None);
        client.get("/api/v1/me").send().assert_status(500);
        client
            .post("/api/v1/login")
            .with_json(&json!({"username": "ada"}))
            .send()
            .assert_status(503);
    }
}
