//! # Route Definition
//!
//! A registered endpoint: pattern, accepted methods, handler and metadata.
//!
//! Pattern syntax is `/`-separated. A segment starting with `:` captures exactly
//! one non-empty path segment; a segment starting with `*` must be last and
//! captures the remainder of the path joined by `/`.

use crate::context::HttpContext;
use crate::error::{Error, Result};
use crate::request::percent_decode;
use crate::router::Method;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Terminal request handler
pub type Handler = Arc<dyn Fn(&mut HttpContext) -> Result<()> + Send + Sync>;

/// One parsed pattern segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Must equal the path segment exactly
    Literal(String),
    /// `:name` - binds one path segment
    Param(String),
    /// `*name` - binds every remaining segment
    Wildcard(String),
}

/// A registered route
#[derive(Clone)]
pub struct Route {
    pattern: String,
    segments: Vec<Segment>,
    methods: Vec<Method>,
    handler: Handler,
    name: Option<String>,
    middleware: Vec<String>,
    param_names: Vec<String>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern)
            .field("methods", &self.methods)
            .field("name", &self.name)
            .field("middleware", &self.middleware)
            .field("param_names", &self.param_names)
            .finish_non_exhaustive()
    }
}

impl Route {
    /// Create a route from a pattern
    ///
    /// The pattern is normalized to a single leading slash and no trailing
    /// slash (`/` stays `/`). Duplicate methods are collapsed.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if a parameter name is empty or
    /// repeated, or if a wildcard is not the last segment.
    pub fn new(methods: &[Method], pattern: &str, handler: Handler) -> Result<Self> {
        let (segments, param_names) = parse_pattern(pattern)?;

        let mut unique_methods = Vec::with_capacity(methods.len());
        for method in methods {
            if !unique_methods.contains(method) {
                unique_methods.push(*method);
            }
        }

        Ok(Self {
            pattern: render(&segments),
            segments,
            methods: unique_methods,
            handler,
            name: None,
            middleware: Vec::new(),
            param_names,
        })
    }

    /// Normalized pattern string
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Parsed segments
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Accepted methods
    #[must_use]
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// Whether this route accepts `method`
    #[must_use]
    pub fn accepts(&self, method: Method) -> bool {
        self.methods.contains(&method)
    }

    /// Route handler
    #[must_use]
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Route name, if any
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Named middleware in declaration order
    #[must_use]
    pub fn middleware(&self) -> &[String] {
        &self.middleware
    }

    /// Parameter and wildcard names in pattern order
    #[must_use]
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// Whether the pattern contains a parameter or wildcard segment
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.segments
            .iter()
            .any(|s| !matches!(s, Segment::Literal(_)))
    }

    /// Match a request path, returning bound parameters
    ///
    /// Literal segments compare exactly, `:name` binds one non-empty segment,
    /// and `*name` binds the rest of the path (possibly empty) and stops.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let trimmed = path.trim_matches('/');
        let parts: Vec<&str> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').collect()
        };

        let mut params = HashMap::with_capacity(self.param_names.len());
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard(name) => {
                    let rest = parts.get(i..).unwrap_or_default().join("/");
                    params.insert(name.clone(), percent_decode(&rest, false));
                    return Some(params);
                }
                Segment::Param(name) => {
                    let part = parts.get(i).filter(|p| !p.is_empty())?;
                    params.insert(name.clone(), percent_decode(part, false));
                }
                Segment::Literal(literal) => {
                    if parts.get(i) != Some(&literal.as_str()) {
                        return None;
                    }
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }

    /// Build a concrete path by substituting parameters
    ///
    /// Returns `None` when a parameter is missing.
    #[must_use]
    pub fn build_path(&self, params: &HashMap<&str, &str>) -> Option<String> {
        let mut parts = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => parts.push(literal.clone()),
                Segment::Param(name) => parts.push((*params.get(name.as_str())?).to_string()),
                Segment::Wildcard(name) => {
                    let rest = params.get(name.as_str())?.trim_matches('/');
                    if !rest.is_empty() {
                        parts.push(rest.to_string());
                    }
                }
            }
        }
        Some(format!("/{}", parts.join("/")))
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub(crate) fn prefix_name(&mut self, prefix: &str) {
        if let Some(name) = self.name.take() {
            self.name = Some(format!("{prefix}.{name}"));
        }
    }

    pub(crate) fn push_middleware(&mut self, names: &[String]) {
        self.middleware.extend_from_slice(names);
    }

    pub(crate) fn prepend_middleware(&mut self, names: &[String]) {
        let mut merged = names.to_vec();
        merged.append(&mut self.middleware);
        self.middleware = merged;
    }

    /// Prefix the pattern, re-deriving segments and parameter names
    pub(crate) fn apply_prefix(&mut self, prefix: &str) -> Result<()> {
        let (segments, param_names) = parse_pattern(&format!("{prefix}/{}", self.pattern))?;
        self.pattern = render(&segments);
        self.segments = segments;
        self.param_names = param_names;
        Ok(())
    }
}

/// Parse a pattern into segments and parameter names
///
/// Empty segments (duplicate or trailing slashes) are dropped.
fn parse_pattern(pattern: &str) -> Result<(Vec<Segment>, Vec<String>)> {
    let invalid = |reason: String| Error::InvalidRoutePattern {
        pattern: pattern.to_string(),
        reason,
    };

    let mut segments = Vec::new();
    let mut param_names: Vec<String> = Vec::new();

    for part in pattern.split('/').filter(|p| !p.is_empty()) {
        if matches!(segments.last(), Some(Segment::Wildcard(_))) {
            return Err(invalid("wildcard segment must be the last segment".to_string()));
        }

        let (segment, name) = if let Some(name) = part.strip_prefix(':') {
            (Segment::Param(name.to_string()), name)
        } else if let Some(name) = part.strip_prefix('*') {
            (Segment::Wildcard(name.to_string()), name)
        } else {
            segments.push(Segment::Literal(part.to_string()));
            continue;
        };

        if name.is_empty() {
            return Err(invalid(format!("segment '{part}' has an empty name")));
        }
        if param_names.iter().any(|existing| existing == name) {
            return Err(invalid(format!("parameter '{name}' appears more than once")));
        }
        param_names.push(name.to_string());
        segments.push(segment);
    }

    Ok((segments, param_names))
}

fn render(segments: &[Segment]) -> String {
    let parts: Vec<String> = segments
        .iter()
        .map(|s| match s {
            Segment::Literal(l) => l.clone(),
            Segment::Param(n) => format!(":{n}"),
            Segment::Wildcard(n) => format!("*{n}"),
        })
        .collect();
    format!("/{}", parts.join("/"))
}
