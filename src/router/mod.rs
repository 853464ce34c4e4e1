mod pattern;

pub use pattern::{Captures, PathPattern, PatternError};

use crate::handler::{Handler, HandlerResult};
use crate::http::{HttpContext, Method};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct RouteBinding {
    method: Method,
    pattern: PathPattern,
    handler: Arc<dyn Handler>,
}

impl RouteBinding {
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn template(&self) -> &str {
        self.pattern.template()
    }

    pub fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }
}

impl fmt::Debug for RouteBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteBinding")
            .field("method", &self.method)
            .field("template", &self.pattern.template())
            .finish_non_exhaustive()
    }
}

/// The winning binding for a request plus what its pattern captured.
#[derive(Debug)]
pub struct MatchResult<'r> {
    pub binding: &'r RouteBinding,
    pub params: HashMap<String, String>,
    pub wildcards: Vec<String>,
}

/// Ordered route table with first-match-wins lookup.
///
/// Bindings are appended during setup and only read while serving, so more
/// specific templates must be registered before catch-alls.
#[derive(Clone, Default, Debug)]
pub struct Router {
    bindings: Vec<RouteBinding>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(
        &mut self,
        method: Method,
        template: &str,
        handler: F,
    ) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_handler(method, template, Arc::new(handler))
    }

    pub fn register_handler(
        &mut self,
        method: Method,
        template: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<&mut Self, PatternError> {
        let pattern = PathPattern::compile(template)?;
        self.bindings.push(RouteBinding {
            method,
            pattern,
            handler,
        });
        Ok(self)
    }

    pub fn get<F>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(Method::GET, template, handler)
    }

    pub fn post<F>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(Method::POST, template, handler)
    }

    pub fn put<F>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(Method::PUT, template, handler)
    }

    pub fn patch<F>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(Method::PATCH, template, handler)
    }

    pub fn delete<F>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(Method::DELETE, template, handler)
    }

    pub fn head<F>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(Method::HEAD, template, handler)
    }

    pub fn options<F>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(Method::OPTIONS, template, handler)
    }

    /// Appends every binding of `router` under `prefix`, keeping its order.
    pub fn mount(&mut self, prefix: &str, router: Router) -> Result<&mut Self, PatternError> {
        let prefix = prefix.trim_end_matches('/');
        for binding in router.bindings {
            let template = format!("{}{}", prefix, binding.pattern.template());
            self.register_handler(binding.method, &template, binding.handler)?;
        }
        Ok(self)
    }

    /// Scans bindings in registration order; the first whose method and
    /// pattern both match wins.
    pub fn match_route(&self, method: Method, path: &str) -> Option<MatchResult<'_>> {
        self.bindings
            .iter()
            .filter(|binding| binding.method == method)
            .find_map(|binding| {
                binding.pattern.matches(path).map(|caps| MatchResult {
                    binding,
                    params: caps.params,
                    wildcards: caps.wildcards,
                })
            })
    }

    pub fn bindings(&self) -> &[RouteBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
