use crate::error::{ServerError, ServerResult};
use crate::http::HttpContext;
use crate::router::{PathPattern, PatternError};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// A path-scoped callback run before route dispatch.
///
/// Returning `Ok(true)` means the interceptor produced the final response and
/// nothing after it runs.
pub trait Interceptor: Send + Sync + 'static {
    fn intercept(&self, ctx: &mut HttpContext) -> ServerResult<bool>;
}

impl<F> Interceptor for F
where
    F: Fn(&mut HttpContext) -> ServerResult<bool> + Send + Sync + 'static,
{
    fn intercept(&self, ctx: &mut HttpContext) -> ServerResult<bool> {
        (self)(ctx)
    }
}

#[derive(Clone)]
struct Entry {
    pattern: PathPattern,
    interceptor: Arc<dyn Interceptor>,
}

#[derive(Clone, Default)]
pub struct InterceptorChain {
    entries: Vec<Entry>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&mut self, template: &str, interceptor: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> ServerResult<bool> + Send + Sync + 'static,
    {
        self.add_interceptor(template, Arc::new(interceptor))
    }

    pub fn add_interceptor(
        &mut self,
        template: &str,
        interceptor: Arc<dyn Interceptor>,
    ) -> Result<&mut Self, PatternError> {
        let pattern = PathPattern::compile(template)?;
        self.entries.push(Entry {
            pattern,
            interceptor,
        });
        Ok(self)
    }

    /// Runs every interceptor whose template matches `path`, in order.
    ///
    /// Returns `Ok(true)` as soon as one asks to stop. A fault or panic in a
    /// callback ends the chain and is handed back to the caller.
    pub fn apply(&self, path: &str, ctx: &mut HttpContext) -> ServerResult<bool> {
        for entry in self.entries.iter().filter(|e| e.pattern.is_match(path)) {
            let stop = catch_unwind(AssertUnwindSafe(|| entry.interceptor.intercept(ctx)))
                .unwrap_or_else(|panic| Err(ServerError::from_panic(panic)))?;
            if stop {
                tracing::debug!(path, interceptor = entry.pattern.template(), "request intercepted");
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.pattern.template()))
            .finish()
    }
}
