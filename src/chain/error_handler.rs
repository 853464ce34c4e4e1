use crate::error::{ServerError, ServerResult};
use crate::http::HttpContext;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Callback offered a status-driven fault `(404, None)` or an exception-driven
/// fault `(0, Some(err))`. Returns whether it produced the response.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, ctx: &mut HttpContext, status: u16, error: Option<&ServerError>) -> ServerResult<bool>;
}

impl<F> ErrorHandler for F
where
    F: Fn(&mut HttpContext, u16, Option<&ServerError>) -> ServerResult<bool> + Send + Sync + 'static,
{
    fn handle(&self, ctx: &mut HttpContext, status: u16, error: Option<&ServerError>) -> ServerResult<bool> {
        (self)(ctx, status, error)
    }
}

/// Ordered error handlers; the first one reporting "handled" wins.
///
/// Never propagates: a handler that faults or panics counts as "not handled".
#[derive(Clone, Default)]
pub struct ErrorChain {
    handlers: Vec<Arc<dyn ErrorHandler>>,
}

impl ErrorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&mut HttpContext, u16, Option<&ServerError>) -> ServerResult<bool> + Send + Sync + 'static,
    {
        self.add_handler(Arc::new(handler))
    }

    pub fn add_handler(&mut self, handler: Arc<dyn ErrorHandler>) -> &mut Self {
        self.handlers.push(handler);
        self
    }

    pub fn handle_status(&self, ctx: &mut HttpContext, status: u16) -> bool {
        self.dispatch(ctx, status, None)
    }

    pub fn handle_error(&self, ctx: &mut HttpContext, error: &ServerError) -> bool {
        self.dispatch(ctx, 0, Some(error))
    }

    fn dispatch(&self, ctx: &mut HttpContext, status: u16, error: Option<&ServerError>) -> bool {
        for (index, handler) in self.handlers.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(ctx, status, error)))
                .unwrap_or_else(|panic| Err(ServerError::from_panic(panic)));
            match outcome {
                Ok(true) => return true,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(handler = index, status, error = %err, "error handler faulted");
                }
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for ErrorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorChain")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
