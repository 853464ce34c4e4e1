use crate::error::{ServerError, ServerResult};
use crate::http::{HttpContext, Response};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// `Ok(Some(_))` replaces the context's response, `Ok(None)` means the
/// handler mutated the response in place.
pub type HandlerResult = ServerResult<Option<Response>>;

pub trait Handler: Send + Sync + 'static {
    fn handle(&self, ctx: &mut HttpContext) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&mut HttpContext) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, ctx: &mut HttpContext) -> HandlerResult {
        (self)(ctx)
    }
}

/// Runs a handler, folding a panic into a fault and applying its payload.
pub(crate) fn invoke(handler: &dyn Handler, ctx: &mut HttpContext) -> ServerResult<()> {
    let result = catch_unwind(AssertUnwindSafe(|| handler.handle(ctx)))
        .unwrap_or_else(|panic| Err(ServerError::from_panic(panic)));
    if let Some(response) = result? {
        ctx.response = response;
    }
    Ok(())
}
