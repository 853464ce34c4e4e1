//! Ordered callback chains run around route dispatch.
//!
//! Interceptors run before routing and may short-circuit the request. Error
//! handlers are offered every 404 and every fault the request produced.

mod error_handler;
mod interceptor;

pub use error_handler::{ErrorChain, ErrorHandler};
pub use interceptor::{Interceptor, InterceptorChain};
