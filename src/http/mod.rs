mod context;
mod parser;
mod request;
mod response;

pub use context::HttpContext;
pub use parser::{parse_cookies, parse_headers, parse_query, RequestParser};
pub use request::{Method, Params, RawRequest, Request, UploadedFile, Version};
pub use response::{Response, TEXT_PLAIN};
