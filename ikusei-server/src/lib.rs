pub mod error;
pub mod http;
pub mod subsystems;

pub use error::ApiError;
pub use http::{build_router, start_http_server, HttpState};
