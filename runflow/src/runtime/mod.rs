//! The run service: admission, execution, streaming and status.

mod request;
mod service;

pub use request::{StartRequest, StartResponse, StartStatus};
pub use service::RunService;
