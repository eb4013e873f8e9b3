pub mod bus;
pub mod coordination;
pub mod errors;
pub mod middleware;
pub mod store;
pub mod timeout;
pub mod types;

pub use errors::{AppError, AppResult, ErrorCode};
pub use types::*;
