//! Utility modules: error handling, result aliases, logging, time.

pub mod error;
pub mod logger;
pub mod result;
pub mod time;

pub use error::{AppError, AppResponse, ok, ok_with_message};
pub use result::AppResult;
pub use time::Clock;
