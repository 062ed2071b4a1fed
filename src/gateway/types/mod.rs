//! Gateway types module
//!
//! - [`request`]: Request bodies and their validation
//! - [`response`]: Response envelope, handler errors and error codes

pub mod request;
pub mod response;

pub use request::{HistoryQuery, TransferBody};
pub use response::{ApiError, ApiResponse, ApiResult, error_codes, ok};
