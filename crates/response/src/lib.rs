//! Response accumulation and finalization for the request engine.

pub mod buffer;
pub mod cookie;
mod error;
pub mod html;
mod signal;

pub use buffer::{Conditional, ResponseBuffer};
pub use cookie::Cookie;
pub use error::ResponseError;
pub use signal::RedirectSignal;
