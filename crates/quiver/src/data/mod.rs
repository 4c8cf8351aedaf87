//! Immutable request and response types.

mod method;
mod priority;
mod response;

pub use method::Method;
pub use priority::Priority;
pub use response::{Parsed, WireResponse, header_value};
