//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! browser pipe
//!     → request.rs (request line, headers, body; target decomposed by target.rs)
//!     → handler.rs (cache, history or origin)
//!     → response.rs (origin response parsed while relayed to the browser)
//!     → store
//! ```
//!
//! Header lines are kept verbatim (headers.rs) so requests and responses can
//! be re-serialized byte for byte; dates are compared via date.rs.

pub mod date;
pub mod handler;
pub mod headers;
pub mod request;
pub mod response;
pub mod target;

pub use date::HttpDate;
pub use handler::{ConnectionHandler, HandlerContext};
pub use request::Request;
pub use response::Response;
