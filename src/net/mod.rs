//! Request/response model and the transport seam.
//!
//! Everything that leaves the process goes through a [`Transport`]. The
//! production implementation wraps `reqwest`; tests script responses with a
//! fake. Requests and responses are plain owned values so they can be cached,
//! queued for replay and compared.

mod error;
mod request;
mod transport;

pub use error::FetchError;
pub use request::{Request, Response};
pub use transport::{HttpTransport, Transport};
