//! HTTP plumbing shared by authenticators and the client facade.

pub mod backoff;
pub mod dispatch;
pub mod reqwest_transport;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use dispatch::{Dispatcher, ensure_transport_success};
pub use reqwest_transport::ReqwestTransport;
pub use transport::{HttpTransport, TransportError, TransportRequest, TransportResponse};
