//! Transport abstraction for reaching the simulator server

mod tcp;
mod traits;

pub use tcp::TcpConnector;
pub use traits::{connect_with_retry, RetryPolicy, TransportConnector};
