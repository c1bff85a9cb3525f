//! Service-name based channel management on top of a service registry.
//!
//! [`ConnectionManager`] turns a service name into a load-balanced tonic
//! [`Channel`](tonic::transport::Channel) whose backend set follows the
//! registry through a [`Resolver`].

mod error;
pub use error::ConnectError;

mod transport;
pub use transport::{TransportConfig, TransportSecurity};

mod resolver;
pub use resolver::{RegistryResolver, Resolver, ResolverRegistry, ResolverWatch};

mod connection;
pub use connection::Connection;

mod manager;
pub use manager::{ConnectionManager, ConnectionManagerBuilder};

pub use tonic;
