use std::{fmt, net::Ipv6Addr};

use serde::{Deserialize, Serialize};

/// One discovered instance of a service.
///
/// Rebuilt from the registry on every query; two nodes are the same instance
/// exactly when address and port match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceNode {
    pub address: String,
    pub port: u16,
}

impl ServiceNode {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// URI for dialing this node over `scheme` (`http` or `https`).
    pub fn uri(&self, scheme: &str) -> String {
        format!("{scheme}://{self}")
    }
}

impl fmt::Display for ServiceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&host_port(&self.address, self.port))
    }
}

/// `address:port`, with IPv6 literals bracketed so the result is a valid URI authority.
pub(crate) fn host_port(address: &str, port: u16) -> String {
    if address.parse::<Ipv6Addr>().is_ok() {
        format!("[{address}]:{port}")
    } else {
        format!("{address}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_uri() {
        let node = ServiceNode::new("10.0.0.5", 9000);
        assert_eq!(node.to_string(), "10.0.0.5:9000");
        assert_eq!(node.uri("http"), "http://10.0.0.5:9000");
    }

    #[test]
    fn ipv6_literals_are_bracketed() {
        let node = ServiceNode::new("::1", 9000);
        assert_eq!(node.to_string(), "[::1]:9000");
        assert_eq!(node.uri("http"), "http://[::1]:9000");

        let full = ServiceNode::new("2001:db8::5", 443);
        assert_eq!(full.uri("https"), "https://[2001:db8::5]:443");

        assert_eq!(ServiceNode::new("users.internal", 80).to_string(), "users.internal:80");
    }

    #[test]
    fn identity_is_address_and_port() {
        let a = ServiceNode::new("10.0.0.5", 9000);
        assert_eq!(a, ServiceNode::new("10.0.0.5", 9000));
        assert_ne!(a, ServiceNode::new("10.0.0.5", 9001));
        assert_ne!(a, ServiceNode::new("10.0.0.6", 9000));
    }
}
