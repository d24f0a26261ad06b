//! Node endpoints and endpoint discovery.

use crate::error::ClientError;
use crate::settings::Settings;
use evstore_protocol::message::MasterInfo;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Addresses of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeEndpoints {
    pub tcp: SocketAddr,
    pub secure_tcp: Option<SocketAddr>,
}

impl NodeEndpoints {
    pub fn new(tcp: SocketAddr) -> Self {
        Self {
            tcp,
            secure_tcp: None,
        }
    }

    pub fn with_secure(mut self, secure_tcp: SocketAddr) -> Self {
        self.secure_tcp = Some(secure_tcp);
        self
    }

    /// Builds endpoints from a `NotMaster` redirect.
    pub fn from_master_info(info: &MasterInfo) -> Result<Self, ClientError> {
        let ip: IpAddr = info.external_tcp_address.parse().map_err(|_| {
            ClientError::Discovery(format!(
                "master address '{}' is not an IP address",
                info.external_tcp_address
            ))
        })?;
        let mut endpoints = Self::new(SocketAddr::new(ip, info.external_tcp_port));

        if let (Some(address), Some(port)) = (
            info.external_secure_tcp_address.as_deref(),
            info.external_secure_tcp_port,
        ) {
            if let Ok(ip) = address.parse::<IpAddr>() {
                endpoints.secure_tcp = Some(SocketAddr::new(ip, port));
            }
        }

        Ok(endpoints)
    }

    /// Returns the address to dial.
    pub fn select(&self, use_tls: bool) -> SocketAddr {
        match (use_tls, self.secure_tcp) {
            (true, Some(secure)) => secure,
            _ => self.tcp,
        }
    }
}

impl fmt::Display for NodeEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.secure_tcp {
            Some(secure) => write!(f, "{} (secure {})", self.tcp, secure),
            None => write!(f, "{}", self.tcp),
        }
    }
}

/// Chooses the node for the next connection attempt.
pub trait EndpointDiscoverer: Send + 'static {
    /// Returns the node to dial. `failed` is the node whose connection just
    /// failed or dropped, if any.
    fn discover(&mut self, failed: Option<&NodeEndpoints>) -> Result<NodeEndpoints, ClientError>;
}

/// Always returns the same node.
pub struct StaticEndpointDiscoverer {
    endpoints: NodeEndpoints,
}

impl StaticEndpointDiscoverer {
    pub fn new(endpoints: NodeEndpoints) -> Self {
        Self { endpoints }
    }
}

impl EndpointDiscoverer for StaticEndpointDiscoverer {
    fn discover(&mut self, _failed: Option<&NodeEndpoints>) -> Result<NodeEndpoints, ClientError> {
        Ok(self.endpoints)
    }
}

/// Walks a fixed list of cluster candidates, moving past a node once it fails.
pub struct RotatingEndpointDiscoverer {
    candidates: Vec<NodeEndpoints>,
    current: usize,
}

impl RotatingEndpointDiscoverer {
    pub fn new(candidates: Vec<NodeEndpoints>) -> Result<Self, ClientError> {
        if candidates.is_empty() {
            return Err(ClientError::Discovery("no cluster candidates".to_string()));
        }
        Ok(Self {
            candidates,
            current: 0,
        })
    }
}

impl EndpointDiscoverer for RotatingEndpointDiscoverer {
    fn discover(&mut self, failed: Option<&NodeEndpoints>) -> Result<NodeEndpoints, ClientError> {
        if let Some(failed) = failed {
            if let Some(index) = self.candidates.iter().position(|c| c == failed) {
                self.current = (index + 1) % self.candidates.len();
            }
        }
        Ok(self.candidates[self.current])
    }
}

/// Builds the discoverer implied by the configured endpoints.
pub fn discoverer_for(settings: &Settings) -> Result<Box<dyn EndpointDiscoverer>, ClientError> {
    match settings.endpoints.as_slice() {
        [] => Err(ClientError::Discovery("no endpoints configured".to_string())),
        [single] => Ok(Box::new(StaticEndpointDiscoverer::new(NodeEndpoints::new(
            *single,
        )))),
        many => Ok(Box::new(RotatingEndpointDiscoverer::new(
            many.iter().copied().map(NodeEndpoints::new).collect(),
        )?)),
    }
}
