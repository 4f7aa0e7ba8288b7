//! Request descriptors and the parameter-injection builder.
//!
//! A [`RequestSpec`] holds static configuration plus a caller-owned parameter
//! holder with role bindings (header, path, query). Every send resolves the
//! spec into a fresh [`RequestDescriptor`], so changes made to the holder
//! between sends are honored.

mod builder;
mod descriptor;

pub use builder::{IntoParamValue, ParamRole, RequestSpec};
pub use descriptor::{RequestBody, RequestDescriptor};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// HTTP methods supported by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "DELETE" => Some(HttpMethod::Delete),
            "HEAD" => Some(HttpMethod::Head),
            "OPTIONS" => Some(HttpMethod::Options),
            _ => None,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Class of network link reported by a connectivity oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkClass {
    Wifi,
    Cellular,
    Ethernet,
    Vpn,
    Bluetooth,
}

impl NetworkClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkClass::Wifi => "wifi",
            NetworkClass::Cellular => "cellular",
            NetworkClass::Ethernet => "ethernet",
            NetworkClass::Vpn => "vpn",
            NetworkClass::Bluetooth => "bluetooth",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "wifi" => Some(NetworkClass::Wifi),
            "cellular" => Some(NetworkClass::Cellular),
            "ethernet" => Some(NetworkClass::Ethernet),
            "vpn" => Some(NetworkClass::Vpn),
            "bluetooth" => Some(NetworkClass::Bluetooth),
            _ => None,
        }
    }
}

impl std::fmt::Display for NetworkClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Connectivity a request needs before it may be attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredConnectivity {
    /// Any reachable network will do.
    #[default]
    Any,
    /// Only attempt over Wi-Fi.
    WifiOnly,
    /// Only attempt over the given class.
    Only(NetworkClass),
}

impl RequiredConnectivity {
    /// Check the requirement against the set of currently active classes.
    ///
    /// `Any` still needs at least one active class.
    pub fn is_satisfied_by(&self, active: &HashSet<NetworkClass>) -> bool {
        match self {
            RequiredConnectivity::Any => !active.is_empty(),
            RequiredConnectivity::WifiOnly => active.contains(&NetworkClass::Wifi),
            RequiredConnectivity::Only(class) => active.contains(class),
        }
    }
}

impl std::fmt::Display for RequiredConnectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequiredConnectivity::Any => write!(f, "any network"),
            RequiredConnectivity::WifiOnly => write!(f, "wifi"),
            RequiredConnectivity::Only(class) => write!(f, "{}", class),
        }
    }
}

/// Anything the executor can turn into a descriptor at send time.
pub trait ResolveRequest {
    /// Produce the descriptor for one send attempt.
    fn resolve(&self) -> Result<RequestDescriptor>;
}

impl ResolveRequest for RequestDescriptor {
    fn resolve(&self) -> Result<RequestDescriptor> {
        Ok(self.clone())
    }
}

impl<P> ResolveRequest for RequestSpec<P> {
    fn resolve(&self) -> Result<RequestDescriptor> {
        self.build()
    }
}
