//! API descriptors: the named endpoints the gateway serves, with liveness status.
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::config::{HttpVerb, RequestType};

/// Liveness status of an API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    #[default]
    Down,
    Up,
    Unknown,
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiStatus::Down => write!(f, "down"),
            ApiStatus::Up => write!(f, "up"),
            ApiStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Fixed method enumeration an API is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestMethod {
    #[default]
    MethodUnspecified,
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
}

impl RequestMethod {
    /// Look up a method by name. Names outside the enumeration map to
    /// `METHOD_UNSPECIFIED`, never to an error.
    pub fn from_name(name: &str) -> Self {
        match name {
            "GET" => RequestMethod::Get,
            "HEAD" => RequestMethod::Head,
            "POST" => RequestMethod::Post,
            "PUT" => RequestMethod::Put,
            "DELETE" => RequestMethod::Delete,
            "CONNECT" => RequestMethod::Connect,
            "OPTIONS" => RequestMethod::Options,
            "TRACE" => RequestMethod::Trace,
            _ => RequestMethod::MethodUnspecified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::MethodUnspecified => "METHOD_UNSPECIFIED",
            RequestMethod::Get => "GET",
            RequestMethod::Head => "HEAD",
            RequestMethod::Post => "POST",
            RequestMethod::Put => "PUT",
            RequestMethod::Delete => "DELETE",
            RequestMethod::Connect => "CONNECT",
            RequestMethod::Options => "OPTIONS",
            RequestMethod::Trace => "TRACE",
        }
    }
}

impl FromStr for RequestMethod {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RequestMethod::from_name(s))
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpVerb> for RequestMethod {
    fn from(verb: HttpVerb) -> Self {
        // ANY and PATCH have no slot in the enumeration
        RequestMethod::from_name(verb.as_str())
    }
}

/// Protocol spoken on one side of an API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    #[default]
    Unspecified,
    Http,
    Dubbo,
}

impl From<RequestType> for ApiType {
    fn from(request_type: RequestType) -> Self {
        match request_type {
            RequestType::Http => ApiType::Http,
            RequestType::Dubbo => ApiType::Dubbo,
        }
    }
}

/// A registered API. After creation only `status` changes, and it changes by replacing
/// the whole descriptor inside the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Api {
    pub name: String,
    pub itype: ApiType,
    pub otype: ApiType,
    pub method: RequestMethod,
    pub status: ApiStatus,
    pub metadata: serde_json::Value,
}

impl Api {
    pub fn new(name: impl Into<String>, method: RequestMethod) -> Self {
        Self {
            name: name.into(),
            method,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ApiStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_types(mut self, itype: ApiType, otype: ApiType) -> Self {
        self.itype = itype;
        self.otype = otype;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_up(&self) -> bool {
        self.status == ApiStatus::Up
    }

    /// Compare the API's bound method against a method name.
    pub fn match_method(&self, method: &str) -> bool {
        self.method == RequestMethod::from_name(method)
    }
}
