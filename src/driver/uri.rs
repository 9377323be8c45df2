//! Driver URIs.

use super::address::BoltAddress;
use crate::error::BoltError;
use crate::types::{BoltDict, BoltValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// `bolt://`: one server, no routing.
    Direct,
    /// `bolt+routing://`: a cluster reached through routers.
    Routing,
}

/// A parsed `scheme://host[:port][/][?key=value&...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverUri {
    pub scheme: Scheme,
    pub address: BoltAddress,
    /// Query parameters; sent to the routing procedure as its context.
    pub routing_context: BoltDict,
}

impl DriverUri {
    pub fn parse(uri: &str) -> Result<Self, BoltError> {
        let invalid = |why: &str| BoltError::Configuration(format!("invalid URI '{uri}': {why}"));

        let (scheme, rest) = uri.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "bolt" => Scheme::Direct,
            "bolt+routing" => Scheme::Routing,
            other => {
                return Err(BoltError::Configuration(format!(
                    "unsupported URI scheme '{other}' in '{uri}', expected 'bolt' or 'bolt+routing'"
                )));
            }
        };

        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) => (authority, Some(query)),
            None => (rest, None),
        };
        let authority = authority.strip_suffix('/').unwrap_or(authority);
        if authority.contains('/') {
            return Err(invalid("paths are not supported"));
        }
        let address = BoltAddress::parse(authority)?;

        let mut routing_context = BoltDict::new();
        for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .filter(|(k, v)| !k.is_empty() && !v.is_empty())
                .ok_or_else(|| invalid(&format!("malformed query parameter '{pair}'")))?;
            if routing_context.insert(key.to_string(), BoltValue::from(value)).is_some() {
                return Err(invalid(&format!("duplicated query parameter '{key}'")));
            }
        }

        if scheme == Scheme::Direct && !routing_context.is_empty() {
            return Err(BoltError::Configuration(format!(
                "Routing parameters are not supported with scheme 'bolt'. Given URI: '{uri}'"
            )));
        }
        Ok(Self {
            scheme,
            address,
            routing_context,
        })
    }
}

/// Turns user input into full URIs. Entries without a scheme mean `bolt://`
/// when there is one and `bolt+routing://` when there are several.
pub fn normalize_uris<S: AsRef<str>>(inputs: &[S]) -> Vec<String> {
    let default_scheme = if inputs.len() > 1 { "bolt+routing" } else { "bolt" };
    inputs
        .iter()
        .map(AsRef::as_ref)
        .map(|input| {
            if input.contains("://") {
                input.to_string()
            } else {
                format!("{default_scheme}://{input}")
            }
        })
        .collect()
}
