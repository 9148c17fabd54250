//! Request context: the environment a decision is made in.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::types::LocationId;

/// The environment of one access request.
///
/// `now` is always known. Network origin and location are supplied by the
/// caller when available; conditions that need a missing field fail closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Decision time (Unix ms).
    pub now: i64,

    /// Network address the request came from.
    pub origin: Option<IpAddr>,

    /// Location the request was made at.
    pub location_id: Option<LocationId>,
}

impl RequestContext {
    /// Context with only a decision time.
    pub fn at(now: i64) -> Self {
        Self {
            now,
            origin: None,
            location_id: None,
        }
    }

    /// Set the network origin.
    pub fn with_origin(mut self, origin: IpAddr) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Set the location.
    pub fn with_location(mut self, location: impl Into<LocationId>) -> Self {
        self.location_id = Some(location.into());
        self
    }
}
