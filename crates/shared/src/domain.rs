use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// A paginated collection exposed by the logistics backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resource {
    Packages,
    Pulls,
    Batches,
    Dispatches,
    TransportAgencies,
    DeliveryAgencies,
    Reports,
}

impl Resource {
    pub const ALL: [Resource; 7] = [
        Resource::Packages,
        Resource::Pulls,
        Resource::Batches,
        Resource::Dispatches,
        Resource::TransportAgencies,
        Resource::DeliveryAgencies,
        Resource::Reports,
    ];

    /// List endpoint path, relative to the API base URL.
    pub fn path(self) -> &'static str {
        match self {
            Resource::Packages => "/api/v1/packages/",
            Resource::Pulls => "/api/v1/pulls/",
            Resource::Batches => "/api/v1/batches/",
            Resource::Dispatches => "/api/v1/dispatches/",
            Resource::TransportAgencies => "/api/v1/transport-agencies/",
            Resource::DeliveryAgencies => "/api/v1/delivery-agencies/",
            Resource::Reports => "/api/v1/reports/",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Resource::Packages => "packages",
            Resource::Pulls => "pulls",
            Resource::Batches => "batches",
            Resource::Dispatches => "dispatches",
            Resource::TransportAgencies => "transport-agencies",
            Resource::DeliveryAgencies => "delivery-agencies",
            Resource::Reports => "reports",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource '{0}'")]
pub struct UnknownResource(pub String);

impl FromStr for Resource {
    type Err = UnknownResource;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().replace('_', "-");
        Resource::ALL
            .into_iter()
            .find(|resource| resource.name().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| UnknownResource(raw.to_string()))
    }
}
