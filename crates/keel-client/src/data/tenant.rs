use serde::{Deserialize, Serialize};

pub const TENANT_ID_HEADER: &str = "TENANT_ID";
pub const REGION_HEADER: &str = "REGION";
pub const MAJOR_VERSION_HEADER: &str = "MAJOR_VERSION";
pub const MINOR_VERSION_HEADER: &str = "MINOR_VERSION";

/// The game-server tenant a request is scoped to.
///
/// The client treats it as opaque apart from turning it into identification
/// headers and using `id` to partition cache and deduplication keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    pub id: String,
    pub region: String,
    pub major_version: u16,
    pub minor_version: u16,
}

impl TenantContext {
    pub fn new(id: impl Into<String>, region: impl Into<String>, major_version: u16, minor_version: u16) -> Self {
        Self {
            id: id.into(),
            region: region.into(),
            major_version,
            minor_version,
        }
    }

    pub fn headers(&self) -> [(&'static str, String); 4] {
        [
            (TENANT_ID_HEADER, self.id.clone()),
            (REGION_HEADER, self.region.clone()),
            (MAJOR_VERSION_HEADER, self.major_version.to_string()),
            (MINOR_VERSION_HEADER, self.minor_version.to_string()),
        ]
    }
}
