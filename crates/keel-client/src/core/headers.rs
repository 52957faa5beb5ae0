use crate::data::{HeaderSet, TenantContext};

/// Compute the headers for one request.
///
/// Starts from `Content-Type: application/json`, adds the tenant's
/// identification headers unless `skip_tenant` is set, then merges
/// `overrides` so caller values win on conflicts.
pub fn build_headers(tenant: Option<&TenantContext>, overrides: &HeaderSet, skip_tenant: bool) -> HeaderSet {
    let mut headers = HeaderSet::new().with("Content-Type", "application/json");

    if !skip_tenant && let Some(tenant) = tenant {
        for (name, value) in tenant.headers() {
            headers.insert(name, value);
        }
    }

    headers.merge(overrides);
    headers
}
