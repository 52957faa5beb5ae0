use sha2::{Digest, Sha256};

use crate::data::RequestDescriptor;

/// Headers that never distinguish deduplicated requests.
pub const DEDUP_EXCLUDED_HEADERS: [&str; 2] = ["authorization", "cookie"];

/// The only headers that distinguish cached responses.
pub const CACHE_KEY_HEADERS: [&str; 3] = ["accept", "accept-language", "content-type"];

/// Key under which identical in-flight requests are shared.
///
/// Covers method, URL, body, tenant and every header except credentials.
pub fn dedup_key(request: &RequestDescriptor) -> String {
    let digest = digest(request, |name| !DEDUP_EXCLUDED_HEADERS.contains(&name));
    format!("{} {}#{}", request.method, request.url, digest)
}

/// Key under which a response is cached.
///
/// Covers method, URL, body, tenant and the content-negotiation headers.
/// With a prefix the key reads `prefix:METHOD url#digest`, so namespaces can
/// be cleared by prefix.
pub fn cache_key(request: &RequestDescriptor, prefix: Option<&str>) -> String {
    let digest = digest(request, |name| CACHE_KEY_HEADERS.contains(&name));
    match prefix {
        Some(prefix) => format!("{}:{} {}#{}", prefix, request.method, request.url, digest),
        None => format!("{} {}#{}", request.method, request.url, digest),
    }
}

fn digest(request: &RequestDescriptor, include_header: impl Fn(&str) -> bool) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.method.as_str());
    hasher.update([0u8]);
    hasher.update(request.url.as_bytes());
    hasher.update([0u8]);
    if let Some(ref body) = request.body {
        hasher.update(body);
    }
    hasher.update([0u8]);
    // HeaderSet iterates in sorted order, so insertion order cannot leak in.
    for (name, value) in request.headers.iter().filter(|(name, _)| include_header(name)) {
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update([0u8]);
    if let Some(ref tenant) = request.tenant_id {
        hasher.update(tenant.as_bytes());
    }
    hex::encode(&hasher.finalize()[..16])
}
