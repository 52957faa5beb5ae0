#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use keel_client::{ApiClient, ClientConfig, MockTransport, ProgressCallback, ProgressInfo, TenantContext};

pub const BASE_URL: &str = "https://api.example.com";

pub fn tenant() -> TenantContext {
    TenantContext::new("083839c6-c47c-42a6-9585-76492795d123", "GMS", 83, 1)
}

/// Config with the periodic sweep off so paused-clock tests stay
/// deterministic.
pub fn config() -> ClientConfig {
    ClientConfig {
        cache_sweep_interval_secs: 0,
        ..ClientConfig::new(BASE_URL)
    }
}

pub fn client(transport: MockTransport) -> ApiClient<MockTransport> {
    let client = ApiClient::new(transport, config()).unwrap();
    client.set_tenant(tenant());
    client
}

/// Progress callback that records every snapshot.
pub fn progress_recorder() -> (ProgressCallback, Arc<Mutex<Vec<ProgressInfo>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: ProgressCallback = Arc::new(move |info: &ProgressInfo| sink.lock().unwrap().push(info.clone()));
    (callback, seen)
}
