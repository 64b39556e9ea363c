//! Refresh Demo
//!
//! Signs in against a local mock API, expires the access token, then fires a
//! burst of concurrent requests. Every request fails with 401, yet the refresh
//! endpoint is called exactly once and every request is replayed.
//!
//! Run with: cargo run -p refresh-demo
//! Verbose:  RUST_LOG=bearer_relay=debug cargo run -p refresh-demo

mod config;
mod mock_api;

use bearer_relay::auth::MemoryCredentialStore;
use bearer_relay::{ApiClient, ApiRequest, AuthEvent, ClientConfig};
use mock_api::MockApi;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bearer_relay=info")),
        )
        .init();

    let callers = config::callers();
    let (api, base_url) = MockApi::spawn(config::refresh_delay()).await?;
    println!("Mock API listening on {base_url}");

    let client = ApiClient::builder()
        .config(ClientConfig::builder().base_url(base_url).build())
        .store(MemoryCredentialStore::new())
        .build()?;

    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                AuthEvent::Refreshed { cycle } => println!("  [event] refresh cycle {cycle} succeeded"),
                AuthEvent::SessionExpired { reason } => println!("  [event] session expired: {reason}"),
            }
        }
    });

    let tokens = client.auth().sign_in("demo@example.com", "demo").await?;
    println!("Signed in: {tokens:?}");

    api.expire_access_token();
    println!("Access token expired; sending {callers} requests at once");

    let start = Instant::now();
    let requests = (1..=callers)
        .map(|id| ApiRequest::get(format!("/ticket-service/boards/{id}")))
        .collect();
    let results = client.send_all(requests).await;

    let mut ok = 0;
    for result in results {
        match result {
            Ok(response) => {
                let board: serde_json::Value = response.json()?;
                println!("  {} -> {}", board["id"], board["name"]);
                ok += 1;
            }
            Err(e) => println!("  failed: {e}"),
        }
    }

    println!();
    println!("Succeeded:        {ok}/{callers}");
    println!("Refresh calls:    {}", api.refresh_calls());
    println!("Refresh cycles:   {}", client.coordinator().completed_cycles());
    println!("Elapsed:          {:?}", start.elapsed());
    println!("Current tokens:   {:?}", client.current_tokens());

    Ok(())
}
