//! Basic package registry server example
//!
//! Run with: cargo run -p registry --example basic_server

use registry::RegistryBuilder;
use storage::MemoryStorage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let addr = "127.0.0.1:5000";

    // Build the registry over an in-memory storage backend
    let app = RegistryBuilder::new()
        .storage(MemoryStorage::new().into())
        .realm(format!("http://{addr}"))
        .build();

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Package registry listening on http://{}", addr);
    tracing::info!("Try: curl http://{}/v2/token", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
