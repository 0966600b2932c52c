// Basic usage of the pooled HTTP client facade.
// Run with: cargo run --example basic

use httpool::{ClientConfig, HttpClient, RequestOptions};
use std::time::Duration;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "httpool=debug".into()),
        )
        .init();

    let client = HttpClient::new(ClientConfig::from_env());

    let result = client
        .post_json(
            "http://localhost:8080/notify/intf/server.intf",
            r#"{"head":{"transCode":"IP03"},"body":{"sts":"S"}}"#,
            RequestOptions::new().with_socket_timeout(Duration::from_millis(1500)),
        )
        .await
        .expect("arguments are present");

    match result.status_code {
        200 => println!("ok: {:?}", result.body),
        code => println!("failed: {code} {}", result.reason_phrase),
    }

    let metrics = client.metrics();
    println!(
        "pool: created={} acquired={} idle={}",
        metrics.total_created, metrics.total_acquired, metrics.idle_connections
    );

    client.shutdown();
}
