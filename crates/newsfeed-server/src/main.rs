//! News Feed gRPC Server
//!
//! Main entry point for the news feed service host.
//!
//! ## Overview
//! Clients open one long-lived bidirectional stream, register under a user
//! id, subscribe to a topic, post news into it, and continuously receive
//! news posted there by others. Durable state (users and news) lives in
//! DynamoDB behind a self-tuning connection pool.
//!
//! ## Configuration
//! Read from `./newsfeed_server.toml` in the working directory; every key
//! has a default except the AWS credentials (see `config.rs`). There are no
//! command-line flags.
//!
//! ## Local Development
//! - `NEWSFEED_USE_MEMORY_STORE`: run against in-process tables instead of
//!   DynamoDB (any value)
//!
//! ## Logging
//! Controlled via the `RUST_LOG` environment variable:
//! ```bash
//! RUST_LOG=debug cargo run -p newsfeed-server    # Detailed logs
//! RUST_LOG=info cargo run -p newsfeed-server     # Standard logs (default)
//! ```
//!
//! ## gRPC Reflection
//! The server registers a reflection service, so tools like `grpcurl` can
//! discover the `Talk` method without the proto files:
//! ```bash
//! grpcurl -plaintext localhost:8080 list
//! ```

use std::sync::Arc;

use newsfeed_proto::proto::newsfeed_server::NewsfeedServer;
use newsfeed_server::{Config, NewsfeedService};
use newsfeed_store::{DynamoFactory, FeedStore};
use tonic::transport::Server;
use tonic_reflection::server::Builder as ReflectionBuilder;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Configuration
    let config = Config::load()?;
    let bind_addr = config.service_endpoint.parse()?;

    // Initialize the durable data layer
    let store = if std::env::var("NEWSFEED_USE_MEMORY_STORE").is_ok() {
        tracing::info!("using in-memory store backend");
        FeedStore::in_memory(config.retry_policy(), config.purge_age()).0
    } else {
        if config.aws_access_key_id.is_empty() || config.aws_secret_key.is_empty() {
            return Err(
                "aws_access_key_id and aws_secret_key must be set in newsfeed_server.toml".into(),
            );
        }
        tracing::info!(region = %config.aws_region, "using DynamoDB store backend");
        let factory = DynamoFactory::new(
            &config.aws_region,
            &config.aws_access_key_id,
            &config.aws_secret_key,
        );
        FeedStore::new(Box::new(factory), config.retry_policy(), config.purge_age())
    };

    let service = NewsfeedService::new(Arc::new(store), config.polling_interval());

    // Set up reflection service
    let reflection_service = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(newsfeed_proto::proto::FILE_DESCRIPTOR_SET)
        .build_v1()?;

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received SIGINT (Ctrl+C), initiating graceful shutdown");
            },
            _ = terminate => {
                tracing::info!("received SIGTERM, initiating graceful shutdown");
            },
        }

        let _ = shutdown_tx.send(());
    });

    tracing::info!("news feed service host is listening on {}", bind_addr);
    tracing::info!("configuration:");
    tracing::info!("  store retry: {} attempts, {}ms apart", config.db_req_max_retry_count, config.db_req_retry_interval_ms);
    tracing::info!("  purge age: {}s", config.db_old_news_purge_age_secs);
    tracing::info!("  news polling interval: {}s", config.news_polling_interval_secs);

    // Serve until the shutdown signal; in-flight streams are drained, new
    // ones rejected.
    Server::builder()
        .add_service(NewsfeedServer::new(service))
        .add_service(reflection_service)
        .serve_with_shutdown(bind_addr, async {
            shutdown_rx.await.ok();
        })
        .await?;

    tracing::info!("news feed server shut down gracefully");

    Ok(())
}
