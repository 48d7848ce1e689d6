//! MCP server initialization for stdio and streamable HTTP transports.
//!
//! [`serve`] picks the transport from `server.transport`; both entry points
//! wire the database, embedding provider and proposition store into
//! [`RecollectTools`].

use crate::config::RecollectConfig;
use crate::db;
use crate::embedding;
use crate::proposition::PropositionStore;
use crate::tools::RecollectTools;
use anyhow::{bail, Result};
use rmcp::ServiceExt;
use std::sync::Arc;

/// Warn when the database was embedded with a different model or dimension
/// than the one configured now.
fn check_embedding_settings(conn: &rusqlite::Connection, config: &RecollectConfig) {
    if let Ok(Some(stored_model)) = db::migrations::get_embedding_model(conn) {
        if stored_model != config.embedding.model {
            tracing::warn!(
                stored = %stored_model,
                configured = %config.embedding.model,
                "embedding model changed; run `recollect re-embed` to update all vectors"
            );
        }
    }
    let stored_dims = db::schema::vector_index_dimensions(conn)
        .or_else(|| db::migrations::get_embedding_dimensions(conn).ok().flatten());
    if let Some(stored_dims) = stored_dims {
        if stored_dims != config.embedding.dimensions {
            tracing::warn!(
                stored = stored_dims,
                configured = config.embedding.dimensions,
                "embedding dimensions changed; similarity search is degraded until `recollect re-embed`"
            );
        }
    }
}

/// Open the database, create the embedding provider and build the store.
pub fn open_store(config: &RecollectConfig) -> Result<Arc<PropositionStore>> {
    let db_path = config.resolved_db_path();
    let conn = db::open_database(&db_path)?;
    tracing::info!(db = %db_path.display(), "database ready");
    check_embedding_settings(&conn, config);

    let provider = embedding::create_provider(&config.embedding)?;
    let embedding: Arc<dyn embedding::EmbeddingProvider> = Arc::from(provider);
    tracing::info!("embedding provider ready");

    Ok(Arc::new(PropositionStore::new(
        db::shared(conn),
        embedding,
        config.embedding.dimensions,
    )))
}

/// Start the MCP server on the configured transport.
pub async fn serve(config: RecollectConfig) -> Result<()> {
    match config.server.transport.as_str() {
        "stdio" => serve_stdio(config).await,
        "http" => serve_http(config).await,
        other => bail!("unknown transport '{other}' (expected 'stdio' or 'http')"),
    }
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: RecollectConfig) -> Result<()> {
    tracing::info!("starting recollect MCP server on stdio");

    let store = open_store(&config)?;
    let tools = RecollectTools::new(store, Arc::new(config));
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    tracing::info!("MCP server shut down");

    Ok(())
}

/// Start the MCP server over streamable HTTP transport.
pub async fn serve_http(config: RecollectConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting recollect MCP server on HTTP");

    let store = open_store(&config)?;
    let config = Arc::new(config);

    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(RecollectTools::new(store.clone(), config.clone())),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("failed to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    Ok(())
}
