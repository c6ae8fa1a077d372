//! Example server: loads the model from `CONFIG_PATH` (a directory of JSON files) or
//! reflects the live `DATABASE_SCHEMA`, then serves every entity under `RESTAPI_PREFIX`.

use autorest::{
    load_from_dir, reflect_schema, ApiBuilder, ApiConfig, Backend, DeriveOptions, PgBackend, Verb,
};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("autorest=info".parse()?))
        .init();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/chinook".into());
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let model = match std::env::var("CONFIG_PATH") {
        Ok(dir) => load_from_dir(&dir).await?,
        Err(_) => {
            let schema = std::env::var("DATABASE_SCHEMA").unwrap_or_else(|_| "public".into());
            reflect_schema(&pool, &schema).await?
        }
    };

    let backend: Arc<dyn Backend> = Arc::new(PgBackend::new(pool));
    let manager = ApiBuilder::from_config(&model, backend, ApiConfig::from_env()?, &DeriveOptions::default())?
        .add_all(Verb::ALL)
        .build()?;

    let app = Router::new().merge(manager.common_routes()).merge(manager.router());

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
