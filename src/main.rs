//! Water Balance - serves water balance measurement nodes as a path-annotated tree.

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use water_balance::config::{self, Settings};
use water_balance::gateway::{self, AppState};
use water_balance::supabase::SupabaseClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "water_balance=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    info!("Environment check:");
    info!("SUPABASE_URL: {}", config::mask(settings.supabase.url.as_deref(), 20));
    info!("SUPABASE_ANON_KEY: {}", config::mask(settings.supabase.anon_key.as_deref(), 10));
    if settings.supabase.url.is_none() || settings.supabase.anon_key.is_none() {
        warn!("Supabase credentials incomplete; queries will fail until they are set");
    }

    let supabase = SupabaseClient::new(settings.supabase.clone())?;
    info!("Supabase client initialized (schema: {})", settings.supabase.schema);

    let state = AppState {
        source: Arc::new(supabase),
        defaults: Arc::new(settings.defaults.clone()),
    };

    let app = gateway::build_router(state);

    // Run server
    let listener = tokio::net::TcpListener::bind(settings.bind_addr).await?;
    info!("Server listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
