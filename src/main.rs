use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use uuid::Uuid;

use keygate::config::{load_seed_file, Settings};
use keygate::negotiate::ResponseNegotiator;
use keygate::server::{config_routes, AppState};
use keygate::store::InMemoryApiKeyStore;
use keygate::util::{cors_config_from_env, init_tracing};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let settings = Settings::parse();

    let options = settings
        .api_key_options()
        .context("invalid API key options")?;

    let records = match &settings.seed_file {
        Some(path) => load_seed_file::<Uuid, _>(path)
            .with_context(|| format!("failed to load seed file {}", path.display()))?,
        None => Vec::new(),
    };
    let store = InMemoryApiKeyStore::with_records(records).context("invalid seed records")?;

    let state = web::Data::new(AppState::new(
        Arc::new(store),
        options,
        ResponseNegotiator::new(settings.problem_settings()),
    ));
    let header_name = state.engine.options().header_name.clone();

    tracing::info!(
        bind = %settings.bind_addr,
        header = %header_name,
        "keygate listening"
    );

    HttpServer::new(move || {
        App::new()
            .wrap(cors_config_from_env(&header_name))
            .app_data(state.clone())
            .configure(config_routes)
    })
    .bind(&settings.bind_addr)
    .with_context(|| format!("failed to bind {}", settings.bind_addr))?
    .run()
    .await?;

    Ok(())
}
