use anyhow::Result;
use facegate_core::Settings;
use tracing_subscriber::EnvFilter;

mod dbus_interface;
mod engine;

use dbus_interface::{FacegateService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let settings = Settings::from_env();
    tracing::info!(
        provider = %settings.provider_url,
        db = %settings.db_path.display(),
        threshold = settings.match_threshold,
        "configuration loaded"
    );

    let engine = engine::spawn_engine(&settings)?;
    let service = FacegateService::new(engine, &settings);

    let builder = if settings.system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(
        bus = if settings.system_bus { "system" } else { "session" },
        name = BUS_NAME,
        "facegated ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    Ok(())
}
