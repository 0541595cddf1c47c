use std::env;
use std::sync::Arc;

use anyhow::Context;
use opentelemetry::global;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::runtime::TokioCurrentThread;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use lending_app::backend::{InMemoryLendingBackend, LendingBackend};
use lending_app::bookings::{MyBookingsView, PendingBookingsView};
use lending_app::equipment::EquipmentDirectory;
use lending_app::loans::MyLoansView;
use lending_app::query::QueryCache;
use lending_app::refresh::{AutoRefresh, DEFAULT_TICK_INTERVAL};
use lending_app::session::{AuthHandle, FileSessionStore, Session};
use lending_client::api::{Condition, EquipmentPayload, Role};
use lending_client::client::LendingApiClient;

// Based on https://github.com/LukeMathWalker/tracing-actix-web/blob/main/examples/opentelemetry/src/main.rs#L15
fn init_telemetry() {
    let app_name = "lending_app";

    // Start a new Jaeger trace pipeline.
    // Spans are exported in batch - recommended setup for a production application.
    global::set_text_map_propagator(TraceContextPropagator::new());
    #[allow(deprecated)]
    let tracer = opentelemetry_jaeger::new_agent_pipeline()
        .with_service_name(app_name)
        .install_batch(TokioCurrentThread)
        .expect("Failed to install OpenTelemetry tracer.");

    // Filter based on level - trace, debug, info, warn, error
    // Tunable via `RUST_LOG` env variable
    let env_filter = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new("info"));
    // Create a `tracing` layer using the Jaeger tracer
    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);
    // Create a `tracing` layer to emit spans as structured logs to stdout
    let formatting_layer = BunyanFormattingLayer::new(app_name.into(), std::io::stdout);
    // Combined them all together in a `tracing` subscriber
    let subscriber = Registry::default()
        .with(env_filter)
        .with(telemetry)
        .with(JsonStorageLayer)
        .with(formatting_layer);
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to install `tracing` subscriber.")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry();

    let use_in_memory_backend = env::var("USE_IN_MEMORY_BACKEND")
        .map(|value| value.to_lowercase() == "true")
        .unwrap_or_default();
    let api_url = env::var("LENDING_API_URL").unwrap_or("http://localhost:8080".to_string());
    let session_dir = env::var("SESSION_DIR").unwrap_or(".lending-session".to_string());

    let cache = Arc::new(QueryCache::default());

    let (backend, is_admin): (Arc<dyn LendingBackend>, bool) = if use_in_memory_backend {
        let backend = Arc::new(InMemoryLendingBackend::default());
        for (name, category, quantity) in
            [("Projector", "AV", 4), ("Microscope", "Lab", 2), ("Laptop", "IT", 6)]
        {
            backend.seed_equipment(&EquipmentPayload {
                name: name.to_string(),
                category: category.to_string(),
                condition: Some(Condition::Good),
                quantity,
                available: true,
            });
        }
        tracing::info!("Using the in-memory backend with seeded inventory");
        (backend, true)
    } else {
        let client = Arc::new(LendingApiClient::new(&api_url)?);
        let store = Arc::new(FileSessionStore::new(&session_dir)?);
        let auth = AuthHandle::new(client.clone(), store);

        let mut session = auth.restore().await.unwrap_or(Session::Anonymous);
        if !session.is_authenticated() {
            let username =
                env::var("LENDING_USERNAME").context("LENDING_USERNAME is not set")?;
            let password =
                env::var("LENDING_PASSWORD").context("LENDING_PASSWORD is not set")?;
            session = auth.login(&username, &password).await?;
        }
        tracing::info!(
            "Authenticated as {} against {}",
            session.username().unwrap_or("<unknown>"),
            api_url
        );
        let is_admin = session.has_role(Role::RoleAdmin);
        (client, is_admin)
    };

    let directory = EquipmentDirectory::new(backend.clone(), cache.clone());
    let my_bookings = Arc::new(MyBookingsView::new(backend.clone(), cache.clone()));
    let my_loans = Arc::new(MyLoansView::new(backend.clone(), cache.clone()));
    let pending_bookings = is_admin.then(|| PendingBookingsView::new(backend, cache));

    let refresh = AutoRefresh::start(DEFAULT_TICK_INTERVAL);

    // Each data-bound view holds its own subscription and re-polls on ticks;
    // the subscriptions end together with the publisher.
    tokio::spawn({
        let view = my_bookings.clone();
        let ticks = refresh.subscribe();
        async move { view.run(ticks).await }
    });
    tokio::spawn({
        let view = my_loans.clone();
        let ticks = refresh.subscribe();
        async move { view.run(ticks).await }
    });

    let mut ticks = refresh.subscribe();
    tracing::info!("Polling views every {:?}", DEFAULT_TICK_INTERVAL);
    while let Some(tick) = ticks.tick().await {
        match directory.refresh().await {
            Ok(rows) => tracing::info!("tick {}: {} equipments listed", tick, rows.len()),
            Err(err) => tracing::warn!("tick {}: equipment refresh failed: {}", tick, err),
        }
        if let Some(view) = &pending_bookings {
            match view.refresh().await {
                Ok(rows) if !rows.is_empty() => {
                    tracing::info!("tick {}: {} bookings awaiting approval", tick, rows.len())
                }
                Ok(_) => {}
                Err(err) => tracing::warn!("tick {}: pending refresh failed: {}", tick, err),
            }
        }
    }
    Ok(())
}
