use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use tracing::info;
use trialflow::clock::SystemClock;
use trialflow::config::AppConfig;
use trialflow::error::AppError;
use trialflow::telemetry;
use trialflow::workflows::trials::SessionStateMachine;

use crate::cli::ServeArgs;
use crate::infra::{
    AppState, InMemoryTrialStore, InMemoryTutorDirectory, KeywordSentimentScorer,
    SuburbTravelEstimator,
};
use crate::routes::with_trial_routes;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let engine = Arc::new(SessionStateMachine::new(
        Arc::new(InMemoryTrialStore::default()),
        Arc::new(InMemoryTutorDirectory::seeded()),
        Arc::new(SuburbTravelEstimator),
        Arc::new(KeywordSentimentScorer),
        Arc::new(SystemClock),
        config.engine.settings(),
    ));

    let app = with_trial_routes(engine)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "trial session lifecycle service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
