use rollop_cluster_store::{ClusterStore, ExternalAuthMode, TokenSource};
use rollop_k8s_util::client::new_client_with_metrics;
use rollop_operator::controller::State as RollopState;
use rollop_operator::controller::watch::WatchMultiplexer;
use rollop_operator::telemetry;
use rollop_package_discovery::{DiscoveryAuth, PackageDiscovery};

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{Router, get};
use clap::{Parser, crate_authors, crate_description, crate_version};
use kube::Config;
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};

async fn metrics(State(state): State<RollopState>) -> impl IntoResponse {
    match state.metrics() {
        Ok(metrics) => (
            StatusCode::OK,
            [(
                "content-type",
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            metrics,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to get metrics: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health() -> impl IntoResponse {
    Json("healthy")
}

#[derive(Parser, Debug)]
#[command(
    name="rollop",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// Listen on given port
    #[arg(short, long, default_value_t = 8080, env)]
    port: u16,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`. Example: "info,kube=debug,rollop=debug"
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    /// URL for the OpenTelemetry tracing endpoint.
    ///
    /// This optional argument specifies the URL to which traces will be sent using
    /// OpenTelemetry. If not provided, tracing will be disabled.
    #[arg(short, long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    /// Sampling ratio for tracing.
    ///
    /// Specifies the ratio of traces to sample. A value of `1.0` will sample all traces,
    /// while a lower value will sample fewer traces. The default is `0.1`, meaning 10%
    /// of traces are sampled.
    #[arg(short, long, default_value_t = 0.1, env)]
    sample_ratio: f64,

    /// Credential chain for target cluster and package source access.
    #[arg(long, value_enum, default_value_t = ExternalAuthMode::Production, env = "EXTERNAL_AUTH")]
    external_auth: ExternalAuthMode,

    /// Token for the GitHub API, used by package discovery.
    #[arg(long, env = "GITHUB_TOKEN")]
    github_token: Option<String>,

    /// Token for the GitLab API, used by package discovery.
    #[arg(long, env = "GITLAB_TOKEN")]
    gitlab_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();

    telemetry::init(
        &args.log_filter,
        args.log_format,
        args.tracing_url.as_deref(),
        args.sample_ratio,
    )
    .await?;

    let mut registry = Registry::with_prefix("rollop");
    let config = Config::infer().await?;
    let client = new_client_with_metrics(config, &mut registry).await?;

    let controllers = [
        rollop_rollout::controller::CONTROLLER_ID,
        rollop_remote_sync::controller::CONTROLLER_ID,
    ];

    let cluster_store = Arc::new(ClusterStore::new(
        client.clone(),
        TokenSource::new(args.external_auth),
    ));
    let discovery = Arc::new(PackageDiscovery::new(DiscoveryAuth {
        github_token: args.github_token,
        gitlab_token: args.gitlab_token,
    }));
    let (watches, watch_events) = WatchMultiplexer::new(cluster_store.clone());

    let state = RollopState::new(
        registry,
        &controllers,
        cluster_store,
        discovery,
        Arc::new(watches),
    );

    let rollout_c = rollop_rollout::controller::run(state.clone(), client.clone());
    let remote_sync_c =
        rollop_remote_sync::controller::run(state.clone(), client.clone(), watch_events);

    let app = Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state.clone());

    let listener = TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    tokio::join!(rollout_c, remote_sync_c, server).2?;
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM signal handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}
