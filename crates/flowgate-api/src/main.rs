// Flowgate gateway: inbound trigger routing and service wiring

mod config;
mod github;
mod manual;
mod signature;
mod slack;
mod webhooks;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use flowgate_core::{CredentialProvider, NoCredentials, Repository};
use flowgate_engine::{ExecutionEngine, NodeExecutorRegistry, TimeoutReaper};
use flowgate_storage::{CredentialEncryption, CredentialStore, Database, PgLockManager, StorageConfig};
use flowgate_triggers::{
    Dispatcher, EmailEnv, GithubAppConfig, SlackEventRouter, TracingNotifier, TriggerContext,
    TriggerRegistry,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use config::ApiConfig;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    deployed_workflows: usize,
}

#[derive(Clone)]
struct HealthState {
    registry: Arc<TriggerRegistry>,
}

async fn health(
    axum::extract::State(state): axum::extract::State<HealthState>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        deployed_workflows: state.registry.deployed_workflow_count().await,
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        manual::trigger_manual_workflow,
        github::handle_github_webhook,
        slack::handle_slack_event,
    ),
    tags(
        (name = "triggers", description = "Manual trigger endpoints"),
        (name = "inbound-events", description = "GitHub and Slack event intake")
    ),
    info(
        title = "Flowgate API",
        version = "0.2.0",
        description = "Workflow trigger and execution orchestration gateway",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowgate_api=debug,flowgate_triggers=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("flowgate-api starting...");

    let api_config = ApiConfig::from_env().context("Failed to load gateway configuration")?;

    // Storage
    let storage_config = StorageConfig::from_env().context("Failed to load storage configuration")?;
    let db = Database::from_url(&storage_config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Connected to database");
    let repository: Arc<dyn Repository> = Arc::new(db.clone());

    // Credentials are optional; executors degrade to no credentials
    let credentials: Arc<dyn CredentialProvider> = match CredentialEncryption::from_env() {
        Ok(encryption) => {
            tracing::info!("Credential encryption initialized");
            Arc::new(CredentialStore::new(db.clone(), encryption))
        }
        Err(e) => {
            tracing::warn!("Credential store disabled ({e}); executors run without tokens");
            Arc::new(NoCredentials)
        }
    };

    // Trigger subsystem wiring
    let dispatcher = Arc::new(
        Dispatcher::new(&api_config.workflow_engine_url).with_audit(repository.clone()),
    );
    let locks = Arc::new(PgLockManager::new(db.clone()));
    let context = Arc::new(TriggerContext::new(
        dispatcher,
        Arc::new(TracingNotifier),
        locks,
    ));
    let slack_router = Arc::new(SlackEventRouter::new());

    let github_app = GithubAppConfig::from_env().context("Invalid GitHub App configuration")?;
    if github_app.is_none() {
        tracing::info!("GitHub App not configured; github triggers will stay inert");
    }
    let github_webhook_secret = github_app.as_ref().and_then(|c| c.webhook_secret.clone());

    let email_env = EmailEnv::from_env().context("Invalid email configuration")?;
    if email_env.is_none() {
        tracing::info!("IMAP not configured; email triggers will stay inert");
    }

    let registry = Arc::new(TriggerRegistry::new(
        context,
        slack_router.clone(),
        github_app,
        email_env,
        api_config.api_gateway_url.clone(),
    ));

    let executor_registry = Arc::new(NodeExecutorRegistry::with_builtins(credentials));

    // Deploy triggers for every active workflow
    let workflows = db
        .list_active_workflows()
        .await
        .context("Failed to load active workflows")?;
    for workflow in &workflows {
        for issue in executor_registry.validate_workflow(workflow) {
            tracing::warn!(workflow_id = %workflow.id, "workflow validation: {issue}");
        }
        if let Err(e) = registry.deploy_workflow(workflow).await {
            tracing::error!(workflow_id = %workflow.id, "failed to deploy workflow triggers: {e}");
        }
    }
    tracing::info!(count = workflows.len(), "active workflows deployed");

    // Timeout reaper over the in-process engine (HIL auto-resume)
    let engine = Arc::new(ExecutionEngine::new(repository.clone(), executor_registry));
    let reaper = Arc::new(TimeoutReaper::new(engine, repository));
    let (_reaper_shutdown, _reaper_handle) = reaper.spawn();

    // Router
    let health_state = HealthState {
        registry: registry.clone(),
    };
    let github_state = github::AppState {
        registry: registry.clone(),
        webhook_secret: github_webhook_secret,
    };
    let slack_state = slack::AppState {
        router: slack_router,
        signing_secret: api_config.slack_signing_secret.clone(),
    };
    let manual_state = manual::AppState {
        registry: registry.clone(),
    };
    let webhook_state = webhooks::AppState { registry };

    // Webhook paths are per-trigger configuration, routed via the fallback
    let webhook_router = Router::new()
        .fallback(webhooks::handle_webhook)
        .with_state(webhook_state);

    let app = Router::new()
        .route("/health", get(health).with_state(health_state))
        .merge(github::routes(github_state))
        .merge(slack::routes(slack_state))
        .merge(manual::routes(manual_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(webhook_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&api_config.bind_addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on {}", api_config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}
