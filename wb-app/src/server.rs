//! WhatsBot server: webhook ingress, control API, and the scheduler runtime.

use crate::config::{BotConfig, StorageBackend, expand_home};
use crate::escalation::EscalationRegistry;
use crate::gateway::Gateway;
use crate::generator::LlmResponseGenerator;
use crate::history::{HistoryStore, InMemoryHistoryStore, SqliteHistoryStore};
use crate::http_auth;
use crate::notifier::OperatorNotifier;
use crate::pipeline::Pipeline;
use crate::presence::BestEffortPresence;
use crate::routes;
use crate::scheduler::ConversationScheduler;
use crate::settings::OrchestrationSettings;
use anyhow::Result;
use axum::Extension;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use wb_channels::{ConversationKey, MessageSender, PhoneNumber, SessionId, WhatsAppCloudAdapter};
use wb_llm::LlmClient;

const INBOUND_QUEUE_CAPACITY: usize = 1024;
const SCHEDULER_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shared state behind the control API.
pub struct AppState {
    pub scheduler: ConversationScheduler,
    pub escalations: Arc<EscalationRegistry>,
    pub settings: Arc<OrchestrationSettings>,
    /// The business `phone_number_id`; control API phones resolve against it.
    pub session: SessionId,
    pub model: String,
    pub started_at: Instant,
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = BotConfig::load(config_path).await?;
    cfg.validate_for_serve()?;
    let client = build_llm_client(&cfg)?;
    let history_path = match cfg.storage.backend {
        StorageBackend::Sqlite => Some(expand_home(&cfg.storage.db_path)?),
        StorageBackend::Memory => None,
    };
    tracing::info!(
        model = %cfg.general.model,
        provider = ?client.provider(),
        bind_addr = %cfg.bind_addr()?,
        storage_backend = ?cfg.storage.backend,
        history_path = ?history_path,
        operator_count = cfg.operator_phones()?.len(),
        control_api_auth = !http_auth::ControlAuthPolicy::from_config(&cfg.server).is_open(),
        webhook_signature_check = cfg.whatsapp.app_secret.is_some(),
        "config ok"
    );
    Ok(())
}

pub async fn send_one_shot(config_path: Option<PathBuf>, phone: &str, message: &str) -> Result<()> {
    let cfg = BotConfig::load(config_path).await?;
    let adapter = build_whatsapp_adapter(&cfg)?;
    let phone = PhoneNumber::normalize(phone)
        .ok_or_else(|| anyhow::anyhow!("not a phone number: {phone:?}"))?;
    let key = ConversationKey::new(adapter.phone_number_id(), phone);
    adapter.send_text(&key, message).await?;
    tracing::info!(conversation = %key, "message sent");
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = BotConfig::load(config_path).await?;
    cfg.validate_for_serve()?;
    let started_at = Instant::now();
    let addr = cfg.bind_addr()?;
    let auth_policy = http_auth::ControlAuthPolicy::from_config(&cfg.server);
    tracing::info!(
        bind_addr = %addr,
        model = %cfg.general.model,
        storage_backend = ?cfg.storage.backend,
        debounce = ?cfg.timing.debounce_range(),
        typing = ?cfg.timing.typing_range(),
        orchestration_enabled = cfg.orchestration.enabled,
        http_timeout_seconds = cfg.server.http_timeout_seconds,
        http_max_in_flight = cfg.server.http_max_in_flight,
        control_api_auth = !auth_policy.is_open(),
        "server configuration loaded"
    );

    let listener = preflight_bind_listener(addr).await?;

    let adapter = Arc::new(build_whatsapp_adapter(&cfg)?);
    let session = SessionId::new(adapter.phone_number_id());
    let history = open_history_store(&cfg)?;
    let generator = Arc::new(LlmResponseGenerator::new(
        build_llm_client(&cfg)?,
        &cfg.general.system_prompt,
    ));
    let operators = cfg.operator_phones()?;
    if operators.is_empty() {
        tracing::warn!("no escalation.operator_phones configured; escalations will not be announced");
    }
    let notifier = Arc::new(OperatorNotifier::new(adapter.clone(), operators.clone()));

    let escalations = Arc::new(EscalationRegistry::new());
    let settings = Arc::new(OrchestrationSettings::new(cfg.orchestration.enabled));
    for phone in cfg.disabled_conversation_phones()? {
        settings.set_override(&ConversationKey::new(session.clone(), phone), Some(false));
    }

    let pipeline = Pipeline::new(
        BestEffortPresence::new(adapter.clone()),
        adapter.clone(),
        history.clone(),
        generator,
        notifier,
        cfg.replies.clone(),
        cfg.timing.typing_range().into(),
    );
    let scheduler = ConversationScheduler::new(
        pipeline,
        cfg.timing.debounce_range().into(),
        escalations.clone(),
        settings.clone(),
    );

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
    let shutdown = CancellationToken::new();
    let gateway_handle = Gateway::new(
        scheduler.clone(),
        escalations.clone(),
        settings.clone(),
        history,
        adapter.clone(),
        adapter.clone(),
        operators,
    )
    .start(inbound_rx, shutdown.child_token());
    tracing::info!("gateway started");

    let state = Arc::new(AppState {
        scheduler: scheduler.clone(),
        escalations,
        settings,
        session,
        model: cfg.general.model.clone(),
        started_at,
    });

    let control_router = routes::router()
        .layer(axum::middleware::from_fn(http_auth::require_control_auth))
        .layer(Extension(http_auth::ControlAuthPolicyExt(auth_policy)))
        .layer(Extension(state));
    let webhook_router = routes::webhook::router(
        inbound_tx,
        cfg.whatsapp.verify_token.clone(),
        cfg.whatsapp.app_secret.clone(),
    );

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::debug!(
                method = %request.method(),
                uri = %request.uri(),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = control_router
        .merge(webhook_router)
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "whatsbot serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    shutdown.cancel();
    scheduler.shutdown(SCHEDULER_SHUTDOWN_GRACE).await;
    match gateway_handle.await {
        Ok(()) => tracing::info!("gateway shutdown completed"),
        Err(e) => tracing::error!(error = %e, "gateway task join failed during shutdown"),
    }
    Ok(())
}

fn build_whatsapp_adapter(cfg: &BotConfig) -> Result<WhatsAppCloudAdapter> {
    Ok(
        WhatsAppCloudAdapter::new(&cfg.whatsapp.access_token, &cfg.whatsapp.phone_number_id)?
            .with_graph_api_version(cfg.whatsapp.graph_api_version.clone()),
    )
}

fn build_llm_client(cfg: &BotConfig) -> Result<LlmClient> {
    let api_key = cfg.api_key_for_model().ok_or_else(|| {
        anyhow::anyhow!("no api key configured for model {}", cfg.general.model)
    })?;
    Ok(LlmClient::new(&api_key, &cfg.general.model)?
        .with_base_url(cfg.general.api_base_url.clone()))
}

fn open_history_store(cfg: &BotConfig) -> Result<Arc<dyn HistoryStore>> {
    match cfg.storage.backend {
        StorageBackend::Sqlite => {
            let path = expand_home(&cfg.storage.db_path)?;
            tracing::info!(path = %path.display(), "opening sqlite history store");
            Ok(Arc::new(SqliteHistoryStore::open(&path)?))
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory history store; history is lost on restart");
            Ok(Arc::new(InMemoryHistoryStore::new()))
        }
    }
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "listener bound");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
            _ = shutdown.cancelled() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::warn!("received ctrl-c; beginning graceful shutdown"),
                Err(e) => tracing::error!(error = %e, "failed to await ctrl-c signal"),
            },
            _ = shutdown.cancelled() => {}
        }
    }
    shutdown.cancel();
}
