use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tracing::debug;

use relay_agent::AnswerGenerator;
use relay_core::RelayConfig;
use relay_whatsapp::{NormalizedMessage, ReplyDispatcher, ReplyTransport};

use crate::pipeline::{ConversationHandler, DedupGuard, TaskSpawner};

/// Central shared state, passed as `Arc<AppState>` to all Axum handlers.
/// Built once in `main`; collaborators are injected, never looked up.
pub struct AppState {
    pub config: RelayConfig,
    pub generator: Arc<dyn AnswerGenerator>,
    pub handler: Arc<ConversationHandler>,
    pub spawner: Arc<dyn TaskSpawner>,
    pub dedup: DedupGuard,
}

impl AppState {
    pub fn new(
        config: RelayConfig,
        generator: Arc<dyn AnswerGenerator>,
        transport: Arc<dyn ReplyTransport>,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Self {
        let dispatcher = ReplyDispatcher::new(transport, config.whatsapp.max_message_length)
            .with_retry(
                config.pipeline.dispatch_max_attempts,
                Duration::from_millis(config.pipeline.dispatch_backoff_ms),
            );
        let handler = ConversationHandler::from_config(Arc::clone(&generator), dispatcher, &config);
        let dedup = DedupGuard::new(Duration::from_secs(config.pipeline.dedup_window_secs));
        Self {
            config,
            generator,
            handler: Arc::new(handler),
            spawner,
            dedup,
        }
    }

    /// Hand `message` to the conversation handler without waiting for it.
    pub fn schedule(&self, message: NormalizedMessage) {
        debug!(message_id = %message.message_id, from = %message.sender_id, "scheduling handler");
        let handler = Arc::clone(&self.handler);
        self.spawner.spawn(Box::pin(async move {
            handler.handle(message).await;
        }));
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(crate::http::health::root_handler))
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/webhook",
            get(crate::http::webhook::verify_handler).post(crate::http::webhook::receive_handler),
        )
        .route(
            "/load-knowledge",
            post(crate::http::knowledge::load_knowledge_handler),
        )
        .route("/test-query", post(crate::http::query::test_query_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
