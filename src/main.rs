use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lead_conversation_api::analyzer::ConversationAnalyzer;
use lead_conversation_api::config::Config;
use lead_conversation_api::conversation_store::PgConversationStore;
use lead_conversation_api::db::Database;
use lead_conversation_api::gateway_client::TwilioGateway;
use lead_conversation_api::handlers::{self, AppState};
use lead_conversation_api::lead_resolver::{LeadResolver, PgLeadStore};
use lead_conversation_api::llm_client::OpenAiCompatClient;
use lead_conversation_api::orchestrator::WebhookOrchestrator;
use lead_conversation_api::reply_generator::ReplyGenerator;
use lead_conversation_api::webhook_handler;

/// Upper bound for one text-generation request.
const MODEL_TIMEOUT: Duration = Duration::from_secs(30);

/// Serves the OpenAPI specification YAML file.
///
/// Reads `openapi.yml` from the working directory; 404 if it is missing.
async fn serve_openapi_spec() -> impl IntoResponse {
    match tokio::fs::read_to_string("openapi.yml").await {
        Ok(content) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/yaml")],
            content,
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "OpenAPI spec not found").into_response(),
    }
}

/// Serves a Swagger UI page that loads `/api-docs/openapi.yml`.
async fn serve_swagger_ui() -> impl IntoResponse {
    let html = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Lead Conversation API - Swagger UI</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
    <style>
        body { margin: 0; padding: 0; }
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script>
        window.onload = function() {
            window.ui = SwaggerUIBundle({
                url: "/api-docs/openapi.yml",
                dom_id: '#swagger-ui',
                deepLinking: true
            });
        };
    </script>
</body>
</html>
"#;
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
}

/// Main entry point for the application.
///
/// Initializes logging, configuration, the database pool, the model and
/// Twilio clients, then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lead_conversation_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    let conversations = Arc::new(PgConversationStore::new(db.pool.clone()));
    let leads = Arc::new(PgLeadStore::new(db.pool.clone()));
    let resolver = LeadResolver::new(
        leads.clone(),
        config.default_country_code.clone(),
        Duration::from_secs(config.store_timeout_secs),
    );
    tracing::info!("Lead resolution cache initialized (10m TTL, positive matches only)");

    // Replies go through OpenRouter, which wants attribution headers
    let reply_model = OpenAiCompatClient::new(
        "OpenRouter",
        config.openrouter_base_url.clone(),
        config.openrouter_api_key.clone(),
        MODEL_TIMEOUT,
    )?
    .with_header("HTTP-Referer", config.app_url.clone())
    .with_header("X-Title", config.app_name.clone());
    tracing::info!("✓ OpenRouter client initialized: {}", config.openrouter_model);

    let analysis_model = OpenAiCompatClient::new(
        "Groq",
        config.groq_base_url.clone(),
        config.groq_api_key.clone(),
        MODEL_TIMEOUT,
    )?;
    tracing::info!("✓ Groq client initialized: {}", config.groq_model);

    let gateway = Arc::new(
        TwilioGateway::new(
            config.twilio_base_url.clone(),
            config.twilio_account_sid.clone(),
            config.twilio_auth_token.clone(),
            config.twilio_whatsapp_number.clone(),
            config.default_country_code.clone(),
        )?
        .with_status_callback(config.twilio_status_callback_url.clone()),
    );
    tracing::info!("✓ Twilio client initialized: {}", config.twilio_base_url);

    let orchestrator = WebhookOrchestrator::new(
        resolver,
        conversations.clone(),
        ReplyGenerator::new(Arc::new(reply_model), config.openrouter_model.clone()),
        gateway.clone(),
    );

    let app_state = Arc::new(AppState {
        orchestrator,
        analyzer: ConversationAnalyzer::new(Arc::new(analysis_model), config.groq_model.clone()),
        conversations,
        leads,
        gateway,
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    // Admin API behind size and rate limits
    let protected_routes = Router::new()
        .route("/docs", get(serve_swagger_ui))
        .route("/api-docs/openapi.yml", get(serve_openapi_spec))
        .route(
            "/api/v1/leads/:id/conversations",
            get(handlers::get_conversations).post(handlers::send_message),
        )
        .route(
            "/api/v1/leads/:id/conversation-analysis",
            get(handlers::get_conversation_analysis),
        )
        .route(
            "/api/v1/leads/:id/welcome",
            post(handlers::send_welcome_message),
        )
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(1024 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Twilio webhooks bypass rate limiting; all requests come from Twilio's pool
    let webhook_routes = Router::new()
        .route(
            "/webhooks/twilio/incoming-message",
            post(webhook_handler::incoming_message),
        )
        .route(
            "/webhooks/twilio/message-status",
            post(webhook_handler::message_status),
        )
        .layer(RequestBodyLimitLayer::new(64 * 1024));

    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(webhook_routes)
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
