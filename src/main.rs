use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::{routing::get, Router};
use http::HeaderValue;
use http::StatusCode;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod middleware;
mod routes;
mod services;

use config::Config;
use services::google::GoogleService;
use services::stripe::StripeService;

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    /// Present when STRIPE_SECRET_KEY is configured; paid checkouts answer
    /// NOT_CONFIGURED without it.
    pub stripe: Option<StripeService>,
    /// Present when Google OAuth credentials are configured.
    pub google: Option<GoogleService>,
}

/// Error responses for rate-limited requests, shaped like the JSON envelope
/// the rest of the API emits.
fn governor_error_response(error: GovernorError) -> http::Response<Body> {
    match error {
        GovernorError::TooManyRequests { wait_time, headers } => {
            // `wait_time` is provided as seconds
            let retry_after = wait_time;

            let body = serde_json::json!({
                "error": {
                    "code": "RATE_LIMITED",
                    "message": "Rate limit exceeded",
                    "details": { "retry_after_seconds": retry_after }
                }
            })
            .to_string();

            let mut resp = http::Response::new(Body::from(body));
            *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;

            resp.headers_mut().insert(
                http::header::CONTENT_TYPE,
                http::HeaderValue::from_static("application/json"),
            );

            // Include any headers provided by the governor (e.g., X-RateLimit-* if enabled)
            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }

            resp.headers_mut().insert(
                http::header::RETRY_AFTER,
                http::HeaderValue::from_str(&retry_after.to_string()).unwrap(),
            );

            resp
        }
        GovernorError::UnableToExtractKey => {
            let body = serde_json::json!({
                "error": {
                    "code": "INVALID_REQUEST",
                    "message": "Unable to determine client IP for rate limiting"
                }
            })
            .to_string();

            let mut resp = http::Response::new(Body::from(body));
            *resp.status_mut() = StatusCode::BAD_REQUEST;
            resp.headers_mut().insert(
                http::header::CONTENT_TYPE,
                http::HeaderValue::from_static("application/json"),
            );
            resp
        }
        GovernorError::Other { code, msg, headers } => {
            let body = msg.unwrap_or_else(|| "Rate limiting error".to_string());
            let mut resp = http::Response::new(Body::from(body));
            let status =
                StatusCode::from_u16(code.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            *resp.status_mut() = status;
            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }
            resp
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coevent_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting CoEvent API");

    // Initialize database
    let pool = services::init::init_db(&config).await?;

    // Initialize external providers. Either may be absent; the matching
    // endpoints answer NOT_CONFIGURED instead of failing startup.
    let stripe = match config.stripe.secret_key.clone() {
        Some(secret_key) => {
            tracing::info!("Stripe configured; paid checkouts enabled");
            Some(StripeService::new(secret_key)?)
        }
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set; paid checkouts disabled");
            None
        }
    };

    let google = GoogleService::from_config(&config.google)?;
    if google.is_some() {
        tracing::info!("Google Calendar integration configured");
    } else {
        tracing::warn!("Google credentials not set; calendar integration disabled");
    }

    let app_state = Arc::new(AppState {
        db: pool,
        config: config.clone(),
        stripe,
        google,
    });

    // Build rate limiters for public endpoints (auth, webhooks)
    let mut auth_builder = GovernorConfigBuilder::default();
    auth_builder.per_second(config.rate_limit.auth_per_second.into());
    auth_builder.burst_size(config.rate_limit.auth_burst);
    auth_builder.key_extractor(SmartIpKeyExtractor);
    auth_builder.error_handler(governor_error_response);

    let auth_gov_conf = Arc::new(
        auth_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build auth governor config"))?,
    );

    let mut webhooks_builder = GovernorConfigBuilder::default();
    webhooks_builder.per_second(config.rate_limit.webhook_per_second.into());
    webhooks_builder.burst_size(config.rate_limit.webhook_burst);
    webhooks_builder.key_extractor(SmartIpKeyExtractor);
    webhooks_builder.error_handler(governor_error_response);

    let webhooks_gov_conf = Arc::new(
        webhooks_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build webhooks governor config"))?,
    );

    // Periodically shed stale entries from the limiter stores.
    for limiter in [
        auth_gov_conf.limiter().clone(),
        webhooks_gov_conf.limiter().clone(),
    ] {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                tracing::debug!("rate limiter size: {}", limiter.len());
                limiter.retain_recent();
            }
        });
    }

    let auth_rate_layer = GovernorLayer {
        config: auth_gov_conf,
    };
    let webhooks_rate_layer = GovernorLayer {
        config: webhooks_gov_conf,
    };

    // Build router
    let app = Router::new()
        // Health check
        .route("/health", get(routes::health::health_check))
        // Auth routes (apply rate limiting for public auth endpoints)
        .nest("/api/auth", routes::auth::router().layer(auth_rate_layer))
        // Event catalog
        .nest("/api/events", routes::events::router())
        // Booking flow (attend / cancel / my bookings)
        .nest("/api", routes::bookings::router())
        // Payment bridge (checkout / verify)
        .nest("/api/payments", routes::payments::router())
        // Google Calendar bridge
        .nest("/api/calendar", routes::calendar::router())
        // Administrative seeding
        .nest("/api/admin", routes::admin::router())
        // Stripe webhooks (apply rate limiting)
        .nest(
            "/webhooks",
            routes::webhooks::router().layer(webhooks_rate_layer),
        )
        // Add shared state
        .with_state(app_state.clone())
        // Security headers on every response
        .layer(axum::middleware::from_fn(
            middleware::csp::security_headers_middleware,
        ))
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(
                    config
                        .server
                        .frontend_url
                        .parse::<HeaderValue>()
                        .expect("Invalid FRONTEND_URL for CORS"),
                )
                .allow_methods([
                    http::Method::GET,
                    http::Method::POST,
                    http::Method::PUT,
                    http::Method::DELETE,
                    http::Method::OPTIONS,
                ])
                .allow_headers([
                    http::header::CONTENT_TYPE,
                    http::header::AUTHORIZATION,
                    http::header::ACCEPT,
                ])
                .allow_credentials(true),
        );

    // Start server
    let host = config.server.host.clone();
    let port = config.server.port;
    let addr = format!("{}:{}", host, port);

    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolve when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to bind SIGTERM");
        tokio::select! {
            _ = ctrl_c => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("Failed to bind Ctrl+C");
    }

    tracing::info!("Shutdown signal received");
}
