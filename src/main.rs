mod api;
mod clips;
mod config;
mod error;
mod firebase;
mod greeting;
mod models;
mod notify;
mod pipeline;
mod settings;
mod setup;
mod stripe;
mod twilio;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use clips::ClipStore;
use config::Config;
use firebase::auth::IdTokenVerifier;
use firebase::firestore::FirestoreClient;
use notify::Notifier;
use pipeline::agent::CallAgent;
use pipeline::llm::OpenAiClient;
use pipeline::stt::SttClient;
use pipeline::tts::TtsClient;
use stripe::StripeClient;
use twilio::client::TwilioClient;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long a synthesized clip stays fetchable.
const CLIP_TTL: Duration = Duration::from_secs(300);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const VENDOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: Arc<FirestoreClient>,
    pub verifier: Arc<IdTokenVerifier>,
    pub stripe: Arc<StripeClient>,
    pub twilio: Arc<TwilioClient>,
    pub notifier: Arc<Notifier>,
    pub stt: Arc<SttClient>,
    pub tts: Arc<TtsClient>,
    pub agent: Arc<CallAgent<OpenAiClient>>,
    pub clips: ClipStore,
}

impl AppState {
    pub fn new(config: Config, http: reqwest::Client) -> Result<Self, notify::NotifyError> {
        let twilio = Arc::new(TwilioClient::new(http.clone(), &config.twilio));
        let notifier = Notifier::new(twilio.clone(), config.smtp.as_ref())?;
        let model = OpenAiClient::new(
            http.clone(),
            config.openai.api_key.clone(),
            config.openai.model.clone(),
            config.openai.max_tokens,
        );

        Ok(Self {
            db: Arc::new(FirestoreClient::new(http.clone(), &config.firebase)),
            verifier: Arc::new(IdTokenVerifier::new(http.clone(), &config.firebase.project_id)),
            stripe: Arc::new(StripeClient::new(http.clone(), &config.stripe)),
            notifier: Arc::new(notifier),
            stt: Arc::new(SttClient::new(
                http.clone(),
                config.deepgram.api_key.clone(),
                config.deepgram.model.clone(),
            )),
            tts: Arc::new(TtsClient::new(
                http,
                config.elevenlabs.api_key.clone(),
                config.elevenlabs.voice_id.clone(),
                config.elevenlabs.model.clone(),
            )),
            agent: Arc::new(CallAgent::new(model, config.voice.session_timeout_secs)),
            clips: ClipStore::new(CLIP_TTL),
            twilio,
            config,
        })
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("--setup") => setup::run(),
        Some("--version") => println!("rental-desk {VERSION}"),
        Some("--help") | Some("-h") => print_usage(),
        Some(other) => {
            eprintln!("Unknown option: {other}");
            print_usage();
            std::process::exit(1);
        }
        None => {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("Failed to create tokio runtime: {e}");
                    std::process::exit(1);
                }
            };
            if let Err(e) = rt.block_on(server()) {
                tracing::error!("Server error: {e}");
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        }
    }
}

fn print_usage() {
    println!("rental-desk {VERSION}");
    println!("Admin API, booking checkout and voice line for a vehicle rental business");
    println!();
    println!("Usage: rental-desk [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --setup     Run interactive configuration wizard");
    println!("  --version   Print version");
    println!("  --help, -h  Print this help message");
    println!();
    println!("Without options, starts the server.");
}

async fn server() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rental_desk=info,tower_http=info".into()),
        )
        .init();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        project = %config.firebase.project_id,
        "Starting rental-desk"
    );
    if config.admin.emails.is_empty() {
        tracing::warn!("No admin emails configured, every /api/admin request will be rejected");
    }
    if config.stripe.webhook_secret.is_empty() {
        tracing::warn!("No Stripe webhook secret configured, webhook deliveries will be rejected");
    }

    let http = reqwest::Client::builder().timeout(VENDOR_TIMEOUT).build()?;
    let state = AppState::new(config.clone(), http)?;

    tracing::info!(
        deepgram = state.stt.is_configured(),
        elevenlabs = state.tts.is_configured(),
        smtp = config.smtp.is_some(),
        "Voice line ready"
    );

    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(sweep_sessions(state.clone(), shutdown.clone()));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(%addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let token = shutdown.clone();
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
            }
            tracing::info!("Shutting down");
            token.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = sweeper.await;
    Ok(())
}

/// Build the router. Split from `server` so tests can drive it directly.
pub fn app(state: AppState) -> Router {
    let static_dir = state.config.server.static_dir.clone();
    let cors = cors_layer(&state.config.server.cors_origins);

    // Twilio voice webhooks, signed with the account auth token
    let voice = Router::new()
        .route("/twilio/voice", post(twilio::webhook::handle_voice))
        .route("/twilio/voice/respond", post(twilio::webhook::handle_respond))
        .route("/twilio/voice/recording", post(twilio::webhook::handle_recording))
        .route("/twilio/voice/status", post(twilio::webhook::handle_status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            twilio::signature::require_twilio_signature,
        ));

    let router = Router::new()
        .merge(voice)
        .route("/twilio/audio/{id}", get(twilio::webhook::serve_clip))
        // Public booking site
        .route("/api/vehicles", get(api::public::list_available_vehicles))
        .route("/api/bookings", post(api::public::create_booking))
        .route("/api/checkout", post(api::public::checkout))
        .route("/api/stripe/webhook", post(api::stripe_webhook::handle_stripe_webhook))
        // Admin dashboard
        .route(
            "/api/admin/vehicles",
            get(api::vehicles::list_vehicles).post(api::vehicles::create_vehicle),
        )
        .route(
            "/api/admin/vehicles/{id}",
            put(api::vehicles::update_vehicle).delete(api::vehicles::delete_vehicle),
        )
        .route(
            "/api/admin/vehicles/{id}/availability",
            post(api::vehicles::set_availability),
        )
        .route("/api/admin/bookings", get(api::bookings::list_bookings))
        .route("/api/admin/bookings/{id}", delete(api::bookings::delete_booking))
        .route(
            "/api/admin/bookings/{id}/status",
            patch(api::bookings::update_status),
        )
        .route("/api/admin/stripe/payments", get(api::payments::list_payments))
        .route("/api/admin/stripe/transfers", get(api::payments::list_transfers))
        .route("/api/admin/activity", get(api::activity::list_activity))
        .route(
            "/api/admin/sms-settings",
            get(api::settings::get_sms_settings).put(api::settings::put_sms_settings),
        )
        .route("/api/admin/sms/test", post(api::settings::send_test_sms))
        .route(
            "/api/admin/voice-settings",
            get(api::settings::get_voice_settings).put(api::settings::put_voice_settings),
        )
        .route("/api/admin/calls", get(api::settings::list_active_calls))
        // Health check
        .route("/health", get(health));

    let router = match static_dir {
        Some(dir) => {
            tracing::info!(dir = %dir, "Serving front end");
            let index = std::path::Path::new(&dir).join("index.html");
            router.fallback_service(ServeDir::new(&dir).fallback(ServeFile::new(index)))
        }
        None => router,
    };

    let router = match cors {
        Some(layer) => router.layer(layer),
        None => router,
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if allowed.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

/// Evict idle call sessions and expired clips until shutdown.
async fn sweep_sessions(state: AppState, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let sessions = state.agent.sweep().await;
                let clips = state.clips.sweep().await;
                if sessions > 0 || clips > 0 {
                    tracing::debug!(sessions, clips, "Swept expired call state");
                }
            }
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::firebase::fake::FakeFirestore;

    fn test_app() -> Router {
        let config = Config::from_toml_str(config::TEST_CONFIG).unwrap();
        app(AppState::new(config, reqwest::Client::new()).unwrap())
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let resp = test_app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn admin_route_without_token_is_unauthorized() {
        let resp = test_app()
            .oneshot(Request::get("/api/admin/vehicles").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(resp).await;
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn admin_route_with_garbage_token_is_unauthorized() {
        let resp = test_app()
            .oneshot(
                Request::get("/api/admin/calls")
                    .header("authorization", "Bearer not-a-jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unsigned_stripe_webhook_is_rejected() {
        let resp = test_app()
            .oneshot(
                Request::post("/api/stripe/webhook")
                    .header("stripe-signature", "t=1,v1=deadbeef")
                    .body(Body::from(
                        r#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{}}}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_clip_is_not_found() {
        let resp = test_app()
            .oneshot(Request::get("/twilio/audio/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    /// A form POST signed the way Twilio signs it for this deployment.
    fn signed_form(path: &str, body: &str) -> Request<Body> {
        let url = format!("https://rentals.example.com{path}");
        let params: Vec<(String, String)> = url::form_urlencoded::parse(body.as_bytes())
            .into_owned()
            .collect();
        let signature = twilio::signature::compute_signature("secret", &url, &params);
        Request::post(path)
            .header("content-type", "application/x-www-form-urlencoded")
            .header(twilio::signature::SIGNATURE_HEADER, signature)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(resp: axum::response::Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn signed_status_callback_is_accepted() {
        let resp = test_app()
            .oneshot(signed_form(
                "/twilio/voice/status",
                "CallSid=CA123&CallStatus=completed&From=%2B15551230000",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn unsigned_voice_webhooks_are_forbidden() {
        for path in [
            "/twilio/voice",
            "/twilio/voice/respond",
            "/twilio/voice/recording",
            "/twilio/voice/status",
        ] {
            let resp = test_app()
                .oneshot(
                    Request::post(path)
                        .header("content-type", "application/x-www-form-urlencoded")
                        .body(Body::from("CallSid=CA123&CallStatus=completed"))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{path}");
        }
    }

    #[tokio::test]
    async fn forged_speech_result_is_forbidden() {
        let fake = FakeFirestore::start().await;
        let state = fake.state();
        let agent = state.agent.clone();

        // Signed for one utterance, delivered with another.
        let mut req = signed_form("/twilio/voice/respond", "CallSid=CA9&SpeechResult=hello");
        *req.body_mut() = Body::from("CallSid=CA9&SpeechResult=book+me+a+car");

        let resp = app(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(agent.active_calls().await.is_empty());
    }

    #[tokio::test]
    async fn recording_url_off_twilio_is_never_fetched() {
        let fake = FakeFirestore::start().await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let body = format!("CallSid=CA7&RecordingUrl=http%3A%2F%2F127.0.0.1%3A{port}%2Fsteal");
        let resp = app(fake.state())
            .oneshot(signed_form("/twilio/voice/recording", &body))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("trouble hearing"));
        let accepted = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(accepted.is_err(), "recording fetch reached an untrusted host");
    }

    #[tokio::test]
    async fn silent_caller_is_hung_up() {
        let fake = FakeFirestore::start().await;
        let app = app(fake.state());

        let mut last = String::new();
        for _ in 0..3 {
            let resp = app
                .clone()
                .oneshot(signed_form("/twilio/voice/respond", "CallSid=CA5&SpeechResult="))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            last = body_text(resp).await;
        }
        assert!(last.contains("<Hangup"), "{last}");
        assert!(!last.contains("<Redirect"), "{last}");
    }

    #[test]
    fn cors_is_off_without_valid_origins() {
        assert!(cors_layer(&[]).is_none());
        assert!(cors_layer(&["bad\norigin".to_string()]).is_none());
        assert!(cors_layer(&["https://rentals.example.com".to_string()]).is_some());
    }

    #[tokio::test]
    async fn stored_clip_is_served_as_mp3() {
        let config = Config::from_toml_str(config::TEST_CONFIG).unwrap();
        let state = AppState::new(config, reqwest::Client::new()).unwrap();
        let id = state.clips.insert(bytes::Bytes::from_static(b"ID3")).await;

        let resp = app(state)
            .oneshot(
                Request::get(format!("/twilio/audio/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "audio/mpeg");
    }
}
