use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace,
};
use tracing::{info, Level};

use database::{
    subscription_key, DeliveryMode, Notification, SubscribeData, SubscriptionRecord,
    SubscriptionStore,
};
use webpush::{run_batch, DispatchFilter, DispatchReport, Dispatcher};

use crate::response::AppError;

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

pub struct AppConfig {
    pub store: Arc<dyn SubscriptionStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub admin_token: Option<String>,
    pub allowed_origins: Vec<String>,
    pub default_notification: Notification,
}

#[derive(Clone)]
struct AppState {
    store: Arc<dyn SubscriptionStore>,
    dispatcher: Arc<Dispatcher>,
    admin_token: Option<Arc<str>>,
    default_notification: Arc<Notification>,
}

impl AppState {
    fn authorize(&self, headers: &HeaderMap) -> Result<(), AppError> {
        let Some(expected) = self.admin_token.as_deref() else {
            return Ok(());
        };

        let given = headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if given == expected {
            Ok(())
        } else {
            Err(AppError::unauthorized())
        }
    }
}

pub fn create_app(config: AppConfig) -> anyhow::Result<Router> {
    let app_state = AppState {
        store: config.store,
        dispatcher: config.dispatcher,
        admin_token: config
            .admin_token
            .filter(|token| !token.is_empty())
            .map(Arc::from),
        default_notification: Arc::new(config.default_notification),
    };

    let cors = CorsLayer::new()
        .allow_origin(allow_origin(&config.allowed_origins)?)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(ADMIN_TOKEN_HEADER),
        ])
        .max_age(Duration::from_secs(86400));

    let api = Router::new()
        .route("/vapid", get(get_vapid))
        .route("/subscribe", post(subscribe))
        .route("/send", post(send));

    let app = Router::new()
        .nest("/api", api)
        .layer(cors)
        .layer(
            trace::TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(app_state);

    Ok(app)
}

/// `*` anywhere in the list allows every origin.
fn allow_origin(origins: &[String]) -> anyhow::Result<AllowOrigin> {
    let origins: Vec<&str> = origins
        .iter()
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .collect();

    if origins.contains(&"*") {
        return Ok(AllowOrigin::any());
    }

    let origins = origins
        .into_iter()
        .map(HeaderValue::from_str)
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid ALLOWED_ORIGINS entry")?;
    Ok(AllowOrigin::list(origins))
}

// GET /vapid
async fn get_vapid(State(app_state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "publicKey": app_state.dispatcher.vapid().public_key_base64url(),
    }))
}

#[derive(Deserialize)]
struct SubscribePayload {
    subscription: SubscribeData,
    mode: Option<String>,
    places: Option<Value>,
    hour: Option<Value>,
}

// POST /subscribe
async fn subscribe(
    State(app_state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let payload: Value =
        serde_json::from_slice(&body).map_err(|_| AppError::bad_request("Invalid JSON"))?;

    let has_endpoint = payload
        .pointer("/subscription/endpoint")
        .and_then(Value::as_str)
        .is_some_and(|endpoint| !endpoint.is_empty());
    if !has_endpoint {
        return Err(AppError::bad_request("subscription.endpoint required"));
    }

    let payload: SubscribePayload = serde_json::from_value(payload)
        .map_err(|_| AppError::bad_request("Invalid subscription"))?;

    let places = match payload.places {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_owned))
            .collect(),
        _ => Vec::new(),
    };
    let hour = payload
        .hour
        .as_ref()
        .and_then(Value::as_u64)
        .and_then(|h| u8::try_from(h).ok());

    let record = SubscriptionRecord::new(
        payload.subscription,
        DeliveryMode::parse(payload.mode.as_deref()),
        places,
        hour,
    );
    let key = app_state.store.put_record(&record).await?;

    info!("Stored subscription {}.", key);

    Ok(Json(json!({ "ok": true, "key": key })))
}

#[derive(Deserialize, Default)]
struct SendPayload {
    endpoint: Option<String>,
    place: Option<String>,
    hour: Option<u8>,
    notification: Option<Notification>,
    #[serde(default)]
    silent: bool,
}

impl SendPayload {
    fn payload(&self, default: &Notification) -> Option<Notification> {
        if self.silent {
            return None;
        }
        Some(self.notification.clone().unwrap_or_else(|| default.clone()))
    }
}

#[derive(Serialize)]
struct BatchResponse {
    ok: bool,
    #[serde(flatten)]
    report: DispatchReport,
}

// POST /send
async fn send(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    app_state.authorize(&headers)?;

    // Only an empty body means "send to everyone".
    let payload: SendPayload = if body.iter().all(u8::is_ascii_whitespace) {
        SendPayload::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| {
            AppError::new(
                StatusCode::BAD_REQUEST,
                anyhow::anyhow!("Invalid send body: {err}"),
            )
        })?
    };
    let notification = payload.payload(&app_state.default_notification);

    if let Some(endpoint) = payload.endpoint.as_deref().filter(|e| !e.is_empty()) {
        let subscription = match app_state.store.get(&subscription_key(endpoint)).await? {
            Some(raw) => serde_json::from_slice::<SubscriptionRecord>(&raw)
                .ok()
                .map(|record| record.subscription),
            None => None,
        }
        .unwrap_or_else(|| SubscribeData::new(endpoint));

        let outcome = app_state
            .dispatcher
            .send_one(&subscription, notification.as_ref())
            .await;
        let ok = outcome.is_delivered();
        let status = if ok {
            StatusCode::OK
        } else {
            StatusCode::BAD_GATEWAY
        };

        return Ok((
            status,
            Json(json!({
                "ok": ok,
                "status": outcome.status,
                "endpoint": endpoint,
            })),
        )
            .into_response());
    }

    let filter = DispatchFilter::new(payload.place.clone(), payload.hour);
    let report = run_batch(
        app_state.store.as_ref(),
        &app_state.dispatcher,
        &filter,
        |_| notification.clone(),
    )
    .await?;

    Ok(Json(BatchResponse { ok: true, report }).into_response())
}
