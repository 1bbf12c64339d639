//! HTTP surface of the [Gateway].
//!
//! | route | variant |
//! |---|---|
//! | `GET /set?token&key&value` | both |
//! | `POST /set` with `{"key", "value"}` | hardened |
//! | `GET /get?token&key` | both |
//! | `GET /neighbors?token` | hardened |

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use super::{Gateway, SET_SUCCESS};
use crate::{config::Variant, error::GatewayError};

#[derive(Debug, Default, Deserialize)]
struct SetParams {
    token: Option<String>,
    key: Option<String>,
    value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GetParams {
    token: Option<String>,
    key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenParams {
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SetBody {
    key: Option<String>,
    value: Option<String>,
}

/// Build the router for `variant` over `gateway`.
pub fn router(gateway: Gateway, variant: Variant) -> Router {
    let routes: Router<Gateway> = match variant {
        Variant::Basic => Router::new()
            .route("/set", get(set_handler))
            .route("/get", get(get_handler)),
        Variant::Hardened => Router::new()
            .route("/set", get(set_handler).post(set_json_handler))
            .route("/get", get(get_handler))
            .route("/neighbors", get(neighbors_handler)),
    };

    routes
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            // Invalid tokens have always been answered with a 500.
            GatewayError::Auth => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}

// === Handlers ===

async fn set_handler(
    State(gateway): State<Gateway>,
    Query(params): Query<SetParams>,
) -> Result<&'static str, GatewayError> {
    gateway
        .set(
            params.token.as_deref(),
            params.key.as_deref(),
            params.value.as_deref(),
        )
        .await?;

    Ok(SET_SUCCESS)
}

async fn set_json_handler(
    State(gateway): State<Gateway>,
    Query(params): Query<TokenParams>,
    body: Result<Json<SetBody>, JsonRejection>,
) -> Result<&'static str, GatewayError> {
    // Unparsable bodies are answered like missing fields.
    let body = body.map(|Json(body)| body).unwrap_or_default();

    gateway
        .set_json(
            params.token.as_deref(),
            body.key.as_deref(),
            body.value.as_deref(),
        )
        .await?;

    Ok(SET_SUCCESS)
}

async fn get_handler(
    State(gateway): State<Gateway>,
    Query(params): Query<GetParams>,
) -> Result<String, GatewayError> {
    gateway
        .get(params.token.as_deref(), params.key.as_deref())
        .await
}

async fn neighbors_handler(
    State(gateway): State<Gateway>,
    Query(params): Query<TokenParams>,
) -> Result<String, GatewayError> {
    let hosts = gateway.neighbors(params.token.as_deref()).await?;

    Ok(hosts.join("\n"))
}
