use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::get,
    Router,
};
use futures::Stream;
use serde_json::{json, Value};
use std::collections::HashMap;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::{
    config::Config,
    error::Result,
    gateway::{McpGateway, WebhookRequest},
    session::InMemorySessionStore,
    tools::ToolSet,
    transport::{ServerEventStream, TransportReply, SESSION_ID_HEADER},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub gateway: Arc<McpGateway>,
    pub tools: ToolSet,
}

pub async fn run_server(config: Config, tools: ToolSet) -> Result<()> {
    let gateway = Arc::new(McpGateway::new(
        Arc::new(InMemorySessionStore::new()),
        config.clone(),
    ));
    if config.queue_mode {
        gateway.enable_queue_mode().await;
    }

    let state = AppState {
        config: config.clone(),
        gateway,
        tools,
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::header::CACHE_CONTROL,
            axum::http::header::HeaderName::from_static(SESSION_ID_HEADER),
            axum::http::header::HeaderName::from_static("mcp-protocol-version"),
            axum::http::header::HeaderName::from_static("last-event-id"),
        ])
        .allow_origin(axum::http::header::HeaderValue::from_static("*"));

    // The SSE routes must stay outside any compression layer; buffered
    // events would break the push contract.
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/sse", get(sse_setup_handler))
        .route("/messages", axum::routing::post(sse_message_handler))
        .route(
            "/mcp",
            get(mcp_stream_handler)
                .post(mcp_post_handler)
                .delete(mcp_delete_handler),
        )
        .layer(RequestBodyLimitLayer::new(1024 * 1024)) // 1 MiB
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let address = config.server_address();
    info!("Server listening on {}", address);

    let listener = tokio::net::TcpListener::bind(&address).await?;
    match axum::serve(listener, app).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => error!("Server error: {}", e),
    }

    Ok(())
}

fn webhook_request(
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Option<String>,
) -> WebhookRequest {
    WebhookRequest {
        query,
        headers,
        body: body.and_then(|raw| serde_json::from_str::<Value>(&raw).ok()),
    }
}

fn event_stream(
    mut rx: ServerEventStream,
) -> impl Stream<Item = std::result::Result<Event, axum::Error>> {
    async_stream::stream! {
        while let Some(server_event) = rx.recv().await {
            yield Ok(Event::default()
                .event(server_event.event)
                .data(server_event.data));
        }
    }
}

fn reply_to_response(reply: TransportReply, session_id: Option<&str>) -> Response {
    let mut response = match reply {
        TransportReply::Accepted => (StatusCode::ACCEPTED, "Accepted").into_response(),
        TransportReply::Json(message) => Json(message).into_response(),
        TransportReply::Empty => StatusCode::ACCEPTED.into_response(),
    };
    if let Some(session_id) = session_id {
        if let Ok(value) = session_id.parse() {
            response.headers_mut().insert(SESSION_ID_HEADER, value);
        }
    }
    response
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "mcp-gateway",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "sessions": state.gateway.sessions().session_count(),
        "queueMode": state.gateway.is_queue_mode().await,
    }))
}

/// SSE setup: opens the event stream and registers a new session.
async fn sse_setup_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let request = webhook_request(query, headers, None);
    let setup = state
        .gateway
        .handle_setup_request(&request, &state.config.server_name, "/messages", state.tools.clone())
        .await?;

    Ok(Sse::new(event_stream(setup.stream)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(state.config.sse_keep_alive_secs))
            .text("keep-alive"),
    ))
}

/// POST endpoint for the SSE transport's message path.
async fn sse_message_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Result<Response> {
    let request = webhook_request(query, headers, Some(body));
    let outcome = state
        .gateway
        .handle_post_message(&request, &state.tools, Some(&state.config.server_name))
        .await?;
    Ok(reply_to_response(outcome.reply, None))
}

/// Streamable HTTP endpoint: `initialize` creates a session, everything else
/// is routed to the existing one.
async fn mcp_post_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Result<Response> {
    let request = webhook_request(query, headers, Some(body));

    let is_initialize = request
        .body
        .as_ref()
        .and_then(|b| b.get("method"))
        .and_then(|m| m.as_str())
        == Some("initialize");

    if is_initialize {
        let setup = state
            .gateway
            .handle_streamable_http_setup(&request, &state.config.server_name, state.tools.clone())
            .await?;
        return Ok(reply_to_response(setup.reply, Some(&setup.session_id)));
    }

    let outcome = state
        .gateway
        .handle_post_message(&request, &state.tools, Some(&state.config.server_name))
        .await?;
    Ok(reply_to_response(outcome.reply, None))
}

/// Standalone outbound stream for server-initiated messages.
async fn mcp_stream_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let request = webhook_request(query, headers, None);
    let stream = state.gateway.open_stream(&request).await?;

    Ok(Sse::new(event_stream(stream)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(state.config.sse_keep_alive_secs))
            .text("keep-alive"),
    ))
}

async fn mcp_delete_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response> {
    let request = webhook_request(query, headers, None);
    state.gateway.handle_delete_request(&request).await?;
    Ok((StatusCode::OK, "Session terminated").into_response())
}
