use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Json;
use axum::Router;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use host::WorkerLaunchConfig;
use host::bridge::{Capabilities, DispatchBridge, EventIpc, IpcChannel};
use host::dispatch::{DispatchConfig, spawn_dispatcher};
use host::launcher::{ENV_EXEC_LOG, ENV_EXEC_TIMEOUT_SECS, build_launcher};
use host::shell::{APP_CONTAINER_ID, AppShell, MountPoint, RootComponent};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::compression::CompressionLayer;
use tower_http::timeout::TimeoutLayer;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const DEFAULT_MAX_INFLIGHT: usize = 64;
const DEFAULT_INGRESS_CAPACITY: usize = 256;
const DEFAULT_POOL_SIZE: usize = 1;
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 60;

const MAX_CODE_BYTES: usize = 1_048_576;
const MAX_BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone)]
struct HostConfig {
    host: String,
    port: u16,
    max_inflight: usize,
    ingress_capacity: usize,
    pool_size: usize,
    request_timeout_secs: u64,
    engine: engine::EngineConfig,
}

impl HostConfig {
    fn from_env() -> Result<Self, String> {
        Ok(Self {
            host: env::var("RUNPAD_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned()),
            port: env_parsed("RUNPAD_PORT", 3000)?,
            max_inflight: env_parsed("RUNPAD_MAX_INFLIGHT", DEFAULT_MAX_INFLIGHT)?,
            ingress_capacity: env_parsed("RUNPAD_INGRESS_CAPACITY", DEFAULT_INGRESS_CAPACITY)?,
            pool_size: env_parsed("RUNPAD_POOL_SIZE", DEFAULT_POOL_SIZE)?,
            request_timeout_secs: env_parsed(
                "RUNPAD_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECONDS,
            )?,
            engine: engine::EngineConfig {
                execution_timeout_secs: env_parsed(
                    ENV_EXEC_TIMEOUT_SECS,
                    engine::DEFAULT_EXECUTION_TIMEOUT_SECS,
                )?,
                log_executions: env_flag(ENV_EXEC_LOG),
            },
        })
    }

    fn to_launch_config(&self) -> WorkerLaunchConfig {
        WorkerLaunchConfig {
            engine: self.engine.clone(),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("invalid value for {name}: {raw}")),
        Err(_) => Ok(default),
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|raw| {
            let raw = raw.trim();
            raw == "1" || raw.eq_ignore_ascii_case("true")
        })
        .unwrap_or(false)
}

#[derive(Clone)]
struct AppState {
    bridge: DispatchBridge,
    ipc: EventIpc,
}

#[derive(Debug, Deserialize)]
struct ExecuteCodeRequest {
    code: String,
    #[serde(default)]
    reset: bool,
}

async fn healthcheck() -> Response {
    let mut response = StatusCode::OK.into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

async fn log_request_response(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();
    println!("request: {method} {uri}");
    let response = next.run(request).await;
    println!(
        "response: {method} {uri} status={} latency_ms={}",
        response.status(),
        start.elapsed().as_millis()
    );
    response
}

async fn execute_handler(
    State(state): State<AppState>,
    Json(payload): Json<ExecuteCodeRequest>,
) -> Response {
    if payload.code.len() > MAX_CODE_BYTES {
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            &format!("code too large; max {MAX_CODE_BYTES} bytes"),
        );
    }

    let outcome = state.bridge.execute(&payload.code, payload.reset).await;
    state.ipc.emit(
        "execution:finished",
        json!({ "success": outcome.is_success() }),
    );
    Json(outcome).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let mut response = Json(json!({ "error": { "message": message } })).into_response();
    *response.status_mut() = status;
    response
}

/// Root of the UI shell. The real front-end renders out of process; this
/// component anchors the capability wiring and announces readiness.
struct HostRoot {
    capabilities: Capabilities,
}

impl HostRoot {
    fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }
}

impl RootComponent for HostRoot {
    fn name(&self) -> &str {
        "runpad-root"
    }

    fn on_mount(&mut self, target: &MountPoint) -> Result<(), String> {
        self.capabilities.ipc.emit(
            "app:mounted",
            json!({
                "container": target.container(),
                "instance": target.instance().to_string(),
            }),
        );
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = HostConfig::from_env()?;

    let launcher = build_launcher(config.to_launch_config());
    let dispatcher = spawn_dispatcher(
        DispatchConfig {
            ingress_capacity: config.ingress_capacity,
            pool_size: config.pool_size,
        },
        launcher,
    )
    .map_err(|err| format!("failed to initialize dispatcher: {err}"))?;
    let bridge = DispatchBridge::new(dispatcher);
    let ipc = EventIpc::new(64);
    let capabilities = Capabilities {
        ipc: Arc::new(ipc.clone()),
        api: Arc::new(bridge.clone()),
    };

    let mut shell = AppShell::with_app_container();
    let app = shell
        .mount(APP_CONTAINER_ID, Box::new(HostRoot::new(capabilities)))
        .map_err(|err| format!("startup failed: {err}"))?;
    println!(
        "mounted root '{}' into '{}' as instance {}",
        app.component().name(),
        app.container(),
        app.instance()
    );

    let state = AppState {
        bridge,
        ipc: ipc.clone(),
    };
    let addr = format!("{}:{}", config.host, config.port);
    let request_timeout = Duration::from_secs(config.request_timeout_secs);
    let max_inflight = config.max_inflight;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()?;
    rt.block_on(async move {
        let mut events = ipc.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                println!("event: {} {}", event.channel, event.payload);
            }
        });

        let router = Router::new()
            .route("/healthz", get(healthcheck))
            .route(
                "/api/execute",
                post(execute_handler).layer(
                    ServiceBuilder::new()
                        .layer(DefaultBodyLimit::max(MAX_BODY_LIMIT_BYTES))
                        .layer(TimeoutLayer::with_status_code(
                            StatusCode::REQUEST_TIMEOUT,
                            request_timeout,
                        )),
                ),
            )
            .layer(CompressionLayer::new())
            .layer(ConcurrencyLimitLayer::new(max_inflight))
            .layer(middleware::from_fn(log_request_response))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        println!("listening on {addr}");
        axum::serve(listener, router).await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}
