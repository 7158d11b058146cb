use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use chrono_tz::Tz;
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex, time::MissedTickBehavior};
use tracing::{error, info, warn};

use hydro_common::{
    ClockSource, ControllerConfig, ControllerCore, Light, LightState, Percent, PersistError,
    PersistenceLayer, Pump, PumpState, SettingsStore, TimeOfDay,
};

use crate::api::{self, CommandRoute};

type HostCore = ControllerCore<SimulatedPump, SimulatedLight, ZoneClock, FilePersistence>;

#[derive(Clone)]
struct AppState {
    core: Arc<Mutex<HostCore>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct OkBody {
    ok: bool,
}

/// Pump stand-in for development machines; commands are only logged.
#[derive(Debug, Default)]
struct SimulatedPump {
    state: PumpState,
}

impl Pump for SimulatedPump {
    fn turn_on(&mut self) {
        self.state.on = true;
        info!(speed = self.state.speed.value(), "pump output ON");
    }

    fn turn_off(&mut self) {
        self.state.on = false;
        info!("pump output OFF");
    }

    fn set_speed(&mut self, speed: Percent) {
        self.state.speed = speed;
        info!(speed = speed.value(), "pump speed set");
    }

    fn current_state(&self) -> PumpState {
        self.state
    }
}

#[derive(Debug, Default)]
struct SimulatedLight {
    state: LightState,
}

impl Light for SimulatedLight {
    fn turn_on(&mut self) {
        self.state.on = true;
        info!(brightness = self.state.brightness.value(), "light output ON");
    }

    fn turn_off(&mut self) {
        self.state.on = false;
        info!("light output OFF");
    }

    fn set_brightness(&mut self, brightness: Percent) {
        self.state.brightness = brightness;
        info!(brightness = brightness.value(), "light brightness set");
    }

    fn current_state(&self) -> LightState {
        self.state
    }
}

/// The host clock is trusted to be synchronized, so readings are always
/// available.
#[derive(Debug, Clone, Copy)]
struct ZoneClock {
    tz: Tz,
}

impl ZoneClock {
    fn new(timezone: &str) -> Self {
        let tz = timezone.parse::<Tz>().unwrap_or_else(|err| {
            warn!("invalid timezone `{timezone}` ({err}); using UTC");
            Tz::UTC
        });
        Self { tz }
    }
}

impl ClockSource for ZoneClock {
    fn now(&self) -> Option<TimeOfDay> {
        Some(TimeOfDay::from_timelike(&Utc::now().with_timezone(&self.tz)))
    }
}

/// Stores each key as `<key>.bin` inside the data directory.
#[derive(Debug, Clone)]
struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.bin"))
    }
}

impl PersistenceLayer for FilePersistence {
    fn read(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                warn!("failed to read {}: {err}", path.display());
                None
            }
        }
    }

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), PersistError> {
        std::fs::create_dir_all(&self.dir).map_err(|err| PersistError::write(key, err))?;

        // The rename replaces the previous record atomically.
        let path = self.path_for(key);
        let staging = path.with_extension("bin.tmp");
        std::fs::write(&staging, bytes).map_err(|err| PersistError::write(key, err))?;
        std::fs::rename(&staging, &path).map_err(|err| PersistError::write(key, err))
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("HYDRO_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.hydro"));

    let mut config = load_config(&data_dir.join("config.json")).unwrap_or_else(|err| {
        warn!("failed to load controller config: {err:#}");
        ControllerConfig::default()
    });
    apply_env_overrides(&mut config);
    config.sanitize();

    let store = SettingsStore::new(
        FilePersistence::new(data_dir.clone()),
        config.settings_key.clone(),
    );
    let core = ControllerCore::boot(
        SimulatedPump::default(),
        SimulatedLight::default(),
        ZoneClock::new(&config.timezone),
        store,
        config.defaults,
        monotonic_ms(),
    );
    core.log_config();
    info!(
        "settings stored under {} (timezone {})",
        data_dir.display(),
        config.timezone
    );

    let app_state = AppState {
        core: Arc::new(Mutex::new(core)),
    };
    spawn_control_loop(
        app_state.clone(),
        Duration::from_millis(config.tick_interval_ms),
    );

    let app = Router::new()
        .route(api::STATE_PATH, get(handle_get_state))
        .route(CommandRoute::Pump.path(), post(handle_pump))
        .route(CommandRoute::PumpCycle.path(), post(handle_pump_cycle))
        .route(CommandRoute::Light.path(), post(handle_light))
        .route(CommandRoute::LightSchedule.path(), post(handle_light_schedule))
        .fallback(handle_not_found)
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<ControllerConfig> {
    match std::fs::read(path) {
        Ok(raw) => serde_json::from_slice::<ControllerConfig>(&raw)
            .with_context(|| format!("invalid config at {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(ControllerConfig::default()),
        Err(err) => Err(err.into()),
    }
}

fn apply_env_overrides(config: &mut ControllerConfig) {
    if let Ok(timezone) = std::env::var("HYDRO_TIMEZONE") {
        config.timezone = timezone;
    }
    if let Some(port) = std::env::var("HYDRO_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.http_port = port;
    }
}

fn spawn_control_loop(app_state: AppState, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let mut core = app_state.core.lock().await;
            core.tick(monotonic_ms());
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn handle_get_state(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.core.lock().await.snapshot();
    Json(snapshot)
}

async fn handle_pump(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    apply_command(&state, CommandRoute::Pump, &params).await
}

async fn handle_pump_cycle(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    apply_command(&state, CommandRoute::PumpCycle, &params).await
}

async fn handle_light(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    apply_command(&state, CommandRoute::Light, &params).await
}

async fn handle_light_schedule(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    apply_command(&state, CommandRoute::LightSchedule, &params).await
}

async fn handle_not_found() -> impl IntoResponse {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn apply_command(
    state: &AppState,
    route: CommandRoute,
    params: &HashMap<String, String>,
) -> axum::response::Response {
    let mut core = state.core.lock().await;
    let Some(command) = api::build_command(route, params, core.settings()) else {
        return Json(OkBody { ok: true }).into_response();
    };

    match core.handle(command, monotonic_ms()) {
        Ok(()) => Json(OkBody { ok: true }).into_response(),
        Err(err) => {
            warn!("{} update not persisted: {err}", route.path());
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to persist settings",
            )
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Milliseconds since process start, truncated to 32 bits so it wraps like
/// the device counter.
fn monotonic_ms() -> u32 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as u32
}
