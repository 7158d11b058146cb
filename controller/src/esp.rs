use std::{
    sync::{Arc, Mutex, MutexGuard, OnceLock},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{Datelike, Utc};
use chrono_tz::Tz;
use embedded_svc::{
    http::Method,
    io::Write,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{
        ledc::{config::TimerConfig, LedcDriver, LedcTimerDriver},
        modem::Modem,
        prelude::*,
    },
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    sntp::EspSntp,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use serde::Serialize;

use hydro_common::{
    ClockSource, ControllerConfig, ControllerCore, Light, LightState, Percent, PersistError,
    PersistenceLayer, Pump, PumpState, SettingsStore, TimeOfDay,
};

use crate::api::{self, CommandRoute};

const NVS_NAMESPACE: &str = "hydro";
const NVS_BLOB_CAPACITY: usize = 64;
const PWM_FREQUENCY_KHZ: u32 = 25;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
/// SNTP has not synchronized while the RTC still reports a year before this.
const MIN_SYNCED_YEAR: i32 = 2024;

type DeviceCore = ControllerCore<PwmPump, PwmLight, SntpClock, NvsPersistence>;
type SharedCore = Arc<Mutex<DeviceCore>>;

#[derive(Serialize)]
struct OkBody {
    ok: bool,
}

struct PwmPump {
    driver: LedcDriver<'static>,
    state: PumpState,
}

impl PwmPump {
    fn new(driver: LedcDriver<'static>) -> Self {
        let mut pump = Self {
            driver,
            state: PumpState::default(),
        };
        pump.apply();
        pump
    }

    fn apply(&mut self) {
        let level = if self.state.on { self.state.speed } else { Percent::ZERO };
        if let Err(err) = set_level(&mut self.driver, level) {
            warn!("failed to drive pump PWM: {err}");
        }
    }
}

impl Pump for PwmPump {
    fn turn_on(&mut self) {
        self.state.on = true;
        self.apply();
    }

    fn turn_off(&mut self) {
        self.state.on = false;
        self.apply();
    }

    fn set_speed(&mut self, speed: Percent) {
        self.state.speed = speed;
        self.apply();
    }

    fn current_state(&self) -> PumpState {
        self.state
    }
}

struct PwmLight {
    driver: LedcDriver<'static>,
    state: LightState,
}

impl PwmLight {
    fn new(driver: LedcDriver<'static>) -> Self {
        let mut light = Self {
            driver,
            state: LightState::default(),
        };
        light.apply();
        light
    }

    fn apply(&mut self) {
        let level = if self.state.on {
            self.state.brightness
        } else {
            Percent::ZERO
        };
        if let Err(err) = set_level(&mut self.driver, level) {
            warn!("failed to drive light PWM: {err}");
        }
    }
}

impl Light for PwmLight {
    fn turn_on(&mut self) {
        self.state.on = true;
        self.apply();
    }

    fn turn_off(&mut self) {
        self.state.on = false;
        self.apply();
    }

    fn set_brightness(&mut self, brightness: Percent) {
        self.state.brightness = brightness;
        self.apply();
    }

    fn current_state(&self) -> LightState {
        self.state
    }
}

fn set_level(
    driver: &mut LedcDriver<'static>,
    level: Percent,
) -> Result<(), esp_idf_svc::sys::EspError> {
    let duty = driver.get_max_duty() * u32::from(level.value()) / 100;
    driver.set_duty(duty)
}

/// Wall clock backed by SNTP. Reports nothing until the first sync.
struct SntpClock {
    tz: Tz,
}

impl SntpClock {
    fn new(timezone: &str) -> Self {
        let tz = timezone.parse::<Tz>().unwrap_or_else(|err| {
            warn!("invalid timezone `{timezone}` ({err}); using UTC");
            Tz::UTC
        });
        Self { tz }
    }
}

impl ClockSource for SntpClock {
    fn now(&self) -> Option<TimeOfDay> {
        let local = Utc::now().with_timezone(&self.tz);
        (local.year() >= MIN_SYNCED_YEAR).then(|| TimeOfDay::from_timelike(&local))
    }
}

struct NvsPersistence {
    nvs: EspNvs<NvsDefault>,
}

impl NvsPersistence {
    fn new(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)
            .with_context(|| format!("failed to open NVS namespace `{NVS_NAMESPACE}`"))?;
        Ok(Self { nvs })
    }
}

impl PersistenceLayer for NvsPersistence {
    fn read(&self, key: &str) -> Option<Vec<u8>> {
        let mut buffer = [0_u8; NVS_BLOB_CAPACITY];
        match self.nvs.get_raw(key, &mut buffer) {
            Ok(Some(bytes)) => Some(bytes.to_vec()),
            Ok(None) => None,
            Err(err) => {
                warn!("failed to read `{key}` from NVS: {err}");
                None
            }
        }
    }

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), PersistError> {
        self.nvs
            .set_raw(key, bytes)
            .map(|_| ())
            .map_err(|err| PersistError::write(key, err))
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let mut config = ControllerConfig::default();
    if let Some(timezone) = option_env!("HYDRO_TIMEZONE") {
        config.timezone = timezone.to_string();
    }
    if let Some(port) = option_env!("HYDRO_HTTP_PORT").and_then(|value| value.parse::<u16>().ok()) {
        config.http_port = port;
    }
    config.sanitize();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let peripherals = Peripherals::take()?;

    let timer = LedcTimerDriver::new(
        peripherals.ledc.timer0,
        &TimerConfig::default().frequency(PWM_FREQUENCY_KHZ.kHz().into()),
    )
    .context("failed to configure LEDC timer")?;
    let timer: &'static _ = Box::leak(Box::new(timer));

    let pump = PwmPump::new(
        LedcDriver::new(peripherals.ledc.channel0, timer, peripherals.pins.gpio25)
            .context("failed to configure pump PWM channel")?,
    );
    let light = PwmLight::new(
        LedcDriver::new(peripherals.ledc.channel1, timer, peripherals.pins.gpio26)
            .context("failed to configure light PWM channel")?,
    );

    let wifi = connect_wifi(peripherals.modem, sys_loop, nvs_partition.clone())
        .context("wifi startup failed")?;

    let _sntp = EspSntp::new_default().context("failed to start SNTP")?;
    info!("SNTP initialized");

    let store = SettingsStore::new(
        NvsPersistence::new(nvs_partition)?,
        config.settings_key.clone(),
    );
    let core = ControllerCore::boot(
        pump,
        light,
        SntpClock::new(&config.timezone),
        store,
        config.defaults,
        monotonic_ms(),
    );
    core.log_config();

    let core: SharedCore = Arc::new(Mutex::new(core));
    spawn_control_loop(core.clone(), config.tick_interval_ms)?;
    let server = create_http_server(core, config.http_port)?;

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _server = server;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn create_http_server(core: SharedCore, port: u16) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        http_port: port,
        stack_size: 10 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;
    info!("HTTP server listening on port {port}");

    {
        let core = core.clone();
        server.fn_handler(api::STATE_PATH, Method::Get, move |req| {
            let snapshot = lock_core(&core)?.snapshot();
            write_json(req, &snapshot)
        })?;
    }

    for route in CommandRoute::ALL {
        let core = core.clone();
        server.fn_handler(route.path(), Method::Post, move |req| {
            let params = api::parse_query(req.uri());
            let result = {
                let mut core = lock_core(&core)?;
                match api::build_command(route, &params, core.settings()) {
                    Some(command) => core.handle(command, monotonic_ms()),
                    None => Ok(()),
                }
            };

            match result {
                Ok(()) => write_json(req, &OkBody { ok: true }),
                Err(err) => {
                    warn!("{} update not persisted: {err}", route.path());
                    write_error(req, 500, "Failed to persist settings")
                }
            }
        })?;
    }

    Ok(server)
}

fn lock_core(core: &SharedCore) -> anyhow::Result<MutexGuard<'_, DeviceCore>> {
    core.lock().map_err(|_| anyhow!("controller state lock poisoned"))
}

fn write_json<T: Serialize>(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(&serde_json::json!({ "error": message }))?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

/// Scheduling keeps running offline, so a failed connection is logged and
/// the driver is returned anyway.
fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
) -> anyhow::Result<EspWifi<'static>> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let ssid = option_env!("WIFI_SSID").unwrap_or_default();
    let pass = option_env!("WIFI_PASS").unwrap_or_default();
    if ssid.is_empty() {
        warn!("WIFI_SSID not set at build time; running without network");
        return Ok(esp_wifi);
    }

    let auth_method = if pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: ssid
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: pass
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{ssid}`");

    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        info!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}");
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected and netif up on attempt {attempt}");
                return Ok(esp_wifi);
            }
            Err(err) => warn!("wifi connect failed on attempt {attempt}: {err:#}"),
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    warn!("all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed; HTTP unavailable");
    Ok(esp_wifi)
}

fn spawn_control_loop(core: SharedCore, tick_interval_ms: u64) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("control-loop".into())
        .stack_size(8 * 1024)
        .spawn(move || loop {
            match core.lock() {
                Ok(mut core) => {
                    core.tick(monotonic_ms());
                }
                Err(_) => warn!("controller state lock poisoned; skipping tick"),
            }
            thread::sleep(Duration::from_millis(tick_interval_ms));
        })
        .context("failed to spawn control loop thread")?;
    Ok(())
}

/// Milliseconds since boot, truncated to 32 bits.
fn monotonic_ms() -> u32 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as u32
}
