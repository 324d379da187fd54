//! Command-line OCR automation for iOS devices via WebDriverAgent.
//!
//! Every command talks to WDA directly; there is no daemon. WDA must already
//! be running on the device, either reachable at `--wda-url` (forwarded with
//! `iproxy` or `ocrtap forward`) or forwarded on the fly with `--udid`.
//!
//! # Usage
//!
//! ```bash
//! # Is WDA up?
//! ocrtap status
//!
//! # Tap the word "General", waiting up to 5 s for it
//! ocrtap tap-text General -t 5000
//!
//! # Scroll down until "Reset" is visible, then tap it
//! ocrtap scroll-to Reset && ocrtap tap-text Reset
//!
//! # Everything OCR sees, as JSON with boxes
//! ocrtap -f json read
//!
//! # Screenshot with OCR boxes drawn on
//! ocrtap screenshot -o screen.png --boxes
//!
//! # Run a JSON script, logging each step
//! ocrtap run smoke.json --log smoke.jsonl
//!
//! # Forward a USB device's WDA port to localhost:8100
//! ocrtap forward
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use ocrtap_core::action::{parse_script, ActionType};
use ocrtap_core::automator::{AutomationError, Automator};
use ocrtap_core::config::{config_path, logs_dir, OcrtapConfig, DEFAULT_WDA_PORT};
use ocrtap_core::driver::{AutomationDriver, Direction, DriverConfig, DriverError};
use ocrtap_core::executor::{ActionExecutor, ExecutionResult};
use ocrtap_core::ocr::tesseract::TesseractEngine;
use ocrtap_core::ocr::{build_engine, MatchMode, OcrEngineKind, OcrError};
use ocrtap_core::protocol::ButtonName;
use ocrtap_core::screen::ScreenReader;
use ocrtap_core::usb_tunnel;
use ocrtap_core::wda_driver::WdaDriver;

/// OCR-driven automation for iOS devices via WebDriverAgent.
#[derive(Parser)]
#[command(name = "ocrtap")]
#[command(about = "Find text on an iOS screen with OCR and tap it through WebDriverAgent")]
#[command(version)]
struct Cli {
    /// WebDriverAgent base URL (overrides the config file)
    #[arg(long, global = true, env = "OCRTAP_WDA_URL")]
    wda_url: Option<String>,

    /// Forward WDA from this USB device instead of using a URL
    #[arg(long, global = true, env = "OCRTAP_UDID", conflicts_with = "wda_url")]
    udid: Option<String>,

    /// OCR engine: tesseract or paddle
    #[arg(long, global = true, env = "OCRTAP_OCR_ENGINE")]
    ocr: Option<OcrEngineKind>,

    /// Config file (default: ~/.ocrtap/config.json)
    #[arg(long, global = true, env = "OCRTAP_CONFIG")]
    config: Option<PathBuf>,

    /// Output format: text or json
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// More log output (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Write logs to DIR/ocrtap.log instead of stderr (default DIR: ~/.ocrtap/logs)
    #[arg(long, global = true, value_name = "DIR", num_args = 0..=1)]
    log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Check that WebDriverAgent is reachable and ready
    Status,

    /// List devices attached through usbmuxd
    Devices,

    /// Forward a USB device's WDA port to localhost until interrupted
    Forward {
        /// Local port to listen on
        #[arg(long, default_value_t = DEFAULT_WDA_PORT)]
        local_port: u16,
        /// WDA port on the device
        #[arg(long, default_value_t = DEFAULT_WDA_PORT)]
        device_port: u16,
    },

    /// Check the OCR engine, usbmuxd and WebDriverAgent
    Doctor,

    /// Print the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        init: bool,
    },

    /// Capture a screenshot
    Screenshot {
        /// Output file
        #[arg(short, long, default_value = "screenshot.png")]
        output: PathBuf,
        /// Draw OCR bounding boxes on the image
        #[arg(long)]
        boxes: bool,
    },

    /// Print all text OCR finds on screen
    Read,

    /// Print where text is on screen, in points
    Find {
        text: String,
        /// Match the whole text instead of a substring
        #[arg(long)]
        exact: bool,
    },

    /// Tap at screen coordinates (points)
    Tap { x: i32, y: i32 },

    /// Wait for text to appear, then tap it
    TapText {
        text: String,
        /// Match the whole text instead of a substring
        #[arg(long)]
        exact: bool,
        /// Timeout in milliseconds
        #[arg(short, long, env = "OCRTAP_TIMEOUT")]
        timeout: Option<u64>,
    },

    /// Tap an element by accessibility label, without OCR
    TapLabel { label: String },

    /// Swipe through the screen center
    Swipe {
        /// Direction: up, down, left, right
        direction: Direction,
        /// Distance in points
        #[arg(long)]
        distance: Option<i32>,
    },

    /// Type into the focused field
    Type {
        text: String,
        /// Select all and delete before typing
        #[arg(long)]
        clear: bool,
    },

    /// Press a hardware button: home, volumeUp, volumeDown
    Press { button: ButtonName },

    /// Go to the home screen
    Home,

    /// Launch an app by bundle id
    Launch { bundle_id: String },

    /// Terminate an app by bundle id
    Terminate { bundle_id: String },

    /// Print the bundle id of the foreground app
    ActiveApp,

    /// Wait until text appears on screen
    WaitFor {
        text: String,
        /// Match the whole text instead of a substring
        #[arg(long)]
        exact: bool,
        /// Timeout in milliseconds
        #[arg(short, long, env = "OCRTAP_TIMEOUT")]
        timeout: Option<u64>,
    },

    /// Swipe until text is visible
    ScrollTo {
        text: String,
        /// Swipe direction
        #[arg(short, long, default_value = "up")]
        direction: Direction,
        /// Give up after this many swipes
        #[arg(short, long, default_value_t = 5)]
        max_scrolls: u32,
    },

    /// Dump the accessibility tree as XML
    Source,

    /// Run a JSON action script
    Run {
        /// Script file
        script: PathBuf,
        /// Append one JSON line per step to this file
        #[arg(long)]
        log: Option<PathBuf>,
        /// Continue after a failed step
        #[arg(long)]
        keep_going: bool,
    },
}

impl Command {
    /// The single script action this command maps onto, if any.
    fn to_action(&self) -> Option<ActionType> {
        let action = match self {
            Command::Screenshot { output, boxes } => ActionType::Screenshot {
                path: Some(output.clone()),
                boxes: *boxes,
            },
            Command::Tap { x, y } => ActionType::Tap { x: *x, y: *y },
            Command::TapText {
                text,
                exact,
                timeout,
            } => ActionType::TapText {
                text: text.clone(),
                exact: *exact,
                timeout_ms: *timeout,
            },
            Command::TapLabel { label } => ActionType::TapLabel {
                label: label.clone(),
            },
            Command::Swipe {
                direction,
                distance,
            } => ActionType::Swipe {
                direction: *direction,
                distance: *distance,
            },
            Command::Type { text, clear } => ActionType::TypeText {
                text: text.clone(),
                clear_first: *clear,
            },
            Command::Press { button } => ActionType::PressButton { button: *button },
            Command::Launch { bundle_id } => ActionType::LaunchApp {
                bundle_id: bundle_id.clone(),
            },
            Command::Terminate { bundle_id } => ActionType::CloseApp {
                bundle_id: bundle_id.clone(),
            },
            Command::WaitFor {
                text,
                exact,
                timeout,
            } => ActionType::WaitForText {
                text: text.clone(),
                exact: *exact,
                timeout_ms: *timeout,
            },
            Command::ScrollTo {
                text,
                direction,
                max_scrolls,
            } => ActionType::ScrollToText {
                text: text.clone(),
                direction: *direction,
                max_scrolls: *max_scrolls,
            },
            _ => return None,
        };
        Some(action)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum CliError {
    Connection(String),
    ActionFailed(String),
    Protocol(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Connection(_) => ExitCode::from(2),
            CliError::ActionFailed(_) => ExitCode::from(1),
            CliError::Protocol(_) => ExitCode::from(3),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Connection(msg) => write!(f, "Connection error: {}", msg),
            CliError::ActionFailed(msg) => write!(f, "Action failed: {}", msg),
            CliError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
        }
    }
}

impl From<DriverError> for CliError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::ConnectionLost(_)
            | DriverError::Timeout
            | DriverError::NotConnected
            | DriverError::UsbTunnel(_) => CliError::Connection(err.to_string()),
            DriverError::Protocol(_) => CliError::Protocol(err.to_string()),
            _ => CliError::ActionFailed(err.to_string()),
        }
    }
}

impl From<AutomationError> for CliError {
    fn from(err: AutomationError) -> Self {
        match err {
            AutomationError::Driver(e) => e.into(),
            other => CliError::ActionFailed(other.to_string()),
        }
    }
}

impl From<OcrError> for CliError {
    fn from(err: OcrError) -> Self {
        CliError::ActionFailed(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn init_tracing(cli: &Cli) -> Option<WorkerGuard> {
    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Some(dir) = &cli.log_file {
        let log_dir = dir.clone().unwrap_or_else(logs_dir);
        std::fs::create_dir_all(&log_dir).ok();
        let file_appender = tracing_appender::rolling::never(&log_dir, "ocrtap.log");
        let (writer, guard) = tracing_appender::non_blocking(file_appender);
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false);
        if cli.log_json {
            builder.json().init();
        } else {
            builder.init();
        }
        return Some(guard);
    }

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
    None
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_tracing(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn load_config(cli: &Cli) -> OcrtapConfig {
    let mut config = match &cli.config {
        Some(path) => OcrtapConfig::load_from(path),
        None => OcrtapConfig::load(),
    };
    if let Some(engine) = cli.ocr {
        config.ocr.engine = engine;
    }
    config
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(&cli);
    debug!(wda_url = %config.wda_url, engine = %config.ocr.engine, "configuration loaded");

    // Commands that do not drive the device
    match &cli.command {
        Command::Status => return status(&cli, &config).await,
        Command::Devices => return devices(&cli).await,
        Command::Forward {
            local_port,
            device_port,
        } => return forward(&cli, *local_port, *device_port).await,
        Command::Doctor => return doctor(&cli, &config).await,
        Command::Config { init } => return show_config(&cli, &config, *init),
        Command::Run { .. } => return run_script(&cli, &config).await,
        _ => {}
    }

    let auto = build_automator(&cli, &config).await?;
    auto.connect().await?;

    match &cli.command {
        Command::Read => read_text(&cli, &auto).await,
        Command::Find { text, exact } => find_text(&cli, &auto, text, *exact).await,
        Command::Home => {
            auto.press_home().await?;
            report(&cli, "home", ExecutionResult::success("Pressed home"), false)
        }
        Command::ActiveApp => {
            let bundle_id = auto.current_app().await?;
            let result = ExecutionResult::success(bundle_id.clone())
                .with_data(json!({ "bundle_id": bundle_id }));
            if cli.format == OutputFormat::Text {
                println!("{}", bundle_id);
                return Ok(());
            }
            report(&cli, "active_app", result, false)
        }
        Command::Source => {
            let xml = auto.driver().page_source().await?;
            if cli.format == OutputFormat::Json {
                print_json(&json!({ "source": xml }))
            } else {
                println!("{}", xml);
                Ok(())
            }
        }
        command => {
            let Some(action) = command.to_action() else {
                return Err(CliError::Protocol("command has no device action".to_string()));
            };
            let name = action.name();
            let print_data = matches!(action, ActionType::ReadText);
            let executor = ActionExecutor::new(Arc::new(auto));
            let result = executor.execute(action).await;
            report(&cli, name, result, print_data)
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Picks the first attached device when no UDID is given.
async fn first_device() -> Result<String, CliError> {
    let devices = usb_tunnel::list_devices()
        .await
        .map_err(|e| CliError::Connection(e.to_string()))?;
    devices
        .into_iter()
        .next()
        .map(|d| d.udid)
        .ok_or_else(|| CliError::Connection("no devices attached".to_string()))
}

async fn driver_config(cli: &Cli, config: &OcrtapConfig) -> Result<DriverConfig, CliError> {
    let ports = config.device.clone().unwrap_or_default();
    if let Some(udid) = &cli.udid {
        return Ok(DriverConfig::Device {
            udid: udid.clone(),
            local_port: ports.local_port,
            device_port: ports.device_port,
        });
    }
    if let Some(url) = &cli.wda_url {
        return Ok(DriverConfig::Wda { url: url.clone() });
    }
    match config.driver_config() {
        Some(driver_config) => Ok(driver_config),
        None => Ok(DriverConfig::Device {
            udid: first_device().await?,
            local_port: ports.local_port,
            device_port: ports.device_port,
        }),
    }
}

async fn build_driver(cli: &Cli, config: &OcrtapConfig) -> Result<WdaDriver, CliError> {
    let driver_config = driver_config(cli, config).await?;
    info!(?driver_config, "building driver");
    let driver = WdaDriver::from_config(&driver_config, config.request_timeout()).await?;
    Ok(match &config.bundle_id {
        Some(bundle_id) => driver.with_bundle_id(bundle_id),
        None => driver,
    })
}

async fn build_automator(cli: &Cli, config: &OcrtapConfig) -> Result<Automator, CliError> {
    let driver = Arc::new(build_driver(cli, config).await?);
    let engine = build_engine(&config.ocr)?;
    let screen = ScreenReader::new(driver, engine).with_scale(config.coordinate_scale);
    Ok(Automator::with_screen(screen, config.automation.clone()))
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_json(value: &Value) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::Protocol(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

/// Prints a result and turns failure into [`CliError::ActionFailed`].
fn report(cli: &Cli, label: &str, result: ExecutionResult, print_data: bool) -> Result<(), CliError> {
    if cli.format == OutputFormat::Json {
        let value = serde_json::to_value(&result).map_err(|e| CliError::Protocol(e.to_string()))?;
        print_json(&value)?;
    } else if result.success {
        if print_data {
            match &result.data {
                Some(Value::Array(items)) => {
                    for item in items {
                        match item.as_str() {
                            Some(s) => println!("{}", s),
                            None => println!("{}", item),
                        }
                    }
                }
                Some(other) => println!("{}", other),
                None => {}
            }
        }
        if !cli.quiet {
            let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3fZ");
            eprintln!("|{}|{}|{}|", now, label, result.message);
        }
    }

    if result.success {
        Ok(())
    } else {
        Err(CliError::ActionFailed(result.message))
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn status(cli: &Cli, config: &OcrtapConfig) -> Result<(), CliError> {
    let driver = build_driver(cli, config).await?;
    let status = driver.status().await?;

    if cli.format == OutputFormat::Json {
        let value = serde_json::to_value(&status).map_err(|e| CliError::Protocol(e.to_string()))?;
        print_json(&value)?;
    } else {
        println!("WDA:     {}", driver.client().base_url());
        println!("Ready:   {}", status.ready);
        if let Some(version) = &status.ios_version {
            println!("iOS:     {}", version);
        }
        if let Some(ip) = &status.ip {
            println!("IP:      {}", ip);
        }
        if let Some(message) = &status.message {
            println!("Message: {}", message);
        }
    }

    if status.ready {
        Ok(())
    } else {
        Err(CliError::Connection("WebDriverAgent is not ready".to_string()))
    }
}

async fn devices(cli: &Cli) -> Result<(), CliError> {
    let devices = usb_tunnel::list_devices()
        .await
        .map_err(|e| CliError::Connection(e.to_string()))?;

    if cli.format == OutputFormat::Json {
        let value = serde_json::to_value(&devices).map_err(|e| CliError::Protocol(e.to_string()))?;
        return print_json(&value);
    }
    if devices.is_empty() {
        eprintln!("No devices attached");
    }
    for device in &devices {
        println!("{} -- {}", device.udid, device.connection);
    }
    Ok(())
}

async fn forward(cli: &Cli, local_port: u16, device_port: u16) -> Result<(), CliError> {
    let udid = match &cli.udid {
        Some(udid) => udid.clone(),
        None => first_device().await?,
    };
    let local = SocketAddr::from(([127, 0, 0, 1], local_port));
    let forward = usb_tunnel::forward(&udid, local, device_port)
        .await
        .map_err(|e| CliError::Connection(e.to_string()))?;

    if !cli.quiet {
        eprintln!(
            "Forwarding {} -> {}:{} (Ctrl-C to stop)",
            forward.url(),
            udid,
            device_port
        );
    }
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CliError::ActionFailed(format!("Failed to wait for Ctrl-C: {}", e)))?;
    forward.stop();
    if !cli.quiet {
        eprintln!("Forward stopped");
    }
    Ok(())
}

fn show_config(cli: &Cli, config: &OcrtapConfig, init: bool) -> Result<(), CliError> {
    let path = cli.config.clone().unwrap_or_else(config_path);
    if init {
        config
            .save_to(&path)
            .map_err(|e| CliError::ActionFailed(format!("Failed to write {}: {}", path.display(), e)))?;
        if !cli.quiet {
            eprintln!("Wrote {}", path.display());
        }
    }
    let value = serde_json::to_value(config).map_err(|e| CliError::Protocol(e.to_string()))?;
    if cli.format == OutputFormat::Text && !cli.quiet {
        eprintln!("# {}", path.display());
    }
    print_json(&value)
}

async fn doctor(cli: &Cli, config: &OcrtapConfig) -> Result<(), CliError> {
    let mut checks: Vec<(&str, Result<String, String>)> = Vec::new();

    let ocr = match config.ocr.engine {
        OcrEngineKind::Tesseract => TesseractEngine::from_settings(&config.ocr)
            .version()
            .map_err(|e| e.to_string()),
        OcrEngineKind::Paddle => build_engine(&config.ocr)
            .map(|engine| format!("{} models loaded", engine.name()))
            .map_err(|e| e.to_string()),
    };
    checks.push(("ocr", ocr));

    let usbmuxd = usb_tunnel::list_devices()
        .await
        .map(|devices| format!("{} device(s) attached", devices.len()))
        .map_err(|e| e.to_string());
    checks.push(("usbmuxd", usbmuxd));

    let wda = match build_driver(cli, config).await {
        Ok(driver) => match driver.status().await {
            Ok(status) if status.ready => Ok(format!(
                "ready at {} (iOS {})",
                driver.client().base_url(),
                status.ios_version.as_deref().unwrap_or("unknown")
            )),
            Ok(status) => Err(format!(
                "not ready: {}",
                status.message.unwrap_or_default()
            )),
            Err(e) => Err(e.to_string()),
        },
        Err(e) => Err(e.to_string()),
    };
    checks.push(("wda", wda));

    let failed = checks.iter().filter(|(_, r)| r.is_err()).count();
    if cli.format == OutputFormat::Json {
        let items: Vec<Value> = checks
            .iter()
            .map(|(name, result)| match result {
                Ok(detail) => json!({ "check": name, "ok": true, "detail": detail }),
                Err(error) => json!({ "check": name, "ok": false, "detail": error }),
            })
            .collect();
        print_json(&Value::Array(items))?;
    } else {
        for (name, result) in &checks {
            match result {
                Ok(detail) => println!("[ok]   {:<8} {}", name, detail),
                Err(error) => println!("[FAIL] {:<8} {}", name, error),
            }
        }
    }

    if failed == 0 {
        Ok(())
    } else {
        Err(CliError::ActionFailed(format!("{} check(s) failed", failed)))
    }
}

async fn read_text(cli: &Cli, auto: &Automator) -> Result<(), CliError> {
    let matches = auto.screen().matches(true).await?;
    if cli.format == OutputFormat::Json {
        let value = serde_json::to_value(&matches).map_err(|e| CliError::Protocol(e.to_string()))?;
        return print_json(&value);
    }
    for m in &matches {
        println!(
            "{}\t@({:.0},{:.0} {:.0}x{:.0})\t{:.2}",
            m.text, m.frame.x, m.frame.y, m.frame.width, m.frame.height, m.confidence
        );
    }
    if !cli.quiet {
        eprintln!("{} text items", matches.len());
    }
    Ok(())
}

async fn find_text(cli: &Cli, auto: &Automator, text: &str, exact: bool) -> Result<(), CliError> {
    let mut query = auto.query(text);
    if exact {
        query.mode = MatchMode::Exact;
    }
    let Some(found) = auto.screen().find_text(&query, true).await? else {
        return Err(AutomationError::TextNotFound(query.to_string()).into());
    };
    let (x, y) = auto.screen().tap_point(&found).await?;

    if cli.format == OutputFormat::Json {
        print_json(&json!({ "text": found.text, "x": x, "y": y, "confidence": found.confidence }))
    } else {
        println!("{} {}", x, y);
        Ok(())
    }
}

async fn run_script(cli: &Cli, config: &OcrtapConfig) -> Result<(), CliError> {
    let Command::Run {
        script,
        log,
        keep_going,
    } = &cli.command
    else {
        return Err(CliError::Protocol("not a run command".to_string()));
    };

    let text = std::fs::read_to_string(script)
        .map_err(|e| CliError::ActionFailed(format!("Failed to read {}: {}", script.display(), e)))?;
    let parsed = parse_script(&text)
        .map_err(|e| CliError::Protocol(format!("Invalid script {}: {}", script.display(), e)))?;
    info!(
        script = %script.display(),
        name = parsed.name.as_deref().unwrap_or(""),
        steps = parsed.actions.len(),
        "running script"
    );

    let auto = build_automator(cli, config).await?;
    auto.connect().await?;
    let executor = ActionExecutor::new(Arc::new(auto));
    let summary = executor
        .run_script(&parsed.actions, !keep_going, log.as_deref())
        .await?;

    if cli.format == OutputFormat::Json {
        let value = serde_json::to_value(&summary).map_err(|e| CliError::Protocol(e.to_string()))?;
        print_json(&value)?;
    } else {
        for (index, (action, result)) in parsed.actions.iter().zip(&summary.results).enumerate() {
            let mark = if result.success { "ok" } else { "FAIL" };
            println!("{:>3} [{}] {}: {}", index + 1, mark, action.name(), result.message);
        }
        println!(
            "{} passed, {} failed, {} skipped in {}ms",
            summary.passed, summary.failed, summary.skipped, summary.duration_ms
        );
    }

    if summary.succeeded() {
        Ok(())
    } else {
        Err(CliError::ActionFailed(format!(
            "{} of {} steps failed",
            summary.failed,
            parsed.actions.len()
        )))
    }
}
