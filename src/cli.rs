use std::{
    collections::BTreeMap,
    env,
    fs::OpenOptions,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use crate::loglens_core::SelectionPolicy;
use crate::loglens_stream::{self, ConnectionState, StreamConfig, StreamEvent};
use crate::loglens_tui::{Action, Tui, TuiConfig};
use crate::loglens_upload::{self, first_file, HttpUploader};
use crate::loglens_view::{Viewer, ViewerConfig};
use clap::Parser;
use crossterm::{
    event::{
        self, DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture,
        Event, KeyEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, layout::Rect, Terminal};
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";
const DEFAULT_TUI_ENABLED: bool = true;
const CONFIG_FILE_NAME: &str = "loglens.json";
const TUI_TICK_MS: u64 = 50;

pub type DynError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
enum UiEvent {
    Stream(StreamEvent),
    Notice(String),
    Quit,
}

#[derive(Parser, Debug)]
#[command(name = "loglens", version, about = "Live viewer for structured log records")]
struct Cli {
    /// Server origin, e.g. http://127.0.0.1:8080
    #[arg(long)]
    server: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Delay before reconnecting after the stream drops.
    #[arg(long)]
    retry_ms: Option<u64>,
    #[arg(long)]
    stream_path: Option<String>,
    /// Initial filter text.
    #[arg(long)]
    filter: Option<String>,
    #[arg(long, value_parser = parse_selection_arg)]
    selection: Option<SelectionPolicy>,
    /// Log file to upload at startup. Only the first one is sent.
    #[arg(long, num_args = 1.., value_name = "FILE")]
    upload: Vec<PathBuf>,
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[arg(long, action = clap::ArgAction::SetTrue)]
    tui: bool,
    #[arg(long, action = clap::ArgAction::SetTrue)]
    no_tui: bool,
}

#[derive(Debug, Clone)]
struct Config {
    server: Url,
    retry_delay_ms: u64,
    stream_path: String,
    filter: Option<String>,
    selection_policy: SelectionPolicy,
    log_file: Option<PathBuf>,
    tui_enabled: bool,
    /// Chosen from `--upload` once logging is up.
    upload: Option<PathBuf>,
}

#[derive(Debug, Default, Clone)]
struct PartialConfig {
    server: Option<String>,
    retry_delay_ms: Option<u64>,
    stream_path: Option<String>,
    filter: Option<String>,
    selection_policy: Option<SelectionPolicy>,
    log_file: Option<PathBuf>,
    tui_enabled: Option<bool>,
}

impl PartialConfig {
    fn merge(&mut self, other: PartialConfig) {
        if other.server.is_some() {
            self.server = other.server;
        }
        if other.retry_delay_ms.is_some() {
            self.retry_delay_ms = other.retry_delay_ms;
        }
        if other.stream_path.is_some() {
            self.stream_path = other.stream_path;
        }
        if other.filter.is_some() {
            self.filter = other.filter;
        }
        if other.selection_policy.is_some() {
            self.selection_policy = other.selection_policy;
        }
        if other.log_file.is_some() {
            self.log_file = other.log_file;
        }
        if other.tui_enabled.is_some() {
            self.tui_enabled = other.tui_enabled;
        }
    }
}

impl Config {
    fn from_partial(partial: PartialConfig) -> Result<Self, ConfigError> {
        let server = parse_server(partial.server.as_deref().unwrap_or(DEFAULT_SERVER))?;
        let retry_delay_ms = partial
            .retry_delay_ms
            .unwrap_or(loglens_stream::DEFAULT_RETRY_DELAY.as_millis() as u64);
        if retry_delay_ms == 0 {
            return Err(ConfigError::InvalidValue { name: "retry_ms".into(), value: "0".into() });
        }
        let stream_path = match partial.stream_path {
            Some(path) if path.starts_with('/') => path,
            Some(path) => format!("/{path}"),
            None => loglens_stream::DEFAULT_STREAM_PATH.to_string(),
        };

        Ok(Self {
            server,
            retry_delay_ms,
            stream_path,
            filter: partial.filter,
            selection_policy: partial.selection_policy.unwrap_or_default(),
            log_file: partial.log_file,
            tui_enabled: partial.tui_enabled.unwrap_or(DEFAULT_TUI_ENABLED),
            upload: None,
        })
    }

    fn stream_config(&self) -> Result<StreamConfig, DynError> {
        Ok(StreamConfig {
            url: loglens_stream::stream_url(&self.server, &self.stream_path)?,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            keepalive: Some(loglens_stream::DEFAULT_KEEPALIVE),
        })
    }

    fn viewer_config(&self) -> ViewerConfig {
        ViewerConfig { selection_policy: self.selection_policy }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    server: Option<String>,
    #[serde(alias = "retryMs", alias = "retry-ms")]
    retry_ms: Option<u64>,
    #[serde(alias = "streamPath", alias = "stream-path")]
    stream_path: Option<String>,
    filter: Option<String>,
    selection: Option<SelectionPolicy>,
    #[serde(alias = "logFile", alias = "log-file")]
    log_file: Option<PathBuf>,
    tui: Option<bool>,
    #[serde(alias = "noTui", alias = "no-tui")]
    no_tui: Option<bool>,
}

impl FileConfig {
    fn into_partial(self) -> PartialConfig {
        let tui_enabled = match (self.tui, self.no_tui) {
            (_, Some(no_tui)) => Some(!no_tui),
            (Some(tui), None) => Some(tui),
            (None, None) => None,
        };

        PartialConfig {
            server: self.server,
            retry_delay_ms: self.retry_ms,
            stream_path: self.stream_path,
            filter: self.filter,
            selection_policy: self.selection,
            log_file: self.log_file,
            tui_enabled,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    ParseFile { path: PathBuf, source: serde_json::Error },
    #[error("config file not found: {path}")]
    MissingConfig { path: PathBuf },
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
    #[error("invalid server origin {value}: {message}")]
    InvalidServer { value: String, message: String },
}

fn cli_overrides(cli: &Cli) -> PartialConfig {
    let tui_enabled = if cli.no_tui {
        Some(false)
    } else if cli.tui {
        Some(true)
    } else {
        None
    };
    PartialConfig {
        server: cli.server.clone(),
        retry_delay_ms: cli.retry_ms,
        stream_path: cli.stream_path.clone(),
        filter: cli.filter.clone(),
        selection_policy: cli.selection,
        log_file: cli.log_file.clone(),
        tui_enabled,
    }
}

fn env_overrides(env: &BTreeMap<String, String>) -> Result<PartialConfig, ConfigError> {
    let mut partial = PartialConfig::default();
    if let Some(server) = env.get("LOGLENS_SERVER") {
        if !server.trim().is_empty() {
            partial.server = Some(server.clone());
        }
    }
    if let Some(value) = env.get("LOGLENS_RETRY_MS") {
        partial.retry_delay_ms = Some(parse_u64("LOGLENS_RETRY_MS", value)?);
    }
    if let Some(path) = env.get("LOGLENS_STREAM_PATH") {
        partial.stream_path = Some(path.clone());
    }
    if let Some(value) = env.get("LOGLENS_SELECTION") {
        let policy = SelectionPolicy::parse(value).ok_or_else(|| ConfigError::InvalidEnv {
            name: "LOGLENS_SELECTION".to_string(),
            value: value.clone(),
        })?;
        partial.selection_policy = Some(policy);
    }
    if let Some(path) = env.get("LOGLENS_LOG_FILE") {
        if !path.trim().is_empty() {
            partial.log_file = Some(PathBuf::from(path));
        }
    }
    if let Some(no_tui) = env.get("LOGLENS_NO_TUI") {
        let disabled = parse_bool("LOGLENS_NO_TUI", no_tui)?;
        partial.tui_enabled = Some(!disabled);
    }
    if partial.tui_enabled.is_none() {
        if let Some(tui) = env.get("LOGLENS_TUI") {
            partial.tui_enabled = Some(parse_bool("LOGLENS_TUI", tui)?);
        }
    }
    Ok(partial)
}

fn parse_selection_arg(value: &str) -> Result<SelectionPolicy, String> {
    SelectionPolicy::parse(value).ok_or_else(|| format!("expected identity or position, got {value}"))
}

fn parse_u64(name: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidEnv { name: name.to_string(), value: value.to_string() })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv { name: name.to_string(), value: value.to_string() }),
    }
}

/// Accepts a bare `host:port` as well as a full origin.
fn parse_server(value: &str) -> Result<Url, ConfigError> {
    let trimmed = value.trim();
    let candidate =
        if trimmed.contains("://") { trimmed.to_string() } else { format!("http://{trimmed}") };
    let url = Url::parse(&candidate).map_err(|error| ConfigError::InvalidServer {
        value: value.to_string(),
        message: error.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(url),
        other => Err(ConfigError::InvalidServer {
            value: value.to_string(),
            message: format!("unsupported scheme {other}"),
        }),
    }
}

fn load_config_file(path: &Path) -> Result<PartialConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let parsed: FileConfig = serde_json::from_str(&contents)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })?;
    Ok(parsed.into_partial())
}

fn find_config_path(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            break;
        }
    }
    None
}

fn resolve_config(
    cli: &Cli,
    cwd: &Path,
    env: &BTreeMap<String, String>,
) -> Result<(Config, Option<PathBuf>), ConfigError> {
    let mut partial = PartialConfig::default();

    let config_path = if let Some(path) = &cli.config {
        if !path.is_file() {
            return Err(ConfigError::MissingConfig { path: path.clone() });
        }
        Some(path.clone())
    } else {
        find_config_path(cwd)
    };

    if let Some(path) = config_path.as_ref() {
        partial.merge(load_config_file(path)?);
    }
    partial.merge(env_overrides(env)?);
    partial.merge(cli_overrides(cli));

    Ok((Config::from_partial(partial)?, config_path))
}

/// Logs must never reach the terminal while the TUI owns it.
fn init_tracing(config: &Config) -> Result<(), DynError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (&config.log_file, config.tui_enabled) {
        (Some(path), _) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        (None, true) => builder.with_writer(io::sink).init(),
        (None, false) => builder.with_writer(io::stderr).init(),
    }
    Ok(())
}

async fn run_tui(
    config: Config,
    stream: StreamConfig,
    uploader: HttpUploader,
    mut shutdown: broadcast::Receiver<()>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DynError> {
    let (ui_tx, ui_rx) = std::sync::mpsc::channel::<UiEvent>();
    let stream_tx = ui_tx.clone();
    let notice_tx = ui_tx.clone();
    let quit_tx = ui_tx;

    let stream_handle = loglens_stream::spawn(
        stream,
        move |event| stream_tx.send(UiEvent::Stream(event)).is_ok(),
        shutdown_tx.subscribe(),
    );

    let (upload_tx, upload_rx) = mpsc::unbounded_channel::<PathBuf>();
    let upload_handle = tokio::spawn(loglens_upload::run_upload_worker(
        uploader,
        upload_rx,
        move |notice| notice_tx.send(UiEvent::Notice(notice)).is_ok(),
    ));

    let shutdown_handle = tokio::spawn(async move {
        let _ = shutdown.recv().await;
        let _ = quit_tx.send(UiEvent::Quit);
    });

    let tui_config = TuiConfig {
        viewer: config.viewer_config(),
        server_label: config.server.to_string(),
        initial_filter: config.filter.clone(),
    };
    let initial_upload = config.upload.clone();
    tokio::task::spawn_blocking(move || {
        run_tui_loop(tui_config, initial_upload, ui_rx, upload_tx, shutdown_tx)
    })
    .await??;

    stream_handle.abort();
    upload_handle.abort();
    shutdown_handle.abort();
    let stats = stream_handle.stats();
    info!(
        attempts = stats.attempts,
        drops = stats.drops,
        delivered = stats.delivered,
        malformed = stats.malformed,
        "stream summary"
    );
    Ok(())
}

fn run_tui_loop(
    config: TuiConfig,
    initial_upload: Option<PathBuf>,
    ui_rx: std::sync::mpsc::Receiver<UiEvent>,
    upload_tx: mpsc::UnboundedSender<PathBuf>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DynError> {
    let _guard = TerminalGuard::enter()?;
    let stdout = io::stdout();
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    terminal.hide_cursor()?;

    let mut tui = Tui::new(config);
    if let Some(path) = initial_upload {
        request_upload(&mut tui, &upload_tx, path);
    }

    'outer: loop {
        while let Ok(event) = ui_rx.try_recv() {
            match event {
                UiEvent::Stream(StreamEvent::Record(record)) => tui.viewer.append(record),
                UiEvent::Stream(StreamEvent::State(state)) => tui.set_connection(state),
                UiEvent::Notice(notice) => tui.viewer.set_notice(notice),
                UiEvent::Quit => break 'outer,
            }
        }

        terminal.draw(|frame| {
            tui.render(frame);
        })?;

        if event::poll(Duration::from_millis(TUI_TICK_MS))? {
            let action = match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => tui.handle_key(key),
                Event::Mouse(mouse) => {
                    let size = terminal.size()?;
                    let rect = Rect { x: 0, y: 0, width: size.width, height: size.height };
                    tui.handle_mouse(mouse, rect)
                }
                Event::Paste(text) => tui.handle_paste(&text),
                _ => Action::None,
            };
            match action {
                Action::None => {}
                Action::Quit => {
                    let _ = shutdown_tx.send(());
                    break;
                }
                Action::Upload(path) => request_upload(&mut tui, &upload_tx, path),
            }
        }
    }

    terminal.show_cursor()?;
    Ok(())
}

fn request_upload(tui: &mut Tui, upload_tx: &mpsc::UnboundedSender<PathBuf>, path: PathBuf) {
    info!(path = %path.display(), "upload requested");
    tui.begin_upload();
    if upload_tx.send(path).is_err() {
        warn!("upload worker stopped");
        tui.set_status("upload worker stopped");
    }
}

struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self, DynError> {
        enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen, EnableMouseCapture, EnableBracketedPaste)?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), DisableBracketedPaste, DisableMouseCapture, LeaveAlternateScreen);
    }
}

async fn run_headless(
    config: Config,
    stream: StreamConfig,
    uploader: HttpUploader,
    shutdown: broadcast::Receiver<()>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DynError> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<UiEvent>();
    let stream_tx = event_tx.clone();
    let notice_tx = event_tx;

    let stream_handle = loglens_stream::spawn(
        stream,
        move |event| stream_tx.send(UiEvent::Stream(event)).is_ok(),
        shutdown_tx.subscribe(),
    );

    let (upload_tx, upload_rx) = mpsc::unbounded_channel::<PathBuf>();
    let upload_handle = tokio::spawn(loglens_upload::run_upload_worker(
        uploader,
        upload_rx,
        move |notice| notice_tx.send(UiEvent::Notice(notice)).is_ok(),
    ));

    let mut viewer = Viewer::new(config.viewer_config());
    if let Some(filter) = &config.filter {
        viewer.set_filter(filter.clone());
    }

    let mut stdout = io::stdout();
    if let Some(path) = config.upload.clone() {
        info!(path = %path.display(), "upload requested");
        loglens_upload::begin_upload(&mut viewer);
        writeln!(stdout, "{}", viewer.detail_text())?;
        upload_tx.send(path)?;
    }

    let result = headless_loop(&mut viewer, event_rx, &mut stdout, shutdown).await;

    let _ = shutdown_tx.send(());
    upload_handle.abort();
    stream_handle.abort();
    let stats = stream_handle.stats();
    info!(
        records = viewer.records().len(),
        matching = viewer.view().len(),
        attempts = stats.attempts,
        drops = stats.drops,
        malformed = stats.malformed,
        "stream summary"
    );
    result
}

/// Prints each newly matching record as `[LEVEL] message`, and upload notices verbatim.
async fn headless_loop<W: Write + Send>(
    viewer: &mut Viewer,
    mut events: mpsc::UnboundedReceiver<UiEvent>,
    out: &mut W,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), DynError> {
    loop {
        let event = tokio::select! {
            _ = shutdown.recv() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            break;
        };

        match event {
            UiEvent::Stream(StreamEvent::Record(record)) => {
                let before = viewer.view().len();
                viewer.append(record);
                if viewer.view().len() > before {
                    if let Some(item) = viewer.projection().items.last() {
                        writeln!(out, "{}", item.label())?;
                    }
                }
            }
            UiEvent::Stream(StreamEvent::State(state)) => match state {
                ConnectionState::Backoff => warn!(state = state.as_str(), "stream disconnected"),
                _ => debug!(state = state.as_str(), "stream state"),
            },
            UiEvent::Notice(notice) => {
                viewer.set_notice(notice);
                writeln!(out, "{}", viewer.detail_text())?;
            }
            UiEvent::Quit => break,
        }
        out.flush()?;
    }
    Ok(())
}

pub async fn run() -> Result<(), DynError> {
    let cli = Cli::parse();
    let cwd = env::current_dir()?;
    let env_map: BTreeMap<String, String> = env::vars().collect();
    let (mut config, config_path) = resolve_config(&cli, &cwd, &env_map)?;
    init_tracing(&config)?;

    if let Some(path) = &config_path {
        info!(path = %path.display(), "loaded config file");
    } else {
        debug!("no {CONFIG_FILE_NAME} found, using defaults and env/cli overrides");
    }
    config.upload = first_file(&cli.upload).map(Path::to_path_buf);

    info!(
        server = %config.server,
        retry_ms = config.retry_delay_ms,
        stream_path = %config.stream_path,
        selection = config.selection_policy.as_str(),
        tui_enabled = config.tui_enabled,
        filter = ?config.filter,
        upload = ?config.upload,
        "resolved config"
    );

    let stream = config.stream_config()?;
    let uploader = HttpUploader::new(&config.server);
    let (shutdown_tx, _) = broadcast::channel(4);
    let mut shutdown_rx = shutdown_tx.subscribe();

    let mut handle = if config.tui_enabled {
        tokio::spawn(run_tui(config, stream, uploader, shutdown_tx.subscribe(), shutdown_tx.clone()))
    } else {
        tokio::spawn(run_headless(
            config,
            stream,
            uploader,
            shutdown_tx.subscribe(),
            shutdown_tx.clone(),
        ))
    };

    let mut result: Option<Result<(), DynError>> = None;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            let _ = shutdown_tx.send(());
        }
        _ = shutdown_rx.recv() => {}
        res = &mut handle => {
            result = Some(res?);
            let _ = shutdown_tx.send(());
        }
    }

    // Idempotent; every task sees it.
    let _ = shutdown_tx.send(());

    match result {
        Some(result) => result,
        None => handle.await?,
    }
}
