//! ikusei-cli: terminal client for the Ikusei training API
//!
//! Reads the same JSON envelope the web dashboard consumes and renders it as
//! plain text. `replay` plays a recorded session back in real time.
//!
//! # Subcommands
//! - `status`                              server health
//! - `summary <worker_id>`                 integrated dashboard of one worker
//! - `admin`                               admin summary with alerts
//! - `replay <session_id> [--speed 1.5]`   timeline playback

use std::future::Future;
use std::io::Write;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ikusei_core::models::{KpiSnapshot, OperationLog, TrainingSession};
use ikusei_core::replay::{format_clock, PlaybackFrame, DEFAULT_TICK_MS};
use ikusei_core::{PlaybackDriver, PlaybackSpeed, PlayerState, ReplayPlayer, ReplayViewer};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";
const NOT_AVAILABLE: &str = "N/A";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "ikusei-cli", version, about = "Ikusei training dashboard in the terminal")]
struct Cli {
    /// Ikusei HTTP server URL (overrides IKUSEI_HTTP_URL env var)
    #[arg(long, env = "IKUSEI_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show server health
    Status,

    /// Show the integrated dashboard of one worker
    Summary {
        worker_id: i64,
    },

    /// Show the admin summary and alerts
    Admin,

    /// Replay a recorded training session
    Replay {
        session_id: String,

        /// Playback speed: 0.5, 1, 1.5 or 2
        #[arg(long, default_value = "1")]
        speed: PlaybackSpeed,

        /// Wall-clock milliseconds between playback ticks
        #[arg(long, default_value_t = DEFAULT_TICK_MS)]
        tick_ms: u64,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl Envelope {
    fn into_data<T: DeserializeOwned>(self, status: reqwest::StatusCode) -> anyhow::Result<T> {
        if !self.success {
            bail!(
                "server returned {}: {}",
                status,
                self.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        serde_json::from_value(self.data.unwrap_or_default()).context("unexpected response shape")
    }
}

#[derive(Debug, Deserialize)]
pub struct HealthView {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub store: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryView {
    pub total_sessions: usize,
    pub total_training_hours: f64,
    pub average_overall_score: Option<f64>,
    pub latest_overall_score: Option<f64>,
    pub total_milestones: usize,
    pub achieved_milestones: usize,
    pub milestone_achievement_rate: f64,
}

#[derive(Debug, Deserialize)]
pub struct KpiPointView {
    pub date: String,
    pub session_id: String,
    pub overall_score: Option<f64>,
    pub error_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MilestoneView {
    pub milestone_name: String,
    pub status: String,
    #[serde(default)]
    pub target_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DashboardView {
    pub worker_id: i64,
    pub worker_name: Option<String>,
    pub summary: SummaryView,
    #[serde(default)]
    pub kpi_timeline: Vec<KpiPointView>,
    #[serde(default)]
    pub recent_milestones: Vec<MilestoneView>,
}

#[derive(Debug, Deserialize)]
pub struct LatestKpiView {
    pub safety_score: Option<f64>,
    pub error_count: Option<i64>,
    pub overall_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct MilestoneTallyView {
    pub achieved: usize,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct WorkerDigestView {
    pub worker_id: i64,
    pub worker_name: String,
    pub japanese_level: Option<String>,
    pub current_status: String,
    pub latest_kpi: Option<LatestKpiView>,
    pub milestones: MilestoneTallyView,
}

#[derive(Debug, Deserialize)]
pub struct AlertView {
    pub worker_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub priority: String,
}

#[derive(Debug, Deserialize)]
pub struct AdminView {
    pub summary: Vec<WorkerDigestView>,
    pub alerts: Vec<AlertView>,
    pub total_workers: usize,
    pub workers_with_low_kpi: usize,
    pub workers_with_high_errors: usize,
}

// ============================================================================
// Rendering
// ============================================================================

pub fn fmt_score(score: Option<f64>) -> String {
    match score {
        Some(s) => format!("{s:.1}"),
        None => NOT_AVAILABLE.to_string(),
    }
}

fn fmt_count(count: Option<i64>) -> String {
    count.map_or_else(|| NOT_AVAILABLE.to_string(), |c| c.to_string())
}

pub fn render_dashboard(d: &DashboardView) -> String {
    let s = &d.summary;
    let mut out = format!(
        "Worker #{} {}\n",
        d.worker_id,
        d.worker_name.as_deref().unwrap_or("-")
    );
    out.push_str(&format!("  Sessions:        {}\n", s.total_sessions));
    out.push_str(&format!("  Training hours:  {:.1}\n", s.total_training_hours));
    out.push_str(&format!("  Average score:   {}\n", fmt_score(s.average_overall_score)));
    out.push_str(&format!("  Latest score:    {}\n", fmt_score(s.latest_overall_score)));
    out.push_str(&format!(
        "  Milestones:      {} / {} ({:.1}%)\n",
        s.achieved_milestones, s.total_milestones, s.milestone_achievement_rate
    ));

    if !d.kpi_timeline.is_empty() {
        out.push_str("Recent KPI:\n");
        for p in &d.kpi_timeline {
            out.push_str(&format!(
                "  {}  {}  overall {}  errors {}\n",
                p.date.get(..10).unwrap_or(&p.date),
                p.session_id,
                fmt_score(p.overall_score),
                fmt_count(p.error_count)
            ));
        }
    }
    if !d.recent_milestones.is_empty() {
        out.push_str("Recent milestones:\n");
        for m in &d.recent_milestones {
            out.push_str(&format!("  {} [{}]", m.milestone_name, m.status));
            if let Some(target) = &m.target_date {
                out.push_str(&format!(" target {target}"));
            }
            out.push('\n');
        }
    }
    out
}

pub fn render_admin(a: &AdminView) -> String {
    let mut out = format!(
        "Workers: {}  Low KPI: {}  High errors: {}\n",
        a.total_workers, a.workers_with_low_kpi, a.workers_with_high_errors
    );
    for w in &a.summary {
        let kpi = w.latest_kpi.as_ref();
        out.push_str(&format!(
            "  #{} {}  {}  {}  score {}  safety {}  errors {}  milestones {}/{}\n",
            w.worker_id,
            w.worker_name,
            w.japanese_level.as_deref().unwrap_or("-"),
            w.current_status,
            fmt_score(kpi.and_then(|k| k.overall_score)),
            fmt_score(kpi.and_then(|k| k.safety_score)),
            fmt_count(kpi.and_then(|k| k.error_count)),
            w.milestones.achieved,
            w.milestones.total
        ));
    }
    if a.alerts.is_empty() {
        out.push_str("No alerts\n");
    } else {
        out.push_str("Alerts:\n");
        for alert in &a.alerts {
            out.push_str(&format!(
                "  [{}] {} ({}): {}\n",
                alert.priority, alert.worker_name, alert.kind, alert.message
            ));
        }
    }
    out
}

pub fn render_log(session: &TrainingSession, log: &OperationLog) -> String {
    let at = format_clock(session.offset_ms(log.timestamp).max(0) as u64);
    let mut line = format!("[{at}] {}", log.operation_type);
    if let Some(v) = log.operation_value {
        line.push_str(&format!(" = {v}"));
    }
    if log.error_event {
        line.push_str(" !! ERROR");
        if let Some(desc) = &log.error_description {
            line.push_str(&format!(": {desc}"));
        }
    }
    line
}

pub fn render_kpi(t_ms: u64, k: &KpiSnapshot) -> String {
    format!(
        "[{}] KPI overall {} | safety {} | compliance {} | errors {}",
        format_clock(t_ms),
        fmt_score(k.overall_score),
        fmt_score(k.safety_score),
        fmt_score(k.procedure_compliance_rate),
        fmt_count(k.error_count)
    )
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

pub struct ApiClient {
    base: String,
    http: reqwest::blocking::Client,
}

impl ApiClient {
    pub fn new(server: &str) -> anyhow::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base: server.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// GET `path` and unwrap the `data` member of the response envelope.
    pub fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let url = format!("{}{}", self.base, path);
        debug!(%url, "GET");
        let resp = self
            .http
            .get(&url)
            .send()
            .with_context(|| format!("connection failed to {url}"))?;
        let status = resp.status();
        let envelope: Envelope = resp
            .json()
            .with_context(|| format!("server returned {status} without a JSON envelope"))?;
        envelope.into_data(status)
    }

    pub fn health(&self) -> anyhow::Result<HealthView> {
        self.get("/api/health")
    }

    pub fn dashboard(&self, worker_id: i64) -> anyhow::Result<DashboardView> {
        self.get(&format!("/api/workers/{worker_id}/dashboard/integrated"))
    }

    pub fn admin_summary(&self) -> anyhow::Result<AdminView> {
        self.get("/api/admin/summary")
    }

    pub fn replay_session(&self, session_id: &str) -> anyhow::Result<TrainingSession> {
        self.get(&format!("/api/replay/{session_id}"))
    }
}

fn do_status(client: &ApiClient) -> anyhow::Result<()> {
    let health = client.health()?;
    println!("Ikusei server: {}", health.status);
    println!("Version:       {}", health.version.as_deref().unwrap_or("?"));
    println!("Store:         {}", health.store.as_deref().unwrap_or("?"));
    Ok(())
}

// ============================================================================
// Replay
// ============================================================================

/// Fetch a session into a viewer and hand back the ready player.
pub fn load_replay(
    client: &ApiClient,
    session_id: &str,
    tick_ms: u64,
) -> anyhow::Result<ReplayPlayer> {
    let mut viewer = ReplayViewer::new(tick_ms);
    let ticket = viewer.begin_load();
    let result = client.replay_session(session_id).map_err(|e| format!("{e:#}"));
    viewer.complete_load(ticket, result);
    if let Some(message) = viewer.error() {
        bail!("failed to load replay {session_id}: {message}");
    }
    viewer
        .into_player()
        .with_context(|| format!("replay {session_id} did not load"))
}

/// Play `player` to the end, writing each log line as playback passes it and
/// the KPI whenever it changes. Resolving `interrupt` pauses and returns early.
pub async fn play_through<W, F>(
    mut player: ReplayPlayer,
    speed: PlaybackSpeed,
    out: &mut W,
    interrupt: F,
) -> anyhow::Result<PlaybackFrame>
where
    W: Write,
    F: Future,
{
    player.set_speed(speed);
    let duration = player.duration_ms();
    let mut driver = PlaybackDriver::new(player);
    let mut frames = driver.subscribe();
    tokio::pin!(interrupt);

    let mut shown = 0usize;
    let mut last_kpi: Option<KpiSnapshot> = None;
    driver.play();

    loop {
        let frame = *frames.borrow_and_update();
        let (lines, kpi) = driver.with_player(|p| {
            let lines: Vec<String> = p
                .visible_logs_at(frame.virtual_ms)
                .into_iter()
                .skip(shown)
                .map(|log| render_log(p.session(), log))
                .collect();
            (lines, p.kpi_at(frame.virtual_ms).cloned())
        });
        shown += lines.len();
        for line in lines {
            writeln!(out, "{line}")?;
        }
        if kpi != last_kpi {
            if let Some(k) = &kpi {
                writeln!(out, "{}", render_kpi(frame.virtual_ms, k))?;
            }
            last_kpi = kpi;
        }

        if frame.state == PlayerState::Stopped {
            writeln!(
                out,
                "Replay finished at {} / {}",
                format_clock(frame.virtual_ms),
                format_clock(duration)
            )?;
            return Ok(frame);
        }

        tokio::select! {
            biased;
            _ = &mut interrupt => {
                driver.pause();
                let frame = driver.frame();
                writeln!(
                    out,
                    "Paused at {} / {}",
                    format_clock(frame.virtual_ms),
                    format_clock(duration)
                )?;
                return Ok(frame);
            }
            changed = frames.changed() => {
                if changed.is_err() {
                    bail!("playback driver stopped unexpectedly");
                }
            }
        }
    }
}

fn do_replay(
    client: &ApiClient,
    session_id: &str,
    speed: PlaybackSpeed,
    tick_ms: u64,
) -> anyhow::Result<()> {
    let player = load_replay(client, session_id, tick_ms)?;
    {
        let s = player.session();
        println!(
            "Session {}  worker {}  status {}  length {}  logs {}  speed {}",
            s.session_id,
            s.worker_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
            s.status.as_str(),
            format_clock(player.duration_ms()),
            s.operation_logs.len(),
            speed
        );
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let mut stdout = std::io::stdout();
    runtime.block_on(play_through(player, speed, &mut stdout, tokio::signal::ctrl_c()))?;
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = ApiClient::new(&cli.server).and_then(|client| match cli.command {
        Commands::Status => do_status(&client),
        Commands::Summary { worker_id } => client
            .dashboard(worker_id)
            .map(|d| print!("{}", render_dashboard(&d))),
        Commands::Admin => client.admin_summary().map(|a| print!("{}", render_admin(&a))),
        Commands::Replay {
            session_id,
            speed,
            tick_ms,
        } => do_replay(&client, &session_id, speed, tick_ms),
    });

    if let Err(e) = result {
        eprintln!("ikusei-cli: {e:#}");
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
