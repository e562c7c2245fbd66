mod console;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vox_fc::autodetect::{autodetect_link, default_candidate_addresses, AutodetectResult};
use vox_fc::mav::MavVehicle;
use vox_fc::sim::{SimConfig, SimVehicle};
use vox_fc::{FcConfig, Vehicle};
use vox_interp::{doctor as interp_doctor, InterpConfig};
use vox_nav::mission::{self, MissionCfg};
use vox_nav::session::{Session, SessionConfig};
use vox_nav::setpoint::Mapper;
use vox_nav::{doctor as nav_doctor, FlightConfig};
use vox_speech::{doctor as speech_doctor, SpeechConfig};

#[derive(Debug, Parser)]
#[command(name = "vox", version, about = "VOXpilot - voice and text control for PX4 vehicles")]
struct Cli {
    /// TOML config; built-in defaults apply without one.
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive menu (default).
    Run,
    /// Scripted flight: take off, fly [mission] waypoints, land.
    Mission,
    /// Interpret a phrase and print the command record and setpoint; no vehicle.
    Interpret {
        #[arg(required = true)]
        text: Vec<String>,
    },
    Doctor,
    Fc {
        #[command(subcommand)]
        cmd: FcCmd,
    },
}

#[derive(Debug, Subcommand)]
enum FcCmd {
    /// Probe candidate addresses for an autopilot heartbeat.
    Autodetect,
    /// Connect once and print a telemetry snapshot.
    Status,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    pub fc: FcConfig,
    pub flight: FlightConfig,
    pub interp: InterpConfig,
    pub speech: SpeechConfig,
    pub mission: MissionCfg,
}

fn load_config(path: Option<&str>) -> Result<Config> {
    let Some(path) = path else {
        info!("no --config given; using defaults");
        return Ok(Config::default());
    };
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())?;

    match cli.cmd.unwrap_or(Command::Run) {
        Command::Run => console::run(&cfg).await?,
        Command::Mission => mission_cmd(&cfg).await?,
        Command::Interpret { text } => interpret_cmd(&cfg, &text.join(" ")).await?,
        Command::Doctor => doctor(&cfg)?,
        Command::Fc { cmd } => fc_cmd(&cfg, cmd).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    anyhow::ensure!(matches!(cfg.fc.link.as_str(), "mavlink" | "sim"), "fc.link must be mavlink|sim, got {}", cfg.fc.link);
    if cfg.fc.link == "mavlink" {
        if cfg.fc.autodetect {
            info!("doctor: fc autodetect enabled (OK)");
        } else {
            anyhow::ensure!(!cfg.fc.address.trim().is_empty(), "fc.address missing");
        }
        anyhow::ensure!(cfg.fc.setpoint_rate_hz > 2.0, "fc.setpoint_rate_hz must be > 2 for offboard");
        anyhow::ensure!(cfg.fc.connect_timeout_ms >= 1_000, "fc.connect_timeout_ms too short");
    }

    nav_doctor::check_flight(&cfg.flight)?;
    nav_doctor::check_mission(&cfg.mission)?;
    interp_doctor::check_interp(&cfg.interp)?;
    speech_doctor::check_speech(&cfg.speech)?;

    if !interp_doctor::api_key_present(&cfg.interp) {
        warn!("{} not set: voice control runs in basic keyword mode", cfg.interp.api_key_env);
    }
    if cfg.speech.backend == "mic" && !speech_doctor::recorder_available(&cfg.speech) {
        warn!("speech recorder '{}' not found on PATH", cfg.speech.recorder);
    }

    info!("doctor: OK");
    Ok(())
}

async fn interpret_cmd(cfg: &Config, text: &str) -> Result<()> {
    let key = console::api_key_from_env(&cfg.interp);
    let mut interp = console::build_interpreter(&cfg.interp, key);
    let record = interp.interpret(text).await;
    println!("{}", serde_json::to_string_pretty(&record)?);

    let policy = if interp.is_enhanced() { cfg.flight.voice_speed } else { cfg.flight.basic_voice_speed };
    let mapper = Mapper::new(policy, cfg.flight.turn_rate_dps, cfg.flight.frame);
    match mapper.map(record.action, record.distance, record.angle, 0.0) {
        Some(sp) => println!(
            "setpoint: v_ned=({:.2}, {:.2}, {:.2}) m/s yaw={:.1} deg hold={:.2}s",
            sp.velocity.north_m_s, sp.velocity.east_m_s, sp.velocity.down_m_s, sp.yaw_deg(), sp.hold_s
        ),
        None => println!("setpoint: none"),
    }
    Ok(())
}

async fn mission_cmd(cfg: &Config) -> Result<()> {
    let (vehicle, address) = open_vehicle(&cfg.fc).await?;
    let mut session = Session::new(vehicle, session_config(cfg));
    let report = mission::run_scripted(&mut session, &address, &cfg.mission)
        .await
        .context("scripted mission")?;
    println!("mission complete: {} waypoints flown", report.waypoints_flown);
    Ok(())
}

async fn fc_cmd(cfg: &Config, cmd: FcCmd) -> Result<()> {
    match cmd {
        FcCmd::Autodetect => {
            let res = run_fc_autodetect(&cfg.fc).await?;
            match &res.chosen {
                Some(address) => println!("CHOSEN: {}", address),
                None => println!("CHOSEN: none"),
            }
            for p in res.probes {
                println!("probe address={} hb={} {}ms note={}", p.address, p.hb_seen, p.elapsed_ms, p.note);
            }
            Ok(())
        }
        FcCmd::Status => {
            let (vehicle, address) = open_vehicle(&cfg.fc).await?;
            vehicle.connect(&address).await.context("connect")?;
            let mut rx = vehicle.telemetry();
            let timeout = Duration::from_millis(cfg.fc.connect_timeout_ms);
            let connected = tokio::time::timeout(timeout, rx.wait_for(|t| t.connection.is_connected))
                .await
                .is_ok();
            if connected {
                // let a round of telemetry arrive
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            let st = vehicle.telemetry().borrow().clone();
            println!("address={}", address);
            println!("connected={} system_id={:?}", st.connection.is_connected, st.connection.system_id);
            println!("last_heartbeat_age_ms={:?}", st.heartbeat_age_ms);
            println!("armed={} in_air={}", st.armed, st.in_air);
            println!(
                "health: global_position_ok={} home_position_ok={}",
                st.health.is_global_position_ok, st.health.is_home_position_ok
            );
            println!("position={:?} relative_alt_m={:?}", st.position, st.relative_alt_m);
            println!(
                "battery: voltage={:?} current={:?} remaining={:?}",
                st.battery.voltage, st.battery.current, st.battery.remaining
            );
            Ok(())
        }
    }
}

pub(crate) fn session_config(cfg: &Config) -> SessionConfig {
    SessionConfig::new(
        &cfg.flight,
        Duration::from_millis(cfg.fc.connect_timeout_ms),
        Duration::from_millis(cfg.fc.health_timeout_ms),
    )
}

/// Builds the configured vehicle link and resolves the address to connect to.
pub(crate) async fn open_vehicle(fc: &FcConfig) -> Result<(Arc<dyn Vehicle>, String)> {
    match fc.link.as_str() {
        "sim" => Ok((Arc::new(SimVehicle::new(SimConfig::default())), "sim".to_string())),
        "mavlink" => {
            let address = resolve_fc_address(fc).await?;
            Ok((Arc::new(MavVehicle::new(fc.clone())), address))
        }
        other => anyhow::bail!("unknown fc.link: {}", other),
    }
}

async fn run_fc_autodetect(fc: &FcConfig) -> Result<AutodetectResult> {
    let candidates = fc.candidate_addresses.clone().unwrap_or_else(default_candidate_addresses);
    let timeout = Duration::from_millis(fc.heartbeat_timeout_ms.unwrap_or(1500));
    autodetect_link(candidates, timeout).await
}

async fn resolve_fc_address(fc: &FcConfig) -> Result<String> {
    if fc.autodetect {
        let res = run_fc_autodetect(fc).await?;
        res.chosen.context("fc autodetect failed: no heartbeat found")
    } else {
        anyhow::ensure!(!fc.address.trim().is_empty(), "fc.address missing (autodetect=false)");
        Ok(fc.address.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.fc.link, "mavlink");
        assert_eq!(cfg.interp.request_timeout_ms, 8_000);
        doctor(&cfg).unwrap();
    }

    #[test]
    fn sections_override_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [fc]
            link = "sim"

            [flight]
            frame = "local"
            voice_speed = { policy = "fixed", speed_m_s = 1.0 }

            [mission]
            altitude_m = 3.0
            waypoints = [[0.0, 0.0], [2.0, 2.0]]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.fc.link, "sim");
        assert_eq!(cfg.flight.frame, vox_nav::setpoint::Frame::Local);
        assert_eq!(cfg.flight.voice_speed, vox_nav::setpoint::SpeedPolicy::Fixed { speed_m_s: 1.0 });
        assert_eq!(cfg.mission.waypoints.len(), 2);
        assert_eq!(cfg.flight.turn_rate_dps, 30.0);
    }

    #[test]
    fn cli_defaults_to_run() {
        let cli = Cli::try_parse_from(["vox"]).unwrap();
        assert!(cli.cmd.is_none());
        let cli = Cli::try_parse_from(["vox", "--config", "a.toml", "interpret", "go", "up"]).unwrap();
        assert!(matches!(cli.cmd, Some(Command::Interpret { ref text }) if text.len() == 2));
    }

    #[tokio::test]
    async fn interpret_dry_run_needs_no_vehicle() {
        let cfg = Config {
            interp: InterpConfig { api_key_env: "VOX_TEST_UNSET_KEY".into(), ..InterpConfig::default() },
            ..Config::default()
        };
        interpret_cmd(&cfg, "move forward 3 meters").await.unwrap();
    }
}
