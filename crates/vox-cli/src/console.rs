use std::io::Write as _;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use vox_interp::gemini::GeminiClient;
use vox_interp::{InterpConfig, Interpreter};
use vox_nav::manual::{self, GrammarError, ManualInput};
use vox_nav::session::{Session, SessionError, Step};
use vox_nav::setpoint::Mapper;
use vox_nav::FlightConfig;
use vox_proto::command::CommandRecord;
use vox_speech::recognize::HttpRecognizer;
use vox_speech::{LineTranscriber, MicTranscriber, SpeechError, Transcriber};

use crate::{open_vehicle, session_config, Config};

/// Consecutive speech backend failures before the voice loop gives up.
const MAX_SPEECH_FAILURES: u32 = 3;

const MENU: &str = "\
  1) arm
  2) take off
  3) manual control
  4) return to launch
  5) land
  6) exit";

/// Interactive menu over one vehicle session. Reads stdin until option 6 or
/// end of input.
pub(crate) async fn run(cfg: &Config) -> Result<()> {
    let mut input = BufReader::new(tokio::io::stdin());

    let key = match api_key_from_env(&cfg.interp) {
        Some(key) => Some(key),
        None => prompt_api_key(&cfg.interp, &mut input).await?,
    };
    let mut interp = build_interpreter(&cfg.interp, key);

    let (vehicle, address) = open_vehicle(&cfg.fc).await?;
    let mut session = Session::new(vehicle, session_config(cfg));
    session.connect(&address).await.context("connect to vehicle")?;
    println!("connected to {}", address);

    loop {
        println!("\n{}", MENU);
        println!("  7) voice control ({})", if interp.is_enhanced() { "enhanced" } else { "basic" });
        let Some(choice) = read_line(&mut input, "select: ").await? else {
            break;
        };

        let result = match choice.as_str() {
            "1" => session.arm().await.context("arm"),
            "2" => session.takeoff_offboard(cfg.flight.takeoff_alt_m).await.context("take off"),
            "3" => manual_loop(&mut session, &mut input, &manual_mapper(&cfg.flight)).await,
            "4" => session.return_home().await.context("return to launch"),
            "5" => session.land().await.context("land"),
            "6" => {
                if let Err(e) = session.exit().await {
                    warn!("exit: {}", e);
                }
                break;
            }
            "7" => voice(cfg, &mut session, &mut interp, &mut input).await,
            "" => continue,
            other => {
                println!("unknown option '{}'", other);
                continue;
            }
        };
        if let Err(e) = result {
            println!("error: {:#}", e);
        }
        println!("mode: {}", session.mode());
    }

    info!("console: done");
    Ok(())
}

pub(crate) fn api_key_from_env(cfg: &InterpConfig) -> Option<Zeroizing<String>> {
    secret_from_env(&cfg.api_key_env)
}

fn secret_from_env(var: &str) -> Option<Zeroizing<String>> {
    let value = Zeroizing::new(std::env::var(var).ok()?);
    (!value.trim().is_empty()).then_some(value)
}

async fn prompt_api_key<R: AsyncBufRead + Unpin>(
    cfg: &InterpConfig,
    input: &mut R,
) -> Result<Option<Zeroizing<String>>> {
    prompt(&format!("{} not set; API key (blank for basic mode): ", cfg.api_key_env));
    let mut line = Zeroizing::new(String::new());
    input.read_line(&mut line).await.context("read API key")?;
    let key = Zeroizing::new(line.trim().to_string());
    Ok((!key.is_empty()).then_some(key))
}

/// Model-backed interpreter when a key is available, keyword fallback
/// otherwise.
pub(crate) fn build_interpreter(cfg: &InterpConfig, api_key: Option<Zeroizing<String>>) -> Interpreter {
    let Some(key) = api_key else {
        info!("no API key: basic keyword interpreter");
        return Interpreter::basic();
    };
    match GeminiClient::new(cfg, key) {
        Ok(client) => {
            info!("interpreter: {}", cfg.model);
            Interpreter::new(Box::new(client), cfg.clone())
        }
        Err(e) => {
            warn!("model client unavailable ({:#}); basic keyword interpreter", e);
            Interpreter::basic()
        }
    }
}

fn manual_mapper(flight: &FlightConfig) -> Mapper {
    Mapper::new(flight.manual_speed, flight.turn_rate_dps, flight.frame)
}

fn voice_mapper(flight: &FlightConfig, enhanced: bool) -> Mapper {
    let policy = if enhanced { flight.voice_speed } else { flight.basic_voice_speed };
    Mapper::new(policy, flight.turn_rate_dps, flight.frame)
}

fn prompt(text: &str) {
    print!("{}", text);
    if let Err(e) = std::io::stdout().flush() {
        debug!("flush stdout: {}", e);
    }
}

/// One trimmed line, `None` at end of input.
async fn read_line<R: AsyncBufRead + Unpin>(input: &mut R, prompt_text: &str) -> Result<Option<String>> {
    prompt(prompt_text);
    let mut line = String::new();
    let n = input.read_line(&mut line).await.context("read input")?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Runs one record. `Ok(true)` ends the loop: a terminal action completed.
/// Fatal link failures propagate; other failures are reported.
async fn dispatch(session: &mut Session, record: &CommandRecord, mapper: &Mapper) -> Result<bool> {
    match session.execute(record, mapper).await {
        Ok(Step::Finished) => Ok(true),
        Ok(Step::Flown | Step::Ignored) => Ok(false),
        Err(e) if e.is_fatal() => Err(e).context(format!("'{}'", record.raw_text)),
        Err(e) => {
            println!("command failed: {}", e);
            Ok(false)
        }
    }
}

/// Leaves offboard when the input source goes away.
async fn leave(session: &mut Session) -> Result<(), SessionError> {
    println!("input closed; leaving offboard");
    session.exit().await
}

/// Typed `f|b|l|r|u|d <meters>` control until exit, land, return to launch,
/// end of input or a fatal link failure.
async fn manual_loop<R: AsyncBufRead + Unpin>(session: &mut Session, input: &mut R, mapper: &Mapper) -> Result<()> {
    session.start_offboard().await.context("start offboard")?;
    println!("{}", manual::HELP);

    loop {
        let Some(line) = read_line(input, "> ").await? else {
            leave(session).await?;
            return Ok(());
        };
        let record = match manual::parse(&line) {
            Ok(ManualInput::Command(record)) => record,
            Ok(ManualInput::Debug) => {
                print_status(session);
                continue;
            }
            Err(GrammarError::Empty) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        if dispatch(session, &record, mapper).await? {
            return Ok(());
        }
    }
}

async fn voice<R: AsyncBufRead + Unpin + Send>(
    cfg: &Config,
    session: &mut Session,
    interp: &mut Interpreter,
    input: &mut R,
) -> Result<()> {
    let mapper = voice_mapper(&cfg.flight, interp.is_enhanced());
    match cfg.speech.backend.as_str() {
        "typed" => voice_loop(session, interp, &mut LineTranscriber::new(input), &mapper).await,
        "mic" => {
            let key = cfg.speech.api_key_env.as_deref().and_then(secret_from_env);
            let recognizer = HttpRecognizer::new(&cfg.speech, key)?;
            voice_loop(session, interp, &mut MicTranscriber::new(cfg.speech.clone(), recognizer), &mapper).await
        }
        other => anyhow::bail!("unknown speech.backend: {}", other),
    }
}

/// Listen, interpret, execute. Speech that cannot be used re-prompts;
/// non-commands are reported without touching the vehicle.
async fn voice_loop<T: Transcriber>(
    session: &mut Session,
    interp: &mut Interpreter,
    transcriber: &mut T,
    mapper: &Mapper,
) -> Result<()> {
    session.start_offboard().await.context("start offboard")?;
    println!(
        "voice control ({}): say a command; 'land', 'return home' or 'exit' to finish",
        if interp.is_enhanced() { "enhanced" } else { "basic" }
    );

    let mut failures = 0;
    loop {
        prompt("listening... ");
        let text = match transcriber.listen().await {
            Ok(text) => {
                failures = 0;
                text
            }
            Err(e) if e.is_retryable() => {
                println!("{}; try again", e);
                continue;
            }
            Err(SpeechError::Closed) => {
                leave(session).await?;
                return Ok(());
            }
            Err(e) => {
                failures += 1;
                warn!("speech: {} (failures: {})", e, failures);
                if failures < MAX_SPEECH_FAILURES {
                    continue;
                }
                if let Err(exit) = session.exit().await {
                    warn!("exit: {}", exit);
                }
                return Err(e).context("speech backend unavailable");
            }
        };
        println!("heard: \"{}\"", text);

        let record = interp.interpret(&text).await;
        if !record.is_command {
            match &record.interpretation {
                Some(why) => println!("not a command: {}", why),
                None => println!("not a command"),
            }
            continue;
        }
        println!("command: {}", describe(&record));
        if dispatch(session, &record, mapper).await? {
            return Ok(());
        }
    }
}

fn describe(record: &CommandRecord) -> String {
    let mut s = record.action.to_string();
    if let Some(d) = record.distance {
        s.push_str(&format!(" {:.1} m", d));
    }
    if let Some(a) = record.angle {
        s.push_str(&format!(" {:.0} deg", a));
    }
    s
}

fn print_status(session: &Session) {
    let t = session.telemetry();
    println!("mode={} heading={:.1}", session.mode(), session.yaw_heading());
    println!("connected={} armed={} in_air={}", t.connection.is_connected, t.armed, t.in_air);
    match t.position {
        Some(p) => println!("position ned=({:.2}, {:.2}, {:.2})", p.north_m, p.east_m, p.down_m),
        None => println!("position unknown"),
    }
    println!("relative_alt_m={:?} battery={:?}%", t.relative_alt_m, t.battery.remaining);
}
