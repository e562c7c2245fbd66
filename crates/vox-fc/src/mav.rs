use async_trait::async_trait;
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavFrame, MavMessage, MavModeFlag, MavResult, MavState, MavType,
        PositionTargetTypemask, COMMAND_LONG_DATA, HEARTBEAT_DATA, SET_POSITION_TARGET_LOCAL_NED_DATA,
    },
    error::MessageReadError,
    MavConnection, MavHeader,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, OnceLock,
};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};
use vox_proto::setpoint::{PositionNedYaw, VelocityNedYaw};
use vox_proto::telemetry::TelemetrySnapshot;

use crate::state::LinkState;
use crate::{FcConfig, Vehicle, VehicleError};

// PX4 custom mode encoding for MAV_CMD_DO_SET_MODE.
const PX4_MAIN_MODE_AUTO: f32 = 4.0;
const PX4_MAIN_MODE_OFFBOARD: f32 = 6.0;
const PX4_SUB_MODE_AUTO_LOITER: f32 = 3.0;

/// Setpoint kept alive by the streamer while offboard is requested.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Target {
    Velocity(VelocityNedYaw),
    Position(PositionNedYaw),
}

#[derive(Debug, Clone, Copy)]
struct CommandAck {
    command: MavCmd,
    result: MavResult,
}

struct Link {
    conn: Arc<dyn MavConnection<MavMessage> + Send + Sync>,
    sys_id: u8,
    comp_id: u8,
    seq: Mutex<u8>,
    target_sys: u8,
    target_comp: u8,
    boot: Instant,
    stop: AtomicBool,
}

impl Link {
    fn send(&self, msg: &MavMessage) -> Result<(), VehicleError> {
        let sequence = {
            let mut seq = self.seq.lock().map_err(|_| VehicleError::Link("sequence lock poisoned".into()))?;
            *seq = seq.wrapping_add(1);
            *seq
        };
        let hdr = MavHeader { system_id: self.sys_id, component_id: self.comp_id, sequence };
        self.conn
            .send(&hdr, msg)
            .map(|_| ())
            .map_err(|e| VehicleError::Link(format!("mavlink send: {e}")))
    }

    fn time_boot_ms(&self) -> u32 {
        self.boot.elapsed().as_millis() as u32
    }
}

/// MAVLink vehicle link speaking PX4's offboard protocol.
///
/// `connect` spawns a blocking reader (mavlink recv can block) that folds
/// messages into [`LinkState`] and a streamer task that sends the companion
/// heartbeat and refreshes the current offboard setpoint at
/// `setpoint_rate_hz`.
pub struct MavVehicle {
    cfg: FcConfig,
    link: OnceLock<Arc<Link>>,
    state: Arc<Mutex<LinkState>>,
    telemetry_tx: Arc<watch::Sender<TelemetrySnapshot>>,
    acks: broadcast::Sender<CommandAck>,
    target: Arc<Mutex<Option<Target>>>,
    streaming: Arc<AtomicBool>,
}

impl MavVehicle {
    pub fn new(cfg: FcConfig) -> Self {
        let (telemetry_tx, _) = watch::channel(TelemetrySnapshot::default());
        let (acks, _) = broadcast::channel(32);
        let state = Arc::new(Mutex::new(LinkState::new(cfg.target_sys)));
        Self {
            cfg,
            link: OnceLock::new(),
            state,
            telemetry_tx: Arc::new(telemetry_tx),
            acks,
            target: Arc::new(Mutex::new(None)),
            streaming: Arc::new(AtomicBool::new(false)),
        }
    }

    fn link(&self) -> Result<&Arc<Link>, VehicleError> {
        let link = self.link.get().ok_or(VehicleError::NotConnected)?;
        if self.cfg.require_heartbeat && !self.lock_state()?.is_connected() {
            return Err(VehicleError::NotConnected);
        }
        Ok(link)
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, LinkState>, VehicleError> {
        self.state.lock().map_err(|_| VehicleError::Link("telemetry lock poisoned".into()))
    }

    fn set_target(&self, target: Option<Target>) -> Result<(), VehicleError> {
        *self.target.lock().map_err(|_| VehicleError::Link("setpoint lock poisoned".into()))? = target;
        Ok(())
    }

    fn has_target(&self) -> Result<bool, VehicleError> {
        Ok(self.target.lock().map_err(|_| VehicleError::Link("setpoint lock poisoned".into()))?.is_some())
    }

    async fn send_setpoint(&self, target: Target) -> Result<(), VehicleError> {
        let link = self.link()?;
        self.set_target(Some(target))?;
        link.send(&position_target(&target, link.time_boot_ms(), link.target_sys, link.target_comp))
    }

    /// Sends a COMMAND_LONG and waits for its COMMAND_ACK, resending with an
    /// incremented confirmation counter on timeout.
    async fn command(&self, name: &str, command: MavCmd, params: [f32; 7]) -> Result<(), VehicleError> {
        let link = self.link()?;
        let mut rx = self.acks.subscribe();
        let ack_timeout = Duration::from_millis(self.cfg.ack_timeout_ms);

        for attempt in 0..=self.cfg.command_retries {
            let cmd = COMMAND_LONG_DATA {
                target_system: link.target_sys,
                target_component: link.target_comp,
                command,
                confirmation: attempt,
                param1: params[0],
                param2: params[1],
                param3: params[2],
                param4: params[3],
                param5: params[4],
                param6: params[5],
                param7: params[6],
            };
            debug!("FC: sending {} (attempt {})", name, attempt + 1);
            link.send(&MavMessage::COMMAND_LONG(cmd))?;

            match tokio::time::timeout(ack_timeout, wait_ack(&mut rx, command)).await {
                Ok(Some(MavResult::MAV_RESULT_ACCEPTED)) | Ok(Some(MavResult::MAV_RESULT_IN_PROGRESS)) => {
                    info!("FC: {} accepted", name);
                    return Ok(());
                }
                Ok(Some(result)) => {
                    return Err(VehicleError::Rejected { command: name.to_string(), result: format!("{:?}", result) });
                }
                Ok(None) => return Err(VehicleError::Link("ack channel closed".into())),
                Err(_) => warn!("FC: no ack for {} within {:?}", name, ack_timeout),
            }
        }
        Err(VehicleError::NoAck(name.to_string()))
    }

    async fn set_px4_mode(&self, name: &str, main_mode: f32, sub_mode: f32) -> Result<(), VehicleError> {
        let mut base = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32;
        if self.lock_state()?.is_armed() {
            base += MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED.bits() as f32;
        }
        self.command(name, MavCmd::MAV_CMD_DO_SET_MODE, [base, main_mode, sub_mode, 0.0, 0.0, 0.0, 0.0])
            .await
    }

    fn spawn_tasks(&self, link: Arc<Link>) {
        let hb_hz = self.cfg.send_heartbeat_hz.unwrap_or(1.0).max(0.2);
        let sp_hz = self.cfg.setpoint_rate_hz.max(2.5);
        let loss_after = Duration::from_millis(self.cfg.heartbeat_loss_ms);

        // Reader loop in a blocking task (mavlink recv blocks).
        let reader_link = link.clone();
        let state = self.state.clone();
        let telemetry_tx = self.telemetry_tx.clone();
        let acks = self.acks.clone();
        tokio::task::spawn_blocking(move || {
            while !reader_link.stop.load(Ordering::Relaxed) {
                match reader_link.conn.recv() {
                    Ok((hdr, msg)) => {
                        if let MavMessage::COMMAND_ACK(ack) = &msg {
                            let _ = acks.send(CommandAck { command: ack.command, result: ack.result });
                        }
                        if let Ok(mut st) = state.lock() {
                            st.apply(&hdr, &msg);
                            telemetry_tx.send_replace(st.snapshot());
                        }
                    }
                    Err(MessageReadError::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Err(e) => {
                        debug!("FC: recv error: {}", e);
                        std::thread::sleep(Duration::from_millis(10));
                    }
                }
            }
            debug!("FC: reader stopped");
        });

        // Companion heartbeat + offboard setpoint refresh.
        let state = self.state.clone();
        let telemetry_tx = self.telemetry_tx.clone();
        let target = self.target.clone();
        let streaming = self.streaming.clone();
        tokio::spawn(async move {
            let hb_interval = Duration::from_secs_f32(1.0 / hb_hz);
            let mut last_hb_send: Option<Instant> = None;
            let mut tick = tokio::time::interval(Duration::from_secs_f32(1.0 / sp_hz));

            loop {
                tick.tick().await;
                if link.stop.load(Ordering::Relaxed) {
                    break;
                }

                if last_hb_send.map(|t| t.elapsed() >= hb_interval).unwrap_or(true) {
                    if let Err(e) = link.send(&companion_heartbeat()) {
                        warn!("FC: heartbeat send failed: {}", e);
                    }
                    last_hb_send = Some(Instant::now());
                }

                if streaming.load(Ordering::Relaxed) {
                    let current = target.lock().ok().and_then(|t| *t);
                    if let Some(t) = current {
                        let msg = position_target(&t, link.time_boot_ms(), link.target_sys, link.target_comp);
                        if let Err(e) = link.send(&msg) {
                            warn!("FC: setpoint send failed: {}", e);
                        }
                    }
                }

                if let Ok(mut st) = state.lock() {
                    if st.check_heartbeat_loss(loss_after) {
                        warn!("FC: heartbeat lost (age {:?})", st.hb_age());
                        telemetry_tx.send_replace(st.snapshot());
                    }
                }
            }
        });
    }
}

impl Drop for MavVehicle {
    fn drop(&mut self) {
        if let Some(link) = self.link.get() {
            link.stop.store(true, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl Vehicle for MavVehicle {
    async fn connect(&self, address: &str) -> Result<(), VehicleError> {
        if self.link.get().is_some() {
            return Ok(());
        }
        validate_serial(address)?;

        let url = address.to_string();
        let conn = tokio::task::spawn_blocking(move || mavlink::connect::<MavMessage>(&url))
            .await
            .map_err(|e| VehicleError::Link(format!("connect task: {e}")))?
            .map_err(|e| VehicleError::Link(format!("mavlink connect {}: {}", address, e)))?;
        info!("FC: listening on {}", address);

        let link = Arc::new(Link {
            conn: Arc::from(conn),
            sys_id: self.cfg.sys_id,
            comp_id: self.cfg.comp_id,
            seq: Mutex::new(0),
            target_sys: self.cfg.target_sys,
            target_comp: self.cfg.target_comp,
            boot: Instant::now(),
            stop: AtomicBool::new(false),
        });
        if self.link.set(link.clone()).is_err() {
            // a concurrent connect won the race
            link.stop.store(true, Ordering::Relaxed);
            return Ok(());
        }
        self.spawn_tasks(link);
        Ok(())
    }

    fn telemetry(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.telemetry_tx.subscribe()
    }

    async fn arm(&self) -> Result<(), VehicleError> {
        self.command("ARM", MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).await
    }

    async fn disarm(&self) -> Result<(), VehicleError> {
        self.command("DISARM", MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [0.0; 7]).await
    }

    async fn takeoff(&self) -> Result<(), VehicleError> {
        // NaN position/altitude: autopilot uses current position and its
        // configured takeoff altitude.
        let nan = f32::NAN;
        self.command("TAKEOFF", MavCmd::MAV_CMD_NAV_TAKEOFF, [0.0, 0.0, 0.0, nan, nan, nan, nan]).await
    }

    async fn land(&self) -> Result<(), VehicleError> {
        let nan = f32::NAN;
        self.command("LAND", MavCmd::MAV_CMD_NAV_LAND, [0.0, 0.0, 0.0, nan, nan, nan, nan]).await
    }

    async fn return_to_launch(&self) -> Result<(), VehicleError> {
        self.command("RTL", MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH, [0.0; 7]).await
    }

    async fn set_velocity_ned(&self, setpoint: VelocityNedYaw) -> Result<(), VehicleError> {
        self.send_setpoint(Target::Velocity(setpoint)).await
    }

    async fn set_position_ned(&self, setpoint: PositionNedYaw) -> Result<(), VehicleError> {
        self.send_setpoint(Target::Position(setpoint)).await
    }

    async fn start_offboard(&self) -> Result<(), VehicleError> {
        self.link()?;
        if !self.has_target()? {
            return Err(VehicleError::OffboardRejected("no setpoint set before start".into()));
        }
        // PX4 only accepts offboard once a setpoint stream is already running.
        self.streaming.store(true, Ordering::Relaxed);
        let warmup = Duration::from_secs_f32(5.0 / self.cfg.setpoint_rate_hz.max(2.5));
        tokio::time::sleep(warmup).await;

        match self.set_px4_mode("OFFBOARD", PX4_MAIN_MODE_OFFBOARD, 0.0).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.streaming.store(false, Ordering::Relaxed);
                Err(match e {
                    VehicleError::Rejected { result, .. } => VehicleError::OffboardRejected(result),
                    VehicleError::NoAck(_) => VehicleError::OffboardRejected("mode change not acknowledged".into()),
                    other => other,
                })
            }
        }
    }

    async fn stop_offboard(&self) -> Result<(), VehicleError> {
        // Switch to hold first so the vehicle never sees a stale stream cut.
        let res = self.set_px4_mode("HOLD", PX4_MAIN_MODE_AUTO, PX4_SUB_MODE_AUTO_LOITER).await;
        self.streaming.store(false, Ordering::Relaxed);
        self.set_target(None)?;
        res
    }
}

async fn wait_ack(rx: &mut broadcast::Receiver<CommandAck>, command: MavCmd) -> Option<MavResult> {
    loop {
        match rx.recv().await {
            Ok(ack) if ack.command == command => return Some(ack.result),
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// SET_POSITION_TARGET_LOCAL_NED for a velocity or position setpoint. Yaw is
/// converted to radians and passed through unwrapped.
pub fn position_target(target: &Target, time_boot_ms: u32, target_sys: u8, target_comp: u8) -> MavMessage {
    let ignore_accel = PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AX_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AY_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AZ_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_RATE_IGNORE;

    let (pos, vel, yaw_deg, type_mask) = match target {
        Target::Velocity(v) => (
            (0.0, 0.0, 0.0),
            (v.north_m_s, v.east_m_s, v.down_m_s),
            v.yaw_deg,
            ignore_accel
                | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_X_IGNORE
                | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_Y_IGNORE
                | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_Z_IGNORE,
        ),
        Target::Position(p) => (
            (p.north_m, p.east_m, p.down_m),
            (0.0, 0.0, 0.0),
            p.yaw_deg,
            ignore_accel
                | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VX_IGNORE
                | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VY_IGNORE
                | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VZ_IGNORE,
        ),
    };

    MavMessage::SET_POSITION_TARGET_LOCAL_NED(SET_POSITION_TARGET_LOCAL_NED_DATA {
        time_boot_ms,
        x: pos.0,
        y: pos.1,
        z: pos.2,
        vx: vel.0,
        vy: vel.1,
        vz: vel.2,
        afx: 0.0,
        afy: 0.0,
        afz: 0.0,
        yaw: yaw_deg.to_radians(),
        yaw_rate: 0.0,
        type_mask,
        target_system: target_sys,
        target_component: target_comp,
        coordinate_frame: MavFrame::MAV_FRAME_LOCAL_NED,
    })
}

fn companion_heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_ONBOARD_CONTROLLER,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}

/// Opens and closes a serial device once so a wrong path or baud fails with a
/// readable error before mavlink takes over the port.
fn validate_serial(address: &str) -> Result<(), VehicleError> {
    let Some((dev, baud)) = parse_serial(address) else { return Ok(()) };
    let _ = tokio_serial::new(dev, baud)
        .open_native_async()
        .map_err(|e| VehicleError::Link(format!("open serial device {}: {}", dev, e)))?;
    Ok(())
}

/// "serial:/dev/ttyACM0:57600" -> ("/dev/ttyACM0", 57600)
pub fn parse_serial(address: &str) -> Option<(&str, u32)> {
    let rest = address.strip_prefix("serial:")?;
    let (dev, baud) = rest.rsplit_once(':')?;
    Some((dev, baud.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_target_ignores_position_and_converts_yaw() {
        let msg = position_target(&Target::Velocity(VelocityNedYaw::new(1.0, -2.0, -0.5, 180.0)), 42, 1, 1);
        let MavMessage::SET_POSITION_TARGET_LOCAL_NED(sp) = msg else { panic!("wrong message") };
        assert_eq!((sp.vx, sp.vy, sp.vz), (1.0, -2.0, -0.5));
        assert!((sp.yaw - std::f32::consts::PI).abs() < 1e-6);
        assert!(sp.type_mask.contains(PositionTargetTypemask::POSITION_TARGET_TYPEMASK_X_IGNORE));
        assert!(!sp.type_mask.contains(PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VX_IGNORE));
        assert_eq!(sp.coordinate_frame, MavFrame::MAV_FRAME_LOCAL_NED);
    }

    #[test]
    fn position_target_ignores_velocity() {
        let msg = position_target(&Target::Position(PositionNedYaw::new(5.0, 5.0, -5.0, 0.0)), 0, 1, 1);
        let MavMessage::SET_POSITION_TARGET_LOCAL_NED(sp) = msg else { panic!("wrong message") };
        assert_eq!((sp.x, sp.y, sp.z), (5.0, 5.0, -5.0));
        assert!(sp.type_mask.contains(PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VZ_IGNORE));
    }

    #[test]
    fn serial_addresses_are_split() {
        assert_eq!(parse_serial("serial:/dev/ttyACM0:57600"), Some(("/dev/ttyACM0", 57600)));
        assert_eq!(parse_serial("udpin:0.0.0.0:14540"), None);
        assert_eq!(parse_serial("serial:/dev/ttyACM0:fast"), None);
    }

    #[tokio::test]
    async fn commands_before_connect_fail_with_not_connected() {
        let v = MavVehicle::new(FcConfig::default());
        assert!(matches!(v.arm().await, Err(VehicleError::NotConnected)));
        assert!(matches!(v.start_offboard().await, Err(VehicleError::NotConnected)));
    }
}
