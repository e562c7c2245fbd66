use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};
use vox_proto::setpoint::PositionNedYaw;

use crate::session::{Session, SessionError};

/// Scripted flight: local NED waypoints flown at a fixed altitude.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MissionCfg {
    /// Height above home, positive up.
    pub altitude_m: f32,
    /// Hold time at each waypoint.
    pub dwell_ms: u64,
    /// [north, east] in meters from home.
    pub waypoints: Vec<[f32; 2]>,
}

impl Default for MissionCfg {
    fn default() -> Self {
        Self {
            altitude_m: 5.0,
            dwell_ms: 5_000,
            waypoints: vec![[0.0, 0.0], [5.0, 0.0], [5.0, 5.0], [0.0, 5.0], [0.0, 0.0]],
        }
    }
}

impl MissionCfg {
    pub fn targets(&self) -> Vec<PositionNedYaw> {
        self.waypoints
            .iter()
            .map(|[n, e]| PositionNedYaw::new(*n, *e, -self.altitude_m, 0.0))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionReport {
    pub waypoints_flown: usize,
}

/// Connect, wait for a position estimate, arm, take off, fly the waypoints in
/// offboard position mode, land.
///
/// If offboard is refused the vehicle is disarmed and the error returned;
/// no waypoint is flown.
pub async fn run_scripted(session: &mut Session, address: &str, cfg: &MissionCfg) -> Result<MissionReport, SessionError> {
    session.connect(address).await?;
    session.wait_healthy().await?;
    session.arm().await?;
    session.takeoff_action().await?;

    let targets = cfg.targets();
    let prime = targets
        .first()
        .copied()
        .unwrap_or_else(|| PositionNedYaw::new(0.0, 0.0, -cfg.altitude_m, 0.0));

    if let Err(e) = session.start_offboard_at(prime).await {
        error!("starting offboard mode failed: {}", e);
        if let Err(disarm_err) = session.abort_to_idle().await {
            error!("disarm after offboard failure also failed: {}", disarm_err);
        }
        return Err(e);
    }

    let dwell = Duration::from_millis(cfg.dwell_ms);
    let mut flown = 0;
    for (i, target) in targets.into_iter().enumerate() {
        info!("waypoint {}/{}", i + 1, cfg.waypoints.len());
        session.fly_to(target, dwell).await?;
        flown += 1;
    }

    session.land().await?;
    info!("mission complete: {} waypoints", flown);
    Ok(MissionReport { waypoints_flown: flown })
}
