use anyhow::Result;

use crate::mission::MissionCfg;
use crate::setpoint::SpeedPolicy;
use crate::FlightConfig;

pub fn check_flight(cfg: &FlightConfig) -> Result<()> {
    anyhow::ensure!(cfg.turn_rate_dps > 0.0 && cfg.turn_rate_dps <= 180.0, "flight.turn_rate_dps should be 0..180");
    anyhow::ensure!(cfg.ascent_speed_m_s > 0.0 && cfg.ascent_speed_m_s <= 3.0, "flight.ascent_speed_m_s should be 0..3");
    anyhow::ensure!(cfg.takeoff_alt_m >= 1.0 && cfg.takeoff_alt_m <= 20.0, "flight.takeoff_alt_m should be 1..20");
    anyhow::ensure!(cfg.arm_settle_ms <= 10_000, "flight.arm_settle_ms too long");
    check_speed("flight.manual_speed", &cfg.manual_speed)?;
    check_speed("flight.voice_speed", &cfg.voice_speed)?;
    check_speed("flight.basic_voice_speed", &cfg.basic_voice_speed)?;
    Ok(())
}

fn check_speed(name: &str, policy: &SpeedPolicy) -> Result<()> {
    let (min, max) = policy.band();
    anyhow::ensure!(min > 0.0, "{}: speed must be > 0", name);
    anyhow::ensure!(min <= max, "{}: min speed above max speed", name);
    anyhow::ensure!(max <= 5.0, "{}: speed above 5 m/s", name);
    if let SpeedPolicy::Adaptive { target_time_s, .. } = policy {
        anyhow::ensure!(*target_time_s > 0.0, "{}: target_time_s must be > 0", name);
    }
    Ok(())
}

pub fn check_mission(cfg: &MissionCfg) -> Result<()> {
    anyhow::ensure!(!cfg.waypoints.is_empty(), "mission.waypoints must have >= 1 point");
    anyhow::ensure!(cfg.altitude_m >= 1.0 && cfg.altitude_m <= 50.0, "mission.altitude_m should be 1..50");
    for [n, e] in &cfg.waypoints {
        anyhow::ensure!(n.is_finite() && e.is_finite(), "mission waypoint not finite");
        anyhow::ensure!(n.hypot(*e) <= 100.0, "mission waypoint [{}, {}] further than 100 m from home", n, e);
    }
    Ok(())
}
