use mavlink::{
    common::{
        MavAutopilot, MavLandedState, MavMessage, MavModeFlag, MavSysStatusSensor, SYS_STATUS_DATA,
    },
    MavHeader,
};
use std::time::{Duration, Instant};
use vox_proto::telemetry::{PositionNed, TelemetrySnapshot};

/// Telemetry accumulated from the autopilot's message stream.
#[derive(Debug, Clone)]
pub struct LinkState {
    target_sys: u8,
    snapshot: TelemetrySnapshot,
    last_heartbeat: Option<Instant>,
}

impl LinkState {
    pub fn new(target_sys: u8) -> Self {
        Self { target_sys, snapshot: TelemetrySnapshot::default(), last_heartbeat: None }
    }

    /// Folds one message into the state. Messages from other systems (GCS,
    /// other companions) are ignored.
    pub fn apply(&mut self, hdr: &MavHeader, msg: &MavMessage) {
        if hdr.system_id != self.target_sys {
            return;
        }
        match msg {
            MavMessage::HEARTBEAT(hb) => {
                if hb.autopilot == MavAutopilot::MAV_AUTOPILOT_INVALID {
                    return;
                }
                self.last_heartbeat = Some(Instant::now());
                self.snapshot.connection.is_connected = true;
                self.snapshot.connection.system_id = Some(hdr.system_id);
                self.snapshot.armed = hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
            }
            MavMessage::SYS_STATUS(status) => {
                self.update_battery(status);
                self.snapshot.health.is_global_position_ok = status
                    .onboard_control_sensors_health
                    .contains(MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_GPS);
            }
            MavMessage::HOME_POSITION(_) => {
                self.snapshot.health.is_home_position_ok = true;
            }
            MavMessage::GLOBAL_POSITION_INT(pos) => {
                // millimeters above home
                self.snapshot.relative_alt_m = Some(pos.relative_alt as f32 / 1000.0);
            }
            MavMessage::LOCAL_POSITION_NED(pos) => {
                self.snapshot.position = Some(PositionNed { north_m: pos.x, east_m: pos.y, down_m: pos.z });
            }
            MavMessage::EXTENDED_SYS_STATE(ext) => {
                self.snapshot.in_air = matches!(
                    ext.landed_state,
                    MavLandedState::MAV_LANDED_STATE_IN_AIR
                        | MavLandedState::MAV_LANDED_STATE_TAKEOFF
                        | MavLandedState::MAV_LANDED_STATE_LANDING
                );
            }
            _ => {}
        }
    }

    fn update_battery(&mut self, status: &SYS_STATUS_DATA) {
        let battery = &mut self.snapshot.battery;
        // voltage_battery is in millivolts, convert to volts
        if status.voltage_battery != u16::MAX {
            battery.voltage = Some(status.voltage_battery as f32 / 1000.0);
        }
        // current_battery is in centiamps (0.01A), -1 means invalid
        if status.current_battery != -1 {
            battery.current = Some(status.current_battery as f32 / 100.0);
        }
        // battery_remaining is percentage 0-100, -1 means invalid
        if (0..=100).contains(&status.battery_remaining) {
            battery.remaining = Some(status.battery_remaining as u8);
        }
    }

    /// Marks the link as lost when heartbeats stopped. Returns true when the
    /// connection state flipped.
    pub fn check_heartbeat_loss(&mut self, loss_after: Duration) -> bool {
        let lost = self.hb_age().map(|age| age > loss_after).unwrap_or(false);
        if lost && self.snapshot.connection.is_connected {
            self.snapshot.connection.is_connected = false;
            return true;
        }
        false
    }

    pub fn hb_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }

    pub fn is_connected(&self) -> bool {
        self.snapshot.connection.is_connected
    }

    pub fn is_armed(&self) -> bool {
        self.snapshot.armed
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let mut snap = self.snapshot.clone();
        snap.heartbeat_age_ms = self.hb_age().map(|d| d.as_millis() as u64);
        snap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::{
        EXTENDED_SYS_STATE_DATA, HEARTBEAT_DATA, LOCAL_POSITION_NED_DATA, MavState, MavType, MavVtolState,
    };

    fn hdr(system_id: u8) -> MavHeader {
        MavHeader { system_id, component_id: 1, sequence: 0 }
    }

    fn heartbeat(autopilot: MavAutopilot, base_mode: MavModeFlag) -> MavMessage {
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_QUADROTOR,
            autopilot,
            base_mode,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        })
    }

    #[test]
    fn autopilot_heartbeat_connects_and_reports_armed() {
        let mut st = LinkState::new(1);
        st.apply(&hdr(1), &heartbeat(MavAutopilot::MAV_AUTOPILOT_PX4, MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED));
        let snap = st.snapshot();
        assert!(snap.connection.is_connected);
        assert_eq!(snap.connection.system_id, Some(1));
        assert!(snap.armed);
        assert!(snap.heartbeat_age_ms.is_some());
    }

    #[test]
    fn foreign_and_non_autopilot_heartbeats_are_ignored() {
        let mut st = LinkState::new(1);
        st.apply(&hdr(255), &heartbeat(MavAutopilot::MAV_AUTOPILOT_PX4, MavModeFlag::empty()));
        st.apply(&hdr(1), &heartbeat(MavAutopilot::MAV_AUTOPILOT_INVALID, MavModeFlag::empty()));
        assert!(!st.is_connected());
    }

    #[test]
    fn position_and_landed_state_are_tracked() {
        let mut st = LinkState::new(1);
        st.apply(
            &hdr(1),
            &MavMessage::LOCAL_POSITION_NED(LOCAL_POSITION_NED_DATA {
                time_boot_ms: 10,
                x: 1.0,
                y: 2.0,
                z: -3.0,
                vx: 0.0,
                vy: 0.0,
                vz: 0.0,
            }),
        );
        st.apply(
            &hdr(1),
            &MavMessage::EXTENDED_SYS_STATE(EXTENDED_SYS_STATE_DATA {
                vtol_state: MavVtolState::MAV_VTOL_STATE_UNDEFINED,
                landed_state: MavLandedState::MAV_LANDED_STATE_IN_AIR,
            }),
        );
        let snap = st.snapshot();
        assert_eq!(snap.position, Some(PositionNed { north_m: 1.0, east_m: 2.0, down_m: -3.0 }));
        assert!(snap.in_air);
    }

    #[test]
    fn heartbeat_loss_flips_connection_once() {
        let mut st = LinkState::new(1);
        st.apply(&hdr(1), &heartbeat(MavAutopilot::MAV_AUTOPILOT_PX4, MavModeFlag::empty()));
        std::thread::sleep(Duration::from_millis(5));
        assert!(st.check_heartbeat_loss(Duration::from_millis(1)));
        assert!(!st.is_connected());
        assert!(!st.check_heartbeat_loss(Duration::from_millis(1)));
    }
}
