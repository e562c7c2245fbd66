use anyhow::{Context, Result};
use mavlink::common::MavMessage;
use mavlink::{MavlinkVersion, MAV_STX, MAV_STX_V2};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;
use tokio_serial::SerialPortBuilderExt;
use tracing::{info, warn};

use crate::mav::parse_serial;

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub address: String,
    pub hb_seen: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct AutodetectResult {
    pub chosen: Option<String>,
    pub probes: Vec<ProbeResult>,
}

pub fn default_candidate_addresses() -> Vec<String> {
    vec![
        "udpin:0.0.0.0:14540".into(),
        "udpin:0.0.0.0:14550".into(),
        "serial:/dev/ttyACM0:57600".into(),
        "serial:/dev/ttyACM1:57600".into(),
        "serial:/dev/ttyUSB0:57600".into(),
        "serial:/dev/ttyUSB0:921600".into(),
        "serial:/dev/serial0:921600".into(),
        "serial:/dev/ttyAMA0:921600".into(),
    ]
}

/// Listens on each candidate in turn and returns the first one carrying a
/// MAVLink HEARTBEAT frame. Only listening transports (udpin, serial) can be
/// probed; others are skipped.
pub async fn autodetect_link(candidates: Vec<String>, heartbeat_timeout: Duration) -> Result<AutodetectResult> {
    let mut probes = Vec::new();

    for address in candidates {
        let start = Instant::now();
        let outcome = tokio::time::timeout(heartbeat_timeout, probe(&address)).await;

        let (hb_seen, note) = match outcome {
            Ok(Ok(true)) => (true, "heartbeat".to_string()),
            Ok(Ok(false)) => (false, "not probeable".to_string()),
            Ok(Err(e)) => {
                warn!("link autodetect probe failed address={} err={:#}", address, e);
                (false, format!("open failed: {:#}", e))
            }
            Err(_) => (false, "no heartbeat".to_string()),
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        probes.push(ProbeResult { address: address.clone(), hb_seen, elapsed_ms, note });
        if hb_seen {
            info!("link autodetect: OK {}", address);
            return Ok(AutodetectResult { chosen: Some(address), probes });
        }
    }

    Ok(AutodetectResult { chosen: None, probes })
}

/// Resolves to Ok(true) once a heartbeat frame arrives; never resolves
/// otherwise, the caller bounds it.
async fn probe(address: &str) -> Result<bool> {
    let mut buf = vec![0u8; 2048];

    if let Some(bind) = address.strip_prefix("udpin:") {
        let sock = UdpSocket::bind(bind).await.with_context(|| format!("bind {}", bind))?;
        loop {
            let (n, _) = sock.recv_from(&mut buf).await.context("udp recv")?;
            if contains_heartbeat(&buf[..n]) {
                return Ok(true);
            }
        }
    }

    if let Some((dev, baud)) = parse_serial(address) {
        let mut port = tokio_serial::new(dev, baud)
            .open_native_async()
            .with_context(|| format!("open serial device {}", dev))?;
        let mut window: Vec<u8> = Vec::with_capacity(4096);
        loop {
            let n = port.read(&mut buf).await.context("serial read")?;
            window.extend_from_slice(&buf[..n]);
            if contains_heartbeat(&window) {
                return Ok(true);
            }
            // keep the tail: a frame may straddle reads
            if window.len() > 2048 {
                window.drain(..window.len() - 64);
            }
        }
    }

    Ok(false)
}

/// Whether the bytes hold a complete, CRC-valid MAVLink v1 or v2 HEARTBEAT.
/// Decoding restarts at every start-of-frame marker so a corrupt frame cannot
/// hide a good one behind its claimed length.
pub fn contains_heartbeat(bytes: &[u8]) -> bool {
    (0..bytes.len()).any(|i| {
        let version = match bytes[i] {
            MAV_STX_V2 => MavlinkVersion::V2,
            MAV_STX => MavlinkVersion::V1,
            _ => return false,
        };
        let mut frame = &bytes[i..];
        matches!(
            mavlink::read_versioned_msg::<MavMessage, _>(&mut frame, version),
            Ok((_, MavMessage::HEARTBEAT(_)))
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use mavlink::common::{
        MavAutopilot, MavModeFlag, MavState, MavType, ATTITUDE_DATA, HEARTBEAT_DATA,
    };
    use mavlink::MavHeader;

    fn encode(version: MavlinkVersion, msg: &MavMessage) -> Vec<u8> {
        let mut out = Vec::new();
        let header = MavHeader { system_id: 1, component_id: 1, sequence: 7 };
        mavlink::write_versioned_msg(&mut out, version, header, msg).unwrap();
        out
    }

    fn heartbeat() -> MavMessage {
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_QUADROTOR,
            autopilot: MavAutopilot::MAV_AUTOPILOT_PX4,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: MavState::MAV_STATE_STANDBY,
            mavlink_version: 3,
        })
    }

    #[test]
    fn detects_v2_heartbeat_after_noise() {
        let mut bytes = vec![0x00, 0x42, 0xFD, 0x03];
        bytes.extend(encode(MavlinkVersion::V2, &heartbeat()));
        assert!(contains_heartbeat(&bytes));
    }

    #[test]
    fn detects_v1_heartbeat() {
        assert!(contains_heartbeat(&encode(MavlinkVersion::V1, &heartbeat())));
    }

    #[test]
    fn rejects_bad_crc_and_other_messages() {
        let mut corrupt = encode(MavlinkVersion::V2, &heartbeat());
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        assert!(!contains_heartbeat(&corrupt));

        let attitude = MavMessage::ATTITUDE(ATTITUDE_DATA { roll: 0.1, ..ATTITUDE_DATA::default() });
        assert!(!contains_heartbeat(&encode(MavlinkVersion::V2, &attitude)));
    }

    #[test]
    fn header_lookalikes_are_not_heartbeats() {
        assert!(!contains_heartbeat(&[0xFD, 0x01, 0, 0, 0, 0, 0, 0, 0, 0]));
        assert!(!contains_heartbeat(&[0x12, 0xFE, 0x09, 0x33, 0x44, 0x55, 0x00]));
        assert!(!contains_heartbeat(&[0xFD, 0x09, 0x00]));
    }

    #[tokio::test]
    async fn unprobeable_addresses_are_skipped() {
        let res = autodetect_link(vec!["tcpout:127.0.0.1:5760".into()], Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(res.chosen, None);
        assert_eq!(res.probes.len(), 1);
        assert_eq!(res.probes[0].note, "not probeable");
    }
}
