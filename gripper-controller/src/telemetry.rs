use crate::transport::{DeviceIndex, DeviceReadings};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::time::Instant;

pub const FINGER_JOINT_NAME: &str = "gripper_finger1_joint";

/// Smallest sample interval used when deriving velocity, in seconds
pub const MIN_SAMPLE_INTERVAL: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub seq: u64,
    pub stamp: SystemTime,
    pub frame_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GripperStatus {
    pub header: Header,
    pub is_ready: bool,
    pub is_reset: bool,
    pub is_moving: bool,
    pub obj_detected: bool,
    pub fault_status: u8,
    pub position: f64,
    pub requested_position: f64,
    pub current: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    pub header: Header,
    pub name: Vec<String>,
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
}

impl JointState {
    pub fn finger_position(&self) -> Option<f64> {
        self.position.first().copied()
    }

    /// One step backward difference, expect noise
    pub fn finger_velocity(&self) -> Option<f64> {
        self.velocity.first().copied()
    }
}

/// Per gripper bookkeeping that lives inside the control loop.
#[derive(Debug, Clone)]
pub struct DeviceState {
    pub device: DeviceIndex,
    seq: u64,
    prev_position: f64,
    prev_timestamp: Instant,
}

impl DeviceState {
    pub fn new(device: DeviceIndex, start: Instant) -> Self {
        Self {
            device,
            seq: 0,
            prev_position: 0.0,
            prev_timestamp: start,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Snapshot the readings, then bump the sequence counter.
    pub fn build_status(&mut self, readings: &DeviceReadings, stamp: SystemTime) -> GripperStatus {
        let status = GripperStatus {
            header: Header {
                seq: self.seq,
                stamp,
                frame_id: String::new(),
            },
            is_ready: readings.is_ready,
            is_reset: readings.is_reset,
            is_moving: readings.is_moving,
            obj_detected: readings.object_detected,
            fault_status: readings.fault_status,
            position: readings.position,
            requested_position: readings.requested_position,
            current: readings.current,
        };
        self.seq += 1;
        status
    }

    /// Sample finger position and derive its velocity from the previous sample.
    pub fn build_joint_state(
        &mut self,
        position: f64,
        now: Instant,
        stamp: SystemTime,
    ) -> JointState {
        let dt = now
            .saturating_duration_since(self.prev_timestamp)
            .as_secs_f64()
            .max(MIN_SAMPLE_INTERVAL);
        let velocity = (position - self.prev_position) / dt;
        self.prev_position = position;
        self.prev_timestamp = now;
        JointState {
            header: Header {
                seq: self.seq,
                stamp,
                frame_id: String::new(),
            },
            name: vec![FINGER_JOINT_NAME.to_owned()],
            position: vec![position],
            velocity: vec![velocity],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::time::Duration;

    fn readings(position: f64) -> DeviceReadings {
        DeviceReadings {
            is_ready: true,
            is_moving: true,
            fault_status: 3,
            position,
            requested_position: 0.8,
            current: 0.12,
            ..Default::default()
        }
    }

    #[test]
    fn velocity_is_backward_difference() {
        let start = Instant::now();
        let mut state = DeviceState::new(DeviceIndex::LEFT, start);
        let step = Duration::from_millis(10);
        let velocities: Vec<f64> = [0.0, 0.2, 0.2]
            .iter()
            .enumerate()
            .map(|(i, position)| {
                let now = start + step * (i as u32 + 1);
                state
                    .build_joint_state(*position, now, SystemTime::now())
                    .finger_velocity()
                    .unwrap()
            })
            .collect();
        assert_relative_eq!(velocities[0], 0.0);
        assert_relative_eq!(velocities[1], 20.0, epsilon = 1e-9);
        assert_relative_eq!(velocities[2], 0.0);
    }

    #[test]
    fn zero_interval_does_not_divide_by_zero() {
        let start = Instant::now();
        let mut state = DeviceState::new(DeviceIndex::LEFT, start);
        let joint = state.build_joint_state(0.5, start, SystemTime::now());
        let velocity = joint.finger_velocity().unwrap();
        assert!(velocity.is_finite());
        assert_relative_eq!(velocity, 0.5 / MIN_SAMPLE_INTERVAL);
    }

    #[test]
    fn status_copies_readings_and_counts() {
        let mut state = DeviceState::new(DeviceIndex::RIGHT, Instant::now());
        let stamp = SystemTime::now();
        let status = state.build_status(&readings(0.4), stamp);
        assert_eq!(status.header.seq, 0);
        assert_eq!(status.header.stamp, stamp);
        assert!(status.is_ready);
        assert!(status.is_moving);
        assert!(!status.obj_detected);
        assert_eq!(status.fault_status, 3);
        assert_relative_eq!(status.position, 0.4);
        assert_relative_eq!(status.requested_position, 0.8);
        assert_relative_eq!(status.current, 0.12);
        assert_eq!(state.seq(), 1);
    }

    #[test]
    fn sequence_increases_by_one_per_status() {
        let mut state = DeviceState::new(DeviceIndex::LEFT, Instant::now());
        let mut last = None;
        for _ in 0..50 {
            let seq = state.build_status(&readings(0.0), SystemTime::now()).header.seq;
            if let Some(last) = last {
                assert_eq!(seq, last + 1);
            }
            last = Some(seq);
        }
        assert_eq!(state.seq(), 50);
    }

    #[test]
    fn joint_state_names_finger_joint() {
        let start = Instant::now();
        let mut state = DeviceState::new(DeviceIndex::LEFT, start);
        let joint = state.build_joint_state(0.3, start + Duration::from_millis(10), SystemTime::now());
        assert_eq!(joint.name, vec![FINGER_JOINT_NAME.to_owned()]);
        assert_eq!(joint.finger_position(), Some(0.3));
    }
}
