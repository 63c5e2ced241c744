//! Audio device session arbitration
//!
//! The hardware audio session is exclusive: either a capture or a playback
//! holds it at any time. `AudioSession` is constructed once and handed to
//! every session that needs the device.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Who is holding the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    Capture,
    Playback,
}

/// How the device is configured while held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionMode {
    /// Mic input with playback allowed for accompaniment
    Record,
    Playback,
    /// Playback mixed with other sources (take + video)
    PlaybackWithMixing,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Audio device busy: held by {0:?}")]
    Busy(DeviceRole),
}

#[derive(Debug, Clone, Copy)]
struct Holder {
    lease_id: u64,
    role: DeviceRole,
    mode: SessionMode,
}

#[derive(Debug, Default)]
struct DeviceState {
    holder: Option<Holder>,
    next_lease: u64,
}

/// Shared handle to the exclusive audio device
#[derive(Debug, Clone, Default)]
pub struct AudioSession {
    state: Arc<Mutex<DeviceState>>,
}

impl AudioSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the device
    ///
    /// Capture preempts playback. Capture is never preempted, and a second
    /// capture claim fails.
    pub fn activate(
        &self,
        role: DeviceRole,
        mode: SessionMode,
    ) -> Result<DeviceLease, DeviceError> {
        let mut state = self.state.lock();

        if let Some(holder) = state.holder {
            match (holder.role, role) {
                (DeviceRole::Capture, _) => return Err(DeviceError::Busy(DeviceRole::Capture)),
                (DeviceRole::Playback, DeviceRole::Capture) => {
                    tracing::info!("Deactivating playback session to hand device to capture");
                }
                (DeviceRole::Playback, DeviceRole::Playback) => {
                    tracing::debug!("Replacing playback lease {}", holder.lease_id);
                }
            }
        }

        state.next_lease += 1;
        let lease_id = state.next_lease;
        state.holder = Some(Holder { lease_id, role, mode });
        tracing::debug!("Audio session activated: {:?} ({:?})", role, mode);

        Ok(DeviceLease {
            session: self.clone(),
            lease_id,
            role,
        })
    }

    pub fn active_role(&self) -> Option<DeviceRole> {
        self.state.lock().holder.map(|h| h.role)
    }

    pub fn active_mode(&self) -> Option<SessionMode> {
        self.state.lock().holder.map(|h| h.mode)
    }

    fn holds(&self, lease_id: u64) -> bool {
        self.state
            .lock()
            .holder
            .is_some_and(|h| h.lease_id == lease_id)
    }

    fn release(&self, lease_id: u64) {
        let mut state = self.state.lock();
        if state.holder.is_some_and(|h| h.lease_id == lease_id) {
            let holder = state.holder.take();
            tracing::debug!("Audio session deactivated: {:?}", holder.map(|h| h.role));
        }
    }
}

/// Proof of holding the device; released on drop
#[derive(Debug)]
pub struct DeviceLease {
    session: AudioSession,
    lease_id: u64,
    role: DeviceRole,
}

impl DeviceLease {
    pub fn role(&self) -> DeviceRole {
        self.role
    }

    /// False once another session has taken the device over
    pub fn is_active(&self) -> bool {
        self.session.holds(self.lease_id)
    }

    pub fn release(self) {
        // Drop does the work
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.session.release(self.lease_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_preempts_playback() {
        let session = AudioSession::new();
        let playback = session
            .activate(DeviceRole::Playback, SessionMode::Playback)
            .unwrap();

        let capture = session
            .activate(DeviceRole::Capture, SessionMode::Record)
            .unwrap();

        assert!(!playback.is_active());
        assert!(capture.is_active());
        assert_eq!(session.active_role(), Some(DeviceRole::Capture));

        // A stale lease must not release the new holder
        drop(playback);
        assert_eq!(session.active_role(), Some(DeviceRole::Capture));
    }

    #[test]
    fn test_second_capture_is_rejected() {
        let session = AudioSession::new();
        let _first = session
            .activate(DeviceRole::Capture, SessionMode::Record)
            .unwrap();

        assert_eq!(
            session
                .activate(DeviceRole::Capture, SessionMode::Record)
                .unwrap_err(),
            DeviceError::Busy(DeviceRole::Capture)
        );
    }

    #[test]
    fn test_playback_cannot_preempt_capture() {
        let session = AudioSession::new();
        let _capture = session
            .activate(DeviceRole::Capture, SessionMode::Record)
            .unwrap();
        assert!(session
            .activate(DeviceRole::Playback, SessionMode::Playback)
            .is_err());
    }

    #[test]
    fn test_release_frees_device() {
        let session = AudioSession::new();
        let lease = session
            .activate(DeviceRole::Capture, SessionMode::Record)
            .unwrap();
        lease.release();

        assert_eq!(session.active_role(), None);
        assert!(session
            .activate(DeviceRole::Capture, SessionMode::Record)
            .is_ok());
    }
}
