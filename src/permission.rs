//! Microphone permission gate.
//!
//! The capture engine consults this before installing its first tap. On
//! platforms with a system permission dialog the `request` call may suspend
//! for seconds while the user decides; callers must tolerate that latency.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn status(&self) -> PermissionStatus;

    /// Ask the platform for access. Denial is reported, never retried here.
    async fn request(&self) -> PermissionStatus;
}

/// Gate for platforms without a per-app microphone permission model; device
/// access either works or fails at stream-open time.
pub struct AlwaysGranted;

#[async_trait]
impl PermissionGate for AlwaysGranted {
    async fn status(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }

    async fn request(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }
}
