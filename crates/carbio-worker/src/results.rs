//! Values the worker publishes for its caller.

use carbio_core::Sensitive;
use serde::Serialize;

/// Outcome of one authentication, admin or verify scan.
///
/// `finger_id` and `confidence` are wiped when the value is dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// `false` only for the placeholder produced by `Default`.
    pub valid: bool,
    pub success: bool,
    pub finger_id: Sensitive<u16>,
    pub confidence: Sensitive<u16>,
    pub message: String,
    /// Scan progress in percent when the result was produced.
    pub progress: u8,
}

impl ScanResult {
    pub fn matched(finger_id: u16, confidence: u16, message: impl Into<String>) -> Self {
        Self {
            valid: true,
            success: true,
            finger_id: Sensitive::new(finger_id),
            confidence: Sensitive::new(confidence),
            message: message.into(),
            progress: 100,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            valid: true,
            success: false,
            message: message.into(),
            ..Self::default()
        }
    }
}

pub type AuthResult = ScanResult;
pub type AdminResult = ScanResult;
pub type VerifyResult = ScanResult;

/// One step of a two-capture enrollment.
///
/// Stage 0 is the first capture, stage 1 the second capture and model
/// creation, stage 2 the stored template. A failed result is always the last
/// one for that enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentStageResult {
    pub success: bool,
    pub stage: u8,
    pub message: String,
}

impl EnrollmentStageResult {
    pub fn progressed(stage: u8, message: impl Into<String>) -> Self {
        Self {
            success: true,
            stage,
            message: message.into(),
        }
    }

    pub fn failed(stage: u8, message: impl Into<String>) -> Self {
        Self {
            success: false,
            stage,
            message: message.into(),
        }
    }

    /// `true` when no further stage will follow.
    pub fn is_terminal(&self) -> bool {
        !self.success || self.stage >= 2
    }
}
