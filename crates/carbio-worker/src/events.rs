//! Asynchronous notifications from the worker thread.

use carbio_core::Sensitive;

/// Everything the worker reports outside of the result buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SensorEvent {
    AuthenticationSuccess {
        finger_id: Sensitive<u16>,
        confidence: Sensitive<u16>,
    },
    AuthenticationFailed,
    AuthenticationNoFinger,

    AdminSuccess {
        finger_id: Sensitive<u16>,
        confidence: Sensitive<u16>,
    },
    AdminFailed(String),
    AdminNoFinger,

    EnrollmentProgress(String),
    EnrollmentComplete(String),
    EnrollmentFailed(String),

    OperationComplete(String),
    OperationFailed(String),

    /// Free-form status line for the user.
    Progress(String),
    TemplateCount(u16),
    /// Scan progress in percent.
    ScanProgress(u8),
}

impl SensorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthenticationSuccess { .. } => "authentication_success",
            Self::AuthenticationFailed => "authentication_failed",
            Self::AuthenticationNoFinger => "authentication_no_finger",
            Self::AdminSuccess { .. } => "admin_success",
            Self::AdminFailed(_) => "admin_failed",
            Self::AdminNoFinger => "admin_no_finger",
            Self::EnrollmentProgress(_) => "enrollment_progress",
            Self::EnrollmentComplete(_) => "enrollment_complete",
            Self::EnrollmentFailed(_) => "enrollment_failed",
            Self::OperationComplete(_) => "operation_complete",
            Self::OperationFailed(_) => "operation_failed",
            Self::Progress(_) => "progress",
            Self::TemplateCount(_) => "template_count",
            Self::ScanProgress(_) => "scan_progress",
        }
    }

    /// User-facing text carried by the event, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::AdminFailed(m)
            | Self::EnrollmentProgress(m)
            | Self::EnrollmentComplete(m)
            | Self::EnrollmentFailed(m)
            | Self::OperationComplete(m)
            | Self::OperationFailed(m)
            | Self::Progress(m) => Some(m),
            _ => None,
        }
    }
}
