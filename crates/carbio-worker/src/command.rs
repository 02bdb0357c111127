//! Units of work queued for the sensor worker.
//!
//! A [`SensorCommand`] is plain data: what to do ([`SensorAction`]), how
//! urgent it is ([`Priority`]) and which polling channel, if any, it belongs
//! to ([`CommandKind`]). The worker dispatches on the action with a `match`,
//! so the queue contents can be inspected and compared in tests.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    High = 1,
    Critical = 2,
}

/// Polling channel a command belongs to. Used by the queue to drop stale
/// polls in bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    None = 0,
    AdminPoll = 1,
    OperationalPoll = 2,
}

/// Everything the worker knows how to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "value")]
pub enum SensorAction {
    /// One authentication capture attempt.
    AuthPoll,
    /// One admin verification capture attempt.
    AdminPoll,
    /// One capture attempt for the running dialog operation.
    OperationPoll,

    StartAuthPolling,
    StopAuthPolling,
    StartAdminPolling,
    StopAdminPolling,

    /// Single capture-and-search attempt reported on the auth channel.
    Authenticate,
    /// Single capture-and-search attempt reported on the admin channel.
    AuthenticateAdmin,

    PrewarmCache,

    Enroll(u16),
    Find,
    Identify,
    Verify(u16),
    CancelOperation,

    QueryTemplate(u16),
    DeleteTemplate(u16),
    ClearDatabase,
    RefreshTemplateCount,

    LedOn,
    LedOff,

    SetBaudRate(u8),
    SetSecurityLevel(u8),
    SetPacketSize(u8),
    SoftReset,
    ShowSettings,
    ResetSensorState,

    Shutdown,
}

impl SensorAction {
    /// Integer argument carried by the action, or zero.
    pub fn parameter(&self) -> i32 {
        match *self {
            Self::Enroll(id) | Self::Verify(id) | Self::QueryTemplate(id) | Self::DeleteTemplate(id) => {
                id as i32
            }
            Self::SetBaudRate(v) | Self::SetSecurityLevel(v) | Self::SetPacketSize(v) => v as i32,
            _ => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthPoll => "auth_poll",
            Self::AdminPoll => "admin_poll",
            Self::OperationPoll => "operation_poll",
            Self::StartAuthPolling => "start_auth_polling",
            Self::StopAuthPolling => "stop_auth_polling",
            Self::StartAdminPolling => "start_admin_polling",
            Self::StopAdminPolling => "stop_admin_polling",
            Self::Authenticate => "authenticate",
            Self::AuthenticateAdmin => "authenticate_admin",
            Self::PrewarmCache => "prewarm_cache",
            Self::Enroll(_) => "enroll",
            Self::Find => "find",
            Self::Identify => "identify",
            Self::Verify(_) => "verify",
            Self::CancelOperation => "cancel_operation",
            Self::QueryTemplate(_) => "query_template",
            Self::DeleteTemplate(_) => "delete_template",
            Self::ClearDatabase => "clear_database",
            Self::RefreshTemplateCount => "refresh_template_count",
            Self::LedOn => "led_on",
            Self::LedOff => "led_off",
            Self::SetBaudRate(_) => "set_baud_rate",
            Self::SetSecurityLevel(_) => "set_security_level",
            Self::SetPacketSize(_) => "set_packet_size",
            Self::SoftReset => "soft_reset",
            Self::ShowSettings => "show_settings",
            Self::ResetSensorState => "reset_sensor_state",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for SensorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parameter() {
            0 => f.write_str(self.name()),
            p => write!(f, "{}({})", self.name(), p),
        }
    }
}

/// A queued unit of work.
///
/// Ordering is by priority, then kind, then submission order: of two
/// commands in the same tier the older one runs first. `seq` is assigned by
/// the queue on push. The action breaks any remaining tie so that `Ord`
/// agrees with `Eq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorCommand {
    pub priority: Priority,
    pub kind: CommandKind,
    pub action: SensorAction,
    pub seq: u64,
}

impl SensorCommand {
    pub fn new(priority: Priority, kind: CommandKind, action: SensorAction) -> Self {
        Self {
            priority,
            kind,
            action,
            seq: 0,
        }
    }

    /// A command that belongs to no polling channel.
    pub fn immediate(priority: Priority, action: SensorAction) -> Self {
        Self::new(priority, CommandKind::None, action)
    }

    pub fn parameter(&self) -> i32 {
        self.action.parameter()
    }
}

impl Ord for SensorCommand {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.kind.cmp(&other.kind))
            .then_with(|| other.seq.cmp(&self.seq))
            .then_with(|| self.action.name().cmp(other.action.name()))
            .then_with(|| self.parameter().cmp(&other.parameter()))
    }
}

impl PartialOrd for SensorCommand {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn cmd(priority: Priority, kind: CommandKind, seq: u64) -> SensorCommand {
        SensorCommand {
            seq,
            ..SensorCommand::new(priority, kind, SensorAction::AuthPoll)
        }
    }

    #[rstest]
    #[case(Priority::Critical, Priority::High)]
    #[case(Priority::High, Priority::Low)]
    #[case(Priority::Critical, Priority::Low)]
    fn test_priority_dominates(#[case] higher: Priority, #[case] lower: Priority) {
        let a = cmd(higher, CommandKind::None, 10);
        let b = cmd(lower, CommandKind::OperationalPoll, 1);
        assert!(a > b);
    }

    #[test]
    fn test_older_wins_within_tier() {
        let older = cmd(Priority::High, CommandKind::None, 1);
        let newer = cmd(Priority::High, CommandKind::None, 2);
        assert!(older > newer);
    }

    #[test]
    fn test_parameter_does_not_reorder() {
        let first = SensorCommand {
            seq: 1,
            ..SensorCommand::immediate(Priority::High, SensorAction::DeleteTemplate(1))
        };
        let second = SensorCommand {
            seq: 2,
            ..SensorCommand::immediate(Priority::High, SensorAction::DeleteTemplate(90))
        };
        assert!(first > second);
    }

    #[rstest]
    #[case(SensorAction::LedOn, SensorAction::LedOff)]
    #[case(SensorAction::Verify(3), SensorAction::Verify(4))]
    fn test_ordering_agrees_with_equality(#[case] a: SensorAction, #[case] b: SensorAction) {
        let x = SensorCommand::immediate(Priority::High, a);
        let y = SensorCommand::immediate(Priority::High, b);
        assert_ne!(x, y);
        assert_ne!(x.cmp(&y), Ordering::Equal);
        assert_eq!(x.cmp(&x), Ordering::Equal);
    }

    #[rstest]
    #[case(SensorAction::Enroll(12), 12, "enroll(12)")]
    #[case(SensorAction::SetBaudRate(6), 6, "set_baud_rate(6)")]
    #[case(SensorAction::Find, 0, "find")]
    fn test_action_parameter(#[case] action: SensorAction, #[case] parameter: i32, #[case] shown: &str) {
        assert_eq!(action.parameter(), parameter);
        assert_eq!(action.to_string(), shown);
    }

    #[test]
    fn test_action_serialization() {
        let json = serde_json::to_string(&SensorAction::Verify(3)).unwrap();
        assert_eq!(json, r#"{"action":"verify","value":3}"#);
    }
}
