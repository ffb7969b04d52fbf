use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// Mirrors the `sensor_type` Postgres enum.
///
/// `fire` and `vibration` are binary sensors: `1` means triggered, anything
/// else means idle. Boolean payloads are coerced before classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "sensor_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Gas,
    Temperature,
    Humidity,
    Fire,
    Vibration,
}

impl SensorType {
    /// Every monitored sensor type, in dashboard order.
    pub const ALL: [SensorType; 5] = [
        SensorType::Gas,
        SensorType::Temperature,
        SensorType::Humidity,
        SensorType::Fire,
        SensorType::Vibration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SensorType::Gas => "gas",
            SensorType::Temperature => "temperature",
            SensorType::Humidity => "humidity",
            SensorType::Fire => "fire",
            SensorType::Vibration => "vibration",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity assigned to a reading by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "reading_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    Normal,
    Warning,
    Danger,
    Unknown,
}

impl ReadingStatus {
    /// Warning and danger readings raise alerts; normal and unknown never do.
    pub fn is_abnormal(self) -> bool {
        matches!(self, ReadingStatus::Warning | ReadingStatus::Danger)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReadingStatus::Normal => "normal",
            ReadingStatus::Warning => "warning",
            ReadingStatus::Danger => "danger",
            ReadingStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct SensorReading {
    pub id: Uuid,
    pub device_id: String,
    pub sensor_type: SensorType,
    /// `None` when the device reported `null`; such readings are `Unknown`.
    pub value: Option<f64>,
    pub status: ReadingStatus,
    /// Measurement time as reported by the device (ingestion time otherwise).
    pub recorded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "alert_severity", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "alert_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    FalseAlarm,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub sensor_type: SensorType,
    pub sensor_value: Option<f64>,
    pub device_id: String,
    pub location: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A state change applied atomically to a single alert.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertTransition {
    Acknowledge { by: String, at: DateTime<Utc> },
    Resolve { notes: Option<String>, at: DateTime<Utc> },
    Reactivate { at: DateTime<Utc> },
    FalseAlarm { by: String, at: DateTime<Utc> },
}

impl Alert {
    /// Apply `transition` in place.
    ///
    /// Keeps the two alert invariants: an acknowledged alert is never
    /// `active`, and a resolved alert is always `resolved`.
    pub fn apply(&mut self, transition: &AlertTransition) {
        match transition {
            AlertTransition::Acknowledge { by, at } => {
                if !self.acknowledged {
                    self.acknowledged = true;
                    self.acknowledged_at = Some(*at);
                    self.acknowledged_by = Some(by.clone());
                }
                if self.status == AlertStatus::Active {
                    self.status = AlertStatus::Acknowledged;
                }
                self.updated_at = *at;
            }
            AlertTransition::Resolve { notes, at } => {
                self.resolved = true;
                self.resolved_at = Some(*at);
                self.resolution_notes = notes.clone();
                self.status = AlertStatus::Resolved;
                self.updated_at = *at;
            }
            AlertTransition::Reactivate { at } => {
                self.status = AlertStatus::Active;
                self.acknowledged = false;
                self.acknowledged_at = None;
                self.acknowledged_by = None;
                self.resolved = false;
                self.resolved_at = None;
                self.resolution_notes = None;
                self.updated_at = *at;
            }
            AlertTransition::FalseAlarm { by, at } => {
                if !self.acknowledged {
                    self.acknowledged = true;
                    self.acknowledged_at = Some(*at);
                    self.acknowledged_by = Some(by.clone());
                }
                self.resolved = false;
                self.resolved_at = None;
                self.status = AlertStatus::FalseAlarm;
                self.updated_at = *at;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Device commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "device_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Buzzer,
    Led,
    Lcd,
    Relay,
    Motor,
    Valve,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Buzzer => "buzzer",
            DeviceType::Led => "led",
            DeviceType::Lcd => "lcd",
            DeviceType::Relay => "relay",
            DeviceType::Motor => "motor",
            DeviceType::Valve => "valve",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "command_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    On,
    Off,
    Toggle,
    Pulse,
    Blink,
    Show,
    Clear,
    Custom,
}

impl CommandAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandAction::On => "on",
            CommandAction::Off => "off",
            CommandAction::Toggle => "toggle",
            CommandAction::Pulse => "pulse",
            CommandAction::Blink => "blink",
            CommandAction::Show => "show",
            CommandAction::Clear => "clear",
            CommandAction::Custom => "custom",
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "command_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Sent,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandStatus::Completed | CommandStatus::Failed | CommandStatus::Cancelled
        )
    }

    /// Forward-only lifecycle: `pending → sent → executing → completed`, with
    /// `failed` and `cancelled` reachable from any non-terminal state.
    pub fn can_transition_to(self, next: CommandStatus) -> bool {
        use CommandStatus::*;
        match (self, next) {
            (Pending, Sent) | (Sent, Executing) | (Executing, Completed) => true,
            (from, Failed | Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Sent => "sent",
            CommandStatus::Executing => "executing",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
            CommandStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "command_source", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CommandSource {
    System,
    Manual,
    Schedule,
    Emergency,
    Api,
}

/// Execution parameters carried alongside a command.
#[derive(Debug, Clone, Copy, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct CommandParameters {
    /// Duration in milliseconds; `0` means "until told otherwise".
    pub duration_ms: i64,
    /// Blink/pulse frequency in Hz.
    pub frequency: i32,
    pub repeat_count: i32,
    /// 1 (lowest) to 10 (highest).
    pub priority: i32,
}

impl Default for CommandParameters {
    fn default() -> Self {
        Self {
            duration_ms: 0,
            frequency: 1,
            repeat_count: 1,
            priority: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub id: Uuid,
    pub device_id: String,
    pub device_type: DeviceType,
    pub location: String,
    pub command: CommandAction,
    pub command_value: Option<i32>,
    pub display_text: Option<String>,
    #[sqlx(flatten)]
    pub parameters: CommandParameters,
    pub status: CommandStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub device_response: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub source: CommandSource,
    pub requested_by: String,
    pub is_urgent: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A status change applied to a command with compare-and-set on its
/// previous status.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandTransition {
    pub to: CommandStatus,
    pub at: DateTime<Utc>,
    pub device_response: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl CommandTransition {
    pub fn to(status: CommandStatus, at: DateTime<Utc>) -> Self {
        Self {
            to: status,
            at,
            device_response: None,
            error_code: None,
            error_message: None,
        }
    }
}

impl DeviceCommand {
    /// Apply `transition` in place. Callers check legality first.
    pub fn apply(&mut self, transition: &CommandTransition) {
        self.status = transition.to;
        self.updated_at = transition.at;
        match transition.to {
            CommandStatus::Sent => self.sent_at = Some(transition.at),
            CommandStatus::Executing => self.acknowledged_at = Some(transition.at),
            CommandStatus::Completed => self.completed_at = Some(transition.at),
            _ => {}
        }
        if transition.device_response.is_some() {
            self.device_response = transition.device_response.clone();
        }
        if transition.error_code.is_some() {
            self.error_code = transition.error_code.clone();
        }
        if transition.error_message.is_some() {
            self.error_message = transition.error_message.clone();
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    /// Pending or sent: still waiting for the device to pick it up.
    pub fn is_active(&self) -> bool {
        matches!(self.status, CommandStatus::Pending | CommandStatus::Sent)
    }

    /// Seconds spent in the queue; `0` once the command left `pending`.
    pub fn waiting_time_secs(&self, now: DateTime<Utc>) -> i64 {
        if self.status != CommandStatus::Pending {
            return 0;
        }
        (now - self.created_at).num_seconds().max(0)
    }

    pub fn is_emergency(&self) -> bool {
        self.source == CommandSource::Emergency || self.is_urgent
    }

    /// Instruction string understood by the microcontroller firmware.
    pub fn command_code(&self) -> String {
        let value = self.command_value;
        let p = &self.parameters;
        match (self.device_type, self.command) {
            (DeviceType::Buzzer, CommandAction::On) => {
                format!("BUZZER_ON({})", value.unwrap_or(1000))
            }
            (DeviceType::Buzzer, CommandAction::Off) => "BUZZER_OFF()".to_owned(),
            (DeviceType::Buzzer, CommandAction::Pulse) => {
                let duration = if p.duration_ms > 0 { p.duration_ms } else { 100 };
                format!("BUZZER_PULSE({}, {duration})", value.unwrap_or(1000))
            }
            (DeviceType::Led, CommandAction::On) => format!("LED_ON({})", value.unwrap_or(100)),
            (DeviceType::Led, CommandAction::Off) => "LED_OFF()".to_owned(),
            (DeviceType::Led, CommandAction::Blink) => {
                let frequency = if p.frequency > 0 { p.frequency } else { 2 };
                format!("LED_BLINK({}, {frequency})", value.unwrap_or(50))
            }
            (DeviceType::Lcd, CommandAction::Show) => {
                format!("LCD_SHOW(\"{}\")", self.display_text.as_deref().unwrap_or(""))
            }
            (DeviceType::Lcd, CommandAction::Clear) => "LCD_CLEAR()".to_owned(),
            (_, command) => format!("CMD_{}", command.as_str().to_uppercase()),
        }
    }
}
