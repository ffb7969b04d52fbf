//! Enqueue-time validation for device commands.
//!
//! `build_command` is the only way a request becomes a `DeviceCommand`; it
//! rejects anything the firmware cannot execute and fills in defaults.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::models::{
        CommandAction, CommandParameters, CommandSource, CommandStatus, DeviceCommand, DeviceType,
    },
    error::{Result, ServiceError},
};

pub const MAX_DISPLAY_TEXT_CHARS: usize = 32;
pub const MAX_DEVICE_ID_CHARS: usize = 64;
pub const DEFAULT_LOCATION: &str = "unknown";
pub const DEFAULT_REQUESTER: &str = "system";
/// Urgent commands are bumped to this priority when requested lower.
pub const URGENT_PRIORITY: i32 = 10;
const URGENT_PRIORITY_FLOOR: i32 = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, ToSchema)]
pub struct ParametersRequest {
    pub duration_ms: Option<i64>,
    pub frequency: Option<i32>,
    pub repeat_count: Option<i32>,
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, ToSchema)]
pub struct CommandRequest {
    /// Defaults to `<device_type>_<unix millis>`.
    pub device_id: Option<String>,
    pub device_type: DeviceType,
    pub command: CommandAction,
    pub command_value: Option<i32>,
    pub display_text: Option<String>,
    #[serde(default)]
    pub parameters: ParametersRequest,
    pub location: Option<String>,
    pub source: Option<CommandSource>,
    pub requested_by: Option<String>,
    #[serde(default)]
    pub is_urgent: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// Free-form JSON object stored with the command.
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
}

impl CommandRequest {
    pub fn new(device_type: DeviceType, command: CommandAction) -> Self {
        Self {
            device_id: None,
            device_type,
            command,
            command_value: None,
            display_text: None,
            parameters: ParametersRequest::default(),
            location: None,
            source: None,
            requested_by: None,
            is_urgent: false,
            expires_at: None,
            metadata: None,
        }
    }
}

pub fn supports(device_type: DeviceType, command: CommandAction) -> bool {
    use CommandAction::*;
    match device_type {
        DeviceType::Lcd => matches!(command, On | Off | Show | Clear | Custom),
        DeviceType::Led => matches!(command, On | Off | Toggle | Pulse | Blink | Custom),
        DeviceType::Buzzer | DeviceType::Relay | DeviceType::Motor | DeviceType::Valve => {
            matches!(command, On | Off | Toggle | Pulse | Custom)
        }
    }
}

/// Inclusive range accepted for `command_value`.
pub fn value_range(device_type: DeviceType) -> (i32, i32) {
    match device_type {
        DeviceType::Led => (0, 100),
        DeviceType::Buzzer => (100, 5000),
        _ => (0, 255),
    }
}

/// Validate `req` and build the pending command it describes.
pub fn build_command(req: CommandRequest, now: DateTime<Utc>) -> Result<DeviceCommand> {
    let CommandRequest {
        device_id,
        device_type,
        command,
        command_value,
        display_text,
        parameters,
        location,
        source,
        requested_by,
        is_urgent,
        expires_at,
        metadata,
    } = req;

    if !supports(device_type, command) {
        return Err(ServiceError::validation(format!(
            "command '{command}' is not supported by device type '{device_type}'"
        )));
    }

    if let Some(value) = command_value {
        let (min, max) = value_range(device_type);
        if !(min..=max).contains(&value) {
            return Err(ServiceError::validation(format!(
                "command_value for {device_type} must be between {min} and {max}"
            )));
        }
    } else if matches!(command, CommandAction::Pulse | CommandAction::Blink) {
        return Err(ServiceError::validation(format!(
            "command '{command}' requires command_value"
        )));
    }

    let display_text = display_text.filter(|t| !t.trim().is_empty());
    if let Some(text) = &display_text {
        if text.chars().count() > MAX_DISPLAY_TEXT_CHARS {
            return Err(ServiceError::validation(format!(
                "display_text must be at most {MAX_DISPLAY_TEXT_CHARS} characters"
            )));
        }
    }
    if device_type == DeviceType::Lcd && command == CommandAction::Show && display_text.is_none() {
        return Err(ServiceError::validation("lcd 'show' requires display_text"));
    }

    let mut parameters = build_parameters(parameters)?;

    if let Some(at) = expires_at {
        if at <= now {
            return Err(ServiceError::validation("expires_at must be in the future"));
        }
    }

    let metadata = match metadata {
        None => serde_json::Value::Object(Default::default()),
        Some(value @ serde_json::Value::Object(_)) => value,
        Some(_) => return Err(ServiceError::validation("metadata must be a JSON object")),
    };

    let source = source.unwrap_or(CommandSource::Manual);
    let is_urgent = is_urgent || source == CommandSource::Emergency;
    if is_urgent && parameters.priority < URGENT_PRIORITY_FLOOR {
        parameters.priority = URGENT_PRIORITY;
    }

    Ok(DeviceCommand {
        id: Uuid::new_v4(),
        device_id: normalize_device_id(device_id, device_type, now)?,
        device_type,
        location: non_blank(location).unwrap_or_else(|| DEFAULT_LOCATION.to_owned()),
        command,
        command_value,
        display_text,
        parameters,
        status: CommandStatus::Pending,
        sent_at: None,
        acknowledged_at: None,
        completed_at: None,
        device_response: None,
        error_code: None,
        error_message: None,
        source,
        requested_by: non_blank(requested_by).unwrap_or_else(|| DEFAULT_REQUESTER.to_owned()),
        is_urgent,
        expires_at,
        metadata,
        created_at: now,
        updated_at: now,
    })
}

fn build_parameters(req: ParametersRequest) -> Result<CommandParameters> {
    let defaults = CommandParameters::default();
    let parameters = CommandParameters {
        duration_ms: req.duration_ms.unwrap_or(defaults.duration_ms),
        frequency: req.frequency.unwrap_or(defaults.frequency),
        repeat_count: req.repeat_count.unwrap_or(defaults.repeat_count),
        priority: req.priority.unwrap_or(defaults.priority),
    };

    if !(1..=10).contains(&parameters.priority) {
        return Err(ServiceError::validation("priority must be between 1 and 10"));
    }
    if parameters.duration_ms < 0 {
        return Err(ServiceError::validation("duration_ms must not be negative"));
    }
    if parameters.frequency < 0 {
        return Err(ServiceError::validation("frequency must not be negative"));
    }
    if parameters.repeat_count < 0 {
        return Err(ServiceError::validation("repeat_count must not be negative"));
    }
    Ok(parameters)
}

fn normalize_device_id(
    device_id: Option<String>,
    device_type: DeviceType,
    now: DateTime<Utc>,
) -> Result<String> {
    let Some(id) = non_blank(device_id) else {
        return Ok(format!("{device_type}_{}", now.timestamp_millis()));
    };
    if id.chars().count() > MAX_DEVICE_ID_CHARS {
        return Err(ServiceError::validation(format!(
            "device_id must be at most {MAX_DEVICE_ID_CHARS} characters"
        )));
    }
    Ok(device_key(&id))
}

/// Canonical form of a device id, used both when storing and when looking
/// commands up.
pub fn device_key(device_id: &str) -> String {
    device_id.trim().to_lowercase()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn request(device_type: DeviceType, command: CommandAction) -> CommandRequest {
        CommandRequest::new(device_type, command)
    }

    fn rejects(req: CommandRequest) -> String {
        match build_command(req, Utc::now()) {
            Err(ServiceError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn defaults_are_filled_in() {
        let now = Utc::now();
        let c = build_command(request(DeviceType::Relay, CommandAction::On), now).unwrap();
        assert_eq!(c.status, CommandStatus::Pending);
        assert_eq!(c.device_id, format!("relay_{}", now.timestamp_millis()));
        assert_eq!(c.location, DEFAULT_LOCATION);
        assert_eq!(c.requested_by, DEFAULT_REQUESTER);
        assert_eq!(c.source, CommandSource::Manual);
        assert_eq!(c.parameters, CommandParameters::default());
        assert_eq!(c.metadata, serde_json::json!({}));
        assert_eq!(c.created_at, now);
    }

    #[test]
    fn device_id_is_trimmed_and_lowercased() {
        let req = CommandRequest {
            device_id: Some(" ESP32-Hall ".into()),
            ..request(DeviceType::Led, CommandAction::On)
        };
        let c = build_command(req, Utc::now()).unwrap();
        assert_eq!(c.device_id, "esp32-hall");
    }

    #[test]
    fn unsupported_commands_are_rejected() {
        assert!(rejects(request(DeviceType::Lcd, CommandAction::Toggle)).contains("not supported"));
        assert!(!supports(DeviceType::Buzzer, CommandAction::Blink));
        assert!(!supports(DeviceType::Valve, CommandAction::Show));
        assert!(supports(DeviceType::Led, CommandAction::Blink));
        assert!(supports(DeviceType::Motor, CommandAction::Pulse));
    }

    #[test]
    fn lcd_show_requires_text() {
        let msg = rejects(request(DeviceType::Lcd, CommandAction::Show));
        assert!(msg.contains("display_text"));

        let blank = CommandRequest {
            display_text: Some("   ".into()),
            ..request(DeviceType::Lcd, CommandAction::Show)
        };
        rejects(blank);

        let ok = CommandRequest {
            display_text: Some("GAS LEAK".into()),
            ..request(DeviceType::Lcd, CommandAction::Show)
        };
        assert!(build_command(ok, Utc::now()).is_ok());
    }

    #[test]
    fn display_text_length_is_limited() {
        let req = CommandRequest {
            display_text: Some("x".repeat(33)),
            ..request(DeviceType::Lcd, CommandAction::Show)
        };
        rejects(req);
    }

    #[test]
    fn value_ranges_per_device_type() {
        let with_value = |t, v| CommandRequest {
            command_value: Some(v),
            ..request(t, CommandAction::On)
        };
        rejects(with_value(DeviceType::Led, 101));
        rejects(with_value(DeviceType::Buzzer, 99));
        rejects(with_value(DeviceType::Buzzer, 5001));
        rejects(with_value(DeviceType::Motor, 256));
        rejects(with_value(DeviceType::Relay, -1));

        let now = Utc::now();
        assert!(build_command(with_value(DeviceType::Led, 100), now).is_ok());
        assert!(build_command(with_value(DeviceType::Buzzer, 2000), now).is_ok());
        assert!(build_command(with_value(DeviceType::Valve, 255), now).is_ok());
    }

    #[test]
    fn pulse_and_blink_need_a_value() {
        rejects(request(DeviceType::Buzzer, CommandAction::Pulse));
        rejects(request(DeviceType::Led, CommandAction::Blink));
    }

    #[test]
    fn parameter_bounds() {
        let with = |p: ParametersRequest| CommandRequest {
            parameters: p,
            ..request(DeviceType::Relay, CommandAction::On)
        };
        rejects(with(ParametersRequest { priority: Some(0), ..Default::default() }));
        rejects(with(ParametersRequest { priority: Some(11), ..Default::default() }));
        rejects(with(ParametersRequest { duration_ms: Some(-5), ..Default::default() }));
        rejects(with(ParametersRequest { frequency: Some(-1), ..Default::default() }));
        rejects(with(ParametersRequest { repeat_count: Some(-1), ..Default::default() }));
    }

    #[test]
    fn expires_at_must_be_in_the_future() {
        let req = CommandRequest {
            expires_at: Some(Utc::now() - Duration::seconds(1)),
            ..request(DeviceType::Relay, CommandAction::Off)
        };
        assert!(rejects(req).contains("expires_at"));
    }

    #[test]
    fn metadata_must_be_an_object() {
        let req = CommandRequest {
            metadata: Some(serde_json::json!([1, 2])),
            ..request(DeviceType::Relay, CommandAction::Off)
        };
        rejects(req);
    }

    #[test]
    fn emergency_source_forces_urgent_priority() {
        let req = CommandRequest {
            source: Some(CommandSource::Emergency),
            ..request(DeviceType::Buzzer, CommandAction::On)
        };
        let c = build_command(req, Utc::now()).unwrap();
        assert!(c.is_urgent);
        assert_eq!(c.parameters.priority, URGENT_PRIORITY);
    }

    #[test]
    fn urgent_keeps_high_priority() {
        let req = CommandRequest {
            is_urgent: true,
            parameters: ParametersRequest { priority: Some(9), ..Default::default() },
            ..request(DeviceType::Valve, CommandAction::Off)
        };
        let c = build_command(req, Utc::now()).unwrap();
        assert_eq!(c.parameters.priority, 9);
    }

    #[test]
    fn deserializes_from_json() {
        let req: CommandRequest = serde_json::from_value(serde_json::json!({
            "device_type": "led",
            "command": "blink",
            "command_value": 60,
            "parameters": { "frequency": 4 }
        }))
        .unwrap();
        let c = build_command(req, Utc::now()).unwrap();
        assert_eq!(c.command_code(), "LED_BLINK(60, 4)");
    }
}
