//! # Screen Definitions
//!
//! The emergency-intake form, as the server sees it: an ordered set of
//! screens, each with required fields and validators. This is immutable
//! configuration — the enum *is* the flow definition, and representing it as
//! an enum (rather than a string-keyed table) means the compiler checks that
//! every action × screen combination in the state machine is handled.
//!
//! The screens walk a bystander through the minimum a dispatcher needs:
//!
//! 1. `EMERGENCY_TYPE` — what happened, how many victims.
//! 2. `PATIENT_STATUS` — conscious? breathing?
//! 3. `LOCATION` — coordinates plus optional address / scene description.
//! 4. `CONFIRM` — explicit go/no-go before an ambulance rolls.
//!
//! Validation failures re-prompt; they never advance the flow or discard
//! fields collected on earlier screens.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::SCENE_DESCRIPTION_MAX_LEN;

/// Accepted `emergency_type` values, mirroring the picker the client renders.
pub const EMERGENCY_TYPES: &[&str] = &[
    "road_accident",
    "collapse",
    "heart_attack",
    "breathing",
    "injury",
    "burn",
    "other",
];

/// Accepted `conscious` values.
pub const CONSCIOUS_OPTIONS: &[&str] = &["yes", "no", "unsure"];

/// Accepted `breathing` values. "struggling" matters — it changes triage.
pub const BREATHING_OPTIONS: &[&str] = &["yes", "struggling", "no", "unsure"];

/// Accepted `victim_count` values. "4+" is deliberately open-ended.
pub const VICTIM_COUNT_OPTIONS: &[&str] = &["1", "2", "3", "4+"];

/// A single field failed validation. The message is shown to the bystander
/// verbatim, so it says what to fix, not what went wrong internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    /// The offending field.
    pub field: &'static str,
    /// Human-readable re-prompt text.
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// One step of the intake form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Screen {
    EmergencyType,
    PatientStatus,
    Location,
    Confirm,
}

impl Screen {
    /// All screens in flow order. `next`/`prev` walk this array.
    pub const ALL: [Screen; 4] = [
        Screen::EmergencyType,
        Screen::PatientStatus,
        Screen::Location,
        Screen::Confirm,
    ];

    /// The screen every session starts on.
    pub fn first() -> Screen {
        Self::ALL[0]
    }

    /// The wire name of this screen.
    pub fn name(self) -> &'static str {
        match self {
            Screen::EmergencyType => "EMERGENCY_TYPE",
            Screen::PatientStatus => "PATIENT_STATUS",
            Screen::Location => "LOCATION",
            Screen::Confirm => "CONFIRM",
        }
    }

    /// Parses a wire name. `None` for anything we do not serve.
    pub fn from_name(name: &str) -> Option<Screen> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// The screen after this one, or `None` from the last screen (whose
    /// successful validation is the terminal transition).
    pub fn next(self) -> Option<Screen> {
        let i = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(i + 1).copied()
    }

    /// The screen before this one, or `None` on the first.
    pub fn prev(self) -> Option<Screen> {
        let i = Self::ALL.iter().position(|s| *s == self)?;
        i.checked_sub(1).and_then(|p| Self::ALL.get(p)).copied()
    }

    /// Every field this screen may submit, required and optional alike.
    /// Drives prefill when a screen is re-entered.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Screen::EmergencyType => &["emergency_type", "victim_count"],
            Screen::PatientStatus => &["conscious", "breathing"],
            Screen::Location => &["latitude", "longitude", "address", "scene_description"],
            Screen::Confirm => &["confirm"],
        }
    }

    /// Validates a submission against this screen's field rules.
    ///
    /// Returns the normalized fields to merge into the session on success.
    /// The first offending field wins on failure — the client re-prompts one
    /// correction at a time.
    pub fn validate(self, data: &Map<String, Value>) -> Result<Map<String, Value>, ValidationError> {
        let mut out = Map::new();
        match self {
            Screen::EmergencyType => {
                out.insert(
                    "emergency_type".into(),
                    choice(data, "emergency_type", EMERGENCY_TYPES)?,
                );
                out.insert(
                    "victim_count".into(),
                    choice(data, "victim_count", VICTIM_COUNT_OPTIONS)?,
                );
            }
            Screen::PatientStatus => {
                out.insert("conscious".into(), choice(data, "conscious", CONSCIOUS_OPTIONS)?);
                out.insert("breathing".into(), choice(data, "breathing", BREATHING_OPTIONS)?);
            }
            Screen::Location => {
                out.insert("latitude".into(), coordinate(data, "latitude", -90.0, 90.0)?);
                out.insert(
                    "longitude".into(),
                    coordinate(data, "longitude", -180.0, 180.0)?,
                );
                if let Some(address) = optional_text(data, "address", 200)? {
                    out.insert("address".into(), address);
                }
                if let Some(scene) =
                    optional_text(data, "scene_description", SCENE_DESCRIPTION_MAX_LEN)?
                {
                    out.insert("scene_description".into(), scene);
                }
            }
            Screen::Confirm => {
                match data.get("confirm").and_then(Value::as_str) {
                    Some("yes") => {
                        out.insert("confirm".into(), Value::String("yes".into()));
                    }
                    _ => {
                        return Err(ValidationError::new(
                            "confirm",
                            "reply \"yes\" to confirm and dispatch help",
                        ));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Already-collected values for this screen's fields, so re-entering a
    /// screen (BACK, or a validation re-prompt) shows prior answers.
    pub fn prefill(self, collected: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::new();
        for field in self.fields() {
            if let Some(value) = collected.get(*field) {
                out.insert((*field).to_string(), value.clone());
            }
        }
        out
    }
}

/// A required single-choice field: present, a string, and one of `options`.
fn choice(
    data: &Map<String, Value>,
    field: &'static str,
    options: &[&str],
) -> Result<Value, ValidationError> {
    match data.get(field).and_then(Value::as_str) {
        Some(raw) if options.contains(&raw) => Ok(Value::String(raw.to_string())),
        Some(raw) => Err(ValidationError::new(
            field,
            format!("{field} must be one of: {} (got \"{raw}\")", options.join(", ")),
        )),
        None => Err(ValidationError::new(
            field,
            format!("{field} is required (one of: {})", options.join(", ")),
        )),
    }
}

/// A required coordinate within plausible bounds. Accepts a JSON number or
/// a numeric string — location pickers disagree on which to send.
fn coordinate(
    data: &Map<String, Value>,
    field: &'static str,
    min: f64,
    max: f64,
) -> Result<Value, ValidationError> {
    let parsed = match data.get(field) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v >= min && v <= max => Ok(Value::from(v)),
        Some(_) => Err(ValidationError::new(
            field,
            format!("{field} must be between {min} and {max}"),
        )),
        None => Err(ValidationError::new(
            field,
            format!("{field} is required and must be a number"),
        )),
    }
}

/// An optional free-text field with a length cap. Absent and null are both
/// "not provided"; anything else must be a string.
fn optional_text(
    data: &Map<String, Value>,
    field: &'static str,
    max_len: usize,
) -> Result<Option<Value>, ValidationError> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.chars().count() <= max_len => {
            Ok(Some(Value::String(s.clone())))
        }
        Some(Value::String(_)) => Err(ValidationError::new(
            field,
            format!("{field} must be at most {max_len} characters"),
        )),
        Some(_) => Err(ValidationError::new(field, format!("{field} must be text"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn names_roundtrip() {
        for screen in Screen::ALL {
            assert_eq!(Screen::from_name(screen.name()), Some(screen));
        }
        assert_eq!(Screen::from_name("NOT_A_SCREEN"), None);
    }

    #[test]
    fn ordering_is_a_straight_line() {
        assert_eq!(Screen::first(), Screen::EmergencyType);
        assert_eq!(Screen::EmergencyType.next(), Some(Screen::PatientStatus));
        assert_eq!(Screen::PatientStatus.next(), Some(Screen::Location));
        assert_eq!(Screen::Location.next(), Some(Screen::Confirm));
        assert_eq!(Screen::Confirm.next(), None);

        assert_eq!(Screen::EmergencyType.prev(), None);
        assert_eq!(Screen::Confirm.prev(), Some(Screen::Location));
    }

    #[test]
    fn emergency_type_accepts_known_values() {
        let data = map(json!({"emergency_type": "road_accident", "victim_count": "4+"}));
        let out = Screen::EmergencyType.validate(&data).unwrap();
        assert_eq!(out["emergency_type"], "road_accident");
        assert_eq!(out["victim_count"], "4+");
    }

    #[test]
    fn emergency_type_rejects_unknown_value() {
        let data = map(json!({"emergency_type": "alien_abduction", "victim_count": "1"}));
        let err = Screen::EmergencyType.validate(&data).unwrap_err();
        assert_eq!(err.field, "emergency_type");
        assert!(err.message.contains("alien_abduction"));
    }

    #[test]
    fn missing_required_field_is_reported_by_name() {
        let data = map(json!({"conscious": "yes"}));
        let err = Screen::PatientStatus.validate(&data).unwrap_err();
        assert_eq!(err.field, "breathing");
    }

    #[test]
    fn coordinates_accept_numbers_and_numeric_strings() {
        let data = map(json!({"latitude": -17.82, "longitude": "31.05"}));
        let out = Screen::Location.validate(&data).unwrap();
        assert_eq!(out["latitude"], json!(-17.82));
        assert_eq!(out["longitude"], json!(31.05));
    }

    #[test]
    fn out_of_range_latitude_is_rejected() {
        let data = map(json!({"latitude": 91.0, "longitude": 0.0}));
        let err = Screen::Location.validate(&data).unwrap_err();
        assert_eq!(err.field, "latitude");
    }

    #[test]
    fn scene_description_length_is_capped() {
        let long = "x".repeat(SCENE_DESCRIPTION_MAX_LEN + 1);
        let data = map(json!({"latitude": 0.0, "longitude": 0.0, "scene_description": long}));
        let err = Screen::Location.validate(&data).unwrap_err();
        assert_eq!(err.field, "scene_description");
    }

    #[test]
    fn optional_fields_may_be_absent_or_null() {
        let data = map(json!({"latitude": 1.0, "longitude": 2.0, "address": null}));
        let out = Screen::Location.validate(&data).unwrap();
        assert!(!out.contains_key("address"));
        assert!(!out.contains_key("scene_description"));
    }

    #[test]
    fn confirm_requires_an_explicit_yes() {
        assert!(Screen::Confirm.validate(&map(json!({"confirm": "yes"}))).is_ok());
        assert!(Screen::Confirm.validate(&map(json!({"confirm": "no"}))).is_err());
        assert!(Screen::Confirm.validate(&map(json!({}))).is_err());
    }

    #[test]
    fn prefill_returns_only_this_screens_fields() {
        let collected = map(json!({
            "emergency_type": "burn",
            "victim_count": "2",
            "conscious": "no",
            "member_id": "LT-2025-A7X9K3",
        }));
        let prefill = Screen::EmergencyType.prefill(&collected);
        assert_eq!(prefill.len(), 2);
        assert_eq!(prefill["emergency_type"], "burn");
        assert_eq!(prefill["victim_count"], "2");
    }
}
