use serde_json::Value as JsonValue;

use crate::models::suspicious_activity::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEventKind {
    FaceNotDetected,
    MultipleFaces,
    LookingAway,
    SuspiciousObject,
    VoiceDetected,
    TabSwitch,
    Unknown,
}

impl MonitorEventKind {
    pub fn parse(event_type: &str) -> Self {
        match event_type {
            "FACE_NOT_DETECTED" => Self::FaceNotDetected,
            "MULTIPLE_FACES" => Self::MultipleFaces,
            "LOOKING_AWAY" => Self::LookingAway,
            "SUSPICIOUS_OBJECT" => Self::SuspiciousObject,
            "VOICE_DETECTED" => Self::VoiceDetected,
            "TAB_SWITCH" => Self::TabSwitch,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub severity: Severity,
    pub message: &'static str,
    pub details: String,
}

/// Maps raw proctor events to a severity, a student-facing message and an
/// audit detail line. Missing numeric fields render as zero.
pub struct ProctorService;

impl ProctorService {
    pub fn classify(event_type: &str, details: &JsonValue) -> Classification {
        let kind = MonitorEventKind::parse(event_type);
        let (severity, message) = Self::severity_and_message(kind);
        Classification {
            severity,
            message,
            details: Self::render_details(kind, event_type, details),
        }
    }

    fn severity_and_message(kind: MonitorEventKind) -> (Severity, &'static str) {
        match kind {
            MonitorEventKind::FaceNotDetected => (
                Severity::Warning,
                "Please ensure your face is visible in the webcam at all times.",
            ),
            MonitorEventKind::MultipleFaces => (
                Severity::Critical,
                "Multiple faces detected. This is not allowed.",
            ),
            MonitorEventKind::LookingAway => (Severity::Warning, "Please focus on your screen."),
            MonitorEventKind::SuspiciousObject => (
                Severity::Warning,
                "Suspicious object detected. Please remove it.",
            ),
            MonitorEventKind::VoiceDetected => (
                Severity::Warning,
                "Please remain quiet during the assessment.",
            ),
            MonitorEventKind::TabSwitch => (
                Severity::Critical,
                "Switching tabs is not allowed during the assessment.",
            ),
            MonitorEventKind::Unknown => (Severity::None, "Event recorded."),
        }
    }

    fn render_details(kind: MonitorEventKind, event_type: &str, details: &JsonValue) -> String {
        match kind {
            MonitorEventKind::FaceNotDetected => format!(
                "Face not detected for {:.1} seconds (confidence: {:.2})",
                number(details, "duration"),
                number(details, "confidence")
            ),
            MonitorEventKind::MultipleFaces => {
                format!("Multiple faces detected: {}", count(details, "count"))
            }
            MonitorEventKind::LookingAway => format!(
                "Looking away for {:.1} seconds",
                number(details, "duration")
            ),
            MonitorEventKind::TabSwitch => "User switched tabs".to_string(),
            MonitorEventKind::SuspiciousObject
            | MonitorEventKind::VoiceDetected
            | MonitorEventKind::Unknown => format!("{} detected", event_type),
        }
    }
}

fn number(details: &JsonValue, field: &str) -> f64 {
    match details.get(field) {
        Some(JsonValue::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn count(details: &JsonValue, field: &str) -> i64 {
    match details.get(field) {
        Some(JsonValue::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn face_not_detected_renders_both_numbers() {
        let c = ProctorService::classify(
            "FACE_NOT_DETECTED",
            &json!({"duration": 3.456, "confidence": 0.8}),
        );
        assert_eq!(c.severity, Severity::Warning);
        assert_eq!(
            c.message,
            "Please ensure your face is visible in the webcam at all times."
        );
        assert_eq!(c.details, "Face not detected for 3.5 seconds (confidence: 0.80)");
    }

    #[test]
    fn missing_fields_render_as_zero() {
        let c = ProctorService::classify("FACE_NOT_DETECTED", &json!({}));
        assert_eq!(c.details, "Face not detected for 0.0 seconds (confidence: 0.00)");

        let c = ProctorService::classify("MULTIPLE_FACES", &JsonValue::Null);
        assert_eq!(c.severity, Severity::Critical);
        assert_eq!(c.details, "Multiple faces detected: 0");

        let c = ProctorService::classify("LOOKING_AWAY", &json!({"duration": "oops"}));
        assert_eq!(c.details, "Looking away for 0.0 seconds");
    }

    #[test]
    fn multiple_faces_counts() {
        let c = ProctorService::classify("MULTIPLE_FACES", &json!({"count": 2}));
        assert_eq!(c.details, "Multiple faces detected: 2");
        assert_eq!(c.message, "Multiple faces detected. This is not allowed.");
    }

    #[test]
    fn generic_events_echo_their_type() {
        let c = ProctorService::classify("SUSPICIOUS_OBJECT", &json!({}));
        assert_eq!(c.severity, Severity::Warning);
        assert_eq!(c.details, "SUSPICIOUS_OBJECT detected");

        let c = ProctorService::classify("VOICE_DETECTED", &json!({}));
        assert_eq!(c.message, "Please remain quiet during the assessment.");
        assert_eq!(c.details, "VOICE_DETECTED detected");
    }

    #[test]
    fn tab_switch_is_critical() {
        let c = ProctorService::classify("TAB_SWITCH", &json!({"whatever": true}));
        assert_eq!(c.severity, Severity::Critical);
        assert_eq!(c.details, "User switched tabs");
    }

    #[test]
    fn unknown_events_are_recorded_without_severity() {
        let c = ProctorService::classify("PHONE_RINGING", &json!({}));
        assert_eq!(c.severity, Severity::None);
        assert_eq!(c.message, "Event recorded.");
        assert_eq!(c.details, "PHONE_RINGING detected");
    }
}
