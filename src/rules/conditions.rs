// Rule conditions, evaluated against the triggering event and the
// subject's recent event history.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::models::BehavioralEvent;

/// A condition in a trigger rule.
///
/// `EventCount` looks backwards over the subject's history from the
/// triggering event's timestamp; `Attribute` inspects the triggering
/// event's own payload; `All`/`Any` compose.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    EventCount {
        event_type: String,
        min_count: u32,
        within_secs: i64,
    },
    Attribute {
        field: String,
        operator: String,
        value: serde_json::Value,
    },
    All {
        conditions: Vec<Condition>,
    },
    Any {
        conditions: Vec<Condition>,
    },
}

impl Condition {
    pub fn event_count(event_type: &str, min_count: u32, within: Duration) -> Self {
        Condition::EventCount {
            event_type: event_type.to_string(),
            min_count,
            within_secs: within.num_seconds(),
        }
    }

    pub fn attribute(field: &str, operator: &str, value: serde_json::Value) -> Self {
        Condition::Attribute {
            field: field.to_string(),
            operator: operator.to_string(),
            value,
        }
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Condition::All { conditions }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Condition::Any { conditions }
    }

    /// The farthest this condition looks back from the triggering event.
    /// The rule engine fetches one history slice wide enough for every
    /// condition of every candidate rule.
    pub fn lookback_secs(&self) -> i64 {
        match self {
            Condition::EventCount { within_secs, .. } => *within_secs,
            Condition::Attribute { .. } => 0,
            Condition::All { conditions } | Condition::Any { conditions } => conditions
                .iter()
                .map(Condition::lookback_secs)
                .max()
                .unwrap_or(0),
        }
    }

    /// Evaluate against the triggering event and a time-ordered slice of
    /// the subject's history (which includes the triggering event itself).
    pub fn evaluate(&self, event: &BehavioralEvent, history: &[BehavioralEvent]) -> bool {
        match self {
            Condition::EventCount {
                event_type,
                min_count,
                within_secs,
            } => {
                let window_start = event.occurred_at - Duration::seconds(*within_secs);
                let count = history
                    .iter()
                    .filter(|e| {
                        e.event_type == *event_type
                            && e.occurred_at >= window_start
                            && e.occurred_at <= event.occurred_at
                    })
                    .count();
                count >= *min_count as usize
            }
            Condition::Attribute {
                field,
                operator,
                value,
            } => evaluate_attribute(event, field, operator, value),
            Condition::All { conditions } => {
                conditions.iter().all(|c| c.evaluate(event, history))
            }
            Condition::Any { conditions } => {
                conditions.iter().any(|c| c.evaluate(event, history))
            }
        }
    }
}

fn evaluate_attribute(
    event: &BehavioralEvent,
    field: &str,
    operator: &str,
    value: &serde_json::Value,
) -> bool {
    let field_value = lookup_field(&event.attributes, field);

    match operator {
        "equals" | "eq" | "==" => field_value.map(|v| v == value).unwrap_or(false),
        "not_equals" | "ne" | "!=" => field_value.map(|v| v != value).unwrap_or(true),
        "contains" => {
            if let (Some(s), Some(pattern)) =
                (field_value.and_then(|v| v.as_str()), value.as_str())
            {
                return s.to_lowercase().contains(&pattern.to_lowercase());
            }
            false
        }
        "starts_with" => {
            if let (Some(s), Some(pattern)) =
                (field_value.and_then(|v| v.as_str()), value.as_str())
            {
                return s.to_lowercase().starts_with(&pattern.to_lowercase());
            }
            false
        }
        "ends_with" => {
            if let (Some(s), Some(pattern)) =
                (field_value.and_then(|v| v.as_str()), value.as_str())
            {
                return s.to_lowercase().ends_with(&pattern.to_lowercase());
            }
            false
        }
        "greater_than" | "gt" | ">" => {
            if let (Some(v), Some(c)) = (field_value.and_then(|v| v.as_f64()), value.as_f64()) {
                return v > c;
            }
            false
        }
        "greater_than_or_equals" | "gte" | ">=" => {
            if let (Some(v), Some(c)) = (field_value.and_then(|v| v.as_f64()), value.as_f64()) {
                return v >= c;
            }
            false
        }
        "less_than" | "lt" | "<" => {
            if let (Some(v), Some(c)) = (field_value.and_then(|v| v.as_f64()), value.as_f64()) {
                return v < c;
            }
            false
        }
        "less_than_or_equals" | "lte" | "<=" => {
            if let (Some(v), Some(c)) = (field_value.and_then(|v| v.as_f64()), value.as_f64()) {
                return v <= c;
            }
            false
        }
        "in" => {
            if let (Some(v), Some(arr)) = (field_value, value.as_array()) {
                return arr.contains(v);
            }
            false
        }
        "not_in" => {
            if let (Some(v), Some(arr)) = (field_value, value.as_array()) {
                return !arr.contains(v);
            }
            true
        }
        "is_null" | "is_empty" => {
            field_value.is_none() || field_value == Some(&serde_json::Value::Null)
        }
        "is_not_null" | "is_not_empty" => {
            field_value.is_some() && field_value != Some(&serde_json::Value::Null)
        }
        "regex" => {
            if let (Some(s), Some(pattern)) =
                (field_value.and_then(|v| v.as_str()), value.as_str())
            {
                if let Ok(re) = regex::Regex::new(pattern) {
                    return re.is_match(s);
                }
            }
            false
        }
        _ => false,
    }
}

/// Dot-notation lookup into the event attributes.
fn lookup_field<'a>(
    attributes: &'a serde_json::Value,
    field: &str,
) -> Option<&'a serde_json::Value> {
    let mut current = attributes;
    for segment in field.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}
