//! decision.rs: structured per-instrument output of the analysis step.
//!
//! Backends return free text; `parse_reply` turns it into a `Decision` or
//! rejects it. A rejected reply counts as a failure of that backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Instrument;

/// Recommended action for the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Hold,
    Sell,
}

impl Action {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Some(Self::Buy),
            "hold" => Some(Self::Hold),
            "sell" => Some(Self::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Hold => "hold",
            Self::Sell => "sell",
        }
    }

    /// Sort key for dashboards: buy first, then hold, then sell.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Buy => 0,
            Self::Hold => 1,
            Self::Sell => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pass" | "ok" => Some(Self::Pass),
            "warn" | "warning" => Some(Self::Warn),
            "fail" | "failed" => Some(Self::Fail),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warn => "warn",
            Self::Fail => "fail",
        }
    }
}

/// One line of the decision checklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckItem {
    pub condition: String,
    pub status: CheckStatus,
}

impl CheckItem {
    pub fn new(condition: impl Into<String>, status: CheckStatus) -> Self {
        Self {
            condition: condition.into(),
            status,
        }
    }
}

/// Entry / stop / target price (or net-value) levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Levels {
    pub entry: Option<f64>,
    pub stop: Option<f64>,
    pub target: Option<f64>,
}

/// Complete decision for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub code: String,
    pub name: String,
    pub action: Action,
    pub headline: String,
    pub checklist: Vec<CheckItem>,
    #[serde(default)]
    pub levels: Levels,
    /// Raw narrative from the backend.
    #[serde(default)]
    pub narrative: String,
    /// Backend that produced the decision.
    pub backend: String,
    pub generated_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(instrument: &Instrument, action: Action, headline: impl Into<String>) -> Self {
        Self {
            code: instrument.code.clone(),
            name: instrument.display_name().to_string(),
            action,
            headline: headline.into(),
            checklist: Vec::new(),
            levels: Levels::default(),
            narrative: String::new(),
            backend: String::new(),
            generated_at: Utc::now(),
        }
    }

    pub fn with_check(mut self, condition: impl Into<String>, status: CheckStatus) -> Self {
        self.checklist.push(CheckItem::new(condition, status));
        self
    }

    pub fn with_levels(mut self, entry: Option<f64>, stop: Option<f64>, target: Option<f64>) -> Self {
        self.levels = Levels {
            entry,
            stop,
            target,
        };
        self
    }

    pub fn with_narrative(mut self, narrative: impl Into<String>) -> Self {
        self.narrative = narrative.into();
        self
    }

    pub fn from_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    pub fn count_status(&self, status: CheckStatus) -> usize {
        self.checklist.iter().filter(|c| c.status == status).count()
    }
}

// ------------------------------------------------------------
// Backend reply parsing
// ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawDecision {
    action: Option<String>,
    headline: Option<String>,
    #[serde(default)]
    checklist: Vec<RawCheck>,
    #[serde(default)]
    levels: Option<RawLevels>,
    narrative: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCheck {
    condition: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLevels {
    entry: Option<f64>,
    stop: Option<f64>,
    target: Option<f64>,
}

/// Parse and validate a backend's text reply.
///
/// The reply must contain one JSON object (bare or inside a ```json fence)
/// with `action`, a non-empty `headline` and a non-empty `checklist` whose
/// entries all carry a condition and a known status. When `narrative` is
/// absent the whole reply text is kept as the narrative.
pub fn parse_reply(instrument: &Instrument, backend: &str, raw: &str) -> Result<Decision, String> {
    let json = extract_json_object(raw).ok_or_else(|| "no JSON object in reply".to_string())?;
    let parsed: RawDecision =
        serde_json::from_str(json).map_err(|e| format!("invalid decision JSON: {e}"))?;

    let action_raw = parsed.action.ok_or("missing field `action`")?;
    let action =
        Action::parse(&action_raw).ok_or_else(|| format!("unknown action `{action_raw}`"))?;

    let headline = parsed
        .headline
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .ok_or("missing field `headline`")?;

    if parsed.checklist.is_empty() {
        return Err("missing or empty `checklist`".to_string());
    }
    let mut checklist = Vec::with_capacity(parsed.checklist.len());
    for (i, c) in parsed.checklist.into_iter().enumerate() {
        let condition = c
            .condition
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("checklist[{i}] missing `condition`"))?;
        let status_raw = c
            .status
            .ok_or_else(|| format!("checklist[{i}] missing `status`"))?;
        let status = CheckStatus::parse(&status_raw)
            .ok_or_else(|| format!("checklist[{i}] unknown status `{status_raw}`"))?;
        checklist.push(CheckItem { condition, status });
    }

    let levels = parsed.levels.unwrap_or_default();
    let narrative = parsed
        .narrative
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| raw.trim().to_string());

    let mut d = Decision::new(instrument, action, headline)
        .with_levels(levels.entry, levels.stop, levels.target)
        .with_narrative(narrative)
        .from_backend(backend);
    d.checklist = checklist;
    Ok(d)
}

/// Locate the outermost `{ ... }` span, skipping Markdown code fences.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fund() -> Instrument {
        Instrument::new("005827").named("E Fund Blue Chip")
    }

    #[test]
    fn parses_fenced_reply() {
        let raw = r#"Here you go:
```json
{"action":"BUY","headline":"Pullback to MA5","checklist":[{"condition":"trend up","status":"pass"},{"condition":"valuation","status":"warn"}],"levels":{"entry":1.95,"stop":1.80,"target":2.20},"narrative":"Steady uptrend."}
```"#;
        let d = parse_reply(&fund(), "gemini", raw).unwrap();
        assert_eq!(d.action, Action::Buy);
        assert_eq!(d.code, "005827");
        assert_eq!(d.name, "E Fund Blue Chip");
        assert_eq!(d.backend, "gemini");
        assert_eq!(d.checklist.len(), 2);
        assert_eq!(d.checklist[1].status, CheckStatus::Warn);
        assert_eq!(d.levels.stop, Some(1.80));
        assert_eq!(d.narrative, "Steady uptrend.");
    }

    #[test]
    fn missing_fields_are_rejected() {
        let no_action = json!({"headline":"x","checklist":[{"condition":"a","status":"pass"}]});
        assert!(parse_reply(&fund(), "b", &no_action.to_string())
            .unwrap_err()
            .contains("action"));

        let empty_check = json!({"action":"hold","headline":"x","checklist":[]});
        assert!(parse_reply(&fund(), "b", &empty_check.to_string())
            .unwrap_err()
            .contains("checklist"));

        let bad_status =
            json!({"action":"hold","headline":"x","checklist":[{"condition":"a","status":"maybe"}]});
        assert!(parse_reply(&fund(), "b", &bad_status.to_string())
            .unwrap_err()
            .contains("maybe"));

        assert!(parse_reply(&fund(), "b", "I think you should buy.").is_err());
    }

    #[test]
    fn narrative_defaults_to_raw_reply() {
        let raw = json!({"action":"sell","headline":"Trend broken","checklist":[{"condition":"MA20","status":"fail"}]})
            .to_string();
        let d = parse_reply(&fund(), "b", &raw).unwrap();
        assert_eq!(d.narrative, raw);
        assert_eq!(d.levels, Levels::default());
    }

    #[test]
    fn serialized_shape_is_lowercase() {
        let d = Decision::new(&fund(), Action::Hold, "Wait").with_check("chase-high", CheckStatus::Fail);
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["action"], json!("hold"));
        assert_eq!(v["checklist"][0]["status"], json!("fail"));
    }
}
