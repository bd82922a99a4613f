//! Defensive parser for analysis engine decision payloads.
//!
//! The engine answers with a JSON decision that is often wrapped in
//! markdown code fences and sometimes surrounded by prose. Field names
//! drift between engine versions (`agent_signals` vs `signals`,
//! `signal` vs `direction`) and confidences arrive as fractions,
//! percentages, or strings like `"85%"`. Everything is normalised here
//! so the deep-analysis stage only ever sees typed values.
//!
//! Expected shape:
//! ```json
//! {
//!   "action": "buy",
//!   "confidence": 0.72,
//!   "reasoning": "...",
//!   "agent_signals": [
//!     {"agent": "Technical Analysis", "signal": "bullish", "confidence": 0.8}
//!   ]
//! }
//! ```

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::indicators::clamp_unit;
use crate::types::{AgentCategory, AgentSignal, ScreenError, SignalDirection, TradeAction};

/// Longest raw payload excerpt kept in a `MalformedResponse`.
const RAW_EXCERPT_CHARS: usize = 2000;

// ---------------------------------------------------------------------------
// Parsed types
// ---------------------------------------------------------------------------

/// A decoded engine decision.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineDecision {
    pub action: TradeAction,
    pub confidence: f64,
    pub reasoning: String,
    /// Signals in payload order, agent names as sent.
    pub signals: Vec<RawSignal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawSignal {
    pub agent: String,
    pub direction: SignalDirection,
    pub confidence: f64,
}

impl EngineDecision {
    /// Signals keyed by the closed category set. Unrecognised agents are
    /// dropped; when several entries map to one category the last wins.
    pub fn categorised_signals(&self) -> BTreeMap<AgentCategory, AgentSignal> {
        let mut out = BTreeMap::new();
        for raw in &self.signals {
            if let Some(category) = AgentCategory::from_agent_name(&raw.agent) {
                out.insert(
                    category,
                    AgentSignal {
                        direction: raw.direction,
                        confidence: raw.confidence,
                    },
                );
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DecisionPayload {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    confidence: Option<Value>,
    #[serde(default, alias = "reason")]
    reasoning: Option<Value>,
    #[serde(default, alias = "signals")]
    agent_signals: Vec<SignalPayload>,
}

#[derive(Debug, Deserialize)]
struct SignalPayload {
    #[serde(default, alias = "agent_name", alias = "name")]
    agent: String,
    #[serde(default, alias = "direction")]
    signal: Option<String>,
    #[serde(default)]
    confidence: Option<Value>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a raw engine payload into an `EngineDecision`.
pub fn parse_decision(raw: &str) -> Result<EngineDecision, ScreenError> {
    let body = extract_json_object(raw).ok_or_else(|| malformed("no JSON object found", raw))?;

    let payload: DecisionPayload =
        serde_json::from_str(body).map_err(|e| malformed(&format!("invalid JSON: {e}"), raw))?;

    let signals = payload
        .agent_signals
        .into_iter()
        .map(|s| RawSignal {
            agent: s.agent,
            direction: s
                .signal
                .as_deref()
                .map(SignalDirection::from_label)
                .unwrap_or(SignalDirection::Neutral),
            confidence: s.confidence.as_ref().map(normalize_confidence).unwrap_or(0.0),
        })
        .collect();

    Ok(EngineDecision {
        action: payload
            .action
            .as_deref()
            .map(TradeAction::from_label)
            .unwrap_or(TradeAction::Hold),
        confidence: payload.confidence.as_ref().map(normalize_confidence).unwrap_or(0.0),
        reasoning: match payload.reasoning {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        },
        signals,
    })
}

/// Strip code fences and surrounding prose, returning the outermost
/// `{ ... }` span.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let unfenced = strip_fences(raw);
    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&unfenced[start..=end])
}

/// Remove a leading ```` ```json ```` / ```` ``` ```` fence and its closing
/// fence, if present.
fn strip_fences(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```") {
        // Drop the info string ("json", "JSON", ...) up to the first newline
        s = match rest.find('\n') {
            Some(nl) => &rest[nl + 1..],
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
        };
    }
    s.trim_end().strip_suffix("```").unwrap_or(s).trim()
}

/// Normalise a confidence value into [0, 1].
///
/// Accepts fractions (`0.85`), percentages (`85`), and strings (`"0.85"`,
/// `"85%"`). Anything unreadable scores 0.
pub fn normalize_confidence(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let t = s.trim();
            match t.strip_suffix('%') {
                Some(pct) => pct.trim().parse::<f64>().ok().map(|p| p / 100.0),
                None => t.parse::<f64>().ok(),
            }
        }
        _ => None,
    };

    match parsed {
        Some(c) if c > 1.0 && c <= 100.0 => clamp_unit(c / 100.0),
        Some(c) => clamp_unit(c),
        None => 0.0,
    }
}

fn malformed(message: &str, raw: &str) -> ScreenError {
    ScreenError::MalformedResponse {
        message: message.to_string(),
        raw: raw.chars().take(RAW_EXCERPT_CHARS).collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
