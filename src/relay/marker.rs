//! Wire format between the planner and the renderer: one
//! `ACTION_CHECK_JSON: {...}` line, plus the prompt blocks and the display tag
//! built from it.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

pub const MARKER_PREFIX: &str = "ACTION_CHECK_JSON:";
/// Present in every block this crate injects; guards against double injection.
pub const SENTINEL: &str = "[impression_affection_plugin:action_check]";
/// Visible start of a display tag.
pub const TAG_GUARD: &str = "[动作检定：";

static MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"ACTION_CHECK_JSON:\s*(\{[^\r\n]*\})").expect("marker regex should compile")
});

static MARKER_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*ACTION_CHECK_JSON:.*(?:\r?\n)?")
        .expect("marker line regex should compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollResult {
    Success,
    Fail,
}

impl RollResult {
    /// Normalise through the synonym table. Anything else is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "ok" | "pass" | "passed" | "success" => Some(RollResult::Success),
            "fail" | "failed" | "failure" => Some(RollResult::Fail),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RollResult::Success => "success",
            RollResult::Fail => "fail",
        }
    }

    /// Label shown to users.
    pub fn label(self) -> &'static str {
        match self {
            RollResult::Success => "成功",
            RollResult::Fail => "失败",
        }
    }
}

impl fmt::Display for RollResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the planner decided for a physical interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeDecision {
    pub interaction: String,
    /// Always within 0..=100.
    pub chance: u8,
    pub result: RollResult,
}

/// Latest marker in `text`. Any defect rejects the whole marker.
pub fn parse_marker(text: &str) -> Option<OutcomeDecision> {
    let raw = MARKER_RE
        .captures_iter(text)
        .last()
        .and_then(|c| c.get(1))?
        .as_str();
    let payload: Value = serde_json::from_str(raw.trim()).ok()?;
    let object = payload.as_object()?;

    let chance = object.get("chance").and_then(parse_chance)?;
    let result = object
        .get("result")
        .and_then(Value::as_str)
        .and_then(RollResult::parse)?;
    let interaction = match object.get("interaction") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if interaction.is_empty() {
        return None;
    }

    Some(OutcomeDecision {
        interaction,
        chance: chance.clamp(0, 100) as u8,
        result,
    })
}

/// Integers, floats (truncated) and numeric strings.
fn parse_chance(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}

/// Remove every marker line, including its line break.
pub fn strip_markers(text: &str) -> String {
    MARKER_LINE_RE.replace_all(text, "").into_owned()
}

pub fn format_tag(chance: u8, result: RollResult) -> String {
    format!("[动作检定： {}% {}]", chance, result.label())
}

/// Planner instructions appended at Point A.
pub fn instruction_block(
    platform: &str,
    user_id: &str,
    score: f64,
    level: &str,
    show_tag: bool,
) -> String {
    let note = if show_tag {
        "A result tag is added to the start of the final reply automatically; do not repeat it in the reply text."
    } else {
        "Result tags are currently not shown to the user."
    };
    format!(
        "{SENTINEL}\n\
         [Action check protocol]\n\
         When the user is attempting a direct physical interaction with you (a hug, a kiss, a head pat and so on):\n\
         1) Choose both reply and action_check in the same plan; never action_check alone.\n\
         2) Decide interaction (the action name), chance (0-100 integer success rate, weighing base odds, affection and context) and result (success or fail, your own decision; do not leave it to chance).\n\
         3) Append exactly one line at the end of your reasoning, before any JSON block:\n   \
         {MARKER_PREFIX} {{\"interaction\":\"hug\",\"chance\":80,\"result\":\"fail\"}}\n   \
         The line must be strict single-line JSON. Emit no other {MARKER_PREFIX} line.\n\
         \n\
         Current user:\n\
         - platform: {platform}\n\
         - user_id: {user_id}\n\
         - affection_score: {score:.1}/100\n\
         - affection_level: {level}\n\
         \n\
         Note: {note}"
    )
}

/// Outcome summary appended at Point B for the renderer.
pub fn result_block(decision: &OutcomeDecision) -> String {
    format!(
        "{SENTINEL}\n\
         [Action check result]\n\
         Action: {}\n\
         Success chance: {}%\n\
         Result: {}\n\
         \n\
         Use this only as guidance for the reply. Never output {MARKER_PREFIX} or any other internal marker.",
        decision.interaction,
        decision.chance,
        decision.result.label()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(json: &str) -> String {
        format!("thinking about it\n{} {}\n", MARKER_PREFIX, json)
    }

    #[test]
    fn synonyms_normalise_and_chance_is_kept() {
        for (raw, expected) in [
            ("ok", RollResult::Success),
            ("PASS", RollResult::Success),
            ("passed", RollResult::Success),
            ("success", RollResult::Success),
            ("fail", RollResult::Fail),
            ("Failed", RollResult::Fail),
            ("failure", RollResult::Fail),
        ] {
            for chance in [0u8, 37, 100] {
                let text = marker(&format!(
                    r#"{{"interaction":"pat","chance":{},"result":"{}"}}"#,
                    chance, raw
                ));
                let d = parse_marker(&text).unwrap();
                assert_eq!(d.chance, chance);
                assert_eq!(d.result, expected);
                assert_eq!(d.interaction, "pat");
            }
        }
    }

    #[test]
    fn chance_is_clamped_and_coerced() {
        let high = parse_marker(&marker(r#"{"interaction":"hug","chance":150,"result":"ok"}"#));
        assert_eq!(high.unwrap().chance, 100);
        let low = parse_marker(&marker(r#"{"interaction":"hug","chance":-5,"result":"ok"}"#));
        assert_eq!(low.unwrap().chance, 0);
        let float = parse_marker(&marker(r#"{"interaction":"hug","chance":79.9,"result":"ok"}"#));
        assert_eq!(float.unwrap().chance, 79);
        let string = parse_marker(&marker(r#"{"interaction":"hug","chance":"65","result":"ok"}"#));
        assert_eq!(string.unwrap().chance, 65);
    }

    #[test]
    fn defects_reject_the_whole_marker() {
        for json in [
            r#"{"interaction":"hug","chance":80,"result":"maybe"}"#,
            r#"{"interaction":"  ","chance":80,"result":"ok"}"#,
            r#"{"chance":80,"result":"ok"}"#,
            r#"{"interaction":"hug","chance":"lots","result":"ok"}"#,
            r#"{"interaction":"hug","result":"ok"}"#,
            r#"{"interaction":"hug","chance":80,"result":"ok""#,
        ] {
            assert!(parse_marker(&marker(json)).is_none(), "{json}");
        }
        assert!(parse_marker("no marker here").is_none());
    }

    #[test]
    fn last_marker_wins() {
        let text = format!(
            "{p} {{\"interaction\":\"hug\",\"chance\":10,\"result\":\"fail\"}}\nmore\n{p} {{\"interaction\":\"kiss\",\"chance\":90,\"result\":\"ok\"}}",
            p = MARKER_PREFIX
        );
        let d = parse_marker(&text).unwrap();
        assert_eq!(d.interaction, "kiss");
        assert_eq!(d.result, RollResult::Success);
    }

    #[test]
    fn strip_removes_marker_lines_only() {
        let text = format!(
            "line one\n  {} {{\"interaction\":\"hug\"}}\nline two\n{} x",
            MARKER_PREFIX, MARKER_PREFIX
        );
        assert_eq!(strip_markers(&text), "line one\nline two\n");
    }

    #[test]
    fn tag_format() {
        assert_eq!(format_tag(80, RollResult::Fail), "[动作检定： 80% 失败]");
        assert!(format_tag(5, RollResult::Success).starts_with(TAG_GUARD));
    }

    #[test]
    fn blocks_carry_the_sentinel() {
        let block = instruction_block("qq", "42", 50.0, "neutral", true);
        assert!(block.starts_with(SENTINEL));
        assert!(block.contains("affection_score: 50.0/100"));
        let decision = OutcomeDecision {
            interaction: "hug".into(),
            chance: 80,
            result: RollResult::Fail,
        };
        let block = result_block(&decision);
        assert!(block.contains("Success chance: 80%"));
        assert!(block.contains("Result: 失败"));
    }
}
