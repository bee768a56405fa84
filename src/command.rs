// =============================================================================
// Command Protocol — Newline-delimited JSON over stdin/stdout
// =============================================================================
//
// One JSON object per line in, one JSON reply per line out:
//
//   {"command":"score",   "features":[...], "market":{...}, ...}
//   {"command":"outcome", "prediction_id":"...", "timeframe":"15m", ...}
//   {"command":"metrics"}
//   {"command":"snapshot"}
//
// Replies are {"ok":true,"result":...} or {"ok":false,"error":"..."}.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine_state::EngineState;
use crate::health::OutcomeRecord;
use crate::pipeline::CycleRequest;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Score(CycleRequest),
    Outcome(OutcomeRecord),
    Metrics,
    Snapshot,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Score(_) => "score",
            Self::Outcome(_) => "outcome",
            Self::Metrics => "metrics",
            Self::Snapshot => "snapshot",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    fn success(value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => Self {
                ok: true,
                result: Some(v),
                error: None,
            },
            Err(e) => Self::failure(format!("failed to serialise reply: {e}")),
        }
    }

    fn failure(message: String) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(message),
        }
    }

    /// Single-line JSON rendering.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"ok":false,"error":"reply encoding failed: {e}"}}"#))
    }
}

/// Parse and execute one input line.  Blank lines yield `None`.
pub fn handle_line(engine: &EngineState, line: &str) -> Option<Reply> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let reply = match serde_json::from_str::<Command>(line) {
        Ok(cmd) => execute(engine, cmd),
        Err(e) => {
            warn!(error = %e, "unparseable command line");
            Reply::failure(format!("invalid command: {e}"))
        }
    };
    Some(reply)
}

pub fn execute(engine: &EngineState, command: Command) -> Reply {
    debug!(command = command.name(), "executing command");
    match command {
        Command::Score(request) => Reply::success(engine.score_cycle(&request)),
        Command::Outcome(record) => match engine.record_outcome(&record) {
            Ok(receipt) => Reply::success(receipt),
            Err(e) => Reply::failure(format!("{e:#}")),
        },
        Command::Metrics => Reply::success(engine.metrics()),
        Command::Snapshot => Reply::success(engine.snapshot()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_config::EngineConfig;

    const OUTCOME: &str = r#"{"command":"outcome","prediction_id":"abc-15m","timeframe":"15m",
        "side":"CALL","entry_price":100.0,"predicted_median":101.0,"predicted_sigma":1.0,
        "p50":{"lower":100.3,"upper":101.7},"p80":{"lower":99.7,"upper":102.3},
        "p95":{"lower":99.0,"upper":103.0},"realized_price":101.2,"realized_sigma":1.1,
        "signal_votes":[{"source":"macd","value":1.2}]}"#;

    fn one_line(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn score_command_returns_report() {
        let engine = EngineState::new(EngineConfig::default());
        let line = r#"{"command":"score","features":[{"timeframe":"5m","price":100.0,"rsi":25.0,"adx":15.0,"bb_width_pct":2.5,"atr_pct":0.5}],"market":{"vix":18.0}}"#;
        let reply = handle_line(&engine, line).unwrap();
        assert!(reply.ok, "{:?}", reply.error);
        let result = reply.result.unwrap();
        assert!(result["id"].is_string());
        assert_eq!(result["timeframes"][0]["timeframe"], "5m");
    }

    #[test]
    fn outcome_then_replay() {
        let engine = EngineState::new(EngineConfig::default());
        let line = one_line(OUTCOME);
        let first = handle_line(&engine, &line).unwrap();
        assert!(first.ok, "{:?}", first.error);
        let second = handle_line(&engine, &line).unwrap();
        assert!(!second.ok);
        assert!(second.error.unwrap().contains("duplicate"));
    }

    #[test]
    fn metrics_and_snapshot_commands() {
        let engine = EngineState::new(EngineConfig::default());
        let m = handle_line(&engine, r#"{"command":"metrics"}"#).unwrap();
        assert!(m.ok);
        assert_eq!(m.result.unwrap()["cycles_scored"], 0);
        let s = handle_line(&engine, r#"{"command":"snapshot"}"#).unwrap();
        assert!(s.ok);
        assert_eq!(s.result.unwrap()["version"], 1);
    }

    #[test]
    fn bad_input_is_reported_not_fatal() {
        let engine = EngineState::new(EngineConfig::default());
        assert!(handle_line(&engine, "   ").is_none());
        let r = handle_line(&engine, r#"{"command":"launch"}"#).unwrap();
        assert!(!r.ok);
        let r = handle_line(&engine, "not json").unwrap();
        assert!(!r.ok);
        assert!(r.to_line().starts_with(r#"{"ok":false"#));
    }
}
