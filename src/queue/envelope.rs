// Job envelope: the `{id, fid, opts}` record carried through the queues

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Why a raw queue entry could not be turned into an envelope.
/// Entries that fail to parse are discarded, never retried.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope has an empty {0}")]
    Empty(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub fid: String,
    #[serde(default)]
    pub opts: Map<String, Value>,
}

impl Envelope {
    /// New envelope with a fresh job id
    pub fn new(fid: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            fid: fid.into(),
            opts: Map::new(),
        }
    }

    pub fn with_opts(mut self, opts: Map<String, Value>) -> Self {
        self.opts = opts;
        self
    }

    /// Envelope for the next stage: same job id and file id, new opts
    pub fn follow_on(&self, opts: Map<String, Value>) -> Self {
        Self {
            id: self.id.clone(),
            fid: self.fid.clone(),
            opts,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
        let env: Envelope = serde_json::from_str(raw)?;
        if env.id.is_empty() {
            return Err(EnvelopeError::Empty("id"));
        }
        if env.fid.is_empty() {
            return Err(EnvelopeError::Empty("fid"));
        }
        Ok(env)
    }

    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.opts.get(key).and_then(Value::as_str)
    }

    /// Truthiness the way submitters send flags: bools, 0/1, "true"/"yes"
    pub fn opt_flag(&self, key: &str) -> bool {
        match self.opts.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(false),
            Some(Value::String(s)) => matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"),
            _ => false,
        }
    }

    pub fn opt_i64(&self, key: &str) -> Option<i64> {
        match self.opts.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_envelope() {
        let raw = r#"{"id":"j1","fid":"abc","opts":{"profile":"720p","no_subs":true}}"#;
        let env = Envelope::parse(raw).unwrap();
        assert_eq!(env.id, "j1");
        assert_eq!(env.fid, "abc");
        assert_eq!(env.opt_str("profile"), Some("720p"));
        assert!(env.opt_flag("no_subs"));
    }

    #[test]
    fn test_missing_opts_defaults_to_empty() {
        let env = Envelope::parse(r#"{"id":"j1","fid":"abc"}"#).unwrap();
        assert!(env.opts.is_empty());
    }

    #[test]
    fn test_malformed_entries_are_rejected() {
        assert!(matches!(Envelope::parse("{not json"), Err(EnvelopeError::Json(_))));
        assert!(matches!(Envelope::parse(r#"{"id":"j1"}"#), Err(EnvelopeError::Json(_))));
        assert!(matches!(
            Envelope::parse(r#"{"id":"","fid":"abc"}"#),
            Err(EnvelopeError::Empty("id"))
        ));
    }

    #[test]
    fn test_follow_on_keeps_ids() {
        let first = Envelope::new("abc");
        let mut opts = Map::new();
        opts.insert("realpath".into(), json!("/srv/in/a.mkv"));
        let next = first.follow_on(opts);
        assert_eq!(next.id, first.id);
        assert_eq!(next.fid, "abc");
        assert_eq!(next.opt_str("realpath"), Some("/srv/in/a.mkv"));
        assert!(first.opts.is_empty());
    }

    #[test]
    fn test_opt_i64_accepts_strings() {
        let env = Envelope::new("abc").with_opts(
            json!({"vscap": "120", "neg": -1}).as_object().cloned().unwrap(),
        );
        assert_eq!(env.opt_i64("vscap"), Some(120));
        assert_eq!(env.opt_i64("neg"), Some(-1));
        assert_eq!(env.opt_i64("missing"), None);
    }
}
