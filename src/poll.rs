use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Options every poll of the demo is created with, as (code, label)
pub const DEFAULT_OPTIONS: [(&str, &str); 3] = [("A", "Python"), ("B", "C++"), ("C", "JavaScript")];

pub const DEFAULT_QUESTION: &str = "Which programming language do you prefer?";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOption {
    /// Code sent to the API, e.g. "A"
    pub code: String,
    /// Human readable name shown instead of the code
    pub label: String,
}

/// A poll as seen by the client. The question and the option set are defined
/// by the backend and never change while the server runs.
#[derive(Debug, Clone)]
pub struct Poll {
    pub id: String,
    pub question: String,
    pub options: Vec<PollOption>,
}

impl Poll {
    pub fn new(id: impl Into<String>, question: impl Into<String>) -> Poll {
        Poll {
            id: id.into(),
            question: question.into(),
            options: DEFAULT_OPTIONS
                .iter()
                .map(|(code, label)| PollOption {
                    code: code.to_string(),
                    label: label.to_string(),
                })
                .collect(),
        }
    }

    /// Same poll, different id. Used when the vote page is opened with `?poll=`
    pub fn with_id(&self, id: &str) -> Poll {
        Poll {
            id: id.to_string(),
            ..self.clone()
        }
    }

    pub fn has_option(&self, code: &str) -> bool {
        self.options.iter().any(|o| o.code == code)
    }

    /// Display label for an option code, falls back to the code itself
    pub fn label<'a>(&'a self, code: &'a str) -> &'a str {
        self.options
            .iter()
            .find(|o| o.code == code)
            .map(|o| o.label.as_str())
            .unwrap_or(code)
    }

    pub fn first_option(&self) -> &str {
        self.options.first().map(|o| o.code.as_str()).unwrap_or("")
    }
}

/// Aggregate state of a poll as returned by `GET /polls/{id}/results`.
/// Any field the backend leaves out takes its empty value.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ResultsSnapshot {
    pub total: u64,
    pub counts: HashMap<String, u64>,
    /// Arrival order, most recent last
    pub votes: Vec<VoteRecord>,
}

impl ResultsSnapshot {
    pub fn count(&self, option: &str) -> u64 {
        self.counts.get(option).copied().unwrap_or(0)
    }
}

/// A single vote as reported by the backend
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct VoteRecord {
    pub voter_id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub option: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: Option<Timestamp>,
}

impl VoteRecord {
    /// Who cast the vote: voterId, then email, then name
    pub fn voter(&self) -> &str {
        self.voter_id
            .as_deref()
            .or(self.email.as_deref())
            .or(self.name.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or("Anonymous")
    }
}

/// `createdAt` comes either as an ISO-8601 string or as epoch milliseconds
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Timestamp {
    Millis(i64),
    Text(String),
}

impl Timestamp {
    pub fn to_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        match self {
            Timestamp::Millis(ms) => chrono::DateTime::from_timestamp_millis(*ms),
            Timestamp::Text(s) => chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|d| d.with_timezone(&chrono::Utc)),
        }
    }
}

// A malformed timestamp should not make the whole snapshot unreadable
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(Timestamp::Text(s)),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(Timestamp::Millis),
        _ => None,
    })
}

/// Body of `POST /votes`
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoteSubmission {
    pub poll_id: String,
    pub option: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_defaults() {
        let snapshot: ResultsSnapshot = serde_json::from_str("{}").unwrap();
        assert_eq!(snapshot, ResultsSnapshot::default());

        let snapshot: ResultsSnapshot = serde_json::from_str(r#"{"total":3}"#).unwrap();
        assert_eq!(snapshot.total, 3);
        assert!(snapshot.counts.is_empty());
        assert!(snapshot.votes.is_empty());
    }

    #[test]
    fn test_vote_record_voter() {
        let v: VoteRecord =
            serde_json::from_str(r#"{"email":"a@b.c","name":"Ann","option":"A"}"#).unwrap();
        assert_eq!(v.voter(), "a@b.c");
        let v: VoteRecord = serde_json::from_str(r#"{"voterId":"u-1","email":"a@b.c"}"#).unwrap();
        assert_eq!(v.voter(), "u-1");
        let v: VoteRecord = serde_json::from_str(r#"{"option":"B"}"#).unwrap();
        assert_eq!(v.voter(), "Anonymous");
    }

    #[test]
    fn test_timestamps() {
        let v: VoteRecord =
            serde_json::from_str(r#"{"createdAt":"2024-05-01T10:00:00Z"}"#).unwrap();
        let dt = v.created_at.unwrap().to_datetime().unwrap();
        assert_eq!(dt.timestamp(), 1714557600);

        let v: VoteRecord = serde_json::from_str(r#"{"createdAt":1714557600000}"#).unwrap();
        let dt = v.created_at.unwrap().to_datetime().unwrap();
        assert_eq!(dt.timestamp(), 1714557600);

        let v: VoteRecord = serde_json::from_str(r#"{"createdAt":true}"#).unwrap();
        assert_eq!(v.created_at, None);
    }

    #[test]
    fn test_submission_body() {
        let body = serde_json::to_value(VoteSubmission {
            poll_id: "poll-1".into(),
            option: "B".into(),
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"pollId": "poll-1", "option": "B"}));
    }

    #[test]
    fn test_poll_labels() {
        let poll = Poll::new("poll-1", DEFAULT_QUESTION);
        assert_eq!(poll.label("B"), "C++");
        assert_eq!(poll.label("Z"), "Z");
        assert!(poll.has_option("C"));
        assert!(!poll.has_option("D"));
        assert_eq!(poll.with_id("poll-2").id, "poll-2");
    }
}
