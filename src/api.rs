//! Calls to the voting API.
//!
//! The API lives behind a managed gateway, this module only knows the two
//! routes the front-end needs: reading the results of a poll and casting a vote.

use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use url::Url;

use crate::error::ClientError;
use crate::poll::{ResultsSnapshot, VoteSubmission};

#[derive(Clone)]
pub struct ApiClient {
    base: String,
    client: Client,
}

impl ApiClient {
    /// `timeout` of `None` keeps the transport's default (no deadline)
    pub fn new(base: &str, timeout: Option<Duration>) -> Result<ApiClient, reqwest::Error> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(ApiClient {
            base: base.trim_end_matches('/').to_string(),
            client: builder.build()?,
        })
    }

    fn results_url(&self, poll_id: &str) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.base)
            .map_err(|e| ClientError::Fetch(format!("Invalid API base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Fetch("Invalid API base URL".to_string()))?
            .pop_if_empty()
            .extend(["polls", poll_id, "results"]);
        Ok(url)
    }

    /// Reads the aggregate state of a poll. Never retries, the refresh timer
    /// will simply call again on its next tick.
    pub async fn fetch_results(&self, poll_id: &str) -> Result<ResultsSnapshot, ClientError> {
        if poll_id.is_empty() {
            return Err(ClientError::Fetch("Poll id is empty".to_string()));
        }
        let url = self.results_url(poll_id)?;

        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ClientError::Fetch(e.to_string()))?;
        let status = res.status();
        let body = res.bytes().await.unwrap_or_default();

        if !status.is_success() {
            return Err(ClientError::Fetch(error_message(
                &body,
                format!("HTTP {}", status.as_u16()),
            )));
        }

        // A success that is not JSON at all still means "no data yet"
        let value: Value = match serde_json::from_slice(&body) {
            Ok(Value::Null) => return Ok(ResultsSnapshot::default()),
            Ok(value) => value,
            Err(e) => {
                log::warn!("Unreadable results body for poll {}: {}", poll_id, e);
                return Ok(ResultsSnapshot::default());
            }
        };
        // JSON of the wrong shape must not replace good data with zeros
        serde_json::from_value(value)
            .map_err(|e| ClientError::Fetch(format!("Malformed results: {}", e)))
    }

    /// Casts one vote. A missing or blank credential fails before anything is sent.
    pub async fn submit_vote(
        &self,
        submission: &VoteSubmission,
        credential: Option<&str>,
    ) -> Result<(), ClientError> {
        let token = credential
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ClientError::MissingCredential)?;

        let res = self
            .client
            .post(format!("{}/votes", self.base))
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .json(submission)
            .send()
            .await
            .map_err(|e| ClientError::Submission(e.to_string()))?;
        let status = res.status();

        if status.is_success() {
            log::info!(
                "Vote recorded on poll {} for option {}",
                submission.poll_id,
                submission.option
            );
            return Ok(());
        }
        if status == StatusCode::CONFLICT {
            return Err(ClientError::AlreadyVoted);
        }

        let body = res.bytes().await.unwrap_or_default();
        Err(ClientError::Submission(error_message(
            &body,
            format!("Error {}", status.as_u16()),
        )))
    }
}

/// Picks the `error` field of a JSON error body, then `message`, then the fallback
fn error_message(body: &[u8], fallback: String) -> String {
    let value: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => return fallback,
    };
    ["error", "message"]
        .iter()
        .filter_map(|key| value.get(key)?.as_str())
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::Server) -> ApiClient {
        ApiClient::new(&server.url(), None).unwrap()
    }

    fn submission(option: &str) -> VoteSubmission {
        VoteSubmission {
            poll_id: "poll-1".into(),
            option: option.into(),
        }
    }

    #[test]
    fn test_error_message() {
        let fallback = || "HTTP 500".to_string();
        assert_eq!(error_message(br#"{"error":"boom","message":"m"}"#, fallback()), "boom");
        assert_eq!(error_message(br#"{"message":"m"}"#, fallback()), "m");
        assert_eq!(error_message(br#"{"other":1}"#, fallback()), "HTTP 500");
        assert_eq!(error_message(b"<html>", fallback()), "HTTP 500");
        assert_eq!(error_message(b"", fallback()), "HTTP 500");
    }

    #[tokio::test]
    async fn test_fetch_results() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/polls/poll-1/results")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"total":3,"counts":{"A":1,"B":2,"C":0},
                    "votes":[{"option":"A","createdAt":"2024-05-01T10:00:00Z"},
                             {"option":"B","createdAt":"2024-05-01T10:00:05Z"}]}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let snapshot = client(&server).fetch_results("poll-1").await.unwrap();
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.count("B"), 2);
        assert_eq!(snapshot.votes.len(), 2);
        _m.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_results_encodes_id() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/polls/a%2Fb/results")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let snapshot = client(&server).fetch_results("a/b").await.unwrap();
        assert_eq!(snapshot, ResultsSnapshot::default());
    }

    #[tokio::test]
    async fn test_fetch_results_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/polls/typo/results")
            .with_status(200)
            .with_body(r#"{"total":"3","counts":{"A":3}}"#)
            .create_async()
            .await;
        let _m2 = server
            .mock("GET", "/polls/html/results")
            .with_status(200)
            .with_body("<html>ok</html>")
            .create_async()
            .await;

        let api = client(&server);
        match api.fetch_results("typo").await {
            Err(ClientError::Fetch(message)) => assert!(message.starts_with("Malformed results")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            api.fetch_results("html").await,
            Ok(ResultsSnapshot::default())
        );
    }

    #[tokio::test]
    async fn test_fetch_results_errors() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/polls/missing/results")
            .with_status(404)
            .with_body(r#"{"message":"Poll not found"}"#)
            .create_async()
            .await;
        let _m2 = server
            .mock("GET", "/polls/broken/results")
            .with_status(502)
            .with_body("Bad Gateway")
            .create_async()
            .await;

        let api = client(&server);
        assert_eq!(
            api.fetch_results("missing").await,
            Err(ClientError::Fetch("Poll not found".into()))
        );
        assert_eq!(
            api.fetch_results("broken").await,
            Err(ClientError::Fetch("HTTP 502".into()))
        );
    }

    #[tokio::test]
    async fn test_submit_without_credential() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/votes")
            .expect(0)
            .create_async()
            .await;

        let api = client(&server);
        assert_eq!(
            api.submit_vote(&submission("A"), None).await,
            Err(ClientError::MissingCredential)
        );
        assert_eq!(
            api.submit_vote(&submission("A"), Some("   ")).await,
            Err(ClientError::MissingCredential)
        );
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_vote() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/votes")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::Json(
                serde_json::json!({"pollId": "poll-1", "option": "B"}),
            ))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .expect(1)
            .create_async()
            .await;

        let api = client(&server);
        assert_eq!(api.submit_vote(&submission("B"), Some(" tok ")).await, Ok(()));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_conflict_and_failure() {
        let mut server = mockito::Server::new_async().await;
        let _conflict = server
            .mock("POST", "/votes")
            .match_body(Matcher::PartialJson(serde_json::json!({"option": "A"})))
            .with_status(409)
            .with_body(r#"{"error":"duplicate"}"#)
            .create_async()
            .await;
        let _failure = server
            .mock("POST", "/votes")
            .match_body(Matcher::PartialJson(serde_json::json!({"option": "C"})))
            .with_status(500)
            .create_async()
            .await;

        let api = client(&server);
        let conflict = api.submit_vote(&submission("A"), Some("tok")).await;
        let failure = api.submit_vote(&submission("C"), Some("tok")).await;
        assert_eq!(conflict, Err(ClientError::AlreadyVoted));
        assert_eq!(failure, Err(ClientError::Submission("Error 500".into())));
        assert_ne!(
            conflict.unwrap_err().to_string(),
            failure.unwrap_err().to_string()
        );
    }
}
