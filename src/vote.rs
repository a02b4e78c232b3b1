use actix_web::{http::header, web, HttpRequest, HttpResponse, Result};
use anyhow::anyhow;
use serde::Deserialize;

use crate::api::ApiClient;
use crate::auth::{gate_site, start_login, AuthState, GateDecision};
use crate::error::UserError;
use crate::identity::IdentityClient;
use crate::poll::Poll;
use crate::session::{AbortGuard, Session, SessionStore};

#[derive(Deserialize, Debug)]
pub struct VoteQuery {
    poll: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct SelectParams {
    poll: Option<String>,
    option: String,
}

#[derive(Deserialize, Debug)]
pub struct SubmitParams {
    poll: Option<String>,
}

/// The configured poll, or the one named by `?poll=`
fn requested_poll(poll: &Poll, requested: Option<&str>) -> Poll {
    match requested.map(str::trim).filter(|p| !p.is_empty()) {
        Some(id) => poll.with_id(id),
        None => poll.clone(),
    }
}

fn vote_path(poll: &Poll) -> String {
    let id: String = url::form_urlencoded::byte_serialize(poll.id.as_bytes()).collect();
    format!("/user-vote?poll={}", id)
}

fn see_other(location: String) -> HttpResponse {
    HttpResponse::SeeOther()
        .insert_header((header::LOCATION, location))
        .finish()
}

/// Vote page, guarded by the session's auth gate
pub async fn handle_vote(
    req: HttpRequest,
    query: web::Query<VoteQuery>,
    poll: web::Data<Poll>,
    sessions: web::Data<SessionStore>,
    identity: web::Data<IdentityClient>,
) -> Result<HttpResponse> {
    let poll = requested_poll(&poll, query.poll.as_deref());
    let (id, fresh) = sessions.find_or_create(&req);

    let (decision, content) = sessions
        .with(&id, |s| {
            let state = s.auth_state();
            let decision = s.gate.observe(state);
            let content = match decision {
                GateDecision::Render => {
                    let voter = s
                        .user
                        .as_ref()
                        .map(|u| u.profile.display_name().to_string())
                        .unwrap_or_default();
                    s.panel(&poll).voting_site(&poll, &voter)
                }
                other => gate_site(other),
            };
            (decision, content)
        })
        .ok_or_else(|| UserError::InternalError(anyhow!("Session {} vanished", id)))?;

    if decision == GateDecision::Redirect {
        return start_login(&sessions, &identity, &id, &vote_path(&poll)).await;
    }

    let content = content.map_err(UserError::from)?;
    let mut res = HttpResponse::Ok();
    if fresh {
        res.cookie(sessions.cookie(&id));
    }
    Ok(res.content_type("text/html; charset=utf-8").body(content))
}

/// Changes the pending option, no request is made to the API
pub async fn handle_select(
    req: HttpRequest,
    params: web::Form<SelectParams>,
    poll: web::Data<Poll>,
    sessions: web::Data<SessionStore>,
) -> Result<HttpResponse> {
    let poll = requested_poll(&poll, params.poll.as_deref());
    if let Some(id) = sessions.find(&req) {
        sessions
            .with(&id, |s| match s.auth_state() {
                AuthState::Authenticated => s.panel(&poll).select(&params.option),
                _ => Ok(()),
            })
            .transpose()?;
    }
    Ok(see_other(vote_path(&poll)))
}

/// Sends the pending option. While a submission is outstanding, or after a
/// successful one, nothing is sent.
pub async fn handle_submit(
    req: HttpRequest,
    params: web::Form<SubmitParams>,
    poll: web::Data<Poll>,
    sessions: web::Data<SessionStore>,
    api: web::Data<ApiClient>,
) -> Result<HttpResponse> {
    let poll = requested_poll(&poll, params.poll.as_deref());
    let id = match sessions.find(&req) {
        Some(id) => id,
        None => return Ok(see_other(vote_path(&poll))),
    };

    let started = sessions
        .with(&id, |s| {
            if s.auth_state() != AuthState::Authenticated {
                return None;
            }
            let credential = s.user.as_ref().map(|u| u.id_token.clone());
            s.panel(&poll)
                .begin_submit()
                .map(|submission| (submission, credential))
        })
        .flatten();

    match started {
        Some((submission, credential)) => {
            let guard = AbortGuard::new(&sessions, &id, |s: &mut Session| {
                s.panel(&poll).interrupt()
            });
            let result = api.submit_vote(&submission, credential.as_deref()).await;
            guard.disarm();
            match &result {
                Err(e) if e.is_retryable() => {
                    log::warn!("Vote on poll {} not recorded: {}", submission.poll_id, e)
                }
                Err(e) => log::info!("Vote on poll {} refused: {}", submission.poll_id, e),
                Ok(()) => (),
            }
            sessions.with(&id, |s| s.panel(&poll).finish(result));
        }
        None => log::debug!("Submission ignored for session {}", id),
    }

    Ok(see_other(vote_path(&poll)))
}
