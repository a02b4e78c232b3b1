use actix_web::cookie::Cookie;
use actix_web::{http::header, web, HttpRequest, HttpResponse, Result};
use askama::Template;
use serde::Deserialize;

use crate::identity::{self, IdentityClient, PendingLogin};
use crate::session::{AbortGuard, Session, SessionStore, SESSION_COOKIE};
use crate::templates::{GateTemplate, ReturnTemplate};
use crate::error::UserError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// The identity layer has not settled yet
    Loading,
    Authenticated,
    Unauthenticated,
}

/// What a page guarded by [`AuthGate`] should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Show the waiting placeholder, do nothing else
    Wait,
    /// Start the sign-in redirect
    Redirect,
    /// A redirect was already started for this state, only show the placeholder
    Redirecting,
    /// Show the protected content
    Render,
}

/// Guards protected pages.
///
/// The sign-in redirect is tied to the edge into `Unauthenticated`, not to the
/// state itself: observing `Unauthenticated` twice in a row redirects once.
#[derive(Debug, Default)]
pub struct AuthGate {
    last: Option<AuthState>,
}

impl AuthGate {
    pub fn observe(&mut self, state: AuthState) -> GateDecision {
        let previous = self.last.replace(state);
        match state {
            AuthState::Loading => GateDecision::Wait,
            AuthState::Authenticated => GateDecision::Render,
            AuthState::Unauthenticated if previous == Some(AuthState::Unauthenticated) => {
                GateDecision::Redirecting
            }
            AuthState::Unauthenticated => GateDecision::Redirect,
        }
    }
}

pub fn gate_site(decision: GateDecision) -> Result<String, askama::Error> {
    let (title, sub) = match decision {
        GateDecision::Wait => ("Preparing login", "Checking your session…"),
        _ => (
            "Redirecting to login",
            "Please wait, you’ll be back shortly.",
        ),
    };
    GateTemplate {
        title,
        sub,
        waiting: decision == GateDecision::Wait,
    }
    .render()
}

fn error_site(err: &identity::Error) -> Result<HttpResponse> {
    let content = ReturnTemplate {
        heading: &format!("Auth error: {}", err),
        links: &[("Try again", "/auth/login"), ("Live results", "/")],
    }
    .render()
    .map_err(UserError::from)?;
    return_html!(content)
}

/// Stores a new login on the session and sends the browser to the provider
pub async fn start_login(
    sessions: &SessionStore,
    identity: &IdentityClient,
    id: &str,
    return_to: &str,
) -> Result<HttpResponse> {
    let login = PendingLogin::new(return_to);
    let url = match identity.authorize_url(&login).await {
        Ok(url) => url,
        Err(e) => {
            log::warn!("Can't start login: {}", e);
            // Keep the session, a retry must not start another one
            let mut res = error_site(&e)?;
            res.add_cookie(&sessions.cookie(id))?;
            return Ok(res);
        }
    };
    sessions.with(id, |s| s.login = Some(login));

    let placeholder = gate_site(GateDecision::Redirect).map_err(UserError::from)?;
    Ok(HttpResponse::Found()
        .insert_header((header::LOCATION, url.as_str()))
        .cookie(sessions.cookie(id))
        .content_type("text/html; charset=utf-8")
        .body(placeholder))
}

/// Explicit sign-in, always redirects
pub async fn handle_login(
    req: HttpRequest,
    sessions: web::Data<SessionStore>,
    identity: web::Data<IdentityClient>,
) -> Result<HttpResponse> {
    let (id, _) = sessions.find_or_create(&req);
    start_login(&sessions, &identity, &id, "/user-vote").await
}

#[derive(Deserialize, Debug)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// The provider sends the browser back here after sign-in
pub async fn handle_callback(
    req: HttpRequest,
    params: web::Query<CallbackParams>,
    sessions: web::Data<SessionStore>,
    identity: web::Data<IdentityClient>,
) -> Result<HttpResponse> {
    let params = params.into_inner();
    let id = match sessions.find(&req) {
        Some(id) => id,
        None => return error_site(&identity::Error::NoPendingLogin),
    };

    let login = sessions.with(&id, |s| s.login.take()).flatten();
    let login = match (login, params.error) {
        (_, Some(error)) => {
            let message = params.error_description.unwrap_or(error);
            return error_site(&identity::Error::Provider(message));
        }
        (None, None) => return error_site(&identity::Error::NoPendingLogin),
        (Some(login), None) if params.state.as_deref() != Some(login.state.as_str()) => {
            return error_site(&identity::Error::StateMismatch);
        }
        (Some(login), None) => login,
    };
    let code = match params.code {
        Some(code) => code,
        None => return error_site(&identity::Error::Provider("missing code".to_string())),
    };

    sessions.with(&id, |s| {
        s.exchanging = true;
        let state = s.auth_state();
        s.gate.observe(state);
    });
    let guard = AbortGuard::new(&sessions, &id, |s: &mut Session| s.exchanging = false);
    let result = identity.exchange(&code, &login).await;
    guard.disarm();
    let result = sessions.with(&id, move |s| {
        s.exchanging = false;
        result.map(|user| {
            log::info!("Signed in: {}", user.profile.display_name());
            s.user = Some(user);
        })
    });

    match result {
        Some(Ok(())) => Ok(HttpResponse::SeeOther()
            .insert_header((header::LOCATION, login.return_to))
            .finish()),
        Some(Err(e)) => {
            log::warn!("Login failed: {}", e);
            error_site(&e)
        }
        // The session expired while the code was exchanged
        None => error_site(&identity::Error::NoPendingLogin),
    }
}

pub async fn handle_logout(
    req: HttpRequest,
    sessions: web::Data<SessionStore>,
    identity: web::Data<IdentityClient>,
) -> Result<HttpResponse> {
    let user = sessions
        .find(&req)
        .and_then(|id| sessions.remove(&id))
        .and_then(|s| s.user);
    let target = identity
        .logout_url(user.as_ref().map(|u| u.id_token.as_str()))
        .await
        .map(String::from)
        .unwrap_or_else(|| "/".to_string());

    let mut removal = Cookie::named(SESSION_COOKIE);
    removal.set_path("/");
    let mut res = HttpResponse::SeeOther()
        .insert_header((header::LOCATION, target))
        .finish();
    res.add_removal_cookie(&removal)?;
    Ok(res)
}
