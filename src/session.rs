use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use actix_web::cookie::{Cookie, SameSite};
use actix_web::HttpRequest;

use crate::auth::{AuthGate, AuthState};
use crate::identity::{PendingLogin, User};
use crate::panel::VotePanel;
use crate::poll::Poll;
use crate::util;

pub const SESSION_COOKIE: &str = "livepoll_session";

/// Everything kept for one browser between requests
#[derive(Debug)]
pub struct Session {
    pub gate: AuthGate,
    pub user: Option<User>,
    pub login: Option<PendingLogin>,
    /// Set while the callback's code is being exchanged
    pub exchanging: bool,
    panel: Option<VotePanel>,
    last_seen: Instant,
}

impl Session {
    fn new(now: Instant) -> Session {
        Session {
            gate: AuthGate::default(),
            user: None,
            login: None,
            exchanging: false,
            panel: None,
            last_seen: now,
        }
    }

    pub fn auth_state(&self) -> AuthState {
        let now = chrono::Utc::now().timestamp();
        if self.exchanging {
            AuthState::Loading
        } else if self.user.as_ref().map(|u| !u.is_expired(now)).unwrap_or(false) {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        }
    }

    /// The vote panel of `poll`; opening another poll starts a fresh panel
    pub fn panel(&mut self, poll: &Poll) -> &mut VotePanel {
        if self.panel.as_ref().map(|p| p.poll_id() != poll.id).unwrap_or(true) {
            self.panel = Some(VotePanel::new(poll));
        }
        self.panel.get_or_insert_with(|| VotePanel::new(poll))
    }
}

pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    max_idle: Duration,
    /// Idle limit of sessions nobody signed in to
    anonymous_idle: Duration,
    secure_cookie: bool,
}

impl Default for SessionStore {
    fn default() -> Self {
        SessionStore::new(
            Duration::from_secs(8 * 60 * 60),
            Duration::from_secs(15 * 60),
        )
    }
}

impl SessionStore {
    pub fn new(max_idle: Duration, anonymous_idle: Duration) -> Self {
        SessionStore {
            sessions: Mutex::new(HashMap::new()),
            max_idle,
            anonymous_idle,
            secure_cookie: false,
        }
    }

    /// Marks the session cookie `Secure`, for deployments served over https
    pub fn with_secure_cookie(mut self, secure: bool) -> Self {
        self.secure_cookie = secure;
        self
    }

    /// Session id carried by the request, if the session still exists
    pub fn find(&self, req: &HttpRequest) -> Option<String> {
        let id = req.cookie(SESSION_COOKIE)?.value().to_string();
        self.sessions
            .lock()
            .unwrap()
            .contains_key(&id)
            .then_some(id)
    }

    /// Session id of the request, starting a new session when there is none.
    /// The flag is true for a new session, whose cookie must be set.
    pub fn find_or_create(&self, req: &HttpRequest) -> (String, bool) {
        match self.find(req) {
            Some(id) => (id, false),
            None => {
                let id = util::random_token(24);
                self.sessions
                    .lock()
                    .unwrap()
                    .insert(id.clone(), Session::new(Instant::now()));
                (id, true)
            }
        }
    }

    /// Runs `f` on a session. The lock is held for the duration of `f`,
    /// so `f` must not block.
    pub fn with<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(id)?;
        session.last_seen = Instant::now();
        Some(f(session))
    }

    pub fn remove(&self, id: &str) -> Option<Session> {
        self.sessions.lock().unwrap().remove(id)
    }

    // Called periodically to drop idle sessions
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.sessions.lock().unwrap().retain(|_, s| {
            let limit = if s.user.is_some() {
                self.max_idle
            } else {
                self.anonymous_idle
            };
            now - s.last_seen <= limit
        });
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn cookie(&self, id: &str) -> Cookie<'static> {
        let mut cookie = session_cookie(id);
        cookie.set_secure(self.secure_cookie);
        cookie
    }
}

pub fn session_cookie(id: &str) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, id.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish()
}

/// Undoes a session change made before a network call, unless the call
/// finished. Dropped together with the request future when the client goes
/// away mid-call.
pub struct AbortGuard<'a, F: FnOnce(&mut Session)> {
    sessions: &'a SessionStore,
    id: &'a str,
    on_abort: Option<F>,
}

impl<'a, F: FnOnce(&mut Session)> AbortGuard<'a, F> {
    pub fn new(sessions: &'a SessionStore, id: &'a str, on_abort: F) -> Self {
        AbortGuard {
            sessions,
            id,
            on_abort: Some(on_abort),
        }
    }

    /// The call finished, its outcome is recorded by the caller
    pub fn disarm(mut self) {
        self.on_abort = None;
    }
}

impl<F: FnOnce(&mut Session)> Drop for AbortGuard<'_, F> {
    fn drop(&mut self) {
        if let Some(f) = self.on_abort.take() {
            log::info!("Request of session {} dropped mid-call", self.id);
            self.sessions.with(self.id, f);
        }
    }
}
