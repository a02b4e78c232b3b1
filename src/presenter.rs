use std::sync::Mutex;

use actix_web::{http::header, web, HttpResponse, Result};
use serde::Deserialize;

use crate::api::ApiClient;
use crate::error::UserError;
use crate::refresh::{AutoRefreshTimer, MAX_INTERVAL_MS, MIN_INTERVAL_MS};

pub type RefreshTimer = Mutex<AutoRefreshTimer<ApiClient>>;

pub struct PresenterToken(pub Option<String>);

/// Controls the results page offers to whoever presents the poll
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterAction {
    /// Stops the auto-refresh, the last results stay on screen
    Pause,
    Resume,
    /// Fetches once, whether or not auto-refresh runs
    RefreshNow,
    /// Changes the refresh period, takes `interval_ms`
    SetInterval,
}

#[derive(Deserialize)]
pub struct PresenterParams {
    #[serde(default)]
    token: String,
    action: PresenterAction,
    interval_ms: Option<u64>,
}

/// Applies a presenter action to the refresh timer.
/// Params:
///  - token: must match the PRESENTER_TOKEN environmental variable
///  - action: a PresenterAction enum member
///  - interval_ms: new period for SetInterval
pub async fn handle_presenter_action(
    params: web::Form<PresenterParams>,
    timer: web::Data<RefreshTimer>,
    presenter_token: web::Data<PresenterToken>,
) -> Result<HttpResponse> {
    match presenter_token.0.as_ref() {
        None => return Err(UserError::PresenterOff.into()),
        Some(t) if t != params.token.as_str() => {
            return Err(UserError::InvalidPresenterToken.into())
        }
        _ => (),
    }

    let mut timer = timer.lock().unwrap();
    match params.action {
        PresenterAction::Pause => timer.set_enabled(false),
        PresenterAction::Resume => timer.set_enabled(true),
        PresenterAction::RefreshNow => timer.refresh_now(),
        PresenterAction::SetInterval => match params.interval_ms {
            Some(ms) if (MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&ms) => {
                timer.set_interval(ms)
            }
            other => return Err(UserError::InvalidInterval(other.unwrap_or(0)).into()),
        },
    }
    log::info!("Presenter action executed: {:?}", params.action);

    Ok(HttpResponse::SeeOther()
        .insert_header((header::LOCATION, "/"))
        .finish())
}
