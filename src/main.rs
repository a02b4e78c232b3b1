use std::sync::{Arc, Mutex};

use actix_web::rt::{self, time};
use actix_web::{middleware, web, App, HttpResponse, HttpServer, Result};
use anyhow::Context;

macro_rules! return_html {
    ($html:expr) => {
        Ok(HttpResponse::Ok()
            .content_type("text/html; charset=utf-8")
            .body($html))
    };
}

mod api;
mod auth;
mod config;
mod error;
use error::*;
mod identity;
mod panel;
mod poll;
mod presenter;
mod refresh;
mod session;
mod templates;
mod util;
mod view;
mod vote;

use api::ApiClient;
use config::Config;
use identity::IdentityClient;
use poll::Poll;
use presenter::{PresenterToken, RefreshTimer};
use refresh::{AutoRefreshTimer, LiveResults, RefreshSettings};
use session::SessionStore;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let config = Config::from_env()?;
    log::info!(
        "Serving poll {} with results from {}",
        config.poll_id,
        config.api_base
    );

    let poll = web::Data::new(Poll::new(&config.poll_id, &config.question));
    let api = ApiClient::new(&config.api_base, config.http_timeout)
        .context("Could not build the API client")?;
    let identity = IdentityClient::new(config.identity.clone(), config.http_timeout)
        .context("Could not build the identity client")?;
    let live = Arc::new(LiveResults::default());

    let mut timer = AutoRefreshTimer::new(
        Arc::new(api.clone()),
        live.clone(),
        &config.poll_id,
        RefreshSettings {
            interval_ms: config.refresh_interval_ms,
            enabled: true,
        },
    );
    timer.start();
    let timer: web::Data<RefreshTimer> = web::Data::new(Mutex::new(timer));

    let api = web::Data::new(api);
    let identity = web::Data::new(identity);
    let live = web::Data::from(live);
    let presenter_token = web::Data::new(PresenterToken(config.presenter_token.clone()));

    let secure_cookie = config.identity.redirect_uri.starts_with("https://");
    let sessions = web::Data::new(SessionStore::default().with_secure_cookie(secure_cookie));
    let s = sessions.clone();
    rt::spawn(async move {
        let sessions = s;
        let mut interval = time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            sessions.cleanup();
            log::debug!("sessions cleaned up, {} left", sessions.len());
        }
    });

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(poll.clone())
            .app_data(api.clone())
            .app_data(identity.clone())
            .app_data(live.clone())
            .app_data(timer.clone())
            .app_data(presenter_token.clone())
            .app_data(sessions.clone())
            .configure(app_config)
    })
    .bind(&config.bind_addr)?
    .run()
    .await
    .context("An error occured when running HttpServer")
}

fn app_config(config: &mut web::ServiceConfig) {
    config
        .service(actix_files::Files::new("/static", "static/").prefer_utf8(true))
        // Live results, the presenter screen
        .service(web::resource("/").name("index").route(web::get().to(index)))
        .service(web::resource("/presenter").route(web::post().to(presenter::handle_presenter_action)))
        // Voting screen and its callbacks
        .service(web::resource("/user-vote").route(web::get().to(vote::handle_vote)))
        .service(web::resource("/user-vote/select").route(web::post().to(vote::handle_select)))
        .service(web::resource("/user-vote/submit").route(web::post().to(vote::handle_submit)))
        // Sign-in
        .service(web::resource("/auth/login").route(web::get().to(auth::handle_login)))
        .service(web::resource("/auth/callback").route(web::get().to(auth::handle_callback)))
        .service(web::resource("/auth/logout").route(web::get().to(auth::handle_logout)))
        // 404 screen
        .default_service(web::to(handle_default));
}

/// Renders the latest results, whatever the state of the last fetch
async fn index(
    poll: web::Data<Poll>,
    live: web::Data<LiveResults>,
    timer: web::Data<RefreshTimer>,
    presenter_token: web::Data<PresenterToken>,
) -> Result<HttpResponse> {
    let settings = timer.lock().unwrap().settings();
    let content = view::results_site(
        &poll,
        &live.current(),
        settings,
        presenter_token.0.is_some(),
    )
    .map_err(UserError::from)?;

    return_html!(content)
}

/// Handles requests that don't match anything, returns error 404
async fn handle_default() -> Result<HttpResponse> {
    Ok(HttpResponse::NotFound()
        .content_type("text/html; charset=utf-8")
        .body(include_str!("../static/404.html")))
}
