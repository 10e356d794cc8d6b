//! Turns a visit carrying `?auth_token=...` into a logged-in session.
//!
//! The token is redeemed, the session is bound to the account and the
//! browser is sent back to the same address without the token, so it
//! never stays in history or leaks through a Referer header.

use axum::{
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use service_core::error::AppError;
use tower_sessions::Session;

use crate::config::is_local_path;
use crate::handlers::app::error_page;
use crate::models::SessionAccount;
use crate::services::token::TOKEN_QUERY_PARAM;
use crate::AppState;

pub async fn redemption_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    // link previews send HEAD; only GET redeems
    if req.method() != Method::GET {
        return next.run(req).await;
    }

    let Some((token, remaining)) = split_token(req.uri().query()) else {
        return next.run(req).await;
    };

    let location = cleaned_location(req.uri().path(), &remaining, &state.config.site.landing_path);

    let Some(session) = req.extensions().get::<Session>().cloned() else {
        tracing::error!("Session layer missing in front of token redemption");
        return failure_page(AppError::InternalError(anyhow::anyhow!(
            "session layer not installed"
        )));
    };

    let account = match state.tokens.redeem(&token).await {
        Ok(account) => account,
        Err(e) => {
            tracing::warn!(outcome = e.outcome(), error = %e, "Token redemption rejected");
            return failure_page(AppError::from(e));
        }
    };

    if let Err(e) = SessionAccount::establish(&session, &account).await {
        tracing::error!(account_id = account.account_id, "Failed to establish session: {}", e);
        return failure_page(AppError::InternalError(anyhow::anyhow!(
            "session store failure: {}",
            e
        )));
    }

    tracing::info!(account_id = account.account_id, "Session established from token");

    let mut res = Redirect::to(&location).into_response();
    res.headers_mut()
        .insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-store"));
    res
}

/// Pulls the token out of `query`, returning it with the other pairs in
/// their original order. `None` when no non-empty token is present.
fn split_token(query: Option<&str>) -> Option<(String, Vec<(String, String)>)> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query?).ok()?;

    let mut token = None;
    let mut remaining = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        if key == TOKEN_QUERY_PARAM {
            if token.is_none() {
                token = Some(value);
            }
        } else {
            remaining.push((key, value));
        }
    }

    token
        .filter(|t| !t.trim().is_empty())
        .map(|t| (t, remaining))
}

/// Same path with the token stripped. A bare `/` goes to the landing page,
/// and anything that is not a plain local path is never echoed back.
fn cleaned_location(path: &str, remaining: &[(String, String)], landing_path: &str) -> String {
    if !is_local_path(path) {
        return landing_path.to_string();
    }

    let query = serde_urlencoded::to_string(remaining).unwrap_or_default();
    match (path, query.is_empty()) {
        ("/", true) => landing_path.to_string(),
        (_, true) => path.to_string(),
        (_, false) => format!("{}?{}", path, query),
    }
}

fn failure_page(err: AppError) -> Response {
    let (heading, detail) = match &err {
        AppError::TokenExpired => ("Link expired", "This sign-in link has expired."),
        AppError::TokenInvalid(_) => ("Invalid link", "This sign-in link is not valid."),
        _ => (
            "Sign-in unavailable",
            "We could not sign you in right now. Please try again shortly.",
        ),
    };

    let status = match err.status() {
        StatusCode::UNAUTHORIZED => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "Token redemption failed");
    }

    error_page(status, heading, detail)
}
