use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use service_core::error::AppError;
use tower_sessions::Session;

use crate::models::SessionAccount;
use crate::services::provisioning::LINKED_SHOP_ATTRIBUTE;
use crate::AppState;

/// Minimal HTML escaping for text interpolated into pages.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

/// Wraps already-escaped `body` markup in the page chrome.
pub fn render_page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{}</title>\n\
         <style>body{{font-family:system-ui,sans-serif;max-width:40rem;margin:3rem auto;padding:0 1rem;color:#202223}}\
         dt{{font-weight:600;margin-top:.75rem}}.muted{{color:#6d7175}}</style>\n\
         </head>\n<body>\n{}\n</body>\n</html>\n",
        escape_html(title),
        body
    )
}

/// Terminal error page. Never cached, since it may answer a URL that
/// carried a token.
pub fn error_page(status: StatusCode, heading: &str, detail: &str) -> Response {
    let body = format!(
        "<h1>{}</h1>\n<p>{}</p>\n<p class=\"muted\">Open the dashboard again from your shop admin to get a new link.</p>",
        escape_html(heading),
        escape_html(detail)
    );
    (
        status,
        [(header::CACHE_CONTROL, "no-store")],
        Html(render_page(heading, &body)),
    )
        .into_response()
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 500, description = "A dependency is unavailable")
    ),
    tag = "Observability"
)]
pub async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.directory.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Directory health check failed");
        AppError::from(e)
    })?;

    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::from(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "directory": "up",
            "store": "up"
        }
    })))
}

pub async fn home(State(state): State<AppState>) -> Redirect {
    Redirect::to(&state.config.site.landing_path)
}

pub async fn dashboard(
    State(state): State<AppState>,
    session: Session,
    signed_in: Result<SessionAccount, (StatusCode, &'static str)>,
) -> Result<Response, AppError> {
    let signed_in = match signed_in {
        Ok(signed_in) => signed_in,
        Err((status, heading)) if status == StatusCode::UNAUTHORIZED => {
            return Ok(error_page(status, heading, "This page needs an active session."));
        }
        Err((status, heading)) => {
            return Ok(error_page(status, heading, "Please try again in a moment."));
        }
    };

    let Some(account) = state.directory.find_by_id(signed_in.account_id).await? else {
        tracing::warn!(account_id = signed_in.account_id, "Session bound to a missing account");
        if let Err(e) = session.flush().await {
            tracing::error!("Failed to clear session: {}", e);
        }
        return Ok(error_page(
            StatusCode::UNAUTHORIZED,
            "Not signed in",
            "Your account is no longer available.",
        ));
    };

    let shop = state
        .directory
        .get_attribute(account.account_id, LINKED_SHOP_ATTRIBUTE)
        .await?;

    let body = format!(
        "<h1>Welcome, {}</h1>\n<dl>\n<dt>Email</dt><dd>{}</dd>\n<dt>Account</dt><dd>#{}</dd>\n<dt>Linked shop</dt><dd>{}</dd>\n</dl>",
        escape_html(&account.display_name()),
        escape_html(&account.email),
        account.account_id,
        shop.as_deref()
            .map(escape_html)
            .unwrap_or_else(|| "<span class=\"muted\">none</span>".to_string()),
    );

    Ok((
        [(header::CACHE_CONTROL, "no-store")],
        Html(render_page("Dashboard", &body)),
    )
        .into_response())
}

pub async fn not_found() -> Response {
    error_page(StatusCode::NOT_FOUND, "Not found", "There is nothing at this address.")
}
