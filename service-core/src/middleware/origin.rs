use crate::error::AppError;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
struct AllowedHost {
    host: String,
    port: Option<u16>,
}

/// Hosts allowed to appear in `Origin` / `Referer` of a caller request.
///
/// Matching is on the parsed host name, never on substrings, so
/// `demo.example.com.attacker.net` does not match `demo.example.com`.
#[derive(Debug, Clone, Default)]
pub struct OriginAllowList {
    hosts: Vec<AllowedHost>,
}

impl OriginAllowList {
    /// Parses `host` or `host:port` entries. Blank entries are skipped.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, AppError> {
        let mut hosts = Vec::new();

        for raw in entries {
            let entry = raw.as_ref().trim();
            if entry.is_empty() {
                continue;
            }

            let url = Url::parse(&format!("http://{}", entry))
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid allowed host '{}': {}", entry, e)))?;

            let host = url
                .host_str()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| AppError::ConfigError(anyhow::anyhow!("Invalid allowed host '{}'", entry)))?;

            if url.path() != "/" || url.query().is_some() || !url.username().is_empty() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Allowed host '{}' must be a bare host or host:port",
                    entry
                )));
            }

            hosts.push(AllowedHost {
                host: host.to_ascii_lowercase(),
                port: url.port(),
            });
        }

        Ok(Self { hosts })
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    fn matches(&self, header_value: &str) -> bool {
        let value = header_value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("null") {
            return false;
        }

        let Ok(url) = Url::parse(value) else {
            return false;
        };
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        let port = url.port();

        self.hosts.iter().any(|allowed| {
            allowed.host.eq_ignore_ascii_case(host)
                && allowed.port.is_none_or(|p| port == Some(p))
        })
    }

    /// True when either header names an allow-listed host.
    pub fn permits(&self, origin: Option<&str>, referer: Option<&str>) -> bool {
        origin.is_some_and(|o| self.matches(o)) || referer.is_some_and(|r| self.matches(r))
    }
}

/// Rejects requests whose `Origin` and `Referer` both miss the allow-list.
pub async fn origin_guard_middleware<S>(
    State(state): State<S>,
    req: Request,
    next: Next,
) -> Result<Response, AppError>
where
    S: AsRef<OriginAllowList> + Clone + Send + Sync + 'static,
{
    let headers = req.headers();
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    let referer = headers.get(header::REFERER).and_then(|v| v.to_str().ok());

    if !state.as_ref().permits(origin, referer) {
        tracing::warn!(
            origin = origin.unwrap_or(""),
            referer = referer.unwrap_or(""),
            "Request origin not in allow-list"
        );
        metrics::counter!("connector_requests_rejected_total", "reason" => "origin").increment(1);
        return Err(AppError::Authentication(anyhow::anyhow!("origin not allowed")));
    }

    Ok(next.run(req).await)
}
