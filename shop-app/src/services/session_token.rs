//! Verification of the session token the shop admin hands to the embedded UI.
//!
//! The token is an HS256 JWT signed with the app's API secret. `aud` is the
//! app's API key and `dest` names the shop the admin user is working in.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::SessionTokenSettings;

#[derive(Debug, Error)]
pub enum SessionTokenError {
    #[error("session token API secret is not configured")]
    MissingSecret,

    #[error("invalid session token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),

    #[error("session token destination is not a shop URL: {0}")]
    BadDestination(String),

    #[error("session token issuer does not belong to {0}")]
    IssuerMismatch(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokenClaims {
    /// Shop admin URL, e.g. `https://demo.myshopify.com/admin`
    pub iss: String,
    /// Shop URL, e.g. `https://demo.myshopify.com`
    pub dest: String,
    /// API key of the app
    pub aud: String,
    /// Admin user id
    #[serde(default)]
    pub sub: Option<String>,
    pub exp: i64,
    pub nbf: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub jti: Option<String>,
}

/// Who is calling: the shop taken from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShopSession {
    pub shop: String,
    pub user: Option<String>,
}

pub struct SessionTokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl SessionTokenVerifier {
    pub fn new(settings: &SessionTokenSettings) -> Result<Self, SessionTokenError> {
        let secret = settings.secret().ok_or(SessionTokenError::MissingSecret)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[settings.api_key.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "aud"]);
        validation.validate_nbf = true;
        validation.leeway = settings.leeway_seconds;

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn verify(&self, token: &str) -> Result<ShopSession, SessionTokenError> {
        let claims = decode::<SessionTokenClaims>(token, &self.decoding_key, &self.validation)?.claims;

        let shop = host_of(&claims.dest)
            .ok_or_else(|| SessionTokenError::BadDestination(claims.dest.clone()))?;
        if host_of(&claims.iss).as_deref() != Some(shop.as_str()) {
            return Err(SessionTokenError::IssuerMismatch(shop));
        }

        Ok(ShopSession {
            shop,
            user: claims.sub,
        })
    }
}

fn host_of(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    if url.scheme() != "https" {
        return None;
    }
    url.host_str().map(str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, get_current_timestamp, EncodingKey, Header};
    use secrecy::Secret;

    const API_KEY: &str = "app-key";
    const API_SECRET: &str = "app-secret";

    fn settings() -> SessionTokenSettings {
        SessionTokenSettings {
            api_key: API_KEY.to_string(),
            api_secret: Some(Secret::new(API_SECRET.to_string())),
            leeway_seconds: 5,
        }
    }

    fn claims(shop: &str) -> SessionTokenClaims {
        let now = get_current_timestamp() as i64;
        SessionTokenClaims {
            iss: format!("https://{}/admin", shop),
            dest: format!("https://{}", shop),
            aud: API_KEY.to_string(),
            sub: Some("42".to_string()),
            exp: now + 60,
            nbf: now - 5,
            iat: Some(now - 5),
            jti: Some("jti-1".to_string()),
        }
    }

    fn mint(claims: &SessionTokenClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_the_destination_shop() {
        let verifier = SessionTokenVerifier::new(&settings()).unwrap();
        let session = verifier
            .verify(&mint(&claims("Demo.myshopify.com"), API_SECRET))
            .unwrap();
        assert_eq!(session.shop, "demo.myshopify.com");
        assert_eq!(session.user.as_deref(), Some("42"));
    }

    #[test]
    fn forged_or_foreign_tokens_are_rejected() {
        let verifier = SessionTokenVerifier::new(&settings()).unwrap();

        let forged = mint(&claims("demo.myshopify.com"), "guessed");
        assert!(matches!(verifier.verify(&forged), Err(SessionTokenError::Invalid(_))));

        let mut other_app = claims("demo.myshopify.com");
        other_app.aud = "someone-else".to_string();
        assert!(matches!(
            verifier.verify(&mint(&other_app, API_SECRET)),
            Err(SessionTokenError::Invalid(_))
        ));

        let mut expired = claims("demo.myshopify.com");
        expired.exp -= 3600;
        assert!(matches!(
            verifier.verify(&mint(&expired, API_SECRET)),
            Err(SessionTokenError::Invalid(_))
        ));

        assert!(verifier.verify("not-a-jwt").is_err());
    }

    #[test]
    fn issuer_must_match_destination() {
        let verifier = SessionTokenVerifier::new(&settings()).unwrap();

        let mut crossed = claims("demo.myshopify.com");
        crossed.iss = "https://attacker.myshopify.com/admin".to_string();
        assert!(matches!(
            verifier.verify(&mint(&crossed, API_SECRET)),
            Err(SessionTokenError::IssuerMismatch(_))
        ));

        let mut plain = claims("demo.myshopify.com");
        plain.dest = "http://demo.myshopify.com".to_string();
        assert!(matches!(
            verifier.verify(&mint(&plain, API_SECRET)),
            Err(SessionTokenError::BadDestination(_))
        ));
    }

    #[test]
    fn blank_secret_is_refused() {
        let mut blank = settings();
        blank.api_secret = Some(Secret::new(" ".to_string()));
        assert!(matches!(
            SessionTokenVerifier::new(&blank),
            Err(SessionTokenError::MissingSecret)
        ));
    }
}
