use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

use crate::{
    auth::claims::Claims,
    config::JwtConfig,
    error::{Error, Result},
    users::model::User,
};

/// Tokens may only be reissued once their remaining validity drops below this.
pub const REFRESH_WINDOW: Duration = Duration::hours(1);

/// Issues, validates and refreshes HS256 tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl TokenService {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::minutes(cfg.expiration_minutes),
        }
    }

    pub fn issue(&self, user: &User) -> Result<String> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
            sub: user.email.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.unix_timestamp(),
            nbf: now.unix_timestamp(),
            exp: (now + self.ttl).unix_timestamp(),
        };
        let token = self.sign(&claims)?;
        debug!(user_id = user.id, "jwt signed");
        Ok(token)
    }

    /// Checks signature, expiry, issuer and audience.
    pub fn validate(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_nbf = true;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            warn!(error = %e, "jwt rejected");
            Error::InvalidToken
        })?;
        debug!(user_id = data.claims.user_id, "jwt verified");
        Ok(data.claims)
    }

    /// Reissues a token for the same identity, but only when the presented one
    /// is within [`REFRESH_WINDOW`] of expiring.
    pub fn refresh(&self, token: &str) -> Result<String> {
        let claims = self.validate(token)?;
        let remaining = claims.exp - OffsetDateTime::now_utc().unix_timestamp();
        if remaining >= REFRESH_WINDOW.whole_seconds() {
            return Err(Error::validation("token", "not close to expiration"));
        }

        let now = OffsetDateTime::now_utc();
        let renewed = Claims {
            iat: now.unix_timestamp(),
            nbf: now.unix_timestamp(),
            exp: (now + self.ttl).unix_timestamp(),
            ..claims
        };
        self.sign(&renewed)
    }

    fn sign(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("failed to sign token: {e}")))
    }
}
