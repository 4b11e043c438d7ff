use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GatewayError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (caller identity)
    pub exp: usize,  // Expiration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// `aud` may be a single string or a list (Auth0 access tokens use both).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

/// Verified identity of the caller behind a bearer credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub subject: String,
}

/// The sites a verified caller may act on, resolved once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub caller: CallerIdentity,
    site_uuids: BTreeSet<Uuid>,
}

impl AccessGrant {
    pub fn new(caller: CallerIdentity, site_uuids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            caller,
            site_uuids: site_uuids.into_iter().collect(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.caller.subject
    }

    pub fn contains(&self, site_uuid: Uuid) -> bool {
        self.site_uuids.contains(&site_uuid)
    }

    /// Fail with `Forbidden` unless the site is in the grant.
    pub fn require(&self, site_uuid: Uuid) -> Result<(), GatewayError> {
        if self.contains(site_uuid) {
            Ok(())
        } else {
            Err(GatewayError::Forbidden)
        }
    }

    pub fn site_uuids(&self) -> Vec<Uuid> {
        self.site_uuids.iter().copied().collect()
    }
}

/// Identity collaborator: turns a bearer credential into a caller identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Result<CallerIdentity, GatewayError>;
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Result<&str, GatewayError> {
    let (scheme, token) = header_value
        .trim()
        .split_once(' ')
        .ok_or_else(|| GatewayError::Unauthorized("Invalid Auth header".to_string()))?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(GatewayError::Unauthorized("Invalid Auth header".to_string()));
    }
    Ok(token.trim())
}

fn identity_from_claims(claims: Claims) -> Result<CallerIdentity, GatewayError> {
    if claims.sub.trim().is_empty() {
        return Err(GatewayError::Unauthorized("Token has no subject".to_string()));
    }
    Ok(CallerIdentity {
        subject: claims.sub,
    })
}

/// HS256 tokens signed with a shared secret.
pub struct JwtIdentityProvider {
    secret: String,
    audience: Option<String>,
}

impl JwtIdentityProvider {
    pub fn new(secret: impl Into<String>, audience: Option<String>) -> Self {
        Self {
            secret: secret.into(),
            audience,
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        match self.audience {
            Some(ref aud) => validation.set_audience(&[aud.as_str()]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn verify(&self, token: &str) -> Result<CallerIdentity, GatewayError> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &self.validation(),
        )
        .map_err(|e| GatewayError::Unauthorized(format!("Invalid Token: {}", e)))?;

        identity_from_claims(token_data.claims)
    }
}

/// RS256 tokens issued by an Auth0 tenant, verified against its JWKS document.
///
/// The key set is fetched for each verification; nothing is cached between
/// requests.
pub struct JwksIdentityProvider {
    domain: String,
    audience: Option<String>,
    client: reqwest::Client,
}

impl JwksIdentityProvider {
    pub fn new(domain: impl Into<String>, audience: Option<String>) -> Self {
        Self {
            domain: domain.into(),
            audience,
            client: reqwest::Client::new(),
        }
    }

    fn jwks_url(&self) -> String {
        format!("https://{}/.well-known/jwks.json", self.domain)
    }

    fn issuer(&self) -> String {
        format!("https://{}/", self.domain)
    }

    async fn fetch_key_set(&self) -> Result<JwkSet, GatewayError> {
        let response = self
            .client
            .get(self.jwks_url())
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("identity provider: {}", e)))?;

        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "identity provider returned {}",
                response.status()
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("identity provider: {}", e)))
    }
}

#[async_trait]
impl IdentityProvider for JwksIdentityProvider {
    async fn verify(&self, token: &str) -> Result<CallerIdentity, GatewayError> {
        let header = decode_header(token)
            .map_err(|e| GatewayError::Unauthorized(format!("Invalid Token: {}", e)))?;
        let kid = header
            .kid
            .ok_or_else(|| GatewayError::Unauthorized("Token has no key id".to_string()))?;

        let key_set = self.fetch_key_set().await?;
        let jwk = key_set
            .find(&kid)
            .ok_or_else(|| GatewayError::Unauthorized("Unknown signing key".to_string()))?;
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| GatewayError::Unauthorized(format!("Unusable signing key: {}", e)))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer()]);
        match self.audience {
            Some(ref aud) => validation.set_audience(&[aud.as_str()]),
            None => validation.validate_aud = false,
        }

        let token_data = decode::<Claims>(token, &key, &validation)
            .map_err(|e| GatewayError::Unauthorized(format!("Invalid Token: {}", e)))?;

        identity_from_claims(token_data.claims)
    }
}

/// Issue an HS256 token for `subject`, valid for 24 hours.
pub fn create_jwt(subject: &str, secret: &str, audience: Option<&str>) -> Result<String, String> {
    let expiration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| e.to_string())?
        .as_secs() as usize
        + 24 * 3600; // 24 hours

    let claims = Claims {
        sub: subject.to_string(),
        exp: expiration,
        aud: audience.map(|a| Audience::One(a.to_string())),
        iss: None,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| e.to_string())
}
