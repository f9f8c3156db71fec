//! Bearer-token authentication
//!
//! Container clients obtain a JWT from the token endpoint (optionally
//! presenting HTTP Basic credentials) and replay it as a bearer token on
//! every registry request. Requests without a valid token are answered 401
//! with a challenge pointing at the token endpoint; anonymous clients fetch
//! a read-only token there first.

use std::fmt;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::error::{RegistryError, RegistryResult};

/// Token lifetime in seconds.
const TOKEN_TTL_SECS: u64 = 3600;

/// An authenticated (or anonymous) caller.
#[derive(Debug, Clone)]
pub struct Principal {
    /// User name, or `anonymous`
    pub username: String,
    /// Whether the caller may mutate packages
    pub can_write: bool,
}

impl Principal {
    /// The read-only principal used when no credentials are presented.
    pub fn anonymous() -> Self {
        Self {
            username: "anonymous".to_string(),
            can_write: false,
        }
    }

    /// Fail unless the caller may write.
    pub fn require_write(&self) -> RegistryResult<()> {
        if self.can_write {
            Ok(())
        } else if self.username == "anonymous" {
            Err(RegistryError::Unauthorized)
        } else {
            Err(RegistryError::Forbidden)
        }
    }
}

/// Validates username/password credentials presented to the token endpoint.
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// Check credentials, returning the principal they map to.
    fn authenticate(&self, username: &str, password: &str) -> Option<Principal>;
}

/// Accepts any non-empty credentials and grants write access.
///
/// Suitable for demos and tests; production deployments plug in their own
/// [`Authenticator`].
#[derive(Debug, Clone, Default)]
pub struct OpenAuthenticator;

impl Authenticator for OpenAuthenticator {
    fn authenticate(&self, username: &str, _password: &str) -> Option<Principal> {
        if username.is_empty() {
            return None;
        }
        Some(Principal {
            username: username.to_string(),
            can_write: true,
        })
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Claims {
    sub: String,
    write: bool,
    exp: u64,
}

/// Issues and verifies the registry's bearer tokens.
#[derive(Clone)]
pub struct TokenGateway {
    secret: Arc<Vec<u8>>,
    realm: String,
    authenticator: Arc<dyn Authenticator>,
}

impl fmt::Debug for TokenGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGateway")
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

impl TokenGateway {
    /// Create a gateway with an explicit signing secret.
    pub fn new(secret: Vec<u8>, realm: String, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            secret: Arc::new(secret),
            realm,
            authenticator,
        }
    }

    /// Create a gateway with a random per-process secret. Tokens do not
    /// survive a restart, matching how upload sessions behave.
    pub fn ephemeral(realm: String, authenticator: Arc<dyn Authenticator>) -> Self {
        let mut secret = Uuid::new_v4().as_bytes().to_vec();
        secret.extend_from_slice(Uuid::new_v4().as_bytes());
        Self::new(secret, realm, authenticator)
    }

    /// Sign a token for a principal.
    pub fn issue(&self, principal: &Principal) -> RegistryResult<String> {
        let claims = Claims {
            sub: principal.username.clone(),
            write: principal.can_write,
            exp: now() + TOKEN_TTL_SECS,
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|err| {
            tracing::error!("Failed to sign token: {err}");
            RegistryError::Unauthorized
        })
    }

    /// Verify a token and recover its principal.
    pub fn verify(&self, token: &str) -> RegistryResult<Principal> {
        let data = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &Validation::default(),
        )
        .map_err(|_| RegistryError::Unauthorized)?;

        Ok(Principal {
            username: data.claims.sub,
            can_write: data.claims.write,
        })
    }

    /// The realm (external base URL) this gateway was configured with.
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// The `Www-Authenticate` challenge pointing clients at the token
    /// endpoint, with a basic-auth fallback for clients that skip the
    /// token flow.
    pub fn challenge(&self) -> String {
        format!(
            "Bearer realm=\"{realm}/v2/token\",service=\"container_registry\",scope=\"*\", \
             Basic realm=\"{realm}\"",
            realm = self.realm
        )
    }

    fn authenticate_basic(&self, header: &str) -> RegistryResult<Principal> {
        let encoded = header
            .strip_prefix("Basic ")
            .ok_or(RegistryError::Unauthorized)?;
        let decoded = BASE64
            .decode(encoded)
            .map_err(|_| RegistryError::Unauthorized)?;
        let decoded = String::from_utf8(decoded).map_err(|_| RegistryError::Unauthorized)?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or(RegistryError::Unauthorized)?;

        self.authenticator
            .authenticate(username, password)
            .ok_or(RegistryError::Unauthorized)
    }
}

fn now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[derive(Debug, serde::Serialize)]
struct TokenResponse {
    token: String,
}

/// `GET /v2/token`: exchange optional Basic credentials for a bearer token.
///
/// Without an `Authorization` header the anonymous read-only principal is
/// issued, so pulls work unauthenticated.
pub async fn token(
    State(gateway): State<TokenGateway>,
    request: Request,
) -> RegistryResult<Response> {
    let principal = match request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        Some(basic) => gateway.authenticate_basic(basic)?,
        None => Principal::anonymous(),
    };

    tracing::debug!(user = %principal.username, "Issued registry token");
    let token = gateway.issue(&principal)?;
    Ok(Json(TokenResponse { token }).into_response())
}

/// Middleware that resolves the request's bearer token into a [`Principal`]
/// extension. Requests without a valid token get a 401 carrying the
/// token-endpoint challenge; anonymous pulls go through the token endpoint
/// first, like any other client.
pub async fn require_bearer(
    State(gateway): State<TokenGateway>,
    mut request: Request,
    next: Next,
) -> Response {
    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let principal = match bearer.map(|token| gateway.verify(token)) {
        Some(Ok(principal)) => principal,
        missing_or_invalid => {
            let err = match missing_or_invalid {
                Some(Err(err)) => err,
                _ => RegistryError::Unauthorized,
            };
            let mut response = err.into_response();
            if let Ok(challenge) = gateway.challenge().parse() {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, challenge);
            }
            return response;
        }
    };

    request.extensions_mut().insert(principal);
    next.run(request).await
}

/// Middleware for the non-container adapters: resolves optional Basic (or
/// bearer) credentials into a [`Principal`] extension. Requests without
/// credentials proceed anonymously; write handlers reject those themselves.
pub async fn optional_credentials(
    State(gateway): State<TokenGateway>,
    mut request: Request,
    next: Next,
) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let principal = match authorization.as_deref() {
        Some(basic) if basic.starts_with("Basic ") => match gateway.authenticate_basic(basic) {
            Ok(principal) => principal,
            Err(err) => return err.into_response(),
        },
        Some(bearer) if bearer.starts_with("Bearer ") => {
            let token = &bearer["Bearer ".len()..];
            match gateway.verify(token) {
                Ok(principal) => principal,
                Err(err) => return err.into_response(),
            }
        }
        _ => Principal::anonymous(),
    };

    request.extensions_mut().insert(principal);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> TokenGateway {
        TokenGateway::ephemeral(
            "http://localhost".to_string(),
            Arc::new(OpenAuthenticator),
        )
    }

    #[test]
    fn issue_and_verify() {
        let gateway = gateway();
        let principal = Principal {
            username: "alice".to_string(),
            can_write: true,
        };
        let token = gateway.issue(&principal).unwrap();
        let verified = gateway.verify(&token).unwrap();
        assert_eq!(verified.username, "alice");
        assert!(verified.can_write);
    }

    #[test]
    fn tokens_are_bound_to_the_secret() {
        let token = gateway().issue(&Principal::anonymous()).unwrap();
        assert!(gateway().verify(&token).is_err());
    }

    #[test]
    fn anonymous_cannot_write() {
        let err = Principal::anonymous().require_write().expect_err("denied");
        assert!(matches!(err, RegistryError::Unauthorized));
    }

    #[test]
    fn basic_credentials() {
        let gateway = gateway();
        let header = format!("Basic {}", BASE64.encode("bob:hunter2"));
        let principal = gateway.authenticate_basic(&header).unwrap();
        assert_eq!(principal.username, "bob");

        assert!(gateway.authenticate_basic("Basic !!!").is_err());
        assert!(gateway.authenticate_basic("Bearer abc").is_err());
    }

    #[test]
    fn challenge_names_the_token_endpoint_and_basic_fallback() {
        let challenge = gateway().challenge();
        assert!(challenge.starts_with("Bearer realm=\"http://localhost/v2/token\""));
        assert!(challenge.contains("service=\"container_registry\""));
        assert!(challenge.contains("Basic realm=\"http://localhost\""));
    }
}
