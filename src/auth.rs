use std::convert::Infallible;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequest, RequestParts};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::{Params, Pbkdf2};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::err::Error;
use crate::models::{Account, Credentials, LoginReport};
use crate::store::DataStore;
use crate::{proceeds, Authed, Payload};

const TOKEN_ISSUER: &str = "portfolio-api";
const TOKEN_TTL_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signing and verification keys, both derived from the one configured
/// secret. Verification fails closed: anything but a well-formed, correctly
/// signed, unexpired token yields `None`.
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, subject: &str) -> Result<String, Error> {
        self.issue_at(subject, Utc::now())
    }

    fn issue_at(&self, subject: &str, now: DateTime<Utc>) -> Result<String, Error> {
        let iat = now.timestamp();
        let claims = Claims {
            iss: TOKEN_ISSUER.to_string(),
            sub: subject.to_string(),
            iat,
            exp: iat + TOKEN_TTL_SECS,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .ok()
    }

    /// A brand-new one-hour token for the subject of a still-valid token.
    pub fn refresh(&self, token: &str) -> Option<String> {
        let claims = self.verify(token)?;
        self.issue(&claims.sub).ok()
    }
}

fn bearer_token<B>(req: &RequestParts<B>) -> Option<String> {
    let raw = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    // clients send either the bare token or the Bearer form
    Some(raw.strip_prefix("Bearer ").unwrap_or(raw).to_string())
}

/// Soft gate: annotates the request with the refreshed token, never blocks.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub is_authenticated: bool,
    pub token: Option<String>,
}

#[async_trait]
impl<B: Send> FromRequest<B> for AuthContext {
    type Rejection = Infallible;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let raw = bearer_token(req);
        let refreshed = match (req.extensions().get::<Arc<TokenKeys>>(), raw) {
            (Some(keys), Some(raw)) => keys.refresh(&raw),
            _ => None,
        };

        Ok(match refreshed {
            Some(token) => AuthContext {
                is_authenticated: true,
                token: Some(token),
            },
            None => AuthContext {
                is_authenticated: false,
                token: None,
            },
        })
    }
}

/// Hard gate: same refresh as the soft gate, but a missing or invalid token
/// short-circuits the request with a redirect payload.
#[derive(Debug, Clone)]
pub struct RequireAuth(pub AuthContext);

#[derive(Debug, Clone, Serialize)]
pub struct GateRejection {
    #[serde(rename = "isAuthenticated")]
    is_authenticated: bool,
    token: Option<String>,
    redirect: bool,
}

impl GateRejection {
    fn new() -> Self {
        Self {
            is_authenticated: false,
            token: None,
            redirect: true,
        }
    }
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[async_trait]
impl<B: Send> FromRequest<B> for RequireAuth {
    type Rejection = GateRejection;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let context = match AuthContext::from_request(req).await {
            Ok(context) => context,
            Err(never) => match never {},
        };
        if context.is_authenticated {
            Ok(RequireAuth(context))
        } else {
            Err(GateRejection::new())
        }
    }
}

pub fn hash_password(password: &str, rounds: u32) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    let params = Params {
        rounds,
        output_length: 32,
    };
    let digest = Pbkdf2.hash_password_customized(password.as_bytes(), None, None, params, &salt)?;
    Ok(digest.to_string())
}

/// False for wrong passwords and for digests that fail to parse.
pub fn verify_password(digest: &str, password: &str) -> bool {
    PasswordHash::new(digest)
        .map(|parsed| Pbkdf2.verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

#[derive(Debug)]
pub enum AuthAttempt {
    Verified(Account),
    WrongPassword,
    UnknownLogin,
}

pub async fn authenticate(
    store: &DataStore,
    login: &str,
    password: &str,
) -> Result<AuthAttempt, Error> {
    match store.find_account(login).await? {
        Some(account) if verify_password(&account.password, password) => {
            Ok(AuthAttempt::Verified(account))
        }
        Some(_) => Ok(AuthAttempt::WrongPassword),
        None => Ok(AuthAttempt::UnknownLogin),
    }
}

pub async fn login(
    Extension(store): Extension<DataStore>,
    Extension(keys): Extension<Arc<TokenKeys>>,
    Json(request): Json<Credentials>,
) -> Payload<LoginReport> {
    if request.password.is_empty() {
        return Err(Error::InvalidPayload {
            message: "`password` parameter was empty".to_string(),
        });
    }

    match authenticate(&store, &request.login, &request.password).await? {
        AuthAttempt::Verified(account) => {
            let token = keys.issue(&account.id.to_hex())?;
            log::info!("account `{}` logged in", account.login);
            Ok(Json(Authed {
                is_authenticated: true,
                token: Some(token),
                data: LoginReport {
                    logged_in: true,
                    message: "Successfully logged in".to_string(),
                },
            }))
        }
        AuthAttempt::WrongPassword => Ok(Json(Authed {
            is_authenticated: false,
            token: None,
            data: LoginReport {
                logged_in: false,
                message: "Password is incorrect".to_string(),
            },
        })),
        // deliberately does not reveal whether the login exists
        AuthAttempt::UnknownLogin => Ok(Json(Authed {
            is_authenticated: false,
            token: None,
            data: LoginReport {
                logged_in: false,
                message: "Login or password is incorrect".to_string(),
            },
        })),
    }
}

pub async fn register(
    RequireAuth(gate): RequireAuth,
    Extension(store): Extension<DataStore>,
    Extension(config): Extension<Arc<Config>>,
    Json(request): Json<Credentials>,
) -> Payload<String> {
    if request.login.is_empty() || request.password.is_empty() {
        return Err(Error::InvalidPayload {
            message: "login and password must not be empty".to_string(),
        });
    }

    let digest = hash_password(&request.password, config.hash_rounds)?;
    match store.create_account(&request.login, &digest).await {
        Ok(()) => {
            log::info!("registered account `{}`", request.login);
            proceeds(gate, format!("Successfully registered user: {}", request.login))
        }
        // surfaced as a user-facing message, not an HTTP error
        Err(Error::Conflict { message }) => proceeds(gate, message),
        Err(other) => Err(other),
    }
}
