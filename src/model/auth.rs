use std::{fmt::Display, marker::PhantomData};

use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation};
use rocket::{
    http::{Cookie, SameSite, Status},
    request::{FromRequest, Outcome},
    time::Duration,
    Request, State,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;

use super::voter::UserId;

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// Different privilege levels. Accounts themselves are managed elsewhere; a
/// token only ever carries one of these.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rights {
    Voter,
    Manager,
}

impl Display for Rights {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            match self {
                Self::Voter => "voter",
                Self::Manager => "manager",
            }
        )
    }
}

/// A kind of principal, identified only by its rights.
pub trait Principal {
    const RIGHTS: Rights;
}

pub struct Voter;

impl Principal for Voter {
    const RIGHTS: Rights = Rights::Voter;
}

pub struct Manager;

impl Principal for Manager {
    const RIGHTS: Rights = Rights::Manager;
}

/// An authentication token representing a specific user with specific rights.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthToken<P> {
    pub id: UserId,
    #[serde(rename = "rgt")]
    pub rights: Rights,
    #[serde(skip)]
    phantom: PhantomData<P>,
}

impl<P> AuthToken<P> {
    /// Does this token permit the given rights?
    pub fn permits(&self, target: Rights) -> bool {
        self.rights == target
    }
}

impl<P> AuthToken<P>
where
    P: Principal,
{
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            rights: P::RIGHTS,
            phantom: PhantomData,
        }
    }

    /// Serialize this token into a cookie.
    pub fn into_cookie(self, config: &Config) -> Result<Cookie<'static>, Error> {
        let claims = Claims {
            token: self,
            expire_at: Utc::now() + config.auth_ttl(),
        };

        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )?;

        Ok(Cookie::build((AUTH_TOKEN_COOKIE, token))
            .max_age(Duration::seconds(config.auth_ttl().num_seconds()))
            .http_only(true)
            .same_site(SameSite::Strict)
            .build())
    }

    /// Deserialize a token from a cookie.
    pub fn from_cookie(cookie: &Cookie<'_>, config: &Config) -> Result<Self, Error> {
        let token = jsonwebtoken::decode(
            cookie.value(),
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )
        .map(|claims: TokenData<Claims<P>>| claims.claims.token)?;
        Ok(token)
    }
}

/// Cookie claims: the token itself plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims<P> {
    #[serde(flatten, bound = "")]
    token: AuthToken<P>,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

#[rocket::async_trait]
impl<'r, P> FromRequest<'r> for AuthToken<P>
where
    P: Principal + Send,
{
    type Error = Error;

    /// Get an [`AuthToken`] from the cookie and verify that it has the rights
    /// this principal type needs.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Outcome::Success(config) = req.guard::<&State<Config>>().await else {
            return Outcome::Error((
                Status::InternalServerError,
                Error::Unauthorized("configuration unavailable".to_string()),
            ));
        };

        // Forward, so that a route without authentication may still match.
        let Some(cookie) = req.cookies().get(AUTH_TOKEN_COOKIE) else {
            return Outcome::Forward(Status::Unauthorized);
        };
        let Ok(token) = Self::from_cookie(cookie, config) else {
            return Outcome::Forward(Status::Unauthorized);
        };

        if !token.permits(P::RIGHTS) {
            return Outcome::Forward(Status::Forbidden);
        }
        Outcome::Success(token)
    }
}
