// src/adapter/http/middleware.rs
//! Autenticación por JWT (HS256) en la cabecera `Authorization: Bearer`.
//!
//! El middleware nunca corta la petición: deja en las extensiones un
//! `AuthContext` con el principal verificado o `None`. La decisión de acceso
//! la toma siempre el gate de cada caso de uso.

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::model::principal::{Principal, Role};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub exp: usize,
}

fn default_active() -> bool {
    true
}

impl Claims {
    /// Unknown role names are dropped, not rejected.
    pub fn into_principal(self) -> Principal {
        let roles: Vec<Role> = self
            .roles
            .iter()
            .filter_map(|r| {
                let role = Role::parse(r);
                if role.is_none() {
                    warn!(role = %r, user = %self.username, "ignoring unknown role in token");
                }
                role
            })
            .collect();
        let mut principal = Principal::new(self.sub, self.username, self.email, roles);
        if !self.active {
            principal.deactivate();
        }
        principal
    }
}

/// Verified principal (or none) attached to each request.
#[derive(Debug, Clone, Default)]
pub struct AuthContext(pub Option<Principal>);

impl AuthContext {
    pub fn principal(&self) -> Option<&Principal> {
        self.0.as_ref()
    }
}

pub struct JwtVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Option<Principal> {
        match decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => Some(data.claims.into_principal()),
            Err(e) => {
                warn!(error = %e, "JWT validation failed");
                None
            }
        }
    }

    /// Signs claims with the same secret. Used by tooling and tests; tokens
    /// are normally issued elsewhere.
    pub fn issue(&self, claims: &Claims) -> anyhow::Result<String> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.encoding)?)
    }
}

fn bearer_token<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub async fn auth_middleware<B>(State(verifier): State<Arc<JwtVerifier>>, mut req: Request<B>, next: Next<B>) -> Response {
    let principal = match bearer_token(&req) {
        Some(token) => verifier.verify(token),
        None => {
            debug!(path = %req.uri().path(), "request without bearer token");
            None
        }
    };
    req.extensions_mut().insert(AuthContext(principal));
    next.run(req).await
}
