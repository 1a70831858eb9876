use std::convert::Infallible;
use std::net::SocketAddr;

use async_trait::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts, State};
use axum::http::{header, request::Parts, HeaderMap};

use crate::api::errors::ApiError;
use crate::core::{security, state::AppState};
use crate::db::models::AdminAccount;
use crate::repositories;

const FORWARDED_FOR: &str = "x-forwarded-for";
const UNKNOWN_CLIENT: &str = "unknown";

pub(crate) struct CurrentAdmin(pub(crate) AdminAccount);

/// Best-effort identifier of the calling device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ClientId(pub(crate) String);

#[async_trait]
impl FromRequestParts<AppState> for CurrentAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let State(app_state) = State::<AppState>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to access application state"))?;

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized("Invalid authentication credentials"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized("Invalid authentication credentials"))?;

        let claims = security::verify_token(token, app_state.settings())
            .map_err(|_| ApiError::Unauthorized("Invalid authentication credentials"))?;

        let account = repositories::admins::find_by_id(app_state.db(), &claims.sub)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to load admin account"))?;

        let Some(account) = account else {
            return Err(ApiError::Unauthorized("Admin account not found"));
        };

        if !account.is_active {
            return Err(ApiError::Forbidden("Admin account disabled"));
        }

        Ok(CurrentAdmin(account))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for ClientId {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        let trust_forwarded = state.settings().access().trust_forwarded_for;

        Ok(ClientId(resolve_client_id(&parts.headers, peer, trust_forwarded)))
    }
}

fn resolve_client_id(headers: &HeaderMap, peer: Option<String>, trust_forwarded: bool) -> String {
    let forwarded = trust_forwarded
        .then(|| headers.get(FORWARDED_FOR))
        .flatten()
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    forwarded.or(peer).unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
