use serde::Serialize;

use crate::core::time::format_offset;
use crate::services::token_registry::IssuedToken;

#[derive(Debug, Serialize)]
pub(crate) struct GeneratedTokenResponse {
    pub(crate) token: String,
    pub(crate) access_url: String,
    pub(crate) created_at: String,
}

impl GeneratedTokenResponse {
    pub(crate) fn from_issued(issued: IssuedToken, public_base_url: &str) -> Self {
        Self {
            access_url: issued.access_url(public_base_url),
            created_at: format_offset(issued.created_at),
            token: issued.value,
        }
    }
}
