use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::db::{AppState, queries};
use crate::models::AdminUser;
use crate::util::{RequestMeta, extract_bearer_token};

/// Header naming the operator on whose behalf an admin call is made.
pub const ADMIN_USER_HEADER: &str = "x-admin-user-id";

#[derive(Clone)]
pub struct AdminContext {
    pub admin: AdminUser,
    pub request: RequestMeta,
}

/// Constant-time comparison of the bearer token against `ADMIN_API_TOKEN`.
/// With no token configured every admin call is refused.
fn token_matches(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.config.admin_api_token.as_deref() else {
        return false;
    };
    let Some(presented) = extract_bearer_token(headers) else {
        return false;
    };
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

pub async fn admin_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !token_matches(&state, request.headers()) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let admin_id = request
        .headers()
        .get(ADMIN_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_string();

    let conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let admin = queries::get_active_admin_user(&conn, &admin_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::FORBIDDEN)?;
    drop(conn);

    let meta = RequestMeta::from_headers(request.headers());
    request.extensions_mut().insert(AdminContext {
        admin,
        request: meta,
    });
    Ok(next.run(request).await)
}
