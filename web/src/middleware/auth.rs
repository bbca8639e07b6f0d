use crate::AppState;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use domain::user::AuthSession;
use domain::users;
use log::*;

/// Outcome of checking a request's session.
#[derive(Debug)]
pub enum Authorization {
    Identity(users::Model),
    Unauthenticated,
}

/// Resolves the identity behind the request's session cookie.
///
/// axum-login has already looked the session up through the identity provider by the time
/// this runs, so nothing else about the request is consulted.
pub fn authorize(auth_session: &AuthSession) -> Authorization {
    match &auth_session.user {
        Some(user) => Authorization::Identity(user.clone()),
        None => Authorization::Unauthenticated,
    }
}

/// Authentication middleware that returns 401 Unauthorized for unauthenticated requests.
///
/// For API endpoints, we want to return proper HTTP status codes instead of redirects.
pub async fn require_auth(auth_session: AuthSession, request: Request, next: Next) -> Response {
    match authorize(&auth_session) {
        Authorization::Identity(_user) => next.run(request).await,
        Authorization::Unauthenticated => {
            debug!("Rejecting unauthenticated request to {}", request.uri().path());
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}

/// Authentication middleware for interactive pages: unauthenticated requests are redirected
/// to the login page with the original location in `next`. The login page stays reachable.
pub async fn require_login(
    State(app_state): State<AppState>,
    auth_session: AuthSession,
    request: Request,
    next: Next,
) -> Response {
    let login_path = app_state.config().login_path.as_str();
    if is_login_page(request.uri().path(), login_path) {
        return next.run(request).await;
    }

    match authorize(&auth_session) {
        Authorization::Identity(_user) => next.run(request).await,
        Authorization::Unauthenticated => {
            let original = request
                .uri()
                .path_and_query()
                .map(|path_and_query| path_and_query.as_str())
                .unwrap_or("/");
            trace!("Redirecting unauthenticated page request for {original} to {login_path}");
            Redirect::to(&format!(
                "{login_path}?next={}",
                urlencoding::encode(original)
            ))
            .into_response()
        }
    }
}

fn is_login_page(path: &str, login_path: &str) -> bool {
    let login_path = login_path.trim_end_matches('/');
    path == login_path
        || path
            .strip_prefix(login_path)
            .is_some_and(|rest| rest.starts_with('/') || rest.starts_with('.'))
}
