use crate::controller::ApiResponse;
use crate::error::{Error as WebError, Result as WebResult};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use domain::error::{DomainErrorKind, EntityErrorKind, Error as DomainError, InternalErrorKind};
use domain::user::{AuthSession, Credentials};
use log::*;
use serde_json::json;

/// Logs the user in and returns a new session cookie.
///
/// Successful login will return a session cookie with id, e.g.:
/// set-cookie: id=07bbbe54-bd35-425f-8e63-618a8d8612df; HttpOnly; SameSite=Lax; Path=/; Max-Age=86399
///
/// The cookie must accompany every later request, e.g.:
/// curl -v --header "Cookie: id=07bbbe54-bd35-425f-8e63-618a8d8612df" http://localhost:4000/api/items
///
/// When the form carries a local `next` path (set by the login page after a redirect), the
/// response is a 303 back to it instead of the JSON body.
pub async fn login(
    mut auth_session: AuthSession,
    Form(creds): Form<Credentials>,
) -> WebResult<Response> {
    let next = creds.next.clone();
    let user = match auth_session.authenticate(creds.clone()).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!("Authentication failed, invalid user: {:?}", creds.email);
            return Err(unauthenticated(None));
        }
        Err(auth_error) => {
            warn!("Authentication failed with error: {auth_error:?}");
            return Err(unauthenticated(Some(Box::new(auth_error))));
        }
    };

    if let Err(login_error) = auth_session.login(&user).await {
        warn!("Session login failed: {login_error:?}");
        return Err(WebError::from(DomainError {
            source: Some(Box::new(login_error)),
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Other(
                "Session login failed".to_string(),
            )),
        }));
    }

    if let Some(next) = next.as_deref().filter(|next| is_local_path(next)) {
        debug!("Login of {} redirects to {next}", user.email);
        return Ok(Redirect::to(next).into_response());
    }

    let user_session_json = json!({
        "id": user.id,
        "email": user.email,
        "display_name": user.display_name,
        "role": user.role,
    });

    debug!("user_session_json: {user_session_json}");

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), user_session_json)).into_response())
}

/// Logs the user out by destroying their session.
/// Test this with curl: curl -v \
/// --header "Cookie: id=07bbbe54-bd35-425f-8e63-618a8d8612df" \
/// --request DELETE http://localhost:4000/user_sessions
pub async fn delete(mut auth_session: AuthSession) -> impl IntoResponse {
    trace!("UserSessionController::delete()");
    match auth_session.logout().await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(err) => {
            warn!("Logout failed: {err:?}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn unauthenticated(source: Option<Box<dyn std::error::Error + Send + Sync>>) -> WebError {
    WebError::from(DomainError {
        source,
        error_kind: DomainErrorKind::Internal(InternalErrorKind::Entity(
            EntityErrorKind::Unauthenticated,
        )),
    })
}

// Only same-origin absolute paths; "//host" and "/\host" would leave the site.
fn is_local_path(next: &str) -> bool {
    next.starts_with('/') && !next.starts_with("//") && !next.starts_with("/\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_local_paths_are_followed_after_login() {
        assert!(is_local_path("/page?tab=queue"));
        assert!(!is_local_path("//evil.example.com"));
        assert!(!is_local_path("/\\evil.example.com"));
        assert!(!is_local_path("https://evil.example.com"));
        assert!(!is_local_path(""));
    }
}
