use crate::{
    controller::{health_check_controller, proxy_controller, user_session_controller},
    event_stream::handler as event_stream_handler,
    middleware::auth::{require_auth, require_login},
    AppState,
};
use axum::{
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};
use tower_http::services::ServeDir;

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(user_session_routes())
        .merge(proxy_routes(app_state.clone()))
        .merge(event_stream_routes(app_state.clone()))
        .fallback_service(static_routes(app_state))
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

// Login is open; logout needs a session.
fn user_session_routes() -> Router {
    Router::new().route(
        "/user_sessions",
        post(user_session_controller::login).merge(
            delete(user_session_controller::delete).route_layer(from_fn(require_auth)),
        ),
    )
}

fn proxy_routes(app_state: AppState) -> Router {
    let mount_prefix = app_state
        .config()
        .proxy_mount_prefix
        .trim_end_matches('/')
        .to_string();

    Router::new()
        .route(
            &format!("{mount_prefix}/*path"),
            get(proxy_controller::forward)
                .post(proxy_controller::forward)
                .put(proxy_controller::forward)
                .patch(proxy_controller::forward)
                .delete(proxy_controller::forward),
        )
        .route_layer(from_fn(require_auth))
        .with_state(app_state)
}

fn event_stream_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/events", get(event_stream_handler::events_handler))
        .route("/events/status", get(event_stream_handler::status_handler))
        .route_layer(from_fn(require_auth))
        .with_state(app_state)
}

// Everything else is the UI: static assets behind the login redirect.
fn static_routes(app_state: AppState) -> Router {
    let router = match app_state.config().static_dir() {
        Some(static_dir) => Router::new().fallback_service(ServeDir::new(static_dir)),
        None => Router::new().fallback(|| async { StatusCode::NOT_FOUND }),
    };

    router.layer(from_fn_with_state(app_state, require_login))
}


#[cfg(test)]
// sea-orm's mock feature removes the Clone trait implementation from DatabaseConnection,
// so database-backed router tests only build with it enabled.
// see https://github.com/SeaQL/sea-orm/issues/830
#[cfg(feature = "mock")]
mod authenticated_tests {
    use crate::test_support::{
        app_state_with_backend, app_state_with_relay, authenticated_db, ChannelUpstream,
        TEST_EMAIL, TEST_PASSWORD,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header::SET_COOKIE, Request, StatusCode},
        Router,
    };
    use axum_login::tower_sessions::MemoryStore;
    use futures::StreamExt;
    use mockito::Server;
    use relay::{Manager, RelayMessage, RelayOptions};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;
    use tower::ServiceExt;

    fn app(backend_url: &str) -> Router {
        crate::app(
            app_state_with_backend(authenticated_db(4), backend_url),
            MemoryStore::default(),
        )
    }

    async fn login(app: &Router) -> String {
        let request = Request::builder()
            .method("POST")
            .uri("/user_sessions")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(format!(
                "email={TEST_EMAIL}&password={TEST_PASSWORD}"
            )))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let set_cookie = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|c| c.to_str().ok())
            .expect("Login should return session cookie");
        set_cookie
            .split(';')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    #[tokio::test]
    async fn authenticated_request_is_forwarded_and_answer_relayed() {
        let mut server = Server::new_async().await;
        let backend = server
            .mock("POST", "/items/5/retry")
            .match_header("x-api-key", "test-key")
            .match_header("content-type", "application/json")
            .match_body("{}")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;
        let app = app(&server.url());
        let cookie = login(&app).await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/items/5/retry")
            .header("cookie", &cookie)
            .body(Body::from("{}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        backend.assert_async().await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#"{"success":true}"#);
    }

    #[tokio::test]
    async fn authenticated_traversal_is_rejected_with_400() {
        let mut server = Server::new_async().await;
        let backend = server
            .mock("GET", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let app = app(&server.url());
        let cookie = login(&app).await;

        let request = Request::builder()
            .uri("/api/items/%2e%2e/admin")
            .header("cookie", &cookie)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        backend.assert_async().await;
    }

    #[tokio::test]
    async fn authenticated_relay_status_is_reported() {
        let app = app("http://127.0.0.1:1");
        let cookie = login(&app).await;

        let request = Request::builder()
            .uri("/events/status")
            .header("cookie", &cookie)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(status["state"], "disconnected");
        assert_eq!(status["subscribers"], 0);
    }

    #[tokio::test]
    async fn event_stream_delivers_relayed_messages_as_sse_frames() {
        let (upstream, feed) = ChannelUpstream::new();
        let relay = Arc::new(Manager::new(Arc::new(upstream), RelayOptions::default()));
        let app = crate::app(
            app_state_with_relay(authenticated_db(1), Arc::clone(&relay)),
            MemoryStore::default(),
        );
        let cookie = login(&app).await;

        let request = Request::builder()
            .uri("/events")
            .header("cookie", &cookie)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        assert_eq!(relay.status().subscribers, 1);

        feed.send(RelayMessage::new("event_update", "x")).unwrap();
        let mut body = response.into_body().into_data_stream();
        let frame = timeout(Duration::from_secs(5), body.next())
            .await
            .expect("no event arrived in time")
            .unwrap()
            .unwrap();
        assert_eq!(&frame[..], b"event: event_update\ndata: x\n\n");

        relay.shutdown().await;
        assert!(body.next().await.is_none());
    }
}
