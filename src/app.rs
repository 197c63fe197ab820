use std::net::SocketAddr;
use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use crate::state::AppState;
use crate::users;

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1",
              Router::new()
                  .merge(users::router())
                  .route("/health", get(|| async { "ok" }))
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, ?latency, "response");
                        } else {
                            tracing::info!(%status, ?latency, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
        .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod router_tests {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::build_app;
    use crate::config::AccountsConfig;
    use crate::state::AppState;

    const PASSWORD: &str = "piggy-bank-2024";

    async fn call(app: &axum::Router, method: &str, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let res = app
            .clone()
            .oneshot(req.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn register_and_login(app: &axum::Router) -> Value {
        let (status, _) = call(
            app,
            "POST",
            "/api/v1/auth/register",
            None,
            json!({
                "first_name": "Pat", "last_name": "Doe", "username": "pat",
                "email": "pat@example.com", "password1": PASSWORD, "password2": PASSWORD
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = call(
            app,
            "POST",
            "/api/v1/auth/login",
            None,
            json!({ "email": "pat@example.com", "password": PASSWORD }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = build_app(AppState::fake());
        let res = app
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_stores_hash_and_returns_public_record() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/auth/register",
            None,
            json!({
                "first_name": "Pat", "last_name": "Doe", "username": "pat",
                "email": "pat@example.com", "password1": PASSWORD, "password2": PASSWORD
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["username"], "pat");
        assert!(body.get("password1").is_none());

        let stored = state.users.find_by_email("pat@example.com").await.unwrap().unwrap();
        assert_ne!(stored.password_hash, PASSWORD);
        assert!(stored.check_password(PASSWORD).unwrap());
    }

    #[tokio::test]
    async fn register_without_names_creates_nothing() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/auth/register",
            None,
            json!({ "email": "pat@example.com", "password1": PASSWORD, "password2": PASSWORD }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["first_name"], json!(["First name is required"]));
        assert_eq!(body["last_name"], json!(["Last name is required"]));
        assert_eq!(body["username"], json!(["Username is required"]));
        assert!(state.users.find_by_email("pat@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn register_with_mistyped_field_is_a_validation_error() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/auth/register",
            None,
            json!({
                "first_name": "Pat", "last_name": "Doe", "username": 5,
                "email": "pat@example.com", "password1": PASSWORD, "password2": PASSWORD
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.is_object());
        assert_eq!(body["non_field_errors"].as_array().unwrap().len(), 1);
        assert!(state.users.find_by_email("pat@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn login_with_unparseable_body_is_a_validation_error() {
        let app = build_app(AppState::fake());
        for (content_type, body) in [(Some("application/json"), "{not json"), (None, "{}")] {
            let mut req = Request::builder().method("POST").uri("/api/v1/auth/login");
            if let Some(content_type) = content_type {
                req = req.header(header::CONTENT_TYPE, content_type);
            }
            let res = app.clone().oneshot(req.body(Body::from(body)).unwrap()).await.unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
            let bytes = res.into_body().collect().await.unwrap().to_bytes();
            let value: Value = serde_json::from_slice(&bytes).unwrap();
            assert!(value["non_field_errors"].is_array());
        }
    }

    #[tokio::test]
    async fn login_returns_token_pair_and_public_user() {
        let app = build_app(AppState::fake());
        let body = register_and_login(&app).await;
        assert!(body["access"].as_str().is_some());
        assert!(body["refresh"].as_str().is_some());
        let user = body["user"].as_object().unwrap();
        assert_eq!(user.len(), 5);
        assert!(!user.contains_key("password_hash"));
    }

    #[tokio::test]
    async fn login_records_last_login_when_enabled() {
        let state = AppState::fake_with(AccountsConfig {
            update_last_login: true,
            ..AccountsConfig::default()
        });
        let app = build_app(state.clone());
        register_and_login(&app).await;
        let stored = state.users.find_by_email("pat@example.com").await.unwrap().unwrap();
        assert!(stored.last_login.is_some());
    }

    #[tokio::test]
    async fn login_leaves_last_login_untouched_by_default() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        register_and_login(&app).await;
        let stored = state.users.find_by_email("pat@example.com").await.unwrap().unwrap();
        assert!(stored.last_login.is_none());
    }

    #[tokio::test]
    async fn me_requires_access_token() {
        let app = build_app(AppState::fake());
        let tokens = register_and_login(&app).await;

        let (status, _) = call(&app, "GET", "/api/v1/users/me", None, Value::Null).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let refresh = tokens["refresh"].as_str().unwrap();
        let (status, _) = call(&app, "GET", "/api/v1/users/me", Some(refresh), Value::Null).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let access = tokens["access"].as_str().unwrap();
        let (status, body) = call(&app, "GET", "/api/v1/users/me", Some(access), Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "pat@example.com");
    }

    #[tokio::test]
    async fn refresh_issues_new_pair() {
        let app = build_app(AppState::fake());
        let tokens = register_and_login(&app).await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/auth/refresh",
            None,
            json!({ "refresh": tokens["refresh"] }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["access"].as_str().is_some());

        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/auth/refresh",
            None,
            json!({ "refresh": tokens["access"] }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn change_password_then_login_with_new_one() {
        let app = build_app(AppState::fake());
        let tokens = register_and_login(&app).await;
        let access = tokens["access"].as_str().unwrap();

        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/users/me/password",
            Some(access),
            json!({
                "current_password": PASSWORD,
                "new_password": "fresh-start-1",
                "confirm_new_password": "fresh-start-1"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/auth/login",
            None,
            json!({ "email": "pat@example.com", "password": "fresh-start-1" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn change_email_reports_field_keys() {
        let app = build_app(AppState::fake());
        let tokens = register_and_login(&app).await;
        let access = tokens["access"].as_str().unwrap();

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/users/me/email",
            Some(access),
            json!({
                "new_email": "new@example.com",
                "confirm_new_email": "other@example.com",
                "current_password": "wrong"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.get("current_password").is_some());
        assert!(body.get("email_mismatch").is_some());

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/users/me/email",
            Some(access),
            json!({
                "new_email": "new@example.com",
                "confirm_new_email": "new@example.com",
                "current_password": PASSWORD
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "new@example.com");
    }

    #[tokio::test]
    async fn upload_profile_image_multipart() {
        let app = build_app(AppState::fake());
        let tokens = register_and_login(&app).await;
        let access = tokens["access"].as_str().unwrap();

        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"me.png\"\r\nContent-Type: image/png\r\n\r\npngdata\r\n--{b}--\r\n",
            b = boundary
        );
        let req = Request::builder()
            .method("PUT")
            .uri("/api/v1/users/me/image")
            .header(header::AUTHORIZATION, format!("Bearer {}", access))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        let url = value["image"].as_str().unwrap();
        assert!(url.starts_with("https://fake.local/profile_images/1/"));

        let (status, body) = call(&app, "GET", "/api/v1/users/me/image", Some(access), Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["image"].as_str().unwrap().ends_with(".png"));
    }
}
