#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::app::{AppState, Stores, build_router};
    use crate::core::config::Config;
    use crate::core::email::{EmailError, EmailMessage, EmailSender};

    /// Keeps every message it is asked to send
    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<EmailMessage>>,
    }

    impl RecordingMailer {
        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        /// Token from the link in the most recent message
        fn last_token(&self) -> String {
            let sent = self.sent.lock().unwrap();
            let text = &sent.last().expect("no email sent").text;
            let start = text.find("token=").expect("no token link") + "token=".len();
            text[start..]
                .split_whitespace()
                .next()
                .unwrap()
                .to_string()
        }
    }

    #[async_trait]
    impl EmailSender for RecordingMailer {
        async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    struct TestApp {
        router: Router,
        state: AppState,
        mailer: Arc<RecordingMailer>,
    }

    fn test_config(extra: &[(&str, &str)]) -> Config {
        let mut vars: HashMap<String, String> = HashMap::from([
            ("APP_ENV".to_string(), "test".to_string()),
            ("JWT_SECRET".to_string(), "integration_test_secret_32_bytes!!".to_string()),
            ("BCRYPT_COST".to_string(), "4".to_string()),
        ]);
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    fn test_app_with(extra: &[(&str, &str)]) -> TestApp {
        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState::from_config(&test_config(extra), Stores::memory(), mailer.clone());
        TestApp {
            router: build_router(state.clone()),
            state,
            mailer,
        }
    }

    fn test_app() -> TestApp {
        test_app_with(&[])
    }

    impl TestApp {
        async fn call(
            &self,
            method: Method,
            uri: &str,
            bearer: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = bearer {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, json)
        }

        async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
            self.call(Method::POST, uri, None, Some(body)).await
        }

        async fn register(&self, name: &str, email: &str, password: &str) -> Value {
            let (status, body) = self
                .post(
                    "/v1/auth/register",
                    json!({"name": name, "email": email, "password": password}),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
            body
        }

        async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
            self.post(
                "/v1/auth/login",
                json!({"email": email, "password": password}),
            )
            .await
        }

        /// Seed an admin and return its access token
        async fn admin_token(&self) -> String {
            self.state
                .users
                .ensure_admin("Admin", "admin@x.com", "admin1234")
                .await
                .unwrap();
            let (status, body) = self.login("admin@x.com", "admin1234").await;
            assert_eq!(status, StatusCode::OK);
            access_token(&body)
        }
    }

    fn access_token(body: &Value) -> String {
        body["tokens"]["access"]["token"]
            .as_str()
            .unwrap()
            .to_string()
    }

    fn refresh_token(body: &Value) -> String {
        body["tokens"]["refresh"]["token"]
            .as_str()
            .unwrap()
            .to_string()
    }

    // ========================================================================
    // Credential Flows
    // ========================================================================

    #[tokio::test]
    async fn test_register_login_reset_flow() {
        let app = test_app();

        let registered = app.register("Ada", "a@x.com", "password1").await;
        assert!(registered["tokens"]["access"]["expires"].is_string());
        assert_eq!(registered["user"]["email"], "a@x.com");
        assert_eq!(registered["user"]["role"], "user");
        assert_eq!(registered["user"]["isEmailVerified"], false);
        assert!(registered["user"].get("passwordHash").is_none());

        let (status, logged_in) = app.login("a@x.com", "password1").await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(access_token(&logged_in), access_token(&registered));
        assert_ne!(refresh_token(&logged_in), refresh_token(&registered));

        let (status, body) = app.login("a@x.com", "wrong").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], 401);

        let (status, _) = app
            .post("/v1/auth/forgot-password", json!({"email": "a@x.com"}))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let reset = app.mailer.last_token();

        let (status, _) = app
            .post(
                &format!("/v1/auth/reset-password?token={reset}"),
                json!({"password": "newpass12"}),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app.login("a@x.com", "password1").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = app.login("a@x.com", "newpass12").await;
        assert_eq!(status, StatusCode::OK);

        // Single use
        let (status, _) = app
            .post(
                &format!("/v1/auth/reset-password?token={reset}"),
                json!({"password": "another12"}),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Sessions from before the reset are over
        let (status, _) = app
            .post(
                "/v1/auth/refresh-tokens",
                json!({"refreshToken": refresh_token(&logged_in)}),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let app = test_app();
        app.register("Ada", "a@x.com", "password1").await;

        let (status, body) = app
            .post(
                "/v1/auth/register",
                json!({"name": "Other", "email": "A@X.com", "password": "password2"}),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], 409);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let app = test_app();

        let (status, _) = app
            .post(
                "/v1/auth/register",
                json!({"name": "Ada", "email": "not-an-email", "password": "password1"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .post(
                "/v1/auth/register",
                json!({"name": "Ada", "email": "a@x.com", "password": "short"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app
            .post("/v1/auth/register", json!({"email": "a@x.com"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 400);
    }

    #[tokio::test]
    async fn test_refresh_rotation_rejects_reuse() {
        let app = test_app();
        let registered = app.register("Ada", "a@x.com", "password1").await;
        let original = refresh_token(&registered);

        let (status, rotated) = app
            .post("/v1/auth/refresh-tokens", json!({"refreshToken": original}))
            .await;
        assert_eq!(status, StatusCode::OK);
        let new_refresh = rotated["refresh"]["token"].as_str().unwrap();
        assert_ne!(new_refresh, original);

        let (status, _) = app
            .post("/v1/auth/refresh-tokens", json!({"refreshToken": original}))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .post("/v1/auth/refresh-tokens", json!({"refreshToken": new_refresh}))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_logout() {
        let app = test_app();
        let registered = app.register("Ada", "a@x.com", "password1").await;
        let refresh = refresh_token(&registered);

        let (status, _) = app
            .post("/v1/auth/logout", json!({"refreshToken": refresh}))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app
            .post("/v1/auth/logout", json!({"refreshToken": refresh}))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app
            .post("/v1/auth/refresh-tokens", json!({"refreshToken": refresh}))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_forgot_password_unknown_email_is_silent() {
        let app = test_app();

        let (status, body) = app
            .post("/v1/auth/forgot-password", json!({"email": "ghost@x.com"}))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_null());
        assert_eq!(app.mailer.count(), 0);
    }

    #[tokio::test]
    async fn test_reset_password_requires_token_query() {
        let app = test_app();
        let (status, _) = app
            .post("/v1/auth/reset-password", json!({"password": "newpass12"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_email_verification_flow() {
        let app = test_app();
        let registered = app.register("Ada", "a@x.com", "password1").await;
        let access = access_token(&registered);
        let user_id = registered["user"]["id"].as_str().unwrap().to_string();

        let (status, _) = app
            .call(Method::POST, "/v1/auth/send-verification-email", None, None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .call(
                Method::POST,
                "/v1/auth/send-verification-email",
                Some(&access),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let verify = app.mailer.last_token();

        let (status, _) = app
            .call(
                Method::POST,
                &format!("/v1/auth/verify-email?token={verify}"),
                None,
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, user) = app
            .call(
                Method::GET,
                &format!("/v1/users/{user_id}"),
                Some(&access),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user["isEmailVerified"], true);

        let (status, _) = app
            .call(
                Method::POST,
                &format!("/v1/auth/verify-email?token={verify}"),
                None,
                None,
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // ========================================================================
    // Kind Confusion
    // ========================================================================

    #[tokio::test]
    async fn test_non_access_tokens_rejected_as_bearer() {
        let app = test_app();
        let registered = app.register("Ada", "a@x.com", "password1").await;
        let user_id = registered["user"]["id"].as_str().unwrap().to_string();

        app.post("/v1/auth/forgot-password", json!({"email": "a@x.com"}))
            .await;
        let reset = app.mailer.last_token();

        for token in [refresh_token(&registered), reset.clone()] {
            let (status, _) = app
                .call(
                    Method::GET,
                    &format!("/v1/users/{user_id}"),
                    Some(&token),
                    None,
                )
                .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }

        // An access token is not a reset token either
        let (status, _) = app
            .post(
                &format!(
                    "/v1/auth/reset-password?token={}",
                    access_token(&registered)
                ),
                json!({"password": "newpass12"}),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // The reset token survived the misuse above
        let (status, _) = app
            .post(
                &format!("/v1/auth/reset-password?token={reset}"),
                json!({"password": "newpass12"}),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_malformed_authorization_header() {
        let app = test_app();
        let registered = app.register("Ada", "a@x.com", "password1").await;
        let user_id = registered["user"]["id"].as_str().unwrap();

        let request = Request::builder()
            .method(Method::GET)
            .uri(format!("/v1/users/{user_id}"))
            .header(header::AUTHORIZATION, access_token(&registered))
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // ========================================================================
    // User Registry
    // ========================================================================

    #[tokio::test]
    async fn test_role_based_access() {
        let app = test_app();
        let ada = app.register("Ada", "a@x.com", "password1").await;
        let bob = app.register("Bob", "b@x.com", "password1").await;
        let ada_token = access_token(&ada);
        let ada_id = ada["user"]["id"].as_str().unwrap();
        let bob_id = bob["user"]["id"].as_str().unwrap();

        let (status, _) = app.call(Method::GET, "/v1/users", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = app
            .call(Method::GET, "/v1/users", Some(&ada_token), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], 403);

        let (status, _) = app
            .call(
                Method::GET,
                &format!("/v1/users/{ada_id}"),
                Some(&ada_token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app
            .call(
                Method::GET,
                &format!("/v1/users/{bob_id}"),
                Some(&ada_token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .call(
                Method::DELETE,
                &format!("/v1/users/{ada_id}"),
                Some(&ada_token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = app.admin_token().await;
        let (status, user) = app
            .call(
                Method::GET,
                &format!("/v1/users/{bob_id}"),
                Some(&admin),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user["name"], "Bob");
    }

    #[tokio::test]
    async fn test_admin_user_management() {
        let app = test_app();
        let admin = app.admin_token().await;

        let (status, created) = app
            .call(
                Method::POST,
                "/v1/users",
                Some(&admin),
                Some(json!({
                    "name": "Cy",
                    "email": "c@x.com",
                    "password": "password1",
                    "role": "admin"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["role"], "admin");
        let id = created["id"].as_str().unwrap().to_string();

        let (status, updated) = app
            .call(
                Method::PATCH,
                &format!("/v1/users/{id}"),
                Some(&admin),
                Some(json!({"name": "Cyrus"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["name"], "Cyrus");

        let (status, _) = app
            .call(
                Method::PATCH,
                &format!("/v1/users/{id}"),
                Some(&admin),
                Some(json!({"email": "admin@x.com"})),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = app
            .call(
                Method::DELETE,
                &format!("/v1/users/{id}"),
                Some(&admin),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app
            .call(Method::GET, &format!("/v1/users/{id}"), Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app
            .call(Method::GET, "/v1/users/not-a-uuid", Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_deleted_user_token_is_rejected() {
        let app = test_app();
        let ada = app.register("Ada", "a@x.com", "password1").await;
        let ada_id = ada["user"]["id"].as_str().unwrap().to_string();
        let admin = app.admin_token().await;

        app.call(
            Method::DELETE,
            &format!("/v1/users/{ada_id}"),
            Some(&admin),
            None,
        )
        .await;

        let (status, _) = app
            .post(
                "/v1/auth/refresh-tokens",
                json!({"refreshToken": refresh_token(&ada)}),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_pagination() {
        let app = test_app();
        for i in 0..25 {
            app.state
                .users
                .create_user(crate::core::users::service::CreateUserRequest {
                    name: format!("user{i:02}"),
                    email: format!("u{i}@x.com"),
                    password: "password1".to_string(),
                    role: Default::default(),
                })
                .await
                .unwrap();
        }
        let admin = app.admin_token().await;

        let (status, page) = app
            .call(
                Method::GET,
                "/v1/users?page=1&limit=10&role=user",
                Some(&admin),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["results"].as_array().unwrap().len(), 10);
        assert_eq!(page["page"], 1);
        assert_eq!(page["limit"], 10);
        assert_eq!(page["totalPages"], 3);
        assert_eq!(page["totalResults"], 25);

        let (status, page) = app
            .call(
                Method::GET,
                "/v1/users?page=9&limit=10&role=user",
                Some(&admin),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(page["results"].as_array().unwrap().is_empty());
        assert_eq!(page["totalResults"], 25);

        let (status, page) = app
            .call(
                Method::GET,
                "/v1/users?sortBy=name:asc&search=user0&scope=name",
                Some(&admin),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["totalResults"], 10);
        assert_eq!(page["results"][0]["name"], "user00");
    }

    // ========================================================================
    // Ambient Endpoints
    // ========================================================================

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let (status, body) = app.call(Method::GET, "/v1/health", None, None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["message"], "Server is running");
    }

    #[tokio::test]
    async fn test_unknown_route_uses_envelope() {
        let app = test_app();
        let (status, body) = app.call(Method::GET, "/v1/nope", None, None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], 404);
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let app = test_app_with(&[
            ("RATE_LIMIT_ENABLED", "true"),
            ("RATE_LIMIT_BURST", "2"),
            ("RATE_LIMIT_PER_SECOND", "1"),
        ]);

        for _ in 0..2 {
            let (status, _) = app.call(Method::GET, "/v1/health", None, None).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = app.call(Method::GET, "/v1/health", None, None).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], 429);
    }
}
