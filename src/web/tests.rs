use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::api::build_router;
use crate::app::test_support::test_state;

struct Member {
    token: String,
    csrf: String,
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn page(uri: &str, member: Option<&Member>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(member) = member {
        builder = builder.header(header::COOKIE, format!("session={}", member.token));
    }
    builder.body(Body::empty()).unwrap()
}

fn form(uri: &str, member: Option<&Member>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(member) = member {
        builder = builder.header(header::COOKIE, format!("session={}", member.token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn api(app: &Router, method: &str, uri: &str, member: &Member, body: Value) -> Value {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", member.token))
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = send(app, request).await;
    assert!(response.status().is_success(), "{} {} -> {}", method, uri, response.status());
    serde_json::from_str(&body_text(response).await).unwrap()
}

async fn join(app: &Router, username: &str) -> Member {
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "username": username,
                "email": format!("{}@example.com", username),
                "password": "kidney2024",
            })
            .to_string(),
        ))
        .unwrap();
    let response = send(app, request).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    Member {
        token: body["token"].as_str().unwrap().to_string(),
        csrf: body["csrf_token"].as_str().unwrap().to_string(),
    }
}

fn location(response: &Response) -> &str {
    response.headers()[header::LOCATION].to_str().unwrap()
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_home_page_renders_in_requested_language() {
    let app = build_router(test_state().await);

    let response = send(&app, page("/", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("<html lang=\"en\">"));
    assert!(html.contains("Stories from our community"));

    let html = body_text(send(&app, page("/?lang=es", None)).await).await;
    assert!(html.contains("Inicio"));
    assert!(html.contains("Historias de nuestra comunidad"));
}

#[tokio::test]
async fn test_unknown_page_renders_error_template() {
    let app = build_router(test_state().await);
    let response = send(&app, page("/no/such/page", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let html = body_text(response).await;
    assert!(html.contains("Something went wrong"));
    assert!(html.contains("This page does not exist"));
}

#[tokio::test]
async fn test_member_pages_redirect_to_login() {
    let app = build_router(test_state().await);
    for uri in ["/my-stories", "/write", "/notifications", "/profile"] {
        let response = send(&app, page(uri, None)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "{}", uri);
        assert_eq!(location(&response), "/login");
        assert!(set_cookies(&response).iter().any(|c| c.starts_with("flash=")));
    }

    let response = send(&app, page("/login", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("name=\"username_or_email\""));
}

#[tokio::test]
async fn test_login_form_sets_session_and_flash() {
    let app = build_router(test_state().await);
    join(&app, "ana").await;

    let response = send(
        &app,
        form("/login", None, "username_or_email=ana&password=wrong-pass1&next=%2Fmy-stories"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("/login"));

    let response = send(
        &app,
        form("/login", None, "username_or_email=ana&password=kidney2024&next=%2Fmy-stories"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/my-stories");
    let cookies = set_cookies(&response);
    assert!(cookies.iter().any(|c| c.starts_with("session=")));
    assert!(cookies.iter().any(|c| c.starts_with("flash=")));

    // Other sites are never a redirect target
    let response = send(
        &app,
        form("/login", None, "username_or_email=ana&password=kidney2024&next=%2F%2Fevil.example"),
    )
    .await;
    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn test_register_form_checks_password_confirmation() {
    let app = build_router(test_state().await);
    let response = send(
        &app,
        form(
            "/register",
            None,
            "username=ana&email=ana%40example.com&password=kidney2024&password_confirm=kidney2025",
        ),
    )
    .await;
    assert_eq!(location(&response), "/register");

    let response = send(
        &app,
        form(
            "/register",
            None,
            "username=ana&email=ana%40example.com&password=kidney2024&password_confirm=kidney2024&preferred_language=es",
        ),
    )
    .await;
    assert_eq!(location(&response), "/");
    assert!(set_cookies(&response).iter().any(|c| c.starts_with("session=")));
}

#[tokio::test]
async fn test_forms_require_csrf_token() {
    let app = build_router(test_state().await);
    let ana = join(&app, "ana").await;

    let body = "title=My+first+year&body=Dialysis+three+times+a+week&language=en&action=save";
    let response = send(&app, form("/write", Some(&ana), &format!("{}&csrf_token=forged", body))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(body_text(response).await.contains("Something went wrong"));

    let response = send(
        &app,
        form("/write", Some(&ana), &format!("{}&csrf_token={}", body, ana.csrf)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("/stories/my-first-year"));
}

#[tokio::test]
async fn test_story_page_shows_rendered_body_and_comments() {
    let app = build_router(test_state().await);
    let admin = join(&app, "ana").await;
    let ben = join(&app, "ben").await;

    let story = api(
        &app,
        "POST",
        "/api/v1/stories",
        &ben,
        json!({"title": "Waiting for a kidney", "body": "Some days are **hard**.", "language": "en"}),
    )
    .await;
    let id = story["id"].as_i64().unwrap();
    let slug = story["slug"].as_str().unwrap().to_string();
    api(&app, "POST", &format!("/api/v1/stories/{}/submit", id), &ben, json!({})).await;
    api(&app, "POST", &format!("/api/v1/moderation/stories/{}/approve", id), &admin, json!({})).await;

    let response = send(
        &app,
        form(
            &format!("/stories/{}/comments", id),
            Some(&admin),
            &format!("content=Stay+strong&csrf_token={}", admin.csrf),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let response = send(&app, page(&format!("/stories/{}", slug), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("<strong>hard</strong>"));
    assert!(html.contains("Stay strong"));

    // A missing language falls back to the original with a notice
    let html = body_text(send(&app, page(&format!("/stories/{}?lang=es", slug), None)).await).await;
    assert!(html.contains("<strong>hard</strong>"));
    assert!(html.contains("This story is not yet available in your language."));
}

#[tokio::test]
async fn test_moderation_page_is_staff_only() {
    let app = build_router(test_state().await);
    let admin = join(&app, "ana").await;
    let ben = join(&app, "ben").await;

    let response = send(&app, page("/moderation", Some(&ben))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(&app, page("/moderation", Some(&admin))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, page("/admin", Some(&admin))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("failed in 24h"));
}

#[tokio::test]
async fn test_language_switch_sets_cookie_and_returns() {
    let app = build_router(test_state().await);
    let request = Request::builder()
        .uri("/language/es")
        .header(header::REFERER, "http://localhost:8080/?tag=diet&lang=en")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/?tag=diet");
    assert!(set_cookies(&response).iter().any(|c| c.starts_with("lang=es")));

    let response = send(&app, page("/language/xx", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_static_stylesheet_is_served() {
    let app = build_router(test_state().await);
    let response = send(&app, page("/static/style.css", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css");
}

#[tokio::test]
async fn test_login_ignores_next_with_hidden_characters() {
    let app = build_router(test_state().await);
    join(&app, "ana").await;

    for next in ["%2F%09%2Fevil.example", "%2F%0A%2Fevil.example", "%2F%0D%0A%2Fevil.example"] {
        let response = send(
            &app,
            form(
                "/login",
                None,
                &format!("username_or_email=ana&password=kidney2024&next={}", next),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "{}", next);
        assert_eq!(location(&response), "/", "{}", next);
    }
}

#[tokio::test]
async fn test_non_ascii_slug_is_percent_encoded_in_redirects() {
    let app = build_router(test_state().await);
    let ana = join(&app, "ana").await;

    let response = send(
        &app,
        form(
            "/write",
            Some(&ana),
            &format!(
                "title=Stra%C3%9Fe&body=Unterwegs+zur+Dialyse&language=de&action=save&csrf_token={}",
                ana.csrf
            ),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/stories/stra%C3%9Fe");

    let response = send(&app, page("/stories/stra%C3%9Fe", Some(&ana))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Unterwegs zur Dialyse"));
}
