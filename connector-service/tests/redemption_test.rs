mod common;

use axum::http::{header, StatusCode};
use common::{body_text, location, session_cookie, test_config, TestApp, LANDING_PATH};
use connector_service::models::TokenState;
use tower::ServiceExt;

#[tokio::test]
async fn redeemed_link_opens_a_session_on_the_dashboard() {
    let app = TestApp::new();
    let created = app.provision("a@x.com", "demo.myshopify.com").await;

    let res = app.visit(&created.auth_url, None).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), LANDING_PATH);
    assert_eq!(res.headers()[header::CACHE_CONTROL], "no-store");
    let cookie = session_cookie(&res).expect("session cookie");

    let page = app.visit(LANDING_PATH, Some(&cookie)).await;
    assert_eq!(page.status(), StatusCode::OK);
    let html = body_text(page).await;
    assert!(html.contains("a@x.com"));
    assert!(html.contains("demo.myshopify.com"));
}

#[tokio::test]
async fn dashboard_without_session_is_unauthorized() {
    let app = TestApp::new();
    let res = app.visit(LANDING_PATH, None).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unreadable_session_is_a_server_error_not_a_logout() {
    use axum::{body::Body, http::Request, routing::get, Router};
    use connector_service::{handlers::app::dashboard, SESSION_COOKIE_NAME};
    use tower_sessions::{MemoryStore, Session, SessionManagerLayer};

    let app = TestApp::new();
    let router = Router::new()
        .route(
            "/poison",
            get(|session: Session| async move {
                session.insert("account_id", "not-a-number").await.unwrap();
            }),
        )
        .route(LANDING_PATH, get(dashboard))
        .layer(SessionManagerLayer::new(MemoryStore::default()).with_name(SESSION_COOKIE_NAME))
        .with_state(app.state.clone());

    let res = router
        .clone()
        .oneshot(Request::get("/poison").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let cookie = session_cookie(&res).expect("session cookie");

    let res = router
        .oneshot(
            Request::get(LANDING_PATH)
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_text(res).await.contains("Session unavailable"));
}

#[tokio::test]
async fn superseded_token_is_rejected() {
    let app = TestApp::new();
    let first = app.provision("a@x.com", "demo.myshopify.com").await;
    let second = app.provision("a@x.com", "demo.myshopify.com").await;
    assert!(second.user_exists);

    let stale = app.visit(&first.auth_url, None).await;
    assert_eq!(stale.status(), StatusCode::UNAUTHORIZED);
    assert!(session_cookie(&stale).is_none());
    assert_eq!(stale.headers()[header::CACHE_CONTROL], "no-store");

    let fresh = app.visit(&second.auth_url, None).await;
    assert_eq!(fresh.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn expired_token_is_rejected_with_expiry_page() {
    let app = TestApp::new();
    let created = app.provision("a@x.com", "demo.myshopify.com").await;

    app.clock.advance(chrono::Duration::hours(24) + chrono::Duration::seconds(1));

    let res = app.visit(&created.auth_url, None).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(body_text(res).await.contains("expired"));
    assert!(matches!(
        app.state.tokens.token_state(created.user_id).await.unwrap(),
        TokenState::Expired { .. }
    ));
}

#[tokio::test]
async fn token_can_be_revisited_until_superseded() {
    let app = TestApp::new();
    let created = app.provision("a@x.com", "demo.myshopify.com").await;

    for _ in 0..2 {
        let res = app.visit(&created.auth_url, None).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
    }
}

#[tokio::test]
async fn single_use_mode_rejects_the_second_visit() {
    let mut config = test_config();
    config.token.single_use = true;
    let app = TestApp::with_config(config);
    let created = app.provision("a@x.com", "demo.myshopify.com").await;

    assert_eq!(app.visit(&created.auth_url, None).await.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        app.visit(&created.auth_url, None).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert!(matches!(
        app.state.tokens.token_state(created.user_id).await.unwrap(),
        TokenState::Redeemed { .. }
    ));
}

#[tokio::test]
async fn head_request_does_not_redeem_the_link() {
    use axum::{body::Body, http::Request};

    let mut config = test_config();
    config.token.single_use = true;
    let app = TestApp::with_config(config);
    let created = app.provision("a@x.com", "demo.myshopify.com").await;

    let preview = app
        .send(
            Request::head(common::local_part(&created.auth_url))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert!(session_cookie(&preview).is_none());
    assert!(matches!(
        app.state.tokens.token_state(created.user_id).await.unwrap(),
        TokenState::Issued { .. }
    ));

    let res = app.visit(&created.auth_url, None).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert!(session_cookie(&res).is_some());
}

#[tokio::test]
async fn tampered_token_is_rejected() {
    let app = TestApp::new();
    let res = app.visit("/?auth_token=bm90LWpzb24%3D", None).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = app.visit("/?auth_token=***", None).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_is_stripped_and_other_parameters_kept() {
    let app = TestApp::new();
    let created = app.provision("a@x.com", "demo.myshopify.com").await;
    let token_query = created.auth_url.split_once('?').unwrap().1;

    let res = app
        .visit(&format!("/dashboard/?tab=orders&{}", token_query), None)
        .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/dashboard/?tab=orders");
}

#[tokio::test]
async fn protocol_relative_paths_redirect_to_the_landing_page() {
    let app = TestApp::new();
    let created = app.provision("a@x.com", "demo.myshopify.com").await;
    let token_query = created.auth_url.split_once('?').unwrap().1;

    let res = app
        .visit(&format!("//evil.example/?{}", token_query), None)
        .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), LANDING_PATH);
}

#[tokio::test]
async fn first_token_fails_after_second_issuance() {
    // a@x.com / demo.myshopify.com: T1 then T2, only T2 redeems
    let app = TestApp::new();
    let t1 = app.provision("a@x.com", "demo.myshopify.com").await;
    let t2 = app.provision("a@x.com", "demo.myshopify.com").await;

    assert!(!t1.user_exists);
    assert!(t2.user_exists);
    assert_eq!(t1.user_id, 1);
    assert_eq!(t2.user_id, 1);
    assert_ne!(t1.auth_url, t2.auth_url);

    assert_eq!(app.visit(&t1.auth_url, None).await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.visit(&t2.auth_url, None).await.status(), StatusCode::SEE_OTHER);
}
