mod common;

use actix_web::http::StatusCode;
use actix_web::{test, App};
use gatekeeper::configure;
use serde_json::{json, Value};

use common::{registration, settings, state};

const INTERNAL_TOKEN: &str = "test_internal_token";

#[actix_web::test]
async fn test_join_and_position() {
    let (state, notifier) = state(settings(0));
    let app = test::init_service(
        App::new()
            .app_data(state.clone())
            .configure(|cfg| configure(cfg, INTERNAL_TOKEN)),
    )
    .await;

    for (index, email) in ["one@example.com", "two@example.com", "three@example.com"]
        .into_iter()
        .enumerate()
    {
        let resp = test::TestRequest::post()
            .uri("/auth/waiting-list")
            .set_json(json!({ "email": email }))
            .send_request(&app)
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["entry"]["email"], email);
        assert!(body["entry"].get("securityToken").is_none());
        assert_eq!(body["position"], index);
        assert_eq!(body["total"], index + 1);
    }

    let resp = test::TestRequest::post()
        .uri("/auth/waiting-list")
        .set_json(json!({ "email": "TWO@example.com" }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "email_already_in_waiting_list");

    let joined = notifier.sent_to("two@example.com");
    assert_eq!(joined.len(), 1);
    assert!(joined[0].text.contains("/waiting-list/position?email=two%40example.com"));

    let entry = state
        .stores
        .waiting_list
        .get_by_email("two@example.com")
        .await
        .unwrap()
        .unwrap();

    let resp = test::TestRequest::post()
        .uri("/auth/waiting-list/position")
        .set_json(json!({ "email": "two@example.com", "securityToken": "guess" }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "invalid_security_token");

    let resp = test::TestRequest::post()
        .uri("/auth/waiting-list/position")
        .set_json(json!({ "email": "nobody@example.com", "securityToken": entry.security_token }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = test::TestRequest::post()
        .uri("/auth/waiting-list/position")
        .set_json(json!({ "email": "two@example.com", "securityToken": entry.security_token }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "position": 1, "total": 3 }));
}

#[actix_web::test]
async fn test_promotion_invites_and_code_registers() {
    let (state, notifier) = state(settings(2));
    let app = test::init_service(
        App::new()
            .app_data(state.clone())
            .configure(|cfg| configure(cfg, INTERNAL_TOKEN)),
    )
    .await;

    for email in ["early@example.com", "middle@example.com", "late@example.com"] {
        let resp = test::TestRequest::post()
            .uri("/auth/waiting-list")
            .set_json(json!({ "email": email }))
            .send_request(&app)
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    let resp = test::TestRequest::post()
        .uri("/internal/waiting-list/promote")
        .insert_header(("Authorization", "Bearer test_internal_token"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = test::TestRequest::post()
        .uri("/internal/waiting-list/promote")
        .insert_header(("Authorization", INTERNAL_TOKEN))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let report: Value = test::read_body_json(resp).await;
    assert_eq!(report["succeeded"], 2);
    assert_eq!(report["failed"], json!([]));

    // Issued codes hold both spots.
    let resp = test::TestRequest::get().uri("/config").send_request(&app).await;
    let config: Value = test::read_body_json(resp).await;
    assert_eq!(config["remainingSpots"], 0);

    let resp = test::TestRequest::post()
        .uri("/auth/register")
        .set_json(registration("late@example.com"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let code = notifier.last_code_for("early@example.com").unwrap();
    assert_eq!(code.len(), 32);
    // Only the "you joined" message.
    assert_eq!(notifier.sent_to("late@example.com").len(), 1);

    let mut invited = registration("early@example.com");
    invited["waitingListCode"] = json!(code);
    let resp = test::TestRequest::post()
        .uri("/auth/register")
        .set_json(&invited)
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = test::TestRequest::post()
        .uri("/auth/register")
        .set_json(&invited)
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // A second run finds no free spot and leaves the last entry waiting.
    let resp = test::TestRequest::post()
        .uri("/internal/waiting-list/promote")
        .insert_header(("Authorization", INTERNAL_TOKEN))
        .send_request(&app)
        .await;
    let report: Value = test::read_body_json(resp).await;
    assert_eq!(report["succeeded"], 0);
    let late = state
        .stores
        .waiting_list
        .get_by_email("late@example.com")
        .await
        .unwrap()
        .unwrap();
    assert!(!late.has_code());
}
