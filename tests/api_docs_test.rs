mod common;

use axum::http::{Method, StatusCode};

use common::{read_json, TestApp};

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::GET, "/api-docs/openapi.json", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let doc = read_json(response).await;
    assert!(doc.get("openapi").is_some());
    let paths = doc
        .get("paths")
        .and_then(|p| p.as_object())
        .expect("document has a paths object");
    assert!(paths.contains_key("/api/v1/payments/webhook"));
    assert!(paths.contains_key("/api/v1/checkout/purchases"));
    assert!(paths.contains_key("/api/v1/tickets/validate/{credential}"));
}
