// tests/translate_http.rs
use httpmock::prelude::*;
use serde_json::json;

use newswire_relay::notify::{LibreTranslate, Translator};

#[tokio::test]
async fn translated_text_is_returned() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/translate");
            then.status(200)
                .json_body(json!({ "translatedText": " Dólar sobe após decisão do Fed " }));
        })
        .await;

    let t = LibreTranslate::new(server.url("/translate"), "pt", None).unwrap();
    let out = t.translate("Dollar rises after Fed decision").await.unwrap();
    assert_eq!(out, "Dólar sobe após decisão do Fed");
}

#[tokio::test]
async fn backend_errors_surface() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/translate");
            then.status(503);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/blank");
            then.status(200).json_body(json!({ "translatedText": "   " }));
        })
        .await;

    let down = LibreTranslate::new(server.url("/translate"), "pt", Some("k".into())).unwrap();
    assert!(down.translate("x").await.is_err());
    let blank = LibreTranslate::new(server.url("/blank"), "pt", None).unwrap();
    assert!(blank.translate("x").await.is_err());
}
