//! The shared browser session as seen by an MCP client.

mod common;

use std::time::Duration;

use serde_json::json;

use common::{first_text, is_error, server, session, write_units};
use modular_tools_mcp::browser::memory::MemoryDriver;

#[tokio::test]
async fn navigate_then_click_reuses_the_page() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("browser", "{}")]);
    let driver = MemoryDriver::new();
    let mut server = server(dir.path(), &driver);

    session(&mut server, |mut client| async move {
        client.initialize().await;

        let navigated = client.call("navigate", json!({"url": "example.com"})).await;
        assert!(!is_error(&navigated));
        assert!(first_text(&navigated).starts_with("Navigated to https://example.com"));

        let clicked = client.call("click", json!({"selector": "#x"})).await;
        assert_eq!(first_text(&clicked), "Clicked element matching #x");
    })
    .await
    .unwrap();

    assert_eq!(driver.launches(), 1);
    assert!(driver
        .operations()
        .iter()
        .any(|op| op == "begin b0p0 click #x"));
}

#[tokio::test]
async fn page_tools_fail_softly_without_a_session() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("browser", "{}")]);
    let driver = MemoryDriver::new();
    let mut server = server(dir.path(), &driver);

    session(&mut server, |mut client| async move {
        client.initialize().await;

        let clicked = client.call("click", json!({"selector": "#x"})).await;
        assert!(is_error(&clicked));
        assert!(first_text(&clicked).contains("No active browser session"));

        let text = client.call("get_text_content", json!({})).await;
        assert!(is_error(&text));
    })
    .await
    .unwrap();

    assert_eq!(driver.launches(), 0);
}

#[tokio::test]
async fn a_page_opened_by_a_click_becomes_current() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("browser", "{}")]);
    let driver = MemoryDriver::new();
    driver.open_on_click("a.popup", "https://example.com/popup");
    let mut server = server(dir.path(), &driver);

    session(&mut server, |mut client| async move {
        client.initialize().await;
        client.call("navigate", json!({"url": "example.com"})).await;

        let clicked = client.call("click", json!({"selector": "a.popup"})).await;
        assert_eq!(
            first_text(&clicked),
            "Clicked element matching a.popup; switched to newly opened page https://example.com/popup"
        );

        let text = client.call("get_text_content", json!({})).await;
        assert_eq!(
            first_text(&text),
            "Visible text on the page:\nContent of https://example.com/popup"
        );
    })
    .await
    .unwrap();

    assert_eq!(driver.launches(), 1);
}

#[tokio::test]
async fn a_popup_that_never_finishes_loading_still_frees_the_session() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("browser", "{}")]);
    let driver = MemoryDriver::new();
    driver.open_on_click("a.popup", "https://example.com/stuck");
    driver.stall_page_loads();
    let mut server = server(dir.path(), &driver);

    session(&mut server, |mut client| async move {
        client.initialize().await;
        client.call("navigate", json!({"url": "example.com"})).await;

        let clicked = tokio::time::timeout(
            Duration::from_secs(5),
            client.call("click", json!({"selector": "a.popup"})),
        )
        .await
        .expect("click held the session");
        assert!(!is_error(&clicked));

        let text = client.call("get_text_content", json!({})).await;
        assert_eq!(
            first_text(&text),
            "Visible text on the page:\nContent of https://example.com/stuck"
        );
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn concurrent_stateful_calls_never_interleave() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("browser", "{}")]);
    let driver = MemoryDriver::with_step_delay(Duration::from_millis(20));
    let mut server = server(dir.path(), &driver);

    session(&mut server, |mut client| async move {
        client.initialize().await;
        client.call("navigate", json!({"url": "example.com"})).await;

        let ids = [
            client
                .send_call("fill", json!({"selector": "#q", "value": "rust"}))
                .await,
            client
                .send_call("get_html_content", json!({"selector": "main"}))
                .await,
            client
                .send_call("screenshot", json!({"name": "home"}))
                .await,
            client
                .send_call("evaluate", json!({"script": "document.title"}))
                .await,
        ];
        for id in ids {
            let reply = client.reply_to(id).await;
            assert!(!is_error(&reply["result"]), "call {id} failed: {reply}");
        }
    })
    .await
    .unwrap();

    let operations = driver.operations();
    assert!(operations.len() >= 10);
    for pair in operations.chunks(2) {
        let begin = pair[0].strip_prefix("begin ").unwrap();
        let end = pair[1].strip_prefix("end ").unwrap();
        assert_eq!(begin, end, "interleaved operations: {operations:?}");
    }
}

#[tokio::test]
async fn close_browser_ends_the_session() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("browser", "{}")]);
    let driver = MemoryDriver::new();
    let mut server = server(dir.path(), &driver);
    let sessions = std::sync::Arc::clone(&server.context().sessions);

    session(&mut server, |mut client| async move {
        client.initialize().await;
        client.call("navigate", json!({"url": "example.com"})).await;
        assert!(sessions.info().await.is_some());

        let closed = client.call("close_browser", json!({})).await;
        assert_eq!(first_text(&closed), "Browser session closed");
        assert!(sessions.info().await.is_none());

        let again = client.call("close_browser", json!({})).await;
        assert_eq!(first_text(&again), "No active browser session to close");

        let clicked = client.call("click", json!({"selector": "#x"})).await;
        assert!(is_error(&clicked));
    })
    .await
    .unwrap();

    assert_eq!(driver.launches(), 1);
    assert_eq!(driver.closed(), 1);
}
