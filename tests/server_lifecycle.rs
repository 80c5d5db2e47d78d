//! End-to-end tests of the protocol server over an in-memory connection.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{
    first_text, is_error, server, session, session_with_events, test_config, write_units,
};
use modular_tools_mcp::browser::memory::MemoryDriver;
use modular_tools_mcp::discovery::{Discovery, INDEX_MARKER};
use modular_tools_mcp::mcp::{ControlEvent, McpServer, ServerState, TransportError};
use modular_tools_mcp::tools::ToolContext;

#[tokio::test]
async fn missing_tools_dir_is_created_and_server_still_reaches_ready() {
    let root = tempfile::tempdir().unwrap();
    let tools_dir = root.path().join("tools");
    let mut server = server(&tools_dir, &MemoryDriver::new());

    let result = session(&mut server, |mut client| async move {
        let init = client.initialize().await;
        assert_eq!(init["protocolVersion"], "2024-11-05");
        assert_eq!(init["serverInfo"]["name"], "modular-tools-mcp");

        let tools = client.request("tools/list", json!({})).await;
        assert_eq!(tools["result"], json!({"tools": []}));
    })
    .await;

    assert!(result.is_ok());
    assert!(tools_dir.join(INDEX_MARKER).is_file());
    assert!(server.last_report().unwrap().created_dir);
    assert_eq!(server.state(), ServerState::Closed);
}

#[tokio::test]
async fn requests_before_the_handshake_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(dir.path(), &MemoryDriver::new());

    session(&mut server, |mut client| async move {
        let early = client.request("tools/list", json!({})).await;
        assert_eq!(early["error"]["code"], -32600);
        assert_eq!(early["error"]["message"], "Server not initialised");

        let ping = client.request("ping", json!({})).await;
        assert_eq!(ping["result"], json!({}));

        client.initialize().await;
        let again = client
            .request(
                "initialize",
                json!({"protocolVersion": "2024-11-05", "capabilities": {}}),
            )
            .await;
        assert_eq!(again["error"]["code"], -32600);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn add_renders_integral_results_without_fraction() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("calculator", "{}")]);
    let mut server = server(dir.path(), &MemoryDriver::new());

    session(&mut server, |mut client| async move {
        client.initialize().await;

        let tools = client.request("tools/list", json!({})).await;
        let names: Vec<_> = tools["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["add", "multiply", "calculate"]);
        assert_eq!(
            tools["result"]["tools"][0]["inputSchema"]["required"],
            json!(["a", "b"])
        );

        let result = client.call("add", json!({"a": 2, "b": 3})).await;
        assert_eq!(
            result,
            json!({"content": [{"type": "text", "text": "2 + 3 = 5"}]})
        );
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn unknown_tools_and_failing_handlers_do_not_stop_the_server() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("calculator", "{}"), ("files", "{}")]);
    let mut server = server(dir.path(), &MemoryDriver::new());

    session(&mut server, |mut client| async move {
        client.initialize().await;

        let unknown = client.call("teleport", json!({})).await;
        assert!(is_error(&unknown));
        assert_eq!(first_text(&unknown), "Unknown tool: teleport");

        let failed = client.call("calculate", json!({"expression": "1/0"})).await;
        assert!(is_error(&failed));
        assert!(first_text(&failed).starts_with("Error executing tool calculate"));

        let missing = client
            .call("read_file", json!({"file_path": "/definitely/not/here.txt"}))
            .await;
        assert!(is_error(&missing));

        let next = client.call("multiply", json!({"a": "4", "b": 2.5})).await;
        assert!(!is_error(&next));
        assert_eq!(first_text(&next), "4 × 2.5 = 10");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn resources_and_prompts_are_empty_or_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(dir.path(), &MemoryDriver::new());

    session(&mut server, |mut client| async move {
        let init = client.initialize().await;
        assert_eq!(init["capabilities"]["tools"]["listChanged"], true);

        let resources = client.request("resources/list", json!({})).await;
        assert_eq!(resources["result"], json!({"resources": []}));
        let prompts = client.request("prompts/list", json!({})).await;
        assert_eq!(prompts["result"], json!({"prompts": []}));

        let read = client
            .request("resources/read", json!({"uri": "file:///etc/hosts"}))
            .await;
        assert_eq!(read["error"]["code"], -32001);
        let prompt = client
            .request("prompts/get", json!({"name": "summarise"}))
            .await;
        assert_eq!(prompt["error"]["code"], -32001);

        let unknown = client.request("sampling/createMessage", json!({})).await;
        assert_eq!(unknown["error"]["code"], -32601);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn notifications_get_no_reply() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(dir.path(), &MemoryDriver::new());

    session(&mut server, |mut client| async move {
        client.initialize().await;
        client.notify("notifications/cancelled").await;
        client.notify("notifications/whatever").await;

        let id = client.send_request("ping", json!({})).await;
        let next = client.recv().await.unwrap();
        assert_eq!(next["id"], id);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn malformed_input_is_answered_then_the_connection_closes() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(dir.path(), &MemoryDriver::new());

    let result = session(&mut server, |mut client| async move {
        client.initialize().await;
        client.send_line("{oops").await;

        let error = client.recv().await.unwrap();
        assert_eq!(error["error"]["code"], -32700);
        assert!(error["id"].is_null());
        assert!(client.recv().await.is_none());
    })
    .await;

    assert!(matches!(result, Err(TransportError::Malformed { .. })));
    assert_eq!(server.state(), ServerState::Closed);
}

#[tokio::test]
async fn independent_calls_overlap() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("calculator", "{}"), ("web_content", "{}")]);
    let mut server = server(dir.path(), &MemoryDriver::new());

    session(&mut server, |mut client| async move {
        client.initialize().await;

        let slow = client
            .send_call(
                "get_dynamic_webpage",
                json!({"url": "example.com", "wait_time": 500}),
            )
            .await;
        let fast = client.send_call("add", json!({"a": 1, "b": 1})).await;

        let first = client.recv().await.unwrap();
        assert_eq!(first["id"], fast);
        let second = client.recv().await.unwrap();
        assert_eq!(second["id"], slow);
        assert!(!is_error(&second["result"]));
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn shutdown_drains_in_flight_calls_and_closes_the_session() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("browser", "{}"), ("web_content", "{}")]);
    let driver = MemoryDriver::new();
    let mut server = server(dir.path(), &driver);

    session(&mut server, |mut client| async move {
        client.initialize().await;
        let navigated = client.call("navigate", json!({"url": "example.com"})).await;
        assert!(!is_error(&navigated));

        let slow = client
            .send_call(
                "get_dynamic_webpage",
                json!({"url": "example.org", "wait_time": 200}),
            )
            .await;
        client.close().await;

        let reply = client.reply_to(slow).await;
        assert!(!is_error(&reply["result"]));
        assert!(client.recv().await.is_none());
    })
    .await
    .unwrap();

    assert_eq!(server.state(), ServerState::Closed);
    // One browser for the session, one for the page fetch; both closed.
    assert_eq!(driver.launches(), 2);
    assert_eq!(driver.closed(), 2);
    assert!(server.context().sessions.info().await.is_none());
}

#[tokio::test]
async fn deeply_nested_expressions_are_refused_and_serving_continues() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("calculator", "{}")]);
    let mut server = server(dir.path(), &MemoryDriver::new());

    session(&mut server, |mut client| async move {
        client.initialize().await;

        let nested = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        let refused = client.call("calculate", json!({"expression": nested})).await;
        assert!(is_error(&refused));

        let signs = client
            .call("calculate", json!({"expression": "-".repeat(1_000) + "1"}))
            .await;
        assert!(is_error(&signs));
        assert!(first_text(&signs).contains("nested too deeply"));

        let added = client.call("add", json!({"a": 1, "b": 1})).await;
        assert_eq!(first_text(&added), "1 + 1 = 2");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn timed_out_page_fetch_closes_its_browser() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("web_content", "{}")]);
    let driver = MemoryDriver::new();
    let mut config = test_config();
    config.server.tool_timeout_secs = 1;
    let context = ToolContext::with_driver(
        Arc::new(config),
        reqwest::Client::new(),
        Arc::new(driver.clone()),
    );
    let mut server = McpServer::from_parts(context, Discovery::new(dir.path()));

    session(&mut server, |mut client| async move {
        client.initialize().await;
        let fetched = client
            .call(
                "get_dynamic_webpage",
                json!({"url": "example.com", "wait_time": 5000}),
            )
            .await;
        assert!(is_error(&fetched));
        assert!(first_text(&fetched).contains("timed out after 1s"));
    })
    .await
    .unwrap();

    for _ in 0..100 {
        if driver.closed() == driver.launches() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(driver.launches(), 1);
    assert_eq!(driver.closed(), 1);
}

#[tokio::test]
async fn rediscovery_while_ready_notifies_the_client() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("calculator", r#"{"tools": ["add"]}"#)]);
    let tools_dir = dir.path().to_path_buf();
    let mut server = server(dir.path(), &MemoryDriver::new());

    session_with_events(&mut server, |mut client, events| async move {
        client.initialize().await;
        let before = client.request("tools/list", json!({})).await;
        assert_eq!(before["result"]["tools"].as_array().unwrap().len(), 1);

        write_units(&tools_dir, &[("calculator", "{}")]);
        events.send(ControlEvent::Rediscover).await.unwrap();

        let notification = client.recv().await.unwrap();
        assert_eq!(notification["method"], "notifications/tools/list_changed");
        assert!(notification.get("id").is_none());

        let after = client.request("tools/list", json!({})).await;
        let names: Vec<_> = after["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|tool| tool["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["add", "multiply", "calculate"]);
    })
    .await
    .unwrap();

    let report = server.last_report().unwrap();
    assert_eq!(report.registered, ["add", "multiply", "calculate"]);
}

#[tokio::test]
async fn shutdown_event_ends_the_connection() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(dir.path(), &MemoryDriver::new());

    let result = session_with_events(&mut server, |mut client, events| async move {
        client.initialize().await;
        events.send(ControlEvent::Shutdown("test")).await.unwrap();
        assert!(client.recv().await.is_none());
    })
    .await;

    assert!(result.is_ok());
    assert_eq!(server.state(), ServerState::Closed);
}
