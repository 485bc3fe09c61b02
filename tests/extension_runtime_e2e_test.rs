//! End-to-end runs of a real extension process over the extension socket

mod common;

use common::{echo_manifest, Host};
use lantern_extensions::{ExtensionId, UiEvent, LOADING_TEXT};
use lantern_ipc::{Action, ResultItem};
use serde_json::json;
use std::time::Duration;

fn echo_id() -> ExtensionId {
    ExtensionId::new("com.github.lantern.echo")
}

#[tokio::test]
async fn test_query_reaches_extension_and_results_come_back() {
    let mut host = Host::start(&[("com.github.lantern.echo", echo_manifest("ec"))]).await;
    host.run_connected("com.github.lantern.echo").await;

    assert_eq!(
        host.handle.handle_query("ec hello world").await.unwrap(),
        Some(echo_id())
    );
    assert_eq!(
        host.next_ui_event().await,
        UiEvent::ShowResults {
            ext_id: echo_id(),
            results: vec![ResultItem::new("main: hello world").with_description("hello")],
        }
    );

    // launch-only trigger and custom activation take the same path
    host.handle
        .launch_trigger("com.github.lantern.echo", "about")
        .await
        .unwrap();
    assert_eq!(
        host.next_ui_event().await,
        UiEvent::ShowResults {
            ext_id: echo_id(),
            results: vec![ResultItem::new("launched about")],
        }
    );

    host.handle
        .activate_custom("com.github.lantern.echo", json!({ "page": 2 }))
        .await
        .unwrap();
    match host.next_ui_event().await {
        UiEvent::ShowResults { results, .. } => assert_eq!(results[0].name, r#"{"page":2}"#),
        other => panic!("unexpected UI event {:?}", other),
    }

    host.shutdown().await;
}

#[tokio::test]
async fn test_preferences_are_delivered_to_the_process() {
    let mut host = Host::start(&[("com.github.lantern.echo", echo_manifest("ec"))]).await;
    host.run_connected("com.github.lantern.echo").await;

    host.handle.handle_query("ec env").await.unwrap();
    let UiEvent::ShowResults { results, .. } = host.next_ui_event().await else {
        panic!("expected results");
    };
    let env: serde_json::Value = serde_json::from_str(&results[0].description).unwrap();
    assert_eq!(env, json!({ "main": "ec", "greeting": "hello" }));

    // a changed preference is visible to the next query
    host.handle
        .update_preference("com.github.lantern.echo", "greeting", json!("hi"))
        .await
        .unwrap();
    host.handle.handle_query("ec there").await.unwrap();
    assert_eq!(
        host.next_ui_event().await,
        UiEvent::ShowResults {
            ext_id: echo_id(),
            results: vec![ResultItem::new("main: there").with_description("hi")],
        }
    );

    host.shutdown().await;
}

#[tokio::test]
async fn test_keyword_override_reroutes_queries() {
    let mut host = Host::start(&[
        ("com.github.lantern.echo", echo_manifest("ec")),
        ("com.github.lantern.other", echo_manifest("ot")),
    ])
    .await;
    host.run_connected("com.github.lantern.echo").await;
    host.run_connected("com.github.lantern.other").await;

    assert_eq!(host.handle.handle_query("zz nothing").await.unwrap(), None);

    host.handle
        .set_keyword("com.github.lantern.other", "main", "o")
        .await
        .unwrap();
    assert_eq!(host.handle.handle_query("ot x").await.unwrap(), None);
    assert_eq!(
        host.handle.handle_query("o x").await.unwrap(),
        Some(ExtensionId::new("com.github.lantern.other"))
    );
    match host.next_ui_event().await {
        UiEvent::ShowResults { ext_id, .. } => assert_eq!(ext_id.as_str(), "com.github.lantern.other"),
        other => panic!("unexpected UI event {:?}", other),
    }

    host.shutdown().await;
}

#[tokio::test]
async fn test_copy_action_hides_window() {
    let mut host = Host::start(&[("com.github.lantern.echo", echo_manifest("ec"))]).await;
    host.run_connected("com.github.lantern.echo").await;

    host.handle.handle_query("ec copy some text").await.unwrap();
    assert_eq!(
        host.next_ui_event().await,
        UiEvent::RunAction {
            ext_id: echo_id(),
            action: Action::copy("some text"),
        }
    );
    assert_eq!(host.next_ui_event().await, UiEvent::Hide);

    host.shutdown().await;
}

#[tokio::test]
async fn test_loading_placeholder_for_slow_extension() {
    // registered by hand and never answers
    let mut host = Host::start_with(
        &[("com.github.lantern.echo", echo_manifest("ec"))],
        |config| config.runtime.loading_delay = Duration::from_millis(50),
    )
    .await;
    let _silent = lantern_ipc::ExtensionClient::connect(
        host.socket_path(),
        "com.github.lantern.echo",
        lantern_ipc::WireCodec::Json,
    )
    .await
    .unwrap();
    host.wait_connected("com.github.lantern.echo").await;

    host.handle.handle_query("ec slow").await.unwrap();
    match host.next_ui_event().await {
        UiEvent::ShowResults { results, .. } => {
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].name, LOADING_TEXT);
            assert!(results[0].icon.as_deref().unwrap().ends_with("images/icon.svg"));
        }
        other => panic!("unexpected UI event {:?}", other),
    }

    host.shutdown().await;
}

#[tokio::test]
async fn test_stopped_extension_disconnects() {
    let host = Host::start(&[("com.github.lantern.echo", echo_manifest("ec"))]).await;
    host.run_connected("com.github.lantern.echo").await;
    assert!(host.handle.is_running("com.github.lantern.echo").await.unwrap());

    host.handle.stop("com.github.lantern.echo").await.unwrap();
    assert!(!host.handle.is_running("com.github.lantern.echo").await.unwrap());
    host.wait_disconnected("com.github.lantern.echo").await;
    assert_eq!(host.handle.handle_query("ec gone").await.unwrap(), None);

    // an explicit stop is not a failure
    assert!(host
        .handle
        .get_error("com.github.lantern.echo")
        .await
        .unwrap()
        .is_none());

    host.shutdown().await;
}

#[tokio::test]
async fn test_run_all_and_reload() {
    let host = Host::start(&[
        ("com.github.lantern.echo", echo_manifest("ec")),
        ("com.github.lantern.other", echo_manifest("ot")),
    ])
    .await;

    let started = host.handle.run_all().await.unwrap();
    assert_eq!(started.len(), 2);
    host.wait_connected("com.github.lantern.echo").await;
    host.wait_connected("com.github.lantern.other").await;
    assert!(host.handle.run_all().await.unwrap().is_empty());

    let outcomes = host.handle.reload([echo_id()]).await.unwrap();
    assert!(outcomes[0].1.is_ok());
    assert!(host.handle.is_running("com.github.lantern.echo").await.unwrap());
    host.wait_connected("com.github.lantern.echo").await;

    assert_eq!(host.handle.stop_all().await.unwrap(), 2);
    host.shutdown().await;
}
