use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use errand_core::{ActionId, ActionKind, QueuedAction, SyncResult};
use serde_json::json;

use crate::cli::CompletionShell;
use crate::commands::clear::run_clear;
use crate::commands::common::{
    dispatch_order, format_action_lines, format_relative_time, format_result_line,
    format_timestamp, normalize_action_identifier, open_manager, parse_payload,
    resolve_action_id,
};
use crate::commands::completions::run_completions;
use crate::commands::config::merge_config_init;
use crate::commands::enqueue::run_enqueue;
use crate::commands::remove::run_remove;
use crate::config::CliConfig;
use crate::error::CliError;

fn action_with_id(id: &str, kind: ActionKind) -> QueuedAction {
    let mut action = QueuedAction::new(kind, json!({}));
    action.id = id.parse::<ActionId>().unwrap();
    action
}

#[test]
fn parse_payload_defaults_to_empty_object() {
    assert_eq!(parse_payload(None).unwrap(), json!({}));
    assert_eq!(parse_payload(Some("  ")).unwrap(), json!({}));
    assert_eq!(
        parse_payload(Some(r#"{"text": "hi"}"#)).unwrap(),
        json!({"text": "hi"})
    );
}

#[test]
fn parse_payload_rejects_invalid_json() {
    assert!(matches!(
        parse_payload(Some("{text")),
        Err(CliError::InvalidPayload(_))
    ));
}

#[test]
fn normalize_action_identifier_trims_and_rejects_empty() {
    assert_eq!(
        normalize_action_identifier("  0199ABCD ").unwrap(),
        "0199abcd".to_string()
    );
    assert!(matches!(
        normalize_action_identifier("   "),
        Err(CliError::EmptyActionId)
    ));
}

#[test]
fn resolve_action_id_accepts_full_id_and_unique_prefix() {
    let queue = vec![
        action_with_id("11111111-1111-7111-8111-111111111111", ActionKind::SendMessage),
        action_with_id("22222222-2222-7222-8222-222222222222", ActionKind::RateUser),
    ];

    assert_eq!(
        resolve_action_id("11111111-1111-7111-8111-111111111111", &queue).unwrap(),
        queue[0].id
    );
    assert_eq!(resolve_action_id("2222", &queue).unwrap(), queue[1].id);
    assert!(matches!(
        resolve_action_id("3333", &queue),
        Err(CliError::ActionNotFound(_))
    ));
}

#[test]
fn resolve_action_id_reports_ambiguous_prefix() {
    let queue = vec![
        action_with_id("11111111-1111-7111-8111-111111111111", ActionKind::SendMessage),
        action_with_id("11111111-1111-7111-8111-222222222222", ActionKind::SendMessage),
    ];

    let error = resolve_action_id("1111", &queue).unwrap_err();
    assert!(matches!(error, CliError::AmbiguousActionId(_)));
    assert!(error.to_string().contains("11111111-1111"));
}

#[test]
fn dispatch_order_sorts_by_priority_and_keeps_age() {
    let queue = vec![
        QueuedAction::new(ActionKind::RateUser, json!({"n": 1})),
        QueuedAction::new(ActionKind::AcceptTask, json!({"n": 2})),
        QueuedAction::new(ActionKind::UpdateProfile, json!({"n": 3})),
        QueuedAction::new(ActionKind::SwitchMode, json!({"n": 4})),
    ];

    let ordered = dispatch_order(queue)
        .into_iter()
        .map(|action| action.payload["n"].clone())
        .collect::<Vec<_>>();
    assert_eq!(ordered, vec![json!(2), json!(4), json!(1), json!(3)]);
}

#[test]
fn format_action_lines_include_kind_attempts_and_error() {
    let mut action = QueuedAction::new(ActionKind::PurchasePowerup, json!({}));
    action.attempts = 2;
    action.last_error = Some("HTTP 503: unavailable".to_string());

    let lines = format_action_lines(&[action]);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("purchase_powerup"));
    assert!(lines[0].contains("high"));
    assert!(lines[0].contains("attempts=2"));
    assert!(lines[0].contains("last error: HTTP 503: unavailable"));
}

#[test]
fn format_result_line_marks_outcome() {
    let id = ActionId::new();
    let ok = format_result_line(&SyncResult::succeeded(id, ActionKind::SendMessage));
    assert!(ok.starts_with("ok"));
    assert!(ok.contains(&id.to_string()));

    let failed = format_result_line(&SyncResult::failed(
        id,
        ActionKind::SendMessage,
        "device is offline",
    ));
    assert!(failed.starts_with("failed"));
    assert!(failed.ends_with("device is offline"));
}

#[test]
fn format_timestamp_returns_utc_label() {
    assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
}

#[test]
fn merge_config_init_keeps_unset_values() {
    let existing = CliConfig {
        api_base_url: Some("https://old.example.com".to_string()),
        api_token: Some("token".to_string()),
        ..CliConfig::default()
    };

    let merged = merge_config_init(
        existing,
        Some("https://new.example.com/".to_string()),
        None,
        None,
    )
    .unwrap();
    assert_eq!(
        merged.api_base_url.as_deref(),
        Some("https://new.example.com")
    );
    assert_eq!(merged.api_token.as_deref(), Some("token"));
}

#[test]
fn merge_config_init_rejects_non_http_url() {
    let result = merge_config_init(
        CliConfig::default(),
        Some("ftp://example.com".to_string()),
        None,
        None,
    );
    assert!(matches!(result, Err(CliError::Config(_))));
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn enqueue_persists_action_to_database() {
    let db_path = unique_test_db_path();
    let config = CliConfig::default();

    run_enqueue("send-message", Some(r#"{"text": "hi"}"#), &db_path, &config)
        .await
        .unwrap();

    let manager = open_manager(&db_path, &config, false).await.unwrap();
    let queue = manager.get_queue().await;
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].kind, ActionKind::SendMessage);
    assert_eq!(queue[0].payload, json!({"text": "hi"}));
    drop(manager);

    cleanup_db_files(&db_path);
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn enqueue_rejects_unknown_kind() {
    let db_path = unique_test_db_path();

    let result = run_enqueue("launch_rocket", None, &db_path, &CliConfig::default()).await;
    assert!(matches!(result, Err(CliError::Core(_))));

    cleanup_db_files(&db_path);
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "current_thread")]
async fn remove_and_clear_update_database() {
    let db_path = unique_test_db_path();
    let config = CliConfig::default();

    let (first, second) = {
        let manager = open_manager(&db_path, &config, false).await.unwrap();
        let first = manager
            .enqueue(ActionKind::CreateTask, json!({}), false)
            .await;
        let second = manager.enqueue(ActionKind::RateUser, json!({}), false).await;
        (first, second)
    };

    run_remove(&first.to_string(), &db_path, &config)
        .await
        .unwrap();
    {
        let manager = open_manager(&db_path, &config, false).await.unwrap();
        let ids = manager
            .get_queue()
            .await
            .iter()
            .map(|action| action.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![second]);
    }

    run_clear(&db_path, &config).await.unwrap();
    let manager = open_manager(&db_path, &config, false).await.unwrap();
    assert_eq!(manager.get_queue_count().await, 0);
    drop(manager);

    cleanup_db_files(&db_path);
}

#[test]
fn run_completions_writes_bash_script_to_output_file() {
    let output_path = std::env::temp_dir().join(format!(
        "errand-completions-{}.bash",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_nanos())
    ));

    run_completions(CompletionShell::Bash, Some(&output_path)).unwrap();

    let script = std::fs::read_to_string(&output_path).unwrap();
    assert!(script.contains("_errand()"));
    assert!(script.contains("complete -F _errand"));

    let _ = std::fs::remove_file(output_path);
}

fn unique_test_db_path() -> PathBuf {
    static NEXT_TEST_DB_ID: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    let sequence = NEXT_TEST_DB_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("errand-cli-test-{timestamp}-{sequence}.db"))
}

fn cleanup_db_files(path: &PathBuf) {
    // libsql on Windows can hold file handles briefly after drop
    if cfg!(windows) {
        return;
    }

    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(path.with_extension("db-shm"));
    let _ = std::fs::remove_file(path.with_extension("db-wal"));
}
