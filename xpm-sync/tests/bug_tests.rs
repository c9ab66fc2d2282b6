//! Bug tracker task tests

mod helpers;

use helpers::*;
use serde_json::json;
use xpm_common::config::TomlConfig;
use xpm_common::db::init_memory_database;
use xpm_common::{ExperimentStatus, ExperimentType};
use xpm_sync::db::notifications;
use xpm_sync::remote::RemoteError;
use xpm_sync::services::bugs::{
    add_experiment_comment_task, create_experiment_bug, create_experiment_bug_task, format_bug_body,
};
use xpm_sync::TaskError;

#[tokio::test]
async fn test_unknown_owner_retries_without_assignee() {
    let pool = init_memory_database().await.unwrap();
    let fakes = Fakes::new();
    let config = TomlConfig::default();

    let experiment = create_with_status(&pool, new_experiment("bugged", ExperimentType::Pref), ExperimentStatus::Draft).await;

    fakes.bugs.respond(json!({"error": true, "code": 51, "message": "There is no user named owner"}));
    fakes.bugs.respond(json!({"id": 4321}));

    let bug_id = create_experiment_bug(fakes.bugs.as_ref(), &config, &experiment).await.unwrap();
    assert_eq!(bug_id, 4321);

    let filed = fakes.bugs.filed.lock().unwrap();
    assert_eq!(filed.len(), 2);
    assert_eq!(filed[0].assigned_to.as_deref(), Some(OWNER));
    assert_eq!(filed[1].assigned_to, None);
    assert_eq!(filed[1].summary, "[Experiment]: pref Experiment: bugged");
}

#[tokio::test]
async fn test_other_error_codes_are_not_retried() {
    let pool = init_memory_database().await.unwrap();
    let fakes = Fakes::new();
    let config = TomlConfig::default();

    let experiment = create_with_status(&pool, new_experiment("bugged", ExperimentType::Pref), ExperimentStatus::Draft).await;
    fakes.bugs.respond(json!({"error": true, "code": 32000, "message": "boom"}));

    let result = create_experiment_bug(fakes.bugs.as_ref(), &config, &experiment).await;
    assert!(matches!(result, Err(RemoteError::Api { code: Some(32000), .. })));
    assert_eq!(fakes.bugs.filed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_related_bug_urls_become_ids() {
    let pool = init_memory_database().await.unwrap();
    let fakes = Fakes::new();
    let config = TomlConfig::default();

    let mut input = new_experiment("linked", ExperimentType::Pref);
    input.data_science_bugzilla_url = Some("https://bugzilla.example.com/show_bug.cgi?id=111".to_string());
    input.feature_bugzilla_url = Some("https://bugzilla.example.com/show_bug.cgi?id=222".to_string());
    let experiment = create_with_status(&pool, input, ExperimentStatus::Draft).await;

    create_experiment_bug(fakes.bugs.as_ref(), &config, &experiment).await.unwrap();

    let filed = fakes.bugs.filed.lock().unwrap();
    assert_eq!(filed[0].see_also, vec![111]);
    assert_eq!(filed[0].blocks, vec![222]);
}

#[tokio::test]
async fn test_bug_task_stores_id_and_notifies() {
    let pool = init_memory_database().await.unwrap();
    let fakes = Fakes::new();
    let config = TomlConfig::default();

    let experiment = create_with_status(&pool, new_experiment("tracked", ExperimentType::Pref), ExperimentStatus::Draft).await;
    fakes.bugs.respond(json!({"id": 777}));

    let bug_id = create_experiment_bug_task(&pool, fakes.bugs.as_ref(), &config, "dev@example.com", "tracked")
        .await
        .unwrap();
    assert_eq!(bug_id, 777);
    assert_eq!(reload(&pool, experiment.id).await.bugzilla_id, Some(777));

    let notes = notifications::list_for_user(&pool, "dev@example.com").await.unwrap();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].message.contains("show_bug.cgi?id=777"));
}

#[tokio::test]
async fn test_bug_task_failure_notifies_and_propagates() {
    let pool = init_memory_database().await.unwrap();
    let fakes = Fakes::new();
    let config = TomlConfig::default();

    let experiment = create_with_status(&pool, new_experiment("broken", ExperimentType::Pref), ExperimentStatus::Draft).await;
    fakes.bugs.respond(json!({"error": true, "code": 100, "message": "nope"}));

    let result = create_experiment_bug_task(&pool, fakes.bugs.as_ref(), &config, "dev@example.com", "broken").await;
    assert!(matches!(result, Err(TaskError::Remote(_))));
    assert_eq!(reload(&pool, experiment.id).await.bugzilla_id, None);

    let notes = notifications::list_for_user(&pool, "dev@example.com").await.unwrap();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].message.contains("failed"));
}

#[tokio::test]
async fn test_comment_skipped_for_internal_only() {
    let pool = init_memory_database().await.unwrap();
    let fakes = Fakes::new();

    let mut input = new_experiment("secret", ExperimentType::Pref);
    input.risk_internal_only = true;
    input.bugzilla_id = Some(5);
    create_with_status(&pool, input, ExperimentStatus::Draft).await;

    let result = add_experiment_comment_task(&pool, fakes.bugs.as_ref(), "dev@example.com", "secret")
        .await
        .unwrap();
    assert_eq!(result, None);
    assert!(fakes.bugs.comments.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_comment_posts_variant_summary() {
    let pool = init_memory_database().await.unwrap();
    let fakes = Fakes::new();

    let mut input = new_experiment("public", ExperimentType::Pref);
    input.bugzilla_id = Some(5);
    input.pref_name = Some("browser.feature.enabled".to_string());
    let experiment = create_with_status(&pool, input, ExperimentStatus::Draft).await;
    fakes.bugs.respond(json!({"id": 99}));

    let result = add_experiment_comment_task(&pool, fakes.bugs.as_ref(), "dev@example.com", "public")
        .await
        .unwrap();
    assert_eq!(result, Some(99));

    let comments = fakes.bugs.comments.lock().unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].0, 5);
    assert_eq!(comments[0].1, format_bug_body(&experiment));
    assert!(comments[0].1.contains("browser.feature.enabled"));
    assert!(comments[0].1.contains("treatment"));
}
