//! Fusion synthesizer tests

mod helpers;

use dref_etl::models::ledger::{TransformKind, TransformStatus, TransformationKey};
use dref_etl::models::report::{TransformOutcome, TransformSummary};
use dref_etl::models::table::{ColumnSpec, TableDefinition, TableRef};
use dref_etl::EtlError;
use helpers::{append, column_values, row, seed_bronze, Pipeline};
use serde_json::json;

fn completed(outcome: TransformOutcome) -> TransformSummary {
    match outcome {
        TransformOutcome::Completed(summary) => summary,
        other => panic!("expected a completed fusion, got {:?}", other),
    }
}

fn fusion_key() -> TransformationKey {
    TransformationKey::new("spells", "fusion_spells", TransformKind::Fusion)
}

fn fusion_target() -> TableRef {
    TableRef::new("spells", "fusion_spells")
}

/// spells_phb (3 rows) and spells_xge (2 rows) in bronze
async fn seed_spells(pipeline: &Pipeline) -> TableRef {
    let phb = seed_bronze(
        &pipeline.bronze,
        "spells",
        "spells_phb",
        &["name", "level"],
        vec![
            json!({"name": "Fireball", "level": "3"}),
            json!({"name": "Shield", "level": "1"}),
            json!({"name": "Wish", "level": "9"}),
        ],
    )
    .await;
    seed_bronze(
        &pipeline.bronze,
        "spells",
        "spells_xge",
        &["name", "school"],
        vec![
            json!({"name": "Toll the Dead", "school": "N"}),
            json!({"name": "Mind Sliver", "school": "E"}),
        ],
    )
    .await;
    phb
}

#[tokio::test]
async fn test_fusion_keeps_provenance() {
    let pipeline = Pipeline::new();
    let phb = seed_spells(&pipeline).await;

    let summary = completed(
        pipeline
            .fusion()
            .fuse("spells", "spells_", "fusion_spells")
            .await
            .unwrap(),
    );
    assert_eq!(summary.row_count, 5);
    assert_eq!(summary.sources, vec!["spells_phb", "spells_xge"]);
    assert!(summary.failed_sources.is_empty());

    let rows = pipeline.silver.rows(&fusion_target()).await.unwrap();
    let from = |source: &str| {
        rows.iter()
            .filter(|r| r["source_table"] == json!(source))
            .collect::<Vec<_>>()
    };
    assert_eq!(from("spells_phb").len(), 3);
    assert_eq!(from("spells_xge").len(), 2);

    let bronze_ids = column_values(&pipeline.bronze, &phb, "id").await;
    let original_ids: Vec<_> = from("spells_phb")
        .iter()
        .map(|r| r["original_id"].clone())
        .collect();
    assert_eq!(original_ids, bronze_ids);

    // Columns a source lacks are NULL
    assert!(from("spells_phb").iter().all(|r| r["school"].is_null()));
    assert!(from("spells_xge").iter().all(|r| r["level"].is_null()));
}

#[tokio::test]
async fn test_fusion_table_layout_grant_and_index() {
    let pipeline = Pipeline::new();
    seed_spells(&pipeline).await;
    pipeline
        .fusion()
        .fuse("spells", "spells_", "fusion_spells")
        .await
        .unwrap();

    let definition = pipeline.silver.definition(&fusion_target()).await.unwrap();
    let names = definition.column_names();
    assert_eq!(&names[..4], &["id", "source_table", "original_id", "name"]);
    assert!(names.contains(&"school"));
    assert!(names.contains(&"json_data"));

    assert_eq!(
        pipeline.silver.table_grants().await,
        vec![(fusion_target(), "reader".to_string())]
    );
    assert_eq!(
        pipeline.silver.indexes().await,
        vec![(
            fusion_target(),
            "idx_fusion_spells_source_table".to_string(),
            "source_table".to_string()
        )]
    );
}

#[tokio::test]
async fn test_unchanged_sources_skip_and_changed_sources_refuse() {
    let pipeline = Pipeline::new();
    let phb = seed_spells(&pipeline).await;
    let fusion = pipeline.fusion();

    completed(fusion.fuse("spells", "spells_", "fusion_spells").await.unwrap());
    let skipped = fusion.fuse("spells", "spells_", "fusion_spells").await.unwrap();
    assert_eq!(skipped, TransformOutcome::Skipped { target: fusion_target() });

    append(&pipeline.bronze, &phb, json!({"name": "Light", "level": "0"})).await;
    let summary = completed(fusion.fuse("spells", "spells_", "fusion_spells").await.unwrap());
    assert_eq!(summary.row_count, 6);

    let states: Vec<TransformStatus> = pipeline
        .ledger
        .history()
        .await
        .iter()
        .map(|r| r.status)
        .collect();
    assert_eq!(
        states,
        vec![
            TransformStatus::InProgress,
            TransformStatus::Success,
            TransformStatus::InProgress,
            TransformStatus::Success
        ]
    );

    let entry = pipeline.ledger.get(&fusion_key()).await.unwrap();
    assert_eq!(entry.row_count, 6);
    assert_eq!(entry.source_tables, vec!["spells_phb", "spells_xge"]);
}

#[tokio::test]
async fn test_column_types_are_widened() {
    let pipeline = Pipeline::new();
    let a = TableRef::new("items", "items_base");
    let b = TableRef::new("items", "items_magic");
    pipeline
        .bronze
        .seed_table(
            TableDefinition::clone_of(
                a,
                &[
                    ColumnSpec::new("id", "INTEGER"),
                    ColumnSpec::new("weight", "INTEGER"),
                    ColumnSpec::new("value", "INTEGER"),
                    ColumnSpec::new("extra", "JSONB"),
                ],
            ),
            vec![row(json!({"id": 1, "weight": 3, "value": 10, "extra": {"x": 1}}))],
        )
        .await
        .unwrap();
    pipeline
        .bronze
        .seed_table(
            TableDefinition::clone_of(
                b,
                &[
                    ColumnSpec::new("id", "INTEGER"),
                    ColumnSpec::new("weight", "TEXT"),
                    ColumnSpec::new("value", "BIGINT"),
                    ColumnSpec::new("extra", "INTEGER"),
                ],
            ),
            vec![row(json!({"id": 1, "weight": "light", "value": 9000000000i64, "extra": 4}))],
        )
        .await
        .unwrap();

    let summary = completed(
        pipeline
            .fusion()
            .fuse("items", "items_", "fusion_items")
            .await
            .unwrap(),
    );
    assert_eq!(summary.row_count, 2);

    let target = TableRef::new("items", "fusion_items");
    let definition = pipeline.silver.definition(&target).await.unwrap();
    let type_of = |name: &str| {
        definition
            .columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.sql_type.clone())
    };
    assert_eq!(type_of("weight").as_deref(), Some("TEXT"));
    assert_eq!(type_of("value").as_deref(), Some("BIGINT"));
    assert_eq!(type_of("extra").as_deref(), Some("JSONB"));

    let weights = column_values(&pipeline.silver, &target, "weight").await;
    assert_eq!(weights, vec![json!("3"), json!("light")]);
}

#[tokio::test]
async fn test_inaccessible_table_is_skipped() {
    let pipeline = Pipeline::new();
    seed_spells(&pipeline).await;
    pipeline
        .bronze
        .make_inaccessible(TableRef::new("spells", "spells_xge"))
        .await;

    let summary = completed(
        pipeline
            .fusion()
            .fuse("spells", "spells_", "fusion_spells")
            .await
            .unwrap(),
    );
    assert_eq!(summary.sources, vec!["spells_phb"]);
    assert_eq!(summary.row_count, 3);

    let entry = pipeline.ledger.get(&fusion_key()).await.unwrap();
    assert_eq!(entry.source_tables, vec!["spells_phb"]);
}

#[tokio::test]
async fn test_failed_source_is_recorded_and_fusion_continues() {
    let pipeline = Pipeline::new();
    seed_spells(&pipeline).await;
    pipeline.copier.fail_source("spells_xge").await;

    let summary = completed(
        pipeline
            .fusion()
            .fuse("spells", "spells_", "fusion_spells")
            .await
            .unwrap(),
    );
    assert_eq!(summary.sources, vec!["spells_phb"]);
    assert_eq!(summary.failed_sources, vec!["spells_xge"]);
    assert_eq!(summary.row_count, 3);

    let entry = pipeline.ledger.get(&fusion_key()).await.unwrap();
    assert_eq!(entry.status, TransformStatus::Success);
}

#[tokio::test]
async fn test_index_failure_is_only_a_warning() {
    let pipeline = Pipeline::new();
    seed_spells(&pipeline).await;
    pipeline.silver.fail_index_creation().await;

    let summary = completed(
        pipeline
            .fusion()
            .fuse("spells", "spells_", "fusion_spells")
            .await
            .unwrap(),
    );
    assert_eq!(summary.row_count, 5);
    assert!(pipeline.silver.indexes().await.is_empty());
}

#[tokio::test]
async fn test_no_matching_tables_is_nothing_to_do() {
    let pipeline = Pipeline::new();
    seed_spells(&pipeline).await;

    let outcome = pipeline
        .fusion()
        .fuse("spells", "fluff_spells_", "fusion_fluff_spells")
        .await
        .unwrap();
    assert_eq!(
        outcome,
        TransformOutcome::NothingToDo {
            target: TableRef::new("spells", "fusion_fluff_spells")
        }
    );
    assert!(pipeline.ledger.is_empty().await);
}

#[tokio::test]
async fn test_target_creation_failure_marks_ledger_error() {
    let pipeline = Pipeline::new();
    seed_spells(&pipeline).await;
    pipeline
        .silver
        .fail_creates_where(|definition| definition.table.table == "fusion_spells")
        .await;

    let result = pipeline
        .fusion()
        .fuse("spells", "spells_", "fusion_spells")
        .await;
    assert!(matches!(result, Err(EtlError::Store(_))));

    let entry = pipeline.ledger.get(&fusion_key()).await.unwrap();
    assert_eq!(entry.status, TransformStatus::Error);
    assert!(entry.error_message.is_some());
}

#[tokio::test]
async fn test_ledger_write_failure_does_not_fail_fusion() {
    let pipeline = Pipeline::new();
    seed_spells(&pipeline).await;
    pipeline.ledger.fail_writes().await;

    let summary = completed(
        pipeline
            .fusion()
            .fuse("spells", "spells_", "fusion_spells")
            .await
            .unwrap(),
    );
    assert_eq!(summary.row_count, 5);
    assert!(pipeline.ledger.is_empty().await);
}
