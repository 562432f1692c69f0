//! End-to-end reconciliation scenarios against a temporary site.

use appshift::definitions::{table_name, ColumnType, EntityDefinition, FieldDefinition};
use appshift::repair::OrphanAction;
use appshift::session::{SessionManager, StepStatus};
use appshift::store::EntityMeta;
use appshift::{Selection, ShiftApi, UnitStatus};
use rusqlite::types::Value;
use serde_json::json;
use tempfile::TempDir;

fn create_test_site() -> (TempDir, ShiftApi) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let api = ShiftApi::builder(temp_dir.path())
        .auto_create_dirs(true)
        .build()
        .expect("Failed to open site");
    (temp_dir, api)
}

fn install(api: &ShiftApi, namespace: &str, module: &str, entity: EntityDefinition) {
    let store = api.site().store();
    store.add_namespace(namespace).unwrap();
    store.declare_module(module, namespace).unwrap();

    let mut meta = EntityMeta::new(&entity.name);
    meta.namespace = Some(namespace.to_string());
    meta.module = Some(module.to_string());
    meta.is_tree = entity.is_tree;
    meta.is_embedded = entity.is_embedded;
    store.upsert_entity_meta(&meta).unwrap();

    api.site()
        .repository()
        .write(namespace, &entity.to_document(module))
        .unwrap();
}

fn sync_schema(api: &ShiftApi, namespace: &str) {
    let diff = api.diff_schema(namespace).unwrap();
    let applied = api.apply_schema(&diff).unwrap();
    assert!(applied.failures.is_empty(), "{:?}", applied.failures);
}

#[test]
fn test_invoice_note_orphan_resolved_from_file_location() {
    let (_temp, api) = create_test_site();
    let store = api.site().store();
    store.add_namespace("legacy").unwrap();
    store.declare_module("billing", "legacy").unwrap();
    store
        .upsert_entity_meta(&EntityMeta::new("Invoice Note"))
        .unwrap();
    api.site()
        .repository()
        .write("legacy", &EntityDefinition::new("Invoice Note").to_document("billing"))
        .unwrap();

    let report = api.resolve_orphans("legacy").unwrap();
    let outcome = report.outcome("Invoice Note").unwrap();
    assert_eq!(outcome.action, OrphanAction::Resolved);
    assert_eq!(report.resolved, 1);

    let meta = store.entity_meta("Invoice Note").unwrap().unwrap();
    assert_eq!(meta.namespace.as_deref(), Some("legacy"));
    assert_eq!(meta.module.as_deref(), Some("billing"));

    // A second pass finds nothing left to do.
    let again = api.resolve_orphans("legacy").unwrap();
    assert_eq!(again.resolved, 0);
    assert!(api.find_inconsistent("legacy").unwrap().is_empty());
}

#[test]
fn test_ambiguous_module_is_reported_as_conflict() {
    let (_temp, api) = create_test_site();
    let store = api.site().store();
    store.add_namespace("legacy").unwrap();
    store.add_namespace("core").unwrap();
    store.declare_module("billing", "legacy").unwrap();
    store.declare_module("billing", "core").unwrap();
    store
        .upsert_entity_meta(&EntityMeta::new("Invoice Note"))
        .unwrap();
    api.site()
        .repository()
        .write("legacy", &EntityDefinition::new("Invoice Note").to_document("billing"))
        .unwrap();

    let report = api.resolve_orphans("legacy").unwrap();
    assert_eq!(report.conflicts, 1);
    let outcome = report.outcome("Invoice Note").unwrap();
    assert_eq!(outcome.action, OrphanAction::Conflict);
    assert!(outcome.message.as_deref().unwrap().contains("core"));

    let meta = store.entity_meta("Invoice Note").unwrap().unwrap();
    assert_eq!(meta.namespace, None);
}

#[test]
fn test_restore_missing_definition_from_table() {
    let (_temp, api) = create_test_site();
    install(
        &api,
        "legacy",
        "billing",
        EntityDefinition::new("Receipt")
            .with_field(FieldDefinition::scalar("amount", ColumnType::Real))
            .with_field(FieldDefinition::scalar("memo", ColumnType::Text)),
    );
    sync_schema(&api, "legacy");

    let path = api
        .site()
        .repository()
        .document_path("legacy", "billing", "Receipt");
    std::fs::remove_file(&path).unwrap();

    let restored = api.restore_missing("Receipt").unwrap();
    assert!(!restored.already_present);
    assert!(!restored.used_fallback);
    assert_eq!(restored.fields, vec!["amount".to_string(), "memo".to_string()]);
    assert!(path.exists());
    assert!(api.classify_entity("Receipt").unwrap().ownership_consistent);
}

#[test]
fn test_task_self_parent_tree_repaired() {
    let (_temp, api) = create_test_site();
    let mut task = EntityDefinition::new("Task");
    task.is_tree = true;
    install(&api, "projects", "projects", task);
    sync_schema(&api, "projects");

    let store = api.site().store();
    store
        .insert_row(
            "Task",
            &[
                ("name", Value::Text("Task".into())),
                ("parent_node", Value::Text("Task".into())),
                ("lft", Value::Integer(1)),
                ("rgt", Value::Integer(1)),
            ],
        )
        .unwrap();
    store
        .insert_row(
            "Task",
            &[
                ("name", Value::Text("Subtask".into())),
                ("parent_node", Value::Text("Task".into())),
            ],
        )
        .unwrap();

    assert!(!api.verify_tree("Task").unwrap().is_empty());

    let report = api.repair_tree("Task").unwrap();
    assert_eq!(report.cycles_broken, vec!["Task".to_string()]);
    assert!(report.reparented.is_empty());
    assert!(api.verify_tree("Task").unwrap().is_empty());

    let rows = store.load_tree_rows("Task").unwrap();
    let root = rows.iter().find(|r| r.name == "Task").unwrap();
    assert_eq!(root.parent, None);
    assert_eq!((root.left, root.right), (Some(1), Some(4)));
    assert_eq!(root.previous_parent, None);
    let subtask = rows.iter().find(|r| r.name == "Subtask").unwrap();
    assert_eq!(subtask.previous_parent.as_deref(), Some("Task"));
    assert_eq!(
        api.tree_descendants("Task", "Task").unwrap(),
        vec!["Subtask".to_string()]
    );

    // Repair is a fixpoint.
    let again = api.repair_tree("Task").unwrap();
    assert_eq!(again.rows_changed, 0);
    assert!(again.cycles_broken.is_empty());
}

#[test]
fn test_schema_round_trip() {
    let (_temp, api) = create_test_site();
    install(
        &api,
        "legacy",
        "billing",
        EntityDefinition::new("Invoice")
            .with_field(FieldDefinition::scalar("total", ColumnType::Real))
            .with_field(FieldDefinition::single("customer", "Customer"))
            .with_field(FieldDefinition::collection("items", "Invoice Item")),
    );

    let diff = api.diff_schema("legacy").unwrap();
    assert!(diff.has_missing_table("Invoice"));
    api.apply_schema(&diff).unwrap();

    let again = api.diff_schema("legacy").unwrap();
    assert!(again.missing_tables.is_empty());
    assert!(again.missing_columns.is_empty());

    let columns: Vec<String> = api
        .site()
        .store()
        .table_columns(&table_name("Invoice"))
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    for declared in ["name", "total", "customer"] {
        assert!(columns.contains(&declared.to_string()), "missing {}", declared);
    }
    assert!(!columns.contains(&"items".to_string()));

    // A newly declared field shows up as a missing column only.
    api.site()
        .repository()
        .write(
            "legacy",
            &EntityDefinition::new("Invoice")
                .with_field(FieldDefinition::scalar("total", ColumnType::Real))
                .with_field(FieldDefinition::single("customer", "Customer"))
                .with_field(FieldDefinition::scalar("due", ColumnType::Date))
                .to_document("billing"),
        )
        .unwrap();
    let grown = api.diff_schema("legacy").unwrap();
    assert!(grown.missing_tables.is_empty());
    assert_eq!(grown.missing_columns.len(), 1);
    assert_eq!(grown.missing_columns[0].column, "due");
    let applied = api.apply_schema(&grown).unwrap();
    assert_eq!(applied.columns_added.len(), 1);
    assert!(api.diff_schema("legacy").unwrap().missing_columns.is_empty());
}

fn order_site() -> (TempDir, ShiftApi) {
    let (temp, api) = create_test_site();
    install(
        &api,
        "A",
        "selling",
        EntityDefinition::new("Order")
            .with_field(FieldDefinition::collection("items", "Order Line"))
            .with_field(FieldDefinition::single("customer", "Customer")),
    );
    install(
        &api,
        "A",
        "selling",
        EntityDefinition::new("Order Line")
            .with_field(FieldDefinition::scalar("qty", ColumnType::Integer)),
    );
    install(&api, "A", "selling", EntityDefinition::new("Customer"));
    api.site().store().add_namespace("B").unwrap();
    api.site().store().declare_module("selling", "B").unwrap();
    sync_schema(&api, "A");
    (temp, api)
}

#[test]
fn test_order_line_migrates_before_order() {
    let (_temp, api) = order_site();
    let plan = api
        .plan(
            "A",
            "B",
            &Selection::Entities(vec!["Order".into(), "Order Line".into()]),
        )
        .unwrap();

    let order = plan.unit_of("Order").unwrap();
    let line = plan.unit_of("Order Line").unwrap();
    assert!(line.rank < order.rank);
    assert!(order.depends_on.contains(&line.id));
    // Customer stays behind; the reference is reported, not followed.
    assert!(plan.unit_of("Customer").is_none());
    assert!(plan
        .external_references
        .iter()
        .any(|r| r.to.as_deref() == Some("Customer")));

    let report = api.execute(&plan, "order-move").unwrap();
    assert!(report.position("Order Line").unwrap() < report.position("Order").unwrap());
    assert_eq!(report.completed, 2);

    let store = api.site().store();
    let customer = store.entity_meta("Customer").unwrap().unwrap();
    assert_eq!(customer.namespace.as_deref(), Some("A"));
    let order_meta = store.entity_meta("Order").unwrap().unwrap();
    assert_eq!(order_meta.namespace.as_deref(), Some("B"));
}

#[test]
fn test_resume_runs_only_remaining_units() {
    let (_temp, api) = order_site();
    let plan = api.plan("A", "B", &Selection::Namespace).unwrap();
    assert_eq!(plan.units.len(), 3);
    let first = plan.units[0].clone();

    // Simulate an interrupted run: the first unit moved and checkpointed.
    let partial = api
        .plan(
            "A",
            "B",
            &Selection::Entities(first.entities.iter().map(|e| e.name.clone()).collect()),
        )
        .unwrap();
    api.execute(&partial, "scratch").unwrap();

    let sessions = SessionManager::new(api.site().sessions_dir(), true);
    let mut session = sessions.start("resume").unwrap();
    sessions
        .set_payload(&mut session, json!({"plan_id": plan.id}))
        .unwrap();
    sessions
        .checkpoint(
            &mut session,
            &first.step_name(),
            StepStatus::Completed,
            json!({"outcome": "completed"}),
            None,
        )
        .unwrap();

    let report = api.execute(&plan, "resume").unwrap();
    assert_eq!(report.already_completed, 1);
    assert_eq!(report.completed, 2);
    assert_eq!(
        report.outcome(&first.id).unwrap().status,
        UnitStatus::AlreadyCompleted
    );

    // Running again changes nothing.
    let rerun = api.execute(&plan, "resume").unwrap();
    assert_eq!(rerun.already_completed, 3);
    assert_eq!(rerun.completed, 0);
    assert!(api.session_status("resume").unwrap().is_finished());
}

#[test]
fn test_execute_reconnects_after_dropped_connection() {
    let (_temp, api) = order_site();
    let plan = api.plan("A", "B", &Selection::Namespace).unwrap();

    api.site().store().disconnect();
    let report = api.execute(&plan, "flaky").unwrap();
    assert_eq!(report.completed, 3);
    assert_eq!(report.reconnects, 1);
    assert!(api.site().store().is_connected());
}

#[test]
fn test_plan_excludes_orphans_and_foreign_entities() {
    let (_temp, api) = order_site();
    let store = api.site().store();
    store.upsert_entity_meta(&EntityMeta::new("Loose")).unwrap();
    api.site()
        .repository()
        .write("A", &EntityDefinition::new("Loose").to_document("selling"))
        .unwrap();

    let plan = api.plan("A", "B", &Selection::Namespace).unwrap();
    assert!(plan.unit_of("Loose").is_none());
    assert!(plan.excluded("Loose").is_some());

    let preview = api.dry_run(&plan).unwrap();
    assert!(preview.units.iter().all(|u| u.status == UnitStatus::Validated));
    let meta = store.entity_meta("Order").unwrap().unwrap();
    assert_eq!(meta.namespace.as_deref(), Some("A"));
}
