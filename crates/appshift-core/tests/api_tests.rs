//! Integration tests for the ShiftApi public interface.

use appshift::definitions::{ColumnType, EntityDefinition, FieldDefinition};
use appshift::store::EntityMeta;
use appshift::{Classification, ShiftApi, ShiftError};
use tempfile::TempDir;

fn create_test_site() -> (TempDir, ShiftApi) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let api = ShiftApi::builder(temp_dir.path())
        .auto_create_dirs(true)
        .build()
        .expect("Failed to open site");
    (temp_dir, api)
}

/// Record `entity` as owned by `namespace/module` and write its definition.
fn install(api: &ShiftApi, namespace: &str, module: &str, entity: EntityDefinition) {
    let store = api.site().store();
    store.add_namespace(namespace).unwrap();
    store.declare_module(module, namespace).unwrap();

    let mut meta = EntityMeta::new(&entity.name);
    meta.namespace = Some(namespace.to_string());
    meta.module = Some(module.to_string());
    meta.is_custom = entity.is_custom;
    store.upsert_entity_meta(&meta).unwrap();

    api.site()
        .repository()
        .write(namespace, &entity.to_document(module))
        .unwrap();
}

#[test]
fn test_api_creation_fails_for_nonexistent_path() {
    let result = ShiftApi::new("/nonexistent/path/that/does/not/exist");
    assert!(matches!(result, Err(ShiftError::Config { .. })));
}

#[test]
fn test_api_paths() {
    let (temp_dir, api) = create_test_site();
    assert_eq!(api.site_root(), temp_dir.path());
    assert!(api.site().sessions_dir().ends_with("state/sessions"));
    assert!(api.site().plans_dir().ends_with("state/plans"));
}

#[test]
fn test_classify_namespace_counts() {
    let (_temp, api) = create_test_site();
    install(&api, "legacy", "billing", EntityDefinition::new("Invoice"));
    let mut custom = EntityDefinition::new("Invoice Stamp");
    custom.is_custom = true;
    install(&api, "legacy", "billing", custom);
    install(&api, "core", "selling", EntityDefinition::new("Quote"));

    let report = api.classify_namespace("legacy").unwrap();
    assert_eq!(report.entities.len(), 2);
    assert_eq!(report.count(Classification::Standard), 1);
    assert_eq!(report.count(Classification::Custom), 1);

    let detail = api.classify_entity("Quote").unwrap();
    assert_eq!(detail.label, Classification::Standard);
    assert!(detail.ownership_consistent);
}

#[test]
fn test_classify_unknown_namespace_and_entity() {
    let (_temp, api) = create_test_site();
    assert!(matches!(
        api.classify_namespace("nowhere"),
        Err(ShiftError::NamespaceNotFound { .. })
    ));
    assert!(matches!(
        api.classify_entity("Ghost"),
        Err(ShiftError::EntityNotFound { .. })
    ));
}

#[test]
fn test_classification_is_deterministic() {
    let (_temp, api) = create_test_site();
    install(&api, "legacy", "billing", EntityDefinition::new("Invoice"));
    install(&api, "legacy", "billing", EntityDefinition::new("Payment"));

    let first = api.classify_namespace("legacy").unwrap();
    let second = api.classify_namespace("legacy").unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_reference_graph_reports_external_and_dangling() {
    let (_temp, api) = create_test_site();
    install(
        &api,
        "legacy",
        "billing",
        EntityDefinition::new("Invoice")
            .with_field(FieldDefinition::single("customer", "Customer"))
            .with_field(FieldDefinition::single("currency", "Currency")),
    );
    install(&api, "core", "setup", EntityDefinition::new("Customer"));

    let scoped = api.reference_graph(Some("legacy")).unwrap();
    assert_eq!(scoped.entities, 1);
    assert!(scoped.external.contains(&"Customer".to_string()));
    assert_eq!(scoped.dangling.len(), 1);
    assert_eq!(scoped.dangling[0].to.as_deref(), Some("Currency"));

    let whole = api.reference_graph(None).unwrap();
    assert_eq!(whole.fan_in.get("Customer"), Some(&1));
}

#[test]
fn test_plan_save_and_execute_by_ref() {
    let (_temp, api) = create_test_site();
    install(
        &api,
        "legacy",
        "billing",
        EntityDefinition::new("Invoice").with_field(FieldDefinition::scalar("total", ColumnType::Real)),
    );
    api.site().store().add_namespace("core").unwrap();
    api.site().store().declare_module("billing", "core").unwrap();

    let diff = api.diff_schema("legacy").unwrap();
    api.apply_schema(&diff).unwrap();

    let plan = api
        .plan("legacy", "core", &appshift::Selection::Namespace)
        .unwrap();
    api.save_plan(&plan).unwrap();

    let report = api.execute_plan_ref(&plan.id, "legacy-to-core").unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.plan_id, plan.id);

    let status = api.session_status("legacy-to-core").unwrap();
    assert!(status.is_finished());
    assert_eq!(api.list_sessions().unwrap().len(), 1);

    let detail = api.classify_entity("Invoice").unwrap();
    assert_eq!(detail.label, Classification::Standard);
    assert!(detail.ownership_consistent);
}

#[test]
fn test_execute_unknown_plan_ref() {
    let (_temp, api) = create_test_site();
    assert!(matches!(
        api.execute_plan_ref("missing", "s"),
        Err(ShiftError::PlanNotFound { .. })
    ));
}

#[test]
fn test_session_status_not_found() {
    let (_temp, api) = create_test_site();
    assert!(matches!(
        api.session_status("never-started"),
        Err(ShiftError::SessionNotFound { .. })
    ));
}

#[test]
fn test_reports_serialize() {
    let (_temp, api) = create_test_site();
    install(&api, "legacy", "billing", EntityDefinition::new("Invoice"));

    let report = api.classify_namespace("legacy").unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert!(json["entities"].is_array());

    let diff = api.diff_schema("legacy").unwrap();
    let json = serde_json::to_value(&diff).unwrap();
    assert_eq!(json["missing_tables"][0]["table"], "tabInvoice");
}
