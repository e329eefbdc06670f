//! Store and update pipeline integration tests.

mod common;

use serde_json::json;

use helios_crud::adapter::AdapterRegistry;
use helios_crud::context::RequestContext;
use helios_crud::query::TrashedMode;
use helios_crud::service::{StoreService, UpdateService};
use helios_crud::RecordStore;

use common::*;

// ============================================================================
// Document engine
// ============================================================================

#[tokio::test]
async fn test_document_store_filters_input() {
    init_tracing();
    let (model, fields, store) = (document_person(), document_fields(), memory_store());
    let adapters = AdapterRegistry::default();
    let service = StoreService::new(&model, &fields, &store, &adapters);

    let record = service
        .store(
            input(json!({
                "name": "Katherine Johnson",
                "email": "kj@example.com",
                "is_admin": true,
                "profile.height": 180,
                "profile.eyes": "hazel",
                "tags": ["g1", "g3", "g1"],
                "password": "hunter2"
            })),
            &RequestContext::new(),
        )
        .await
        .unwrap();

    let id = record.get("_id").cloned().unwrap();
    let stored = store
        .documents("people")
        .into_iter()
        .find(|doc| doc["_id"] == id)
        .unwrap();

    assert_eq!(stored["name"], "Katherine Johnson");
    assert_eq!(stored["profile"], json!({"eyes": "hazel"}));
    assert_eq!(stored["tag_ids"], json!(["g1", "g3"]));
    assert_eq!(record.get("tag_ids"), Some(&stored["tag_ids"]));
    assert!(stored.get("is_admin").is_none());
    assert!(stored.get("password").is_none());
    assert!(stored.get("tags").is_none());
    assert!(stored["created_at"].get("$date").is_some());
    assert_eq!(stored["created_at"], stored["updated_at"]);

    let response = service.response(&record);
    assert!(response.created);
    assert_eq!(response.id, id);
    assert_eq!(response.message, "Person created successfully");
}

#[tokio::test]
async fn test_document_update_merges_nested_objects() {
    let (model, fields, store) = (document_person(), document_fields(), memory_store());
    let adapters = AdapterRegistry::default();
    let service = UpdateService::new(&model, &fields, &store, &adapters);

    let outcome = service
        .update(
            input(json!({"profile": {"eyes": "green", "height": 200}, "tags": ["g3"]})),
            &json!("p1"),
            &RequestContext::new(),
        )
        .await
        .unwrap();

    // Guarded height is untouched, the sibling is merged
    let stored = store.documents("people").remove(0);
    assert_eq!(stored["profile"], json!({"height": 170, "eyes": "green"}));
    assert_eq!(stored["tag_ids"], json!(["g3"]));

    assert_eq!(outcome.changes["profile"], json!({"height": 170, "eyes": "green"}));
    assert_eq!(
        outcome.changes["tags"],
        json!({"attached": ["g3"], "detached": ["g1", "g2"]})
    );
    assert!(!outcome.changes.contains_key("updated_at"));
    assert!(!outcome.changes.contains_key("tag_ids"));
    assert_eq!(outcome.record.get("tag_ids"), Some(&json!(["g3"])));

    let response = service.response(&json!("p1"), &outcome);
    assert!(response.updated);
    assert_eq!(response.message, "Person updated successfully");
}

#[tokio::test]
async fn test_document_update_is_idempotent() {
    let (model, fields, store) = (document_person(), document_fields(), memory_store());
    let adapters = AdapterRegistry::default();
    let service = UpdateService::new(&model, &fields, &store, &adapters);
    let body = json!({"name": "Ada King", "profile.eyes": "grey"});

    let first = service
        .update(input(body.clone()), &json!("p1"), &RequestContext::new())
        .await
        .unwrap();
    assert_eq!(first.changes.len(), 2);

    let second = service
        .update(input(body), &json!("p1"), &RequestContext::new())
        .await
        .unwrap();
    assert!(second.changes.is_empty());
    assert_eq!(second.record.attributes(), first.record.attributes());
    assert_eq!(
        service.response(&json!("p1"), &second).message,
        "Person unchanged"
    );
}

#[tokio::test]
async fn test_document_update_missing_record() {
    let (model, fields, store) = (document_person(), document_fields(), memory_store());
    let adapters = AdapterRegistry::default();
    let service = UpdateService::new(&model, &fields, &store, &adapters);

    let err = service
        .update(input(json!({"name": "Nobody"})), &json!("p404"), &RequestContext::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.http_status(), 404);
}

#[tokio::test]
async fn test_document_update_respects_trashed_scope() {
    let (model, fields, store) = (document_person(), document_fields(), memory_store());
    let adapters = AdapterRegistry::default();
    let service = UpdateService::new(&model, &fields, &store, &adapters);
    let body = json!({"status": "restored"});

    let err = service
        .update(input(body.clone()), &json!("p5"), &RequestContext::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let context = RequestContext::new().with_trashed(TrashedMode::With);
    let outcome = service.update(input(body), &json!("p5"), &context).await.unwrap();
    assert_eq!(outcome.changes["status"], "restored");
}

// ============================================================================
// SQLite
// ============================================================================

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use helios_crud::backends::sqlite::SqliteStore;
    use helios_crud::model::ConnectionInfo;
    use helios_crud::request::ListingRequest;
    use helios_crud::service::ListingService;
    use helios_crud::{FieldCatalogue, ModelSchema};

    fn fixture() -> (ModelSchema, FieldCatalogue, SqliteStore) {
        (
            relational_person(ConnectionInfo::sqlite()),
            person_fields(),
            sqlite_store(),
        )
    }

    async fn tags_of(
        model: &ModelSchema,
        fields: &FieldCatalogue,
        store: &SqliteStore,
        id: i64,
    ) -> Vec<serde_json::Value> {
        let adapters = AdapterRegistry::default();
        let page = ListingService::new(model, fields, store, &adapters)
            .list(
                &ListingRequest::new()
                    .with_trashed(TrashedMode::With)
                    .with_result(100),
                &RequestContext::new(),
            )
            .await
            .unwrap();
        let record = page
            .data
            .into_iter()
            .find(|r| r.get("id") == Some(&json!(id)))
            .expect("record listed");
        let mut tags = record
            .get("tags")
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default();
        tags.sort_by_key(|t| t.as_i64());
        tags
    }

    #[tokio::test]
    async fn test_store_assigns_key_and_syncs_pivot() {
        init_tracing();
        let (model, fields, store) = fixture();
        let adapters = AdapterRegistry::default();
        let service = StoreService::new(&model, &fields, &store, &adapters);

        let record = service
            .store(
                input(json!({
                    "name": "Margaret Hamilton",
                    "email": "mh@example.com",
                    "status": "active",
                    "age": 34,
                    "is_admin": 1,
                    "created_at": "1999-01-01 00:00:00",
                    "team_id": 2,
                    "tags": [1, {"id": 3}]
                })),
                &RequestContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(record.get("id"), Some(&json!(6)));
        assert_eq!(service.response(&record).id, json!(6));

        let saved = store
            .find(&model, &json!(6), TrashedMode::Exclude)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.get("name"), Some(&json!("Margaret Hamilton")));
        assert_eq!(saved.get("team_id"), Some(&json!(2)));
        assert_eq!(saved.get("is_admin"), Some(&json!(0)));
        // Stamped by the pipeline, not taken from input
        assert!(saved.get("created_at").and_then(|v| v.as_str()).unwrap().starts_with("20"));
        assert_ne!(saved.get("created_at"), Some(&json!("1999-01-01 00:00:00")));

        assert_eq!(tags_of(&model, &fields, &store, 6).await, vec![json!(1), json!(3)]);
    }

    #[tokio::test]
    async fn test_update_reports_changes() {
        let (model, fields, store) = fixture();
        let adapters = AdapterRegistry::default();
        let service = UpdateService::new(&model, &fields, &store, &adapters);

        let outcome = service
            .update(
                input(json!({"name": "Ada King", "age": 36, "tags": [2, 3]})),
                &json!(1),
                &RequestContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.changes["name"], "Ada King");
        assert!(!outcome.changes.contains_key("age"));
        assert!(!outcome.changes.contains_key("updated_at"));
        assert_eq!(
            outcome.changes["tags"],
            json!({"attached": [3], "detached": [1]})
        );
        assert_eq!(tags_of(&model, &fields, &store, 1).await, vec![json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_null_clears_relation() {
        let (model, fields, store) = fixture();
        let adapters = AdapterRegistry::default();
        let service = UpdateService::new(&model, &fields, &store, &adapters);

        let outcome = service
            .update(input(json!({"tags": null})), &json!(1), &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(
            outcome.changes["tags"],
            json!({"attached": [], "detached": [1, 2]})
        );
        assert!(tags_of(&model, &fields, &store, 1).await.is_empty());
    }

    #[tokio::test]
    async fn test_absent_relation_is_left_alone() {
        let (model, fields, store) = fixture();
        let adapters = AdapterRegistry::default();
        let service = UpdateService::new(&model, &fields, &store, &adapters);

        let outcome = service
            .update(input(json!({"status": "retired"})), &json!(2), &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(tags_of(&model, &fields, &store, 2).await, vec![json!(2)]);
    }

    #[tokio::test]
    async fn test_update_missing_record_writes_nothing() {
        let (model, fields, store) = fixture();
        let adapters = AdapterRegistry::default();

        let err = UpdateService::new(&model, &fields, &store, &adapters)
            .update(input(json!({"name": "Ghost"})), &json!(99), &RequestContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 404);
        assert_eq!(err.to_string(), "record not found: Person/99");
    }

    #[tokio::test]
    async fn test_totally_guarded_without_allow_list_writes_nothing() {
        let (_, _, store) = fixture();
        let model = relational_person(ConnectionInfo::sqlite()).with_guarded(["*"]);
        let fields = FieldCatalogue::default();
        let adapters = AdapterRegistry::default();

        UpdateService::new(&model, &fields, &store, &adapters)
            .update(input(json!({"name": "Changed"})), &json!(1), &RequestContext::new())
            .await
            .unwrap();

        let saved = store
            .find(&model, &json!(1), TrashedMode::Exclude)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.get("name"), Some(&json!("Ada Lovelace")));
    }

    #[tokio::test]
    async fn test_file_database_keeps_committed_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.db");
        let model = relational_person(ConnectionInfo::sqlite());
        let fields = person_fields();
        let adapters = AdapterRegistry::default();

        {
            let store = SqliteStore::open(&path).unwrap();
            assert!(!store.is_memory());
            seed_sqlite(&store);
            StoreService::new(&model, &fields, &store, &adapters)
                .store(input(json!({"name": "Radia Perlman"})), &RequestContext::new())
                .await
                .unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        let saved = reopened
            .find(&model, &json!(6), TrashedMode::Exclude)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.get("name"), Some(&json!("Radia Perlman")));
    }
}
