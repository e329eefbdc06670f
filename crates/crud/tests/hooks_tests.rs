//! Stage override integration tests.
//!
//! A hook that returns a value replaces its stage; one that returns nothing
//! lets the default run; one that fails aborts the invocation.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;

use helios_crud::adapter::AdapterRegistry;
use helios_crud::context::RequestContext;
use helios_crud::core::RelationChanges;
use helios_crud::error::HookError;
use helios_crud::hooks::HookRegistry;
use helios_crud::query::SortDirection;
use helios_crud::request::ListingRequest;
use helios_crud::service::{ListingService, StoreService, UpdateService};
use helios_crud::types::Paginated;
use helios_crud::{PageRequest, Record};

use common::*;

fn failed(event: &str) -> helios_crud::CrudError {
    HookError::Failed {
        event: event.to_string(),
        message: "rejected by hook".to_string(),
    }
    .into()
}

#[tokio::test]
async fn test_sort_hook_sees_request_and_replaces_order() {
    init_tracing();
    let (model, fields, store) = (document_person(), document_fields(), memory_store());
    let adapters = AdapterRegistry::default();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let spy = Arc::clone(&seen);
    let hooks = HookRegistry::new().on_sort(move |query, ctx| {
        spy.lock().push(ctx.request.search_term().map(str::to_string));
        Ok(Some(query.clone().order_by("age", SortDirection::Asc)))
    });

    let page = ListingService::new(&model, &fields, &store, &adapters)
        .with_hooks(hooks)
        .list(&ListingRequest::new().with_search("example"), &RequestContext::new())
        .await
        .unwrap();

    assert_eq!(*seen.lock(), vec![Some("example".to_string())]);
    let ages: Vec<i64> = page
        .data
        .iter()
        .filter_map(|r| r.get("age").and_then(|a| a.as_i64()))
        .collect();
    assert_eq!(ages, vec![36, 41, 72, 85]);
}

#[tokio::test]
async fn test_filters_hook_falls_through_on_none() {
    let (model, fields, store) = (document_person(), document_fields(), memory_store());
    let adapters = AdapterRegistry::default();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let hooks = HookRegistry::new().on_filters(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    });

    let page = ListingService::new(&model, &fields, &store, &adapters)
        .with_hooks(hooks)
        .list(
            &ListingRequest::new().with_filter("status", json!(["retired"])),
            &RequestContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn test_paginate_hook_replaces_execution() {
    let (model, fields, store) = (document_person(), document_fields(), memory_store());
    let adapters = AdapterRegistry::default();

    let hooks = HookRegistry::new().on_paginate(|_, _, _| {
        async move {
            let mut record = Record::new();
            record.set("name", json!("synthetic"));
            Ok(Some(Paginated::new(vec![record], 1, PageRequest::new(1, 5))))
        }
        .boxed()
    });

    let page = ListingService::new(&model, &fields, &store, &adapters)
        .with_hooks(hooks)
        .list(&ListingRequest::new(), &RequestContext::new())
        .await
        .unwrap();

    assert_eq!(page.total, 1);
    assert_eq!(page.per_page, 5);
    assert_eq!(page.data[0].get("name"), Some(&json!("synthetic")));
}

#[tokio::test]
async fn test_search_hook_error_aborts_listing() {
    let (model, fields, store) = (document_person(), document_fields(), memory_store());
    let adapters = AdapterRegistry::default();

    let hooks = HookRegistry::new().on_search(|_, _| Err(failed("onSearch")));
    let err = ListingService::new(&model, &fields, &store, &adapters)
        .with_hooks(hooks)
        .list(&ListingRequest::new(), &RequestContext::new())
        .await
        .unwrap_err();

    assert_eq!(err.http_status(), 500);
    assert!(err.to_string().contains("rejected by hook"));
}

#[tokio::test]
async fn test_store_hook_replaces_whole_body() {
    let (model, fields, store) = (document_person(), document_fields(), memory_store());
    let adapters = AdapterRegistry::default();

    let fill_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fill_calls);
    let hooks = HookRegistry::new()
        .on_fillable_data(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
        .on_store(|ctx, tx| {
            async move {
                let mut record = Record::new();
                record.set("name", json!("made by hook"));
                record.set("is_admin", json!(true));
                let saved = tx.save(ctx.model, &mut record).await;
                saved.map(|()| Some(record))
            }
            .boxed()
        });

    let record = StoreService::new(&model, &fields, &store, &adapters)
        .with_hooks(hooks)
        .store(input(json!({"name": "ignored"})), &RequestContext::new())
        .await
        .unwrap();

    assert_eq!(fill_calls.load(Ordering::SeqCst), 0);
    assert_eq!(record.get("name"), Some(&json!("made by hook")));
    // The hook owns the write, guards included
    let stored = store.documents("people").pop().unwrap();
    assert_eq!(stored["is_admin"], true);
    assert!(stored.get("created_at").is_none());
}

#[tokio::test]
async fn test_fillable_data_and_fill_hooks() {
    let (model, fields, store) = (document_person(), document_fields(), memory_store());
    let adapters = AdapterRegistry::default();

    let hooks = HookRegistry::new()
        .on_fillable_data(|input, _| {
            let mut data = input.clone();
            if let Some(name) = data.get("name").and_then(|n| n.as_str()) {
                let upper = name.to_uppercase();
                data.insert("name".to_string(), json!(upper));
            }
            Ok(Some(data))
        })
        .on_fill(|record, data, ctx| {
            let mut record = record.clone();
            ctx.adapter.fill_model(&mut record, data, ctx.model, ctx.fields);
            record.set("source", json!("hook"));
            Ok(Some(record))
        });

    let record = StoreService::new(&model, &fields, &store, &adapters)
        .with_hooks(hooks)
        .store(input(json!({"name": "Mary Jackson", "is_admin": true})), &RequestContext::new())
        .await
        .unwrap();

    assert_eq!(record.get("name"), Some(&json!("MARY JACKSON")));
    assert_eq!(record.get("source"), Some(&json!("hook")));
    assert!(record.get("is_admin").is_none());
    assert!(record.get("created_at").is_some());
}

#[tokio::test]
async fn test_persist_hook_none_runs_default_save() {
    let (model, fields, store) = (document_person(), document_fields(), memory_store());
    let adapters = AdapterRegistry::default();

    let seen = Arc::new(Mutex::new(None));
    let spy = Arc::clone(&seen);
    let hooks = HookRegistry::new().on_persist(move |_, record, _| {
        *spy.lock() = record.get("name").cloned();
        async { Ok(None) }.boxed()
    });

    StoreService::new(&model, &fields, &store, &adapters)
        .with_hooks(hooks)
        .store(input(json!({"name": "Dorothy Vaughan"})), &RequestContext::new())
        .await
        .unwrap();

    assert_eq!(*seen.lock(), Some(json!("Dorothy Vaughan")));
    assert_eq!(store.documents("people").len(), 6);
}

#[tokio::test]
async fn test_sync_relations_hook_replaces_sync() {
    let (model, fields, store) = (document_person(), document_fields(), memory_store());
    let adapters = AdapterRegistry::default();

    let hooks = HookRegistry::new()
        .on_sync_relations(|_, _, _, _| async { Ok(Some(RelationChanges::new())) }.boxed());

    let outcome = UpdateService::new(&model, &fields, &store, &adapters)
        .with_hooks(hooks)
        .update(input(json!({"tags": []})), &json!("p1"), &RequestContext::new())
        .await
        .unwrap();

    assert!(outcome.changes.is_empty());
    assert_eq!(store.documents("people")[0]["tag_ids"], json!(["g1", "g2"]));
}

#[tokio::test]
async fn test_update_hook_receives_loaded_record() {
    let (model, fields, store) = (document_person(), document_fields(), memory_store());
    let adapters = AdapterRegistry::default();

    let hooks = HookRegistry::new().on_update(|ctx, existing, tx| {
        async move {
            let mut record = existing.clone();
            let name = existing.get("name").and_then(|n| n.as_str()).unwrap_or_default();
            record.set("name", json!(format!("{} (edited)", name)));
            let saved = tx.save(ctx.model, &mut record).await;
            saved.map(|()| Some(record))
        }
        .boxed()
    });

    let outcome = UpdateService::new(&model, &fields, &store, &adapters)
        .with_hooks(hooks)
        .update(input(json!({"name": "unused"})), &json!("p2"), &RequestContext::new())
        .await
        .unwrap();

    assert_eq!(outcome.changes["name"], "Alan Turing (edited)");
    assert_eq!(store.documents("people")[1]["name"], "Alan Turing (edited)");
}

#[tokio::test]
async fn test_document_failure_keeps_applied_writes() {
    let (model, fields, store) = (document_person(), document_fields(), memory_store());
    let adapters = AdapterRegistry::default();

    let hooks = HookRegistry::new()
        .on_sync_relations(|_, _, _, _| async { Err(failed("onSyncRelations")) }.boxed());

    let err = StoreService::new(&model, &fields, &store, &adapters)
        .with_hooks(hooks)
        .store(input(json!({"name": "Half Written"})), &RequestContext::new())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("rejected by hook"));
    // No multi-document atomicity: the saved document stays
    assert_eq!(store.documents("people").len(), 6);
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use helios_crud::model::ConnectionInfo;
    use helios_crud::query::TrashedMode;
    use helios_crud::RecordStore;

    #[tokio::test]
    async fn test_failure_rolls_back_all_writes() {
        let model = relational_person(ConnectionInfo::sqlite());
        let fields = person_fields();
        let store = sqlite_store();
        let adapters = AdapterRegistry::default();

        let hooks = HookRegistry::new()
            .on_sync_relations(|_, _, _, _| async { Err(failed("onSyncRelations")) }.boxed());

        let err = StoreService::new(&model, &fields, &store, &adapters)
            .with_hooks(hooks)
            .store(input(json!({"name": "Half Written", "tags": [1]})), &RequestContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 500);

        let missing = store
            .find(&model, &json!(6), TrashedMode::With)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_persist_hook_can_write_through_transaction() {
        let model = relational_person(ConnectionInfo::sqlite());
        let fields = person_fields();
        let store = sqlite_store();
        let adapters = AdapterRegistry::default();

        let hooks = HookRegistry::new().on_persist(|ctx, record, tx| {
            async move {
                let mut record = record.clone();
                record.set("status", json!("imported"));
                let saved = tx.save(ctx.model, &mut record).await;
                saved.map(|()| Some(record))
            }
            .boxed()
        });

        let record = StoreService::new(&model, &fields, &store, &adapters)
            .with_hooks(hooks)
            .store(input(json!({"name": "Frances Allen"})), &RequestContext::new())
            .await
            .unwrap();

        let saved = store
            .find(&model, record.get("id").unwrap(), TrashedMode::Exclude)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.get("status"), Some(&json!("imported")));
        // Timestamps belong to the default persist step
        assert_eq!(saved.get("created_at"), Some(&serde_json::Value::Null));
    }
}
