//! Record types and seeded stores.

use serde_json::{Map, Value, json};

use helios_crud::backends::memory::MemoryStore;
#[cfg(feature = "sqlite")]
use helios_crud::backends::sqlite::SqliteStore;
use helios_crud::field::{FieldCatalogue, FieldDescriptor, FieldType, FilterType};
use helios_crud::model::{ConnectionInfo, ModelSchema, RelationDef, RelationKind};

/// Installs a test subscriber once; `RUST_LOG` controls the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Converts a `json!` object literal into an input map.
pub fn input(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// Field catalogue shared by every engine.
pub fn person_fields() -> FieldCatalogue {
    FieldCatalogue::new(vec![
        FieldDescriptor::new("name", FieldType::Text).searchable().sortable(),
        FieldDescriptor::new("email", FieldType::Text).searchable(),
        FieldDescriptor::new("status", FieldType::Select).filter(FilterType::Select),
        FieldDescriptor::new("age", FieldType::Number)
            .sortable()
            .filter(FilterType::Slider),
        FieldDescriptor::new("profile", FieldType::Json).hide_on_index(),
        FieldDescriptor::new("is_admin", FieldType::Boolean),
        FieldDescriptor::new("created_at", FieldType::Date)
            .fillable(false)
            .filter(FilterType::DatePicker),
        FieldDescriptor::new("team_id", FieldType::Relation)
            .relation("team", RelationKind::BelongsTo)
            .relation_columns("id", "name"),
        FieldDescriptor::new("tags", FieldType::Relation)
            .relation("tags", RelationKind::BelongsToMany)
            .relation_columns("id", "label")
            .filter(FilterType::Select),
    ])
    .expect("valid catalogue")
}

/// Relational `Person`: integer keys, pivot-backed tags.
pub fn relational_person(connection: ConnectionInfo) -> ModelSchema {
    ModelSchema::new("Person", "people", connection)
        .with_soft_deletes()
        .with_guarded(["is_admin"])
        .with_relation(RelationDef::belongs_to("team", "teams", "team_id"))
        .with_relation(RelationDef::belongs_to_many(
            "tags",
            "tags",
            "person_tag",
            "person_id",
            "tag_id",
        ))
}

/// Document `Person`: `_id` keys, tags embedded as a key array.
pub fn document_person() -> ModelSchema {
    ModelSchema::new("Person", "people", ConnectionInfo::mongodb())
        .with_primary_key("_id")
        .with_soft_deletes()
        .with_guarded(["is_admin", "profile.height"])
        .with_relation(RelationDef::belongs_to("team", "teams", "team_id").with_related_key("_id"))
        .with_relation(RelationDef::embeds_keys("tags", "tags", "tag_ids"))
}

/// Document catalogue: tags point at the embedded key array.
pub fn document_fields() -> FieldCatalogue {
    let mut fields: Vec<FieldDescriptor> = person_fields()
        .iter()
        .filter(|f| f.name != "tags" && f.name != "team_id")
        .cloned()
        .collect();
    fields.push(
        FieldDescriptor::new("team_id", FieldType::Relation)
            .relation("team", RelationKind::BelongsTo)
            .relation_columns("_id", "name"),
    );
    fields.push(
        FieldDescriptor::new("tags", FieldType::Relation)
            .relation("tags", RelationKind::BelongsToMany)
            .relation_columns("_id", "label")
            .filter(FilterType::Select),
    );
    FieldCatalogue::new(fields).expect("valid catalogue")
}

/// Rows seeded into every engine, oldest first.
pub fn people_rows() -> Vec<Value> {
    vec![
        json!({"name": "Ada Lovelace", "email": "ada@example.com", "status": "active", "age": 36, "created_at": "2024-01-02 09:00:00"}),
        json!({"name": "Alan Turing", "email": "alan@example.com", "status": "active", "age": 41, "created_at": "2024-01-05 10:00:00"}),
        json!({"name": "Grace Hopper", "email": "grace@example.com", "status": "retired", "age": 85, "created_at": "2024-01-09 11:00:00"}),
        json!({"name": "Edsger Dijkstra", "email": "ewd@example.com", "status": "pending", "age": 72, "created_at": "2024-02-01 08:00:00"}),
        json!({"name": "Barbara Liskov", "email": "liskov@example.com", "status": "active", "age": 29, "created_at": "2024-02-10 12:00:00", "deleted_at": "2024-03-01 00:00:00"}),
    ]
}

#[cfg(feature = "sqlite")]
const SQLITE_SCHEMA: &str = "
    CREATE TABLE teams (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
    CREATE TABLE tags (id INTEGER PRIMARY KEY, label TEXT NOT NULL);
    CREATE TABLE people (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT,
        email TEXT,
        status TEXT,
        age INTEGER,
        profile TEXT,
        is_admin INTEGER NOT NULL DEFAULT 0,
        team_id INTEGER REFERENCES teams(id),
        created_at TEXT,
        updated_at TEXT,
        deleted_at TEXT
    );
    CREATE TABLE person_tag (person_id INTEGER NOT NULL, tag_id INTEGER NOT NULL);
    INSERT INTO teams (id, name) VALUES (1, 'Analytical'), (2, 'Compilers');
    INSERT INTO tags (id, label) VALUES (1, 'math'), (2, 'logic'), (3, 'navy');
";

/// In-memory SQLite store seeded by [`seed_sqlite`].
#[cfg(feature = "sqlite")]
pub fn sqlite_store() -> SqliteStore {
    let store = SqliteStore::in_memory().expect("in-memory sqlite");
    seed_sqlite(&store);
    store
}

/// Creates the schema and seeds [`people_rows`] (ids 1 to 5).
///
/// Ada and Alan are on team 1; Ada carries tags 1 and 2, Alan tag 2,
/// Grace tag 3.
#[cfg(feature = "sqlite")]
pub fn seed_sqlite(store: &SqliteStore) {
    store.execute_batch(SQLITE_SCHEMA).expect("schema");

    let mut seed = String::new();
    for row in people_rows() {
        seed.push_str(&format!(
            "INSERT INTO people (name, email, status, age, created_at, updated_at, deleted_at) \
             VALUES ('{}', '{}', '{}', {}, '{}', '{}', {});\n",
            row["name"].as_str().unwrap_or_default(),
            row["email"].as_str().unwrap_or_default(),
            row["status"].as_str().unwrap_or_default(),
            row["age"],
            row["created_at"].as_str().unwrap_or_default(),
            row["created_at"].as_str().unwrap_or_default(),
            row["deleted_at"]
                .as_str()
                .map(|d| format!("'{}'", d))
                .unwrap_or_else(|| "NULL".to_string()),
        ));
    }
    seed.push_str(
        "UPDATE people SET team_id = 1 WHERE id IN (1, 2);
         INSERT INTO person_tag (person_id, tag_id) VALUES (1, 1), (1, 2), (2, 2), (3, 3);",
    );
    store.execute_batch(&seed).expect("seed");
}

/// Team documents, `_id`s `t1` and `t2`.
pub fn team_documents() -> Vec<Value> {
    vec![json!({"_id": "t1", "name": "Analytical"}), json!({"_id": "t2", "name": "Compilers"})]
}

/// Tag documents, `_id`s `g1` to `g3`.
pub fn tag_documents() -> Vec<Value> {
    vec![
        json!({"_id": "g1", "label": "math"}),
        json!({"_id": "g2", "label": "logic"}),
        json!({"_id": "g3", "label": "navy"}),
    ]
}

/// [`people_rows`] as documents, `_id`s `p1` to `p5`.
///
/// Same relations as [`sqlite_store`], with string keys.
pub fn people_documents() -> Vec<Value> {
    let tags = [json!(["g1", "g2"]), json!(["g2"]), json!(["g3"]), json!([]), json!([])];
    people_rows()
        .into_iter()
        .zip(tags)
        .enumerate()
        .map(|(i, (mut row, tag_ids))| {
            row["_id"] = json!(format!("p{}", i + 1));
            row["tag_ids"] = tag_ids;
            if i < 2 {
                row["team_id"] = json!("t1");
            }
            row["profile"] = json!({"height": 170, "eyes": "brown"});
            // created_at as stored by the document engine
            let created = row["created_at"].as_str().unwrap_or_default().replace(' ', "T");
            row["created_at"] = json!({"$date": format!("{}.000Z", created)});
            row
        })
        .collect()
}

/// Document store seeded with [`people_documents`].
pub fn memory_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert_many("teams", team_documents()).expect("teams");
    store.insert_many("tags", tag_documents()).expect("tags");
    store.insert_many("people", people_documents()).expect("people");
    store
}
