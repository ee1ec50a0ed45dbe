use std::sync::Arc;

use regex::Regex;
use sheetfeed::{
    AuthScheme, Column, ColumnType, Condition, Direction, HttpMethod, LIST_FEED_REL,
    MockSheetService, Record, Resource, Row, SelectQuery, SheetAdapter, SheetConfig, SheetError,
    SheetResult, TableSchema, TitlePattern, Value,
};

const TOKEN: &str = "crew-secret";

fn crew_schema() -> Arc<TableSchema> {
    Arc::new(TableSchema::new(
        "crew",
        vec![
            Column::serial("id"),
            Column::new("name", ColumnType::Text),
            Column::new("times_a_lady", ColumnType::Integer),
            Column::new("created_at", ColumnType::Text),
        ],
    ))
}

fn config_for(service: &MockSheetService) -> SheetConfig {
    SheetConfig::new(&service.spreadsheet_url(), TOKEN).expect("config should parse")
}

fn connect() -> (MockSheetService, SheetAdapter<MockSheetService>) {
    let service = MockSheetService::default().with_token(TOKEN);
    let adapter = SheetAdapter::with_transport(service.clone(), &config_for(&service))
        .expect("adapter should build");
    (service, adapter)
}

fn crew_member(schema: &Arc<TableSchema>, name: &str, times_a_lady: i64) -> Row {
    Row::new(schema.clone())
        .with("name", name)
        .with("times_a_lady", times_a_lady)
        .with("created_at", "2026-10-18T10:00:00Z")
}

async fn seeded_crew(
    adapter: &SheetAdapter<MockSheetService>,
    schema: &Arc<TableSchema>,
) -> SheetResult<Vec<Row>> {
    adapter.create_model_storage(schema.as_ref()).await?;
    let mut rows = vec![
        crew_member(schema, "Mike Nelson", 8),
        crew_member(schema, "Tom Servo", 100),
        crew_member(schema, "Gypsy", 3),
    ];
    adapter.create(&mut rows).await?;
    Ok(rows)
}

fn names(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|record| record.get("name").map(Value::to_string).unwrap_or_default())
        .collect()
}

#[tokio::test(flavor = "current_thread")]
async fn storage_lifecycle_expected_create_once_then_destroy() {
    let (service, adapter) = connect();
    let schema = crew_schema();

    assert!(!adapter.storage_exists("crew").await.expect("exists should succeed"));
    assert!(
        adapter
            .create_model_storage(schema.as_ref())
            .await
            .expect("create should succeed")
    );
    assert!(adapter.storage_exists("crew").await.expect("exists should succeed"));
    assert!(
        !adapter
            .create_model_storage(schema.as_ref())
            .await
            .expect("second create should succeed")
    );
    assert_eq!(service.worksheet_titles(), vec!["crew".to_string()]);

    assert!(
        adapter
            .destroy_model_storage(schema.as_ref())
            .await
            .expect("destroy should succeed")
    );
    assert!(!adapter.storage_exists("crew").await.expect("exists should succeed"));
    assert!(
        !adapter
            .destroy_storage("crew")
            .await
            .expect("destroy of absent worksheet should succeed")
    );
}

#[tokio::test(flavor = "current_thread")]
async fn create_model_storage_expected_header_cells_in_declared_order() {
    let (service, adapter) = connect();
    adapter
        .create_model_storage(crew_schema().as_ref())
        .await
        .expect("create should succeed");

    assert_eq!(
        service.worksheet_headers("crew"),
        Some(vec![
            "id".to_string(),
            "name".to_string(),
            "timesalady".to_string(),
            "createdat".to_string(),
        ])
    );
    let cell_puts: Vec<String> = service
        .requests()
        .into_iter()
        .filter(|request| request.method == HttpMethod::Put)
        .map(|request| request.url)
        .collect();
    assert_eq!(cell_puts.len(), 4);
    assert!(cell_puts[0].ends_with("/R1C1"));
    assert!(cell_puts[3].ends_with("/R1C4"));
}

#[tokio::test(flavor = "current_thread")]
async fn create_model_storage_colliding_fields_expected_configuration_error() {
    let (service, adapter) = connect();
    let schema = TableSchema::new(
        "crew",
        vec![
            Column::serial("id"),
            Column::new("times_a_lady", ColumnType::Integer),
            Column::new("timesALady", ColumnType::Integer),
        ],
    );

    let error = adapter
        .create_model_storage(&schema)
        .await
        .expect_err("colliding fields should be rejected");
    let SheetError::Configuration(message) = error else {
        panic!("expected a configuration error, got {error}");
    };
    assert!(message.contains("timesalady"), "{message}");
    assert!(service.worksheet_titles().is_empty());
    assert!(service.requests().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn create_model_storage_header_failure_expected_stop_after_failed_cell() {
    let (service, adapter) = connect();
    service.fail_next(HttpMethod::Put, "/R1C2", 500);

    let error = adapter
        .create_model_storage(crew_schema().as_ref())
        .await
        .expect_err("header write should fail");
    assert_eq!(error.status(), Some(500));

    assert!(adapter.storage_exists("crew").await.expect("exists should succeed"));
    assert_eq!(
        service.worksheet_headers("crew"),
        Some(vec![
            "id".to_string(),
            String::new(),
            String::new(),
            String::new(),
        ])
    );
    let later_cells = service
        .requests()
        .into_iter()
        .filter(|request| request.method == HttpMethod::Put)
        .filter(|request| request.url.ends_with("/R1C3") || request.url.ends_with("/R1C4"))
        .count();
    assert_eq!(later_cells, 0);
}

#[tokio::test(flavor = "current_thread")]
async fn destroy_storage_duplicate_titles_expected_all_removed() {
    let (service, adapter) = connect();
    service.add_worksheet("crew", &["name"]);
    service.add_worksheet("bots", &["name"]);
    service.add_worksheet("crew", &["name"]);

    assert!(adapter.destroy_storage("crew").await.expect("destroy should succeed"));
    assert_eq!(service.worksheet_titles(), vec!["bots".to_string()]);
}

#[tokio::test(flavor = "current_thread")]
async fn create_rows_expected_sequential_serials() {
    let (service, adapter) = connect();
    let schema = crew_schema();
    let rows = seeded_crew(&adapter, &schema)
        .await
        .expect("seeding should succeed");

    let serials: Vec<Value> = rows.iter().map(|row| row.attribute_get("id")).collect();
    assert_eq!(
        serials,
        vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
    );
    let stored = service.rows("crew");
    assert_eq!(stored.len(), 3);
    assert_eq!(
        stored[0],
        vec![
            ("id".to_string(), "1".to_string()),
            ("name".to_string(), "Mike Nelson".to_string()),
            ("timesalady".to_string(), "8".to_string()),
            ("createdat".to_string(), "2026-10-18T10:00:00Z".to_string()),
        ]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn create_rows_across_worksheets_expected_serials_per_worksheet() {
    let (service, adapter) = connect();
    let crew = crew_schema();
    let bots = Arc::new(TableSchema::new(
        "bots",
        vec![Column::serial("id"), Column::new("name", ColumnType::Text)],
    ));
    adapter
        .create_model_storage(crew.as_ref())
        .await
        .expect("crew create should succeed");
    adapter
        .create_model_storage(bots.as_ref())
        .await
        .expect("bots create should succeed");

    let mut rows = vec![
        crew_member(&crew, "Mike Nelson", 8),
        Row::new(bots.clone()).with("name", "Crow"),
        crew_member(&crew, "Gypsy", 3),
    ];
    let created = adapter.create(&mut rows).await.expect("create should succeed");
    assert_eq!(created, 3);

    let serials: Vec<Value> = rows.iter().map(|row| row.attribute_get("id")).collect();
    assert_eq!(
        serials,
        vec![Value::Integer(1), Value::Integer(1), Value::Integer(2)]
    );
    assert_eq!(service.rows("crew").len(), 2);
    assert_eq!(
        service.rows("bots"),
        vec![vec![
            ("id".to_string(), "1".to_string()),
            ("name".to_string(), "Crow".to_string()),
        ]]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn read_with_filter_expected_only_matching_crew() {
    let (_service, adapter) = connect();
    let schema = crew_schema();
    seeded_crew(&adapter, &schema)
        .await
        .expect("seeding should succeed");

    let query = SelectQuery::all(schema.clone())
        .with_condition(Condition::new(
            "times_a_lady",
            sheetfeed::Comparison::Lt,
            10,
        ))
        .expect("condition should apply");
    let records = adapter.read(&query).await.expect("read should succeed");

    assert_eq!(names(&records), vec!["Mike Nelson", "Gypsy"]);
    assert_eq!(records[0].get("timesalady"), Some(&Value::Integer(8)));
    assert_eq!(records[0].get("id"), Some(&Value::Integer(1)));
}

#[tokio::test(flavor = "current_thread")]
async fn read_with_projection_and_order_expected_requested_fields_only() {
    let (_service, adapter) = connect();
    let schema = crew_schema();
    seeded_crew(&adapter, &schema)
        .await
        .expect("seeding should succeed");

    let query = SelectQuery::all(schema.clone())
        .select(&["name"])
        .expect("projection should apply")
        .order_by("name", Direction::Asc)
        .expect("order should apply")
        .limit(2);
    let records = adapter.read(&query).await.expect("read should succeed");

    assert_eq!(names(&records), vec!["Gypsy", "Mike Nelson"]);
    assert!(records.iter().all(|record| record.len() == 1));
}

#[tokio::test(flavor = "current_thread")]
async fn read_missing_cell_expected_null() {
    let (service, adapter) = connect();
    let schema = crew_schema();
    adapter
        .create_model_storage(schema.as_ref())
        .await
        .expect("create should succeed");
    let mut rows = vec![Row::new(schema.clone()).with("name", "Crow")];
    adapter.create(&mut rows).await.expect("insert should succeed");
    assert_eq!(service.rows("crew").len(), 1);

    let records = adapter
        .read(&SelectQuery::all(schema.clone()))
        .await
        .expect("read should succeed");
    assert_eq!(records[0].get("timesalady"), Some(&Value::Null));
    assert_eq!(records[0].get("name"), Some(&Value::Text("Crow".to_string())));
}

#[tokio::test(flavor = "current_thread")]
async fn update_row_expected_new_value_and_attribute_count() {
    let (service, adapter) = connect();
    let schema = crew_schema();
    let rows = seeded_crew(&adapter, &schema)
        .await
        .expect("seeding should succeed");

    let mut servo = rows[1].clone();
    servo
        .set("times_a_lady", Value::Integer(7))
        .expect("set should succeed");
    let attributes = Record::from([("timesalady".to_string(), Value::Integer(7))]);
    let changed = adapter
        .update(&attributes, &[servo])
        .await
        .expect("update should succeed");
    assert_eq!(changed, 1);

    let put = service
        .requests()
        .into_iter()
        .rev()
        .find(|request| request.method == HttpMethod::Put)
        .expect("update should PUT");
    assert_eq!(put.header("if-match"), Some("*"));
    assert_eq!(put.header("content-type"), Some("application/atom+xml"));

    let records = adapter
        .read(&SelectQuery::all(schema.clone()))
        .await
        .expect("read should succeed");
    let crew_record = |id: i64, name: &str, times_a_lady: i64| {
        Record::from([
            ("id".to_string(), Value::Integer(id)),
            ("name".to_string(), Value::from(name)),
            ("timesalady".to_string(), Value::Integer(times_a_lady)),
            ("createdat".to_string(), Value::from("2026-10-18T10:00:00Z")),
        ])
    };
    assert_eq!(
        records,
        vec![
            crew_record(1, "Mike Nelson", 8),
            crew_record(2, "Tom Servo", 7),
            crew_record(3, "Gypsy", 3),
        ]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn delete_row_expected_only_target_removed() {
    let (service, adapter) = connect();
    let schema = crew_schema();
    let rows = seeded_crew(&adapter, &schema)
        .await
        .expect("seeding should succeed");

    let deleted = adapter
        .delete(&rows[1..2])
        .await
        .expect("delete should succeed");
    assert_eq!(deleted, 1);

    let records = adapter
        .read(&SelectQuery::all(schema.clone()))
        .await
        .expect("read should succeed");
    assert_eq!(names(&records), vec!["Mike Nelson", "Gypsy"]);
    assert_eq!(service.rows("crew").len(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn update_unknown_row_expected_row_not_found() {
    let (_service, adapter) = connect();
    let schema = crew_schema();
    seeded_crew(&adapter, &schema)
        .await
        .expect("seeding should succeed");

    let ghost = crew_member(&schema, "Joel", 1).with("id", 99);
    let error = adapter
        .update(&Record::new(), &[ghost])
        .await
        .expect_err("unknown row should fail");
    let SheetError::RowNotFound { worksheet, key } = error else {
        panic!("expected a missing row, got {error}");
    };
    assert_eq!(worksheet, "crew");
    assert_eq!(key, "id=99");
}

#[tokio::test(flavor = "current_thread")]
async fn delete_without_key_properties_expected_unsupported() {
    let (service, adapter) = connect();
    let schema = Arc::new(TableSchema::new(
        "notes",
        vec![Column::new("body", ColumnType::Text)],
    ));
    service.add_worksheet("notes", &["body"]);

    let error = adapter
        .delete(&[Row::new(schema).with("body", "hi")])
        .await
        .expect_err("keyless delete should fail");
    assert!(matches!(error, SheetError::Unsupported(_)), "unexpected error: {error}");
}

#[tokio::test(flavor = "current_thread")]
async fn upgrade_model_storage_expected_unsupported() {
    let (_service, adapter) = connect();
    let error = adapter
        .upgrade_model_storage(crew_schema().as_ref())
        .await
        .expect_err("upgrade should fail");
    assert!(matches!(error, SheetError::Unsupported(_)));
}

#[tokio::test(flavor = "current_thread")]
async fn read_absent_worksheet_expected_worksheet_not_found() {
    let (_service, adapter) = connect();
    let error = adapter
        .read(&SelectQuery::all(crew_schema()))
        .await
        .expect_err("read should fail");
    assert!(matches!(error, SheetError::WorksheetNotFound(ref name) if name == "crew"));
}

#[tokio::test(flavor = "current_thread")]
async fn list_feed_relation_missing_expected_missing_relation() {
    let (service, adapter) = connect();
    let schema = crew_schema();
    adapter
        .create_model_storage(schema.as_ref())
        .await
        .expect("create should succeed");
    service.omit_relation(LIST_FEED_REL);

    let error = adapter
        .read(&SelectQuery::all(schema))
        .await
        .expect_err("read should fail");
    assert!(
        matches!(error, SheetError::MissingRelation { ref rel, .. } if rel == LIST_FEED_REL),
        "unexpected error: {error}"
    );
}

#[tokio::test(flavor = "current_thread")]
async fn server_error_on_insert_expected_abort_without_row() {
    let (service, adapter) = connect();
    let schema = crew_schema();
    adapter
        .create_model_storage(schema.as_ref())
        .await
        .expect("create should succeed");
    service.fail_next(HttpMethod::Post, "/feeds/list/", 500);

    let mut rows = vec![crew_member(&schema, "Mike Nelson", 8)];
    let error = adapter
        .create(&mut rows)
        .await
        .expect_err("insert should fail");
    assert_eq!(error.status(), Some(500));
    assert!(service.rows("crew").is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn wrong_token_expected_unauthorized() {
    let service = MockSheetService::default().with_token(TOKEN);
    let config =
        SheetConfig::new(&service.spreadsheet_url(), "wrong").expect("config should parse");
    let adapter =
        SheetAdapter::with_transport(service, &config).expect("adapter should build");

    let error = adapter
        .storage_exists("crew")
        .await
        .expect_err("request should be rejected");
    assert_eq!(error.status(), Some(401));
}

#[tokio::test(flavor = "current_thread")]
async fn authsub_scheme_expected_authsub_header() {
    let service = MockSheetService::default().with_token(TOKEN);
    let mut config = config_for(&service);
    config.auth_scheme = AuthScheme::AuthSub;
    let adapter =
        SheetAdapter::with_transport(service.clone(), &config).expect("adapter should build");

    adapter
        .storage_exists("crew")
        .await
        .expect("exists should succeed");
    let requests = service.requests();
    assert!(!requests.is_empty());
    assert!(requests.iter().all(|request| {
        request.header("authorization") == Some("AuthSub token=\"crew-secret\"")
    }));
}

#[tokio::test(flavor = "current_thread")]
async fn navigator_regex_pattern_expected_matching_worksheets() {
    let (service, adapter) = connect();
    service.add_worksheet("crew_2026", &["name"]);
    service.add_worksheet("bots", &["name"]);
    service.add_worksheet("crew_2027", &["name"]);

    let pattern = TitlePattern::from(Regex::new("^crew_").expect("regex should compile"));
    let entries = adapter
        .navigator()
        .worksheet_entries(&pattern)
        .await
        .expect("navigation should succeed");
    let titles: Vec<&str> = entries.iter().map(|entry| entry.title.as_str()).collect();
    assert_eq!(titles, vec!["crew_2026", "crew_2027"]);

    let post = adapter
        .navigator()
        .row_post_link("bots")
        .await
        .expect("post link should resolve");
    assert!(post.href.contains("/feeds/list/"));
}

#[tokio::test(flavor = "current_thread")]
async fn memory_adapter_from_config_expected_working_service() {
    let mut config = SheetConfig::new(
        "https://spreadsheets.mock.test/feeds/spreadsheets/abc123",
        TOKEN,
    )
    .expect("config should parse");
    config.connection_adapter = sheetfeed::ConnectionAdapter::Memory;
    let adapter = SheetAdapter::from_config(&config).expect("adapter should build");
    let schema = crew_schema();

    assert!(
        adapter
            .create_model_storage(schema.as_ref())
            .await
            .expect("create should succeed")
    );
    let mut rows = vec![crew_member(&schema, "Mike Nelson", 8)];
    adapter.create(&mut rows).await.expect("insert should succeed");
    let records = adapter
        .read(&SelectQuery::all(schema))
        .await
        .expect("read should succeed");
    assert_eq!(names(&records), vec!["Mike Nelson"]);
}
