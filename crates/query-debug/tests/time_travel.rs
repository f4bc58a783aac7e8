mod common;

use common::{engine, events, row, MemoryTable, TableRunner};
use expect_test::expect;
use query_debug::{
    DebugError, DebugEvent, Row, RowChange, SessionConfigUpdate, SessionStatus, SqlValue,
    Variable,
};
use std::sync::Arc;

const INSERT: &str = "INSERT INTO accounts VALUES (3, 30)";
const UPDATE: &str = "UPDATE accounts SET balance = 0 WHERE id = 1";
const DELETE: &str = "DELETE FROM accounts WHERE id = 2";

fn account(id: i64, balance: i64) -> Row {
    row(&[("id", SqlValue::Int(id)), ("balance", SqlValue::Int(balance))])
}

fn accounts() -> Vec<Row> {
    vec![account(1, 10), account(2, 20)]
}

fn accounts_runner() -> Arc<TableRunner> {
    let runner = TableRunner::new(MemoryTable::new(&["id"], accounts()));
    runner.on(
        INSERT,
        RowChange::insert("accounts", &["id"], vec![account(3, 30)]),
    );
    runner.on(
        UPDATE,
        RowChange::update("accounts", &["id"], vec![account(1, 10)], vec![account(1, 0)]),
    );
    runner.on(
        DELETE,
        RowChange::delete("accounts", &["id"], vec![account(2, 20)]),
    );
    runner
}

fn script() -> String {
    [INSERT, UPDATE, DELETE].join(";\n")
}

#[test]
fn rewinding_every_operation_restores_the_table() {
    let engine = engine();
    let session = engine.create_session("u1", "c1", None).unwrap();
    let runner = accounts_runner();

    let status = engine
        .execute_query(session.id, script(), Vec::new(), runner.handle())
        .unwrap();
    assert_eq!(status, SessionStatus::Stopped);
    assert_eq!(runner.rows(), vec![account(1, 0), account(3, 30)]);

    let operations = engine.get_operations(session.id).unwrap();
    let query_ids: Vec<u32> = operations.iter().map(|operation| operation.query_id).collect();
    assert_eq!(query_ids, vec![1, 2, 3]);
    let snapshots = engine.get_snapshots(session.id).unwrap();
    assert_eq!(snapshots.len(), 3);
    for (operation, snapshot) in operations.iter().zip(&snapshots) {
        assert_eq!(operation.id, snapshot.operation_id);
    }

    let rx = engine.subscribe();
    let mut rewound = Vec::new();
    for _ in 0..3 {
        rewound.push(engine.rewind(session.id, runner.handle()).unwrap().query_id);
    }
    assert_eq!(rewound, vec![3, 2, 1]);
    assert_eq!(runner.rows(), accounts());
    assert!(engine.get_operations(session.id).unwrap().is_empty());

    let undo_sql = runner.executed()[3..].join("\n");
    expect![[r#"
        INSERT INTO "accounts" ("id", "balance") VALUES (2, 20);
        UPDATE "accounts" SET "balance" = 10 WHERE "id" = 1;
        DELETE FROM "accounts" WHERE "id" = 3;"#]]
    .assert_eq(&undo_sql);

    let rewound_events = events(&rx)
        .into_iter()
        .filter(|event| matches!(event, DebugEvent::Rewound { .. }))
        .count();
    assert_eq!(rewound_events, 3);

    assert_eq!(
        engine.rewind(session.id, runner.handle()).unwrap_err(),
        DebugError::InvalidState("nothing to rewind".into())
    );
}

#[test]
fn rewind_restores_variables_captured_before_the_change() {
    let engine = engine();
    let session = engine.create_session("u1", "c1", None).unwrap();
    engine
        .set_variable(session.id, "session", Variable::new("stage", "before"))
        .unwrap();
    let runner = accounts_runner();

    engine
        .execute_query(session.id, UPDATE, Vec::new(), runner.handle())
        .unwrap();
    engine
        .set_variable(session.id, "session", Variable::new("stage", "after"))
        .unwrap();
    let snapshot = &engine.get_snapshots(session.id).unwrap()[0];
    assert_eq!(snapshot.variables["session"].len(), 1);

    engine.rewind(session.id, runner.handle()).unwrap();

    let variables = engine.get_variables(session.id, "session").unwrap();
    let names: Vec<_> = variables
        .iter()
        .map(|variable| (variable.name.as_str(), variable.value.to_string()))
        .collect();
    assert_eq!(names, vec![("stage", "before".to_string())]);
    assert_eq!(runner.rows(), accounts());
}

#[test]
fn failed_rewind_keeps_the_operation() {
    let engine = engine();
    let session = engine.create_session("u1", "c1", None).unwrap();
    let runner = accounts_runner();
    engine
        .execute_query(session.id, UPDATE, Vec::new(), runner.handle())
        .unwrap();
    let inverse = r#"UPDATE "accounts" SET "balance" = 10 WHERE "id" = 1;"#;
    runner.fail_on(inverse);
    let rx = engine.subscribe();

    let err = engine.rewind(session.id, runner.handle()).unwrap_err();

    assert!(matches!(err, DebugError::ExecutionFailure { query: 0, .. }));
    assert!(events(&rx)
        .iter()
        .any(|event| matches!(event, DebugEvent::QueryFailed { query_id: 0, .. })));
    assert_eq!(engine.get_operations(session.id).unwrap().len(), 1);
    assert_eq!(runner.rows(), vec![account(1, 0), account(2, 20)]);

    runner.heal();
    let operation = engine.rewind(session.id, runner.handle()).unwrap();
    assert_eq!(operation.sql, UPDATE);
    assert_eq!(runner.rows(), accounts());
}

#[test]
fn rewind_needs_a_runner() {
    let engine = engine();
    let session = engine.create_session("u1", "c1", None).unwrap();
    assert_eq!(
        engine.rewind(session.id, None).unwrap_err(),
        DebugError::MissingDependency("statement runner")
    );
}

#[test]
fn disabled_time_travel_records_nothing() {
    let engine = engine();
    let session = engine
        .create_session(
            "u1",
            "c1",
            Some(SessionConfigUpdate {
                time_travel_enabled: Some(false),
                ..SessionConfigUpdate::default()
            }),
        )
        .unwrap();
    let runner = accounts_runner();

    engine
        .execute_query(session.id, script(), Vec::new(), runner.handle())
        .unwrap();

    assert!(engine.get_operations(session.id).unwrap().is_empty());
    assert!(matches!(
        engine.rewind(session.id, runner.handle()),
        Err(DebugError::InvalidState(_))
    ));
}

#[test]
fn operation_log_is_bounded() {
    let engine = engine();
    let session = engine
        .create_session(
            "u1",
            "c1",
            Some(SessionConfigUpdate {
                max_history_size: Some(2),
                ..SessionConfigUpdate::default()
            }),
        )
        .unwrap();
    let runner = accounts_runner();

    engine
        .execute_query(session.id, script(), Vec::new(), runner.handle())
        .unwrap();

    let query_ids: Vec<u32> = engine
        .get_operations(session.id)
        .unwrap()
        .iter()
        .map(|operation| operation.query_id)
        .collect();
    assert_eq!(query_ids, vec![2, 3]);
    assert_eq!(engine.get_snapshots(session.id).unwrap().len(), 2);
}

#[test]
fn operations_serialize_with_their_change() {
    let engine = engine();
    let session = engine.create_session("u1", "c1", None).unwrap();
    let runner = accounts_runner();
    engine
        .execute_query(session.id, DELETE, Vec::new(), runner.handle())
        .unwrap();

    let operation = &engine.get_operations(session.id).unwrap()[0];
    let mut value = serde_json::to_value(operation).unwrap();
    value["timestamp"] = serde_json::Value::Null;
    value["id"] = serde_json::Value::Null;
    expect![[r#"{"change":{"newRows":[],"oldRows":[{"balance":{"type":"int","value":20},"id":{"type":"int","value":2}}],"pkFields":["id"],"table":"accounts","type":"DELETE"},"id":null,"queryId":1,"sql":"DELETE FROM accounts WHERE id = 2","timestamp":null}"#]]
    .assert_eq(&value.to_string());
}

#[test]
fn interrupted_rewind_resumes_at_the_failed_statement() {
    const RESET: &str = "UPDATE accounts SET balance = 0";
    let engine = engine();
    let session = engine.create_session("u1", "c1", None).unwrap();
    let runner = TableRunner::new(MemoryTable::new(&["id"], accounts()));
    runner.on(
        RESET,
        RowChange::update(
            "accounts",
            &["id"],
            accounts(),
            vec![account(1, 0), account(2, 0)],
        ),
    );
    engine
        .execute_query(session.id, RESET, Vec::new(), runner.handle())
        .unwrap();
    runner.fail_on(r#"UPDATE "accounts" SET "balance" = 20 WHERE "id" = 2;"#);

    let err = engine.rewind(session.id, runner.handle()).unwrap_err();

    assert!(matches!(err, DebugError::ExecutionFailure { query: 0, .. }));
    assert_eq!(runner.rows(), vec![account(1, 10), account(2, 0)]);
    assert_eq!(engine.get_operations(session.id).unwrap().len(), 1);

    runner.heal();
    engine.rewind(session.id, runner.handle()).unwrap();
    assert_eq!(runner.rows(), accounts());
    assert!(engine.get_operations(session.id).unwrap().is_empty());
    expect![[r#"
        UPDATE "accounts" SET "balance" = 10 WHERE "id" = 1;
        UPDATE "accounts" SET "balance" = 20 WHERE "id" = 2;
        UPDATE "accounts" SET "balance" = 20 WHERE "id" = 2;"#]]
    .assert_eq(&runner.executed()[1..].join("\n"));
}

fn item(order_id: i64, line: i64, sku: &str) -> Row {
    row(&[
        ("order_id", SqlValue::Int(order_id)),
        ("line", SqlValue::Int(line)),
        ("sku", sku.into()),
    ])
}

#[test]
fn multi_row_changes_on_composite_keys_round_trip() {
    const ADD: &str = "INSERT INTO order_items VALUES (7, 2, 'B'), (8, 1, 'C')";
    const DROP: &str = "DELETE FROM order_items WHERE order_id = 7";
    let engine = engine();
    let session = engine.create_session("u1", "c1", None).unwrap();
    let original = vec![item(7, 1, "A")];
    let runner = TableRunner::new(MemoryTable::new(&["order_id", "line"], original.clone()));
    let pk = ["order_id", "line"];
    runner.on(
        ADD,
        RowChange::insert("order_items", &pk, vec![item(7, 2, "B"), item(8, 1, "C")]),
    );
    runner.on(
        DROP,
        RowChange::delete("order_items", &pk, vec![item(7, 1, "A"), item(7, 2, "B")]),
    );

    engine
        .execute_query(session.id, format!("{ADD};\n{DROP}"), Vec::new(), runner.handle())
        .unwrap();
    assert_eq!(runner.rows(), vec![item(8, 1, "C")]);

    engine.rewind(session.id, runner.handle()).unwrap();
    engine.rewind(session.id, runner.handle()).unwrap();

    assert_eq!(runner.rows(), original);
    expect![[r#"
        INSERT INTO "order_items" ("order_id", "line", "sku") VALUES (7, 1, 'A'), (7, 2, 'B');
        DELETE FROM "order_items" WHERE ("order_id" = 7 AND "line" = 2) OR ("order_id" = 8 AND "line" = 1);"#]]
    .assert_eq(&runner.executed()[2..].join("\n"));
}

fn branch_account(id: i64, branch: SqlValue, balance: i64) -> Row {
    row(&[
        ("id", SqlValue::Int(id)),
        ("branch", branch),
        ("balance", SqlValue::Int(balance)),
    ])
}

#[test]
fn null_keys_and_key_changes_round_trip() {
    const OPEN: &str = "INSERT INTO accounts VALUES (3, NULL, 7)";
    const MOVE: &str = "UPDATE accounts SET id = 5, balance = 0 WHERE id = 1";
    let engine = engine();
    let session = engine.create_session("u1", "c1", None).unwrap();
    let original = vec![branch_account(1, SqlValue::Null, 10)];
    let pk = ["id", "branch"];
    let runner = TableRunner::new(MemoryTable::new(&pk, original.clone()));
    runner.on(
        OPEN,
        RowChange::insert("accounts", &pk, vec![branch_account(3, SqlValue::Null, 7)]),
    );
    runner.on(
        MOVE,
        RowChange::update(
            "accounts",
            &pk,
            vec![branch_account(1, SqlValue::Null, 10)],
            vec![branch_account(5, SqlValue::Null, 0)],
        ),
    );

    engine
        .execute_query(session.id, format!("{OPEN};\n{MOVE}"), Vec::new(), runner.handle())
        .unwrap();
    assert_eq!(
        runner.rows(),
        vec![
            branch_account(5, SqlValue::Null, 0),
            branch_account(3, SqlValue::Null, 7),
        ]
    );

    engine.rewind(session.id, runner.handle()).unwrap();
    assert_eq!(
        runner.rows(),
        vec![
            branch_account(1, SqlValue::Null, 10),
            branch_account(3, SqlValue::Null, 7),
        ]
    );
    engine.rewind(session.id, runner.handle()).unwrap();

    assert_eq!(runner.rows(), original);
    expect![[r#"
        UPDATE "accounts" SET "id" = 1, "branch" = NULL, "balance" = 10 WHERE "id" = 5 AND "branch" IS NULL;
        DELETE FROM "accounts" WHERE "id" = 3 AND "branch" IS NULL;"#]]
    .assert_eq(&runner.executed()[2..].join("\n"));
}

#[test]
fn unsupported_operations_rewind_as_no_ops() {
    const MERGE: &str = "MERGE INTO accounts USING staged ON accounts.id = staged.id";
    let engine = engine();
    let session = engine.create_session("u1", "c1", None).unwrap();
    let runner = TableRunner::new(MemoryTable::new(&["id"], accounts()));
    let mut change = RowChange::insert("accounts", &["id"], vec![account(4, 40)]);
    change.operation = "merge".parse().unwrap();
    runner.on(MERGE, change);
    engine
        .execute_query(session.id, MERGE, Vec::new(), runner.handle())
        .unwrap();
    let rx = engine.subscribe();

    let operation = engine.rewind(session.id, runner.handle()).unwrap();

    assert_eq!(operation.sql, MERGE);
    assert_eq!(runner.executed(), vec![MERGE.to_string()]);
    assert_eq!(runner.rows(), accounts());
    let sql: Vec<String> = events(&rx)
        .into_iter()
        .filter_map(|event| match event {
            DebugEvent::Rewound { sql, .. } => Some(sql),
            _ => None,
        })
        .collect();
    expect![[r#"["-- no-op: unsupported operation type MERGE on accounts"]"#]]
        .assert_eq(&format!("{sql:?}"));
}
