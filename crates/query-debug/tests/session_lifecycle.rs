mod common;

use common::{engine, events, ScriptedRunner};
use query_debug::{
    BreakpointRequest, DebugError, DebugEvent, DebugLevel, EngineConfig, SessionConfigUpdate,
    SessionStatus, SqlValue, Variable,
};

#[test]
fn new_session_is_running_with_defaults() {
    let engine = engine();
    let session = engine.create_session("u1", "c1", None).unwrap();

    assert_eq!(session.user_id, "u1");
    assert_eq!(session.connection_id, "c1");
    assert_eq!(session.state.status, SessionStatus::Running);
    assert!(session.state.breakpoints.is_empty());
    assert!(session.state.current_point.is_none());
    assert_eq!(session.config, EngineConfig::default().session);
    assert_eq!(session.stats.statements_executed, 0);
    assert_eq!(engine.get_session(session.id), Some(session));
}

#[test]
fn overrides_merge_onto_defaults() {
    let engine = engine();
    let session = engine
        .create_session(
            "u1",
            "c1",
            Some(SessionConfigUpdate {
                level: Some(DebugLevel::Verbose),
                max_history_size: Some(5),
                ..SessionConfigUpdate::default()
            }),
        )
        .unwrap();
    assert_eq!(session.config.level, DebugLevel::Verbose);
    assert_eq!(session.config.max_history_size, 5);
    assert!(session.config.time_travel_enabled);

    let err = engine
        .create_session(
            "u1",
            "c2",
            Some(SessionConfigUpdate {
                max_history_size: Some(0),
                ..SessionConfigUpdate::default()
            }),
        )
        .unwrap_err();
    assert!(matches!(err, DebugError::Validation(_)));
    assert_eq!(engine.get_user_sessions("u1").len(), 1);
}

#[test]
fn user_sessions_are_listed_oldest_first() {
    let engine = engine();
    let first = engine.create_session("alice", "c1", None).unwrap();
    engine.create_session("bob", "c2", None).unwrap();
    let second = engine.create_session("alice", "c3", None).unwrap();

    let ids: Vec<_> = engine
        .get_user_sessions("alice")
        .into_iter()
        .map(|session| session.id)
        .collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert!(engine.get_user_sessions("carol").is_empty());
}

#[test]
fn delete_cascades_to_every_component() {
    let engine = engine();
    let session = engine.create_session("u1", "c1", None).unwrap();
    let other = engine.create_session("u1", "c2", None).unwrap();
    let breakpoint = engine
        .create_breakpoint(session.id, BreakpointRequest::query(1))
        .unwrap();
    engine
        .create_breakpoint(other.id, BreakpointRequest::query(1))
        .unwrap();
    engine
        .set_variable(session.id, "session", Variable::new("retries", 3))
        .unwrap();
    let rx = engine.subscribe();

    assert!(engine.delete_session(session.id));

    assert!(engine.get_session(session.id).is_none());
    assert!(engine.get_breakpoint(breakpoint.id).is_none());
    assert!(engine.get_breakpoints_for_session(session.id).is_empty());
    assert!(engine.get_session_variables(session.id).is_empty());
    assert!(matches!(
        engine.get_execution_history(session.id),
        Err(DebugError::NotFound { kind: "session", .. })
    ));
    assert_eq!(engine.get_breakpoints_for_session(other.id).len(), 1);
    assert_eq!(engine.stats().breakpoints, 1);
    assert_eq!(
        events(&rx),
        vec![DebugEvent::SessionDeleted {
            session: session.id
        }]
    );

    assert!(!engine.delete_session(session.id));
}

#[test]
fn operations_on_unknown_sessions_are_not_found() {
    let engine = engine();
    let session = engine.create_session("u1", "c1", None).unwrap();
    engine.delete_session(session.id);
    let runner = ScriptedRunner::new();

    assert!(matches!(
        engine.execute_query(session.id, "SELECT 1", Vec::new(), runner.handle()),
        Err(DebugError::NotFound { .. })
    ));
    assert!(matches!(
        engine.pause(session.id),
        Err(DebugError::NotFound { .. })
    ));
    assert!(matches!(
        engine.create_breakpoint(session.id, BreakpointRequest::query(1)),
        Err(DebugError::NotFound { kind: "session", .. })
    ));
    assert!(matches!(
        engine.set_variable(session.id, "local", Variable::new("x", 1)),
        Err(DebugError::NotFound { .. })
    ));
}

#[test]
fn completed_session_is_stopped_and_rejects_more_work() {
    let engine = engine();
    let session = engine.create_session("u1", "c1", None).unwrap();
    let runner = ScriptedRunner::new();

    let status = engine
        .execute_query(session.id, "SELECT 1; SELECT 2", Vec::new(), runner.handle())
        .unwrap();
    assert_eq!(status, SessionStatus::Stopped);
    let stats = engine.session_stats(session.id).unwrap();
    assert_eq!(stats.statements_executed, 2);

    let err = engine
        .execute_query(session.id, "SELECT 3", Vec::new(), runner.handle())
        .unwrap_err();
    assert!(matches!(err, DebugError::InvalidState(_)));
    assert_eq!(runner.executed(), vec!["SELECT 1", "SELECT 2"]);
}

#[test]
fn session_variables_track_the_last_statement() {
    let engine = engine();
    let session = engine.create_session("u1", "c1", None).unwrap();
    let runner = ScriptedRunner::new();
    runner.respond("UPDATE t SET a = 1", query_debug::QueryResult::affected(7));

    engine
        .execute_query(
            session.id,
            "SELECT 1; UPDATE t SET a = 1",
            vec![SqlValue::Int(42)],
            runner.handle(),
        )
        .unwrap();

    let session_vars = engine.get_session_variables(session.id);
    let value = |name: &str| {
        session_vars
            .iter()
            .find(|variable| variable.name == name)
            .map(|variable| variable.value.clone())
    };
    assert_eq!(value("ROW_COUNT"), Some(SqlValue::Int(7)));
    assert_eq!(value("LAST_QUERY_ID"), Some(SqlValue::Int(2)));

    let locals = engine.get_variables(session.id, "local").unwrap();
    assert_eq!(locals.len(), 1);
    assert_eq!(locals[0].name, "$1");
    assert!(!locals[0].mutable);
}

#[test]
fn shutdown_stops_sessions_and_rejects_later_calls() {
    let engine = engine();
    let session = engine.create_session("u1", "c1", None).unwrap();
    let rx = engine.subscribe();
    assert!(engine.is_running());

    engine.shutdown();

    assert!(!engine.is_running());
    assert!(events(&rx).contains(&DebugEvent::SessionStateChanged {
        session: session.id,
        from: SessionStatus::Running,
        to: SessionStatus::Stopped,
    }));
    assert!(engine.get_session(session.id).is_none());
    assert_eq!(
        engine.create_session("u1", "c1", None).unwrap_err(),
        DebugError::InvalidState("engine is shut down".into())
    );
    assert!(matches!(
        engine.resume(session.id),
        Err(DebugError::InvalidState(_))
    ));

    engine.shutdown();
}

#[test]
fn stats_count_sessions_by_status() {
    let engine = engine();
    let runner = ScriptedRunner::new();
    let running = engine.create_session("u1", "c1", None).unwrap();
    let paused = engine.create_session("u1", "c2", None).unwrap();
    let stopped = engine.create_session("u2", "c3", None).unwrap();
    engine
        .create_breakpoint(paused.id, BreakpointRequest::query(2))
        .unwrap();
    engine
        .execute_query(paused.id, "SELECT 1; SELECT 2", Vec::new(), runner.handle())
        .unwrap();
    engine
        .execute_query(stopped.id, "SELECT 1", Vec::new(), runner.handle())
        .unwrap();

    let stats = engine.stats();
    assert_eq!(stats.sessions, 3);
    assert_eq!(stats.running, 1);
    assert_eq!(stats.paused, 1);
    assert_eq!(stats.stopped, 1);
    assert_eq!(stats.errored, 0);
    assert_eq!(stats.breakpoints, 1);
    assert_eq!(stats.statements_executed, 2);
    assert_eq!(stats.breakpoint_hits, 1);
    assert!(stats.history_points >= 3);
    assert_eq!(
        engine.get_session(running.id).unwrap().state.status,
        SessionStatus::Running
    );
}

#[test]
fn deleting_a_session_with_work_in_flight_leaves_nothing_behind() {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use query_debug::{QueryResult, RunnerError, StatementRunner};

    let engine = Arc::new(engine());
    let session = engine.create_session("u1", "c1", None).unwrap();
    engine
        .create_breakpoint(session.id, BreakpointRequest::query(3))
        .unwrap();
    engine
        .set_variable(session.id, "session", Variable::new("stage", "loading"))
        .unwrap();
    let barrier = Arc::new(Barrier::new(2));
    let runner = {
        let barrier = Arc::clone(&barrier);
        move |sql: &str, _: &[SqlValue]| -> Result<QueryResult, RunnerError> {
            if sql == "SELECT 1" {
                barrier.wait();
                barrier.wait();
            }
            Ok(QueryResult::affected(1))
        }
    };

    let worker = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            engine.execute_query(
                session.id,
                "SELECT 1; SELECT 2; SELECT 3",
                vec![SqlValue::Int(1)],
                Some(Arc::new(runner) as Arc<dyn StatementRunner>),
            )
        })
    };

    barrier.wait();
    assert!(engine.delete_session(session.id));
    barrier.wait();

    let result = worker.join().unwrap();
    assert!(matches!(
        result,
        Err(DebugError::NotFound {
            kind: "session",
            ..
        })
    ));
    assert!(engine.get_session(session.id).is_none());
    assert!(engine.get_breakpoints_for_session(session.id).is_empty());
    assert!(engine.get_session_variables(session.id).is_empty());
    assert!(matches!(
        engine.get_execution_history(session.id),
        Err(DebugError::NotFound { .. })
    ));
    assert!(matches!(
        engine.get_operations(session.id),
        Err(DebugError::NotFound { .. })
    ));
    assert!(engine.get_active_transactions().is_empty());
    let stats = engine.stats();
    assert_eq!(stats.sessions, 0);
    assert_eq!(stats.breakpoints, 0);
    assert_eq!(stats.history_points, 0);
}
