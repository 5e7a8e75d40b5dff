//! Repair/retry loop behavior with scripted adapters and drafters.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use serde_json::{json, Value};

use heron::adapter::{AdapterError, DatabaseAdapter, Row};
use heron::drafter::{DraftError, DraftRequest, SqlDrafter};
use heron::error::HeronError;
use heron::guardrail::GuardrailError;
use heron::orchestrator::{ErrorClass, EvalStatus, Orchestrator};
use heron::plan::{normalize, Plan};
use heron::schema::{
    ColumnMetadata, SchemaMetadata, SchemaProfile, SourceInfo, TableMetadata,
};
use heron::sql::Engine;
use heron::store::MetadataStore;

const GOOD_SQL: &str = "SELECT amount FROM records";
const FIXED_SQL: &str = "SELECT amount, created_at FROM records";

fn fixture_metadata() -> SchemaMetadata {
    let column = |name: &str, data_type: &str| ColumnMetadata {
        column_name: name.to_string(),
        data_type: data_type.to_string(),
        udt_name: data_type.to_string(),
        is_nullable: true,
        is_primary_key: false,
        ordinal_position: 1,
    };
    SchemaMetadata {
        source: SourceInfo {
            db_engine: "sqlite".into(),
            schema_name: "main".into(),
        },
        profile: SchemaProfile {
            table_count: 1,
            relationship_count: 0,
        },
        tables: vec![TableMetadata {
            table_name: "records".to_string(),
            row_count: 100,
            columns: vec![
                column("id", "integer"),
                column("amount", "numeric"),
                column("created_at", "date"),
            ],
        }],
        entities: vec![],
        measures: vec![],
        time_columns: vec![],
        relationships: vec![],
    }
}

fn sample_row() -> Row {
    let mut row = Row::new();
    row.insert("amount".to_string(), Value::from(42.5));
    row
}

fn plan() -> Plan {
    normalize(&json!({"intent": "generic_sales_summary"}), "total sales").unwrap()
}

fn execution_error(message: &str) -> AdapterError {
    AdapterError::Sqlite(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
        Some(message.to_string()),
    ))
}

/// Pops one scripted outcome per `execute_select` call; an exhausted script
/// keeps returning empty result sets.
struct ScriptedAdapter {
    calls: Rc<RefCell<u32>>,
    script: RefCell<VecDeque<Result<Vec<Row>, String>>>,
}

impl ScriptedAdapter {
    fn new(script: Vec<Result<Vec<Row>, String>>) -> (Self, Rc<RefCell<u32>>) {
        let calls = Rc::new(RefCell::new(0));
        (
            Self {
                calls: Rc::clone(&calls),
                script: RefCell::new(script.into()),
            },
            calls,
        )
    }
}

impl DatabaseAdapter for ScriptedAdapter {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn execute_select(
        &self,
        _sql: &str,
        _row_limit: u32,
        _timeout_ms: u64,
    ) -> Result<Vec<Row>, AdapterError> {
        *self.calls.borrow_mut() += 1;
        match self.script.borrow_mut().pop_front() {
            Some(Ok(rows)) => Ok(rows),
            Some(Err(message)) => Err(execution_error(&message)),
            None => Ok(vec![]),
        }
    }

    fn introspect_schema(&self, _schema_name: Option<&str>) -> Result<SchemaMetadata, AdapterError> {
        Ok(fixture_metadata())
    }
}

/// Returns the same SQL on every draft, counting invocations.
struct CannedDrafter {
    sql: String,
    calls: Rc<RefCell<u32>>,
}

impl CannedDrafter {
    fn new(sql: &str) -> (Self, Rc<RefCell<u32>>) {
        let calls = Rc::new(RefCell::new(0));
        (
            Self {
                sql: sql.to_string(),
                calls: Rc::clone(&calls),
            },
            calls,
        )
    }
}

impl SqlDrafter for CannedDrafter {
    fn draft(&self, _request: &DraftRequest) -> Result<String, DraftError> {
        *self.calls.borrow_mut() += 1;
        Ok(self.sql.clone())
    }
}

/// Fails the test if the orchestrator ever asks it for SQL.
struct ForbiddenDrafter;

impl SqlDrafter for ForbiddenDrafter {
    fn draft(&self, _request: &DraftRequest) -> Result<String, DraftError> {
        panic!("drafter must not be called on a cache hit");
    }
}

/// First draft is plain; repair drafts must carry the previous SQL and a
/// classified error message.
struct RepairAwareDrafter {
    calls: Rc<RefCell<u32>>,
}

impl RepairAwareDrafter {
    fn new() -> (Self, Rc<RefCell<u32>>) {
        let calls = Rc::new(RefCell::new(0));
        (
            Self {
                calls: Rc::clone(&calls),
            },
            calls,
        )
    }
}

impl SqlDrafter for RepairAwareDrafter {
    fn draft(&self, request: &DraftRequest) -> Result<String, DraftError> {
        *self.calls.borrow_mut() += 1;
        if *self.calls.borrow() == 1 {
            assert!(request.previous_sql.is_none());
            assert!(request.error_message.is_none());
            Ok(GOOD_SQL.to_string())
        } else {
            assert_eq!(request.previous_sql.as_deref(), Some(GOOD_SQL));
            let message = request.error_message.as_deref().unwrap();
            assert!(
                message.contains("missing_column"),
                "repair context must carry the classification, got {message:?}"
            );
            Ok(FIXED_SQL.to_string())
        }
    }
}

#[test]
fn test_first_attempt_success_writes_cache_and_trace() {
    let store = MetadataStore::open_in_memory().unwrap();
    let (adapter, exec_calls) = ScriptedAdapter::new(vec![Ok(vec![sample_row()])]);
    let (drafter, draft_calls) = CannedDrafter::new(GOOD_SQL);
    let orchestrator = Orchestrator::new(Box::new(adapter), Box::new(drafter), &store);

    let report = orchestrator.run("total sales", &plan(), None).unwrap();

    assert_eq!(report.sql, GOOD_SQL);
    assert_eq!(report.evaluation.status, EvalStatus::Ok);
    assert_eq!(report.attempts_used, 1);
    assert!(!report.cache_hit);
    assert_eq!(report.rows.len(), 1);
    assert_eq!(*exec_calls.borrow(), 1);
    assert_eq!(*draft_calls.borrow(), 1);

    // The validated SQL is now cached under (dataset, schema_hash, signature).
    let signature = plan().signature().unwrap();
    let schema_hash = fixture_metadata().schema_hash().unwrap();
    assert_eq!(
        store
            .get_cached_sql(None, &signature, Some(&schema_hash))
            .unwrap()
            .as_deref(),
        Some(GOOD_SQL)
    );

    let traces = store.load_query_traces(None).unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0]["status"], "ok");
    assert_eq!(traces[0]["attempts"], 1);
}

#[test]
fn test_cache_hit_skips_generation() {
    let store = MetadataStore::open_in_memory().unwrap();

    {
        let (adapter, _) = ScriptedAdapter::new(vec![Ok(vec![sample_row()])]);
        let (drafter, _) = CannedDrafter::new(GOOD_SQL);
        Orchestrator::new(Box::new(adapter), Box::new(drafter), &store)
            .run("total sales", &plan(), None)
            .unwrap();
    }

    let (adapter, exec_calls) = ScriptedAdapter::new(vec![Ok(vec![sample_row()])]);
    let orchestrator = Orchestrator::new(Box::new(adapter), Box::new(ForbiddenDrafter), &store);
    let report = orchestrator.run("total sales", &plan(), None).unwrap();

    assert!(report.cache_hit);
    assert_eq!(report.sql, GOOD_SQL);
    assert_eq!(report.attempts_used, 1);
    assert_eq!(*exec_calls.borrow(), 1);
}

#[test]
fn test_repair_budget_bounds_execution_attempts() {
    let store = MetadataStore::open_in_memory().unwrap();
    let failure = || Err("syntax error at or near \"FORM\"".to_string());
    let (adapter, exec_calls) = ScriptedAdapter::new(vec![failure(), failure(), failure()]);
    let (drafter, draft_calls) = CannedDrafter::new(GOOD_SQL);
    let orchestrator = Orchestrator::new(Box::new(adapter), Box::new(drafter), &store);

    let err = orchestrator.run("total sales", &plan(), None).unwrap_err();
    let HeronError::RepairExhausted {
        class,
        sql,
        attempts,
        ..
    } = err
    else {
        panic!("expected RepairExhausted, got {err:?}");
    };

    // max_repairs = 2: the initial attempt plus two repairs, never more.
    assert_eq!(attempts, 3);
    assert_eq!(*exec_calls.borrow(), 3);
    assert_eq!(*draft_calls.borrow(), 3);
    assert_eq!(class, ErrorClass::SyntaxError);
    assert_eq!(sql, GOOD_SQL);

    let traces = store.load_query_traces(None).unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0]["status"], "syntax_error");
}

#[test]
fn test_persistent_empty_results_are_a_soft_failure() {
    let store = MetadataStore::open_in_memory().unwrap();
    let (adapter, exec_calls) = ScriptedAdapter::new(vec![]);
    let (drafter, _) = CannedDrafter::new(GOOD_SQL);
    let orchestrator = Orchestrator::new(Box::new(adapter), Box::new(drafter), &store);

    let report = orchestrator.run("total sales", &plan(), None).unwrap();

    assert_eq!(report.evaluation.status, EvalStatus::Retry);
    assert_eq!(
        report.evaluation.reason.as_deref(),
        Some("query_returned_no_rows")
    );
    assert!(report.rows.is_empty());
    assert_eq!(report.attempts_used, 3);
    assert_eq!(*exec_calls.borrow(), 3);

    // Nothing cacheable came out of this run.
    let signature = plan().signature().unwrap();
    let schema_hash = fixture_metadata().schema_hash().unwrap();
    assert!(store
        .get_cached_sql(None, &signature, Some(&schema_hash))
        .unwrap()
        .is_none());
}

#[test]
fn test_guardrail_rejection_never_reaches_the_database() {
    let store = MetadataStore::open_in_memory().unwrap();
    let (adapter, exec_calls) = ScriptedAdapter::new(vec![Ok(vec![sample_row()])]);
    let (drafter, draft_calls) = CannedDrafter::new("DROP TABLE records");
    let orchestrator = Orchestrator::new(Box::new(adapter), Box::new(drafter), &store);

    let err = orchestrator.run("total sales", &plan(), None).unwrap_err();
    assert!(matches!(
        err,
        HeronError::Guardrail(GuardrailError::NotReadOnly)
    ));
    assert_eq!(*exec_calls.borrow(), 0);
    // No repair attempt follows an unsafe statement.
    assert_eq!(*draft_calls.borrow(), 1);
}

#[test]
fn test_allowlist_rejection_never_reaches_the_database() {
    let store = MetadataStore::open_in_memory().unwrap();
    let (adapter, exec_calls) = ScriptedAdapter::new(vec![Ok(vec![sample_row()])]);
    let (drafter, _) = CannedDrafter::new("SELECT * FROM internal_audit");
    let orchestrator = Orchestrator::new(Box::new(adapter), Box::new(drafter), &store);

    let err = orchestrator.run("total sales", &plan(), None).unwrap_err();
    let HeronError::Guardrail(GuardrailError::DisallowedTables(tables)) = err else {
        panic!("expected table rejection, got {err:?}");
    };
    assert_eq!(tables, vec!["internal_audit".to_string()]);
    assert_eq!(*exec_calls.borrow(), 0);
}

#[test]
fn test_repair_carries_previous_sql_and_classified_error() {
    let store = MetadataStore::open_in_memory().unwrap();
    let (adapter, exec_calls) = ScriptedAdapter::new(vec![
        Err("column \"amount\" does not exist".to_string()),
        Ok(vec![sample_row()]),
    ]);
    let (drafter, draft_calls) = RepairAwareDrafter::new();
    let orchestrator = Orchestrator::new(Box::new(adapter), Box::new(drafter), &store);

    let report = orchestrator.run("total sales", &plan(), None).unwrap();

    assert_eq!(report.sql, FIXED_SQL);
    assert_eq!(report.attempts_used, 2);
    assert_eq!(report.evaluation.status, EvalStatus::Ok);
    assert_eq!(*exec_calls.borrow(), 2);
    assert_eq!(*draft_calls.borrow(), 2);

    // The SQL that finally worked is what gets cached.
    let signature = plan().signature().unwrap();
    let schema_hash = fixture_metadata().schema_hash().unwrap();
    assert_eq!(
        store
            .get_cached_sql(None, &signature, Some(&schema_hash))
            .unwrap()
            .as_deref(),
        Some(FIXED_SQL)
    );
}

#[test]
fn test_empty_then_success_recovers_within_budget() {
    let store = MetadataStore::open_in_memory().unwrap();
    let (adapter, _) = ScriptedAdapter::new(vec![Ok(vec![]), Ok(vec![sample_row()])]);
    let (drafter, draft_calls) = CannedDrafter::new(GOOD_SQL);
    let orchestrator = Orchestrator::new(Box::new(adapter), Box::new(drafter), &store);

    let report = orchestrator.run("total sales", &plan(), None).unwrap();
    assert_eq!(report.evaluation.status, EvalStatus::Ok);
    assert_eq!(report.attempts_used, 2);
    assert_eq!(*draft_calls.borrow(), 2);
}
