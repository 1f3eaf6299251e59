//! Integration tests for transactions.
//!
//! These tests verify:
//! - Commit and rollback of outermost frames
//! - Savepoint nesting, depth tracking and rollback isolation
//! - Rollback on panic
//! - Transactions against on-disk databases in each lock mode

use std::panic::{AssertUnwindSafe, catch_unwind};

use litebind::prelude::*;
use litebind::sqlite::{TransactionFrame, run_transaction};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn setup() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.exec("CREATE TABLE cats (name TEXT NOT NULL UNIQUE)", ())
        .unwrap();
    db
}

fn names(db: &Database) -> Vec<String> {
    db.query("SELECT name FROM cats ORDER BY name")
        .unwrap()
        .all_as::<(String,)>(())
        .unwrap()
        .into_iter()
        .map(|(name,)| name)
        .collect()
}

/// Test a reusable insert-many transaction
#[test]
fn test_insert_many() {
    let db = setup();
    let insert = db.prepare("INSERT INTO cats (name) VALUES (?)").unwrap();
    let mut insert_many = db.transaction(|_, cats: Vec<String>| {
        for cat in cats {
            insert.run(params![cat])?;
        }
        Ok(())
    });

    insert_many.run(vec!["Keanu".to_string(), "Salem".to_string()]).unwrap();
    insert_many.immediate(vec!["Crookshanks".to_string()]).unwrap();

    assert_eq!(names(&db), vec!["Crookshanks", "Keanu", "Salem"]);
}

/// Test that a constraint failure rolls back the whole batch
#[test]
fn test_constraint_failure_rolls_back_batch() {
    let db = setup();
    let insert = db.prepare("INSERT INTO cats (name) VALUES (?)").unwrap();
    let mut insert_many = db.transaction(|_, cats: Vec<String>| {
        for cat in cats {
            insert.run(params![cat])?;
        }
        Ok(())
    });

    let err = insert_many.run(vec!["Tom".to_string(), "Tom".to_string()]).unwrap_err();
    assert!(err.is_constraint_violation());
    assert!(names(&db).is_empty());
    assert_eq!(db.transaction_depth(), 0);
    assert!(db.is_autocommit());
}

/// Test the verbs used at each depth
#[test]
fn test_frame_verbs_by_depth() {
    let frames: Vec<TransactionFrame> = (0..3)
        .map(|d| TransactionFrame::new(d, TransactionMode::Exclusive))
        .collect();
    assert_eq!(frames[0].begin_sql(), "BEGIN EXCLUSIVE");
    assert_eq!(frames[1].begin_sql(), "SAVEPOINT sp_1");
    assert_eq!(frames[2].commit_sql(), "RELEASE sp_2");
    assert_eq!(frames[2].rollback_sql(), vec!["ROLLBACK TO sp_2", "RELEASE sp_2"]);
}

/// Test three levels of nesting with a failure in the middle level
#[test]
fn test_deep_nesting_isolates_failures() {
    let db = setup();
    let mut outer = db.transaction(|db, ()| {
        db.exec("INSERT INTO cats VALUES ('a')", ())?;

        let mut middle = db.transaction(|db, ()| {
            db.exec("INSERT INTO cats VALUES ('b')", ())?;
            let mut inner = db.transaction(|db, ()| {
                assert_eq!(db.transaction_depth(), 3);
                db.exec("INSERT INTO cats VALUES ('c')", ())
            });
            inner.run(())?;
            Err::<(), _>(SqliteError::state("middle gives up"))
        });
        assert!(middle.run(()).is_err());
        assert_eq!(db.transaction_depth(), 1);

        let mut sibling = db.transaction(|db, ()| db.exec("INSERT INTO cats VALUES ('d')", ()));
        sibling.run(())?;
        Ok(())
    });
    outer.run(()).unwrap();

    assert_eq!(names(&db), vec!["a", "d"]);
    assert_eq!(db.transaction_depth(), 0);
}

/// Test that an engine failure inside a nested frame leaves the outer frame usable
#[test]
fn test_inner_engine_failure() {
    let db = setup();
    let mut outer = db.transaction(|db, ()| {
        db.exec("INSERT INTO cats VALUES ('x')", ())?;
        let mut inner = db.transaction(|db, ()| db.exec("INSERT INTO cats VALUES ('x')", ()));
        let err = inner.run(()).unwrap_err();
        assert!(err.is_constraint_violation());
        db.exec("INSERT INTO cats VALUES ('y')", ())
    });
    outer.run(()).unwrap();
    assert_eq!(names(&db), vec!["x", "y"]);
}

/// Test that a panic in the unit of work rolls back and restores depth
#[test]
fn test_panic_in_nested_frame() {
    let db = setup();
    let mut outer = db.transaction(|db, ()| {
        db.exec("INSERT INTO cats VALUES ('kept')", ())?;
        let caught = catch_unwind(AssertUnwindSafe(|| {
            let mut inner = db.transaction(|db, ()| -> SqliteResult<()> {
                db.exec("INSERT INTO cats VALUES ('lost')", ())?;
                panic!("boom");
            });
            let _ = inner.run(());
        }));
        assert!(caught.is_err());
        assert_eq!(db.transaction_depth(), 1);
        Ok(())
    });
    outer.run(()).unwrap();
    assert_eq!(names(&db), vec!["kept"]);
}

/// Test every lock mode against a file database
#[test]
fn test_modes_on_file_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tx.db");
    let db = Database::open(path.to_str().unwrap()).unwrap();
    db.exec("CREATE TABLE cats (name TEXT NOT NULL UNIQUE)", ())
        .unwrap();

    for (i, mode) in [
        TransactionMode::Default,
        TransactionMode::Deferred,
        TransactionMode::Immediate,
        TransactionMode::Exclusive,
    ]
    .into_iter()
    .enumerate()
    {
        let name = format!("cat{}", i);
        let changed = run_transaction(&db, mode, |db| {
            db.exec("INSERT INTO cats VALUES (?)", params![name.as_str()])
        })
        .unwrap();
        assert_eq!(changed, 1);
    }
    assert_eq!(names(&db).len(), 4);
}

/// Test that mode variants called inside an open frame become plain savepoints
#[test]
fn test_nested_exclusive_on_file_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested.db");
    let db = Database::open(path.to_str().unwrap()).unwrap();
    db.exec("CREATE TABLE cats (name TEXT NOT NULL UNIQUE)", ())
        .unwrap();

    let mut outer = db.transaction(|db, ()| {
        db.exec("INSERT INTO cats VALUES ('outer')", ())?;
        let mut inner = db.transaction(|db, name: String| {
            assert_eq!(db.transaction_depth(), 2);
            db.exec("INSERT INTO cats VALUES (?)", params![name])
        });

        assert_eq!(inner.exclusive("inner".to_string())?, 1);

        // the duplicate fails inside the savepoint, not at BEGIN
        let err = inner.exclusive("outer".to_string()).unwrap_err();
        assert!(err.is_constraint_violation());
        assert!(!err.to_string().contains("cannot start a transaction"));
        assert_eq!(db.transaction_depth(), 1);
        Ok(())
    });
    outer.immediate(()).unwrap();

    assert_eq!(names(&db), vec!["inner", "outer"]);
    assert_eq!(db.transaction_depth(), 0);
}

/// Test that the return value flows out of the transaction
#[test]
fn test_returns_value() {
    let db = setup();
    let mut count = db.transaction(|db, prefix: String| {
        db.exec("INSERT INTO cats VALUES (?)", params![format!("{}-1", prefix)])?;
        db.exec("INSERT INTO cats VALUES (?)", params![format!("{}-2", prefix)])?;
        db.query("SELECT count(*) FROM cats")?.value(())
    });
    assert_eq!(count.run("tabby".to_string()).unwrap(), Some(Value::Integer(2)));
    assert_eq!(count.run("calico".to_string()).unwrap(), Some(Value::Integer(4)));
}
