use identity_core::db::{open_db, open_db_with_options, DbOptions};
use identity_core::{
    IdentifyError, IdentifyRequest, IdentifyService, RetryPolicy, SqliteContactRepository,
};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const WORKERS: usize = 6;

#[test]
fn racing_requests_for_same_new_email_create_one_primary() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contacts.sqlite3");
    let connections = open_connections(&path, WORKERS);
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = connections
        .into_iter()
        .map(|conn| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let service =
                    IdentifyService::new(SqliteContactRepository::try_new(&conn).unwrap());
                barrier.wait();
                service
                    .identify(&IdentifyRequest::new(Some("race@x.com"), None))
                    .unwrap()
                    .contact
            })
        })
        .collect();
    let summaries: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    for summary in &summaries {
        assert_eq!(summary, &summaries[0]);
    }
    let conn = open_db(&path).unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM contacts;"), 1);
}

#[test]
fn concurrent_mixed_requests_converge_to_flat_groups() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contacts.sqlite3");
    let connections = open_connections(&path, WORKERS);
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = connections
        .into_iter()
        .enumerate()
        .map(|(worker, conn)| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let service =
                    IdentifyService::new(SqliteContactRepository::try_new(&conn).unwrap());
                barrier.wait();
                for round in 0..5 {
                    let email = format!("user{}@x.com", (worker + round) % 4);
                    let phone = format!("{}", (worker * 7 + round) % 5);
                    let request = IdentifyRequest::new(Some(email.as_str()), Some(phone.as_str()));
                    service.identify(&request).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let conn = open_db(&path).unwrap();
    assert_eq!(
        count(
            &conn,
            "SELECT COUNT(*)
             FROM contacts AS child
             LEFT JOIN contacts AS parent ON parent.id = child.linked_id
             WHERE child.link_precedence = 'secondary'
               AND (parent.id IS NULL OR parent.link_precedence <> 'primary');"
        ),
        0
    );

    // Every email and phone value belongs to exactly one group.
    for column in ["email", "phone_number"] {
        let split = count(
            &conn,
            &format!(
                "SELECT COUNT(*) FROM (
                    SELECT {column}
                    FROM contacts
                    WHERE {column} IS NOT NULL
                    GROUP BY {column}
                    HAVING COUNT(DISTINCT COALESCE(linked_id, id)) > 1
                );"
            ),
        );
        assert_eq!(split, 0, "{column} spans several groups");
    }
}

#[test]
fn lock_timeout_exhausts_retries_then_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contacts.sqlite3");
    let holder = open_db(&path).unwrap();
    let waiter = open_db_with_options(
        &path,
        &DbOptions {
            busy_timeout: Duration::from_millis(50),
        },
    )
    .unwrap();
    let service = IdentifyService::with_retry_policy(
        SqliteContactRepository::try_new(&waiter).unwrap(),
        RetryPolicy {
            max_attempts: 2,
            backoff: Duration::ZERO,
        },
    );
    let request = IdentifyRequest::new(Some("late@x.com"), Some("123"));

    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();
    let err = service.identify(&request).unwrap_err();
    assert!(matches!(err, IdentifyError::RetriesExhausted { attempts: 2, .. }));
    assert!(err.is_retryable());
    holder.execute_batch("COMMIT;").unwrap();

    assert_eq!(count(&holder, "SELECT COUNT(*) FROM contacts;"), 0);
    let response = service.identify(&request).unwrap();
    assert_eq!(response.contact.emails, vec!["late@x.com"]);
    assert_eq!(count(&holder, "SELECT COUNT(*) FROM contacts;"), 1);
}

fn open_connections(path: &Path, count: usize) -> Vec<Connection> {
    (0..count).map(|_| open_db(path).unwrap()).collect()
}

fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}
