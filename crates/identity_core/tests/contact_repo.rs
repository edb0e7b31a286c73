use identity_core::db::open_db_in_memory;
use identity_core::{
    ContactId, ContactStore, ContactUpdate, Link, NewContact, RepoError, SqliteContactRepository,
};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;

fn seed(
    conn: &Connection,
    email: Option<&str>,
    phone: Option<&str>,
    linked_id: Option<ContactId>,
    created_at: i64,
) -> ContactId {
    let precedence = if linked_id.is_some() {
        "secondary"
    } else {
        "primary"
    };
    conn.execute(
        "INSERT INTO contacts (email, phone_number, linked_id, link_precedence, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5);",
        params![email, phone, linked_id, precedence, created_at],
    )
    .unwrap();
    conn.last_insert_rowid()
}

#[test]
fn insert_assigns_id_and_timestamps() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContactRepository::try_new(&conn).unwrap();

    let first = repo
        .insert(&NewContact::primary(Some("a@x.com".to_string()), None))
        .unwrap();
    let second = repo
        .insert(&NewContact::secondary_of(
            first.id,
            None,
            Some("555".to_string()),
        ))
        .unwrap();

    assert!(second.id > first.id);
    assert_eq!(first.link, Link::Primary);
    assert_eq!(second.link, Link::Secondary { linked_id: first.id });
    assert!(first.created_at > 0);
    assert_eq!(first.created_at, first.updated_at);
    assert_eq!(first.deleted_at, None);

    let loaded = repo.get_contact(second.id).unwrap().unwrap();
    assert_eq!(loaded, second);
}

#[test]
fn insert_secondary_requires_primary_target() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContactRepository::try_new(&conn).unwrap();
    let primary = seed(&conn, Some("a@x.com"), None, None, 100);
    let secondary = seed(&conn, None, Some("555"), Some(primary), 200);

    let to_secondary = repo
        .insert(&NewContact::secondary_of(secondary, Some("b@x.com".to_string()), None))
        .unwrap_err();
    assert!(matches!(to_secondary, RepoError::InvalidLinkTarget(id) if id == secondary));

    let to_missing = repo
        .insert(&NewContact::secondary_of(404, Some("b@x.com".to_string()), None))
        .unwrap_err();
    assert!(matches!(to_missing, RepoError::InvalidLinkTarget(404)));

    assert_eq!(repo.list_contacts().unwrap().len(), 2);
}

#[test]
fn find_by_email_or_phone_matches_either_attribute_exactly() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContactRepository::try_new(&conn).unwrap();
    let by_email = seed(&conn, Some("a@x.com"), Some("111"), None, 100);
    let by_phone = seed(&conn, Some("b@x.com"), Some("222"), None, 200);
    seed(&conn, Some("A@x.com"), None, None, 300);
    seed(&conn, None, None, None, 400);

    let found = repo
        .find_by_email_or_phone(Some("a@x.com"), Some("222"))
        .unwrap();
    let ids: Vec<_> = found.iter().map(|contact| contact.id).collect();
    assert_eq!(ids, vec![by_email, by_phone]);

    let email_only = repo.find_by_email_or_phone(Some("a@x.com"), None).unwrap();
    assert_eq!(email_only.len(), 1);

    assert!(repo.find_by_email_or_phone(None, None).unwrap().is_empty());
}

#[test]
fn find_by_ids_or_linked_ids_loads_whole_groups() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContactRepository::try_new(&conn).unwrap();
    let p1 = seed(&conn, Some("a@x.com"), None, None, 100);
    let s1 = seed(&conn, None, Some("111"), Some(p1), 200);
    let p2 = seed(&conn, Some("b@x.com"), None, None, 300);
    let s2 = seed(&conn, None, Some("222"), Some(p2), 400);
    seed(&conn, Some("c@x.com"), None, None, 500);

    let group = repo
        .find_by_ids_or_linked_ids(&BTreeSet::from([p1, p2]))
        .unwrap();
    let ids: Vec<_> = group.iter().map(|contact| contact.id).collect();
    assert_eq!(ids, vec![p1, s1, p2, s2]);

    assert!(repo
        .find_by_ids_or_linked_ids(&BTreeSet::new())
        .unwrap()
        .is_empty());
}

#[test]
fn update_batch_relinks_and_refreshes_updated_at() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContactRepository::try_new(&conn).unwrap();
    let p1 = seed(&conn, Some("a@x.com"), None, None, 100);
    let p2 = seed(&conn, None, Some("222"), None, 200);
    let s2 = seed(&conn, Some("c@x.com"), None, Some(p2), 300);

    repo.update_batch(&[ContactUpdate::link_to(p2, p1), ContactUpdate::link_to(s2, p1)])
        .unwrap();

    for id in [p2, s2] {
        let contact = repo.get_contact(id).unwrap().unwrap();
        assert_eq!(contact.link, Link::Secondary { linked_id: p1 });
        assert!(contact.updated_at > contact.created_at);
    }
    let canonical = repo.get_contact(p1).unwrap().unwrap();
    assert_eq!(canonical.link, Link::Primary);
    assert_eq!(canonical.updated_at, 100);
}

#[test]
fn update_batch_is_all_or_nothing() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContactRepository::try_new(&conn).unwrap();
    let p1 = seed(&conn, Some("a@x.com"), None, None, 100);
    let p2 = seed(&conn, None, Some("222"), None, 200);

    let err = repo
        .update_batch(&[ContactUpdate::link_to(p2, p1), ContactUpdate::link_to(999, p1)])
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound(999)));
    // The savepoint is rolled back and released, not left open.
    assert!(conn.is_autocommit());

    let untouched = repo.get_contact(p2).unwrap().unwrap();
    assert_eq!(untouched.link, Link::Primary);
    assert_eq!(untouched.updated_at, 200);
}

#[test]
fn update_batch_rejects_promotion() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContactRepository::try_new(&conn).unwrap();
    let p1 = seed(&conn, Some("a@x.com"), None, None, 100);
    let s1 = seed(&conn, None, Some("111"), Some(p1), 200);

    let err = repo
        .update_batch(&[ContactUpdate {
            id: s1,
            link: Link::Primary,
        }])
        .unwrap_err();
    assert!(matches!(err, RepoError::PromotionRejected(id) if id == s1));
    assert_eq!(
        repo.get_contact(s1).unwrap().unwrap().link,
        Link::Secondary { linked_id: p1 }
    );
}

#[test]
fn update_batch_rejects_link_to_contact_demoted_in_same_batch() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContactRepository::try_new(&conn).unwrap();
    let p1 = seed(&conn, Some("a@x.com"), None, None, 100);
    let p2 = seed(&conn, None, Some("222"), None, 200);
    let p3 = seed(&conn, None, Some("333"), None, 300);

    let err = repo
        .update_batch(&[ContactUpdate::link_to(p2, p1), ContactUpdate::link_to(p3, p2)])
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidLinkTarget(id) if id == p2));
    assert!(conn.is_autocommit());

    for id in [p2, p3] {
        assert_eq!(repo.get_contact(id).unwrap().unwrap().link, Link::Primary);
    }
}

#[test]
fn transaction_rolls_back_when_work_fails() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContactRepository::try_new(&conn).unwrap();

    let result: Result<(), RepoError> = repo.transaction(|store| {
        store.insert(&NewContact::primary(Some("a@x.com".to_string()), None))?;
        Err(RepoError::NotFound(0))
    });
    assert!(matches!(result, Err(RepoError::NotFound(0))));
    assert!(repo.list_contacts().unwrap().is_empty());

    let created = repo
        .transaction(|store| store.insert(&NewContact::primary(Some("b@x.com".to_string()), None)))
        .unwrap();
    assert_eq!(repo.list_contacts().unwrap(), vec![created]);
}

#[test]
fn deleted_at_is_read_but_does_not_hide_rows() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteContactRepository::try_new(&conn).unwrap();
    let id = seed(&conn, Some("a@x.com"), None, None, 100);
    conn.execute("UPDATE contacts SET deleted_at = 150 WHERE id = ?1;", [id])
        .unwrap();

    let found = repo.find_by_email_or_phone(Some("a@x.com"), None).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].deleted_at, Some(150));
}
