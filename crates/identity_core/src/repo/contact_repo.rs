//! Contact store contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide the four access paths identity resolution needs: match by
//!   attribute, load groups by id set, insert, batch re-link.
//! - Provide one transactional scope those paths compose into.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Writes never leave a secondary pointing at a non-primary.
//! - Writes never turn a secondary back into a primary.
//! - Read paths reject inconsistent persisted rows instead of masking them.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::model::contact::{Contact, ContactId, ContactUpdate, Link, LinkPrecedence, NewContact};
use log::warn;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

const CONTACT_SELECT_SQL: &str = "SELECT
    id,
    email,
    phone_number,
    linked_id,
    link_precedence,
    created_at,
    updated_at,
    deleted_at
FROM contacts";

/// Current time in epoch milliseconds, evaluated by SQLite.
const NOW_MS_SQL: &str = "CAST((julianday('now') - 2440587.5) * 86400000.0 AS INTEGER)";

const REQUIRED_COLUMNS: [&str; 8] = [
    "id",
    "email",
    "phone_number",
    "linked_id",
    "link_precedence",
    "created_at",
    "updated_at",
    "deleted_at",
];

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from contact store operations.
#[derive(Debug)]
pub enum RepoError {
    /// Underlying SQLite/bootstrap error, including lock timeouts.
    Db(DbError),
    /// Target contact does not exist.
    NotFound(ContactId),
    /// Persisted row cannot be converted into a valid contact.
    InvalidData(String),
    /// A secondary would point at a contact that is missing or not primary.
    InvalidLinkTarget(ContactId),
    /// An update tried to make a contact primary.
    PromotionRejected(ContactId),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl RepoError {
    /// Lock contention or lock timeout. Worth rerunning straight away.
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Db(err) if err.is_busy())
    }

    /// Contention, or a store that is unavailable. Either way the operation
    /// committed nothing and may be run again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Db(err) if err.is_retryable())
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "contact not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted contact data: {message}"),
            Self::InvalidLinkTarget(id) => {
                write!(f, "link target {id} is not a stored primary contact")
            }
            Self::PromotionRejected(id) => {
                write!(f, "contact {id} cannot be promoted back to primary")
            }
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "contact repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "contact repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "contact repository requires column `{column}` in table `{table}`"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Storage contract consumed by identity resolution.
///
/// All four access paths invoked from inside [`ContactStore::transaction`]
/// belong to the same isolation scope.
pub trait ContactStore {
    /// Contacts whose email equals `email` or whose phone equals
    /// `phone_number`. An absent value matches nothing.
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>>;
    /// Contacts whose id, or whose `linked_id`, is in `ids`.
    fn find_by_ids_or_linked_ids(&self, ids: &BTreeSet<ContactId>) -> RepoResult<Vec<Contact>>;
    /// Inserts one contact and returns it with store-assigned fields.
    fn insert(&self, contact: &NewContact) -> RepoResult<Contact>;
    /// Applies every update or none of them.
    fn update_batch(&self, updates: &[ContactUpdate]) -> RepoResult<()>;
    /// Runs `work` in one serialized write transaction.
    ///
    /// Commits when `work` returns `Ok`; rolls back on `Err`.
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<RepoError>;
}

/// SQLite-backed contact store.
pub struct SqliteContactRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteContactRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_contact_connection_ready(conn)?;
        Ok(Self { conn })
    }

    /// Loads one contact by id.
    pub fn get_contact(&self, id: ContactId) -> RepoResult<Option<Contact>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CONTACT_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_contact_row(row)?));
        }
        Ok(None)
    }

    /// Lists every stored contact ordered by id.
    pub fn list_contacts(&self) -> RepoResult<Vec<Contact>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CONTACT_SELECT_SQL} ORDER BY id ASC;"))?;
        let mut rows = stmt.query([])?;
        collect_contacts(&mut rows)
    }
}

impl ContactStore for SqliteContactRepository<'_> {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>> {
        if email.is_none() && phone_number.is_none() {
            return Ok(Vec::new());
        }

        // NULL never compares equal, so an absent value matches no row.
        let mut stmt = self.conn.prepare(&format!(
            "{CONTACT_SELECT_SQL}
             WHERE email = ?1
                OR phone_number = ?2
             ORDER BY id ASC;"
        ))?;
        let mut rows = stmt.query(params![email, phone_number])?;
        collect_contacts(&mut rows)
    }

    fn find_by_ids_or_linked_ids(&self, ids: &BTreeSet<ContactId>) -> RepoResult<Vec<Contact>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (1..=ids.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "{CONTACT_SELECT_SQL}
             WHERE id IN ({placeholders})
                OR linked_id IN ({placeholders})
             ORDER BY id ASC;"
        ))?;
        let mut rows = stmt.query(params_from_iter(ids.iter()))?;
        collect_contacts(&mut rows)
    }

    fn insert(&self, contact: &NewContact) -> RepoResult<Contact> {
        if let Link::Secondary { linked_id } = contact.link {
            ensure_primary_target(self.conn, linked_id)?;
        }

        self.conn.execute(
            &format!(
                "INSERT INTO contacts (
                    email,
                    phone_number,
                    linked_id,
                    link_precedence,
                    created_at,
                    updated_at
                ) VALUES (?1, ?2, ?3, ?4, {NOW_MS_SQL}, {NOW_MS_SQL});"
            ),
            params![
                contact.email.as_deref(),
                contact.phone_number.as_deref(),
                contact.link.linked_id(),
                contact.link.precedence().as_str(),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        self.get_contact(id)?.ok_or(RepoError::NotFound(id))
    }

    fn update_batch(&self, updates: &[ContactUpdate]) -> RepoResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        with_savepoint(self.conn, "contact_update_batch", || {
            let mut targets = BTreeSet::new();
            for update in updates {
                let Link::Secondary { linked_id } = update.link else {
                    return Err(RepoError::PromotionRejected(update.id));
                };

                let changed = self.conn.execute(
                    &format!(
                        "UPDATE contacts
                         SET link_precedence = 'secondary',
                             linked_id = ?2,
                             updated_at = {NOW_MS_SQL}
                         WHERE id = ?1;"
                    ),
                    params![update.id, linked_id],
                )?;
                if changed == 0 {
                    return Err(RepoError::NotFound(update.id));
                }
                targets.insert(linked_id);
            }

            // Checked after the whole batch so demote-then-repoint order is free.
            for target in targets {
                ensure_primary_target(self.conn, target)?;
            }
            Ok(())
        })
    }

    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<RepoError>,
    {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(RepoError::from)?;
        let value = work(self)?;
        tx.commit().map_err(RepoError::from)?;
        Ok(value)
    }
}

fn with_savepoint<T>(
    conn: &Connection,
    name: &'static str,
    work: impl FnOnce() -> RepoResult<T>,
) -> RepoResult<T> {
    conn.execute_batch(&format!("SAVEPOINT {name};"))?;
    match work() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE SAVEPOINT {name};"))?;
            Ok(value)
        }
        Err(err) => {
            // `err` is returned even when the rollback itself fails.
            if let Err(rollback_err) = conn.execute_batch(&format!(
                "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name};"
            )) {
                warn!(
                    "event=savepoint_rollback module=repo status=error savepoint={name} error={rollback_err}"
                );
            }
            Err(err)
        }
    }
}

fn ensure_primary_target(conn: &Connection, linked_id: ContactId) -> RepoResult<()> {
    let precedence: Option<String> = conn
        .query_row(
            "SELECT link_precedence
             FROM contacts
             WHERE id = ?1;",
            [linked_id],
            |row| row.get(0),
        )
        .optional()?;

    match precedence.as_deref() {
        Some("primary") => Ok(()),
        _ => Err(RepoError::InvalidLinkTarget(linked_id)),
    }
}

fn collect_contacts(rows: &mut rusqlite::Rows<'_>) -> RepoResult<Vec<Contact>> {
    let mut contacts = Vec::new();
    while let Some(row) = rows.next()? {
        contacts.push(parse_contact_row(row)?);
    }
    Ok(contacts)
}

fn parse_contact_row(row: &Row<'_>) -> RepoResult<Contact> {
    let id: ContactId = row.get("id")?;

    let precedence_text: String = row.get("link_precedence")?;
    let precedence = LinkPrecedence::parse(&precedence_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid link precedence `{precedence_text}` in contacts.link_precedence (id {id})"
        ))
    })?;

    let linked_id: Option<ContactId> = row.get("linked_id")?;
    let link = Link::from_parts(precedence, linked_id).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "contact {id} is {precedence} with linked_id {linked_id:?}"
        ))
    })?;

    Ok(Contact {
        id,
        email: row.get("email")?,
        phone_number: row.get("phone_number")?,
        link,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    })
}

fn ensure_contact_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, "contacts")? {
        return Err(RepoError::MissingRequiredTable("contacts"));
    }

    for column in REQUIRED_COLUMNS {
        if !table_has_column(conn, "contacts", column)? {
            return Err(RepoError::MissingRequiredColumn {
                table: "contacts",
                column,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
