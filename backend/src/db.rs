use crate::errors::ApiError;
use crate::models::{Participant, Role, TicketHolder};
use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite, Transaction};
use uuid::Uuid;

pub type Db = Pool<Sqlite>;

pub async fn connect(db_url: &str) -> Result<Db, ApiError> {
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .map_err(|_| ApiError::Internal)
}

pub async fn init_schema(db: &Db) -> Result<(), ApiError> {
    // NOTE: Keep schema minimal and explicit. `group_history` is append-only;
    // no UPDATE or DELETE statement for it exists anywhere in this crate.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS participants (
  email TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  role TEXT NOT NULL,
  residence TEXT NOT NULL,
  order_id TEXT NOT NULL,
  email_token TEXT
);

CREATE TABLE IF NOT EXISTS commitments (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  uuid TEXT NOT NULL UNIQUE,
  email TEXT NOT NULL UNIQUE REFERENCES participants(email),
  commitment_hex TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_history (
  group_id TEXT NOT NULL,
  root_hex TEXT NOT NULL,
  serialized_group TEXT NOT NULL,
  created_at TEXT NOT NULL,
  PRIMARY KEY(group_id, root_hex)
);

CREATE TABLE IF NOT EXISTS latest_roots (
  group_id TEXT PRIMARY KEY,
  root_hex TEXT NOT NULL,
  member_count INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS e2ee (
  blob_key TEXT PRIMARY KEY,
  encrypted_blob TEXT NOT NULL
);
"#,
    )
    .execute(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    Ok(())
}

// ---- ticket holders (authoritative participant registry) ----

pub async fn insert_ticket_holder(
    db: &Db,
    email: &str,
    name: &str,
    role: Role,
    residence: &str,
    order_id: &str,
) -> Result<(), ApiError> {
    sqlx::query(
        r#"INSERT OR IGNORE INTO participants (email, name, role, residence, order_id)
           VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(email)
    .bind(name)
    .bind(role.as_db())
    .bind(residence)
    .bind(order_id)
    .execute(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    Ok(())
}

pub async fn fetch_ticket_holder(db: &Db, email: &str) -> Result<Option<TicketHolder>, ApiError> {
    let row = sqlx::query(
        r#"SELECT p.email, p.name, p.role, p.residence, p.order_id, p.email_token, c.commitment_hex
           FROM participants p
           LEFT JOIN commitments c ON c.email = p.email
           WHERE p.email = ?"#,
    )
    .bind(email)
    .fetch_optional(db)
    .await
    .map_err(|e| ApiError::SourceUnavailable(format!("{e}")))?;

    let Some(row) = row else { return Ok(None); };

    let role_str: String = row.get(2);
    let role = Role::from_db(&role_str).ok_or(ApiError::Internal)?;

    Ok(Some(TicketHolder {
        email: row.get(0),
        name: row.get(1),
        role,
        residence: row.get(3),
        order_id: row.get(4),
        email_token: row.get(5),
        commitment: row.get(6),
    }))
}

/// Store a login token on an existing ticket holder.
///
/// Returns the holder, or `None` when the email has no ticket.
pub async fn set_login_token(
    db: &Db,
    email: &str,
    token: &str,
) -> Result<Option<TicketHolder>, ApiError> {
    let result = sqlx::query(r#"UPDATE participants SET email_token = ? WHERE email = ?"#)
        .bind(token)
        .bind(email)
        .execute(db)
        .await
        .map_err(|_| ApiError::Internal)?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    fetch_ticket_holder(db, email).await
}

/// Record a holder's identity commitment, returning the participant uuid.
///
/// A repeat registration for the same email replaces the commitment in place,
/// keeping the uuid and the creation-order slot stable.
pub async fn save_commitment(db: &Db, email: &str, commitment_hex: &str) -> Result<Uuid, ApiError> {
    let existing = sqlx::query(r#"SELECT uuid FROM commitments WHERE email = ?"#)
        .bind(email)
        .fetch_optional(db)
        .await
        .map_err(|_| ApiError::Internal)?;

    if let Some(row) = existing {
        let uuid_str: String = row.get(0);
        let uuid = Uuid::parse_str(&uuid_str).map_err(|_| ApiError::Internal)?;

        sqlx::query(r#"UPDATE commitments SET commitment_hex = ? WHERE email = ?"#)
            .bind(commitment_hex)
            .bind(email)
            .execute(db)
            .await
            .map_err(|_| ApiError::Internal)?;

        return Ok(uuid);
    }

    let uuid = Uuid::new_v4();
    sqlx::query(r#"INSERT INTO commitments (uuid, email, commitment_hex) VALUES (?, ?, ?)"#)
        .bind(uuid.to_string())
        .bind(email)
        .bind(commitment_hex)
        .execute(db)
        .await
        .map_err(|_| ApiError::Internal)?;

    Ok(uuid)
}

fn participant_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Participant, ApiError> {
    let uuid_str: String = row.get(0);
    let uuid = Uuid::parse_str(&uuid_str).map_err(|_| ApiError::Internal)?;

    let role_str: String = row.get(4);
    let role = Role::from_db(&role_str).ok_or(ApiError::Internal)?;

    Ok(Participant {
        uuid,
        commitment: row.get(1),
        email: row.get(2),
        name: row.get(3),
        role,
        residence: row.get(5),
        order_id: row.get(6),
    })
}

/// The full participant set in stable creation order.
///
/// `commitments.seq` is assigned once at registration and never reused, so
/// the ordering is monotonic across calls (tree leaf positions depend on it).
pub async fn list_participants(db: &Db) -> Result<Vec<Participant>, ApiError> {
    let rows = sqlx::query(
        r#"SELECT c.uuid, c.commitment_hex, p.email, p.name, p.role, p.residence, p.order_id
           FROM commitments c
           JOIN participants p ON p.email = c.email
           ORDER BY c.seq"#,
    )
    .fetch_all(db)
    .await
    .map_err(|e| ApiError::SourceUnavailable(format!("{e}")))?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(participant_from_row(&row)?);
    }

    Ok(out)
}

pub async fn get_participant(db: &Db, uuid: Uuid) -> Result<Option<Participant>, ApiError> {
    let row = sqlx::query(
        r#"SELECT c.uuid, c.commitment_hex, p.email, p.name, p.role, p.residence, p.order_id
           FROM commitments c
           JOIN participants p ON p.email = c.email
           WHERE c.uuid = ?"#,
    )
    .bind(uuid.to_string())
    .fetch_optional(db)
    .await
    .map_err(|e| ApiError::SourceUnavailable(format!("{e}")))?;

    match row {
        Some(row) => Ok(Some(participant_from_row(&row)?)),
        None => Ok(None),
    }
}

// ---- history archive + latest roots ----

/// Append one historic snapshot. Idempotent: an existing `(group_id, root)`
/// entry is left untouched, so a retried reload never duplicates or rewrites
/// history.
pub async fn append_group_history(
    tx: &mut Transaction<'_, Sqlite>,
    group_id: &str,
    root_hex: &str,
    serialized_group: &str,
) -> Result<(), ApiError> {
    let created_at = Utc::now().to_rfc3339();

    sqlx::query(
        r#"INSERT OR IGNORE INTO group_history (group_id, root_hex, serialized_group, created_at)
           VALUES (?, ?, ?, ?)"#,
    )
    .bind(group_id)
    .bind(root_hex)
    .bind(serialized_group)
    .bind(created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| ApiError::ArchiveWriteFailure(format!("{e}")))?;

    Ok(())
}

pub async fn upsert_latest_root(
    tx: &mut Transaction<'_, Sqlite>,
    group_id: &str,
    root_hex: &str,
    member_count: u64,
) -> Result<(), ApiError> {
    sqlx::query(
        r#"INSERT OR REPLACE INTO latest_roots (group_id, root_hex, member_count)
           VALUES (?, ?, ?)"#,
    )
    .bind(group_id)
    .bind(root_hex)
    .bind(member_count as i64)
    .execute(&mut **tx)
    .await
    .map_err(|e| ApiError::ArchiveWriteFailure(format!("{e}")))?;

    Ok(())
}

pub async fn fetch_latest_root(db: &Db, group_id: &str) -> Result<Option<String>, ApiError> {
    let row = sqlx::query(r#"SELECT root_hex FROM latest_roots WHERE group_id = ?"#)
        .bind(group_id)
        .fetch_optional(db)
        .await
        .map_err(|e| ApiError::SourceUnavailable(format!("{e}")))?;

    Ok(row.map(|r| r.get(0)))
}

pub async fn fetch_historic_group(
    db: &Db,
    group_id: &str,
    root_hex: &str,
) -> Result<Option<String>, ApiError> {
    let row = sqlx::query(
        r#"SELECT serialized_group FROM group_history WHERE group_id = ? AND root_hex = ?"#,
    )
    .bind(group_id)
    .bind(root_hex)
    .fetch_optional(db)
    .await
    .map_err(|e| ApiError::SourceUnavailable(format!("{e}")))?;

    Ok(row.map(|r| r.get(0)))
}

pub async fn count_group_history(db: &Db, group_id: &str) -> Result<u64, ApiError> {
    let row = sqlx::query(r#"SELECT COUNT(*) AS c FROM group_history WHERE group_id = ?"#)
        .bind(group_id)
        .fetch_one(db)
        .await
        .map_err(|e| ApiError::SourceUnavailable(format!("{e}")))?;
    let c: i64 = row.get("c");
    Ok(c as u64)
}

// ---- status + e2ee sync ----

pub async fn fetch_counts(db: &Db) -> Result<(u64, u64, u64), ApiError> {
    let row = sqlx::query(
        r#"select
    (select count(*) from participants) as n_ticket_holders,
    (select count(*) from commitments) as n_commitments,
    (select count(*) from e2ee) as n_e2ee"#,
    )
    .fetch_one(db)
    .await
    .map_err(|e| ApiError::SourceUnavailable(format!("{e}")))?;

    let holders: i64 = row.get(0);
    let commitments: i64 = row.get(1);
    let e2ee: i64 = row.get(2);

    Ok((holders as u64, commitments as u64, e2ee as u64))
}

pub async fn load_encrypted_blob(db: &Db, blob_key: &str) -> Result<Option<String>, ApiError> {
    let row = sqlx::query(r#"SELECT encrypted_blob FROM e2ee WHERE blob_key = ?"#)
        .bind(blob_key)
        .fetch_optional(db)
        .await
        .map_err(|e| ApiError::SourceUnavailable(format!("{e}")))?;

    Ok(row.map(|r| r.get(0)))
}

/// Last write wins; blob contents are opaque to the backend.
pub async fn save_encrypted_blob(db: &Db, blob_key: &str, encrypted_blob: &str) -> Result<(), ApiError> {
    sqlx::query(r#"INSERT OR REPLACE INTO e2ee (blob_key, encrypted_blob) VALUES (?, ?)"#)
        .bind(blob_key)
        .bind(encrypted_blob)
        .execute(db)
        .await
        .map_err(|_| ApiError::Internal)?;

    Ok(())
}
