//! SQLite adapter: Implementation of Storage.
//!
//! Scalar fields live in typed columns so they can be filtered in SQL;
//! nested values (detail blobs, adherence data, provider-id sets, history
//! snapshots, reports) are JSON text columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings, so string order
//! is time order.
//!
//! # Mutex Behavior
//!
//! The connection is protected by a `Mutex`. A poisoned mutex surfaces as
//! `StorageError::LockPoisoned` on every later call.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::{
    kdf::WrappedKey, Acknowledgment, AuditFilter, CareInstruction, ComplianceRecord,
    ComplianceType, HistoryEntry, InstructionQuery, Patient, Report, Role, Template, User,
};
use crate::ports::{Page, Storage};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Stored content key is unreadable")]
    CorruptKey,

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL COLLATE NOCASE UNIQUE,
        name TEXT NOT NULL,
        role TEXT NOT NULL,
        permissions TEXT NOT NULL,
        two_factor_enabled INTEGER NOT NULL,
        two_factor_secret TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );

    CREATE TABLE IF NOT EXISTS patients (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL UNIQUE,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        date_of_birth TEXT,
        gender TEXT,
        phone TEXT,
        address TEXT,
        medical_record_number TEXT,
        emergency_contact TEXT,
        assigned_provider_ids TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );

    CREATE TABLE IF NOT EXISTS instructions (
        id TEXT PRIMARY KEY,
        provider_id TEXT NOT NULL,
        patient_id TEXT NOT NULL,
        title TEXT NOT NULL,
        instruction_type TEXT NOT NULL,
        priority TEXT NOT NULL,
        content TEXT NOT NULL,
        details TEXT,
        status TEXT NOT NULL,
        version INTEGER NOT NULL,
        compliance_tracking_enabled INTEGER NOT NULL,
        acknowledged_date TEXT,
        effective_date TEXT,
        expiration_date TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_instructions_patient
        ON instructions(patient_id, created_at DESC);

    CREATE TABLE IF NOT EXISTS acknowledgments (
        id TEXT PRIMARY KEY,
        instruction_id TEXT NOT NULL,
        patient_id TEXT NOT NULL,
        acknowledgment_type TEXT NOT NULL,
        ip_address TEXT,
        user_agent TEXT,
        acknowledged_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_acknowledgments_instruction
        ON acknowledgments(instruction_id, acknowledged_at);

    CREATE TABLE IF NOT EXISTS compliance_records (
        id TEXT PRIMARY KEY,
        instruction_id TEXT NOT NULL,
        patient_id TEXT NOT NULL,
        compliance_type TEXT NOT NULL,
        status TEXT NOT NULL,
        overall_percentage REAL NOT NULL,
        adherence TEXT NOT NULL,
        last_updated_by TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_compliance_instruction_type
        ON compliance_records(instruction_id, compliance_type);

    CREATE TABLE IF NOT EXISTS history (
        id TEXT PRIMARY KEY,
        entity TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        action TEXT NOT NULL,
        actor_id TEXT NOT NULL,
        old_value TEXT,
        new_value TEXT,
        ip_address TEXT,
        user_agent TEXT,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_history_entity
        ON history(entity, entity_id, created_at DESC);

    CREATE TABLE IF NOT EXISTS templates (
        id TEXT PRIMARY KEY,
        provider_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        instruction_type TEXT NOT NULL,
        priority TEXT NOT NULL,
        content TEXT NOT NULL,
        details TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS reports (
        id TEXT PRIMARY KEY,
        report_type TEXT NOT NULL,
        generated_by TEXT NOT NULL,
        generated_at TEXT NOT NULL,
        body TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS content_key (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        wrapped BLOB NOT NULL,
        fingerprint TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
";

const USER_COLUMNS: &str = "id, email, name, role, permissions, two_factor_enabled, \
     two_factor_secret, created_at, updated_at, deleted_at";

const PATIENT_COLUMNS: &str = "id, user_id, first_name, last_name, date_of_birth, gender, \
     phone, address, medical_record_number, emergency_contact, assigned_provider_ids, \
     created_at, updated_at, deleted_at";

const INSTRUCTION_COLUMNS: &str = "id, provider_id, patient_id, title, instruction_type, \
     priority, content, details, status, version, compliance_tracking_enabled, \
     acknowledged_date, effective_date, expiration_date, created_at, updated_at, deleted_at";

const ACK_COLUMNS: &str =
    "id, instruction_id, patient_id, acknowledgment_type, ip_address, user_agent, acknowledged_at";

const COMPLIANCE_COLUMNS: &str = "id, instruction_id, patient_id, compliance_type, status, \
     overall_percentage, adherence, last_updated_by, created_at, updated_at";

/// `COMPLIANCE_COLUMNS` qualified for queries joined against `instructions`.
const COMPLIANCE_COLUMNS_C: &str = "c.id, c.instruction_id, c.patient_id, c.compliance_type, \
     c.status, c.overall_percentage, c.adherence, c.last_updated_by, c.created_at, c.updated_at";

const HISTORY_COLUMNS: &str = "id, entity, entity_id, action, actor_id, old_value, new_value, \
     ip_address, user_agent, created_at";

const TEMPLATE_COLUMNS: &str = "id, provider_id, name, description, instruction_type, priority, \
     content, details, created_at, updated_at";

/// SQLite storage adapter.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or initialized.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Create an in-memory SQLite database (for testing).
    ///
    /// # Errors
    /// Returns error if database cannot be created.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            role: parse_col(row, 3)?,
            permissions: json_col(row, 4)?,
            two_factor_enabled: row.get(5)?,
            two_factor_secret: row.get(6)?,
            created_at: time_col(row, 7)?,
            updated_at: time_col(row, 8)?,
            deleted_at: opt_time_col(row, 9)?,
        })
    }

    fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
        Ok(Patient {
            id: row.get(0)?,
            user_id: row.get(1)?,
            first_name: row.get(2)?,
            last_name: row.get(3)?,
            date_of_birth: opt_parse_col::<NaiveDate>(row, 4)?,
            gender: row.get(5)?,
            phone: row.get(6)?,
            address: row.get(7)?,
            medical_record_number: row.get(8)?,
            emergency_contact: opt_json_col(row, 9)?,
            assigned_provider_ids: json_col(row, 10)?,
            created_at: time_col(row, 11)?,
            updated_at: time_col(row, 12)?,
            deleted_at: opt_time_col(row, 13)?,
        })
    }

    fn instruction_from_row(row: &Row<'_>) -> rusqlite::Result<CareInstruction> {
        Ok(CareInstruction {
            id: row.get(0)?,
            provider_id: row.get(1)?,
            patient_id: row.get(2)?,
            title: row.get(3)?,
            instruction_type: parse_col(row, 4)?,
            priority: parse_col(row, 5)?,
            content: row.get(6)?,
            details: opt_json_col(row, 7)?,
            status: parse_col(row, 8)?,
            version: row.get(9)?,
            compliance_tracking_enabled: row.get(10)?,
            acknowledged_date: opt_time_col(row, 11)?,
            effective_date: opt_time_col(row, 12)?,
            expiration_date: opt_time_col(row, 13)?,
            created_at: time_col(row, 14)?,
            updated_at: time_col(row, 15)?,
            deleted_at: opt_time_col(row, 16)?,
        })
    }

    fn acknowledgment_from_row(row: &Row<'_>) -> rusqlite::Result<Acknowledgment> {
        Ok(Acknowledgment {
            id: row.get(0)?,
            instruction_id: row.get(1)?,
            patient_id: row.get(2)?,
            acknowledgment_type: parse_col(row, 3)?,
            ip_address: row.get(4)?,
            user_agent: row.get(5)?,
            acknowledged_at: time_col(row, 6)?,
        })
    }

    fn compliance_from_row(row: &Row<'_>) -> rusqlite::Result<ComplianceRecord> {
        Ok(ComplianceRecord {
            id: row.get(0)?,
            instruction_id: row.get(1)?,
            patient_id: row.get(2)?,
            compliance_type: parse_col(row, 3)?,
            status: parse_col(row, 4)?,
            overall_percentage: row.get(5)?,
            adherence: json_col(row, 6)?,
            last_updated_by: row.get(7)?,
            created_at: time_col(row, 8)?,
            updated_at: time_col(row, 9)?,
        })
    }

    fn history_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
        Ok(HistoryEntry {
            id: row.get(0)?,
            entity: parse_col(row, 1)?,
            entity_id: row.get(2)?,
            action: parse_col(row, 3)?,
            actor_id: row.get(4)?,
            old_value: opt_json_col(row, 5)?,
            new_value: opt_json_col(row, 6)?,
            ip_address: row.get(7)?,
            user_agent: row.get(8)?,
            created_at: time_col(row, 9)?,
        })
    }

    fn template_from_row(row: &Row<'_>) -> rusqlite::Result<Template> {
        Ok(Template {
            id: row.get(0)?,
            provider_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            instruction_type: parse_col(row, 4)?,
            priority: parse_col(row, 5)?,
            content: row.get(6)?,
            details: opt_json_col(row, 7)?,
            created_at: time_col(row, 8)?,
            updated_at: time_col(row, 9)?,
        })
    }
}

/// Format a timestamp so that lexical order matches time order.
fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn opt_ts(at: Option<&DateTime<Utc>>) -> Option<String> {
    at.map(ts)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn opt_parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| serde_json::from_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn opt_time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StorageError> {
    Ok(serde_json::to_string(value)?)
}

fn opt_json<T: Serialize>(value: Option<&T>) -> Result<Option<String>, StorageError> {
    value.map(to_json).transpose()
}

/// Map unique-constraint failures to `Conflict`.
fn on_conflict(what: &str) -> impl Fn(rusqlite::Error) -> StorageError + '_ {
    move |e| match &e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
            StorageError::Conflict(what.to_string())
        }
        _ => StorageError::Database(e),
    }
}

/// `?, ?, ?` for an `IN (...)` list.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

impl Storage for SqliteStorage {
    type Error = StorageError;

    fn save_user(&self, user: &User) -> Result<(), Self::Error> {
        let permissions = to_json(&user.permissions)?;
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO users (
                id, email, name, role, permissions, two_factor_enabled,
                two_factor_secret, created_at, updated_at, deleted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                name = excluded.name,
                role = excluded.role,
                permissions = excluded.permissions,
                two_factor_enabled = excluded.two_factor_enabled,
                two_factor_secret = excluded.two_factor_secret,
                updated_at = excluded.updated_at,
                deleted_at = excluded.deleted_at
            ",
            params![
                user.id,
                user.email,
                user.name,
                user.role.as_str(),
                permissions,
                user.two_factor_enabled,
                user.two_factor_secret,
                ts(&user.created_at),
                ts(&user.updated_at),
                opt_ts(user.deleted_at.as_ref()),
            ],
        )
        .map_err(on_conflict("email already registered"))?;
        Ok(())
    }

    fn get_user(&self, id: &str) -> Result<Option<User>, Self::Error> {
        let conn = self.conn()?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1 AND deleted_at IS NULL");
        Ok(conn
            .query_row(&sql, params![id], Self::user_from_row)
            .optional()?)
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>, Self::Error> {
        // Deleted accounts keep their address reserved, so they are included.
        let conn = self.conn()?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
        Ok(conn
            .query_row(&sql, params![email.trim()], Self::user_from_row)
            .optional()?)
    }

    fn list_users(&self, role: Option<Role>) -> Result<Vec<User>, Self::Error> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE deleted_at IS NULL AND (?1 IS NULL OR role = ?1)
             ORDER BY created_at, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map(params![role.map(|r| r.as_str())], Self::user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn save_patient(&self, patient: &Patient) -> Result<(), Self::Error> {
        let emergency = opt_json(patient.emergency_contact.as_ref())?;
        let providers = to_json(&patient.assigned_provider_ids)?;
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO patients (
                id, user_id, first_name, last_name, date_of_birth, gender, phone,
                address, medical_record_number, emergency_contact,
                assigned_provider_ids, created_at, updated_at, deleted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                date_of_birth = excluded.date_of_birth,
                gender = excluded.gender,
                phone = excluded.phone,
                address = excluded.address,
                medical_record_number = excluded.medical_record_number,
                emergency_contact = excluded.emergency_contact,
                assigned_provider_ids = excluded.assigned_provider_ids,
                updated_at = excluded.updated_at,
                deleted_at = excluded.deleted_at
            ",
            params![
                patient.id,
                patient.user_id,
                patient.first_name,
                patient.last_name,
                patient.date_of_birth.map(|d| d.to_string()),
                patient.gender,
                patient.phone,
                patient.address,
                patient.medical_record_number,
                emergency,
                providers,
                ts(&patient.created_at),
                ts(&patient.updated_at),
                opt_ts(patient.deleted_at.as_ref()),
            ],
        )
        .map_err(on_conflict("user already has a patient record"))?;
        Ok(())
    }

    fn get_patient(&self, id: &str) -> Result<Option<Patient>, Self::Error> {
        let conn = self.conn()?;
        let sql =
            format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = ?1 AND deleted_at IS NULL");
        Ok(conn
            .query_row(&sql, params![id], Self::patient_from_row)
            .optional()?)
    }

    fn find_patient_by_user(&self, user_id: &str) -> Result<Option<Patient>, Self::Error> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {PATIENT_COLUMNS} FROM patients WHERE user_id = ?1 AND deleted_at IS NULL"
        );
        Ok(conn
            .query_row(&sql, params![user_id], Self::patient_from_row)
            .optional()?)
    }

    fn list_patients(&self, provider_id: Option<&str>) -> Result<Vec<Patient>, Self::Error> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {PATIENT_COLUMNS} FROM patients
             WHERE deleted_at IS NULL
               AND (?1 IS NULL OR EXISTS (
                   SELECT 1 FROM json_each(patients.assigned_provider_ids)
                   WHERE json_each.value = ?1))
             ORDER BY last_name, first_name, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let patients = stmt
            .query_map(params![provider_id], Self::patient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(patients)
    }

    fn save_instruction(&self, instruction: &CareInstruction) -> Result<(), Self::Error> {
        let details = opt_json(instruction.details.as_ref())?;
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO instructions (
                id, provider_id, patient_id, title, instruction_type, priority,
                content, details, status, version, compliance_tracking_enabled,
                acknowledged_date, effective_date, expiration_date,
                created_at, updated_at, deleted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                priority = excluded.priority,
                content = excluded.content,
                details = excluded.details,
                status = excluded.status,
                version = excluded.version,
                compliance_tracking_enabled = excluded.compliance_tracking_enabled,
                acknowledged_date = excluded.acknowledged_date,
                effective_date = excluded.effective_date,
                expiration_date = excluded.expiration_date,
                updated_at = excluded.updated_at,
                deleted_at = excluded.deleted_at
            ",
            params![
                instruction.id,
                instruction.provider_id,
                instruction.patient_id,
                instruction.title,
                instruction.instruction_type.as_str(),
                instruction.priority.as_str(),
                instruction.content,
                details,
                instruction.status.as_str(),
                instruction.version,
                instruction.compliance_tracking_enabled,
                opt_ts(instruction.acknowledged_date.as_ref()),
                opt_ts(instruction.effective_date.as_ref()),
                opt_ts(instruction.expiration_date.as_ref()),
                ts(&instruction.created_at),
                ts(&instruction.updated_at),
                opt_ts(instruction.deleted_at.as_ref()),
            ],
        )?;
        tracing::debug!(version = instruction.version, "Saved instruction");
        Ok(())
    }

    fn get_instruction(&self, id: &str) -> Result<Option<CareInstruction>, Self::Error> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {INSTRUCTION_COLUMNS} FROM instructions WHERE id = ?1 AND deleted_at IS NULL"
        );
        Ok(conn
            .query_row(&sql, params![id], Self::instruction_from_row)
            .optional()?)
    }

    fn list_instructions(
        &self,
        query: &InstructionQuery,
        patient_ids: Option<&[String]>,
    ) -> Result<Vec<CareInstruction>, Self::Error> {
        if matches!(patient_ids, Some(ids) if ids.is_empty()) {
            return Ok(Vec::new());
        }

        let mut sql = format!("SELECT {INSTRUCTION_COLUMNS} FROM instructions WHERE deleted_at IS NULL");
        let mut args: Vec<String> = Vec::new();
        if let Some(ids) = patient_ids {
            sql.push_str(&format!(" AND patient_id IN ({})", placeholders(ids.len())));
            args.extend(ids.iter().cloned());
        }
        if let Some(patient_id) = &query.patient_id {
            sql.push_str(" AND patient_id = ?");
            args.push(patient_id.clone());
        }
        if let Some(provider_id) = &query.provider_id {
            sql.push_str(" AND provider_id = ?");
            args.push(provider_id.clone());
        }
        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            args.push(status.as_str().to_string());
        }
        if let Some(kind) = query.instruction_type {
            sql.push_str(" AND instruction_type = ?");
            args.push(kind.as_str().to_string());
        }
        sql.push_str(" ORDER BY created_at DESC, id");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let instructions = stmt
            .query_map(params_from_iter(args.iter()), Self::instruction_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(instructions)
    }

    fn count_instructions(&self) -> Result<usize, Self::Error> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM instructions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn save_acknowledgment(&self, ack: &Acknowledgment) -> Result<(), Self::Error> {
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO acknowledgments (
                id, instruction_id, patient_id, acknowledgment_type,
                ip_address, user_agent, acknowledged_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                ack.id,
                ack.instruction_id,
                ack.patient_id,
                ack.acknowledgment_type.as_str(),
                ack.ip_address,
                ack.user_agent,
                ts(&ack.acknowledged_at),
            ],
        )?;
        Ok(())
    }

    fn list_acknowledgments(&self, instruction_id: &str) -> Result<Vec<Acknowledgment>, Self::Error> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {ACK_COLUMNS} FROM acknowledgments
             WHERE instruction_id = ?1 ORDER BY acknowledged_at, rowid"
        );
        let mut stmt = conn.prepare(&sql)?;
        let acks = stmt
            .query_map(params![instruction_id], Self::acknowledgment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(acks)
    }

    fn save_compliance(&self, record: &ComplianceRecord) -> Result<(), Self::Error> {
        let adherence = to_json(&record.adherence)?;
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO compliance_records (
                id, instruction_id, patient_id, compliance_type, status,
                overall_percentage, adherence, last_updated_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                overall_percentage = excluded.overall_percentage,
                adherence = excluded.adherence,
                last_updated_by = excluded.last_updated_by,
                updated_at = excluded.updated_at
            ",
            params![
                record.id,
                record.instruction_id,
                record.patient_id,
                record.compliance_type.as_str(),
                record.status.as_str(),
                record.overall_percentage,
                adherence,
                record.last_updated_by,
                ts(&record.created_at),
                ts(&record.updated_at),
            ],
        )
        .map_err(on_conflict("compliance record already exists for this instruction and type"))?;
        Ok(())
    }

    fn get_compliance(&self, id: &str) -> Result<Option<ComplianceRecord>, Self::Error> {
        let conn = self.conn()?;
        let sql = format!("SELECT {COMPLIANCE_COLUMNS} FROM compliance_records WHERE id = ?1");
        Ok(conn
            .query_row(&sql, params![id], Self::compliance_from_row)
            .optional()?)
    }

    fn find_compliance(
        &self,
        instruction_id: &str,
        compliance_type: ComplianceType,
    ) -> Result<Option<ComplianceRecord>, Self::Error> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {COMPLIANCE_COLUMNS} FROM compliance_records
             WHERE instruction_id = ?1 AND compliance_type = ?2"
        );
        Ok(conn
            .query_row(
                &sql,
                params![instruction_id, compliance_type.as_str()],
                Self::compliance_from_row,
            )
            .optional()?)
    }

    fn list_compliance(&self, patient_ids: Option<&[String]>) -> Result<Vec<ComplianceRecord>, Self::Error> {
        let mut sql = format!(
            "SELECT {COMPLIANCE_COLUMNS_C} FROM compliance_records c
             JOIN instructions i ON i.id = c.instruction_id
             WHERE i.deleted_at IS NULL"
        );
        let args: &[String] = match patient_ids {
            Some([]) => return Ok(Vec::new()),
            Some(ids) => {
                sql.push_str(&format!(" AND c.patient_id IN ({})", placeholders(ids.len())));
                ids
            }
            None => &[],
        };
        sql.push_str(" ORDER BY c.updated_at DESC, c.id");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(args.iter()), Self::compliance_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn append_history(&self, entry: &HistoryEntry) -> Result<(), Self::Error> {
        let old_value = opt_json(entry.old_value.as_ref())?;
        let new_value = opt_json(entry.new_value.as_ref())?;
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO history (
                id, entity, entity_id, action, actor_id, old_value, new_value,
                ip_address, user_agent, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
            params![
                entry.id,
                entry.entity.as_str(),
                entry.entity_id,
                entry.action.as_str(),
                entry.actor_id,
                old_value,
                new_value,
                entry.ip_address,
                entry.user_agent,
                ts(&entry.created_at),
            ],
        )?;
        Ok(())
    }

    fn query_history(&self, filter: &AuditFilter) -> Result<Page<HistoryEntry>, Self::Error> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(entity) = filter.entity {
            clauses.push("entity = ?");
            args.push(entity.as_str().to_string());
        }
        if let Some(entity_id) = &filter.entity_id {
            clauses.push("entity_id = ?");
            args.push(entity_id.clone());
        }
        if let Some(actor_id) = &filter.actor_id {
            clauses.push("actor_id = ?");
            args.push(actor_id.clone());
        }
        if let Some(action) = filter.action {
            clauses.push("action = ?");
            args.push(action.as_str().to_string());
        }
        if let Some(from) = &filter.from {
            clauses.push("created_at >= ?");
            args.push(ts(from));
        }
        if let Some(to) = &filter.to {
            clauses.push("created_at <= ?");
            args.push(ts(to));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM history{where_sql}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM history{where_sql}
             ORDER BY created_at DESC, rowid DESC LIMIT {} OFFSET {}",
            filter.limit, filter.offset
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(args.iter()), Self::history_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(entries, total as usize, filter.offset, filter.limit))
    }

    fn save_template(&self, template: &Template) -> Result<(), Self::Error> {
        let details = opt_json(template.details.as_ref())?;
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO templates (
                id, provider_id, name, description, instruction_type, priority,
                content, details, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                priority = excluded.priority,
                content = excluded.content,
                details = excluded.details,
                updated_at = excluded.updated_at
            ",
            params![
                template.id,
                template.provider_id,
                template.name,
                template.description,
                template.instruction_type.as_str(),
                template.priority.as_str(),
                template.content,
                details,
                ts(&template.created_at),
                ts(&template.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_template(&self, id: &str) -> Result<Option<Template>, Self::Error> {
        let conn = self.conn()?;
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = ?1");
        Ok(conn
            .query_row(&sql, params![id], Self::template_from_row)
            .optional()?)
    }

    fn list_templates(&self, provider_id: Option<&str>) -> Result<Vec<Template>, Self::Error> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates
             WHERE ?1 IS NULL OR provider_id = ?1 ORDER BY name, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let templates = stmt
            .query_map(params![provider_id], Self::template_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(templates)
    }

    fn delete_template(&self, id: &str) -> Result<bool, Self::Error> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM templates WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    fn save_report(&self, report: &Report) -> Result<(), Self::Error> {
        let body = to_json(report)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO reports (id, report_type, generated_by, generated_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                report.id,
                report.report_type.as_str(),
                report.generated_by,
                ts(&report.generated_at),
                body,
            ],
        )?;
        Ok(())
    }

    fn get_report(&self, id: &str) -> Result<Option<Report>, Self::Error> {
        let conn = self.conn()?;
        Ok(conn
            .query_row("SELECT body FROM reports WHERE id = ?1", params![id], |row| {
                json_col(row, 0)
            })
            .optional()?)
    }

    fn list_reports(&self, generated_by: Option<&str>) -> Result<Vec<Report>, Self::Error> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM reports
             WHERE ?1 IS NULL OR generated_by = ?1
             ORDER BY generated_at DESC, rowid DESC",
        )?;
        let reports = stmt
            .query_map(params![generated_by], |row| json_col(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reports)
    }

    fn save_wrapped_key(&self, key: &WrappedKey) -> Result<(), Self::Error> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO content_key (id, wrapped, fingerprint, created_at)
             VALUES (1, ?1, ?2, ?3)",
            params![key.to_bytes(), key.key_fingerprint, ts(&Utc::now())],
        )?;
        tracing::info!("Saved wrapped content key");
        Ok(())
    }

    fn load_wrapped_key(&self) -> Result<Option<WrappedKey>, Self::Error> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT wrapped, fingerprint FROM content_key WHERE id = 1",
                [],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        match row {
            Some((bytes, fingerprint)) => WrappedKey::from_bytes(&bytes, fingerprint)
                .map(Some)
                .map_err(|_| StorageError::CorruptKey),
            None => Ok(None),
        }
    }

    fn clear_all(&self) -> Result<(), Self::Error> {
        let conn = self.conn()?;
        conn.execute_batch(
            r"
            DELETE FROM users; DELETE FROM patients; DELETE FROM instructions;
            DELETE FROM acknowledgments; DELETE FROM compliance_records;
            DELETE FROM history; DELETE FROM templates; DELETE FROM reports;
            DELETE FROM content_key;
            ",
        )?;
        tracing::warn!("Cleared all data from storage");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AcknowledgmentType, AdherenceData, AuditEntity, Caller, ContentKey, HistoryAction,
        InstructionStatus, InstructionType, NewInstruction, NewPatient, NewUser, Priority,
        ReportRequest, ReportType,
    };
    use std::collections::BTreeSet;

    fn user(email: &str, role: Role) -> User {
        User::new(NewUser {
            email: email.into(),
            name: "Test User".into(),
            role,
            permissions: vec!["read".into()],
        })
    }

    fn patient(user_id: &str, providers: &[&str]) -> Patient {
        Patient::new(NewPatient {
            user_id: user_id.into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1985, 12, 10),
            assigned_provider_ids: providers.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            ..Default::default()
        })
    }

    fn instruction(patient_id: &str, kind: InstructionType) -> CareInstruction {
        CareInstruction::new(
            "prov-1",
            NewInstruction {
                patient_id: patient_id.into(),
                title: "Evening walk".into(),
                instruction_type: kind,
                priority: Priority::High,
                content: "v1.token".into(),
                details: None,
                compliance_tracking_enabled: None,
                effective_date: None,
                expiration_date: None,
            },
        )
    }

    #[test]
    fn test_user_roundtrip_keeps_secret_and_rejects_duplicate_email() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        let mut alice = user("alice@example.com", Role::Provider);
        alice.two_factor_secret = Some("JBSWY3DPEHPK3PXP".into());
        storage.save_user(&alice).expect("Should save");

        let loaded = storage.get_user(&alice.id).expect("Should load").expect("Should exist");
        assert_eq!(loaded.two_factor_secret.as_deref(), Some("JBSWY3DPEHPK3PXP"));
        assert_eq!(loaded.permissions, vec!["read".to_string()]);

        let found = storage.find_user_by_email("ALICE@example.com").expect("Should query");
        assert_eq!(found.map(|u| u.id), Some(alice.id.clone()));

        let dup = user("alice@example.com", Role::Patient);
        assert!(matches!(storage.save_user(&dup), Err(StorageError::Conflict(_))));
    }

    #[test]
    fn test_soft_deleted_user_hidden() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        let mut bob = user("bob@example.com", Role::Patient);
        storage.save_user(&bob).expect("Should save");
        bob.deleted_at = Some(Utc::now());
        storage.save_user(&bob).expect("Should save");

        assert!(storage.get_user(&bob.id).expect("Should load").is_none());
        assert!(storage.list_users(None).expect("Should list").is_empty());
        assert!(storage.find_user_by_email("bob@example.com").expect("Should query").is_some());
    }

    #[test]
    fn test_list_users_by_role() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        storage.save_user(&user("p@example.com", Role::Patient)).unwrap();
        storage.save_user(&user("d@example.com", Role::Provider)).unwrap();
        assert_eq!(storage.list_users(Some(Role::Provider)).unwrap().len(), 1);
        assert_eq!(storage.list_users(None).unwrap().len(), 2);
    }

    #[test]
    fn test_patients_filtered_by_assigned_provider() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        let mine = patient("u-1", &["prov-1", "prov-2"]);
        let other = patient("u-2", &["prov-3"]);
        storage.save_patient(&mine).unwrap();
        storage.save_patient(&other).unwrap();

        let visible = storage.list_patients(Some("prov-2")).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, mine.id);
        assert_eq!(visible[0].date_of_birth, mine.date_of_birth);
        assert_eq!(storage.list_patients(None).unwrap().len(), 2);

        let by_user = storage.find_patient_by_user("u-2").unwrap().expect("Should exist");
        assert_eq!(by_user.id, other.id);
        assert!(matches!(
            storage.save_patient(&patient("u-2", &[])),
            Err(StorageError::Conflict(_))
        ));
    }

    #[test]
    fn test_instruction_listing_scope_and_filters() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        let a = instruction("pat-a", InstructionType::Medication);
        let mut b = instruction("pat-b", InstructionType::Lifestyle);
        b.status = InstructionStatus::Completed;
        storage.save_instruction(&a).unwrap();
        storage.save_instruction(&b).unwrap();

        let all = storage.list_instructions(&InstructionQuery::default(), None).unwrap();
        assert_eq!(all.len(), 2);

        let scoped = storage
            .list_instructions(&InstructionQuery::default(), Some(&["pat-a".to_string()]))
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, a.id);

        let none = storage.list_instructions(&InstructionQuery::default(), Some(&[])).unwrap();
        assert!(none.is_empty());

        let completed = storage
            .list_instructions(
                &InstructionQuery {
                    status: Some(InstructionStatus::Completed),
                    ..InstructionQuery::default()
                },
                None,
            )
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, b.id);
    }

    #[test]
    fn test_deleted_instruction_not_returned() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        let mut a = instruction("pat-a", InstructionType::Warning);
        storage.save_instruction(&a).unwrap();
        a.deleted_at = Some(Utc::now());
        storage.save_instruction(&a).unwrap();

        assert!(storage.get_instruction(&a.id).unwrap().is_none());
        assert_eq!(storage.count_instructions().unwrap(), 1);
    }

    #[test]
    fn test_acknowledgments_in_order() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        let a = instruction("pat-a", InstructionType::Medication);
        storage.save_instruction(&a).unwrap();
        for kind in AcknowledgmentType::ALL {
            storage
                .save_acknowledgment(&Acknowledgment::new(&a, *kind, None, None))
                .unwrap();
        }
        let acks = storage.list_acknowledgments(&a.id).unwrap();
        let kinds: Vec<_> = acks.iter().map(|a| a.acknowledgment_type).collect();
        assert_eq!(kinds, AcknowledgmentType::ALL.to_vec());
    }

    #[test]
    fn test_compliance_unique_per_instruction_and_type() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        let ins = instruction("pat-a", InstructionType::Medication);
        storage.save_instruction(&ins).unwrap();
        let first = ComplianceRecord::new(&ins.id, "pat-a", ComplianceType::Medication, None, "u");
        storage.save_compliance(&first).unwrap();

        let found = storage
            .find_compliance(&ins.id, ComplianceType::Medication)
            .unwrap()
            .expect("Should exist");
        assert_eq!(found.adherence, AdherenceData::empty(ComplianceType::Medication));

        let second = ComplianceRecord::new(&ins.id, "pat-a", ComplianceType::Medication, None, "u");
        assert!(matches!(storage.save_compliance(&second), Err(StorageError::Conflict(_))));

        let lifestyle = ComplianceRecord::new(&ins.id, "pat-a", ComplianceType::Lifestyle, None, "u");
        storage.save_compliance(&lifestyle).unwrap();
        assert_eq!(storage.list_compliance(None).unwrap().len(), 2);
        assert!(storage.list_compliance(Some(&["pat-z".to_string()])).unwrap().is_empty());
    }

    #[test]
    fn test_compliance_of_deleted_instruction_not_listed() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        let mut ins = instruction("pat-a", InstructionType::Medication);
        storage.save_instruction(&ins).unwrap();
        let record = ComplianceRecord::new(&ins.id, "pat-a", ComplianceType::Medication, None, "u");
        storage.save_compliance(&record).unwrap();
        let orphan = ComplianceRecord::new("ins-gone", "pat-a", ComplianceType::Medication, None, "u");
        storage.save_compliance(&orphan).unwrap();

        let listed = storage.list_compliance(Some(&["pat-a".to_string()])).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, record.id);

        ins.deleted_at = Some(Utc::now());
        storage.save_instruction(&ins).unwrap();
        assert!(storage.list_compliance(None).unwrap().is_empty());
        assert!(storage.get_compliance(&record.id).unwrap().is_some());
    }

    #[test]
    fn test_timestamps_keep_full_precision() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        let mut ins = instruction("pat-a", InstructionType::Medication);
        let at = DateTime::parse_from_rfc3339("2024-03-01T08:15:30.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        ins.acknowledged_date = Some(at);
        ins.updated_at = at;
        storage.save_instruction(&ins).unwrap();

        let loaded = storage.get_instruction(&ins.id).unwrap().expect("Should exist");
        assert_eq!(loaded.acknowledged_date, Some(at));
        assert_eq!(loaded.updated_at, at);
        assert_eq!(ts(&at), "2024-03-01T08:15:30.123456789Z");
        assert!(ts(&at) < ts(&(at + chrono::Duration::nanoseconds(1))));
    }

    #[test]
    fn test_history_query_pages_newest_first() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        let caller = Caller::new("admin", Role::Administrator);
        for i in 0..5 {
            let mut entry = HistoryEntry::record(
                &caller,
                AuditEntity::Instruction,
                "ins-1",
                HistoryAction::Updated,
                None,
                Some(serde_json::json!({ "version": i })),
            );
            entry.created_at = Utc::now() + chrono::Duration::seconds(i);
            storage.append_history(&entry).unwrap();
        }
        storage
            .append_history(&HistoryEntry::record(
                &caller,
                AuditEntity::User,
                "user-1",
                HistoryAction::Created,
                None,
                None,
            ))
            .unwrap();

        let page = storage
            .query_history(&AuditFilter {
                limit: 2,
                ..AuditFilter::for_entity(AuditEntity::Instruction, "ins-1")
            })
            .unwrap();
        assert_eq!(page.total_count, 5);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.next_offset(), Some(2));
        assert_eq!(page.items[0].new_value, Some(serde_json::json!({ "version": 4 })));
    }

    #[test]
    fn test_templates_and_reports() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        let template = Template::new(
            "prov-1",
            crate::domain::NewTemplate {
                name: "Hydration".into(),
                description: None,
                instruction_type: InstructionType::Lifestyle,
                priority: Priority::Low,
                content: "Drink water".into(),
                details: None,
            },
        );
        storage.save_template(&template).unwrap();
        assert_eq!(storage.list_templates(Some("prov-1")).unwrap().len(), 1);
        assert!(storage.list_templates(Some("prov-2")).unwrap().is_empty());
        assert!(storage.delete_template(&template.id).unwrap());
        assert!(!storage.delete_template(&template.id).unwrap());

        let request = ReportRequest {
            report_type: ReportType::Summary,
            from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            to: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            patient_id: None,
        };
        let report = Report::generate(&request, "prov-1", &[], &[], &[]);
        storage.save_report(&report).unwrap();
        assert_eq!(storage.get_report(&report.id).unwrap(), Some(report.clone()));
        assert_eq!(storage.list_reports(Some("prov-1")).unwrap().len(), 1);
        assert!(storage.list_reports(Some("admin")).unwrap().is_empty());
    }

    #[test]
    fn test_wrapped_key_roundtrip() {
        let storage = SqliteStorage::in_memory().expect("Should create db");
        assert!(storage.load_wrapped_key().unwrap().is_none());

        let key = ContentKey::generate();
        let wrapped = crate::domain::kdf::wrap_key(&key, "test-password").unwrap();
        storage.save_wrapped_key(&wrapped).unwrap();
        assert_eq!(storage.load_wrapped_key().unwrap(), Some(wrapped));

        storage.clear_all().unwrap();
        assert!(storage.load_wrapped_key().unwrap().is_none());
    }

    #[test]
    fn test_on_disk_database_persists() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let path = dir.path().join("clearcare.db");
        let alice = user("alice@example.com", Role::Administrator);
        {
            let storage = SqliteStorage::new(&path).expect("Should open");
            storage.save_user(&alice).unwrap();
        }
        let reopened = SqliteStorage::new(&path).expect("Should reopen");
        assert!(reopened.get_user(&alice.id).unwrap().is_some());
    }
}
