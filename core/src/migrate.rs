//! Schema creation and repair, run at every start before any other query.
//!
//! The runner works in five phases:
//!
//! 1. `CREATE TABLE IF NOT EXISTS` for every table. This is the only phase
//!    whose errors reach the caller.
//! 2. Versioned schema steps tracked in `PRAGMA user_version`. A database at
//!    version 0 may be empty or may be any older layout, so every step checks
//!    the live columns before touching anything and is safe to re-run.
//! 3. Resolve the identifier of the most recently created user.
//! 4. Backfill `user_id` on owned rows that have none.
//! 5. Delete owned rows that are still unattributed.
//!
//! Phases 2 to 5 are best-effort: failures are logged, collected in the
//! returned [`MigrationReport`], and the remaining work still runs.

use anyhow::{Result, bail};
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Highest version in [`MIGRATIONS`].
pub const SCHEMA_VERSION: i64 = 5;

/// Owned tables that receive a `user_id` column and backfill.
/// `chat_history` rows are always written with an owner and are not listed.
pub const BACKFILL_TABLES: &[&str] = &[
    "personal_foods",
    "meal_entries",
    "weight_entries",
    "steps_entries",
    "user_preferences",
];

/// Owned tables swept for rows without an owner.
pub const CLEANUP_TABLES: &[&str] = &[
    "weight_entries",
    "steps_entries",
    "meal_entries",
    "personal_foods",
    "user_preferences",
    "chat_history",
];

/// Drop order used by [`reset`]: dependents first, `users` last.
pub const RESET_ORDER: &[&str] = &[
    "chat_history",
    "user_preferences",
    "steps_entries",
    "weight_entries",
    "meal_entries",
    "personal_foods",
    "users",
];

const LEGACY_ACTIVITY_COLUMN: &str = "weekly_activity";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCount {
    pub table: &'static str,
    pub rows: usize,
}

/// What a migration run did. Only the base-table phase can fail the run; all
/// other problems end up in `failed`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub version_before: i64,
    pub version_after: i64,
    pub applied: Vec<&'static str>,
    pub failed: Vec<StepFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_user: Option<String>,
    pub backfilled: Vec<TableCount>,
    pub orphans_removed: Vec<TableCount>,
}

impl MigrationReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    #[must_use]
    pub fn total_backfilled(&self) -> usize {
        self.backfilled.iter().map(|c| c.rows).sum()
    }

    #[must_use]
    pub fn total_orphans_removed(&self) -> usize {
        self.orphans_removed.iter().map(|c| c.rows).sum()
    }

    fn fail(&mut self, step: impl Into<String>, err: &anyhow::Error) {
        let step = step.into();
        warn!(step = %step, error = %format!("{err:#}"), "migration step failed");
        self.failed.push(StepFailure {
            step,
            error: format!("{err:#}"),
        });
    }
}

struct Migration {
    version: i64,
    name: &'static str,
    /// Returns whether anything was changed.
    up: fn(&Connection) -> Result<bool>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "user_identifier",
        up: add_user_identifier,
    },
    Migration {
        version: 2,
        name: "sport_activity",
        up: add_sport_activity,
    },
    Migration {
        version: 3,
        name: "drop_weekly_activity",
        up: drop_weekly_activity,
    },
    Migration {
        version: 4,
        name: "owner_columns",
        up: add_owner_columns,
    },
    Migration {
        version: 5,
        name: "owner_indexes",
        up: create_owner_indexes,
    },
];

fn users_table_sql(name: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {name} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL UNIQUE,
            goal TEXT NOT NULL DEFAULT 'maintain',
            sport_activity TEXT NOT NULL DEFAULT 'none',
            height_cm REAL,
            weight_kg REAL,
            gender TEXT NOT NULL DEFAULT 'other',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );"
    )
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(&users_table_sql("users"))?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS personal_foods (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            calories REAL NOT NULL DEFAULT 0,
            protein REAL NOT NULL DEFAULT 0,
            carbs REAL NOT NULL DEFAULT 0,
            fat REAL NOT NULL DEFAULT 0,
            category TEXT NOT NULL DEFAULT 'other',
            image_uri TEXT,
            from_photo INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS meal_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            food_id INTEGER,
            food_name TEXT NOT NULL,
            calories REAL NOT NULL DEFAULT 0,
            protein REAL NOT NULL DEFAULT 0,
            carbs REAL NOT NULL DEFAULT 0,
            fat REAL NOT NULL DEFAULT 0,
            meal_type TEXT NOT NULL,
            date TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS weight_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            weight_kg REAL NOT NULL,
            image_uri TEXT,
            note TEXT,
            date TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS steps_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            steps INTEGER NOT NULL,
            date TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS user_preferences (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            hide_photos INTEGER NOT NULL DEFAULT 0,
            chart_type TEXT NOT NULL DEFAULT 'line',
            time_range TEXT NOT NULL DEFAULT 'week',
            metric TEXT NOT NULL DEFAULT 'weight',
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS chat_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            messages TEXT NOT NULL DEFAULT '[]',
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )?;
    Ok(())
}

// --- Introspection ---

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Live column list of `table`; empty when the table does not exist.
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    let columns = stmt
        .query_map(params![table], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                decl_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                default_value: row.get(3)?,
                primary_key: row.get::<_, i64>(4)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>> {
    Ok(table_columns(conn, table)?
        .into_iter()
        .map(|c| c.name)
        .collect())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    Ok(column_names(conn, table)?.iter().any(|c| c == column))
}

pub fn schema_version(conn: &Connection) -> Result<i64> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

fn set_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

// --- Versioned steps ---

/// Columns carried over when `users` is rebuilt: target column, accepted
/// legacy names, and the value used when the legacy cell is NULL.
const USER_COPY_COLUMNS: &[(&str, &[&str], Option<&str>)] = &[
    ("id", &["id"], None),
    ("goal", &["goal"], Some("'maintain'")),
    ("sport_activity", &["sport_activity"], Some("'none'")),
    ("height_cm", &["height_cm", "height"], None),
    ("weight_kg", &["weight_kg", "weight"], None),
    ("gender", &["gender"], Some("'other'")),
    (
        "created_at",
        &["created_at"],
        Some("strftime('%Y-%m-%dT%H:%M:%fZ', 'now')"),
    ),
];

/// Copies `users` into a fresh table with the current shape and swaps it in.
/// Rows without a `user_id` get a new UUID. Columns outside
/// [`USER_COPY_COLUMNS`], such as the legacy activity column, are left behind.
fn rebuild_users(conn: &Connection) -> Result<usize> {
    let existing = column_names(conn, "users")?;

    let mut targets: Vec<&str> = Vec::new();
    let mut sources: Vec<String> = Vec::new();
    for (target, legacy_names, fallback) in USER_COPY_COLUMNS {
        let Some(source) = legacy_names
            .iter()
            .find(|name| existing.iter().any(|c| c == *name))
        else {
            continue;
        };
        targets.push(target);
        sources.push(match fallback {
            Some(value) => format!("COALESCE({source}, {value})"),
            None => (*source).to_string(),
        });
    }
    targets.push("user_id");
    sources.push(if existing.iter().any(|c| c == "user_id") {
        "COALESCE(user_id, ?1)".to_string()
    } else {
        "?1".to_string()
    });

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch("DROP TABLE IF EXISTS users_new;")?;
    tx.execute_batch(&users_table_sql("users_new"))?;

    let rowids: Vec<i64> = {
        let mut stmt = tx.prepare("SELECT rowid FROM users ORDER BY rowid")?;
        stmt.query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?
    };
    let insert = format!(
        "INSERT INTO users_new ({}) SELECT {} FROM users WHERE rowid = ?2",
        targets.join(", "),
        sources.join(", ")
    );
    for rowid in &rowids {
        tx.execute(&insert, params![Uuid::new_v4().to_string(), rowid])?;
    }

    tx.execute_batch(
        "DROP TABLE users;
         ALTER TABLE users_new RENAME TO users;",
    )?;
    tx.commit()?;
    Ok(rowids.len())
}

fn add_user_identifier(conn: &Connection) -> Result<bool> {
    if has_column(conn, "users", "user_id")? {
        return Ok(false);
    }
    let rows = rebuild_users(conn)?;
    info!(rows, "rebuilt users table with generated identifiers");
    Ok(true)
}

fn add_sport_activity(conn: &Connection) -> Result<bool> {
    if has_column(conn, "users", "sport_activity")? {
        return Ok(false);
    }
    conn.execute_batch(
        "ALTER TABLE users ADD COLUMN sport_activity TEXT NOT NULL DEFAULT 'none';",
    )?;
    info!("added users.sport_activity");
    Ok(true)
}

fn drop_weekly_activity(conn: &Connection) -> Result<bool> {
    if !has_column(conn, "users", LEGACY_ACTIVITY_COLUMN)? {
        return Ok(false);
    }
    // Native DROP COLUMN refuses indexed or constrained columns.
    let native = conn.execute_batch(&format!(
        "ALTER TABLE users DROP COLUMN {LEGACY_ACTIVITY_COLUMN};"
    ));
    match native {
        Ok(()) => info!("dropped users.{LEGACY_ACTIVITY_COLUMN}"),
        Err(e) => {
            debug!(error = %e, "native drop refused; rebuilding users");
            let rows = rebuild_users(conn)?;
            info!(rows, "rebuilt users without {LEGACY_ACTIVITY_COLUMN}");
        }
    }
    Ok(true)
}

/// Adds a nullable `user_id` to owned tables that predate ownership. Each
/// table is attempted even if an earlier one failed.
fn add_owner_columns(conn: &Connection) -> Result<bool> {
    let mut changed = false;
    let mut errors: Vec<String> = Vec::new();
    for &table in BACKFILL_TABLES {
        let result = has_column(conn, table, "user_id").and_then(|present| {
            if present {
                return Ok(false);
            }
            conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN user_id TEXT;"))?;
            Ok(true)
        });
        match result {
            Ok(true) => {
                info!(table, "added user_id column");
                changed = true;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(table, error = %format!("{e:#}"), "could not add user_id column");
                errors.push(format!("{table}: {e:#}"));
            }
        }
    }
    if !errors.is_empty() {
        bail!("owner column migration incomplete ({})", errors.join("; "));
    }
    Ok(changed)
}

fn create_owner_indexes(conn: &Connection) -> Result<bool> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_meal_entries_user_date ON meal_entries(user_id, date);
         CREATE INDEX IF NOT EXISTS idx_weight_entries_user_date ON weight_entries(user_id, date);
         CREATE INDEX IF NOT EXISTS idx_steps_entries_user_date ON steps_entries(user_id, date);
         CREATE INDEX IF NOT EXISTS idx_personal_foods_user ON personal_foods(user_id);
         CREATE INDEX IF NOT EXISTS idx_user_preferences_user ON user_preferences(user_id);",
    )?;
    Ok(true)
}

// --- Ownership repair ---

/// Identifier of the most recently created user, if any.
pub fn current_user_id(conn: &Connection) -> Result<Option<String>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM users WHERE user_id IS NOT NULL
         ORDER BY created_at DESC, id DESC LIMIT 1",
    )?;
    let mut rows = stmt.query([])?;
    if let Some(row) = rows.next()? {
        Ok(Some(row.get(0)?))
    } else {
        Ok(None)
    }
}

fn backfill_owner(conn: &Connection, user_id: &str, report: &mut MigrationReport) {
    for &table in BACKFILL_TABLES {
        let sql = format!("UPDATE {table} SET user_id = ?1 WHERE user_id IS NULL");
        match conn.execute(&sql, params![user_id]) {
            Ok(rows) => {
                if rows > 0 {
                    info!(table, rows, "attributed unowned rows to current user");
                }
                report.backfilled.push(TableCount { table, rows });
            }
            Err(e) => report.fail(format!("backfill:{table}"), &anyhow::Error::from(e)),
        }
    }
}

/// Deletes rows with no owner from every owned table. A table that is
/// missing, or lacks `user_id`, is reported and skipped.
pub fn cleanup_orphans(conn: &Connection, report: &mut MigrationReport) {
    for &table in CLEANUP_TABLES {
        let sql = format!("DELETE FROM {table} WHERE user_id IS NULL");
        match conn.execute(&sql, []) {
            Ok(rows) => {
                if rows > 0 {
                    info!(table, rows, "deleted unattributed rows");
                }
                report.orphans_removed.push(TableCount { table, rows });
            }
            Err(e) => report.fail(format!("cleanup:{table}"), &anyhow::Error::from(e)),
        }
    }
}

// --- Entry points ---

/// Brings the database to the current schema. Errors only when the base
/// tables cannot be created.
pub fn run(conn: &Connection) -> Result<MigrationReport> {
    create_tables(conn)?;

    let mut report = MigrationReport::default();
    let version_before = schema_version(conn).unwrap_or_else(|e| {
        report.fail("read_schema_version", &e);
        0
    });
    report.version_before = version_before;

    if version_before > SCHEMA_VERSION {
        warn!(
            found = version_before,
            supported = SCHEMA_VERSION,
            "database was written by a newer schema; skipping schema steps"
        );
    }

    let mut reached = version_before;
    let mut contiguous = true;
    for migration in MIGRATIONS.iter().filter(|m| m.version > version_before) {
        match (migration.up)(conn) {
            Ok(changed) => {
                if changed {
                    report.applied.push(migration.name);
                } else {
                    debug!(step = migration.name, "already applied");
                }
                if contiguous {
                    reached = migration.version;
                }
            }
            Err(e) => {
                report.fail(migration.name, &e);
                contiguous = false;
            }
        }
    }

    if reached != version_before {
        if let Err(e) = set_schema_version(conn, reached) {
            report.fail("write_schema_version", &e);
        }
    }
    report.version_after = schema_version(conn).unwrap_or(reached);

    let current_user = current_user_id(conn).unwrap_or_else(|e| {
        report.fail("resolve_current_user", &e);
        None
    });
    if let Some(ref user_id) = current_user {
        backfill_owner(conn, user_id, &mut report);
    } else {
        debug!("no user yet; skipping ownership backfill");
    }
    report.current_user = current_user;

    cleanup_orphans(conn, &mut report);

    Ok(report)
}

/// Drops every known table, then runs the full migration again.
pub fn reset(conn: &Connection) -> Result<MigrationReport> {
    for table in RESET_ORDER.iter().copied().chain(["users_new"]) {
        if let Err(e) = conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};")) {
            warn!(table, error = %e, "could not drop table during reset");
        }
    }
    if let Err(e) = set_schema_version(conn, 0) {
        warn!(error = %format!("{e:#}"), "could not clear schema version during reset");
    }
    info!("database reset; recreating schema");
    run(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    fn owners(conn: &Connection, table: &str) -> Vec<Option<String>> {
        let mut stmt = conn
            .prepare(&format!("SELECT user_id FROM {table} ORDER BY id"))
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    /// Schema SQL plus every row of every table, as text.
    fn snapshot(conn: &Connection) -> Vec<String> {
        let mut out: Vec<String> = {
            let mut stmt = conn
                .prepare(
                    "SELECT type || ':' || name || ':' || COALESCE(sql, '')
                     FROM sqlite_master ORDER BY type, name",
                )
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .collect::<Result<Vec<_>, _>>()
                .unwrap()
        };
        for table in RESET_ORDER {
            let mut stmt = conn
                .prepare(&format!("SELECT * FROM {table} ORDER BY rowid"))
                .unwrap();
            let width = stmt.column_count();
            let rows = stmt
                .query_map([], |row| {
                    let mut cells = Vec::with_capacity(width);
                    for i in 0..width {
                        let value: rusqlite::types::Value = row.get(i)?;
                        cells.push(format!("{value:?}"));
                    }
                    Ok(format!("{table}|{}", cells.join("|")))
                })
                .unwrap()
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            out.extend(rows);
        }
        out.push(format!("version={}", schema_version(conn).unwrap()));
        out
    }

    /// Owned tables as they looked before ownership existed.
    fn create_unowned_tables(conn: &Connection) {
        conn.execute_batch(
            "CREATE TABLE personal_foods (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                calories REAL NOT NULL,
                protein REAL NOT NULL DEFAULT 0,
                carbs REAL NOT NULL DEFAULT 0,
                fat REAL NOT NULL DEFAULT 0,
                category TEXT NOT NULL DEFAULT 'other',
                image_uri TEXT,
                from_photo INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE TABLE meal_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                food_id INTEGER,
                food_name TEXT NOT NULL,
                calories REAL NOT NULL,
                protein REAL NOT NULL DEFAULT 0,
                carbs REAL NOT NULL DEFAULT 0,
                fat REAL NOT NULL DEFAULT 0,
                meal_type TEXT NOT NULL,
                date TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE weight_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                weight_kg REAL NOT NULL,
                image_uri TEXT,
                note TEXT,
                date TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE steps_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                steps INTEGER NOT NULL,
                date TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE user_preferences (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hide_photos INTEGER NOT NULL DEFAULT 0,
                chart_type TEXT NOT NULL DEFAULT 'line',
                time_range TEXT NOT NULL DEFAULT 'week',
                metric TEXT NOT NULL DEFAULT 'weight',
                updated_at TEXT NOT NULL DEFAULT ''
            );",
        )
        .unwrap();
    }

    fn insert_unowned_rows(conn: &Connection, n: usize) {
        for i in 0..n {
            let day = format!("2024-01-{:02}", i + 1);
            conn.execute(
                "INSERT INTO personal_foods (name, calories, created_at) VALUES (?1, 100, ?2)",
                params![format!("food {i}"), day],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO meal_entries (food_name, calories, meal_type, date, created_at)
                 VALUES (?1, 250, 'lunch', ?2, ?2)",
                params![format!("meal {i}"), day],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO weight_entries (weight_kg, date, created_at) VALUES (70.5, ?1, ?1)",
                params![day],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO steps_entries (steps, date, created_at) VALUES (8000, ?1, ?1)",
                params![day],
            )
            .unwrap();
            conn.execute("INSERT INTO user_preferences (hide_photos) VALUES (0)", [])
                .unwrap();
        }
    }

    /// A users table from before generated identifiers, still carrying the
    /// weekly activity column.
    fn create_legacy_users(conn: &Connection) {
        conn.execute_batch(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                goal TEXT NOT NULL,
                weekly_activity TEXT,
                height REAL NOT NULL,
                weight REAL NOT NULL,
                gender TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            INSERT INTO users (goal, weekly_activity, height, weight, gender, created_at)
            VALUES ('decrease', '3-4', 170, 70, 'male', '2024-01-01T00:00:00.000Z'),
                   ('increase', '1-2', 182, 81.5, 'female', '2024-02-01T00:00:00.000Z'),
                   ('maintain', NULL, 160, 55, 'other', '2024-03-01T00:00:00.000Z');",
        )
        .unwrap();
    }

    #[test]
    fn test_fresh_database_gets_every_table() {
        let conn = fresh();
        let report = run(&conn).unwrap();

        for table in RESET_ORDER {
            assert!(table_exists(&conn, table).unwrap(), "{table} missing");
            assert_eq!(count(&conn, table), 0);
        }
        assert_eq!(report.version_before, 0);
        assert_eq!(report.version_after, SCHEMA_VERSION);
        assert!(report.is_clean(), "{:?}", report.failed);
        assert!(report.current_user.is_none());
        assert!(!report.applied.contains(&"user_identifier"));
    }

    #[test]
    fn test_run_twice_is_idempotent() {
        let conn = fresh();
        create_legacy_users(&conn);
        create_unowned_tables(&conn);
        insert_unowned_rows(&conn, 3);

        run(&conn).unwrap();
        let first = snapshot(&conn);

        let second_report = run(&conn).unwrap();
        let second = snapshot(&conn);

        assert_eq!(first, second);
        assert!(second_report.applied.is_empty());
        assert_eq!(second_report.total_backfilled(), 0);
        assert_eq!(second_report.total_orphans_removed(), 0);
    }

    #[test]
    fn test_fresh_run_twice_is_idempotent() {
        let conn = fresh();
        run(&conn).unwrap();
        let first = snapshot(&conn);
        run(&conn).unwrap();
        assert_eq!(first, snapshot(&conn));
    }

    #[test]
    fn test_legacy_users_receive_unique_identifiers() {
        let conn = fresh();
        create_legacy_users(&conn);

        let report = run(&conn).unwrap();
        assert!(report.applied.contains(&"user_identifier"));

        let ids = owners(&conn, "users");
        assert_eq!(ids.len(), 3);
        let ids: Vec<String> = ids.into_iter().map(Option::unwrap).collect();
        let unique: std::collections::HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), 3);
        for id in &ids {
            assert!(Uuid::parse_str(id).is_ok(), "not a uuid: {id}");
        }

        // A second run must not mint new identifiers.
        run(&conn).unwrap();
        let again: Vec<String> = owners(&conn, "users")
            .into_iter()
            .map(Option::unwrap)
            .collect();
        assert_eq!(ids, again);
    }

    #[test]
    fn test_user_identifier_column_is_unique_and_not_null() {
        let conn = fresh();
        create_legacy_users(&conn);
        run(&conn).unwrap();

        let column = table_columns(&conn, "users")
            .unwrap()
            .into_iter()
            .find(|c| c.name == "user_id")
            .unwrap();
        assert!(column.not_null);

        let dup = conn.execute(
            "INSERT INTO users (user_id, goal, gender) SELECT user_id, goal, gender FROM users LIMIT 1",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_legacy_columns_are_preserved_and_weekly_activity_removed() {
        let conn = fresh();
        create_legacy_users(&conn);
        run(&conn).unwrap();

        let names = column_names(&conn, "users").unwrap();
        assert!(!names.contains(&LEGACY_ACTIVITY_COLUMN.to_string()));
        assert!(names.contains(&"sport_activity".to_string()));

        let rows: Vec<(i64, String, String, f64, f64, String, String)> = {
            let mut stmt = conn
                .prepare(
                    "SELECT id, goal, sport_activity, height_cm, weight_kg, gender, created_at
                     FROM users ORDER BY id",
                )
                .unwrap();
            stmt.query_map([], |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                ))
            })
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
        };
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].0, 1);
        assert_eq!(rows[0].1, "decrease");
        assert_eq!(rows[0].2, "none");
        assert!((rows[0].3 - 170.0).abs() < f64::EPSILON);
        assert!((rows[1].4 - 81.5).abs() < f64::EPSILON);
        assert_eq!(rows[1].5, "female");
        assert_eq!(rows[2].6, "2024-03-01T00:00:00.000Z");
    }

    #[test]
    fn test_weekly_activity_dropped_when_identifier_already_present() {
        let conn = fresh();
        conn.execute_batch(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL UNIQUE,
                goal TEXT NOT NULL,
                weekly_activity TEXT,
                height_cm REAL,
                weight_kg REAL,
                gender TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            INSERT INTO users (user_id, goal, weekly_activity, height_cm, weight_kg, gender, created_at)
            VALUES ('U1', 'decrease', '5+', 170, 70, 'male', '2024-01-01T00:00:00.000Z');",
        )
        .unwrap();

        let report = run(&conn).unwrap();
        assert!(report.applied.contains(&"sport_activity"));
        assert!(report.applied.contains(&"drop_weekly_activity"));
        assert!(!report.applied.contains(&"user_identifier"));

        let names = column_names(&conn, "users").unwrap();
        assert!(!names.contains(&LEGACY_ACTIVITY_COLUMN.to_string()));

        let (user_id, goal, activity, height): (String, String, String, f64) = conn
            .query_row(
                "SELECT user_id, goal, sport_activity, height_cm FROM users",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!(user_id, "U1");
        assert_eq!(goal, "decrease");
        assert_eq!(activity, "none");
        assert!((height - 170.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_indexed_weekly_activity_dropped_by_rebuild() {
        let conn = fresh();
        conn.execute_batch(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL UNIQUE,
                goal TEXT NOT NULL,
                weekly_activity TEXT,
                height_cm REAL,
                weight_kg REAL,
                gender TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX idx_wa ON users(weekly_activity);
            INSERT INTO users (user_id, goal, weekly_activity, height_cm, weight_kg, gender, created_at)
            VALUES ('U1', 'increase', '1-2', 182, 80, 'female', '2024-01-01T00:00:00.000Z');",
        )
        .unwrap();

        let report = run(&conn).unwrap();
        assert!(report.failed.is_empty(), "{:?}", report.failed);
        assert!(report.applied.contains(&"drop_weekly_activity"));
        assert_eq!(report.version_after, SCHEMA_VERSION);

        let names = column_names(&conn, "users").unwrap();
        assert!(!names.contains(&LEGACY_ACTIVITY_COLUMN.to_string()));

        let (user_id, goal, gender): (String, String, String) = conn
            .query_row("SELECT user_id, goal, gender FROM users", [], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .unwrap();
        assert_eq!(user_id, "U1");
        assert_eq!(goal, "increase");
        assert_eq!(gender, "female");
        assert_eq!(count(&conn, "users"), 1);

        // Second start finds nothing left to do.
        let again = run(&conn).unwrap();
        assert!(again.applied.is_empty());
    }

    #[test]
    fn test_run_fails_when_base_tables_cannot_be_created() {
        let conn = fresh();
        conn.execute_batch("CREATE TABLE t(x); CREATE INDEX chat_history ON t(x);")
            .unwrap();

        assert!(run(&conn).is_err());
        assert_eq!(schema_version(&conn).unwrap(), 0);

        let kind: String = conn
            .query_row(
                "SELECT type FROM sqlite_master WHERE name = 'chat_history'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(kind, "index");
    }

    #[test]
    fn test_backfill_attributes_rows_to_current_user() {
        let conn = fresh();
        create_tables(&conn).unwrap();
        conn.execute(
            "INSERT INTO users (user_id, goal, gender, created_at) VALUES ('U1', 'maintain', 'other', '2024-01-01T00:00:00.000Z')",
            [],
        )
        .unwrap();
        // Replace the owned tables with their pre-ownership layout.
        for table in BACKFILL_TABLES {
            conn.execute_batch(&format!("DROP TABLE {table};")).unwrap();
        }
        create_unowned_tables(&conn);
        insert_unowned_rows(&conn, 4);

        let report = run(&conn).unwrap();
        assert!(report.is_clean(), "{:?}", report.failed);
        assert_eq!(report.current_user.as_deref(), Some("U1"));
        assert_eq!(report.total_orphans_removed(), 0);

        for table in BACKFILL_TABLES {
            assert_eq!(count(&conn, table), 4, "{table} lost rows");
            assert!(
                owners(&conn, table)
                    .iter()
                    .all(|o| o.as_deref() == Some("U1")),
                "{table} not attributed"
            );
        }
        assert_eq!(report.total_backfilled(), 4 * BACKFILL_TABLES.len());
    }

    #[test]
    fn test_backfill_uses_identifier_minted_for_legacy_user() {
        let conn = fresh();
        create_legacy_users(&conn);
        create_unowned_tables(&conn);
        insert_unowned_rows(&conn, 2);

        let report = run(&conn).unwrap();

        // Latest created legacy row is the 'maintain' user.
        let latest: String = conn
            .query_row(
                "SELECT user_id FROM users WHERE goal = 'maintain'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(report.current_user.as_deref(), Some(latest.as_str()));
        for table in BACKFILL_TABLES {
            assert!(
                owners(&conn, table)
                    .iter()
                    .all(|o| o.as_deref() == Some(latest.as_str()))
            );
        }
    }

    #[test]
    fn test_orphans_deleted_when_no_user_exists() {
        let conn = fresh();
        create_unowned_tables(&conn);
        insert_unowned_rows(&conn, 5);

        let report = run(&conn).unwrap();
        assert!(report.current_user.is_none());
        for table in BACKFILL_TABLES {
            assert_eq!(count(&conn, table), 0, "{table} kept orphans");
        }
        assert_eq!(report.total_orphans_removed(), 5 * BACKFILL_TABLES.len());
    }

    #[test]
    fn test_cleanup_continues_past_failing_table() {
        let conn = fresh();
        // chat_history without an owner column makes its cleanup fail.
        conn.execute_batch(
            "CREATE TABLE chat_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                messages TEXT NOT NULL
            );
            INSERT INTO chat_history (messages) VALUES ('[]');",
        )
        .unwrap();
        create_unowned_tables(&conn);
        insert_unowned_rows(&conn, 2);

        let report = run(&conn).unwrap();

        assert!(
            report
                .failed
                .iter()
                .any(|f| f.step == "cleanup:chat_history")
        );
        assert_eq!(count(&conn, "chat_history"), 1);
        for table in ["weight_entries", "steps_entries", "meal_entries"] {
            assert_eq!(count(&conn, table), 0, "{table} kept orphans");
        }
    }

    #[test]
    fn test_cleanup_orphans_reports_each_table() {
        let conn = fresh();
        run(&conn).unwrap();
        conn.execute_batch("DROP TABLE steps_entries;").unwrap();

        let mut report = MigrationReport::default();
        cleanup_orphans(&conn, &mut report);

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].step, "cleanup:steps_entries");
        assert_eq!(report.orphans_removed.len(), CLEANUP_TABLES.len() - 1);
    }

    #[test]
    fn test_failed_step_holds_back_version_but_later_steps_run() {
        let conn = fresh();
        // A meal table without a date column breaks the index step.
        conn.execute_batch(
            "CREATE TABLE meal_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                food_name TEXT NOT NULL,
                calories REAL NOT NULL,
                meal_type TEXT NOT NULL
            );
            INSERT INTO meal_entries (food_name, calories, meal_type) VALUES ('toast', 120, 'breakfast');",
        )
        .unwrap();
        create_tables(&conn).unwrap();
        conn.execute(
            "INSERT INTO users (user_id, created_at) VALUES ('U1', '2024-01-01T00:00:00.000Z')",
            [],
        )
        .unwrap();

        let report = run(&conn).unwrap();

        assert!(report.failed.iter().any(|f| f.step == "owner_indexes"));
        assert_eq!(report.version_after, SCHEMA_VERSION - 1);
        assert_eq!(owners(&conn, "meal_entries"), vec![Some("U1".to_string())]);

        // The failed step is attempted again at the next start.
        let again = run(&conn).unwrap();
        assert_eq!(again.version_before, SCHEMA_VERSION - 1);
        assert!(again.failed.iter().any(|f| f.step == "owner_indexes"));
    }

    #[test]
    fn test_chat_history_is_not_backfilled() {
        let conn = fresh();
        run(&conn).unwrap();
        conn.execute_batch(
            "DROP TABLE chat_history;
             CREATE TABLE chat_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT,
                messages TEXT NOT NULL DEFAULT '[]'
             );
             INSERT INTO chat_history (user_id, messages) VALUES (NULL, '[]');
             INSERT INTO users (user_id, created_at) VALUES ('U1', '2024-01-01T00:00:00.000Z');",
        )
        .unwrap();

        let report = run(&conn).unwrap();

        assert!(report.backfilled.iter().all(|c| c.table != "chat_history"));
        assert_eq!(count(&conn, "chat_history"), 0);
    }

    #[test]
    fn test_reset_drops_data_and_recreates_schema() {
        let conn = fresh();
        create_legacy_users(&conn);
        create_unowned_tables(&conn);
        insert_unowned_rows(&conn, 3);
        run(&conn).unwrap();
        assert_eq!(count(&conn, "users"), 3);

        let report = reset(&conn).unwrap();

        assert_eq!(report.version_before, 0);
        assert_eq!(report.version_after, SCHEMA_VERSION);
        for table in RESET_ORDER {
            assert!(table_exists(&conn, table).unwrap());
            assert_eq!(count(&conn, table), 0, "{table} not emptied");
        }
        assert!(has_column(&conn, "meal_entries", "user_id").unwrap());
    }

    #[test]
    fn test_table_columns_reports_shape() {
        let conn = fresh();
        run(&conn).unwrap();

        let columns = table_columns(&conn, "users").unwrap();
        let id = columns.iter().find(|c| c.name == "id").unwrap();
        assert!(id.primary_key);
        let activity = columns.iter().find(|c| c.name == "sport_activity").unwrap();
        assert_eq!(activity.default_value.as_deref(), Some("'none'"));
        assert_eq!(activity.decl_type, "TEXT");

        assert!(table_columns(&conn, "no_such_table").unwrap().is_empty());
    }

    #[test]
    fn test_newer_schema_version_skips_steps() {
        let conn = fresh();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();

        let report = run(&conn).unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.version_after, SCHEMA_VERSION + 1);
    }
}
