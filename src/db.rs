//! Local SQLite database layer for Caixa POS.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, the
//! `local_settings` category/key/value store, and the managed connection
//! state shared by every operation.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Managed state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Default unit fare charged per boarding, seeded into `local_settings`.
const DEFAULT_TARIFA_UNITARIA: &str = "5.00";

/// Default login domain for synthesized operator logins.
const DEFAULT_DOMINIO_LOGIN: &str = "caixapos.app";

/// Default spool directory for receipt payloads, relative to the data dir.
const DEFAULT_SPOOL_DIR: &str = "spool";

/// Initialize the database at `{data_dir}/caixa.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join("caixa.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Migration v1: settings store and operator accounts.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- operator accounts
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            nome TEXT NOT NULL,
            matricula TEXT NOT NULL UNIQUE,
            login TEXT NOT NULL UNIQUE,
            senha_hash TEXT NOT NULL,
            is_admin INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_local_settings_cat_key ON local_settings(setting_category, setting_key);
        CREATE INDEX IF NOT EXISTS idx_users_matricula ON users(matricula);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;

    // Seed default configuration. The privileged matricula set is data,
    // not code: promote-to-admin reads whatever is configured here.
    seed_setting(conn, "config", "tarifa_unitaria", DEFAULT_TARIFA_UNITARIA)?;
    seed_setting(conn, "config", "dominio_login", DEFAULT_DOMINIO_LOGIN)?;
    seed_setting(conn, "config", "matriculas_admin", "")?;
    seed_setting(conn, "printer", "spool_dir", DEFAULT_SPOOL_DIR)?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: caixa sessions and their append-only children.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- caixas (cash sessions, one per operator at a time)
        CREATE TABLE IF NOT EXISTS caixas (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'open' CHECK (status IN ('open', 'closing', 'closed')),
            data_caixa TEXT NOT NULL,
            opened_at TEXT NOT NULL,
            closed_at TEXT,
            report_path TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        );

        -- The one-open-caixa invariant lives in the store, not in a
        -- check-then-act query: a second open for the same operator fails
        -- the insert itself.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_caixas_one_open
            ON caixas(user_id) WHERE status IN ('open', 'closing');

        -- lancamentos (manual fare entries, append-only)
        CREATE TABLE IF NOT EXISTS lancamentos (
            id TEXT PRIMARY KEY,
            caixa_id TEXT NOT NULL,
            tipo_validador TEXT NOT NULL,
            prefixo TEXT NOT NULL,
            qtd_bordos INTEGER NOT NULL,
            valor REAL NOT NULL,
            matricula_motorista TEXT NOT NULL,
            matricula_recebedor TEXT NOT NULL,
            data_caixa TEXT NOT NULL,
            idempotency_key TEXT UNIQUE,
            created_at TEXT NOT NULL,
            FOREIGN KEY(caixa_id) REFERENCES caixas(id)
        );

        -- sangrias (cash withdrawals, append-only)
        CREATE TABLE IF NOT EXISTS sangrias (
            id TEXT PRIMARY KEY,
            caixa_id TEXT NOT NULL,
            valor REAL NOT NULL,
            motivo TEXT NOT NULL,
            idempotency_key TEXT UNIQUE,
            created_at TEXT NOT NULL,
            FOREIGN KEY(caixa_id) REFERENCES caixas(id)
        );

        CREATE INDEX IF NOT EXISTS idx_caixas_user_status ON caixas(user_id, status);
        CREATE INDEX IF NOT EXISTS idx_lancamentos_caixa ON lancamentos(caixa_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_sangrias_caixa ON sangrias(caixa_id, created_at);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        format!("migration v2: {e}")
    })?;

    info!("Applied migration v2 (caixa tables)");
    Ok(())
}

/// Migration v3: print job spool for thermal receipts.
fn migrate_v3(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS print_jobs (
            id TEXT PRIMARY KEY,
            job_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            payload BLOB NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'printed', 'failed')),
            error TEXT,
            created_at TEXT NOT NULL,
            printed_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_print_jobs_status ON print_jobs(status);

        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| {
        error!("Migration v3 failed: {e}");
        format!("migration v3: {e}")
    })?;

    info!("Applied migration v3 (print spool)");
    Ok(())
}

/// Insert a setting only if absent, so operator edits survive migrations.
fn seed_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<(), String> {
    conn.execute(
        "INSERT OR IGNORE INTO local_settings (setting_category, setting_key, setting_value)
         VALUES (?1, ?2, ?3)",
        params![category, key, value],
    )
    .map_err(|e| format!("seed setting {category}/{key}: {e}"))?;
    Ok(())
}

// ===========================================================================
// Settings helpers
// ===========================================================================

/// Get a setting value, or None if not set.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings
         WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Upsert a setting value.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(setting_category, setting_key)
         DO UPDATE SET setting_value = excluded.setting_value, updated_at = datetime('now')",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting {category}/{key}: {e}"))?;
    Ok(())
}

/// The configured unit fare per boarding.
pub fn tarifa_unitaria(conn: &Connection) -> f64 {
    get_setting(conn, "config", "tarifa_unitaria")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(5.0)
}

/// The configured login domain for synthesized operator logins.
pub fn dominio_login(conn: &Connection) -> String {
    get_setting(conn, "config", "dominio_login")
        .unwrap_or_else(|| DEFAULT_DOMINIO_LOGIN.to_string())
}

/// The configured privileged matricula set (comma-separated).
pub fn matriculas_admin(conn: &Connection) -> Vec<String> {
    get_setting(conn, "config", "matriculas_admin")
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// The configured spool directory for receipt payloads, relative to the
/// data dir unless absolute.
pub fn spool_dir(conn: &Connection) -> String {
    get_setting(conn, "printer", "spool_dir")
        .unwrap_or_else(|| DEFAULT_SPOOL_DIR.to_string())
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

/// Open a fully migrated in-memory database state (test helper).
#[cfg(test)]
pub fn test_db_state() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch("PRAGMA foreign_keys = ON;").expect("pragma setup");
    run_migrations_for_test(&conn);
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch("PRAGMA foreign_keys = ON;").expect("pragma setup");
        conn
    }

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        stmt.query_map([], |row| row.get(0))
            .expect("query tables")
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn migrations_create_all_tables() {
        let conn = test_db();
        run_migrations_for_test(&conn);

        let tables = table_names(&conn);
        for expected in [
            "caixas",
            "lancamentos",
            "local_settings",
            "print_jobs",
            "sangrias",
            "users",
        ] {
            assert!(
                tables.iter().any(|t| t == expected),
                "missing table {expected}, have: {tables:?}"
            );
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = test_db();
        run_migrations_for_test(&conn);
        run_migrations_for_test(&conn);

        let version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .expect("schema version");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn settings_roundtrip_and_seed_defaults() {
        let conn = test_db();
        run_migrations_for_test(&conn);

        assert_eq!(
            get_setting(&conn, "config", "tarifa_unitaria").as_deref(),
            Some(DEFAULT_TARIFA_UNITARIA)
        );
        assert!((tarifa_unitaria(&conn) - 5.0).abs() < f64::EPSILON);

        set_setting(&conn, "config", "tarifa_unitaria", "7.50").expect("set");
        assert!((tarifa_unitaria(&conn) - 7.5).abs() < f64::EPSILON);
    }

    #[test]
    fn matriculas_admin_parses_comma_separated_list() {
        let conn = test_db();
        run_migrations_for_test(&conn);

        assert!(matriculas_admin(&conn).is_empty());

        set_setting(&conn, "config", "matriculas_admin", "1001, 2002 ,3003").expect("set");
        assert_eq!(matriculas_admin(&conn), vec!["1001", "2002", "3003"]);
    }

    #[test]
    fn one_open_caixa_index_rejects_second_open_row() {
        let conn = test_db();
        run_migrations_for_test(&conn);

        conn.execute(
            "INSERT INTO users (id, nome, matricula, login, senha_hash, created_at, updated_at)
             VALUES ('u1', 'Ana', '1001', '1001@caixapos.app', 'x', 't', 't')",
            [],
        )
        .expect("insert user");

        conn.execute(
            "INSERT INTO caixas (id, user_id, status, data_caixa, opened_at, created_at, updated_at)
             VALUES ('c1', 'u1', 'open', '01/02/2026', 't', 't', 't')",
            [],
        )
        .expect("first open caixa");

        let second = conn.execute(
            "INSERT INTO caixas (id, user_id, status, data_caixa, opened_at, created_at, updated_at)
             VALUES ('c2', 'u1', 'open', '01/02/2026', 't', 't', 't')",
            [],
        );
        assert!(second.is_err(), "unique index should reject a second open caixa");

        // A closed caixa does not block a new open one.
        conn.execute("UPDATE caixas SET status = 'closed' WHERE id = 'c1'", [])
            .expect("close first");
        conn.execute(
            "INSERT INTO caixas (id, user_id, status, data_caixa, opened_at, created_at, updated_at)
             VALUES ('c3', 'u1', 'open', '02/02/2026', 't', 't', 't')",
            [],
        )
        .expect("open after close");
    }
}
