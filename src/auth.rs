//! Operator authentication for Caixa POS.
//!
//! Operators are identified by their matricula (membership number). The
//! login identity is synthesized as `{matricula}@{dominio_login}` and stored
//! alongside the bcrypt password hash in the `users` table. Failed-attempt
//! lockout state is persisted in `local_settings` so it survives restarts.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, DbState};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAX_FAILED_ATTEMPTS: u32 = 5;
const LOCKOUT_MINUTES: i64 = 15;
const LOCKOUT_ATTEMPTS_KEY: &str = "lockout_attempts";
const LOCKOUT_LAST_ATTEMPT_KEY: &str = "lockout_last_attempt";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// An authenticated operator, as loaded from the `users` table.
#[derive(Debug, Clone)]
pub struct Operator {
    pub id: String,
    pub nome: String,
    pub matricula: String,
    pub login: String,
    pub is_admin: bool,
}

/// Lockout tracking entry.
struct LockoutEntry {
    attempts: u32,
    last_attempt: DateTime<Utc>,
}

/// In-memory authentication state: the currently signed-in operator.
pub struct AuthState {
    current: Mutex<Option<Operator>>,
    lockout: Mutex<LockoutEntry>,
}

impl AuthState {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            lockout: Mutex::new(LockoutEntry {
                attempts: 0,
                last_attempt: Utc::now(),
            }),
        }
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_matricula(matricula: &str) -> Result<(), String> {
    if matricula.is_empty() {
        return Err("Matricula is required".into());
    }
    if !matricula.chars().all(|c| c.is_ascii_digit()) {
        return Err("Matricula must contain only digits".into());
    }
    Ok(())
}

fn validate_senha(senha: &str) -> Result<(), String> {
    if senha.len() < 6 {
        return Err("Password must be at least 6 characters".into());
    }
    Ok(())
}

/// Check whether the terminal is currently locked out.
fn check_lockout(lockout: &LockoutEntry) -> Result<(), String> {
    if lockout.attempts >= MAX_FAILED_ATTEMPTS {
        let elapsed = Utc::now() - lockout.last_attempt;
        if elapsed < Duration::minutes(LOCKOUT_MINUTES) {
            let remaining = LOCKOUT_MINUTES - elapsed.num_minutes();
            return Err(format!(
                "Too many failed attempts. Try again in {remaining} minute(s)."
            ));
        }
        // Lockout period has elapsed — will be reset on next successful login
    }
    Ok(())
}

fn record_failure(lockout: &mut LockoutEntry) {
    lockout.attempts += 1;
    lockout.last_attempt = Utc::now();
    warn!(attempts = lockout.attempts, "failed login attempt");
}

fn reset_lockout(lockout: &mut LockoutEntry) {
    lockout.attempts = 0;
    lockout.last_attempt = Utc::now();
}

/// Load persisted lockout state from local_settings.
fn load_lockout_from_db(conn: &rusqlite::Connection) -> LockoutEntry {
    let attempts = db::get_setting(conn, "auth", LOCKOUT_ATTEMPTS_KEY)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    let last_attempt = db::get_setting(conn, "auth", LOCKOUT_LAST_ATTEMPT_KEY)
        .and_then(|v| chrono::DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    LockoutEntry {
        attempts,
        last_attempt,
    }
}

/// Persist lockout state in local_settings.
fn persist_lockout_to_db(conn: &rusqlite::Connection, lockout: &LockoutEntry) {
    let _ = db::set_setting(
        conn,
        "auth",
        LOCKOUT_ATTEMPTS_KEY,
        &lockout.attempts.to_string(),
    );
    let _ = db::set_setting(
        conn,
        "auth",
        LOCKOUT_LAST_ATTEMPT_KEY,
        &lockout.last_attempt.to_rfc3339(),
    );
}

fn row_to_operator(row: &rusqlite::Row<'_>) -> rusqlite::Result<Operator> {
    Ok(Operator {
        id: row.get(0)?,
        nome: row.get(1)?,
        matricula: row.get(2)?,
        login: row.get(3)?,
        is_admin: row.get::<_, i64>(4)? != 0,
    })
}

/// Look up an operator by matricula.
pub fn find_operator(db: &DbState, matricula: &str) -> Result<Option<Operator>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let op = conn
        .query_row(
            "SELECT id, nome, matricula, login, is_admin FROM users WHERE matricula = ?1",
            rusqlite::params![matricula],
            row_to_operator,
        )
        .ok();
    Ok(op)
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Register a new operator account.
///
/// Synthesizes the login as `{matricula}@{dominio_login}` and promotes the
/// account to administrator when the matricula is in the configured
/// privileged set (`config/matriculas_admin`).
pub fn register(db: &DbState, nome: &str, matricula: &str, senha: &str) -> Result<Operator, String> {
    let nome = nome.trim();
    if nome.is_empty() {
        return Err("Name is required".into());
    }
    validate_matricula(matricula)?;
    validate_senha(senha)?;

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let login = format!("{matricula}@{}", db::dominio_login(&conn));
    let is_admin = db::matriculas_admin(&conn).iter().any(|m| m == matricula);

    let senha_hash = bcrypt::hash(senha, bcrypt::DEFAULT_COST)
        .map_err(|e| format!("Failed to hash password: {e}"))?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO users (id, nome, matricula, login, senha_hash, is_admin, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        rusqlite::params![id, nome, matricula, login, senha_hash, is_admin as i64, now],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            format!("Matricula {matricula} is already registered")
        }
        other => format!("insert user: {other}"),
    })?;

    info!(matricula = %matricula, admin = is_admin, "operator registered");

    Ok(Operator {
        id,
        nome: nome.to_string(),
        matricula: matricula.to_string(),
        login,
        is_admin,
    })
}

// ---------------------------------------------------------------------------
// Login / logout
// ---------------------------------------------------------------------------

/// Verify matricula + password, create the in-memory operator session.
pub fn login(
    db: &DbState,
    auth: &AuthState,
    matricula: &str,
    senha: &str,
) -> Result<Operator, String> {
    if matricula.is_empty() || senha.is_empty() {
        return Err("Matricula and password are required".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    // Synchronize lockout state from durable storage.
    let persisted_lockout = load_lockout_from_db(&conn);
    {
        let mut lockout = auth.lockout.lock().unwrap();
        *lockout = persisted_lockout;
        check_lockout(&lockout)?;
    }

    let stored: Option<(Operator, String)> = conn
        .query_row(
            "SELECT id, nome, matricula, login, is_admin, senha_hash
             FROM users WHERE matricula = ?1",
            rusqlite::params![matricula],
            |row| Ok((row_to_operator(row)?, row.get::<_, String>(5)?)),
        )
        .ok();

    if let Some((operator, hash)) = stored {
        if bcrypt::verify(senha, &hash).unwrap_or(false) {
            let mut lockout = auth.lockout.lock().unwrap();
            reset_lockout(&mut lockout);
            persist_lockout_to_db(&conn, &lockout);

            info!(matricula = %operator.matricula, "login successful");
            let mut current = auth.current.lock().unwrap();
            *current = Some(operator.clone());
            return Ok(operator);
        }
    }

    let mut lockout = auth.lockout.lock().unwrap();
    record_failure(&mut lockout);
    persist_lockout_to_db(&conn, &lockout);
    Err("Invalid matricula or password".into())
}

/// Invalidate the current operator session.
pub fn logout(auth: &AuthState) {
    let mut current = auth.current.lock().unwrap();
    if let Some(op) = current.take() {
        info!(matricula = %op.matricula, "operator logged out");
    }
}

/// The currently signed-in operator, if any.
pub fn current_operator(auth: &AuthState) -> Option<Operator> {
    auth.current.lock().unwrap().clone()
}

// ---------------------------------------------------------------------------
// Password change
// ---------------------------------------------------------------------------

/// Change an operator's password after verifying the current one.
pub fn change_password(
    db: &DbState,
    matricula: &str,
    senha_atual: &str,
    senha_nova: &str,
) -> Result<(), String> {
    validate_senha(senha_nova)?;

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let hash: String = conn
        .query_row(
            "SELECT senha_hash FROM users WHERE matricula = ?1",
            rusqlite::params![matricula],
            |row| row.get(0),
        )
        .map_err(|_| format!("No operator with matricula {matricula}"))?;

    if !bcrypt::verify(senha_atual, &hash).unwrap_or(false) {
        return Err("Current password is incorrect".into());
    }

    let new_hash = bcrypt::hash(senha_nova, bcrypt::DEFAULT_COST)
        .map_err(|e| format!("Failed to hash password: {e}"))?;
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "UPDATE users SET senha_hash = ?1, updated_at = ?2 WHERE matricula = ?3",
        rusqlite::params![new_hash, now, matricula],
    )
    .map_err(|e| format!("update password: {e}"))?;

    info!(matricula = %matricula, "password changed");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db_state;

    // bcrypt at DEFAULT_COST is slow; registration in tests still uses the
    // public API so the synthesized login and admin promotion are exercised.

    #[test]
    fn register_synthesizes_login_from_matricula_and_domain() {
        let db = test_db_state();
        let op = register(&db, "Ana Souza", "4211", "segredo1").expect("register");
        assert_eq!(op.login, "4211@caixapos.app");
        assert!(!op.is_admin);
    }

    #[test]
    fn register_promotes_configured_admin_matriculas() {
        let db = test_db_state();
        {
            let conn = db.conn.lock().expect("db lock");
            db::set_setting(&conn, "config", "matriculas_admin", "9001,9002").expect("set");
        }
        let op = register(&db, "Chefe", "9002", "segredo1").expect("register");
        assert!(op.is_admin);
    }

    #[test]
    fn register_rejects_duplicate_matricula_and_bad_input() {
        let db = test_db_state();
        register(&db, "Ana", "4211", "segredo1").expect("first register");

        let err = register(&db, "Outra", "4211", "segredo1").expect_err("duplicate");
        assert!(err.contains("already registered"), "unexpected: {err}");

        assert!(register(&db, "", "4212", "segredo1").is_err());
        assert!(register(&db, "Ana", "42a1", "segredo1").is_err());
        assert!(register(&db, "Ana", "4213", "curta").is_err());
    }

    #[test]
    fn login_accepts_valid_credentials_and_rejects_invalid() {
        let db = test_db_state();
        let auth = AuthState::new();
        register(&db, "Ana", "4211", "segredo1").expect("register");

        let err = login(&db, &auth, "4211", "errada1").expect_err("wrong password");
        assert_eq!(err, "Invalid matricula or password");
        assert!(current_operator(&auth).is_none());

        let op = login(&db, &auth, "4211", "segredo1").expect("login");
        assert_eq!(op.matricula, "4211");
        assert_eq!(
            current_operator(&auth).expect("current").matricula,
            "4211"
        );

        logout(&auth);
        assert!(current_operator(&auth).is_none());
    }

    #[test]
    fn lockout_persists_across_auth_state_restart() {
        let db = test_db_state();
        let auth_before_restart = AuthState::new();

        for _ in 0..MAX_FAILED_ATTEMPTS {
            let err = login(&db, &auth_before_restart, "4211", "errada1")
                .expect_err("invalid login should fail");
            assert_eq!(err, "Invalid matricula or password");
        }

        let auth_after_restart = AuthState::new();
        let err = login(&db, &auth_after_restart, "4211", "errada1")
            .expect_err("lockout should remain active after restart");
        assert!(
            err.contains("Too many failed attempts"),
            "unexpected lockout error message: {err}"
        );
    }

    #[test]
    fn change_password_requires_current_password() {
        let db = test_db_state();
        let auth = AuthState::new();
        register(&db, "Ana", "4211", "segredo1").expect("register");

        let err = change_password(&db, "4211", "errada1", "novasenha").expect_err("wrong current");
        assert_eq!(err, "Current password is incorrect");

        change_password(&db, "4211", "segredo1", "novasenha").expect("change");
        assert!(login(&db, &auth, "4211", "segredo1").is_err());
        login(&db, &auth, "4211", "novasenha").expect("login with new password");
    }
}
