//! Caixa POS — cash-drawer management for a bus-fare collection operation.
//!
//! Operators authenticate with their matricula, keep at most one open caixa
//! (cash session) at a time, record manual fare entries and sangrias
//! against it, get a thermal receipt per entry, and close the caixa into a
//! paginated PDF report.

use std::path::Path;

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod auth;
pub mod caixa;
pub mod db;
pub mod escpos;
pub mod ledger;
pub mod pdfdoc;
pub mod print;
pub mod receipt;
pub mod report;

/// Initialize structured logging: console plus a daily-rolling file under
/// `{data_dir}/logs`.
pub fn init_logging(data_dir: &Path) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,caixa_pos=debug"));

    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "caixa");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Keep the guard alive for the lifetime of the process — dropping it
    // flushes logs. Leaked intentionally since we run until process exit.
    std::mem::forget(guard);

    info!("Caixa POS v{}", env!("CARGO_PKG_VERSION"));
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use uuid::Uuid;

    use crate::auth::Operator;
    use crate::db::DbState;

    /// Insert an operator row directly, skipping the bcrypt work the
    /// public registration path does. Lifecycle tests only need identity.
    pub fn insert_operator(db: &DbState, nome: &str, matricula: &str) -> Operator {
        let conn = db.conn.lock().expect("db lock");
        let id = Uuid::new_v4().to_string();
        let login = format!("{matricula}@caixapos.app");
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO users (id, nome, matricula, login, senha_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'test-hash', ?5, ?5)",
            rusqlite::params![id, nome, matricula, login, now],
        )
        .expect("insert operator");

        Operator {
            id,
            nome: nome.to_string(),
            matricula: matricula.to_string(),
            login,
            is_admin: false,
        }
    }
}
