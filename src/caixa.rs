//! Caixa (cash session) lifecycle and append-only recorders.
//!
//! One operator has at most one caixa in a non-closed status at any time.
//! The invariant is enforced by the store itself (partial unique index on
//! `caixas`), so open is a single atomic conditional insert rather than a
//! check-then-act query pair.
//!
//! Closing is two-phase: `open -> closing` marks the intent, the closing PDF
//! is generated, then `closing -> closed` stamps the closing time. A crash
//! or report failure leaves the caixa in `closing`, from which
//! [`resume_close`] can finish the job; report generation is idempotent,
//! keyed by caixa id.

use chrono::{Local, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::Operator;
use crate::db::{self, DbState};
use crate::print;
use crate::receipt::{self, ReciboDoc};
use crate::report;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Lifecycle status of a caixa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaixaStatus {
    Open,
    Closing,
    Closed,
}

impl CaixaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CaixaStatus::Open => "open",
            CaixaStatus::Closing => "closing",
            CaixaStatus::Closed => "closed",
        }
    }

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "open" => Ok(CaixaStatus::Open),
            "closing" => Ok(CaixaStatus::Closing),
            "closed" => Ok(CaixaStatus::Closed),
            other => Err(format!("unknown caixa status: {other}")),
        }
    }
}

/// A cash session row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Caixa {
    pub id: String,
    pub user_id: String,
    pub status: CaixaStatus,
    pub data_caixa: String,
    pub opened_at: String,
    pub closed_at: Option<String>,
    pub report_path: Option<String>,
}

/// A recorded manual fare entry (append-only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lancamento {
    pub id: String,
    pub caixa_id: String,
    pub tipo_validador: String,
    pub prefixo: String,
    pub qtd_bordos: i64,
    pub valor: f64,
    pub matricula_motorista: String,
    pub matricula_recebedor: String,
    pub data_caixa: String,
    pub created_at: String,
}

/// A recorded cash withdrawal (append-only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sangria {
    pub id: String,
    pub caixa_id: String,
    pub valor: f64,
    pub motivo: String,
    pub created_at: String,
}

/// Input for recording a fare entry. `valor` is derived from
/// `qtd_bordos x tarifa_unitaria` at write time, never supplied.
#[derive(Debug, Clone, Default)]
pub struct NovoLancamento {
    pub tipo_validador: String,
    pub prefixo: String,
    pub qtd_bordos: i64,
    pub matricula_motorista: String,
    /// Caixa date override; defaults to the session's own data_caixa.
    pub data_caixa: Option<String>,
    /// Client-chosen key; a replay with the same key returns the
    /// already-recorded entry instead of writing a second row.
    pub idempotency_key: Option<String>,
}

/// Input for recording a withdrawal.
#[derive(Debug, Clone, Default)]
pub struct NovaSangria {
    pub valor: f64,
    pub motivo: String,
    pub idempotency_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const CAIXA_COLUMNS: &str =
    "id, user_id, status, data_caixa, opened_at, closed_at, report_path";

pub(crate) fn row_to_caixa(row: &rusqlite::Row<'_>) -> rusqlite::Result<Caixa> {
    let status_raw: String = row.get(2)?;
    Ok(Caixa {
        id: row.get(0)?,
        user_id: row.get(1)?,
        status: CaixaStatus::from_str(&status_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?,
        data_caixa: row.get(3)?,
        opened_at: row.get(4)?,
        closed_at: row.get(5)?,
        report_path: row.get(6)?,
    })
}

pub(crate) fn row_to_lancamento(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lancamento> {
    Ok(Lancamento {
        id: row.get(0)?,
        caixa_id: row.get(1)?,
        tipo_validador: row.get(2)?,
        prefixo: row.get(3)?,
        qtd_bordos: row.get(4)?,
        valor: row.get(5)?,
        matricula_motorista: row.get(6)?,
        matricula_recebedor: row.get(7)?,
        data_caixa: row.get(8)?,
        created_at: row.get(9)?,
    })
}

pub(crate) const LANCAMENTO_COLUMNS: &str =
    "id, caixa_id, tipo_validador, prefixo, qtd_bordos, valor,
     matricula_motorista, matricula_recebedor, data_caixa, created_at";

pub(crate) fn row_to_sangria(row: &rusqlite::Row<'_>) -> rusqlite::Result<Sangria> {
    Ok(Sangria {
        id: row.get(0)?,
        caixa_id: row.get(1)?,
        valor: row.get(2)?,
        motivo: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub(crate) const SANGRIA_COLUMNS: &str = "id, caixa_id, valor, motivo, created_at";

// ---------------------------------------------------------------------------
// Open / detect
// ---------------------------------------------------------------------------

/// Open a new caixa for the operator.
///
/// The insert itself is the uniqueness check: the partial unique index on
/// `caixas(user_id) WHERE status IN ('open','closing')` rejects a second
/// open, leaving the existing caixa untouched.
pub fn open_caixa(db: &DbState, operator: &Operator) -> Result<Caixa, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let data_caixa = Local::now().format("%d/%m/%Y").to_string();

    conn.execute(
        "INSERT INTO caixas (id, user_id, status, data_caixa, opened_at, created_at, updated_at)
         VALUES (?1, ?2, 'open', ?3, ?4, ?4, ?4)",
        params![id, operator.id, data_caixa, now],
    )
    .map_err(|e| match e {
        // Only the partial unique index conflict means a duplicate open;
        // other constraint failures (e.g. foreign key) keep their own message.
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            format!(
                "Operator {} already has an open caixa",
                operator.matricula
            )
        }
        other => format!("insert caixa: {other}"),
    })?;

    info!(caixa_id = %id, matricula = %operator.matricula, "caixa opened");

    Ok(Caixa {
        id,
        user_id: operator.id.clone(),
        status: CaixaStatus::Open,
        data_caixa,
        opened_at: now,
        closed_at: None,
        report_path: None,
    })
}

/// Find the operator's caixa that is not yet closed (`open` or `closing`).
pub fn get_open_caixa(db: &DbState, operator: &Operator) -> Result<Option<Caixa>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let caixa = conn
        .query_row(
            &format!(
                "SELECT {CAIXA_COLUMNS} FROM caixas
                 WHERE user_id = ?1 AND status IN ('open', 'closing')
                 LIMIT 1"
            ),
            params![operator.id],
            row_to_caixa,
        )
        .ok();
    Ok(caixa)
}

/// Fetch a caixa by id, verifying operator ownership.
fn get_owned_caixa(
    conn: &rusqlite::Connection,
    operator: &Operator,
    caixa_id: &str,
) -> Result<Caixa, String> {
    let caixa = conn
        .query_row(
            &format!("SELECT {CAIXA_COLUMNS} FROM caixas WHERE id = ?1"),
            params![caixa_id],
            row_to_caixa,
        )
        .map_err(|_| format!("Caixa not found: {caixa_id}"))?;

    if caixa.user_id != operator.id {
        return Err(format!(
            "Caixa {caixa_id} does not belong to operator {}",
            operator.matricula
        ));
    }
    Ok(caixa)
}

// ---------------------------------------------------------------------------
// Record lancamento
// ---------------------------------------------------------------------------

/// Record a manual fare entry against an open caixa and enqueue its
/// thermal receipt, in one transaction.
pub fn record_lancamento(
    db: &DbState,
    operator: &Operator,
    caixa_id: &str,
    novo: &NovoLancamento,
) -> Result<Lancamento, String> {
    let tipo_validador = novo.tipo_validador.trim();
    if tipo_validador.is_empty() {
        return Err("Tipo de validador is required".into());
    }
    let prefixo = novo.prefixo.trim();
    if prefixo.is_empty()
        || prefixo.len() > 3
        || !prefixo.chars().all(|c| c.is_ascii_digit())
    {
        return Err("Prefixo must be 1 to 3 digits".into());
    }
    if novo.qtd_bordos < 1 {
        return Err("Quantidade de bordos must be at least 1".into());
    }
    let motorista = novo.matricula_motorista.trim();
    if motorista.is_empty() || !motorista.chars().all(|c| c.is_ascii_digit()) {
        return Err("Matricula do motorista must contain only digits".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    // Replayed submit: return the row the first submit created.
    if let Some(key) = novo.idempotency_key.as_deref() {
        let existing = conn
            .query_row(
                &format!("SELECT {LANCAMENTO_COLUMNS} FROM lancamentos WHERE idempotency_key = ?1"),
                params![key],
                row_to_lancamento,
            )
            .ok();
        if let Some(lanc) = existing {
            warn!(key = %key, lancamento_id = %lanc.id, "duplicate submit ignored");
            return Ok(lanc);
        }
    }

    let caixa = get_owned_caixa(&conn, operator, caixa_id)?;
    if caixa.status != CaixaStatus::Open {
        return Err(format!(
            "Caixa {caixa_id} is not open (status: {})",
            caixa.status.as_str()
        ));
    }

    let valor = novo.qtd_bordos as f64 * db::tarifa_unitaria(&conn);
    let data_caixa = novo
        .data_caixa
        .clone()
        .unwrap_or_else(|| caixa.data_caixa.clone());

    let lanc = Lancamento {
        id: Uuid::new_v4().to_string(),
        caixa_id: caixa_id.to_string(),
        tipo_validador: tipo_validador.to_string(),
        prefixo: prefixo.to_string(),
        qtd_bordos: novo.qtd_bordos,
        valor,
        matricula_motorista: motorista.to_string(),
        matricula_recebedor: operator.matricula.clone(),
        data_caixa,
        created_at: Utc::now().to_rfc3339(),
    };

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| format!("begin transaction: {e}"))?;

    let result = (|| -> Result<(), String> {
        conn.execute(
            "INSERT INTO lancamentos (
                id, caixa_id, tipo_validador, prefixo, qtd_bordos, valor,
                matricula_motorista, matricula_recebedor, data_caixa,
                idempotency_key, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                lanc.id,
                lanc.caixa_id,
                lanc.tipo_validador,
                lanc.prefixo,
                lanc.qtd_bordos,
                lanc.valor,
                lanc.matricula_motorista,
                lanc.matricula_recebedor,
                lanc.data_caixa,
                novo.idempotency_key,
                lanc.created_at,
            ],
        )
        .map_err(|e| format!("insert lancamento: {e}"))?;

        let recibo = ReciboDoc::from_lancamento(&lanc);
        let bytes = receipt::render_recibo(&recibo);
        print::enqueue_receipt_tx(&conn, &lanc.id, &bytes)?;

        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| format!("commit: {e}"))?;
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    }

    info!(
        lancamento_id = %lanc.id,
        caixa_id = %caixa_id,
        valor = %lanc.valor,
        "lancamento recorded"
    );

    Ok(lanc)
}

// ---------------------------------------------------------------------------
// Record sangria
// ---------------------------------------------------------------------------

/// Record a cash withdrawal against an open caixa.
pub fn record_sangria(
    db: &DbState,
    operator: &Operator,
    caixa_id: &str,
    nova: &NovaSangria,
) -> Result<Sangria, String> {
    if !nova.valor.is_finite() || nova.valor <= 0.0 {
        return Err("Valor must be a positive amount".into());
    }
    let motivo = nova.motivo.trim();
    if motivo.is_empty() {
        return Err("Motivo is required".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    if let Some(key) = nova.idempotency_key.as_deref() {
        let existing = conn
            .query_row(
                &format!("SELECT {SANGRIA_COLUMNS} FROM sangrias WHERE idempotency_key = ?1"),
                params![key],
                row_to_sangria,
            )
            .ok();
        if let Some(sangria) = existing {
            warn!(key = %key, sangria_id = %sangria.id, "duplicate submit ignored");
            return Ok(sangria);
        }
    }

    let caixa = get_owned_caixa(&conn, operator, caixa_id)?;
    if caixa.status != CaixaStatus::Open {
        return Err(format!(
            "Caixa {caixa_id} is not open (status: {})",
            caixa.status.as_str()
        ));
    }

    let sangria = Sangria {
        id: Uuid::new_v4().to_string(),
        caixa_id: caixa_id.to_string(),
        valor: nova.valor,
        motivo: motivo.to_string(),
        created_at: Utc::now().to_rfc3339(),
    };

    conn.execute(
        "INSERT INTO sangrias (id, caixa_id, valor, motivo, idempotency_key, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            sangria.id,
            sangria.caixa_id,
            sangria.valor,
            sangria.motivo,
            nova.idempotency_key,
            sangria.created_at,
        ],
    )
    .map_err(|e| format!("insert sangria: {e}"))?;

    info!(
        sangria_id = %sangria.id,
        caixa_id = %caixa_id,
        valor = %sangria.valor,
        "sangria recorded"
    );

    Ok(sangria)
}

// ---------------------------------------------------------------------------
// Close
// ---------------------------------------------------------------------------

/// Close the operator's caixa: mark the closing intent, generate the
/// closing PDF, then flip to `closed`.
///
/// A failure while generating the report leaves the caixa in `closing`;
/// [`resume_close`] finishes the sequence later.
pub fn close_caixa(
    db: &DbState,
    operator: &Operator,
    caixa_id: &str,
    out_dir: &Path,
) -> Result<(Caixa, PathBuf), String> {
    // Phase 1: mark the intent. Only an open caixa may enter closing.
    {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        let caixa = get_owned_caixa(&conn, operator, caixa_id)?;
        match caixa.status {
            CaixaStatus::Open => {}
            CaixaStatus::Closing => {
                // Interrupted close; fall through to the report phase.
                warn!(caixa_id = %caixa_id, "resuming interrupted close");
            }
            CaixaStatus::Closed => {
                return Err(format!("Caixa {caixa_id} is already closed"));
            }
        }

        if caixa.status == CaixaStatus::Open {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE caixas SET status = 'closing', updated_at = ?1
                 WHERE id = ?2 AND status = 'open'",
                params![now, caixa_id],
            )
            .map_err(|e| format!("mark caixa closing: {e}"))?;
        }
    }

    finish_close(db, operator, caixa_id, out_dir)
}

/// Finish a close whose intent is already marked: generate the report and
/// flip `closing -> closed`. Idempotent per caixa id.
fn finish_close(
    db: &DbState,
    operator: &Operator,
    caixa_id: &str,
    out_dir: &Path,
) -> Result<(Caixa, PathBuf), String> {
    // Phase 2: generate the closing document (read-only over the ledger).
    let doc = report::build_closing_doc(db, caixa_id)?;
    let pdf_path = report::write_closing_pdf(&doc, out_dir)?;

    // Phase 3: the status flip is the commit point.
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let now = Utc::now().to_rfc3339();
    let updated = conn
        .execute(
            "UPDATE caixas SET status = 'closed', closed_at = ?1, report_path = ?2, updated_at = ?1
             WHERE id = ?3 AND status = 'closing'",
            params![now, pdf_path.to_string_lossy(), caixa_id],
        )
        .map_err(|e| format!("close caixa: {e}"))?;
    if updated != 1 {
        return Err(format!("Caixa {caixa_id} was not in closing state"));
    }

    let caixa = get_owned_caixa(&conn, operator, caixa_id)?;

    info!(
        caixa_id = %caixa_id,
        report = %pdf_path.display(),
        "caixa closed"
    );

    Ok((caixa, pdf_path))
}

/// Resume a close interrupted between the intent mark and the status flip.
///
/// Returns `Ok(None)` when the operator has no caixa stuck in `closing`.
pub fn resume_close(
    db: &DbState,
    operator: &Operator,
    out_dir: &Path,
) -> Result<Option<(Caixa, PathBuf)>, String> {
    let stuck = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        conn.query_row(
            &format!(
                "SELECT {CAIXA_COLUMNS} FROM caixas
                 WHERE user_id = ?1 AND status = 'closing'
                 LIMIT 1"
            ),
            params![operator.id],
            row_to_caixa,
        )
        .ok()
    };

    match stuck {
        Some(caixa) => finish_close(db, operator, &caixa.id, out_dir).map(Some),
        None => Ok(None),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
