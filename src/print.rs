//! Print spooler for thermal receipts.
//!
//! Receipt payloads are enqueued into the `print_jobs` table in the same
//! transaction as the entry they belong to, then flushed to the spool
//! directory (the hand-off point to the physical print surface) as raw
//! ESC/POS files. A job is marked `printed` or `failed`; failed jobs stay
//! visible for manual re-attempt.

use chrono::Utc;
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DbState;

/// A pending or settled print job.
#[derive(Debug, Clone)]
pub struct PrintJob {
    pub id: String,
    pub job_type: String,
    pub entity_id: String,
    pub status: String,
    pub error: Option<String>,
    pub created_at: String,
}

/// Enqueue a receipt payload inside the caller's open transaction.
pub fn enqueue_receipt_tx(conn: &Connection, lancamento_id: &str, payload: &[u8]) -> Result<String, String> {
    let job_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO print_jobs (id, job_type, entity_id, payload, status, created_at)
         VALUES (?1, 'recibo', ?2, ?3, 'pending', ?4)",
        params![job_id, lancamento_id, payload, now],
    )
    .map_err(|e| format!("enqueue print job: {e}"))?;

    Ok(job_id)
}

/// List print jobs, optionally filtered by status.
pub fn list_jobs(db: &DbState, status_filter: Option<&str>) -> Result<Vec<PrintJob>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let (sql, filter) = match status_filter {
        Some(status) => (
            "SELECT id, job_type, entity_id, status, error, created_at
             FROM print_jobs WHERE status = ?1
             ORDER BY created_at ASC, rowid ASC",
            Some(status),
        ),
        None => (
            "SELECT id, job_type, entity_id, status, error, created_at
             FROM print_jobs
             ORDER BY created_at ASC, rowid ASC",
            None,
        ),
    };

    let mut stmt = conn.prepare(sql).map_err(|e| format!("prepare jobs: {e}"))?;

    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<PrintJob> {
        Ok(PrintJob {
            id: row.get(0)?,
            job_type: row.get(1)?,
            entity_id: row.get(2)?,
            status: row.get(3)?,
            error: row.get(4)?,
            created_at: row.get(5)?,
        })
    };

    let rows = match filter {
        Some(status) => stmt
            .query_map(params![status], map_row)
            .map_err(|e| format!("query jobs: {e}"))?
            .filter_map(|r| r.ok())
            .collect(),
        None => stmt
            .query_map([], map_row)
            .map_err(|e| format!("query jobs: {e}"))?
            .filter_map(|r| r.ok())
            .collect(),
    };

    Ok(rows)
}

/// Flush pending jobs to the spool directory.
///
/// Each payload is written as `{spool_dir}/{job_id}.escpos`. Returns the
/// paths written. Jobs whose write fails are marked `failed` with the
/// error and left for manual re-attempt; the flush continues.
pub fn flush_spool(db: &DbState, spool_dir: &Path) -> Result<Vec<PathBuf>, String> {
    fs::create_dir_all(spool_dir).map_err(|e| format!("create spool dir: {e}"))?;

    let pending: Vec<(String, Vec<u8>)> = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        let mut stmt = conn
            .prepare(
                "SELECT id, payload FROM print_jobs WHERE status = 'pending'
                 ORDER BY created_at ASC, rowid ASC",
            )
            .map_err(|e| format!("prepare pending: {e}"))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| format!("query pending: {e}"))?
            .filter_map(|r| r.ok())
            .collect();
        rows
    };

    let mut written = Vec::with_capacity(pending.len());

    for (job_id, payload) in pending {
        let path = spool_dir.join(format!("{job_id}.escpos"));
        match fs::write(&path, &payload) {
            Ok(()) => {
                mark_printed(db, &job_id)?;
                info!(job_id = %job_id, path = %path.display(), "receipt spooled");
                written.push(path);
            }
            Err(e) => {
                warn!(job_id = %job_id, "spool write failed: {e}");
                mark_failed(db, &job_id, &e.to_string())?;
            }
        }
    }

    Ok(written)
}

fn mark_printed(db: &DbState, job_id: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE print_jobs SET status = 'printed', printed_at = ?1 WHERE id = ?2",
        params![now, job_id],
    )
    .map_err(|e| format!("mark job printed: {e}"))?;
    Ok(())
}

fn mark_failed(db: &DbState, job_id: &str, error_msg: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "UPDATE print_jobs SET status = 'failed', error = ?1 WHERE id = ?2",
        params![error_msg, job_id],
    )
    .map_err(|e| format!("mark job failed: {e}"))?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
