//! Ledger aggregation for a caixa: retrieval in insertion order, running
//! totals, and the on-screen text summary.
//!
//! Retrieval order is `created_at ASC, rowid ASC` — insertion order is both
//! the display order and the order totals accumulate in. Totals are plain
//! f64 sums; rounding happens only at display formatting.

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::caixa::{
    row_to_lancamento, row_to_sangria, Caixa, Lancamento, Sangria, LANCAMENTO_COLUMNS,
    SANGRIA_COLUMNS,
};
use crate::db::DbState;

/// A caixa with its full ledger and computed totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaixaLedger {
    pub caixa: Caixa,
    pub operador_nome: String,
    pub operador_matricula: String,
    pub lancamentos: Vec<Lancamento>,
    pub sangrias: Vec<Sangria>,
    pub total_lancamentos: f64,
    pub total_sangrias: f64,
    pub saldo: f64,
}

/// Format a monetary amount the pt-BR way: `R$ 1234,56`.
pub fn format_brl(valor: f64) -> String {
    format!("R$ {:.2}", valor).replace('.', ",")
}

/// Load the caixa header and its complete ledger.
///
/// Only rows belonging to `caixa_id` are read; entries of other caixas
/// never contaminate the totals.
pub fn load_ledger(db: &DbState, caixa_id: &str) -> Result<CaixaLedger, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let (caixa, operador_nome, operador_matricula) = conn
        .query_row(
            "SELECT c.id, c.user_id, c.status, c.data_caixa, c.opened_at,
                    c.closed_at, c.report_path, u.nome, u.matricula
             FROM caixas c
             JOIN users u ON u.id = c.user_id
             WHERE c.id = ?1",
            params![caixa_id],
            |row| {
                let caixa = crate::caixa::row_to_caixa(row)?;
                Ok((caixa, row.get::<_, String>(7)?, row.get::<_, String>(8)?))
            },
        )
        .map_err(|_| format!("Caixa not found: {caixa_id}"))?;

    let mut lanc_stmt = conn
        .prepare(&format!(
            "SELECT {LANCAMENTO_COLUMNS} FROM lancamentos
             WHERE caixa_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))
        .map_err(|e| format!("prepare lancamentos: {e}"))?;

    let lancamentos: Vec<Lancamento> = lanc_stmt
        .query_map(params![caixa_id], row_to_lancamento)
        .map_err(|e| format!("query lancamentos: {e}"))?
        .filter_map(|r| r.ok())
        .collect();

    let mut sang_stmt = conn
        .prepare(&format!(
            "SELECT {SANGRIA_COLUMNS} FROM sangrias
             WHERE caixa_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))
        .map_err(|e| format!("prepare sangrias: {e}"))?;

    let sangrias: Vec<Sangria> = sang_stmt
        .query_map(params![caixa_id], row_to_sangria)
        .map_err(|e| format!("query sangrias: {e}"))?
        .filter_map(|r| r.ok())
        .collect();

    let total_lancamentos: f64 = lancamentos.iter().map(|l| l.valor).sum();
    let total_sangrias: f64 = sangrias.iter().map(|s| s.valor).sum();
    let saldo = total_lancamentos - total_sangrias;

    Ok(CaixaLedger {
        caixa,
        operador_nome,
        operador_matricula,
        lancamentos,
        sangrias,
        total_lancamentos,
        total_sangrias,
        saldo,
    })
}

/// Render the ledger as a plain-text summary.
///
/// Pure function of its input: the same ledger always yields byte-identical
/// text.
pub fn render_summary(ledger: &CaixaLedger) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "CAIXA - {} (matricula {})\n",
        ledger.operador_nome, ledger.operador_matricula
    ));
    out.push_str(&format!("Data do caixa: {}\n", ledger.caixa.data_caixa));
    out.push_str(&format!("Status: {}\n", ledger.caixa.status.as_str()));
    out.push_str("------------------------------------------------------------\n");

    out.push_str("LANCAMENTOS\n");
    if ledger.lancamentos.is_empty() {
        out.push_str("  (nenhum)\n");
    }
    for l in &ledger.lancamentos {
        out.push_str(&format!(
            "  {} | prefixo {} | {} | {} bordos | {} | motorista {}\n",
            l.data_caixa,
            l.prefixo,
            l.tipo_validador,
            l.qtd_bordos,
            format_brl(l.valor),
            l.matricula_motorista
        ));
    }

    out.push_str("SANGRIAS\n");
    if ledger.sangrias.is_empty() {
        out.push_str("  (nenhuma)\n");
    }
    for s in &ledger.sangrias {
        out.push_str(&format!("  {} | {}\n", format_brl(s.valor), s.motivo));
    }

    out.push_str("------------------------------------------------------------\n");
    out.push_str(&format!(
        "Total lancamentos: {}\n",
        format_brl(ledger.total_lancamentos)
    ));
    out.push_str(&format!(
        "Total sangrias:    {}\n",
        format_brl(ledger.total_sangrias)
    ));
    out.push_str(&format!("Saldo:             {}\n", format_brl(ledger.saldo)));

    out
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caixa::{open_caixa, record_lancamento, record_sangria, NovaSangria, NovoLancamento};
    use crate::db::test_db_state;
    use crate::test_support::insert_operator;

    fn novo(qtd: i64, prefixo: &str) -> NovoLancamento {
        NovoLancamento {
            tipo_validador: "PRODATA".into(),
            prefixo: prefixo.into(),
            qtd_bordos: qtd,
            matricula_motorista: "7788".into(),
            ..Default::default()
        }
    }

    #[test]
    fn totals_follow_scenario_a_and_b() {
        let db = test_db_state();
        let op = insert_operator(&db, "Ana", "4211");
        let caixa = open_caixa(&db, &op).expect("open");

        // Scenario A: 3 bordos at the default R$ 5,00 tarifa.
        record_lancamento(&db, &op, &caixa.id, &novo(3, "101")).expect("lancamento");
        let ledger = load_ledger(&db, &caixa.id).expect("ledger");
        assert!((ledger.total_lancamentos - 15.0).abs() < 1e-9);
        assert!((ledger.saldo - 15.0).abs() < 1e-9);
        let text = render_summary(&ledger);
        assert!(text.contains("R$ 15,00"), "summary: {text}");

        // Scenario B: sangria of R$ 5,00 for change.
        record_sangria(
            &db,
            &op,
            &caixa.id,
            &NovaSangria { valor: 5.0, motivo: "troco".into(), ..Default::default() },
        )
        .expect("sangria");
        let ledger = load_ledger(&db, &caixa.id).expect("ledger");
        assert!((ledger.total_sangrias - 5.0).abs() < 1e-9);
        assert!((ledger.saldo - 10.0).abs() < 1e-9);
        let text = render_summary(&ledger);
        assert!(text.contains("Total sangrias:    R$ 5,00"), "summary: {text}");
        assert!(text.contains("Saldo:             R$ 10,00"), "summary: {text}");
    }

    #[test]
    fn other_sessions_never_contaminate_totals() {
        let db = test_db_state();
        let ana = insert_operator(&db, "Ana", "4211");
        let bia = insert_operator(&db, "Bia", "4212");
        let caixa_ana = open_caixa(&db, &ana).expect("open ana");
        let caixa_bia = open_caixa(&db, &bia).expect("open bia");

        record_lancamento(&db, &ana, &caixa_ana.id, &novo(2, "101")).expect("ana");
        record_lancamento(&db, &bia, &caixa_bia.id, &novo(7, "202")).expect("bia");

        let ledger = load_ledger(&db, &caixa_ana.id).expect("ledger");
        assert_eq!(ledger.lancamentos.len(), 1);
        assert!((ledger.total_lancamentos - 10.0).abs() < 1e-9);
    }

    #[test]
    fn line_order_matches_insertion_order() {
        let db = test_db_state();
        let op = insert_operator(&db, "Ana", "4211");
        let caixa = open_caixa(&db, &op).expect("open");

        for prefixo in ["111", "222", "333"] {
            record_lancamento(&db, &op, &caixa.id, &novo(1, prefixo)).expect("lancamento");
        }

        let ledger = load_ledger(&db, &caixa.id).expect("ledger");
        let prefixos: Vec<&str> = ledger.lancamentos.iter().map(|l| l.prefixo.as_str()).collect();
        assert_eq!(prefixos, vec!["111", "222", "333"]);
    }

    #[test]
    fn render_summary_is_idempotent() {
        let db = test_db_state();
        let op = insert_operator(&db, "Ana", "4211");
        let caixa = open_caixa(&db, &op).expect("open");
        record_lancamento(&db, &op, &caixa.id, &novo(3, "101")).expect("lancamento");
        record_sangria(
            &db,
            &op,
            &caixa.id,
            &NovaSangria { valor: 2.5, motivo: "troco".into(), ..Default::default() },
        )
        .expect("sangria");

        let first = render_summary(&load_ledger(&db, &caixa.id).expect("ledger"));
        let second = render_summary(&load_ledger(&db, &caixa.id).expect("ledger"));
        assert_eq!(first, second, "no intervening writes: byte-identical text");
    }

    #[test]
    fn format_brl_uses_comma_decimal_separator() {
        assert_eq!(format_brl(15.0), "R$ 15,00");
        assert_eq!(format_brl(0.5), "R$ 0,50");
        assert_eq!(format_brl(1234.567), "R$ 1234,57");
    }
}
