//! Closing report for a caixa: a paginated PDF snapshot of the ledger.
//!
//! Pagination is a greedy line-packer: lines flow down the page at a fixed
//! line height and a new page begins once the vertical cursor would cross
//! the bottom margin. Generation is read-only over the ledger and
//! idempotent per caixa id, so an interrupted close can safely re-run it.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::db::DbState;
use crate::ledger::{self, format_brl, CaixaLedger};
use crate::pdfdoc::{PdfBuilder, PAGE_HEIGHT};

// Layout constants (PDF points).
const MARGIN_LEFT: f64 = 50.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_BOTTOM: f64 = 50.0;
const LINE_HEIGHT: f64 = 14.0;
const TITLE_SIZE: f64 = 14.0;
const BODY_SIZE: f64 = 10.0;

/// Everything the closing document needs, assembled from the ledger.
#[derive(Debug, Clone)]
pub struct FechamentoDoc {
    pub ledger: CaixaLedger,
}

/// Assemble the closing document for a caixa.
pub fn build_closing_doc(db: &DbState, caixa_id: &str) -> Result<FechamentoDoc, String> {
    let ledger = ledger::load_ledger(db, caixa_id)?;
    Ok(FechamentoDoc { ledger })
}

/// Report filename: `{matricula}-{dd-mm-yyyy}.pdf`.
pub fn closing_filename(matricula: &str, data_caixa: &str) -> String {
    format!("{matricula}-{}.pdf", data_caixa.replace('/', "-"))
}

/// Flatten the document into report lines, one string per printed line.
fn document_lines(doc: &FechamentoDoc) -> Vec<String> {
    let ledger = &doc.ledger;
    let mut lines = Vec::new();

    lines.push(format!(
        "Operador: {} (matricula {})",
        ledger.operador_nome, ledger.operador_matricula
    ));
    lines.push(format!("Data do caixa: {}", ledger.caixa.data_caixa));
    lines.push(String::new());

    lines.push("LANCAMENTOS".to_string());
    if ledger.lancamentos.is_empty() {
        lines.push("  (nenhum)".to_string());
    }
    for l in &ledger.lancamentos {
        lines.push(format!(
            "  {} | prefixo {} | {} | {} bordos | {} | motorista {}",
            l.data_caixa,
            l.prefixo,
            l.tipo_validador,
            l.qtd_bordos,
            format_brl(l.valor),
            l.matricula_motorista
        ));
    }
    lines.push(String::new());

    lines.push("SANGRIAS".to_string());
    if ledger.sangrias.is_empty() {
        lines.push("  (nenhuma)".to_string());
    }
    for s in &ledger.sangrias {
        lines.push(format!("  {} | {}", format_brl(s.valor), s.motivo));
    }
    lines.push(String::new());

    lines.push(format!("Total lancamentos: {}", format_brl(ledger.total_lancamentos)));
    lines.push(format!("Total sangrias:    {}", format_brl(ledger.total_sangrias)));
    lines.push(format!("Saldo:             {}", format_brl(ledger.saldo)));

    lines
}

/// Greedy line-packer: fill pages top to bottom, flushing to a new page
/// when the next line would fall below the bottom margin.
fn paginate(lines: &[String]) -> Vec<Vec<String>> {
    let mut pages: Vec<Vec<String>> = vec![Vec::new()];
    // The first page starts below the title block.
    let mut cursor = PAGE_HEIGHT - MARGIN_TOP - 2.0 * LINE_HEIGHT;

    for line in lines {
        if cursor - LINE_HEIGHT < MARGIN_BOTTOM {
            pages.push(Vec::new());
            cursor = PAGE_HEIGHT - MARGIN_TOP;
        }
        pages.last_mut().unwrap_or_else(|| unreachable!()).push(line.clone());
        cursor -= LINE_HEIGHT;
    }

    pages
}

/// Render the closing document as PDF bytes.
pub fn render_closing_pdf(doc: &FechamentoDoc) -> Vec<u8> {
    let mut pdf = PdfBuilder::new();

    let lines = document_lines(doc);
    for (i, page) in paginate(&lines).iter().enumerate() {
        pdf.add_page();
        let mut y = PAGE_HEIGHT - MARGIN_TOP;
        if i == 0 {
            pdf.text(MARGIN_LEFT, y, TITLE_SIZE, "FECHAMENTO DE CAIXA");
            y -= 2.0 * LINE_HEIGHT;
        }
        for line in page {
            pdf.text(MARGIN_LEFT, y, BODY_SIZE, line);
            y -= LINE_HEIGHT;
        }
    }

    pdf.build()
}

/// Write the closing PDF under `out_dir`, returning the path.
///
/// The filename is derived from the operator and the caixa date, so
/// re-running for the same caixa overwrites the same file.
pub fn write_closing_pdf(doc: &FechamentoDoc, out_dir: &Path) -> Result<PathBuf, String> {
    fs::create_dir_all(out_dir).map_err(|e| format!("create report dir: {e}"))?;

    let filename = closing_filename(
        &doc.ledger.operador_matricula,
        &doc.ledger.caixa.data_caixa,
    );
    let path = out_dir.join(filename);

    let bytes = render_closing_pdf(doc);
    fs::write(&path, &bytes).map_err(|e| format!("write report {}: {e}", path.display()))?;

    info!(
        caixa_id = %doc.ledger.caixa.id,
        path = %path.display(),
        pages = paginate(&document_lines(doc)).len(),
        "closing report written"
    );

    Ok(path)
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

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    fn novo(qtd: i64) -> NovoLancamento {
        NovoLancamento {
            tipo_validador: "PRODATA".into(),
            prefixo: "101".into(),
            qtd_bordos: qtd,
            matricula_motorista: "7788".into(),
            ..Default::default()
        }
    }

    #[test]
    fn closing_filename_uses_matricula_and_dashed_date() {
        assert_eq!(closing_filename("4211", "03/02/2026"), "4211-03-02-2026.pdf");
    }

    #[test]
    fn closing_document_carries_lines_and_totals() {
        let db = test_db_state();
        let op = insert_operator(&db, "Ana", "4211");
        let caixa = open_caixa(&db, &op).expect("open");
        record_lancamento(&db, &op, &caixa.id, &novo(3)).expect("lancamento");
        record_sangria(
            &db,
            &op,
            &caixa.id,
            &NovaSangria { valor: 5.0, motivo: "troco".into(), ..Default::default() },
        )
        .expect("sangria");

        let doc = build_closing_doc(&db, &caixa.id).expect("doc");
        let bytes = render_closing_pdf(&doc);

        assert!(contains(&bytes, b"FECHAMENTO DE CAIXA"));
        assert!(contains(&bytes, b"motorista 7788"));
        assert!(contains(&bytes, b"troco"));
        assert!(contains(&bytes, b"Total lancamentos: R$ 15,00"));
        assert!(contains(&bytes, b"Total sangrias:    R$ 5,00"));
        assert!(contains(&bytes, b"Saldo:             R$ 10,00"));
    }

    #[test]
    fn long_ledgers_spill_onto_additional_pages() {
        let db = test_db_state();
        let op = insert_operator(&db, "Ana", "4211");
        let caixa = open_caixa(&db, &op).expect("open");
        for _ in 0..80 {
            record_lancamento(&db, &op, &caixa.id, &novo(1)).expect("lancamento");
        }

        let doc = build_closing_doc(&db, &caixa.id).expect("doc");
        let lines = document_lines(&doc);
        let pages = paginate(&lines);
        assert!(pages.len() > 1, "80 entries must not fit a single page");
        assert_eq!(
            pages.iter().map(Vec::len).sum::<usize>(),
            lines.len(),
            "pagination must not drop or duplicate lines"
        );

        let capacity =
            ((PAGE_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM) / LINE_HEIGHT) as usize;
        for page in &pages {
            assert!(page.len() <= capacity, "page overflows printable area");
        }

        let bytes = render_closing_pdf(&doc);
        assert!(contains(&bytes, format!("/Count {}", pages.len()).as_bytes()));
    }

    #[test]
    fn write_closing_pdf_is_idempotent() {
        let db = test_db_state();
        let op = insert_operator(&db, "Ana", "4211");
        let caixa = open_caixa(&db, &op).expect("open");
        record_lancamento(&db, &op, &caixa.id, &novo(2)).expect("lancamento");

        let doc = build_closing_doc(&db, &caixa.id).expect("doc");
        let tmp = tempfile::tempdir().expect("tempdir");

        let first = write_closing_pdf(&doc, tmp.path()).expect("first write");
        let first_bytes = std::fs::read(&first).expect("read first");
        let second = write_closing_pdf(&doc, tmp.path()).expect("second write");
        let second_bytes = std::fs::read(&second).expect("read second");

        assert_eq!(first, second, "same caixa, same path");
        assert_eq!(first_bytes, second_bytes, "same data, same bytes");
    }
}
