//! Thermal receipt for a recorded fare entry.
//!
//! Mirrors the paper receipt handed to the driver: entry details, caixa
//! date, amount, and a signature line for the receiving operator.

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::caixa::Lancamento;
use crate::escpos::EscPosBuilder;
use crate::ledger::format_brl;

/// Document for one manual payment receipt.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReciboDoc {
    pub tipo_validador: String,
    pub prefixo: String,
    pub qtd_bordos: i64,
    pub valor: f64,
    pub matricula_motorista: String,
    pub matricula_recebedor: String,
    pub data_caixa: String,
    pub data_recebimento: String,
}

impl ReciboDoc {
    /// Build the receipt document for a just-recorded entry, stamped with
    /// the local receiving time.
    pub fn from_lancamento(lanc: &Lancamento) -> Self {
        Self {
            tipo_validador: lanc.tipo_validador.clone(),
            prefixo: lanc.prefixo.clone(),
            qtd_bordos: lanc.qtd_bordos,
            valor: lanc.valor,
            matricula_motorista: lanc.matricula_motorista.clone(),
            matricula_recebedor: lanc.matricula_recebedor.clone(),
            data_caixa: lanc.data_caixa.clone(),
            data_recebimento: Local::now().format("%d/%m/%Y %H:%M:%S").to_string(),
        }
    }
}

/// Render the receipt as an ESC/POS payload.
pub fn render_recibo(doc: &ReciboDoc) -> Vec<u8> {
    let mut b = EscPosBuilder::new();
    b.init();

    b.bold(true)
        .text("RECIBO DE PAGAMENTO MANUAL")
        .bold(false)
        .lf();
    b.separator();

    b.line_pair("Matricula Motorista:", &doc.matricula_motorista);
    b.line_pair("Tipo de Validador:", &doc.tipo_validador);
    b.line_pair("Prefixo:", &doc.prefixo);
    b.separator();

    b.line_pair("Data do Caixa:", &doc.data_caixa);
    b.line_pair("Quantidade bordos:", &doc.qtd_bordos.to_string());
    b.line_pair("Valor:", &format_brl(doc.valor));
    b.separator();

    b.line_pair("Matricula Recebedor:", &doc.matricula_recebedor);
    b.line_pair("Data Recebimento:", &doc.data_recebimento);
    b.lf();

    b.text("Assinatura Recebedor:").lf().lf();
    b.text("______________________________").lf();

    b.feed(3).cut();
    b.build()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    fn sample_doc() -> ReciboDoc {
        ReciboDoc {
            tipo_validador: "PRODATA".into(),
            prefixo: "123".into(),
            qtd_bordos: 3,
            valor: 15.0,
            matricula_motorista: "7788".into(),
            matricula_recebedor: "4211".into(),
            data_caixa: "03/02/2026".into(),
            data_recebimento: "03/02/2026 14:05:33".into(),
        }
    }

    #[test]
    fn receipt_carries_every_field_of_the_entry() {
        let bytes = render_recibo(&sample_doc());

        assert!(contains(&bytes, b"RECIBO DE PAGAMENTO MANUAL"));
        assert!(contains(&bytes, b"7788"));
        assert!(contains(&bytes, b"PRODATA"));
        assert!(contains(&bytes, b"123"));
        assert!(contains(&bytes, b"03/02/2026"));
        assert!(contains(&bytes, b"R$ 15,00"));
        assert!(contains(&bytes, b"4211"));
        assert!(contains(&bytes, b"Assinatura Recebedor:"));
    }

    #[test]
    fn receipt_starts_with_init_and_ends_with_cut() {
        let bytes = render_recibo(&sample_doc());
        assert!(bytes.starts_with(&[0x1B, 0x40]));
        assert!(bytes.ends_with(&[0x1D, 0x56, 0x41, 0x10]));
    }

    #[test]
    fn from_lancamento_copies_entry_fields() {
        let lanc = Lancamento {
            id: "l1".into(),
            caixa_id: "c1".into(),
            tipo_validador: "DIGICON".into(),
            prefixo: "55".into(),
            qtd_bordos: 2,
            valor: 10.0,
            matricula_motorista: "9900".into(),
            matricula_recebedor: "4211".into(),
            data_caixa: "03/02/2026".into(),
            created_at: "2026-02-03T17:05:33Z".into(),
        };
        let doc = ReciboDoc::from_lancamento(&lanc);
        assert_eq!(doc.tipo_validador, "DIGICON");
        assert_eq!(doc.prefixo, "55");
        assert_eq!(doc.qtd_bordos, 2);
        assert!((doc.valor - 10.0).abs() < 1e-9);
        assert_eq!(doc.matricula_recebedor, "4211");
        assert!(!doc.data_recebimento.is_empty());
    }
}
