//! Minimal ESC/POS binary command builder for thermal receipt printers.
//!
//! Generates raw byte sequences ready to hand to the print spool. Supports
//! text formatting, alignment, Portuguese character encoding (CP860), and
//! paper cutting.

// ESC/POS command bytes
const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;
const LF: u8 = 0x0A;

/// Paper width in characters.
#[derive(Debug, Clone, Copy)]
pub enum PaperWidth {
    Mm58,
    Mm80,
}

impl PaperWidth {
    pub fn chars(self) -> usize {
        match self {
            PaperWidth::Mm58 => 32,
            PaperWidth::Mm80 => 48,
        }
    }
}

/// Builder for generating ESC/POS binary command buffers.
///
/// ```rust,ignore
/// let data = EscPosBuilder::new()
///     .init()
///     .bold(true).text("RECIBO\n").bold(false)
///     .line_pair("Valor", "R$ 15,00")
///     .feed(3)
///     .cut()
///     .build();
/// ```
pub struct EscPosBuilder {
    buffer: Vec<u8>,
    paper: PaperWidth,
}

impl EscPosBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(512),
            paper: PaperWidth::Mm80,
        }
    }

    pub fn with_paper(mut self, paper: PaperWidth) -> Self {
        self.paper = paper;
        self
    }

    /// ESC @ — Initialize printer, then select CP860 (Portuguese).
    pub fn init(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x40]);
        self.code_page(3); // Epson page 3 = PC860
        self
    }

    /// ESC t n — Select character code page.
    pub fn code_page(&mut self, page: u8) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x74, page]);
        self
    }

    /// ESC E n — Bold on/off.
    pub fn bold(&mut self, on: bool) -> &mut Self {
        self.buffer
            .extend_from_slice(&[ESC, 0x45, if on { 1 } else { 0 }]);
        self
    }

    /// GS ! n — Set text size (width × height multiplier, 1–8 each).
    pub fn text_size(&mut self, width: u8, height: u8) -> &mut Self {
        let w = width.clamp(1, 8) - 1;
        let h = height.clamp(1, 8) - 1;
        self.buffer.extend_from_slice(&[GS, 0x21, (w << 4) | h]);
        self
    }

    /// Reset text size to 1×1.
    pub fn normal_size(&mut self) -> &mut Self {
        self.text_size(1, 1)
    }

    /// ESC a 0 — Left-align.
    pub fn left(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, 0]);
        self
    }

    /// ESC a 1 — Centre-align.
    pub fn center(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, 1]);
        self
    }

    /// Append text encoded as CP860.
    pub fn text(&mut self, s: &str) -> &mut Self {
        self.buffer.extend(encode_cp860(s));
        self
    }

    /// Append a line-feed.
    pub fn lf(&mut self) -> &mut Self {
        self.buffer.push(LF);
        self
    }

    /// Print a horizontal separator using dashes, matching paper width.
    pub fn separator(&mut self) -> &mut Self {
        let width = self.paper.chars();
        for _ in 0..width {
            self.buffer.push(b'-');
        }
        self.buffer.push(LF);
        self
    }

    /// Print a line with left-aligned label and right-aligned value.
    pub fn line_pair(&mut self, label: &str, value: &str) -> &mut Self {
        let width = self.paper.chars();
        let gap = width.saturating_sub(label.chars().count() + value.chars().count());
        self.text(label);
        for _ in 0..gap {
            self.buffer.push(b' ');
        }
        self.text(value);
        self.lf()
    }

    /// ESC d n — Feed n lines.
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x64, lines]);
        self
    }

    /// GS V A 16 — Partial cut with 16-dot feed.
    pub fn cut(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[GS, 0x56, 0x41, 0x10]);
        self
    }

    /// Consume the builder and return the binary ESC/POS payload.
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for EscPosBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// CP860 Portuguese character encoding
// ---------------------------------------------------------------------------

/// Encode a string to CP860 bytes. ASCII characters pass through;
/// Portuguese accented characters are mapped to their CP860 byte values.
/// Unknown characters are replaced with `?` (0x3F).
fn encode_cp860(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len());
    for ch in text.chars() {
        let code = ch as u32;
        // ASCII printable + control chars (LF, CR, etc.)
        if code < 0x80 {
            bytes.push(code as u8);
            continue;
        }
        if let Some(b) = accented_to_cp860(ch) {
            bytes.push(b);
        } else {
            bytes.push(b'?');
        }
    }
    bytes
}

/// Map a Unicode accented character to its CP860 byte value.
fn accented_to_cp860(ch: char) -> Option<u8> {
    match ch {
        'Ç' => Some(0x80),
        'ü' => Some(0x81),
        'é' => Some(0x82),
        'â' => Some(0x83),
        'ã' => Some(0x84),
        'à' => Some(0x85),
        'Á' => Some(0x86),
        'ç' => Some(0x87),
        'ê' => Some(0x88),
        'Ê' => Some(0x89),
        'è' => Some(0x8A),
        'Í' => Some(0x8B),
        'Ô' => Some(0x8C),
        'ì' => Some(0x8D),
        'Ã' => Some(0x8E),
        'Â' => Some(0x8F),
        'É' => Some(0x90),
        'À' => Some(0x91),
        'È' => Some(0x92),
        'ô' => Some(0x93),
        'õ' => Some(0x94),
        'ò' => Some(0x95),
        'Ú' => Some(0x96),
        'ù' => Some(0x97),
        'Ì' => Some(0x98),
        'Õ' => Some(0x99),
        'Ü' => Some(0x9A),
        'Ù' => Some(0x9D),
        'Ó' => Some(0x9F),
        'á' => Some(0xA0),
        'í' => Some(0xA1),
        'ó' => Some(0xA2),
        'ú' => Some(0xA3),
        'ñ' => Some(0xA4),
        'Ñ' => Some(0xA5),
        'ª' => Some(0xA6),
        'º' => Some(0xA7),
        _ => None,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_selects_portuguese_code_page() {
        let mut b = EscPosBuilder::new();
        b.init();
        let bytes = b.build();
        assert_eq!(bytes, vec![0x1B, 0x40, 0x1B, 0x74, 3]);
    }

    #[test]
    fn portuguese_accents_map_to_cp860() {
        assert_eq!(encode_cp860("matrícula"), b"matr\xA1cula".to_vec());
        assert_eq!(encode_cp860("Ação"), vec![b'A', 0x87, 0x84, b'o']);
        assert_eq!(encode_cp860("Ω"), vec![b'?']);
    }

    #[test]
    fn line_pair_pads_to_paper_width() {
        let mut b = EscPosBuilder::new().with_paper(PaperWidth::Mm58);
        b.line_pair("Valor", "R$ 15,00");
        let bytes = b.build();
        let line = String::from_utf8(bytes).expect("ascii line");
        assert_eq!(line.len(), 32 + 1, "label + pad + value + LF");
        assert!(line.starts_with("Valor"));
        assert!(line.ends_with("R$ 15,00\n"));
    }

    #[test]
    fn separator_matches_paper_width() {
        let mut b = EscPosBuilder::new().with_paper(PaperWidth::Mm80);
        b.separator();
        let bytes = b.build();
        assert_eq!(bytes.len(), 48 + 1);
        assert!(bytes[..48].iter().all(|&c| c == b'-'));
    }
}
