//! Minimal PDF 1.4 writer for the caixa closing report.
//!
//! Generates a well-formed single-font document: catalog, page tree,
//! Helvetica with WinAnsi encoding, one content stream per page, and a
//! classic xref table. Text placement is absolute (PDF user space, origin
//! at the bottom-left corner, 72 dpi points).

/// A4 page size in points.
pub const PAGE_WIDTH: f64 = 595.0;
pub const PAGE_HEIGHT: f64 = 842.0;

/// Builder for a paginated text-only PDF document.
///
/// ```rust,ignore
/// let mut pdf = PdfBuilder::new();
/// pdf.add_page();
/// pdf.text(50.0, 790.0, 14.0, "FECHAMENTO DE CAIXA");
/// let bytes = pdf.build();
/// ```
pub struct PdfBuilder {
    pages: Vec<Vec<u8>>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self { pages: Vec::new() }
    }

    /// Start a new page. Subsequent `text` calls land on it.
    pub fn add_page(&mut self) -> &mut Self {
        self.pages.push(Vec::with_capacity(1024));
        self
    }

    /// Place a line of text at `(x, y)` with the given font size.
    /// Creates the first page implicitly if none has been started.
    pub fn text(&mut self, x: f64, y: f64, size: f64, s: &str) -> &mut Self {
        if self.pages.is_empty() {
            self.add_page();
        }
        let content = self.pages.last_mut().unwrap_or_else(|| unreachable!());
        content.extend_from_slice(
            format!("BT /F1 {size:.1} Tf {x:.1} {y:.1} Td (").as_bytes(),
        );
        content.extend(escape_pdf_string(&encode_winansi(s)));
        content.extend_from_slice(b") Tj ET\n");
        self
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Consume the builder and return the PDF file bytes.
    pub fn build(mut self) -> Vec<u8> {
        if self.pages.is_empty() {
            self.add_page();
        }

        // Object layout: 1 catalog, 2 pages, 3 font, then for page i
        // (0-based): page object 4+2i, content stream 5+2i.
        let page_count = self.pages.len();
        let object_count = 3 + 2 * page_count;

        let mut out: Vec<u8> = Vec::with_capacity(4096);
        let mut offsets: Vec<usize> = Vec::with_capacity(object_count);

        out.extend_from_slice(b"%PDF-1.4\n");

        let kids: Vec<String> = (0..page_count).map(|i| format!("{} 0 R", 4 + 2 * i)).collect();

        offsets.push(out.len());
        out.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");

        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "2 0 obj\n<< /Type /Pages /Kids [{}] /Count {} >>\nendobj\n",
                kids.join(" "),
                page_count
            )
            .as_bytes(),
        );

        offsets.push(out.len());
        out.extend_from_slice(
            b"3 0 obj\n<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>\nendobj\n",
        );

        for (i, content) in self.pages.iter().enumerate() {
            let page_obj = 4 + 2 * i;
            let content_obj = 5 + 2 * i;

            offsets.push(out.len());
            out.extend_from_slice(
                format!(
                    "{page_obj} 0 obj\n<< /Type /Page /Parent 2 0 R \
                     /MediaBox [0 0 {PAGE_WIDTH:.0} {PAGE_HEIGHT:.0}] \
                     /Resources << /Font << /F1 3 0 R >> >> \
                     /Contents {content_obj} 0 R >>\nendobj\n"
                )
                .as_bytes(),
            );

            offsets.push(out.len());
            out.extend_from_slice(
                format!("{content_obj} 0 obj\n<< /Length {} >>\nstream\n", content.len())
                    .as_bytes(),
            );
            out.extend_from_slice(content);
            out.extend_from_slice(b"endstream\nendobj\n");
        }

        let xref_offset = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", object_count + 1).as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");
        for offset in &offsets {
            out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
                object_count + 1
            )
            .as_bytes(),
        );

        out
    }
}

impl Default for PdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a string as WinAnsi bytes. ASCII and the Latin-1 block pass
/// through; anything else is replaced with `?`.
fn encode_winansi(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len());
    for ch in text.chars() {
        let code = ch as u32;
        if code < 0x80 || (0xA0..=0xFF).contains(&code) {
            bytes.push(code as u8);
        } else if ch == '€' {
            bytes.push(0x80); // WinAnsi places the Euro sign at 0x80
        } else {
            bytes.push(b'?');
        }
    }
    bytes
}

/// Escape PDF literal-string delimiters in the encoded bytes.
fn escape_pdf_string(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\\' | b'(' | b')' => {
                out.push(b'\\');
                out.push(b);
            }
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            other => out.push(other),
        }
    }
    out
}

// ===========================================================================
// Tests
// ===========================================================================
