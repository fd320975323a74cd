//! Text extraction for the formats the loader accepts.
//!
//! Extraction never panics: a malformed file yields an [`ExtractError`] and
//! the loader skips it.

/// Extraction error for a single file.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("file too small ({size} bytes, minimum {min})")]
    TooSmall { size: u64, min: u64 },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("CSV parsing failed: {0}")]
    Csv(String),
}

/// Decode file bytes as UTF-8, falling back to ISO-8859-1.
///
/// ISO-8859-1 maps every byte to the code point of the same value, so the
/// fallback cannot fail. Windows-1252 punctuation (`0x80..=0x9F`) comes
/// through as the matching C1 code points.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.strip_prefix('\u{feff}').unwrap_or(s).to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Extract the text of each PDF page, in page order.
///
/// pdf-extract panics on some malformed inputs; a panic is reported as an
/// ordinary extraction error.
pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }));
    match result {
        Ok(pages) => pages.map_err(|e| ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("parser panicked".to_string())),
    }
}

/// Parse CSV bytes into one `header: value` block per row.
///
/// Every record yields a block, including one whose cells are all empty;
/// an empty cell renders as a bare `header:` line.
pub fn extract_csv_rows(bytes: &[u8]) -> Result<Vec<(u64, String)>, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ExtractError::Csv(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| ExtractError::Csv(e.to_string()))?;
        let lines: Vec<String> = record
            .iter()
            .enumerate()
            .map(|(i, value)| match headers.get(i) {
                Some(h) if !h.is_empty() => format!("{}: {}", h, value.trim()).trim_end().to_string(),
                _ => value.trim().to_string(),
            })
            .collect();
        rows.push((row as u64, lines.join("\n")));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_passes_through() {
        assert_eq!(decode_text("épée légendaire".as_bytes()), "épée légendaire");
    }

    #[test]
    fn utf8_bom_is_stripped() {
        let bytes = b"\xef\xbb\xbfquest";
        assert_eq!(decode_text(bytes), "quest");
    }

    #[test]
    fn latin1_fallback() {
        // "épée" in ISO-8859-1
        let bytes = [0xe9, b'p', 0xe9, b'e'];
        assert_eq!(decode_text(&bytes), "épée");
    }

    #[test]
    fn windows_1252_text_is_kept() {
        // ’ (0x92) and € (0x80) are outside ISO-8859-1 proper.
        let bytes = b"Quete: l\x92\xe9p\xe9e co\xfbte 5 \x80 au marchand.";
        let text = decode_text(bytes);
        assert_eq!(text.chars().count(), bytes.len());
        assert!(text.starts_with("Quete: l\u{92}épée coûte 5 \u{80}"));
        assert!(text.ends_with("au marchand."));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pdf_pages(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn csv_rows_render_headers() {
        let data = b"title,reward\nThe Lost Sword,100 gold\n,\nHeal the Elder,potion\n";
        let rows = extract_csv_rows(data).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], (0, "title: The Lost Sword\nreward: 100 gold".to_string()));
        assert_eq!(rows[2], (2, "title: Heal the Elder\nreward: potion".to_string()));
    }

    #[test]
    fn blank_rows_still_yield_a_block() {
        let rows = extract_csv_rows(b"title,reward
,
Find the sword,
").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], (0, "title:\nreward:".to_string()));
        assert_eq!(rows[1], (1, "title: Find the sword\nreward:".to_string()));
    }
}
