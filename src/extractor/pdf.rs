//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트를 사용하여 PDF에서 페이지별 텍스트를 추출합니다.

use std::path::Path;

use crate::error::{RagError, Result};

/// PDF에서 페이지별 텍스트 추출
///
/// 페이지 순서대로 텍스트 벡터를 반환합니다. 빈 페이지도 자리를 유지하므로
/// 인덱스 + 1이 곧 페이지 번호입니다. (블로킹 함수)
pub fn extract_text_from_pdf(path: &Path) -> Result<Vec<String>> {
    let extraction_error = |message: String| RagError::Extraction {
        path: path.to_path_buf(),
        message,
    };

    let bytes = std::fs::read(path).map_err(|e| extraction_error(e.to_string()))?;

    let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
        .map_err(|e| extraction_error(e.to_string()))?;
    let pages: Vec<String> = pages.iter().map(|p| p.trim().to_string()).collect();

    // 텍스트가 비어있으면 경고
    if pages.iter().all(|p| p.is_empty()) {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        if pages.is_empty() {
            return Ok(vec![String::new()]);
        }
    }

    Ok(pages)
}

/// 페이지마다 한 줄씩 Helvetica 텍스트를 찍은 최소 PDF
#[cfg(test)]
pub(crate) fn sample_pdf(pages: &[&str]) -> Vec<u8> {
    let page_count = pages.len();
    let font_id = 3 + 2 * page_count;

    let mut objects: Vec<String> = Vec::new();
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    let kids: Vec<String> = (0..page_count).map(|i| format!("{} 0 R", 3 + 2 * i)).collect();
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        page_count
    ));

    for (i, text) in pages.iter().enumerate() {
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R \
             /Resources << /Font << /F1 {} 0 R >> >> >>",
            4 + 2 * i,
            font_id
        ));
        let content = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text);
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            content.len(),
            content
        ));
    }
    objects.push(
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_string(),
    );

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref_at = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_at
        )
        .as_bytes(),
    );
    out
}

// ============================================================================
// Tests
// ============================================================================
