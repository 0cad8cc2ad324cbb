//! HTML rendering of the verdict grid.
//!
//! The report is a single self-contained document: inline stylesheet, no
//! external assets, so it opens correctly in an offline viewer.

use anyhow::Context;
use chrono::Utc;
use std::fs;
use std::path::Path;

use crate::matrix::Matrix;

const STYLESHEET: &str = "\
html {
  box-sizing: border-box;
}

*, *:before, *:after {
  box-sizing: inherit;
}

body {
    background-color: #fff;
    color: #000;
    display: inline-block;
    font-family: 'Open Sans', sans-serif;
    font-weight: 300;
    margin: 0;
    width: 100%;
}

h1 {
    text-align: center;
}

table {
    width: 100%;
}

th {
    font-size: 16px;
    text-align: left;
}

th:first-child {
    text-align: center;
}

.pass {
    color: green;
}

.fail {
    color: red;
}

.error {
    color: darkorange;
}
";

/// Render the matrix into its report document. Row order and column order
/// are whatever the matrix holds (lexicographic tests, declaration-ordered
/// adapters); every cell carries its verdict label and a matching class.
pub fn render_report(matrix: &Matrix) -> String {
    let mut doc = String::new();
    doc.push_str("<!doctype html>");
    doc.push_str("<html>");
    doc.push_str("<head>");
    doc.push_str("<meta charset=\"utf-8\">");
    doc.push_str("<title>WebAssembly System Interface Compatibility Matrix</title>");
    doc.push_str(&format!("<style>{STYLESHEET}</style>"));
    doc.push_str("</head>");
    doc.push_str("<body>");
    doc.push_str("<h1>WebAssembly System Interface Compatibility Matrix</h1>");
    doc.push_str(&format!(
        "<p>generated {}</p>",
        Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
    ));
    doc.push_str("<table>");
    doc.push_str("<thead>");
    doc.push_str("<tr>");
    doc.push_str("<th>Test</th>");
    for adapter in matrix.adapters() {
        doc.push_str(&format!("<th>{}</th>", escape(adapter)));
    }
    doc.push_str("</tr>");
    doc.push_str("</thead>");

    for (test, row) in matrix.rows() {
        doc.push_str("<tr>");
        doc.push_str(&format!("<td>{}</td>", escape(test)));
        for cell in row {
            let label = cell.verdict.label();
            doc.push_str(&format!("<td class='{label}'>{label}</td>"));
        }
        doc.push_str("</tr>");
    }

    doc.push_str("</table>");
    doc.push_str("</body>\n");
    doc.push_str("</html>\n");
    doc
}

pub fn write_report(matrix: &Matrix, path: &Path) -> anyhow::Result<()> {
    let doc = render_report(matrix);
    fs::write(path, doc).with_context(|| format!("cannot write report to {}", path.display()))?;
    Ok(())
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
