//! Whitelist text format.
//!
//! UTF-8 text, one rule per line. Blank lines and lines starting with `#` are
//! skipped. A trailing `.*` marks a rule that includes descendants. Readers
//! skip malformed lines with a warning; [`parse_line`] reports them.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{BoxError, Result};
use crate::whitelist::rule::{DeclarationId, WhitelistRule};

const DESCENDANTS_SUFFIX: &str = ".*";
const BOM: char = '\u{feff}';

/// Parse a single line. Returns `Ok(None)` for blank and comment lines.
///
/// `line_no` is 1-based and only used for error reporting.
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<WhitelistRule>> {
    let line = line.trim_start_matches(BOM).trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (id, include_descendants) = match line.strip_suffix(DESCENDANTS_SUFFIX) {
        Some(stripped) => (stripped, true),
        None => (line, false),
    };

    let declaration_id = DeclarationId::parse(id).map_err(|_| BoxError::MalformedRule {
        line: line_no,
        text: line.to_string(),
    })?;

    Ok(Some(WhitelistRule::new(declaration_id, include_descendants)))
}

/// Parse a line, logging and dropping it if it is malformed.
fn parse_line_or_skip(line: &str, line_no: usize) -> Option<WhitelistRule> {
    match parse_line(line, line_no) {
        Ok(rule) => rule,
        Err(err) => {
            tracing::warn!(line = line_no, error = %err, "skipping whitelist rule");
            None
        }
    }
}

/// Parse every well-formed rule in `text`.
pub fn parse_rules(text: &str) -> Result<Vec<WhitelistRule>> {
    Ok(text
        .lines()
        .enumerate()
        .filter_map(|(i, line)| parse_line_or_skip(line, i + 1))
        .collect())
}

/// Read every well-formed rule from an async stream. Only I/O and encoding
/// errors fail the read.
pub async fn read_rules<R>(reader: R) -> Result<Vec<WhitelistRule>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut rules = Vec::new();
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        rules.extend(parse_line_or_skip(&line, line_no));
    }

    Ok(rules)
}

/// Render rules in the text format, one per line.
pub fn format_rules<'a>(rules: impl IntoIterator<Item = &'a WhitelistRule>) -> String {
    let mut out = String::new();
    for rule in rules {
        out.push_str(&rule.to_string());
        out.push('\n');
    }
    out
}

/// Write rules to an async stream in the text format, without a BOM.
pub async fn write_rules<'a, W>(
    writer: &mut W,
    rules: impl IntoIterator<Item = &'a WhitelistRule>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for rule in rules {
        writer.write_all(rule.declaration_id.as_str().as_bytes()).await?;
        if rule.include_descendants {
            writer.write_all(DESCENDANTS_SUFFIX.as_bytes()).await?;
        }
        writer.write_all(b"\n").await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Blocking counterpart of [`write_rules`].
pub fn write_rules_blocking<'a, W>(
    writer: &mut W,
    rules: impl IntoIterator<Item = &'a WhitelistRule>,
) -> Result<()>
where
    W: std::io::Write,
{
    writer.write_all(format_rules(rules).as_bytes())?;
    writer.flush()?;
    Ok(())
}
