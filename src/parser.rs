//! Output table parser: turns a switch CLI transcript into rows.
//!
//! Switch output is column-aligned with variable padding rather than
//! delimited, so columns are split on runs of two or more whitespace
//! characters. A cell that itself contains a double space, or columns
//! separated by a single space, will be mis-split.
//!
//! Transcript shape expected:
//!
//! ```text
//! <banner lines…>
//! switch1>terminal length 0
//! switch1>show mac address-table | exclude -|CPU
//! Vlan    Mac Address       Type        Ports
//! 10      aaaa.bbbb.cccc    DYNAMIC     Gi1/0/1
//! switch1>exit
//! ```

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::driver::RawTranscript;
use crate::error::ParseWarning;
use crate::target::TargetHost;

/// Column name carrying the originating host in serialized rows.
pub const HOST_COLUMN: &str = "hostname";

/// Lines skipped from the first prompt when the first command's echo cannot
/// be found: the paging-disable echo and the first command's echo.
const BANNER_SKIP_LINES: usize = 2;

/// Fewer lines than this from the first prompt on cannot hold a table.
const MIN_TRANSCRIPT_LINES: usize = 3;

/// `<token>>` (user exec) or `<token>#` (privileged exec) at line start.
/// The hostname token starts alphanumeric, so banner art like `==>` is not a prompt.
static PROMPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][^\s>#]*[>#]").expect("valid regex"));

static COLUMN_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("valid regex"));

/// One parsed record: header → cell, plus the host and command it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub host: TargetHost,
    pub command: String,
    pub cells: IndexMap<String, String>,
}

impl TableRow {
    /// Cells followed by the `hostname` column, in serialization order.
    pub fn to_flat_map(&self) -> IndexMap<String, String> {
        let mut flat: IndexMap<String, String> = self
            .cells
            .iter()
            .filter(|(k, _)| k.as_str() != HOST_COLUMN)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        flat.insert(HOST_COLUMN.to_string(), self.host.to_string());
        flat
    }
}

/// Rows serialize flat: one key per column plus `hostname`. A device column
/// literally named `hostname` is shadowed by the host.
impl Serialize for TableRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let flat = self.to_flat_map();
        let mut map = serializer.serialize_map(Some(flat.len()))?;
        for (k, v) in &flat {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Rows and non-fatal warnings from one host's transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub rows: Vec<TableRow>,
    pub warnings: Vec<ParseWarning>,
}

pub fn is_prompt_line(line: &str) -> bool {
    PROMPT_RE.is_match(line)
}

/// Split an aligned line into cells on runs of 2+ whitespace.
pub fn split_columns(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    COLUMN_SPLIT_RE.split(trimmed).map(str::to_string).collect()
}

/// Pair header names with cells by position. Extra cells are dropped and
/// missing cells are empty strings, so every row has exactly the header's
/// columns.
pub fn zip_row(header: &[String], cells: &[String]) -> IndexMap<String, String> {
    header
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), cells.get(i).cloned().unwrap_or_default()))
        .collect()
}

/// Text after the prompt on a prompt line, i.e. the echoed command.
fn echoed_command(line: &str) -> Option<&str> {
    PROMPT_RE.find(line).map(|m| line[m.end()..].trim())
}

/// Index of the first prompt line at or after `from` echoing `command`.
fn find_echo(lines: &[String], from: usize, command: &str) -> Option<usize> {
    let command = command.trim();
    lines
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, l)| echoed_command(l) == Some(command))
        .map(|(i, _)| i)
}

/// Parse one host's transcript for the given commands, in issue order.
///
/// Each command's output starts after the prompt line echoing it. When the
/// echo is missing (device rewrote or abbreviated it), parsing falls back to
/// position: two lines past the first prompt, then straight after the
/// previous table.
///
/// Pure: the same input always yields the same output.
pub fn parse_transcript(
    host: &TargetHost,
    transcript: &RawTranscript,
    commands: &[String],
) -> ParsedOutput {
    let lines = transcript.lines();
    let mut parsed = ParsedOutput::default();

    let Some(first_prompt) = lines.iter().position(|l| is_prompt_line(l)) else {
        parsed.warnings.push(ParseWarning::EmptyOutput { lines: 0 });
        return parsed;
    };
    let remaining = lines.len() - first_prompt;
    if remaining < MIN_TRANSCRIPT_LINES {
        parsed
            .warnings
            .push(ParseWarning::EmptyOutput { lines: remaining });
        return parsed;
    }

    let mut cursor = first_prompt + BANNER_SKIP_LINES;
    // Prompt line that ended the previous section; it may echo the next command.
    let mut last_prompt = first_prompt;
    for (index, command) in commands.iter().enumerate() {
        if let Some(echo) = find_echo(lines, last_prompt, command) {
            cursor = echo + 1;
        }
        while lines.get(cursor).is_some_and(|l| l.trim().is_empty()) {
            cursor += 1;
        }
        let Some(header_line) = lines.get(cursor) else {
            for rest in &commands[index..] {
                parsed.warnings.push(ParseWarning::ParseTruncation {
                    command: rest.clone(),
                    rows_kept: 0,
                });
            }
            break;
        };
        if is_prompt_line(header_line) {
            // No output at all; this prompt already echoes the next command.
            parsed.warnings.push(ParseWarning::ParseTruncation {
                command: command.clone(),
                rows_kept: 0,
            });
            last_prompt = cursor;
            cursor += 1;
            continue;
        }
        cursor += 1;

        let header = split_columns(header_line);
        let mut rows_kept = 0;
        let mut terminated = false;
        while let Some(line) = lines.get(cursor) {
            cursor += 1;
            if is_prompt_line(line) {
                last_prompt = cursor - 1;
                terminated = true;
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            parsed.rows.push(TableRow {
                host: host.clone(),
                command: command.clone(),
                cells: zip_row(&header, &split_columns(line)),
            });
            rows_kept += 1;
        }

        if !terminated {
            parsed.warnings.push(ParseWarning::ParseTruncation {
                command: command.clone(),
                rows_kept,
            });
            for rest in &commands[index + 1..] {
                parsed.warnings.push(ParseWarning::ParseTruncation {
                    command: rest.clone(),
                    rows_kept: 0,
                });
            }
            break;
        }
    }

    parsed
}
