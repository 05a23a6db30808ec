//! Append-only daily attendance ledger.
//!
//! A CSV file with header `Name,Date,Time`, one row per first sighting of an
//! identity on a calendar day. The set of `(name, date)` keys already written
//! is rebuilt from the file on open, so restarting the daemon does not admit
//! anyone twice on the same day.

use crate::types::UNKNOWN;
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

const HEADER: [&str; 3] = ["Name", "Date", "Time"];
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{0} is not an attendance ledger (expected header Name,Date,Time)")]
    BadHeader(PathBuf),
    #[error("ledger lock poisoned")]
    Poisoned,
}

/// One durable attendance row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

/// Attendance log with per-day deduplication.
///
/// Check-then-append runs under one lock, so concurrent callers racing on
/// the same `(name, date)` key produce exactly one row.
pub struct AttendanceLedger {
    path: PathBuf,
    logged: Mutex<HashSet<(String, NaiveDate)>>,
}

impl AttendanceLedger {
    /// Open the ledger at `path`, creating a header-only file if absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let io_err = |source| LedgerError::Io { path: path.clone(), source };

        let existing = match fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(io_err(e)),
        };

        let mut logged = HashSet::new();
        match existing.as_deref() {
            None | Some("") => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(io_err)?;
                }
                fs::write(&path, encode_row(&HEADER)).map_err(io_err)?;
                tracing::info!(path = %path.display(), "created attendance ledger");
            }
            Some(text) => {
                for record in parse_ledger(&path, text)? {
                    logged.insert((record.name, record.date));
                }
                tracing::info!(
                    path = %path.display(),
                    keys = logged.len(),
                    "restored attendance dedup state from ledger"
                );
            }
        }

        Ok(Self {
            path,
            logged: Mutex::new(logged),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `name` as present now (local time).
    ///
    /// Returns `Ok(true)` if a row was appended, `Ok(false)` if the name is
    /// [`UNKNOWN`] or was already recorded today.
    pub fn record(&self, name: &str) -> Result<bool, LedgerError> {
        self.record_at(name, Local::now().naive_local())
    }

    /// Record `name` as present at `at`.
    pub fn record_at(&self, name: &str, at: NaiveDateTime) -> Result<bool, LedgerError> {
        if name == UNKNOWN {
            return Ok(false);
        }

        let date = at.date();
        let mut logged = self.logged.lock().map_err(|_| LedgerError::Poisoned)?;

        let key = (name.to_owned(), date);
        if logged.contains(&key) {
            tracing::debug!(name, %date, "already recorded today");
            return Ok(false);
        }

        let date_str = date.format(DATE_FORMAT).to_string();
        let time_str = at.time().format(TIME_FORMAT).to_string();
        self.append(&encode_row(&[name, &date_str, &time_str]))?;

        // Only after the row is durable; a failed append stays retryable.
        logged.insert(key);
        tracing::info!(name, date = %date_str, time = %time_str, "attendance recorded");
        Ok(true)
    }

    fn append(&self, line: &str) -> Result<(), LedgerError> {
        let io_err = |source| LedgerError::Io { path: self.path.clone(), source };
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;

        // Rows always start on a fresh line, even after a file saved without a
        // trailing newline or a write that stopped short.
        let mut row = String::with_capacity(line.len() + 1);
        if !ends_with_newline(&mut file).map_err(io_err)? {
            row.push('\n');
        }
        row.push_str(line);

        file.write_all(row.as_bytes()).map_err(io_err)?;
        file.flush().map_err(io_err)
    }

    /// All rows in file order.
    pub fn records(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let _guard = self.logged.lock().map_err(|_| LedgerError::Poisoned)?;
        let text = fs::read_to_string(&self.path)
            .map_err(|source| LedgerError::Io { path: self.path.clone(), source })?;
        parse_ledger(&self.path, &text)
    }

    pub fn records_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let mut records = self.records()?;
        records.retain(|r| r.date == date);
        Ok(records)
    }

    pub fn count_on(&self, date: NaiveDate) -> Result<usize, LedgerError> {
        Ok(self.records_on(date)?.len())
    }

    pub fn count_today(&self) -> Result<usize, LedgerError> {
        self.count_on(Local::now().date_naive())
    }

    /// Copy the raw CSV to `out`.
    pub fn export<W: Write>(&self, out: &mut W) -> Result<(), LedgerError> {
        let _guard = self.logged.lock().map_err(|_| LedgerError::Poisoned)?;
        let io_err = |source| LedgerError::Io { path: self.path.clone(), source };
        let bytes = fs::read(&self.path).map_err(io_err)?;
        out.write_all(&bytes).map_err(io_err)
    }
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn parse_ledger(path: &Path, text: &str) -> Result<Vec<AttendanceRecord>, LedgerError> {
    // Spreadsheet tools commonly save CSV with a UTF-8 byte order mark.
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows = parse_csv(text).into_iter();

    match rows.next() {
        Some(header) if header.iter().map(|f| f.trim()).eq(HEADER) => {}
        _ => return Err(LedgerError::BadHeader(path.to_path_buf())),
    }

    let mut records = Vec::new();
    for (i, row) in rows.enumerate() {
        if row.len() == 1 && row[0].is_empty() {
            continue;
        }
        match parse_record(&row) {
            Some(record) => records.push(record),
            None => tracing::warn!(
                path = %path.display(),
                row = i + 2,
                fields = ?row,
                "skipping malformed ledger row"
            ),
        }
    }
    Ok(records)
}

fn parse_record(row: &[String]) -> Option<AttendanceRecord> {
    let [name, date, time] = row else {
        return None;
    };
    Some(AttendanceRecord {
        name: name.clone(),
        date: NaiveDate::parse_from_str(date.trim(), DATE_FORMAT).ok()?,
        time: NaiveTime::parse_from_str(time.trim(), TIME_FORMAT).ok()?,
    })
}

/// Encode one CSV row, quoting fields that need it.
fn encode_row(fields: &[&str]) -> String {
    let mut line = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        if field.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
            line.push('"');
            line.push_str(&field.replace('"', "\"\""));
            line.push('"');
        } else {
            line.push_str(field);
        }
    }
    line.push('\n');
    line
}

/// Split CSV text into rows of fields. Accepts both `\n` and `\r\n` endings.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::new(
            NaiveDate::parse_from_str(date, DATE_FORMAT).unwrap(),
            NaiveTime::parse_from_str(time, TIME_FORMAT).unwrap(),
        )
    }

    fn data_rows(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .skip(1)
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn test_open_creates_header_only_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/attendance_log.csv");
        let ledger = AttendanceLedger::open(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "Name,Date,Time\n");
        assert!(ledger.records().unwrap().is_empty());
    }

    #[test]
    fn test_same_day_is_recorded_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance_log.csv");
        let ledger = AttendanceLedger::open(&path).unwrap();

        assert!(ledger.record_at("Alice", at("2024-01-01", "09:00:00")).unwrap());
        assert!(!ledger.record_at("Alice", at("2024-01-01", "17:30:00")).unwrap());
        assert!(ledger.record_at("Alice", at("2024-01-02", "08:59:59")).unwrap());

        assert_eq!(
            data_rows(&path),
            vec!["Alice,2024-01-01,09:00:00", "Alice,2024-01-02,08:59:59"]
        );
    }

    #[test]
    fn test_unknown_is_never_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance_log.csv");
        let ledger = AttendanceLedger::open(&path).unwrap();

        for _ in 0..3 {
            assert!(!ledger.record(UNKNOWN).unwrap());
        }
        assert!(data_rows(&path).is_empty());
    }

    #[test]
    fn test_record_uses_wall_clock() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path().join("a.csv")).unwrap();
        assert!(ledger.record("Bob").unwrap());
        assert!(!ledger.record("Bob").unwrap());
        assert_eq!(ledger.count_today().unwrap(), 1);
    }

    #[test]
    fn test_reopen_restores_dedup_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance_log.csv");
        {
            let ledger = AttendanceLedger::open(&path).unwrap();
            assert!(ledger.record_at("Alice", at("2024-01-01", "09:00:00")).unwrap());
        }
        let reopened = AttendanceLedger::open(&path).unwrap();
        assert!(!reopened.record_at("Alice", at("2024-01-01", "10:00:00")).unwrap());
        assert!(reopened.record_at("Bob", at("2024-01-01", "10:00:00")).unwrap());
        assert_eq!(data_rows(&path).len(), 2);
    }

    #[test]
    fn test_reads_crlf_ledger_and_skips_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance_log.csv");
        fs::write(
            &path,
            "Name,Date,Time\r\nAlice,2024-01-01,09:00:00\r\ngarbage\r\n\r\nBob,2024-01-01,09:05:00\r\n",
        )
        .unwrap();

        let ledger = AttendanceLedger::open(&path).unwrap();
        let names: Vec<_> = ledger.records().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
        assert!(!ledger.record_at("Bob", at("2024-01-01", "12:00:00")).unwrap());
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.csv");
        fs::write(&path, "id,value\n1,2\n").unwrap();
        assert!(matches!(
            AttendanceLedger::open(&path),
            Err(LedgerError::BadHeader(_))
        ));
    }

    #[test]
    fn test_names_with_commas_and_quotes_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance_log.csv");
        let ledger = AttendanceLedger::open(&path).unwrap();
        let name = "Doe, \"JJ\" Jane";

        assert!(ledger.record_at(name, at("2024-03-04", "07:06:05")).unwrap());
        assert_eq!(data_rows(&path), vec![r#""Doe, ""JJ"" Jane",2024-03-04,07:06:05"#]);

        let records = ledger.records().unwrap();
        assert_eq!(records[0].name, name);
        assert!(!AttendanceLedger::open(&path)
            .unwrap()
            .record_at(name, at("2024-03-04", "08:00:00"))
            .unwrap());
    }

    #[test]
    fn test_failed_append_does_not_mark_logged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance_log.csv");
        let ledger = AttendanceLedger::open(&path).unwrap();

        // Replace the ledger file with a directory so the append fails.
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        let when = at("2024-01-01", "09:00:00");
        assert!(matches!(ledger.record_at("Alice", when), Err(LedgerError::Io { .. })));

        fs::remove_dir(&path).unwrap();
        fs::write(&path, "Name,Date,Time\n").unwrap();
        assert!(ledger.record_at("Alice", when).unwrap());
    }

    #[test]
    fn test_append_after_header_without_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance_log.csv");
        fs::write(&path, "Name,Date,Time").unwrap();

        let ledger = AttendanceLedger::open(&path).unwrap();
        assert!(ledger.record_at("Alice", at("2024-01-01", "09:00:00")).unwrap());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Name,Date,Time\nAlice,2024-01-01,09:00:00\n"
        );

        let reopened = AttendanceLedger::open(&path).unwrap();
        assert!(!reopened.record_at("Alice", at("2024-01-01", "12:00:00")).unwrap());
    }

    #[test]
    fn test_append_after_row_without_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance_log.csv");
        fs::write(&path, "Name,Date,Time\nAlice,2024-01-01,09:00:00").unwrap();

        let ledger = AttendanceLedger::open(&path).unwrap();
        assert!(ledger.record_at("Bob", at("2024-01-01", "09:00:00")).unwrap());
        assert_eq!(
            data_rows(&path),
            vec!["Alice,2024-01-01,09:00:00", "Bob,2024-01-01,09:00:00"]
        );

        let reopened = AttendanceLedger::open(&path).unwrap();
        assert_eq!(reopened.records().unwrap().len(), 2);
        assert!(!reopened.record_at("Alice", at("2024-01-01", "10:00:00")).unwrap());
        assert!(!reopened.record_at("Bob", at("2024-01-01", "10:00:00")).unwrap());
    }

    #[test]
    fn test_truncated_row_does_not_swallow_next_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance_log.csv");
        let ledger = AttendanceLedger::open(&path).unwrap();
        assert!(ledger.record_at("Alice", at("2024-01-01", "09:00:00")).unwrap());

        // A write that stopped partway through a row.
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"Carol,2024-01-0")
            .unwrap();

        assert!(ledger.record_at("Bob", at("2024-01-01", "09:10:00")).unwrap());
        let names: Vec<_> = AttendanceLedger::open(&path)
            .unwrap()
            .records()
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_opens_ledger_with_byte_order_mark() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance_log.csv");
        fs::write(&path, "\u{feff}Name,Date,Time\r\nAlice,2024-01-01,09:00:00\r\n").unwrap();

        let ledger = AttendanceLedger::open(&path).unwrap();
        assert_eq!(ledger.records().unwrap().len(), 1);
        assert!(!ledger.record_at("Alice", at("2024-01-01", "11:00:00")).unwrap());
        assert!(ledger.record_at("Bob", at("2024-01-01", "11:00:00")).unwrap());
    }

    #[test]
    fn test_concurrent_same_key_appends_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance_log.csv");
        let ledger = Arc::new(AttendanceLedger::open(&path).unwrap());
        let when = at("2024-01-01", "09:00:00");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.record_at("Alice", when).unwrap())
            })
            .collect();
        let appended = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();

        assert_eq!(appended, 1);
        assert_eq!(data_rows(&path).len(), 1);
    }

    #[test]
    fn test_records_on_and_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance_log.csv");
        let ledger = AttendanceLedger::open(&path).unwrap();
        ledger.record_at("Alice", at("2024-01-01", "09:00:00")).unwrap();
        ledger.record_at("Bob", at("2024-01-02", "09:00:00")).unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(ledger.count_on(day).unwrap(), 1);
        assert_eq!(ledger.records_on(day).unwrap()[0].name, "Bob");

        let mut out = Vec::new();
        ledger.export(&mut out).unwrap();
        assert_eq!(out, fs::read(&path).unwrap());
    }

    #[test]
    fn test_parse_csv_quoted_newline() {
        let rows = parse_csv("a,\"b\nc\",d\n");
        assert_eq!(rows, vec![vec!["a".to_string(), "b\nc".into(), "d".into()]]);
    }
}
