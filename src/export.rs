//! Export of fetched members to a timestamped spreadsheet file

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Local};
use rust_xlsxwriter::{Format, Workbook};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::member::{text_cell, Member, COLUMNS};

/// Timestamp layout embedded in output file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const SHEET_NAME: &str = "Members";

/// Upper bound on `_N` suffixes tried for one timestamp.
const MAX_SUFFIX: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Xlsx,
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "xlsx" | "excel" => Ok(ExportFormat::Xlsx),
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(Error::Config(format!(
                "TG_EXPORT_FORMAT must be xlsx, csv or json, got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// File name for a run started at `now`, before collision suffixes.
pub fn file_name(prefix: &str, format: ExportFormat, now: &DateTime<Local>, suffix: u32) -> String {
    let stamp = now.format(TIMESTAMP_FORMAT);
    if suffix == 0 {
        format!("{}_{}.{}", prefix, stamp, format.extension())
    } else {
        format!("{}_{}_{}.{}", prefix, stamp, suffix, format.extension())
    }
}

/// Atomically create a fresh output file.
///
/// Two runs within the same second get `_1`, `_2`, ... instead of
/// overwriting each other.
pub fn create_output(
    dir: &Path,
    prefix: &str,
    format: ExportFormat,
    now: &DateTime<Local>,
) -> Result<(PathBuf, File)> {
    fs::create_dir_all(dir)?;

    for suffix in 0..MAX_SUFFIX {
        let path = dir.join(file_name(prefix, format, now, suffix));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "Output file exists, trying next suffix");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::Export(format!(
        "could not find a free file name for prefix '{}' in {}",
        prefix,
        dir.display()
    )))
}

/// Write members to exactly one new file and return its path.
pub fn export_members(
    members: &[Member],
    dir: &Path,
    prefix: &str,
    format: ExportFormat,
) -> Result<PathBuf> {
    let (path, file) = create_output(dir, prefix, format, &Local::now())?;

    let written = match format {
        ExportFormat::Xlsx => write_xlsx(members, file),
        ExportFormat::Csv => write_csv(members, file),
        ExportFormat::Json => write_json(members, file),
    };

    if let Err(e) = written {
        // Don't leave a truncated workbook behind.
        let _ = fs::remove_file(&path);
        return Err(e);
    }

    info!(
        path = %path.display(),
        rows = members.len(),
        format = %format,
        "Members exported"
    );
    Ok(path)
}

fn write_xlsx(members: &[Member], file: File) -> Result<()> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    for (col, title) in COLUMNS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, &header)?;
    }

    for (i, member) in members.iter().enumerate() {
        let row = (i + 1) as u32;
        sheet.write_number(row, 0, member.id as f64)?;
        sheet.write_string(row, 1, text_cell(&member.username))?;
        sheet.write_string(row, 2, text_cell(&member.first_name))?;
        sheet.write_string(row, 3, text_cell(&member.last_name))?;
        sheet.write_string(row, 4, text_cell(&member.phone))?;
        sheet.write_boolean(row, 5, member.is_bot)?;
        sheet.write_boolean(row, 6, member.is_verified)?;
        sheet.write_boolean(row, 7, member.is_premium)?;

        // Remaining columns share the text rendering used by CSV.
        for (col, cell) in member.row().iter().enumerate().skip(8) {
            sheet.write_string(row, col as u16, cell)?;
        }
    }

    sheet.set_freeze_panes(1, 0)?;
    sheet.autofit();

    workbook.save_to_writer(file)?;
    Ok(())
}

fn write_csv(members: &[Member], file: File) -> Result<()> {
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(COLUMNS)?;
    for member in members {
        writer.write_record(member.row())?;
    }
    writer.flush()?;
    Ok(())
}

fn write_json(members: &[Member], file: File) -> Result<()> {
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, members)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::NOT_SET;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sample_members() -> Vec<Member> {
        vec![
            Member {
                id: 1,
                username: Some("alice".into()),
                first_name: Some("Alice".into()),
                ..Default::default()
            },
            Member {
                id: 2,
                first_name: Some("Bob, Jr.".into()),
                is_bot: true,
                ..Default::default()
            },
        ]
    }

    #[test]
    fn file_name_embeds_timestamp_and_suffix() {
        let now = Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            file_name("telegram_members", ExportFormat::Xlsx, &now, 0),
            "telegram_members_20260304_050607.xlsx"
        );
        assert_eq!(
            file_name("telegram_members", ExportFormat::Csv, &now, 2),
            "telegram_members_20260304_050607_2.csv"
        );
    }

    #[test]
    fn create_output_never_reuses_a_name() {
        let dir = tempdir().unwrap();
        let now = Local::now();

        let (first, _) = create_output(dir.path(), "run", ExportFormat::Csv, &now).unwrap();
        let (second, _) = create_output(dir.path(), "run", ExportFormat::Csv, &now).unwrap();

        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("_1.csv"));
    }

    #[test]
    fn csv_export_writes_header_and_one_row_per_member() {
        let dir = tempdir().unwrap();
        let path = export_members(&sample_members(), dir.path(), "m", ExportFormat::Csv).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), COLUMNS.len());
        assert_eq!(&headers[0], "User ID");

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "alice");
        assert_eq!(&rows[1][1], NOT_SET);
        assert_eq!(&rows[1][2], "Bob, Jr.");
        assert_eq!(&rows[1][5], "true");
    }

    #[test]
    fn xlsx_export_produces_zip_container() {
        let dir = tempdir().unwrap();
        let path = export_members(&sample_members(), dir.path(), "m", ExportFormat::Xlsx).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.len() > 4);
        assert_eq!(&bytes[..2], b"PK");
        assert_eq!(path.extension().unwrap(), "xlsx");
    }

    #[test]
    fn json_export_round_trips_ids() {
        let dir = tempdir().unwrap();
        let path = export_members(&sample_members(), dir.path(), "m", ExportFormat::Json).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let ids: Vec<i64> = value
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn export_creates_missing_output_dir() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("exports").join("today");
        let path = export_members(&sample_members(), &nested, "m", ExportFormat::Csv).unwrap();
        assert!(path.starts_with(&nested));
    }

    #[test]
    fn export_format_parses_case_insensitively() {
        assert_eq!("XLSX".parse::<ExportFormat>().unwrap(), ExportFormat::Xlsx);
        assert_eq!("excel".parse::<ExportFormat>().unwrap(), ExportFormat::Xlsx);
        assert_eq!(" csv ".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("ods".parse::<ExportFormat>().is_err());
    }
}
