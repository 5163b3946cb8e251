use crate::types::{PointId, StatusLabel};
use chrono::{DateTime, SecondsFormat, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use std::io;
use thiserror::Error;

pub const HEADER: [&str; 6] = ["Point ID", "Status", "Longitude", "Latitude", "Notes", "Date"];
pub const FILE_NAME: &str = "points_export.csv";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV output is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub id: PointId,
    pub status: StatusLabel,
    pub longitude: f64,
    pub latitude: f64,
    pub notes: String,
    pub date: String,
}

/// ISO-8601 UTC with milliseconds, e.g. `2024-05-01T03:04:05.678Z`.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn write_csv<W: io::Write>(rows: &[ExportRow], writer: W) -> Result<(), ExportError> {
    // Header written by hand so an empty collection still gets one.
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(writer);
    wtr.write_record(HEADER)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

pub fn to_csv_string(rows: &[ExportRow]) -> Result<String, ExportError> {
    let mut buf = Vec::new();
    write_csv(rows, &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(id: PointId, status: StatusLabel, notes: &str) -> ExportRow {
        ExportRow {
            id,
            status,
            longitude: 174.5,
            latitude: -41.25,
            notes: notes.to_string(),
            date: "2024-05-01T03:04:05.678Z".to_string(),
        }
    }

    #[test]
    fn writes_header_and_rows() {
        let csv = to_csv_string(&[
            row(1, StatusLabel::Watched, ""),
            row(2, StatusLabel::None, "scarp, 20cm"),
        ])
        .unwrap();

        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Point ID,Status,Longitude,Latitude,Notes,Date");
        assert_eq!(lines[1], "1,Watched,174.5,-41.25,,2024-05-01T03:04:05.678Z");
        assert_eq!(lines[2], "2,None,174.5,-41.25,\"scarp, 20cm\",2024-05-01T03:04:05.678Z");
    }

    #[test]
    fn empty_export_still_has_header() {
        assert_eq!(
            to_csv_string(&[]).unwrap(),
            "Point ID,Status,Longitude,Latitude,Notes,Date\n"
        );
    }

    #[test]
    fn export_reads_back() {
        let csv = to_csv_string(&[row(3, StatusLabel::Remediated, "line one\nline two")]).unwrap();
        let mut rdr = csv::ReaderBuilder::new().from_reader(csv.as_bytes());
        let record = rdr.records().next().unwrap().unwrap();
        assert_eq!(&record[1], "Remediated");
        assert_eq!(&record[4], "line one\nline two");
    }

    #[test]
    fn timestamp_has_millis_and_zulu() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 3, 4, 5).unwrap();
        assert_eq!(timestamp(at), "2024-05-01T03:04:05.000Z");
    }
}
