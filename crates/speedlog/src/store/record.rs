//! Measurement records and their on-disk line format.
//!
//! One record is one line of six space-delimited fields:
//!
//! ```text
//! 2025/03/14T09:26:53 14.2 91834211.5 20481145.0 http://speedtest.example.net:8080/speedtest/upload.php 4242
//! ```

use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;

use super::StoreError;

/// First line of every log file.
pub const HEADER: &str = "Timestamp Ping Download Upload Server Server-ID";

/// Timestamp layout used in log files (local time, second precision).
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%dT%H:%M:%S";

const FIELD_COUNT: usize = 6;

/// One speed-test result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementRecord {
    timestamp: NaiveDateTime,
    ping: f64,
    download: f64,
    upload: f64,
    server_url: String,
    server_id: String,
}

impl MeasurementRecord {
    /// Build a record, truncating the timestamp to whole seconds.
    ///
    /// Fails with [`StoreError::InvalidField`] when the server URL or ID is
    /// empty or contains whitespace, since either would break the line format.
    pub fn new(
        timestamp: NaiveDateTime,
        ping: f64,
        download: f64,
        upload: f64,
        server_url: impl Into<String>,
        server_id: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let server_url = checked_field("server URL", server_url.into())?;
        let server_id = checked_field("server ID", server_id.into())?;

        Ok(Self {
            timestamp: timestamp.with_nanosecond(0).unwrap_or(timestamp),
            ping,
            download,
            upload,
            server_url,
            server_id,
        })
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn ping(&self) -> f64 {
        self.ping
    }

    /// Download throughput in the provider's native unit (bits/second).
    pub fn download(&self) -> f64 {
        self.download
    }

    /// Upload throughput in the provider's native unit (bits/second).
    pub fn upload(&self) -> f64 {
        self.upload
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Serialize to a single log line without the trailing newline.
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            format_decimal(self.ping),
            format_decimal(self.download),
            format_decimal(self.upload),
            self.server_url,
            self.server_id,
        )
    }

    /// Parse one log line. The error is a human-readable reason; the store
    /// attaches the path and line number.
    pub(crate) fn parse_line(line: &str) -> Result<Self, String> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let fields: Vec<&str> = line.split(' ').collect();
        if fields.len() != FIELD_COUNT {
            return Err(format!(
                "expected {FIELD_COUNT} fields, found {}",
                fields.len()
            ));
        }

        let timestamp = NaiveDateTime::parse_from_str(fields[0], TIMESTAMP_FORMAT)
            .map_err(|e| format!("invalid timestamp {:?}: {e}", fields[0]))?;
        let ping = parse_decimal("ping", fields[1])?;
        let download = parse_decimal("download", fields[2])?;
        let upload = parse_decimal("upload", fields[3])?;

        Self::new(timestamp, ping, download, upload, fields[4], fields[5]).map_err(|e| e.to_string())
    }
}

impl std::fmt::Display for MeasurementRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_line())
    }
}

fn checked_field(field: &'static str, value: String) -> Result<String, StoreError> {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(StoreError::InvalidField { field, value });
    }
    Ok(value)
}

fn parse_decimal(name: &str, raw: &str) -> Result<f64, String> {
    raw.parse::<f64>()
        .map_err(|e| format!("invalid {name} {raw:?}: {e}"))
}

/// Shortest round-trip decimal in the log file layout: integral values keep a
/// `.0`, exponents below -4 or from 16 up switch to `1e-05` / `1.5e+16`
/// notation, and non-finite values are `nan`, `inf` and `-inf`.
fn format_decimal(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    // `{:e}` yields the shortest round-trip digits, e.g. `1.5e-7`.
    let scientific = format!("{value:e}");
    let (mantissa, exponent) = scientific
        .split_once('e')
        .and_then(|(m, e)| e.parse::<i32>().ok().map(|e| (m, e)))
        .unwrap_or((scientific.as_str(), 0));

    if !(-4..16).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{mantissa}e{sign}{:02}", exponent.abs());
    }

    let fixed = value.to_string();
    if fixed.contains('.') {
        fixed
    } else {
        format!("{fixed}.0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_line_format() {
        let record = MeasurementRecord::new(
            at(9, 26, 53),
            14.237,
            91834211.5,
            20481145.0,
            "http://speedtest.example.net:8080/speedtest/upload.php",
            "4242",
        )
        .unwrap();

        assert_eq!(
            record.to_line(),
            "2025/03/14T09:26:53 14.237 91834211.5 20481145.0 \
             http://speedtest.example.net:8080/speedtest/upload.php 4242"
        );
    }

    #[test]
    fn test_timestamp_truncated_to_seconds() {
        let precise = at(9, 26, 53).with_nanosecond(734_000_000).unwrap();
        let record = MeasurementRecord::new(precise, 1.0, 2.0, 3.0, "u", "i").unwrap();
        assert_eq!(record.timestamp(), at(9, 26, 53));
    }

    #[test]
    fn test_parse_line_written_by_older_logger() {
        let record = MeasurementRecord::parse_line(
            "2024/11/02T23:59:01 8.913 1.2e+08 30000000.0 http://a.example/upload.php 17\r",
        )
        .unwrap();
        assert_eq!(record.timestamp().format(TIMESTAMP_FORMAT).to_string(), "2024/11/02T23:59:01");
        assert_eq!(record.ping(), 8.913);
        assert_eq!(record.download(), 1.2e8);
        assert_eq!(record.upload(), 30_000_000.0);
        assert_eq!(record.server_url(), "http://a.example/upload.php");
        assert_eq!(record.server_id(), "17");
    }

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        let reason =
            MeasurementRecord::parse_line("2024/11/02T23:59:01 8.9 1.0 2.0 http://a.example")
                .unwrap_err();
        assert!(reason.contains("expected 6 fields, found 5"), "{reason}");
    }

    #[test]
    fn test_parse_rejects_bad_timestamp_and_decimal() {
        assert!(
            MeasurementRecord::parse_line("2024-11-02 8.9 1.0 2.0 http://a.example 1")
                .unwrap_err()
                .contains("invalid timestamp")
        );
        assert!(
            MeasurementRecord::parse_line("2024/11/02T23:59:01 fast 1.0 2.0 http://a.example 1")
                .unwrap_err()
                .contains("invalid ping")
        );
    }

    #[test]
    fn test_fields_with_delimiter_rejected() {
        let err = MeasurementRecord::new(at(0, 0, 0), 1.0, 2.0, 3.0, "http://a b", "1").unwrap_err();
        assert!(matches!(err, StoreError::InvalidField { field: "server URL", .. }));

        let err = MeasurementRecord::new(at(0, 0, 0), 1.0, 2.0, 3.0, "http://a", "").unwrap_err();
        assert!(matches!(err, StoreError::InvalidField { field: "server ID", .. }));
    }

    #[test]
    fn test_decimal_format() {
        assert_eq!(format_decimal(20.0), "20.0");
        assert_eq!(format_decimal(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_decimal(-3.5), "-3.5");
        assert_eq!(format_decimal(0.0001), "0.0001");
        assert_eq!(format_decimal(123_456_789_012_345.0), "123456789012345.0");
        assert_eq!(format_decimal(-0.0), "-0.0");
    }

    #[test]
    fn test_decimal_format_exponent_and_special_values() {
        assert_eq!(format_decimal(0.00001), "1e-05");
        assert_eq!(format_decimal(1.5e-7), "1.5e-07");
        assert_eq!(format_decimal(1e16), "1e+16");
        assert_eq!(format_decimal(1.2e20), "1.2e+20");
        assert_eq!(format_decimal(-2.5e-123), "-2.5e-123");
        assert_eq!(format_decimal(f64::NAN), "nan");
        assert_eq!(format_decimal(f64::INFINITY), "inf");
        assert_eq!(format_decimal(f64::NEG_INFINITY), "-inf");

        for raw in ["1e-05", "1e+16", "nan", "inf"] {
            let parsed = parse_decimal("ping", raw).unwrap();
            assert_eq!(format_decimal(parsed), raw);
        }
    }
}
