//! HdrHistogram interval log
//!
//! Every interval record carries its own header block so a log stays readable
//! when runs are appended to the same file:
//!
//! ```text
//! #[Logged with rtlat 0.1.0]
//! #[Histogram log format version 1.3]
//! #[StartTime: 1700000000.250 (seconds since epoch), Tue Nov 14 22:13:20 UTC 2023]
//! #[BaseTime: 1700000000.000 (seconds since epoch)]
//! "StartTimestamp","Interval_Length","Interval_Max","Interval_Compressed_Histogram"
//! Tag=run1,0.000,0.250,1.234,HISTFAAAA...
//! ```
//!
//! `StartTime` is when the report was cut and `BaseTime` is the start of the
//! interval; the data line's start offset is relative to `BaseTime`. Maxima are
//! written in milliseconds, histograms in nanoseconds, V2 deflate, base64.

use crate::core::HlogError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hdrhistogram::serialization::{Deserializer, Serializer, V2DeflateSerializer};
use hdrhistogram::Histogram;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub const LOG_FORMAT_VERSION: &str = "1.3";

const LEGEND: &str =
    "\"StartTimestamp\",\"Interval_Length\",\"Interval_Max\",\"Interval_Compressed_Histogram\"";

/// Nanosecond values, millisecond maxima
const MAX_VALUE_UNIT_RATIO: f64 = 1_000_000.0;

fn epoch_secs(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub struct HistogramLogWriter<W: Write> {
    out: W,
    tag: Option<String>,
    serializer: V2DeflateSerializer,
    scratch: Vec<u8>,
}

impl HistogramLogWriter<BufWriter<File>> {
    /// Append to `path`, creating it and its parent directories as needed
    pub fn append_to(path: &Path, tag: Option<String>) -> Result<Self, HlogError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(BufWriter::new(file), tag))
    }
}

impl<W: Write> HistogramLogWriter<W> {
    pub fn new(out: W, tag: Option<String>) -> Self {
        Self {
            out,
            tag,
            serializer: V2DeflateSerializer::new(),
            scratch: Vec::with_capacity(4096),
        }
    }

    /// Append one interval record and flush it
    pub fn write_interval(
        &mut self,
        histogram: &Histogram<u64>,
        interval_start: SystemTime,
        interval_end: SystemTime,
    ) -> Result<(), HlogError> {
        self.scratch.clear();
        self.serializer
            .serialize(histogram, &mut self.scratch)
            .map_err(|e| HlogError::Serialize(format!("{:?}", e)))?;
        let encoded = BASE64.encode(&self.scratch);

        let start = epoch_secs(interval_end);
        let base = epoch_secs(interval_start);
        let length = interval_end
            .duration_since(interval_start)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let date = DateTime::<Utc>::from(interval_end).format("%a %b %d %H:%M:%S UTC %Y");

        writeln!(self.out, "#[Logged with rtlat {}]", env!("CARGO_PKG_VERSION"))?;
        writeln!(self.out, "#[Histogram log format version {}]", LOG_FORMAT_VERSION)?;
        writeln!(self.out, "#[StartTime: {:.3} (seconds since epoch), {}]", start, date)?;
        writeln!(self.out, "#[BaseTime: {:.3} (seconds since epoch)]", base)?;
        writeln!(self.out, "{}", LEGEND)?;
        if let Some(tag) = &self.tag {
            write!(self.out, "Tag={},", tag)?;
        }
        writeln!(
            self.out,
            "{:.3},{:.3},{:.3},{}",
            0.0,
            length,
            histogram.max() as f64 / MAX_VALUE_UNIT_RATIO,
            encoded
        )?;
        self.out.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// One data line of an interval log
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramLogEntry {
    pub tag: Option<String>,
    /// Absolute interval start, seconds since epoch
    pub interval_start: f64,
    /// Interval length in seconds
    pub interval_length: f64,
    /// Interval maximum in milliseconds
    pub max_ms: f64,
    /// Base64 V2-deflate payload
    pub encoded: String,
}

impl HistogramLogEntry {
    pub fn decode_histogram(&self) -> Result<Histogram<u64>, HlogError> {
        let bytes = BASE64.decode(self.encoded.as_bytes())?;
        Deserializer::new()
            .deserialize::<u64, _>(&mut bytes.as_slice())
            .map_err(|e| HlogError::Deserialize(format!("{:?}", e)))
    }
}

pub struct HistogramLogReader<R: BufRead> {
    input: R,
    line: String,
    line_no: usize,
    base_time: Option<f64>,
    start_time: Option<f64>,
}

impl HistogramLogReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, HlogError> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> HistogramLogReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            line: String::new(),
            line_no: 0,
            base_time: None,
            start_time: None,
        }
    }

    /// `StartTime` of the record read last
    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    /// Next data line, skipping headers and comments
    pub fn next_entry(&mut self) -> Result<Option<HistogramLogEntry>, HlogError> {
        loop {
            self.line.clear();
            if self.input.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let line = self.line.trim();

            if line.is_empty() || line.starts_with('"') {
                continue;
            }
            if let Some(rest) = line.strip_prefix("#[StartTime: ") {
                self.start_time = Some(parse_header_secs(rest, self.line_no)?);
                continue;
            }
            if let Some(rest) = line.strip_prefix("#[BaseTime: ") {
                self.base_time = Some(parse_header_secs(rest, self.line_no)?);
                continue;
            }
            if line.starts_with('#') {
                continue;
            }

            let entry = parse_data_line(line, self.base_time.unwrap_or(0.0), self.line_no)?;
            return Ok(Some(entry));
        }
    }

    pub fn entries(mut self) -> Result<Vec<HistogramLogEntry>, HlogError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Sum of every interval histogram in the log, `None` for an empty log
    pub fn merged(mut self) -> Result<Option<Histogram<u64>>, HlogError> {
        let mut total: Option<Histogram<u64>> = None;
        while let Some(entry) = self.next_entry()? {
            let histogram = entry.decode_histogram()?;
            total = Some(match total.take() {
                Some(mut sum) => {
                    sum.add(&histogram)
                        .map_err(|e| HlogError::Deserialize(format!("{:?}", e)))?;
                    sum
                }
                None => histogram,
            });
        }
        Ok(total)
    }
}

fn parse_header_secs(rest: &str, line: usize) -> Result<f64, HlogError> {
    let value = rest.split_whitespace().next().unwrap_or("");
    value.parse().map_err(|_| HlogError::Parse {
        line,
        reason: format!("invalid timestamp {:?}", value),
    })
}

fn parse_data_line(
    line: &str,
    base_time: f64,
    line_no: usize,
) -> Result<HistogramLogEntry, HlogError> {
    let (tag, rest) = match line.strip_prefix("Tag=") {
        Some(tagged) => {
            let (tag, rest) = tagged.split_once(',').ok_or_else(|| HlogError::Parse {
                line: line_no,
                reason: "tag without fields".to_string(),
            })?;
            (Some(tag.to_string()), rest)
        }
        None => (None, line),
    };

    let fields: Vec<&str> = rest.split(',').collect();
    if fields.len() != 4 {
        return Err(HlogError::Parse {
            line: line_no,
            reason: format!("expected 4 fields, found {}", fields.len()),
        });
    }

    let number = |i: usize, name: &str| -> Result<f64, HlogError> {
        fields[i].parse().map_err(|_| HlogError::Parse {
            line: line_no,
            reason: format!("invalid {} {:?}", name, fields[i]),
        })
    };

    Ok(HistogramLogEntry {
        tag,
        interval_start: base_time + number(0, "start timestamp")?,
        interval_length: number(1, "interval length")?,
        max_ms: number(2, "interval max")?,
        encoded: fields[3].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latency::new_histogram;
    use std::time::Duration;

    fn sample_histogram() -> Histogram<u64> {
        let mut h = new_histogram(3).unwrap();
        for v in [120_000u64, 250_000, 250_000, 1_500_000, 9_000_000] {
            h.record(v).unwrap();
        }
        h
    }

    fn written(tag: Option<&str>, h: &Histogram<u64>) -> (String, SystemTime, SystemTime) {
        let start = UNIX_EPOCH + Duration::from_millis(1_700_000_000_000);
        let end = start + Duration::from_millis(2_500);
        let mut writer = HistogramLogWriter::new(Vec::new(), tag.map(str::to_string));
        writer.write_interval(h, start, end).unwrap();
        (String::from_utf8(writer.into_inner()).unwrap(), start, end)
    }

    #[test]
    fn test_record_layout() {
        let (text, _, _) = written(Some("run1"), &sample_histogram());
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], format!("#[Logged with rtlat {}]", env!("CARGO_PKG_VERSION")));
        assert_eq!(lines[1], "#[Histogram log format version 1.3]");
        assert_eq!(
            lines[2],
            "#[StartTime: 1700000002.500 (seconds since epoch), Tue Nov 14 22:13:22 UTC 2023]"
        );
        assert_eq!(lines[3], "#[BaseTime: 1700000000.000 (seconds since epoch)]");
        assert_eq!(lines[4], LEGEND);
        assert!(lines[5].starts_with("Tag=run1,0.000,2.500,9.0"), "{}", lines[5]);
    }

    #[test]
    fn test_untagged_line() {
        let (text, _, _) = written(None, &sample_histogram());
        assert!(text.lines().last().unwrap().starts_with("0.000,2.500,"));
    }

    #[test]
    fn test_read_back() {
        let h = sample_histogram();
        let (text, start, _) = written(Some("run1"), &h);

        let entries = HistogramLogReader::new(text.as_bytes()).entries().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.tag.as_deref(), Some("run1"));
        approx::assert_relative_eq!(entry.interval_start, epoch_secs(start), epsilon = 1e-3);
        approx::assert_relative_eq!(entry.interval_length, 2.5);

        let decoded = entry.decode_histogram().unwrap();
        assert_eq!(decoded.len(), h.len());
        assert_eq!(decoded.value_at_quantile(0.99), h.value_at_quantile(0.99));
    }

    #[test]
    fn test_merge_appended_records() {
        let h = sample_histogram();
        let mut writer = HistogramLogWriter::new(Vec::new(), None);
        let t0 = SystemTime::now();
        writer.write_interval(&h, t0, t0 + Duration::from_secs(1)).unwrap();
        writer
            .write_interval(&h, t0 + Duration::from_secs(1), t0 + Duration::from_secs(2))
            .unwrap();
        let bytes = writer.into_inner();

        let merged = HistogramLogReader::new(bytes.as_slice()).merged().unwrap().unwrap();
        assert_eq!(merged.len(), 2 * h.len());

        assert!(HistogramLogReader::new(&b""[..]).merged().unwrap().is_none());
    }

    #[test]
    fn test_rejects_garbage() {
        let err = HistogramLogReader::new(&b"#[BaseTime: 1.0 (seconds since epoch)]\n1,2,3\n"[..])
            .entries()
            .unwrap_err();
        assert!(matches!(err, HlogError::Parse { line: 2, .. }));

        let err = HistogramLogReader::new(&b"#[StartTime: soon]\n"[..]).entries().unwrap_err();
        assert!(matches!(err, HlogError::Parse { line: 1, .. }));

        let entry = HistogramLogReader::new(&b"0.0,1.0,1.0,!!notbase64!!\n"[..])
            .next_entry()
            .unwrap()
            .unwrap();
        assert!(matches!(entry.decode_histogram(), Err(HlogError::Base64(_))));
    }

    #[test]
    fn test_append_to_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("10_0_0_5").join("histogram.hlog");
        let h = sample_histogram();
        let t0 = SystemTime::now();

        let mut writer = HistogramLogWriter::append_to(&path, None).unwrap();
        writer.write_interval(&h, t0, t0).unwrap();
        drop(writer);
        let mut writer = HistogramLogWriter::append_to(&path, None).unwrap();
        writer.write_interval(&h, t0, t0).unwrap();
        drop(writer);

        let entries = HistogramLogReader::open(&path).unwrap().entries().unwrap();
        assert_eq!(entries.len(), 2);
    }
}
