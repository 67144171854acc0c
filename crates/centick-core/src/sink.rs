//! Output sinks for collected quotes.
//!
//! The scheduler hands every successful quote to each configured sink and
//! does not care about the format; sink errors are logged upstream and
//! never abort a collection tick.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::Quote;

/// Destination for collected quotes.
pub trait QuoteSink: Send {
    fn name(&self) -> &'static str;

    fn write(&mut self, quote: &Quote) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Append-mode CSV file, one row per quote. The header is written only when
/// the file starts empty.
pub struct CsvSink {
    writer: csv::Writer<File>,
}

impl CsvSink {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let needs_header = std::fs::metadata(path).map(|meta| meta.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);

        Ok(Self { writer })
    }
}

impl QuoteSink for CsvSink {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn write(&mut self, quote: &Quote) -> io::Result<()> {
        self.writer
            .serialize(quote)
            .map_err(|error| io::Error::new(io::ErrorKind::Other, error))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Append-mode JSON Lines file, one object per quote.
pub struct JsonlSink {
    writer: BufWriter<File>,
}

impl JsonlSink {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl QuoteSink for JsonlSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn write(&mut self, quote: &Quote) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, quote)
            .map_err(|error| io::Error::new(io::ErrorKind::Other, error))?;
        self.writer.write_all(b"\n")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AssetClass, QuoteSource, Symbol, UtcDateTime};

    fn quote(raw: &str, price: f64) -> Quote {
        Quote::new(
            Symbol::parse(raw).expect("valid symbol"),
            AssetClass::Stocks,
            price,
            QuoteSource::Free,
            UtcDateTime::parse("2024-05-01T09:00:00Z").expect("valid"),
        )
        .expect("valid quote")
    }

    #[test]
    fn jsonl_sink_appends_one_line_per_quote() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("quotes.jsonl");

        let mut sink = JsonlSink::open(&path).expect("sink opens");
        sink.write(&quote("AAPL", 100.0)).expect("write");
        sink.write(&quote("MSFT", 200.0)).expect("write");
        sink.flush().expect("flush");

        let contents = std::fs::read_to_string(&path).expect("readable");
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let decoded: Quote = serde_json::from_str(lines[0]).expect("round trips");
        assert_eq!(decoded.symbol.as_str(), "AAPL");
    }

    #[test]
    fn csv_sink_writes_the_header_exactly_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("quotes.csv");

        {
            let mut sink = CsvSink::open(&path).expect("sink opens");
            sink.write(&quote("AAPL", 100.0)).expect("write");
            sink.flush().expect("flush");
        }
        {
            let mut sink = CsvSink::open(&path).expect("sink reopens");
            sink.write(&quote("MSFT", 200.0)).expect("write");
            sink.flush().expect("flush");
        }

        let contents = std::fs::read_to_string(&path).expect("readable");
        let header_rows = contents
            .lines()
            .filter(|line| line.starts_with("symbol"))
            .count();
        assert_eq!(header_rows, 1);
        assert_eq!(contents.lines().count(), 3);
    }
}
