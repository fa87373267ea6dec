//! 1-minute OHLCV loading from CSV.

use std::io;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::{info, warn};

use common::{BarSeries, Candle, Error, Result, Timeframe};

const TIMESTAMP_COLUMNS: &[&str] = &["date", "timestamp", "time", "datetime", "open_time"];
const PRICE_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// Anything above this is taken as epoch milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Debug, Clone)]
pub struct LoadedCandles {
    pub series: BarSeries,
    /// Rows skipped because a required field was empty.
    pub dropped_rows: usize,
}

/// Load a 1-minute candle file.
pub fn load_csv(path: impl AsRef<Path>) -> Result<LoadedCandles> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| {
        Error::Data(format!("cannot open candle file '{}': {e}", path.display()))
    })?;
    let loaded = read_candles(io::BufReader::new(file))?;

    let bars = loaded.series.bars();
    if let (Some(first), Some(last)) = (bars.first(), bars.last()) {
        info!(
            path = %path.display(),
            count = bars.len(),
            dropped = loaded.dropped_rows,
            start = %first.timestamp,
            end = %last.timestamp,
            "Loaded candles"
        );
    }
    Ok(loaded)
}

/// Parse candles from any CSV source with a header row.
pub fn read_candles<R: io::Read>(reader: R) -> Result<LoadedCandles> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_lowercase()).collect();
    let find = |name: &str| headers.iter().position(|h| h == name);

    let ts_col = TIMESTAMP_COLUMNS
        .iter()
        .find_map(|&name| find(name))
        .ok_or_else(|| Error::Data("missing timestamp column (date|timestamp|time)".into()))?;
    let mut price_cols = [0usize; 5];
    for (slot, name) in price_cols.iter_mut().zip(PRICE_COLUMNS) {
        *slot = find(name).ok_or_else(|| Error::Data(format!("missing column '{name}'")))?;
    }

    let mut bars: Vec<Candle> = Vec::new();
    let mut dropped = 0usize;

    for (idx, record) in rdr.records().enumerate() {
        let record = record?;
        // Header is line 1.
        let line = idx + 2;
        let field = |col: usize| record.get(col).unwrap_or("");

        if field(ts_col).is_empty() || price_cols.iter().any(|&c| field(c).is_empty()) {
            dropped += 1;
            continue;
        }

        let raw_ts = field(ts_col);
        let timestamp = parse_timestamp(raw_ts)
            .ok_or_else(|| Error::Data(format!("line {line}: unparseable timestamp '{raw_ts}'")))?;

        let mut values = [0.0f64; 5];
        for ((value, &col), name) in values.iter_mut().zip(&price_cols).zip(PRICE_COLUMNS) {
            let raw = field(col);
            let parsed: f64 = raw
                .parse()
                .map_err(|_| Error::Data(format!("line {line}: {name} '{raw}' is not a number")))?;
            if !parsed.is_finite() || parsed < 0.0 {
                return Err(Error::Data(format!("line {line}: {name} {parsed} out of range")));
            }
            *value = parsed;
        }

        if let Some(prev) = bars.last() {
            if timestamp <= prev.timestamp {
                return Err(Error::Data(format!(
                    "line {line}: timestamp {timestamp} does not follow {}",
                    prev.timestamp
                )));
            }
        }

        let [open, high, low, close, volume] = values;
        if low > open.min(close) || high < open.max(close) {
            return Err(Error::Data(format!(
                "line {line}: inconsistent bar o={open} h={high} l={low} c={close}"
            )));
        }
        bars.push(Candle {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    if dropped > 0 {
        warn!(dropped, "Dropped candle rows with missing fields");
    }
    if bars.is_empty() {
        return Err(Error::Data("candle file contains no rows".into()));
    }

    Ok(LoadedCandles {
        series: BarSeries::new(Timeframe::M1, bars)?,
        dropped_rows: dropped,
    })
}

/// RFC 3339, `YYYY-MM-DD HH:MM[:SS[.fff]]` (UTC), or integer epoch seconds/ms.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(n) = raw.parse::<i64>() {
        return if n.abs() >= EPOCH_MILLIS_THRESHOLD {
            Utc.timestamp_millis_opt(n).single()
        } else {
            Utc.timestamp_opt(n, 0).single()
        };
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(text: &str) -> Result<LoadedCandles> {
        read_candles(text.as_bytes())
    }

    #[test]
    fn reads_basic_file() {
        let loaded = load(
            "date,open,high,low,close,volume\n\
             2023-01-01 00:00:00,100,101,99,100.5,10\n\
             2023-01-01 00:01:00,100.5,102,100,101,12\n",
        )
        .unwrap();
        assert_eq!(loaded.series.len(), 2);
        assert_eq!(loaded.dropped_rows, 0);
        let first = loaded.series.bars()[0];
        assert_eq!(first.close, 100.5);
        assert_eq!(first.timestamp, Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn headers_are_case_insensitive_and_reorderable() {
        let loaded = load(
            "Volume,Close,Low,High,Open,Timestamp\n\
             5,10,9,11,10,1672531200\n",
        )
        .unwrap();
        let c = loaded.series.bars()[0];
        assert_eq!((c.open, c.high, c.low, c.close, c.volume), (10.0, 11.0, 9.0, 10.0, 5.0));
    }

    #[test]
    fn rows_with_empty_fields_are_dropped_and_counted() {
        let loaded = load(
            "date,open,high,low,close,volume\n\
             2023-01-01 00:00:00,100,101,99,100,1\n\
             2023-01-01 00:01:00,100,,99,100,1\n\
             2023-01-01 00:02:00,100,101,99,100,1\n",
        )
        .unwrap();
        assert_eq!(loaded.series.len(), 2);
        assert_eq!(loaded.dropped_rows, 1);
    }

    #[test]
    fn garbage_value_is_fatal() {
        let err = load(
            "date,open,high,low,close,volume\n\
             2023-01-01 00:00:00,abc,101,99,100,1\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Data(ref m) if m.contains("line 2")));
    }

    #[test]
    fn negative_price_is_fatal() {
        assert!(load("date,open,high,low,close,volume\n2023-01-01 00:00,-1,1,1,1,1\n").is_err());
    }

    #[test]
    fn bar_outside_its_own_range_is_fatal() {
        let err = load(
            "date,open,high,low,close,volume\n\
             2023-01-01 00:00:00,100,90,95,120,1\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Data(ref m) if m.contains("line 2")));

        // Close above the high.
        assert!(load("date,open,high,low,close,volume\n2023-01-01 00:00,100,101,99,102,1\n").is_err());
        // Open below the low.
        assert!(load("date,open,high,low,close,volume\n2023-01-01 00:00,98,101,99,100,1\n").is_err());
    }

    #[test]
    fn duplicate_timestamp_is_fatal() {
        let err = load(
            "date,open,high,low,close,volume\n\
             2023-01-01 00:00:00,1,1,1,1,1\n\
             2023-01-01 00:00:00,1,1,1,1,1\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Data(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn missing_column_is_fatal() {
        let err = load("date,open,high,low,close\n2023-01-01 00:00,1,1,1,1\n").unwrap_err();
        assert!(matches!(err, Error::Data(ref m) if m.contains("volume")));
    }

    #[test]
    fn timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        for raw in [
            "2023-01-01T00:00:00Z",
            "2023-01-01 00:00:00",
            "2023-01-01 00:00:00.000",
            "2023-01-01 00:00",
            "1672531200",
            "1672531200000",
        ] {
            assert_eq!(parse_timestamp(raw), Some(expected), "{raw}");
        }
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
