// =============================================================================
// CSV export of scan reports
// =============================================================================
//
// Two layouts:
//   rows    one line per (symbol, timeframe) with the values behind the label
//   matrix  one line per symbol, one column per timeframe, cells are labels
// =============================================================================

use std::io::Write;

use anyhow::{Context, Result};
use csv::Writer;
use serde::Deserialize;

use crate::market_data::candle::format_in_offset;
use crate::screener::ScanReport;

/// Which CSV layout to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CsvLayout {
    #[default]
    Rows,
    Matrix,
}

/// Write `report` in `layout` to `writer`.
pub fn write_csv<W: Write>(
    report: &ScanReport,
    layout: CsvLayout,
    offset_minutes: i32,
    writer: W,
) -> Result<()> {
    match layout {
        CsvLayout::Rows => write_rows_csv(report, offset_minutes, writer),
        CsvLayout::Matrix => write_matrix_csv(report, writer),
    }
}

/// Render `report` into an in-memory CSV string.
pub fn to_csv_string(report: &ScanReport, layout: CsvLayout, offset_minutes: i32) -> Result<String> {
    let mut buf = Vec::new();
    write_csv(report, layout, offset_minutes, &mut buf)?;
    String::from_utf8(buf).context("CSV output is not valid UTF-8")
}

/// Shortest representation that reads back to the same `f64`; never rounds
/// sub-cent contract prices away.
fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Long layout: `symbol,timeframe,trend,last_close,sma_short,sma_long,candles,last_candle,error`.
pub fn write_rows_csv<W: Write>(report: &ScanReport, offset_minutes: i32, writer: W) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);
    wtr.write_record([
        "symbol",
        "timeframe",
        "trend",
        "last_close",
        "sma_short",
        "sma_long",
        "candles",
        "last_candle",
        "error",
    ])
    .context("failed to write CSV header")?;

    for row in &report.rows {
        wtr.write_record([
            row.symbol.clone(),
            row.timeframe.to_string(),
            row.label().to_string(),
            fmt_opt(row.reading.last_close),
            fmt_opt(row.reading.short_sma),
            fmt_opt(row.reading.long_sma),
            row.reading.candles.to_string(),
            row.last_candle
                .map(|ts| format_in_offset(ts, offset_minutes))
                .unwrap_or_default(),
            row.error.clone().unwrap_or_default(),
        ])
        .with_context(|| format!("failed to write CSV row for {}", row.symbol))?;
    }

    wtr.flush().context("failed to flush CSV writer")?;
    Ok(())
}

/// Wide layout: `symbol,<tf1>,<tf2>,…`. Missing pairs are empty cells.
pub fn write_matrix_csv<W: Write>(report: &ScanReport, writer: W) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);

    let mut timeframes = report.timeframes.clone();
    timeframes.sort();
    timeframes.dedup();

    let mut header = vec!["symbol".to_string()];
    header.extend(timeframes.iter().map(|tf| tf.to_string()));
    wtr.write_record(&header).context("failed to write CSV header")?;

    for (symbol, cells) in report.matrix() {
        let mut record = vec![symbol.clone()];
        record.extend(
            timeframes
                .iter()
                .map(|tf| cells.get(tf).map(|l| l.to_string()).unwrap_or_default()),
        );
        wtr.write_record(&record)
            .with_context(|| format!("failed to write CSV row for {symbol}"))?;
    }

    wtr.flush().context("failed to flush CSV writer")?;
    Ok(())
}
