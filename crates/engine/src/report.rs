//! Summary statistics and on-disk artifacts for a finished run.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use tracing::info;

use common::{ClosedTrade, Error, Position, Result};

use crate::backtest::BacktestResult;

/// One calendar month of activity. Trades are bucketed by exit time, with an
/// exit stamped exactly at midnight on the 1st counted in the month it closes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyStats {
    pub year: i32,
    pub month: u32,
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub pnl: f64,
    pub end_equity: Option<f64>,
}

impl MonthlyStats {
    fn empty(year: i32, month: u32) -> Self {
        Self {
            year,
            month,
            trades: 0,
            wins: 0,
            win_rate: 0.0,
            pnl: 0.0,
            end_equity: None,
        }
    }

    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub strategy: String,
    pub symbol: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub initial_equity: f64,
    /// Marked to the last close, so it includes any excluded open position.
    pub final_equity: f64,
    /// Realized PnL over closed trades.
    pub total_pnl: f64,
    pub total_return_pct: f64,
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub avg_win_r: f64,
    pub avg_loss_r: f64,
    pub avg_r: f64,
    /// `None` when there are no losing trades.
    pub profit_factor: Option<f64>,
    pub max_drawdown_pct: f64,
    pub long_trades: usize,
    pub short_trades: usize,
    pub forced_closes: usize,
    pub exit_reasons: BTreeMap<String, usize>,
    pub signals: usize,
    pub rejected_signals: usize,
    pub open_positions_excluded: usize,
    pub open_positions: Vec<Position>,
    pub monthly: Vec<MonthlyStats>,
}

impl PerformanceReport {
    pub fn from_result(result: &BacktestResult) -> Self {
        let trades = &result.trades;
        let initial_equity = result.config.initial_capital;
        let final_equity = result.portfolio.equity;

        let (winners, losers): (Vec<&ClosedTrade>, Vec<&ClosedTrade>) =
            trades.iter().partition(|t| t.is_win());
        let gross_win: f64 = winners.iter().map(|t| t.pnl).sum();
        let gross_loss: f64 = losers.iter().map(|t| t.pnl).sum();

        let mut exit_reasons = BTreeMap::new();
        for t in trades {
            *exit_reasons.entry(t.exit_reason.to_string()).or_insert(0) += 1;
        }

        Self {
            strategy: result.strategy.clone(),
            symbol: result.config.symbol.clone(),
            start: result.start,
            end: result.end,
            initial_equity,
            final_equity,
            total_pnl: gross_win + gross_loss,
            total_return_pct: if initial_equity > 0.0 {
                (final_equity - initial_equity) / initial_equity * 100.0
            } else {
                0.0
            },
            total_trades: trades.len(),
            wins: winners.len(),
            losses: losers.len(),
            win_rate: ratio(winners.len(), trades.len()),
            avg_win_r: mean(winners.iter().map(|t| t.pnl_r)),
            avg_loss_r: mean(losers.iter().map(|t| t.pnl_r)),
            avg_r: mean(trades.iter().map(|t| t.pnl_r)),
            profit_factor: (gross_loss < 0.0).then(|| gross_win / gross_loss.abs()),
            max_drawdown_pct: result.portfolio.max_drawdown * 100.0,
            long_trades: trades.iter().filter(|t| t.side == common::Side::Long).count(),
            short_trades: trades.iter().filter(|t| t.side == common::Side::Short).count(),
            forced_closes: trades.iter().filter(|t| t.forced).count(),
            exit_reasons,
            signals: result.signals,
            rejected_signals: result.rejected_signals,
            open_positions_excluded: result.open_positions.len(),
            open_positions: result.open_positions.clone(),
            monthly: monthly_breakdown(result),
        }
    }
}

/// Per-month figures. Months with no trades still appear when the clock
/// passed through them.
pub fn monthly_breakdown(result: &BacktestResult) -> Vec<MonthlyStats> {
    let mut months: BTreeMap<(i32, u32), MonthlyStats> = BTreeMap::new();

    for m in &result.month_ends {
        months
            .entry((m.year, m.month))
            .or_insert_with(|| MonthlyStats::empty(m.year, m.month))
            .end_equity = Some(m.equity);
    }
    for t in &result.trades {
        // Same attribution as the month-end equity.
        let stamp = t.exit_time - chrono::Duration::nanoseconds(1);
        let key = (stamp.year(), stamp.month());
        let stats = months
            .entry(key)
            .or_insert_with(|| MonthlyStats::empty(key.0, key.1));
        stats.trades += 1;
        stats.pnl += t.pnl;
        if t.is_win() {
            stats.wins += 1;
        }
    }

    months
        .into_values()
        .map(|mut s| {
            s.win_rate = ratio(s.wins, s.trades);
            s
        })
        .collect()
}

fn ratio(n: usize, d: usize) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

// ─── Writers ─────────────────────────────────────────────────────────────────

/// Trade log as CSV, one row per closed trade in close order.
pub fn trades_csv(trades: &[ClosedTrade]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "entry_time",
        "exit_time",
        "symbol",
        "side",
        "entry_price",
        "exit_price",
        "quantity",
        "pnl",
        "pnl_r",
        "exit_reason",
        "entry_reason",
        "forced",
    ])?;

    for t in trades {
        wtr.write_record(&[
            t.entry_time.to_rfc3339(),
            t.exit_time.to_rfc3339(),
            t.symbol.clone(),
            t.side.to_string(),
            format!("{:.8}", t.entry_price),
            format!("{:.8}", t.exit_price),
            format!("{:.8}", t.quantity),
            format!("{:.4}", t.pnl),
            format!("{:.4}", t.pnl_r),
            t.exit_reason.to_string(),
            t.entry_reason.clone(),
            t.forced.to_string(),
        ])?;
    }

    let bytes = wtr.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| Error::Data(format!("trade log is not UTF-8: {e}")))
}

pub fn summary_json(report: &PerformanceReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Human-readable Markdown summary.
pub fn report_markdown(report: &PerformanceReport) -> String {
    let mut md = String::with_capacity(2048);
    let fmt_time = |t: Option<DateTime<Utc>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".into())
    };

    let _ = writeln!(md, "# Backtest Report: {}\n", report.strategy);
    md.push_str("| Field | Value |\n| --- | --- |\n");
    let _ = writeln!(md, "| Symbol | {} |", report.symbol);
    let _ = writeln!(
        md,
        "| Period | {} to {} |",
        fmt_time(report.start),
        fmt_time(report.end)
    );
    let _ = writeln!(md, "| Initial Equity | ${:.2} |", report.initial_equity);
    let _ = writeln!(md, "| Final Equity | ${:.2} |", report.final_equity);
    let _ = writeln!(md, "| Total PnL | ${:.2} |", report.total_pnl);
    let _ = writeln!(md, "| Total Return | {:.2}% |", report.total_return_pct);
    let _ = writeln!(md, "| Max Drawdown | {:.2}% |", report.max_drawdown_pct);
    md.push('\n');

    md.push_str("## Trades\n\n| Metric | Value |\n| --- | --- |\n");
    let _ = writeln!(
        md,
        "| Trades | {} ({} long / {} short) |",
        report.total_trades, report.long_trades, report.short_trades
    );
    let _ = writeln!(md, "| Wins / Losses | {} / {} |", report.wins, report.losses);
    let _ = writeln!(md, "| Win Rate | {:.1}% |", report.win_rate * 100.0);
    let _ = writeln!(md, "| Avg Win | {:.2}R |", report.avg_win_r);
    let _ = writeln!(md, "| Avg Loss | {:.2}R |", report.avg_loss_r);
    let _ = writeln!(md, "| Avg Trade | {:.2}R |", report.avg_r);
    match report.profit_factor {
        Some(pf) => {
            let _ = writeln!(md, "| Profit Factor | {pf:.2} |");
        }
        None => md.push_str("| Profit Factor | n/a |\n"),
    }
    let _ = writeln!(md, "| Forced Closes | {} |", report.forced_closes);
    let _ = writeln!(
        md,
        "| Signals | {} ({} rejected) |",
        report.signals, report.rejected_signals
    );
    let _ = writeln!(
        md,
        "| Open Positions Excluded | {} |",
        report.open_positions_excluded
    );
    md.push('\n');

    if !report.exit_reasons.is_empty() {
        md.push_str("## Exit Reasons\n\n| Reason | Count |\n| --- | --- |\n");
        for (reason, count) in &report.exit_reasons {
            let _ = writeln!(md, "| {reason} | {count} |");
        }
        md.push('\n');
    }

    if !report.monthly.is_empty() {
        md.push_str("## Monthly\n\n");
        md.push_str("| Month | Trades | Win Rate | PnL | End Equity |\n");
        md.push_str("| --- | --- | --- | --- | --- |\n");
        for m in &report.monthly {
            let equity = m
                .end_equity
                .map(|e| format!("${e:.2}"))
                .unwrap_or_else(|| "-".into());
            let _ = writeln!(
                md,
                "| {} | {} | {:.1}% | ${:.2} | {} |",
                m.label(),
                m.trades,
                m.win_rate * 100.0,
                m.pnl,
                equity
            );
        }
        md.push('\n');
    }

    md
}

/// Write `trades.csv`, `summary.json` and `report.md` into `dir`.
///
/// Returns the report that was written.
pub fn write_artifacts(dir: &Path, result: &BacktestResult) -> Result<PerformanceReport> {
    std::fs::create_dir_all(dir)?;
    let report = PerformanceReport::from_result(result);

    std::fs::write(dir.join("trades.csv"), trades_csv(&result.trades)?)?;
    std::fs::write(dir.join("summary.json"), summary_json(&report)?)?;
    std::fs::write(dir.join("report.md"), report_markdown(&report))?;

    info!(
        strategy = %report.strategy,
        dir = %dir.display(),
        trades = report.total_trades,
        "Artifacts written"
    );
    Ok(report)
}

/// Directory name for a strategy's artifacts: lowercase, `[a-z0-9_-]` only.
pub fn artifact_dir(root: &Path, strategy: &str) -> PathBuf {
    let slug: String = strategy
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    root.join(if slug.is_empty() { "strategy".into() } else { slug })
}
