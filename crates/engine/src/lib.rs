pub mod backtest;
pub mod data;
pub mod executor;
pub mod report;

pub use backtest::{validate_inputs, Backtest, BacktestConfig, BacktestResult, MonthEnd};
pub use data::{load_csv, read_candles, LoadedCandles};
pub use executor::OrderExecutor;
pub use report::{
    artifact_dir, monthly_breakdown, report_markdown, summary_json, trades_csv, write_artifacts,
    MonthlyStats, PerformanceReport,
};
