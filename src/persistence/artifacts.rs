//! Session artifacts
//!
//! End-of-session outputs for a run:
//! - `{session_id}_result.json` — the full machine-readable result
//! - `{session_id}_summary.json` — compact per-symbol KPI table
//! - `{session_id}_report.txt` — human-readable report
//!
//! Degenerate ratios (no trades, zero starting balance) render as `n/a`
//! in the report and `null` in JSON, never NaN or infinity.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{KpiSnapshot, Ratio};
use crate::error::Result;
use crate::metrics::CycleAggregate;
use crate::orchestrator::SessionResult;

/// Compact end-of-session summary, one row per symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cycles_completed: u64,
    pub per_symbol: BTreeMap<String, KpiSnapshot>,
    pub aggregate: CycleAggregate,
    pub excluded: BTreeMap<String, String>,
}

impl SessionSummary {
    pub fn from_result(result: &SessionResult) -> Self {
        Self {
            session_id: result.session_id.clone(),
            status: result.status.to_string(),
            started_at: result.started_at,
            finished_at: result.finished_at,
            cycles_completed: result.cycles_completed,
            per_symbol: result.per_symbol.clone(),
            aggregate: result.aggregate.clone(),
            excluded: result.excluded.clone(),
        }
    }
}

/// Writes end-of-session artifacts into a session directory.
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    async fn write_file(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(name);
        tokio::fs::write(&path, content).await?;
        debug!(path = %path.display(), "artifact written");
        Ok(path)
    }

    /// Write all three artifacts for a finished session.
    pub async fn write_all(&self, result: &SessionResult) -> Result<Vec<PathBuf>> {
        let summary = SessionSummary::from_result(result);

        let mut written = Vec::with_capacity(3);
        written.push(
            self.write_file(
                &format!("{}_result.json", result.session_id),
                &serde_json::to_vec_pretty(result)?,
            )
            .await?,
        );
        written.push(
            self.write_file(
                &format!("{}_summary.json", result.session_id),
                &serde_json::to_vec_pretty(&summary)?,
            )
            .await?,
        );
        written.push(
            self.write_file(
                &format!("{}_report.txt", result.session_id),
                format_report(result).as_bytes(),
            )
            .await?,
        );

        info!(
            session = %result.session_id,
            dir = %self.dir.display(),
            "session artifacts written"
        );
        Ok(written)
    }
}

fn fmt_ratio(r: &Ratio) -> String {
    match r.value() {
        Some(v) => format!("{:.2}", v),
        None => "n/a".to_string(),
    }
}

/// Render the human-readable session report.
pub fn format_report(result: &SessionResult) -> String {
    let mut out = String::new();

    out.push_str("╔══════════════════════════════════════════════════════════════╗\n");
    out.push_str("║                       SESSION REPORT                         ║\n");
    out.push_str("╚══════════════════════════════════════════════════════════════╝\n\n");

    out.push_str(&format!("  Session:       {}\n", result.session_id));
    out.push_str(&format!("  Status:        {}\n", result.status));
    out.push_str(&format!("  Started:       {}\n", result.started_at));
    out.push_str(&format!("  Finished:      {}\n", result.finished_at));
    out.push_str(&format!("  Cycles:        {}\n", result.cycles_completed));
    if let Some(failure) = &result.failure {
        out.push_str(&format!("  Failure:       {}\n", failure));
    }

    let agg = &result.aggregate.kpi;
    out.push_str("\n  ── Aggregate ───────────────────────────────────────────────\n\n");
    out.push_str(&format!("  PnL:           {:.2}\n", agg.pnl));
    out.push_str(&format!("  PnL %:         {}\n", agg.pnl_pct.as_pct()));
    out.push_str(&format!("  Win rate:      {}\n", agg.win_rate.as_pct()));
    out.push_str(&format!(
        "  Trades:        {} ({} won / {} lost)\n",
        agg.trades, agg.won, agg.lost
    ));
    out.push_str(&format!(
        "  Max drawdown:  {}\n",
        agg.max_drawdown.as_pct()
    ));
    out.push_str(&format!("  Rejected:      {}\n", agg.rejected_orders));
    out.push_str(&format!(
        "  Active/idle:   {}/{}\n",
        result.aggregate.active_symbols, result.aggregate.idle_symbols
    ));
    if let Some(best) = &result.aggregate.best_symbol {
        out.push_str(&format!("  Best symbol:   {}\n", best));
    }
    if let Some(worst) = &result.aggregate.worst_symbol {
        out.push_str(&format!("  Worst symbol:  {}\n", worst));
    }

    out.push_str("\n  ── Per Symbol ──────────────────────────────────────────────\n\n");
    out.push_str("  Symbol     Trades  Win%     PnL        Drawdown  Avg bars\n");
    out.push_str("  ────────   ──────  ───────  ─────────  ────────  ────────\n");

    let mut rows: Vec<(&String, &KpiSnapshot)> = result.per_symbol.iter().collect();
    rows.sort_by(|a, b| {
        b.1.pnl
            .partial_cmp(&a.1.pnl)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for (symbol, kpi) in rows {
        out.push_str(&format!(
            "  {:<10} {:>4}    {:>7}  {:>9.2}  {:>8}  {:>8}\n",
            symbol,
            kpi.trades,
            kpi.win_rate.as_pct(),
            kpi.pnl,
            kpi.max_drawdown.as_pct(),
            fmt_ratio(&kpi.mean_bars_held),
        ));
    }

    if !result.excluded.is_empty() {
        out.push_str("\n  ── Excluded ────────────────────────────────────────────────\n\n");
        for (symbol, reason) in &result.excluded {
            out.push_str(&format!("  {:<10} {}\n", symbol, reason));
        }
    }

    out
}
