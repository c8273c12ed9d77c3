// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Daily per-agent KPI roll-up.

use std::sync::Arc;

use chrono::{NaiveDate, TimeDelta};
use deskline_core::{AgentId, Clock, DesklineError};
use deskline_storage::queries::{agents, kpi};
use deskline_storage::{AgentKpi, Database, KpiCounts};
use tracing::info;

/// Score in `[0, 100]`: half closure rate, half share of tickets never delayed.
pub fn overall_score(counts: &KpiCounts) -> f64 {
    if counts.total_tickets == 0 {
        return 0.0;
    }
    let total = f64::from(counts.total_tickets);
    let closed = f64::from(counts.closed_tickets.min(counts.total_tickets)) / total;
    let delayed = f64::from(counts.delayed_tickets.min(counts.total_tickets)) / total;
    let score = 100.0 * (0.5 * closed + 0.5 * (1.0 - delayed));
    (score * 100.0).round() / 100.0
}

#[derive(Clone)]
pub struct KpiAggregator {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl KpiAggregator {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub async fn compute_day(&self, agent_id: AgentId, day: NaiveDate) -> Result<AgentKpi, DesklineError> {
        let counts = kpi::day_counts(&self.db, agent_id, day).await?;
        let row = AgentKpi {
            agent_id,
            kpi_date: day,
            total_tickets: counts.total_tickets,
            closed_tickets: counts.closed_tickets,
            messages_sent: counts.messages_sent,
            messages_failed: counts.messages_failed,
            delay_count: counts.delay_count,
            delayed_tickets: counts.delayed_tickets,
            total_delay_secs: counts.total_delay_secs,
            avg_first_response_secs: counts.avg_first_response_secs,
            overall_score: overall_score(&counts),
        };
        kpi::upsert_kpi(&self.db, row.clone(), self.clock.now()).await?;
        Ok(row)
    }

    /// Recompute `day` for every agent.
    pub async fn compute_all(&self, day: NaiveDate) -> Result<Vec<AgentKpi>, DesklineError> {
        let mut rows = Vec::new();
        for agent in agents::list_agents(&self.db).await? {
            rows.push(self.compute_day(agent.id, day).await?);
        }
        info!(%day, agents = rows.len(), "kpis computed");
        Ok(rows)
    }

    /// Recompute the last `days` days, today included.
    pub async fn compute_range(&self, days: u32) -> Result<Vec<AgentKpi>, DesklineError> {
        let today = self.clock.now().date_naive();
        let mut rows = Vec::new();
        for offset in 0..days {
            let day = today - TimeDelta::days(i64::from(offset));
            rows.extend(self.compute_all(day).await?);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_weights_closure_and_punctuality() {
        let counts = KpiCounts {
            total_tickets: 4,
            closed_tickets: 2,
            delayed_tickets: 1,
            ..KpiCounts::default()
        };
        assert_eq!(overall_score(&counts), 62.5);

        let perfect = KpiCounts {
            total_tickets: 3,
            closed_tickets: 3,
            ..KpiCounts::default()
        };
        assert_eq!(overall_score(&perfect), 100.0);
    }

    #[test]
    fn no_tickets_scores_zero() {
        assert_eq!(overall_score(&KpiCounts::default()), 0.0);
    }
}
