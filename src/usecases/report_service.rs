use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::accounting::{Accountant, ProfitLossReport};
use crate::csv_history::export_report;
use crate::api_client::PriceProvider;
use crate::config::AccountingSettings;
use crate::domain::fval::Timestamp;
use crate::domain::models::PnlReportRecord;
use crate::domain::repository::HistoryRepo;
use crate::errors::AccountingError;
use crate::history::historian::{HistoryResult, TradesHistorian};
use crate::history::{HistoryAction, limit_trade_list_to_period};
use crate::price::PriceCache;

pub struct ReportService {
    pub historian: Arc<TradesHistorian>,
    pub provider: Arc<dyn PriceProvider>,
    pub repo: Arc<dyn HistoryRepo>,
    pub settings: AccountingSettings,
    pub export_dir: Option<PathBuf>,
}

impl ReportService {
    pub fn new(
        historian: Arc<TradesHistorian>,
        provider: Arc<dyn PriceProvider>,
        repo: Arc<dyn HistoryRepo>,
        settings: AccountingSettings,
    ) -> Self {
        Self {
            historian,
            provider,
            repo,
            settings,
            export_dir: None,
        }
    }

    pub fn with_export_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.export_dir = dir;
        self
    }

    /// Actions with `start_ts <= ts <= end_ts`, plus the source error string.
    pub async fn history_in_period(&self, start_ts: Timestamp, end_ts: Timestamp) -> (Vec<HistoryAction>, String) {
        let HistoryResult { actions, error } = self.historian.create_history(end_ts).await;
        let limited = limit_trade_list_to_period(&actions, start_ts, end_ts).to_vec();
        (limited, error)
    }

    /// Builds the profit/loss report for the window, stores it and, when an
    /// export directory is set, writes it out as CSV.
    /// Failing to store or export the report is logged, not returned.
    pub async fn compute_and_record(
        &self,
        start_ts: Timestamp,
        end_ts: Timestamp,
    ) -> Result<ProfitLossReport, AccountingError> {
        let history = self.historian.create_history(end_ts).await;

        let mut prices = PriceCache::new();
        prices
            .prefetch(
                self.provider.as_ref(),
                &history.actions,
                &self.settings.profit_currency,
            )
            .await;

        let mut accountant = Accountant::new(self.settings.clone(), Arc::new(prices))?;
        let mut report = accountant.process_history(start_ts, end_ts, history.actions);
        if !history.error.is_empty() {
            report.errors.push(history.error);
        }
        info!(
            start_ts,
            end_ts,
            events = report.all_events.len(),
            total = %report.overview.total_profit_loss,
            "Profit/loss report computed",
        );

        match serde_json::to_string(&report) {
            Ok(payload) => {
                let rec = PnlReportRecord {
                    id: None,
                    computed_at: chrono::Utc::now().to_rfc3339(),
                    start_ts,
                    end_ts,
                    profit_currency: self.settings.profit_currency.to_string(),
                    payload,
                };
                if let Err(e) = self.repo.persist_report(&rec).await {
                    error!(error = %e, "Failed to persist report");
                }
            }
            Err(e) => error!(error = %e, "Failed to serialize report"),
        }

        if let Some(dir) = &self.export_dir {
            if let Err(e) = export_report(&report, dir) {
                error!(error = %e, dir = %dir.display(), "Failed to export report CSV");
            }
        }

        Ok(report)
    }
}
