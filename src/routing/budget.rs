use crate::config::CostControlConfig;
use crate::llm::types::LLMError;
use chrono::{DateTime, Local, NaiveTime};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Spend accumulated since the start of the current local day
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetLedger {
    pub daily_spent_usd: f64,
    pub day_start: DateTime<Local>,
}

impl BudgetLedger {
    fn new(now: DateTime<Local>) -> Self {
        Self {
            daily_spent_usd: 0.0,
            day_start: local_midnight(now),
        }
    }

    /// Zero the ledger once `now` falls on a later local day.
    /// Repeated calls within the same day are no-ops.
    fn roll_over(&mut self, now: DateTime<Local>) -> bool {
        let today = local_midnight(now);
        if today <= self.day_start {
            return false;
        }
        info!(
            "Daily budget reset; {:.4} USD spent on {}",
            self.daily_spent_usd,
            self.day_start.format("%Y-%m-%d")
        );
        self.daily_spent_usd = 0.0;
        self.day_start = today;
        true
    }
}

fn local_midnight(now: DateTime<Local>) -> DateTime<Local> {
    now.date_naive()
        .and_time(NaiveTime::MIN)
        .and_local_timezone(Local)
        .earliest()
        .unwrap_or(now)
}

/// Pre-flight cost checks and daily spend accounting
#[derive(Debug)]
pub struct BudgetGuard {
    config: CostControlConfig,
    ledger: Mutex<BudgetLedger>,
}

impl BudgetGuard {
    pub fn new(config: CostControlConfig) -> Self {
        Self {
            config,
            ledger: Mutex::new(BudgetLedger::new(Local::now())),
        }
    }

    pub async fn check(&self, max_cost: Option<f64>) -> Result<(), LLMError> {
        self.check_at(max_cost, Local::now()).await
    }

    /// Reject a request whose declared cost exceeds the per-request ceiling,
    /// or any request once the day's spend has reached the budget.
    pub async fn check_at(&self, max_cost: Option<f64>, now: DateTime<Local>) -> Result<(), LLMError> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut ledger = self.ledger.lock().await;
        ledger.roll_over(now);

        if let Some(requested) = max_cost
            && requested > self.config.max_cost_per_request
        {
            return Err(LLMError::CostCeilingExceeded {
                requested,
                limit: self.config.max_cost_per_request,
            });
        }

        if ledger.daily_spent_usd >= self.config.daily_budget {
            return Err(LLMError::DailyBudgetExceeded {
                spent: ledger.daily_spent_usd,
                budget: self.config.daily_budget,
            });
        }

        Ok(())
    }

    pub async fn record(&self, cost: f64) {
        self.record_at(cost, Local::now()).await
    }

    pub async fn record_at(&self, cost: f64, now: DateTime<Local>) {
        if cost <= 0.0 {
            return;
        }
        let mut ledger = self.ledger.lock().await;
        ledger.roll_over(now);
        ledger.daily_spent_usd += cost;
        debug!(
            "Recorded {:.6} USD, daily spend now {:.6}",
            cost, ledger.daily_spent_usd
        );
    }

    pub async fn daily_spent(&self) -> f64 {
        let mut ledger = self.ledger.lock().await;
        ledger.roll_over(Local::now());
        ledger.daily_spent_usd
    }

    pub async fn ledger(&self) -> BudgetLedger {
        self.ledger.lock().await.clone()
    }
}
