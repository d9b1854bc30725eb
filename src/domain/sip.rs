//! Recurring investment plans and their catch-up replay.
//!
//! Each run executes every occurrence that fell due since the last run, so a
//! plan that was due while nothing was running is not silently skipped.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use super::calendar::parse_ymd_date;
use super::error::LedgerError;
use super::instruction::SipInstruction;
use super::ledger::PositionLedger;
use super::operations::{default_fund_name, sip};
use super::trade_record::TradeRecordLog;

/// Upper bound on occurrences replayed for one plan in one run.
pub const MAX_CATCH_UP_ITERATIONS: usize = 366;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SipCycle {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

impl fmt::Display for SipCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SipCycle::Daily => "daily",
            SipCycle::Weekly => "weekly",
            SipCycle::Biweekly => "biweekly",
            SipCycle::Monthly => "monthly",
        };
        f.write_str(s)
    }
}

impl FromStr for SipCycle {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(SipCycle::Daily),
            "weekly" => Ok(SipCycle::Weekly),
            "biweekly" => Ok(SipCycle::Biweekly),
            "monthly" => Ok(SipCycle::Monthly),
            other => Err(LedgerError::invalid(format!("unknown sip cycle '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    #[default]
    Running,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SipPlan {
    pub id: u64,
    pub code: String,
    pub fund_name: String,
    pub amount: f64,
    pub cycle: SipCycle,
    /// Weekday token (`mon`..`sun`) for weekly cycles, day-of-month for monthly.
    pub cycle_value: String,
    pub period_text: String,
    pub next_run_date: NaiveDate,
    pub invested_total: f64,
    pub invested_count: u32,
    #[serde(default)]
    pub status: PlanStatus,
}

/// What one replay run did for one plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRunOutcome {
    pub plan_id: u64,
    pub code: String,
    pub executed: u32,
    /// A due occurrence failed; the plan stays due for the next run.
    pub stalled: bool,
    /// The iteration cap stopped the run while occurrences were still due.
    pub guard_exhausted: bool,
}

fn weekday_token(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

fn parse_weekday(text: &str) -> Option<Weekday> {
    let t = text
        .trim()
        .trim_start_matches("星期")
        .trim_start_matches('周')
        .to_lowercase();
    let day = match t.as_str() {
        "mon" | "monday" | "一" | "1" => Weekday::Mon,
        "tue" | "tuesday" | "二" | "2" => Weekday::Tue,
        "wed" | "wednesday" | "三" | "3" => Weekday::Wed,
        "thu" | "thursday" | "四" | "4" => Weekday::Thu,
        "fri" | "friday" | "五" | "5" => Weekday::Fri,
        "sat" | "saturday" | "六" | "6" => Weekday::Sat,
        "sun" | "sunday" | "日" | "天" | "7" => Weekday::Sun,
        _ => return None,
    };
    Some(day)
}

fn parse_month_day(text: &str) -> Option<u32> {
    let digits = text.trim().trim_end_matches(['日', '号']);
    digits.parse::<u32>().ok().filter(|d| (1..=31).contains(d))
}

/// Split a period label into its cycle and the normalized cycle value.
///
/// English (`monthly 15`, `weekly mon`) and Chinese (`每月 15日`, `每周 周一`)
/// labels are accepted. A missing value falls back to `next_run_date`.
pub fn parse_period_text(text: &str, next_run_date: NaiveDate) -> Option<(SipCycle, String)> {
    let lower = text.trim().to_lowercase();
    let (cycle, rest) = if let Some(rest) = lower.strip_prefix("biweekly") {
        (SipCycle::Biweekly, rest)
    } else if let Some(rest) = lower.strip_prefix("fortnightly") {
        (SipCycle::Biweekly, rest)
    } else if let Some(rest) = lower.strip_prefix("weekly") {
        (SipCycle::Weekly, rest)
    } else if let Some(rest) = lower.strip_prefix("monthly") {
        (SipCycle::Monthly, rest)
    } else if let Some(rest) = lower.strip_prefix("daily") {
        (SipCycle::Daily, rest)
    } else if let Some(rest) = lower.strip_prefix("每两周") {
        (SipCycle::Biweekly, rest)
    } else if let Some(rest) = lower.strip_prefix("双周") {
        (SipCycle::Biweekly, rest)
    } else if let Some(rest) = lower.strip_prefix("每周") {
        (SipCycle::Weekly, rest)
    } else if let Some(rest) = lower.strip_prefix("每月") {
        (SipCycle::Monthly, rest)
    } else if let Some(rest) = lower
        .strip_prefix("每日")
        .or_else(|| lower.strip_prefix("每天"))
        .or_else(|| lower.strip_prefix("每个交易日"))
    {
        (SipCycle::Daily, rest)
    } else {
        return None;
    };

    let rest = rest.trim();
    let value = match cycle {
        SipCycle::Daily => String::new(),
        SipCycle::Weekly | SipCycle::Biweekly => {
            let day = if rest.is_empty() {
                next_run_date.weekday()
            } else {
                parse_weekday(rest)?
            };
            weekday_token(day).to_string()
        }
        SipCycle::Monthly => {
            let day = if rest.is_empty() {
                next_run_date.day()
            } else {
                parse_month_day(rest)?
            };
            day.to_string()
        }
    };
    Some((cycle, value))
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .and_then(|first| first.pred_opt())
        .map_or(28, |last| last.day())
}

/// Next occurrence after `date` for the given cycle.
///
/// Monthly plans land on `cycle_value` in the following month, clamped to the
/// month's last day.
pub fn advance_run_date(date: NaiveDate, cycle: SipCycle, cycle_value: &str) -> NaiveDate {
    match cycle {
        SipCycle::Daily => date + Duration::days(1),
        SipCycle::Weekly => date + Duration::days(7),
        SipCycle::Biweekly => date + Duration::days(14),
        SipCycle::Monthly => {
            let target = parse_month_day(cycle_value).unwrap_or(date.day());
            let (year, month) = if date.month() == 12 {
                (date.year() + 1, 1)
            } else {
                (date.year(), date.month() + 1)
            };
            let day = target.min(last_day_of_month(year, month));
            NaiveDate::from_ymd_opt(year, month, day).unwrap_or(date + Duration::days(28))
        }
    }
}

/// All recurring plans, grouped by instrument code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SipScheduler {
    seed: u64,
    plans: BTreeMap<String, Vec<SipPlan>>,
}

impl SipScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a scheduler from stored plans; `seed` is the last id handed out.
    pub fn from_parts(seed: u64, plans: impl IntoIterator<Item = SipPlan>) -> Self {
        let mut scheduler = SipScheduler {
            seed,
            plans: BTreeMap::new(),
        };
        for plan in plans {
            scheduler.seed = scheduler.seed.max(plan.id);
            scheduler.plans.entry(plan.code.clone()).or_default().push(plan);
        }
        scheduler
    }

    pub fn last_id(&self) -> u64 {
        self.seed
    }

    /// Register a plan. Rejects an empty code, a non-positive amount, an
    /// unknown period label or a malformed `YYYY-MM-DD` next-run date.
    pub fn add_plan(
        &mut self,
        code: &str,
        fund_name: &str,
        amount: f64,
        period_text: &str,
        next_run_date: &str,
    ) -> Result<&SipPlan, LedgerError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(LedgerError::invalid("plan code must not be empty"));
        }
        if !amount.is_finite() || amount <= 0.0 {
            return Err(LedgerError::invalid(format!(
                "plan amount must be positive, got {amount}"
            )));
        }
        let next_run_date = parse_ymd_date(next_run_date).ok_or_else(|| {
            LedgerError::invalid(format!("invalid next run date '{next_run_date}'"))
        })?;
        let (cycle, cycle_value) = parse_period_text(period_text, next_run_date)
            .ok_or_else(|| LedgerError::invalid(format!("unknown period '{period_text}'")))?;

        let name = fund_name.trim();
        self.seed += 1;
        let plan = SipPlan {
            id: self.seed,
            code: code.to_string(),
            fund_name: if name.is_empty() {
                default_fund_name(code)
            } else {
                name.to_string()
            },
            amount,
            cycle,
            cycle_value,
            period_text: period_text.trim().to_string(),
            next_run_date,
            invested_total: 0.0,
            invested_count: 0,
            status: PlanStatus::Running,
        };
        let list = self.plans.entry(code.to_string()).or_default();
        list.push(plan);
        Ok(&list[list.len() - 1])
    }

    /// Plans for `code`, newest first.
    pub fn plans_by_code(&self, code: &str) -> Vec<&SipPlan> {
        let mut found: Vec<&SipPlan> = self
            .plans
            .get(code.trim())
            .map(|list| list.iter().collect())
            .unwrap_or_default();
        found.sort_by(|a, b| b.id.cmp(&a.id));
        found
    }

    pub fn get(&self, id: u64) -> Option<&SipPlan> {
        self.plans.values().flatten().find(|p| p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SipPlan> {
        self.plans.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.plans.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replay every occurrence due on or before `today`.
    ///
    /// `day_rates` maps codes to the current daily change in percent.
    pub fn run_due(
        &mut self,
        today: NaiveDate,
        ledger: &mut PositionLedger,
        log: &mut TradeRecordLog,
        day_rates: &HashMap<String, f64>,
    ) -> Vec<PlanRunOutcome> {
        let mut outcomes = Vec::new();
        for plan in self.plans.values_mut().flatten() {
            outcomes.push(run_plan(plan, today, ledger, log, day_rates));
        }
        outcomes
    }
}

fn run_plan(
    plan: &mut SipPlan,
    today: NaiveDate,
    ledger: &mut PositionLedger,
    log: &mut TradeRecordLog,
    day_rates: &HashMap<String, f64>,
) -> PlanRunOutcome {
    let mut outcome = PlanRunOutcome {
        plan_id: plan.id,
        code: plan.code.clone(),
        executed: 0,
        stalled: false,
        guard_exhausted: false,
    };

    for _ in 0..MAX_CATCH_UP_ITERATIONS {
        if plan.next_run_date > today {
            break;
        }
        let instruction = SipInstruction {
            code: plan.code.clone(),
            fund_name: Some(plan.fund_name.clone()),
            amount: plan.amount,
            day_rate: day_rates.get(&plan.code).copied(),
            requested_at: plan.next_run_date.and_time(NaiveTime::MIN),
        };
        if let Err(e) = sip(ledger, log, &instruction) {
            warn!(plan_id = plan.id, code = %plan.code, due = %plan.next_run_date, error = %e, "sip plan stalled");
            outcome.stalled = true;
            break;
        }
        plan.invested_total += plan.amount;
        plan.invested_count += 1;
        plan.next_run_date = advance_run_date(plan.next_run_date, plan.cycle, &plan.cycle_value);
        outcome.executed += 1;
    }

    if !outcome.stalled && plan.next_run_date <= today {
        warn!(plan_id = plan.id, code = %plan.code, "sip catch-up hit iteration cap");
        outcome.guard_exhausted = true;
    }
    if outcome.executed > 0 {
        debug!(plan_id = plan.id, executed = outcome.executed, next_run = %plan.next_run_date, "sip plan replayed");
    }
    outcome
}
