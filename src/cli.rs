//! CLI definition and dispatch.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapters::csv_adapter::{CsvMarketAdapter, export_trade_records};
use crate::adapters::estimate_queue::EstimateQueue;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_state_adapter::JsonStateAdapter;
use crate::domain::book::FundBook;
use crate::domain::calendar::{
    TradeTimeSlot, parse_ymd_date, resolve_buy_timing, resolve_convert_timing,
    resolve_sell_timing, resolve_sip_timing,
};
use crate::domain::config_validation::{LedgerSettings, StateBackend};
use crate::domain::error::LedgerError;
use crate::domain::instruction::{
    BuyInstruction, ConvertInstruction, SellInstruction, SipInstruction, TradeInstruction,
    TradeOutcome,
};
use crate::domain::sip::{PlanRunOutcome, SipPlan};
use crate::domain::trade_record::TradeRecord;
use crate::ports::config_port::ConfigPort;
use crate::ports::market_port::MarketDataPort;
use crate::ports::state_port::StatePort;

#[derive(Parser, Debug)]
#[command(name = "fundledger", about = "Fund trade settlement and position ledger")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TimingKind {
    Buy,
    Sell,
    Sip,
    Convert,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Record a purchase by currency amount
    Buy {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        code: String,
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, allow_negative_numbers = true)]
        day_rate: Option<f64>,
        #[arg(long)]
        slot: Option<TradeTimeSlot>,
        /// Request time, `YYYY-MM-DD[ HH:MM[:SS]]`; defaults to now
        #[arg(long)]
        at: Option<String>,
    },
    /// Record a redemption by share count
    Sell {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        code: String,
        #[arg(long)]
        share: f64,
        /// Unit NAV; taken from the valuation snapshot when omitted
        #[arg(long)]
        nav: Option<f64>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, allow_negative_numbers = true)]
        day_rate: Option<f64>,
        #[arg(long)]
        slot: Option<TradeTimeSlot>,
        #[arg(long)]
        at: Option<String>,
    },
    /// Record a one-off recurring-plan contribution
    Sip {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        code: String,
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, allow_negative_numbers = true)]
        day_rate: Option<f64>,
        #[arg(long)]
        at: Option<String>,
    },
    /// Move value from one fund into another
    Convert {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        out_amount: f64,
        #[arg(long)]
        in_amount: f64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        slot: Option<TradeTimeSlot>,
        #[arg(long)]
        at: Option<String>,
    },
    /// Set a holding's amount and profit directly
    Import {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        code: String,
        #[arg(long)]
        amount: f64,
        #[arg(long, allow_negative_numbers = true, default_value_t = 0.0)]
        profit: f64,
        /// Keep the entry even when its amount reaches zero
        #[arg(long)]
        pin: bool,
    },
    /// Register a recurring investment plan
    PlanAdd {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        code: String,
        #[arg(long)]
        amount: f64,
        /// e.g. `monthly 15`, `weekly mon`, `每月 15日`
        #[arg(long)]
        period: String,
        #[arg(long)]
        next_run: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Replay every plan occurrence due on or before a date
    RunDue {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        today: Option<String>,
    },
    /// Replay due plans on a fixed tick until interrupted
    Watch {
        #[arg(short, long)]
        config: PathBuf,
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
    },
    /// List trade records for a fund, newest first
    Records {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        code: String,
    },
    /// List recurring plans
    Plans {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        code: Option<String>,
    },
    /// List current positions
    Positions {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Write trade records to a CSV file
    ExportRecords {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        code: Option<String>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the settlement dates for a request
    Timing {
        #[arg(long, value_enum)]
        kind: TimingKind,
        #[arg(long)]
        date: String,
        #[arg(long, default_value_t = TradeTimeSlot::AfterClose)]
        slot: TradeTimeSlot,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Buy {
            config,
            code,
            amount,
            name,
            day_rate,
            slot,
            at,
        } => run_mutation(&config, |session| {
            let requested_at = parse_request_instant(at.as_deref())?;
            let slot = slot.unwrap_or(session.settings.default_slot);
            let day_rate = day_rate.or_else(|| session.book.day_rate(&code));
            let outcome = session.book.execute(TradeInstruction::Buy(BuyInstruction {
                code: code.clone(),
                fund_name: name,
                amount,
                day_rate,
                slot,
                requested_at,
            }))?;
            print_outcome(&code, &outcome);
            Ok(())
        }),
        Command::Sell {
            config,
            code,
            share,
            nav,
            name,
            day_rate,
            slot,
            at,
        } => run_mutation(&config, |session| {
            let requested_at = parse_request_instant(at.as_deref())?;
            let nav = match nav {
                Some(nav) => nav,
                None => session.snapshot_nav(&code)?,
            };
            let slot = slot.unwrap_or(session.settings.default_slot);
            let day_rate = day_rate.or_else(|| session.book.day_rate(&code));
            let outcome = session.book.execute(TradeInstruction::Sell(SellInstruction {
                code: code.clone(),
                fund_name: name,
                share,
                nav,
                day_rate,
                slot,
                requested_at,
            }))?;
            print_outcome(&code, &outcome);
            Ok(())
        }),
        Command::Sip {
            config,
            code,
            amount,
            name,
            day_rate,
            at,
        } => run_mutation(&config, |session| {
            let requested_at = parse_request_instant(at.as_deref())?;
            let day_rate = day_rate.or_else(|| session.book.day_rate(&code));
            let outcome = session.book.execute(TradeInstruction::Sip(SipInstruction {
                code: code.clone(),
                fund_name: name,
                amount,
                day_rate,
                requested_at,
            }))?;
            print_outcome(&code, &outcome);
            Ok(())
        }),
        Command::Convert {
            config,
            from,
            to,
            out_amount,
            in_amount,
            name,
            slot,
            at,
        } => run_mutation(&config, |session| {
            let requested_at = parse_request_instant(at.as_deref())?;
            let slot = slot.unwrap_or(session.settings.default_slot);
            let instruction = ConvertInstruction {
                source_day_rate: session.book.day_rate(&from),
                target_day_rate: session.book.day_rate(&to),
                source_code: from.clone(),
                source_name: name,
                target_code: to,
                out_amount,
                in_amount,
                slot,
                requested_at,
            };
            let outcome = session
                .book
                .execute(TradeInstruction::Convert(instruction))?;
            print_outcome(&from, &outcome);
            Ok(())
        }),
        Command::Import {
            config,
            code,
            amount,
            profit,
            pin,
        } => run_mutation(&config, |session| {
            if !session.book.import_position(&code, amount, profit) {
                return Err(LedgerError::invalid(format!(
                    "cannot import {code}: amount must be positive"
                )));
            }
            if pin {
                session.book.pin_holding(&code);
            }
            println!("{code}: imported {amount:.2} (profit {profit:.2})");
            Ok(())
        }),
        Command::PlanAdd {
            config,
            code,
            amount,
            period,
            next_run,
            name,
        } => run_mutation(&config, |session| {
            let plan = session
                .book
                .add_sip_plan(&code, name.as_deref(), amount, &period, &next_run)
                .ok_or_else(|| LedgerError::invalid(format!("sip plan for {code} rejected")))?;
            print_plan(&plan);
            Ok(())
        }),
        Command::RunDue { config, today } => run_mutation(&config, |session| {
            let today = match today.as_deref() {
                Some(text) => parse_ymd_date(text)
                    .ok_or_else(|| LedgerError::invalid(format!("invalid date '{text}'")))?,
                None => session.book.today(),
            };
            let outcomes = session.book.run_due_sip_plans(Some(today));
            print_replay(&outcomes);
            Ok(())
        }),
        Command::Watch { config, ticks } => run_watch(&config, ticks),
        Command::Records { config, code } => run_query(&config, |session| {
            let records = session.book.get_trade_records_by_code(&code);
            if records.is_empty() {
                println!("no records for {code}");
            }
            for record in records {
                print_record(record);
            }
        }),
        Command::Plans { config, code } => run_query(&config, |session| {
            let plans: Vec<&SipPlan> = match code.as_deref() {
                Some(code) => session.book.get_sip_plans_by_code(code),
                None => session.book.plans().iter().collect(),
            };
            for plan in plans {
                print_plan(plan);
            }
        }),
        Command::Positions { config } => run_query(&config, print_positions),
        Command::ExportRecords {
            config,
            code,
            output,
        } => run_query_result(&config, |session| {
            let records: Vec<&TradeRecord> = match code.as_deref() {
                Some(code) => session.book.get_trade_records_by_code(code),
                None => session.book.records().all().iter().collect(),
            };
            let written = export_trade_records(&records, &output)?;
            eprintln!("Wrote {} records to {}", written, output.display());
            Ok(())
        }),
        Command::Timing { kind, date, slot } => {
            init_tracing(None);
            match parse_ymd_date(&date) {
                Some(date) => {
                    for line in timing_lines(kind, date, slot) {
                        println!("{line}");
                    }
                    ExitCode::SUCCESS
                }
                None => report(LedgerError::invalid(format!("invalid date '{date}'"))),
            }
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
pub fn init_tracing(configured: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // A second call (tests, repeated runs) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn report(err: LedgerError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::from(&err)
}

pub fn build_state_port(settings: &LedgerSettings) -> Result<Box<dyn StatePort>, LedgerError> {
    match settings.backend {
        StateBackend::Json => Ok(Box::new(JsonStateAdapter::new(&settings.state_path))),
        StateBackend::Sqlite => build_sqlite_port(&settings.state_path),
    }
}

#[cfg(feature = "sqlite")]
fn build_sqlite_port(path: &Path) -> Result<Box<dyn StatePort>, LedgerError> {
    let adapter = crate::adapters::sqlite_state_adapter::SqliteStateAdapter::open(path)?;
    Ok(Box::new(adapter))
}

#[cfg(not(feature = "sqlite"))]
fn build_sqlite_port(_path: &Path) -> Result<Box<dyn StatePort>, LedgerError> {
    Err(LedgerError::ConfigInvalid {
        section: "ledger".into(),
        key: "backend".into(),
        reason: "sqlite feature is required".into(),
    })
}

/// Request instant from `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD HH:MM` or a bare
/// date (midnight). `None` means now.
pub fn parse_request_instant(text: Option<&str>) -> Result<NaiveDateTime, LedgerError> {
    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(Local::now().naive_local());
    };
    for format in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(instant) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(instant);
        }
    }
    parse_ymd_date(text)
        .map(|date| date.and_time(NaiveTime::MIN))
        .ok_or_else(|| LedgerError::invalid(format!("invalid request time '{text}'")))
}

pub fn timing_lines(kind: TimingKind, date: NaiveDate, slot: TradeTimeSlot) -> Vec<String> {
    let (timing, cash) = match kind {
        TimingKind::Buy => (resolve_buy_timing(date, slot), None),
        TimingKind::Sell => {
            let sell = resolve_sell_timing(date, slot);
            (
                sell.timing,
                Some((sell.cash_arrival_start, sell.cash_arrival_end)),
            )
        }
        TimingKind::Sip => (resolve_sip_timing(date), None),
        TimingKind::Convert => (resolve_convert_timing(date, slot), None),
    };
    let mut lines = vec![
        format!("request: {}", timing.request_date),
        format!("trade:   {}", timing.trade_date),
        format!("confirm: {}", timing.confirm_date),
    ];
    if let Some((start, end)) = cash {
        lines.push(format!("cash:    {} .. {}", start, end));
    }
    lines
}

/// A loaded ledger plus the collaborators it was loaded from.
pub struct Session {
    pub settings: LedgerSettings,
    pub book: FundBook,
    store: Box<dyn StatePort>,
    market: Option<Arc<CsvMarketAdapter>>,
}

impl Session {
    pub fn open(config: &dyn ConfigPort) -> Result<Self, LedgerError> {
        let settings = LedgerSettings::from_config(config)?;
        let store = build_state_port(&settings)?;
        let market = match &settings.snapshot_csv {
            Some(path) => Some(Arc::new(CsvMarketAdapter::from_path(path)?)),
            None => None,
        };

        let state = store.load()?.unwrap_or_default();
        info!(
            path = %settings.state_path.display(),
            positions = state.positions.len(),
            records = state.records.len(),
            plans = state.plans.len(),
            "ledger opened"
        );

        let mut book = FundBook::from_state(state);
        if let Some(market) = &market {
            book = book.with_names(Box::new(Arc::clone(market)));
        }
        Ok(Session {
            settings,
            book,
            store,
            market,
        })
    }

    /// Codes held or invested in by a plan.
    pub fn tracked_codes(&self) -> Vec<String> {
        let codes: BTreeSet<String> = self
            .book
            .positions()
            .iter()
            .map(|p| p.code.clone())
            .chain(self.book.plans().iter().map(|p| p.code.clone()))
            .collect();
        codes.into_iter().collect()
    }

    pub fn snapshot_nav(&self, code: &str) -> Result<f64, LedgerError> {
        let market = self.market.as_ref().ok_or_else(|| LedgerError::MarketData {
            code: code.to_string(),
            reason: "no --nav given and no valuation snapshot configured".into(),
        })?;
        market
            .fetch_estimate(code)?
            .effective_nav()
            .ok_or_else(|| LedgerError::MarketData {
                code: code.to_string(),
                reason: "snapshot has no usable NAV".into(),
            })
    }

    pub async fn refresh_day_rates(&mut self, queue: &EstimateQueue) -> Result<usize, LedgerError> {
        let codes = self.tracked_codes();
        let estimates = queue.fetch_batch(&codes).await?;
        self.book.update_day_rates(&estimates);
        Ok(estimates.len())
    }

    fn refresh_day_rates_blocking(&mut self) -> Result<(), LedgerError> {
        let Some(market) = self.market.clone() else {
            return Ok(());
        };
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let refreshed = runtime.block_on(async {
            let (queue, _worker) = EstimateQueue::spawn(market);
            self.refresh_day_rates(&queue).await
        })?;
        info!(funds = refreshed, "day rates refreshed");
        Ok(())
    }

    pub fn save(&self) -> Result<(), LedgerError> {
        self.store.save(self.book.state())?;
        info!(version = self.book.version(), "ledger state saved");
        Ok(())
    }
}

fn start(config_path: &Path) -> Result<Session, ExitCode> {
    let adapter = load_config(config_path)?;
    init_tracing(adapter.get_text("logging", "filter").as_deref());
    let mut session = Session::open(&adapter).map_err(report)?;
    if let Err(e) = session.refresh_day_rates_blocking() {
        warn!(error = %e, "day rates not refreshed");
    }
    Ok(session)
}

/// Load, catch up due plans, apply `action`, then persist. State is saved
/// even when `action` is rejected so the catch-up is not lost.
fn run_mutation<F>(config_path: &Path, action: F) -> ExitCode
where
    F: FnOnce(&mut Session) -> Result<(), LedgerError>,
{
    let mut session = match start(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    print_replay(&session.book.run_due_sip_plans(None));

    let outcome = action(&mut session);
    if let Err(e) = session.save() {
        return report(e);
    }
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(e),
    }
}

fn run_query<F>(config_path: &Path, action: F) -> ExitCode
where
    F: FnOnce(&Session),
{
    run_query_result(config_path, |session| {
        action(session);
        Ok(())
    })
}

fn run_query_result<F>(config_path: &Path, action: F) -> ExitCode
where
    F: FnOnce(&Session) -> Result<(), LedgerError>,
{
    let session = match start(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    match action(&session) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(e),
    }
}

fn run_watch(config_path: &Path, ticks: Option<u64>) -> ExitCode {
    let mut session = match start(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(r) => r,
        Err(e) => return report(e.into()),
    };
    let period = Duration::from_secs(session.settings.tick_minutes.max(1) * 60);
    eprintln!(
        "Watching {} every {} min",
        session.settings.state_path.display(),
        session.settings.tick_minutes
    );
    match runtime.block_on(watch_loop(&mut session, period, ticks)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(e),
    }
}

/// Refresh day rates, replay due plans and save on every tick. The first
/// tick fires immediately. Stops after `ticks` ticks or on Ctrl-C.
pub async fn watch_loop(
    session: &mut Session,
    period: Duration,
    ticks: Option<u64>,
) -> Result<(), LedgerError> {
    let queue = session
        .market
        .clone()
        .map(|market| EstimateQueue::spawn(market).0);
    let mut interval = tokio::time::interval(period);
    let mut done = 0u64;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("watch interrupted");
                break;
            }
        }
        if let Some(queue) = &queue {
            if let Err(e) = session.refresh_day_rates(queue).await {
                warn!(error = %e, "day rates not refreshed");
            }
        }
        print_replay(&session.book.run_due_sip_plans(None));
        session.save()?;

        done += 1;
        if ticks.is_some_and(|n| done >= n) {
            break;
        }
    }
    Ok(())
}

fn print_outcome(code: &str, outcome: &TradeOutcome) {
    match outcome {
        TradeOutcome::Bought(t) | TradeOutcome::Invested(t) => {
            println!("{code}: trade {} confirm {}", t.trade_date, t.confirm_date);
        }
        TradeOutcome::Sold(r) => {
            println!(
                "{code}: sold {:.2} shares ({:.2}), remaining {:.2}; trade {} confirm {}, cash {} .. {}",
                r.sold_share,
                r.sold_amount,
                r.remaining_amount,
                r.timing.timing.trade_date,
                r.timing.timing.confirm_date,
                r.timing.cash_arrival_start,
                r.timing.cash_arrival_end,
            );
        }
        TradeOutcome::Converted(r) => {
            println!(
                "{code}: converted out {:.2}, in {:.2}; source {:.2}, target {:.2}; trade {} confirm {}",
                r.actual_out_amount,
                r.in_amount,
                r.source_remaining,
                r.target_amount,
                r.timing.trade_date,
                r.timing.confirm_date,
            );
        }
    }
}

fn print_replay(outcomes: &[PlanRunOutcome]) {
    for o in outcomes {
        if o.executed > 0 {
            eprintln!("plan {} ({}): {} occurrence(s) invested", o.plan_id, o.code, o.executed);
        }
        if o.stalled {
            eprintln!("warning: plan {} ({}) stalled", o.plan_id, o.code);
        }
        if o.guard_exhausted {
            eprintln!("warning: plan {} ({}) still due after catch-up limit", o.plan_id, o.code);
        }
    }
}

fn print_plan(plan: &SipPlan) {
    println!(
        "#{} {} {} {:.2} [{}] next {} invested {:.2} x{}",
        plan.id,
        plan.code,
        plan.fund_name,
        plan.amount,
        plan.period_text,
        plan.next_run_date,
        plan.invested_total,
        plan.invested_count,
    );
}

fn print_record(r: &TradeRecord) {
    println!(
        "#{} {} {} {} {:.2} {} {} trade {} confirm {}",
        r.id,
        r.occurred_at,
        r.trade_type,
        r.direction,
        r.amount,
        r.unit,
        r.fund_name,
        r.trade_date,
        r.confirm_date,
    );
}

fn print_positions(session: &Session) {
    let ledger = session.book.positions();
    if ledger.is_empty() {
        println!("no positions");
        return;
    }
    for p in ledger.iter() {
        let ratio = ledger
            .position_ratio(&p.code)
            .map(|r| format!("{:.1}%", r * 100.0))
            .unwrap_or_else(|| "--".into());
        println!(
            "{} amount {:.2} profit {:.2} ({}) day {:.2} ({}) held {}d ratio {}",
            p.code,
            p.amount,
            p.profit,
            p.profit_rate_label(),
            p.day_profit,
            p.day_profit_rate_label(),
            p.holding_days,
            ratio,
        );
    }
    println!(
        "total amount {:.2} profit {:.2} day {:.2}",
        ledger.total_amount(),
        ledger.total_profit(),
        ledger.total_day_profit()
    );
}
