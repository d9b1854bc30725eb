//! SQLite persistence for the ledger state.
//!
//! The whole state is rewritten inside one transaction on every save, so a
//! crash mid-save leaves the previous snapshot intact.

use chrono::NaiveDate;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;

use crate::domain::book::LedgerState;
use crate::domain::error::LedgerError;
use crate::domain::ledger::PositionLedger;
use crate::domain::position::Position;
use crate::domain::sip::{PlanStatus, SipPlan, SipScheduler};
use crate::domain::trade_record::{TradeRecord, TradeRecordLog};
use crate::ports::state_port::StatePort;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS positions (
        code TEXT PRIMARY KEY,
        amount REAL NOT NULL,
        profit REAL NOT NULL,
        holding_days INTEGER NOT NULL,
        profit_rate REAL,
        day_profit REAL NOT NULL,
        day_profit_rate REAL
    );
    CREATE TABLE IF NOT EXISTS holding_refs (
        code TEXT PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS trade_records (
        id INTEGER PRIMARY KEY,
        code TEXT NOT NULL,
        fund_name TEXT NOT NULL,
        type TEXT NOT NULL,
        direction TEXT NOT NULL,
        amount REAL NOT NULL,
        unit TEXT NOT NULL,
        request_date TEXT NOT NULL,
        trade_date TEXT NOT NULL,
        confirm_date TEXT NOT NULL,
        occurred_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_trade_records_code ON trade_records(code);
    CREATE TABLE IF NOT EXISTS sip_plans (
        id INTEGER PRIMARY KEY,
        code TEXT NOT NULL,
        fund_name TEXT NOT NULL,
        amount REAL NOT NULL,
        cycle TEXT NOT NULL,
        cycle_value TEXT NOT NULL,
        period_text TEXT NOT NULL,
        next_run_date TEXT NOT NULL,
        invested_total REAL NOT NULL,
        invested_count INTEGER NOT NULL,
        status TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS ledger_meta (
        key TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );";

pub struct SqliteStateAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn storage(e: r2d2::Error) -> LedgerError {
    LedgerError::Storage {
        reason: e.to_string(),
    }
}

fn query(e: rusqlite::Error) -> LedgerError {
    LedgerError::StorageQuery {
        reason: e.to_string(),
    }
}

fn parse_stored_date(text: &str) -> Result<NaiveDate, LedgerError> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|e| LedgerError::StorageQuery {
        reason: format!("bad stored date '{}': {}", text, e),
    })
}

fn to_u32(value: i64, column: &str) -> Result<u32, LedgerError> {
    u32::try_from(value).map_err(|_| LedgerError::StorageQuery {
        reason: format!("{} out of range: {}", column, value),
    })
}

impl SqliteStateAdapter {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(2).build(manager).map_err(storage)?;
        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    pub fn in_memory() -> Result<Self, LedgerError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(storage)?;
        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    pub fn initialize_schema(&self) -> Result<(), LedgerError> {
        let conn = self.pool.get().map_err(storage)?;
        conn.execute_batch(SCHEMA).map_err(query)?;
        Ok(())
    }

    fn read_meta(conn: &Connection, key: &str) -> Result<Option<u64>, LedgerError> {
        let value: Option<i64> = conn
            .query_row(
                "SELECT value FROM ledger_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(query)?;
        Ok(value.map(|v| v.max(0) as u64))
    }

    fn read_positions(conn: &Connection) -> Result<PositionLedger, LedgerError> {
        let mut stmt = conn
            .prepare(
                "SELECT code, amount, profit, holding_days, profit_rate, day_profit, day_profit_rate
                 FROM positions ORDER BY code",
            )
            .map_err(query)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, Option<f64>>(6)?,
                ))
            })
            .map_err(query)?;

        let mut positions = Vec::new();
        for row in rows {
            let (code, amount, profit, days, profit_rate, day_profit, day_profit_rate) =
                row.map_err(query)?;
            positions.push(Position {
                code,
                amount,
                profit,
                holding_days: to_u32(days, "holding_days")?,
                profit_rate,
                day_profit,
                day_profit_rate,
            });
        }

        let mut stmt = conn
            .prepare("SELECT code FROM holding_refs ORDER BY code")
            .map_err(query)?;
        let pinned = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query)?;

        Ok(PositionLedger::from_parts(positions, pinned))
    }

    fn read_records(conn: &Connection, seed: u64) -> Result<TradeRecordLog, LedgerError> {
        let mut stmt = conn
            .prepare(
                "SELECT id, code, fund_name, type, direction, amount, unit,
                        request_date, trade_date, confirm_date, occurred_at
                 FROM trade_records ORDER BY id",
            )
            .map_err(query)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                ))
            })
            .map_err(query)?;

        let mut records = Vec::new();
        for row in rows {
            let (id, code, fund_name, kind, direction, amount, unit, request, trade, confirm, occurred_at) =
                row.map_err(query)?;
            records.push(TradeRecord {
                id: id.max(0) as u64,
                code,
                fund_name,
                trade_type: kind.parse()?,
                direction: direction.parse()?,
                amount,
                unit: unit.parse()?,
                request_date: parse_stored_date(&request)?,
                trade_date: parse_stored_date(&trade)?,
                confirm_date: parse_stored_date(&confirm)?,
                occurred_at,
            });
        }
        Ok(TradeRecordLog::from_parts(seed, records))
    }

    fn read_plans(conn: &Connection, seed: u64) -> Result<SipScheduler, LedgerError> {
        let mut stmt = conn
            .prepare(
                "SELECT id, code, fund_name, amount, cycle, cycle_value, period_text,
                        next_run_date, invested_total, invested_count
                 FROM sip_plans ORDER BY id",
            )
            .map_err(query)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, f64>(8)?,
                    row.get::<_, i64>(9)?,
                ))
            })
            .map_err(query)?;

        let mut plans = Vec::new();
        for row in rows {
            let (id, code, fund_name, amount, cycle, cycle_value, period_text, next, total, count) =
                row.map_err(query)?;
            plans.push(SipPlan {
                id: id.max(0) as u64,
                code,
                fund_name,
                amount,
                cycle: cycle.parse()?,
                cycle_value,
                period_text,
                next_run_date: parse_stored_date(&next)?,
                invested_total: total,
                invested_count: to_u32(count, "invested_count")?,
                status: PlanStatus::Running,
            });
        }
        Ok(SipScheduler::from_parts(seed, plans))
    }
}

impl StatePort for SqliteStateAdapter {
    fn load(&self) -> Result<Option<LedgerState>, LedgerError> {
        let conn = self.pool.get().map_err(storage)?;
        let Some(record_seed) = Self::read_meta(&conn, "record_seed")? else {
            return Ok(None);
        };
        let plan_seed = Self::read_meta(&conn, "plan_seed")?.unwrap_or(0);

        Ok(Some(LedgerState {
            positions: Self::read_positions(&conn)?,
            records: Self::read_records(&conn, record_seed)?,
            plans: Self::read_plans(&conn, plan_seed)?,
        }))
    }

    fn save(&self, state: &LedgerState) -> Result<(), LedgerError> {
        let mut conn = self.pool.get().map_err(storage)?;
        let tx = conn.transaction().map_err(query)?;

        tx.execute_batch(
            "DELETE FROM positions;
             DELETE FROM holding_refs;
             DELETE FROM trade_records;
             DELETE FROM sip_plans;",
        )
        .map_err(query)?;

        for p in state.positions.iter() {
            tx.execute(
                "INSERT INTO positions (code, amount, profit, holding_days, profit_rate, day_profit, day_profit_rate)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    p.code,
                    p.amount,
                    p.profit,
                    p.holding_days as i64,
                    p.profit_rate,
                    p.day_profit,
                    p.day_profit_rate
                ],
            )
            .map_err(query)?;
        }

        for code in state.positions.pinned_codes() {
            tx.execute("INSERT INTO holding_refs (code) VALUES (?1)", params![code])
                .map_err(query)?;
        }

        for r in state.records.all() {
            tx.execute(
                "INSERT INTO trade_records (id, code, fund_name, type, direction, amount, unit,
                                            request_date, trade_date, confirm_date, occurred_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    r.id as i64,
                    r.code,
                    r.fund_name,
                    r.trade_type.as_str(),
                    r.direction.as_str(),
                    r.amount,
                    r.unit.as_str(),
                    r.request_date.format("%Y-%m-%d").to_string(),
                    r.trade_date.format("%Y-%m-%d").to_string(),
                    r.confirm_date.format("%Y-%m-%d").to_string(),
                    r.occurred_at
                ],
            )
            .map_err(query)?;
        }

        for plan in state.plans.iter() {
            tx.execute(
                "INSERT INTO sip_plans (id, code, fund_name, amount, cycle, cycle_value, period_text,
                                        next_run_date, invested_total, invested_count, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'running')",
                params![
                    plan.id as i64,
                    plan.code,
                    plan.fund_name,
                    plan.amount,
                    plan.cycle.to_string(),
                    plan.cycle_value,
                    plan.period_text,
                    plan.next_run_date.format("%Y-%m-%d").to_string(),
                    plan.invested_total,
                    plan.invested_count as i64
                ],
            )
            .map_err(query)?;
        }

        for (key, value) in [
            ("record_seed", state.records.last_id()),
            ("plan_seed", state.plans.last_id()),
        ] {
            tx.execute(
                "INSERT OR REPLACE INTO ledger_meta (key, value) VALUES (?1, ?2)",
                params![key, value as i64],
            )
            .map_err(query)?;
        }

        tx.commit().map_err(query)?;
        Ok(())
    }
}
