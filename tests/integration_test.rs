//! Integration tests for the fund book.
//!
//! Tests cover:
//! - Settlement scenarios for buy, sell, SIP and convert through `FundBook`
//! - Rejections leave positions, records and the version counter untouched
//! - SIP catch-up replay, stalls and the iteration guard
//! - Name resolution through a lookup port
//! - State round-trips through the JSON and SQLite adapters
//! - Day rates fetched through the estimate queue feeding SIP replay

mod common;

use approx::assert_relative_eq;
use common::*;
use fundledger::adapters::estimate_queue::EstimateQueue;
use fundledger::adapters::json_state_adapter::JsonStateAdapter;
use fundledger::domain::book::{FundBook, LedgerState};
use fundledger::domain::calendar::TradeTimeSlot;
use fundledger::domain::instruction::TradeInstruction;
use fundledger::domain::sip::SipScheduler;
use fundledger::domain::trade_record::{TradeDirection, TradeType, TradeUnit};
use fundledger::ports::state_port::StatePort;
use std::sync::Arc;

fn book_on(today: chrono::NaiveDate) -> FundBook {
    FundBook::new().with_clock(move || today)
}

mod settlement_scenarios {
    use super::*;

    #[test]
    fn after_close_buy_on_monday() {
        let mut book = book_on(d(2024, 1, 15));
        book.import_position("001467", 500.0, 20.0);

        let monday = d(2024, 1, 15);
        assert!(book.sync_buy_trade(buy(
            "001467",
            1000.0,
            TradeTimeSlot::AfterClose,
            at(monday, 16, 5)
        )));

        let record = book.get_trade_records_by_code("001467")[0].clone();
        assert_eq!(record.trade_date, d(2024, 1, 16));
        assert_eq!(record.confirm_date, d(2024, 1, 17));
        assert_eq!(record.occurred_at, "2024-01-15 16:05:00");
        assert_eq!(record.trade_type, TradeType::Buy);
        assert_eq!(record.unit, TradeUnit::Currency);
        assert_relative_eq!(book.positions().amount_of("001467"), 1500.0);
        assert_relative_eq!(book.positions().profit_of("001467"), 20.0);
    }

    #[test]
    fn before_close_buy_on_friday_and_saturday() {
        let mut book = book_on(d(2024, 1, 19));
        let friday = d(2024, 1, 19);
        book.sync_buy_trade(buy("001467", 10.0, TradeTimeSlot::BeforeClose, at(friday, 10, 0)));
        let saturday = d(2024, 1, 20);
        book.sync_buy_trade(buy("001467", 10.0, TradeTimeSlot::BeforeClose, at(saturday, 10, 0)));

        let records = book.get_trade_records_by_code("001467");
        // Newest first: the Saturday request.
        assert_eq!(records[0].trade_date, d(2024, 1, 22));
        assert_eq!(records[0].confirm_date, d(2024, 1, 23));
        assert_eq!(records[1].trade_date, friday);
        assert_eq!(records[1].confirm_date, d(2024, 1, 22));
    }

    #[test]
    fn full_sell_deletes_position() {
        let mut book = book_on(d(2024, 1, 15));
        book.import_position("001467", 1000.0, 80.0);

        let result = book
            .sync_sell_trade(sell(
                "001467",
                500.0,
                2.0,
                TradeTimeSlot::BeforeClose,
                at(d(2024, 1, 15), 9, 30),
            ))
            .unwrap();

        assert_relative_eq!(result.sold_share, 500.0);
        assert_relative_eq!(result.sold_amount, 1000.0);
        assert_relative_eq!(result.max_sell_share, 500.0);
        assert_eq!(result.remaining_amount, 0.0);
        assert!(book.position("001467").is_none());

        assert_eq!(result.timing.cash_arrival_start, d(2024, 1, 17));
        assert_eq!(result.timing.cash_arrival_end, d(2024, 1, 19));

        let record = book.get_trade_records_by_code("001467")[0].clone();
        assert_eq!(record.unit, TradeUnit::Share);
        assert_eq!(record.direction, TradeDirection::Sell);
        assert_relative_eq!(record.amount, 500.0);
    }

    #[test]
    fn oversized_sell_is_capped() {
        let mut book = book_on(d(2024, 1, 15));
        book.import_position("017811", 300.0, -30.0);

        let result = book
            .sync_sell_trade(sell(
                "017811",
                1_000.0,
                1.5,
                TradeTimeSlot::AfterClose,
                at(d(2024, 1, 15), 20, 0),
            ))
            .unwrap();
        assert_relative_eq!(result.sold_share, 200.0);
        assert_relative_eq!(result.sold_amount, 300.0);
        assert!(book.position("017811").is_none());
    }

    #[test]
    fn partial_sell_rescales_profit() {
        let mut book = book_on(d(2024, 1, 15));
        book.import_position("001467", 1000.0, 100.0);

        book.sync_sell_trade(sell(
            "001467",
            100.0,
            2.5,
            TradeTimeSlot::BeforeClose,
            at(d(2024, 1, 15), 11, 0),
        ))
        .unwrap();

        assert_relative_eq!(book.positions().amount_of("001467"), 750.0);
        assert_relative_eq!(book.positions().profit_of("001467"), 75.0, epsilon = 1e-9);
    }

    #[test]
    fn sip_uses_fixed_cutoff_display_time() {
        let mut book = book_on(d(2024, 1, 20));
        let saturday = d(2024, 1, 20);
        assert!(book.sync_sip_trade(sip("001467", 100.0, at(saturday, 22, 0))));

        let record = book.get_trade_records_by_code("001467")[0].clone();
        assert_eq!(record.trade_type, TradeType::Sip);
        assert_eq!(record.direction, TradeDirection::Buy);
        assert_eq!(record.trade_date, d(2024, 1, 22));
        assert_eq!(record.occurred_at, "2024-01-20 14:30:00");
    }

    #[test]
    fn convert_moves_value_and_logs_out_leg_only() {
        let mut book = book_on(d(2024, 1, 15));
        book.import_position("017811", 1000.0, 200.0);
        book.import_position("001467", 50.0, 5.0);

        let result = book
            .sync_convert_trade(convert(
                "017811",
                "001467",
                400.0,
                398.0,
                TradeTimeSlot::BeforeClose,
                at(d(2024, 1, 15), 13, 0),
            ))
            .unwrap();

        assert_relative_eq!(result.actual_out_amount, 400.0);
        assert_relative_eq!(result.source_remaining, 600.0);
        assert_relative_eq!(result.target_amount, 448.0);
        assert_relative_eq!(book.positions().profit_of("017811"), 120.0, epsilon = 1e-9);
        assert_relative_eq!(book.positions().profit_of("001467"), 5.0);

        assert_eq!(book.get_trade_records_by_code("017811").len(), 1);
        assert!(book.get_trade_records_by_code("001467").is_empty());
        let record = book.get_trade_records_by_code("017811")[0].clone();
        assert_eq!(record.trade_type, TradeType::Convert);
        assert_eq!(record.direction, TradeDirection::Sell);
    }

    #[test]
    fn convert_out_capped_at_source_amount() {
        let mut book = book_on(d(2024, 1, 15));
        book.import_position("017811", 100.0, 10.0);

        let result = book
            .sync_convert_trade(convert(
                "017811",
                "001467",
                250.0,
                99.0,
                TradeTimeSlot::AfterClose,
                at(d(2024, 1, 15), 18, 0),
            ))
            .unwrap();
        assert_relative_eq!(result.actual_out_amount, 100.0);
        assert!(book.position("017811").is_none());
        assert_relative_eq!(book.positions().amount_of("001467"), 99.0);
    }
}

mod rejections {
    use super::*;

    #[test]
    fn invalid_instructions_are_no_ops() {
        let mut book = book_on(d(2024, 1, 15));
        book.import_position("001467", 100.0, 0.0);
        let before = book.state().clone();
        let version = book.version();
        let when = at(d(2024, 1, 15), 10, 0);

        assert!(!book.sync_buy_trade(buy("  ", 10.0, TradeTimeSlot::AfterClose, when)));
        assert!(!book.sync_buy_trade(buy("001467", 0.0, TradeTimeSlot::AfterClose, when)));
        assert!(!book.sync_sip_trade(sip("001467", -5.0, when)));
        assert!(book
            .sync_sell_trade(sell("001467", 1.0, 0.0, TradeTimeSlot::AfterClose, when))
            .is_none());
        assert!(book
            .sync_sell_trade(sell("000001", 1.0, 1.0, TradeTimeSlot::AfterClose, when))
            .is_none());
        assert!(book
            .sync_convert_trade(convert("001467", "001467", 1.0, 1.0, TradeTimeSlot::AfterClose, when))
            .is_none());
        assert!(book
            .sync_convert_trade(convert("000001", "001467", 1.0, 1.0, TradeTimeSlot::AfterClose, when))
            .is_none());

        assert_eq!(book.state(), &before);
        assert_eq!(book.version(), version);
    }

    #[test]
    fn execute_reports_rejection_kind() {
        let mut book = book_on(d(2024, 1, 15));
        let err = book
            .execute(TradeInstruction::Sell(sell(
                "001467",
                1.0,
                1.0,
                TradeTimeSlot::AfterClose,
                at(d(2024, 1, 15), 10, 0),
            )))
            .unwrap_err();
        assert!(err.is_rejection());
        assert!(err.to_string().contains("001467"));
    }

    #[test]
    fn dust_sell_is_rejected() {
        let mut book = book_on(d(2024, 1, 15));
        book.import_position("001467", 0.01, 0.0);
        assert!(book
            .sync_sell_trade(sell(
                "001467",
                1.0,
                10.0,
                TradeTimeSlot::AfterClose,
                at(d(2024, 1, 15), 10, 0)
            ))
            .is_none());
        assert_relative_eq!(book.positions().amount_of("001467"), 0.01);
    }
}

mod sip_replay {
    use super::*;

    #[test]
    fn monthly_plan_catches_up_three_occurrences() {
        let mut book = book_on(d(2024, 1, 1));
        book.add_sip_plan("001467", None, 100.0, "monthly 15", "2024-01-15")
            .unwrap();

        let outcomes = book.run_due_sip_plans(Some(d(2024, 3, 20)));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].executed, 3);

        let plan = book.get_sip_plans_by_code("001467")[0].clone();
        assert_eq!(plan.next_run_date, d(2024, 4, 15));
        assert_eq!(plan.invested_count, 3);
        assert_relative_eq!(plan.invested_total, 300.0);

        let dates: Vec<_> = book
            .get_trade_records_by_code("001467")
            .iter()
            .map(|r| r.request_date)
            .collect();
        assert_eq!(dates, vec![d(2024, 3, 15), d(2024, 2, 15), d(2024, 1, 15)]);
    }

    #[test]
    fn replay_is_catch_up_complete_and_idempotent() {
        let mut book = book_on(d(2024, 6, 1));
        book.add_sip_plan("A", None, 10.0, "daily", "2024-05-25").unwrap();
        book.add_sip_plan("B", None, 20.0, "weekly fri", "2024-05-03").unwrap();
        book.add_sip_plan("C", None, 30.0, "biweekly", "2024-04-01").unwrap();

        let today = d(2024, 6, 1);
        assert!(book.plans().iter().all(|p| p.next_run_date > today));

        let records = book.records().len();
        let outcomes = book.run_due_sip_plans(Some(today));
        assert!(outcomes.iter().all(|o| o.executed == 0));
        assert_eq!(book.records().len(), records);
    }

    #[test]
    fn month_end_plan_clamps() {
        let mut book = book_on(d(2024, 1, 1));
        book.add_sip_plan("001467", None, 100.0, "每月 31日", "2024-01-31")
            .unwrap();
        book.run_due_sip_plans(Some(d(2024, 3, 31)));

        let dates: Vec<_> = book
            .get_trade_records_by_code("001467")
            .iter()
            .rev()
            .map(|r| r.request_date)
            .collect();
        assert_eq!(dates, vec![d(2024, 1, 31), d(2024, 2, 29), d(2024, 3, 31)]);
    }

    #[test]
    fn guard_limits_one_call() {
        let mut book = book_on(d(2020, 1, 1));
        book.add_sip_plan("001467", None, 1.0, "daily", "2020-01-01")
            .unwrap();

        let outcomes = book.run_due_sip_plans(Some(d(2022, 1, 1)));
        assert!(outcomes[0].guard_exhausted);

        let count = book.get_sip_plans_by_code("001467")[0].invested_count;
        // One run on add plus 366 here.
        assert_eq!(count, 367);

        let outcomes = book.run_due_sip_plans(Some(d(2022, 1, 1)));
        assert!(outcomes[0].executed > 0);
    }

    #[test]
    fn multiple_plans_per_code_newest_first() {
        let mut book = book_on(d(2024, 1, 1));
        let first = book
            .add_sip_plan("001467", None, 100.0, "weekly mon", "2024-02-05")
            .unwrap();
        let second = book
            .add_sip_plan("001467", None, 50.0, "monthly 1", "2024-02-01")
            .unwrap();
        let ids: Vec<u64> = book
            .get_sip_plans_by_code("001467")
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn stalled_plan_does_not_advance() {
        let plan_json = r#"{
            "seed": 1,
            "plans": {
                "001467": [{
                    "id": 1, "code": "001467", "fund_name": "x", "amount": 0.0,
                    "cycle": "daily", "cycle_value": "", "period_text": "daily",
                    "next_run_date": "2024-01-15", "invested_total": 0.0,
                    "invested_count": 0
                }]
            }
        }"#;
        let plans: SipScheduler = serde_json::from_str(plan_json).unwrap();
        let state = LedgerState {
            plans,
            ..LedgerState::default()
        };
        let mut book = FundBook::from_state(state);

        let outcomes = book.run_due_sip_plans(Some(d(2024, 1, 20)));
        assert!(outcomes[0].stalled);
        assert_eq!(outcomes[0].executed, 0);
        assert_eq!(book.plans().get(1).unwrap().next_run_date, d(2024, 1, 15));
        assert!(book.records().is_empty());
    }
}

mod naming {
    use super::*;

    #[test]
    fn lookup_port_supplies_names() {
        let port = MockMarketPort::new().with_estimate("001467", "华富永鑫灵活配置混合C", 1.2, 0.3);
        let mut book = book_on(d(2024, 1, 15)).with_names(Box::new(port));

        book.sync_buy_trade(buy("001467", 10.0, TradeTimeSlot::AfterClose, at(d(2024, 1, 15), 9, 0)));
        book.sync_buy_trade(buy("017811", 10.0, TradeTimeSlot::AfterClose, at(d(2024, 1, 15), 9, 0)));
        let plan = book
            .add_sip_plan("001467", None, 10.0, "daily", "2024-02-01")
            .unwrap();

        assert_eq!(
            book.get_trade_records_by_code("001467")[0].fund_name,
            "华富永鑫灵活配置混合C"
        );
        assert_eq!(book.get_trade_records_by_code("017811")[0].fund_name, "基金017811");
        assert_eq!(plan.fund_name, "华富永鑫灵活配置混合C");
    }
}

mod persistence {
    use super::*;

    fn populated_book() -> FundBook {
        let mut book = book_on(d(2024, 3, 20));
        book.sync_buy_trade(buy("001467", 1000.0, TradeTimeSlot::BeforeClose, at(d(2024, 1, 15), 10, 0)));
        book.sync_sell_trade(sell("001467", 100.0, 2.0, TradeTimeSlot::AfterClose, at(d(2024, 1, 16), 15, 10)));
        book.sync_convert_trade(convert(
            "001467",
            "017811",
            300.0,
            299.5,
            TradeTimeSlot::BeforeClose,
            at(d(2024, 1, 17), 10, 0),
        ));
        book.pin_holding("005827");
        book.add_sip_plan("017811", Some("东方人工智能"), 100.0, "monthly 15", "2024-01-15");
        book
    }

    #[test]
    fn json_round_trip_restores_everything() {
        let dir = tempfile::TempDir::new().unwrap();
        let adapter = JsonStateAdapter::new(dir.path().join("ledger.json"));
        let book = populated_book();

        adapter.save(book.state()).unwrap();
        let restored = adapter.load().unwrap().unwrap();
        assert_eq!(&restored, book.state());

        let plan = restored.plans.plans_by_code("017811")[0];
        assert_relative_eq!(plan.invested_total, 300.0);
        assert_eq!(plan.next_run_date, d(2024, 4, 15));
    }

    #[test]
    fn restored_book_continues_ids() {
        let dir = tempfile::TempDir::new().unwrap();
        let adapter = JsonStateAdapter::new(dir.path().join("ledger.json"));
        let book = populated_book();
        let last_id = book.records().last_id();
        adapter.save(book.state()).unwrap();

        let mut restored = FundBook::from_state(adapter.load().unwrap().unwrap());
        restored.sync_buy_trade(buy("001467", 1.0, TradeTimeSlot::AfterClose, at(d(2024, 3, 21), 9, 0)));
        assert_eq!(restored.records().last().unwrap().id, last_id + 1);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_round_trip_matches_json() {
        use fundledger::adapters::sqlite_state_adapter::SqliteStateAdapter;

        let book = populated_book();
        let sqlite = SqliteStateAdapter::in_memory().unwrap();
        sqlite.save(book.state()).unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let json = JsonStateAdapter::new(dir.path().join("ledger.json"));
        json.save(book.state()).unwrap();

        assert_eq!(sqlite.load().unwrap(), json.load().unwrap());
    }
}

mod market_rates {
    use super::*;

    #[tokio::test]
    async fn queued_estimates_feed_sip_day_rate() {
        let port = Arc::new(
            MockMarketPort::new()
                .with_estimate("001467", "华富永鑫灵活配置混合C", 1.25, 2.0)
                .with_error("017811", "timeout"),
        );
        let (queue, _worker) = EstimateQueue::spawn(port);

        let estimates = queue
            .fetch_batch(&["001467", "017811", "001467"])
            .await
            .unwrap();
        assert_eq!(estimates.len(), 1);

        let mut book = book_on(d(2024, 1, 15));
        book.update_day_rates(&estimates);
        book.add_sip_plan("001467", None, 102.0, "daily", "2024-01-15")
            .unwrap();

        let position = book.position("001467").unwrap();
        assert_relative_eq!(position.day_profit, 2.0, epsilon = 1e-9);
        assert_relative_eq!(position.day_profit_rate.unwrap(), 0.02, epsilon = 1e-12);
    }
}
