// crates/exchange-core/tests/conservation.rs
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use exchange_core::{
    AccountId, EngineConfig, EnergyType, FeeSchedule, FillPolicy, InMemoryAuditRecorder,
    LotIdentity, MatchingEngine, NewOrderRequest, Principal, Side,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Order {
        account: u64,
        side: Side,
        quantity: u64,
        price: u64,
        min_fill: u64,
        all_or_none: bool,
    },
    Cancel {
        account: u64,
        nth: usize,
    },
    Sweep,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (1..=4u64, any::<bool>(), 1..=30u64, 40..=60u64, 1..=5u64, any::<bool>()).prop_map(
            |(account, buy, quantity, price, min_fill, all_or_none)| Op::Order {
                account,
                side: if buy { Side::Buy } else { Side::Sell },
                quantity,
                price,
                min_fill: min_fill.min(quantity),
                all_or_none,
            }
        ),
        2 => (1..=4u64, 0..8usize).prop_map(|(account, nth)| Op::Cancel { account, nth }),
        1 => Just(Op::Sweep),
    ]
}

fn lot() -> LotIdentity {
    LotIdentity::new("BIO-9", EnergyType::Biomass, 2019, "BR", "I-REC")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn cash_and_certificates_are_conserved(
        ops in proptest::collection::vec(op(), 1..60),
        bps in 0..500u32,
        network_fee in 0..50u64,
    ) {
        let config = EngineConfig {
            fees: FeeSchedule { platform_fee_bps: bps, network_fee },
            ..EngineConfig::default()
        };
        let (engine, _worker) =
            MatchingEngine::new(config, Arc::new(InMemoryAuditRecorder::new())).unwrap();
        for id in 1..=4 {
            engine.open_account(AccountId(id));
            engine.deposit(AccountId(id), 5_000).unwrap();
            engine.issue_certificates(AccountId(id), &lot(), 60, 30).unwrap();
        }
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        for (step, op) in ops.into_iter().enumerate() {
            let now = start + Duration::seconds(step as i64);
            match op {
                Op::Order { account, side, quantity, price, min_fill, all_or_none } => {
                    let policy = if all_or_none {
                        FillPolicy::all_or_none()
                    } else {
                        FillPolicy::with_min_fill(min_fill)
                    };
                    let request = NewOrderRequest::limit(side, lot(), quantity, price)
                        .with_policy(policy)
                        .expiring_at(now + Duration::seconds(20));
                    let _ = engine.submit_order_at(&Principal::trader(AccountId(account)), request, now);
                }
                Op::Cancel { account, nth } => {
                    let orders = engine.orders().orders_of(AccountId(account));
                    if let Some(order) = orders.get(nth) {
                        let _ = engine.cancel_order(&Principal::trader(AccountId(account)), order.id);
                    }
                }
                Op::Sweep => {
                    engine.sweep_expired(now);
                }
            }

            prop_assert_eq!(engine.holdings().total_for_lot(&lot()), 4 * 60);
            let fees: u64 = engine
                .trades()
                .all()
                .iter()
                .map(|t| t.buyer_fee + t.seller_fee + t.network_fee)
                .sum();
            let cash: u64 = engine.ledger().accounts().iter().map(|a| a.available).sum();
            prop_assert_eq!(cash + fees, 4 * 5_000);
            for account in engine.ledger().accounts() {
                prop_assert!(account.reserved <= account.available);
            }
        }

        for trade in engine.trades().all() {
            prop_assert_ne!(trade.buyer, trade.seller);
            prop_assert!(trade.price >= 40 && trade.price <= 60);
        }
        for id in 1..=4 {
            for order in engine.orders().orders_of(AccountId(id)) {
                let traded: u64 = engine
                    .trades()
                    .for_order(order.id)
                    .iter()
                    .map(|t| t.quantity)
                    .sum();
                prop_assert_eq!(traded, order.filled_quantity());
                prop_assert_eq!(order.status.as_str() == "completed", order.remaining_quantity == 0);
            }
        }
    }
}
