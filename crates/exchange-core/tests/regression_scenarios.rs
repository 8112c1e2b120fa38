// crates/exchange-core/tests/regression_scenarios.rs
use std::sync::Arc;

use exchange_core::{EngineConfig, InMemoryAuditRecorder, MatchingEngine, Principal};
use exchange_protocol::csv_codec::{format_output, parse_request_line, Request};

#[test]
fn scenario_matches_reference_output() {
    const INPUT: &str = include_str!("data/scenario.csv");
    const EXPECTED: &str = include_str!("data/scenario_expected.csv");

    let (engine, _worker) =
        MatchingEngine::new(EngineConfig::default(), Arc::new(InMemoryAuditRecorder::new()))
            .unwrap();
    let mut session: Option<Principal> = None;
    let mut actual_lines: Vec<String> = Vec::new();

    for raw_line in INPUT.lines() {
        match parse_request_line(raw_line) {
            Some(Request::Login(account)) => {
                engine.open_account(account);
                session = Some(Principal::trader(account));
            }
            Some(Request::Engine(msg)) => {
                let principal = session.expect("scenario logs in before trading");
                for out in engine.process_message(&principal, msg) {
                    actual_lines.push(format_output(&out));
                }
            }
            None => {}
        }
    }

    let expected: Vec<&str> = EXPECTED.lines().filter(|l| !l.trim().is_empty()).collect();
    assert_eq!(actual_lines, expected);

    let trades = actual_lines.iter().filter(|l| l.starts_with("T,")).count();
    let rejects = actual_lines.iter().filter(|l| l.starts_with("R,")).count();
    assert_eq!((trades, rejects), (1, 3));
}
