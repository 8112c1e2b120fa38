// crates/exchange-protocol/src/csv_codec.rs

//! CSV line codec.
//!
//! Fields are comma separated and surrounding whitespace is ignored.
//! A lot is always written as five fields:
//! `facility, energyType, vintage, region, standard`.
//!
//! Input format (lines -> [`Request`]):
//!
//! - Login: `L, account`
//! - New order:
//!   `N, side(B/S), <lot>, qty, price, allowPartial(Y/N), minFill, expiresAt(RFC3339 or -)`
//! - Cancel: `C, orderId`
//! - Deposit: `D, amount`
//! - Issue certificates: `I, <lot>, qty, avgPrice`
//! - Query order: `O, orderId`
//! - Query balance and holdings: `B`
//!
//! Output format (`OutputMessage` -> line):
//!
//! - Ack: `A, orderId, account, side, <lot>, qty, price, status, matched`
//! - Trade:
//!   `T, tradeId, buyOrder, sellOrder, buyer, seller, <lot>, qty, price, gross, buyerFee, sellerFee, networkFee`
//! - Cancel ack: `X, orderId, account, remaining`
//! - Expired: `E, orderId, account, remaining`
//! - Reject: `R, code, message` (commas in the message become `;`)
//! - Wallet: `W, account, currency, available, reserved`
//! - Holding: `H, account, <lot>, qty, avgPrice, locked(Y/N)`
//! - Order state: `O, orderId, account, side, <lot>, qty, remaining, price, status`

use std::str::FromStr;

use chrono::{DateTime, Utc};
use exchange_core::{
    AccountId, EnergyType, FillPolicy, InputMessage, LotIdentity, NewOrderRequest, OrderId,
    OutputMessage, Side,
};

/// One decoded client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Bind the session to an account.
    Login(AccountId),
    /// Anything the engine handles.
    Engine(InputMessage),
}

/// Parse a single CSV line.
///
/// Returns `None` for blank lines, comments (starting with `#`) and
/// lines that do not decode.
pub fn parse_request_line(line: &str) -> Option<Request> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let tokens = split_and_trim(trimmed, ',');
    let kind = tokens.first()?.chars().next()?;

    match kind {
        'L' if tokens.len() == 2 => Some(Request::Login(AccountId(parse_u64(&tokens[1])?))),
        'N' => parse_new_order(&tokens).map(engine),
        'C' if tokens.len() == 2 => Some(engine(InputMessage::Cancel(OrderId(parse_u64(&tokens[1])?)))),
        'D' if tokens.len() == 2 => Some(engine(InputMessage::Deposit(parse_u64(&tokens[1])?))),
        'I' => parse_issue(&tokens).map(engine),
        'O' if tokens.len() == 2 => {
            Some(engine(InputMessage::QueryOrder(OrderId(parse_u64(&tokens[1])?))))
        }
        'B' if tokens.len() == 1 => Some(engine(InputMessage::QueryBalance)),
        _ => None,
    }
}

fn engine(msg: InputMessage) -> Request {
    Request::Engine(msg)
}

fn parse_new_order(tokens: &[&str]) -> Option<InputMessage> {
    // N, side, <lot x5>, qty, price, allowPartial, minFill, expiresAt
    if tokens.len() != 12 {
        return None;
    }

    let side = Side::from_char(single_char(tokens[1])?)?;
    let lot = parse_lot(&tokens[2..7])?;
    let quantity = parse_u64(tokens[7])?;
    let price = parse_u64(tokens[8])?;
    let allow_partial = match tokens[9] {
        "Y" => true,
        "N" => false,
        _ => return None,
    };
    let min_fill_quantity = parse_u64(tokens[10])?;
    let expires_at = match tokens[11] {
        "-" => None,
        text => Some(DateTime::parse_from_rfc3339(text).ok()?.with_timezone(&Utc)),
    };

    Some(InputMessage::NewOrder(NewOrderRequest {
        side,
        lot,
        quantity,
        price,
        policy: FillPolicy {
            allow_partial,
            min_fill_quantity,
        },
        expires_at,
    }))
}

fn parse_issue(tokens: &[&str]) -> Option<InputMessage> {
    // I, <lot x5>, qty, avgPrice
    if tokens.len() != 8 {
        return None;
    }

    Some(InputMessage::Issue {
        lot: parse_lot(&tokens[1..6])?,
        quantity: parse_u64(tokens[6])?,
        price: parse_u64(tokens[7])?,
    })
}

fn parse_lot(fields: &[&str]) -> Option<LotIdentity> {
    let [facility, energy, vintage, region, standard] = fields else {
        return None;
    };
    Some(LotIdentity::new(
        *facility,
        EnergyType::from_str(energy).ok()?,
        vintage.parse().ok()?,
        *region,
        *standard,
    ))
}

/// Format an `OutputMessage` as a CSV line.
pub fn format_output(msg: &OutputMessage) -> String {
    match msg {
        OutputMessage::Ack { order, matched } => format!(
            "A, {}, {}, {}, {}, {}, {}, {}, {}",
            order.id,
            order.account,
            order.side.as_char(),
            format_lot(&order.lot),
            order.quantity,
            order.price,
            order.status,
            matched
        ),
        OutputMessage::Trade(t) => format!(
            "T, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}",
            t.id,
            t.buy_order,
            t.sell_order,
            t.buyer,
            t.seller,
            format_lot(&t.lot),
            t.quantity,
            t.price,
            t.gross,
            t.buyer_fee,
            t.seller_fee,
            t.network_fee
        ),
        OutputMessage::CancelAck(o) => {
            format!("X, {}, {}, {}", o.id, o.account, o.remaining_quantity)
        }
        OutputMessage::Expired(o) => {
            format!("E, {}, {}, {}", o.id, o.account, o.remaining_quantity)
        }
        OutputMessage::Reject { code, message } => {
            format!("R, {}, {}", code, message.replace(',', ";"))
        }
        OutputMessage::Balance(a) => format!(
            "W, {}, {}, {}, {}",
            a.id, a.currency, a.available, a.reserved
        ),
        OutputMessage::Holding(h) => format!(
            "H, {}, {}, {}, {}, {}",
            h.account,
            format_lot(&h.lot),
            h.quantity,
            h.average_price,
            if h.locked { 'Y' } else { 'N' }
        ),
        OutputMessage::OrderState(o) => format!(
            "O, {}, {}, {}, {}, {}, {}, {}, {}",
            o.id,
            o.account,
            o.side.as_char(),
            format_lot(&o.lot),
            o.quantity,
            o.remaining_quantity,
            o.price,
            o.status
        ),
    }
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

fn format_lot(lot: &LotIdentity) -> String {
    format!(
        "{}, {}, {}, {}, {}",
        lot.facility_id, lot.energy_type, lot.vintage, lot.region, lot.certification_standard
    )
}

fn split_and_trim(s: &str, delimiter: char) -> Vec<&str> {
    s.split(delimiter).map(str::trim).collect()
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    let c = chars.next()?;
    chars.next().is_none().then_some(c)
}

fn parse_u64(s: &str) -> Option<u64> {
    s.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use exchange_core::{AccountId, EngineError, Order, OrderStatus};

    fn lot() -> LotIdentity {
        LotIdentity::new("WF-12", EnergyType::Wind, 2024, "EU-NL", "GO")
    }

    #[test]
    fn parses_login_and_simple_commands() {
        assert_eq!(parse_request_line("L, 7"), Some(Request::Login(AccountId(7))));
        assert_eq!(
            parse_request_line(" C ,  42 "),
            Some(Request::Engine(InputMessage::Cancel(OrderId(42))))
        );
        assert_eq!(
            parse_request_line("D, 5000"),
            Some(Request::Engine(InputMessage::Deposit(5000)))
        );
        assert_eq!(
            parse_request_line("B"),
            Some(Request::Engine(InputMessage::QueryBalance))
        );
        assert_eq!(
            parse_request_line("O, 3"),
            Some(Request::Engine(InputMessage::QueryOrder(OrderId(3))))
        );
    }

    #[test]
    fn parses_new_order_with_expiry() {
        let line = "N, S, WF-12, wind, 2024, EU-NL, GO, 200, 50, N, 0, 2025-06-01T00:00:00Z";
        let expected = NewOrderRequest::limit(Side::Sell, lot(), 200, 50)
            .with_policy(FillPolicy {
                allow_partial: false,
                min_fill_quantity: 0,
            })
            .expiring_at(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(
            parse_request_line(line),
            Some(Request::Engine(InputMessage::NewOrder(expected)))
        );
    }

    #[test]
    fn parses_issue() {
        assert_eq!(
            parse_request_line("I, WF-12, Wind, 2024, EU-NL, GO, 500, 38"),
            Some(Request::Engine(InputMessage::Issue {
                lot: lot(),
                quantity: 500,
                price: 38
            }))
        );
    }

    #[test]
    fn ignores_comments_blanks_and_garbage() {
        for line in [
            "",
            "   ",
            "# comment",
            "Z, 1",
            "L",
            "C, abc",
            "N, X, WF-12, wind, 2024, EU-NL, GO, 1, 1, Y, 1, -",
            "N, B, WF-12, steam, 2024, EU-NL, GO, 1, 1, Y, 1, -",
            "N, B, WF-12, wind, 2024, EU-NL, GO, 1, 1, maybe, 1, -",
            "N, B, WF-12, wind, 2024, EU-NL, GO, 1, 1, Y, 1, yesterday",
            "B, extra",
        ] {
            assert_eq!(parse_request_line(line), None, "line {:?}", line);
        }
    }

    #[test]
    fn formats_rejects_and_orders() {
        let reject = OutputMessage::from(EngineError::InsufficientFunds {
            required: 150,
            spendable: 100,
        });
        assert_eq!(
            format_output(&reject),
            "R, INSUFFICIENT_FUNDS, insufficient funds: required 150; spendable 100"
        );
        assert_eq!(format_output(&reject).split(", ").count(), 3);

        let order = Order {
            id: OrderId(9),
            account: AccountId(1),
            side: Side::Buy,
            lot: lot(),
            quantity: 10,
            remaining_quantity: 4,
            price: 50,
            status: OrderStatus::Partial,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            expires_at: None,
            policy: FillPolicy::default(),
            reserved_cash: 0,
        };
        assert_eq!(
            format_output(&OutputMessage::OrderState(order.clone())),
            "O, 9, 1, B, WF-12, wind, 2024, EU-NL, GO, 10, 4, 50, partial"
        );
        assert_eq!(format_output(&OutputMessage::CancelAck(order)), "X, 9, 1, 4");
    }
}
