//! exchange-protocol
//!
//! Wire-level encoding/decoding for the certificate exchange.
//!
//! Turns text lines into session requests
//! (`Request::Login` or an `exchange_core::InputMessage`) and
//! `exchange_core::OutputMessage` events back into lines.

pub mod csv_codec;

pub use csv_codec::{format_output, parse_request_line, Request};
