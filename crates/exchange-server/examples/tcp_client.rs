//! Interactive line client: type CSV requests, see the server's replies.

use std::env;
use std::io::{self, Write};
use std::time::Duration;

use anyhow::Result;
use exchange_protocol::csv_codec::parse_request_line;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[tokio::main]
async fn main() -> Result<()> {
    // Where to connect: env override or default.
    let addr = env::var("EXCHANGE_CLIENT_ADDR").unwrap_or_else(|_| "127.0.0.1:9000".to_string());

    println!("Connecting to {}...", addr);
    let stream = TcpStream::connect(&addr).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut replies = BufReader::new(read_half).lines();
    println!("Connected.");
    println!("Type CSV requests like:");
    println!("  L, 1");
    println!("  D, 10000");
    println!("  I, SF-7, solar, 2024, US-TX, I-REC, 500, 40");
    println!("  N, S, SF-7, solar, 2024, US-TX, I-REC, 200, 50, Y, 1, -");
    println!("  C, 1");
    println!("  B");
    println!("Type 'quit' or 'exit' to leave.\n");

    let stdin = io::stdin();

    loop {
        print!(">> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            println!("\nEOF on stdin, exiting client.");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.eq_ignore_ascii_case("quit") || trimmed.eq_ignore_ascii_case("exit") {
            println!("Exiting client.");
            break;
        }
        if parse_request_line(trimmed).is_none() {
            eprintln!("Could not parse line as a request. Check CSV format.");
            continue;
        }

        write_half.write_all(format!("{}\n", trimmed).as_bytes()).await?;

        // Print everything that arrives shortly after.
        while let Ok(reply) = timeout(Duration::from_millis(150), replies.next_line()).await {
            match reply? {
                Some(text) => println!("<< {}", text),
                None => {
                    println!("Server closed the connection.");
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}
