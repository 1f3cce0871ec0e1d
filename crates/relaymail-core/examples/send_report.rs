//! Send a message with attachments through Gmail
//!
//! Run with:
//! cargo run --example send_report -- <from> <credentials.json> <recipient>[,<recipient>...] [file...]

use anyhow::Context;
use relaymail_core::{Sender, SenderConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("relaymail=debug".parse()?))
        .init();

    let mut args = std::env::args().skip(1);
    let from = args.next().context("missing <from> argument")?;
    let credentials = args.next().context("missing <credentials.json> argument")?;
    let recipients: Vec<String> = args
        .next()
        .context("missing <recipient> argument")?
        .split(',')
        .map(str::to_string)
        .collect();
    let files: Vec<String> = args.collect();

    let sender = Sender::new(SenderConfig::default())?;
    sender
        .init(&from, &credentials)
        .await
        .context("loading credentials")?;

    let body = [
        "Hello,".to_string(),
        String::new(),
        format!("{} file(s) attached.", files.len()),
    ];
    sender
        .send("RelayMail report", &body, &files, &recipients)
        .await
        .context("sending report")?;

    println!("Sent to {}", recipients.join(", "));
    Ok(())
}
