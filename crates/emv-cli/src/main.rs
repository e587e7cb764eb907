use std::process::ExitCode;

use clap::Parser;
use emv_card::{
    ApplicationData, CardReader, EmvSession, NegotiationPolicy, SessionOptions, SessionResult,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod formatters;
use formatters::{format_expiry, format_pan, format_tlv, FormatMode};

#[derive(Parser)]
#[command(name = "emv-read")]
#[command(about = "EMV Card Reader - Read PAN, expiry and application data from contactless cards")]
#[command(version)]
struct Args {
    /// PC/SC reader to use (default: first reader found)
    #[arg(short, long)]
    reader: Option<String>,

    /// Output format mode
    #[arg(short, long, value_enum, default_value_t = FormatMode::Human)]
    format: FormatMode,

    /// Retries after the card leaves a command unanswered
    #[arg(long, default_value_t = emv_card::transceiver::DEFAULT_RETRIES)]
    retries: u8,

    /// Print the full PAN instead of the first four digits
    #[arg(long)]
    show_pan: bool,

    /// Log protocol details (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Set RUST_LOG=trace to see every APDU exchanged with the card
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    println!("EMV Card Reader - {} Mode\n", args.format.description());

    let reader = match CardReader::new() {
        Ok(r) => r,
        Err(err) => {
            eprintln!("Failed to establish PC/SC context: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let connection = match &args.reader {
        Some(name) => reader.connect(name).map(|card| (card, name.clone())),
        None => reader.connect_first(),
    };
    let card = match connection {
        Ok((card, name)) => {
            info!(reader = %name, "Card detected");
            println!("Reader: {}", name);
            println!("Card connected successfully\n");
            card
        }
        Err(err) => {
            eprintln!("Failed to connect to card: {}", err);
            eprintln!("Please ensure a card is present on the reader");
            if let Ok(readers) = reader.list_readers() {
                for name in readers {
                    eprintln!("  available reader: {}", name);
                }
            }
            return ExitCode::FAILURE;
        }
    };

    let options = SessionOptions {
        policy: NegotiationPolicy {
            retries: args.retries,
        },
        ..SessionOptions::default()
    };
    let result = EmvSession::new(card).options(options).run();
    match &result.error {
        None => info!(
            state = %result.state,
            applications = result.applications.len(),
            "Session finished"
        ),
        Some(error) => warn!(state = %result.state, error = %error, "Session failed"),
    }

    print_result(&result, &args);

    if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_result(result: &SessionResult, args: &Args) {
    if let Some(err) = &result.error {
        eprintln!("Failed to read card: {}", err);
        return;
    }

    println!("=== Discovered Applications ===\n");
    if result.applications.is_empty() {
        println!("No applications found via PPSE\n");
    }

    for app in &result.applications {
        print_application(app, args);
    }

    println!("=== Card Summary ===\n");
    match result.pan() {
        Some(pan) => println!("PAN: {}", format_pan(pan, args.show_pan)),
        None => println!("PAN: not found"),
    }
    match result.expiry() {
        Some(expiry) => println!("Expiry: {}", format_expiry(expiry)),
        None => println!("Expiry: not found"),
    }
}

fn print_application(app: &ApplicationData, args: &Args) {
    println!("Application {}:", app.index + 1);
    println!("  AID: {}", app.aid);
    println!("  Issuer: {} ({})", app.issuer, app.issuer.index());
    println!("  State: {}", app.state);

    if let Some(pdol) = &app.pdol {
        let tags: Vec<String> = pdol
            .entries()
            .iter()
            .map(|entry| format!("{}/{}", hex::encode_upper(&entry.tag), entry.length))
            .collect();
        println!("  PDOL: {}", tags.join(" "));
    }
    if let Some(afl) = &app.afl {
        println!("  AFL: {}", hex::encode_upper(afl));
    }
    if let Some(pan) = &app.pan {
        println!("  PAN: {}", format_pan(pan, args.show_pan));
    }
    if let Some(expiry) = &app.expiry {
        println!("  Expiry: {}", format_expiry(expiry));
    }
    if let Some(service_code) = app.track2.as_ref().and_then(|t| t.service_code.as_deref()) {
        println!("  Service Code: {}", service_code);
    }
    if let Some(name) = &app.cardholder_name {
        println!("  Cardholder: {}", name);
    }

    for record in &app.records {
        println!("  Record SFI {} #{}:", record.sfi, record.record);
        // Raw record dumps carry the PAN, so they need --show-pan
        if args.format == FormatMode::Raw && args.show_pan {
            println!(
                "    Data ({} bytes): {}",
                record.data.len(),
                hex::encode_upper(&record.data)
            );
        } else {
            for line in format_tlv(&record.data, args.format, args.show_pan) {
                println!("  {}", line);
            }
        }
    }
    for skipped in &app.skipped_records {
        println!("  Record SFI {} #{} skipped: {}", skipped.sfi, skipped.record, skipped.error);
    }
    if let Some(err) = &app.error {
        println!("  Error: {}", err);
    }
    println!();
}
