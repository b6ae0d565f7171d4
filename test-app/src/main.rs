// msrlib test application -- CLI tool for exercising an MSR605 reader.
//
// Usage:
//   msrlib-test-app --device /dev/ttyUSB0 info
//   msrlib-test-app selftest
//   msrlib-test-app leds
//   msrlib-test-app read
//   msrlib-test-app read --raw --width 5
//   msrlib-test-app write --track1 "%B4111111111111111^DOE/JOHN^2512?" --track2 ";4111111111111111=2512?"
//   msrlib-test-app erase --track1 --track2 --track3
//   msrlib-test-app coercivity get
//   msrlib-test-app --timeout-ms 0 read
//
// Commands that wait for a swipe can be aborted by pressing Enter.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use msrlib::msr605::raw::{ALPHA_WIDTH, NUMERIC_WIDTH};
use msrlib::transport::DEFAULT_BAUD_RATE;
use msrlib::{Coercivity, Msr605Builder, Session, Track, TrackData, Tracks};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// msrlib test application -- exercises an MSR605 reader from the command line.
#[derive(Parser)]
#[command(name = "msrlib-test-app", version, about)]
struct Cli {
    /// Serial device of the reader.
    #[arg(long, default_value = "/dev/ttyUSB0")]
    device: String,

    /// Serial baud rate.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Bound on each wait for the reader, in milliseconds (0 = wait forever).
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Log protocol activity at debug level (RUST_LOG overrides).
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show model, firmware, track capabilities, and coercivity.
    Info,

    /// Run the communication, RAM, and sensor self-tests.
    Selftest,

    /// Cycle through the front-panel LEDs.
    Leds,

    /// Swipe a card and print its tracks.
    Read {
        /// Read unparsed bitstreams and decode them symbol by symbol.
        #[arg(long)]
        raw: bool,

        /// Symbol width in bits for --raw (default: 7 for track 1, 5 otherwise).
        #[arg(long, requires = "raw")]
        width: Option<usize>,
    },

    /// Swipe a card to write the given tracks (omitted tracks are left blank).
    Write {
        #[arg(long)]
        track1: Option<String>,
        #[arg(long)]
        track2: Option<String>,
        #[arg(long)]
        track3: Option<String>,
    },

    /// Swipe a card to erase the selected tracks.
    Erase {
        #[arg(long)]
        track1: bool,
        #[arg(long)]
        track2: bool,
        #[arg(long)]
        track3: bool,
    },

    /// Query or select the write coercivity.
    Coercivity {
        #[command(subcommand)]
        action: CoercivityAction,
    },
}

#[derive(Subcommand)]
enum CoercivityAction {
    /// Show the configured coercivity.
    Get,
    /// Select Hi-Co.
    High,
    /// Select Lo-Co.
    Low,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn track_arg(value: Option<&String>) -> TrackData {
    match value {
        Some(s) if !s.is_empty() => TrackData::data(s.as_bytes()),
        _ => TrackData::Empty,
    }
}

fn pass_fail(result: &msrlib::Result<()>) -> String {
    match result {
        Ok(()) => "PASS".to_string(),
        Err(e) => format!("FAIL ({e})"),
    }
}

fn print_tracks(tracks: &Tracks) {
    for (track, content) in tracks.iter() {
        println!("  {track}:  {content}");
    }
}

fn prompt_swipe(what: &str) {
    println!("Swipe a card to {what} (press Enter to abort)...");
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_info(session: &mut Session) -> Result<()> {
    let model = session.model().await.context("model query failed")?;
    let firmware = session.firmware().await.context("firmware query failed")?;
    let caps = session.capabilities().await;

    println!("Reader Information");
    println!("  Device:         {}", session.path());
    println!("  Model:          MSR605 type {model}");
    println!("  Firmware:       {firmware}");
    println!();
    println!("Capabilities");
    println!("  Track 1:        {}", caps.track1);
    println!("  Track 2:        {}", caps.track2);
    println!("  Track 3:        {}", caps.track3);

    match session.coercivity().await {
        Ok(c) => println!("  Coercivity:     {c}"),
        Err(e) => println!("  Coercivity:     unknown ({e})"),
    }
    Ok(())
}

async fn cmd_selftest(session: &mut Session) -> Result<()> {
    let comm = session.test_comm().await;
    println!("comm-test:      {}", pass_fail(&comm));
    let ram = session.test_ram().await;
    println!("RAM-test:       {}", pass_fail(&ram));

    prompt_swipe("test the sensor");
    let sensor = session.test_sensor().await;
    println!("sensor-test:    {}", pass_fail(&sensor));

    let failures = [&comm, &ram, &sensor].iter().filter(|r| r.is_err()).count();
    if failures > 0 {
        bail!("{failures} of 3 self-tests failed");
    }
    Ok(())
}

async fn cmd_leds(session: &mut Session) -> Result<()> {
    let pause = Duration::from_millis(100);
    for led in [
        msrlib::Led::Green,
        msrlib::Led::Yellow,
        msrlib::Led::Red,
        msrlib::Led::On,
        msrlib::Led::Off,
    ] {
        session
            .led(led)
            .await
            .with_context(|| format!("LED {led} failed"))?;
        println!("LED {led}");
        tokio::time::sleep(pause).await;
    }
    Ok(())
}

async fn cmd_read(session: &mut Session) -> Result<()> {
    session.yellow().await?;
    prompt_swipe("read");
    let tracks = session.read().await.context("read failed")?;
    session.green().await?;

    println!("Tracks");
    print_tracks(&tracks);
    Ok(())
}

async fn cmd_read_raw(session: &mut Session, width: Option<usize>) -> Result<()> {
    session.yellow().await?;
    prompt_swipe("read raw");
    let tracks = session.read_raw().await.context("raw read failed")?;
    session.green().await?;

    println!("Raw tracks");
    for (track, content) in tracks.iter() {
        let Some(bytes) = content.as_bytes() else {
            println!("  {track}:  {content}");
            continue;
        };
        let width = width.unwrap_or(match track {
            Track::One => ALPHA_WIDTH,
            Track::Two | Track::Three => NUMERIC_WIDTH,
        });
        let symbols = msrlib::decode_symbols(bytes, width)?;
        let faults = symbols.iter().filter(|s| !s.parity_ok).count();
        println!(
            "  {track}:  {} bytes, {} symbols @ {width} bits, {faults} parity faults",
            bytes.len(),
            symbols.len()
        );
        println!("           {}", msrlib::render(&symbols));
    }
    Ok(())
}

async fn cmd_write(session: &mut Session, tracks: Tracks) -> Result<()> {
    if tracks.iter().all(|(_, t)| t.is_empty()) {
        bail!("nothing to write; pass at least one of --track1, --track2, --track3");
    }
    session.yellow().await?;
    prompt_swipe("write");
    session.write(&tracks).await.context("write failed")?;
    session.green().await?;
    println!("Write OK");
    Ok(())
}

async fn cmd_erase(session: &mut Session, t1: bool, t2: bool, t3: bool) -> Result<()> {
    if !(t1 || t2 || t3) {
        bail!("nothing to erase; pass at least one of --track1, --track2, --track3");
    }
    session.yellow().await?;
    prompt_swipe("erase");
    session.erase(t1, t2, t3).await.context("erase failed")?;
    session.green().await?;
    println!("Erase OK");
    Ok(())
}

async fn cmd_coercivity(session: &mut Session, action: &CoercivityAction) -> Result<()> {
    match action {
        CoercivityAction::Get => {}
        CoercivityAction::High => session.set_coercivity(Coercivity::High).await?,
        CoercivityAction::Low => session.set_coercivity(Coercivity::Low).await?,
    }
    let current = session.coercivity().await?;
    println!("Coercivity: {current}");
    Ok(())
}

async fn run(session: &mut Session, command: &Command) -> Result<()> {
    session.reset().await.context("reset failed")?;

    match command {
        Command::Info => cmd_info(session).await,
        Command::Selftest => cmd_selftest(session).await,
        Command::Leds => cmd_leds(session).await,
        Command::Read { raw: false, .. } => cmd_read(session).await,
        Command::Read { raw: true, width } => cmd_read_raw(session, *width).await,
        Command::Write {
            track1,
            track2,
            track3,
        } => {
            let tracks = Tracks::new(
                track_arg(track1.as_ref()),
                track_arg(track2.as_ref()),
                track_arg(track3.as_ref()),
            );
            cmd_write(session, tracks).await
        }
        Command::Erase {
            track1,
            track2,
            track3,
        } => cmd_erase(session, *track1, *track2, *track3).await,
        Command::Coercivity { action } => cmd_coercivity(session, action).await,
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

async fn run_cli(cli: Cli) -> Result<()> {
    let timeout = (cli.timeout_ms > 0).then(|| Duration::from_millis(cli.timeout_ms));
    let mut session = Msr605Builder::new()
        .baud_rate(cli.baud)
        .sync_timeout(timeout)
        .open(&cli.device, Some(Box::new(tokio::io::stdin())))
        .await
        .with_context(|| format!("failed to start reader on {}", cli.device))?;
    tracing::debug!(device = %cli.device, baud = cli.baud, ?timeout, "Reader started");

    let result = run(&mut session, &cli.command).await;

    if let Err(e) = session.off().await {
        eprintln!("Warning: failed to switch LEDs off: {e}");
    }
    session.stop().await.context("failed to stop reader")?;

    result
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run_cli(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    // The blocking stdin read cannot be cancelled, so do not wait for the
    // runtime to shut down.
    std::process::exit(code);
}
