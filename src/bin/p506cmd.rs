#![deny(clippy::unwrap_used)]

use byteorder::{LittleEndian, WriteBytesExt};
use clap::builder::NonEmptyStringValueParser;
use clap::{arg, command, value_parser};
use log::{debug, warn};
use p506ctrl::measurement::{FlattenSample, Sample};
use p506ctrl::proto::{Mode, ProtoError, Result};
use p506ctrl::settings::Settings;
use p506ctrl::sink::{CsvSink, SinkError};
use p506ctrl::transport::TransportError;
use p506ctrl::worker::{Event, WorkerError};
use p506ctrl::{decode, PollingWorker, SerialTransport, DEFAULT_TTY};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Stdout, Write};
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;
use tokio::sync::mpsc::unbounded_channel;
use tracing_subscriber::filter::LevelFilter;

/// How long a single `mea` waits for the first reading.
const SINGLE_READING_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Copy, Clone)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
            Self::Csv => f.write_str("csv"),
        }
    }
}

impl clap::ValueEnum for OutputFormat {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Text, Self::Json, Self::Csv]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Text => clap::builder::PossibleValue::new("text"),
            Self::Json => clap::builder::PossibleValue::new("json"),
            Self::Csv => clap::builder::PossibleValue::new("csv"),
        })
    }
}

/// Log to stderr; the library's `log` records are forwarded by `tracing-log`.
fn init_logging(verbosity: u8) {
    if let Err(err) = tracing_subscriber::fmt()
        .with_max_level(log_level(verbosity))
        .with_writer(io::stderr)
        .try_init()
    {
        eprintln!("Logging unavailable: {}", err);
    }
}

/// Level for the number of `-d` flags given.
fn log_level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

#[tokio::main]
async fn main() {
    let matches = command!() // requires `cargo` feature
        .arg(
            arg!(
                -p --device <PORT> "Serial port of the meter [default: last used port or DEFAULT_TTY]"
            )
            .required(false)
            .value_parser(NonEmptyStringValueParser::new()),
        )
        .arg(arg!(
            -d --debug ... "Turn debugging information on"
        ))
        .arg(
            arg!(
                -b --baudrate <BAUDRATE> "Baudrate [default: 1200]"
            )
            .required(false)
            .value_parser(value_parser!(u32)),
        )
        .arg(
            arg!(--"settings" <PATH> "Settings file")
                .required(false)
                .value_parser(value_parser!(PathBuf)),
        )
        .subcommand(clap::Command::new("ports").about("List serial ports"))
        .subcommand(
            clap::Command::new("decode")
                .about("Decode a response line without a meter")
                .arg(arg!(<line> "Line as sent by the meter, e.g. \"DC 3.999 V\""))
                .arg(
                    arg!(--"format" <fmt> "Output format")
                        .value_parser(value_parser!(OutputFormat)),
                ),
        )
        .subcommand(
            clap::Command::new("mea")
                .about("Get current measurement")
                .arg(arg!(
                    --"loop" "Poll measurements until interrupted"
                ))
                .arg(
                    arg!(--"interval" <MS> "Delay between two polls in milliseconds")
                        .value_parser(value_parser!(u64).range(50..=5000)),
                )
                .arg(
                    arg!(--"format" <fmt> "Output format")
                        .value_parser(value_parser!(OutputFormat)),
                )
                .arg(
                    arg!(output: --"output" <PATH> "Append readings to CSV file")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    arg!(
                        --"fifo" <FIFO> "Write numeric reading as f64 value (LE) to FIFO file, NaN for non-numeric readings"
                    )
                    .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand_required(true)
        .get_matches();

    init_logging(matches.get_count("debug"));

    if let Err(e) = handle_args(&matches).await {
        match e {
            ProtoError::Transport(TransportError::Open { device, source })
            | ProtoError::Worker(WorkerError::Transport(TransportError::Open { device, source })) => {
                if source.kind() == tokio_serial::ErrorKind::NoDevice
                    || matches!(source.kind(), tokio_serial::ErrorKind::Io(ErrorKind::NotFound))
                {
                    eprintln!("{}: File not found", device);
                } else {
                    eprintln!("I/O Error: {} [device: {}]", source, device);
                }
                exit(-1);
            }
            ProtoError::ConnectionLost(reason) => {
                eprintln!("Lost connection to meter: {}", reason);
                exit(-1);
            }
            ProtoError::Sink(err) => {
                eprintln!("Output failed: {}", err);
                exit(-1);
            }
            err => {
                eprintln!("Error: {}", err);
                exit(-1);
            }
        }
    }
}

async fn handle_args(matches: &clap::ArgMatches) -> Result<()> {
    let settings_path = matches
        .get_one::<PathBuf>("settings")
        .cloned()
        .or_else(Settings::default_path);

    let mut settings = match settings_path.as_deref().map(Settings::load).transpose() {
        Ok(settings) => settings.unwrap_or_default(),
        Err(err) => {
            warn!("{}, using defaults", err);
            Settings::default()
        }
    };

    match matches.subcommand() {
        // Port list
        Some(("ports", _)) => {
            let ports = SerialTransport::enumerate();
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                if port.manufacturer.is_empty() {
                    println!("{:<20} {}", port.device, port.description);
                } else {
                    println!(
                        "{:<20} {} ({})",
                        port.device, port.description, port.manufacturer
                    );
                }
            }
        }

        // Offline decode
        Some(("decode", args)) => {
            let line = args.get_one::<String>("line").map_or("", String::as_str);
            let format = args
                .get_one::<OutputFormat>("format")
                .unwrap_or(&OutputFormat::Text);

            let reading = decode(line);
            if !reading.valid {
                eprintln!("Not a valid reading: {:?}", line);
                exit(-2);
            }
            let mut output = io::stdout();
            match format {
                OutputFormat::Text => {
                    println!("{:#}", reading);
                    if let Some(value) = reading.numeric_value() {
                        println!("Value: {}", value);
                    }
                }
                OutputFormat::Json => {
                    let json = serde_json::to_string_pretty(&reading).map_err(io::Error::from)?;
                    output.write_all(json.as_bytes())?;
                    output.write_fmt(format_args!("\n"))?;
                }
                OutputFormat::Csv => {
                    let mut writer = csv::Writer::from_writer(output);
                    writer
                        .serialize(FlattenSample::from(&Sample::now(reading)))
                        .map_err(SinkError::from)?;
                    writer.flush()?;
                }
            }
        }

        // Measurement
        Some(("mea", args)) => {
            let device = matches
                .get_one::<String>("device")
                .cloned()
                .or_else(|| settings.last_port.clone())
                .unwrap_or_else(|| DEFAULT_TTY.to_string());
            let endless_loop = args.get_flag("loop");
            let interval = args
                .get_one::<u64>("interval")
                .map(|ms| Duration::from_millis(*ms))
                .unwrap_or_else(|| settings.poll_interval());
            let format = *args
                .get_one::<OutputFormat>("format")
                .unwrap_or(&OutputFormat::Text);
            let output_path = args.get_one::<PathBuf>("output").cloned();

            let mut line = settings.line;
            if let Some(baud_rate) = matches.get_one::<u32>("baudrate") {
                line.baud_rate = *baud_rate;
            }

            let mut sink = output_path.as_ref().map(CsvSink::open).transpose()?;
            let fifo = args
                .get_one::<PathBuf>("fifo")
                .map(|path| OpenOptions::new().write(true).open(path))
                .transpose()?;

            let (tx, mut rx) = unbounded_channel();
            let worker = PollingWorker::connect(&device, &line, interval, tx)?;
            eprintln!("Connected to: {}\n", device);

            let mut printer = Printer::new(format, fifo);
            let result = loop {
                let event = tokio::select! {
                    event = rx.recv() => event,
                    _ = tokio::signal::ctrl_c() => {
                        debug!("Interrupted");
                        break Ok(());
                    }
                    _ = tokio::time::sleep(SINGLE_READING_WAIT), if !endless_loop => {
                        println!("--- NO DATA ---");
                        break Ok(());
                    }
                };

                match event {
                    Some(Event::Reading(sample)) => {
                        if let Err(err) = printer.print(&sample) {
                            break Err(err);
                        }
                        if let Some(csv) = sink.as_mut().filter(|csv| csv.is_open()) {
                            if let Err(err) = csv.write(&sample) {
                                eprintln!("Logging to {} stopped: {}", csv.path().display(), err);
                            }
                        }
                    }
                    Some(Event::Error(reason)) => break Err(ProtoError::ConnectionLost(reason)),
                    None => break Ok(()),
                }

                if !endless_loop {
                    break Ok(());
                }
            };

            if worker.is_finished() {
                debug!("Polling thread already ended");
            }
            worker.request_stop();
            tokio::task::spawn_blocking(move || worker.join())
                .await
                .map_err(|err| io::Error::new(ErrorKind::Other, err))??;
            if let Some(csv) = &sink {
                debug!("{} rows written to {}", csv.row_count(), csv.path().display());
            }
            result?;

            settings.last_port = Some(device);
            settings.poll_interval_ms = interval.as_millis() as u64;
            settings.line = line;
            if output_path.is_some() {
                settings.last_output = output_path;
            }
            if let Some(path) = settings_path {
                if let Err(err) = settings.save(&path) {
                    warn!("{}", err);
                }
            }
        }
        _ => {
            return Err(io::Error::new(
                ErrorKind::Unsupported,
                "Unsupported command line argument",
            )
            .into());
        }
    }

    Ok(())
}

/// Writes samples to stdout in the selected format.
struct Printer {
    format: OutputFormat,
    fifo: Option<File>,
    csv: Option<csv::Writer<Stdout>>,
    mode: Option<Mode>,
    count: u64,
}

impl Printer {
    fn new(format: OutputFormat, fifo: Option<File>) -> Self {
        Self {
            format,
            fifo,
            csv: None,
            mode: None,
            count: 0,
        }
    }

    fn print(&mut self, sample: &Sample) -> Result<()> {
        self.count += 1;
        match self.format {
            OutputFormat::Text => {
                let mode = sample.reading.mode();
                if mode != self.mode {
                    self.mode = mode;
                    if let Some(mode) = mode {
                        println!("Measurement mode: [{}]", mode);
                    }
                }
                println!("#{:0>4} {:#}", self.count, sample);
            }
            OutputFormat::Json => {
                let mut output = io::stdout();
                let json = serde_json::to_string_pretty(sample).map_err(io::Error::from)?;
                output.write_all(json.as_bytes())?;
                output.write_fmt(format_args!("\n"))?;
            }
            OutputFormat::Csv => {
                let writer = self
                    .csv
                    .get_or_insert_with(|| csv::Writer::from_writer(io::stdout()));
                writer
                    .serialize(FlattenSample::from(sample))
                    .map_err(SinkError::from)?;
                writer.flush()?;
            }
        }

        if let Some(binout) = &mut self.fifo {
            binout.write_f64::<LittleEndian>(sample.reading.numeric_value().unwrap_or(f64::NAN))?;
        }
        Ok(())
    }
}
