use std::process::exit;

use anyhow::anyhow;
use clap::{crate_authors, crate_version, App as ClapApp, Arg, ArgMatches};
use env_logger::Env;

use specan::address::BusAddress;
use specan::analyzer::SpectrumAnalyzer;
use specan::config::Settings;
use specan::protocol::parameter::{self, Parameter};
use specan::transport::prologix;

fn setting(name: &'static str, about: &'static str) -> ClapApp<'static> {
    ClapApp::new(name).about(about).arg(
        Arg::new("value")
            .value_name("HZ")
            .help("New value, the current value is printed if omitted"),
    )
}

fn parse_hz(value: &str) -> anyhow::Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| anyhow!("Cannot parse `{}` as a frequency.", value))
}

fn address(matches: &ArgMatches, settings: &Settings) -> anyhow::Result<BusAddress> {
    if let Some(addr) = matches.value_of("address") {
        return Ok(BusAddress::parse(addr, &settings.default_driver)?);
    }
    let gpib = matches
        .value_of("gpib")
        .ok_or_else(|| anyhow!("Either --address or --gpib is required."))?;
    let board = matches.value_of("board").unwrap_or("0");
    let args: Vec<&str> = match matches.value_of("driver") {
        Some(driver) => vec![driver, board, gpib],
        None => vec![board, gpib],
    };
    Ok(BusAddress::from_args(&args, &settings.default_driver)?)
}

fn run_setting(analyzer: &mut SpectrumAnalyzer, param: &Parameter, matches: &ArgMatches) -> anyhow::Result<()> {
    match matches.value_of("value") {
        Some(value) => analyzer.set(param, parse_hz(value)?)?,
        None => println!("{}", analyzer.get(param)?),
    }
    Ok(())
}

// Global options are read from the subcommand matches, clap propagates them there.
fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    let (cmd, sub) = matches
        .subcommand()
        .ok_or_else(|| anyhow!("No command given, see --help."))?;
    let settings = match sub.value_of("config") {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if cmd == "ports" {
        for port in prologix::list_ports()? {
            println!("{}", port);
        }
        return Ok(());
    }

    let addr = address(sub, &settings)?;
    log::debug!("Connecting to {}", addr);
    let mut analyzer = settings.analyzer(addr);
    analyzer.open()?;

    match cmd {
        "marker-y" => println!("{}", analyzer.get_marker_y()?),
        "trace" => {
            let trace = analyzer.get_trace()?;
            if sub.is_present("json") {
                println!("{}", serde_json::to_string(&trace)?);
            } else {
                for (freq, power) in trace.points() {
                    println!("{},{}", freq, power);
                }
            }
        }
        "write" => {
            let scpi = sub.value_of("scpi").unwrap_or_default();
            analyzer.send_command("%s", &[scpi.into()])?;
        }
        "query" => {
            let scpi = sub.value_of("scpi").unwrap_or_default();
            println!("{}", analyzer.query("%s", &[scpi.into()])?);
        }
        name => {
            let param = parameter::lookup(name).ok_or_else(|| anyhow!("Unknown command `{}`", name))?;
            run_setting(&mut analyzer, param, sub)?;
        }
    }
    analyzer.close()?;
    Ok(())
}

fn main() {
    let matches = ClapApp::new("Spectrum analyzer remote control")
        .author(crate_authors!())
        .version(crate_version!())
        .about("Control a GPIB spectrum analyzer over a Prologix controller")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .takes_value(true)
                .global(true)
                .help("Settings file (TOML)."),
        )
        .arg(
            Arg::new("address")
                .long("address")
                .short('a')
                .takes_value(true)
                .global(true)
                .conflicts_with_all(&["gpib", "board", "driver"])
                .help("Instrument address, e.g. `prologix::0::18` or `GPIB0::18::INSTR`."),
        )
        .arg(
            Arg::new("driver")
                .long("driver")
                .takes_value(true)
                .global(true)
                .help("Transport driver, `prologix` or `sim`."),
        )
        .arg(
            Arg::new("board")
                .long("board")
                .short('b')
                .takes_value(true)
                .global(true)
                .help("Board index of the GPIB controller. Defaults to 0."),
        )
        .arg(
            Arg::new("gpib")
                .long("gpib")
                .short('g')
                .takes_value(true)
                .global(true)
                .help("Primary GPIB address of the instrument."),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .help("Log verbose output"),
        )
        .subcommand(setting("center", "Get or set the center frequency"))
        .subcommand(setting("span", "Get or set the frequency span"))
        .subcommand(setting("bandwidth", "Get or set the resolution bandwidth"))
        .subcommand(setting("marker-x", "Get or set the marker frequency"))
        .subcommand(ClapApp::new("marker-y").about("Print the level at the marker"))
        .subcommand(
            ClapApp::new("trace")
                .about("Print the current sweep as `frequency,power` lines")
                .arg(Arg::new("json").long("json").help("Print as JSON")),
        )
        .subcommand(
            ClapApp::new("write")
                .about("Send a raw SCPI command")
                .arg(Arg::new("scpi").required(true)),
        )
        .subcommand(
            ClapApp::new("query")
                .about("Send a raw SCPI query and print the reply")
                .arg(Arg::new("scpi").required(true)),
        )
        .subcommand(ClapApp::new("ports").about("List serial ports"))
        .get_matches();

    let verbose = match matches.subcommand() {
        Some((_, sub)) => sub.is_present("verbose"),
        None => matches.is_present("verbose"),
    };
    if verbose {
        env_logger::Builder::from_env(Env::default().default_filter_or("specan=debug")).init();
    } else {
        env_logger::init();
    }

    if let Err(err) = run(&matches) {
        eprintln!("Error: {}", err);
        exit(1);
    }
    log::debug!("Application quitting.");
}
