use std::io;
use std::path;
use std::process;
use std::time;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use linesort::FileSorter;

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let mut sorter = FileSorter::new();
    if let Some(tmp_dir) = arg_parser.value_of("tmp_dir") {
        sorter = sorter.with_tmp_dir(path::Path::new(tmp_dir));
    }
    if arg_parser.is_present("threads") {
        sorter = sorter.with_threads_number(arg_parser.value_of_t_or_exit("threads"));
    }

    let input = prompt("Input filename:");
    let output = prompt("Output filename:");
    let memory_limit_mb: u64 = match prompt("Memory limit (MB):").parse() {
        Ok(memory_limit_mb) => memory_limit_mb,
        Err(err) => {
            eprintln!("memory limit must be a whole number of megabytes: {}", err);
            process::exit(1);
        }
    };

    println!("Running ({} memory limit)...", ByteSize::mib(memory_limit_mb));
    let started = time::Instant::now();

    match sorter.sort(&input, &output, memory_limit_mb) {
        Ok(()) => {
            println!("Done! Took {} ms to finish", started.elapsed().as_millis());
        }
        Err(err) if err.is_soft() => {
            eprintln!("{}", err);
        }
        Err(err) => {
            log::error!("sorting failed: {}", err);
            process::exit(1);
        }
    }
}

fn prompt(message: &str) -> String {
    println!("{}", message);

    let mut answer = String::new();
    if let Err(err) = io::stdin().read_line(&mut answer) {
        log::error!("reading standard input failed: {}", err);
        process::exit(1);
    }

    answer.trim().to_string()
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("linesort")
        .about("external merge sort for line-oriented text files")
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel chunk sorting")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
