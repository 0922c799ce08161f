use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use int_ext_sort::{generate, validate, SolverBuilder};

/// Generator write buffer size.
const GENERATE_BUF_SIZE: usize = 32 * 1024 * 1024;

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let threads: i64 = arg_parser.value_of_t_or_exit("threads");
    let threads = if threads > 0 { Some(threads as usize) } else { None };

    let input = path::Path::new(arg_parser.value_of("input").expect("value is required"));
    let output = path::Path::new(arg_parser.value_of("output").expect("value is required"));
    let mode: Mode = arg_parser.value_of_t_or_exit("mode");

    let result = match mode {
        Mode::Generate => {
            let size: u64 = arg_parser.value_of_t_or_exit("size");
            generate(input, size, GENERATE_BUF_SIZE)
        }
        Mode::Validate => validate(input, output),
        Mode::Solve => {
            let mut solver_builder = SolverBuilder::new();
            if let Some(threads) = threads {
                solver_builder = solver_builder.with_threads_number(threads);
            }

            if let Some(tmp_dir) = arg_parser.value_of("tmp_dir") {
                solver_builder = solver_builder.with_tmp_dir(path::Path::new(tmp_dir));
            }

            if let Some(chunk_size) = arg_parser.value_of("chunk_size") {
                solver_builder =
                    solver_builder.with_chunk_size(chunk_size.parse::<ByteSize>().expect("value is pre-validated").as_u64());
            }

            if let Some(memory_limit) = arg_parser.value_of("memory_limit") {
                solver_builder = solver_builder
                    .with_memory_limit(memory_limit.parse::<ByteSize>().expect("value is pre-validated").as_u64());
            }

            match solver_builder.build() {
                Ok(solver) => solver.solve(input, output).map(|_| ()),
                Err(err) => {
                    log::error!("solver initialization error: {}", err);
                    process::exit(1);
                }
            }
        }
    };

    if let Err(err) = result {
        log::error!("{} failed: {}", mode.name(), err);
        process::exit(1);
    }
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

#[derive(Copy, Clone, clap::ArgEnum)]
enum Mode {
    Generate,
    Validate,
    Solve,
}

impl Mode {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Mode::value_variants().iter().filter_map(|v| v.to_possible_value())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mode::Generate => "generation",
            Mode::Validate => "validation",
            Mode::Solve => "sorting",
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Mode as clap::ArgEnum>::from_str(s.trim(), true)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    let app = clap::App::new("int-ext-sort")
        .about("parallel external sorter of big-endian 32-bit integer files")
        .arg(
            clap::Arg::new("threads")
                .help("number of threads to use for parallel sorting, 0 or less selects the number of CPU cores")
                .required(true)
                .allow_hyphen_values(true)
                .takes_value(true)
                .validator(|v| match v.parse::<i64>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Thread number {} must be an integer: {}", v, err)),
                }),
        )
        .arg(
            clap::Arg::new("input")
                .help("file to be sorted (or generated)")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .help("result file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("mode")
                .help("operation mode")
                .takes_value(true)
                .default_value("solve")
                .ignore_case(true)
                .possible_values(Mode::possible_values()),
        )
        .arg(
            clap::Arg::new("size")
                .help("generated input size in bytes (generate mode only)")
                .takes_value(true)
                .default_value("1073741824")
                .validator(|v| match v.parse::<u64>() {
                    Ok(size) if size % 4 == 0 => Ok(()),
                    Ok(size) => Err(format!("Size {} must be a multiple of 4", size)),
                    Err(err) => Err(format!("Size format incorrect: {}", err)),
                }),
        )
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
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("chunk_size")
                .short('c')
                .long("chunk-size")
                .help("input chunk size")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(size) if size.as_u64() > 0 && size.as_u64() % 4 == 0 => Ok(()),
                    Ok(size) => Err(format!("Chunk size {} must be a positive multiple of 4 bytes", size.as_u64())),
                    Err(err) => Err(format!("Chunk size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("memory_limit")
                .short('m')
                .long("memory-limit")
                .help("memory available to the sort working set of all threads")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Memory limit format incorrect: {}", err)),
                }),
        );

    match app.try_get_matches() {
        Ok(matches) => matches,
        Err(err) if matches!(err.kind(), clap::ErrorKind::DisplayHelp | clap::ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    }
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
