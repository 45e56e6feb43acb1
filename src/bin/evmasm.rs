// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
use std::error::Error;

use clap::{arg, Arg, ArgMatches, Command};
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use evmasm::asm::Compiler;
use evmasm::fork::Fork;
use evmasm::numeric::Value;

fn main() -> Result<(), Box<dyn Error>> {
    let matches = Command::new("evmasm")
        .about("Assembler for EVM bytecode, with macros, includes and labels")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg(arg!(--verbose "Show verbose output"))
        .subcommand(
            Command::new("assemble")
                .about("Assemble a source file into a raw bytecode hex string")
                .arg(Arg::new("file").required(true))
                .arg(Arg::new("fork").long("fork").takes_value(true).help("Target fork (default: shanghai)"))
                .arg(Arg::new("max-errors").long("max-errors").takes_value(true))
                .arg(Arg::new("max-include-depth").long("max-include-depth").takes_value(true))
                .arg(Arg::new("debug-lex").long("debug-lex").help("Trace the lexer's token stream"))
                .arg(
                    Arg::new("define")
                        .short('D')
                        .long("define")
                        .takes_value(true)
                        .multiple_occurrences(true)
                        .help("Override a global value, as NAME=VALUE"),
                )
                .visible_alias("a"),
        )
        .get_matches();

    let verbose = matches.is_present("verbose");
    init_logging(if verbose { LevelFilter::Debug } else { LevelFilter::Info });

    let ok = match matches.subcommand() {
        Some(("assemble", args)) => assemble(args)?,
        _ => unreachable!(),
    };

    std::process::exit(if ok { 0 } else { 1 });
}

fn assemble(args: &ArgMatches) -> Result<bool, Box<dyn Error>> {
    let path = args.get_one::<String>("file").unwrap();

    let fork = match args.get_one::<String>("fork") {
        Some(name) => Fork::by_name(name).ok_or_else(|| format!("unknown fork '{}'", name))?,
        None => Fork::default(),
    };
    let max_errors = match args.get_one::<String>("max-errors") {
        Some(s) => s.parse::<usize>().map_err(|_| "invalid --max-errors")?,
        None => 100,
    };
    let max_include_depth = match args.get_one::<String>("max-include-depth") {
        Some(s) => s.parse::<usize>().map_err(|_| "invalid --max-include-depth")?,
        None => 64,
    };

    log::info!("assembling '{}' for fork '{}'", path, fork.name());

    let mut compiler = Compiler::new()
        .with_fork(fork)
        .with_max_errors(max_errors)
        .with_include_depth_limit(max_include_depth)
        .with_debug_lex(args.is_present("debug-lex"));

    if let Some(defines) = args.values_of("define") {
        for define in defines {
            let (name, value) = define.split_once('=').ok_or_else(|| format!("invalid -D '{}', expected NAME=VALUE", define))?;
            let parsed = value.parse::<i64>().map_err(|_| format!("invalid -D value '{}' for '{}'", value, name))?;
            compiler = compiler.with_global(name, Value::from_i64(parsed));
        }
    }

    let output = compiler.compile_file(path);

    for diag in output.errors.all() {
        if diag.warning {
            log::warn!("{}", diag);
        } else {
            log::error!("{}", diag);
        }
    }

    if output.errors.failed() {
        return Ok(false);
    }

    println!("0x{}", hex_string(&output.bytes));
    Ok(true)
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Initialise logging using a suitable pattern.
pub fn init_logging(level: LevelFilter) {
    let encoder = PatternEncoder::new("[{l}] {m}{n}");
    let stdout = ConsoleAppender::builder().encoder(Box::new(encoder)).build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))
        .unwrap();
    let _handle = log4rs::init_config(config).unwrap();
}
