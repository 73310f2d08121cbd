use std::fs;
use std::io;
use std::process;

use anyhow::Result;
use clap::{App, Arg};

use sim86::error::CliError;
use sim86::memory::Memory;

fn app<'a, 'b>() -> App<'a, 'b> {
    App::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about("An 8086 instruction decoder and functional simulator")
        .arg(
            Arg::with_name("cmd")
                .help("decompile, run, or trace")
                .possible_values(&["decompile", "run", "trace"])
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("src_file")
                .help("path to a raw 8086 machine code file")
                .required(true)
                .index(2),
        )
}

fn run_cli() -> Result<()> {
    let matches = app().get_matches();
    let cmd = matches.value_of("cmd").expect("required arg");
    let src_file = matches.value_of("src_file").expect("required arg");

    let code = fs::read(src_file).map_err(|source| CliError::Open {
        path: src_file.to_string(),
        source,
    })?;

    let mut mem = Memory::new();
    mem.load_code(&code);

    match cmd {
        "decompile" => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            sim86::decompile(&mut mem, &mut lock)
        }
        "run" => sim86::run(&mut mem, None),
        "trace" => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            sim86::run(&mut mem, Some(&mut lock))
        }
        other => unreachable!("clap restricted `cmd` to known values, got {}", other),
    }
}

fn main() {
    env_logger::init();
    process::exit(match run_cli() {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("sim86: error: {:#}", e);
            1
        }
    });
}
