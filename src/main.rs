#[macro_use]
extern crate log;

use std::io::{self, BufRead, Write};

use anyhow::Context;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use mdb_twi_shell::{Event, Options, Session};

const HELP: &str = "
Each line can contain zero or more commands separated by space.

Safe command is just hex. Examples: 01, 0fcb. Packet is framed automatically.
Raw commands start with !. Examples: !03013b, !040fcbff. Sent as-is, no length or CRC8 is added.
Sleep starts with 's' then time in milliseconds. Examples: s10, s200.
An empty line is a status poll.

Example: 01 s100 04 s30 0fcb s30 01
- status poll
- wait 100ms
- read debug log
- wait 30ms
- MDB send '1cb cb'
- wait 30ms, status poll

Commands:
- 01 status poll, no data
- 02 update config, bridge returns full config in response
- 03 reset, no data, wait 100ms then expect greeting
- 04 read debug info
- 07 MDB bus reset (hold TX high for 100ms)
- 08-0f MDB transaction
  bit0 add auto CHK
  bit1 verify response CHK
  bit2 repeat on timeout
";

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// I2C device the bridge is attached to
    #[structopt(long, default_value = "/dev/i2c-0")]
    device: String,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

fn print_event(e: Event) {
    println!("{}", e);
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let Args {
        device,
        options,
        log_level,
    } = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(log_level, Config::default());

    info!("Connecting to bridge on {}", device);

    let mut s = Session::linux(&device, options)
        .with_context(|| format!("Error opening I2C device {}", device))?;

    if let Err(e) = s.init(print_event) {
        error!("Error initialising bridge: {}", e);
    }

    println!("Hello. Type \"help\" for syntax, \"q\" to quit.");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("? ");
        io::stdout().flush().context("Error writing prompt")?;

        let line = match lines.next() {
            Some(l) => l.context("Error reading input")?,
            None => break,
        };

        match line.trim() {
            "q" => break,
            "help" => {
                println!("{}", HELP);
                continue;
            }
            _ => (),
        }

        if let Err(e) = s.run_line(&line, print_event) {
            error!("{}", e);
        }
    }

    Ok(())
}
