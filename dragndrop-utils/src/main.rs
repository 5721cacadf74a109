#[macro_use]
extern crate log;

mod cat;
mod drop;
mod hex;
mod list;
mod probe;
mod ram;

use clap::Parser;
use derive_more::Display;
use dragndrop::{Control, Role, Settings};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Not a valid 8.3 file name: {0}")]
    InvalidName(String),
    #[error("No such file: {0}")]
    NotFound(String),
    #[error("File does not fit on the drive")]
    TooLarge,
    #[error("Root directory full")]
    DirectoryFull,
    #[error("Drive did not remount, file not recognized")]
    NoRemount,
}

#[derive(Copy, Clone, Debug, Display, clap::ValueEnum)]
enum Mode {
    #[display("interface")]
    Interface,
    #[display("bootloader")]
    Bootloader,
}

impl From<Mode> for Role {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Interface => Role::Interface,
            Mode::Bootloader => Role::Bootloader,
        }
    }
}

#[derive(Debug, clap::Args)]
struct Cat {
    /// File name on the drive, e.g. DETAILS.TXT
    name: String,
    /// Print as hex dump
    #[clap(long)]
    hex: bool,
}

#[derive(Debug, clap::Args)]
struct DropFile {
    /// Bin or hex image to copy onto the drive
    path: String,
    /// Write the directory entry before the file data
    #[clap(long)]
    directory_first: bool,
    /// Save programmed target flash
    #[clap(short, long)]
    output: Option<String>,
}

#[derive(Debug, clap::Subcommand)]
enum Action {
    /// List files on the freshly mounted drive
    #[clap(name = "ls")]
    List,
    /// Print file content on the standard output
    Cat(Cat),
    /// Copy a file onto the drive and wait for the remount
    Drop(DropFile),
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short, long)]
    quiet: bool,
    #[clap(short, action = clap::ArgAction::Count)]
    verbosity: u8,
    /// Firmware role of the simulated probe
    #[clap(short, long, value_enum, default_value_t = Mode::Interface)]
    mode: Mode,
    /// Auto reset the target after programming
    #[clap(long)]
    auto_reset: bool,
    #[clap(subcommand)]
    action: Action,
}

fn main() {
    let args = Args::parse();
    let level = match (args.quiet, args.verbosity) {
        (true, _) => log::LevelFilter::Off,
        (_, 0) => log::LevelFilter::Info,
        (_, 1) => log::LevelFilter::Debug,
        (_, _) => log::LevelFilter::Trace,
    };
    log::set_max_level(level);
    env_logger::builder().filter(None, level).target(env_logger::Target::Stdout).init();

    debug!("Simulating {} mode", args.mode);
    let config = probe::config(args.mode.into());
    let settings = Settings { auto_reset: args.auto_reset, ..Default::default() };
    let control = Control::new(&config);
    let mut session = probe::session(&control, config, settings);

    let result = match args.action {
        Action::List => {
            list::print(session.volume());
            Ok(())
        }
        Action::Cat(args) => cat::cat(&mut session, &args.name, args.hex),
        Action::Drop(args) => {
            let options = drop::Options {
                path: &args.path,
                directory_first: args.directory_first,
                output: args.output.as_deref(),
            };
            drop::drop(&control, session, options)
        }
    };
    if let Some(error) = result.err() {
        eprintln!("{:?}", error);
        std::process::exit(1);
    }
}
