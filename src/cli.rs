use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run MicroPython code on a board connected over serial.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Use this serial port instead of looking for one
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Print output events as JSON, one per line
    #[arg(long, global = true)]
    pub json: bool,

    /// Also log to daily rotated files in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Store a program as the board's entry point, then reset to run it.
    Flash {
        /// The Python file to store
        file: PathBuf,
    },

    /// Run code in the REPL, keeping what earlier code left behind.
    Execute {
        /// The Python file to run
        #[arg(required_unless_present = "code")]
        file: Option<PathBuf>,

        /// Code to run instead of a file
        #[arg(long, conflicts_with = "file")]
        code: Option<String>,
    },

    /// Reset the board, running whatever entry point it has.
    Reboot,

    /// Show how the REPL would complete a prefix.
    Complete {
        /// For example `mic` or `display.sc`
        prefix: String,
    },

    /// List the serial ports passing the device filters.
    Ports,

    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,
}
