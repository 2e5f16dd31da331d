#![deny(missing_docs)]

//! This crate drives a MicroPython REPL over a serial port.
//!
//! Code is typed into the REPL as a single line, wrapped by prints of marker strings.
//! The markers tell us when the code starts and when it is done,
//! and what is printed in between is the program's output.
//! Tracebacks are recognized and parsed into structured errors.
//!
//! Use [`connection::connect`] to find and open a board, then run commands on the
//! [`session::Session`]. Each command gives back an [`session::OutputStream`].
//!
//! The [`mock`] module provides a device end to test against without a board.

/// The command line interface.
pub mod cli;

/// Encoding code and commands for the REPL.
pub mod command;

/// Configuration.
pub mod config;

/// Establishing a connection to a board.
pub mod connection;

/// Possible errors in this library.
pub mod error;

/// What comes out of running code.
pub mod events;

/// Logging setup.
pub mod logging;

/// A mock board.
pub mod mock;

/// Making sense of device output.
pub mod parser;

/// Reading device output.
pub mod reader;

/// Running commands on a connected board.
pub mod session;

/// Moving bytes to and from a board.
pub mod transport;

mod serial;
