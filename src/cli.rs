//! Interactive command loop over a [`Ledger`]

use log::debug;
use thiserror::Error;

use std::io::{BufRead, Write};
use std::str::FromStr;

use crate::blockchain::{Ledger, LedgerError};

/// Errors that can occur while running the command loop
#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("\"{0}\" is not a valid number")]
    InvalidNumber(String),

    #[error("{0}")]
    Ledger(#[from] LedgerError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Whether the loop can report the error and keep going
    fn is_recoverable(&self) -> bool {
        matches!(self, CliError::InvalidNumber(_) | CliError::Ledger(_))
    }
}

/// Commands understood by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Mine,
    Append,
    Remove,
    Check,
    Report,
    Print,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mine" => Ok(Command::Mine),
            "append" => Ok(Command::Append),
            "remove" => Ok(Command::Remove),
            "check" => Ok(Command::Check),
            "report" => Ok(Command::Report),
            "print" => Ok(Command::Print),
            "help" => Ok(Command::Help),
            "quit" => Ok(Command::Quit),
            other => Err(other.to_string()),
        }
    }
}

const HELP: &str = "\
Valid commands:
    mine: discovers the nonce for a given transaction
    append: appends a new block onto the end of the chain
    remove: removes the last block from the end of the chain
    check: checks that the block chain is valid
    report: prints the balances of both parties
    print: prints the chain as JSON
    help: prints this list of commands
    quit: quits the program";

/// Reads commands from `input` and writes results to `output`
pub struct Driver<R, W> {
    ledger: Ledger,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Driver<R, W> {
    pub fn new(ledger: Ledger, input: R, output: W) -> Self {
        Driver {
            ledger,
            input,
            output,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Runs until `quit` or end of input
    pub fn run(&mut self) -> Result<(), CliError> {
        loop {
            writeln!(self.output, "{}", self.ledger)?;

            let Some(line) = self.prompt("Command?")? else {
                return Ok(());
            };

            let keep_running = match line.parse::<Command>() {
                Ok(command) => {
                    debug!("Running command {:?}", command);
                    match self.execute(command) {
                        Ok(keep_running) => keep_running,
                        Err(err) if err.is_recoverable() => {
                            writeln!(self.output, "Error: {}", err)?;
                            true
                        }
                        Err(err) => return Err(err),
                    }
                }
                Err(unknown) => {
                    writeln!(self.output, "Error: \"{}\" is not a valid command", unknown)?;
                    true
                }
            };

            writeln!(self.output)?;
            if !keep_running {
                return Ok(());
            }
        }
    }

    /// Executes one command; returns false when the loop should stop
    fn execute(&mut self, command: Command) -> Result<bool, CliError> {
        match command {
            Command::Mine => {
                let Some(amount) = self.prompt_number::<i32>("Amount transferred?")? else {
                    return Ok(false);
                };
                let block = self.ledger.propose_next(amount)?;
                writeln!(self.output, "amount = {}, nonce = {}", amount, block.nonce())?;
            }
            Command::Append => {
                let Some(amount) = self.prompt_number::<i32>("Amount transferred?")? else {
                    return Ok(false);
                };
                let Some(nonce) = self.prompt_number::<u64>("Nonce?")? else {
                    return Ok(false);
                };

                let block = self.ledger.verify_block(amount, nonce)?;
                if block.hash().is_valid() {
                    self.ledger.append(block)?;
                } else {
                    writeln!(
                        self.output,
                        "Error: invalid nonce (produces {})",
                        block.hash()
                    )?;
                }
            }
            Command::Remove => {
                if !self.ledger.remove_last() {
                    writeln!(self.output, "Error: blockchain contains no transactions")?;
                }
            }
            Command::Check => {
                if self.ledger.is_valid() {
                    writeln!(self.output, "Chain is valid!")?;
                } else {
                    writeln!(self.output, "Chain is invalid!")?;
                }
            }
            Command::Report => {
                writeln!(self.output, "{}", self.ledger.balances())?;
            }
            Command::Print => {
                let json = serde_json::to_string_pretty(&self.ledger.blocks())?;
                writeln!(self.output, "{}", json)?;
            }
            Command::Help => {
                writeln!(self.output, "{}", HELP)?;
            }
            Command::Quit => return Ok(false),
        }

        Ok(true)
    }

    /// Prints `message` and reads one trimmed line; `None` at end of input
    fn prompt(&mut self, message: &str) -> Result<Option<String>, CliError> {
        write!(self.output, "{} ", message)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }

        Ok(Some(line.trim().to_string()))
    }

    fn prompt_number<T: FromStr>(&mut self, message: &str) -> Result<Option<T>, CliError> {
        match self.prompt(message)? {
            Some(text) => text
                .parse()
                .map(Some)
                .map_err(|_| CliError::InvalidNumber(text)),
            None => Ok(None),
        }
    }
}
