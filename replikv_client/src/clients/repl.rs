//! Interactive REPL-style command-line interface client.

use std::io::{self, Write};
use std::str::SplitWhitespace;

use crate::drivers::{DriverClosedLoop, DriverReply};

use color_print::{cprint, cprintln};

use replikv::ReplikvError;

/// Prompt string at the start of line.
const PROMPT: &str = ">>>>> ";

/// Recognizable command types.
enum ReplCommand {
    /// Read the value of a key.
    Read { key: String },

    /// Write a value into a key.
    Write { key: String, value: String },

    /// Print help message.
    PrintHelp,

    /// Client exit.
    Exit,

    /// Nothing read.
    Nothing,
}

/// Interactive REPL-style client struct.
pub struct ClientRepl {
    /// Closed-loop request driver.
    driver: DriverClosedLoop,

    /// User input buffer.
    input_buf: String,
}

impl ClientRepl {
    /// Creates a new REPL-style client.
    pub fn new(driver: DriverClosedLoop) -> Self {
        ClientRepl {
            driver,
            input_buf: String::new(),
        }
    }

    /// Prints the prompt string.
    fn print_prompt() {
        cprint!("<bright-yellow>{}</>", PROMPT);
        io::stdout().flush().unwrap();
    }

    /// Prints (optionally) an error message and the help message.
    fn print_help(err: Option<&ReplikvError>) {
        if let Some(e) = err {
            cprintln!("<bright-red>✗</> {}", e);
        }
        println!("HELP: Supported commands:");
        println!("          read <key>");
        println!("          write <key> <value>");
        println!("          help");
        println!("          exit");
        println!("      Keys and values cannot contain whitespaces");
        io::stdout().flush().unwrap();
    }

    /// Expect to get the next segment string from parsed segs.
    fn expect_next_seg<'s>(
        segs: &mut SplitWhitespace<'s>,
    ) -> Result<&'s str, ReplikvError> {
        if let Some(seg) = segs.next() {
            Ok(seg)
        } else {
            let err = ReplikvError::msg("not enough args");
            Self::print_help(Some(&err));
            Err(err)
        }
    }

    /// Reads in user input and parses into a command.
    fn read_command(&mut self) -> Result<ReplCommand, ReplikvError> {
        self.input_buf.clear();
        let nread = io::stdin().read_line(&mut self.input_buf)?;
        if nread == 0 {
            return Ok(ReplCommand::Exit);
        }

        let line: &str = self.input_buf.trim();
        if line.is_empty() {
            return Ok(ReplCommand::Nothing);
        }

        // split input line by whitespaces, getting an iterator of segments
        let mut segs = self.input_buf.split_whitespace();

        // get command type, match case-insensitively
        let cmd_type = segs.next();
        debug_assert!(cmd_type.is_some());

        match &cmd_type.unwrap().to_lowercase()[..] {
            "read" => {
                // keys are kept as-is, no case conversions
                let key = Self::expect_next_seg(&mut segs)?;
                Ok(ReplCommand::Read { key: key.into() })
            }

            "write" => {
                // keys and values are kept as-is, no case conversions
                let key = Self::expect_next_seg(&mut segs)?;
                let value = Self::expect_next_seg(&mut segs)?;
                Ok(ReplCommand::Write {
                    key: key.into(),
                    value: value.into(),
                })
            }

            "help" => Ok(ReplCommand::PrintHelp),

            "exit" | "quit" => Ok(ReplCommand::Exit),

            _ => {
                let err = ReplikvError(format!(
                    "unrecognized command: {}",
                    cmd_type.unwrap()
                ));
                Self::print_help(Some(&err));
                Err(err)
            }
        }
    }

    /// Prints operation result.
    fn print_result(result: DriverReply) {
        match result {
            DriverReply::Success { value, ts, latency } => {
                let lat_ms = latency.as_secs_f64() * 1000.0;
                match value {
                    Some(value) => {
                        cprintln!(
                            "<bright-green>✓</> \"{}\" (ts={}) <<took {:.2} ms>>",
                            String::from_utf8_lossy(&value),
                            ts,
                            lat_ms
                        );
                    }
                    None => {
                        cprintln!(
                            "<bright-green>✓</> committed (ts={}) <<took {:.2} ms>>",
                            ts,
                            lat_ms
                        );
                    }
                }
            }

            DriverReply::Failed => {
                cprintln!("<bright-red>✗</> operation failed its quorum");
            }
        }

        io::stdout().flush().unwrap();
    }

    /// One iteration of the REPL loop. On success, returns a boolean that's
    /// false only when exiting.
    async fn iter(&mut self) -> Result<bool, ReplikvError> {
        Self::print_prompt();

        let cmd = self.read_command()?;
        match cmd {
            ReplCommand::Exit => {
                println!("Exiting...");
                Ok(false)
            }

            ReplCommand::Nothing => Ok(true),

            ReplCommand::PrintHelp => {
                Self::print_help(None);
                Ok(true)
            }

            ReplCommand::Read { key } => {
                let result = self.driver.read(&key).await?;
                Self::print_result(result);
                Ok(true)
            }

            ReplCommand::Write { key, value } => {
                let result =
                    self.driver.write(&key, value.into_bytes()).await?;
                Self::print_result(result);
                Ok(true)
            }
        }
    }

    /// Runs the infinite REPL loop.
    pub async fn run(&mut self) -> Result<(), ReplikvError> {
        self.driver.connect().await?;

        loop {
            match self.iter().await {
                Ok(true) => {}

                Ok(false) => {
                    self.driver.leave().await?;
                    break;
                }

                Err(err) => {
                    cprintln!("<bright-red>✗</> error: {}", err);
                }
            }
        }

        Ok(())
    }
}
