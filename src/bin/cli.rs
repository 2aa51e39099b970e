//! TideKV CLI Client
//!
//! Interactive shell for talking to a TideKV server. Commands are
//! case-insensitive and whitespace-tokenised:
//!
//! ```text
//! CONNECT <ip> <port> <api-key>   authenticate against a server
//! ADD <key> <value>               store a value (sent as a string)
//! FIND <key>                      look a key up
//! REMOVE <key>                    remove a key
//! HELP                            show this list
//! EXIT                            leave the shell
//! ```
//!
//! Failures print a one-line diagnostic and the shell continues.

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tidekv::{Client, Value};

const PROMPT: &str = "tidekv> ";

/// TideKV interactive shell
#[derive(Parser, Debug)]
#[command(name = "tidekv-cli")]
#[command(about = "Interactive shell for the TideKV key-value store")]
#[command(version)]
struct Args {}

fn main() {
    let _ = Args::parse();

    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("failed to initialize line editor: {}", e);
            std::process::exit(1);
        }
    };

    println!("TideKV shell v{} (type HELP for commands)", tidekv::VERSION);

    let mut shell = Shell { client: None };

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(trimmed);
                if !shell.handle_line(trimmed) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
            }
            Err(ReadlineError::Eof) => {
                println!("Bye");
                break;
            }
            Err(e) => {
                eprintln!("error reading input: {}", e);
                break;
            }
        }
    }
}

struct Shell {
    client: Option<Client>,
}

impl Shell {
    /// Execute one input line; returns false when the shell should exit
    fn handle_line(&mut self, line: &str) -> bool {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let command = tokens[0].to_ascii_uppercase();

        match (command.as_str(), &tokens[1..]) {
            ("HELP", _) => {
                print_help();
            }
            ("EXIT", _) => {
                println!("Bye");
                return false;
            }
            ("CONNECT", [ip, port, api_key]) => {
                self.connect(ip, port, api_key);
            }
            ("CONNECT", _) => {
                eprintln!("usage: CONNECT <ip> <port> <api-key>");
            }
            ("ADD", [key, value]) => {
                self.with_client(|client| {
                    client.add(key, Value::Str(value.to_string()))?;
                    println!("OK");
                    Ok(())
                });
            }
            ("ADD", _) => {
                eprintln!("usage: ADD <key> <value>");
            }
            ("FIND", [key]) => {
                self.with_client(|client| {
                    match client.find(key)? {
                        Some(value) => println!("{}", value),
                        None => println!("(not found)"),
                    }
                    Ok(())
                });
            }
            ("FIND", _) => {
                eprintln!("usage: FIND <key>");
            }
            ("REMOVE", [key]) => {
                self.with_client(|client| {
                    client.remove(key)?;
                    println!("OK");
                    Ok(())
                });
            }
            ("REMOVE", _) => {
                eprintln!("usage: REMOVE <key>");
            }
            _ => {
                eprintln!("unknown command {:?}; type HELP", tokens[0]);
            }
        }
        true
    }

    fn connect(&mut self, ip: &str, port: &str, api_key: &str) {
        let port: u16 = match port.parse() {
            Ok(p) => p,
            Err(_) => {
                eprintln!("invalid port {:?}", port);
                return;
            }
        };

        if self.client.take().is_some() {
            println!("closing previous connection");
        }

        match Client::connect((ip, port), api_key) {
            Ok(client) => {
                self.client = Some(client);
                println!("connected to {}:{}", ip, port);
            }
            Err(e) => eprintln!("connect failed: {}", e),
        }
    }

    fn with_client(&mut self, op: impl FnOnce(&Client) -> tidekv::Result<()>) {
        match &self.client {
            Some(client) => {
                if let Err(e) = op(client) {
                    eprintln!("error: {}", e);
                }
            }
            None => eprintln!("not connected; use CONNECT <ip> <port> <api-key>"),
        }
    }
}

fn print_help() {
    println!("commands:");
    println!("  CONNECT <ip> <port> <api-key>   authenticate against a server");
    println!("  ADD <key> <value>               store a value (sent as a string)");
    println!("  FIND <key>                      look a key up");
    println!("  REMOVE <key>                    remove a key");
    println!("  HELP                            show this list");
    println!("  EXIT                            leave the shell");
}
