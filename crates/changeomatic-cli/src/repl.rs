//! REPL for driving the simulated devices by hand.
//!
//! Supported slash-commands:
//!   /help                  – show this list
//!   /note <cents>          – insert a note that is read and credited
//!   /reject                – insert a note the validator refuses
//!   /float <5,10,20,50>    – refill the hopper for these notes and announce it
//!   /empty                 – drain the hopper and announce it
//!   /hopper <event> [n]    – emit a raw hopper event
//!   /validator <event> [n] – emit a raw validator event
//!   /status                – show simulated device state
//!   /quit | /exit          – shut the kiosk down

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use changeomatic_hal::sim::{NoteFloat, SimHopper, SimValidator, parse_channel_spec};
use colored::Colorize;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    Note(i64),
    Reject,
    Float(NoteFloat),
    Empty,
    HopperEvent(String, Option<i64>),
    ValidatorEvent(String, Option<i64>),
    Status,
    Quit,
}

/// Parse one input line.  `Err` carries a message for the user.
pub fn parse(line: &str) -> Result<ReplCommand, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".into());
    };
    let rest: Vec<&str> = words.collect();

    let amount = |raw: Option<&&str>| -> Result<Option<i64>, String> {
        raw.map(|s| s.parse::<i64>().map_err(|_| format!("'{s}' is not an amount")))
            .transpose()
    };

    match head {
        "/help" => Ok(ReplCommand::Help),
        "/note" => match amount(rest.first())? {
            Some(cents) => Ok(ReplCommand::Note(cents)),
            None => Err("usage: /note <cents>".into()),
        },
        "/reject" => Ok(ReplCommand::Reject),
        "/float" => {
            let Some(spec) = rest.first() else {
                return Ok(ReplCommand::Float(NoteFloat::default()));
            };
            let mut float = NoteFloat::empty();
            for value in parse_channel_spec(spec) {
                match value {
                    5 => float.note_5 = true,
                    10 => float.note_10 = true,
                    20 => float.note_20 = true,
                    50 => float.note_50 = true,
                    other => return Err(format!("no {other} note")),
                }
            }
            Ok(ReplCommand::Float(float))
        }
        "/empty" => Ok(ReplCommand::Empty),
        "/hopper" | "/validator" => {
            let Some(event) = rest.first() else {
                return Err(format!("usage: {head} <event> [amount]"));
            };
            let event = event.replace('_', " ");
            let value = amount(rest.get(1))?;
            if head == "/hopper" {
                Ok(ReplCommand::HopperEvent(event, value))
            } else {
                Ok(ReplCommand::ValidatorEvent(event, value))
            }
        }
        "/status" => Ok(ReplCommand::Status),
        "/quit" | "/exit" => Ok(ReplCommand::Quit),
        other => Err(format!("Unknown command: '{other}'")),
    }
}

/// Read commands from stdin until `/quit` or EOF, then wake `shutdown`.
pub fn run(hopper: Arc<SimHopper>, validator: Arc<SimValidator>, shutdown: Arc<Notify>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", "changeomatic>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        match parse(&line) {
            Ok(ReplCommand::Help) => print_help(),
            Ok(ReplCommand::Note(cents)) => {
                if !validator.insert_note(cents) {
                    println!("  {}", "note refused: validator disabled or channel inhibited".yellow());
                }
            }
            Ok(ReplCommand::Reject) => validator.reject_note(),
            Ok(ReplCommand::Float(float)) => {
                hopper.set_float(float);
                hopper.emit("floated", None);
            }
            Ok(ReplCommand::Empty) => {
                hopper.set_float(NoteFloat::empty());
                hopper.emit("smart emptied", Some(0));
                hopper.emit("cashbox paid", None);
            }
            Ok(ReplCommand::HopperEvent(event, amount)) => hopper.emit(&event, amount),
            Ok(ReplCommand::ValidatorEvent(event, amount)) => validator.emit(&event, amount),
            Ok(ReplCommand::Status) => {
                let accepting: Vec<String> =
                    validator.accepting().iter().map(u8::to_string).collect();
                println!(
                    "  validator {} accepting [{}]",
                    if validator.is_enabled() { "enabled".green() } else { "disabled".red() },
                    accepting.join(",")
                );
                println!(
                    "  hopper    {} ({} requests seen)",
                    if hopper.is_enabled() { "enabled".green() } else { "disabled".red() },
                    hopper.received().len()
                );
            }
            Ok(ReplCommand::Quit) => break,
            Err(msg) => println!(
                "{} Type {} for available commands.",
                msg.red(),
                "/help".bold()
            ),
        }
    }
    shutdown.notify_one();
}

fn print_help() {
    println!();
    println!("{}", "Simulation Commands".bold().underline());
    println!("  {}        – credit a note worth <cents>", "/note <cents>".bold().cyan());
    println!("  {}               – refuse a note", "/reject".bold().cyan());
    println!("  {}   – refill the hopper for these notes", "/float <5,10,20,50>".bold().cyan());
    println!("  {}                – drain the hopper", "/empty".bold().cyan());
    println!("  {}   – raw hopper event (use _ for spaces)", "/hopper <event> [n]".bold().cyan());
    println!("  {} – raw validator event", "/validator <event> [n]".bold().cyan());
    println!("  {}               – device state", "/status".bold().cyan());
    println!("  {}         – shut down", "/quit  /exit".bold().cyan());
    println!();
}
