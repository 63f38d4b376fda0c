use std::array;
use std::time::Duration;

use crate::event::{Command, EventEmitter};
use common::config::Config;
use entity::trading::OrderSide;
use log::error;
use rustyline::error::ReadlineError;
use rustyline::Editor;
use stock_symbol::Symbol;
use time::UtcOffset;
use tokio::task;

pub async fn run_task(emitter: EventEmitter<Command>, editor: Editor<()>) {
    let mut editor = Some(Box::new(editor));
    let mut error_count = 0;

    loop {
        let join_result = task::spawn_blocking({
            let mut editor = editor.take().unwrap();

            move || {
                let result = editor.readline("> ");
                (editor, result)
            }
        })
        .await;

        let (returned_editor, input) = match join_result {
            Ok(ret) => ret,
            Err(unhandled_error) => {
                error!("Terminal reader task panicked: {unhandled_error:?}. Aborting CLI.");
                return;
            }
        };

        editor = Some(returned_editor);

        match input {
            Ok(input) => {
                if let Some(command) = parse_command(&input) {
                    let should_stop = matches!(command, Command::Stop);
                    emitter.emit(command).await;
                    if should_stop {
                        return;
                    }
                }

                println!();
            }
            Err(ReadlineError::Interrupted) => {
                emitter.emit(Command::Stop).await;
                return;
            }
            // Do nothing
            Err(ReadlineError::WindowResized | ReadlineError::Eof) => (),
            Err(error) => {
                error!("Unexpected error when reading CLI input: {error:?}");
                error_count += 1;

                if error_count > 3 {
                    error!("Maximum retries exceeded, aborting CLI");
                    return;
                }

                tokio::time::sleep(Duration::from_secs(3u64.pow(error_count))).await;
                continue;
            }
        }

        // We successfully processed some line input, so we reset the error count
        error_count = 0;
    }
}

fn parse_command(input: &str) -> Option<Command> {
    let input = input.trim();

    if input.is_empty() {
        return None;
    }

    let mut components = input.split(' ');
    let command = components.next()?;
    let args = components.collect::<Vec<_>>();

    match command {
        "m" | "market" => Some(Command::Market),
        "b" | "buy" => order(OrderSide::Buy, &args),
        "s" | "sell" => order(OrderSide::Sell, &args),
        "p" | "portfolio" => Some(Command::Portfolio),
        "tx" | "transactions" => Some(Command::Transactions { count: count(&args)? }),
        "perf" | "performance" => Some(Command::Performance { count: count(&args)? }),
        "tick" => tick(&args),
        "ns" | "new-session" => Some(Command::NewSession),
        "engdump" | "engine-dump" => Some(Command::EngineDump),
        "save" => Some(Command::Save {
            file: args.first().map(|&file| file.to_owned()),
        }),
        "load" => Some(Command::Load {
            file: args.first().map(|&file| file.to_owned()),
        }),
        "status" => Some(Command::Status),
        "stop" | "exit" | "quit" => Some(Command::Stop),
        "suo" | "set-utc-offset" => set_utc_offset(&args),
        "help" => {
            print_help();
            None
        }
        _ => {
            println!("Unknown command \"{command}\". Type \"help\" for a list of commands.");
            None
        }
    }
}

fn print_help() {
    println!(
        "Commands:\n\
         \x20 market (m)               show instruments, prices and change from open\n\
         \x20 buy (b) <symbol> <qty>   buy shares at the current price\n\
         \x20 sell (s) <symbol> <qty>  sell shares at the current price\n\
         \x20 portfolio (p)            show cash, holdings and total value\n\
         \x20 transactions (tx) [n]    show the n most recent transactions\n\
         \x20 performance (perf) [n]   show the n most recent performance points\n\
         \x20 tick [n]                 advance the market n ticks immediately\n\
         \x20 new-session (ns)         reset each instrument's session open price\n\
         \x20 save [file]              save market and portfolio state\n\
         \x20 load [file]              load market and portfolio state\n\
         \x20 status                   show a one-screen account summary\n\
         \x20 engine-dump (engdump)    dump engine state to engine.json\n\
         \x20 set-utc-offset (suo)     set the display UTC offset (H:M:S)\n\
         \x20 stop                     save and exit"
    );
}

fn order(side: OrderSide, args: &[&str]) -> Option<Command> {
    let (symbol_arg, shares_arg) = match (args.first(), args.get(1)) {
        (Some(&symbol), Some(&shares)) => (symbol, shares),
        _ => {
            println!("Usage: {} <symbol> <shares>", side.to_string().to_lowercase());
            return None;
        }
    };

    // Symbols are case-insensitive at the user boundary
    let symbol = match Symbol::from_str(&symbol_arg.to_uppercase()) {
        Ok(symbol) => symbol,
        Err(error) => {
            println!("Invalid symbol: {error}");
            return None;
        }
    };

    let shares = match shares_arg.parse::<u32>() {
        Ok(shares) => shares,
        Err(error) => {
            println!("Invalid share count: {error}");
            return None;
        }
    };

    Some(match side {
        OrderSide::Buy => Command::Buy { symbol, shares },
        OrderSide::Sell => Command::Sell { symbol, shares },
    })
}

// Returns None to abort the command, Some(None) when no count was given
fn count(args: &[&str]) -> Option<Option<usize>> {
    match args.first() {
        Some(&arg) => match arg.parse::<usize>() {
            Ok(0) => {
                println!("Count cannot be 0");
                None
            }
            Ok(count) => Some(Some(count)),
            Err(error) => {
                println!("Failed to parse count: {error}");
                None
            }
        },
        None => Some(None),
    }
}

fn tick(args: &[&str]) -> Option<Command> {
    let count = match args.first() {
        Some(&arg) => match arg.parse::<u32>() {
            Ok(0) => {
                println!("Tick count cannot be 0");
                return None;
            }
            Ok(count) => count,
            Err(error) => {
                println!("Failed to parse tick count: {error}");
                return None;
            }
        },
        None => 1,
    };

    Some(Command::Tick { count })
}

fn set_utc_offset(args: &[&str]) -> Option<Command> {
    let offset_str = match args.first() {
        Some(&arg) => arg,
        None => {
            println!("Missing offset argument, required H:M:S offset.");
            return None;
        }
    };

    let mut time_components = offset_str.split(':');
    let [h, m, s] = array::from_fn(|_| {
        time_components
            .next()
            .and_then(|component| component.parse::<i8>().ok())
    });

    let (h, m, s) = match (h, m, s) {
        (Some(h), Some(m), Some(s)) => (h, m, s),
        _ => {
            println!("Required offset in the form H:M:S where H, M, and S are signed integers");
            return None;
        }
    };

    let offset = match UtcOffset::from_hms(h, m, s) {
        Ok(offset) => offset,
        Err(error) => {
            println!("Component out of range: {error}");
            return None;
        }
    };

    Config::get().utc_offset.set(offset);
    println!("Updated UTC offset");
    None
}
