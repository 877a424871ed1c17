//! Interactive stepping of a loaded program.

use std::io::{self, BufRead, Write};

use bloom_eval::{Engine, TickReport, Tuple, Value};
use bloom_ir::{parse_pattern, parse_row};

use crate::{dump_all, print_tuples};

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Help,
    Quit,
    Tick(usize),
    Insert { collection: &'a str, row: &'a str },
    Stage { collection: &'a str, row: &'a str },
    Query { collection: &'a str, pattern: Option<&'a str> },
    Count(&'a str),
    Collections,
    Dump,
}

/// Parse one input line. `Err` carries a usage message.
fn parse_command(line: &str) -> Result<Command<'_>, String> {
    let (cmd, arg) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(a, b)| (a, b.trim()));
    match cmd {
        ":help" | ":h" => Ok(Command::Help),
        ":quit" | ":exit" | ":q" => Ok(Command::Quit),
        ":tick" | ":t" if arg.is_empty() => Ok(Command::Tick(1)),
        ":tick" | ":t" => arg
            .parse()
            .map(Command::Tick)
            .map_err(|_| "usage: :tick [n]".to_string()),
        ":insert" | ":stage" => {
            let Some((collection, row)) = split_target(arg).filter(|(_, row)| !row.is_empty()) else {
                return Err(format!("usage: {cmd} <collection> (value, ...)"));
            };
            if cmd == ":insert" {
                Ok(Command::Insert { collection, row })
            } else {
                Ok(Command::Stage { collection, row })
            }
        }
        ":query" => match split_target(arg) {
            Some((collection, "")) => Ok(Command::Query {
                collection,
                pattern: None,
            }),
            Some((collection, pattern)) => Ok(Command::Query {
                collection,
                pattern: Some(pattern),
            }),
            None => Err("usage: :query <collection> or :query coll(pattern, ...)".to_string()),
        },
        ":count" if !arg.is_empty() => Ok(Command::Count(arg)),
        ":count" => Err("usage: :count <collection>".to_string()),
        ":collections" | ":colls" => Ok(Command::Collections),
        ":dump" | ":d" => Ok(Command::Dump),
        _ => Err(format!("unknown command: {cmd} (type :help for commands)")),
    }
}

/// `name rest` or `name(rest)`; `rest` keeps its parentheses.
fn split_target(arg: &str) -> Option<(&str, &str)> {
    let end = arg
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(arg.len());
    let name = arg[..end].trim();
    if name.is_empty() {
        return None;
    }
    Some((name, arg[end..].trim()))
}

pub fn run(engine: &mut Engine) -> anyhow::Result<()> {
    eprintln!("Bloom interpreter");
    eprintln!("Type :help for commands, :quit to exit.\n");

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        eprint!("[tick {}] >> ", engine.current_tick());
        io::stderr().flush().ok();

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            eprintln!();
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match parse_command(trimmed) {
            Ok(Command::Quit) => break,
            Ok(cmd) => {
                if let Err(e) = execute(engine, cmd) {
                    eprintln!("error: {e:#}");
                }
            }
            Err(usage) => eprintln!("{usage}"),
        }
    }
    Ok(())
}

fn execute(engine: &mut Engine, cmd: Command<'_>) -> anyhow::Result<()> {
    match cmd {
        Command::Help => print_help(),
        Command::Quit => {}
        Command::Tick(n) => {
            for _ in 0..n {
                let report = engine.tick()?;
                show_report(&report);
            }
        }
        Command::Insert { collection, row } => {
            let row = parse_row(engine.collection(collection)?.schema(), row)?;
            let added = engine.insert(collection, [row])?;
            eprintln!("  {collection}: +{added}");
        }
        Command::Stage { collection, row } => {
            let row = parse_row(engine.collection(collection)?.schema(), row)?;
            engine.stage_merge(collection, [row])?;
            eprintln!("  {collection}: staged for the next tick");
        }
        Command::Query {
            collection,
            pattern,
        } => {
            let coll = engine.collection(collection)?;
            let tuples: Vec<Tuple> = match pattern {
                None => coll.iter().cloned().collect(),
                Some(text) => {
                    let pats = parse_pattern(coll.schema(), text)?;
                    coll.iter().filter(|t| matches(t, &pats)).cloned().collect()
                }
            };
            if tuples.is_empty() {
                eprintln!("  (no matches)");
            } else {
                print_tuples(coll, tuples);
            }
        }
        Command::Count(collection) => {
            let coll = engine.collection(collection)?;
            eprintln!("  {collection}: {}", coll.len());
        }
        Command::Collections => {
            for coll in engine.collections() {
                println!(
                    "  {} {}{}: {} tuple{}",
                    coll.persistence().keyword(),
                    coll.name(),
                    coll.schema(),
                    coll.len(),
                    if coll.len() == 1 { "" } else { "s" }
                );
            }
        }
        Command::Dump => dump_all(engine),
    }
    Ok(())
}

fn matches(tuple: &[Value], pats: &[Option<Value>]) -> bool {
    tuple
        .iter()
        .zip(pats)
        .all(|(v, p)| p.as_ref().is_none_or(|p| p == v))
}

fn show_report(report: &TickReport) {
    eprintln!(
        "tick {}: {} pass{}, {} emitted",
        report.tick,
        report.iterations,
        if report.iterations == 1 { "" } else { "es" },
        report.emitted
    );
    for change in &report.changes {
        eprintln!(
            "  {}: +{} -{}",
            change.collection,
            change.added.len(),
            change.removed.len()
        );
    }
}

fn print_help() {
    eprintln!("Commands:");
    eprintln!("  :help                     Show this help");
    eprintln!("  :tick [n]                 Run one (or n) ticks");
    eprintln!("  :insert <coll> (v, ...)   Merge a row now, within the current tick");
    eprintln!("  :stage <coll> (v, ...)    Stage a row for the next tick");
    eprintln!("  :query <coll>             Show all tuples in a collection");
    eprintln!("  :query coll(1, _)         Filter tuples by pattern");
    eprintln!("  :count <coll>             Show number of tuples in a collection");
    eprintln!("  :collections              List collections and their sizes");
    eprintln!("  :dump                     Show all non-empty collections");
    eprintln!("  :quit                     Exit");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tick() {
        assert_eq!(parse_command(":tick"), Ok(Command::Tick(1)));
        assert_eq!(parse_command(":tick 5"), Ok(Command::Tick(5)));
        assert!(parse_command(":tick many").is_err());
    }

    #[test]
    fn test_parse_insert() {
        assert_eq!(
            parse_command(r#":insert peeps ("ann", 1)"#),
            Ok(Command::Insert {
                collection: "peeps",
                row: r#"("ann", 1)"#
            })
        );
        assert_eq!(
            parse_command(":stage link(\"a\", \"b\")"),
            Ok(Command::Stage {
                collection: "link",
                row: "(\"a\", \"b\")"
            })
        );
        assert!(parse_command(":insert peeps").is_err());
    }

    #[test]
    fn test_parse_query() {
        assert_eq!(
            parse_command(":query path"),
            Ok(Command::Query {
                collection: "path",
                pattern: None
            })
        );
        assert_eq!(
            parse_command(":query path(\"a\", _)"),
            Ok(Command::Query {
                collection: "path",
                pattern: Some("(\"a\", _)")
            })
        );
    }

    #[test]
    fn test_unknown_command() {
        assert!(parse_command(":frobnicate").is_err());
    }

    #[test]
    fn test_pattern_matching() {
        let tuple = vec![Value::from("a"), Value::from(1)];
        assert!(matches(&tuple, &[None, Some(Value::from(1))]));
        assert!(!matches(&tuple, &[Some(Value::from("b")), None]));
    }
}
