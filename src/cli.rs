//! Interactive console
//!
//! Simulates key presses from the terminal when no deck hardware is
//! attached, and shows volume and port state.

use anyhow::Result;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::sync::Arc;

use crate::deck::Deck;
use crate::feedback::FeedbackPhase;
use crate::mapping::{Page, KEYS_PER_PAGE};
use crate::ports::PortRegistry;
use crate::volume::VolumeModel;

/// A parsed console line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplCommand {
    Press { key_no: u32, page: Page },
    Faces(Page),
    Volumes,
    Ports,
    Help,
    Quit,
    Empty,
}

impl ReplCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => Ok(ReplCommand::Empty),
            ["quit" | "exit" | "q"] => Ok(ReplCommand::Quit),
            ["help" | "?"] => Ok(ReplCommand::Help),
            ["vol" | "volumes"] => Ok(ReplCommand::Volumes),
            ["ports"] => Ok(ReplCommand::Ports),
            ["faces"] => Ok(ReplCommand::Faces(Page::First)),
            ["faces", "p2"] => Ok(ReplCommand::Faces(Page::Second)),
            ["p2", key] => parse_key(key).map(|key_no| ReplCommand::Press {
                key_no,
                page: Page::Second,
            }),
            [key] => parse_key(key).map(|key_no| ReplCommand::Press {
                key_no,
                page: Page::First,
            }),
            _ => Err(format!("Unknown command: {}", line.trim())),
        }
    }
}

fn parse_key(word: &str) -> Result<u32, String> {
    match word.parse::<u32>() {
        Ok(key) if key < KEYS_PER_PAGE => Ok(key),
        Ok(key) => Err(format!("Key {} out of range (0-{})", key, KEYS_PER_PAGE - 1)),
        Err(_) => Err(format!("Unknown command: {}", word)),
    }
}

pub async fn run_repl(
    deck: Arc<Deck>,
    registry: Arc<PortRegistry>,
    volume: Arc<VolumeModel>,
) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    print_help();

    loop {
        // Reading the terminal blocks; keep the runtime's other tasks moving
        let readline = tokio::task::block_in_place(|| rl.readline("ketron> "));
        let line = match readline {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let _ = rl.add_history_entry(line.as_str());

        match ReplCommand::parse(&line) {
            Ok(ReplCommand::Quit) => break,
            Ok(ReplCommand::Empty) => {},
            Ok(ReplCommand::Help) => print_help(),
            Ok(ReplCommand::Press { key_no, page }) => {
                let result = deck.spawn_press(key_no, page).await?;
                match result {
                    Some(r) if r.success => println!("  {} key {}", "OK".green(), key_no),
                    Some(r) => println!(
                        "  {} key {}: {}",
                        "FAILED".red(),
                        key_no,
                        r.error.map(|e| e.to_string()).unwrap_or_default()
                    ),
                    None => println!("  {} key {} (nothing sent)", "--".dimmed(), key_no),
                }
            },
            Ok(ReplCommand::Faces(page)) => print_faces(&deck, page),
            Ok(ReplCommand::Volumes) => print_volumes(&volume),
            Ok(ReplCommand::Ports) => print_ports(&registry),
            Err(msg) => println!("  {}", msg.yellow()),
        }
    }

    Ok(())
}

fn print_help() {
    println!("\n{}", "=== Ketron Deck console ===".bold().cyan());
    println!("  {:<10} press key 0-14 on page 1", "<key>".bright_white());
    println!("  {:<10} press key 0-14 on page 2", "p2 <key>".bright_white());
    println!("  {:<10} show key faces (add p2 for page 2)", "faces".bright_white());
    println!("  {:<10} show volume levels", "vol".bright_white());
    println!("  {:<10} list MIDI output ports", "ports".bright_white());
    println!("  {:<10} exit", "quit".bright_white());
}

fn print_faces(deck: &Deck, page: Page) {
    for key_no in 0..KEYS_PER_PAGE {
        let Some(face) = deck.face(key_no, page) else {
            continue;
        };
        let label = face.label.replace('\n', " ");
        let label = match face.phase {
            FeedbackPhase::Normal => label.normal(),
            FeedbackPhase::FlashSuccess => label.green(),
            FeedbackPhase::FlashFailure => label.red(),
        };
        println!(
            "  {:>2}  {:<20} {} on {}",
            key_no,
            label,
            face.text_color.dimmed(),
            face.background_color.dimmed()
        );
    }
}

fn print_volumes(volume: &VolumeModel) {
    let selected = volume.last_selected();
    for (source, state) in volume.snapshot() {
        let marker = if Some(source) == selected { "▶" } else { " " };
        let muted = if state.muted { " [MUTED]".red() } else { "".normal() };
        println!(
            "  {} {:<10} {:>3}{}",
            marker.bright_green(),
            source.to_string(),
            state.value,
            muted
        );
    }
}

/// Print output ports, marking open ones
pub fn print_ports(registry: &PortRegistry) {
    println!("\n{}", "=== MIDI Output Ports ===".bold().cyan());
    match registry.list_ports() {
        Ok(ports) => {
            let open = registry.open_ports();
            if ports.is_empty() && open.is_empty() {
                println!("  {}", "No output ports found".dimmed());
            }
            let auto = crate::ports::select_hardware_port(&ports);
            for port in &ports {
                let marker = if open.contains(port) {
                    "[OPEN]".bright_green()
                } else if auto.as_ref() == Some(port) {
                    "[AUTO]".green()
                } else {
                    "      ".normal()
                };
                println!("  {} {}", marker, port);
            }
            // Still connected but no longer offered by the backend
            for port in open.iter().filter(|p| !ports.contains(p)) {
                println!("  {} {}", "[GONE]".yellow(), port);
            }
        },
        Err(e) => println!("  {}", e.to_string().red()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            ReplCommand::parse("3"),
            Ok(ReplCommand::Press {
                key_no: 3,
                page: Page::First
            })
        );
        assert_eq!(
            ReplCommand::parse("  p2 14 "),
            Ok(ReplCommand::Press {
                key_no: 14,
                page: Page::Second
            })
        );
        assert_eq!(ReplCommand::parse("vol"), Ok(ReplCommand::Volumes));
        assert_eq!(ReplCommand::parse("faces p2"), Ok(ReplCommand::Faces(Page::Second)));
        assert_eq!(ReplCommand::parse(""), Ok(ReplCommand::Empty));
        assert_eq!(ReplCommand::parse("exit"), Ok(ReplCommand::Quit));
    }

    #[test]
    fn test_parse_rejects_bad_keys() {
        assert!(ReplCommand::parse("15").is_err());
        assert!(ReplCommand::parse("p2 x").is_err());
        assert!(ReplCommand::parse("play now").is_err());
    }
}
