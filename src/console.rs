//! Line-based control console on stdin
//!
//! Stands in for the tray menu on headless hosts: each line maps to one
//! orchestrator action.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::orchestrator::OrchestratorHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Reconcile,
    ForceStop,
    Test { end_test: bool },
    Videos,
    Usage,
    Tag { name: String, tag: String },
    Protect { name: String, protected: bool },
    Delete { name: String },
    Quit,
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("empty command".to_string());
    };
    let rest: Vec<&str> = words.collect();

    let name = |usage: &str| -> Result<String, String> {
        rest.first()
            .map(|s| s.to_string())
            .ok_or_else(|| format!("usage: {}", usage))
    };

    match verb {
        "help" | "?" => Ok(ConsoleCommand::Help),
        "reload" => Ok(ConsoleCommand::Reconcile),
        "stop" => Ok(ConsoleCommand::ForceStop),
        "test" => Ok(ConsoleCommand::Test {
            end_test: rest.first() != Some(&"hold"),
        }),
        "videos" => Ok(ConsoleCommand::Videos),
        "usage" => Ok(ConsoleCommand::Usage),
        "tag" => {
            let name = name("tag <video> <tag>")?;
            if rest.len() < 2 {
                return Err("usage: tag <video> <tag>".to_string());
            }
            Ok(ConsoleCommand::Tag {
                name,
                tag: rest[1..].join(" "),
            })
        }
        "protect" => Ok(ConsoleCommand::Protect {
            name: name("protect <video>")?,
            protected: true,
        }),
        "unprotect" => Ok(ConsoleCommand::Protect {
            name: name("unprotect <video>")?,
            protected: false,
        }),
        "delete" => Ok(ConsoleCommand::Delete {
            name: name("delete <video>")?,
        }),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        other => Err(format!("unknown command '{}', try 'help'", other)),
    }
}

fn print_console_help() {
    println!("Commands:");
    println!("    reload                 Re-read settings and reconcile");
    println!("    stop                   Force-stop any in-progress activity");
    println!("    test [hold]            Run a test activity (hold: do not auto-end)");
    println!("    videos                 List videos in cloud storage");
    println!("    usage                  Refresh cloud usage");
    println!("    tag <video> <tag>      Tag a cloud video");
    println!("    protect <video>        Protect a cloud video from pruning");
    println!("    unprotect <video>      Remove protection");
    println!("    delete <video>         Delete a cloud video");
    println!("    quit                   Shut down");
}

/// Read commands from stdin until EOF or `quit`
pub fn spawn_console(handle: OrchestratorHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            let cmd = match parse_command(&line) {
                Ok(cmd) => cmd,
                Err(e) => {
                    println!("{}", e);
                    continue;
                }
            };

            let delivered = match cmd {
                ConsoleCommand::Help => {
                    print_console_help();
                    true
                }
                ConsoleCommand::Reconcile => handle.request_reconcile(),
                ConsoleCommand::ForceStop => handle.force_stop(),
                ConsoleCommand::Test { end_test } => handle.test_activity(end_test),
                ConsoleCommand::Videos => {
                    let videos = handle.list_videos().await;
                    if videos.is_empty() {
                        println!("No cloud videos");
                    }
                    for video in videos {
                        println!(
                            "{:<40} {:>12} bytes{}{}",
                            video.name,
                            video.size_bytes,
                            if video.protected { "  [protected]" } else { "" },
                            video.tag.map(|t| format!("  #{}", t)).unwrap_or_default()
                        );
                    }
                    true
                }
                ConsoleCommand::Usage => handle.refresh_cloud_usage(),
                ConsoleCommand::Tag { name, tag } => handle.tag_video(name, tag),
                ConsoleCommand::Protect { name, protected } => handle.protect_video(name, protected),
                ConsoleCommand::Delete { name } => handle.delete_video(name),
                ConsoleCommand::Quit => {
                    info!("Quit requested from console");
                    handle.shutdown();
                    break;
                }
            };

            if !delivered {
                warn!("Orchestrator stopped, closing console");
                break;
            }
        }

        debug!("Console closed");
    })
}
