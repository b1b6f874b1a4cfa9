use anyhow::Result;
use clap::{Parser, Subcommand};
use common::{Command, Response, ZoneId};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(name = "nctvctl")]
#[command(about = "NCTV Player Control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check if the player is running
    Ping,

    /// Show zone and optimizer status
    Status,

    /// Start playback
    Play {
        /// Zone (background, main, horizontal, vertical); all zones if omitted
        #[arg(value_parser = parse_zone)]
        zone: Option<ZoneId>,
    },

    /// Stop playback
    Stop {
        /// Zone (background, main, horizontal, vertical); all zones if omitted
        #[arg(value_parser = parse_zone)]
        zone: Option<ZoneId>,
    },

    /// Skip to the next item
    Next {
        /// Zone (background, main, horizontal, vertical); all zones if omitted
        #[arg(value_parser = parse_zone)]
        zone: Option<ZoneId>,
    },

    /// Go back to the previous item
    Prev {
        /// Zone (background, main, horizontal, vertical); all zones if omitted
        #[arg(value_parser = parse_zone)]
        zone: Option<ZoneId>,
    },

    /// Re-scan playlist directories
    Rescan,

    /// Start optimizing videos in the background
    Optimize,

    /// Cancel a running optimization
    CancelOptimize,

    /// Stop the player
    Kill,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Ping => Command::Ping,
        Commands::Status => Command::Status,
        Commands::Play { zone } => Command::Play { zone },
        Commands::Stop { zone } => Command::Stop { zone },
        Commands::Next { zone } => Command::Next { zone },
        Commands::Prev { zone } => Command::Previous { zone },
        Commands::Rescan => Command::Rescan,
        Commands::Optimize => Command::Optimize,
        Commands::CancelOptimize => Command::CancelOptimize,
        Commands::Kill => Command::Kill,
    };

    match send_command(command).await {
        Ok(response) => handle_response(response),
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Is nctv-player running?");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn parse_zone(s: &str) -> Result<ZoneId, String> {
    ZoneId::from_name(s).ok_or_else(|| {
        format!(
            "unknown zone '{}' (expected background, main, horizontal or vertical)",
            s
        )
    })
}

async fn send_command(command: Command) -> Result<Response> {
    let socket_path = common::get_socket_path();

    let stream = UnixStream::connect(&socket_path).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let command_json = serde_json::to_string(&command)?;
    writer.write_all(command_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    let mut response_line = String::new();
    reader.read_line(&mut response_line).await?;

    let response: Response = serde_json::from_str(&response_line)?;
    Ok(response)
}

fn handle_response(response: Response) {
    match response {
        Response::Ok => {
            println!("✓ Success");
        }
        Response::Error(e) => {
            eprintln!("✗ Error: {}", e);
            std::process::exit(1);
        }
        Response::Status(status) => {
            println!("Player Status:");
            println!("  Version: {}", status.version);
            println!("  Uptime: {}s", status.uptime_secs);
            println!("  Zones:");
            for zone in status.zones {
                let state = if zone.playing {
                    if zone.showing_image { "image" } else { "video" }
                } else {
                    "stopped"
                };
                println!(
                    "    {:<10} {:<7} {}/{} [{}]{}",
                    zone.zone.name(),
                    state,
                    if zone.playlist_len == 0 {
                        0
                    } else {
                        zone.current_index + 1
                    },
                    zone.playlist_len,
                    zone.render_mode,
                    if zone.video_available { "" } else { " (no video)" }
                );
                if let Some(path) = zone.current_path {
                    println!("               {}", path);
                }
            }
            let opt = status.optimizer;
            println!("  Optimizer:");
            println!("    {}", opt.status_message);
            if opt.optimizing {
                println!(
                    "    {}/{} files ({:.0}%)",
                    opt.completed_files,
                    opt.total_files,
                    opt.progress() * 100.0
                );
            }
        }
        Response::Pong => {
            println!("✓ Player is running");
        }
    }
}
