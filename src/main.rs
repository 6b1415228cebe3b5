use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::path::Path;
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

use bagplay::recording::{bags_dir, get_bag_info, list_bags, resolve_bag, BagReader};
use bagplay::{config, player, Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.verbose.log_level_filter().as_str()),
    )
    .init();

    match cli.command {
        Command::Play(args) => {
            let mut options = config::load_play_options(cli.config.as_deref()).into_diagnostic()?;
            // Invalid options fail before any task is started
            args.apply_to(&mut options).into_diagnostic()?;

            Toplevel::new(move |s| async move {
                s.start(SubsystemBuilder::new("Player", move |subsys| {
                    player::run(subsys, args, options)
                }));
            })
            .catch_signals()
            .handle_shutdown_requests(Duration::from_secs(2))
            .await
            .into_diagnostic()
        }
        Command::Info { bag } => show_info(&resolve_bag(&bag)),
        Command::List { dir } => {
            let dir = dir.unwrap_or_else(bags_dir);
            show_list(&dir);
            Ok(())
        }
    }
}

fn show_info(path: &Path) -> Result<()> {
    let info = get_bag_info(path).into_diagnostic()?;
    let reader = BagReader::open_path(path).into_diagnostic()?;
    let header = reader.header();
    let footer = reader.footer();

    println!("File:      {}", path.display());
    println!("Version:   {}", header.version);
    println!("Size:      {} bytes", info.size);
    println!(
        "Recorded:  {} (unix seconds)",
        header.start_time_ns.max(0) / 1_000_000_000
    );
    println!("Messages:  {}", footer.message_count);
    println!("Start:     {:.3}s", footer.first_timestamp as f64 * 1e-9);
    println!("Duration:  {:.3}s", footer.duration().as_secs_f64());
    println!("Topics:");
    for topic in reader.topics() {
        println!("  {:<32} {}", topic.name, topic.type_name);
    }
    Ok(())
}

fn show_list(dir: &Path) {
    let bags = list_bags(dir);
    if bags.is_empty() {
        println!("No bags in {}", dir.display());
        return;
    }
    println!(
        "{:<40} {:>12} {:>10} {:>10} {:>7}",
        "NAME", "SIZE", "MESSAGES", "DURATION", "TOPICS"
    );
    for bag in bags {
        println!(
            "{:<40} {:>12} {:>10} {:>9.1}s {:>7}",
            bag.filename,
            bag.size,
            bag.message_count,
            bag.duration_ms as f64 / 1000.0,
            bag.topic_count
        );
    }
}
