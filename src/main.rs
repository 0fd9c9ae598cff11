mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use hlsworker::api::models::JobView;
use hlsworker::app::{App, open_queue};
use hlsworker::config::Config;
use hlsworker::observability;
use hlsworker::queue::SubmitRequest;
use tokio_util::sync::CancellationToken;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    observability::init_tracing();

    let cli = Cli::parse();
    let autodetect = matches!(&cli.command, Commands::Worker(args) if args.autodetect_uploads_root);
    let mut config = Config::load_with(cli.config.clone(), autodetect)?;

    match cli.command {
        Commands::Worker(args) => {
            if let Some(bind) = args.bind {
                config.server.bind_addr = bind;
            }
            let app = App::build(config).await?;

            let shutdown = CancellationToken::new();
            {
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    hlsworker::api::shutdown_signal().await;
                    shutdown.cancel();
                });
            }
            app.run(shutdown).await?;
        }
        Commands::Enqueue(args) => {
            let queue = open_queue(&config)?;
            let record = queue
                .submit(SubmitRequest {
                    video_id: args.video_id,
                    source_locator: args.source,
                    category_partition: args.category,
                })
                .await?;
            queue.flush().await?;
            println!("{}", serde_json::to_string_pretty(&JobView::from(record))?);
        }
        Commands::Status(args) => {
            let queue = open_queue(&config)?;
            let reporter = queue.reporter();
            let Some(record) = reporter.get_by_video(&args.video_id)? else {
                return Err(format!("no job for video {}", args.video_id).into());
            };
            let job_id = record.job_id.clone();
            println!("{}", serde_json::to_string_pretty(&JobView::from(record))?);
            if args.events {
                for event in reporter.events(&job_id)? {
                    println!(
                        "{} {:<9} {:>3}% attempt {} {}",
                        event.timestamp.to_rfc3339(),
                        event.status,
                        event.progress,
                        event.attempt,
                        event.message
                    );
                }
            }
        }
        Commands::DeadLetters(args) => {
            let queue = open_queue(&config)?;
            for (seq, entry) in queue.dead_letters(args.limit).await? {
                let video_id = entry
                    .task
                    .as_ref()
                    .map(|task| task.video_id.as_str())
                    .unwrap_or("-");
                println!(
                    "{seq:>6} {video_id} {} after {} attempt(s): {}",
                    entry.failure_code, entry.attempts, entry.failure_message
                );
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
