use clap::Parser;
use noteminder::cli::{
    handle_add, handle_clear, handle_delete, handle_list, handle_run, handle_serve, handle_times,
    Cli, Commands,
};
use noteminder::logging::init_tracing;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match cli.command {
        Commands::Run { .. } | Commands::Serve { .. } => "info",
        _ => "warn",
    };
    init_tracing(level);

    let dir = cli.dir;
    let result = match cli.command {
        Commands::Add {
            content,
            at,
            stdin,
            json,
        } => handle_add(dir, content, at, stdin, json).await,
        Commands::List { sort, json } => handle_list(dir, sort, json).await,
        Commands::Delete { id, force } => handle_delete(dir, id, force).await,
        Commands::Clear { all, force } => handle_clear(dir, all, force).await,
        Commands::Times => handle_times().await,
        Commands::Run { permission } => handle_run(dir, permission).await,
        Commands::Serve { upstream, bind } => handle_serve(dir, upstream, bind).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
