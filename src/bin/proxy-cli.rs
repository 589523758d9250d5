use clap::{Parser, Subcommand};
use pooled_proxy::admin::handlers::SystemStatus;
use pooled_proxy::proxy::EngineStats;

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for the pooled caching proxy", long_about = None)]
struct Cli {
    /// Admin API base URL.
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: String,

    /// Admin API key.
    #[arg(short, long, env = "PROXY_ADMIN_KEY")]
    key: String,

    /// Print raw JSON instead of a summary.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check proxy status and version
    Status,
    /// Show upstream pool and cache statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Status => {
            let res = fetch(&client, &format!("{base}/admin/status"), &cli.key).await?;
            let status: SystemStatus = res.json().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("status:  {}", status.status);
                println!("version: {}", status.version);
            }
        }
        Commands::Stats => {
            let res = fetch(&client, &format!("{base}/admin/stats"), &cli.key).await?;
            let stats: EngineStats = res.json().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
    }

    Ok(())
}

async fn fetch(
    client: &reqwest::Client,
    url: &str,
    key: &str,
) -> Result<reqwest::Response, Box<dyn std::error::Error>> {
    let res = client.get(url).bearer_auth(key).send().await?;
    let status = res.status();
    if !status.is_success() {
        let text = res.text().await.unwrap_or_default();
        return Err(format!("admin API returned {status}: {text}").into());
    }
    Ok(res)
}

fn print_stats(stats: &EngineStats) {
    println!("pending requests:        {}", stats.pending_requests);
    println!("idle connections:        {}", stats.idle_connections);
    println!("assigned connections:    {}", stats.assigned_connections);
    println!("connecting connections:  {}", stats.connecting_connections);
    println!("max concurrent used:     {}", stats.max_concurrent_connections);
    println!("cached responses:        {}", stats.cached_responses);
    println!("client connections:      {}", stats.client_connections);
}
