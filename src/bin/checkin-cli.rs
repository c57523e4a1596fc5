use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "checkin-cli")]
#[command(about = "Operator CLI for the check-in rewards service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// User to act as (sent in X-User-ID).
    #[arg(long, env = "CHECKIN_USER_ID")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check service health
    Health,
    /// Start today's check-in and print the payment challenge
    CheckIn,
    /// Verify payment for an order
    Verify { order_id: String },
    /// List check-in history
    History {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 10)]
        page_size: usize,
    },
    /// Show check-in summary
    Summary,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    if let Some(user) = &cli.user {
        headers.insert("X-User-ID", HeaderValue::from_str(user)?);
    }

    let res = match cli.command {
        Commands::Health => client.get(format!("{}/health", base)).send().await?,
        Commands::CheckIn => {
            client
                .post(format!("{}/api/checkin", base))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Verify { order_id } => {
            client
                .post(format!("{}/api/checkin/verify", base))
                .headers(headers)
                .json(&json!({ "order_id": order_id }))
                .send()
                .await?
        }
        Commands::History { page, page_size } => {
            client
                .get(format!("{}/api/checkin/my", base))
                .headers(headers)
                .query(&[("page", page), ("pageSize", page_size)])
                .send()
                .await?
        }
        Commands::Summary => {
            client
                .get(format!("{}/api/checkin/summary", base))
                .headers(headers)
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    // 402 carries the payment challenge and is an expected answer.
    if !status.is_success() && status != reqwest::StatusCode::PAYMENT_REQUIRED {
        eprintln!("Error: service returned status {}", status);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
