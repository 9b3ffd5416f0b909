use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "router-cli")]
#[command(about = "Management CLI for the MCP router", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8052")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Router status and version
    Status,
    /// Backend health; pass a backend key for a single record
    Health {
        key: Option<String>,
        /// Run checks now instead of reading the last results
        #[arg(long)]
        check: bool,
        /// Limit a triggered check to one service
        #[arg(long)]
        service: Option<String>,
    },
    /// Connection, balancer, health and session statistics
    Stats,
    /// Invoke a capability on a named service
    Route {
        service: String,
        capability: String,
        /// JSON object passed as the capability arguments
        #[arg(short, long, default_value = "{}")]
        args: String,
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },
    /// Invoke a capability on whichever service offers it
    SmartRoute {
        capability: String,
        #[arg(short, long, default_value = "{}")]
        args: String,
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },
    /// Invoke a capability on every instance of a service
    Broadcast {
        service: String,
        capability: String,
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
    /// List capabilities: everything reachable, one service's, or who offers one
    Tools {
        /// Limit the listing to one service
        #[arg(short, long)]
        service: Option<String>,
        /// Show the services offering this capability
        #[arg(long)]
        providers: Option<String>,
    },
    /// Force a service's circuit open or closed, or reset it
    Circuit {
        service: String,
        #[arg(value_enum)]
        action: CircuitAction,
    },
    /// List push sessions
    Sessions,
}

#[derive(Clone, Copy, ValueEnum)]
enum CircuitAction {
    Open,
    Close,
    Reset,
}

impl CircuitAction {
    fn as_str(&self) -> &'static str {
        match self {
            CircuitAction::Open => "open",
            CircuitAction::Close => "close",
            CircuitAction::Reset => "reset",
        }
    }
}

fn invoke_body(capability: &str, args: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let arguments: Value = serde_json::from_str(args)?;
    Ok(serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": { "name": capability, "arguments": arguments },
    }))
}

fn with_timeout(url: String, timeout_ms: Option<u64>) -> String {
    match timeout_ms {
        Some(ms) => format!("{url}?timeout_ms={ms}"),
        None => url,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Status => client.get(format!("{base}/status")).send().await?,
        Commands::Health { key: Some(key), .. } => {
            client.get(format!("{base}/health/{key}")).send().await?
        }
        Commands::Health { key: None, check: true, service } => {
            let mut req = client.post(format!("{base}/health/check"));
            if let Some(service) = service {
                req = req.query(&[("service", service)]);
            }
            req.send().await?
        }
        Commands::Health { .. } => client.get(format!("{base}/health")).send().await?,
        Commands::Stats => client.get(format!("{base}/stats")).send().await?,
        Commands::Route { service, capability, args, timeout_ms } => {
            client
                .post(with_timeout(format!("{base}/route/{service}"), timeout_ms))
                .json(&invoke_body(&capability, &args)?)
                .send()
                .await?
        }
        Commands::SmartRoute { capability, args, timeout_ms } => {
            client
                .post(with_timeout(format!("{base}/route"), timeout_ms))
                .json(&invoke_body(&capability, &args)?)
                .send()
                .await?
        }
        Commands::Broadcast { service, capability, args } => {
            client
                .post(format!("{base}/broadcast/{service}"))
                .json(&invoke_body(&capability, &args)?)
                .send()
                .await?
        }
        Commands::Tools { providers: Some(name), .. } => {
            client.get(format!("{base}/tools/{name}/providers")).send().await?
        }
        Commands::Tools { service: Some(service), .. } => {
            client.get(format!("{base}/services/{service}/tools")).send().await?
        }
        Commands::Tools { .. } => client.get(format!("{base}/tools")).send().await?,
        Commands::Circuit { service, action } => {
            client
                .post(format!("{base}/circuit/{service}/{}", action.as_str()))
                .send()
                .await?
        }
        Commands::Sessions => client.get(format!("{base}/sessions")).send().await?,
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: router returned status {}", status);
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) if !text.is_empty() => println!("{text}"),
        Err(_) => {}
    }
    Ok(())
}
