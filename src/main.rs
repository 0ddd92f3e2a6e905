use std::io::Write;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use sandbox_chat::completion::CompletionProvider;
use sandbox_chat::rate_limit::RateLimiter;
use sandbox_chat::tracing::{init_tracing, shutdown_tracing};
use sandbox_chat::{default_registry, AppConfig, CompletionClient, Orchestrator, SandboxClient};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Defaults to `chat`
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive conversation with streamed replies
    Chat,

    /// Send a one-off message and print the reply
    Ask {
        #[arg(required = true)]
        message: Vec<String>,

        /// Print the reply as it is generated
        #[arg(short, long)]
        stream: bool,
    },

    /// Probe the completion provider and the sandbox service
    Health,

    /// Print the tool definitions sent to the provider
    Tools,

    /// Print Prometheus metrics in text format
    Metrics,
}

struct App {
    provider: Arc<CompletionClient>,
    sandbox: SandboxClient,
    agent: Orchestrator,
}

impl App {
    fn build(config: &AppConfig) -> Result<Self, BoxError> {
        let provider = Arc::new(CompletionClient::new(&config.provider)?);
        let sandbox = SandboxClient::new(config.sandbox.clone())?;
        let registry = Arc::new(default_registry(&sandbox, &config.features)?);

        let mut agent = Orchestrator::new(provider.clone(), registry, config.into());
        if config.rate_limit.enabled {
            agent = agent.with_rate_limiter(Arc::new(RateLimiter::per_minute(config.rate_limit.requests_per_minute)));
        }

        Ok(Self {
            provider,
            sandbox,
            agent,
        })
    }

    async fn reply(&mut self, text: &str, stream: bool) -> std::io::Result<()> {
        if stream {
            let mut fragments = Box::pin(self.agent.stream_message(text));
            let mut stdout = std::io::stdout();
            while let Some(fragment) = fragments.next().await {
                write!(stdout, "{fragment}")?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
        } else {
            let reply = self.agent.send_message(text).await;
            println!("{reply}");
        }
        Ok(())
    }

    async fn chat(&mut self, stream: bool) -> std::io::Result<()> {
        println!("sandbox-chat ({} tools). Type 'exit' to quit.", self.agent.registry().len());
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            std::io::stdout().flush()?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let text = line.trim();
            match text {
                "" => continue,
                "exit" | "quit" => break,
                _ => self.reply(text, stream).await?,
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(env!("CARGO_PKG_NAME"), config.otlp_endpoint.as_deref())?;

    let mut app = App::build(&config)?;
    let result = match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => app.chat(config.features.streaming).await.map_err(BoxError::from),
        Commands::Ask { message, stream } => app.reply(&message.join(" "), stream).await.map_err(BoxError::from),
        Commands::Health => {
            let (provider, sandbox) = tokio::join!(app.provider.health_check(), app.sandbox.health_check());
            let report = json!({ "completion": provider, "sandbox": sandbox });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Tools => {
            let definitions = app.agent.registry().list_definitions();
            println!("{}", serde_json::to_string_pretty(&definitions)?);
            Ok(())
        }
        Commands::Metrics => {
            print!("{}", sandbox_chat::metrics::encode_metrics()?);
            Ok(())
        }
    };

    app.sandbox.shutdown();
    shutdown_tracing();
    result
}
