use std::error::Error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use plausch::core::config::{self, RuntimeConfig};
use plausch::core::language;
use plausch::ui::chat_loop;

#[derive(Parser)]
#[command(name = "plausch")]
#[command(about = "A terminal chat companion with streaming replies")]
#[command(long_about = "Plausch is a terminal chat companion that connects to an \
OpenAI-compatible completion API and types replies into the scrollback as they \
stream in.\n\n\
Environment Variables:\n\
  PLAUSCH_API_KEY    Bearer credential for the completion API (required)\n\
  PLAUSCH_BASE_URL   Custom API base URL (optional)\n\n\
Controls:\n\
  Type              Enter your message in the input field\n\
  Enter             Send the message\n\
  Up/Down/Mouse     Scroll through chat history\n\
  Ctrl+L            Switch between English and German\n\
  Ctrl+C            Quit the application")]
struct Args {
    #[arg(short, long, default_value = config::DEFAULT_MODEL, help = "Model to use for chat")]
    model: String,

    #[arg(short, long, default_value = "en", help = "Language profile (en or de)")]
    locale: String,

    #[arg(long, default_value_t = config::DEFAULT_MAX_TOKENS, help = "Token ceiling per reply")]
    max_tokens: u32,

    #[arg(long, default_value_t = config::DEFAULT_TEMPERATURE, help = "Sampling temperature")]
    temperature: f32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let Some(profile) = language::find_profile(&args.locale) else {
        eprintln!(
            "Unknown locale: {}. Available: {}",
            args.locale,
            language::PROFILES
                .iter()
                .map(|p| p.id)
                .collect::<Vec<_>>()
                .join(", ")
        );
        std::process::exit(1);
    };

    let config = RuntimeConfig::from_env(args.model, args.max_tokens, args.temperature);

    chat_loop::run(config, profile).await
}
