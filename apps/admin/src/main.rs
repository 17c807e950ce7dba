use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use shared::{
    domain::EntityKind,
    entities::{
        Alumnus, Ambassador, Applicant, CarouselSlide, Mentor, SuccessStory, TeamMember,
    },
};
use tracing_subscriber::EnvFilter;
use url::Url;

mod commands;

#[derive(Parser, Debug)]
#[command(about = "Administer the site's content collections over the HTTP API")]
struct Cli {
    /// API root, e.g. http://127.0.0.1:8080/api
    #[arg(
        long,
        env = "ADMIN__BACKEND_URL",
        default_value = "http://127.0.0.1:8080/api",
        value_parser = parse_backend_url
    )]
    backend_url: Url,
    /// Collection path segment: mentors, alumni, ambassadors, carousels,
    /// team-members, success-stories or applicants.
    collection: EntityKind,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the collection and print the entries that match.
    List {
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        location: Option<String>,
        /// Server-side status filter (applicants).
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        active_only: bool,
    },
    /// Print one record as JSON.
    Show { slug: String },
    /// Create a record from `field=value` pairs.
    Create {
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, Value)>,
    },
    /// Change fields of an existing record.
    Edit {
        slug: String,
        #[arg(long = "field", value_parser = parse_field, required = true)]
        fields: Vec<(String, Value)>,
    },
    /// Flip a record between active and inactive.
    Toggle {
        slug: String,
        #[arg(long)]
        yes: bool,
    },
    Delete {
        slug: String,
        #[arg(long)]
        yes: bool,
    },
    /// Move a record one position and save the collection order.
    Move { slug: String, direction: Step },
    /// Set an applicant's review status.
    Status { slug: String, status: String },
    /// Attach an already uploaded image to a record.
    SetImage { slug: String, url: String },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Step {
    Up,
    Down,
}

fn parse_backend_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|err| format!("invalid url '{raw}': {err}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported scheme '{other}', expected http or https")),
    }
}

/// `name=value`; the value is taken as JSON when it parses, else as a string.
fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing field name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
    let cli = Cli::parse();

    match cli.collection {
        EntityKind::Mentor => commands::run::<Mentor>(cli.backend_url, cli.command).await,
        EntityKind::Alumnus => commands::run::<Alumnus>(cli.backend_url, cli.command).await,
        EntityKind::Ambassador => commands::run::<Ambassador>(cli.backend_url, cli.command).await,
        EntityKind::CarouselSlide => {
            commands::run::<CarouselSlide>(cli.backend_url, cli.command).await
        }
        EntityKind::TeamMember => commands::run::<TeamMember>(cli.backend_url, cli.command).await,
        EntityKind::SuccessStory => {
            commands::run::<SuccessStory>(cli.backend_url, cli.command).await
        }
        EntityKind::Applicant => commands::run::<Applicant>(cli.backend_url, cli.command).await,
    }
}
