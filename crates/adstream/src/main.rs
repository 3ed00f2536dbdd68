use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use adstream_core::{AdHandler, FilterExpr, HandlerConfig, Scope, SearchQuery, Select};

#[derive(Parser)]
#[command(
    name = "adstream",
    version,
    about = "Stream Active Directory search results as JSON lines"
)]
struct Cli {
    /// LDAP URL, e.g. ldaps://dc01.example.com
    #[arg(long)]
    url: String,

    /// Bind user (a DN or user@domain name)
    #[arg(short = 'D', long)]
    user: String,

    /// Read the bind password from this file instead of prompting
    #[arg(long)]
    password_file: Option<PathBuf>,

    /// Domain base DN, e.g. DC=example,DC=com
    #[arg(short, long)]
    base_dn: String,

    /// Schema configuration DN, e.g. CN=Schema,CN=Configuration,DC=example,DC=com
    #[arg(long)]
    schema_dn: String,

    /// Filter as a tagged-sequence JSON expression, e.g. '["equals","cn","jdoe"]'
    #[arg(short, long, default_value = r#"["true"]"#)]
    filter: String,

    /// Attribute to return (repeatable); omit for every attribute
    #[arg(short = 'a', long = "attr")]
    attrs: Vec<String>,

    /// Search scope: base, one or sub
    #[arg(long, default_value = "sub", value_parser = parse_scope)]
    scope: Scope,

    /// Expand _transitive_member/_transitive_memberOf client-side
    #[arg(long)]
    transitive: bool,

    /// Expect exactly one result
    #[arg(long)]
    one: bool,
}

fn parse_scope(s: &str) -> Result<Scope, String> {
    match s {
        "base" => Ok(Scope::Base),
        "one" => Ok(Scope::OneLevel),
        "sub" => Ok(Scope::Subtree),
        other => Err(format!("unknown scope {other:?} (expected base, one or sub)")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let password = match &cli.password_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?
            .trim_end()
            .to_string(),
        None => rpassword::prompt_password("LDAP password: ").context("reading password")?,
    };

    let filter: FilterExpr = serde_json::from_str(&cli.filter).context("parsing --filter")?;

    let mut config = HandlerConfig::new(cli.url, cli.user, password, cli.base_dn, cli.schema_dn);
    config.transitive_search_default = cli.transitive;
    let handler = AdHandler::new(config)?;

    let mut query = SearchQuery::new(filter).scope(cli.scope);
    if !cli.attrs.is_empty() {
        query.select = Select::List(cli.attrs);
    }

    let mut stdout = std::io::stdout().lock();
    if cli.one {
        let object = handler.get_one_object(query).await?;
        serde_json::to_writer(&mut stdout, &object)?;
        stdout.write_all(b"\n")?;
        return Ok(());
    }

    let mut results = handler.get_objects(query).await?;
    let mut count = 0usize;
    while let Some(object) = results.next().await {
        serde_json::to_writer(&mut stdout, &object?)?;
        stdout.write_all(b"\n")?;
        count += 1;
    }
    info!(count, "done");
    Ok(())
}
