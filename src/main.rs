//! CLI entry point for `mimeshell`.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

use mimeshell::config::Config;
use mimeshell::model::part::MimePart;
use mimeshell::parser::middleware::SkipContentTypes;
use mimeshell::{BodyType, FilenameStrategy, MailParser};

#[derive(Parser)]
#[command(name = "mimeshell", version, about = "Inspect and unpack MIME email messages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Print all top-level headers
    Headers {
        /// Message file, or `-` for stdin
        file: PathBuf,
        /// Print the header block exactly as it appears in the message
        #[arg(long)]
        raw: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print one header
    Header {
        file: PathBuf,
        name: String,
        /// Print undecoded values
        #[arg(long)]
        raw: bool,
    },
    /// Print the message body
    Body {
        file: PathBuf,
        #[arg(short, long, value_enum, default_value_t = BodyFormat::Text)]
        format: BodyFormat,
    },
    /// Print a parsed address header (From, To, Cc, ...)
    Addresses {
        file: PathBuf,
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// List attachments
    Attachments {
        file: PathBuf,
        /// Leave out inline resources
        #[arg(long)]
        no_inline: bool,
        #[arg(long)]
        json: bool,
    },
    /// Save attachments to a directory
    Save {
        file: PathBuf,
        /// Output directory (defaults to the configured one, then `.`)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// DuplicateThrow, DuplicateSuffix or RandomFilename
        #[arg(long)]
        strategy: Option<FilenameStrategy>,
        /// Leave out inline resources
        #[arg(long)]
        no_inline: bool,
        /// Drop PGP and S/MIME signature parts
        #[arg(long)]
        skip_signatures: bool,
    },
    /// Print the MIME part tree
    Tree { file: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum BodyFormat {
    Text,
    Html,
    HtmlEmbedded,
}

impl From<BodyFormat> for BodyType {
    fn from(format: BodyFormat) -> Self {
        match format {
            BodyFormat::Text => BodyType::Text,
            BodyFormat::Html => BodyType::Html,
            BodyFormat::HtmlEmbedded => BodyType::HtmlEmbedded,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = mimeshell::config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Headers { file, raw, json } => cmd_headers(&file, raw, json, &config),
        Commands::Header { file, name, raw } => cmd_header(&file, &name, raw, &config),
        Commands::Body { file, format } => cmd_body(&file, format.into(), &config),
        Commands::Addresses { file, name, json } => cmd_addresses(&file, &name, json, &config),
        Commands::Attachments {
            file,
            no_inline,
            json,
        } => cmd_attachments(&file, !no_inline, json, &config),
        Commands::Save {
            file,
            output,
            strategy,
            no_inline,
            skip_signatures,
        } => {
            let output = output
                .or_else(|| config.attachments.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from("."));
            let strategy = strategy.unwrap_or(config.attachments.strategy);
            let include_inline = config.attachments.include_inline && !no_inline;
            cmd_save(
                &file,
                &output,
                strategy,
                include_inline,
                skip_signatures,
                &config,
            )
        }
        Commands::Tree { file } => cmd_tree(&file, &config),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_path = mimeshell::config::log_file_path(config);
    let log_dir = log_path.parent().unwrap_or(Path::new("."));
    let log_name = log_path.file_name().unwrap_or_default();
    if std::fs::create_dir_all(log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(log_dir, log_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Parse a message file, or stdin when `path` is `-`.
fn open_message(path: &Path, config: &Config) -> anyhow::Result<MailParser> {
    let mut parser = MailParser::with_config(config.parser.clone());
    if path == Path::new("-") {
        parser.set_stream(std::io::stdin())?;
    } else {
        parser.set_path(path)?;
    }
    Ok(parser)
}

fn cmd_headers(path: &Path, raw: bool, json: bool, config: &Config) -> anyhow::Result<()> {
    let parser = open_message(path, config)?;

    if raw {
        use std::io::Write;
        std::io::stdout().write_all(parser.get_headers_raw_bytes()?)?;
        return Ok(());
    }

    let headers = parser.get_headers()?;
    if json {
        let map: serde_json::Map<String, serde_json::Value> = headers
            .iter()
            .map(|(name, value)| Ok((name.clone(), serde_json::to_value(value)?)))
            .collect::<serde_json::Result<_>>()?;
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        for (name, value) in &headers {
            for v in value.values() {
                println!("{name}: {v}");
            }
        }
    }
    Ok(())
}

fn cmd_header(path: &Path, name: &str, raw: bool, config: &Config) -> anyhow::Result<()> {
    let parser = open_message(path, config)?;

    let values = if raw {
        parser.get_raw_header(name)?
    } else {
        parser
            .get_header(name)?
            .map(|v| v.values().into_iter().map(String::from).collect())
    };

    match values {
        Some(values) => {
            for v in values {
                println!("{v}");
            }
            Ok(())
        }
        None => anyhow::bail!("Header not found: {name}"),
    }
}

fn cmd_body(path: &Path, kind: BodyType, config: &Config) -> anyhow::Result<()> {
    let parser = open_message(path, config)?;
    print!("{}", parser.get_message_body(kind)?);
    Ok(())
}

fn cmd_addresses(path: &Path, name: &str, json: bool, config: &Config) -> anyhow::Result<()> {
    let parser = open_message(path, config)?;
    let addresses = parser.get_addresses(name)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&addresses)?);
        return Ok(());
    }

    for address in &addresses {
        if address.is_group {
            println!("{}:", address.display_name);
            for member in address.mailboxes() {
                println!("  {member}");
            }
        } else {
            println!("{address}");
        }
    }
    Ok(())
}

fn cmd_attachments(
    path: &Path,
    include_inline: bool,
    json: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let parser = open_message(path, config)?;
    let attachments = parser.get_attachments(include_inline)?;

    if json {
        let metas: Vec<_> = attachments.iter().map(|a| a.meta()).collect();
        println!("{}", serde_json::to_string_pretty(&metas)?);
        return Ok(());
    }

    if attachments.is_empty() {
        println!("  No attachments.");
        return Ok(());
    }

    println!(
        "  {:<6} {:<40} {:<28} {:>10}  INLINE",
        "PART", "FILENAME", "TYPE", "SIZE"
    );
    for att in &attachments {
        println!(
            "  {:<6} {:<40} {:<28} {:>10}  {}",
            att.part_id().to_string(),
            truncate(att.filename(), 40),
            truncate(&att.content_type(), 28),
            humansize::format_size(att.size(), humansize::DECIMAL),
            if att.is_inline() { "yes" } else { "" }
        );
    }
    Ok(())
}

fn cmd_save(
    path: &Path,
    output: &Path,
    strategy: FilenameStrategy,
    include_inline: bool,
    skip_signatures: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let mut parser = open_message(path, config)?;
    if skip_signatures {
        parser.add_middleware(SkipContentTypes::signatures());
    }

    let saved = parser.save_attachments(output, include_inline, strategy)?;
    for s in &saved {
        println!("  {} -> {}", s.filename, s.path.display());
    }
    println!("  Saved {} attachment(s) to {}", saved.len(), output.display());
    Ok(())
}

fn cmd_tree(path: &Path, config: &Config) -> anyhow::Result<()> {
    let parser = open_message(path, config)?;
    let data = parser.get_data()?;
    print_part(parser.get_parts()?, data, 0);
    Ok(())
}

fn print_part(part: &MimePart, data: &[u8], depth: usize) {
    let mut line = format!(
        "{:indent$}{} {} [{:?}]",
        "",
        part.id,
        part.content_type,
        part.role,
        indent = depth * 2
    );
    if !part.is_multipart() {
        line.push_str(&format!(
            " {}",
            humansize::format_size(part.decoded_body(data).len(), humansize::DECIMAL)
        ));
    }
    if let Some(name) = part.filename() {
        line.push_str(&format!(" \"{name}\""));
    }
    if let Some(cid) = &part.content_id {
        line.push_str(&format!(" <{cid}>"));
    }
    println!("{line}");
    for child in &part.children {
        print_part(child, data, depth + 1);
    }
}

/// Truncate to `max` characters, marking the cut with `…`.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
