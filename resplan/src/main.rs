use std::fs;
use std::path::{Path, PathBuf};

/// The resplan executable
///
/// Computes the proposed new state for a declaratively managed resource from
/// three documents: the resource schema, the prior recorded state, and the
/// practitioner's configuration. The heavy lifting lives in the library
/// crates; this binary only does file IO and rendering.
use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};

use resplan_propose::propose_new_state;
use resplan_schema::Schema;
use resplan_value::{dynamic, Type, Value};

fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match &args.command {
        Commands::Propose {
            schema,
            prior,
            config,
            format,
            output,
        } => {
            let proposed = propose_from_files(schema, prior.as_deref(), config, *format)?;
            write_value(&proposed, *format, output.as_deref())?;
        }
        Commands::GenerateMan => {
            let cmd = Args::command();
            let man = clap_mangen::Man::new(cmd);
            let mut buffer: Vec<u8> = Default::default();
            man.render(&mut buffer)?;
            println!("{}", String::from_utf8(buffer)?);
        }
        Commands::GenerateMarkdown => {
            let opts = clap_markdown::MarkdownOptions::new().show_footer(false);
            let markdown: String = clap_markdown::help_markdown_custom::<Args>(&opts);
            println!("{}", markdown);
        }
    }

    Ok(())
}

fn propose_from_files(
    schema_path: &Path,
    prior_path: Option<&Path>,
    config_path: &Path,
    format: Format,
) -> Result<Value> {
    let schema = load_schema(schema_path)?;
    let object_type = schema.object_type();

    let prior = match prior_path {
        Some(path) => load_value(&object_type, path, format)?,
        // no prior state: the resource does not exist yet
        None => Value::null(object_type.clone()),
    };
    let config = load_value(&object_type, config_path, format)?;

    let (proposed, diagnostics) = propose_new_state(&schema, &prior, &config);
    for diagnostic in diagnostics.iter() {
        eprintln!("{}", diagnostic);
    }
    match proposed {
        Some(proposed) if !diagnostics.has_errors() => Ok(proposed),
        _ => bail!("the proposed state is unusable; see the diagnostics above"),
    }
}

fn load_schema(path: &Path) -> Result<Schema> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("could not read schema file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("could not parse schema file {}", path.display()))
}

fn load_value(ty: &Type, path: &Path, format: Format) -> Result<Value> {
    match format {
        Format::Json => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("could not read value file {}", path.display()))?;
            let json: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("could not parse value file {}", path.display()))?;
            dynamic::from_json(ty, &json)
                .with_context(|| format!("value in {} does not fit the schema", path.display()))
        }
        Format::Msgpack => {
            let bytes = fs::read(path)
                .with_context(|| format!("could not read value file {}", path.display()))?;
            dynamic::from_msgpack(ty, &bytes)
                .with_context(|| format!("value in {} does not fit the schema", path.display()))
        }
    }
}

fn write_value(value: &Value, format: Format, output: Option<&Path>) -> Result<()> {
    match format {
        Format::Json => {
            let json = dynamic::to_json(value).context(
                "the proposed state contains unknown values, which JSON cannot represent; \
                 use --format msgpack with --output",
            )?;
            let rendered = serde_json::to_string_pretty(&json)?;
            match output {
                Some(path) => fs::write(path, rendered + "\n")
                    .with_context(|| format!("could not write {}", path.display()))?,
                None => println!("{}", rendered),
            }
        }
        Format::Msgpack => {
            let bytes = dynamic::to_msgpack(value)?;
            match output {
                Some(path) => fs::write(path, bytes)
                    .with_context(|| format!("could not write {}", path.display()))?,
                None => bail!("refusing to write msgpack to stdout; use --output"),
            }
        }
    }
    Ok(())
}

/// Compute proposed resource states from schema, prior state, and config files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute the proposed new state for a resource
    Propose {
        /// Path to the resource schema, as a JSON document
        #[arg(long)]
        schema: PathBuf,

        /// Path to the prior state value; omit for a resource that has not
        /// been created yet
        #[arg(long)]
        prior: Option<PathBuf>,

        /// Path to the configuration value
        #[arg(long)]
        config: PathBuf,

        /// Encoding of the prior, config, and output values
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,

        /// Write the proposed state to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Generate markdown documentation for resplan
    #[command(hide = true)]
    GenerateMarkdown,

    /// Generate a manpage for resplan
    #[command(hide = true)]
    GenerateMan,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    /// Human-readable; cannot carry unknown values
    Json,
    /// The provider wire encoding; unknown values round-trip
    Msgpack,
}
