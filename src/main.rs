use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ejs::{Engine, Options};

/// EJS - renders embedded templates
#[derive(Parser)]
#[command(name = "ejs")]
#[command(about = "Render an EJS template file")]
struct Cli {
    /// Path to the template file
    template: PathBuf,

    /// JSON file holding the locals record
    #[arg(short = 'l', long, conflicts_with = "json")]
    locals: Option<PathBuf>,

    /// Inline JSON locals record
    #[arg(short = 'j', long)]
    json: Option<String>,

    /// Tag delimiter character
    #[arg(short = 'd', long, default_value_t = '%')]
    delimiter: char,

    /// Skip line tracking (errors carry no template context)
    #[arg(long)]
    no_compile_debug: bool,

    /// Log the generated program
    #[arg(long)]
    debug: bool,

    /// Print the self-contained client function instead of rendering
    #[arg(long)]
    client: bool,

    /// Output file (if not specified, prints to console)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
}

fn init_tracing(debug: bool) {
    let default = if debug { "ejs=info" } else { "ejs=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_locals(cli: &Cli) -> Result<serde_json::Value, String> {
    let text = match (&cli.locals, &cli.json) {
        (Some(path), _) => fs::read_to_string(path)
            .map_err(|e| format!("Error reading '{}': {}", path.display(), e))?,
        (None, Some(inline)) => inline.clone(),
        (None, None) => return Ok(serde_json::json!({})),
    };
    serde_json::from_str(&text).map_err(|e| format!("Invalid locals JSON: {}", e))
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let locals = match read_locals(&cli) {
        Ok(locals) => locals,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let options = Options::new()
        .filename(&cli.template)
        .delimiter(cli.delimiter)
        .compile_debug(!cli.no_compile_debug)
        .debug(cli.debug)
        .client(cli.client);

    let engine = Engine::new();
    let result = if cli.client {
        fs::read_to_string(&cli.template)
            .map_err(|e| format!("Error reading '{}': {}", cli.template.display(), e))
            .and_then(|source| {
                engine
                    .compile(ejs::loader::strip_bom(&source), &options)
                    .map_err(|e| format!("Compile error: {}", e))
            })
            .map(|compiled| {
                compiled
                    .as_client()
                    .map(|f| f.source())
                    .unwrap_or_default()
            })
    } else {
        engine
            .render_file(&cli.template, &locals, &options)
            .map_err(|e| format!("Render error: {}", e))
    };

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    // Write output
    match cli.output {
        Some(path) => {
            if let Err(e) = fs::write(&path, &output) {
                eprintln!("Error writing '{}': {}", path.display(), e);
                process::exit(1);
            }
            tracing::info!(path = %path.display(), "output written");
        }
        None => {
            print!("{}", output);
        }
    }
}
