//! Kestrel CLI and REPL
//!
//! Usage:
//!   kestrel run <file.ks>     - Execute a Kestrel file
//!   kestrel check <file.ks>   - Report every syntax error in a file
//!   kestrel repl              - Start interactive REPL

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use kestrel::{Engine, EngineConfig, Value, VERSION};

#[derive(Parser)]
#[command(name = "kestrel", version, about = "An embeddable scripting language")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Engine settings in TOML
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a Kestrel file
    Run { file: PathBuf },
    /// Lex and parse a file, reporting every syntax error
    Check { file: PathBuf },
    /// Start the interactive REPL
    Repl,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => load_config(path),
        None => EngineConfig::default(),
    };

    match cli.command.unwrap_or(Command::Repl) {
        Command::Run { file } => run_file(&file, config),
        Command::Check { file } => check_file(&file),
        Command::Repl => run_repl(config),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn read_source(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("{}: cannot read file '{}': {}", "error".red(), path.display(), e);
            process::exit(1);
        }
    }
}

fn load_config(path: &Path) -> EngineConfig {
    match EngineConfig::from_toml_str(&read_source(path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "error".red(), e);
            process::exit(1);
        }
    }
}

fn run_file(path: &Path, config: EngineConfig) {
    let source = read_source(path);
    let engine = Engine::with_config(config);
    if let Err(e) = engine.execute(&source) {
        eprintln!("{}", e);
        process::exit(1);
    }
}

fn check_file(path: &Path) {
    let source = read_source(path);
    let errors = Engine::with_config(EngineConfig {
        stdlib: false,
        ..EngineConfig::default()
    })
    .check(&source);

    if errors.is_empty() {
        println!("{} {}", "ok".green().bold(), path.display());
        return;
    }
    for err in &errors {
        eprintln!("{}", err);
    }
    eprintln!(
        "{}: {} error(s) in {}",
        "error".red(),
        errors.len(),
        path.display()
    );
    process::exit(1);
}

fn run_repl(config: EngineConfig) {
    println!(
        "{} {} - {}",
        "Kestrel".cyan().bold(),
        VERSION.cyan(),
        "An embeddable scripting language".dimmed()
    );
    println!("Type {} to exit, {} for help\n", "exit".yellow(), "help".yellow());

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("{}: cannot start REPL: {}", "error".red(), e);
            process::exit(1);
        }
    };

    // Globals persist across lines
    let mut engine = Engine::with_config(config.clone());

    loop {
        match rl.readline(&format!("{} ", "ks>".green().bold())) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                match line {
                    "exit" | "quit" => {
                        println!("{}", "Goodbye!".cyan());
                        break;
                    }
                    "help" => {
                        print_repl_help();
                        continue;
                    }
                    "clear" => {
                        engine = Engine::with_config(config.clone());
                        println!("{}", "Globals cleared.".dimmed());
                        continue;
                    }
                    _ => {}
                }

                match engine.execute(line) {
                    Ok(Value::Null) => {}
                    Ok(value) => println!("{} {}", "=>".dimmed(), value.repr().cyan()),
                    Err(e) => eprintln!("{}", e.to_string().red()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("{}", "^C".dimmed());
            }
            Err(ReadlineError::Eof) => {
                println!("{}", "Goodbye!".cyan());
                break;
            }
            Err(err) => {
                eprintln!("{}: {:?}", "error".red(), err);
                break;
            }
        }
    }
}

fn print_repl_help() {
    println!("{}", "REPL Commands:".yellow());
    println!("  exit, quit   Exit the REPL");
    println!("  clear        Forget every global definition");
    println!("  help         Show this help\n");
    println!("{}", "Language Examples:".yellow());
    println!("  var x = 10");
    println!("  val limit = 3");
    println!("  fun double(n) {{ return n * 2 }}");
    println!("  print(f\"x is {{x}}\")");
}
