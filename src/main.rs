use clap::{Args, Parser, Subcommand};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use loxide::config::RuntimeConfig;
use loxide::error::InterpretError;
use loxide::vm::VM;

// sysexits codes
const EXIT_COMPILE_ERROR: u8 = 65;
const EXIT_RUNTIME_ERROR: u8 = 70;
const EXIT_IO_ERROR: u8 = 74;

#[derive(Parser)]
#[command(name = "loxide")]
#[command(about = "A bytecode virtual machine for Lox", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Lox source file
    Run {
        /// The source file to run
        file: PathBuf,

        #[command(flatten)]
        options: RuntimeOptions,
    },
    /// Start an interactive session
    Repl {
        #[command(flatten)]
        options: RuntimeOptions,
    },
    /// Print the bytecode of every function in a source file
    Disasm {
        /// The source file to disassemble
        file: PathBuf,
    },
}

#[derive(Args)]
struct RuntimeOptions {
    /// Print the stack and each instruction as it executes
    #[arg(long)]
    trace: bool,

    /// Print the bytecode of each function after compiling it
    #[arg(long)]
    print_code: bool,

    /// Log allocations and collections to stderr
    #[arg(long)]
    log_gc: bool,

    /// Run a collection before every allocation
    #[arg(long)]
    stress_gc: bool,

    /// Print GC statistics on exit
    #[arg(long)]
    gc_stats: bool,

    /// Load runtime settings from a TOML file; flags override it
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl RuntimeOptions {
    fn to_config(&self) -> Result<RuntimeConfig, String> {
        let mut config = match &self.config {
            Some(path) => RuntimeConfig::load(path).map_err(|e| e.to_string())?,
            None => RuntimeConfig::default(),
        };
        config.trace_execution |= self.trace;
        config.print_code |= self.print_code;
        config.log_gc |= self.log_gc;
        config.stress_gc |= self.stress_gc;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file, options } => {
            let config = match options.to_config() {
                Ok(config) => config,
                Err(e) => return fail(EXIT_IO_ERROR, &e),
            };
            run_file(&file, config, options.gc_stats)
        }
        Commands::Repl { options } => {
            let config = match options.to_config() {
                Ok(config) => config,
                Err(e) => return fail(EXIT_IO_ERROR, &e),
            };
            repl(config, options.gc_stats)
        }
        Commands::Disasm { file } => {
            let source = match read_source(&file) {
                Ok(source) => source,
                Err(e) => return fail(EXIT_IO_ERROR, &e),
            };
            let mut vm = VM::new();
            match vm.disassemble(&source) {
                Ok(listing) => {
                    print!("{}", listing);
                    ExitCode::SUCCESS
                }
                Err(e) => fail(EXIT_COMPILE_ERROR, &e.to_string()),
            }
        }
    }
}

fn fail(code: u8, message: &str) -> ExitCode {
    eprintln!("{}", message);
    ExitCode::from(code)
}

fn read_source(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("Could not read file \"{}\": {}", path.display(), e))
}

fn run_file(path: &Path, config: RuntimeConfig, gc_stats: bool) -> ExitCode {
    let source = match read_source(path) {
        Ok(source) => source,
        Err(e) => return fail(EXIT_IO_ERROR, &e),
    };

    let mut vm = VM::with_config(config);
    let result = vm.interpret(&source);
    if gc_stats {
        print_gc_stats(&vm);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ InterpretError::Compile(_)) => fail(EXIT_COMPILE_ERROR, &e.to_string()),
        Err(e @ InterpretError::Runtime(_)) => fail(EXIT_RUNTIME_ERROR, &e.to_string()),
    }
}

fn repl(config: RuntimeConfig, gc_stats: bool) -> ExitCode {
    let mut vm = VM::with_config(config);
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            return ExitCode::from(EXIT_IO_ERROR);
        }

        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {}
            Err(e) => return fail(EXIT_IO_ERROR, &e.to_string()),
        }

        // Errors are reported and the session continues with its globals intact.
        if let Err(e) = vm.interpret(&line) {
            eprintln!("{}", e);
        }
    }

    if gc_stats {
        print_gc_stats(&vm);
    }
    ExitCode::SUCCESS
}

fn print_gc_stats(vm: &VM) {
    let stats = vm.gc_stats();
    eprintln!("[GC] collections: {}", stats.collections);
    eprintln!("[GC] objects freed: {}", stats.objects_freed);
    eprintln!("[GC] bytes freed: {}", stats.bytes_freed);
    eprintln!("[GC] live objects: {}", vm.heap().object_count());
    eprintln!("[GC] bytes allocated: {}", vm.heap().bytes_allocated());
}
