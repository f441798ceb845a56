use clap::Parser;
use dirs::home_dir;
use log::{debug, info};
use myco::{
    cli::Args,
    error::Result,
    loop_manager::LoopLimits,
    parser::parse,
    repl::{REPLPrompt, REPLValidator, SyntaxHighlighter},
    runtime::{Runtime, RuntimeConfig},
    tokenizer::tokenize,
};
use nu_ansi_term::{Color, Style};
use reedline::{DefaultHinter, FileBackedHistory, Reedline, Signal};
use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

fn config_from(args: &Args, base_dir: PathBuf) -> RuntimeConfig {
    RuntimeConfig {
        base_dir,
        max_call_depth: args.max_call_depth,
        loop_limits: LoopLimits {
            max_iterations: args.max_iterations,
            ..LoopLimits::default()
        },
        color: !args.no_color,
    }
}

fn source_dir(file: &Path) -> PathBuf {
    match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn run_file(file: &Path, args: &Args) -> Result<()> {
    let source = fs::read(file)?;

    let tokens = tokenize(&source)?;
    let program = parse(&tokens)?;

    let mut runtime = Runtime::new(config_from(args, source_dir(file)));
    let result = runtime.run(&program);

    if args.stats {
        eprintln!("{}", runtime.statistics());
    }
    result
}

fn check_file(file: &Path) -> Result<()> {
    let source = fs::read(file)?;

    let tokens = tokenize(&source)?;
    let program = parse(&tokens)?;
    println!("{:#?}", program);

    Ok(())
}

fn run_repl(args: &Args) -> Result<()> {
    let mut line_editor = Reedline::create()
        .with_hinter(Box::new(
            DefaultHinter::default().with_style(Style::new().italic().fg(Color::LightGray)),
        ))
        .with_highlighter(Box::new(SyntaxHighlighter))
        .with_validator(Box::new(REPLValidator));

    // Add file-backed history if possible
    if let Some(history) = home_dir()
        .map(|home| home.join(".myco_history"))
        .and_then(|path| FileBackedHistory::with_file(100, path).ok())
        .map(Box::new)
    {
        line_editor = line_editor.with_history(history);
    } else {
        eprintln!("NOTE: Failed to load history. Persistence is now disabled.")
    }

    let prompt = REPLPrompt;
    let mut runtime = Runtime::new(config_from(args, PathBuf::from(".")));

    loop {
        match line_editor.read_line(&prompt)? {
            Signal::Success(buffer) => {
                runtime
                    .run_source(buffer.as_bytes())
                    .inspect_err(|err| {
                        eprintln!("{}", err);
                    })
                    .ok();
            }
            Signal::CtrlD | Signal::CtrlC => {
                if args.stats {
                    eprintln!("{}", runtime.statistics());
                }
                break Ok(());
            }
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let result = match &args.file {
        Some(file) if args.build => {
            info!("BUILD MODE");
            debug!("file: {:?}, output: {:?}", file, args.output);
            eprintln!("myco: code generation is not available in this build");
            return ExitCode::FAILURE;
        }
        Some(file) if args.check => {
            info!("CHECK MODE");
            debug!("file: {:?}", file);
            check_file(file)
        }
        Some(file) => {
            info!("FILE MODE");
            debug!("file: {:?}", file);
            run_file(file, &args)
        }
        None => {
            info!("REPL MODE");
            run_repl(&args)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
