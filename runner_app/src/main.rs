//! Command-line front-end for the vkscript test runner

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use vkscript::{Config, Executor, Source, TestResult};

/// Run Vulkan test scripts and report pass/fail/skip
#[derive(Parser)]
#[command(name = "vkscript-runner", version)]
struct Args {
    /// Write a PPM image of the final framebuffer
    #[arg(short = 'i', value_name = "IMG.ppm")]
    image: Option<PathBuf>,

    /// Log the disassembly of every generated SPIR-V module
    #[arg(short = 'd')]
    disassembly: bool,

    /// Replace TOK with REPL in every script
    #[arg(short = 'D', value_name = "TOK=REPL")]
    token_replacements: Vec<String>,

    /// Test scripts to run
    #[arg(required = true, value_name = "SCRIPT")]
    scripts: Vec<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut replacements = Vec::new();
    for definition in &args.token_replacements {
        match definition.split_once('=') {
            Some((token, replacement)) => {
                replacements.push((token.to_owned(), replacement.to_owned()));
            }
            None => {
                eprintln!("invalid token replacement \"{definition}\", expected TOK=REPL");
                return ExitCode::from(2);
            }
        }
    }

    let mut config = Config::new();
    config.set_show_disassembly(args.disassembly);
    config.set_image_filename(args.image.clone());

    let mut executor = Executor::new(config);
    let mut overall = TestResult::Skip;
    for script in &args.scripts {
        let mut source = Source::from_file(script);
        for (token, replacement) in &replacements {
            source.add_token_replacement(token, replacement);
        }
        let result = executor.execute(&source);
        log::info!("{}: {}", script.display(), result.name());
        overall = overall.merge(result);
    }

    println!("PIGLIT: {{\"result\": \"{}\" }}", overall.name());
    if overall == TestResult::Fail {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
