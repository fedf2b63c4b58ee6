use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use makecmd::exec::Executor;
use makecmd::parser::{self, Args};
use makecmd::{ninja, Backend, CommandEvaluator, Evaluator, Flags, Graph};

fn find_makefile(flags: &Flags) -> Option<PathBuf> {
    if let Some(f) = &flags.makefile {
        return Some(f.clone());
    }
    ["GNUmakefile", "makefile", "Makefile"]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

async fn run(flags: Flags) -> Result<(), Box<dyn Error>> {
    if let Some(dir) = &flags.working_dir {
        std::env::set_current_dir(dir)?;
    }
    let makefile = find_makefile(&flags).ok_or("*** No targets specified and no makefile found.")?;

    let mut ev = Evaluator::new(&flags);
    parser::bootstrap(&mut ev, &flags)?;

    let mut g = Graph::new();
    g.parse_makefile(&mut ev, &makefile)?;
    g.debug_print();
    let ce = CommandEvaluator::new(&mut ev, &flags);

    let targets = if flags.targets.is_empty() {
        vec![g.default_target.clone().ok_or("*** No targets.  Stop.")?]
    } else {
        flags.targets.clone()
    };
    let nodes = g.make_dep(&targets)?;

    match flags.backend {
        Backend::Ninja => {
            let text = ninja::generate_ninja(&nodes, &mut ev, &ce)?;
            fs::write(&flags.ninja_file, text)?;
            tracing::info!("wrote {}", flags.ninja_file.display());
        }
        Backend::Exec => {
            Executor::new(&mut ev, &ce)?.exec(&nodes).await?;
        }
    }

    if !ev.errors().is_empty() {
        tracing::warn!("{} evaluation error(s) ignored", ev.errors().len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("makecmd=warn")))
        .init();

    let args: Args = Parser::parse();
    if let Err(e) = run(args.into_flags()).await {
        eprintln!("makecmd: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
