//! The CellAtom command line driver.
//!
//! Reads a program (from a file or standard input), seeds a square grid with
//! random cells, runs either the interpreter or the Cranelift JIT for a
//! number of steps, and prints the final grid to standard output.

use anyhow::{bail, Context, Result};
use cellatom::{parse, run_one_step};
use cellatom_cranelift::compile;
use clap::Parser;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Read;
use std::path::PathBuf;
use std::time::Instant;

/// Run a CellAtom program over a randomly seeded grid.
#[derive(Parser)]
#[command(name = "cellatom", version, about)]
struct Args {
    /// The program file; standard input when absent or `-`.
    file: Option<PathBuf>,

    /// Compile with the Cranelift JIT instead of interpreting.
    #[arg(short, long)]
    jit: bool,

    /// JIT optimisation level.
    #[arg(
        short = 'O',
        long,
        default_value_t = 0,
        value_parser = clap::value_parser!(u8).range(0..=3)
    )]
    opt_level: u8,

    /// Number of steps to run.
    #[arg(short, long, default_value_t = 1)]
    iterations: u32,

    /// Edge length of the square grid.
    #[arg(short = 'x', long, default_value_t = 5)]
    grid_size: i16,

    /// Cells start with uniform random values in `0..=MAX_VALUE`.
    #[arg(short, long, default_value_t = 1)]
    max_value: i16,

    /// Seed for the grid's random number generator.
    #[arg(short, long, default_value_t = 0)]
    seed: u64,

    /// Report phase timings on stderr.
    #[arg(short, long)]
    timing: bool,

    /// Pretty-print the parsed program on stderr.
    #[arg(long)]
    dump_ast: bool,
}

struct Timing {
    enabled: bool,
}

impl Timing {
    fn report(&self, what: &str, start: Instant) {
        if self.enabled {
            eprintln!("{what} took {:?}.", start.elapsed());
        }
    }
}

fn read_source(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        _ => {
            let mut source = String::new();
            std::io::stdin()
                .read_to_string(&mut source)
                .context("failed to read standard input")?;
            Ok(source)
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    if args.grid_size <= 0 {
        bail!("grid size must be positive");
    }
    if args.max_value < 0 {
        bail!("maximum cell value must not be negative");
    }
    let timing = Timing {
        enabled: args.timing,
    };

    let source = read_source(args.file.as_ref())?;
    let start = Instant::now();
    let program = parse(&source).context("failed to parse program")?;
    timing.report("parsing", start);
    debug!("parsed {} top-level statements", program.statements().len());
    if args.dump_ast {
        eprint!("{program}");
    }

    let size = args.grid_size;
    let cells = size as usize * size as usize;
    let start = Instant::now();
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut grid: Vec<i16> = (0..cells).map(|_| rng.gen_range(0..=args.max_value)).collect();
    let mut next = vec![0i16; cells];
    timing.report("generating the grid", start);

    if args.jit {
        let start = Instant::now();
        let automaton = compile(&program, args.opt_level).context("failed to compile program")?;
        timing.report("compiling", start);
        let start = Instant::now();
        for _ in 0..args.iterations {
            automaton.run(&grid, &mut next, size, size);
            std::mem::swap(&mut grid, &mut next);
        }
        timing.report("running the compiled automaton", start);
    } else {
        let start = Instant::now();
        for _ in 0..args.iterations {
            run_one_step(&grid, &mut next, size, size, &program);
            std::mem::swap(&mut grid, &mut next);
        }
        timing.report("interpreting", start);
    }

    for row in grid.chunks(size as usize) {
        let line: Vec<String> = row.iter().map(|cell| cell.to_string()).collect();
        println!("{}", line.join(" "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_args() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
