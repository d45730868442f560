use std::fs::File;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Parser};
use rand::SeedableRng;
use rand::rngs::StdRng;

use mppj_bench::domain::oracle::tables::{control_join_size, generate_tables, join_tables, tables_from_csv, write_join_csv, write_table_csv};
use mppj_bench::domain::utils::id::RoleId;

/// Generates synthetic per-source tables, or splits a CSV file into them, and prints either the
/// table of one source or the join of all tables.
#[derive(Parser, Debug)]
#[command(name = "gen-data")]
#[command(group(ArgGroup::new("input").required(true).args(["file", "generate"])))]
struct Args {
    /// Comma-separated source ids, one table per id
    #[arg(long = "source_ids")]
    source_ids: String,

    /// Input CSV file (`key,attr_1,..`), one attribute column per source
    #[arg(long)]
    file: Option<PathBuf>,

    /// Number of rows to generate per source
    #[arg(long)]
    generate: Option<usize>,

    /// Number of keys common to all tables
    #[arg(long = "joinsize")]
    join_size: Option<usize>,

    /// Seed of the random stream, random if absent
    #[arg(long)]
    seed: Option<u64>,

    /// Source whose table is printed; any other value prints the join
    #[arg(long)]
    id: String,
}

/// Accepts the single-dash long flags (`-source_ids`) the protocol binaries use.
fn go_style_flag(arg: String) -> String {
    if arg.len() > 2 && arg.starts_with('-') && !arg.starts_with("--") && !arg[1..].starts_with(|c: char| c.is_ascii_digit()) {
        format!("-{}", arg)
    } else {
        arg
    }
}

fn main() -> Result<()> {
    let args = Args::parse_from(std::env::args().map(go_style_flag));

    let source_ids: Vec<RoleId> = args.source_ids.split(',').map(str::trim).filter(|id| !id.is_empty()).map(RoleId::new).collect();
    if source_ids.is_empty() {
        bail!("-source_ids needs at least one id");
    }

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut tables = match (&args.file, args.generate) {
        (Some(path), _) => {
            let input = File::open(path).with_context(|| format!("cannot open '{}'", path.display()))?;
            tables_from_csv(input, source_ids.len())?
        }
        (None, Some(n_rows)) => generate_tables(&mut rng, &source_ids, n_rows),
        (None, None) => bail!("either -file or -generate is required"),
    };

    if let Some(join_size) = args.join_size {
        control_join_size(&mut rng, &mut tables, join_size)?;
    }

    let stdout = io::stdout().lock();
    match source_ids.iter().position(|source| source.as_str() == args.id) {
        Some(index) => write_table_csv(stdout, &tables[index])?,
        None => write_join_csv(stdout, &source_ids, &join_tables(&tables))?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_dash_flags_are_accepted() {
        let argv = ["gen-data", "-source_ids", "source_0,source_1", "-generate", "10", "-joinsize", "8", "-seed", "3", "-id", "source_1"];
        let args = Args::parse_from(argv.iter().map(|arg| go_style_flag(arg.to_string())));

        assert_eq!(args.source_ids, "source_0,source_1");
        assert_eq!(args.generate, Some(10));
        assert_eq!(args.join_size, Some(8));
        assert_eq!(args.seed, Some(3));
        assert_eq!(args.id, "source_1");
    }

    #[test]
    fn test_input_is_required_and_exclusive() {
        let missing = ["gen-data", "--source_ids", "a", "--id", "a"];
        assert!(Args::try_parse_from(missing).is_err());

        let both = ["gen-data", "--source_ids", "a", "--id", "a", "--file", "x.csv", "--generate", "3"];
        assert!(Args::try_parse_from(both).is_err());
    }
}
