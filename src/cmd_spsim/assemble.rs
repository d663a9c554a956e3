use clap::*;
use spsim::libs::chunk;
use spsim::libs::context::RunContext;
use spsim::libs::matrix;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("assemble")
        .about("Merges chunk tables into the similarity matrix")
        .after_help(
            r###"
Every chunk of the work list must have published its table. Otherwise the
command fails and names the missing chunks; --force builds the matrix from
what exists instead.

Pairs without a result (failed, or in a missing chunk) are never filled
with 0. Their cells are written as NA and they are listed in
<outdir>/gaps.tsv.

Written into <outdir>:
* result.tsv - all chunk tables concatenated, one header
* gaps.tsv   - pairs without a result

The matrix is CSV with ids on both axes, symmetric, diagonal = 100.

Examples:
1. Matrix to a file:
   spsim assemble OUT -o matrix.csv

2. Partial matrix, rows ordered by mean similarity, pairs of at least 90:
   spsim assemble OUT --force --order mean --pairs close.tsv --min-sim 90
"###,
        )
        .arg(
            Arg::new("outdir")
                .required(true)
                .index(1)
                .help("Output root of the run"),
        )
        .arg(
            Arg::new("force")
                .long("force")
                .action(ArgAction::SetTrue)
                .help("Assemble even if chunk tables are missing"),
        )
        .arg(
            Arg::new("order")
                .long("order")
                .num_args(1)
                .value_parser(["name", "mean"])
                .default_value("name")
                .help("Order of rows and columns"),
        )
        .arg(
            Arg::new("pairs")
                .long("pairs")
                .num_args(1)
                .help("Also write upper-triangle pairs with similarity >= --min-sim"),
        )
        .arg(
            Arg::new("min_sim")
                .long("min-sim")
                .num_args(1)
                .value_parser(value_parser!(f64))
                .default_value("0")
                .help("Threshold of --pairs"),
        )
        .arg(
            Arg::new("outfile")
                .long("outfile")
                .short('o')
                .num_args(1)
                .default_value("stdout")
                .help("Output filename. [stdout] for screen"),
        )
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    //----------------------------
    // Args
    //----------------------------
    let outdir = args.get_one::<String>("outdir").unwrap();
    let force = args.get_flag("force");
    let ctx = RunContext::new(outdir, 1);

    let chunks_file = ctx.chunks_file();
    if !chunks_file.is_file() {
        anyhow::bail!("{} has no work list, run `spsim plan` first", outdir);
    }
    let chunks = chunk::read_chunks(&chunks_file.to_string_lossy())?;

    //----------------------------
    // Operating
    //----------------------------
    let assembly = matrix::assemble(&ctx, &chunks, force)?;
    if !assembly.missing_chunks.is_empty() {
        log::warn!(
            "Assembled without chunk(s) {:?} as requested by --force",
            assembly.missing_chunks
        );
    }
    if let Some(err) = assembly.gap_error() {
        log::warn!("{}, see {}", err, ctx.gaps_file().display());
    }

    //----------------------------
    // Output
    //----------------------------
    let mut buf: Vec<u8> = vec![];
    assembly.write_results(&mut buf)?;
    spsim::publish(ctx.result_file(), ctx.scratch_dir(), &buf)?;

    let mut buf: Vec<u8> = vec![];
    assembly.write_gaps(&mut buf)?;
    spsim::publish(ctx.gaps_file(), ctx.scratch_dir(), &buf)?;

    let matrix = match args.get_one::<String>("order").unwrap().as_str() {
        "mean" => assembly.matrix.ordered_by_mean(),
        _ => assembly.matrix.clone(),
    };

    let mut writer = spsim::writer(args.get_one::<String>("outfile").unwrap())?;
    matrix.write_csv(&mut writer)?;

    if let Some(pairs) = args.get_one::<String>("pairs") {
        let min_sim = *args.get_one::<f64>("min_sim").unwrap();
        let mut writer = spsim::writer(pairs)?;
        let count = matrix.write_pairs(&mut writer, min_sim)?;
        log::info!("{} pair(s) with similarity >= {}", count, min_sim);
    }

    Ok(())
}
