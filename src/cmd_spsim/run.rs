use clap::*;
use spsim::libs::aligner::{Aligner, DiamondAligner, PrecomputedAligner};
use spsim::libs::chunk::{self, Chunk};
use spsim::libs::context::RunContext;
use spsim::libs::distributor::{self, Distributor};
use spsim::libs::hit::HitFilter;
use spsim::libs::registry;
use std::path::PathBuf;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("run")
        .about("Aligns and reduces the pairs of one or all chunks")
        .after_help(
            r###"
Every pair is aligned in both directions, keeping the best hit of each query
sequence. The mean identity of each direction is computed (0 without hits)
and the pair's similarity is the mean of the two directions.

* Pairs whose row is already committed under <outdir>/rows are skipped, so
  running a chunk again only does the missing work
* A pair is claimed with a .lock file while it runs; a pair claimed by
  another run is left alone and its chunk table is not published
* A failing pair is written to chunks/<id>.failed.tsv and does not stop
  the others; it is retried on the next run
* --clear-locks removes claims left behind by a run that was killed

Backends:
* diamond      `diamond blastp -f 6 -k 1` against the indexes from `plan`
* precomputed  reads <query>_vs_<target>.tsv(.gz) from --hits-dir

Examples:
1. Chunk 3 on 8 workers (e.g. as one cluster job):
   spsim run OUT --chunk 3 -p 8

2. All chunks from existing DIAMOND tables:
   spsim run OUT --aligner precomputed --hits-dir hits/
"###,
        )
        .arg(
            Arg::new("outdir")
                .required(true)
                .index(1)
                .help("Output root written by `spsim plan`"),
        )
        .arg(
            Arg::new("chunk")
                .long("chunk")
                .num_args(1)
                .action(ArgAction::Append)
                .value_parser(value_parser!(usize))
                .help("Chunk id to run; may be repeated. Default: all chunks"),
        )
        .arg(
            Arg::new("parallel")
                .long("parallel")
                .short('p')
                .value_parser(value_parser!(usize))
                .default_value("4")
                .help("Number of pairs processed at once"),
        )
        .arg(
            Arg::new("aligner")
                .long("aligner")
                .num_args(1)
                .value_parser(["diamond", "precomputed"])
                .default_value("diamond")
                .help("Search backend"),
        )
        .arg(
            Arg::new("hits_dir")
                .long("hits-dir")
                .num_args(1)
                .help("Directory of precomputed hit tables"),
        )
        .arg(
            Arg::new("diamond")
                .long("diamond")
                .num_args(1)
                .default_value("diamond")
                .help("Path to the diamond binary"),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .num_args(1)
                .value_parser(value_parser!(usize))
                .help("Threads of each diamond call"),
        )
        .arg(
            Arg::new("evalue")
                .long("evalue")
                .num_args(1)
                .value_parser(value_parser!(f64))
                .help("E-value cutoff passed to diamond"),
        )
        .arg(
            Arg::new("diamond_args")
                .long("diamond-args")
                .num_args(1)
                .allow_hyphen_values(true)
                .help("Additional arguments passed directly to diamond blastp"),
        )
        .arg(
            Arg::new("max_evalue")
                .long("max-evalue")
                .num_args(1)
                .value_parser(value_parser!(f64))
                .help("Drop hits with a larger e-value before picking best hits"),
        )
        .arg(
            Arg::new("min_length")
                .long("min-length")
                .num_args(1)
                .value_parser(value_parser!(u32))
                .help("Drop hits with a shorter alignment before picking best hits"),
        )
        .arg(
            Arg::new("clear_locks")
                .long("clear-locks")
                .action(ArgAction::SetTrue)
                .help("Remove stale claims of the selected chunks first"),
        )
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    //----------------------------
    // Args
    //----------------------------
    let outdir = args.get_one::<String>("outdir").unwrap();
    let parallel = *args.get_one::<usize>("parallel").unwrap();
    let ctx = RunContext::new(outdir, parallel);

    let filter = HitFilter {
        max_evalue: args.get_one::<f64>("max_evalue").copied(),
        min_length: args.get_one::<u32>("min_length").copied(),
    };

    let aligner: Box<dyn Aligner> = match args.get_one::<String>("aligner").unwrap().as_str() {
        "diamond" => {
            let bin = args.get_one::<String>("diamond").unwrap();
            if which::which(bin).is_err() {
                anyhow::bail!("{} not found. Please install diamond first.", bin);
            }
            let mut diamond = DiamondAligner::new(bin, ctx.scratch_dir());
            diamond.threads = args.get_one::<usize>("threads").copied();
            diamond.evalue = args.get_one::<f64>("evalue").copied();
            if let Some(extra) = args.get_one::<String>("diamond_args") {
                diamond.extra = extra.split_whitespace().map(|e| e.to_string()).collect();
            }
            diamond.filter = filter;
            Box::new(diamond)
        }
        _ => {
            let dir = match args.get_one::<String>("hits_dir") {
                Some(dir) => PathBuf::from(dir),
                None => anyhow::bail!("--aligner precomputed requires --hits-dir"),
            };
            let mut precomputed = PrecomputedAligner::new(dir);
            precomputed.filter = filter;
            Box::new(precomputed)
        }
    };

    //----------------------------
    // Load the plan
    //----------------------------
    let items_file = ctx.items_file();
    let chunks_file = ctx.chunks_file();
    if !items_file.is_file() || !chunks_file.is_file() {
        anyhow::bail!("{} has no work list, run `spsim plan` first", outdir);
    }
    let items = registry::read_items(&items_file.to_string_lossy())?;
    let chunks = chunk::read_chunks(&chunks_file.to_string_lossy())?;

    let selected: Vec<Chunk> = match args.get_many::<usize>("chunk") {
        Some(ids) => {
            let mut selected = vec![];
            for id in ids {
                match chunks.iter().find(|e| e.id == *id) {
                    Some(c) => selected.push(c.clone()),
                    None => anyhow::bail!("chunk {} is not in the work list", id),
                }
            }
            selected
        }
        None => chunks,
    };

    if args.get_flag("clear_locks") {
        for c in &selected {
            let removed = distributor::clear_locks(&ctx, c)?;
            if removed > 0 {
                log::warn!("Chunk {}: removed {} stale claim(s)", c.id, removed);
            }
        }
    }

    //----------------------------
    // Operating
    //----------------------------
    let reports = Distributor::new(&ctx, &items, aligner.as_ref()).run(&selected)?;

    let failed: usize = reports.iter().map(|e| e.failed()).sum();
    let unpublished = reports.iter().filter(|e| !e.published).count();
    log::info!(
        "{} chunk(s) processed, {} pair(s) failed, {} chunk table(s) not published",
        reports.len(),
        failed,
        unpublished
    );

    Ok(())
}
