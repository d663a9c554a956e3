use clap::*;
use spsim::libs::chunk;
use spsim::libs::context::RunContext;
use spsim::libs::pair;
use spsim::libs::registry::{self, DiamondIndexer, Indexer, PlainIndexer};
use std::io::Write;
use std::path::PathBuf;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("plan")
        .about("Builds indexes, generates pairs and writes the chunked work list")
        .after_help(
            r###"
Loads the sequence sets, builds one searchable index per set, generates every
unordered pair once and cuts the pair list into chunks. Chunk membership only
depends on the set of ids and the chunk size, so planning twice gives the
same work list.

Written into <outdir>:
* items.tsv  - id, path, record count and index of each set
* chunks.tsv - chunk id and the two ids of each pair, in generation order

Changing the work list of an existing <outdir> drops the old chunk tables;
rows of pairs already computed are kept and will be reused.

Indexes:
* --aligner diamond      `diamond makedb` into --db-dir, skipped when the
                         .dmnd file already exists
* --aligner precomputed  no index; hit tables are read by `spsim run`

Job lines carry the backend options of `run`: --diamond, or --hits-dir
(required with --aligner precomputed).

Examples:
1. 100 pairs per chunk:
   spsim plan proteomes/ -o OUT --chunk-size 100

2. Exactly 32 chunks, plus one job line per chunk:
   spsim plan proteomes/ -o OUT --chunks 32 --jobs jobs.txt

3. Job lines reading existing hit tables:
   spsim plan proteomes/ -o OUT --aligner precomputed --hits-dir hits/ --jobs jobs.txt
"###,
        )
        .arg(
            Arg::new("infiles")
                .required(true)
                .num_args(1..)
                .index(1)
                .help("Input FASTA file(s) or directories"),
        )
        .arg(
            Arg::new("outdir")
                .short('o')
                .long("outdir")
                .num_args(1)
                .required(true)
                .help("Output root of the run"),
        )
        .arg(
            Arg::new("sep")
                .long("sep")
                .num_args(1)
                .help("Cut ids at the first occurrence of this character"),
        )
        .arg(
            Arg::new("chunk_size")
                .long("chunk-size")
                .num_args(1)
                .value_parser(value_parser!(usize))
                .default_value("100")
                .help("Pairs per chunk"),
        )
        .arg(
            Arg::new("chunks")
                .long("chunks")
                .num_args(1)
                .value_parser(value_parser!(usize))
                .conflicts_with("chunk_size")
                .help("Number of chunks, overrides --chunk-size"),
        )
        .arg(
            Arg::new("aligner")
                .long("aligner")
                .num_args(1)
                .value_parser(["diamond", "precomputed"])
                .default_value("diamond")
                .help("Search backend the indexes are built for"),
        )
        .arg(
            Arg::new("db_dir")
                .long("db-dir")
                .num_args(1)
                .help("Where to put diamond databases. Default: <outdir>/db"),
        )
        .arg(
            Arg::new("diamond")
                .long("diamond")
                .num_args(1)
                .default_value("diamond")
                .help("Path to the diamond binary"),
        )
        .arg(
            Arg::new("hits_dir")
                .long("hits-dir")
                .num_args(1)
                .help("Directory of precomputed hit tables, passed on to the --jobs lines"),
        )
        .arg(
            Arg::new("jobs")
                .long("jobs")
                .num_args(1)
                .help("Also write one `spsim run` command line per chunk to this file"),
        )
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    //----------------------------
    // Args
    //----------------------------
    let infiles: Vec<String> = args
        .get_many::<String>("infiles")
        .unwrap()
        .cloned()
        .collect();
    let outdir = args.get_one::<String>("outdir").unwrap();
    let sep = super::get_sep(args)?;
    let aligner = args.get_one::<String>("aligner").unwrap();

    // backend options repeated on every --jobs line
    let backend = match aligner.as_str() {
        "diamond" => format!(
            "--aligner diamond --diamond {}",
            args.get_one::<String>("diamond").unwrap()
        ),
        _ => match args.get_one::<String>("hits_dir") {
            Some(dir) => format!("--aligner precomputed --hits-dir {}", dir),
            None if args.contains_id("jobs") => {
                anyhow::bail!("--jobs with --aligner precomputed requires --hits-dir")
            }
            None => "--aligner precomputed".to_string(),
        },
    };

    let ctx = RunContext::new(outdir, 1);
    std::fs::create_dir_all(&ctx.outdir)?;

    let indexer: Box<dyn Indexer> = match aligner.as_str() {
        "diamond" => {
            let bin = args.get_one::<String>("diamond").unwrap();
            if which::which(bin).is_err() {
                anyhow::bail!("{} not found. Please install diamond first.", bin);
            }
            let db_dir = match args.get_one::<String>("db_dir") {
                Some(dir) => PathBuf::from(dir),
                None => ctx.outdir.join("db"),
            };
            Box::new(DiamondIndexer {
                bin: bin.to_string(),
                db_dir,
            })
        }
        _ => Box::new(PlainIndexer),
    };

    //----------------------------
    // Operating
    //----------------------------
    let items = registry::load(&infiles, sep, indexer.as_ref())?;
    let pairs = pair::generate(&items);
    let chunks = match args.get_one::<usize>("chunks") {
        Some(&count) => chunk::partition_into(&pairs, count)?,
        None => chunk::partition(&pairs, *args.get_one::<usize>("chunk_size").unwrap())?,
    };
    log::info!(
        "{} items, {} pairs in {} chunk(s)",
        items.len(),
        pairs.len(),
        chunks.len()
    );

    //----------------------------
    // Output
    //----------------------------
    let mut buf: Vec<u8> = vec![];
    registry::write_items(&items, &mut buf)?;
    spsim::publish(ctx.items_file(), ctx.scratch_dir(), &buf)?;

    let mut buf: Vec<u8> = vec![];
    chunk::write_chunks(&chunks, &mut buf)?;
    let chunks_file = ctx.chunks_file();
    if chunks_file.is_file() && std::fs::read(&chunks_file)? != buf {
        log::warn!("Work list changed, dropping old chunk tables");
        let tables = ctx.outdir.join("chunks");
        if tables.is_dir() {
            std::fs::remove_dir_all(&tables)?;
        }
    }
    spsim::publish(&chunks_file, ctx.scratch_dir(), &buf)?;

    if let Some(jobs) = args.get_one::<String>("jobs") {
        let exe = std::env::current_exe()?.display().to_string();
        let mut writer = spsim::writer(jobs)?;
        for c in &chunks {
            writer.write_fmt(format_args!(
                "{} run {} --chunk {} {}\n",
                exe, outdir, c.id, backend
            ))?;
        }
    }

    Ok(())
}
