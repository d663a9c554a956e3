use clap::*;
use spsim::libs::registry;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("items")
        .about("Lists sequence sets with their ids and record counts")
        .after_help(
            r###"
Each input is a FASTA file or a directory of them (.fa, .faa, .fas, .fasta,
.fna, optionally gzipped). Ids come from file names: the stem, cut at the
first --sep when given.

Output columns:
1. id
2. path
3. count: number of sequence records
4. index: the file itself, as no index is built here

Examples:
1. Count proteins of every proteome in a directory:
   spsim items proteomes/

2. Ids from `562_nonredundant.faa`-style names:
   spsim items proteomes/ --sep _
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
            Arg::new("sep")
                .long("sep")
                .num_args(1)
                .help("Cut ids at the first occurrence of this character"),
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
    let infiles: Vec<String> = args
        .get_many::<String>("infiles")
        .unwrap()
        .cloned()
        .collect();
    let sep = super::get_sep(args)?;
    let mut writer = spsim::writer(args.get_one::<String>("outfile").unwrap())?;

    //----------------------------
    // Output
    //----------------------------
    let items = registry::load(&infiles, sep, &registry::PlainIndexer)?;
    registry::write_items(&items, &mut writer)?;

    Ok(())
}
