extern crate clap;
use clap::*;

mod cmd_spsim;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app = Command::new("spsim")
        .version(crate_version!())
        .author(crate_authors!())
        .about("`spsim` - Species Proteome SIMilarity")
        .propagate_version(true)
        .arg_required_else_help(true)
        .color(ColorChoice::Auto)
        .subcommand(cmd_spsim::items::make_subcommand())
        .subcommand(cmd_spsim::plan::make_subcommand())
        .subcommand(cmd_spsim::run::make_subcommand())
        .subcommand(cmd_spsim::assemble::make_subcommand())
        .after_help(
            r###"Subcommands:

* items    - List sequence sets with their ids and record counts
* plan     - Build indexes, generate pairs and write the chunked work list
* run      - Align and reduce the pairs of one or all chunks
* assemble - Merge chunk tables into the similarity matrix

Typical workflow:

    spsim plan proteomes/ -o OUT --chunk-size 100
    spsim run OUT --chunk 0 -p 8      # one job per chunk, anywhere
    spsim assemble OUT -o matrix.csv

Set RUST_LOG=debug for per-pair messages.

"###,
        );

    // Check which subcomamnd the user ran...
    match app.get_matches().subcommand() {
        Some(("items", sub_matches)) => cmd_spsim::items::execute(sub_matches),
        Some(("plan", sub_matches)) => cmd_spsim::plan::execute(sub_matches),
        Some(("run", sub_matches)) => cmd_spsim::run::execute(sub_matches),
        Some(("assemble", sub_matches)) => cmd_spsim::assemble::execute(sub_matches),
        _ => unreachable!(),
    }?;

    Ok(())
}
