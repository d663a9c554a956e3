//! Subcommand modules for the `spsim` binary.

pub mod assemble;
pub mod items;
pub mod plan;
pub mod run;

/// Parses `--sep`, a single character
pub fn get_sep(args: &clap::ArgMatches) -> anyhow::Result<Option<char>> {
    match args.get_one::<String>("sep") {
        None => Ok(None),
        Some(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Some(c)),
                _ => anyhow::bail!("--sep must be a single character, got {:?}", s),
            }
        }
    }
}
