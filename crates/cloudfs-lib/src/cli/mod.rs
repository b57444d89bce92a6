//! Root command and the flags every subcommand inherits.

use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, Command};

/// Root `cloudfs` command. Subcommands are attached by
/// [`crate::commands::register_commands`].
pub fn create_root_command() -> Command {
    Command::new("cloudfs")
        .about("Browse and transfer files across cloud storage connections")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log requests and token resolution at debug level"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Print results and statuses as JSON"),
        )
        .arg(
            Arg::new("config-dir")
                .long("config-dir")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Directory holding connections.json and stored secrets"),
        )
}

/// Flags accepted anywhere on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalFlags {
    pub verbose: bool,
    pub json: bool,
    pub config_dir: Option<PathBuf>,
}

impl GlobalFlags {
    /// Verbose logging is dropped under `--json` so stdout stays parseable.
    pub fn from_matches(matches: &ArgMatches) -> Self {
        let json = matches.get_flag("json");
        Self {
            verbose: matches.get_flag("verbose") && !json,
            json,
            config_dir: matches.get_one::<PathBuf>("config-dir").cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(args: &[&str]) -> GlobalFlags {
        let matches = create_root_command()
            .try_get_matches_from(args.iter().copied())
            .unwrap();
        GlobalFlags::from_matches(&matches)
    }

    #[test]
    fn test_defaults() {
        assert_eq!(flags(&["cloudfs"]), GlobalFlags::default());
    }

    #[test]
    fn test_short_verbose() {
        assert!(flags(&["cloudfs", "-v"]).verbose);
    }

    #[test]
    fn test_json_silences_verbose() {
        let f = flags(&["cloudfs", "--verbose", "--json"]);
        assert!(f.json);
        assert!(!f.verbose);
    }

    #[test]
    fn test_config_dir() {
        let f = flags(&["cloudfs", "--config-dir", "/tmp/cfs"]);
        assert_eq!(f.config_dir, Some(PathBuf::from("/tmp/cfs")));
    }
}
