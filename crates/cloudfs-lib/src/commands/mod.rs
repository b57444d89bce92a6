pub mod connection;
pub mod fs;

use clap::{ArgMatches, Command};

use crate::errors::{CloudError, Result};
use crate::vfs::CloudFs;

/// Attach every subcommand to `root`.
pub fn register_commands(root: Command) -> Command {
    fs::fs_commands()
        .into_iter()
        .fold(root, |root, cmd| root.subcommand(cmd))
        .subcommand(connection::connection_command())
        .subcommand(connection::providers_command())
}

/// Run subcommand `name` against the virtual filesystem.
pub async fn dispatch_command(
    name: &str,
    matches: &ArgMatches,
    cloud_fs: &CloudFs,
    json: bool,
) -> Result<()> {
    match name {
        "connection" => connection::handle_connection(matches, cloud_fs.manager(), json).await,
        "providers" => {
            connection::handle_providers(json);
            Ok(())
        }
        cmd if fs::FS_COMMANDS.contains(&cmd) => fs::handle_fs_command(cmd, matches, cloud_fs, json).await,
        _ => Err(CloudError::InvalidArgument(format!("Unknown command: {}", name))),
    }
}
