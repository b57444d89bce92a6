use std::sync::Arc;

use cloudfs_lib::auth::{ConnectionManager, FileSecretStore};
use cloudfs_lib::cli::{create_root_command, GlobalFlags};
use cloudfs_lib::cloud::registry::ServiceRegistry;
use cloudfs_lib::commands::{dispatch_command, register_commands};
use cloudfs_lib::config::{ConfigStore, Settings};
use cloudfs_lib::errors::{handle_command_error, Result};
use cloudfs_lib::http_client::HttpClient;
use cloudfs_lib::vfs::CloudFs;

/// Store, registry and token manager behind the virtual filesystem.
async fn build_fs(flags: &GlobalFlags) -> Result<CloudFs> {
    let settings = Settings::get();
    let config_dir = flags
        .config_dir
        .clone()
        .unwrap_or_else(|| settings.config_dir.clone());

    let store = Arc::new(ConfigStore::initialize(Some(config_dir.clone())).await?);
    let registry = Arc::new(ServiceRegistry::new(HttpClient::new(settings)?));
    let secrets = Arc::new(FileSecretStore::with_base(config_dir.join("secrets")));
    let manager = ConnectionManager::new(store, registry, secrets);
    Ok(CloudFs::new(Arc::new(manager)))
}

#[tokio::main]
async fn main() {
    // Step 1: Parse arguments
    let matches = register_commands(create_root_command()).get_matches();
    let flags = GlobalFlags::from_matches(&matches);

    // Step 2: Initialize logger
    cloudfs_lib::logger::init(flags.verbose);
    cloudfs_lib::logger::set_verbose(flags.verbose);

    let Some((name, sub_matches)) = matches.subcommand() else {
        let mut cmd = register_commands(create_root_command());
        if let Err(e) = cmd.print_help() {
            eprintln!("Failed to print help: {e}");
            std::process::exit(1);
        }
        return;
    };

    // Step 3: Connection store, registry, token manager
    let cloud_fs = match build_fs(&flags).await {
        Ok(fs) => fs,
        Err(e) => {
            handle_command_error(&e);
            std::process::exit(1);
        }
    };

    // Step 4: Dispatch
    tracing::debug!(command = name, "Executing command");
    if let Err(e) = dispatch_command(name, sub_matches, &cloud_fs, flags.json).await {
        handle_command_error(&e);
        std::process::exit(1);
    }
}
