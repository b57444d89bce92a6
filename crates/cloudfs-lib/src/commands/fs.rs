//! Filesystem subcommands over virtual paths: `ls`, `get`, `put`, `mkdir`,
//! `rm`, `rmdir`, `mv`, `cp`, `quote` and `df`.

use std::path::{Path, PathBuf};

use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::json;
use tokio::io::AsyncWrite;

use crate::cloud::split_parent;
use crate::cloud::upload::UploadSource;
use crate::errors::{CloudError, Result};
use crate::logger;
use crate::output;
use crate::output::progress::{create_spinner, create_transfer_progress, ProgressReader, ProgressWriter};
use crate::vfs::{CloudFs, ExecOutcome, FsStatus, TransferFlags};

/// Names of every command handled by [`handle_fs_command`].
pub const FS_COMMANDS: &[&str] = &["ls", "get", "put", "mkdir", "rm", "rmdir", "mv", "cp", "quote", "df"];

fn path_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).required(true).help(help)
}

fn overwrite_arg() -> Arg {
    Arg::new("overwrite")
        .long("overwrite")
        .short('f')
        .action(ArgAction::SetTrue)
        .help("Replace the target if it already exists")
}

fn move_arg() -> Arg {
    Arg::new("move")
        .long("move")
        .action(ArgAction::SetTrue)
        .help("Delete the source after a successful transfer")
}

/// Build the filesystem subcommands.
pub fn fs_commands() -> Vec<Command> {
    vec![
        Command::new("ls")
            .about("List a folder, or the connections at /")
            .arg(Arg::new("path").default_value("/").help("Virtual path, e.g. /work/docs")),
        Command::new("get")
            .about("Download a remote file")
            .arg(path_arg("remote", "Remote virtual path"))
            .arg(Arg::new("local").help("Local destination (defaults to the remote file name)"))
            .arg(overwrite_arg())
            .arg(move_arg()),
        Command::new("put")
            .about("Upload a local file")
            .arg(path_arg("local", "Local file"))
            .arg(path_arg("remote", "Remote virtual path"))
            .arg(overwrite_arg())
            .arg(move_arg()),
        Command::new("mkdir")
            .about("Create a folder, or a connection when given /<name>")
            .arg(path_arg("path", "Virtual path"))
            .arg(
                Arg::new("service")
                    .long("service")
                    .short('s')
                    .help("Provider key for a new connection"),
            ),
        Command::new("rm")
            .about("Delete a remote file or folder (under .Trash: erase permanently)")
            .arg(path_arg("path", "Virtual path")),
        Command::new("rmdir")
            .about("Delete a remote folder, or remove a connection when given /<name>")
            .arg(path_arg("path", "Virtual path")),
        Command::new("mv")
            .about("Move or rename a remote resource, or rename a connection")
            .arg(path_arg("from", "Source virtual path"))
            .arg(path_arg("to", "Target virtual path"))
            .arg(overwrite_arg()),
        Command::new("cp")
            .about("Copy a remote resource within one connection")
            .arg(path_arg("from", "Source virtual path"))
            .arg(path_arg("to", "Target virtual path"))
            .arg(overwrite_arg()),
        Command::new("quote")
            .about("Run a provider command: download <url> [name], zip [path] <dest>, trash [clean]")
            .arg(path_arg("path", "Current virtual folder"))
            .arg(
                Arg::new("command")
                    .required(true)
                    .num_args(1..)
                    .trailing_var_arg(true)
                    .allow_hyphen_values(true)
                    .help("Command and its arguments"),
            ),
        Command::new("df")
            .about("Show storage usage of a connection")
            .arg(path_arg("connection", "Connection name")),
    ]
}

/// Dispatch one of [`FS_COMMANDS`].
pub async fn handle_fs_command(name: &str, matches: &ArgMatches, fs: &CloudFs, json: bool) -> Result<()> {
    match name {
        "ls" => handle_ls(matches, fs, json).await,
        "get" => handle_get(matches, fs, json).await,
        "put" => handle_put(matches, fs, json).await,
        "mkdir" => {
            let path = required(matches, "path")?;
            let service = matches.get_one::<String>("service").map(String::as_str);
            let result = fs.mkdir(path, service).await;
            report("mkdir", path, result, true, json)
        }
        "rm" => {
            let path = required(matches, "path")?;
            let result = fs.remove(path).await;
            report("rm", path, result, true, json)
        }
        "rmdir" => {
            let path = required(matches, "path")?;
            let result = fs.rmdir(path).await;
            report("rmdir", path, result, true, json)
        }
        "mv" | "cp" => {
            let from = required(matches, "from")?;
            let to = required(matches, "to")?;
            let overwrite = matches.get_flag("overwrite");
            let result = if name == "mv" {
                fs.rename(from, to, overwrite).await
            } else {
                fs.copy_remote(from, to, overwrite).await
            };
            report(name, &format!("{from} -> {to}"), result, true, json)
        }
        "quote" => handle_quote(matches, fs, json).await,
        "df" => handle_df(matches, fs, json).await,
        other => Err(CloudError::InvalidArgument(format!("unknown command: {other}"))),
    }
}

fn required<'a>(matches: &'a ArgMatches, id: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(id)
        .map(String::as_str)
        .ok_or_else(|| CloudError::InvalidArgument(format!("missing <{id}>")))
}

/// Print the outcome of a side-effecting command and pass the error on.
fn report(op: &str, target: &str, result: Result<()>, write: bool, json: bool) -> Result<()> {
    let status = FsStatus::of(&result, write);
    if json {
        output::json(&json!({ "op": op, "target": target, "status": status }));
    } else if result.is_ok() {
        output::success(&format!("{op}: {target}"));
    } else if logger::is_verbose() {
        output::warning(&format!("{op}: {target} ({status:?})"));
    }
    result
}

async fn handle_ls(matches: &ArgMatches, fs: &CloudFs, json: bool) -> Result<()> {
    let path = required(matches, "path")?;
    let resources = fs.list(path).await?;
    if json {
        output::json(&resources.into_vec());
    } else {
        output::print_listing(&resources);
    }
    Ok(())
}

/// Size of a remote file from its parent's listing, when it can be found.
async fn remote_size(fs: &CloudFs, remote: &str) -> Option<u64> {
    let (parent, name) = split_parent(remote);
    let listing = fs.list(&parent).await.ok()?;
    listing
        .iter()
        .find(|r| r.name == name && !r.is_dir)
        .map(|r| r.size)
}

async fn handle_get(matches: &ArgMatches, fs: &CloudFs, json: bool) -> Result<()> {
    let remote = required(matches, "remote")?;
    let local = match matches.get_one::<String>("local") {
        Some(p) => PathBuf::from(p),
        None => {
            let (_, name) = split_parent(remote);
            if name.is_empty() {
                return Err(CloudError::InvalidArgument(format!(
                    "cannot derive a file name from {remote}"
                )));
            }
            PathBuf::from(name)
        }
    };
    let flags = TransferFlags {
        overwrite: matches.get_flag("overwrite"),
        move_source: matches.get_flag("move"),
        ..Default::default()
    };

    let pb = match remote_size(fs, remote).await {
        Some(size) if !json => create_transfer_progress(size),
        _ if !json => create_spinner(&format!("Downloading {remote}")),
        _ => indicatif::ProgressBar::hidden(),
    };
    let bar = pb.clone();
    let result = fs
        .get_file(remote, &local, flags, move |file| -> Box<dyn AsyncWrite + Send + Unpin> {
            Box::new(ProgressWriter::new(file, bar))
        })
        .await;
    finish_transfer(&pb, &result);

    let bytes = result.as_ref().ok().copied();
    if json {
        output::json(&json!({
            "op": "get",
            "remote": remote,
            "local": local.display().to_string(),
            "bytes": bytes,
            "status": FsStatus::of(&result, false),
        }));
    } else if let Some(bytes) = bytes {
        output::success(&format!(
            "Downloaded {} to {} ({})",
            remote,
            local.display(),
            output::format_size(bytes)
        ));
    }
    result.map(drop)
}

async fn handle_put(matches: &ArgMatches, fs: &CloudFs, json: bool) -> Result<()> {
    let local = Path::new(required(matches, "local")?);
    let remote = required(matches, "remote")?;
    let flags = TransferFlags {
        overwrite: matches.get_flag("overwrite"),
        move_source: matches.get_flag("move"),
        ..Default::default()
    };

    let size = tokio::fs::metadata(local).await?.len();
    let pb = if json {
        indicatif::ProgressBar::hidden()
    } else {
        create_transfer_progress(size)
    };
    let bar = pb.clone();
    let result = fs
        .put_file(local, remote, flags, move |file| -> Box<dyn UploadSource> {
            Box::new(ProgressReader::new(file, bar))
        })
        .await;
    finish_transfer(&pb, &result);

    if json {
        output::json(&json!({
            "op": "put",
            "local": local.display().to_string(),
            "remote": remote,
            "bytes": result.as_ref().ok(),
            "status": FsStatus::of(&result, true),
        }));
    } else if let Ok(bytes) = &result {
        output::success(&format!(
            "Uploaded {} to {} ({})",
            local.display(),
            remote,
            output::format_size(*bytes)
        ));
    }
    result.map(drop)
}

fn finish_transfer<T>(pb: &indicatif::ProgressBar, result: &Result<T>) {
    match result {
        Ok(_) => pb.finish_and_clear(),
        Err(_) => pb.abandon_with_message("Error"),
    }
}

async fn handle_quote(matches: &ArgMatches, fs: &CloudFs, json: bool) -> Result<()> {
    let path = required(matches, "path")?;
    let line = matches
        .get_many::<String>("command")
        .map(|words| words.cloned().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();

    let spinner = (!json).then(|| create_spinner(&format!("Running {line}")));
    let result = fs.execute(path, &line).await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    match result? {
        ExecOutcome::Done if json => output::json(&json!({ "op": "quote", "command": line, "status": FsStatus::Ok })),
        ExecOutcome::Done => output::success(&format!("Done: {line}")),
        ExecOutcome::Symlink(target) if json => output::json(&json!({ "op": "quote", "command": line, "symlink": target })),
        ExecOutcome::Symlink(target) => output::info(&format!("Open {target} to browse the trash")),
    }
    Ok(())
}

async fn handle_df(matches: &ArgMatches, fs: &CloudFs, json: bool) -> Result<()> {
    let conn = required(matches, "connection")?.trim_matches('/');
    let info = fs.disk_info(conn).await?;
    if json {
        output::json(&info);
        return Ok(());
    }
    let show = |v: Option<u64>| v.map(output::format_size).unwrap_or_else(|| "-".to_string());
    println!("Connection: {conn}");
    println!("  Total: {}", show(info.total));
    println!("  Used:  {}", show(info.used));
    println!("  Trash: {}", show(info.trash));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> Command {
        fs_commands()
            .into_iter()
            .fold(Command::new("cloudfs"), |root, cmd| root.subcommand(cmd))
    }

    #[test]
    fn test_every_command_is_built() {
        let cmd = root();
        for name in FS_COMMANDS {
            assert!(cmd.find_subcommand(name).is_some(), "{name}");
        }
    }

    #[test]
    fn test_put_flags() {
        let m = root()
            .try_get_matches_from(["cloudfs", "put", "a.txt", "/work/a.txt", "--overwrite"])
            .unwrap();
        let (name, sub) = m.subcommand().unwrap();
        assert_eq!(name, "put");
        assert!(sub.get_flag("overwrite"));
        assert!(!sub.get_flag("move"));
        assert_eq!(required(sub, "remote").unwrap(), "/work/a.txt");
    }

    #[test]
    fn test_quote_collects_words() {
        let m = root()
            .try_get_matches_from(["cloudfs", "quote", "/work", "download", "http://x/y.iso", "z.iso"])
            .unwrap();
        let (_, sub) = m.subcommand().unwrap();
        let words: Vec<&String> = sub.get_many::<String>("command").unwrap().collect();
        assert_eq!(words, ["download", "http://x/y.iso", "z.iso"]);
    }

    #[test]
    fn test_ls_defaults_to_root() {
        let m = root().try_get_matches_from(["cloudfs", "ls"]).unwrap();
        let (_, sub) = m.subcommand().unwrap();
        assert_eq!(required(sub, "path").unwrap(), "/");
    }
}
