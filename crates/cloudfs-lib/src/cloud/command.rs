//! Provider-specific verbs passed through the host's command line.
//!
//! ```text
//! download <url> [name]   server-side fetch into the current folder
//! zip [path] <dest>       download a folder as a zip archive to a local file
//! trash [clean]           open the trash, or empty it
//! ```

use crate::errors::{CloudError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    Download { url: String, name: String },
    Zip { source: Option<String>, dest: String },
    TrashOpen,
    TrashClean,
}

impl RemoteCommand {
    /// Parse `args`, where `args[0]` is the verb.
    pub fn parse(args: &[String]) -> Result<Self> {
        let Some(verb) = args.first() else {
            return Err(CloudError::CommandFormat("empty command".into()));
        };

        match verb.as_str() {
            "download" => match args.len() {
                2 => Ok(RemoteCommand::Download {
                    name: file_name_from_url(&args[1])?,
                    url: args[1].clone(),
                }),
                3 => Ok(RemoteCommand::Download {
                    url: args[1].clone(),
                    name: args[2].clone(),
                }),
                _ => Err(CloudError::CommandFormat(
                    "usage: download <url> [name]".into(),
                )),
            },
            "zip" => match args.len() {
                2 => Ok(RemoteCommand::Zip {
                    source: None,
                    dest: args[1].clone(),
                }),
                3 => Ok(RemoteCommand::Zip {
                    source: Some(args[1].clone()),
                    dest: args[2].clone(),
                }),
                _ => Err(CloudError::CommandFormat("usage: zip [path] <dest>".into())),
            },
            "trash" => match (args.len(), args.get(1).map(String::as_str)) {
                (1, _) => Ok(RemoteCommand::TrashOpen),
                (2, Some("clean")) => Ok(RemoteCommand::TrashClean),
                _ => Err(CloudError::CommandFormat("usage: trash [clean]".into())),
            },
            other => Err(CloudError::CommandNotSupported(other.to_string())),
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            RemoteCommand::Download { .. } => "download",
            RemoteCommand::Zip { .. } => "zip",
            RemoteCommand::TrashOpen | RemoteCommand::TrashClean => "trash",
        }
    }
}

/// Last path segment of `url`, ignoring any query string.
fn file_name_from_url(url: &str) -> Result<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    match without_query.rfind('/') {
        Some(idx) if idx + 1 < without_query.len() => Ok(without_query[idx + 1..].to_string()),
        _ => Err(CloudError::CommandFormat(
            "cannot get filename from url".into(),
        )),
    }
}
