//! `connection` and `providers` commands.

use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgMatches, Command};
use serde::Serialize;

use crate::auth::ConnectionManager;
use crate::cloud::registry::PROVIDERS;
use crate::config::{Connection, SaveType, TokenMethod};
use crate::errors::{CloudError, Result};
use crate::output;

/// Build the `connection` clap command.
pub fn connection_command() -> Command {
    let services: Vec<&'static str> = PROVIDERS.iter().map(|(key, _)| *key).collect();

    Command::new("connection")
        .about("Manage configured connections")
        .visible_alias("conn")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("add")
                .about("Add a connection")
                .arg(Arg::new("name").required(true).help("Connection name"))
                .arg(
                    Arg::new("service")
                        .long("service")
                        .short('s')
                        .required(true)
                        .value_parser(PossibleValuesParser::new(services))
                        .help("Provider key"),
                )
                .arg(
                    Arg::new("method")
                        .long("method")
                        .value_parser(["oauth", "manual"])
                        .default_value("oauth")
                        .help("How to obtain a token"),
                )
                .arg(
                    Arg::new("save")
                        .long("save")
                        .value_parser(["dont_save", "config", "password_manager"])
                        .default_value("config")
                        .help("Where to keep the token between runs"),
                )
                .arg(Arg::new("user").long("user").help("Account name, for display"))
                .arg(Arg::new("client-id").long("client-id").help("OAuth client id override"))
                .arg(
                    Arg::new("port")
                        .long("port")
                        .value_parser(clap::value_parser!(u16))
                        .help("Loopback port for the OAuth redirect"),
                )
                .arg(
                    Arg::new("auth-timeout")
                        .long("auth-timeout")
                        .value_parser(clap::value_parser!(u64))
                        .help("Seconds to wait for the browser authorization"),
                ),
        )
        .subcommand(Command::new("list").about("List connections"))
        .subcommand(
            Command::new("remove")
                .about("Remove a connection")
                .arg(Arg::new("name").required(true)),
        )
        .subcommand(
            Command::new("rename")
                .about("Rename a connection")
                .arg(Arg::new("old").required(true))
                .arg(Arg::new("new").required(true)),
        )
}

pub fn providers_command() -> Command {
    Command::new("providers").about("List supported providers")
}

/// Connection as shown to the user. The token itself is never printed.
#[derive(Debug, Serialize)]
struct ConnectionView<'a> {
    name: &'a str,
    service: &'a str,
    user_name: &'a str,
    get_token_method: TokenMethod,
    save_type: SaveType,
    has_token: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_timeout: Option<u64>,
}

impl<'a> From<&'a Connection> for ConnectionView<'a> {
    fn from(c: &'a Connection) -> Self {
        Self {
            name: &c.name,
            service: &c.service,
            user_name: &c.user_name,
            get_token_method: c.get_token_method,
            save_type: c.save_type,
            has_token: c.stored_token().is_some(),
            client_id: c.client_id.as_deref(),
            port: c.port,
            auth_timeout: c.auth_timeout,
        }
    }
}

pub async fn handle_connection(matches: &ArgMatches, manager: &ConnectionManager, json: bool) -> Result<()> {
    let store = manager.store();
    match matches.subcommand() {
        Some(("add", sub)) => {
            let conn = connection_from_args(sub)?;
            let name = conn.name.clone();
            store.add(conn).await?;
            output::success(&format!("Connection '{}' added", name));
            Ok(())
        }
        Some(("list", _)) => {
            let connections = store.list().await;
            let views: Vec<ConnectionView<'_>> = connections.iter().map(ConnectionView::from).collect();
            if json {
                output::json(&views);
            } else if views.is_empty() {
                output::info("No connections configured. Add one with `cloudfs connection add`.");
            } else {
                for v in &views {
                    println!(
                        "{:<16} {:<10} {:<7} {:<17} {}",
                        v.name,
                        v.service,
                        v.get_token_method.to_string(),
                        v.save_type.to_string(),
                        if v.has_token { "token stored" } else { "" }
                    );
                }
            }
            Ok(())
        }
        Some(("remove", sub)) => {
            let name = arg(sub, "name")?;
            store.remove(name).await?;
            manager.forget(name).await;
            output::success(&format!("Connection '{}' removed", name));
            Ok(())
        }
        Some(("rename", sub)) => {
            let old = arg(sub, "old")?;
            let new = arg(sub, "new")?;
            store.rename(old, new).await?;
            manager.rename(old, new).await;
            output::success(&format!("Connection '{}' renamed to '{}'", old, new));
            Ok(())
        }
        _ => Err(CloudError::InvalidArgument("unknown connection subcommand".into())),
    }
}

pub fn handle_providers(json: bool) {
    if json {
        let list: Vec<_> = PROVIDERS
            .iter()
            .map(|(key, name)| serde_json::json!({ "key": key, "name": name }))
            .collect();
        output::json(&list);
        return;
    }
    for (key, name) in PROVIDERS {
        println!("{key:<10} {name}");
    }
}

fn arg<'a>(matches: &'a ArgMatches, id: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(id)
        .map(String::as_str)
        .ok_or_else(|| CloudError::InvalidArgument(format!("missing <{id}>")))
}

fn connection_from_args(matches: &ArgMatches) -> Result<Connection> {
    let mut conn = Connection::new(arg(matches, "name")?, arg(matches, "service")?);
    conn.get_token_method = match arg(matches, "method")? {
        "manual" => TokenMethod::Manual,
        _ => TokenMethod::Oauth,
    };
    conn.save_type = match arg(matches, "save")? {
        "dont_save" => SaveType::DontSave,
        "password_manager" => SaveType::PasswordManager,
        _ => SaveType::Config,
    };
    if let Some(user) = matches.get_one::<String>("user") {
        conn.user_name = user.clone();
    }
    conn.client_id = matches.get_one::<String>("client-id").cloned();
    conn.port = matches.get_one::<u16>("port").copied();
    conn.auth_timeout = matches.get_one::<u64>("auth-timeout").copied();
    Ok(conn)
}
