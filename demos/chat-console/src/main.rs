//! Console chat client.
//!
//! Joins one chat, prints every event the hub pushes and sends each line
//! typed on stdin. Commands: `/read <message-id>`, `/leave`, `/quit`.
//!
//!   GEARSHARE_TOKEN=... cargo run -p gearshare-demo-chat -- --chat 42

use anyhow::Context;
use clap::Parser;
use gearshare_client::{ChatConfig, ChatConnection, EnvToken};
use gearshare_core::ChatId;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "Talk to a GearShare chat from the terminal")]
struct Args {
    /// Chat to join.
    #[arg(long)]
    chat: ChatId,

    /// TOML config file; defaults apply when absent.
    #[arg(long, env = "GEARSHARE_CONFIG")]
    config: Option<PathBuf>,

    /// Environment variable holding the access token.
    #[arg(long, default_value = "GEARSHARE_TOKEN")]
    token_var: String,

    /// Seconds to wait for the first connection.
    #[arg(long, default_value_t = 10)]
    wait: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("gearshare_client=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ChatConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ChatConfig::default().with_env_overrides(),
    };

    let chat = ChatConnection::websocket(&config, Arc::new(EnvToken::new(&args.token_var)))?;
    tracing::info!("Using hub {}", chat.hub_url());

    let _received = chat.on_message_received(|m| println!("[{}] {}: {}", m.chat_id, m.sender_name, m.content));
    let _read = chat.on_message_read(|r| println!("  ({} read {})", r.user_id, r.message_id));
    let _updated = chat.on_chat_updated(|id| println!("  (chat {id} updated)"));
    let _unread = chat.on_unread_count_changed(|u| println!("  ({} unread in chat {})", u.unread_count, u.chat_id));

    if !chat.wait_for_connection(Duration::from_secs(args.wait)).await {
        anyhow::bail!("could not reach {} (is {} set?)", chat.hub_url(), args.token_var);
    }
    chat.join_chat(args.chat).await?;
    tracing::info!("Joined chat {}", args.chat);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let result = match parse_line(line) {
            Input::Read(id) => chat.mark_as_read(id).await,
            Input::Usage(usage) => {
                eprintln!("usage: {usage}");
                continue;
            }
            Input::Quit => break,
            Input::Say(text) => chat.send_message(args.chat, text).await,
        };
        if let Err(e) = result {
            tracing::warn!("{}", e);
        }
    }

    if let Err(e) = chat.leave_chat(args.chat).await {
        tracing::debug!("Leaving chat {}: {}", args.chat, e);
    }
    chat.disconnect().await;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Say(&'a str),
    Read(&'a str),
    Usage(&'static str),
    Quit,
}

fn parse_line(line: &str) -> Input<'_> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match command {
        "/read" if rest.is_empty() => Input::Usage("/read <message-id>"),
        "/read" => Input::Read(rest),
        "/leave" | "/quit" => Input::Quit,
        _ => Input::Say(line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_needs_a_message_id() {
        assert_eq!(parse_line("/read"), Input::Usage("/read <message-id>"));
        assert_eq!(parse_line("/read   "), Input::Usage("/read <message-id>"));
        assert_eq!(parse_line("/read m-17"), Input::Read("m-17"));
    }

    #[test]
    fn plain_text_is_sent() {
        assert_eq!(parse_line("see you at 9"), Input::Say("see you at 9"));
        assert_eq!(parse_line("/reading list"), Input::Say("/reading list"));
        assert_eq!(parse_line("/quit"), Input::Quit);
    }
}
