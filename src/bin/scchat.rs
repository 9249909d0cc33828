//! Interactive command-line chat client.
//!
//! Prompts for the chat-ID, a nickname and the shared passphrase, derives
//! the 16-byte key, joins the LAN chat and relays lines from stdin to the
//! peers. Presentation concerns (decoding message payloads per their
//! declared encoding) live here, outside the protocol core.

use std::io::{self, Write};

use clap::Parser;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task;
use tracing_subscriber::EnvFilter;

use scchat::{digest, Encoding, Host, HostConfig, HostHandle, HostNotification, DEFAULT_PORT};

/// Upper bound on every prompted field (chat-ID, nickname, passphrase).
const MAX_INPUT: usize = 100;

#[derive(Parser)]
#[command(name = "scchat", about = "Serverless LAN chat")]
struct Opts {
    /// UDP port shared by all peers of the chat.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let opts = Opts::parse();

    let chat_id = prompt_nonempty("Chat ID: ")?;
    let nickname = prompt_nonempty("Nickname: ")?;
    let passphrase = prompt_bounded("Key: ")?;
    let key = digest::digest(passphrase.as_bytes());
    println!(
        "Key fingerprint: {}",
        hex::encode(&digest::digest(&key)[..4])
    );

    let (host, notifications) = Host::spawn(HostConfig {
        nickname,
        chat_id,
        key,
        port: opts.port,
    })
    .await?;
    println!("Begin to chat now!\n");

    let printer = task::spawn(print_notifications(notifications));
    console_loop(host).await?;
    // The handle is gone; the engine says goodbye to the peers and the
    // printer finishes on Shutdown.
    printer.await?;
    Ok(())
}

async fn print_notifications(mut notifications: mpsc::Receiver<HostNotification>) {
    let mut conflict_reported = false;
    while let Some(notification) = notifications.recv().await {
        match notification {
            HostNotification::Hello(peer) => {
                println!("{} has joined the chat!", peer.nickname)
            }
            HostNotification::Welcome(peer) => println!("{} is online!", peer.nickname),
            HostNotification::Leave(peer) => println!("{} is offline!", peer.nickname),
            HostNotification::Message(peer, pdu) => {
                println!("{}: {}", peer.nickname, render(&pdu.payload, pdu.encoding))
            }
            HostNotification::MalformedReceived(peer, _)
            | HostNotification::MalformedNotification(peer, _) => {
                println!("Problem while communicating with {}!", display_name(&peer.nickname))
            }
            HostNotification::Conflict(_, _) => {
                if !conflict_reported {
                    println!("Nickname collision detected!");
                    conflict_reported = true;
                }
            }
            HostNotification::Shutdown => break,
        }
    }
}

async fn console_loop(host: HostHandle) -> io::Result<()> {
    let mut lines = BufReader::new(stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix('/') {
            let mut parts = rest.splitn(2, ' ');
            match (parts.next().unwrap_or(""), parts.next()) {
                ("quit", _) | ("q", _) => break,
                ("peers", _) => {
                    let peers = host.list_peers().await;
                    println!("{} peer(s):", peers.len());
                    for peer in peers {
                        println!("  {} @ {}", display_name(&peer.nickname), peer.address);
                    }
                }
                ("hello", _) => host.hello().await,
                ("all", Some(text)) => host.spartan_send(text).await,
                ("all", None) => println!("Usage: /all <text>"),
                (other, _) => println!("Unknown command `/{}`", other),
            }
        } else {
            host.send(line).await;
        }
    }
    Ok(())
}

fn display_name(nickname: &str) -> &str {
    if nickname.is_empty() {
        "an unknown host"
    } else {
        nickname
    }
}

/// Best-effort decoding of a payload per its declared encoding, for
/// display only.
fn render(payload: &[u8], encoding: Encoding) -> String {
    match encoding {
        Encoding::Ascii | Encoding::Utf7 | Encoding::Utf8 => {
            String::from_utf8_lossy(payload).into_owned()
        }
        Encoding::Latin1 => payload.iter().map(|&b| b as char).collect(),
        Encoding::Utf16Le => decode_utf16(payload.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]))),
        Encoding::Utf16Be => decode_utf16(payload.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]]))),
        Encoding::Utf32 => payload
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .map(|u| char::from_u32(u).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect(),
    }
}

fn decode_utf16(units: impl Iterator<Item = u16>) -> String {
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

fn prompt(label: &str) -> io::Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn prompt_bounded(label: &str) -> io::Result<String> {
    loop {
        let value = prompt(label)?;
        if value.len() > MAX_INPUT {
            println!("Too long, {} bytes at most.", MAX_INPUT);
            continue;
        }
        return Ok(value);
    }
}

fn prompt_nonempty(label: &str) -> io::Result<String> {
    loop {
        let value = prompt_bounded(label)?;
        if value.is_empty() {
            continue;
        }
        return Ok(value);
    }
}
