//! ferry: interactive shell for a ferry-fs server

use anyhow::Context;
use clap::Parser;
use ferry_fs::{ClientConfig, ClientSession};
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ferry", about = "Browse and transfer files on a ferry-fs server")]
struct Args {
    /// Server host
    #[arg(long, env = "FERRY_HOST", default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(long, env = "FERRY_PORT", default_value_t = ferry_fs::config::DEFAULT_PORT)]
    port: u16,

    /// Seconds to wait for each server reply
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

const HELP: &str = "\
commands:
  help                       show this help
  exit                       leave the shell
  ls [path]                  list a directory
  cd <path>                  change the remote working directory
  download <remote> <local>  fetch a file
  upload <local> <remote>    send a file
  delete <path>              delete a file or directory tree
  mkdir <path>               create a directory (and missing parents)
  rename <old> <new>         rename or move an entry";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let addr = format!("{}:{}", args.host, args.port);
    let config = ClientConfig {
        read_timeout: Duration::from_secs(args.timeout),
        ..ClientConfig::default()
    };
    let mut session = ClientSession::connect(addr.clone(), config)
        .await
        .with_context(|| format!("connect {addr}"))?;

    println!("Connected to {addr}. Type 'help' for commands, 'exit' to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}> ", session.cwd());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (cmd, rest) = line
            .split_once(char::is_whitespace)
            .map(|(cmd, rest)| (cmd, rest.trim()))
            .unwrap_or((line, ""));
        let cmd = cmd.to_ascii_lowercase();
        debug!(command = %cmd, "Shell command");

        match cmd.as_str() {
            "exit" | "quit" => break,
            "help" => println!("{HELP}"),
            "delete" => {
                if rest.is_empty() {
                    println!("usage: delete <path>");
                    continue;
                }
                let target = session.resolve(rest);
                print!("delete {target}? (y/n): ");
                std::io::stdout().flush()?;
                let answer = lines.next_line().await?.unwrap_or_default();
                if matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
                    match session.delete(&target).await {
                        Ok(()) => println!("deleted {target}"),
                        Err(e) => eprintln!("error: {e}"),
                    }
                } else {
                    println!("cancelled");
                }
            }
            other => {
                if let Err(e) = run_command(&mut session, other, rest).await {
                    eprintln!("error: {e}");
                }
            }
        }
    }

    session.disconnect();
    println!("Bye!");
    Ok(())
}

fn two_args(rest: &str) -> Option<(&str, &str)> {
    let (first, second) = rest.split_once(char::is_whitespace)?;
    let second = second.trim();
    (!second.is_empty()).then_some((first, second))
}

async fn run_command(session: &mut ClientSession, cmd: &str, rest: &str) -> ferry_fs::Result<()> {
    match cmd {
        "ls" => {
            let entries = session.list(rest).await?;
            if entries.is_empty() {
                println!("(empty)");
            }
            for entry in entries {
                let kind = if entry.is_dir() { "[dir] " } else { "[file]" };
                println!("{kind} {}", entry.name);
            }
        }
        "cd" => {
            if rest.is_empty() {
                println!("usage: cd <path>");
            } else {
                println!("now in {}", session.change_dir(rest).await?);
            }
        }
        "download" => match two_args(rest) {
            Some((remote, local)) => {
                let n = session.download(remote, local).await?;
                println!("downloaded {n} bytes to {local}");
            }
            None => println!("usage: download <remote> <local>"),
        },
        "upload" => match two_args(rest) {
            Some((local, remote)) => {
                let n = session.upload(local, remote).await?;
                println!("uploaded {n} bytes to {}", session.resolve(remote));
            }
            None => println!("usage: upload <local> <remote>"),
        },
        "mkdir" => {
            if rest.is_empty() {
                println!("usage: mkdir <path>");
            } else {
                session.mkdir(rest).await?;
                println!("created {}", session.resolve(rest));
            }
        }
        "rename" => match two_args(rest) {
            Some((from, to)) => {
                session.rename(from, to).await?;
                println!("renamed {} -> {}", session.resolve(from), session.resolve(to));
            }
            None => println!("usage: rename <old> <new>"),
        },
        _ => println!("unknown command: {cmd} (try 'help')"),
    }
    Ok(())
}
