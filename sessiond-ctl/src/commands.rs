//! Command implementations

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use sessiond_protocol::{StreamMessage, StreamMessageType};
use sessiond_utils::{Result, SessiondError};

use crate::cli::Command;
use crate::client::{Client, Stream};

/// Execute a CLI command, returning the process exit code
pub async fn execute(command: Command, client: &Client, json: bool) -> Result<i32> {
    match command {
        Command::Ping => {
            client.ping().await?;
            println!("ok");
        }

        Command::Create { session_id, cwd } => {
            let created = client.create(&session_id, &cwd).await?;
            if json {
                print_json(&created)?;
            } else if created.existing {
                println!("{} (existing)", created.session_id);
            } else {
                println!("{}", created.session_id);
            }
        }

        Command::Send {
            session_id,
            mut data,
            owner,
            enter,
        } => {
            if enter {
                data.push('\r');
            }
            client.send(&session_id, &data, &owner).await?;
        }

        Command::Resize {
            session_id,
            cols,
            rows,
        } => client.resize(&session_id, cols, rows).await?,

        Command::Stop { session_id } => client.stop(&session_id).await?,

        Command::Backlog { session_id, since } => {
            let backlog = client.backlog(&session_id, since).await?;
            if json {
                print_json(&backlog)?;
            } else {
                print!("{}", backlog.data);
            }
        }

        Command::Snapshot { session_id } => {
            let snapshot = client.snapshot(&session_id).await?;
            if json {
                print_json(&snapshot)?;
            } else {
                print!("{}", snapshot.data);
            }
        }

        Command::Bootstrap { session_id } => {
            let bootstrap = client.bootstrap(&session_id).await?;
            if json {
                print_json(&bootstrap)?;
            } else {
                print!("{}", bootstrap.replay_text());
            }
        }

        Command::Ack {
            session_id,
            stream_id,
            bytes,
        } => client.ack(&session_id, &stream_id, bytes).await?,

        Command::List => {
            let sessions = client.list().await?;
            if json {
                print_json(&sessions)?;
            } else {
                for s in sessions {
                    let state = if s.running { "running" } else { "stopped" };
                    println!("{}\t{}\t{}\t{}", s.session_id, state, s.last_active, s.cwd);
                }
            }
        }

        Command::Info => {
            let info = client.info().await?;
            if json {
                print_json(&info)?;
            } else {
                println!("{}\t{}", info.executable, info.binary_hash);
            }
        }

        Command::SetOwner { session_id, owner } => {
            let owner = client.set_owner(&session_id, &owner).await?;
            println!("{}", owner);
        }

        Command::GetOwner { session_id } => {
            let owner = client.get_owner(&session_id).await?;
            println!("{}", owner);
        }

        Command::Attach {
            session_id,
            stream_id,
            since,
            no_buffer,
        } => {
            let mut stream = client
                .attach(&session_id, &stream_id, since, !no_buffer)
                .await?;
            let mut stdout = tokio::io::stdout();
            return pump(client, &session_id, &mut stream, &mut stdout).await;
        }

        Command::Shutdown { reason } => client.shutdown_with_reason("sessiond-ctl", &reason).await?,
    }
    Ok(0)
}

/// Copy stream data to `out`, returning credit for every live chunk
async fn pump<W: AsyncWrite + Unpin>(
    client: &Client,
    session_id: &str,
    stream: &mut Stream,
    out: &mut W,
) -> Result<i32> {
    while let Some(msg) = stream.next().await {
        let msg = msg?;
        match msg.kind {
            StreamMessageType::Data => {
                let data = decode(&msg)?;
                out.write_all(&data).await?;
                out.flush().await?;
                if msg.source.is_empty() {
                    if let Err(e) = client.ack(session_id, stream.id(), data.len() as i64).await {
                        warn!(error = %e, "ack failed");
                    }
                }
            }
            StreamMessageType::Bootstrap => {
                if let Some(bootstrap) = &msg.bootstrap {
                    debug!(
                        initial_credit = bootstrap.initial_credit,
                        next_offset = bootstrap.next_offset,
                        "bootstrap"
                    );
                }
            }
            StreamMessageType::Closed => {
                eprintln!("[session {} closed]", session_id);
                return Ok(0);
            }
            StreamMessageType::Error => {
                eprintln!("{}", msg.error);
                return Ok(1);
            }
            StreamMessageType::BootstrapDone
            | StreamMessageType::Kitty
            | StreamMessageType::Modes => {}
        }
    }
    Err(SessiondError::ConnectionClosed)
}

fn decode(msg: &StreamMessage) -> Result<Vec<u8>> {
    msg.decode_data()
        .map_err(|e| SessiondError::protocol(format!("bad data payload: {}", e)))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| SessiondError::internal(format!("encode output: {}", e)))?;
    println!("{}", text);
    Ok(())
}
