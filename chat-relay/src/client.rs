use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpStream, tcp::OwnedReadHalf},
    select,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
    cli::ClientArgs,
    console::ConsoleCommand,
    control::{self, LIST, QUIT},
    frame::{Frame, MAX_PAYLOAD, SERVER_ID, read_frame},
    registry::ConnectionHandle,
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let (reader, connection) = establish_connection(&args).await?;
    send_handshake(&connection, &args.id).await?;
    write_stdout(&format!("*** connected as {}", args.id)).await?;

    let mut listener = tokio::spawn(listen_for_frames(reader));
    let heartbeat = args
        .heartbeat_interval()
        .map(|interval| spawn_heartbeat(connection.clone(), args.id.clone(), interval));

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    let outcome =
        run_client_loop(&mut listener, &connection, &args.id, &mut stdin, &mut input).await;

    listener.abort();
    if let Some(heartbeat) = heartbeat {
        heartbeat.abort();
    }
    shutdown_connection(&connection).await;

    outcome
}

async fn establish_connection(args: &ClientArgs) -> Result<(OwnedReadHalf, ConnectionHandle)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let peer = stream.peer_addr().ok();
    let (reader, writer) = stream.into_split();
    Ok((reader, ConnectionHandle::new(writer, peer)))
}

async fn send_handshake(connection: &ConnectionHandle, id: &str) -> Result<()> {
    connection
        .send(&Frame::new(SERVER_ID, id, control::connect_payload(id)))
        .await
        .context("failed to register with relay")
}

fn spawn_heartbeat(connection: ConnectionHandle, id: String, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let alive = Frame::new(SERVER_ID, id.as_str(), control::alive_payload(&id));
        loop {
            ticker.tick().await;
            if let Err(error) = connection.send(&alive).await {
                debug!(?error, "heartbeat failed, stopping");
                break;
            }
        }
    })
}

async fn run_client_loop(
    listener: &mut JoinHandle<io::Result<()>>,
    connection: &ConnectionHandle,
    id: &str,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
) -> Result<()> {
    loop {
        input.clear();
        select! {
            finished = &mut *listener => {
                finished.context("frame listener panicked")??;
                break;
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, connection, id).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                send_quit(connection, id).await?;
                break;
            }
        }
    }
    Ok(())
}

/// Reads frames from the relay and prints them until the stream ends.
async fn listen_for_frames(mut reader: OwnedReadHalf) -> io::Result<()> {
    while let Some(frame) = read_frame(&mut reader).await? {
        render_frame(&frame).await?;
    }
    write_stdout("*** relay closed the connection").await
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    connection: &ConnectionHandle,
    id: &str,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        send_quit(connection, id).await?;
        return Ok(false);
    }

    if input.trim().is_empty() {
        return Ok(true);
    }

    match ConsoleCommand::parse(input) {
        Ok(ConsoleCommand::Send { to, text }) => {
            if text.len() > MAX_PAYLOAD {
                write_stderr(&format!(
                    "!!! message longer than {MAX_PAYLOAD} bytes, sending the first {MAX_PAYLOAD}"
                ))
                .await?;
            }
            connection.send(&Frame::new(to, id, text)).await?;
        }
        Ok(ConsoleCommand::List) => {
            connection.send(&Frame::new(SERVER_ID, id, LIST)).await?;
        }
        Ok(ConsoleCommand::Quit) => {
            write_stdout("*** leaving chat").await?;
            send_quit(connection, id).await?;
            return Ok(false);
        }
        Err(err) => write_stderr(&format!("!!! {err}")).await?,
    }
    Ok(true)
}

async fn send_quit(connection: &ConnectionHandle, id: &str) -> Result<()> {
    connection
        .send(&Frame::new(SERVER_ID, id, QUIT))
        .await
        .context("failed to send quit")
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(connection: &ConnectionHandle) {
    if let Err(error) = connection.close().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn render_frame(frame: &Frame) -> io::Result<()> {
    if frame.payload.is_empty() {
        return Ok(());
    }
    if frame.is_from_server() {
        write_stdout(&format!("*** {}", frame.payload)).await
    } else {
        write_stdout(&format!("<{}> {}", frame.source, frame.payload)).await
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
