//! Minimal PostgreSQL backend for session tests.
//!
//! Speaks just enough of the wire protocol for `tokio-postgres`: every
//! startup is trusted, every simple query gets an empty `CommandComplete`,
//! and notifications are pushed on request through a [`Backend`] handle.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Control {
    silent: AtomicBool,
    reject: AtomicUsize,
    accepted: AtomicUsize,
}

pub(crate) struct TestServer {
    port: u16,
    control: Arc<Control>,
    backends: mpsc::UnboundedReceiver<Backend>,
    task: JoinHandle<()>,
}

enum Command {
    Notify { channel: String, payload: String },
    Stall,
    Terminate,
}

/// Handle on one accepted client connection.
pub(crate) struct Backend {
    commands: mpsc::UnboundedSender<Command>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let control = Arc::new(Control::default());
        let (tx, backends) = mpsc::unbounded_channel();

        let shared = Arc::clone(&control);
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                shared.accepted.fetch_add(1, Ordering::SeqCst);

                if shared.silent.load(Ordering::SeqCst) {
                    held.push(socket);
                    continue;
                }
                let rejected = shared
                    .reject
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if rejected {
                    drop(socket);
                    continue;
                }

                let (commands, rx) = mpsc::unbounded_channel();
                tokio::spawn(serve(socket, rx));
                let _ = tx.send(Backend { commands });
            }
        });

        Self {
            port,
            control,
            backends,
            task,
        }
    }

    /// A server that accepts sockets and never answers the startup message.
    pub async fn silent() -> Self {
        let server = Self::start().await;
        server.control.silent.store(true, Ordering::SeqCst);
        server
    }

    pub fn connection_string(&self) -> String {
        format!(
            "host=127.0.0.1 port={} user=postgres sslmode=disable",
            self.port
        )
    }

    /// Drops the next `n` sockets right after accepting them.
    pub fn reject_next(&self, n: usize) {
        self.control.reject.store(n, Ordering::SeqCst);
    }

    pub fn accepted(&self) -> usize {
        self.control.accepted.load(Ordering::SeqCst)
    }

    pub async fn backend(&mut self) -> Backend {
        tokio::time::timeout(Duration::from_secs(5), self.backends.recv())
            .await
            .expect("no client connected")
            .expect("server stopped")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Backend {
    pub fn notify(&self, channel: &str, payload: &str) {
        let _ = self.commands.send(Command::Notify {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
    }

    /// Stops answering queries while keeping the socket open.
    pub fn stall(&self) {
        let _ = self.commands.send(Command::Stall);
    }

    /// Closes the socket from the server side.
    pub fn terminate(&self) {
        let _ = self.commands.send(Command::Terminate);
    }
}

async fn serve(mut socket: TcpStream, mut commands: mpsc::UnboundedReceiver<Command>) {
    if handshake(&mut socket).await.is_err() {
        return;
    }

    let (mut reader, mut writer) = socket.into_split();
    let (tags_tx, mut tags) = mpsc::unbounded_channel();
    let reader_task = tokio::spawn(async move {
        while let Ok(tag) = read_tag(&mut reader).await {
            if tags_tx.send(tag).is_err() {
                return;
            }
        }
    });

    let mut stalled = false;
    let mut commands_open = true;
    loop {
        // Commands first so a stall issued before a query always applies to it.
        let reply = tokio::select! {
            biased;

            command = commands.recv(), if commands_open => match command {
                Some(Command::Notify { channel, payload }) => notification(&channel, &payload),
                Some(Command::Stall) => {
                    stalled = true;
                    continue;
                }
                Some(Command::Terminate) => break,
                None => {
                    commands_open = false;
                    continue;
                }
            },
            tag = tags.recv() => match tag {
                Some(b'Q') if !stalled => query_done(),
                Some(b'X') | None => break,
                Some(_) => continue,
            },
        };

        if writer.write_all(&reply).await.is_err() {
            break;
        }
    }

    reader_task.abort();
}

async fn handshake(socket: &mut TcpStream) -> std::io::Result<()> {
    // Untagged startup message: length, protocol version, parameters.
    let len = socket.read_i32().await?;
    let mut body = vec![0; (len as usize).saturating_sub(4)];
    socket.read_exact(&mut body).await?;

    let mut reply = Vec::new();
    message(&mut reply, b'R', &0i32.to_be_bytes());
    message(&mut reply, b'Z', b"I");
    socket.write_all(&reply).await
}

async fn read_tag(reader: &mut OwnedReadHalf) -> std::io::Result<u8> {
    let tag = reader.read_u8().await?;
    let len = reader.read_i32().await?;
    let mut body = vec![0; (len as usize).saturating_sub(4)];
    reader.read_exact(&mut body).await?;
    Ok(tag)
}

fn query_done() -> Vec<u8> {
    let mut reply = Vec::new();
    message(&mut reply, b'C', b"SELECT 1\0");
    message(&mut reply, b'Z', b"I");
    reply
}

fn notification(channel: &str, payload: &str) -> Vec<u8> {
    let mut body = 1i32.to_be_bytes().to_vec();
    body.extend_from_slice(channel.as_bytes());
    body.push(0);
    body.extend_from_slice(payload.as_bytes());
    body.push(0);

    let mut reply = Vec::new();
    message(&mut reply, b'A', &body);
    reply
}

fn message(buf: &mut Vec<u8>, tag: u8, body: &[u8]) {
    buf.push(tag);
    buf.extend_from_slice(&(body.len() as i32 + 4).to_be_bytes());
    buf.extend_from_slice(body);
}
