use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::{Framed, LinesCodec};

use crate::common::node::Endpoint;
use crate::traits::line_handler::LineHandler;

const MAX_LINE_LENGTH: usize = 1024;

pub type LineStream = Framed<TcpStream, LinesCodec>;

/// Limits applied to every connection of an accept loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServeOptions {
    /// `None` blocks indefinitely on a silent peer.
    pub io_timeout: Option<Duration>,
    /// `None` spawns one task per connection without bound.
    pub max_connections: Option<usize>,
}

async fn bounded<T, F>(io_timeout: Option<Duration>, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match io_timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| anyhow!("{} timed out after {:?}", what, limit))?,
        None => fut.await,
    }
}

pub async fn connect(endpoint: &Endpoint, io_timeout: Option<Duration>) -> Result<LineStream> {
    let stream = bounded(io_timeout, "connect", async {
        TcpStream::connect((endpoint.address.as_str(), endpoint.port))
            .await
            .with_context(|| format!("failed to connect to {}", endpoint))
    })
    .await?;
    Ok(Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)))
}

pub async fn write_line(stream: &mut LineStream, line: &str, io_timeout: Option<Duration>) -> Result<()> {
    bounded(io_timeout, "write", async {
        stream.send(line).await.context("failed to send line")?;
        Ok(())
    })
    .await
}

/// Read one line; a peer that closes before sending one is an error.
pub async fn read_line(stream: &mut LineStream, io_timeout: Option<Duration>) -> Result<String> {
    bounded(io_timeout, "read", async {
        match stream.next().await {
            Some(line) => line.context("failed to read line"),
            None => Err(anyhow!("connection closed before a line was received")),
        }
    })
    .await
}

/// Connect, send `line` and wait for the single-line reply.
pub async fn request(endpoint: &Endpoint, line: &str, io_timeout: Option<Duration>) -> Result<String> {
    let mut stream = connect(endpoint, io_timeout).await?;
    write_line(&mut stream, line, io_timeout).await?;
    read_line(&mut stream, io_timeout).await
}

/// Accept forever, handling each connection on its own task.
pub async fn serve<H>(listener: TcpListener, handler: Arc<H>, options: ServeOptions)
where
    H: LineHandler + Sync + 'static,
{
    let permits = options.max_connections.map(|n| Arc::new(Semaphore::new(n)));
    loop {
        log::debug!("Wait for request...");
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                log::error!("Failed to accept connection: {:?}", e);
                continue;
            }
        };

        let permit = match &permits {
            Some(semaphore) => match semaphore.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => continue,
            },
            None => None,
        };

        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, remote, handler.as_ref(), options.io_timeout).await {
                log::warn!("Connection from {} failed: {:?}", remote, e);
            }
            drop(permit);
        });
    }
}

// One line in, at most one line out, then close.
async fn handle_connection<H>(
    stream: TcpStream,
    remote: SocketAddr,
    handler: &H,
    io_timeout: Option<Duration>,
) -> Result<()>
where
    H: LineHandler,
{
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let line = read_line(&mut framed, io_timeout).await?;
    log::debug!("Request from {}: {:?}", remote, line);

    if let Some(reply) = handler.handle_line(&line).await {
        write_line(&mut framed, &reply, io_timeout).await?;
    }
    Ok(())
}
