//! Line transports
//!
//! Both transports stop on end of input or when the shutdown channel
//! flips to true; a request being handled is always answered first.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;

use super::handler::LibraryService;
use crate::observability::{log_event_with_fields, Event};

/// Answer each line of `reader` on `writer` until EOF or shutdown.
pub async fn serve_lines<R, W>(
    reader: R,
    mut writer: W,
    service: &LibraryService,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };
        let Some(line) = line else {
            break;
        };

        let reply = service.handle_line(&line).await;
        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Accept connections until shutdown, one task per connection.
pub async fn serve_tcp(
    listener: TcpListener,
    service: Arc<LibraryService>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let local = listener.local_addr()?.to_string();
    log_event_with_fields(Event::Serving, &[("listen_addr", &local)]);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    let service = Arc::clone(&service);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        let (read, write) = stream.into_split();
                        if let Err(e) = serve_lines(BufReader::new(read), write, &service, shutdown).await {
                            log_event_with_fields(
                                Event::ListenerError,
                                &[("error", &e.to_string()), ("peer", &peer.to_string())],
                            );
                        }
                    });
                }
                Err(e) => {
                    log_event_with_fields(Event::ListenerError, &[("error", &e.to_string())]);
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    Ok(())
}
