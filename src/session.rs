// This Source Code Form is subject to the terms of the GNU General Public
// License, version 3. If a copy of the GPL was not distributed with this file,
// You can obtain one at https://www.gnu.org/licenses/gpl.txt.
//! One task per authenticated connection. The reader half decodes frames
//! and forwards requests to the tree task, awaiting each reply before the
//! next read so responses keep arrival order; a writer task drains a single
//! queue shared by responses and subscription events.
use crate::tree_server::TreeMailbox;
use crate::ConnectionId;
use bytes::Bytes;
use failure::Fallible;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use oh_shared::messages::{self, Response};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

pub async fn run<S>(stream: S, conn: ConnectionId, tree: TreeMailbox) -> Fallible<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let framed = Framed::new(stream, LengthDelimitedCodec::new());
    let (mut sink, mut source) = framed.split();

    let (writer, mut writer_rx) = unbounded_channel::<Bytes>();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = writer_rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
        // Shut the write half down so the peer observes EOF.
        sink.close().await.ok();
    });

    while let Some(frame) = source.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!("session {}: closing after framing failure: {}", conn, e);
                break;
            }
        };
        // A frame we cannot correlate is fatal; anything else goes back to
        // the client as an in-band error.
        let (id, parsed) = match messages::parse_request(&frame) {
            Ok(pair) => pair,
            Err(e) => {
                warn!("session {}: closing after protocol failure: {}", conn, e);
                break;
            }
        };
        let response = match parsed {
            Ok(request) => tree.handle_request(conn, request, writer.clone()).await?,
            Err(e) => Response::Error {
                name: e.name().to_owned(),
                context: e.context().to_owned(),
            },
        };
        if writer.send(messages::encode_response(id, &response)).is_err() {
            break;
        }
    }

    info!("session {}: disconnected", conn);
    tree.remove_connection(conn).await?;
    drop(writer);
    // The writer drains once the tree task drops this session's event sinks.
    writer_task.await?;
    Ok(())
}
