// This Source Code Form is subject to the terms of the GNU General Public
// License, version 3. If a copy of the GPL was not distributed with this file,
// You can obtain one at https://www.gnu.org/licenses/gpl.txt.
use crate::errors::DatabaseError;
use crate::messages::{self, NodeType, Request, Response, ServerMessage};
use bytes::Bytes;
use failure::{bail, ensure, err_msg, Fallible};
use futures::{SinkExt, StreamExt};
use log::{error, warn};
use openssl::ssl::{SslConnector, SslFiletype, SslMethod};
use std::collections::HashMap;
use std::io;
use std::path::Path as FsPath;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tokio_openssl::SslStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// One coalesced notification: new value -> the matching paths that
/// acquired it.
pub type ChangeSet = HashMap<String, Vec<String>>;

struct TreeState {
    awaiting_response: HashMap<u64, oneshot::Sender<Response>>,
    subscriptions: HashMap<u64, mpsc::UnboundedSender<ChangeSet>>,
}

/// A connection to an oh_db tree. Requests are correlated by client-assigned
/// ids; subscription events are routed to per-subscription receivers by a
/// background listener task.
pub struct Tree {
    writer: mpsc::UnboundedSender<Bytes>,
    state: Arc<Mutex<TreeState>>,
    next_id: AtomicU64,
}

impl Tree {
    /// Establish the mutually-authenticated channel and verify it with a
    /// ping round-trip. Retries while the database is still coming up.
    pub async fn connect(
        address: &str,
        port: u16,
        ca_chain: &FsPath,
        certificate: &FsPath,
        private_key: &FsPath,
    ) -> Fallible<Tree> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())?;
        builder.set_ca_file(ca_chain)?;
        builder.set_certificate_chain_file(certificate)?;
        builder.set_private_key_file(private_key, SslFiletype::PEM)?;
        builder.check_private_key()?;
        let connector = builder.build();

        let tcp = loop {
            match TcpStream::connect((address, port)).await {
                Ok(tcp) => break tcp,
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    warn!("failed to connect to {}:{}, retrying in 0.5s", address, port);
                    sleep(Duration::from_millis(500)).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        // Certificate identity is by chain, not hostname.
        let mut config = connector.configure()?;
        config.set_verify_hostname(false);
        let ssl = config.into_ssl(address)?;
        let mut stream = SslStream::new(ssl, tcp)?;
        Pin::new(&mut stream).connect().await?;

        let tree = Tree::from_stream(stream);
        let pong = tree.ping("flimfniffle").await?;
        ensure!(pong == "flimfniffle", "bad pong during connection handshake");
        Ok(tree)
    }

    /// Wrap an established transport. Useful directly for tests; connect()
    /// layers TLS on top of this.
    pub fn from_stream<S>(stream: S) -> Tree
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let framed = Framed::new(stream, LengthDelimitedCodec::new());
        let (mut sink, mut source) = framed.split();

        let (writer, mut writer_rx) = mpsc::unbounded_channel::<Bytes>();
        tokio::spawn(async move {
            while let Some(frame) = writer_rx.recv().await {
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
            // Shut the write half down so the server observes EOF when this
            // Tree is dropped.
            sink.close().await.ok();
        });

        let state = Arc::new(Mutex::new(TreeState {
            awaiting_response: HashMap::new(),
            subscriptions: HashMap::new(),
        }));
        let listener_state = state.clone();
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("connection lost: {}", e);
                        break;
                    }
                };
                match messages::parse_server_message(&frame) {
                    Ok(ServerMessage::Response { id, response }) => {
                        let waiter = listener_state
                            .lock()
                            .unwrap()
                            .awaiting_response
                            .remove(&id);
                        match waiter {
                            Some(tx) => {
                                // The caller may have given up; that is fine.
                                tx.send(response).ok();
                            }
                            None => warn!("received response for unknown request: {}", id),
                        }
                    }
                    Ok(ServerMessage::Event(event)) => {
                        let state = listener_state.lock().unwrap();
                        match state.subscriptions.get(&event.subscription_id) {
                            Some(tx) => {
                                let changes =
                                    event.changes.into_iter().collect::<ChangeSet>();
                                tx.send(changes).ok();
                            }
                            None => warn!(
                                "received event for unknown subscription: {}",
                                event.subscription_id
                            ),
                        }
                    }
                    Err(e) => {
                        error!("unparseable server message: {}", e);
                        break;
                    }
                }
            }
        });

        Tree {
            writer,
            state,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, request: Request) -> Fallible<Response> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.state
            .lock()
            .unwrap()
            .awaiting_response
            .insert(id, tx);
        self.writer
            .send(messages::encode_request(id, &request))
            .map_err(|_| err_msg("connection closed"))?;
        let response = rx.await?;
        match response {
            Response::Error { name, context } => {
                Err(DatabaseError::from_wire(&name, &context).into())
            }
            response => Ok(response),
        }
    }

    pub async fn ping(&self, data: &str) -> Fallible<String> {
        match self
            .call(Request::Ping {
                data: data.to_owned(),
            })
            .await?
        {
            Response::Pong { data } => Ok(data),
            response => bail!("unexpected response to Ping: {:?}", response),
        }
    }

    pub async fn create_directory(&self, parent: &str, name: &str) -> Fallible<()> {
        self.create_node(NodeType::Directory, parent, name).await
    }

    pub async fn create_file(&self, parent: &str, name: &str) -> Fallible<()> {
        self.create_node(NodeType::File, parent, name).await
    }

    pub async fn create_node(
        &self,
        node_type: NodeType,
        parent: &str,
        name: &str,
    ) -> Fallible<()> {
        self.expect_ok(Request::CreateNode {
            parent: parent.to_owned(),
            name: name.to_owned(),
            node_type,
        })
        .await
    }

    pub async fn create_formula(
        &self,
        parent: &str,
        name: &str,
        inputs: &[(&str, &str)],
        expression: &str,
    ) -> Fallible<()> {
        self.expect_ok(Request::CreateFormula {
            parent: parent.to_owned(),
            name: name.to_owned(),
            inputs: inputs
                .iter()
                .map(|(param, path)| ((*param).to_owned(), (*path).to_owned()))
                .collect(),
            expression: expression.to_owned(),
        })
        .await
    }

    pub async fn remove_node(&self, parent: &str, name: &str) -> Fallible<()> {
        self.expect_ok(Request::RemoveNode {
            parent: parent.to_owned(),
            name: name.to_owned(),
        })
        .await
    }

    pub async fn list_directory(&self, path: &str) -> Fallible<Vec<String>> {
        match self
            .call(Request::ListDirectory {
                path: path.to_owned(),
            })
            .await?
        {
            Response::Children { names } => Ok(names),
            response => bail!("unexpected response to ListDirectory: {:?}", response),
        }
    }

    pub async fn get_file(&self, path: &str) -> Fallible<String> {
        match self
            .call(Request::GetFileContent {
                path: path.to_owned(),
            })
            .await?
        {
            Response::Data { data } => Ok(data),
            response => bail!("unexpected response to GetFileContent: {:?}", response),
        }
    }

    pub async fn get_matching_files(&self, glob: &str) -> Fallible<HashMap<String, String>> {
        match self
            .call(Request::GetMatchingFiles {
                glob: glob.to_owned(),
            })
            .await?
        {
            Response::Matches { matches } => Ok(matches.into_iter().collect()),
            response => bail!("unexpected response to GetMatchingFiles: {:?}", response),
        }
    }

    pub async fn set_file(&self, path: &str, data: &str) -> Fallible<()> {
        self.set_matching_files(path, data).await
    }

    pub async fn set_matching_files(&self, glob: &str, data: &str) -> Fallible<()> {
        self.expect_ok(Request::SetFileContent {
            glob: glob.to_owned(),
            data: data.to_owned(),
        })
        .await
    }

    /// Register interest in content changes under the given glob. Events
    /// arrive on the returned receiver as coalesced change sets.
    pub async fn subscribe(
        &self,
        glob: &str,
    ) -> Fallible<(u64, mpsc::UnboundedReceiver<ChangeSet>)> {
        match self
            .call(Request::Subscribe {
                glob: glob.to_owned(),
            })
            .await?
        {
            Response::Subscription { subscription_id } => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.state
                    .lock()
                    .unwrap()
                    .subscriptions
                    .insert(subscription_id, tx);
                Ok((subscription_id, rx))
            }
            response => bail!("unexpected response to Subscribe: {:?}", response),
        }
    }

    pub async fn unsubscribe(&self, subscription_id: u64) -> Fallible<()> {
        self.expect_ok(Request::Unsubscribe { subscription_id })
            .await?;
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .remove(&subscription_id);
        Ok(())
    }

    async fn expect_ok(&self, request: Request) -> Fallible<()> {
        match self.call(request).await? {
            Response::Ok => Ok(()),
            response => bail!("unexpected response: {:?}", response),
        }
    }
}
