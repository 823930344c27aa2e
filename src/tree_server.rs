// This Source Code Form is subject to the terms of the GNU General Public
// License, version 3. If a copy of the GPL was not distributed with this file,
// You can obtain one at https://www.gnu.org/licenses/gpl.txt.
//! The single logical task that owns the tree, the dependency graph, and the
//! subscription index. Sessions forward requests through a serial mailbox;
//! each request runs to completion, events included, before its reply is
//! sent, so queue order is the global mutation order.
use crate::subscriptions::Subscriptions;
use crate::{ConnectionId, SubscriptionId};
use bytes::Bytes;
use failure::{err_msg, Fallible};
use log::{debug, info};
use oh_shared::messages::{NodeType, Request, Response};
use tokio::sync::mpsc::{channel, Sender, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::{spawn, JoinHandle};
use yggdrasil::{Glob, Path, PathBuilder, Tree, TreeResult};

enum TreeProtocol {
    Handle {
        conn: ConnectionId,
        request: Request,
        sink: UnboundedSender<Bytes>,
        reply: oneshot::Sender<Response>,
    },
    RemoveConnection(ConnectionId),
    Finish,
}

// Convert an engine error into the in-band error response.
macro_rules! try_error {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => {
                return Response::Error {
                    name: e.name().to_owned(),
                    context: e.context().to_owned(),
                };
            }
        }
    };
}

struct Worker {
    tree: Tree,
    subscriptions: Subscriptions,
    last_subscription_id: u64,
}

impl Worker {
    fn new() -> Worker {
        Worker {
            tree: Tree::new(),
            subscriptions: Subscriptions::new(),
            last_subscription_id: 0,
        }
    }

    fn parse_path(raw: &str) -> TreeResult<Path> {
        PathBuilder::new(raw)?.finish_path()
    }

    fn parse_glob(raw: &str) -> TreeResult<Glob> {
        PathBuilder::new(raw)?.finish_glob()
    }

    fn handle_request(
        &mut self,
        conn: ConnectionId,
        request: Request,
        sink: UnboundedSender<Bytes>,
    ) -> Response {
        match request {
            Request::Ping { data } => {
                info!("handling Ping -> {}", data);
                Response::Pong { data }
            }
            Request::CreateNode {
                parent,
                name,
                node_type,
            } => self.handle_create_node(&parent, &name, node_type),
            Request::CreateFormula {
                parent,
                name,
                inputs,
                expression,
            } => self.handle_create_formula(&parent, &name, &inputs, &expression),
            Request::RemoveNode { parent, name } => self.handle_remove_node(&parent, &name),
            Request::ListDirectory { path } => self.handle_list_directory(&path),
            Request::GetFileContent { path } => self.handle_get_file_content(&path),
            Request::GetMatchingFiles { glob } => self.handle_get_matching_files(&glob),
            Request::SetFileContent { glob, data } => self.handle_set_file_content(&glob, &data),
            Request::Subscribe { glob } => self.handle_subscribe(conn, &glob, sink),
            Request::Unsubscribe { subscription_id } => self.handle_unsubscribe(subscription_id),
        }
    }

    fn handle_create_node(&mut self, parent: &str, name: &str, node_type: NodeType) -> Response {
        info!(
            "handling CreateNode -> parent: {}, name: {}, type: {}",
            parent,
            name,
            node_type.as_str()
        );
        let parent = try_error!(Self::parse_path(parent));
        match node_type {
            NodeType::Directory => try_error!(self.tree.create_directory(&parent, name)),
            NodeType::File => try_error!(self.tree.create_file(&parent, name)),
        }
        Response::Ok
    }

    fn handle_create_formula(
        &mut self,
        parent: &str,
        name: &str,
        inputs: &[(String, String)],
        expression: &str,
    ) -> Response {
        info!(
            "handling CreateFormula -> parent: {}, name: {}, expression: {}",
            parent, name, expression
        );
        let parent = try_error!(Self::parse_path(parent));
        let mut input_paths = Vec::new();
        for (param, raw_path) in inputs {
            let path = try_error!(Self::parse_path(raw_path));
            input_paths.push((param.clone(), path));
        }
        try_error!(self
            .tree
            .create_formula(&parent, name, &input_paths, expression));
        Response::Ok
    }

    fn handle_remove_node(&mut self, parent: &str, name: &str) -> Response {
        info!("handling RemoveNode -> parent: {}, name: {}", parent, name);
        let parent = try_error!(Self::parse_path(parent));
        // Refuse to orphan exact-path subscriptions before touching the tree.
        let path = try_error!(parent.slash(name));
        try_error!(self.subscriptions.verify_no_subscriptions_at_path(&path));
        try_error!(self.tree.remove_node(&parent, name));
        Response::Ok
    }

    fn handle_list_directory(&self, path: &str) -> Response {
        info!("handling ListDirectory -> path: {}", path);
        let path = try_error!(Self::parse_path(path));
        let names = try_error!(self.tree.list_directory(&path));
        Response::Children { names }
    }

    fn handle_get_file_content(&self, path: &str) -> Response {
        info!("handling GetFileContent -> path: {}", path);
        let path = try_error!(Self::parse_path(path));
        let data = try_error!(self.tree.get_data_at(&path));
        Response::Data { data }
    }

    fn handle_get_matching_files(&self, glob: &str) -> Response {
        info!("handling GetMatchingFiles -> glob: {}", glob);
        let glob = try_error!(Self::parse_glob(glob));
        let matching = try_error!(self.tree.get_data_matching(&glob));
        Response::Matches {
            matches: matching
                .into_iter()
                .map(|(path, data)| (path.to_str(), data))
                .collect(),
        }
    }

    fn handle_set_file_content(&mut self, glob: &str, data: &str) -> Response {
        info!("handling SetFileContent -> glob: {}", glob);
        let glob = try_error!(Self::parse_glob(glob));
        let changes = try_error!(self.tree.set_data_matching(&glob, data));
        self.subscriptions.distribute_changes(&changes);
        Response::Ok
    }

    fn handle_subscribe(
        &mut self,
        conn: ConnectionId,
        glob: &str,
        sink: UnboundedSender<Bytes>,
    ) -> Response {
        info!("handling Subscribe -> glob: {}", glob);
        let glob = try_error!(Self::parse_glob(glob));
        self.last_subscription_id += 1;
        let sid = SubscriptionId::from_u64(self.last_subscription_id);
        self.subscriptions.add_subscription(sid, conn, glob, sink);
        Response::Subscription {
            subscription_id: sid.to_u64(),
        }
    }

    fn handle_unsubscribe(&mut self, subscription_id: u64) -> Response {
        info!("handling Unsubscribe -> id: {}", subscription_id);
        let sid = SubscriptionId::from_u64(subscription_id);
        try_error!(self.subscriptions.remove_subscription(sid));
        Response::Ok
    }

    fn remove_connection(&mut self, conn: ConnectionId) {
        debug!("removing subscriptions for connection {}", conn);
        self.subscriptions.remove_connection(conn);
    }
}

pub struct TreeServer {
    task: JoinHandle<()>,
    mailbox: TreeMailbox,
}

impl TreeServer {
    pub fn launch() -> TreeServer {
        let (mailbox, mut mailbox_receiver) = channel(16);
        let task = spawn(async move {
            let mut worker = Worker::new();
            while let Some(message) = mailbox_receiver.recv().await {
                match message {
                    TreeProtocol::Handle {
                        conn,
                        request,
                        sink,
                        reply,
                    } => {
                        let response = worker.handle_request(conn, request, sink);
                        if reply.send(response).is_err() {
                            debug!("session {} hung up before its response", conn);
                        }
                    }
                    TreeProtocol::RemoveConnection(conn) => worker.remove_connection(conn),
                    TreeProtocol::Finish => break,
                }
            }
        });
        TreeServer {
            task,
            mailbox: TreeMailbox { mailbox },
        }
    }

    pub async fn join(self) -> Fallible<()> {
        self.task.await?;
        Ok(())
    }

    pub fn mailbox(&self) -> TreeMailbox {
        self.mailbox.clone()
    }
}

#[derive(Clone)]
pub struct TreeMailbox {
    mailbox: Sender<TreeProtocol>,
}

impl TreeMailbox {
    /// Apply one request to the tree and wait for its response. The effect,
    /// including any event enqueueing, is complete when this returns.
    pub async fn handle_request(
        &self,
        conn: ConnectionId,
        request: Request,
        sink: UnboundedSender<Bytes>,
    ) -> Fallible<Response> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(TreeProtocol::Handle {
                conn,
                request,
                sink,
                reply,
            })
            .await
            .map_err(|_| err_msg("tree server terminated"))?;
        Ok(response.await?)
    }

    pub async fn remove_connection(&self, conn: ConnectionId) -> Fallible<()> {
        self.mailbox
            .send(TreeProtocol::RemoveConnection(conn))
            .await
            .map_err(|_| err_msg("tree server terminated"))?;
        Ok(())
    }

    pub async fn finish(&self) -> Fallible<()> {
        self.mailbox
            .send(TreeProtocol::Finish)
            .await
            .map_err(|_| err_msg("tree server terminated"))?;
        Ok(())
    }
}
