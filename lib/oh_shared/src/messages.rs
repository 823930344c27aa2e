// This Source Code Form is subject to the terms of the GNU General Public
// License, version 3. If a copy of the GPL was not distributed with this file,
// You can obtain one at https://www.gnu.org/licenses/gpl.txt.
//! The wire format shared by oh_db and its clients: length-delimited frames
//! carrying self-describing JSON records, parsed field by field so that
//! every protocol error is reportable in-band.
use bytes::Bytes;
use failure::{bail, ensure, err_msg, Fallible};
use json::JsonValue;
use std::fmt;
use std::str;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    IdOutOfRange(String),
    MissingField(String),
    UnknownMessageType(String),
    UnknownNodeType(String),
    WrongFieldType(String),
}

impl ParseError {
    /// The stable name reported on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ParseError::IdOutOfRange(_) => "IdOutOfRange",
            ParseError::MissingField(_) => "MissingField",
            ParseError::UnknownMessageType(_) => "UnknownMessageType",
            ParseError::UnknownNodeType(_) => "UnknownNodeType",
            ParseError::WrongFieldType(_) => "WrongFieldType",
        }
    }

    pub fn context(&self) -> &str {
        match self {
            ParseError::IdOutOfRange(ref context)
            | ParseError::MissingField(ref context)
            | ParseError::UnknownMessageType(ref context)
            | ParseError::UnknownNodeType(ref context)
            | ParseError::WrongFieldType(ref context) => context,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.context())
    }
}

impl ::failure::Fail for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

// Extract $field from $message and convert it with $conv, producing a
// ParseError if the field is absent or has the wrong type.
macro_rules! get_field {
    ($message:expr, $field:expr, $conv:ident) => {
        match $message[$field] {
            JsonValue::Null => return Err(ParseError::MissingField($field.to_owned())),
            ref value => match value.$conv() {
                Some(inner) => inner,
                None => return Err(ParseError::WrongFieldType($field.to_owned())),
            },
        }
    };
}

// Identifiers are unsigned; a numeric field that does not fit u64 is out of
// range rather than mistyped.
fn get_id_field(message: &JsonValue, field: &str) -> ParseResult<u64> {
    let value = &message[field];
    if value.is_null() {
        return Err(ParseError::MissingField(field.to_owned()));
    }
    if !value.is_number() {
        return Err(ParseError::WrongFieldType(field.to_owned()));
    }
    value
        .as_u64()
        .ok_or_else(|| ParseError::IdOutOfRange(field.to_owned()))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeType {
    Directory,
    File,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Directory => "directory",
            NodeType::File => "file",
        }
    }

    fn from_wire(s: &str) -> ParseResult<NodeType> {
        match s {
            "directory" => Ok(NodeType::Directory),
            "file" => Ok(NodeType::File),
            _ => Err(ParseError::UnknownNodeType(s.to_owned())),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    Ping {
        data: String,
    },
    CreateNode {
        parent: String,
        name: String,
        node_type: NodeType,
    },
    CreateFormula {
        parent: String,
        name: String,
        inputs: Vec<(String, String)>,
        expression: String,
    },
    RemoveNode {
        parent: String,
        name: String,
    },
    ListDirectory {
        path: String,
    },
    GetFileContent {
        path: String,
    },
    GetMatchingFiles {
        glob: String,
    },
    SetFileContent {
        glob: String,
        data: String,
    },
    Subscribe {
        glob: String,
    },
    Unsubscribe {
        subscription_id: u64,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    Ok,
    Pong { data: String },
    Children { names: Vec<String> },
    Data { data: String },
    Matches { matches: Vec<(String, String)> },
    Subscription { subscription_id: u64 },
    Error { name: String, context: String },
}

/// A coalesced notification: each new value maps to every matching path
/// that acquired it from a single write.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Event {
    pub subscription_id: u64,
    pub changes: Vec<(String, Vec<String>)>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ServerMessage {
    Response { id: u64, response: Response },
    Event(Event),
}

/// Decode one request frame. The outer error is fatal to the session (the
/// frame is not a JSON record or carries no usable id); the inner error is
/// returned to the client in-band.
pub fn parse_request(payload: &[u8]) -> Fallible<(u64, ParseResult<Request>)> {
    let message = json::parse(str::from_utf8(payload)?)?;
    let id = match get_id_field(&message, "id") {
        Ok(id) => id,
        Err(e) => bail!("unrecoverable request id: {}", e),
    };
    Ok((id, parse_request_body(&message)))
}

fn parse_request_body(message: &JsonValue) -> ParseResult<Request> {
    let message_type = get_field!(message, "type", as_str);
    match message_type {
        "Ping" => Ok(Request::Ping {
            data: get_field!(message, "data", as_str).to_owned(),
        }),
        "CreateNode" => Ok(Request::CreateNode {
            parent: get_field!(message, "parent", as_str).to_owned(),
            name: get_field!(message, "name", as_str).to_owned(),
            node_type: NodeType::from_wire(get_field!(message, "node_type", as_str))?,
        }),
        "CreateFormula" => {
            let inputs_field = &message["inputs"];
            if inputs_field.is_null() {
                return Err(ParseError::MissingField("inputs".to_owned()));
            }
            if !inputs_field.is_object() {
                return Err(ParseError::WrongFieldType("inputs".to_owned()));
            }
            let mut inputs = Vec::new();
            for (param, path) in inputs_field.entries() {
                match path.as_str() {
                    Some(path) => inputs.push((param.to_owned(), path.to_owned())),
                    None => return Err(ParseError::WrongFieldType("inputs".to_owned())),
                }
            }
            Ok(Request::CreateFormula {
                parent: get_field!(message, "parent", as_str).to_owned(),
                name: get_field!(message, "name", as_str).to_owned(),
                inputs,
                expression: get_field!(message, "expression", as_str).to_owned(),
            })
        }
        "RemoveNode" => Ok(Request::RemoveNode {
            parent: get_field!(message, "parent", as_str).to_owned(),
            name: get_field!(message, "name", as_str).to_owned(),
        }),
        "ListDirectory" => Ok(Request::ListDirectory {
            path: get_field!(message, "path", as_str).to_owned(),
        }),
        "GetFileContent" => Ok(Request::GetFileContent {
            path: get_field!(message, "path", as_str).to_owned(),
        }),
        "GetMatchingFiles" => Ok(Request::GetMatchingFiles {
            glob: get_field!(message, "glob", as_str).to_owned(),
        }),
        "SetFileContent" => Ok(Request::SetFileContent {
            glob: get_field!(message, "glob", as_str).to_owned(),
            data: get_field!(message, "data", as_str).to_owned(),
        }),
        "Subscribe" => Ok(Request::Subscribe {
            glob: get_field!(message, "glob", as_str).to_owned(),
        }),
        "Unsubscribe" => Ok(Request::Unsubscribe {
            subscription_id: get_id_field(message, "subscription_id")?,
        }),
        _ => Err(ParseError::UnknownMessageType(message_type.to_owned())),
    }
}

pub fn encode_request(id: u64, request: &Request) -> Bytes {
    let mut message = JsonValue::new_object();
    message["id"] = id.into();
    match request {
        Request::Ping { data } => {
            message["type"] = "Ping".into();
            message["data"] = data.as_str().into();
        }
        Request::CreateNode {
            parent,
            name,
            node_type,
        } => {
            message["type"] = "CreateNode".into();
            message["parent"] = parent.as_str().into();
            message["name"] = name.as_str().into();
            message["node_type"] = node_type.as_str().into();
        }
        Request::CreateFormula {
            parent,
            name,
            inputs,
            expression,
        } => {
            message["type"] = "CreateFormula".into();
            message["parent"] = parent.as_str().into();
            message["name"] = name.as_str().into();
            let mut input_map = JsonValue::new_object();
            for (param, path) in inputs {
                input_map[param.as_str()] = path.as_str().into();
            }
            message["inputs"] = input_map;
            message["expression"] = expression.as_str().into();
        }
        Request::RemoveNode { parent, name } => {
            message["type"] = "RemoveNode".into();
            message["parent"] = parent.as_str().into();
            message["name"] = name.as_str().into();
        }
        Request::ListDirectory { path } => {
            message["type"] = "ListDirectory".into();
            message["path"] = path.as_str().into();
        }
        Request::GetFileContent { path } => {
            message["type"] = "GetFileContent".into();
            message["path"] = path.as_str().into();
        }
        Request::GetMatchingFiles { glob } => {
            message["type"] = "GetMatchingFiles".into();
            message["glob"] = glob.as_str().into();
        }
        Request::SetFileContent { glob, data } => {
            message["type"] = "SetFileContent".into();
            message["glob"] = glob.as_str().into();
            message["data"] = data.as_str().into();
        }
        Request::Subscribe { glob } => {
            message["type"] = "Subscribe".into();
            message["glob"] = glob.as_str().into();
        }
        Request::Unsubscribe { subscription_id } => {
            message["type"] = "Unsubscribe".into();
            message["subscription_id"] = (*subscription_id).into();
        }
    }
    Bytes::from(message.dump().into_bytes())
}

pub fn encode_response(id: u64, response: &Response) -> Bytes {
    let mut message = JsonValue::new_object();
    message["id"] = id.into();
    match response {
        Response::Ok => {
            message["status"] = "Ok".into();
        }
        Response::Pong { data } => {
            message["status"] = "Ok".into();
            message["pong"] = data.as_str().into();
        }
        Response::Children { names } => {
            message["status"] = "Ok".into();
            message["children"] = JsonValue::Array(
                names.iter().map(|name| name.as_str().into()).collect(),
            );
        }
        Response::Data { data } => {
            message["status"] = "Ok".into();
            message["data"] = data.as_str().into();
        }
        Response::Matches { matches } => {
            message["status"] = "Ok".into();
            let mut match_map = JsonValue::new_object();
            for (path, data) in matches {
                match_map[path.as_str()] = data.as_str().into();
            }
            message["matches"] = match_map;
        }
        Response::Subscription { subscription_id } => {
            message["status"] = "Ok".into();
            message["subscription_id"] = (*subscription_id).into();
        }
        Response::Error { name, context } => {
            message["status"] = "Error".into();
            message["name"] = name.as_str().into();
            message["context"] = context.as_str().into();
        }
    }
    Bytes::from(message.dump().into_bytes())
}

pub fn encode_event(event: &Event) -> Bytes {
    let mut message = JsonValue::new_object();
    message["subscription_id"] = event.subscription_id.into();
    let mut changes = JsonValue::new_object();
    for (value, paths) in &event.changes {
        changes[value.as_str()] = JsonValue::Array(
            paths.iter().map(|path| path.as_str().into()).collect(),
        );
    }
    message["changes"] = changes;
    Bytes::from(message.dump().into_bytes())
}

/// Decode one frame arriving at a client. Responses carry an id; events
/// carry a subscription id and no request id.
pub fn parse_server_message(payload: &[u8]) -> Fallible<ServerMessage> {
    let message = json::parse(str::from_utf8(payload)?)?;
    if !message["id"].is_null() {
        let id = message["id"]
            .as_u64()
            .ok_or_else(|| err_msg("response id out of range"))?;
        let response = parse_response_body(&message)?;
        return Ok(ServerMessage::Response { id, response });
    }
    if !message["subscription_id"].is_null() {
        let subscription_id = message["subscription_id"]
            .as_u64()
            .ok_or_else(|| err_msg("event subscription id out of range"))?;
        let mut changes = Vec::new();
        for (value, paths) in message["changes"].entries() {
            let mut list = Vec::new();
            for path in paths.members() {
                list.push(
                    path.as_str()
                        .ok_or_else(|| err_msg("event path is not a string"))?
                        .to_owned(),
                );
            }
            changes.push((value.to_owned(), list));
        }
        return Ok(ServerMessage::Event(Event {
            subscription_id,
            changes,
        }));
    }
    bail!("server message is neither a response nor an event")
}

fn parse_response_body(message: &JsonValue) -> Fallible<Response> {
    let status = message["status"]
        .as_str()
        .ok_or_else(|| err_msg("response missing status"))?;
    if status == "Error" {
        return Ok(Response::Error {
            name: message["name"].as_str().unwrap_or("Unknown").to_owned(),
            context: message["context"].as_str().unwrap_or("").to_owned(),
        });
    }
    ensure!(status == "Ok", "unknown response status: {}", status);

    if !message["pong"].is_null() {
        let data = message["pong"]
            .as_str()
            .ok_or_else(|| err_msg("pong is not a string"))?
            .to_owned();
        return Ok(Response::Pong { data });
    }
    if !message["children"].is_null() {
        let mut names = Vec::new();
        for name in message["children"].members() {
            names.push(
                name.as_str()
                    .ok_or_else(|| err_msg("child name is not a string"))?
                    .to_owned(),
            );
        }
        return Ok(Response::Children { names });
    }
    if !message["data"].is_null() {
        let data = message["data"]
            .as_str()
            .ok_or_else(|| err_msg("data is not a string"))?
            .to_owned();
        return Ok(Response::Data { data });
    }
    if !message["matches"].is_null() {
        let mut matches = Vec::new();
        for (path, data) in message["matches"].entries() {
            matches.push((
                path.to_owned(),
                data.as_str()
                    .ok_or_else(|| err_msg("match data is not a string"))?
                    .to_owned(),
            ));
        }
        return Ok(Response::Matches { matches });
    }
    if !message["subscription_id"].is_null() {
        let subscription_id = message["subscription_id"]
            .as_u64()
            .ok_or_else(|| err_msg("subscription id out of range"))?;
        return Ok(Response::Subscription { subscription_id });
    }
    Ok(Response::Ok)
}
