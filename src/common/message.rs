use anyhow::{anyhow, bail, Context, Result};
use chrono::TimeDelta;

use crate::common::duration::{format_duration, parse_duration};
use crate::common::node::Endpoint;

pub const GET_CURRENT_TIME: &str = "getCurrentTime";
pub const SET_OFFSET: &str = "setOffset";

pub const CLIENT_ADDED: &str = "Client added";
pub const CLIENT_ALREADY_EXISTS: &str = "Client already exists";
pub const INVALID_MESSAGE: &str = "Invalid message";

/// Commands a node accepts from the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRequest {
    GetCurrentTime,
    SetOffset(TimeDelta),
}

impl NodeRequest {
    pub fn parse(line: &str) -> Result<Self> {
        if line == GET_CURRENT_TIME {
            return Ok(NodeRequest::GetCurrentTime);
        }
        match line.split_once(' ') {
            Some((SET_OFFSET, value)) => {
                let delta = parse_duration(value).context("invalid setOffset argument")?;
                Ok(NodeRequest::SetOffset(delta))
            }
            _ => bail!("unknown request {:?}", line),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            NodeRequest::GetCurrentTime => GET_CURRENT_TIME.to_string(),
            NodeRequest::SetOffset(delta) => format!("{} {}", SET_OFFSET, format_duration(*delta)),
        }
    }
}

/// Announcement a node sends to the coordinator: `<id> <address> <port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: String,
    pub endpoint: Endpoint,
}

impl Registration {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split(' ');
        let (Some(id), Some(address), Some(port), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            bail!("expected `<id> <address> <port>`, got {:?}", line);
        };
        if id.is_empty() || address.is_empty() {
            bail!("empty field in registration {:?}", line);
        }
        let port: u16 = port
            .parse()
            .map_err(|_| anyhow!("invalid port {:?} in registration", port))?;
        Ok(Registration {
            id: id.to_string(),
            endpoint: Endpoint::new(address, port),
        })
    }

    pub fn encode(&self) -> String {
        format!("{} {} {}", self.id, self.endpoint.address, self.endpoint.port)
    }
}

/// Coordinator's answer to a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationReply {
    Added,
    AlreadyExists,
    Invalid,
}

impl RegistrationReply {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationReply::Added => CLIENT_ADDED,
            RegistrationReply::AlreadyExists => CLIENT_ALREADY_EXISTS,
            RegistrationReply::Invalid => INVALID_MESSAGE,
        }
    }

    pub fn parse(line: &str) -> Result<Self> {
        match line {
            CLIENT_ADDED => Ok(RegistrationReply::Added),
            CLIENT_ALREADY_EXISTS => Ok(RegistrationReply::AlreadyExists),
            INVALID_MESSAGE => Ok(RegistrationReply::Invalid),
            other => bail!("unexpected registration reply {:?}", other),
        }
    }
}
