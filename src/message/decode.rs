//! Decode Bolt messages from PackStream bytes.

use super::{sig, ServerMessage};
#[cfg(test)]
use super::ClientMessage;
use crate::error::BoltError;
use crate::packstream::decode::{decode_struct_header, decode_value};
use crate::types::{BoltDict, BoltValue};

/// Decodes a server message. This is the hot path of every connection's
/// reader task.
pub fn decode_server_message(data: &[u8]) -> Result<ServerMessage, BoltError> {
    let mut fields = Fields::read(data)?;
    match fields.tag {
        sig::SUCCESS => Ok(ServerMessage::Success {
            metadata: fields.dict("SUCCESS")?,
        }),
        sig::RECORD => Ok(ServerMessage::Record {
            data: fields.list("RECORD")?,
        }),
        sig::FAILURE => Ok(ServerMessage::Failure {
            metadata: fields.dict("FAILURE")?,
        }),
        sig::IGNORED => Ok(ServerMessage::Ignored),
        tag => Err(BoltError::Protocol(format!(
            "unknown server message tag: 0x{tag:02X}"
        ))),
    }
}

/// Decodes a client message. Only the test stub server needs this direction.
#[cfg(test)]
pub(crate) fn decode_client_message(data: &[u8]) -> Result<ClientMessage, BoltError> {
    let mut fields = Fields::read(data)?;
    let msg = match (fields.tag, fields.count) {
        (sig::INIT, 2) => ClientMessage::Init {
            user_agent: fields.string("INIT")?,
            auth: fields.dict("INIT")?,
        },
        (sig::HELLO, _) => ClientMessage::Hello {
            extra: fields.dict("HELLO")?,
        },
        (sig::LOGON, _) => ClientMessage::Logon {
            auth: fields.dict("LOGON")?,
        },
        (sig::GOODBYE, _) => ClientMessage::Goodbye,
        (sig::RESET, _) => ClientMessage::Reset,
        (sig::RUN, count) => ClientMessage::Run {
            query: fields.string("RUN")?,
            parameters: fields.dict("RUN")?,
            extra: if count >= 3 { Some(fields.dict("RUN")?) } else { None },
        },
        (sig::PULL, 0) => ClientMessage::PullAll,
        (sig::PULL, _) => ClientMessage::Pull {
            extra: fields.dict("PULL")?,
        },
        (sig::DISCARD, 0) => ClientMessage::DiscardAll,
        (sig::DISCARD, _) => ClientMessage::Discard {
            extra: fields.dict("DISCARD")?,
        },
        (sig::BEGIN, _) => ClientMessage::Begin {
            extra: fields.dict("BEGIN")?,
        },
        (sig::COMMIT, _) => ClientMessage::Commit,
        (sig::ROLLBACK, _) => ClientMessage::Rollback,
        (tag, _) => {
            return Err(BoltError::Protocol(format!(
                "unknown client message tag: 0x{tag:02X}"
            )));
        }
    };
    Ok(msg)
}

/// Cursor over the fields of one message structure.
struct Fields<'a> {
    tag: u8,
    count: usize,
    taken: usize,
    buf: &'a [u8],
}

impl<'a> Fields<'a> {
    fn read(data: &'a [u8]) -> Result<Self, BoltError> {
        let mut buf = data;
        let (tag, count) = decode_struct_header(&mut buf)?;
        Ok(Self {
            tag,
            count,
            taken: 0,
            buf,
        })
    }

    fn next(&mut self, msg_name: &str) -> Result<BoltValue, BoltError> {
        if self.taken == self.count {
            return Err(BoltError::Protocol(format!(
                "{msg_name} has only {} fields",
                self.count
            )));
        }
        self.taken += 1;
        decode_value(&mut self.buf)
    }

    fn dict(&mut self, msg_name: &str) -> Result<BoltDict, BoltError> {
        match self.next(msg_name)? {
            BoltValue::Dict(d) => Ok(d),
            other => Err(BoltError::Protocol(format!(
                "{msg_name}: expected dict, got: {other}"
            ))),
        }
    }

    fn list(&mut self, msg_name: &str) -> Result<Vec<BoltValue>, BoltError> {
        match self.next(msg_name)? {
            BoltValue::List(l) => Ok(l),
            other => Err(BoltError::Protocol(format!(
                "{msg_name}: expected list, got: {other}"
            ))),
        }
    }

    #[cfg(test)]
    fn string(&mut self, msg_name: &str) -> Result<String, BoltError> {
        match self.next(msg_name)? {
            BoltValue::String(s) => Ok(s),
            other => Err(BoltError::Protocol(format!(
                "{msg_name}: expected string, got: {other}"
            ))),
        }
    }
}
