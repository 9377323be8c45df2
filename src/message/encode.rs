//! Encode Bolt messages to PackStream bytes.

use bytes::BytesMut;

use super::{sig, ClientMessage};
#[cfg(test)]
use super::ServerMessage;
use crate::packstream::encode as ps;

/// Encodes a client message into PackStream bytes.
pub fn encode_client_message(buf: &mut BytesMut, msg: &ClientMessage) {
    match msg {
        ClientMessage::Init { user_agent, auth } => {
            ps::encode_struct_header(buf, sig::INIT, 2);
            ps::encode_string(buf, user_agent);
            ps::encode_dict(buf, auth);
        }
        ClientMessage::Hello { extra } => single_dict(buf, sig::HELLO, extra),
        ClientMessage::Logon { auth } => single_dict(buf, sig::LOGON, auth),
        ClientMessage::Goodbye => ps::encode_struct_header(buf, sig::GOODBYE, 0),
        ClientMessage::Reset => ps::encode_struct_header(buf, sig::RESET, 0),
        ClientMessage::Run {
            query,
            parameters,
            extra,
        } => {
            let fields = if extra.is_some() { 3 } else { 2 };
            ps::encode_struct_header(buf, sig::RUN, fields);
            ps::encode_string(buf, query);
            ps::encode_dict(buf, parameters);
            if let Some(extra) = extra {
                ps::encode_dict(buf, extra);
            }
        }
        ClientMessage::PullAll => ps::encode_struct_header(buf, sig::PULL, 0),
        ClientMessage::DiscardAll => ps::encode_struct_header(buf, sig::DISCARD, 0),
        ClientMessage::Pull { extra } => single_dict(buf, sig::PULL, extra),
        ClientMessage::Discard { extra } => single_dict(buf, sig::DISCARD, extra),
        ClientMessage::Begin { extra } => single_dict(buf, sig::BEGIN, extra),
        ClientMessage::Commit => ps::encode_struct_header(buf, sig::COMMIT, 0),
        ClientMessage::Rollback => ps::encode_struct_header(buf, sig::ROLLBACK, 0),
    }
}

/// Encodes a server message into PackStream bytes. Test servers only.
#[cfg(test)]
pub(crate) fn encode_server_message(buf: &mut BytesMut, msg: &ServerMessage) {
    match msg {
        ServerMessage::Success { metadata } => single_dict(buf, sig::SUCCESS, metadata),
        ServerMessage::Record { data } => {
            ps::encode_struct_header(buf, sig::RECORD, 1);
            ps::encode_list(buf, data);
        }
        ServerMessage::Failure { metadata } => single_dict(buf, sig::FAILURE, metadata),
        ServerMessage::Ignored => ps::encode_struct_header(buf, sig::IGNORED, 0),
    }
}

fn single_dict(buf: &mut BytesMut, signature: u8, dict: &crate::types::BoltDict) {
    ps::encode_struct_header(buf, signature, 1);
    ps::encode_dict(buf, dict);
}
