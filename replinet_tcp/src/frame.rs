//! Wire framing between the driver and the group daemon.
//!
//! Every frame is a big-endian `u32` length prefix followed by a one-byte
//! tag and the tag-specific body. The length covers the tag and body, not
//! the prefix itself.

use std::io::{Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use replinet_protocol::{
    BackendError, MemberId, ViewDesc,
    bytes::{TryGetExt, TryPutExt},
};

const TAG_JOIN: u8 = 1;
const TAG_MSG: u8 = 2;
const TAG_VIEW: u8 = 3;
const TAG_LEAVE: u8 = 4;

/// Longest frame the driver will accept from the daemon.
const MAX_FRAME_LEN: usize = 1 << 24;

/// A frame received from the daemon.
#[derive(Debug, Clone)]
pub(crate) enum InFrame {
    /// A totally-ordered group message.
    Msg { origin: MemberId, frame: Bytes },
    /// A membership view.
    View(ViewDesc),
}

/// Writes a `Join` frame: the channel to attach to.
pub(crate) fn write_join(out: &mut impl Write, channel: &str) -> std::io::Result<()> {
    let mut body = BytesMut::with_capacity(1 + 2 + channel.len());
    body.put_u8(TAG_JOIN);
    body.put_u16(channel.len() as u16);
    body.put_slice(channel.as_bytes());
    write_frame(out, &body)
}

/// Writes a `Msg` frame carrying one group message.
pub(crate) fn write_msg(out: &mut impl Write, frame: &Bytes) -> std::io::Result<()> {
    let mut body = BytesMut::with_capacity(1 + 4 + frame.len());
    body.put_u8(TAG_MSG);
    body.put_u32(frame.len() as u32);
    body.put_slice(frame);
    write_frame(out, &body)
}

/// Writes a `Leave` frame.
pub(crate) fn write_leave(out: &mut impl Write) -> std::io::Result<()> {
    write_frame(out, &[TAG_LEAVE])
}

fn write_frame(out: &mut impl Write, body: &[u8]) -> std::io::Result<()> {
    out.write_all(&(body.len() as u32).to_be_bytes())?;
    out.write_all(body)?;
    out.flush()
}

/// Reads the next frame from the daemon, blocking until one is available.
pub(crate) fn read_frame(input: &mut impl Read) -> Result<InFrame, BackendError> {
    let mut len = [0u8; 4];
    input.read_exact(&mut len)?;
    let len = u32::from_be_bytes(len) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(BackendError::Protocol("bad frame length"));
    }

    let mut body = vec![0u8; len];
    input.read_exact(&mut body)?;
    let mut body = Bytes::from(body);

    let tag = body.try_get_u8().map_err(|_| BackendError::Protocol("empty frame"))?;
    match tag {
        TAG_MSG => {
            let origin = MemberId(
                body.try_get_u64()
                    .map_err(|_| BackendError::Protocol("short msg frame"))?,
            );
            let frame_len = body
                .try_get_u32()
                .map_err(|_| BackendError::Protocol("short msg frame"))?
                as usize;
            let frame = body
                .try_split_to(frame_len)
                .map_err(|_| BackendError::Protocol("short msg frame"))?;
            Ok(InFrame::Msg { origin, frame })
        }
        TAG_VIEW => read_view(body),
        _ => Err(BackendError::Protocol("unexpected frame tag")),
    }
}

fn read_view(mut body: Bytes) -> Result<InFrame, BackendError> {
    let short = |_| BackendError::Protocol("short view frame");
    let primary = body.try_get_u8().map_err(short)? != 0;
    let conf_id = body.try_get_i64().map_err(short)?;
    let memb_num = body.try_get_u32().map_err(short)? as usize;
    let my_index = body.try_get_u32().map_err(short)? as usize;
    if my_index >= memb_num {
        return Err(BackendError::Protocol("view index outside member list"));
    }

    let mut members = Vec::with_capacity(memb_num);
    for _ in 0..memb_num {
        let id = MemberId(body.try_get_u64().map_err(short)?);
        let name_len = body.try_get_u8().map_err(short)? as usize;
        let name = body.try_split_to(name_len).map_err(short)?;
        let name = std::str::from_utf8(&name)
            .map_err(|_| BackendError::Protocol("member name is not utf-8"))?
            .to_owned();
        members.push((id, name));
    }

    Ok(InFrame::View(ViewDesc {
        primary,
        conf_id,
        members,
        my_index,
    }))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn encode_view(view: &ViewDesc) -> Vec<u8> {
        let mut body = BytesMut::new();
        body.put_u8(TAG_VIEW);
        body.put_u8(u8::from(view.primary));
        body.put_i64(view.conf_id);
        body.put_u32(view.members.len() as u32);
        body.put_u32(view.my_index as u32);
        for (id, name) in &view.members {
            body.put_u64(id.0);
            body.put_u8(name.len() as u8);
            body.put_slice(name.as_bytes());
        }
        let mut raw = (body.len() as u32).to_be_bytes().to_vec();
        raw.extend_from_slice(&body);
        raw
    }

    #[test]
    fn msg_round_trip() {
        let mut raw = Vec::new();
        write_msg(&mut raw, &Bytes::from_static(b"payload")).unwrap();

        // daemon echoes the message back with the origin prepended
        let mut echoed = Vec::new();
        let mut body = BytesMut::new();
        body.put_u8(TAG_MSG);
        body.put_u64(9);
        body.put_u32(7);
        body.put_slice(b"payload");
        echoed.extend_from_slice(&(body.len() as u32).to_be_bytes());
        echoed.extend_from_slice(&body);

        let frame = read_frame(&mut echoed.as_slice()).unwrap();
        assert_matches!(
            frame,
            InFrame::Msg { origin: MemberId(9), frame } if frame == Bytes::from_static(b"payload")
        );
    }

    #[test]
    fn view_round_trip() {
        let view = ViewDesc {
            primary: true,
            conf_id: 5,
            members: vec![(MemberId(1), "n1".to_owned()), (MemberId(2), "n2".to_owned())],
            my_index: 1,
        };
        let raw = encode_view(&view);
        assert_matches!(
            read_frame(&mut raw.as_slice()).unwrap(),
            InFrame::View(got) if got == view
        );
    }

    #[test]
    fn rejects_bad_length() {
        let raw = [0u8; 4];
        assert_matches!(
            read_frame(&mut raw.as_slice()),
            Err(BackendError::Protocol("bad frame length"))
        );
    }

    #[test]
    fn rejects_unknown_tag() {
        let raw = [0, 0, 0, 1, 99];
        assert_matches!(
            read_frame(&mut raw.as_slice()),
            Err(BackendError::Protocol("unexpected frame tag"))
        );
    }
}
