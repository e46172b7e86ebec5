//! The privileged-agent wire protocol: a length-prefixed binary
//! request/response exchange over a pair of pipes between one
//! unprivileged caller and one privileged agent process.

pub mod client;
pub mod server;

use std::io::{self, Read, Write};

use crate::{OtpError, Result};

/// Current wire protocol version. A client refuses to talk to an agent
/// reporting anything else.
pub const PROTOCOL_VERSION: u16 = 1;

/// Upper bound on `str_arg`'s length, matching the state format's own
/// per-field limit.
pub const MAX_STR_ARG: usize = 1000;

/// One request opcode per agent operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Init = 0,
    UserSet = 1,
    StateNew = 2,
    StateLoad = 3,
    StateStore = 4,
    StateDrop = 5,
    KeyGenerate = 6,
    KeyRemove = 7,
    FlagAdd = 8,
    FlagClear = 9,
    FlagGet = 10,
    GetNum = 11,
    GetInt = 12,
    GetStr = 13,
    GetAlphabet = 14,
    SetInt = 15,
    SetStr = 16,
    SetSpass = 17,
    GetWarnings = 18,
    GetPasscode = 19,
    GetPrompt = 20,
    Authenticate = 21,
    Skip = 22,
    UpdateLatest = 23,
    ClearRecentFailures = 24,
}

impl Opcode {
    pub fn from_u16(v: u16) -> Result<Self> {
        use Opcode::*;
        Ok(match v {
            0 => Init,
            1 => UserSet,
            2 => StateNew,
            3 => StateLoad,
            4 => StateStore,
            5 => StateDrop,
            6 => KeyGenerate,
            7 => KeyRemove,
            8 => FlagAdd,
            9 => FlagClear,
            10 => FlagGet,
            11 => GetNum,
            12 => GetInt,
            13 => GetStr,
            14 => GetAlphabet,
            15 => SetInt,
            16 => SetStr,
            17 => SetSpass,
            18 => GetWarnings,
            19 => GetPasscode,
            20 => GetPrompt,
            21 => Authenticate,
            22 => Skip,
            23 => UpdateLatest,
            24 => ClearRecentFailures,
            other => return Err(OtpError::Protocol(format!("unknown opcode {other}"))),
        })
    }
}

/// One frame of the wire protocol, used for both requests and
/// responses. `status` is meaningless (left 0) on requests; `int_arg`,
/// `int_arg2`, `num_arg` and `str_arg` carry whatever the opcode needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub protocol_version: u16,
    pub opcode: u16,
    pub status: i32,
    pub int_arg: i64,
    pub int_arg2: i64,
    pub num_arg: [u8; 16],
    pub str_arg: Vec<u8>,
}

impl Frame {
    pub fn request(opcode: Opcode) -> Self {
        Frame {
            protocol_version: PROTOCOL_VERSION,
            opcode: opcode as u16,
            status: 0,
            int_arg: 0,
            int_arg2: 0,
            num_arg: [0u8; 16],
            str_arg: Vec::new(),
        }
    }

    pub fn response(opcode: Opcode, status: i32) -> Self {
        Frame {
            protocol_version: PROTOCOL_VERSION,
            opcode: opcode as u16,
            status,
            int_arg: 0,
            int_arg2: 0,
            num_arg: [0u8; 16],
            str_arg: Vec::new(),
        }
    }

    pub fn with_str_arg(mut self, s: &str) -> Result<Self> {
        if s.len() > MAX_STR_ARG {
            return Err(OtpError::Protocol("str_arg too long".into()));
        }
        self.str_arg = s.as_bytes().to_vec();
        Ok(self)
    }

    pub fn str_arg_as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.str_arg)
            .map_err(|_| OtpError::Protocol("str_arg is not valid UTF-8".into()))
    }
}

/// Writes one frame, length-prefixed, to `w`.
pub fn encode_frame<W: Write>(w: &mut W, frame: &Frame) -> Result<()> {
    if frame.str_arg.len() > MAX_STR_ARG {
        return Err(OtpError::Protocol("str_arg too long".into()));
    }
    w.write_all(&frame.protocol_version.to_le_bytes())
        .map_err(OtpError::Io)?;
    w.write_all(&frame.opcode.to_le_bytes()).map_err(OtpError::Io)?;
    w.write_all(&frame.status.to_le_bytes()).map_err(OtpError::Io)?;
    w.write_all(&frame.int_arg.to_le_bytes()).map_err(OtpError::Io)?;
    w.write_all(&frame.int_arg2.to_le_bytes()).map_err(OtpError::Io)?;
    w.write_all(&frame.num_arg).map_err(OtpError::Io)?;
    w.write_all(&(frame.str_arg.len() as u32).to_le_bytes())
        .map_err(OtpError::Io)?;
    w.write_all(&frame.str_arg).map_err(OtpError::Io)?;
    Ok(())
}

/// Reads one length-prefixed frame from `r`. Maps a clean EOF before any
/// byte of a new frame is read to [`OtpError::Disconnect`].
pub fn decode_frame<R: Read>(r: &mut R) -> Result<Frame> {
    let mut u16_buf = [0u8; 2];
    if let Err(e) = read_exact_or_eof(r, &mut u16_buf)? {
        return Err(e);
    }
    let protocol_version = u16::from_le_bytes(u16_buf);

    let mut opcode_buf = [0u8; 2];
    r.read_exact(&mut opcode_buf).map_err(OtpError::Io)?;
    let opcode = u16::from_le_bytes(opcode_buf);

    let mut status_buf = [0u8; 4];
    r.read_exact(&mut status_buf).map_err(OtpError::Io)?;
    let status = i32::from_le_bytes(status_buf);

    let mut i64_buf = [0u8; 8];
    r.read_exact(&mut i64_buf).map_err(OtpError::Io)?;
    let int_arg = i64::from_le_bytes(i64_buf);
    r.read_exact(&mut i64_buf).map_err(OtpError::Io)?;
    let int_arg2 = i64::from_le_bytes(i64_buf);

    let mut num_arg = [0u8; 16];
    r.read_exact(&mut num_arg).map_err(OtpError::Io)?;

    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).map_err(OtpError::Io)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_STR_ARG {
        return Err(OtpError::Protocol("peer sent an oversized str_arg".into()));
    }
    let mut str_arg = vec![0u8; len];
    r.read_exact(&mut str_arg).map_err(OtpError::Io)?;

    Ok(Frame {
        protocol_version,
        opcode,
        status,
        int_arg,
        int_arg2,
        num_arg,
        str_arg,
    })
}

/// Reads exactly `buf.len()` bytes, but treats a zero-byte read at the
/// very start (a clean peer disconnect between frames) as
/// [`OtpError::Disconnect`] rather than a truncated-read I/O error.
fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<std::result::Result<(), OtpError>> {
    let mut total = 0;
    while total < buf.len() {
        match r.read(&mut buf[total..]) {
            Ok(0) if total == 0 => return Ok(Err(OtpError::Disconnect)),
            Ok(0) => {
                return Ok(Err(OtpError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed mid-frame",
                ))))
            }
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(OtpError::Io(e)),
        }
    }
    Ok(Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_round_trips_through_encode_decode() {
        let frame = Frame::request(Opcode::Authenticate)
            .with_str_arg("NH7j")
            .unwrap();
        let mut buf = Vec::new();
        encode_frame(&mut buf, &frame).unwrap();
        let decoded = decode_frame(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn oversized_str_arg_is_rejected_on_encode() {
        let mut frame = Frame::request(Opcode::Authenticate);
        frame.str_arg = vec![b'x'; MAX_STR_ARG + 1];
        let mut buf = Vec::new();
        assert!(matches!(
            encode_frame(&mut buf, &frame),
            Err(OtpError::Protocol(_))
        ));
    }

    #[test]
    fn decode_on_empty_stream_is_disconnect() {
        let mut empty = Cursor::new(Vec::<u8>::new());
        assert!(matches!(decode_frame(&mut empty), Err(OtpError::Disconnect)));
    }

    #[test]
    fn opcode_round_trips() {
        for raw in 0u16..=24 {
            let op = Opcode::from_u16(raw).unwrap();
            assert_eq!(op as u16, raw);
        }
    }
}
