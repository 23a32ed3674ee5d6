use crate::error::CodecError;
use crate::packet::*;
use crate::qos::{PacketId, QoS};
use log::debug;

/// The largest body an MQTT packet may declare (4-byte remaining length)
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// The outcome of a successful decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A whole packet was buffered; `consumed` bytes belong to it
    Packet {
        /// The decoded packet
        packet: Packet,
        /// The number of input bytes the packet occupied
        consumed: usize,
    },

    /// Not enough bytes buffered yet; nothing was consumed
    Incomplete,
}

/// Encodes a packet, appending its bytes to `out`
///
/// # Errors
/// - `OversizedPacket` if the body exceeds the 4-byte remaining length range
/// - `StringTooLong` if a topic or credential exceeds 65535 bytes
/// - `MissingPacketId` for a QoS1/QoS2 publish without an identifier
pub fn encode(packet: &Packet, out: &mut Vec<u8>) -> Result<(), CodecError> {
    let (first_byte, body) = match packet {
        Packet::Connect(p) => (0x10, encode_connect(p)?),
        Packet::Connack(p) => (0x20, encode_connack(p)),
        Packet::Publish(p) => {
            let mut flags = p.qos.to_byte() << 1;
            if p.dup {
                flags |= 0x08;
            }
            if p.retain {
                flags |= 0x01;
            }
            (0x30 | flags, encode_publish(p)?)
        }
        Packet::Puback(id) => (0x40, id.value().to_be_bytes().to_vec()),
        Packet::Pubrec(id) => (0x50, id.value().to_be_bytes().to_vec()),
        Packet::Pubrel(id) => (0x62, id.value().to_be_bytes().to_vec()),
        Packet::Pubcomp(id) => (0x70, id.value().to_be_bytes().to_vec()),
        Packet::Subscribe(p) => (0x82, encode_subscribe(p)?),
        Packet::Suback(p) => (0x90, encode_suback(p)),
        Packet::Unsubscribe(p) => (0xA2, encode_unsubscribe(p)?),
        Packet::Unsuback(id) => (0xB0, id.value().to_be_bytes().to_vec()),
        Packet::Pingreq => (0xC0, Vec::new()),
        Packet::Pingresp => (0xD0, Vec::new()),
        Packet::Disconnect => (0xE0, Vec::new()),
    };

    out.push(first_byte);
    write_remaining_length(out, body.len())?;
    out.extend_from_slice(&body);
    Ok(())
}

/// Attempts to decode one packet from the front of `bytes`
///
/// Streaming contract: returns `Decoded::Incomplete` (consuming nothing)
/// until a whole packet is buffered; a malformed packet is an error.
pub fn decode(bytes: &[u8]) -> Result<Decoded, CodecError> {
    if bytes.is_empty() {
        return Ok(Decoded::Incomplete);
    }

    let first_byte = bytes[0];
    let (remaining, length_size) = match read_remaining_length(&bytes[1..])? {
        Some(x) => x,
        None => return Ok(Decoded::Incomplete),
    };

    let total = 1 + length_size + remaining;
    if bytes.len() < total {
        return Ok(Decoded::Incomplete);
    }

    let body = &bytes[1 + length_size..total];
    match decode_body(first_byte >> 4, first_byte & 0x0F, body) {
        Ok(packet) => Ok(Decoded::Packet {
            packet,
            consumed: total,
        }),
        Err(e) => {
            debug!("Malformed packet (first byte {:#04x}): {}", first_byte, e);
            Err(e)
        }
    }
}

/// Appends a variable-byte-integer remaining length: 7 bits per byte, high
/// bit as continuation, at most 4 bytes
fn write_remaining_length(out: &mut Vec<u8>, mut length: usize) -> Result<(), CodecError> {
    if length > MAX_REMAINING_LENGTH {
        return Err(CodecError::OversizedPacket);
    }

    loop {
        let mut byte = (length % 128) as u8;
        length /= 128;
        if length > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if length == 0 {
            return Ok(());
        }
    }
}

/// Reads a remaining-length field from the front of `bytes`.
/// Returns None when the field itself is still incomplete.
///
/// # Errors
/// `BadRemainingLength` when 4 bytes all carry the continuation bit
fn read_remaining_length(bytes: &[u8]) -> Result<Option<(usize, usize)>, CodecError> {
    let mut value = 0usize;
    let mut shift = 0u32;
    for (index, &byte) in bytes.iter().take(4).enumerate() {
        value |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
        shift += 7;
    }

    if bytes.len() >= 4 {
        Err(CodecError::BadRemainingLength)
    } else {
        Ok(None)
    }
}

fn write_string(out: &mut Vec<u8>, value: &str) -> Result<(), CodecError> {
    write_blob(out, value.as_bytes())
}

fn write_blob(out: &mut Vec<u8>, value: &[u8]) -> Result<(), CodecError> {
    if value.len() > u16::max_value() as usize {
        return Err(CodecError::StringTooLong);
    }
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
    Ok(())
}

fn encode_connect(p: &Connect) -> Result<Vec<u8>, CodecError> {
    let mut body = Vec::new();
    write_string(&mut body, "MQTT")?;
    body.push(4); // protocol level

    let mut flags = 0u8;
    if p.clean_session {
        flags |= 0x02;
    }
    if let Some(ref will) = p.will {
        flags |= 0x04;
        flags |= will.qos.to_byte() << 3;
        if will.retain {
            flags |= 0x20;
        }
    }
    if p.password.is_some() {
        flags |= 0x40;
    }
    if p.username.is_some() {
        flags |= 0x80;
    }
    body.push(flags);
    body.extend_from_slice(&p.keepalive_secs.to_be_bytes());
    write_string(&mut body, &p.client_id)?;

    if let Some(ref will) = p.will {
        write_string(&mut body, &will.topic)?;
        write_blob(&mut body, &will.message)?;
    }
    if let Some(ref username) = p.username {
        write_string(&mut body, username)?;
    }
    if let Some(ref password) = p.password {
        write_blob(&mut body, password)?;
    }
    Ok(body)
}

fn encode_connack(p: &Connack) -> Vec<u8> {
    vec![p.session_present as u8, p.return_code.to_byte()]
}

fn encode_publish(p: &Publish) -> Result<Vec<u8>, CodecError> {
    let mut body = Vec::new();
    write_string(&mut body, &p.topic)?;
    if p.qos != QoS::AtMostOnce {
        match p.packet_id {
            Some(id) => body.extend_from_slice(&id.value().to_be_bytes()),
            None => return Err(CodecError::MissingPacketId),
        }
    }
    body.extend_from_slice(&p.payload);
    Ok(body)
}

fn encode_subscribe(p: &Subscribe) -> Result<Vec<u8>, CodecError> {
    let mut body = Vec::new();
    body.extend_from_slice(&p.packet_id.value().to_be_bytes());
    for (filter, qos) in &p.topics {
        write_string(&mut body, filter)?;
        body.push(qos.to_byte());
    }
    Ok(body)
}

fn encode_suback(p: &Suback) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&p.packet_id.value().to_be_bytes());
    for code in &p.return_codes {
        body.push(match code {
            SubscribeReturnCode::Granted(qos) => qos.to_byte(),
            SubscribeReturnCode::Failure => 0x80,
        });
    }
    body
}

fn encode_unsubscribe(p: &Unsubscribe) -> Result<Vec<u8>, CodecError> {
    let mut body = Vec::new();
    body.extend_from_slice(&p.packet_id.value().to_be_bytes());
    for filter in &p.topics {
        write_string(&mut body, filter)?;
    }
    Ok(body)
}

fn decode_body(packet_type: u8, flags: u8, body: &[u8]) -> Result<Packet, CodecError> {
    match packet_type {
        1 => {
            expect_flags(flags, 0)?;
            decode_connect(body)
        }
        2 => {
            expect_flags(flags, 0)?;
            decode_connack(body)
        }
        3 => decode_publish(flags, body),
        4 => {
            expect_flags(flags, 0)?;
            Ok(Packet::Puback(decode_id_only(body)?))
        }
        5 => {
            expect_flags(flags, 0)?;
            Ok(Packet::Pubrec(decode_id_only(body)?))
        }
        6 => {
            expect_flags(flags, 0x02)?;
            Ok(Packet::Pubrel(decode_id_only(body)?))
        }
        7 => {
            expect_flags(flags, 0)?;
            Ok(Packet::Pubcomp(decode_id_only(body)?))
        }
        8 => {
            expect_flags(flags, 0x02)?;
            decode_subscribe(body)
        }
        9 => {
            expect_flags(flags, 0)?;
            decode_suback(body)
        }
        10 => {
            expect_flags(flags, 0x02)?;
            decode_unsubscribe(body)
        }
        11 => {
            expect_flags(flags, 0)?;
            Ok(Packet::Unsuback(decode_id_only(body)?))
        }
        12 => decode_empty(flags, body, Packet::Pingreq),
        13 => decode_empty(flags, body, Packet::Pingresp),
        14 => decode_empty(flags, body, Packet::Disconnect),
        other => Err(CodecError::ReservedPacketType(other)),
    }
}

fn expect_flags(flags: u8, expected: u8) -> Result<(), CodecError> {
    if flags == expected {
        Ok(())
    } else {
        Err(CodecError::BadFixedHeaderFlags(flags))
    }
}

fn decode_empty(flags: u8, body: &[u8], packet: Packet) -> Result<Packet, CodecError> {
    expect_flags(flags, 0)?;
    if body.is_empty() {
        Ok(packet)
    } else {
        Err(CodecError::TrailingBytes)
    }
}

fn decode_id_only(body: &[u8]) -> Result<PacketId, CodecError> {
    let mut reader = BodyReader::new(body);
    let id = reader.read_packet_id()?;
    reader.expect_end()?;
    Ok(id)
}

fn decode_connect(body: &[u8]) -> Result<Packet, CodecError> {
    let mut reader = BodyReader::new(body);
    if reader.read_string()? != "MQTT" {
        return Err(CodecError::BadProtocolName);
    }
    let level = reader.read_u8()?;
    if level != 4 {
        return Err(CodecError::BadProtocolLevel(level));
    }

    let flags = reader.read_u8()?;
    if flags & 0x01 != 0 {
        return Err(CodecError::BadConnectFlags(flags));
    }
    let has_will = flags & 0x04 != 0;
    let will_qos = (flags >> 3) & 0x03;
    let will_retain = flags & 0x20 != 0;
    if !has_will && (will_qos != 0 || will_retain) {
        return Err(CodecError::BadConnectFlags(flags));
    }
    let has_password = flags & 0x40 != 0;
    let has_username = flags & 0x80 != 0;
    if has_password && !has_username {
        return Err(CodecError::BadConnectFlags(flags));
    }

    let keepalive_secs = reader.read_u16()?;
    let client_id = reader.read_string()?;

    let will = if has_will {
        Some(Will {
            topic: reader.read_string()?,
            message: reader.read_blob()?,
            qos: QoS::from_byte(will_qos).ok_or(CodecError::BadQoS(will_qos))?,
            retain: will_retain,
        })
    } else {
        None
    };
    let username = if has_username {
        Some(reader.read_string()?)
    } else {
        None
    };
    let password = if has_password {
        Some(reader.read_blob()?)
    } else {
        None
    };
    reader.expect_end()?;

    Ok(Packet::Connect(Connect {
        client_id,
        clean_session: flags & 0x02 != 0,
        keepalive_secs,
        will,
        username,
        password,
    }))
}

fn decode_connack(body: &[u8]) -> Result<Packet, CodecError> {
    let mut reader = BodyReader::new(body);
    let ack_flags = reader.read_u8()?;
    if ack_flags & 0xFE != 0 {
        return Err(CodecError::BadConnectFlags(ack_flags));
    }
    let code = reader.read_u8()?;
    let return_code = ConnectReturnCode::from_byte(code).ok_or(CodecError::BadReturnCode(code))?;
    reader.expect_end()?;

    Ok(Packet::Connack(Connack {
        session_present: ack_flags & 0x01 != 0,
        return_code,
    }))
}

fn decode_publish(flags: u8, body: &[u8]) -> Result<Packet, CodecError> {
    let qos_bits = (flags >> 1) & 0x03;
    let qos = QoS::from_byte(qos_bits).ok_or(CodecError::BadQoS(qos_bits))?;
    let dup = flags & 0x08 != 0;
    if dup && qos == QoS::AtMostOnce {
        // 3.1.1: the DUP flag must be 0 for QoS0 messages
        return Err(CodecError::BadFixedHeaderFlags(flags));
    }

    let mut reader = BodyReader::new(body);
    let topic = reader.read_string()?;
    if topic.is_empty() {
        return Err(CodecError::EmptyTopic);
    }
    let packet_id = if qos != QoS::AtMostOnce {
        Some(reader.read_packet_id()?)
    } else {
        None
    };
    let payload = reader.take_rest().to_vec();

    Ok(Packet::Publish(Publish {
        topic,
        payload,
        qos,
        retain: flags & 0x01 != 0,
        dup,
        packet_id,
    }))
}

fn decode_subscribe(body: &[u8]) -> Result<Packet, CodecError> {
    let mut reader = BodyReader::new(body);
    let packet_id = reader.read_packet_id()?;
    let mut topics = Vec::new();
    while !reader.is_empty() {
        let filter = reader.read_string()?;
        if filter.is_empty() {
            return Err(CodecError::EmptyTopic);
        }
        let qos_byte = reader.read_u8()?;
        let qos = QoS::from_byte(qos_byte).ok_or(CodecError::BadQoS(qos_byte))?;
        topics.push((filter, qos));
    }
    if topics.is_empty() {
        return Err(CodecError::EmptySubscription);
    }

    Ok(Packet::Subscribe(Subscribe { packet_id, topics }))
}

fn decode_suback(body: &[u8]) -> Result<Packet, CodecError> {
    let mut reader = BodyReader::new(body);
    let packet_id = reader.read_packet_id()?;
    let mut return_codes = Vec::new();
    while !reader.is_empty() {
        let byte = reader.read_u8()?;
        let code = match byte {
            0x80 => SubscribeReturnCode::Failure,
            other => match QoS::from_byte(other) {
                Some(qos) => SubscribeReturnCode::Granted(qos),
                None => return Err(CodecError::BadReturnCode(other)),
            },
        };
        return_codes.push(code);
    }
    if return_codes.is_empty() {
        return Err(CodecError::EmptySubscription);
    }

    Ok(Packet::Suback(Suback {
        packet_id,
        return_codes,
    }))
}

fn decode_unsubscribe(body: &[u8]) -> Result<Packet, CodecError> {
    let mut reader = BodyReader::new(body);
    let packet_id = reader.read_packet_id()?;
    let mut topics = Vec::new();
    while !reader.is_empty() {
        let filter = reader.read_string()?;
        if filter.is_empty() {
            return Err(CodecError::EmptyTopic);
        }
        topics.push(filter);
    }
    if topics.is_empty() {
        return Err(CodecError::EmptySubscription);
    }

    Ok(Packet::Unsubscribe(Unsubscribe { packet_id, topics }))
}

/// Cursor over a packet body; every read error is `Truncated`
struct BodyReader<'a> {
    bytes: &'a [u8],
}

impl<'a> BodyReader<'a> {
    fn new(bytes: &'a [u8]) -> BodyReader<'a> {
        BodyReader { bytes }
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        let (&first, rest) = self.bytes.split_first().ok_or(CodecError::Truncated)?;
        self.bytes = rest;
        Ok(first)
    }

    fn read_u16(&mut self) -> Result<u16, CodecError> {
        let chunk = self.read_exact(2)?;
        Ok(u16::from_be_bytes([chunk[0], chunk[1]]))
    }

    fn read_exact(&mut self, length: usize) -> Result<&'a [u8], CodecError> {
        if self.bytes.len() < length {
            return Err(CodecError::Truncated);
        }
        let (chunk, rest) = self.bytes.split_at(length);
        self.bytes = rest;
        Ok(chunk)
    }

    fn read_packet_id(&mut self) -> Result<PacketId, CodecError> {
        match self.read_u16()? {
            0 => Err(CodecError::ZeroPacketId),
            value => Ok(value.into()),
        }
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        let length = self.read_u16()? as usize;
        let bytes = self.read_exact(length)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::BadUtf8)
    }

    fn read_blob(&mut self) -> Result<Vec<u8>, CodecError> {
        let length = self.read_u16()? as usize;
        Ok(self.read_exact(length)?.to_vec())
    }

    fn take_rest(&mut self) -> &'a [u8] {
        std::mem::replace(&mut self.bytes, &[])
    }

    fn expect_end(&self) -> Result<(), CodecError> {
        if self.bytes.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes)
        }
    }
}
