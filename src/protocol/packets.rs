use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// QoS 0, the only level the broker grants.
pub const QOS_AT_MOST_ONCE: u8 = 0x00;
/// SUBACK failure sentinel. Defined by MQTT 3.1.1; not currently emitted.
pub const QOS_FAILURE: u8 = 0x80;

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected end of buffer")]
    Truncated,
    #[error("invalid utf8 in mqtt string")]
    InvalidString,
    #[error("remaining length overflow")]
    LengthOverflow,
    #[error("unsupported packet type {0}")]
    UnknownType(u8),
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}

/// CONNACK return codes defined by MQTT 3.1.1 §3.2.2.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0x00,
    UnacceptableProtocolVersion = 0x01,
    IdentifierRejected = 0x02,
    ServerUnavailable = 0x03,
    BadUsernameOrPassword = 0x04,
    NotAuthorized = 0x05,
}

impl ConnectReturnCode {
    fn from_u8(value: u8) -> Result<Self, PacketError> {
        match value {
            0x00 => Ok(Self::Accepted),
            0x01 => Ok(Self::UnacceptableProtocolVersion),
            0x02 => Ok(Self::IdentifierRejected),
            0x03 => Ok(Self::ServerUnavailable),
            0x04 => Ok(Self::BadUsernameOrPassword),
            0x05 => Ok(Self::NotAuthorized),
            _ => Err(PacketError::Malformed("connack return code")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Will {
    pub topic: String,
    pub message: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

#[derive(Debug, Clone)]
pub struct ConnectPacket {
    pub protocol_name: String,
    pub protocol_level: u8,
    pub reserved_flag: bool,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl ConnectPacket {
    /// Validate the CONNECT per MQTT 3.1.1 and produce the CONNACK code.
    ///
    /// Protocol-violation shapes with no dedicated 3.1.1 code (reserved flag
    /// set, unknown protocol name) map to `UnacceptableProtocolVersion`.
    pub fn validate(&self) -> ConnectReturnCode {
        if self.password.is_some() && self.username.is_none() {
            return ConnectReturnCode::BadUsernameOrPassword;
        }
        if self.reserved_flag {
            return ConnectReturnCode::UnacceptableProtocolVersion;
        }
        match (self.protocol_name.as_str(), self.protocol_level) {
            ("MQTT", 4) | ("MQIsdp", 3) => {}
            _ => return ConnectReturnCode::UnacceptableProtocolVersion,
        }
        if self.client_id.len() > u16::MAX as usize {
            return ConnectReturnCode::IdentifierRejected;
        }
        if self.client_id.is_empty() && !self.clean_session {
            return ConnectReturnCode::IdentifierRejected;
        }
        ConnectReturnCode::Accepted
    }
}

#[derive(Debug, Clone)]
pub struct ConnAckPacket {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

#[derive(Debug, Clone)]
pub struct PublishPacket {
    pub dup: bool,
    pub qos: u8,
    pub retain: bool,
    pub topic: String,
    pub message_id: Option<u16>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SubscribePacket {
    pub message_id: u16,
    pub topics: Vec<String>,
    pub requested_qos: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SubAckPacket {
    pub message_id: u16,
    pub return_codes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct UnsubscribePacket {
    pub message_id: u16,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum ControlPacket {
    Connect(ConnectPacket),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(u16),
    PubRec(u16),
    PubRel(u16),
    PubComp(u16),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(u16),
    PingReq,
    PingResp,
    Disconnect,
}

/// Read one framed control packet from the stream.
pub async fn read_packet<S: AsyncReadExt + Unpin>(
    stream: &mut S,
) -> Result<ControlPacket, PacketError> {
    let mut first = [0u8; 1];
    stream.read_exact(&mut first).await?;
    let packet_type = first[0] >> 4;
    let flags = first[0] & 0x0F;
    let remaining_len = decode_remaining_length_stream(stream).await?;
    let mut buf = vec![0u8; remaining_len as usize];
    stream.read_exact(&mut buf).await?;
    match packet_type {
        1 => Ok(ControlPacket::Connect(parse_connect(&buf)?)),
        2 => Ok(ControlPacket::ConnAck(parse_connack(&buf)?)),
        3 => Ok(ControlPacket::Publish(parse_publish(flags, &buf)?)),
        4 => Ok(ControlPacket::PubAck(parse_message_id(&buf)?)),
        5 => Ok(ControlPacket::PubRec(parse_message_id(&buf)?)),
        6 => Ok(ControlPacket::PubRel(parse_message_id(&buf)?)),
        7 => Ok(ControlPacket::PubComp(parse_message_id(&buf)?)),
        8 => Ok(ControlPacket::Subscribe(parse_subscribe(&buf)?)),
        9 => Ok(ControlPacket::SubAck(parse_suback(&buf)?)),
        10 => Ok(ControlPacket::Unsubscribe(parse_unsubscribe(&buf)?)),
        11 => Ok(ControlPacket::UnsubAck(parse_message_id(&buf)?)),
        12 => Ok(ControlPacket::PingReq),
        13 => Ok(ControlPacket::PingResp),
        14 => Ok(ControlPacket::Disconnect),
        other => Err(PacketError::UnknownType(other)),
    }
}

/// Serialize one control packet onto the stream as a single write.
///
/// Encoding never mutates the packet, so the same value may be written to
/// many streams concurrently.
pub async fn write_packet<S: AsyncWriteExt + Unpin>(
    stream: &mut S,
    packet: &ControlPacket,
) -> Result<(), PacketError> {
    let frame = encode_packet(packet);
    stream.write_all(&frame).await?;
    Ok(())
}

/// Encode a control packet into a complete wire frame.
pub fn encode_packet(packet: &ControlPacket) -> Vec<u8> {
    match packet {
        ControlPacket::Connect(c) => encode_connect(c),
        ControlPacket::ConnAck(c) => vec![
            0x20,
            0x02,
            u8::from(c.session_present),
            c.return_code as u8,
        ],
        ControlPacket::Publish(p) => encode_publish(p),
        ControlPacket::PubAck(mid) => encode_message_id_frame(0x40, *mid),
        ControlPacket::PubRec(mid) => encode_message_id_frame(0x50, *mid),
        ControlPacket::PubRel(mid) => encode_message_id_frame(0x62, *mid),
        ControlPacket::PubComp(mid) => encode_message_id_frame(0x70, *mid),
        ControlPacket::Subscribe(s) => encode_subscribe(s),
        ControlPacket::SubAck(s) => {
            let mut body = Vec::with_capacity(2 + s.return_codes.len());
            body.extend_from_slice(&s.message_id.to_be_bytes());
            body.extend_from_slice(&s.return_codes);
            frame(0x90, body)
        }
        ControlPacket::Unsubscribe(u) => {
            let mut body = Vec::new();
            body.extend_from_slice(&u.message_id.to_be_bytes());
            for topic in &u.topics {
                push_string(&mut body, topic);
            }
            frame(0xA2, body)
        }
        ControlPacket::UnsubAck(mid) => encode_message_id_frame(0xB0, *mid),
        ControlPacket::PingReq => vec![0xC0, 0x00],
        ControlPacket::PingResp => vec![0xD0, 0x00],
        ControlPacket::Disconnect => vec![0xE0, 0x00],
    }
}

fn encode_connect(c: &ConnectPacket) -> Vec<u8> {
    let mut flags = 0u8;
    if c.reserved_flag {
        flags |= 0x01;
    }
    if c.clean_session {
        flags |= 0x02;
    }
    if let Some(will) = &c.will {
        flags |= 0x04;
        flags |= (will.qos & 0x03) << 3;
        if will.retain {
            flags |= 0x20;
        }
    }
    if c.password.is_some() {
        flags |= 0x40;
    }
    if c.username.is_some() {
        flags |= 0x80;
    }
    let mut body = Vec::new();
    push_string(&mut body, &c.protocol_name);
    body.push(c.protocol_level);
    body.push(flags);
    body.extend_from_slice(&c.keep_alive.to_be_bytes());
    push_string(&mut body, &c.client_id);
    if let Some(will) = &c.will {
        push_string(&mut body, &will.topic);
        push_binary(&mut body, &will.message);
    }
    if let Some(username) = &c.username {
        push_string(&mut body, username);
    }
    if let Some(password) = &c.password {
        push_binary(&mut body, password);
    }
    frame(0x10, body)
}

fn encode_publish(p: &PublishPacket) -> Vec<u8> {
    let mut header = 0x30;
    if p.dup {
        header |= 0b0000_1000;
    }
    header |= (p.qos & 0x03) << 1;
    if p.retain {
        header |= 0x01;
    }
    let mut body = Vec::new();
    push_string(&mut body, &p.topic);
    if p.qos > 0 {
        if let Some(mid) = p.message_id {
            body.extend_from_slice(&mid.to_be_bytes());
        }
    }
    body.extend_from_slice(&p.payload);
    frame(header, body)
}

fn encode_subscribe(s: &SubscribePacket) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&s.message_id.to_be_bytes());
    for (i, topic) in s.topics.iter().enumerate() {
        push_string(&mut body, topic);
        body.push(s.requested_qos.get(i).copied().unwrap_or(QOS_AT_MOST_ONCE));
    }
    frame(0x82, body)
}

fn encode_message_id_frame(header: u8, mid: u16) -> Vec<u8> {
    let be = mid.to_be_bytes();
    vec![header, 0x02, be[0], be[1]]
}

fn frame(header: u8, body: Vec<u8>) -> Vec<u8> {
    let mut out = vec![header];
    out.extend(encode_remaining_length(body.len()));
    out.extend(body);
    out
}

fn parse_connect(buf: &[u8]) -> Result<ConnectPacket, PacketError> {
    let mut cursor = 0usize;
    let protocol_name = read_string(buf, &mut cursor)?;
    let protocol_level = read_u8(buf, &mut cursor)?;
    let connect_flags = read_u8(buf, &mut cursor)?;
    let keep_alive = read_u16(buf, &mut cursor)?;
    let client_id = read_string(buf, &mut cursor)?;

    let reserved_flag = (connect_flags & 0x01) != 0;
    let clean_session = (connect_flags & 0x02) != 0;
    let will_flag = (connect_flags & 0x04) != 0;
    let will_qos = (connect_flags >> 3) & 0x03;
    let will_retain = (connect_flags & 0x20) != 0;
    let mut will = None;
    if will_flag {
        if will_qos > 2 {
            return Err(PacketError::Malformed("connect will qos"));
        }
        let topic = read_string(buf, &mut cursor)?;
        let message = read_binary(buf, &mut cursor)?;
        will = Some(Will {
            topic,
            message,
            qos: will_qos,
            retain: will_retain,
        });
    }
    let username = if (connect_flags & 0x80) != 0 {
        Some(read_string(buf, &mut cursor)?)
    } else {
        None
    };
    let password = if (connect_flags & 0x40) != 0 {
        Some(read_binary(buf, &mut cursor)?)
    } else {
        None
    };

    Ok(ConnectPacket {
        protocol_name,
        protocol_level,
        reserved_flag,
        clean_session,
        keep_alive,
        client_id,
        will,
        username,
        password,
    })
}

fn parse_connack(buf: &[u8]) -> Result<ConnAckPacket, PacketError> {
    let mut cursor = 0usize;
    let ack_flags = read_u8(buf, &mut cursor)?;
    let return_code = ConnectReturnCode::from_u8(read_u8(buf, &mut cursor)?)?;
    Ok(ConnAckPacket {
        session_present: (ack_flags & 0x01) != 0,
        return_code,
    })
}

fn parse_publish(flags: u8, buf: &[u8]) -> Result<PublishPacket, PacketError> {
    let dup = (flags & 0b0000_1000) != 0;
    let retain = (flags & 0b0000_0001) != 0;
    let qos = (flags & 0b0000_0110) >> 1;
    if qos > 2 {
        return Err(PacketError::Malformed("publish qos"));
    }
    let mut cursor = 0usize;
    let topic = read_string(buf, &mut cursor)?;
    let message_id = if qos > 0 {
        Some(read_u16(buf, &mut cursor)?)
    } else {
        None
    };
    let payload = buf[cursor..].to_vec();
    Ok(PublishPacket {
        dup,
        qos,
        retain,
        topic,
        message_id,
        payload,
    })
}

fn parse_subscribe(buf: &[u8]) -> Result<SubscribePacket, PacketError> {
    let mut cursor = 0usize;
    let message_id = read_u16(buf, &mut cursor)?;
    let mut topics = Vec::new();
    let mut requested_qos = Vec::new();
    while cursor < buf.len() {
        topics.push(read_string(buf, &mut cursor)?);
        let qos = read_u8(buf, &mut cursor)?;
        if qos > 2 {
            return Err(PacketError::Malformed("subscribe qos"));
        }
        requested_qos.push(qos);
    }
    if topics.is_empty() {
        return Err(PacketError::Malformed("subscribe without topics"));
    }
    Ok(SubscribePacket {
        message_id,
        topics,
        requested_qos,
    })
}

fn parse_suback(buf: &[u8]) -> Result<SubAckPacket, PacketError> {
    let mut cursor = 0usize;
    let message_id = read_u16(buf, &mut cursor)?;
    Ok(SubAckPacket {
        message_id,
        return_codes: buf[cursor..].to_vec(),
    })
}

fn parse_unsubscribe(buf: &[u8]) -> Result<UnsubscribePacket, PacketError> {
    let mut cursor = 0usize;
    let message_id = read_u16(buf, &mut cursor)?;
    let mut topics = Vec::new();
    while cursor < buf.len() {
        topics.push(read_string(buf, &mut cursor)?);
    }
    Ok(UnsubscribePacket { message_id, topics })
}

fn parse_message_id(buf: &[u8]) -> Result<u16, PacketError> {
    let mut cursor = 0usize;
    read_u16(buf, &mut cursor)
}

fn read_u8(buf: &[u8], cursor: &mut usize) -> Result<u8, PacketError> {
    if *cursor >= buf.len() {
        return Err(PacketError::Truncated);
    }
    let v = buf[*cursor];
    *cursor += 1;
    Ok(v)
}

fn read_u16(buf: &[u8], cursor: &mut usize) -> Result<u16, PacketError> {
    if *cursor + 1 >= buf.len() {
        return Err(PacketError::Truncated);
    }
    let v = u16::from_be_bytes([buf[*cursor], buf[*cursor + 1]]);
    *cursor += 2;
    Ok(v)
}

fn read_string(buf: &[u8], cursor: &mut usize) -> Result<String, PacketError> {
    let len = read_u16(buf, cursor)? as usize;
    if *cursor + len > buf.len() {
        return Err(PacketError::Truncated);
    }
    let s = std::str::from_utf8(&buf[*cursor..*cursor + len])
        .map_err(|_| PacketError::InvalidString)?
        .to_string();
    *cursor += len;
    Ok(s)
}

fn read_binary(buf: &[u8], cursor: &mut usize) -> Result<Vec<u8>, PacketError> {
    let len = read_u16(buf, cursor)? as usize;
    if *cursor + len > buf.len() {
        return Err(PacketError::Truncated);
    }
    let bytes = buf[*cursor..*cursor + len].to_vec();
    *cursor += len;
    Ok(bytes)
}

fn push_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn push_binary(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
}

async fn decode_remaining_length_stream<S: AsyncReadExt + Unpin>(
    stream: &mut S,
) -> Result<u32, PacketError> {
    let mut multiplier = 1u32;
    let mut value = 0u32;
    loop {
        let mut buf = [0u8; 1];
        stream.read_exact(&mut buf).await?;
        let byte = buf[0];
        value = value.saturating_add(((byte & 0x7F) as u32) * multiplier);
        if (byte & 0x80) == 0 {
            break;
        }
        multiplier = multiplier
            .checked_mul(128)
            .ok_or(PacketError::LengthOverflow)?;
    }
    Ok(value)
}

fn encode_remaining_length(mut len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
    out
}
