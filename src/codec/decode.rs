//! `read_header` frames the fixed header off the wire; `decode_body` turns
//! an already-buffered body slice into a typed [`Packet`]. Between them they
//! never read past `header.length()` bytes — an over-read or under-read is
//! a decoding failure, not silently tolerated.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::binary::{
    accumulate_varint_byte, read_bytes, read_bytes_with_len, read_string, read_u16,
};
use crate::codec::packet::{
    ConnAck, Connect, ConnectFlags, DecodeOptions, Packet, PacketHeader, PacketType, QosLevel,
    SubAck, SubackReturnCode, Subscribe, Unsubscribe,
};
use crate::consts::MAX_VARINT_BYTES;
use crate::error::MqttError;

/// Reads exactly one fixed header: a type+flags byte, then a 1-4 byte
/// varint remaining-length. Fails `UnexpectedEof` on a short first byte
/// (including a clean EOF — a clean stream-end-between-packets is the
/// `Streamer`'s concern, not the decoder's), `MalformedVarint` on a bad
/// length.
pub async fn read_header<R>(src: &mut R) -> Result<PacketHeader, MqttError>
where
    R: AsyncRead + Unpin,
{
    let first = read_byte(src).await?;
    let packet_type = PacketType::try_from(first >> 4)?;
    let flags = first & 0x0F;

    let mut length = 0u32;
    for p in 0..MAX_VARINT_BYTES {
        let byte = read_byte(src).await?;
        let (next, done) = accumulate_varint_byte(length, 7 * p as u32, byte);
        length = next;
        if done {
            return Ok(PacketHeader::new(packet_type, flags, length));
        }
    }
    Err(MqttError::MalformedVarint)
}

async fn read_byte<R>(src: &mut R) -> Result<u8, MqttError>
where
    R: AsyncRead + Unpin,
{
    match src.read_u8().await {
        Ok(b) => Ok(b),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(MqttError::UnexpectedEof),
        Err(e) => Err(MqttError::Io(e)),
    }
}

/// `buf` must contain exactly `header.length()` bytes. Dispatches on
/// `header.packet_type()`.
pub fn decode_body(
    buf: &[u8],
    header: &PacketHeader,
    opts: &DecodeOptions,
) -> Result<Packet, MqttError> {
    if opts.strict_flags {
        validate_static_flags(header)?;
    }

    let mut iter = buf.iter();
    let packet = match header.packet_type() {
        PacketType::Connect => Packet::Connect(decode_connect(&mut iter, opts)?),
        PacketType::ConnAck => Packet::ConnAck(decode_connack(&mut iter)?),
        PacketType::Publish => Packet::Publish(decode_publish(&mut iter, header)?),
        PacketType::PubAck => Packet::PubAck(read_u16(&mut iter)?),
        PacketType::PubRec => Packet::PubRec(read_u16(&mut iter)?),
        PacketType::PubRel => Packet::PubRel(read_u16(&mut iter)?),
        PacketType::PubComp => Packet::PubComp(read_u16(&mut iter)?),
        PacketType::Subscribe => Packet::Subscribe(decode_subscribe(&mut iter, header)?),
        PacketType::SubAck => Packet::SubAck(decode_suback(&mut iter, header)?),
        PacketType::Unsubscribe => Packet::Unsubscribe(decode_unsubscribe(&mut iter, header)?),
        PacketType::UnsubAck => Packet::UnsubAck(read_u16(&mut iter)?),
        PacketType::PingReq => Packet::PingReq,
        PacketType::PingResp => Packet::PingResp,
        PacketType::Disconnect => Packet::Disconnect,
        PacketType::Auth => Packet::Auth(read_bytes_with_len(&mut iter, buf.len())?),
    };

    Ok(packet)
}

fn validate_static_flags(header: &PacketHeader) -> Result<(), MqttError> {
    match header.packet_type() {
        PacketType::Publish => Ok(()),
        PacketType::Subscribe | PacketType::Unsubscribe | PacketType::PubRel => {
            if header.flags() == 0b0010 {
                Ok(())
            } else {
                Err(MqttError::MalformedPacket(
                    "SUBSCRIBE/UNSUBSCRIBE/PUBREL must set fixed header flags to 0b0010",
                ))
            }
        }
        _ => {
            if header.flags() == 0b0000 {
                Ok(())
            } else {
                Err(MqttError::MalformedPacket(
                    "fixed header flags must be zero for this packet type",
                ))
            }
        }
    }
}

fn decode_connect<'a, I>(iter: &mut I, opts: &DecodeOptions) -> Result<Connect, MqttError>
where
    I: Iterator<Item = &'a u8>,
{
    let protocol_name = read_string(iter)?;
    if protocol_name != "MQTT" && protocol_name != "MQIsdp" {
        return Err(MqttError::UnsupportedProtocol(protocol_name));
    }

    let protocol_level = crate::codec::binary::read_u8(iter)?;
    let flags_byte = crate::codec::binary::read_u8(iter)?;
    let flags = ConnectFlags::from(flags_byte);

    if opts.validate_connect_reserved_bit && flags.reserved_bit_set() {
        return Err(MqttError::MalformedPacket(
            "CONNECT flags reserved bit 0 must be zero",
        ));
    }

    let keep_alive = read_u16(iter)?;
    let client_id = read_string(iter)?;

    let (will_topic, will_message) = if flags.will() {
        (Some(read_string(iter)?), Some(read_bytes(iter)?))
    } else {
        (None, None)
    };

    let username = if flags.has_username() {
        Some(read_string(iter)?)
    } else {
        None
    };

    let password = if flags.has_password() {
        Some(read_bytes(iter)?)
    } else {
        None
    };

    Ok(Connect {
        protocol_name,
        protocol_level,
        flags,
        keep_alive,
        client_id,
        will_topic,
        will_message,
        username,
        password,
    })
}

fn decode_connack<'a, I>(iter: &mut I) -> Result<ConnAck, MqttError>
where
    I: Iterator<Item = &'a u8>,
{
    let ack_flags = crate::codec::binary::read_u8(iter)?;
    let return_code = crate::codec::binary::read_u8(iter)?;
    Ok(ConnAck {
        session_present: ack_flags & 0x01 != 0,
        return_code,
    })
}

fn decode_publish<'a, I>(
    iter: &mut I,
    header: &PacketHeader,
) -> Result<crate::codec::packet::Publish, MqttError>
where
    I: Iterator<Item = &'a u8>,
{
    let (dup, qos, retain) = header.publish_flags()?;

    let topic = read_string(iter)?;

    let packet_id = if qos > QosLevel::AtMostOnce {
        Some(read_u16(iter)?)
    } else {
        None
    };

    let consumed = 2 + topic.len() + if packet_id.is_some() { 2 } else { 0 };
    let remaining = (header.length() as usize)
        .checked_sub(consumed)
        .ok_or(MqttError::MalformedPacket("PUBLISH body shorter than its fields"))?;

    let payload = read_bytes_with_len(iter, remaining)?;

    Ok(crate::codec::packet::Publish {
        dup,
        qos,
        retain,
        topic,
        packet_id,
        payload,
    })
}

fn decode_subscribe<'a, I>(iter: &mut I, header: &PacketHeader) -> Result<Subscribe, MqttError>
where
    I: Iterator<Item = &'a u8>,
{
    let packet_id = read_u16(iter)?;
    let mut consumed = 2usize;
    let mut filters = Vec::new();

    while consumed < header.length() as usize {
        let topic = read_string(iter)?;
        let qos_byte = crate::codec::binary::read_u8(iter)?;
        consumed += 2 + topic.len() + 1;
        filters.push((topic, QosLevel::try_from(qos_byte)?));
    }

    if filters.is_empty() {
        return Err(MqttError::MalformedPacket("SUBSCRIBE filter list is empty"));
    }

    Ok(Subscribe { packet_id, filters })
}

fn decode_suback<'a, I>(iter: &mut I, header: &PacketHeader) -> Result<SubAck, MqttError>
where
    I: Iterator<Item = &'a u8>,
{
    let packet_id = read_u16(iter)?;
    let mut consumed = 2usize;
    let mut return_codes = Vec::new();

    while consumed < header.length() as usize {
        let code = crate::codec::binary::read_u8(iter)?;
        return_codes.push(SubackReturnCode::try_from(code)?);
        consumed += 1;
    }

    Ok(SubAck {
        packet_id,
        return_codes,
    })
}

fn decode_unsubscribe<'a, I>(iter: &mut I, header: &PacketHeader) -> Result<Unsubscribe, MqttError>
where
    I: Iterator<Item = &'a u8>,
{
    let packet_id = read_u16(iter)?;
    let mut consumed = 2usize;
    let mut filters = Vec::new();

    while consumed < header.length() as usize {
        let topic = read_string(iter)?;
        consumed += 2 + topic.len();
        filters.push(topic);
    }

    if filters.is_empty() {
        return Err(MqttError::MalformedPacket(
            "UNSUBSCRIBE filter list is empty",
        ));
    }

    Ok(Unsubscribe { packet_id, filters })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::packet::PacketType;

    fn header(packet_type: PacketType, flags: u8, length: u32) -> PacketHeader {
        PacketHeader::new(packet_type, flags, length)
    }

    #[tokio::test]
    async fn test_read_header_pingreq() {
        let data: [u8; 2] = [0xC0, 0x00];
        let mut cursor = std::io::Cursor::new(data);
        let h = read_header(&mut cursor).await.unwrap();
        assert_eq!(h.packet_type(), PacketType::PingReq);
        assert_eq!(h.length(), 0);
    }

    #[tokio::test]
    async fn test_read_header_eof_on_empty_stream() {
        let data: [u8; 0] = [];
        let mut cursor = std::io::Cursor::new(data);
        assert!(matches!(
            read_header(&mut cursor).await,
            Err(MqttError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_decode_connect_mosquitto_sample() {
        // scenario A from the spec: MQIsdp CONNECT, clean session,
        // client id "mosqpub|9408-om"
        let body: [u8; 29] = [
            0x00, 0x06, 0x4D, 0x51, 0x49, 0x73, 0x64, 0x70, 0x03, 0x02, 0x00, 0x3C, 0x00, 0x0F,
            0x6D, 0x6F, 0x73, 0x71, 0x70, 0x75, 0x62, 0x7C, 0x39, 0x34, 0x30, 0x38, 0x2D, 0x6F,
            0x6D,
        ];
        let h = header(PacketType::Connect, 0, body.len() as u32);
        let packet = decode_body(&body, &h, &DecodeOptions::default()).unwrap();
        match packet {
            Packet::Connect(c) => {
                assert_eq!(c.protocol_name, "MQIsdp");
                assert_eq!(c.protocol_level, 3);
                assert!(c.flags.clean_session());
                assert_eq!(c.keep_alive, 60);
                assert_eq!(c.client_id, "mosqpub|9408-om");
            }
            other => panic!("expected Connect, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_publish_qos0() {
        // scenario B: topic "test", payload "test", QoS 0
        let body: [u8; 10] = [0x00, 0x04, 0x74, 0x65, 0x73, 0x74, 0x74, 0x65, 0x73, 0x74];
        let h = header(PacketType::Publish, 0b0000, body.len() as u32);
        let packet = decode_body(&body, &h, &DecodeOptions::default()).unwrap();
        match packet {
            Packet::Publish(p) => {
                assert!(!p.dup);
                assert_eq!(p.qos, QosLevel::AtMostOnce);
                assert!(!p.retain);
                assert_eq!(p.topic, "test");
                assert_eq!(p.packet_id, None);
                assert_eq!(&p.payload[..], b"test");
            }
            other => panic!("expected Publish, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_subscribe_two_filters() {
        // scenario C: packet id 42, filters "a/b" QoS 1, "c/d" QoS 2
        let body: [u8; 14] = [
            0x00, 0x2A, 0x00, 0x03, 0x61, 0x2F, 0x62, 0x01, 0x00, 0x03, 0x63, 0x2F, 0x64, 0x02,
        ];
        let h = header(PacketType::Subscribe, 0b0010, body.len() as u32);
        let packet = decode_body(&body, &h, &DecodeOptions::default()).unwrap();
        match packet {
            Packet::Subscribe(s) => {
                assert_eq!(s.packet_id, 42);
                assert_eq!(
                    s.filters,
                    vec![
                        ("a/b".to_string(), QosLevel::AtLeastOnce),
                        ("c/d".to_string(), QosLevel::ExactlyOnce),
                    ]
                );
            }
            other => panic!("expected Subscribe, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_subscribe_empty_list_is_malformed() {
        let body: [u8; 2] = [0x00, 0x01];
        let h = header(PacketType::Subscribe, 0b0010, body.len() as u32);
        assert!(matches!(
            decode_body(&body, &h, &DecodeOptions::default()),
            Err(MqttError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_decode_unknown_protocol_name() {
        let mut body = Vec::new();
        body.extend_from_slice(&4u16.to_be_bytes());
        body.extend_from_slice(b"ABCD");
        body.push(4);
        body.push(0x00);
        body.extend_from_slice(&60u16.to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes());
        let h = header(PacketType::Connect, 0, body.len() as u32);
        assert!(matches!(
            decode_body(&body, &h, &DecodeOptions::default()),
            Err(MqttError::UnsupportedProtocol(_))
        ));
    }

    #[test]
    fn test_decode_pingreq_empty_body() {
        let body: [u8; 0] = [];
        let h = header(PacketType::PingReq, 0, 0);
        assert_eq!(
            decode_body(&body, &h, &DecodeOptions::default()).unwrap(),
            Packet::PingReq
        );
    }

    #[test]
    fn test_decode_publish_qos3_is_malformed() {
        let body: [u8; 6] = [0x00, 0x04, 0x74, 0x65, 0x73, 0x74];
        let h = header(PacketType::Publish, 0b0110, body.len() as u32);
        assert!(matches!(
            decode_body(&body, &h, &DecodeOptions::default()),
            Err(MqttError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_strict_flags_rejects_nonzero_disconnect_flags() {
        let body: [u8; 0] = [];
        let h = header(PacketType::Disconnect, 0b0001, 0);
        let opts = DecodeOptions {
            strict_flags: true,
            ..Default::default()
        };
        assert!(matches!(
            decode_body(&body, &h, &opts),
            Err(MqttError::MalformedPacket(_))
        ));
    }
}
