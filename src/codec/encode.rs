//! `encode_body` serialises a typed [`Packet`]'s variant-specific fields;
//! `write_packet` wraps that with a freshly computed fixed header and writes
//! the whole thing to a sink. The remaining-length field is always
//! recomputed from the encoded body — callers cannot rely on an inbound
//! packet's original `Length` surviving a re-emit.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::binary::{write_bytes, write_string, write_u16, write_varint};
use crate::codec::packet::Packet;
use crate::consts::MAX_REMAINING_LENGTH;
use crate::error::MqttError;

/// Serialises the packet-specific bytes into a scratch buffer. Does not
/// include the fixed header.
pub fn encode_body(packet: &Packet) -> Bytes {
    let mut body = BytesMut::new();

    match packet {
        Packet::Connect(c) => {
            write_string(&mut body, &c.protocol_name);
            body.put_u8(c.protocol_level);
            body.put_u8(c.flags.as_byte());
            write_u16(&mut body, c.keep_alive);
            write_string(&mut body, &c.client_id);

            if c.flags.will() {
                write_string(&mut body, c.will_topic.as_deref().unwrap_or(""));
                write_bytes(&mut body, c.will_message.as_deref().unwrap_or(&[]));
            }
            if c.flags.has_username() {
                write_string(&mut body, c.username.as_deref().unwrap_or(""));
            }
            if c.flags.has_password() {
                write_bytes(&mut body, c.password.as_deref().unwrap_or(&[]));
            }
        }
        Packet::ConnAck(ack) => {
            body.put_u8(ack.session_present as u8);
            body.put_u8(ack.return_code);
        }
        Packet::Publish(p) => {
            write_string(&mut body, &p.topic);
            if let Some(id) = p.packet_id {
                write_u16(&mut body, id);
            }
            body.put_slice(&p.payload);
        }
        Packet::PubAck(id) | Packet::PubRec(id) | Packet::PubRel(id) | Packet::PubComp(id)
        | Packet::UnsubAck(id) => {
            write_u16(&mut body, *id);
        }
        Packet::Subscribe(s) => {
            write_u16(&mut body, s.packet_id);
            for (topic, qos) in &s.filters {
                write_string(&mut body, topic);
                body.put_u8(*qos as u8);
            }
        }
        Packet::SubAck(s) => {
            write_u16(&mut body, s.packet_id);
            for code in &s.return_codes {
                body.put_u8(code.as_byte());
            }
        }
        Packet::Unsubscribe(u) => {
            write_u16(&mut body, u.packet_id);
            for topic in &u.filters {
                write_string(&mut body, topic);
            }
        }
        Packet::PingReq | Packet::PingResp | Packet::Disconnect => {}
        Packet::Auth(raw) => {
            body.put_slice(raw);
        }
    }

    body.freeze()
}

/// Encodes `packet`'s body, forms a fixed header from
/// `(packet.packet_type(), packet.static_flags(), body.len())`, and writes
/// type/flags byte, varint length, then the body to `sink`.
pub async fn write_packet<W>(sink: &mut W, packet: &Packet) -> Result<(), MqttError>
where
    W: AsyncWrite + Unpin,
{
    let body = encode_body(packet);
    if body.len() as u64 > MAX_REMAINING_LENGTH as u64 {
        return Err(MqttError::PacketTooLarge(body.len()));
    }

    let mut header_buf = BytesMut::with_capacity(5);
    let type_flags = ((packet.packet_type() as u8) << 4) | (packet.static_flags() & 0x0F);
    header_buf.put_u8(type_flags);
    write_varint(&mut header_buf, body.len() as u32);

    sink.write_all(&header_buf).await?;
    sink.write_all(&body).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode::{decode_body, read_header};
    use crate::codec::packet::{
        Connect, ConnectFlags, DecodeOptions, Publish, QosLevel, Subscribe, Unsubscribe,
    };

    #[tokio::test]
    async fn test_write_packet_connect_roundtrip() {
        let packet = Packet::Connect(Connect {
            protocol_name: "MQTT".into(),
            protocol_level: 4,
            flags: ConnectFlags::new(true, false, QosLevel::AtMostOnce, false, true, true),
            keep_alive: 60,
            client_id: "myPy".into(),
            will_topic: None,
            will_message: None,
            username: Some("client".into()),
            password: Some(Bytes::from_static(b"pass")),
        });

        let mut buf = Vec::new();
        write_packet(&mut buf, &packet).await.unwrap();

        let expected: [u8; 32] = [
            0x10, 0x1e, 0x00, 0x04, 0x4d, 0x51, 0x54, 0x54, 0x04, 0xc2, 0x00, 0x3c, 0x00, 0x04,
            0x6d, 0x79, 0x50, 0x79, 0x00, 0x06, 0x63, 0x6c, 0x69, 0x65, 0x6e, 0x74, 0x00, 0x04,
            0x70, 0x61, 0x73, 0x73,
        ];
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn test_write_packet_publish_roundtrip() {
        let packet = Packet::Publish(Publish {
            dup: false,
            qos: QosLevel::AtLeastOnce,
            retain: true,
            topic: "info".into(),
            packet_id: Some(2),
            payload: Bytes::from_static(b"Cedalo"),
        });

        let mut buf = Vec::new();
        write_packet(&mut buf, &packet).await.unwrap();

        let expected: [u8; 16] = [
            0x33, 0x0E, 0x00, 0x04, 0x69, 0x6e, 0x66, 0x6f, 0x00, 0x02, 0x43, 0x65, 0x64, 0x61,
            0x6c, 0x6f,
        ];
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn test_write_packet_subscribe_roundtrip() {
        let packet = Packet::Subscribe(Subscribe {
            packet_id: 1,
            filters: vec![("mytopic".into(), QosLevel::AtLeastOnce)],
        });

        let mut buf = Vec::new();
        write_packet(&mut buf, &packet).await.unwrap();

        let expected: [u8; 14] = [
            0x82, 0x0C, 0x00, 0x01, 0x00, 0x07, 0x6d, 0x79, 0x74, 0x6f, 0x70, 0x69, 0x63, 0x01,
        ];
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn test_write_packet_unsubscribe_roundtrip() {
        let packet = Packet::Unsubscribe(Unsubscribe {
            packet_id: 1,
            filters: vec!["info".into()],
        });

        let mut buf = Vec::new();
        write_packet(&mut buf, &packet).await.unwrap();

        let expected: [u8; 10] = [0xA2, 0x08, 0x00, 0x01, 0x00, 0x04, 0x69, 0x6e, 0x66, 0x6f];
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn test_pingreq_roundtrip_through_full_decode() {
        let mut buf = Vec::new();
        write_packet(&mut buf, &Packet::PingReq).await.unwrap();
        assert_eq!(buf, vec![0xC0, 0x00]);

        let mut cursor = std::io::Cursor::new(buf);
        let header = read_header(&mut cursor).await.unwrap();
        let decoded = decode_body(&[], &header, &DecodeOptions::default()).unwrap();
        assert_eq!(decoded, Packet::PingReq);
    }

    #[tokio::test]
    async fn test_encode_decode_roundtrip_normalises_flags() {
        // a Publish built with the "wrong" dup bit on a QoS 0 packet still
        // round-trips — encode always derives flags from the packet's own
        // fields, never from a stale header.
        let packet = Packet::Publish(Publish {
            dup: true,
            qos: QosLevel::AtMostOnce,
            retain: false,
            topic: "t".into(),
            packet_id: None,
            payload: Bytes::new(),
        });

        let mut buf = Vec::new();
        write_packet(&mut buf, &packet).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let header = read_header(&mut cursor).await.unwrap();
        let mut body = vec![0u8; header.length() as usize];
        use tokio::io::AsyncReadExt;
        cursor.read_exact(&mut body).await.unwrap();

        let decoded = decode_body(&body, &header, &DecodeOptions::default()).unwrap();
        assert_eq!(decoded, packet);
    }
}
