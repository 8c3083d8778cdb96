//! The packet model: a closed tagged variant over the 15 MQTT control
//! packet types, plus the small header/flag types the decoder and encoder
//! thread through.
//!
//! Unlike the teacher's `Packet`, which pairs every variant with a
//! `FixedHeader` it carries around for its own lifetime
//! (`Packet::Publish(FixedHeader, PublishHeader)`), variants here own only
//! their semantic fields. The raw header a packet was decoded from is
//! returned alongside it by the decoder when a caller needs it for
//! diagnostics, not stored inside the variant — there is no back-reference
//! to keep in sync.

use bytes::Bytes;

use crate::error::MqttError;

/// 4-bit MQTT control packet type code.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
    Auth = 15,
}

impl TryFrom<u8> for PacketType {
    type Error = MqttError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Connect),
            2 => Ok(Self::ConnAck),
            3 => Ok(Self::Publish),
            4 => Ok(Self::PubAck),
            5 => Ok(Self::PubRec),
            6 => Ok(Self::PubRel),
            7 => Ok(Self::PubComp),
            8 => Ok(Self::Subscribe),
            9 => Ok(Self::SubAck),
            10 => Ok(Self::Unsubscribe),
            11 => Ok(Self::UnsubAck),
            12 => Ok(Self::PingReq),
            13 => Ok(Self::PingResp),
            14 => Ok(Self::Disconnect),
            15 => Ok(Self::Auth),
            other => Err(MqttError::UnknownPacketType(other)),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QosLevel {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QosLevel {
    type Error = MqttError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            _ => Err(MqttError::MalformedPacket("QoS value 3 is reserved")),
        }
    }
}

/// MQTT protocol level byte, named for diagnostics. The decoder does not
/// reject an unrecognised level (only an unrecognised protocol *name* is a
/// hard error, per spec) — this is a best-effort label, not a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolLevel {
    MqIsdpV3,
    Mqtt311,
    Other(u8),
}

impl ProtocolLevel {
    pub fn from_byte(value: u8) -> Self {
        match value {
            3 => Self::MqIsdpV3,
            4 => Self::Mqtt311,
            other => Self::Other(other),
        }
    }
}

/// Return codes a SUBACK carries, one per subscription in the corresponding
/// SUBSCRIBE.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubackReturnCode {
    SuccessQos0 = 0x00,
    SuccessQos1 = 0x01,
    SuccessQos2 = 0x02,
    Failure = 0x80,
}

impl SubackReturnCode {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for SubackReturnCode {
    type Error = MqttError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::SuccessQos0),
            0x01 => Ok(Self::SuccessQos1),
            0x02 => Ok(Self::SuccessQos2),
            0x80 => Ok(Self::Failure),
            _ => Err(MqttError::MalformedPacket("invalid SUBACK return code")),
        }
    }
}

/// The CONNECT flags byte: clean-session, will, will-QoS, will-retain,
/// password, username, with bit 0 reserved (must be zero on the wire unless
/// [`crate::codec::DecodeOptions::validate_connect_reserved_bit`] is off).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectFlags(u8);

impl ConnectFlags {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clean_session: bool,
        will: bool,
        will_qos: QosLevel,
        will_retain: bool,
        has_username: bool,
        has_password: bool,
    ) -> Self {
        let mut bits = 0u8;
        bits |= (clean_session as u8) << 1;
        bits |= (will as u8) << 2;
        bits |= (will_qos as u8) << 3;
        bits |= (will_retain as u8) << 5;
        bits |= (has_password as u8) << 6;
        bits |= (has_username as u8) << 7;
        Self(bits)
    }

    pub fn as_byte(self) -> u8 {
        self.0
    }

    pub fn reserved_bit_set(self) -> bool {
        self.0 & 0x01 != 0
    }

    pub fn clean_session(self) -> bool {
        (self.0 & 0x02) != 0
    }

    pub fn will(self) -> bool {
        (self.0 & 0x04) != 0
    }

    pub fn will_qos(self) -> Result<QosLevel, MqttError> {
        QosLevel::try_from((self.0 & 0x18) >> 3)
    }

    pub fn will_retain(self) -> bool {
        (self.0 & 0x20) != 0
    }

    pub fn has_password(self) -> bool {
        (self.0 & 0x40) != 0
    }

    pub fn has_username(self) -> bool {
        (self.0 & 0x80) != 0
    }
}

impl From<u8> for ConnectFlags {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connect {
    pub protocol_name: String,
    pub protocol_level: u8,
    pub flags: ConnectFlags,
    pub keep_alive: u16,
    pub client_id: String,
    pub will_topic: Option<String>,
    pub will_message: Option<Bytes>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QosLevel,
    pub retain: bool,
    pub topic: String,
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub filters: Vec<(String, QosLevel)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubAck {
    pub packet_id: u16,
    pub return_codes: Vec<SubackReturnCode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub filters: Vec<String>,
}

/// Tagged variant over the 15 MQTT control packet types.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(u16),
    PubRec(u16),
    PubRel(u16),
    PubComp(u16),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(u16),
    PingReq,
    PingResp,
    Disconnect,
    /// MQTT 5.0 AUTH. Body format is unspecified here (this crate does not
    /// implement v5 properties); the bytes are carried opaquely so an AUTH
    /// packet still round-trips losslessly.
    Auth(Bytes),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::PubRec(_) => PacketType::PubRec,
            Packet::PubRel(_) => PacketType::PubRel,
            Packet::PubComp(_) => PacketType::PubComp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect => PacketType::Disconnect,
            Packet::Auth(_) => PacketType::Auth,
        }
    }

    /// The fixed header flags this variant always encodes with. `0b0010`
    /// for Subscribe/Unsubscribe/PubRel, a dup/QoS/retain composite for
    /// Publish, `0b0000` for everything else.
    pub fn static_flags(&self) -> u8 {
        match self {
            Packet::Publish(p) => ((p.dup as u8) << 3) | ((p.qos as u8) << 1) | (p.retain as u8),
            Packet::Subscribe(_) | Packet::Unsubscribe(_) | Packet::PubRel(_) => 0b0010,
            _ => 0b0000,
        }
    }
}

/// `Type` + `Flags` + `Length` as read off the wire, before the body is
/// decoded. Kept alongside a decoded [`Packet`] for diagnostics and by the
/// [`crate::streamer::Streamer`] while a packet is unconsumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    packet_type: PacketType,
    /// Raw low nibble of the first fixed-header byte, as seen on the wire —
    /// unnormalised, even for types with static flags.
    flags: u8,
    length: u32,
}

impl PacketHeader {
    pub fn new(packet_type: PacketType, flags: u8, length: u32) -> Self {
        Self {
            packet_type,
            flags: flags & 0x0F,
            length,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    /// Derives dup/QoS/retain from the raw flags nibble. Only meaningful for
    /// a Publish header; QoS == 3 is `MalformedPacket`.
    pub fn publish_flags(&self) -> Result<(bool, QosLevel, bool), MqttError> {
        let dup = (self.flags & 0x08) != 0;
        let qos = QosLevel::try_from((self.flags & 0x06) >> 1)?;
        let retain = (self.flags & 0x01) != 0;
        Ok((dup, qos, retain))
    }
}

/// Ingress validation knobs. Both default off, matching the source
/// prototype this crate is grounded on, which accepts any incoming flag
/// combination and ignores the CONNECT reserved bit (spec Design Notes §9,
/// open questions (i) and (ii) — see DESIGN.md for the resolution).
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Reject fixed-header flags that don't match §4.7's table with
    /// `MalformedPacket` instead of accepting them as-is.
    pub strict_flags: bool,
    /// Reject a CONNECT packet whose flags byte has reserved bit 0 set.
    pub validate_connect_reserved_bit: bool,
}
