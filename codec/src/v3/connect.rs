// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::base::{DecodePacket, EncodePacket, Packet, QoS};
use crate::byte_array::{self, ByteArray};
use crate::connect_flags::ConnectFlags;
use crate::error::{DecodeError, EncodeError};
use crate::header::{FixedHeader, PacketType};
use crate::utils;
use crate::{PROTOCOL_LEVEL, PROTOCOL_NAME};

/// `CONNECT` - first packet a client sends; everything else on the
/// connection is invalid until this is accepted.
///
/// ```txt
/// protocol name | protocol level | connect flags | keep alive
/// client id | [will topic] | [will message] | [username] | [password]
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectPacket {
    pub protocol_level: u8,
    pub flags: ConnectFlags,
    pub keep_alive: u16,
    pub client_id: String,
    pub will_topic: Option<String>,
    pub will_message: Vec<u8>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl ConnectPacket {
    fn variable_header_and_payload_len(&self) -> usize {
        let mut len = 2 + PROTOCOL_NAME.len() // protocol name
            + 1 // protocol level
            + ConnectFlags::bytes()
            + 2 // keep alive
            + 2 + self.client_id.len();
        if self.flags.will {
            len += 2 + self.will_topic.as_deref().map_or(0, str::len);
            len += 2 + self.will_message.len();
        }
        if self.flags.username {
            len += 2 + self.username.as_deref().map_or(0, str::len);
        }
        if self.flags.password {
            len += 2 + self.password.as_deref().map_or(0, <[u8]>::len);
        }
        len
    }
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();
        let remaining_length = self.variable_header_and_payload_len();
        FixedHeader::new(PacketType::Connect, remaining_length)
            .map_err(|_| EncodeError::InvalidVarInt)?
            .encode(v)?;

        byte_array::write_string(v, PROTOCOL_NAME)?;
        v.push(self.protocol_level);
        v.push(self.flags.encode());
        v.extend_from_slice(&self.keep_alive.to_be_bytes());
        byte_array::write_string(v, &self.client_id)?;

        if self.flags.will {
            byte_array::write_string(v, self.will_topic.as_deref().unwrap_or(""))?;
            byte_array::write_binary(v, &self.will_message)?;
        }
        if self.flags.username {
            byte_array::write_string(v, self.username.as_deref().unwrap_or(""))?;
        }
        if self.flags.password {
            byte_array::write_binary(v, self.password.as_deref().unwrap_or(&[]))?;
        }

        Ok(v.len() - old_len)
    }
}

impl DecodePacket for ConnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Connect {
            return Err(DecodeError::InvalidPacketType);
        }

        let protocol_name = ba.read_string()?;
        if protocol_name != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolName);
        }

        let protocol_level = ba.read_byte()?;
        if protocol_level != PROTOCOL_LEVEL {
            return Err(DecodeError::InvalidProtocolLevel);
        }

        let flags = ConnectFlags::decode(ba.read_byte()?)?;
        let keep_alive = ba.read_u16()?;
        let client_id = ba.read_string()?;

        let will_topic = if flags.will {
            let topic = ba.read_string()?;
            crate::topic::validate_topic_name(&topic)?;
            Some(topic)
        } else {
            None
        };
        let will_message = if flags.will {
            ba.read_binary()?.to_vec()
        } else {
            Vec::new()
        };
        let username = if flags.username {
            Some(ba.read_string()?)
        } else {
            None
        };
        let password = if flags.password {
            Some(ba.read_binary()?.to_vec())
        } else {
            None
        };

        Ok(Self {
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
}

impl Packet for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }
}

/// Validates a decoded CONNECT body against the length caps the session is
/// configured with. Protocol-level validation (protocol name, version,
/// connect-flag consistency) already happened in [`ConnectPacket::decode`];
/// this only covers the broker's own client-id length policy.
///
/// # Errors
///
/// Returns error if the client id is empty or too long.
pub fn validate_client_id(packet: &ConnectPacket, max_client_id_len: usize) -> Result<(), DecodeError> {
    utils::validate_client_id(&packet.client_id, max_client_id_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let packet = ConnectPacket {
            protocol_level: PROTOCOL_LEVEL,
            flags: ConnectFlags {
                username: true,
                password: true,
                will_retain: false,
                will_qos: QoS::AtLeastOnce,
                will: true,
                clean_session: true,
            },
            keep_alive: 60,
            client_id: "HIMQTT-Test".to_string(),
            will_topic: Some("goodbye".to_string()),
            will_message: b"bye".to_vec(),
            username: Some("user".to_string()),
            password: Some(b"pass".to_vec()),
        };
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(ConnectPacket::decode(&mut ba).unwrap(), packet);
    }

    #[test]
    fn test_rejects_wrong_protocol_name() {
        let mut buf = Vec::new();
        FixedHeader::new(PacketType::Connect, 2 + 3 + 1 + 1 + 2 + 2)
            .unwrap()
            .encode(&mut buf)
            .unwrap();
        byte_array::write_string(&mut buf, "bad").unwrap();
        buf.push(PROTOCOL_LEVEL);
        buf.push(0);
        buf.extend_from_slice(&60u16.to_be_bytes());
        byte_array::write_string(&mut buf, "").unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode(&mut ba),
            Err(DecodeError::InvalidProtocolName)
        );
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut buf = Vec::new();
        FixedHeader::new(PacketType::Connect, 2 + PROTOCOL_NAME.len() + 1 + 1 + 2 + 2)
            .unwrap()
            .encode(&mut buf)
            .unwrap();
        byte_array::write_string(&mut buf, PROTOCOL_NAME).unwrap();
        buf.push(4); // wrong version
        buf.push(0);
        buf.extend_from_slice(&60u16.to_be_bytes());
        byte_array::write_string(&mut buf, "").unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode(&mut ba),
            Err(DecodeError::InvalidProtocolLevel)
        );
    }
}
