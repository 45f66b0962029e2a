use crate::checksum::compute_internet_checksum;
use crate::ping_error::PingError;
use crate::response::Response;
use std::net::Ipv4Addr;

pub(crate) const ECHO_REQUEST_TYPE: u8 = 8;
pub(crate) const ECHO_REQUEST_CODE: u8 = 0;

const ICMP_HEADER_SIZE: usize = 8;
const TIMESTAMP_PAYLOAD_SIZE: usize = 8;
const IPV4_HEADER_SIZE: usize = 20;
// Version 4, header length 5 words. Datagrams with IPv4 options are not
// accepted.
const IPV4_VERSION_AND_IHL: u8 = 0x45;

/// Builds an echo request carrying the send timestamp as its payload.
///
/// Header layout, big-endian: type, code, checksum, identifier, sequence,
/// followed by the 8-byte timestamp in microseconds.
pub(crate) fn encode_echo_request(identifier: u16, sequence: u16, send_time_us: u64) -> Vec<u8> {
    let mut packet = Vec::with_capacity(ICMP_HEADER_SIZE + TIMESTAMP_PAYLOAD_SIZE);
    packet.extend_from_slice(&[ECHO_REQUEST_TYPE, ECHO_REQUEST_CODE, 0, 0]);
    packet.extend_from_slice(&identifier.to_be_bytes());
    packet.extend_from_slice(&sequence.to_be_bytes());
    packet.extend_from_slice(&send_time_us.to_be_bytes());

    let checksum = compute_internet_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    packet
}

/// Decodes a full IPv4 datagram carrying an ICMP echo reply.
///
/// The reply checksum is not re-verified on receipt.
pub(crate) fn decode_echo_reply(datagram: &[u8], reply_time_us: u64) -> Result<Response, PingError> {
    let minimum_size = IPV4_HEADER_SIZE + ICMP_HEADER_SIZE + TIMESTAMP_PAYLOAD_SIZE;
    if datagram.len() < minimum_size {
        return Err(PingError::ProtocolViolation {
            message: format!("datagram of {} bytes is shorter than {minimum_size}", datagram.len()),
        });
    }
    if datagram[0] != IPV4_VERSION_AND_IHL {
        return Err(PingError::ProtocolViolation {
            message: format!("first byte is {:#04x}, expected 0x45", datagram[0]),
        });
    }

    let icmp = &datagram[IPV4_HEADER_SIZE..];
    Ok(Response {
        total_length: read_u16(datagram, 2),
        ttl: datagram[8],
        source_ip: Ipv4Addr::new(datagram[12], datagram[13], datagram[14], datagram[15]),
        destination_ip: Ipv4Addr::new(datagram[16], datagram[17], datagram[18], datagram[19]),
        icmp_type: icmp[0],
        icmp_code: icmp[1],
        checksum: read_u16(icmp, 2),
        identifier: read_u16(icmp, 4),
        sequence: read_u16(icmp, 6),
        send_time_us: read_u64(icmp, ICMP_HEADER_SIZE),
        reply_time_us,
    })
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}
