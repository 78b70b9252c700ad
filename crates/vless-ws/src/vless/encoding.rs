use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use bytes::BufMut;

use super::{Address, ProtocolError, RequestCommand, RequestHeader, Uuid};

/// The only protocol version this server speaks.
pub const VERSION: u8 = 0x00;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x02;
const ATYP_IPV6: u8 = 0x03;

/// Cursor over one client message. All header fields are pulled through
/// here so a truncated message surfaces as `ShortHeader` at the exact
/// field that ran out of bytes.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self.pos.checked_add(n).ok_or(ProtocolError::ShortHeader)?;
        if end > self.buf.len() {
            return Err(ProtocolError::ShortHeader);
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn u16_be(&mut self) -> Result<u16, ProtocolError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }
}

/// Decodes the VLESS request header from the first WebSocket message.
///
/// Pure over the byte slice: no I/O, no allocation beyond the domain
/// string. Returns the header and the offset where the residual payload
/// begins; the caller owns the message and slices the residual out itself.
/// A header split across two messages is indistinguishable from a
/// truncated one and fails with `ShortHeader`.
pub fn decode_request_header(msg: &[u8]) -> Result<(RequestHeader, usize), ProtocolError> {
    let mut r = Reader::new(msg);

    let version = r.u8()?;
    if version != VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let user = Uuid::from_bytes(r.take(16)?)?;

    // Addons are opaque to this server: length byte, then skip.
    let addon_len = r.u8()?;
    r.take(addon_len as usize)?;

    let command = match r.u8()? {
        0x01 => RequestCommand::Tcp,
        0x02 => RequestCommand::Udp,
        0x03 => RequestCommand::Mux,
        other => return Err(ProtocolError::UnsupportedCommand(other)),
    };

    // Mux requests carry no target; everything else names one.
    let address = if command == RequestCommand::Mux {
        None
    } else {
        Some(decode_address(&mut r)?)
    };

    let request = RequestHeader {
        version,
        user,
        command,
        address,
    };

    Ok((request, r.pos))
}

fn decode_address(r: &mut Reader<'_>) -> Result<Address, ProtocolError> {
    let port = r.u16_be()?;
    let atyp = r.u8()?;

    match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(r.take(4)?);
            let ip = Ipv4Addr::from(octets);
            Ok(Address::SocketAddress(SocketAddr::V4(SocketAddrV4::new(ip, port))))
        }
        ATYP_DOMAIN => {
            let len = r.u8()?;
            if len == 0 {
                return Err(ProtocolError::InvalidDomain);
            }
            let raw = r.take(len as usize)?;
            if raw.iter().any(|b| !b.is_ascii() || b.is_ascii_control()) {
                return Err(ProtocolError::InvalidDomain);
            }
            // Printable ASCII was just checked, so this cannot fail.
            let domain = String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidDomain)?;
            Ok(Address::DomainNameAddress(domain, port))
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(r.take(16)?);
            let ip = Ipv6Addr::from(octets);
            Ok(Address::SocketAddress(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0))))
        }
        other => Err(ProtocolError::UnsupportedAddrType(other)),
    }
}

/// Encodes a request header, the client half of the protocol. The server
/// never sends one; tests and client tooling do.
pub fn encode_request_header<W: BufMut>(w: &mut W, request: &RequestHeader) -> usize {
    let mut written = 0;

    w.put_u8(request.version);
    w.put_slice(request.user.as_bytes());
    w.put_u8(0); // no addons
    w.put_u8(request.command as u8);
    written += 1 + 16 + 1 + 1;

    if let Some(address) = request.address.as_ref() {
        written += encode_address(w, address);
    }

    written
}

fn encode_address<W: BufMut>(w: &mut W, address: &Address) -> usize {
    match address {
        Address::SocketAddress(SocketAddr::V4(addr)) => {
            w.put_u16(addr.port());
            w.put_u8(ATYP_IPV4);
            w.put_slice(&addr.ip().octets());
            2 + 1 + 4
        }
        Address::SocketAddress(SocketAddr::V6(addr)) => {
            w.put_u16(addr.port());
            w.put_u8(ATYP_IPV6);
            w.put_slice(&addr.ip().octets());
            2 + 1 + 16
        }
        Address::DomainNameAddress(domain, port) => {
            w.put_u16(*port);
            w.put_u8(ATYP_DOMAIN);
            w.put_u8(domain.len() as u8);
            w.put_slice(domain.as_bytes());
            2 + 1 + 1 + domain.len()
        }
    }
}

/// The two-byte server acknowledgement: the request version echoed back,
/// then a zero addon length. Sent exactly once, ahead of any upstream
/// payload.
pub fn encode_response_header(request_version: u8) -> [u8; 2] {
    [request_version, 0x00]
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;

    fn init_log() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Trace)
            .is_test(true)
            .try_init();
    }

    fn sample_user() -> Uuid {
        Uuid::from_bytes(&[
            0xed, 0x6a, 0x11, 0xa3, 0x7d, 0xd9, 0x70, 0x69, 0x55, 0xbb, 0x92, 0x4c, 0x93, 0x6c, 0xbe, 0x71,
        ])
        .unwrap()
    }

    #[test]
    fn decode_domain_request() {
        init_log();

        let bin_packet = [
            0x0, 0xed, 0x6a, 0x11, 0xa3, 0x7d, 0xd9, 0x70, 0x69, 0x55, 0xbb, 0x92, 0x4c, 0x93, 0x6c, 0xbe, 0x71, 0x0,
            0x1, 0x1, 0xbb, 0x2, 0xd, 0x77, 0x77, 0x77, 0x2e, 0x76, 0x32, 0x66, 0x6c, 0x79, 0x2e, 0x6f, 0x72, 0x67,
        ];

        let expected = RequestHeader {
            version: 0,
            user: sample_user(),
            command: RequestCommand::Tcp,
            address: Some(Address::DomainNameAddress("www.v2fly.org".to_string(), 443)),
        };

        let (request, residual_at) = decode_request_header(&bin_packet).unwrap();
        assert_eq!(request, expected);
        assert_eq!(residual_at, bin_packet.len());

        let mut buffer = Vec::new();
        assert_eq!(encode_request_header(&mut buffer, &expected), 36);
        assert_eq!(buffer[..], bin_packet);
    }

    #[test]
    fn decode_preserves_residual() {
        init_log();

        let mut packet = Vec::new();
        let request = RequestHeader {
            version: 0,
            user: sample_user(),
            command: RequestCommand::Tcp,
            address: Some(Address::SocketAddress(SocketAddr::from_str("1.2.3.4:443").unwrap())),
        };
        encode_request_header(&mut packet, &request);

        let payload = b"GET / HTTP/1.1\r\n\r\n";
        packet.extend_from_slice(payload);

        let (decoded, residual_at) = decode_request_header(&packet).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(&packet[residual_at..], payload);
    }

    #[test]
    fn decode_ipv6_round_trip() {
        let request = RequestHeader {
            version: 0,
            user: sample_user(),
            command: RequestCommand::Udp,
            address: Some(Address::SocketAddress(
                SocketAddr::from_str("[2001:4860:0:2001::68]:53").unwrap(),
            )),
        };

        let mut buffer = Vec::new();
        let n = encode_request_header(&mut buffer, &request);
        assert_eq!(n, 1 + 16 + 1 + 1 + 2 + 1 + 16);

        let (decoded, residual_at) = decode_request_header(&buffer).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(residual_at, buffer.len());
    }

    #[test]
    fn addons_are_skipped() {
        let mut packet = vec![0x00];
        packet.extend_from_slice(sample_user().as_bytes());
        packet.push(4); // addon block the decoder must step over
        packet.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        packet.push(0x01); // TCP
        packet.extend_from_slice(&[0x01, 0xbb]); // port 443
        packet.push(ATYP_IPV4);
        packet.extend_from_slice(&[8, 8, 8, 8]);

        let (request, residual_at) = decode_request_header(&packet).unwrap();
        assert_eq!(request.command, RequestCommand::Tcp);
        assert_eq!(
            request.address,
            Some(Address::SocketAddress(SocketAddr::from_str("8.8.8.8:443").unwrap()))
        );
        assert_eq!(residual_at, packet.len());
    }

    #[test]
    fn mux_parses_without_address() {
        let mut packet = vec![0x00];
        packet.extend_from_slice(sample_user().as_bytes());
        packet.push(0); // no addons
        packet.push(0x03); // mux

        let (request, residual_at) = decode_request_header(&packet).unwrap();
        assert_eq!(request.command, RequestCommand::Mux);
        assert_eq!(request.address, None);
        assert_eq!(residual_at, packet.len());
    }

    #[test]
    fn rejects_unknown_version() {
        let mut packet = vec![0x01];
        packet.extend_from_slice(sample_user().as_bytes());
        packet.extend_from_slice(&[0, 0x01]);

        assert_eq!(
            decode_request_header(&packet),
            Err(ProtocolError::UnsupportedVersion(0x01))
        );
    }

    #[test]
    fn rejects_unknown_command() {
        let mut packet = vec![0x00];
        packet.extend_from_slice(sample_user().as_bytes());
        packet.push(0);
        packet.push(0x7f);

        assert_eq!(
            decode_request_header(&packet),
            Err(ProtocolError::UnsupportedCommand(0x7f))
        );
    }

    #[test]
    fn rejects_unknown_addr_type() {
        let mut packet = vec![0x00];
        packet.extend_from_slice(sample_user().as_bytes());
        packet.extend_from_slice(&[0, 0x01, 0x00, 0x50, 0x04]);

        assert_eq!(
            decode_request_header(&packet),
            Err(ProtocolError::UnsupportedAddrType(0x04))
        );
    }

    #[test]
    fn rejects_empty_domain() {
        let mut packet = vec![0x00];
        packet.extend_from_slice(sample_user().as_bytes());
        packet.extend_from_slice(&[0, 0x01, 0x00, 0x50, ATYP_DOMAIN, 0]);

        assert_eq!(decode_request_header(&packet), Err(ProtocolError::InvalidDomain));
    }

    #[test]
    fn rejects_control_bytes_in_domain() {
        let mut packet = vec![0x00];
        packet.extend_from_slice(sample_user().as_bytes());
        packet.extend_from_slice(&[0, 0x01, 0x00, 0x50, ATYP_DOMAIN, 3]);
        packet.extend_from_slice(b"a\x00b");

        assert_eq!(decode_request_header(&packet), Err(ProtocolError::InvalidDomain));
    }

    #[test]
    fn longest_domain_parses() {
        let domain = "d".repeat(255);

        let mut packet = vec![0x00];
        packet.extend_from_slice(sample_user().as_bytes());
        packet.extend_from_slice(&[0, 0x01, 0x1f, 0x90, ATYP_DOMAIN, 255]);
        packet.extend_from_slice(domain.as_bytes());

        let (request, residual_at) = decode_request_header(&packet).unwrap();
        assert_eq!(request.address, Some(Address::DomainNameAddress(domain, 8080)));
        assert_eq!(residual_at, packet.len());
    }

    #[test]
    fn truncation_anywhere_is_short_header() {
        let mut packet = Vec::new();
        let request = RequestHeader {
            version: 0,
            user: sample_user(),
            command: RequestCommand::Tcp,
            address: Some(Address::DomainNameAddress("example.com".to_string(), 80)),
        };
        encode_request_header(&mut packet, &request);

        for len in 0..packet.len() {
            assert_eq!(
                decode_request_header(&packet[..len]),
                Err(ProtocolError::ShortHeader),
                "prefix of {} bytes should be short",
                len
            );
        }
    }

    #[test]
    fn response_header_echoes_version() {
        assert_eq!(encode_response_header(0), [0x00, 0x00]);
    }
}
