//! 链路层/网络层/传输层头部的解码与就地改写
//!
//! 收包方向：以太网 → IPv4/IPv6 → UDP，定位 DNS 负载；
//! 发包方向：在同一帧内交换 MAC、IP、端口，重算长度与校验和。

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const IPV4_MIN_HEADER_LEN: usize = 20;
pub const IPV6_HEADER_LEN: usize = 40;
pub const UDP_HEADER_LEN: usize = 8;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;
pub const IPPROTO_UDP: u8 = 17;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum PacketError {
    #[error("packet too short")]
    PacketTooShort,
    #[error("unsupported ethertype")]
    UnsupportedEtherType,
    #[error("not a UDP packet")]
    NotUdp,
    #[error("empty UDP payload")]
    EmptyPayload,
}

/// 头部解码结果
#[derive(Debug, Clone)]
pub struct PacketInfo {
    pub dst_mac: [u8; 6],
    pub src_mac: [u8; 6],
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub is_ipv6: bool,
    /// IP 头长度
    pub ip_header_len: usize,
    /// UDP 头偏移
    pub l4_offset: usize,
    /// DNS 负载偏移
    pub payload_offset: usize,
    /// DNS 负载长度
    pub payload_len: usize,
}

/// 解码帧头并定位 DNS 负载
pub fn decode(data: &[u8]) -> Result<PacketInfo, PacketError> {
    if data.len() < ETHERNET_HEADER_LEN {
        return Err(PacketError::PacketTooShort);
    }

    let mut dst_mac = [0u8; 6];
    let mut src_mac = [0u8; 6];
    dst_mac.copy_from_slice(&data[0..6]);
    src_mac.copy_from_slice(&data[6..12]);
    let ethertype = u16::from_be_bytes([data[12], data[13]]);

    let (is_ipv6, ip_header_len, protocol, src_ip, dst_ip) = match ethertype {
        ETHERTYPE_IPV4 => {
            if data.len() < ETHERNET_HEADER_LEN + IPV4_MIN_HEADER_LEN {
                return Err(PacketError::PacketTooShort);
            }
            let ihl = ((data[ETHERNET_HEADER_LEN] & 0x0F) as usize) * 4;
            if ihl < IPV4_MIN_HEADER_LEN || data.len() < ETHERNET_HEADER_LEN + ihl {
                return Err(PacketError::PacketTooShort);
            }
            let protocol = data[ETHERNET_HEADER_LEN + 9];
            let src = Ipv4Addr::new(
                data[ETHERNET_HEADER_LEN + 12],
                data[ETHERNET_HEADER_LEN + 13],
                data[ETHERNET_HEADER_LEN + 14],
                data[ETHERNET_HEADER_LEN + 15],
            );
            let dst = Ipv4Addr::new(
                data[ETHERNET_HEADER_LEN + 16],
                data[ETHERNET_HEADER_LEN + 17],
                data[ETHERNET_HEADER_LEN + 18],
                data[ETHERNET_HEADER_LEN + 19],
            );
            (false, ihl, protocol, IpAddr::V4(src), IpAddr::V4(dst))
        }
        ETHERTYPE_IPV6 => {
            if data.len() < ETHERNET_HEADER_LEN + IPV6_HEADER_LEN {
                return Err(PacketError::PacketTooShort);
            }
            // 扩展头不解析：next header 不是 UDP 就丢回 Fill
            let next_header = data[ETHERNET_HEADER_LEN + 6];
            let mut src = [0u8; 16];
            let mut dst = [0u8; 16];
            src.copy_from_slice(&data[ETHERNET_HEADER_LEN + 8..ETHERNET_HEADER_LEN + 24]);
            dst.copy_from_slice(&data[ETHERNET_HEADER_LEN + 24..ETHERNET_HEADER_LEN + 40]);
            (
                true,
                IPV6_HEADER_LEN,
                next_header,
                IpAddr::V6(Ipv6Addr::from(src)),
                IpAddr::V6(Ipv6Addr::from(dst)),
            )
        }
        _ => return Err(PacketError::UnsupportedEtherType),
    };

    if protocol != IPPROTO_UDP {
        return Err(PacketError::NotUdp);
    }

    let l4_offset = ETHERNET_HEADER_LEN + ip_header_len;
    if data.len() < l4_offset + UDP_HEADER_LEN {
        return Err(PacketError::PacketTooShort);
    }

    let src_port = u16::from_be_bytes([data[l4_offset], data[l4_offset + 1]]);
    let dst_port = u16::from_be_bytes([data[l4_offset + 2], data[l4_offset + 3]]);
    let udp_len = u16::from_be_bytes([data[l4_offset + 4], data[l4_offset + 5]]) as usize;

    let payload_offset = l4_offset + UDP_HEADER_LEN;
    let payload_end = (l4_offset + udp_len).min(data.len());
    if payload_end <= payload_offset {
        return Err(PacketError::EmptyPayload);
    }

    Ok(PacketInfo {
        dst_mac,
        src_mac,
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        is_ipv6,
        ip_header_len,
        l4_offset,
        payload_offset,
        payload_len: payload_end - payload_offset,
    })
}

/// 在帧内就地把查询改写为响应方向的报文。
///
/// 调用前 DNS 响应已写在 payload_offset 起的 dns_len 字节；这里交换
/// MAC/IP/端口，重算 IP 与 UDP 的长度和校验和，返回新的帧长。
pub fn rewrite_response(frame: &mut [u8], info: &PacketInfo, dns_len: usize) -> usize {
    // 交换以太网源/目的 MAC
    let mut tmp = [0u8; 6];
    tmp.copy_from_slice(&frame[0..6]);
    frame.copy_within(6..12, 0);
    frame[6..12].copy_from_slice(&tmp);

    let udp_len = UDP_HEADER_LEN + dns_len;

    if info.is_ipv6 {
        // 交换 IPv6 源/目的地址
        let mut addr = [0u8; 16];
        addr.copy_from_slice(&frame[ETHERNET_HEADER_LEN + 8..ETHERNET_HEADER_LEN + 24]);
        frame.copy_within(
            ETHERNET_HEADER_LEN + 24..ETHERNET_HEADER_LEN + 40,
            ETHERNET_HEADER_LEN + 8,
        );
        frame[ETHERNET_HEADER_LEN + 24..ETHERNET_HEADER_LEN + 40].copy_from_slice(&addr);

        // payload length
        frame[ETHERNET_HEADER_LEN + 4..ETHERNET_HEADER_LEN + 6]
            .copy_from_slice(&(udp_len as u16).to_be_bytes());
    } else {
        // 交换 IPv4 源/目的地址
        let mut addr = [0u8; 4];
        addr.copy_from_slice(&frame[ETHERNET_HEADER_LEN + 12..ETHERNET_HEADER_LEN + 16]);
        frame.copy_within(
            ETHERNET_HEADER_LEN + 16..ETHERNET_HEADER_LEN + 20,
            ETHERNET_HEADER_LEN + 12,
        );
        frame[ETHERNET_HEADER_LEN + 16..ETHERNET_HEADER_LEN + 20].copy_from_slice(&addr);

        // total length 与头校验和
        let total_len = info.ip_header_len + udp_len;
        frame[ETHERNET_HEADER_LEN + 2..ETHERNET_HEADER_LEN + 4]
            .copy_from_slice(&(total_len as u16).to_be_bytes());
        frame[ETHERNET_HEADER_LEN + 10..ETHERNET_HEADER_LEN + 12].copy_from_slice(&[0, 0]);
        let csum = ipv4_header_checksum(
            &frame[ETHERNET_HEADER_LEN..ETHERNET_HEADER_LEN + info.ip_header_len],
        );
        frame[ETHERNET_HEADER_LEN + 10..ETHERNET_HEADER_LEN + 12]
            .copy_from_slice(&csum.to_be_bytes());
    }

    // 交换 UDP 端口
    let l4 = info.l4_offset;
    let mut port = [0u8; 2];
    port.copy_from_slice(&frame[l4..l4 + 2]);
    frame.copy_within(l4 + 2..l4 + 4, l4);
    frame[l4 + 2..l4 + 4].copy_from_slice(&port);

    // UDP 长度
    frame[l4 + 4..l4 + 6].copy_from_slice(&(udp_len as u16).to_be_bytes());

    if info.is_ipv6 {
        // IPv6 要求 UDP 校验和，基于伪头计算
        frame[l4 + 6..l4 + 8].copy_from_slice(&[0, 0]);
        let csum = udp6_checksum(
            &frame[ETHERNET_HEADER_LEN + 8..ETHERNET_HEADER_LEN + 24],
            &frame[ETHERNET_HEADER_LEN + 24..ETHERNET_HEADER_LEN + 40],
            &frame[l4..l4 + udp_len],
        );
        frame[l4 + 6..l4 + 8].copy_from_slice(&csum.to_be_bytes());
    } else {
        // IPv4 下 UDP 校验和可省略
        frame[l4 + 6..l4 + 8].copy_from_slice(&[0, 0]);
    }

    info.payload_offset + dns_len
}

fn sum_words(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// IPv4 头校验和。调用前头内校验和字段须已清零。
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    fold(sum_words(header, 0))
}

/// IPv6 UDP 校验和：伪头（源地址、目的地址、UDP 长度、下一头部 17）
/// 加 UDP 头与负载。调用前 UDP 校验和字段须已清零；结果为 0 时按
/// RFC 2460 取 0xFFFF。
pub fn udp6_checksum(src: &[u8], dst: &[u8], udp: &[u8]) -> u16 {
    let mut sum = 0u32;
    sum = sum_words(src, sum);
    sum = sum_words(dst, sum);
    sum += udp.len() as u32;
    sum += u32::from(IPPROTO_UDP);
    sum = sum_words(udp, sum);
    let csum = fold(sum);
    if csum == 0 {
        0xFFFF
    } else {
        csum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_ipv4_frame(dns: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01]); // dst mac
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x02]); // src mac
        frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

        let total_len = (IPV4_MIN_HEADER_LEN + UDP_HEADER_LEN + dns.len()) as u16;
        let mut ip = vec![
            0x45, 0x00, // version + ihl, dscp
            (total_len >> 8) as u8,
            total_len as u8,
            0, 0, 0x40, 0, // id, flags
            64, IPPROTO_UDP, 0, 0, // ttl, proto, checksum
            192, 0, 2, 10, // src
            192, 0, 2, 53, // dst
        ];
        ip[10..12].copy_from_slice(&[0, 0]);
        let csum = ipv4_header_checksum(&ip);
        ip[10..12].copy_from_slice(&csum.to_be_bytes());
        frame.extend_from_slice(&ip);

        let udp_len = (UDP_HEADER_LEN + dns.len()) as u16;
        frame.extend_from_slice(&51511u16.to_be_bytes()); // src port
        frame.extend_from_slice(&53u16.to_be_bytes()); // dst port
        frame.extend_from_slice(&udp_len.to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(dns);
        frame
    }

    fn build_ipv6_frame(dns: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x02]);
        frame.extend_from_slice(&ETHERTYPE_IPV6.to_be_bytes());

        let payload_len = (UDP_HEADER_LEN + dns.len()) as u16;
        frame.extend_from_slice(&[0x60, 0, 0, 0]); // version
        frame.extend_from_slice(&payload_len.to_be_bytes());
        frame.push(IPPROTO_UDP);
        frame.push(64); // hop limit
        let src: Ipv6Addr = "2001:db8::10".parse().unwrap();
        let dst: Ipv6Addr = "2001:db8::53".parse().unwrap();
        frame.extend_from_slice(&src.octets());
        frame.extend_from_slice(&dst.octets());

        frame.extend_from_slice(&51511u16.to_be_bytes());
        frame.extend_from_slice(&53u16.to_be_bytes());
        frame.extend_from_slice(&payload_len.to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(dns);
        frame
    }

    #[test]
    fn decode_ipv4() {
        let dns = vec![0xAB; 32];
        let frame = build_ipv4_frame(&dns);
        let info = decode(&frame).unwrap();
        assert!(!info.is_ipv6);
        assert_eq!(info.src_port, 51511);
        assert_eq!(info.dst_port, 53);
        assert_eq!(info.src_ip, "192.0.2.10".parse::<IpAddr>().unwrap());
        assert_eq!(info.dst_ip, "192.0.2.53".parse::<IpAddr>().unwrap());
        assert_eq!(info.payload_offset, 42);
        assert_eq!(info.payload_len, 32);
    }

    #[test]
    fn decode_ipv6() {
        let dns = vec![0xCD; 24];
        let frame = build_ipv6_frame(&dns);
        let info = decode(&frame).unwrap();
        assert!(info.is_ipv6);
        assert_eq!(info.payload_offset, 14 + 40 + 8);
        assert_eq!(info.payload_len, 24);
    }

    #[test]
    fn decode_rejects_non_ip() {
        let mut frame = build_ipv4_frame(&[0u8; 16]);
        frame[12] = 0x08;
        frame[13] = 0x06; // ARP
        assert_eq!(decode(&frame).unwrap_err(), PacketError::UnsupportedEtherType);
    }

    #[test]
    fn decode_rejects_tcp() {
        let mut frame = build_ipv4_frame(&[0u8; 16]);
        frame[ETHERNET_HEADER_LEN + 9] = 6; // TCP
        assert_eq!(decode(&frame).unwrap_err(), PacketError::NotUdp);
    }

    #[test]
    fn decode_rejects_ipv6_extension_header() {
        let mut frame = build_ipv6_frame(&[0u8; 16]);
        frame[ETHERNET_HEADER_LEN + 6] = 43; // routing header
        assert_eq!(decode(&frame).unwrap_err(), PacketError::NotUdp);
    }

    #[test]
    fn decode_rejects_short_frame() {
        assert_eq!(decode(&[0u8; 10]).unwrap_err(), PacketError::PacketTooShort);
    }

    #[test]
    fn rewrite_ipv4_swaps_and_checksums() {
        let dns = vec![0x11; 20];
        let mut frame = build_ipv4_frame(&dns);
        let info = decode(&frame).unwrap();

        let new_len = rewrite_response(&mut frame, &info, 20);
        assert_eq!(new_len, info.payload_offset + 20);

        // MAC 交换
        assert_eq!(&frame[0..6], &[0x02, 0, 0, 0, 0, 0x02]);
        assert_eq!(&frame[6..12], &[0x02, 0, 0, 0, 0, 0x01]);
        // IP 交换
        assert_eq!(&frame[26..30], &[192, 0, 2, 53]);
        assert_eq!(&frame[30..34], &[192, 0, 2, 10]);
        // 端口交换
        assert_eq!(u16::from_be_bytes([frame[34], frame[35]]), 53);
        assert_eq!(u16::from_be_bytes([frame[36], frame[37]]), 51511);
        // UDP 长度
        assert_eq!(u16::from_be_bytes([frame[38], frame[39]]), 28);
        // IPv4 头校验和自洽：对含校验和的头求和折叠应为 0
        let sum = super::sum_words(&frame[14..34], 0);
        assert_eq!(super::fold(sum), 0);
        // IPv4 不填 UDP 校验和
        assert_eq!(&frame[40..42], &[0, 0]);
    }

    #[test]
    fn rewrite_ipv6_udp_checksum_verifies() {
        let dns = vec![0x22; 17];
        let mut frame = build_ipv6_frame(&dns);
        let info = decode(&frame).unwrap();

        rewrite_response(&mut frame, &info, 17);

        let l4 = info.l4_offset;
        let udp_len = UDP_HEADER_LEN + 17;
        // 含校验和字段整体再算一遍，伪头 + UDP 的和折叠前应为 0xFFFF
        let mut sum = 0u32;
        sum = super::sum_words(&frame[14 + 8..14 + 24], sum);
        sum = super::sum_words(&frame[14 + 24..14 + 40], sum);
        sum += udp_len as u32;
        sum += u32::from(IPPROTO_UDP);
        sum = super::sum_words(&frame[l4..l4 + udp_len], sum);
        assert_eq!(super::fold(sum), 0);
    }
}
