//! DNS 报文解析器（零拷贝）
//!
//! 只解析第一个问题，不复制域名字节。解析结果借用报文缓冲区，
//! 生命周期不得超过对应的 RX 描述符。

use thiserror::Error;

use super::{DNS_HEADER_SIZE, MAX_LABEL_LENGTH, MAX_POINTER_JUMPS, MIN_DNS_QUERY_SIZE};

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum DnsError {
    #[error("DNS message too short")]
    PacketTooShort,
    #[error("DNS invalid header")]
    InvalidHeader,
    #[error("DNS message truncated")]
    TruncatedMessage,
    #[error("DNS invalid label")]
    InvalidLabel,
    #[error("DNS pointer loop detected")]
    PointerLoop,
    #[error("output buffer too small")]
    BufferTooSmall,
}

/// 第一个问题的解析结果，借用报文字节
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Question<'a> {
    packet: &'a [u8],
    /// 事务 ID
    pub id: u16,
    /// 标志位
    pub flags: u16,
    /// 查询类型
    pub qtype: u16,
    /// 查询类别
    pub qclass: u16,
    /// 域名在报文中的偏移
    pub name_offset: usize,
    /// 域名的线上长度（按未压缩形式计）
    pub name_wire_len: usize,
    /// 第一个问题结束后的偏移
    pub question_end: usize,
}

impl<'a> Question<'a> {
    /// 是否为查询报文
    pub fn is_query(&self) -> bool {
        self.flags & super::FLAG_QR == 0
    }

    /// 将域名解码为小写点分形式，写入调用方缓冲区，返回长度。
    /// 不分配内存。
    pub fn decode_name(&self, out: &mut [u8]) -> Result<usize, DnsError> {
        decode_name(self.packet, self.name_offset, out)
    }
}

/// 解析 DNS 报文的第一个问题
pub fn parse(data: &[u8]) -> Result<Question<'_>, DnsError> {
    if data.len() < MIN_DNS_QUERY_SIZE {
        return Err(DnsError::PacketTooShort);
    }

    let id = u16::from_be_bytes([data[0], data[1]]);
    let flags = u16::from_be_bytes([data[2], data[3]]);
    let qdcount = u16::from_be_bytes([data[4], data[5]]);

    if qdcount == 0 {
        return Err(DnsError::InvalidHeader);
    }

    let name_offset = DNS_HEADER_SIZE;
    let (name_end, name_wire_len) = parse_name(data, name_offset)?;

    if name_end + 4 > data.len() {
        return Err(DnsError::TruncatedMessage);
    }

    let qtype = u16::from_be_bytes([data[name_end], data[name_end + 1]]);
    let qclass = u16::from_be_bytes([data[name_end + 2], data[name_end + 3]]);

    Ok(Question {
        packet: data,
        id,
        flags,
        qtype,
        qclass,
        name_offset,
        name_wire_len,
        question_end: name_end + 4,
    })
}

/// 遍历域名，返回 (名字在原始流中的结束偏移, 未压缩线上长度)。
///
/// 指针目标允许指向任意方向，防环靠跳转计数上限。
fn parse_name(data: &[u8], mut offset: usize) -> Result<(usize, usize), DnsError> {
    let mut end_offset = 0usize;
    let mut jumped = false;
    let mut jump_count = 0usize;
    let mut wire_len = 0usize;

    loop {
        if offset >= data.len() {
            return Err(DnsError::TruncatedMessage);
        }

        let label_len = data[offset] as usize;

        // 域名结束
        if label_len == 0 {
            if !jumped {
                end_offset = offset + 1;
            }
            return Ok((end_offset, wire_len + 1));
        }

        // 压缩指针
        if label_len & 0xC0 == 0xC0 {
            if offset + 1 >= data.len() {
                return Err(DnsError::TruncatedMessage);
            }
            let ptr = ((label_len & 0x3F) << 8) | data[offset + 1] as usize;
            if ptr >= data.len() {
                return Err(DnsError::PointerLoop);
            }
            jump_count += 1;
            if jump_count > MAX_POINTER_JUMPS {
                return Err(DnsError::PointerLoop);
            }
            if !jumped {
                end_offset = offset + 2;
                jumped = true;
            }
            offset = ptr;
            continue;
        }

        if label_len > MAX_LABEL_LENGTH {
            return Err(DnsError::InvalidLabel);
        }

        if offset + 1 + label_len > data.len() {
            return Err(DnsError::TruncatedMessage);
        }

        wire_len += 1 + label_len;
        offset += 1 + label_len;
    }
}

/// 从任意偏移解码域名为小写点分形式
pub fn decode_name(packet: &[u8], name_offset: usize, out: &mut [u8]) -> Result<usize, DnsError> {
    let mut offset = name_offset;
    let mut pos = 0usize;
    let mut jump_count = 0usize;
    let mut first_label = true;

    loop {
        if offset >= packet.len() {
            return Err(DnsError::TruncatedMessage);
        }

        let label_len = packet[offset] as usize;

        if label_len == 0 {
            return Ok(pos);
        }

        if label_len & 0xC0 == 0xC0 {
            if offset + 1 >= packet.len() {
                return Err(DnsError::TruncatedMessage);
            }
            let ptr = ((label_len & 0x3F) << 8) | packet[offset + 1] as usize;
            if ptr >= packet.len() {
                return Err(DnsError::PointerLoop);
            }
            jump_count += 1;
            if jump_count > MAX_POINTER_JUMPS {
                return Err(DnsError::PointerLoop);
            }
            offset = ptr;
            continue;
        }

        if label_len > MAX_LABEL_LENGTH {
            return Err(DnsError::InvalidLabel);
        }

        if offset + 1 + label_len > packet.len() {
            return Err(DnsError::TruncatedMessage);
        }

        if !first_label {
            if pos >= out.len() {
                return Err(DnsError::BufferTooSmall);
            }
            out[pos] = b'.';
            pos += 1;
        }
        first_label = false;

        if pos + label_len > out.len() {
            return Err(DnsError::BufferTooSmall);
        }
        for i in 0..label_len {
            out[pos + i] = packet[offset + 1 + i].to_ascii_lowercase();
        }
        pos += label_len;
        offset += 1 + label_len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{MAX_DOMAIN_LENGTH, TYPE_A};

    /// 构造一个简单的 DNS 查询报文
    fn build_query(domain: &str, qtype: u16) -> Vec<u8> {
        let mut packet = vec![
            0x12, 0x34, // ID
            0x01, 0x00, // Flags (standard query, RD)
            0x00, 0x01, // QDCOUNT
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        for part in domain.split('.') {
            packet.push(part.len() as u8);
            packet.extend_from_slice(part.as_bytes());
        }
        packet.push(0);
        packet.extend_from_slice(&qtype.to_be_bytes());
        packet.extend_from_slice(&1u16.to_be_bytes());
        packet
    }

    #[test]
    fn parse_simple_query() {
        let packet = build_query("www.example.com", TYPE_A);
        let q = parse(&packet).unwrap();
        assert_eq!(q.id, 0x1234);
        assert_eq!(q.qtype, TYPE_A);
        assert_eq!(q.qclass, 1);
        assert!(q.is_query());
        assert_eq!(q.name_offset, 12);
        assert_eq!(q.question_end, packet.len());
        // www.example.com: 1+3 + 1+7 + 1+3 + 1 = 17
        assert_eq!(q.name_wire_len, 17);

        let mut buf = [0u8; MAX_DOMAIN_LENGTH];
        let n = q.decode_name(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"www.example.com");
    }

    #[test]
    fn decode_lowercases() {
        let packet = build_query("ExAmPle.COM", TYPE_A);
        let q = parse(&packet).unwrap();
        let mut buf = [0u8; MAX_DOMAIN_LENGTH];
        let n = q.decode_name(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"example.com");
    }

    #[test]
    fn too_short() {
        assert_eq!(parse(&[0u8; 16]), Err(DnsError::PacketTooShort));
    }

    #[test]
    fn zero_qdcount() {
        let mut packet = build_query("example.com", TYPE_A);
        packet[4] = 0;
        packet[5] = 0;
        assert_eq!(parse(&packet).unwrap_err(), DnsError::InvalidHeader);
    }

    #[test]
    fn truncated_type_class() {
        let mut packet = build_query("example.com", TYPE_A);
        packet.truncate(packet.len() - 2);
        assert_eq!(parse(&packet).unwrap_err(), DnsError::TruncatedMessage);
    }

    #[test]
    fn label_runs_past_buffer() {
        let mut packet = build_query("example.com", TYPE_A);
        // 把第一个标签长度改大，使其越过缓冲区
        packet[12] = 60;
        assert_eq!(parse(&packet).unwrap_err(), DnsError::TruncatedMessage);
    }

    #[test]
    fn forward_pointer_resolves_like_uncompressed() {
        // 头部 + 指针指向报文尾部存放的 example.com
        let mut packet = vec![
            0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        // name = 指针 -> offset 18
        packet.extend_from_slice(&[0xC0, 18]);
        packet.extend_from_slice(&1u16.to_be_bytes()); // qtype
        packet.extend_from_slice(&1u16.to_be_bytes()); // qclass
        // offset 18: example.com
        packet.push(7);
        packet.extend_from_slice(b"example");
        packet.push(3);
        packet.extend_from_slice(b"com");
        packet.push(0);

        let q = parse(&packet).unwrap();
        assert_eq!(q.question_end, 18); // 指针 2 字节 + 4 字节类型/类别
        assert_eq!(q.name_wire_len, 13); // 未压缩形式 1+7+1+3+1

        let plain = build_query("example.com", TYPE_A);
        let qp = parse(&plain).unwrap();

        let mut a = [0u8; MAX_DOMAIN_LENGTH];
        let mut b = [0u8; MAX_DOMAIN_LENGTH];
        let na = q.decode_name(&mut a).unwrap();
        let nb = qp.decode_name(&mut b).unwrap();
        assert_eq!(&a[..na], &b[..nb]);
    }

    /// 构造一个名字经过 `hops` 次指针跳转的查询报文
    fn build_chained_query(hops: usize) -> Vec<u8> {
        let mut packet = vec![
            0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let chain_start = 18usize;
        // 问题的名字是一个指针，指向链头
        packet.extend_from_slice(&[0xC0 | ((chain_start >> 8) as u8), chain_start as u8]);
        packet.extend_from_slice(&1u16.to_be_bytes());
        packet.extend_from_slice(&1u16.to_be_bytes());
        // 链上剩余 hops-1 个指针，逐个指向下一个
        for i in 0..hops - 1 {
            let next = chain_start + 2 * (i + 1);
            packet.extend_from_slice(&[0xC0 | ((next >> 8) as u8), next as u8]);
        }
        packet.push(1);
        packet.push(b'a');
        packet.push(0);
        packet
    }

    #[test]
    fn pointer_chain_at_limit_parses() {
        let packet = build_chained_query(MAX_POINTER_JUMPS);
        let q = parse(&packet).unwrap();
        assert_eq!(q.question_end, 18);
        let mut buf = [0u8; MAX_DOMAIN_LENGTH];
        let n = q.decode_name(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"a");
    }

    #[test]
    fn pointer_chain_past_limit_rejected() {
        let packet = build_chained_query(MAX_POINTER_JUMPS + 1);
        assert_eq!(parse(&packet).unwrap_err(), DnsError::PointerLoop);
    }

    #[test]
    fn pointer_loop_detected() {
        // 自指指针：每次跳转回到同一偏移
        let mut packet = vec![
            0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        packet.extend_from_slice(&[0xC0, 12]); // 指向自身
        packet.extend_from_slice(&[0, 1, 0, 1]);
        assert_eq!(parse(&packet).unwrap_err(), DnsError::PointerLoop);
    }

    #[test]
    fn pointer_past_buffer_rejected() {
        let mut packet = vec![
            0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        packet.extend_from_slice(&[0xFF, 0xFF]);
        packet.extend_from_slice(&[0, 1, 0, 1]);
        assert_eq!(parse(&packet).unwrap_err(), DnsError::PointerLoop);
    }

    #[test]
    fn decode_buffer_too_small() {
        let packet = build_query("www.example.com", TYPE_A);
        let q = parse(&packet).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(q.decode_name(&mut buf).unwrap_err(), DnsError::BufferTooSmall);
    }

    #[test]
    fn question_end_never_exceeds_len() {
        // 随机选一些畸形输入，成功时 question_end 必须落在缓冲区内
        let samples: Vec<Vec<u8>> = vec![
            build_query("a.b", TYPE_A),
            build_query("x", TYPE_A),
            vec![0u8; 17],
            vec![0xFF; 32],
        ];
        for data in &samples {
            if let Ok(q) = parse(data) {
                assert!(q.question_end <= data.len());
            }
        }
    }
}
