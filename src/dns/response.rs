//! DNS 响应构建器
//!
//! 在调用方缓冲区内就地构建响应：缓冲区头部必须已经放好查询的
//! 0..question_end 字节（worker 直接复用帧内的查询），回答记录用
//! 压缩指针 0xC0 0x0C 引用问题中的域名。缓冲区不够时返回 0。

use std::net::{Ipv4Addr, Ipv6Addr};

use super::{CLASS_IN, DNS_HEADER_SIZE, RCODE_NXDOMAIN, RCODE_REFUSED, TYPE_A, TYPE_AAAA};

/// A 记录回答的固定长度: 指针 2 + 类型 2 + 类别 2 + TTL 4 + 长度 2 + IPv4 4
pub const A_ANSWER_SIZE: usize = 16;

/// AAAA 记录回答的固定长度: 同上，地址为 16 字节
pub const AAAA_ANSWER_SIZE: usize = 28;

/// 构建 NXDOMAIN 响应，返回响应总长
pub fn build_nxdomain(buf: &mut [u8], question_end: usize) -> usize {
    build_negative(buf, question_end, RCODE_NXDOMAIN)
}

/// 构建 REFUSED 响应，返回响应总长
pub fn build_refused(buf: &mut [u8], question_end: usize) -> usize {
    build_negative(buf, question_end, RCODE_REFUSED)
}

fn build_negative(buf: &mut [u8], question_end: usize, rcode: u16) -> usize {
    if question_end < DNS_HEADER_SIZE || buf.len() < question_end {
        return 0;
    }

    // QR=1, RA=1, 清空 RCODE 后置入目标码；其余查询标志位保留
    let mut flags = u16::from_be_bytes([buf[2], buf[3]]);
    flags |= 0x8000;
    flags |= 0x0080;
    flags &= 0xFFF0;
    flags |= rcode;
    buf[2..4].copy_from_slice(&flags.to_be_bytes());

    // ANCOUNT = NSCOUNT = ARCOUNT = 0
    buf[6..12].fill(0);

    question_end
}

/// 构建正向回答的公共头部: QR=1, AA=1, RA=1, RCODE=0, ANCOUNT=1
fn set_answer_header(buf: &mut [u8]) {
    let mut flags = u16::from_be_bytes([buf[2], buf[3]]);
    flags |= 0x8000;
    flags |= 0x0400;
    flags |= 0x0080;
    flags &= 0xFFF0;
    buf[2..4].copy_from_slice(&flags.to_be_bytes());

    buf[6..8].copy_from_slice(&1u16.to_be_bytes());
    buf[8..12].fill(0);
}

/// 写入回答记录的固定部分，返回 rdata 起始偏移
fn write_answer_prefix(buf: &mut [u8], offset: usize, rtype: u16, ttl: u32, rdlen: u16) -> usize {
    let mut pos = offset;
    // 压缩指针指向问题中的域名
    buf[pos] = 0xC0;
    buf[pos + 1] = DNS_HEADER_SIZE as u8;
    pos += 2;
    buf[pos..pos + 2].copy_from_slice(&rtype.to_be_bytes());
    pos += 2;
    buf[pos..pos + 2].copy_from_slice(&CLASS_IN.to_be_bytes());
    pos += 2;
    buf[pos..pos + 4].copy_from_slice(&ttl.to_be_bytes());
    pos += 4;
    buf[pos..pos + 2].copy_from_slice(&rdlen.to_be_bytes());
    pos + 2
}

/// 构建 A 记录响应，返回响应总长
pub fn build_a_answer(buf: &mut [u8], question_end: usize, addr: Ipv4Addr, ttl: u32) -> usize {
    let total = question_end + A_ANSWER_SIZE;
    if question_end < DNS_HEADER_SIZE || buf.len() < total {
        return 0;
    }

    set_answer_header(buf);
    let rdata = write_answer_prefix(buf, question_end, TYPE_A, ttl, 4);
    buf[rdata..rdata + 4].copy_from_slice(&addr.octets());

    total
}

/// 构建 AAAA 记录响应，返回响应总长
pub fn build_aaaa_answer(buf: &mut [u8], question_end: usize, addr: Ipv6Addr, ttl: u32) -> usize {
    let total = question_end + AAAA_ANSWER_SIZE;
    if question_end < DNS_HEADER_SIZE || buf.len() < total {
        return 0;
    }

    set_answer_header(buf);
    let rdata = write_answer_prefix(buf, question_end, TYPE_AAAA, ttl, 16);
    buf[rdata..rdata + 16].copy_from_slice(&addr.octets());

    total
}
