//! 转向程序管理
//!
//! 内核侧 XDP 程序是协作方：它检查 以太网 → IP → UDP，命中配置
//! 端口的 DNS 报文时按 RX 队列查 XSK_MAP 并重定向到用户态 socket，
//! 其余流量放行给协议栈。这里只负责从 bpf_path 加载该程序对象、
//! 附加到网卡，并把 socket 填进它的转向表。
//!
//! 对程序对象的约定：XDP 程序名为 `xdns_filter`，转向表名为
//! `XSK_MAP`（XSKMAP，按队列号索引），可选端口表 `DNS_PORTS`
//! （HashMap<u16, u8>）。XSK_MAP 条目在对应 socket 关闭时由内核
//! 清除，因此关停时先销毁 worker 的 socket 再卸载程序。

use std::os::fd::RawFd;
use std::path::Path;

use anyhow::{Context, Result};
use aya::maps::{HashMap, XskMap};
use aya::programs::{Xdp, XdpFlags};
use aya::Ebpf;
use log::info;

use crate::config::XdpMode;

/// 协作方对象里 XDP 程序的名字
const PROGRAM_NAME: &str = "xdns_filter";
/// 转向表
const XSK_MAP: &str = "XSK_MAP";
/// DNS 端口表（可选）
const DNS_PORTS_MAP: &str = "DNS_PORTS";

pub struct Steering {
    ebpf: Ebpf,
}

impl Steering {
    /// 从文件加载协作方 BPF 对象
    pub fn load<P: AsRef<Path>>(bpf_path: P) -> Result<Self> {
        let ebpf = Ebpf::load_file(bpf_path.as_ref()).with_context(|| {
            format!("failed to load BPF object from {:?}", bpf_path.as_ref())
        })?;
        Ok(Self { ebpf })
    }

    /// 附加 XDP 程序到网卡
    pub fn attach(&mut self, iface: &str, mode: XdpMode) -> Result<()> {
        let program: &mut Xdp = self
            .ebpf
            .program_mut(PROGRAM_NAME)
            .with_context(|| format!("XDP program {:?} not found in object", PROGRAM_NAME))?
            .try_into()?;

        program.load().context("failed to load XDP program")?;

        let flags = match mode {
            XdpMode::Default => XdpFlags::default(),
            XdpMode::Skb => XdpFlags::SKB_MODE,
            XdpMode::Driver => XdpFlags::DRV_MODE,
            XdpMode::Hw => XdpFlags::HW_MODE,
        };

        program
            .attach(iface, flags)
            .with_context(|| format!("failed to attach XDP to {}", iface))?;

        info!("XDP ({:?}) attached to {}", mode, iface);
        Ok(())
    }

    /// 把 socket 注册到转向表，键为 RX 队列号
    pub fn register(&mut self, queue_id: u32, socket_fd: RawFd) -> Result<()> {
        let mut xsk: XskMap<_> = XskMap::try_from(
            self.ebpf
                .map_mut(XSK_MAP)
                .with_context(|| format!("{} map not found", XSK_MAP))?,
        )?;
        xsk.set(queue_id, socket_fd, 0)
            .with_context(|| format!("failed to register socket in {}[{}]", XSK_MAP, queue_id))?;
        info!("registered socket fd {} for queue {}", socket_fd, queue_id);
        Ok(())
    }

    /// 同步监听端口到程序的端口表；对象不带该表时跳过
    pub fn sync_ports(&mut self, ports: &[u16]) -> Result<()> {
        let map = match self.ebpf.map_mut(DNS_PORTS_MAP) {
            Some(map) => map,
            None => {
                log::debug!("{} map not present, skipping port sync", DNS_PORTS_MAP);
                return Ok(());
            }
        };

        let mut dns_ports: HashMap<_, u16, u8> = HashMap::try_from(map)?;
        for &port in ports {
            dns_ports.insert(port, 1, 0)?;
        }
        info!("synced {} DNS ports to steering program", ports.len());
        Ok(())
    }
}
