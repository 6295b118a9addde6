//! AF_XDP socket
//!
//! 一个 socket 绑定一个 (ifindex, queue) 对，独占自己的 UMEM 与
//! Fill/RX/TX/Completion 四个环。建立流程：创建 socket → 注册
//! UMEM → 设定环大小 → mmap 各环 → bind。任何一步失败都是
//! 致命错误，由上层终止进程。

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use super::ring::{Ring, RingKind};
use super::umem::Umem;
use super::{
    SockaddrXdp, XdpDesc, XdpError, XdpMmapOffsets, SOL_XDP, XDP_COPY, XDP_MMAP_OFFSETS,
    XDP_PGOFF_RX_RING, XDP_PGOFF_TX_RING, XDP_RX_RING, XDP_TX_RING, XDP_UMEM_COMPLETION_RING,
    XDP_UMEM_FILL_RING, XDP_UMEM_PGOFF_COMPLETION_RING, XDP_UMEM_PGOFF_FILL_RING, XDP_UMEM_REG,
    XDP_USE_NEED_WAKEUP,
};

/// socket 建立参数，对应配置文件的 xdp 段
#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub num_frames: u32,
    pub frame_size: u32,
    pub fill_ring_size: u32,
    pub comp_ring_size: u32,
    pub rx_ring_size: u32,
    pub tx_ring_size: u32,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            num_frames: 4096,
            frame_size: 2048,
            fill_ring_size: 2048,
            comp_ring_size: 2048,
            rx_ring_size: 2048,
            tx_ring_size: 2048,
        }
    }
}

impl SocketOptions {
    pub fn validate(&self) -> Result<(), XdpError> {
        for (name, size) in [
            ("fill_ring_size", self.fill_ring_size),
            ("comp_ring_size", self.comp_ring_size),
            ("rx_ring_size", self.rx_ring_size),
            ("tx_ring_size", self.tx_ring_size),
        ] {
            if size == 0 || !size.is_power_of_two() {
                return Err(XdpError::InvalidOption(format!(
                    "{} must be a power of two, got {}",
                    name, size
                )));
            }
        }
        Ok(())
    }
}

pub struct XdpSocket {
    fd: OwnedFd,
    umem: Umem,
    fill: Ring,
    rx: Ring,
    tx: Ring,
    comp: Ring,
}

impl XdpSocket {
    /// 创建并绑定到 (ifindex, queue_id)
    pub fn new(ifindex: u32, queue_id: u32, opts: &SocketOptions) -> Result<Self, XdpError> {
        opts.validate()?;

        let raw = unsafe { libc::socket(libc::AF_XDP, libc::SOCK_RAW, 0) };
        if raw < 0 {
            return Err(XdpError::syscall("socket(AF_XDP)"));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let umem = Umem::new(opts.num_frames, opts.frame_size)?;

        // 注册 UMEM
        let reg = umem.as_reg();
        setsockopt(raw, XDP_UMEM_REG, &reg)?;

        // 设定四个环的大小
        setsockopt(raw, XDP_UMEM_FILL_RING, &opts.fill_ring_size)?;
        setsockopt(raw, XDP_UMEM_COMPLETION_RING, &opts.comp_ring_size)?;
        setsockopt(raw, XDP_RX_RING, &opts.rx_ring_size)?;
        setsockopt(raw, XDP_TX_RING, &opts.tx_ring_size)?;

        // 取各环的 mmap 偏移
        let mut offsets = XdpMmapOffsets::default();
        let mut optlen = std::mem::size_of::<XdpMmapOffsets>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                raw,
                SOL_XDP,
                XDP_MMAP_OFFSETS,
                &mut offsets as *mut _ as *mut libc::c_void,
                &mut optlen,
            )
        };
        if ret < 0 {
            return Err(XdpError::syscall("getsockopt(XDP_MMAP_OFFSETS)"));
        }

        let fill = Ring::map(
            raw,
            XDP_UMEM_PGOFF_FILL_RING,
            opts.fill_ring_size,
            &offsets.fr,
            RingKind::Addr,
        )?;
        let comp = Ring::map(
            raw,
            XDP_UMEM_PGOFF_COMPLETION_RING,
            opts.comp_ring_size,
            &offsets.cr,
            RingKind::Addr,
        )?;
        let rx = Ring::map(
            raw,
            XDP_PGOFF_RX_RING,
            opts.rx_ring_size,
            &offsets.rx,
            RingKind::Desc,
        )?;
        let tx = Ring::map(
            raw,
            XDP_PGOFF_TX_RING,
            opts.tx_ring_size,
            &offsets.tx,
            RingKind::Desc,
        )?;

        // 绑定。老内核不认 need_wakeup 标志时退回拷贝模式。
        let mut addr = SockaddrXdp {
            sxdp_family: libc::AF_XDP as u16,
            sxdp_flags: XDP_USE_NEED_WAKEUP,
            sxdp_ifindex: ifindex,
            sxdp_queue_id: queue_id,
            sxdp_shared_umem_fd: 0,
        };
        if bind_xdp(raw, &addr).is_err() {
            addr.sxdp_flags = XDP_COPY;
            bind_xdp(raw, &addr)?;
        }

        let mut socket = Self {
            fd,
            umem,
            fill,
            rx,
            tx,
            comp,
        };

        // 预填充 Fill 环，告知内核可用帧
        socket.replenish_fill();

        Ok(socket)
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// 把空闲表里的帧尽量搬进 Fill 环，返回发布数量
    pub fn replenish_fill(&mut self) -> usize {
        let mut prod = self.fill.load_producer();
        let cons = self.fill.load_consumer();
        let mut slots = self.fill.size() - prod.wrapping_sub(cons);
        let mut published = 0usize;

        while slots > 0 {
            match self.umem.pop_free() {
                Some(addr) => {
                    self.fill.write_addr(prod, addr);
                    prod = prod.wrapping_add(1);
                    slots -= 1;
                    published += 1;
                }
                None => break,
            }
        }
        if published > 0 {
            self.fill.store_producer(prod);
        }
        published
    }

    /// 交还一个帧到空闲表；下一次 replenish_fill 会把它送回内核
    pub fn recycle(&mut self, addr: u64) {
        self.umem.push_free(addr);
    }

    /// 从 RX 环批量取描述符，最多 max 个
    pub fn peek_rx(&mut self, max: usize, out: &mut Vec<XdpDesc>) -> usize {
        out.clear();
        let cons = self.rx.load_consumer();
        let avail = self.rx.available_entries().min(max as u32);
        for i in 0..avail {
            out.push(self.rx.read_desc(cons.wrapping_add(i)));
        }
        if avail > 0 {
            self.rx.store_consumer(cons.wrapping_add(avail));
        }
        avail as usize
    }

    /// 把描述符排入 TX 环。环满时只收下放得进去的部分，
    /// 返回实际入环数量；绝不阻塞。
    pub fn submit_tx(&mut self, descs: &[XdpDesc]) -> usize {
        let prod = self.tx.load_producer();
        let cons = self.tx.load_consumer();
        let free = (self.tx.size() - prod.wrapping_sub(cons)).min(descs.len() as u32);
        for i in 0..free {
            self.tx.write_desc(prod.wrapping_add(i), descs[i as usize]);
        }
        if free > 0 {
            self.tx.store_producer(prod.wrapping_add(free));
        }
        free as usize
    }

    /// 回收内核已发完的帧，重新进入空闲表
    pub fn reap_completions(&mut self, max: usize) -> usize {
        let cons = self.comp.load_consumer();
        let avail = self.comp.available_entries().min(max as u32);
        for i in 0..avail {
            let addr = self.comp.read_addr(cons.wrapping_add(i));
            self.umem.push_free(addr);
        }
        if avail > 0 {
            self.comp.store_consumer(cons.wrapping_add(avail));
        }
        avail as usize
    }

    /// 发布 TX 后按需唤醒内核发送
    pub fn kick_tx(&self) -> Result<(), XdpError> {
        if !self.tx.needs_wakeup() {
            return Ok(());
        }
        let ret = unsafe {
            libc::sendto(
                self.fd(),
                std::ptr::null(),
                0,
                libc::MSG_DONTWAIT,
                std::ptr::null(),
                0,
            )
        };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                // 发送路径忙时内核稍后自取，不算错误
                Some(libc::EAGAIN) | Some(libc::EBUSY) | Some(libc::ENOBUFS)
                | Some(libc::ENETDOWN) => return Ok(()),
                _ => {
                    return Err(XdpError::Syscall {
                        op: "sendto(tx wakeup)",
                        source: err,
                    })
                }
            }
        }
        Ok(())
    }

    /// 发布 Fill 后按需唤醒内核收包
    pub fn kick_fill(&self) -> Result<(), XdpError> {
        if !self.fill.needs_wakeup() {
            return Ok(());
        }
        let ret = unsafe {
            libc::recvfrom(
                self.fd(),
                std::ptr::null_mut(),
                0,
                libc::MSG_DONTWAIT,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if !matches!(
                err.raw_os_error(),
                Some(libc::EAGAIN) | Some(libc::EBUSY) | Some(libc::ENETDOWN)
            ) {
                return Err(XdpError::Syscall {
                    op: "recvfrom(fill wakeup)",
                    source: err,
                });
            }
        }
        Ok(())
    }

    /// 在空 RX 环上有界等待，返回是否可读。EINTR 视为超时。
    pub fn poll_rx(&self, timeout_ms: i32) -> Result<bool, XdpError> {
        let mut pollfd = libc::pollfd {
            fd: self.fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(XdpError::Syscall {
                op: "poll",
                source: err,
            });
        }
        Ok(ret > 0 && pollfd.revents & libc::POLLIN != 0)
    }

    /// 描述符指向的帧字节
    pub fn frame_bytes(&mut self, desc: &XdpDesc) -> Option<&mut [u8]> {
        self.umem.frame_bytes(desc.addr, desc.len as usize)
    }

    /// 整帧可写视图（含响应扩展空间）
    pub fn frame_capacity(&mut self, addr: u64) -> Option<&mut [u8]> {
        self.umem.frame_capacity(addr)
    }

    pub fn free_frames(&self) -> usize {
        self.umem.free_count()
    }
}

fn setsockopt<T>(fd: RawFd, opt: libc::c_int, value: &T) -> Result<(), XdpError> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            SOL_XDP,
            opt,
            value as *const T as *const libc::c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(XdpError::syscall("setsockopt(SOL_XDP)"));
    }
    Ok(())
}

fn bind_xdp(fd: RawFd, addr: &SockaddrXdp) -> Result<(), XdpError> {
    let ret = unsafe {
        libc::bind(
            fd,
            addr as *const SockaddrXdp as *const libc::sockaddr,
            std::mem::size_of::<SockaddrXdp>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(XdpError::syscall("bind(AF_XDP)"));
    }
    Ok(())
}
