//! AF_XDP 内核旁路层
//!
//! UMEM 帧池、四个 SPSC 环、socket 建立与绑定，以及转向表注册。
//! 常量与内核结构体来自 <linux/if_xdp.h>。

pub mod ring;
pub mod socket;
pub mod steering;
pub mod umem;

pub use socket::XdpSocket;
pub use steering::Steering;
pub use umem::Umem;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum XdpError {
    #[error("{op} failed: {source}")]
    Syscall {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid xdp option: {0}")]
    InvalidOption(String),
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),
}

impl XdpError {
    /// 用 errno 包装一次失败的系统调用
    pub(crate) fn syscall(op: &'static str) -> Self {
        Self::Syscall {
            op,
            source: std::io::Error::last_os_error(),
        }
    }
}

// ============== <linux/if_xdp.h> ==============

pub(crate) const SOL_XDP: libc::c_int = 283;

// setsockopt / getsockopt
pub(crate) const XDP_MMAP_OFFSETS: libc::c_int = 1;
pub(crate) const XDP_RX_RING: libc::c_int = 2;
pub(crate) const XDP_TX_RING: libc::c_int = 3;
pub(crate) const XDP_UMEM_REG: libc::c_int = 4;
pub(crate) const XDP_UMEM_FILL_RING: libc::c_int = 5;
pub(crate) const XDP_UMEM_COMPLETION_RING: libc::c_int = 6;

// bind 标志
pub(crate) const XDP_COPY: u16 = 1 << 1;
pub(crate) const XDP_USE_NEED_WAKEUP: u16 = 1 << 3;

// 各环的 mmap 页偏移
pub(crate) const XDP_PGOFF_RX_RING: libc::off_t = 0;
pub(crate) const XDP_PGOFF_TX_RING: libc::off_t = 0x80000000;
pub(crate) const XDP_UMEM_PGOFF_FILL_RING: libc::off_t = 0x100000000;
pub(crate) const XDP_UMEM_PGOFF_COMPLETION_RING: libc::off_t = 0x180000000;

// 环 flags 字段里的唤醒标志
pub(crate) const XDP_RING_NEED_WAKEUP: u32 = 1 << 0;

/// 帧描述符：(UMEM 内偏移, 长度)，跨环传递帧所有权的唯一形式
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct XdpDesc {
    pub addr: u64,
    pub len: u32,
    pub options: u32,
}

#[repr(C)]
pub(crate) struct XdpUmemReg {
    pub addr: u64,
    pub len: u64,
    pub chunk_size: u32,
    pub headroom: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct XdpRingOffset {
    pub producer: u64,
    pub consumer: u64,
    pub desc: u64,
    pub flags: u64,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct XdpMmapOffsets {
    pub rx: XdpRingOffset,
    pub tx: XdpRingOffset,
    pub fr: XdpRingOffset,
    pub cr: XdpRingOffset,
}

#[repr(C)]
pub(crate) struct SockaddrXdp {
    pub sxdp_family: u16,
    pub sxdp_flags: u16,
    pub sxdp_ifindex: u32,
    pub sxdp_queue_id: u32,
    pub sxdp_shared_umem_fd: u32,
}

/// 按接口名查 ifindex
pub fn ifindex(name: &str) -> Result<u32, XdpError> {
    let c_name = std::ffi::CString::new(name)
        .map_err(|_| XdpError::InterfaceNotFound(name.to_string()))?;
    let idx = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if idx == 0 {
        return Err(XdpError::InterfaceNotFound(name.to_string()));
    }
    Ok(idx)
}
