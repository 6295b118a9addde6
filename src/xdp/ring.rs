//! mmap 单生产者/单消费者环
//!
//! 生产者写入描述符后以 release 语义推进生产者下标；消费者以
//! acquire 语义读生产者下标，消费完成后 release 推进消费者下标。
//! 下标是自由回绕的 32 位计数器，按环大小（2 的幂）取模寻址。

use std::sync::atomic::{AtomicU32, Ordering};

use super::{XdpDesc, XdpError, XdpRingOffset, XDP_RING_NEED_WAKEUP};

/// 环内元素类型：RX/TX 环存描述符，Fill/Completion 环存帧偏移
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingKind {
    Desc,
    Addr,
}

impl RingKind {
    pub fn element_size(self) -> usize {
        match self {
            RingKind::Desc => std::mem::size_of::<XdpDesc>(),
            RingKind::Addr => std::mem::size_of::<u64>(),
        }
    }
}

pub struct Ring {
    base: *mut u8,
    mmap_len: usize,
    producer: *const AtomicU32,
    consumer: *const AtomicU32,
    flags: *const u32,
    desc: *mut u8,
    size: u32,
    mask: u32,
    kind: RingKind,
    /// 测试环自持内存，真实环由 munmap 释放
    owned: Option<Box<[u8]>>,
}

unsafe impl Send for Ring {}

impl Ring {
    /// 将 socket 的一个环映射进来
    pub fn map(
        fd: libc::c_int,
        pgoff: libc::off_t,
        size: u32,
        offsets: &XdpRingOffset,
        kind: RingKind,
    ) -> Result<Self, XdpError> {
        debug_assert!(size.is_power_of_two());
        let mmap_len = offsets.desc as usize + size as usize * kind.element_size();

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mmap_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd,
                pgoff,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(XdpError::syscall("mmap ring"));
        }
        let base = base as *mut u8;

        Ok(unsafe { Self::from_raw(base, mmap_len, offsets, size, kind, None) })
    }

    unsafe fn from_raw(
        base: *mut u8,
        mmap_len: usize,
        offsets: &XdpRingOffset,
        size: u32,
        kind: RingKind,
        owned: Option<Box<[u8]>>,
    ) -> Self {
        Self {
            base,
            mmap_len,
            producer: base.add(offsets.producer as usize) as *const AtomicU32,
            consumer: base.add(offsets.consumer as usize) as *const AtomicU32,
            flags: base.add(offsets.flags as usize) as *const u32,
            desc: base.add(offsets.desc as usize),
            size,
            mask: size - 1,
            kind,
            owned,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn load_producer(&self) -> u32 {
        unsafe { (*self.producer).load(Ordering::Acquire) }
    }

    pub fn load_consumer(&self) -> u32 {
        unsafe { (*self.consumer).load(Ordering::Acquire) }
    }

    pub fn store_producer(&self, value: u32) {
        unsafe { (*self.producer).store(value, Ordering::Release) }
    }

    pub fn store_consumer(&self, value: u32) {
        unsafe { (*self.consumer).store(value, Ordering::Release) }
    }

    /// 生产侧剩余空位
    pub fn free_entries(&self) -> u32 {
        self.size - self.load_producer().wrapping_sub(self.load_consumer())
    }

    /// 消费侧可读条目数
    pub fn available_entries(&self) -> u32 {
        self.load_producer().wrapping_sub(self.load_consumer())
    }

    /// 内核是否要求发布后唤醒
    pub fn needs_wakeup(&self) -> bool {
        unsafe { std::ptr::read_volatile(self.flags) & XDP_RING_NEED_WAKEUP != 0 }
    }

    /// 写描述符。index 为自由回绕下标，调用方保证槽位已预留。
    pub fn write_desc(&self, index: u32, desc: XdpDesc) {
        debug_assert_eq!(self.kind, RingKind::Desc);
        let slot = (index & self.mask) as usize;
        unsafe {
            let ptr = self.desc.add(slot * std::mem::size_of::<XdpDesc>()) as *mut XdpDesc;
            std::ptr::write(ptr, desc);
        }
    }

    pub fn read_desc(&self, index: u32) -> XdpDesc {
        debug_assert_eq!(self.kind, RingKind::Desc);
        let slot = (index & self.mask) as usize;
        unsafe {
            let ptr = self.desc.add(slot * std::mem::size_of::<XdpDesc>()) as *const XdpDesc;
            std::ptr::read(ptr)
        }
    }

    /// 写帧偏移（Fill/Completion 环）
    pub fn write_addr(&self, index: u32, addr: u64) {
        debug_assert_eq!(self.kind, RingKind::Addr);
        let slot = (index & self.mask) as usize;
        unsafe {
            let ptr = self.desc.add(slot * std::mem::size_of::<u64>()) as *mut u64;
            std::ptr::write(ptr, addr);
        }
    }

    pub fn read_addr(&self, index: u32) -> u64 {
        debug_assert_eq!(self.kind, RingKind::Addr);
        let slot = (index & self.mask) as usize;
        unsafe {
            let ptr = self.desc.add(slot * std::mem::size_of::<u64>()) as *const u64;
            std::ptr::read(ptr)
        }
    }

    /// 在自有内存上建环，供单元测试模拟内核侧
    #[cfg(test)]
    pub fn for_test(size: u32, kind: RingKind) -> Self {
        let offsets = XdpRingOffset {
            producer: 0,
            consumer: 8,
            flags: 16,
            desc: 64,
        };
        let len = offsets.desc as usize + size as usize * kind.element_size();
        let mut buf = vec![0u8; len].into_boxed_slice();
        let base = buf.as_mut_ptr();
        unsafe { Self::from_raw(base, len, &offsets, size, kind, Some(buf)) }
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        if self.owned.is_none() && !self.base.is_null() {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.mmap_len);
            }
        }
    }
}
