//! UMEM 帧池
//!
//! 与内核共享的连续内存区，按固定大小切分为帧。所有报文字节都
//! 住在这里，上层不发生拷贝。空闲帧偏移保存在一个栈式空闲表中，
//! 只用于补充 Fill 环。

use super::{XdpError, XdpUmemReg};

pub struct Umem {
    base: *mut u8,
    len: usize,
    frame_size: u32,
    num_frames: u32,
    free: Vec<u64>,
}

unsafe impl Send for Umem {}

impl Umem {
    pub const MIN_FRAME_SIZE: u32 = 1024;
    pub const MIN_NUM_FRAMES: u32 = 64;

    /// 分配页对齐的匿名内存并切分为帧。全部帧初始在空闲表中。
    pub fn new(num_frames: u32, frame_size: u32) -> Result<Self, XdpError> {
        if frame_size < Self::MIN_FRAME_SIZE || !frame_size.is_power_of_two() {
            return Err(XdpError::InvalidOption(format!(
                "frame_size must be a power of two >= {}, got {}",
                Self::MIN_FRAME_SIZE,
                frame_size
            )));
        }
        if num_frames < Self::MIN_NUM_FRAMES {
            return Err(XdpError::InvalidOption(format!(
                "num_frames must be >= {}, got {}",
                Self::MIN_NUM_FRAMES,
                num_frames
            )));
        }

        let len = num_frames as usize * frame_size as usize;
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_POPULATE,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(XdpError::syscall("mmap umem"));
        }

        // 逆序压栈，使首次弹出从低地址帧开始
        let free = (0..num_frames)
            .rev()
            .map(|i| i as u64 * frame_size as u64)
            .collect();

        Ok(Self {
            base: base as *mut u8,
            len,
            frame_size,
            num_frames,
            free,
        })
    }

    /// 注册到内核用的描述
    pub(crate) fn as_reg(&self) -> XdpUmemReg {
        XdpUmemReg {
            addr: self.base as u64,
            len: self.len as u64,
            chunk_size: self.frame_size,
            headroom: 0,
            flags: 0,
        }
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    pub fn num_frames(&self) -> u32 {
        self.num_frames
    }

    /// 把描述符偏移归位到所属帧的起始。RX 描述符的偏移带着内核
    /// 预留的头部空间，不落在帧边界上。
    pub fn chunk_start(&self, addr: u64) -> u64 {
        addr & !(self.frame_size as u64 - 1)
    }

    /// 描述符指向的帧字节。偏移或长度超出所属帧返回 None。
    /// 返回的切片在帧交还内核前有效。
    pub fn frame_bytes(&mut self, addr: u64, len: usize) -> Option<&mut [u8]> {
        let start = addr as usize;
        if start >= self.len {
            return None;
        }
        let chunk_end = self.chunk_start(addr) as usize + self.frame_size as usize;
        if start + len > chunk_end {
            return None;
        }
        Some(unsafe { std::slice::from_raw_parts_mut(self.base.add(start), len) })
    }

    /// 从描述符偏移到帧尾的可写视图，用于在帧内就地改写响应
    pub fn frame_capacity(&mut self, addr: u64) -> Option<&mut [u8]> {
        let start = addr as usize;
        if start >= self.len {
            return None;
        }
        let chunk_end = self.chunk_start(addr) as usize + self.frame_size as usize;
        Some(unsafe { std::slice::from_raw_parts_mut(self.base.add(start), chunk_end - start) })
    }

    pub fn pop_free(&mut self) -> Option<u64> {
        self.free.pop()
    }

    /// 回收帧。任意帧内偏移都归位到帧起始再入栈。
    pub fn push_free(&mut self, addr: u64) {
        let chunk = self.chunk_start(addr);
        debug_assert!((chunk as usize) < self.len);
        self.free.push(chunk);
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

impl Drop for Umem {
    fn drop(&mut self) {
        if !self.base.is_null() {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.len);
            }
        }
    }
}
