//! 数据面 worker
//!
//! 每个 worker 驱动一个 (网卡, 队列) 对，独占自己的 socket 与环。
//! 循环：有界等待 RX → 批量取描述符 → 逐帧判定 → 回收或发送 →
//! 补充 Fill → 回收 Completion。从 RX 取走的描述符在返回前必然
//! 进入 Fill 或 TX，不会凭空丢失。

pub mod packet;

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::dns::{self, response};
use crate::filter::{Action, FilterEngine};
use crate::metrics;
use crate::xdp::{XdpDesc, XdpSocket};

/// 单帧处理结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// 帧回 Fill 环
    Recycle,
    /// 帧改写完毕，以新长度发送
    Transmit(u32),
}

/// worker 运行参数
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// 单次 RX 批量上限
    pub batch_size: usize,
    /// 空 RX 环上的等待时长（毫秒），决定关停延迟
    pub poll_timeout_ms: i32,
    /// 绑定的 CPU，None 表示不绑定
    pub pin_cpu: Option<usize>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            poll_timeout_ms: 10,
            pin_cpu: None,
        }
    }
}

pub struct Worker {
    id: usize,
    queue_id: u32,
    socket: XdpSocket,
    engine: Arc<FilterEngine>,
    shutdown: Arc<AtomicBool>,
    opts: WorkerOptions,
}

impl Worker {
    pub fn new(
        id: usize,
        queue_id: u32,
        socket: XdpSocket,
        engine: Arc<FilterEngine>,
        shutdown: Arc<AtomicBool>,
        opts: WorkerOptions,
    ) -> Self {
        Self {
            id,
            queue_id,
            socket,
            engine,
            shutdown,
            opts,
        }
    }

    /// worker 主循环，在独立线程上运行直到收到关停信号
    pub fn run(mut self) {
        if let Some(cpu) = self.opts.pin_cpu {
            pin_to_cpu(cpu);
        }

        info!(
            "worker {} started on queue {} (batch={})",
            self.id, self.queue_id, self.opts.batch_size
        );

        let mut batch: Vec<XdpDesc> = Vec::with_capacity(self.opts.batch_size);

        while !self.shutdown.load(Ordering::Relaxed) {
            let received = self.socket.peek_rx(self.opts.batch_size, &mut batch);
            if received == 0 {
                // 空转时也回收 Completion 并补 Fill，避免帧滞留
                self.socket.reap_completions(self.opts.batch_size);
                self.socket.replenish_fill();
                match self.socket.poll_rx(self.opts.poll_timeout_ms) {
                    Ok(_) => continue,
                    Err(e) => {
                        error!("worker {}: poll failed: {}", self.id, e);
                        break;
                    }
                }
            }

            for i in 0..received {
                let desc = batch[i];
                self.handle_descriptor(desc);
            }

            // 批次收尾：补 Fill、回收 Completion
            self.socket.replenish_fill();
            if let Err(e) = self.socket.kick_fill() {
                debug!("worker {}: fill wakeup failed: {}", self.id, e);
            }
            self.socket.reap_completions(self.opts.batch_size);
        }

        // 关停：尽力回收在途的 Completion
        self.socket.reap_completions(usize::MAX);
        info!("worker {} on queue {} stopped", self.id, self.queue_id);
    }

    fn handle_descriptor(&mut self, desc: XdpDesc) {
        let verdict = match self.socket.frame_capacity(desc.addr) {
            Some(frame) => process_frame(&self.engine, frame, desc.len as usize),
            None => {
                // 内核交来的描述符越界，不应发生
                error!(
                    "worker {}: descriptor out of umem bounds: addr={} len={}",
                    self.id, desc.addr, desc.len
                );
                metrics::PACKETS_DROPPED.inc();
                Verdict::Recycle
            }
        };

        match verdict {
            Verdict::Recycle => self.socket.recycle(desc.addr),
            Verdict::Transmit(len) => {
                let out = XdpDesc {
                    addr: desc.addr,
                    len,
                    options: 0,
                };
                if self.socket.submit_tx(&[out]) == 0 {
                    // TX 环满：放弃响应，帧回 Fill
                    metrics::TX_DROPS.inc();
                    self.socket.recycle(desc.addr);
                } else if let Err(e) = self.socket.kick_tx() {
                    warn!("worker {}: tx wakeup failed: {}", self.id, e);
                }
            }
        }
    }
}

/// 单帧处理：解头 → 解析 DNS → 查过滤引擎 → 就地改写或回收。
///
/// `frame` 是整帧可写视图（含响应扩展空间），`wire_len` 为收包长度。
/// 纯函数式的核心路径，端到端测试直接驱动它。
pub fn process_frame(engine: &FilterEngine, frame: &mut [u8], wire_len: usize) -> Verdict {
    metrics::PACKETS_RECEIVED.inc();
    let started = Instant::now();

    if wire_len > frame.len() {
        metrics::PACKETS_DROPPED.inc();
        return Verdict::Recycle;
    }

    let info = match packet::decode(&frame[..wire_len]) {
        Ok(info) => info,
        Err(e) => {
            debug!("drop: {}", e);
            metrics::PACKETS_DROPPED.inc();
            return Verdict::Recycle;
        }
    };

    // 解析第一个问题并解码域名；解析结果借用帧，先取出需要的字段
    let mut name_buf = [0u8; dns::MAX_DOMAIN_LENGTH];
    let (question_end, qtype, qclass, name_len) = {
        let payload = &frame[info.payload_offset..info.payload_offset + info.payload_len];
        let question = match dns::parse(payload) {
            Ok(q) => q,
            Err(e) => {
                debug!("drop: {}", e);
                metrics::PARSE_ERRORS.inc();
                metrics::PACKETS_DROPPED.inc();
                return Verdict::Recycle;
            }
        };
        let name_len = match question.decode_name(&mut name_buf) {
            Ok(n) => n,
            Err(e) => {
                debug!("drop: {}", e);
                metrics::PARSE_ERRORS.inc();
                metrics::PACKETS_DROPPED.inc();
                return Verdict::Recycle;
            }
        };
        (question.question_end, question.qtype, question.qclass, name_len)
    };

    let domain = match std::str::from_utf8(&name_buf[..name_len]) {
        Ok(s) => s,
        Err(_) => {
            metrics::PARSE_ERRORS.inc();
            metrics::PACKETS_DROPPED.inc();
            return Verdict::Recycle;
        }
    };

    let result = engine.check(domain, qtype);

    let verdict = match result.action {
        Action::Allow => {
            metrics::PACKETS_ALLOWED.inc();
            Verdict::Recycle
        }
        Action::Log => {
            info!("logged: {} type={}", domain, dns::type_name(qtype));
            metrics::PACKETS_ALLOWED.inc();
            Verdict::Recycle
        }
        Action::Block => {
            if let Some(id) = &result.rule_id {
                debug!("blocked: {} (rule: {})", domain, id);
            }
            let dns_buf = &mut frame[info.payload_offset..];
            let dns_len = if qclass == dns::CLASS_IN {
                response::build_nxdomain(dns_buf, question_end)
            } else {
                response::build_refused(dns_buf, question_end)
            };
            if dns_len == 0 {
                metrics::PACKETS_DROPPED.inc();
                Verdict::Recycle
            } else {
                metrics::PACKETS_BLOCKED.inc();
                let new_len = packet::rewrite_response(frame, &info, dns_len);
                Verdict::Transmit(new_len as u32)
            }
        }
        Action::Redirect => {
            let dns_buf = &mut frame[info.payload_offset..];
            let dns_len = match (result.redirect_ip, qtype) {
                (Some(IpAddr::V4(addr)), dns::TYPE_A) => {
                    response::build_a_answer(dns_buf, question_end, addr, result.redirect_ttl)
                }
                (Some(IpAddr::V6(addr)), dns::TYPE_AAAA) => {
                    response::build_aaaa_answer(dns_buf, question_end, addr, result.redirect_ttl)
                }
                // 地址族与查询类型不符时以 NXDOMAIN 收尾
                (Some(_), _) => response::build_nxdomain(dns_buf, question_end),
                (None, _) => 0,
            };
            if dns_len == 0 {
                metrics::PACKETS_DROPPED.inc();
                Verdict::Recycle
            } else {
                metrics::PACKETS_REDIRECTED.inc();
                let new_len = packet::rewrite_response(frame, &info, dns_len);
                Verdict::Transmit(new_len as u32)
            }
        }
    };

    metrics::PROCESSING_LATENCY.observe(started.elapsed().as_secs_f64());
    verdict
}

/// 把当前线程绑到指定 CPU，让环下标留在本地缓存
fn pin_to_cpu(cpu: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        let ret = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if ret != 0 {
            warn!(
                "failed to pin worker to cpu {}: {}",
                cpu,
                std::io::Error::last_os_error()
            );
        }
    }
}
