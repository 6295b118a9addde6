//! xdns - AF_XDP DNS 过滤守护进程

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use tokio::net::TcpListener;

use xdns::api::{create_router, AppState};
use xdns::config::Config;
use xdns::filter::FilterEngine;
use xdns::metrics;
use xdns::worker::{Worker, WorkerOptions};
use xdns::xdp::{self, socket::SocketOptions, Steering, XdpSocket};

/// AF_XDP DNS 过滤守护进程
#[derive(Parser, Debug)]
#[command(name = "xdns", version, about, long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "configs/config.yaml")]
    config: String,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. 加载配置
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config))?;

    // 2. 初始化日志
    let log_level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    info!("xdns starting...");
    info!("config loaded from {}", args.config);

    // 3. 注册 metrics
    metrics::register_metrics();

    // 4. 查找网卡
    let ifindex = xdp::ifindex(&config.interface)
        .with_context(|| format!("failed to resolve interface {}", config.interface))?;
    info!("using interface {} (index {})", config.interface, ifindex);

    // 5. 加载并附加转向程序
    let mut steering = Steering::load(&config.bpf_path)?;
    steering.attach(&config.interface, config.xdp.mode)?;
    steering.sync_ports(&config.dns.listen_ports)?;

    // 6. 初始化过滤引擎
    let engine = Arc::new(FilterEngine::new());
    let rule_count = engine
        .load_file(&config.rules_path)
        .with_context(|| format!("failed to load rules from {}", config.rules_path))?;
    metrics::RULES_TOTAL.set(rule_count as i64);
    info!("filter engine initialized with {} rules", rule_count);

    // 7. 为每个队列建 socket、注册转向表、起 worker 线程
    let socket_opts = SocketOptions {
        num_frames: config.xdp.num_frames,
        frame_size: config.xdp.frame_size,
        fill_ring_size: config.xdp.fill_ring_size,
        comp_ring_size: config.xdp.comp_ring_size,
        rx_ring_size: config.xdp.rx_ring_size,
        tx_ring_size: config.xdp.tx_ring_size,
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let num_workers = config.effective_workers();
    let cpus = num_cpus::get();
    let mut handles = Vec::with_capacity(num_workers as usize);

    for i in 0..num_workers {
        let queue_id = config.queue_id + i;
        let socket = XdpSocket::new(ifindex, queue_id, &socket_opts)
            .with_context(|| format!("failed to create XDP socket for queue {}", queue_id))?;
        steering.register(queue_id, socket.fd())?;

        let opts = WorkerOptions {
            batch_size: config.workers.batch_size as usize,
            poll_timeout_ms: 10,
            pin_cpu: config
                .workers
                .pin_workers
                .then(|| queue_id as usize % cpus),
        };
        let worker = Worker::new(
            i as usize,
            queue_id,
            socket,
            engine.clone(),
            shutdown.clone(),
            opts,
        );

        let handle = std::thread::Builder::new()
            .name(format!("xdns-worker-{}", i))
            .spawn(move || worker.run())
            .context("failed to spawn worker thread")?;
        handles.push(handle);
    }
    info!("worker pool started with {} workers", num_workers);

    // 8. 启动 metrics 服务
    let start_time = Instant::now();
    let state = Arc::new(AppState {
        engine: engine.clone(),
        rules_path: config.rules_path.clone(),
        start_time,
    });

    let http_task = if config.metrics.enabled {
        let app = create_router(state, &config.metrics.path);
        let listener = TcpListener::bind(&config.metrics.listen)
            .await
            .with_context(|| format!("failed to bind to {}", config.metrics.listen))?;
        info!(
            "metrics server started on {}{}",
            config.metrics.listen, config.metrics.path
        );
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("xdns is running. Press Ctrl+C to stop.");

    // 9. 等待关停信号
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down...");
        }
        _ = async {
            loop {
                metrics::update_uptime(start_time);
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        } => {}
    }

    // 10. 停 worker，排干在途批次；socket 随 worker 销毁，
    //     其转向表条目由内核清除，之后 steering 卸载程序
    shutdown.store(true, Ordering::Release);
    for handle in handles {
        let _ = handle.join();
    }
    if let Some(task) = http_task {
        task.abort();
    }
    drop(steering);

    let stats = engine.stats();
    info!(
        "final stats: received={}, allowed={}, blocked={}, redirected={}, dropped={}",
        metrics::PACKETS_RECEIVED.get(),
        stats.allowed,
        stats.blocked,
        stats.redirected,
        metrics::PACKETS_DROPPED.get()
    );

    info!("xdns stopped.");
    Ok(())
}
