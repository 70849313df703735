mod config;
mod signals;
mod time;
mod workload;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use newengine_modules_logging::{install_console_logger, ConsoleLoggerConfig};
use newengine_timeslicer::{init_global, shutdown_global, TimeSlicerError};

use crate::config::DemoAppConfig;
use crate::signals::RunControl;
use crate::time::Time;
use crate::workload::Workload;

const CONFIG_ENV: &str = "NEWENGINE_DEMO_CONFIG";
const DEFAULT_CONFIG: &str = "timeslice-demo.toml";

fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .or_else(|| {
            let p = PathBuf::from(DEFAULT_CONFIG);
            p.exists().then_some(p)
        })
}

fn load_config() -> anyhow::Result<DemoAppConfig> {
    let mut cfg = match config_path() {
        Some(path) => {
            info!("config: {}", path.display());
            DemoAppConfig::load(&path)?
        }
        None => {
            info!("config: built-in defaults");
            DemoAppConfig::default()
        }
    };
    cfg.timeslicer.apply_env();
    Ok(cfg)
}

fn main() -> anyhow::Result<()> {
    let _ = install_console_logger(&ConsoleLoggerConfig::from_env());

    let cfg = load_config()?;
    let run = RunControl::new(cfg.demo.frames);
    run.install_ctrlc_handler()?;

    let mut time = Time::new(cfg.demo.time_scale);
    let manager = init_global(cfg.timeslicer.clone(), time.t_sec, time.unscaled_t_sec)?;

    let mut workloads: Vec<Workload> = cfg
        .demo
        .workloads
        .iter()
        .flat_map(|w| (0..w.instances).map(move |i| (w, i)))
        .map(|(w, i)| Workload::spawn(&manager, w, i))
        .collect();
    info!(
        "running {} workload(s) at {:.0} fps, budget {:.3} ms",
        workloads.len(),
        cfg.demo.frame_rate,
        cfg.timeslicer.budget_ms
    );

    let frame = Duration::from_secs_f64(cfg.demo.frame_secs());
    let mut last = Instant::now();

    while run.should_run(time.frame_index) {
        let frame_start = Instant::now();
        time.advance(frame_start.duration_since(last).as_secs_f64());
        last = frame_start;

        match manager.update(time.t_sec, time.unscaled_t_sec) {
            Ok(_) => {}
            Err(TimeSlicerError::TickFailed { failures }) => {
                for f in &failures {
                    error!("tick failed: {f}");
                }
            }
            Err(e) => return Err(e.into()),
        }

        let mut stepped = 0;
        for w in &mut workloads {
            if w.poll() {
                stepped += 1;
            }
        }

        if cfg.demo.stats_every > 0 && time.frame_index % cfg.demo.stats_every == 0 {
            let stats = manager.stats();
            info!(
                "frame {} t={:.2}s ut={:.2}s stepped={} scheduled={} overdue={} pass={:.3}ms registered={}",
                time.frame_index,
                time.t_sec,
                time.unscaled_t_sec,
                stepped,
                stats.scheduled_tick_count,
                stats.overdue_tick_count,
                stats.last_update_duration * 1000.0,
                stats.registered
            );
        }

        if cfg.demo.pace {
            let spent = frame_start.elapsed();
            if spent < frame {
                std::thread::sleep(frame - spent);
            } else {
                warn!("frame {} over by {:?}", time.frame_index, spent - frame);
            }
        }
    }

    if run.is_interrupted() {
        info!("stopped by interrupt after {} frame(s)", time.frame_index);
    }
    for w in &workloads {
        info!("{}: {} step(s), estimate {:.3} ms", w.name(), w.steps(), w.estimate_ms());
    }
    for w in &mut workloads {
        w.stop();
    }

    let totals = manager.stats();
    info!(
        "done after {} pass(es): {} scheduled, {} overdue",
        totals.passes, totals.total_scheduled_ticks, totals.total_overdue_ticks
    );

    drop(manager);
    shutdown_global();
    Ok(())
}
