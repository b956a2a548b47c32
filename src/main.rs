use std::env::args;
use std::str::FromStr;
use std::time::Duration;

use strum::IntoEnumIterator;
use strum_macros::{self, Display, EnumIter, EnumString};

fn main() -> Result<(), String> {
    fairlock::logger::init()?;
    let mut args = args().skip(1);
    let scenario = args.next().ok_or(format!(
        "no scenario supplied, use one of {}",
        Scenario::iter()
            .map(|c| c.to_string())
            .collect::<Vec<String>>()
            .join(",")
    ))?;
    let scenario = Scenario::from_str(&scenario).map_err(|e| format!("{scenario}: {e}"))?;

    match scenario {
        Scenario::Counter => {
            let (threads, iterations) = threads_and_iterations(&mut args, 4, 10_000)?;
            log::info!("running {scenario} with {threads} threads, {iterations} iterations");
            let total = fairlock::mutex::run(threads, iterations);
            if total != (threads * iterations) as u64 {
                return Err(format!("lost increments: the counter is {total}"));
            }
        }
        Scenario::Rwlock => {
            let (readers, reads) = threads_and_iterations(&mut args, 8, 1_000)?;
            // a quarter of them (at least 1) are writers
            let writers = (readers / 4).max(1);
            let writes = reads / 10;
            log::info!("running {scenario} with {readers} readers, {writers} writers");
            let total = fairlock::rwmutex::run(readers, reads, writers, writes);
            if total != (writers * writes) as u64 {
                return Err(format!("lost writes: the value is {total}"));
            }
        }
        Scenario::Starvation => {
            // how long the hog holds the lock each round
            let hold_us = number(args.next(), 500)?;
            log::info!("running {scenario} with the hog holding the lock for {hold_us}us");
            fairlock::mutex::run_starvation(Duration::from_micros(hold_us as u64));
        }
        Scenario::TryLock => {
            let (threads, iterations) = threads_and_iterations(&mut args, 4, 10_000)?;
            log::info!("running {scenario} with {threads} threads, {iterations} iterations");
            try_lock(threads, iterations);
        }
    }

    if let Some(extra) = args.next() {
        return Err(format!("unexpected argument `{extra}' for {scenario}"));
    }
    Ok(())
}

fn threads_and_iterations(
    args: &mut impl Iterator<Item = String>,
    threads: usize,
    iterations: usize,
) -> Result<(usize, usize), String> {
    Ok((number(args.next(), threads)?, number(args.next(), iterations)?))
}

fn number(arg: Option<String>, default: usize) -> Result<usize, String> {
    arg.map_or(Ok(default), |a| {
        a.parse().map_err(|e| format!("`{a}' isn't a number: {e}"))
    })
}

/// Everybody polls with try_lock and counts the successes
fn try_lock(threads: usize, iterations: usize) {
    let m = fairlock::Mutex::new(0usize);
    let misses = std::sync::atomic::AtomicUsize::new(0);
    std::thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                let mut done = 0;
                while done < iterations {
                    match m.try_lock() {
                        Some(mut g) => {
                            *g += 1;
                            done += 1;
                        }
                        None => {
                            misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            std::hint::spin_loop();
                        }
                    }
                }
            });
        }
    });
    println!(
        "{} successful try_locks, {} misses",
        m.into_inner(),
        misses.into_inner()
    );
}

#[derive(Debug, Clone, Copy, EnumIter, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
enum Scenario {
    Counter,
    Rwlock,
    Starvation,
    TryLock,
}
