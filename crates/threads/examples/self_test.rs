//! Kernel self test
//!
//! Boots the simulated machine and exercises every primitive in turn:
//! - Two threads ping-ponging with `yield_now`
//! - A chain of joins, one of them on a sleeping thread
//! - Alarm waits of increasing length
//! - A producer/consumer pair on a condition variable
//! - Speakers and listeners meeting on a communicator
//!
//! Pass `--trace` to print every scheduler record to stdout.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use spy::{SpyConfig, Tracer};
use threads::{Communicator, Condition, Kernel, KernelError, Lock};

fn ping_pong(kernel: &Kernel) -> Result<(), KernelError> {
    println!("--- ping pong ---");
    let worker = kernel.clone();
    let pinger = kernel.spawn("forked thread", move || {
        for i in 0..5 {
            println!("*** forked thread looped {i} times");
            worker.yield_now();
        }
    })?;
    for i in 0..5 {
        println!("*** main thread looped {i} times");
        kernel.yield_now();
    }
    pinger.join();
    Ok(())
}

fn join_chain(kernel: &Kernel) -> Result<(), KernelError> {
    println!("--- join chain ---");
    let quick = kernel.spawn("quick", || println!("quick thread done"))?;
    let slow = {
        let alarm = kernel.alarm();
        kernel.spawn("slow", move || {
            alarm.wait_until(2_000);
            println!("slow thread done");
        })?
    };
    let joiner = kernel.spawn("joiner", move || {
        quick.join();
        slow.join();
        println!("joiner saw both threads finish");
    })?;
    joiner.join();
    Ok(())
}

fn alarms(kernel: &Kernel) -> Result<(), KernelError> {
    println!("--- alarm ---");
    for ticks in [10_000, 15_000, 25_000] {
        let clock = kernel.clone();
        let sleeper = kernel.spawn(&format!("alarm {ticks}"), move || {
            let start = clock.now();
            clock.alarm().wait_until(ticks);
            println!(
                "asked to wait {ticks} ticks, woke after {}",
                clock.now() - start
            );
        })?;
        sleeper.join();
    }
    Ok(())
}

fn producer_consumer(kernel: &Kernel) -> Result<(), KernelError> {
    println!("--- condition ---");
    let lock = Lock::new(kernel);
    let not_empty = Condition::new(&lock);
    let items = Arc::new(Mutex::new(VecDeque::new()));

    let consumer = {
        let (lock, not_empty, items) = (lock.clone(), not_empty.clone(), Arc::clone(&items));
        kernel.spawn("consumer", move || {
            lock.acquire();
            while items.lock().is_empty() {
                not_empty.sleep();
            }
            let taken: Vec<i32> = items.lock().drain(..).collect();
            println!("consumer took {taken:?}");
            lock.release();
        })?
    };
    let producer = {
        let (lock, items) = (lock.clone(), Arc::clone(&items));
        kernel.spawn("producer", move || {
            lock.acquire();
            items.lock().extend(1..=5);
            println!("producer added 5 items");
            not_empty.wake();
            lock.release();
        })?
    };
    consumer.join();
    producer.join();
    Ok(())
}

fn rendezvous(kernel: &Kernel) -> Result<(), KernelError> {
    println!("--- communicator ---");
    let channel: Communicator = Communicator::new(kernel);
    let mut threads = Vec::new();
    for word in [4, 7] {
        let speaker = channel.clone();
        threads.push(kernel.spawn(&format!("speaker {word}"), move || {
            speaker.speak(word);
            println!("speaker {word} was heard");
        })?);
    }
    for (n, delay) in [(1, 5_000), (2, 0)] {
        let (listener, alarm) = (channel.clone(), kernel.alarm());
        threads.push(kernel.spawn(&format!("listener {n}"), move || {
            if delay > 0 {
                alarm.wait_until(delay);
            }
            println!("listener {n} heard {}", listener.listen());
        })?);
    }
    for thread in &threads {
        thread.join();
    }
    Ok(())
}

fn main() -> Result<(), KernelError> {
    println!("\n╔════════════════════════════════════════╗");
    println!("║  Kernel Threads - Self Test            ║");
    println!("╚════════════════════════════════════════╝\n");

    let mut builder = Kernel::builder();
    if std::env::args().any(|arg| arg == "--trace") {
        let tracer = Tracer::new(SpyConfig::default(), spy::stdout_backend()).into_handle();
        builder = builder.with_trace_hook(tracer.hook());
    }
    let kernel = builder.boot()?;

    kernel.run(|kernel| {
        ping_pong(kernel)?;
        join_chain(kernel)?;
        alarms(kernel)?;
        producer_consumer(kernel)?;
        rendezvous(kernel)?;

        let stats = kernel.stats();
        println!(
            "\nMachine halting: {} ticks ({} kernel, {} idle), {} timer interrupts",
            stats.total_ticks, stats.kernel_ticks, stats.idle_ticks, stats.timer_interrupts
        );
        Ok(())
    })
}
