//! Integration tests for execution contexts and machine power handling.

use std::sync::Arc;

use machine::{Clock, InterruptGate, Machine, MachineConfig, MachineError, Tcb};
use parking_lot::Mutex;

#[test]
fn baton_passes_between_contexts() -> Result<(), MachineError> {
    let machine = Machine::new(MachineConfig::default())?;
    let main = Tcb::adopt_current(&machine);
    let worker = Tcb::new(&machine, "worker");
    let log = Arc::new(Mutex::new(Vec::new()));

    let entry_log = Arc::clone(&log);
    let back = main.clone();
    worker.start(move || {
        entry_log.lock().push("worker first");
        back.context_switch();
        entry_log.lock().push("worker second");
        back.context_switch();
    })?;

    log.lock().push("main before");
    worker.context_switch();
    log.lock().push("main between");
    worker.context_switch();
    log.lock().push("main after");

    assert_eq!(
        *log.lock(),
        vec![
            "main before",
            "worker first",
            "main between",
            "worker second",
            "main after",
        ]
    );
    assert!(main.is_current());
    assert!(!worker.is_current());

    machine.halt();
    Ok(())
}

#[test]
fn switching_to_self_is_a_no_op() -> Result<(), MachineError> {
    let machine = Machine::new(MachineConfig::default())?;
    let main = Tcb::adopt_current(&machine);
    main.context_switch();
    assert!(main.is_current());
    machine.halt();
    Ok(())
}

#[test]
fn destroyed_context_is_reported() -> Result<(), MachineError> {
    let machine = Machine::new(MachineConfig::default())?;
    let main = Tcb::adopt_current(&machine);
    let worker = Tcb::new(&machine, "short-lived");

    let back = main.clone();
    worker.start(move || back.context_switch())?;
    worker.context_switch();

    worker.destroy();
    assert!(worker.is_destroyed());
    machine.halt();
    Ok(())
}

#[test]
#[should_panic(expected = "worker exploded")]
fn panic_in_context_surfaces_on_primary() {
    let machine = Machine::new(MachineConfig::default()).expect("machine");
    let _main = Tcb::adopt_current(&machine);
    let worker = Tcb::new(&machine, "exploding");
    worker
        .start(|| panic!("worker exploded"))
        .expect("start worker");

    worker.context_switch();
}

#[test]
#[should_panic(expected = "returned while running")]
fn returning_entry_crashes_the_machine() {
    let machine = Machine::new(MachineConfig::default()).expect("machine");
    let _main = Tcb::adopt_current(&machine);
    let worker = Tcb::new(&machine, "careless");
    worker.start(|| {}).expect("start worker");

    worker.context_switch();
}

#[test]
#[should_panic(expected = "deadlock detected")]
fn crash_reason_reaches_primary() {
    let machine = Machine::new(MachineConfig::default()).expect("machine");
    let _main = Tcb::adopt_current(&machine);
    let worker = Tcb::new(&machine, "watchdog");
    let crashing = Arc::clone(&machine);
    worker
        .start(move || crashing.crash("deadlock detected"))
        .expect("start worker");

    worker.context_switch();
}

#[test]
fn clock_advances_only_on_reenable() -> Result<(), MachineError> {
    let config = MachineConfig::builder().kernel_tick(7).build();
    let machine = Machine::new(config)?;
    let interrupt = machine.interrupt();

    assert_eq!(machine.now(), 0);
    interrupt.enable();
    assert_eq!(machine.now(), 7);

    let status = interrupt.disable();
    assert!(interrupt.is_disabled());
    interrupt.restore(status);
    assert_eq!(machine.now(), 14);
    assert_eq!(machine.stats().kernel_ticks, 14);
    Ok(())
}

#[test]
fn invalid_config_is_rejected() {
    let config = MachineConfig::builder().kernel_tick(0).build();
    assert!(matches!(
        Machine::new(config),
        Err(MachineError::InvalidConfig(_))
    ));
}

/// Larger than any address space can map, so the host refuses the thread.
#[cfg(target_pointer_width = "64")]
const UNMAPPABLE_STACK: usize = 1 << 62;

#[test]
#[cfg(target_pointer_width = "64")]
fn failed_start_leaves_context_startable() -> Result<(), MachineError> {
    let config = MachineConfig::builder()
        .stack_size(UNMAPPABLE_STACK)
        .build();
    let machine = Machine::new(config)?;
    let worker = Tcb::new(&machine, "oversized");

    for _ in 0..2 {
        let outcome = worker.start(|| unreachable!("context never ran"));
        assert!(matches!(outcome, Err(MachineError::Spawn(_))));
    }
    assert!(!worker.is_destroyed());
    Ok(())
}
