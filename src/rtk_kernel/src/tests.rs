//! Scenario tests driving the kernel through a mock port
//!
//! The mock port doesn't switch stacks. Instead, the "current task" in a test
//! is whatever task the kernel last chose; a test plays the role of that task
//! by calling the kernel's methods.
use core::task::Poll;
use quickcheck_macros::quickcheck;

use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Dispatch(TaskId),
    Switch {
        from: Option<TaskId>,
        to: TaskId,
        from_interrupt: bool,
    },
}

/// The number of words the mock port writes at the top of a new task's stack
const INITIAL_FRAME_LEN: usize = 4;

#[derive(Debug, Default)]
struct MockPort {
    events: Vec<Event>,
    cpu_lock: bool,
    now: Timestamp,
}

impl Port for MockPort {
    /// The `arg` given at task creation
    type PortTaskState = Option<usize>;

    fn enter_cpu_lock(&mut self) {
        assert!(!self.cpu_lock);
        self.cpu_lock = true;
    }

    fn leave_cpu_lock(&mut self) {
        assert!(self.cpu_lock);
        self.cpu_lock = false;
    }

    fn initialize_task_state(
        &mut self,
        state: &mut Self::PortTaskState,
        _entry: TaskEntry,
        arg: usize,
        stack: StackHunk,
    ) {
        assert!(stack.len() >= INITIAL_FRAME_LEN);
        // Safety: The task doesn't run until it's dispatched
        let frame = unsafe { &mut (&mut (*stack.as_ptr()))[stack.len() - INITIAL_FRAME_LEN..] };
        frame.fill(0x5a5a);
        *state = Some(arg);
    }

    fn dispatch_first_task(&mut self, to: PortTask<'_, Self::PortTaskState>) {
        assert!(self.cpu_lock);
        self.events.push(Event::Dispatch(to.id));
    }

    fn switch_from_task(
        &mut self,
        from: Option<PortTask<'_, Self::PortTaskState>>,
        to: PortTask<'_, Self::PortTaskState>,
    ) {
        assert!(self.cpu_lock);
        self.events.push(Event::Switch {
            from: from.map(|t| t.id),
            to: to.id,
            from_interrupt: false,
        });
    }

    fn switch_from_interrupt(
        &mut self,
        from: Option<PortTask<'_, Self::PortTaskState>>,
        to: PortTask<'_, Self::PortTaskState>,
    ) {
        assert!(self.cpu_lock);
        self.events.push(Event::Switch {
            from: from.map(|t| t.id),
            to: to.id,
            from_interrupt: true,
        });
    }

    fn timestamp(&mut self) -> Timestamp {
        self.now += 1;
        self.now
    }
}

type TestKernel = Kernel<MockPort, 8, 16, 4, 8>;

const IDLE_PRIORITY: Priority = 15;

fn stack() -> &'static mut [StackWord] {
    Box::leak(vec![0; 64].into_boxed_slice())
}

fn task_body(_: usize) {}

fn new_kernel_with<const NUM_MSGS: usize>(
    cfg: KernelCfg,
) -> Kernel<MockPort, 8, 16, 4, NUM_MSGS> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut kernel = Kernel::new(MockPort::default(), cfg);
    kernel.init(task_body, stack()).unwrap();
    kernel
}

fn new_kernel() -> TestKernel {
    new_kernel_with(KernelCfg::new())
}

fn spawn<const NUM_MSGS: usize>(
    kernel: &mut Kernel<MockPort, 8, 16, 4, NUM_MSGS>,
    name: &'static str,
    priority: Priority,
) -> TaskId {
    kernel
        .create_task(TaskAttr::new(name, task_body, priority).queue_size(4), stack())
        .unwrap()
}

/// Simulate a timer interrupt.
fn tick<const NUM_MSGS: usize>(kernel: &mut Kernel<MockPort, 8, 16, 4, NUM_MSGS>) {
    kernel.int_enter();
    kernel.tick();
    kernel.int_exit();
}

fn msg(ptr: usize) -> Msg {
    Msg { ptr, size: 4 }
}

#[test]
fn start_dispatches_highest_priority_task() {
    let mut kernel = new_kernel();
    let a = spawn(&mut kernel, "a", 5);
    let b = spawn(&mut kernel, "b", 3);
    let c = spawn(&mut kernel, "c", 3);
    let _d = spawn(&mut kernel, "d", 7);

    assert_eq!(kernel.current_task(), None);
    kernel.start().unwrap();

    assert_eq!(kernel.port().events, [Event::Dispatch(b)]);
    assert_eq!(kernel.current_task(), Some(b));
    assert_eq!(kernel.highest_ready_priority(), Some(3));
    assert_eq!(kernel.ready_tasks_at(3).as_slice(), [b, c]);
    assert_eq!(kernel.ready_tasks_at(5).as_slice(), [a]);
    assert_eq!(kernel.task_count(), 5);
    assert_eq!(kernel.start(), Err(StartError::BadContext));
    kernel.check_invariants().unwrap();
}

#[test]
fn start_requires_an_application_task() {
    let mut kernel = new_kernel();
    assert_eq!(kernel.start(), Err(StartError::BadObjectState));
    assert_eq!(kernel.sched(), Err(BadContextError::BadContext));

    let mut kernel: TestKernel = Kernel::new(MockPort::default(), KernelCfg::new());
    spawn(&mut kernel, "a", 1);
    // The idle task is missing
    assert_eq!(kernel.start(), Err(StartError::BadObjectState));
}

#[test]
fn idle_priority_is_reserved() {
    let mut kernel = new_kernel();
    assert_eq!(
        kernel.create_task(TaskAttr::new("x", task_body, IDLE_PRIORITY), stack()),
        Err(CreateTaskError::BadParam)
    );
    assert_eq!(
        kernel.create_task(TaskAttr::new("x", task_body, 16), stack()),
        Err(CreateTaskError::BadParam)
    );
    assert_eq!(
        kernel.create_task(
            TaskAttr::new("x", task_body, 1),
            Box::leak(vec![0; 8].into_boxed_slice())
        ),
        Err(CreateTaskError::BadParam)
    );

    let a = spawn(&mut kernel, "a", 1);
    kernel.start().unwrap();

    let idle = kernel.idle_task().unwrap();
    assert_eq!(kernel.task_priority(idle), Ok(IDLE_PRIORITY));
    assert_eq!(kernel.delete_task(idle), Err(DeleteTaskError::BadParam));
    assert_eq!(kernel.suspend_task(idle), Err(SuspendTaskError::BadParam));
    assert_eq!(
        kernel.set_task_priority(a, IDLE_PRIORITY),
        Err(SetTaskPriorityError::BadParam)
    );
}

#[test]
fn task_table_exhaustion() {
    let mut kernel = new_kernel();
    for _ in 0..7 {
        spawn(&mut kernel, "t", 4);
    }
    assert_eq!(
        kernel.create_task(TaskAttr::new("x", task_body, 4), stack()),
        Err(CreateTaskError::NoMemory)
    );
}

#[test]
fn creating_higher_priority_task_preempts() {
    let mut kernel = new_kernel();
    let low = spawn(&mut kernel, "low", 8);
    kernel.start().unwrap();

    let high = spawn(&mut kernel, "high", 2);
    assert_eq!(kernel.current_task(), Some(high));
    assert_eq!(
        kernel.port().events.last(),
        Some(&Event::Switch {
            from: Some(low),
            to: high,
            from_interrupt: false,
        })
    );
    assert_eq!(kernel.context_switch_count(), 2);
    assert_eq!(kernel.task_info(high).unwrap().context_switch_count, 1);
}

#[test]
fn delay_and_tick() {
    let mut kernel = new_kernel();
    let b = spawn(&mut kernel, "b", 3);
    let c = spawn(&mut kernel, "c", 3);
    kernel.start().unwrap();
    assert_eq!(kernel.current_task(), Some(b));

    kernel.delay(10).unwrap();
    assert_eq!(kernel.current_task(), Some(c));
    assert_eq!(kernel.task_state(b), Ok(TaskSt::Delayed));
    assert_eq!(kernel.task_remaining_ticks(b), Some(10));

    for _ in 0..9 {
        tick(&mut kernel);
    }
    assert_eq!(kernel.task_remaining_ticks(b), Some(1));

    tick(&mut kernel);
    assert_eq!(kernel.task_state(b), Ok(TaskSt::Ready));
    assert_eq!(kernel.task_remaining_ticks(b), None);
    // `b` joins the tail of the running task's level
    assert_eq!(kernel.current_task(), Some(c));
    assert_eq!(kernel.ready_tasks_at(3).as_slice(), [c, b]);

    kernel.delay(0).unwrap();
    assert_eq!(kernel.current_task(), Some(c));

    kernel.delay(5).unwrap();
    assert_eq!(kernel.current_task(), Some(b));
    assert_eq!(kernel.tick_count(), 10);
    kernel.check_invariants().unwrap();
}

#[test]
fn delays_expire_in_order() {
    let mut kernel = new_kernel();
    let t1 = spawn(&mut kernel, "t1", 1);
    let t2 = spawn(&mut kernel, "t2", 2);
    let t3 = spawn(&mut kernel, "t3", 3);
    kernel.start().unwrap();

    kernel.delay(5).unwrap(); // t1
    kernel.delay(3).unwrap(); // t2
    kernel.delay(5).unwrap(); // t3
    assert_eq!(kernel.current_task(), kernel.idle_task());
    kernel.check_invariants().unwrap();

    for _ in 0..3 {
        tick(&mut kernel);
    }
    assert_eq!(kernel.current_task(), Some(t2));
    assert_eq!(kernel.task_remaining_ticks(t1), Some(2));
    assert_eq!(kernel.task_remaining_ticks(t3), Some(2));

    kernel.delay(100).unwrap();
    tick(&mut kernel);
    tick(&mut kernel);
    assert_eq!(kernel.task_state(t1), Ok(TaskSt::Ready));
    assert_eq!(kernel.task_state(t3), Ok(TaskSt::Ready));
    assert_eq!(kernel.current_task(), Some(t1));
    kernel.check_invariants().unwrap();
}

#[test]
fn delay_resume() {
    let mut kernel = new_kernel();
    let a = spawn(&mut kernel, "a", 2);
    let b = spawn(&mut kernel, "b", 4);
    kernel.start().unwrap();

    kernel.delay(50).unwrap();
    assert_eq!(kernel.current_task(), Some(b));
    assert_eq!(kernel.delay_resume(b), Err(DelayResumeError::BadParam));

    kernel.delay_resume(a).unwrap();
    assert_eq!(kernel.current_task(), Some(a));
    assert_eq!(kernel.delay_resume(b), Err(DelayResumeError::BadObjectState));

    // A delayed and suspended task stays suspended
    kernel.delay(50).unwrap();
    kernel.suspend_task(a).unwrap();
    assert_eq!(kernel.task_state(a), Ok(TaskSt::DelayedSuspended));
    kernel.delay_resume(a).unwrap();
    assert_eq!(kernel.task_state(a), Ok(TaskSt::Suspended));
    assert_eq!(kernel.current_task(), Some(b));
    kernel.check_invariants().unwrap();
}

#[test]
fn task_signal_timeout() {
    let mut kernel = new_kernel();
    let h = spawn(&mut kernel, "h", 2);
    let l = spawn(&mut kernel, "l", 5);
    kernel.start().unwrap();

    assert_eq!(kernel.task_sem_pend(100, PendOpt::empty()), Ok(Poll::Pending));
    assert_eq!(kernel.current_task(), Some(l));
    assert_eq!(kernel.task_state(h), Ok(TaskSt::PendingTimeout));
    assert_eq!(kernel.task_info(h).unwrap().pend_on, PendOn::TaskSignal);

    for _ in 0..99 {
        tick(&mut kernel);
    }
    assert_eq!(kernel.task_state(h), Ok(TaskSt::PendingTimeout));
    assert_eq!(kernel.task_remaining_ticks(h), Some(1));

    tick(&mut kernel);
    assert_eq!(kernel.current_task(), Some(h));
    assert_eq!(
        kernel.port().events.last(),
        Some(&Event::Switch {
            from: Some(l),
            to: h,
            from_interrupt: true,
        })
    );
    assert_eq!(kernel.task_sem_pend_finish(), Err(TaskSemPendError::Timeout));
    assert_eq!(kernel.task_info(h).unwrap().pend_status, PendStatus::Timeout);
    kernel.check_invariants().unwrap();
}

#[test]
fn task_signal_post_and_set() {
    let mut kernel = new_kernel();
    let h = spawn(&mut kernel, "h", 2);
    let l = spawn(&mut kernel, "l", 5);
    kernel.start().unwrap();

    // Not waiting: the counter accumulates
    assert_eq!(kernel.task_sem_post(l, PostOpt::empty()), Ok(1));
    assert_eq!(kernel.task_sem_post(l, PostOpt::empty()), Ok(2));
    assert_eq!(kernel.task_sem_set(l, 7), Ok(2));

    assert_eq!(
        kernel.task_sem_pend(0, PendOpt::NON_BLOCKING),
        Err(TaskSemPendError::Timeout)
    );
    assert_eq!(kernel.task_sem_pend(0, PendOpt::empty()), Ok(Poll::Pending));
    assert_eq!(kernel.current_task(), Some(l));
    assert_eq!(kernel.task_sem_set(h, 1), Err(TaskSemSetError::BadObjectState));

    let Ok(Poll::Ready((count, _))) = kernel.task_sem_pend(0, PendOpt::empty()) else {
        panic!()
    };
    assert_eq!(count, 6);

    // Waiting: the task is woken up and the counter is left unchanged
    assert_eq!(kernel.task_sem_post(h, PostOpt::empty()), Ok(0));
    assert_eq!(kernel.current_task(), Some(h));
    let (count, ts) = kernel.task_sem_pend_finish().unwrap();
    assert_eq!(count, 0);
    assert_ne!(ts, 0);
    kernel.check_invariants().unwrap();
}

#[test]
fn task_signal_post_from_interrupt() {
    let mut kernel = new_kernel();
    let h = spawn(&mut kernel, "h", 2);
    let l = spawn(&mut kernel, "l", 5);
    kernel.start().unwrap();
    assert_eq!(kernel.task_sem_pend(0, PendOpt::empty()), Ok(Poll::Pending));

    kernel.int_enter();
    kernel.int_enter();
    assert_eq!(kernel.int_nesting(), 2);
    assert_eq!(kernel.current_task(), None);
    kernel.task_sem_post(h, PostOpt::empty()).unwrap();
    assert_eq!(kernel.task_state(h), Ok(TaskSt::Ready));

    // No switch until the outermost handler returns
    kernel.int_exit();
    assert_eq!(kernel.current_task(), None);
    assert_eq!(kernel.int_nesting(), 1);
    kernel.int_exit();
    assert_eq!(kernel.int_nesting(), 0);
    assert_eq!(kernel.current_task(), Some(h));
    assert_eq!(
        kernel.port().events.last(),
        Some(&Event::Switch {
            from: Some(l),
            to: h,
            from_interrupt: true,
        })
    );

    // Unbalanced exits are ignored
    kernel.int_exit();
    assert_eq!(kernel.int_nesting(), 0);

    // Blocking operations are rejected in an interrupt context
    kernel.int_enter();
    assert_eq!(
        kernel.task_sem_pend(0, PendOpt::empty()),
        Err(TaskSemPendError::BadContext)
    );
    assert_eq!(kernel.delay(1), Err(DelayError::BadContext));
    kernel.int_exit();
}

#[test]
fn pend_abort() {
    let mut kernel = new_kernel();
    let h = spawn(&mut kernel, "h", 2);
    let l = spawn(&mut kernel, "l", 5);
    kernel.start().unwrap();

    assert_eq!(
        kernel.task_sem_pend_abort(l, PostOpt::empty()),
        Err(PendAbortError::BadObjectState)
    );
    assert_eq!(
        kernel.task_sem_pend_abort(h, PostOpt::empty()),
        Err(PendAbortError::BadParam)
    );

    assert_eq!(kernel.task_q_pend(30, PendOpt::empty()), Ok(Poll::Pending));
    // `h` is waiting for a message, not a signal
    assert_eq!(
        kernel.task_sem_pend_abort(h, PostOpt::empty()),
        Err(PendAbortError::BadObjectState)
    );

    kernel.task_q_pend_abort(h, PostOpt::NO_SCHED).unwrap();
    assert_eq!(kernel.current_task(), Some(l));
    assert_eq!(kernel.task_state(h), Ok(TaskSt::Ready));
    assert_eq!(kernel.task_remaining_ticks(h), None);

    kernel.sched().unwrap();
    assert_eq!(kernel.current_task(), Some(h));
    assert_eq!(kernel.task_q_pend_finish(), Err(TaskQPendError::Interrupted));
    kernel.check_invariants().unwrap();
}

#[test]
fn nested_suspend_resume() {
    let mut kernel = new_kernel();
    let a = spawn(&mut kernel, "a", 2);
    let c = spawn(&mut kernel, "c", 4);
    kernel.start().unwrap();

    kernel.suspend_task(c).unwrap();
    kernel.suspend_task(c).unwrap();
    assert_eq!(kernel.task_info(c).unwrap().suspend_nesting, 2);

    kernel.resume_task(c).unwrap();
    assert_eq!(kernel.task_state(c), Ok(TaskSt::Suspended));
    kernel.resume_task(c).unwrap();
    assert_eq!(kernel.task_state(c), Ok(TaskSt::Ready));
    assert_eq!(kernel.resume_task(c), Err(ResumeTaskError::BadObjectState));
    assert_eq!(kernel.resume_task(a), Err(ResumeTaskError::BadParam));

    // Self-suspension hands the CPU over
    kernel.suspend_task(a).unwrap();
    assert_eq!(kernel.current_task(), Some(c));
    kernel.resume_task(a).unwrap();
    assert_eq!(kernel.current_task(), Some(a));
    kernel.check_invariants().unwrap();
}

#[test]
fn suspended_pending_task_stays_suspended_after_post() {
    let mut kernel = new_kernel();
    let h = spawn(&mut kernel, "h", 2);
    let l = spawn(&mut kernel, "l", 5);
    kernel.start().unwrap();

    assert_eq!(kernel.task_sem_pend(10, PendOpt::empty()), Ok(Poll::Pending));
    kernel.suspend_task(h).unwrap();
    assert_eq!(kernel.task_state(h), Ok(TaskSt::PendingTimeoutSuspended));

    kernel.task_sem_post(h, PostOpt::empty()).unwrap();
    assert_eq!(kernel.task_state(h), Ok(TaskSt::Suspended));
    assert_eq!(kernel.current_task(), Some(l));

    kernel.resume_task(h).unwrap();
    assert_eq!(kernel.current_task(), Some(h));
    assert!(kernel.task_sem_pend_finish().is_ok());
    kernel.check_invariants().unwrap();
}

#[test]
fn task_queue_payload() {
    let mut kernel = new_kernel();
    let h = spawn(&mut kernel, "h", 2);
    let l = spawn(&mut kernel, "l", 5);
    kernel.start().unwrap();

    assert_eq!(kernel.task_q_pend(0, PendOpt::empty()), Ok(Poll::Pending));
    assert_eq!(kernel.current_task(), Some(l));

    // Handed over directly without using the pool
    kernel.task_q_post(h, msg(0xcafe), PostOpt::empty()).unwrap();
    assert_eq!(kernel.free_msg_count(), 8);
    assert_eq!(kernel.current_task(), Some(h));
    let (received, ts) = kernel.task_q_pend_finish().unwrap();
    assert_eq!(received, msg(0xcafe));
    assert_ne!(ts, 0);
    kernel.check_invariants().unwrap();
}

#[test]
fn task_queue_fifo_lifo_and_overflow() {
    let mut kernel = new_kernel();
    let a = spawn(&mut kernel, "a", 2);
    kernel.start().unwrap();

    kernel.task_q_post(a, msg(1), PostOpt::empty()).unwrap();
    kernel.task_q_post(a, msg(2), PostOpt::empty()).unwrap();
    kernel.task_q_post(a, msg(0), PostOpt::LIFO).unwrap();
    kernel.task_q_post(a, msg(3), PostOpt::empty()).unwrap();
    assert_eq!(
        kernel.task_q_post(a, msg(4), PostOpt::empty()),
        Err(TaskQPostError::QueueOverflow)
    );
    assert_eq!(kernel.task_q_len(a), Ok((4, 4)));
    assert_eq!(kernel.free_msg_count(), 4);

    for expected in 0..3 {
        let Ok(Poll::Ready((received, _))) = kernel.task_q_pend(0, PendOpt::empty()) else {
            panic!()
        };
        assert_eq!(received, msg(expected));
    }

    assert_eq!(kernel.task_q_flush(a), Ok(1));
    assert_eq!(kernel.task_q_len(a), Ok((0, 4)));
    assert_eq!(kernel.free_msg_count(), 8);
    assert_eq!(
        kernel.task_q_pend(0, PendOpt::NON_BLOCKING),
        Err(TaskQPendError::Timeout)
    );
}

#[test]
fn task_queue_pool_exhaustion() {
    let mut kernel = new_kernel_with::<3>(KernelCfg::new());
    let a = spawn(&mut kernel, "a", 2);
    let b = spawn(&mut kernel, "b", 3);
    kernel.start().unwrap();

    kernel.task_q_post(a, msg(1), PostOpt::empty()).unwrap();
    kernel.task_q_post(a, msg(2), PostOpt::empty()).unwrap();
    kernel.task_q_post(b, msg(3), PostOpt::empty()).unwrap();
    assert_eq!(
        kernel.task_q_post(b, msg(4), PostOpt::empty()),
        Err(TaskQPostError::NoMemory)
    );
    assert_eq!(kernel.free_msg_count(), 0);

    // Deleting a task returns its messages to the pool
    kernel.delete_task(b).unwrap();
    assert_eq!(kernel.free_msg_count(), 1);
    assert_eq!(kernel.task_q_len(b), Err(NoAccessError::NoAccess));
}

#[test]
fn task_queue_can_be_disabled() {
    let mut kernel = new_kernel_with::<8>(KernelCfg::new().with_task_queue(false));
    let a = spawn(&mut kernel, "a", 2);
    kernel.start().unwrap();
    assert_eq!(
        kernel.task_q_post(a, msg(1), PostOpt::empty()),
        Err(TaskQPostError::NotSupported)
    );
    assert_eq!(
        kernel.task_q_pend(0, PendOpt::empty()),
        Err(TaskQPendError::NotSupported)
    );
}

#[test]
fn sched_lock_defers_preemption() {
    let mut kernel = new_kernel();
    let l = spawn(&mut kernel, "l", 5);
    kernel.start().unwrap();

    assert_eq!(kernel.sched_unlock(), Err(SchedUnlockError::BadObjectState));
    kernel.sched_lock().unwrap();
    kernel.sched_lock().unwrap();
    assert_eq!(kernel.sched_lock_nesting(), 2);

    let h = spawn(&mut kernel, "h", 1);
    assert_eq!(kernel.current_task(), Some(l));

    // Blocking while the scheduler is locked is an error
    assert_eq!(kernel.delay(1), Err(DelayError::BadContext));
    assert_eq!(
        kernel.task_sem_pend(0, PendOpt::empty()),
        Err(TaskSemPendError::BadContext)
    );
    assert_eq!(kernel.delete_task(l), Err(DeleteTaskError::BadContext));

    // Interrupts don't switch either
    tick(&mut kernel);
    assert_eq!(kernel.current_task(), Some(l));

    assert_eq!(kernel.sched_unlock(), Ok(1));
    assert_eq!(kernel.current_task(), Some(l));
    assert_eq!(kernel.sched_unlock(), Ok(0));
    assert_eq!(kernel.current_task(), Some(h));
    kernel.check_invariants().unwrap();
}

#[test]
fn round_robin_rotation_and_delete() {
    let mut kernel = new_kernel_with::<8>(KernelCfg::new().with_round_robin(true, 2));
    let a = spawn(&mut kernel, "a", 5);
    let b = spawn(&mut kernel, "b", 5);
    let c = spawn(&mut kernel, "c", 5);
    kernel.start().unwrap();
    assert_eq!(kernel.current_task(), Some(a));

    tick(&mut kernel);
    assert_eq!(kernel.current_task(), Some(a));
    tick(&mut kernel);
    assert_eq!(kernel.current_task(), Some(b));
    assert_eq!(kernel.ready_tasks_at(5).as_slice(), [b, c, a]);

    // `b` deletes itself
    kernel.delete_task(b).unwrap();
    assert_eq!(kernel.current_task(), Some(c));
    assert_eq!(kernel.ready_tasks_at(5).as_slice(), [c, a]);
    assert_eq!(
        kernel.port().events.last(),
        Some(&Event::Switch {
            from: None,
            to: c,
            from_interrupt: false,
        })
    );
    assert_eq!(kernel.task_state(b), Err(NoAccessError::NoAccess));

    kernel.round_robin_yield().unwrap();
    assert_eq!(kernel.current_task(), Some(a));
    kernel.check_invariants().unwrap();
}

#[test]
fn round_robin_per_task_quanta() {
    let mut kernel = new_kernel_with::<8>(KernelCfg::new().with_round_robin(true, 10));
    let a = kernel
        .create_task(TaskAttr::new("a", task_body, 5).time_quanta(1), stack())
        .unwrap();
    let b = spawn(&mut kernel, "b", 5);
    kernel.start().unwrap();

    tick(&mut kernel);
    assert_eq!(kernel.current_task(), Some(b));
    for _ in 0..9 {
        tick(&mut kernel);
    }
    assert_eq!(kernel.current_task(), Some(b));
    tick(&mut kernel);
    assert_eq!(kernel.current_task(), Some(a));

    kernel.configure_round_robin(false, 0).unwrap();
    assert!(!kernel.is_round_robin_enabled());
    assert_eq!(kernel.round_robin_yield(), Err(YieldError::NotSupported));
    for _ in 0..5 {
        tick(&mut kernel);
    }
    assert_eq!(kernel.current_task(), Some(a));
}

#[test]
fn round_robin_raised_quantum_takes_effect_immediately() {
    let mut kernel = new_kernel_with::<8>(KernelCfg::new().with_round_robin(true, 10));
    let a = spawn(&mut kernel, "a", 5);
    kernel.start().unwrap();

    // Alone at its level, `a` runs out its quantum without being rotated
    for _ in 0..10 {
        tick(&mut kernel);
    }
    kernel.set_time_quanta(a, 50).unwrap();
    assert_eq!(kernel.task_info(a).unwrap().time_quanta, 50);

    let b = spawn(&mut kernel, "b", 5);
    tick(&mut kernel);
    assert_eq!(kernel.current_task(), Some(a));
    assert_eq!(kernel.ready_tasks_at(5).as_slice(), [a, b]);

    for _ in 0..48 {
        tick(&mut kernel);
    }
    assert_eq!(kernel.current_task(), Some(a));
    tick(&mut kernel);
    assert_eq!(kernel.current_task(), Some(b));
}

#[test]
fn lowered_quantum_applies_from_the_next_slice() {
    let mut kernel = new_kernel_with::<8>(KernelCfg::new().with_round_robin(true, 10));
    let a = spawn(&mut kernel, "a", 5);
    let b = spawn(&mut kernel, "b", 5);
    kernel.start().unwrap();

    kernel.set_time_quanta(a, 2).unwrap();
    for _ in 0..9 {
        tick(&mut kernel);
    }
    assert_eq!(kernel.current_task(), Some(a));
    tick(&mut kernel);
    assert_eq!(kernel.current_task(), Some(b));

    for _ in 0..10 {
        tick(&mut kernel);
    }
    assert_eq!(kernel.current_task(), Some(a));
    tick(&mut kernel);
    tick(&mut kernel);
    assert_eq!(kernel.current_task(), Some(b));
}

#[test]
fn round_robin_yield_alone() {
    let mut kernel = new_kernel_with::<8>(KernelCfg::new().with_round_robin(true, 0));
    spawn(&mut kernel, "a", 5);
    kernel.start().unwrap();
    assert_eq!(kernel.round_robin_yield(), Err(YieldError::BadObjectState));
}

#[test]
fn semaphore_wakes_waiters_by_priority() {
    let mut kernel = new_kernel();
    let l = spawn(&mut kernel, "l", 10);
    kernel.start().unwrap();
    let sem = kernel.sem_create("sem", 0).unwrap();

    let mut waiters = Vec::new();
    for (name, priority) in [("w3", 3), ("w1", 1), ("w2", 2), ("w1b", 1)] {
        let w = spawn(&mut kernel, name, priority);
        assert_eq!(kernel.current_task(), Some(w));
        assert_eq!(kernel.sem_pend(sem, 0, PendOpt::empty()), Ok(Poll::Pending));
        assert_eq!(kernel.current_task(), Some(l));
        waiters.push(w);
    }
    kernel.check_invariants().unwrap();

    for expected in [waiters[1], waiters[3], waiters[2], waiters[0]] {
        assert_eq!(kernel.sem_post(sem, PostOpt::empty()), Ok(0));
        assert_eq!(kernel.current_task(), Some(expected));
        assert!(kernel.sem_pend_finish().is_ok());
        kernel.delay(1000).unwrap();
        assert_eq!(kernel.current_task(), Some(l));
    }

    assert_eq!(kernel.sem_post(sem, PostOpt::empty()), Ok(1));
    assert_eq!(kernel.sem_count(sem), Ok(1));
    assert_eq!(kernel.sem_pend(sem, 0, PendOpt::empty()), Ok(Poll::Ready(0)));
    kernel.check_invariants().unwrap();
}

#[test]
fn semaphore_broadcast_abort_and_delete() {
    let mut kernel = new_kernel();
    let l = spawn(&mut kernel, "l", 10);
    kernel.start().unwrap();
    let sem = kernel.sem_create("sem", 0).unwrap();

    let mut waiters = Vec::new();
    for priority in [3, 4, 5] {
        waiters.push(spawn(&mut kernel, "w", priority));
        assert_eq!(kernel.sem_pend(sem, 0, PendOpt::empty()), Ok(Poll::Pending));
    }

    // Broadcast without rescheduling
    kernel
        .sem_post(sem, PostOpt::ALL | PostOpt::NO_SCHED)
        .unwrap();
    assert_eq!(kernel.current_task(), Some(l));
    for &w in &waiters {
        assert_eq!(kernel.task_state(w), Ok(TaskSt::Ready));
        kernel.suspend_task(w).unwrap();
    }
    for &w in &waiters {
        kernel.resume_task(w).unwrap();
        assert_eq!(kernel.current_task(), Some(w));
        assert!(kernel.sem_pend_finish().is_ok());
        assert_eq!(kernel.sem_pend(sem, 0, PendOpt::empty()), Ok(Poll::Pending));
    }

    assert_eq!(kernel.sem_pend_abort(sem, PostOpt::empty()), Ok(1));
    assert_eq!(kernel.current_task(), Some(waiters[0]));
    assert_eq!(kernel.sem_pend_finish(), Err(SemPendError::Interrupted));
    kernel.delay(1000).unwrap();

    assert_eq!(kernel.sem_delete(sem), Ok(2));
    assert_eq!(kernel.current_task(), Some(waiters[1]));
    assert_eq!(kernel.sem_pend_finish(), Err(SemPendError::Deleted));
    assert_eq!(
        kernel.sem_pend(sem, 0, PendOpt::empty()),
        Err(SemPendError::NoAccess)
    );
    assert_eq!(
        kernel.sem_pend_abort(sem, PostOpt::empty()),
        Err(PendAbortError::NoAccess)
    );
    kernel.check_invariants().unwrap();
}

#[test]
fn object_table_exhaustion_and_kind_checks() {
    let mut kernel = new_kernel();
    spawn(&mut kernel, "a", 1);
    kernel.start().unwrap();

    let sem = kernel.sem_create("s", 0).unwrap();
    let mutex = kernel.mutex_create("m").unwrap();
    kernel.sem_create("s2", 0).unwrap();
    kernel.sem_create("s3", 0).unwrap();
    assert_eq!(kernel.sem_create("s4", 0), Err(CreateObjectError::NoMemory));
    assert_eq!(kernel.mutex_create("m2"), Err(CreateObjectError::NoMemory));

    assert_eq!(kernel.sem_delete(sem), Ok(0));
    let mutex2 = kernel.mutex_create("m2").unwrap();
    assert_eq!(kernel.mutex_owner(mutex), Ok(None));
    assert_eq!(kernel.mutex_owner(mutex2), Ok(None));
    assert_eq!(kernel.sem_count(sem), Err(NoAccessError::NoAccess));
}

#[test]
fn semaphore_overflow() {
    let mut kernel = new_kernel();
    spawn(&mut kernel, "a", 1);
    kernel.start().unwrap();
    let sem = kernel.sem_create("s", SemCount::MAX).unwrap();
    assert_eq!(
        kernel.sem_post(sem, PostOpt::empty()),
        Err(SemPostError::QueueOverflow)
    );
}

#[test]
fn mutex_priority_inheritance() {
    let mut kernel = new_kernel();
    let l = spawn(&mut kernel, "l", 10);
    kernel.start().unwrap();
    let mutex = kernel.mutex_create("m").unwrap();

    assert_eq!(kernel.mutex_pend(mutex, 0, PendOpt::empty()), Ok(Poll::Ready(())));
    assert_eq!(kernel.mutex_owner(mutex), Ok(Some(l)));

    let h = spawn(&mut kernel, "h", 1);
    assert_eq!(kernel.current_task(), Some(h));
    assert_eq!(
        kernel.mutex_pend(mutex, 0, PendOpt::NON_BLOCKING),
        Err(MutexPendError::Timeout)
    );
    assert_eq!(kernel.mutex_post(mutex, PostOpt::empty()), Err(MutexPostError::NotOwner));
    assert_eq!(kernel.mutex_pend(mutex, 0, PendOpt::empty()), Ok(Poll::Pending));

    assert_eq!(kernel.current_task(), Some(l));
    assert_eq!(kernel.task_priority(l), Ok(1));
    assert_eq!(kernel.task_base_priority(l), Ok(10));
    kernel.check_invariants().unwrap();

    kernel.mutex_post(mutex, PostOpt::empty()).unwrap();
    assert_eq!(kernel.task_priority(l), Ok(10));
    assert_eq!(kernel.current_task(), Some(h));
    assert!(kernel.mutex_pend_finish().is_ok());
    assert_eq!(kernel.mutex_owner(mutex), Ok(Some(h)));
    kernel.check_invariants().unwrap();
}

#[test]
fn mutex_nesting() {
    let mut kernel = new_kernel();
    let a = spawn(&mut kernel, "a", 3);
    kernel.start().unwrap();
    let mutex = kernel.mutex_create("m").unwrap();

    for _ in 0..3 {
        assert_eq!(kernel.mutex_pend(mutex, 0, PendOpt::empty()), Ok(Poll::Ready(())));
    }
    for _ in 0..2 {
        kernel.mutex_post(mutex, PostOpt::empty()).unwrap();
        assert_eq!(kernel.mutex_owner(mutex), Ok(Some(a)));
    }
    kernel.mutex_post(mutex, PostOpt::empty()).unwrap();
    assert_eq!(kernel.mutex_owner(mutex), Ok(None));
    kernel.check_invariants().unwrap();
}

#[test]
fn mutex_chained_inheritance_and_abort() {
    let mut kernel = new_kernel();
    let l = spawn(&mut kernel, "l", 10);
    kernel.start().unwrap();
    let m1 = kernel.mutex_create("m1").unwrap();
    let m2 = kernel.mutex_create("m2").unwrap();

    assert!(kernel.mutex_pend(m1, 0, PendOpt::empty()).is_ok());

    let m = spawn(&mut kernel, "m", 5);
    assert!(kernel.mutex_pend(m2, 0, PendOpt::empty()).is_ok());
    assert_eq!(kernel.mutex_pend(m1, 0, PendOpt::empty()), Ok(Poll::Pending));
    assert_eq!(kernel.current_task(), Some(l));
    assert_eq!(kernel.task_priority(l), Ok(5));

    let h = spawn(&mut kernel, "h", 1);
    assert_eq!(kernel.mutex_pend(m2, 0, PendOpt::empty()), Ok(Poll::Pending));
    assert_eq!(kernel.task_priority(m), Ok(1));
    assert_eq!(kernel.task_priority(l), Ok(1));
    assert_eq!(kernel.current_task(), Some(l));
    kernel.check_invariants().unwrap();

    // `h` stops waiting; the loan is withdrawn along the chain
    assert_eq!(kernel.mutex_pend_abort(m2, PostOpt::empty()), Ok(1));
    assert_eq!(kernel.task_priority(m), Ok(5));
    assert_eq!(kernel.task_priority(l), Ok(5));
    assert_eq!(kernel.current_task(), Some(h));
    assert_eq!(kernel.mutex_pend_finish(), Err(MutexPendError::Interrupted));
    kernel.check_invariants().unwrap();

    // Wait again with a timeout
    assert_eq!(kernel.mutex_pend(m2, 3, PendOpt::empty()), Ok(Poll::Pending));
    assert_eq!(kernel.task_priority(l), Ok(1));
    for _ in 0..3 {
        tick(&mut kernel);
    }
    assert_eq!(kernel.current_task(), Some(h));
    assert_eq!(kernel.mutex_pend_finish(), Err(MutexPendError::Timeout));
    assert_eq!(kernel.task_priority(m), Ok(5));
    assert_eq!(kernel.task_priority(l), Ok(5));
    kernel.check_invariants().unwrap();
}

#[test]
fn mutex_handed_over_when_owner_is_deleted() {
    let mut kernel = new_kernel();
    let l = spawn(&mut kernel, "l", 10);
    kernel.start().unwrap();
    let mutex = kernel.mutex_create("m").unwrap();
    assert!(kernel.mutex_pend(mutex, 0, PendOpt::empty()).is_ok());

    let h = spawn(&mut kernel, "h", 1);
    assert_eq!(kernel.mutex_pend(mutex, 0, PendOpt::empty()), Ok(Poll::Pending));
    assert_eq!(kernel.current_task(), Some(l));

    kernel.delete_task(l).unwrap();
    assert_eq!(kernel.current_task(), Some(h));
    assert!(kernel.mutex_pend_finish().is_ok());
    assert_eq!(kernel.mutex_owner(mutex), Ok(Some(h)));
    kernel.check_invariants().unwrap();
}

#[test]
fn mutex_delete_reverts_owner() {
    let mut kernel = new_kernel();
    let l = spawn(&mut kernel, "l", 10);
    kernel.start().unwrap();
    let mutex = kernel.mutex_create("m").unwrap();
    assert!(kernel.mutex_pend(mutex, 0, PendOpt::empty()).is_ok());

    let h = spawn(&mut kernel, "h", 1);
    assert_eq!(kernel.mutex_pend(mutex, 0, PendOpt::empty()), Ok(Poll::Pending));
    assert_eq!(kernel.task_priority(l), Ok(1));

    assert_eq!(kernel.mutex_delete(mutex), Ok(1));
    assert_eq!(kernel.task_priority(l), Ok(10));
    assert_eq!(kernel.current_task(), Some(h));
    assert_eq!(kernel.mutex_pend_finish(), Err(MutexPendError::Deleted));
    assert_eq!(kernel.mutex_owner(mutex), Err(NoAccessError::NoAccess));
    kernel.check_invariants().unwrap();
}

#[test]
fn deleting_a_waiter_reverts_owner() {
    let mut kernel = new_kernel();
    let l = spawn(&mut kernel, "l", 10);
    kernel.start().unwrap();
    let mutex = kernel.mutex_create("m").unwrap();
    assert!(kernel.mutex_pend(mutex, 0, PendOpt::empty()).is_ok());

    let h = spawn(&mut kernel, "h", 1);
    assert_eq!(kernel.mutex_pend(mutex, 0, PendOpt::empty()), Ok(Poll::Pending));
    assert_eq!(kernel.task_priority(l), Ok(1));

    kernel.delete_task(h).unwrap();
    assert_eq!(kernel.task_priority(l), Ok(10));
    kernel.check_invariants().unwrap();
}

#[test]
fn set_priority_of_mutex_holder() {
    let mut kernel = new_kernel();
    let l = spawn(&mut kernel, "l", 10);
    kernel.start().unwrap();
    let mutex = kernel.mutex_create("m").unwrap();
    assert!(kernel.mutex_pend(mutex, 0, PendOpt::empty()).is_ok());

    let h = spawn(&mut kernel, "h", 3);
    assert_eq!(kernel.mutex_pend(mutex, 0, PendOpt::empty()), Ok(Poll::Pending));
    assert_eq!(kernel.task_priority(l), Ok(3));

    // Lowering is clamped by the waiter's priority
    kernel.set_task_priority(l, 12).unwrap();
    assert_eq!(kernel.task_base_priority(l), Ok(12));
    assert_eq!(kernel.task_priority(l), Ok(3));

    // Raising the waiter propagates to the owner
    kernel.set_task_priority(h, 2).unwrap();
    assert_eq!(kernel.task_priority(l), Ok(2));

    // Lowering the waiter withdraws the loan
    kernel.set_task_priority(h, 11).unwrap();
    assert_eq!(kernel.task_priority(l), Ok(11));
    kernel.check_invariants().unwrap();

    kernel.mutex_post(mutex, PostOpt::empty()).unwrap();
    assert_eq!(kernel.task_priority(l), Ok(12));
    assert_eq!(kernel.current_task(), Some(h));
    kernel.check_invariants().unwrap();
}

#[test]
fn mutexes_can_be_disabled() {
    let mut kernel = new_kernel_with::<8>(KernelCfg::new().with_mutex(false));
    spawn(&mut kernel, "a", 1);
    kernel.start().unwrap();
    assert_eq!(kernel.mutex_create("m"), Err(CreateObjectError::NotSupported));
}

#[test]
fn set_priority_moves_ready_task() {
    let mut kernel = new_kernel();
    let a = spawn(&mut kernel, "a", 5);
    let b = spawn(&mut kernel, "b", 6);
    kernel.start().unwrap();

    kernel.set_task_priority(b, 4).unwrap();
    assert_eq!(kernel.current_task(), Some(b));
    assert_eq!(kernel.ready_tasks_at(4).as_slice(), [b]);

    kernel.set_task_priority(b, 5).unwrap();
    // The running task keeps the CPU among its new peers
    assert_eq!(kernel.current_task(), Some(b));
    assert_eq!(kernel.ready_tasks_at(5).as_slice(), [b, a]);
    kernel.check_invariants().unwrap();
}

#[test]
fn stale_task_handles_are_rejected() {
    let mut kernel = new_kernel();
    let a = spawn(&mut kernel, "a", 5);
    let b = spawn(&mut kernel, "b", 6);
    kernel.start().unwrap();

    kernel.delete_task(b).unwrap();
    let c = spawn(&mut kernel, "c", 6);
    assert_eq!(c.index(), b.index());
    assert_ne!(c, b);
    assert_eq!(kernel.task_state(b), Err(NoAccessError::NoAccess));
    assert_eq!(
        kernel.task_sem_post(b, PostOpt::empty()),
        Err(TaskSemPostError::NoAccess)
    );
    assert_eq!(kernel.task_state(c), Ok(TaskSt::Ready));
    assert_eq!(kernel.current_task(), Some(a));
}

#[test]
fn task_stack_check_reports_usage() {
    let mut kernel =
        new_kernel_with::<8>(KernelCfg::new().with_stack_check(true).with_stack_redzone(true, 8));
    let stack = stack();
    let base = stack.as_mut_ptr();
    let a = kernel
        .create_task(TaskAttr::new("a", task_body, 5), stack)
        .unwrap();

    // Only the initial frame has been written
    assert_eq!(
        kernel.task_stack_check(a),
        Ok(TaskStackInfo {
            free: 64 - 8 - INITIAL_FRAME_LEN,
            used: INITIAL_FRAME_LEN,
        })
    );

    // Safety: The mock port never touches the stack after creation
    unsafe { base.add(40).write(1) };
    assert_eq!(
        kernel.task_stack_check(a),
        Ok(TaskStackInfo { free: 32, used: 24 })
    );

    kernel.start().unwrap();
    kernel.delete_task(a).unwrap();
    assert_eq!(kernel.task_stack_check(a), Err(TaskStackCheckError::NoAccess));
}

#[test]
fn task_stack_check_requires_cfg() {
    let mut kernel = new_kernel();
    let a = spawn(&mut kernel, "a", 5);
    assert_eq!(
        kernel.task_stack_check(a),
        Err(TaskStackCheckError::NotSupported)
    );
}

#[test]
fn stack_must_be_larger_than_redzone() {
    let mut kernel = Kernel::<MockPort, 8, 16, 4, 8>::new(
        MockPort::default(),
        KernelCfg::new().with_stack_redzone(true, 64),
    );
    assert_eq!(kernel.init(task_body, stack()), Err(CreateTaskError::BadParam));
}

#[test]
#[should_panic(expected = "stack overflow")]
fn corrupted_redzone_panics_without_hook() {
    let mut kernel = new_kernel_with::<8>(KernelCfg::new().with_stack_redzone(true, 4));
    let stack = stack();
    let base = stack.as_mut_ptr();
    kernel
        .create_task(TaskAttr::new("a", task_body, 5), stack)
        .unwrap();
    kernel.start().unwrap();

    unsafe { base.write(0) };
    tick(&mut kernel);
}

#[test]
fn task_registers() {
    let mut kernel = new_kernel();
    let a = spawn(&mut kernel, "a", 5);
    kernel.start().unwrap();

    let ids: Vec<_> = (0..NUM_TASK_REGS)
        .map(|_| kernel.task_reg_get_id().unwrap())
        .collect();
    assert_eq!(ids, (0..NUM_TASK_REGS).collect::<Vec<_>>());
    assert_eq!(kernel.task_reg_get_id(), Err(TaskRegIdError::NoMemory));

    assert_eq!(kernel.task_reg_get(a, ids[1]), Ok(0));
    kernel.task_reg_set(a, ids[1], 42).unwrap();
    assert_eq!(kernel.task_reg_get(a, ids[1]), Ok(42));
    assert_eq!(kernel.task_reg_get(a, ids[0]), Ok(0));

    // Interrupt handlers can access registers too
    kernel.int_enter();
    kernel.task_reg_set(a, ids[2], 7).unwrap();
    kernel.int_exit();
    assert_eq!(kernel.task_reg_get(a, ids[2]), Ok(7));

    assert_eq!(
        kernel.task_reg_get(a, NUM_TASK_REGS),
        Err(TaskRegError::BadParam)
    );
    assert_eq!(
        kernel.task_reg_set(a, NUM_TASK_REGS, 1),
        Err(TaskRegError::BadParam)
    );

    // A reused slot starts with cleared registers
    kernel.delete_task(a).unwrap();
    assert_eq!(kernel.task_reg_get(a, ids[1]), Err(TaskRegError::NoAccess));
    let b = spawn(&mut kernel, "b", 5);
    assert_eq!(b.index(), a.index());
    assert_eq!(kernel.task_reg_get(b, ids[1]), Ok(0));
}

#[test]
fn set_tick_count_leaves_timeouts_alone() {
    let mut kernel = new_kernel();
    let a = spawn(&mut kernel, "a", 5);
    kernel.start().unwrap();

    kernel.delay(3).unwrap();
    kernel.set_tick_count(1000).unwrap();
    assert_eq!(kernel.tick_count(), 1000);

    tick(&mut kernel);
    tick(&mut kernel);
    assert_eq!(kernel.task_state(a), Ok(TaskSt::Delayed));
    tick(&mut kernel);
    assert_eq!(kernel.current_task(), Some(a));
    assert_eq!(kernel.tick_count(), 1003);
}

#[test]
fn object_info_names_first_waiter() {
    let mut kernel = new_kernel();
    let l = spawn(&mut kernel, "l", 10);
    kernel.start().unwrap();
    let sem = kernel.sem_create("sem", 0).unwrap();
    let mutex = kernel.mutex_create("mutex").unwrap();

    assert_eq!(
        kernel.sem_info(sem),
        Ok(PendObjInfo {
            name: "sem",
            num_waiters: 0,
            first_waiter_name: "",
        })
    );

    spawn(&mut kernel, "w2", 2);
    assert_eq!(kernel.sem_pend(sem, 0, PendOpt::empty()), Ok(Poll::Pending));
    spawn(&mut kernel, "w1", 1);
    assert_eq!(kernel.sem_pend(sem, 0, PendOpt::empty()), Ok(Poll::Pending));
    assert_eq!(kernel.current_task(), Some(l));
    assert_eq!(
        kernel.sem_info(sem),
        Ok(PendObjInfo {
            name: "sem",
            num_waiters: 2,
            first_waiter_name: "w1",
        })
    );

    assert_eq!(kernel.mutex_pend(mutex, 0, PendOpt::empty()), Ok(Poll::Ready(())));
    let info = kernel.mutex_info(mutex).unwrap();
    assert_eq!((info.name, info.num_waiters), ("mutex", 0));

    kernel.sem_delete(sem).unwrap();
    assert_eq!(kernel.sem_info(sem), Err(NoAccessError::NoAccess));
}

#[test]
fn idle_counts_iterations() {
    let mut kernel = new_kernel();
    spawn(&mut kernel, "a", 5);
    kernel.start().unwrap();
    kernel.delay(1).unwrap();
    assert_eq!(kernel.current_task(), kernel.idle_task());
    kernel.idle();
    kernel.idle();
    assert_eq!(kernel.idle_count(), 2);
}

mod hooks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CREATED: AtomicUsize = AtomicUsize::new(0);
    static DELETED: AtomicUsize = AtomicUsize::new(0);
    static SWITCHED: AtomicUsize = AtomicUsize::new(0);
    static OVERFLOWED: AtomicUsize = AtomicUsize::new(0);
    static OVERFLOWED_TASK: AtomicUsize = AtomicUsize::new(usize::MAX);

    #[test]
    fn hooks_are_called() {
        let hooks = KernelHooks {
            task_create: Some(|_| {
                CREATED.fetch_add(1, Ordering::Relaxed);
            }),
            task_delete: Some(|_| {
                DELETED.fetch_add(1, Ordering::Relaxed);
            }),
            task_switch: Some(|_, _| {
                SWITCHED.fetch_add(1, Ordering::Relaxed);
            }),
            ..KernelHooks::new()
        };
        let mut kernel = new_kernel_with::<8>(KernelCfg::new().with_hooks(hooks));
        let a = spawn(&mut kernel, "a", 5);
        kernel.start().unwrap();
        let b = spawn(&mut kernel, "b", 2);
        kernel.delete_task(b).unwrap();
        assert_eq!(kernel.current_task(), Some(a));

        // idle, a, b
        assert_eq!(CREATED.load(Ordering::Relaxed), 3);
        assert_eq!(DELETED.load(Ordering::Relaxed), 1);
        // a -> b, b -> a
        assert_eq!(SWITCHED.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn stack_overflow_hook_is_called() {
        let hooks = KernelHooks {
            stack_overflow: Some(|task| {
                OVERFLOWED.fetch_add(1, Ordering::Relaxed);
                OVERFLOWED_TASK.store(task.index(), Ordering::Relaxed);
            }),
            ..KernelHooks::new()
        };
        let mut kernel = new_kernel_with::<8>(
            KernelCfg::new()
                .with_stack_redzone(true, 4)
                .with_hooks(hooks),
        );
        let stack = stack();
        let base = stack.as_mut_ptr();
        let a = kernel
            .create_task(TaskAttr::new("a", task_body, 5), stack)
            .unwrap();
        let b = spawn(&mut kernel, "b", 6);
        kernel.start().unwrap();

        kernel.delay(1).unwrap();
        assert_eq!(kernel.current_task(), Some(b));
        tick(&mut kernel);
        assert_eq!(kernel.current_task(), Some(a));
        assert_eq!(OVERFLOWED.load(Ordering::Relaxed), 0);

        // Safety: The mock port never touches the stack after creation
        unsafe { base.add(3).write(0) };

        // Checked when returning from an interrupt to the same task...
        tick(&mut kernel);
        assert_eq!(OVERFLOWED.load(Ordering::Relaxed), 1);
        assert_eq!(OVERFLOWED_TASK.load(Ordering::Relaxed), a.index());

        // ...and when the task gives up the CPU
        kernel.delay(1).unwrap();
        assert_eq!(kernel.current_task(), Some(b));
        assert_eq!(OVERFLOWED.load(Ordering::Relaxed), 2);
    }
}

/// Execute a random sequence of operations, playing the role of whichever
/// task is running, and check the kernel's invariants after each step.
#[quickcheck]
fn random_operations_preserve_invariants(bytecode: Vec<(u8, u8, u8)>) {
    let mut kernel = new_kernel();
    let mut tasks = vec![spawn(&mut kernel, "t", 7)];
    kernel.start().unwrap();
    let sem = kernel.sem_create("s", 0).unwrap();
    let mutexes = [
        kernel.mutex_create("m0").unwrap(),
        kernel.mutex_create("m1").unwrap(),
    ];

    for (op, x, y) in bytecode {
        let target = tasks[x as usize % tasks.len()];
        let priority = y as usize % IDLE_PRIORITY;
        let timeout = Ticks::from(y % 4);
        let current_is_idle = kernel.current_task() == kernel.idle_task();

        log::trace!("op = {}, target = {:?}, y = {}", op % 16, target, y);

        match op % 16 {
            0 => {
                if let Ok(task) = kernel.create_task(
                    TaskAttr::new("t", task_body, priority).queue_size(2),
                    stack(),
                ) {
                    tasks.push(task);
                }
            }
            1 => {
                let _ = kernel.delete_task(target);
            }
            2 => {
                let _ = kernel.suspend_task(target);
            }
            3 => {
                let _ = kernel.resume_task(target);
            }
            4 => {
                let _ = kernel.set_task_priority(target, priority);
            }
            5 if !current_is_idle => {
                let _ = kernel.delay(timeout);
            }
            6 => tick(&mut kernel),
            7 if !current_is_idle => {
                let _ = kernel.sem_pend(sem, timeout, PendOpt::empty());
            }
            8 => {
                let _ = kernel.sem_post(sem, PostOpt::empty());
            }
            9 if !current_is_idle => {
                let _ = kernel.mutex_pend(mutexes[x as usize % 2], timeout, PendOpt::empty());
            }
            10 => {
                let _ = kernel.mutex_post(mutexes[x as usize % 2], PostOpt::empty());
            }
            11 if !current_is_idle => {
                let _ = kernel.task_sem_pend(timeout, PendOpt::empty());
            }
            12 => {
                let _ = kernel.task_sem_post(target, PostOpt::empty());
            }
            13 => {
                let _ = kernel.task_q_post(target, msg(y as usize), PostOpt::empty());
            }
            14 => {
                let _ = kernel.sem_pend_abort(sem, PostOpt::ALL);
            }
            15 => {
                let _ = kernel.mutex_pend_abort(mutexes[x as usize % 2], PostOpt::empty());
            }
            _ => {}
        }

        if let Err(e) = kernel.check_invariants() {
            panic!("invariant violated after op {}: {}", op % 16, e);
        }

        // Every existing task's effective priority is at least as high as
        // its base priority
        for &task in &tasks {
            if let (Ok(priority), Ok(base)) =
                (kernel.task_priority(task), kernel.task_base_priority(task))
            {
                assert!(priority <= base);
            }
        }
    }
}
