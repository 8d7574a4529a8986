//! Function interception: make the next call to a target address run a caller-supplied handler
//! first, with the ability to inspect/rewrite arguments, force an early return, or redirect
//! execution, then transparently resume the original code.
//!
//! Grounded on the install/uninstall contract and `intstate_t { type_, orig_ }` classification in
//! `np/spiegel/platform/common.hxx`; the original leaves the process-wide `SIGTRAP` dispatch table
//! unspecified (the header only declares `install_intercept`/`uninstall_intercept` as opaque OS
//! calls), so the dispatch table, handler chain, and single-step re-arm logic here are this
//! crate's own, following the installation/handler/uninstallation algorithm the expanded
//! specification lays out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use once_cell::sync::OnceCell;

use crate::error::InterceptError;
use crate::platform::{LinuxPlatform, Platform, SigtrapHandler};

use super::patcher;

/// How the byte originally at a target address is classified, which determines whether resuming
/// after a trap needs a manual single-step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrologueKind {
    /// `push %rbp` (`0x55`): the engine can emulate its effect directly and never needs to
    /// restore the original byte or single-step over it.
    PushBp,
    /// Anything else: resuming requires restoring the original byte, single-stepping over it, and
    /// reinstalling the breakpoint.
    Other,
}

fn classify_prologue(byte: u8) -> PrologueKind {
    if byte == 0x55 {
        PrologueKind::PushBp
    } else {
        PrologueKind::Other
    }
}

/// What a handler decided to do with the call it intercepted.
pub enum Disposition {
    /// Let the original instruction run as normal.
    Resume,
    /// Force the call to return `value` without running the original body.
    Skip(u64),
    /// Continue execution at a different address instead of the original target.
    Redirect(u64),
}

/// A registered handler: inspects (and may rewrite) the intercepted call's argument registers,
/// then decides how execution continues.
pub type Handler = Box<dyn Fn(&mut Frame<'_>) -> Disposition + Send + Sync>;

/// The System V AMD64 calling convention passes the first six integer/pointer arguments in
/// registers; anything past that spills to the stack, which this crate does not expose.
pub const MAX_INT_ARGS: usize = 6;

/// A view over the trapped call's register state: argument registers by ABI index, the return
/// address, and the program counter, writable so a handler can redirect or force a return.
///
/// Built directly over a `ucontext_t`'s `gregs` array (23 `i64` slots on x86-64 Linux) rather than
/// copying it, so changes a handler makes take effect when the signal handler returns.
pub struct Frame<'f> {
    gregs: &'f mut [i64],
}

impl<'f> Frame<'f> {
    /// # Safety
    /// `gregs` must be the live `gregs` array of the `ucontext_t` the kernel will resume from, or
    /// (in tests) a scratch array the caller owns and inspects afterwards.
    pub fn new(gregs: &'f mut [i64]) -> Self {
        Self { gregs }
    }

    /// Reads argument register `index` (0-based); `None` past [`MAX_INT_ARGS`].
    pub fn arg(&self, index: usize) -> Option<u64> {
        arg_register(index).map(|r| self.gregs[r] as u64)
    }

    /// Overwrites argument register `index`; `false` past [`MAX_INT_ARGS`].
    pub fn set_arg(&mut self, index: usize, value: u64) -> bool {
        match arg_register(index) {
            Some(r) => {
                self.gregs[r] = value as i64;
                true
            }
            None => false,
        }
    }

    /// The address the intercepted call will return to, read from the top of the stack (valid
    /// only before the prologue has run, which is exactly when the breakpoint fires).
    pub fn return_address(&self) -> u64 {
        let rsp = self.gregs[libc::REG_RSP as usize] as u64;
        // SAFETY: `rsp` is this thread's live stack pointer at function entry; the word at the
        // top of stack is the return address the `call` instruction pushed.
        unsafe { *(rsp as *const u64) }
    }

    /// The program counter the trap occurred at (the target address, not the trap instruction's
    /// own address one byte later).
    pub fn pc(&self) -> u64 {
        self.gregs[libc::REG_RIP as usize] as u64
    }

    fn set_pc(&mut self, addr: u64) {
        self.gregs[libc::REG_RIP as usize] = addr as i64;
    }

    /// Rewrites registers so the call returns `value` immediately: sets `rax`, pops the return
    /// address off the stack into `rip`.
    fn force_return(&mut self, value: u64) {
        let ret = self.return_address();
        self.gregs[libc::REG_RAX as usize] = value as i64;
        self.gregs[libc::REG_RSP as usize] = self.gregs[libc::REG_RSP as usize].wrapping_add(8);
        self.set_pc(ret);
    }

    fn redirect_to(&mut self, addr: u64) {
        self.set_pc(addr);
    }

    /// Emulates `push %rbp` without ever letting the CPU execute the displaced byte: writes `rbp`
    /// to `[rsp-8]`, decrements `rsp`, and advances `rip` past the one-byte instruction.
    fn emulate_push_rbp(&mut self) {
        let rbp = self.gregs[libc::REG_RBP as usize] as u64;
        let new_rsp = (self.gregs[libc::REG_RSP as usize] as u64).wrapping_sub(8);
        // SAFETY: `new_rsp` is one word below the trapped frame's live stack pointer, which is
        // always valid to write in the standard downward-growing x86-64 stack.
        unsafe {
            *(new_rsp as *mut u64) = rbp;
        }
        self.gregs[libc::REG_RSP as usize] = new_rsp as i64;
        let pc = self.pc();
        self.set_pc(pc + 1);
    }
}

fn arg_register(index: usize) -> Option<usize> {
    let reg = match index {
        0 => libc::REG_RDI,
        1 => libc::REG_RSI,
        2 => libc::REG_RDX,
        3 => libc::REG_RCX,
        4 => libc::REG_R8,
        5 => libc::REG_R9,
        _ => return None,
    };
    Some(reg as usize)
}

struct InterceptRecord {
    original_byte: u8,
    prologue: PrologueKind,
    handlers: Vec<Handler>,
    /// Set while the engine is mid-resume for an `Other` prologue: the original byte has been put
    /// back and a single-step is in flight; the next trap at this address is the re-arm trap, not
    /// a fresh call.
    awaiting_single_step: bool,
}

/// Installs and dispatches function intercepts for a single process. Generic over [`Platform`] so
/// install/uninstall/dispatch bookkeeping is unit-testable against [`crate::platform::FakePlatform`]
/// without a live signal handler; production code uses [`InterceptEngine::global`], the one
/// instance actually wired to a real `SIGTRAP` handler.
pub struct InterceptEngine<P: Platform = LinuxPlatform> {
    platform: P,
    records: Mutex<HashMap<usize, InterceptRecord>>,
    sigtrap_installed: AtomicBool,
}

impl<P: Platform> InterceptEngine<P> {
    pub fn with_platform(platform: P) -> Self {
        Self {
            platform,
            records: Mutex::new(HashMap::new()),
            sigtrap_installed: AtomicBool::new(false),
        }
    }

    /// Registers `handler` at `target`. The first registration for a given address patches the
    /// breakpoint in; later registrations on the same address just extend the handler chain.
    pub fn install(&self, target: usize, handler: Handler) -> Result<(), InterceptError> {
        let mut records = self.records.lock().expect("intercept table poisoned");
        if let Some(record) = records.get_mut(&target) {
            record.handlers.push(handler);
            return Ok(());
        }

        let original_byte = patcher::read_byte(target);
        let prologue = classify_prologue(original_byte);
        patcher::patch_byte(&self.platform, target, 0xCC)?;

        records.insert(
            target,
            InterceptRecord {
                original_byte,
                prologue,
                handlers: vec![handler],
                awaiting_single_step: false,
            },
        );
        drop(records);
        self.ensure_sigtrap_handler(sigtrap_trampoline)
    }

    fn ensure_sigtrap_handler(&self, trampoline: SigtrapHandler) -> Result<(), InterceptError> {
        if self.sigtrap_installed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.platform.install_sigtrap_handler(trampoline)
    }

    /// Drops the most recently registered handler at `target`; once none remain, restores the
    /// original byte and forgets the record. Returns an error (`Mismatch` kind) if the byte at
    /// `target` no longer reads `0xCC` (something else patched over it), after still attempting
    /// the restore.
    pub fn uninstall(&self, target: usize) -> Result<(), InterceptError> {
        let mut records = self.records.lock().expect("intercept table poisoned");
        let Some(record) = records.get_mut(&target) else {
            return Ok(());
        };
        record.handlers.pop();
        if !record.handlers.is_empty() {
            return Ok(());
        }
        let record = records.remove(&target).expect("just checked present");
        patcher::restore_byte(&self.platform, target, 0xCC, record.original_byte)
    }

    /// Runs the handler chain for a trap at `target`, applying whichever [`Disposition`] decided
    /// the outcome (first non-`Resume` wins; if every handler resumes, the original instruction's
    /// effect is reproduced and, for `Other` prologues, a single-step is armed). Returns `false`
    /// if `target` has no registered intercept (a foreign trap this engine does not own).
    ///
    /// `ctx` is forwarded to [`Platform::single_step_and_wait`] only when an `Other`-prologue
    /// resume needs to arm one; [`crate::platform::FakePlatform`] ignores it, so tests may pass a
    /// null pointer.
    ///
    /// # Safety
    /// If a single-step is armed, `ctx` must be the `ucontext_t*` of the `SIGTRAP` handler frame
    /// currently executing.
    pub unsafe fn dispatch_trap(
        &self,
        target: usize,
        frame: &mut Frame<'_>,
        ctx: *mut libc::c_void,
    ) -> bool {
        let mut records = self.records.lock().expect("intercept table poisoned");
        let Some(record) = records.get_mut(&target) else {
            return false;
        };

        if record.awaiting_single_step {
            record.awaiting_single_step = false;
            let _ = patcher::patch_byte(&self.platform, target, 0xCC);
            return true;
        }

        let mut disposition = Disposition::Resume;
        for handler in &record.handlers {
            disposition = handler(frame);
            if !matches!(disposition, Disposition::Resume) {
                break;
            }
        }

        match disposition {
            Disposition::Skip(value) => frame.force_return(value),
            Disposition::Redirect(addr) => frame.redirect_to(addr),
            Disposition::Resume if record.prologue == PrologueKind::PushBp => {
                frame.emulate_push_rbp();
            }
            Disposition::Resume => {
                let _ = patcher::restore_byte(&self.platform, target, 0xCC, record.original_byte);
                record.awaiting_single_step = true;
                self.platform.single_step_and_wait(ctx);
            }
        }
        true
    }

    pub fn installed_count(&self) -> usize {
        self.records.lock().expect("intercept table poisoned").len()
    }
}

impl InterceptEngine<LinuxPlatform> {
    pub fn new() -> Self {
        Self::with_platform(LinuxPlatform::new())
    }

    /// The single process-wide engine wired to the real `SIGTRAP` handler. Test code should build
    /// its own `InterceptEngine::with_platform(FakePlatform::default())` instead.
    pub fn global() -> &'static Self {
        GLOBAL_ENGINE.get_or_init(Self::new)
    }
}

impl Default for InterceptEngine<LinuxPlatform> {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_ENGINE: OnceCell<InterceptEngine<LinuxPlatform>> = OnceCell::new();

extern "C" fn sigtrap_trampoline(
    _sig: libc::c_int,
    _info: *mut libc::siginfo_t,
    ctx: *mut libc::c_void,
) {
    // SAFETY: the kernel invokes a `SA_SIGINFO` handler with a valid `ucontext_t*` for the
    // trapping frame; it stays valid for the duration of this call.
    unsafe {
        let ucontext = ctx as *mut libc::ucontext_t;
        let gregs = &mut (*ucontext).uc_mcontext.gregs[..];
        let pc = gregs[libc::REG_RIP as usize] as usize;
        let target = pc.wrapping_sub(1);
        let mut frame = Frame::new(gregs);
        InterceptEngine::global().dispatch_trap(target, &mut frame, ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::FakePlatform;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    const NGREG: usize = 23;

    fn fake_gregs(pc: usize, rdi: u64) -> [i64; NGREG] {
        let mut g = [0i64; NGREG];
        g[libc::REG_RIP as usize] = pc as i64;
        g[libc::REG_RDI as usize] = rdi as i64;
        g
    }

    #[test]
    fn frame_reads_and_rewrites_argument_registers() {
        let mut g = fake_gregs(0x1000, 7);
        let mut frame = Frame::new(&mut g);
        assert_eq!(frame.arg(0), Some(7));
        assert!(frame.set_arg(0, 99));
        assert_eq!(frame.arg(0), Some(99));
        assert_eq!(frame.arg(MAX_INT_ARGS), None);
    }

    #[test]
    fn force_return_sets_rax_and_pops_the_return_address() {
        let mut stack = [0xdead_beefu64, 0, 0];
        let rsp = stack.as_mut_ptr() as u64;
        let mut g = fake_gregs(0x1000, 0);
        g[libc::REG_RSP as usize] = rsp as i64;
        let mut frame = Frame::new(&mut g);
        frame.force_return(42);
        assert_eq!(g[libc::REG_RAX as usize] as u64, 42);
        assert_eq!(g[libc::REG_RIP as usize] as u64, 0xdead_beef);
        assert_eq!(g[libc::REG_RSP as usize] as u64, rsp + 8);
    }

    #[test]
    fn emulate_push_rbp_writes_rbp_to_the_new_stack_slot_and_advances_pc() {
        let mut stack = [0u64; 4];
        let rsp = (stack.as_mut_ptr() as u64) + 16; // leave room below for the push
        let mut g = fake_gregs(0x2000, 0);
        g[libc::REG_RSP as usize] = rsp as i64;
        g[libc::REG_RBP as usize] = 0x7777;
        let mut frame = Frame::new(&mut g);
        frame.emulate_push_rbp();
        assert_eq!(g[libc::REG_RSP as usize] as u64, rsp - 8);
        assert_eq!(g[libc::REG_RIP as usize] as u64, 0x2001);
        // SAFETY: reading back the word this test just wrote, within its own stack array.
        let written = unsafe { *((rsp - 8) as *const u64) };
        assert_eq!(written, 0x7777);
    }

    #[test]
    fn install_patches_the_target_byte_and_dispatch_invokes_the_handler() {
        let mut code = [0x55u8, 0x90, 0x90, 0x90];
        let target = code.as_mut_ptr() as usize;
        let engine = InterceptEngine::with_platform(FakePlatform::default());
        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = seen.clone();

        engine
            .install(
                target,
                Box::new(move |frame| {
                    seen_clone.store(frame.arg(0).unwrap_or(0), Ordering::SeqCst);
                    Disposition::Resume
                }),
            )
            .unwrap();
        assert_eq!(code[0], 0xCC);

        let mut g = fake_gregs(target, 55);
        let mut frame = Frame::new(&mut g);
        let handled = unsafe { engine.dispatch_trap(target, &mut frame, std::ptr::null_mut()) };
        assert!(handled);
        assert_eq!(seen.load(Ordering::SeqCst), 55);
        // `PUSHBP` fast path: the breakpoint byte is left in place, pc moves past it.
        assert_eq!(code[0], 0xCC);
        assert_eq!(g[libc::REG_RIP as usize] as u64, (target + 1) as u64);
    }

    #[test]
    fn skip_disposition_short_circuits_the_remaining_handlers() {
        let mut code = [0x90u8; 4]; // `Other` prologue
        let target = code.as_mut_ptr() as usize;
        let engine = InterceptEngine::with_platform(FakePlatform::default());
        let second_ran = Arc::new(AtomicU64::new(0));
        let second_ran_clone = second_ran.clone();

        engine
            .install(target, Box::new(|_frame| Disposition::Skip(7)))
            .unwrap();
        engine
            .install(
                target,
                Box::new(move |_frame| {
                    second_ran_clone.store(1, Ordering::SeqCst);
                    Disposition::Resume
                }),
            )
            .unwrap();

        let mut stack = [0xaaaa_aaaau64, 0];
        let rsp = stack.as_mut_ptr() as u64;
        let mut g = fake_gregs(target, 0);
        g[libc::REG_RSP as usize] = rsp as i64;
        let mut frame = Frame::new(&mut g);
        unsafe { engine.dispatch_trap(target, &mut frame, std::ptr::null_mut()) };

        assert_eq!(second_ran.load(Ordering::SeqCst), 0);
        assert_eq!(g[libc::REG_RAX as usize] as u64, 7);
    }

    #[test]
    fn uninstall_restores_the_byte_once_every_handler_is_gone() {
        let mut code = [0x55u8, 0x90];
        let target = code.as_mut_ptr() as usize;
        let engine = InterceptEngine::with_platform(FakePlatform::default());
        engine
            .install(target, Box::new(|_| Disposition::Resume))
            .unwrap();
        assert_eq!(code[0], 0xCC);
        engine.uninstall(target).unwrap();
        assert_eq!(code[0], 0x55);
        assert_eq!(engine.installed_count(), 0);
    }
}
