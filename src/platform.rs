//! Operating-system primitives this crate needs, behind a trait so tests can run without a real
//! process to introspect or patch.
//!
//! The shape mirrors the original's platform collaborator contract (`self_exe`, `get_linkobjs`,
//! `install_intercept`/`uninstall_intercept`, `get_stacktrace`, `is_running_under_debugger`):
//! everything OS- or architecture-specific lives behind [`Platform`], and [`crate::state::State`]
//! and [`crate::intercept::engine::InterceptEngine`] only ever see the trait.

use std::path::PathBuf;

use crate::error::{InterceptError, InterceptErrorKind};
use crate::object::SystemMapping;

/// One link object the loader has already mapped into this process, as reported by
/// `/proc/self/maps` (or an equivalent), before any DWARF sections are discovered.
#[derive(Clone, Debug)]
pub struct LoadedObject {
    /// The path the loader resolved this object from. `None` for anonymous mappings (the main
    /// executable is sometimes reported this way by the kernel; callers fall back to
    /// [`Platform::self_exe`]).
    pub path: Option<PathBuf>,
    pub mappings: Vec<SystemMapping>,
}

/// OS and architecture primitives: process introspection, raw page protection, and breakpoint
/// trampolines. Implemented for real by [`LinuxPlatform`]; [`FakePlatform`] stands in for it in
/// unit tests that never touch a live process.
pub trait Platform: Send + Sync {
    /// The absolute path of the running executable.
    fn self_exe(&self) -> Result<PathBuf, InterceptError>;

    /// Every object the loader has mapped into this process, main executable included.
    fn loaded_objects(&self) -> Result<Vec<LoadedObject>, InterceptError>;

    /// Whether a debugger (or tracer) is already attached to this process.
    fn is_debugger_attached(&self) -> bool;

    /// Captures the current call stack as raw return addresses, most recent first.
    fn stack_trace(&self) -> Vec<u64>;

    /// Toggles the page(s) covering `[addr, addr+len)` to writable, returning whatever token
    /// `mprotect_restore` needs to put them back.
    fn mprotect_writable(&self, addr: usize, len: usize) -> Result<(), InterceptError>;

    /// Restores the page(s) covering `[addr, addr+len)` to their prior (executable, read-only)
    /// protection.
    fn mprotect_restore(&self, addr: usize, len: usize) -> Result<(), InterceptError>;

    /// Installs `handler` as the process-wide `SIGTRAP` handler. The OS permits only one handler
    /// per signal, so [`crate::intercept::engine::InterceptEngine`] calls this exactly once (on
    /// its first intercept) and keeps its own per-address dispatch table in a process-wide
    /// singleton the handler consults.
    fn install_sigtrap_handler(&self, handler: SigtrapHandler) -> Result<(), InterceptError>;

    /// Sets the CPU trap flag in a signal handler's saved context so execution re-raises
    /// `SIGTRAP` after exactly one more instruction — used to safely re-execute an instruction the
    /// engine temporarily displaced with `0xCC`.
    ///
    /// # Safety
    /// `ctx` must be the `ucontext_t*` the OS passed to the currently executing `SIGTRAP` handler.
    unsafe fn single_step_and_wait(&self, ctx: *mut libc::c_void);
}

/// The signature the OS invokes a `SIGTRAP` handler with (`sigaction` with `SA_SIGINFO`).
pub type SigtrapHandler = extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void);

/// The real, Linux-only implementation, reached for via raw `libc` calls the way the original's
/// platform layer did via POSIX calls.
#[derive(Debug, Default)]
pub struct LinuxPlatform;

impl LinuxPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl Platform for LinuxPlatform {
    fn self_exe(&self) -> Result<PathBuf, InterceptError> {
        std::fs::read_link("/proc/self/exe")
            .map_err(|e| InterceptError::with_source(InterceptErrorKind::Protect, e))
    }

    fn loaded_objects(&self) -> Result<Vec<LoadedObject>, InterceptError> {
        let maps = std::fs::read_to_string("/proc/self/maps")
            .map_err(|e| InterceptError::with_source(InterceptErrorKind::Protect, e))?;
        Ok(parse_proc_maps(&maps))
    }

    fn is_debugger_attached(&self) -> bool {
        let status = match std::fs::read_to_string("/proc/self/status") {
            Ok(s) => s,
            Err(_) => return false,
        };
        status
            .lines()
            .find_map(|line| line.strip_prefix("TracerPid:"))
            .and_then(|v| v.trim().parse::<i32>().ok())
            .map(|pid| pid != 0)
            .unwrap_or(false)
    }

    fn stack_trace(&self) -> Vec<u64> {
        // Walks saved RBP frame pointers starting from this call's own frame. Requires the
        // standard `push rbp; mov rbp, rsp` prologue, which is the default on x86-64 Linux unless
        // the caller was built with `-fomit-frame-pointer`.
        let mut trace = Vec::new();
        let mut rbp: *const usize;
        // SAFETY: reads this function's own frame pointer register, never writes.
        unsafe {
            std::arch::asm!("mov {}, rbp", out(reg) rbp);
            for _ in 0..64 {
                if rbp.is_null() || (rbp as usize) % std::mem::align_of::<usize>() != 0 {
                    break;
                }
                let saved_rbp = *rbp;
                let return_addr = *rbp.add(1);
                if return_addr == 0 {
                    break;
                }
                trace.push(return_addr as u64);
                if saved_rbp <= rbp as usize {
                    break;
                }
                rbp = saved_rbp as *const usize;
            }
        }
        trace
    }

    fn mprotect_writable(&self, addr: usize, len: usize) -> Result<(), InterceptError> {
        protect(addr, len, libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC)
    }

    fn mprotect_restore(&self, addr: usize, len: usize) -> Result<(), InterceptError> {
        protect(addr, len, libc::PROT_READ | libc::PROT_EXEC)
    }

    fn install_sigtrap_handler(&self, handler: SigtrapHandler) -> Result<(), InterceptError> {
        // SAFETY: `handler` has the exact signature `sigaction` requires for `SA_SIGINFO`; we pass
        // an empty mask and take whatever was previously installed (there is at most one engine
        // per process, so nothing else is expected to hold `SIGTRAP`).
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handler as usize;
            action.sa_flags = libc::SA_SIGINFO;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(libc::SIGTRAP, &action, std::ptr::null_mut()) != 0 {
                return Err(InterceptError::with_source(
                    InterceptErrorKind::Protect,
                    std::io::Error::last_os_error(),
                ));
            }
        }
        Ok(())
    }

    unsafe fn single_step_and_wait(&self, ctx: *mut libc::c_void) {
        set_trap_flag(ctx);
    }
}

/// Sets the x86-64 trap flag (`EFLAGS` bit 8) in a signal handler's `ucontext_t`, so the CPU
/// raises the next `SIGTRAP` after one more instruction instead of running freely.
#[cfg(target_arch = "x86_64")]
unsafe fn set_trap_flag(ctx: *mut libc::c_void) {
    const TRAP_FLAG: u64 = 1 << 8;
    let ctx = ctx as *mut libc::ucontext_t;
    (*ctx).uc_mcontext.gregs[libc::REG_EFL as usize] |= TRAP_FLAG as i64;
}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn set_trap_flag(_ctx: *mut libc::c_void) {}

fn page_floor(addr: usize) -> usize {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    addr & !(page - 1)
}

fn protect(addr: usize, len: usize, prot: libc::c_int) -> Result<(), InterceptError> {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    let start = page_floor(addr);
    let end = (addr + len + page - 1) & !(page - 1);
    // SAFETY: `start`/`end` are page-aligned and cover the caller-supplied range; `mprotect` only
    // changes permission bits on pages this process already has mapped.
    let rc = unsafe { libc::mprotect(start as *mut libc::c_void, end - start, prot) };
    if rc != 0 {
        return Err(InterceptError::with_source(
            InterceptErrorKind::Protect,
            std::io::Error::last_os_error(),
        ));
    }
    Ok(())
}

fn parse_proc_maps(maps: &str) -> Vec<LoadedObject> {
    use std::collections::BTreeMap;
    let mut by_path: BTreeMap<Option<PathBuf>, Vec<SystemMapping>> = BTreeMap::new();

    for line in maps.lines() {
        let mut fields = line.splitn(6, char::is_whitespace).filter(|f| !f.is_empty());
        let Some(range) = fields.next() else { continue };
        let Some(perms) = fields.next() else { continue };
        let Some(offset) = fields.next() else { continue };
        let _dev = fields.next();
        let _inode = fields.next();
        let path = fields.next().map(str::trim).filter(|p| !p.is_empty());

        if !perms.starts_with('r') {
            continue;
        }
        let Some((start_s, end_s)) = range.split_once('-') else { continue };
        let (Ok(start), Ok(end), Ok(file_offset)) = (
            usize::from_str_radix(start_s, 16),
            usize::from_str_radix(end_s, 16),
            u64::from_str_radix(offset, 16),
        ) else {
            continue;
        };

        let key = path.map(PathBuf::from);
        by_path.entry(key).or_default().push(SystemMapping {
            file_offset,
            file_size: (end - start) as u64,
            base: start as *const u8,
        });
    }

    by_path
        .into_iter()
        .map(|(path, mappings)| LoadedObject { path, mappings })
        .collect()
}

/// A deterministic stand-in for [`Platform`] used in unit tests: no real process introspection or
/// memory protection, just recorded calls and canned answers.
pub struct FakePlatform {
    pub self_exe_path: PathBuf,
    pub objects: Vec<LoadedObject>,
    pub debugger_attached: bool,
    pub stack: Vec<u64>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self {
            self_exe_path: PathBuf::from("/fake/exe"),
            objects: Vec::new(),
            debugger_attached: false,
            stack: Vec::new(),
        }
    }
}

impl Platform for FakePlatform {
    fn self_exe(&self) -> Result<PathBuf, InterceptError> {
        Ok(self.self_exe_path.clone())
    }

    fn loaded_objects(&self) -> Result<Vec<LoadedObject>, InterceptError> {
        Ok(self.objects.clone())
    }

    fn is_debugger_attached(&self) -> bool {
        self.debugger_attached
    }

    fn stack_trace(&self) -> Vec<u64> {
        self.stack.clone()
    }

    fn mprotect_writable(&self, _addr: usize, _len: usize) -> Result<(), InterceptError> {
        Ok(())
    }

    fn mprotect_restore(&self, _addr: usize, _len: usize) -> Result<(), InterceptError> {
        Ok(())
    }

    fn install_sigtrap_handler(&self, _handler: SigtrapHandler) -> Result<(), InterceptError> {
        Ok(())
    }

    unsafe fn single_step_and_wait(&self, _ctx: *mut libc::c_void) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_readable_mappings_grouped_by_path() {
        let maps = "\
00400000-00401000 r-xp 00000000 08:01 1234 /usr/bin/app
00401000-00402000 rw-p 00001000 08:01 1234 /usr/bin/app
7f0000000000-7f0000010000 r--p 00000000 08:01 5678 /lib/libc.so.6
7f0000010000-7f0000020000 ---p 00010000 00:00 0
";
        let objs = parse_proc_maps(maps);
        assert_eq!(objs.len(), 2);
        let app = objs.iter().find(|o| o.path.as_deref() == Some(std::path::Path::new("/usr/bin/app"))).unwrap();
        assert_eq!(app.mappings.len(), 2);
    }

    #[test]
    fn fake_platform_is_deterministic() {
        let p = FakePlatform::default();
        assert!(!p.is_debugger_attached());
        assert!(p.mprotect_writable(0x1000, 16).is_ok());
    }
}
