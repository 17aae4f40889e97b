//! `execve` (spec.md §4.7, C7's continuation — `proc::lifecycle` hands
//! this off because it needs the a.out loader and the argv/envp staging
//! area together). One level of `#!` interpreter indirection, then the
//! point of no return: every fallible step happens before the old
//! address space is torn down, matching spec.md §4.7's ordering.

use crate::aout::ExecHdr;
use crate::errno::{Error, KResult};
use crate::fs::inode::{self, InodeRef, Mode};
use crate::fs::path;
use crate::mm::{frame, phys, vm};
use crate::param::{BLOCK_SIZE, EXEC_STAGING_PAGES, EXEC_STAGING_SIZE, MAXARG, MAXPATH, PAGE_SIZE, TASK_SIZE};
use crate::proc::table;

/// A `#!` line only ever restarts the search a bounded number of times;
/// anything deeper is almost certainly a loop (spec.md §4.7: "bounded
/// retry").
const MAX_INTERP_DEPTH: usize = 4;

/// Longest single `argv`/`envp` string this loader will stage. Real argv
/// entries are short; this just bounds the per-string kernel scratch
/// buffer, independent of the 128 KiB total cap.
const MAX_ARG_LEN: usize = 1024;

/// Kernel-side scratch area for the new image's `argv`/`envp`, built
/// while the old address space is still alive and spliced wholesale
/// onto the top of the new one once the point of no return is past
/// (spec.md §4.7: "stage argv/envp into a fixed-size area before
/// committing"). Frames are handed out on first touch and never shrink
/// back, so a failed exec just frees the lot.
struct Staging {
    frames: [u32; EXEC_STAGING_PAGES],
    pages: usize,
    cursor: usize,
}

impl Staging {
    fn new() -> Self {
        Self { frames: [0; EXEC_STAGING_PAGES], pages: 0, cursor: 0 }
    }

    fn write(&mut self, bytes: &[u8]) -> KResult<usize> {
        let start = self.cursor;
        if start + bytes.len() > EXEC_STAGING_SIZE {
            return Err(Error::NoMem);
        }
        let mut done = 0;
        while done < bytes.len() {
            let cur = self.cursor;
            let page_idx = cur / PAGE_SIZE;
            if page_idx >= self.pages {
                if page_idx >= EXEC_STAGING_PAGES {
                    return Err(Error::NoMem);
                }
                let pa = frame::alloc_frame();
                if pa == 0 {
                    return Err(Error::NoMem);
                }
                self.frames[page_idx] = pa;
                self.pages = page_idx + 1;
            }
            let page_off = cur % PAGE_SIZE;
            let n = (PAGE_SIZE - page_off).min(bytes.len() - done);
            // SAFETY: the frame was just allocated and isn't mapped anywhere yet.
            unsafe {
                phys::as_mut_slice(self.frames[page_idx], PAGE_SIZE)[page_off..page_off + n]
                    .copy_from_slice(&bytes[done..done + n]);
            }
            self.cursor += n;
            done += n;
        }
        Ok(start)
    }

    fn free(&self) {
        for &pa in self.frames[..self.pages].iter() {
            frame::free_frame(pa);
        }
    }
}

/// Copy each NUL-terminated string out of the old address space's
/// `argv`/`envp`-shaped pointer array at linear address `arr`, staging
/// its bytes and recording the offset each landed at. Stops at the
/// first NULL pointer or `MAXARG` entries.
fn stage_strv(arr: usize, base: usize, staging: &mut Staging, out: &mut arrayvec::ArrayVec<usize, MAXARG>) -> KResult<()> {
    for i in 0..MAXARG {
        let mut ptr_bytes = [0u8; 4];
        vm::copy_in(arr + i * 4, &mut ptr_bytes)?;
        let ptr = u32::from_le_bytes(ptr_bytes);
        if ptr == 0 {
            return Ok(());
        }
        let mut buf = [0u8; MAX_ARG_LEN];
        let len = vm::copy_in_cstr(base + ptr as usize, &mut buf)?;
        let off = staging.write(&buf[..len])?;
        staging.write(&[0u8])?;
        out.push(off).map_err(|_| Error::Inval)?;
    }
    Ok(())
}

/// Read the a.out header out of block 0 of `exe`.
fn read_header(exe: InodeRef) -> KResult<ExecHdr> {
    let zone = crate::fs::bmap::bmap(exe, 0, false)?;
    if zone == 0 {
        return Err(Error::NoExec);
    }
    let dev = inode::with(exe, |n| n.dev);
    let slot = crate::bio::bread(dev, zone)?;
    let hdr = crate::bio::with(slot, |b| {
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(&b.data);
        ExecHdr::parse(&block)
    });
    crate::bio::brelse(slot);
    Ok(hdr)
}

/// If `exe`'s first two bytes are `#!`, parse the rest of that line as
/// `interpreter [arg]` (spec.md §4.7 shebang handling). Returns `None`
/// for a plain a.out image.
fn read_shebang(exe: InodeRef) -> KResult<Option<([u8; MAXPATH], usize, Option<([u8; MAXPATH], usize)>)>> {
    let zone = crate::fs::bmap::bmap(exe, 0, false)?;
    if zone == 0 {
        return Ok(None);
    }
    let dev = inode::with(exe, |n| n.dev);
    let slot = crate::bio::bread(dev, zone)?;
    let line = crate::bio::with(slot, |b| {
        if b.data[0] != b'#' || b.data[1] != b'!' {
            return None;
        }
        let nl = b.data[2..].iter().position(|&c| c == b'\n').unwrap_or(b.data.len() - 2);
        let mut buf = [0u8; BLOCK_SIZE];
        let n = nl.min(BLOCK_SIZE);
        buf[..n].copy_from_slice(&b.data[2..2 + n]);
        Some((buf, n))
    });
    crate::bio::brelse(slot);
    let (buf, n) = match line {
        Some(x) => x,
        None => return Ok(None),
    };
    let text = trim_leading_spaces(&buf[..n]);
    let mut parts = text.splitn(2, |&c| c == b' ' || c == b'\t');
    let interp = parts.next().unwrap_or(&[]);
    if interp.is_empty() {
        return Err(Error::NoExec);
    }
    let mut interp_buf = [0u8; MAXPATH];
    let interp_len = interp.len().min(MAXPATH);
    interp_buf[..interp_len].copy_from_slice(&interp[..interp_len]);

    let rest = parts.next().map(trim_leading_spaces).unwrap_or(&[]);
    let arg = if rest.is_empty() {
        None
    } else {
        let mut arg_buf = [0u8; MAXPATH];
        let arg_len = rest.len().min(MAXPATH);
        arg_buf[..arg_len].copy_from_slice(&rest[..arg_len]);
        Some((arg_buf, arg_len))
    };

    Ok(Some((interp_buf, interp_len, arg)))
}

fn trim_leading_spaces(mut s: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = s {
        s = rest;
    }
    s
}

/// Check the classic owner/group/other execute bit, returning whether
/// the setuid/setgid bits are set (spec.md §4.7: "honours setuid/setgid
/// bits on the target").
fn exec_permission(exe: InodeRef) -> KResult<(bool, bool)> {
    let (mode, uid, gid) = inode::with(exe, |n| (n.mode, n.uid, n.gid));
    if !mode.is_reg() {
        return Err(Error::Acces);
    }
    let (_, euid, _, egid) = table::with_current(|t| (t.cred.ruid, t.cred.euid, t.cred.rgid, t.cred.egid));
    if !path::access_mode(mode, uid, gid, euid, egid, 0o1) {
        return Err(Error::Acces);
    }
    Ok((mode.contains(Mode::ISUID), mode.contains(Mode::ISGID)))
}

/// Entry point from `syscall::sys_execve`. `path_off`/`argv_off`/
/// `envp_off` are task-relative offsets exactly as read out of the trap
/// frame's argument registers; `tf` is rewritten in place with the new
/// image's entry point and stack on success. The caller's task is left
/// running its old image on failure (spec.md §4.7: "a failed execve
/// leaves the calling image running").
pub fn execve(path_off: usize, argv_off: usize, envp_off: usize, tf: &mut crate::arch::x86::TrapFrame) -> KResult<()> {
    let base = table::with_current(|t| t.base);
    let (cwd, root) = table::with_current(|t| (t.cwd.unwrap(), t.root.unwrap()));

    let mut path_buf = [0u8; MAXPATH];
    let n = vm::copy_in_cstr(base + path_off, &mut path_buf)?;
    let mut cur_path: arrayvec::ArrayVec<u8, MAXPATH> = arrayvec::ArrayVec::new();
    cur_path.try_extend_from_slice(&path_buf[..n]).map_err(|_| Error::Inval)?;
    let mut prepend_arg: Option<arrayvec::ArrayVec<u8, MAXPATH>> = None;
    let mut original_path = cur_path.clone();
    let mut depth = 0;

    let (exe, uid_bit, gid_bit) = loop {
        let ir = path::namei(&cur_path, cwd, root)?;
        match read_shebang(ir)? {
            Some((interp, interp_len, arg)) => {
                depth += 1;
                if depth > MAX_INTERP_DEPTH {
                    inode::iput(ir);
                    return Err(Error::NoExec);
                }
                inode::iput(ir);
                original_path = cur_path.clone();
                let mut next: arrayvec::ArrayVec<u8, MAXPATH> = arrayvec::ArrayVec::new();
                next.try_extend_from_slice(&interp[..interp_len]).map_err(|_| Error::Inval)?;
                cur_path = next;
                prepend_arg = arg.map(|(buf, len)| {
                    let mut v: arrayvec::ArrayVec<u8, MAXPATH> = arrayvec::ArrayVec::new();
                    let _ = v.try_extend_from_slice(&buf[..len]);
                    v
                });
            }
            None => match exec_permission(ir) {
                Ok((su, sg)) => break (ir, su, sg),
                Err(e) => {
                    inode::iput(ir);
                    return Err(e);
                }
            },
        }
    };

    let hdr = match read_header(exe) {
        Ok(h) if h.is_valid() => h,
        _ => {
            inode::iput(exe);
            return Err(Error::NoExec);
        }
    };

    // Stage argv/envp from the *calling* task's address space before
    // anything about its task state is touched.
    let mut staging = Staging::new();
    let mut argv_offsets: arrayvec::ArrayVec<usize, MAXARG> = arrayvec::ArrayVec::new();
    let mut envp_offsets: arrayvec::ArrayVec<usize, MAXARG> = arrayvec::ArrayVec::new();

    let stage_result = (|| -> KResult<()> {
        if let Some(arg) = &prepend_arg {
            let off = staging.write(arg)?;
            staging.write(&[0u8])?;
            argv_offsets.push(off).map_err(|_| Error::Inval)?;
            let off = staging.write(&original_path)?;
            staging.write(&[0u8])?;
            argv_offsets.push(off).map_err(|_| Error::Inval)?;
        }
        stage_strv(base + argv_off, base, &mut staging, &mut argv_offsets)?;
        stage_strv(base + envp_off, base, &mut staging, &mut envp_offsets)?;
        Ok(())
    })();

    if let Err(e) = stage_result {
        staging.free();
        inode::iput(exe);
        return Err(e);
    }

    // Point of no return: every fallible step above already succeeded.
    let old_exe = table::with_current(|t| t.executable);
    table::with_current_mut(|t| {
        t.signals.reset_handlers_on_exec();
        for slot in 0..crate::param::NR_OPEN {
            if t.close_on_exec & (1 << slot) != 0 {
                if let Some(idx) = t.fds[slot].take() {
                    crate::file::close(crate::file::FileRef(idx));
                }
                t.close_on_exec &= !(1 << slot);
            }
        }
        if uid_bit {
            t.cred.euid = inode::with(exe, |n| n.uid);
        }
        if gid_bit {
            t.cred.egid = inode::with(exe, |n| n.gid);
        }
    });
    if let Some(old) = old_exe {
        inode::iput(old);
    }

    let _ = vm::free_range(base, TASK_SIZE);

    let end_code = hdr.text as usize;
    let end_data = end_code + hdr.data as usize;
    let brk = round_up(end_data + hdr.bss as usize, PAGE_SIZE);

    table::with_current_mut(|t| {
        t.executable = Some(exe);
        t.start_code = 0;
        t.end_code = end_code;
        t.end_data = end_data;
        t.brk = brk;
    });

    // Splice the staged argv/envp pages onto the top of the new address
    // space (spec.md §4.7: "splice the staging area at the top of the
    // data segment" rather than copying it twice).
    let stage_base = TASK_SIZE - staging.pages * PAGE_SIZE;
    for i in 0..staging.pages {
        vm::map_frame(staging.frames[i], base + stage_base + i * PAGE_SIZE);
    }

    // Lay out argc/argv[]/NULL/envp[]/NULL directly below the staged
    // strings, in the same spliced region, then point the new stack at
    // it (classic Unix process-start layout).
    let argc = argv_offsets.len() as u32;
    let argc_off = stage_base;
    let argv_arr_off = argc_off + 4;
    let envp_arr_off = argv_arr_off + (argv_offsets.len() + 1) * 4;
    let header_end = envp_arr_off + (envp_offsets.len() + 1) * 4;

    if header_end > stage_base + staging.pages * PAGE_SIZE {
        // `MAXARG` already bounds both arrays well under one page, so
        // this is unreachable in practice; fail safe rather than spill
        // past the mapped region.
        return Err(Error::NoMem);
    }

    write_word(base + argc_off, argc)?;
    for (i, &off) in argv_offsets.iter().enumerate() {
        write_word(base + argv_arr_off + i * 4, (stage_base + off) as u32)?;
    }
    write_word(base + argv_arr_off + argv_offsets.len() * 4, 0)?;
    for (i, &off) in envp_offsets.iter().enumerate() {
        write_word(base + envp_arr_off + i * 4, (stage_base + off) as u32)?;
    }
    write_word(base + envp_arr_off + envp_offsets.len() * 4, 0)?;

    *tf = crate::arch::x86::TrapFrame::new();
    tf.eip = base as u32;
    tf.user_esp = (base + argc_off) as u32;
    tf.eflags = 0x200; // IF

    Ok(())
}

fn round_up(x: usize, align: usize) -> usize {
    (x + align - 1) & !(align - 1)
}

/// Overwrite one already-mapped little-endian word (the spliced staging
/// pages are writable and exclusively ours, no COW fault possible).
fn write_word(addr: usize, val: u32) -> KResult<()> {
    vm::copy_out(addr, &val.to_le_bytes())
}
