//! The shared file object (spec.md §3 "File object"): a handle holding
//! an inode reference, read/write position, access mode, flags, and a
//! reference count, indexed by a fixed `NR_FILE`-slot table the way the
//! inode cache and buffer cache are. `dup`/`dup2`/`fork` share a handle
//! by incrementing `count`; `close` drops it and releases the
//! underlying inode (or pipe end) once it reaches zero.

use crate::errno::{Error, KResult};
use crate::fs::inode::{self, InodeRef};
use crate::fs::{io, pipe, stat};
use crate::lock::Spinlock;
use crate::param::NR_FILE;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        self != Access::WriteOnly
    }

    pub fn writable(self) -> bool {
        self != Access::ReadOnly
    }
}

bitflags::bitflags! {
    pub struct OpenFlags: u32 {
        const CREAT    = 0o000100;
        const EXCL     = 0o000200;
        const NOCTTY   = 0o000400;
        const TRUNC    = 0o001000;
        const APPEND   = 0o002000;
        const NONBLOCK = 0o004000;
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        OpenFlags::empty()
    }
}

#[derive(Clone, Copy)]
pub enum Kind {
    Inode(InodeRef),
    PipeRead(InodeRef),
    PipeWrite(InodeRef),
}

#[derive(Clone, Copy)]
struct FileObj {
    kind: Kind,
    access: Access,
    flags: OpenFlags,
    pos: u32,
    count: u32,
    in_use: bool,
}

impl FileObj {
    const fn empty() -> Self {
        Self {
            kind: Kind::Inode(InodeRef(0)),
            access: Access::ReadOnly,
            flags: OpenFlags::empty(),
            pos: 0,
            count: 0,
            in_use: false,
        }
    }
}

/// A handle into the system-wide file table. `Copy` for the same reason
/// `InodeRef` is: it lives inside `Task`, which must be `Copy`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileRef(pub usize);

struct Table {
    slots: [FileObj; NR_FILE],
}

impl Table {
    const fn new() -> Self {
        Self {
            slots: [FileObj::empty(); NR_FILE],
        }
    }
}

static TABLE: Spinlock<Table> = Spinlock::new("file_table", Table::new());

/// Allocate a fresh file object over `kind` (spec.md §3: "Created by
/// `open`/`pipe`").
pub fn alloc(kind: Kind, access: Access, flags: OpenFlags) -> KResult<FileRef> {
    let mut table = TABLE.lock();
    let slot = (0..NR_FILE)
        .find(|&i| !table.slots[i].in_use)
        .ok_or(Error::MFile)?;
    table.slots[slot] = FileObj {
        kind,
        access,
        flags,
        pos: 0,
        count: 1,
        in_use: true,
    };
    Ok(FileRef(slot))
}

/// Share a handle without creating a new file object (spec.md §3:
/// "Duplicated by `dup`/`dup2`/`fork` by incrementing the count").
pub fn dup(fr: FileRef) -> FileRef {
    let mut table = TABLE.lock();
    table.slots[fr.0].count += 1;
    fr
}

/// Drop one reference, releasing the underlying inode/pipe end and
/// freeing the slot once the count reaches zero.
pub fn close(fr: FileRef) {
    let (last, kind) = {
        let mut table = TABLE.lock();
        table.slots[fr.0].count -= 1;
        let last = table.slots[fr.0].count == 0;
        let kind = table.slots[fr.0].kind;
        if last {
            table.slots[fr.0].in_use = false;
        }
        (last, kind)
    };
    if !last {
        return;
    }
    match kind {
        Kind::Inode(ir) => inode::iput(ir),
        Kind::PipeRead(ir) => {
            pipe::close_reader(ir);
            inode::iput(ir);
        }
        Kind::PipeWrite(ir) => {
            pipe::close_writer(ir);
            inode::iput(ir);
        }
    }
}

fn with<R>(fr: FileRef, f: impl FnOnce(&FileObj) -> R) -> R {
    let table = TABLE.lock();
    f(&table.slots[fr.0])
}

fn with_mut<R>(fr: FileRef, f: impl FnOnce(&mut FileObj) -> R) -> R {
    let mut table = TABLE.lock();
    f(&mut table.slots[fr.0])
}

pub fn inode_of(fr: FileRef) -> Option<InodeRef> {
    with(fr, |f| match f.kind {
        Kind::Inode(ir) | Kind::PipeRead(ir) | Kind::PipeWrite(ir) => Some(ir),
    })
}

pub fn pos(fr: FileRef) -> u32 {
    with(fr, |f| f.pos)
}

pub fn set_pos(fr: FileRef, pos: u32) {
    with_mut(fr, |f| f.pos = pos);
}

pub fn flags(fr: FileRef) -> OpenFlags {
    with(fr, |f| f.flags)
}

pub fn set_flags(fr: FileRef, flags: OpenFlags) {
    with_mut(fr, |f| f.flags = flags);
}

/// Read through this file object, advancing its position on success
/// (spec.md §4.5 "File read/write").
pub fn read(fr: FileRef, buf: &mut [u8]) -> KResult<usize> {
    let (kind, access, pos) = with(fr, |f| (f.kind, f.access, f.pos));
    if !access.readable() {
        return Err(Error::BadF);
    }
    let n = match kind {
        Kind::Inode(ir) => io::read(ir, pos, buf)?,
        Kind::PipeRead(ir) => pipe::read(ir, buf)?,
        Kind::PipeWrite(_) => return Err(Error::BadF),
    };
    if matches!(kind, Kind::Inode(_)) {
        with_mut(fr, |f| f.pos += n as u32);
    }
    Ok(n)
}

/// Write through this file object. `O_APPEND` forces the write position
/// to the inode's current size first but — spec.md §4.5 — "does not
/// advance `file.pos`" beyond that single write's worth.
pub fn write(fr: FileRef, buf: &[u8]) -> KResult<usize> {
    let (kind, access, mut pos, append) =
        with(fr, |f| (f.kind, f.access, f.pos, f.flags.contains(OpenFlags::APPEND)));
    if !access.writable() {
        return Err(Error::BadF);
    }
    let n = match kind {
        Kind::Inode(ir) => {
            if append {
                pos = inode::with(ir, |n| n.size);
            }
            let n = io::write(ir, pos, buf)?;
            with_mut(fr, |f| f.pos = pos + n as u32);
            n
        }
        Kind::PipeWrite(ir) => pipe::write(ir, buf)?,
        Kind::PipeRead(_) => return Err(Error::BadF),
    };
    Ok(n)
}

pub fn stat(fr: FileRef) -> KResult<stat::Stat> {
    inode_of(fr).map(stat::stat).ok_or(Error::BadF)
}
