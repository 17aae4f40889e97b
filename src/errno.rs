//! Kernel error taxonomy (spec.md §7), surfaced to callers as negative
//! errno values at the syscall boundary.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Error {
    /// ENOENT: missing path component.
    NoEnt = 2,
    /// ESRCH: missing pid.
    Srch = 3,
    /// EINTR: an interruptible wait was aborted by a signal.
    Intr = 4,
    /// ENOEXEC: bad a.out header or missing `#!` interpreter.
    NoExec = 8,
    /// EBADF: fd out of range or closed.
    BadF = 9,
    /// EAGAIN: no free task slot (or a would-block condition).
    Again = 11,
    /// ENOMEM: no free page frame.
    NoMem = 12,
    /// EACCES: mode check failure.
    Acces = 13,
    /// EEXIST: O_EXCL create on an existing name.
    Exist = 17,
    /// ENOTBLK: not a block device where one was required.
    NotBlk = 15,
    /// EXDEV: cross-device link.
    XDev = 18,
    /// ENOTDIR: path component used as a directory is not one.
    NotDir = 20,
    /// EISDIR: opening a directory for write.
    IsDir = 21,
    /// EINVAL: bad cmd or arg.
    Inval = 22,
    /// ENFILE / EMFILE: per-task fd array full, or system-wide file table full.
    MFile = 24,
    /// ENOTTY: ioctl on a non-tty.
    NotTty = 25,
    /// ENOSPC: no free block or inode.
    NoSpc = 28,
    /// EROFS: write attempted on a read-only filesystem.
    RoFs = 30,
    /// EPIPE: write to a pipe with no readers.
    Pipe = 32,
    /// ENOTEMPTY: rmdir on a non-empty directory.
    NotEmpty = 39,
    /// EBUSY: mounted, or still referenced.
    Busy = 16,
    /// EPERM: superuser-only operation attempted by a non-root task.
    Perm = 1,
    /// ENOSYS: unimplemented syscall number.
    NoSys = 38,
}

impl Error {
    /// The negative-errno representation handed back across the syscall
    /// boundary (spec.md §7: "exit codes are negative errno").
    pub const fn to_retval(self) -> isize {
        -(self as i32 as isize)
    }
}

pub type KResult<T> = Result<T, Error>;
