//! Worker threads handle no process signals; delivery belongs to the
//! host application's designated threads.

#[cfg(unix)]
pub(crate) fn block_thread_signals() {
    use std::mem::MaybeUninit;

    unsafe {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigfillset(set.as_mut_ptr());
        libc::pthread_sigmask(libc::SIG_BLOCK, set.as_ptr(), std::ptr::null_mut());
    }
}

#[cfg(not(unix))]
pub(crate) fn block_thread_signals() {}
