//! Thread affinity: query the calling thread's processor set and pin it.
//!
//! Linux:
//!   - query: sched_getaffinity(0, ..) on the calling thread, mask sized from
//!     the possible-CPU list and grown while the kernel reports EINVAL.
//!   - pin: pthread_setaffinity_np with a single-CPU cpu_set_t.
//! Elsewhere both operations report `Unsupported`.

use std::io;

use crate::binding::BindingReport;
use crate::error::QueryError;

#[cfg(target_os = "linux")]
const POSSIBLE_CPUS: &str = "/sys/devices/system/cpu/possible";

// Upper bound on mask growth.
#[cfg(target_os = "linux")]
const MAX_MASK_WORDS: usize = crate::binding::MAX_CPUS / 64;

/// Processor binding of the calling thread.
#[cfg(target_os = "linux")]
pub fn current_thread_binding() -> Result<BindingReport, QueryError> {
    let configured = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
    if configured < 1 {
        return Err(QueryError::InitFailed(io::Error::last_os_error()));
    }
    let bits = possible_cpus()?.max(configured as usize);
    let mut words = bits.div_ceil(64).max(core::mem::size_of::<libc::cpu_set_t>() / 8);

    loop {
        let mut mask: Vec<u64> = Vec::new();
        mask.try_reserve_exact(words)
            .map_err(|_| QueryError::AllocFailed { words })?;
        mask.resize(words, 0);

        // pid 0 addresses the calling thread.
        let rc = unsafe {
            libc::sched_getaffinity(
                0,
                words * core::mem::size_of::<u64>(),
                mask.as_mut_ptr().cast::<libc::cpu_set_t>(),
            )
        };
        if rc == 0 {
            return Ok(BindingReport::from_words(mask));
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINVAL) && words < MAX_MASK_WORDS {
            words *= 2;
            continue;
        }
        return Err(QueryError::QueryFailed {
            operation: "sched_getaffinity",
            source: err,
        });
    }
}

/// Processor binding of the calling thread.
#[cfg(not(target_os = "linux"))]
pub fn current_thread_binding() -> Result<BindingReport, QueryError> {
    Err(QueryError::QueryFailed {
        operation: "thread_affinity_query",
        source: io::Error::from(io::ErrorKind::Unsupported),
    })
}

/// Number of CPU ids the kernel may ever hand out, from the possible list.
///
/// A missing file is not an error (containers sometimes hide sysfs); the
/// caller then falls back to the configured processor count.
#[cfg(target_os = "linux")]
fn possible_cpus() -> Result<usize, QueryError> {
    match std::fs::read_to_string(POSSIBLE_CPUS) {
        Ok(text) => parse_possible(&text),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(QueryError::LoadFailed(format!("{POSSIBLE_CPUS}: {e}"))),
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_possible(text: &str) -> Result<usize, QueryError> {
    text.parse::<crate::binding::CpuList>()
        .map(|list| list.max() + 1)
        .map_err(|_| QueryError::LoadFailed(format!("unparsable cpu list {:?}", text.trim())))
}

/// Pin the calling thread to a single logical CPU.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(cpu: usize) -> Result<(), QueryError> {
    use core::mem::{size_of, zeroed};

    let setsize = size_of::<libc::cpu_set_t>() * 8;
    if cpu >= setsize {
        return Err(QueryError::QueryFailed {
            operation: "pthread_setaffinity_np",
            source: io::Error::from_raw_os_error(libc::EINVAL),
        });
    }
    unsafe {
        let mut set: libc::cpu_set_t = zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        let rc = libc::pthread_setaffinity_np(
            libc::pthread_self(),
            size_of::<libc::cpu_set_t>(),
            &set as *const libc::cpu_set_t,
        );
        if rc != 0 {
            return Err(QueryError::QueryFailed {
                operation: "pthread_setaffinity_np",
                source: io::Error::from_raw_os_error(rc),
            });
        }
    }
    Ok(())
}

/// Pin the calling thread to a single logical CPU.
#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_cpu: usize) -> Result<(), QueryError> {
    Err(QueryError::QueryFailed {
        operation: "thread_affinity_set",
        source: io::Error::from(io::ErrorKind::Unsupported),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn possible_list_gives_id_bound() {
        assert_eq!(parse_possible("0-7\n").unwrap(), 8);
        assert_eq!(parse_possible("0").unwrap(), 1);
        assert_eq!(parse_possible("0-3,8-11").unwrap(), 12);
        assert!(matches!(
            parse_possible("garbage"),
            Err(QueryError::LoadFailed(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn calling_thread_has_at_least_one_cpu() {
        let report = current_thread_binding().unwrap();
        assert!(report.count() >= 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pinning_narrows_the_reported_set() {
        let cpu = std::thread::spawn(|| {
            let allowed = current_thread_binding().unwrap();
            let cpu = allowed.cpus().next().unwrap();
            pin_current_thread(cpu).unwrap();
            (cpu, current_thread_binding().unwrap())
        })
        .join()
        .unwrap();
        assert_eq!(cpu.1, BindingReport::from_cpus([cpu.0]));
    }
}
